//! Dependency-gated scheduling and task-group resolution signals.

mod common;

use common::{task_def, test_system};
use taskqueue_core::constants::exchanges;
use taskqueue_core::error::QueueError;
use taskqueue_core::models::{generate_task_id, DependencyRequirement};
use taskqueue_core::state_machine::TaskState;

#[tokio::test]
async fn test_dependency_gates_scheduling() {
    let system = test_system();
    let task_a = generate_task_id();
    let task_b = generate_task_id();

    // A runs on a different worker pool so B's pending queue stays clean
    let mut def_a = task_def();
    def_a.worker_type = "other-worker".to_string();
    system.create_task(&task_a, def_a).await.unwrap();

    let mut def_b = task_def();
    def_b.dependencies = vec![task_a.clone()];
    let status = system.create_task(&task_b, def_b).await.unwrap();
    assert_eq!(status.state, TaskState::Unscheduled);

    // Resolve A as completed; the resolver promotes B
    system.claim_task(&task_a, 0, "wg", "w1").await.unwrap();
    system.report_completed(&task_a, 0).await.unwrap();
    system.dependency_tracker().process_once().await.unwrap();

    let status = system.status(&task_b).await.unwrap();
    assert_eq!(status.state, TaskState::Pending);
    // ... and a pending hint exists for B
    assert_eq!(
        system.pending_tasks("test-prov", "test-worker").await.unwrap(),
        1,
    );
}

#[tokio::test]
async fn test_failed_dependency_blocks_all_completed() {
    let system = test_system();
    let task_a = generate_task_id();
    let task_b = generate_task_id();

    system.create_task(&task_a, task_def()).await.unwrap();
    let mut def_b = task_def();
    def_b.dependencies = vec![task_a.clone()];
    system.create_task(&task_b, def_b).await.unwrap();

    system.claim_task(&task_a, 0, "wg", "w1").await.unwrap();
    system.report_failed(&task_a, 0).await.unwrap();
    system.dependency_tracker().process_once().await.unwrap();

    // Default requires = all-completed: B stays unscheduled indefinitely
    let status = system.status(&task_b).await.unwrap();
    assert_eq!(status.state, TaskState::Unscheduled);
}

#[tokio::test]
async fn test_failed_dependency_satisfies_all_resolved() {
    let system = test_system();
    let task_a = generate_task_id();
    let task_b = generate_task_id();

    system.create_task(&task_a, task_def()).await.unwrap();
    let mut def_b = task_def();
    def_b.dependencies = vec![task_a.clone()];
    def_b.requires = DependencyRequirement::AllResolved;
    system.create_task(&task_b, def_b).await.unwrap();

    system.claim_task(&task_a, 0, "wg", "w1").await.unwrap();
    system.report_failed(&task_a, 0).await.unwrap();
    system.dependency_tracker().process_once().await.unwrap();

    let status = system.status(&task_b).await.unwrap();
    assert_eq!(status.state, TaskState::Pending);
}

#[tokio::test]
async fn test_missing_dependency_is_fatal() {
    let system = test_system();
    let task_id = generate_task_id();

    let mut def = task_def();
    def.dependencies = vec!["does-not-exist".to_string()];
    let err = system.create_task(&task_id, def).await.unwrap_err();
    assert!(matches!(err, QueueError::InputError(_)));

    // The task was not created
    let err = system.status(&task_id).await.unwrap_err();
    assert!(matches!(err, QueueError::ResourceNotFound(_)));
}

#[tokio::test]
async fn test_self_dependency_schedules_immediately() {
    let system = test_system();
    let task_id = generate_task_id();

    let mut def = task_def();
    def.dependencies = vec![task_id.clone()];
    let status = system.create_task(&task_id, def).await.unwrap();
    assert_eq!(status.state, TaskState::Pending);
}

#[tokio::test]
async fn test_already_resolved_dependency_schedules_at_creation() {
    let system = test_system();
    let task_a = generate_task_id();
    system.create_task(&task_a, task_def()).await.unwrap();
    system.claim_task(&task_a, 0, "wg", "w1").await.unwrap();
    system.report_completed(&task_a, 0).await.unwrap();

    let task_b = generate_task_id();
    let mut def_b = task_def();
    def_b.dependencies = vec![task_a.clone()];
    let status = system.create_task(&task_b, def_b).await.unwrap();
    assert_eq!(status.state, TaskState::Pending);
}

#[tokio::test]
async fn test_schedule_task_overrides_dependencies() {
    let system = test_system();
    let task_a = generate_task_id();
    let task_b = generate_task_id();

    system.create_task(&task_a, task_def()).await.unwrap();
    let mut def_b = task_def();
    def_b.dependencies = vec![task_a.clone()];
    system.create_task(&task_b, def_b).await.unwrap();

    // Force-schedule B while A is still pending
    let status = system.schedule_task(&task_b).await.unwrap();
    assert_eq!(status.state, TaskState::Pending);
}

#[tokio::test]
async fn test_defined_task_promoted_by_dependency_resolution() {
    let system = test_system();
    let task_a = generate_task_id();
    let task_b = generate_task_id();

    system.create_task(&task_a, task_def()).await.unwrap();
    let mut def_b = task_def();
    def_b.dependencies = vec![task_a.clone()];
    system.define_task(&task_b, def_b).await.unwrap();

    system.claim_task(&task_a, 0, "wg", "w1").await.unwrap();
    system.report_completed(&task_a, 0).await.unwrap();
    system.dependency_tracker().process_once().await.unwrap();

    let status = system.status(&task_b).await.unwrap();
    assert_eq!(status.state, TaskState::Pending);
}

#[tokio::test]
async fn test_list_dependent_tasks() {
    let system = test_system();
    let task_a = generate_task_id();
    let task_b = generate_task_id();
    let task_c = generate_task_id();

    system.create_task(&task_a, task_def()).await.unwrap();
    for dependent in [&task_b, &task_c] {
        let mut def = task_def();
        def.dependencies = vec![task_a.clone()];
        system.create_task(dependent, def).await.unwrap();
    }

    let page = system.list_dependent_tasks(&task_a, None, 10).await.unwrap();
    assert_eq!(page.tasks.len(), 2);
    let mut listed: Vec<&str> = page.tasks.iter().map(|t| t.task_id.as_str()).collect();
    listed.sort_unstable();
    let mut expected = vec![task_b.as_str(), task_c.as_str()];
    expected.sort_unstable();
    assert_eq!(listed, expected);
}

#[tokio::test]
async fn test_task_group_resolved_signal() {
    let system = test_system();
    let group = generate_task_id();
    let task_a = generate_task_id();
    let task_b = generate_task_id();

    for task_id in [&task_a, &task_b] {
        let mut def = task_def();
        def.task_group_id = Some(group.clone());
        system.create_task(task_id, def).await.unwrap();
    }

    let mut events = system.subscribe();

    system.claim_task(&task_a, 0, "wg", "w1").await.unwrap();
    system.report_completed(&task_a, 0).await.unwrap();
    system.dependency_tracker().process_once().await.unwrap();

    system.claim_task(&task_b, 0, "wg", "w1").await.unwrap();
    system.report_completed(&task_b, 0).await.unwrap();
    system.dependency_tracker().process_once().await.unwrap();

    let mut resolved_events = 0;
    while let Ok(event) = events.try_recv() {
        if event.exchange == exchanges::TASK_GROUP_RESOLVED {
            resolved_events += 1;
            assert_eq!(event.payload["taskGroupId"], group.as_str());
        }
    }
    assert_eq!(resolved_events, 1);
}
