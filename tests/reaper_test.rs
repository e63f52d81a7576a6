//! Liveness enforcement: deadline reaper, claim reaper, and the expiration
//! reapers. These tests drive single reaper passes directly rather than
//! spawning the background loops, so timing stays deterministic.

mod common;

use chrono::{Duration, Utc};
use common::{task_def, task_def_with_deadline, test_system};
use std::time::Duration as StdDuration;
use taskqueue_core::constants::exchanges;
use taskqueue_core::error::QueueError;
use taskqueue_core::models::generate_task_id;
use taskqueue_core::state_machine::{ReasonCreated, ReasonResolved, RunState, TaskState};

#[tokio::test]
async fn test_deadline_reaper_resolves_unscheduled_task() {
    let system = test_system();
    let task_id = generate_task_id();
    let def = task_def_with_deadline(Utc::now() + Duration::milliseconds(300));
    system.define_task(&task_id, def).await.unwrap();

    let mut events = system.subscribe();
    tokio::time::sleep(StdDuration::from_millis(400)).await;
    system.deadline_reaper().process_once().await.unwrap();

    let status = system.status(&task_id).await.unwrap();
    assert_eq!(status.state, TaskState::Exception);
    assert_eq!(status.runs.len(), 1);
    assert_eq!(status.runs[0].run.state, RunState::Exception);
    assert_eq!(
        status.runs[0].run.reason_resolved,
        Some(ReasonResolved::DeadlineExceeded),
    );

    let event = events.recv().await.unwrap();
    assert_eq!(event.exchange, exchanges::TASK_EXCEPTION);
}

#[tokio::test]
async fn test_deadline_reaper_resolves_running_task_without_retry() {
    let system = test_system();
    let task_id = generate_task_id();
    let def = task_def_with_deadline(Utc::now() + Duration::milliseconds(300));
    system.create_task(&task_id, def).await.unwrap();
    system.claim_task(&task_id, 0, "wg", "w1").await.unwrap();

    tokio::time::sleep(StdDuration::from_millis(400)).await;
    system.deadline_reaper().process_once().await.unwrap();

    let status = system.status(&task_id).await.unwrap();
    assert_eq!(status.state, TaskState::Exception);
    // Deadline expiry never consumes retries
    assert_eq!(status.runs.len(), 1);
    assert_eq!(status.retries_left, 5);
}

#[tokio::test]
async fn test_deadline_reaper_ignores_resolved_task() {
    let system = test_system();
    let task_id = generate_task_id();
    let def = task_def_with_deadline(Utc::now() + Duration::milliseconds(300));
    system.create_task(&task_id, def).await.unwrap();
    system.claim_task(&task_id, 0, "wg", "w1").await.unwrap();
    system.report_completed(&task_id, 0).await.unwrap();

    tokio::time::sleep(StdDuration::from_millis(400)).await;
    system.deadline_reaper().process_once().await.unwrap();

    let status = system.status(&task_id).await.unwrap();
    assert_eq!(status.state, TaskState::Completed);
}

#[tokio::test]
async fn test_claim_expiry_retries_until_exhausted() {
    let system = test_system();
    let task_id = generate_task_id();
    let mut def = task_def();
    def.retries = 2;
    system.create_task(&task_id, def).await.unwrap();

    // Each lapsed claim appends one retry run, claim timeout is 1s
    for expected_runs in [2usize, 3] {
        let run_id = expected_runs - 2;
        system.claim_task(&task_id, run_id, "wg", "w1").await.unwrap();
        tokio::time::sleep(StdDuration::from_millis(1100)).await;
        system.claim_reaper().process_once().await.unwrap();

        let status = system.status(&task_id).await.unwrap();
        assert_eq!(status.runs.len(), expected_runs);
        assert_eq!(
            status.runs[run_id].run.reason_resolved,
            Some(ReasonResolved::ClaimExpired),
        );
        assert_eq!(status.runs[expected_runs - 1].run.state, RunState::Pending);
        assert_eq!(
            status.runs[expected_runs - 1].run.reason_created,
            ReasonCreated::Retry,
        );
    }

    // Retries exhausted: the third lapse terminates the task
    system.claim_task(&task_id, 2, "wg", "w1").await.unwrap();
    tokio::time::sleep(StdDuration::from_millis(1100)).await;
    system.claim_reaper().process_once().await.unwrap();

    let status = system.status(&task_id).await.unwrap();
    assert_eq!(status.state, TaskState::Exception);
    assert_eq!(status.runs.len(), 3);
    assert_eq!(status.retries_left, 0);
}

#[tokio::test]
async fn test_reclaim_defuses_claim_expiry() {
    let system = test_system();
    let task_id = generate_task_id();
    system.create_task(&task_id, task_def()).await.unwrap();
    system.claim_task(&task_id, 0, "wg", "w1").await.unwrap();

    // Reclaim before the first takenUntil lapses
    tokio::time::sleep(StdDuration::from_millis(600)).await;
    system.reclaim_task(&task_id, 0, "wg", "w1").await.unwrap();

    // The original claim-expiry message is now visible but stale
    tokio::time::sleep(StdDuration::from_millis(500)).await;
    system.claim_reaper().process_once().await.unwrap();

    let status = system.status(&task_id).await.unwrap();
    assert_eq!(status.state, TaskState::Running);
}

#[tokio::test]
async fn test_expiration_reaper_collects_everything() {
    let system = test_system();
    let task_a = generate_task_id();
    let task_b = generate_task_id();

    system.create_task(&task_a, task_def()).await.unwrap();
    let mut def_b = task_def();
    def_b.dependencies = vec![task_a.clone()];
    system.create_task(&task_b, def_b).await.unwrap();

    // Everything expires within deadline + 1 year
    let far_future = Utc::now() + Duration::days(400);
    let counts = system
        .expiration_reaper()
        .process_once(far_future)
        .await
        .unwrap();
    assert_eq!(counts.tasks, 2);
    assert_eq!(counts.task_groups, 2);
    assert_eq!(counts.group_members, 2);
    assert_eq!(counts.dependencies, 1);

    let err = system.status(&task_a).await.unwrap_err();
    assert!(matches!(err, QueueError::ResourceNotFound(_)));
}

#[tokio::test]
async fn test_group_membership_expires_per_row() {
    let system = test_system();
    let group = generate_task_id();
    let task_a = generate_task_id();
    let task_b = generate_task_id();

    // A expires shortly after its deadline, B keeps the one-year default
    let mut def_a = task_def_with_deadline(Utc::now() + Duration::minutes(30));
    def_a.task_group_id = Some(group.clone());
    def_a.expires = Some(Utc::now() + Duration::minutes(31));
    system.create_task(&task_a, def_a).await.unwrap();

    let mut def_b = task_def();
    def_b.task_group_id = Some(group.clone());
    system.create_task(&task_b, def_b).await.unwrap();

    let counts = system
        .expiration_reaper()
        .process_once(Utc::now() + Duration::days(1))
        .await
        .unwrap();
    assert_eq!(counts.tasks, 1);
    assert_eq!(counts.group_members, 1);
    assert_eq!(counts.task_groups, 0);

    // The group survives with only B listed
    let page = system.list_task_group(&group, None, 10).await.unwrap();
    assert_eq!(page.tasks.len(), 1);
    assert_eq!(page.tasks[0].task_id, task_b);
}

#[tokio::test]
async fn test_reap_once_runs_all_reapers() {
    let system = test_system();
    let task_id = generate_task_id();
    let def = task_def_with_deadline(Utc::now() + Duration::milliseconds(200));
    system.create_task(&task_id, def).await.unwrap();

    tokio::time::sleep(StdDuration::from_millis(300)).await;
    system.reap_once().await.unwrap();

    let status = system.status(&task_id).await.unwrap();
    assert_eq!(status.state, TaskState::Exception);
}

#[tokio::test]
async fn test_background_loops_enforce_deadline() {
    let system = test_system();
    system.start();

    let task_id = generate_task_id();
    let def = task_def_with_deadline(Utc::now() + Duration::milliseconds(200));
    system.create_task(&task_id, def).await.unwrap();

    // Within the polling interval the deadline reaper resolves the task
    tokio::time::sleep(StdDuration::from_millis(700)).await;
    let status = system.status(&task_id).await.unwrap();
    assert_eq!(status.state, TaskState::Exception);
    assert_eq!(
        status.runs[0].run.reason_resolved,
        Some(ReasonResolved::DeadlineExceeded),
    );

    system.stop().await;
}
