//! Shared helpers for integration tests.
#![allow(dead_code)] // not every test binary uses every helper

use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;

use taskqueue_core::config::QueueConfig;
use taskqueue_core::models::{DependencyRequirement, Priority, TaskDefinition, TaskMetadata};
use taskqueue_core::orchestration::QueueSystem;

/// Configuration tuned for fast test turnaround: short long-polls, no
/// deadline slack, snappy reaper polling.
pub fn test_config() -> QueueConfig {
    let mut config = QueueConfig::default();
    config.claim.claim_timeout_seconds = 1;
    config.claim.work_claim_timeout_seconds = 1;
    config.claim.hint_poll_interval_ms = 10;
    config.reapers.deadline_delay_seconds = 0;
    config.reapers.polling_delay_ms = 10;
    config
}

pub fn test_system() -> QueueSystem {
    QueueSystem::new(test_config()).expect("test config must be valid")
}

/// A minimal valid task definition on the `test-prov/test-worker` queue.
pub fn task_def() -> TaskDefinition {
    task_def_with_deadline(Utc::now() + Duration::hours(1))
}

pub fn task_def_with_deadline(deadline: DateTime<Utc>) -> TaskDefinition {
    TaskDefinition {
        provisioner_id: "test-prov".to_string(),
        worker_type: "test-worker".to_string(),
        scheduler_id: "-".to_string(),
        task_group_id: None,
        dependencies: vec![],
        requires: DependencyRequirement::AllCompleted,
        routes: vec![],
        priority: Priority::Lowest,
        retries: 5,
        created: Utc::now(),
        deadline,
        expires: None,
        scopes: vec![],
        payload: serde_json::json!({"command": ["true"]}),
        metadata: TaskMetadata {
            name: "test task".to_string(),
            description: "a task under test".to_string(),
            owner: "tests@example.com".to_string(),
            source: "https://example.com/tests".to_string(),
        },
        tags: HashMap::new(),
        extra: serde_json::json!({}),
    }
}

pub const TASK_QUEUE_ID: &str = "test-prov/test-worker";
