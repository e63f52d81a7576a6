//! # Task Model
//!
//! The task record is the primary unit of the queue: an immutable definition
//! plus the mutable run list and claim denormalization that the lifecycle
//! state machine operates on.
//!
//! ## Key Invariants
//!
//! - `runs` is append-only and never reordered; `run_id` equals the index.
//! - At most one run is in a non-terminal state at any time.
//! - `taken_until` mirrors the active run's claim expiry so claim-expiration
//!   messages can be checked without scanning runs.
//! - All definition fields are immutable after creation; repeating `create`
//!   with an identical definition is a no-op replay.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::constants::system;
use crate::error::{QueueError, Result};
use crate::models::Run;
use crate::state_machine::TaskState;

/// Task priority, honored when distributing pending runs to workers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Priority {
    Highest,
    VeryHigh,
    High,
    Medium,
    Low,
    VeryLow,
    /// Default priority. The legacy alias `normal` parses to this.
    #[serde(alias = "normal")]
    Lowest,
}

impl Priority {
    /// All priorities, ordered from most to least urgent. Pending queues are
    /// polled in this order.
    pub const ALL: [Priority; 7] = [
        Priority::Highest,
        Priority::VeryHigh,
        Priority::High,
        Priority::Medium,
        Priority::Low,
        Priority::VeryLow,
        Priority::Lowest,
    ];
}

impl Default for Priority {
    fn default() -> Self {
        Priority::Lowest
    }
}

impl std::fmt::Display for Priority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Highest => "highest",
            Self::VeryHigh => "very-high",
            Self::High => "high",
            Self::Medium => "medium",
            Self::Low => "low",
            Self::VeryLow => "very-low",
            Self::Lowest => "lowest",
        };
        write!(f, "{s}")
    }
}

/// Dependency satisfaction policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DependencyRequirement {
    /// Every dependency must resolve `completed`.
    AllCompleted,
    /// Every dependency must reach any terminal state.
    AllResolved,
}

impl Default for DependencyRequirement {
    fn default() -> Self {
        DependencyRequirement::AllCompleted
    }
}

/// Human-oriented task metadata.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TaskMetadata {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub owner: String,
    #[serde(default)]
    pub source: String,
}

fn default_payload() -> serde_json::Value {
    serde_json::json!({})
}

/// Caller-supplied task definition, as accepted by `createTask`/`defineTask`.
///
/// Optional fields are defaulted during intake; see [`TaskDefinition::into_task`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskDefinition {
    pub provisioner_id: String,
    pub worker_type: String,
    #[serde(default = "TaskDefinition::default_scheduler_id")]
    pub scheduler_id: String,
    /// Defaults to the task's own id, forming a single-task group.
    #[serde(default)]
    pub task_group_id: Option<String>,
    #[serde(default)]
    pub dependencies: Vec<String>,
    #[serde(default)]
    pub requires: DependencyRequirement,
    #[serde(default)]
    pub routes: Vec<String>,
    #[serde(default)]
    pub priority: Priority,
    #[serde(default = "TaskDefinition::default_retries")]
    pub retries: u32,
    pub created: DateTime<Utc>,
    pub deadline: DateTime<Utc>,
    #[serde(default)]
    pub expires: Option<DateTime<Utc>>,
    #[serde(default)]
    pub scopes: Vec<String>,
    #[serde(default = "default_payload")]
    pub payload: serde_json::Value,
    #[serde(default)]
    pub metadata: TaskMetadata,
    #[serde(default)]
    pub tags: HashMap<String, String>,
    #[serde(default = "default_payload")]
    pub extra: serde_json::Value,
}

impl TaskDefinition {
    fn default_scheduler_id() -> String {
        "-".to_string()
    }

    fn default_retries() -> u32 {
        5
    }

    /// Validate timestamps and contents, fill in defaults, and produce the
    /// task record with an empty run list.
    ///
    /// Validation rules:
    /// - `created` within ±15 min of `now`
    /// - `deadline` after `created`, not in the past, at most 5 days out
    ///   (15 min drift allowed)
    /// - `expires` defaults to `deadline` + 1 year and must not precede
    ///   `deadline`
    /// - scopes must not end in `**`
    pub fn into_task(self, task_id: &str, now: DateTime<Utc>) -> Result<Task> {
        if task_id.is_empty() {
            return Err(QueueError::input("taskId must not be empty"));
        }

        let drift = Duration::minutes(system::TIMESTAMP_DRIFT_MINUTES);

        if self.created < now - drift || self.created > now + drift {
            return Err(QueueError::input(format!(
                "`created` timestamp {} is not within {} minutes of the current time",
                self.created,
                system::TIMESTAMP_DRIFT_MINUTES,
            )));
        }
        if self.deadline <= self.created {
            return Err(QueueError::input("`deadline` must be after `created`"));
        }
        if self.deadline < now {
            return Err(QueueError::input("`deadline` cannot be in the past"));
        }
        if self.deadline > now + Duration::days(system::MAX_DEADLINE_DAYS) + drift {
            return Err(QueueError::input(format!(
                "`deadline` cannot be more than {} days into the future",
                system::MAX_DEADLINE_DAYS,
            )));
        }

        let expires = self
            .expires
            .unwrap_or(self.deadline + Duration::days(system::DEFAULT_EXPIRES_DAYS));
        if expires < self.deadline {
            return Err(QueueError::input("`expires` cannot be before `deadline`"));
        }

        if self.scopes.iter().any(|s| s.ends_with("**")) {
            return Err(QueueError::input("scopes must not end with `**`"));
        }
        if self.dependencies.len() > system::MAX_TASK_DEPENDENCIES {
            return Err(QueueError::input(format!(
                "a task may have at most {} dependencies",
                system::MAX_TASK_DEPENDENCIES,
            )));
        }

        Ok(Task {
            task_id: task_id.to_string(),
            provisioner_id: self.provisioner_id,
            worker_type: self.worker_type,
            scheduler_id: self.scheduler_id,
            task_group_id: self.task_group_id.unwrap_or_else(|| task_id.to_string()),
            dependencies: self.dependencies,
            requires: self.requires,
            routes: self.routes,
            priority: self.priority,
            retries: self.retries,
            retries_left: self.retries,
            created: self.created,
            deadline: self.deadline,
            expires,
            scopes: self.scopes,
            payload: self.payload,
            metadata: self.metadata,
            tags: self.tags,
            extra: self.extra,
            runs: Vec::new(),
            taken_until: None,
        })
    }
}

/// The stored task record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    pub task_id: String,
    pub provisioner_id: String,
    pub worker_type: String,
    pub scheduler_id: String,
    pub task_group_id: String,
    pub dependencies: Vec<String>,
    pub requires: DependencyRequirement,
    pub routes: Vec<String>,
    pub priority: Priority,
    pub retries: u32,
    pub retries_left: u32,
    pub created: DateTime<Utc>,
    pub deadline: DateTime<Utc>,
    pub expires: DateTime<Utc>,
    pub scopes: Vec<String>,
    pub payload: serde_json::Value,
    pub metadata: TaskMetadata,
    pub tags: HashMap<String, String>,
    pub extra: serde_json::Value,
    /// Ordered, append-only run list; `run_id` is the index.
    pub runs: Vec<Run>,
    /// Denormalized claim expiry of the active run, used to recognize stale
    /// claim-expiration messages without scanning runs.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub taken_until: Option<DateTime<Utc>>,
}

impl Task {
    /// State of the latest run, or `unscheduled` when no runs exist.
    pub fn state(&self) -> TaskState {
        self.runs
            .last()
            .map(|run| run.state.into())
            .unwrap_or(TaskState::Unscheduled)
    }

    /// The `provisionerId/workerType` pair identifying the worker pool.
    pub fn task_queue_id(&self) -> String {
        format!("{}/{}", self.provisioner_id, self.worker_type)
    }

    /// Externally observable status structure.
    pub fn status(&self) -> TaskStatus {
        TaskStatus {
            task_id: self.task_id.clone(),
            provisioner_id: self.provisioner_id.clone(),
            worker_type: self.worker_type.clone(),
            scheduler_id: self.scheduler_id.clone(),
            task_group_id: self.task_group_id.clone(),
            deadline: self.deadline,
            expires: self.expires,
            retries_left: self.retries_left,
            state: self.state(),
            runs: self
                .runs
                .iter()
                .enumerate()
                .map(|(run_id, run)| RunStatus {
                    run_id,
                    run: run.clone(),
                })
                .collect(),
        }
    }

    /// The immutable definition, reconstructed from the record. Two `create`
    /// calls are considered identical exactly when these compare equal.
    pub fn definition(&self) -> TaskDefinition {
        TaskDefinition {
            provisioner_id: self.provisioner_id.clone(),
            worker_type: self.worker_type.clone(),
            scheduler_id: self.scheduler_id.clone(),
            task_group_id: Some(self.task_group_id.clone()),
            dependencies: self.dependencies.clone(),
            requires: self.requires,
            routes: self.routes.clone(),
            priority: self.priority,
            retries: self.retries,
            created: self.created,
            deadline: self.deadline,
            expires: Some(self.expires),
            scopes: self.scopes.clone(),
            payload: self.payload.clone(),
            metadata: self.metadata.clone(),
            tags: self.tags.clone(),
            extra: self.extra.clone(),
        }
    }
}

/// One run within a status structure, carrying its index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunStatus {
    pub run_id: usize,
    #[serde(flatten)]
    pub run: Run,
}

/// Externally observable task status.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskStatus {
    pub task_id: String,
    pub provisioner_id: String,
    pub worker_type: String,
    pub scheduler_id: String,
    pub task_group_id: String,
    pub deadline: DateTime<Utc>,
    pub expires: DateTime<Utc>,
    pub retries_left: u32,
    pub state: TaskState,
    pub runs: Vec<RunStatus>,
}

/// Generate a fresh task id.
pub fn generate_task_id() -> String {
    uuid::Uuid::new_v4().simple().to_string()
}
