//! # Advisory Message Payloads
//!
//! Message formats for the distribution queues. Every message is advisory:
//! it may be duplicated, delayed, or reordered, and consumers re-validate
//! the record's current state before acting.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::state_machine::RunState;

/// Hint that a run may be pending for a task queue. An over-approximation:
/// if a task is pending a hint exists, but a hint does not imply the task is
/// still pending.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingMessage {
    pub task_id: String,
    pub run_id: usize,
    /// Opaque id tying a claim to the hint that produced it.
    pub hint_id: String,
}

/// Becomes visible once a claim's `takenUntil` has passed; advises that the
/// run may need resolving as `claim-expired`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClaimExpiryMessage {
    pub task_id: String,
    pub run_id: usize,
    pub taken_until: DateTime<Utc>,
}

/// Becomes visible once a task's deadline has passed; advises that the task
/// may need resolving as `deadline-exceeded`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeadlineMessage {
    pub task_id: String,
    pub task_group_id: String,
    pub scheduler_id: String,
    pub deadline: DateTime<Utc>,
}

/// Advises that a task reached a terminal state; consumed by the dependency
/// resolver to promote dependents and update group accounting.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolutionMessage {
    pub task_id: String,
    pub task_group_id: String,
    pub scheduler_id: String,
    /// Terminal state the task resolved to.
    pub resolution: RunState,
}
