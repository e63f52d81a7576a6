//! # Task Group Model
//!
//! Task groups pin a `scheduler_id` for every member and track which members
//! have ever been resolved, driving the task-group-resolved signal. Group
//! definitions and membership rows expire independently of each other and of
//! the member tasks.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Group definition: the scheduler-id pin shared by all members.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskGroup {
    pub task_group_id: String,
    pub scheduler_id: String,
    pub expires: DateTime<Utc>,
}

/// Membership of a single task in a group.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskGroupMember {
    pub task_group_id: String,
    pub task_id: String,
    pub expires: DateTime<Utc>,
    /// Set the first time the member's task reaches a terminal state. A
    /// group with every member marked is considered resolved.
    pub ever_resolved: bool,
}

/// Composite key of a membership row.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TaskGroupMemberKey {
    pub task_group_id: String,
    pub task_id: String,
}

impl TaskGroupMember {
    pub fn key(&self) -> TaskGroupMemberKey {
        TaskGroupMemberKey {
            task_group_id: self.task_group_id.clone(),
            task_id: self.task_id.clone(),
        }
    }
}
