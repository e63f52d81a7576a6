//! # Dependency Edge Model
//!
//! Requirement rows record that a dependent task is blocked on a required
//! task. Satisfied rows are marked rather than deleted so the edge survives
//! for `listDependentTasks`, and every row carries its own expiry for the
//! expiration reaper.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::DependencyRequirement;

/// One (dependent, required) edge.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DependencyEdge {
    pub dependent_task_id: String,
    pub required_task_id: String,
    /// The dependent's satisfaction policy, denormalized onto the edge so
    /// the resolver can act without loading the dependent task.
    pub requires: DependencyRequirement,
    pub satisfied: bool,
    pub expires: DateTime<Utc>,
}

/// Composite key of a dependency edge.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DependencyKey {
    pub dependent_task_id: String,
    pub required_task_id: String,
}

impl DependencyEdge {
    pub fn key(&self) -> DependencyKey {
        DependencyKey {
            dependent_task_id: self.dependent_task_id.clone(),
            required_task_id: self.required_task_id.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_edge_key() {
        let edge = DependencyEdge {
            dependent_task_id: "b".to_string(),
            required_task_id: "a".to_string(),
            requires: DependencyRequirement::AllCompleted,
            satisfied: false,
            expires: Utc::now(),
        };
        let key = edge.key();
        assert_eq!(key.dependent_task_id, "b");
        assert_eq!(key.required_task_id, "a");
    }
}
