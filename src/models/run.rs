//! # Run Model
//!
//! One execution attempt of a task. Runs are only ever appended to a task's
//! run list, `run_id` is always the index in that list, and at most one run
//! is in a non-terminal state at any time.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::state_machine::{ReasonCreated, ReasonResolved, RunState};

/// A single execution attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Run {
    pub state: RunState,
    pub reason_created: ReasonCreated,
    /// Set only when `state` is terminal.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason_resolved: Option<ReasonResolved>,
    /// Worker binding, set once the run is claimed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub worker_group: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub worker_id: Option<String>,
    /// Id of the pending-queue hint used to claim this run, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hint_id: Option<String>,
    /// Claim expiry; an unrenewed claim is dead once this passes.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub taken_until: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scheduled: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resolved: Option<DateTime<Utc>>,
}

impl Run {
    /// A fresh pending run, waiting in the distribution queue.
    pub fn pending(reason_created: ReasonCreated, now: DateTime<Utc>) -> Self {
        Self {
            state: RunState::Pending,
            reason_created,
            reason_resolved: None,
            worker_group: None,
            worker_id: None,
            hint_id: None,
            taken_until: None,
            scheduled: Some(now),
            started: None,
            resolved: None,
        }
    }

    /// A run created and resolved in a single step, e.g. canceling an
    /// unscheduled task or a deadline passing before any run existed.
    pub fn resolved_on_creation(
        reason_created: ReasonCreated,
        reason_resolved: ReasonResolved,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            state: RunState::Exception,
            reason_created,
            reason_resolved: Some(reason_resolved),
            worker_group: None,
            worker_id: None,
            hint_id: None,
            taken_until: None,
            scheduled: Some(now),
            started: None,
            resolved: Some(now),
        }
    }

    /// Resolve this run in place. The caller is responsible for having
    /// checked the transition is legal.
    pub fn resolve(&mut self, state: RunState, reason: ReasonResolved, now: DateTime<Utc>) {
        debug_assert!(state.is_terminal());
        self.state = state;
        self.reason_resolved = Some(reason);
        self.resolved = Some(now);
    }

    /// Whether this run is bound to the given worker identity.
    pub fn claimed_by(&self, worker_group: &str, worker_id: &str) -> bool {
        self.worker_group.as_deref() == Some(worker_group)
            && self.worker_id.as_deref() == Some(worker_id)
    }
}
