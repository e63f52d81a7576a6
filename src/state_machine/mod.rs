//! # Task State Machine
//!
//! State definitions and the pure transition functions applied through the
//! entity store's optimistic-concurrency `modify`. Idempotent replay
//! detection happens here: a failed precondition is a no-op, and the caller
//! inspects the untouched record to tell replays from conflicts.

pub mod states;
pub mod transitions;

pub use states::{ReasonCreated, ReasonResolved, RunState, TaskState};
pub use transitions::{
    cancel_task, claim_task, expire_claim, expire_deadline, reclaim_task, rerun_task,
    resolve_run, schedule_task, CancelOutcome, ClaimExpiryOutcome, ClaimOutcome, DeadlineOutcome,
    ReclaimOutcome, RerunOutcome, ResolveOutcome, ScheduleOutcome,
};
