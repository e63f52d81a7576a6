//! # Lifecycle Transitions
//!
//! Pure updater functions for every legal task mutation. Each takes the
//! record and the current time, mutates the record in place when the
//! precondition holds, and returns an outcome describing what changed.
//! Callers run these inside `store::modify`, so a function may execute
//! several times before its write commits; none of them performs side
//! effects, and a failed precondition leaves the record untouched (the
//! caller observes the no-op and reports conflict or replays idempotently).

use chrono::{DateTime, Utc};

use crate::constants::system;
use crate::models::{Run, Task};
use crate::state_machine::{ReasonCreated, ReasonResolved, RunState};

/// Outcome of scheduling an initial run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScheduleOutcome {
    /// An initial pending run was appended.
    Scheduled { run_id: usize },
    /// The task already has runs; nothing changed.
    AlreadyScheduled,
}

/// Append the initial pending run, unless the task already has runs.
pub fn schedule_task(task: &mut Task, reason: ReasonCreated, now: DateTime<Utc>) -> ScheduleOutcome {
    if !task.runs.is_empty() {
        return ScheduleOutcome::AlreadyScheduled;
    }
    task.runs.push(Run::pending(reason, now));
    ScheduleOutcome::Scheduled { run_id: 0 }
}

/// Outcome of a rerun request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RerunOutcome {
    /// A new pending run was appended and the retry budget reset.
    Rerun { run_id: usize },
    /// The latest run is still pending or running; nothing changed.
    AlreadyActive,
    /// The run limit is reached; nothing changed.
    TooManyRuns,
}

/// Append a rerun, resetting `retries_left`. Legal from any terminal state
/// and from `unscheduled`.
pub fn rerun_task(task: &mut Task, now: DateTime<Utc>) -> RerunOutcome {
    if task.runs.last().map(|run| run.state.is_active()).unwrap_or(false) {
        return RerunOutcome::AlreadyActive;
    }
    if task.runs.len() >= system::MAX_RUNS_ALLOWED {
        return RerunOutcome::TooManyRuns;
    }
    task.runs.push(Run::pending(ReasonCreated::Rerun, now));
    task.retries_left = task.retries;
    task.taken_until = None;
    RerunOutcome::Rerun {
        run_id: task.runs.len() - 1,
    }
}

/// Outcome of a cancellation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelOutcome {
    /// The active (or synthesized) run was resolved `canceled`.
    Canceled { run_id: usize },
    /// The task was already resolved; nothing changed.
    AlreadyResolved,
}

/// Cancel the task. An unscheduled task gets a single run created and
/// resolved in one step, so it can no longer be scheduled (only rerun).
pub fn cancel_task(task: &mut Task, now: DateTime<Utc>) -> CancelOutcome {
    match task.runs.last_mut() {
        None => {
            task.runs.push(Run::resolved_on_creation(
                ReasonCreated::Exception,
                ReasonResolved::Canceled,
                now,
            ));
            CancelOutcome::Canceled { run_id: 0 }
        }
        Some(run) if run.state.is_active() => {
            run.resolve(RunState::Exception, ReasonResolved::Canceled, now);
            task.taken_until = None;
            CancelOutcome::Canceled {
                run_id: task.runs.len() - 1,
            }
        }
        Some(_) => CancelOutcome::AlreadyResolved,
    }
}

/// Outcome of a claim attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClaimOutcome {
    /// The run transitioned pending → running and is bound to the worker.
    Claimed,
    /// The addressed run is not the latest pending run; nothing changed.
    /// The caller distinguishes idempotent replay from conflict by checking
    /// the worker binding afterwards.
    NotPending,
}

/// Claim the latest pending run for a worker.
pub fn claim_task(
    task: &mut Task,
    run_id: usize,
    worker_group: &str,
    worker_id: &str,
    hint_id: Option<&str>,
    taken_until: DateTime<Utc>,
    now: DateTime<Utc>,
) -> ClaimOutcome {
    if task.runs.len() != run_id + 1 {
        return ClaimOutcome::NotPending;
    }
    let run = &mut task.runs[run_id];
    if run.state != RunState::Pending {
        return ClaimOutcome::NotPending;
    }

    run.state = RunState::Running;
    run.worker_group = Some(worker_group.to_string());
    run.worker_id = Some(worker_id.to_string());
    run.hint_id = hint_id.map(str::to_string);
    run.taken_until = Some(taken_until);
    run.started = Some(now);
    task.taken_until = Some(taken_until);
    ClaimOutcome::Claimed
}

/// Outcome of a reclaim.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReclaimOutcome {
    /// The claim was extended.
    Reclaimed,
    /// The run is resolved or not the latest running run; nothing changed.
    NotRunning,
}

/// Extend the claim on the latest running run. `taken_until` only ever
/// moves forward; a reclaim racing an already-later expiry keeps the later
/// value.
pub fn reclaim_task(task: &mut Task, run_id: usize, taken_until: DateTime<Utc>) -> ReclaimOutcome {
    if task.runs.len() != run_id + 1 {
        return ReclaimOutcome::NotRunning;
    }
    let run = &mut task.runs[run_id];
    if run.state != RunState::Running {
        return ReclaimOutcome::NotRunning;
    }

    let extended = run.taken_until.map(|t| t.max(taken_until)).unwrap_or(taken_until);
    run.taken_until = Some(extended);
    task.taken_until = Some(extended);
    ReclaimOutcome::Reclaimed
}

/// Outcome of resolving a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolveOutcome {
    /// The run was resolved; a retry run may have been appended.
    Resolved { retry_run_id: Option<usize> },
    /// The run is not the latest running run; nothing changed.
    NotRunning,
}

/// Resolve the latest running run to a terminal state. When `retry_reason`
/// is given and retries remain, a replacement pending run is appended and
/// the countdown decremented.
pub fn resolve_run(
    task: &mut Task,
    run_id: usize,
    state: RunState,
    reason: ReasonResolved,
    retry_reason: Option<ReasonCreated>,
    now: DateTime<Utc>,
) -> ResolveOutcome {
    debug_assert!(state.is_terminal());
    if task.runs.len() != run_id + 1 {
        return ResolveOutcome::NotRunning;
    }
    let run = &mut task.runs[run_id];
    if run.state != RunState::Running {
        return ResolveOutcome::NotRunning;
    }

    run.resolve(state, reason, now);
    task.taken_until = None;

    let mut retry_run_id = None;
    if let Some(reason_created) = retry_reason {
        if task.retries_left > 0 {
            task.retries_left -= 1;
            task.runs.push(Run::pending(reason_created, now));
            retry_run_id = Some(task.runs.len() - 1);
        }
    }
    ResolveOutcome::Resolved { retry_run_id }
}

/// Outcome of a claim-expiry check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClaimExpiryOutcome {
    /// The claim had lapsed; the run is resolved `claim-expired` and a
    /// retry run may have been appended.
    Expired { retry_run_id: Option<usize> },
    /// The message was stale (reclaimed, resolved, past deadline); nothing
    /// changed.
    Stale,
}

/// Resolve a lapsed claim, advised by a claim-expiry message carrying the
/// `taken_until` it was enqueued for. A run reclaimed further into the
/// future no longer matches and the message is stale. Tasks already past
/// their deadline are left for the deadline reaper, which forgets
/// claim-expired in favor of deadline-exceeded.
pub fn expire_claim(
    task: &mut Task,
    run_id: usize,
    taken_until: DateTime<Utc>,
    now: DateTime<Utc>,
) -> ClaimExpiryOutcome {
    if task.runs.len() != run_id + 1 {
        return ClaimExpiryOutcome::Stale;
    }
    if task.deadline <= now {
        return ClaimExpiryOutcome::Stale;
    }
    let run = &mut task.runs[run_id];
    if run.state != RunState::Running || run.taken_until != Some(taken_until) {
        return ClaimExpiryOutcome::Stale;
    }

    run.resolve(RunState::Exception, ReasonResolved::ClaimExpired, now);
    // task.taken_until stays as-is: the claim-expiry message matches on it,
    // and must keep matching until the reaper has finished publishing

    let mut retry_run_id = None;
    if task.retries_left > 0 {
        task.retries_left -= 1;
        task.runs.push(Run::pending(ReasonCreated::Retry, now));
        retry_run_id = Some(task.runs.len() - 1);
    }
    ClaimExpiryOutcome::Expired { retry_run_id }
}

/// Outcome of a deadline check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeadlineOutcome {
    /// The task was unresolved past its deadline and is now resolved
    /// `deadline-exceeded`.
    Resolved { run_id: usize },
    /// The task was already resolved; nothing changed.
    AlreadyResolved,
}

/// Force an unresolved task past its deadline into a terminal state. An
/// unscheduled task gets a run created and resolved in one step.
pub fn expire_deadline(task: &mut Task, now: DateTime<Utc>) -> DeadlineOutcome {
    match task.runs.last_mut() {
        None => {
            task.runs.push(Run::resolved_on_creation(
                ReasonCreated::Exception,
                ReasonResolved::DeadlineExceeded,
                now,
            ));
            DeadlineOutcome::Resolved { run_id: 0 }
        }
        Some(run) if run.state.is_active() => {
            run.resolve(RunState::Exception, ReasonResolved::DeadlineExceeded, now);
            task.taken_until = None;
            DeadlineOutcome::Resolved {
                run_id: task.runs.len() - 1,
            }
        }
        Some(_) => DeadlineOutcome::AlreadyResolved,
    }
}
