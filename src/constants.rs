//! # System Constants
//!
//! Shared constants for the queue core: protocol limits, event exchange
//! names, and state groupings used across services and reapers.

/// Hard limits enforced by the task lifecycle protocol.
pub mod system {
    /// Maximum number of runs a single task may accumulate, including
    /// automatic retries and explicit reruns.
    pub const MAX_RUNS_ALLOWED: usize = 50;

    /// Maximum distance between `created` and `deadline`.
    pub const MAX_DEADLINE_DAYS: i64 = 5;

    /// Allowed clock drift when validating caller-supplied timestamps.
    pub const TIMESTAMP_DRIFT_MINUTES: i64 = 15;

    /// Default distance between `deadline` and `expires` when the task
    /// definition leaves `expires` out.
    pub const DEFAULT_EXPIRES_DAYS: i64 = 365;

    /// Window after an `exception` resolution during which artifacts may
    /// still be created, so workers can upload post-mortem logs.
    pub const ARTIFACT_GRACE_MINUTES: i64 = 25;

    /// Upper bound on the size of a dependency set.
    pub const MAX_TASK_DEPENDENCIES: usize = 10_000;
}

/// Exchange names for lifecycle event publication.
pub mod exchanges {
    pub const TASK_DEFINED: &str = "task-defined";
    pub const TASK_PENDING: &str = "task-pending";
    pub const TASK_RUNNING: &str = "task-running";
    pub const TASK_COMPLETED: &str = "task-completed";
    pub const TASK_FAILED: &str = "task-failed";
    pub const TASK_EXCEPTION: &str = "task-exception";
    pub const ARTIFACT_CREATED: &str = "artifact-created";
    pub const TASK_GROUP_RESOLVED: &str = "task-group-resolved";
}

/// State groupings used when classifying a task from its latest run.
pub mod status_groups {
    use crate::state_machine::RunState;

    /// States that count as resolved for dependency and group accounting.
    pub const RESOLVED_STATES: &[RunState] = &[
        RunState::Completed,
        RunState::Failed,
        RunState::Exception,
    ];

    /// States in which a run still occupies the task's single active slot.
    pub const ACTIVE_STATES: &[RunState] = &[RunState::Pending, RunState::Running];
}
