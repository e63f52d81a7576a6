use serde::{Deserialize, Serialize};
use std::fmt;

/// Externally observable task state, derived from the state of the latest
/// run, or `unscheduled` when no runs exist.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TaskState {
    /// Task is defined but has no runs yet
    Unscheduled,
    /// Latest run is waiting to be claimed by a worker
    Pending,
    /// Latest run is claimed and executing
    Running,
    /// Latest run completed successfully
    Completed,
    /// Latest run failed
    Failed,
    /// Latest run was resolved as an exception
    Exception,
}

impl TaskState {
    /// Check if this is a terminal state (no further transitions without an
    /// explicit rerun)
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Exception)
    }
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unscheduled => write!(f, "unscheduled"),
            Self::Pending => write!(f, "pending"),
            Self::Running => write!(f, "running"),
            Self::Completed => write!(f, "completed"),
            Self::Failed => write!(f, "failed"),
            Self::Exception => write!(f, "exception"),
        }
    }
}

impl std::str::FromStr for TaskState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "unscheduled" => Ok(Self::Unscheduled),
            "pending" => Ok(Self::Pending),
            "running" => Ok(Self::Running),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            "exception" => Ok(Self::Exception),
            _ => Err(format!("Invalid task state: {s}")),
        }
    }
}

/// State of a single execution attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RunState {
    /// Run is waiting to be claimed
    Pending,
    /// Run is claimed by a worker and executing
    Running,
    /// Run completed successfully
    Completed,
    /// Run failed
    Failed,
    /// Run was resolved as an exception
    Exception,
}

impl RunState {
    /// Check if this is a terminal state (the run can never change again)
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Exception)
    }

    /// Check if this run occupies the task's single active slot
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Pending | Self::Running)
    }
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Running => write!(f, "running"),
            Self::Completed => write!(f, "completed"),
            Self::Failed => write!(f, "failed"),
            Self::Exception => write!(f, "exception"),
        }
    }
}

impl From<RunState> for TaskState {
    fn from(state: RunState) -> Self {
        match state {
            RunState::Pending => TaskState::Pending,
            RunState::Running => TaskState::Running,
            RunState::Completed => TaskState::Completed,
            RunState::Failed => TaskState::Failed,
            RunState::Exception => TaskState::Exception,
        }
    }
}

/// Why a run was appended to the task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ReasonCreated {
    /// First run of a scheduled task
    Scheduled,
    /// Automatic retry after worker loss (claim expired or worker shutdown)
    Retry,
    /// Explicit rerun of a resolved task
    Rerun,
    /// Run synthesized only to carry a resolution, e.g. canceling an
    /// unscheduled task
    Exception,
    /// Retry requested by the task itself via `intermittent-task`
    TaskRetry,
}

impl fmt::Display for ReasonCreated {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Scheduled => write!(f, "scheduled"),
            Self::Retry => write!(f, "retry"),
            Self::Rerun => write!(f, "rerun"),
            Self::Exception => write!(f, "exception"),
            Self::TaskRetry => write!(f, "task-retry"),
        }
    }
}

/// Why a run reached its terminal state. These are successful terminal
/// transitions, not system failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ReasonResolved {
    Completed,
    Failed,
    DeadlineExceeded,
    Canceled,
    ClaimExpired,
    WorkerShutdown,
    MalformedPayload,
    ResourceUnavailable,
    InternalError,
    Superseded,
    IntermittentTask,
}

impl ReasonResolved {
    /// Reasons a worker may legally pass to `reportException`. The remaining
    /// variants are reserved for the queue itself.
    pub fn is_worker_reportable(&self) -> bool {
        matches!(
            self,
            Self::WorkerShutdown
                | Self::MalformedPayload
                | Self::ResourceUnavailable
                | Self::InternalError
                | Self::Superseded
                | Self::IntermittentTask
        )
    }

    /// If an exception with this reason consumes a retry, the reason the
    /// replacement run is created with.
    pub fn retry_reason_created(&self) -> Option<ReasonCreated> {
        match self {
            Self::WorkerShutdown | Self::ClaimExpired => Some(ReasonCreated::Retry),
            Self::IntermittentTask => Some(ReasonCreated::TaskRetry),
            _ => None,
        }
    }
}

impl fmt::Display for ReasonResolved {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::DeadlineExceeded => "deadline-exceeded",
            Self::Canceled => "canceled",
            Self::ClaimExpired => "claim-expired",
            Self::WorkerShutdown => "worker-shutdown",
            Self::MalformedPayload => "malformed-payload",
            Self::ResourceUnavailable => "resource-unavailable",
            Self::InternalError => "internal-error",
            Self::Superseded => "superseded",
            Self::IntermittentTask => "intermittent-task",
        };
        write!(f, "{s}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_task_state_terminal() {
        assert!(TaskState::Completed.is_terminal());
        assert!(TaskState::Exception.is_terminal());
        assert!(!TaskState::Unscheduled.is_terminal());
        assert!(!TaskState::Pending.is_terminal());
    }

    #[test]
    fn test_run_state_roundtrip_serde() {
        let json = serde_json::to_string(&RunState::Exception).unwrap();
        assert_eq!(json, "\"exception\"");
        let back: RunState = serde_json::from_str(&json).unwrap();
        assert_eq!(back, RunState::Exception);
    }

    #[test]
    fn test_reason_resolved_kebab_case() {
        let json = serde_json::to_string(&ReasonResolved::DeadlineExceeded).unwrap();
        assert_eq!(json, "\"deadline-exceeded\"");
        assert_eq!(ReasonResolved::ClaimExpired.to_string(), "claim-expired");
    }

    #[test]
    fn test_retry_reasons() {
        assert_eq!(
            ReasonResolved::WorkerShutdown.retry_reason_created(),
            Some(ReasonCreated::Retry),
        );
        assert_eq!(
            ReasonResolved::IntermittentTask.retry_reason_created(),
            Some(ReasonCreated::TaskRetry),
        );
        assert_eq!(ReasonResolved::MalformedPayload.retry_reason_created(), None);
        assert_eq!(ReasonResolved::Canceled.retry_reason_created(), None);
    }

    #[test]
    fn test_worker_reportable() {
        assert!(ReasonResolved::WorkerShutdown.is_worker_reportable());
        assert!(!ReasonResolved::ClaimExpired.is_worker_reportable());
        assert!(!ReasonResolved::DeadlineExceeded.is_worker_reportable());
    }

    #[test]
    fn test_state_parse() {
        assert_eq!("running".parse::<TaskState>(), Ok(TaskState::Running));
        assert!("sleeping".parse::<TaskState>().is_err());
    }
}
