//! # Task Resolver
//!
//! Worker-facing resolution of runs (`reportCompleted`, `reportFailed`,
//! `reportException`) plus cancellation and rerun. Every operation is a
//! bounded state transition: the updater no-ops when the addressed run is
//! not the active one, and the caller reads the untouched record to tell
//! an idempotent replay (same resolution already applied) from a conflict
//! (someone else advanced the task).

use chrono::Utc;
use std::sync::Arc;
use tracing::info;

use crate::constants::{exchanges, system};
use crate::error::{QueueError, Result};
use crate::messaging::ResolutionMessage;
use crate::models::{Task, TaskStatus};
use crate::orchestration::core::QueueCore;
use crate::state_machine::{
    self, CancelOutcome, ReasonCreated, ReasonResolved, RerunOutcome, RunState,
};

/// Resolves, cancels, and reruns tasks.
pub struct TaskResolver {
    core: Arc<QueueCore>,
}

impl TaskResolver {
    pub fn new(core: Arc<QueueCore>) -> Self {
        Self { core }
    }

    /// Resolve the run as `completed`.
    pub async fn report_completed(&self, task_id: &str, run_id: usize) -> Result<TaskStatus> {
        self.resolve(task_id, run_id, RunState::Completed, ReasonResolved::Completed)
            .await
    }

    /// Resolve the run as `failed`: the task-specific code misbehaved.
    pub async fn report_failed(&self, task_id: &str, run_id: usize) -> Result<TaskStatus> {
        self.resolve(task_id, run_id, RunState::Failed, ReasonResolved::Failed)
            .await
    }

    async fn resolve(
        &self,
        task_id: &str,
        run_id: usize,
        target: RunState,
        reason: ReasonResolved,
    ) -> Result<TaskStatus> {
        let task = self.core.load_task(task_id).await?;
        let run = task.runs.get(run_id).ok_or_else(|| {
            QueueError::not_found(format!("Run {run_id} not found on task `{task_id}`"))
        })?;
        // Only running runs can be resolved, but allow for idempotency when
        // the run is already in the desired state
        if run.state != RunState::Running && run.state != target {
            return Err(QueueError::conflict(format!(
                "Run {run_id} of task `{task_id}` is not running or {target}",
            )));
        }

        let now = Utc::now();
        let (task, _) = self
            .core
            .modify_task(task_id, |task| {
                Ok(state_machine::resolve_run(task, run_id, target, reason, None, now))
            })
            .await?;

        let run = &task.runs[run_id];
        if task.runs.len() != run_id + 1
            || run.state != target
            || run.reason_resolved != Some(reason)
        {
            return Err(QueueError::conflict(format!(
                "Run {run_id} on task `{task_id}` is resolved or not running",
            )));
        }

        self.core
            .queue_service
            .put_resolved_message(ResolutionMessage {
                task_id: task.task_id.clone(),
                task_group_id: task.task_group_id.clone(),
                scheduler_id: task.scheduler_id.clone(),
                resolution: target,
            })
            .await?;

        let status = task.status();
        let exchange = match target {
            RunState::Completed => exchanges::TASK_COMPLETED,
            _ => exchanges::TASK_FAILED,
        };
        self.core
            .publish_task_event(
                exchange,
                &task,
                serde_json::json!({
                    "status": status,
                    "runId": run_id,
                    "workerGroup": run.worker_group,
                    "workerId": run.worker_id,
                }),
            )
            .await?;
        info!(task_id = %task_id, run_id, state = %target, "task resolved");
        Ok(status)
    }

    /// Resolve the run as `exception` with a worker-reportable reason.
    /// `worker-shutdown` and `intermittent-task` consume a retry and append
    /// a fresh pending run while retries remain.
    pub async fn report_exception(
        &self,
        task_id: &str,
        run_id: usize,
        reason: ReasonResolved,
    ) -> Result<TaskStatus> {
        if !reason.is_worker_reportable() {
            return Err(QueueError::input(format!(
                "`{reason}` is not a reason workers may report",
            )));
        }

        let task = self.core.load_task(task_id).await?;
        if task.runs.get(run_id).is_none() {
            return Err(QueueError::not_found(format!(
                "Run {run_id} not found on task `{task_id}`",
            )));
        }

        let now = Utc::now();
        let retry_reason = reason.retry_reason_created();
        let (task, _) = self
            .core
            .modify_task(task_id, |task| {
                Ok(state_machine::resolve_run(
                    task,
                    run_id,
                    RunState::Exception,
                    reason,
                    retry_reason,
                    now,
                ))
            })
            .await?;

        let run = &task.runs[run_id];
        if task.runs.len() > run_id + 2
            || run.state != RunState::Exception
            || run.reason_resolved != Some(reason)
        {
            return Err(QueueError::conflict(format!(
                "Run {run_id} on task `{task_id}` is resolved or not running",
            )));
        }

        let status = task.status();
        let retry_run = task.runs.get(run_id + 1).filter(|new_run| {
            task.runs.len() == run_id + 2
                && new_run.state == RunState::Pending
                && matches!(
                    new_run.reason_created,
                    ReasonCreated::Retry | ReasonCreated::TaskRetry,
                )
        });

        if retry_run.is_some() {
            self.core
                .queue_service
                .put_pending_message(&task, run_id + 1)
                .await?;
            self.core
                .publish_task_event(
                    exchanges::TASK_PENDING,
                    &task,
                    serde_json::json!({"status": status, "runId": run_id + 1}),
                )
                .await?;
            info!(task_id = %task_id, run_id = run_id + 1, %reason, "task retried after exception");
        } else {
            self.announce_exception(&task, run_id).await?;
            info!(task_id = %task_id, run_id, %reason, "task resolved exception");
        }
        Ok(status)
    }

    /// Cancel a task that is unscheduled, pending, or running. Idempotent:
    /// canceling an already-resolved task returns its status unchanged.
    pub async fn cancel_task(&self, task_id: &str) -> Result<TaskStatus> {
        let task = self.core.load_task(task_id).await?;
        let now = Utc::now();
        if task.deadline < now {
            return Err(QueueError::conflict(format!(
                "Task `{task_id}` can't be canceled past its deadline of {}",
                task.deadline,
            )));
        }

        let (task, outcome) = self
            .core
            .modify_task(task_id, |task| Ok(state_machine::cancel_task(task, now)))
            .await?;

        // Announce whenever the final state is a cancellation, even when
        // another call got there first; duplicate messages are fine
        if let Some(last) = task.runs.last() {
            if last.state == RunState::Exception
                && last.reason_resolved == Some(ReasonResolved::Canceled)
            {
                self.announce_exception(&task, task.runs.len() - 1).await?;
                if matches!(outcome, CancelOutcome::Canceled { .. }) {
                    info!(task_id = %task_id, "task canceled");
                }
            }
        }
        Ok(task.status())
    }

    /// Rerun a resolved (or unscheduled) task, resetting the retry budget.
    /// Idempotent: a pending or running task returns its status unchanged.
    pub async fn rerun_task(&self, task_id: &str) -> Result<TaskStatus> {
        let task = self.core.load_task(task_id).await?;
        let now = Utc::now();
        if task.deadline < now {
            return Err(QueueError::conflict(format!(
                "Task `{task_id}` can't be rescheduled past its deadline of {}",
                task.deadline,
            )));
        }

        let (task, outcome) = self
            .core
            .modify_task(task_id, |task| Ok(state_machine::rerun_task(task, now)))
            .await?;

        let status = task.status();
        match outcome {
            RerunOutcome::TooManyRuns => Err(QueueError::conflict(format!(
                "Maximum number of runs reached ({})",
                system::MAX_RUNS_ALLOWED,
            ))),
            RerunOutcome::Rerun { run_id } => {
                self.core
                    .queue_service
                    .put_pending_message(&task, run_id)
                    .await?;
                self.core
                    .publish_task_event(
                        exchanges::TASK_PENDING,
                        &task,
                        serde_json::json!({"status": status, "runId": run_id}),
                    )
                    .await?;
                info!(task_id = %task_id, run_id, "task rerun");
                Ok(status)
            }
            RerunOutcome::AlreadyActive => Ok(status),
        }
    }

    async fn announce_exception(&self, task: &Task, run_id: usize) -> Result<()> {
        self.core
            .queue_service
            .put_resolved_message(ResolutionMessage {
                task_id: task.task_id.clone(),
                task_group_id: task.task_group_id.clone(),
                scheduler_id: task.scheduler_id.clone(),
                resolution: RunState::Exception,
            })
            .await?;
        let run = &task.runs[run_id];
        self.core
            .publish_task_event(
                exchanges::TASK_EXCEPTION,
                task,
                serde_json::json!({
                    "status": task.status(),
                    "runId": run_id,
                    "workerGroup": run.worker_group,
                    "workerId": run.worker_id,
                }),
            )
            .await
    }
}
