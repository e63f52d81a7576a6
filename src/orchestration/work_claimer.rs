//! # Work Claimer
//!
//! Claim distribution: long-polling `claimWork` over the pending hint
//! queues, plus direct `claimTask`/`reclaimTask`. Pending hints are an
//! over-approximation — a hint's run may already be claimed or resolved —
//! so every claim re-validates against the task record and stale hints are
//! simply consumed.
//!
//! The claim-expiry message for a claim is enqueued before the record
//! mutation commits. A failed or replayed mutation leaves a message whose
//! `takenUntil` no longer matches the record; the claim reaper recognizes
//! those as stale. That ordering keeps the invariant that every running
//! claim has a message visible at/after its expiry, without ever enqueuing
//! twice for one logical claim.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

use crate::constants::exchanges;
use crate::error::{QueueError, Result};
use crate::messaging::PendingMessage;
use crate::models::{TaskDefinition, TaskStatus};
use crate::orchestration::core::QueueCore;
use crate::state_machine::{self, RunState};

/// A successful claim, handed to the worker.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskClaim {
    pub status: TaskStatus,
    pub run_id: usize,
    pub worker_group: String,
    pub worker_id: String,
    pub taken_until: DateTime<Utc>,
    /// The full task definition, so workers need no extra fetch.
    pub task: TaskDefinition,
}

/// Claims and reclaims runs on behalf of workers.
pub struct WorkClaimer {
    core: Arc<QueueCore>,
}

impl WorkClaimer {
    pub fn new(core: Arc<QueueCore>) -> Self {
        Self { core }
    }

    /// Claim a specific run. Replay-safe: repeating the claim with the same
    /// worker identity returns the existing claim; a different identity is
    /// a conflict.
    pub async fn claim_task(
        &self,
        task_id: &str,
        run_id: usize,
        worker_group: &str,
        worker_id: &str,
        hint_id: Option<&str>,
    ) -> Result<TaskClaim> {
        let now = Utc::now();
        let task = self.core.load_task(task_id).await?;
        if task.deadline <= now {
            return Err(QueueError::conflict(format!(
                "Task `{task_id}` can't be claimed past its deadline of {}",
                task.deadline,
            )));
        }

        let taken_until = now + self.core.config.claim.claim_timeout();
        self.core
            .queue_service
            .put_claim_message(task_id, run_id, taken_until)
            .await?;

        let (task, _) = self
            .core
            .modify_task(task_id, |task| {
                Ok(state_machine::claim_task(
                    task,
                    run_id,
                    worker_group,
                    worker_id,
                    hint_id,
                    taken_until,
                    now,
                ))
            })
            .await?;

        let run = task.runs.get(run_id).ok_or_else(|| {
            QueueError::not_found(format!("Run {run_id} not found on task `{task_id}`"))
        })?;

        if task.runs.len() != run_id + 1
            || run.state != RunState::Running
            || !run.claimed_by(worker_group, worker_id)
            || run.hint_id.as_deref() != hint_id
        {
            return Err(QueueError::conflict(format!(
                "Run {run_id} was already claimed by another worker",
            )));
        }

        let status = task.status();
        let taken_until = run.taken_until.unwrap_or(taken_until);

        // Publish even on idempotent replay; late subscribers must see it
        self.core
            .publish_task_event(
                exchanges::TASK_RUNNING,
                &task,
                serde_json::json!({
                    "status": status,
                    "runId": run_id,
                    "workerGroup": worker_group,
                    "workerId": worker_id,
                    "takenUntil": taken_until,
                }),
            )
            .await?;
        info!(task_id = %task_id, run_id, worker_group, worker_id, "task claimed");

        Ok(TaskClaim {
            status,
            run_id,
            worker_group: worker_group.to_string(),
            worker_id: worker_id.to_string(),
            taken_until,
            task: task.definition(),
        })
    }

    /// Extend the claim on a running run. Rejects with a conflict when the
    /// run is resolved, not running, past its deadline, or bound to a
    /// different worker.
    pub async fn reclaim_task(
        &self,
        task_id: &str,
        run_id: usize,
        worker_group: &str,
        worker_id: &str,
    ) -> Result<TaskClaim> {
        let now = Utc::now();
        let task = self.core.load_task(task_id).await?;
        let run = task.runs.get(run_id).ok_or_else(|| {
            QueueError::not_found(format!("Run {run_id} not found on task `{task_id}`"))
        })?;
        if task.deadline <= now {
            return Err(QueueError::conflict(format!(
                "Task `{task_id}` can't be reclaimed past its deadline of {}",
                task.deadline,
            )));
        }
        if run.worker_group.is_some() && !run.claimed_by(worker_group, worker_id) {
            return Err(QueueError::conflict(format!(
                "Run {run_id} on task `{task_id}` is claimed by another worker",
            )));
        }

        let taken_until = now + self.core.config.claim.claim_timeout();
        // Enqueue first; if the reclaim loses a race the message is stale
        self.core
            .queue_service
            .put_claim_message(task_id, run_id, taken_until)
            .await?;

        let (task, _) = self
            .core
            .modify_task(task_id, |task| {
                Ok(state_machine::reclaim_task(task, run_id, taken_until))
            })
            .await?;

        if task.runs.len() != run_id + 1 || task.runs[run_id].state != RunState::Running {
            return Err(QueueError::conflict(format!(
                "Run {run_id} on task `{task_id}` is resolved or not running",
            )));
        }
        let run = &task.runs[run_id];

        debug!(task_id = %task_id, run_id, "claim extended");
        Ok(TaskClaim {
            status: task.status(),
            run_id,
            worker_group: worker_group.to_string(),
            worker_id: worker_id.to_string(),
            taken_until: run.taken_until.unwrap_or(taken_until),
            task: task.definition(),
        })
    }

    /// Long-poll for pending work on a task queue. Returns as soon as at
    /// least one claim lands, or an empty list once the work-claim timeout
    /// passes. Callers should back off briefly and call again.
    pub async fn claim_work(
        &self,
        task_queue_id: &str,
        worker_group: &str,
        worker_id: &str,
        count: usize,
    ) -> Result<Vec<TaskClaim>> {
        let config = &self.core.config;
        let started = Instant::now();
        let timeout = config.claim.work_claim_timeout();
        let notify = self.core.queue_service.pending_notify();
        let mut claims = Vec::new();

        loop {
            let hints = self
                .core
                .queue_service
                .poll_pending(
                    task_queue_id,
                    count.saturating_sub(claims.len()).max(1),
                    config.reapers.message_visibility(),
                )
                .await?;

            for hint in hints {
                if claims.len() >= count {
                    let _ = hint.release().await;
                    continue;
                }
                match self
                    .claim_from_hint(&hint.payload, worker_group, worker_id)
                    .await
                {
                    Ok(claim) => {
                        claims.push(claim);
                        let _ = hint.remove().await;
                    }
                    // Stale hint: the run was claimed elsewhere, resolved,
                    // or the task is gone
                    Err(QueueError::Conflict(_)) | Err(QueueError::ResourceNotFound(_)) => {
                        let _ = hint.remove().await;
                    }
                    Err(err) => {
                        warn!(
                            task_id = %hint.payload.task_id,
                            error = %err,
                            "claim from hint failed; releasing",
                        );
                        let _ = hint.release().await;
                    }
                }
            }

            if !claims.is_empty() || started.elapsed() >= timeout {
                return Ok(claims);
            }

            let remaining = timeout.saturating_sub(started.elapsed());
            let wait = config.claim.hint_poll_interval().min(remaining);
            tokio::select! {
                _ = tokio::time::sleep(wait) => {}
                _ = notify.notified() => {}
            }
        }
    }

    async fn claim_from_hint(
        &self,
        hint: &PendingMessage,
        worker_group: &str,
        worker_id: &str,
    ) -> Result<TaskClaim> {
        self.claim_task(
            &hint.task_id,
            hint.run_id,
            worker_group,
            worker_id,
            Some(&hint.hint_id),
        )
        .await
    }
}
