//! # Claim Reaper
//!
//! Resolves claims whose `takenUntil` lapsed without a reclaim, using the
//! advisory messages from the claim-expiry queue. A message advises that if
//! a task with the given `takenUntil` still exists, the run may need to be
//! resolved `claim-expired` and the task retried (depending on
//! `retriesLeft`).
//!
//! The task may be gone, the run may be resolved, or the `takenUntil` may
//! no longer match because the worker reclaimed; all of those make the
//! message a stale no-op. Tasks already past their deadline are left to the
//! deadline reaper, which reports `deadline-exceeded` instead.

use chrono::Utc;
use futures::future::join_all;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::constants::exchanges;
use crate::error::Result;
use crate::messaging::{ClaimExpiryMessage, DeliveredMessage, ResolutionMessage};
use crate::orchestration::core::QueueCore;
use crate::state_machine::{self, ReasonCreated, ReasonResolved, RunState};
use crate::store::EntityStore;

/// Background consumer of the claim-expiry queue.
pub struct ClaimReaper {
    core: Arc<QueueCore>,
}

impl ClaimReaper {
    pub fn new(core: Arc<QueueCore>) -> Self {
        Self { core }
    }

    /// Drain one batch of claim-expiry messages. Returns how many messages
    /// were fetched.
    pub async fn process_once(&self) -> Result<usize> {
        let config = &self.core.config.reapers;
        let messages = self
            .core
            .queue_service
            .poll_claim_queue(config.batch_size, config.message_visibility())
            .await?;
        let count = messages.len();

        // One bad message must not block the rest; unhandled messages
        // reappear after their visibility timeout
        join_all(messages.into_iter().map(|message| async move {
            if let Err(err) = self.handle_message(&message).await {
                warn!(
                    task_id = %message.payload.task_id,
                    error = %err,
                    "failed to handle claim-expiry message",
                );
            }
        }))
        .await;
        Ok(count)
    }

    async fn handle_message(&self, message: &DeliveredMessage<ClaimExpiryMessage>) -> Result<()> {
        let payload = &message.payload;

        let Some(versioned) = self.core.tasks.load(&payload.task_id).await? else {
            // Common after task expiration; nothing to do
            message.remove().await?;
            return Ok(());
        };
        // The denormalized takenUntil is cleared on resolution and replaced
        // on reclaim, so a mismatch means this message is stale
        if versioned.value.taken_until != Some(payload.taken_until) {
            debug!(task_id = %payload.task_id, "claim-expiry message no longer matches takenUntil");
            message.remove().await?;
            return Ok(());
        }

        let now = Utc::now();
        let (task, _) = self
            .core
            .modify_task(&payload.task_id, |task| {
                Ok(state_machine::expire_claim(
                    task,
                    payload.run_id,
                    payload.taken_until,
                    now,
                ))
            })
            .await?;

        // Act on the post-state rather than the outcome, so a redelivered
        // message after a partial failure still publishes what it must
        let run = match task.runs.get(payload.run_id) {
            Some(run) => run,
            None => {
                message.remove().await?;
                return Ok(());
            }
        };
        if run.state != RunState::Exception
            || run.reason_resolved != Some(ReasonResolved::ClaimExpired)
            || task.runs.len() > payload.run_id + 2
        {
            // Raced with a resolution or a later run; nothing to announce
            message.remove().await?;
            return Ok(());
        }

        let status = task.status();
        let retry_run = task.runs.get(payload.run_id + 1).filter(|new_run| {
            new_run.state == RunState::Pending && new_run.reason_created == ReasonCreated::Retry
        });

        if retry_run.is_some() {
            self.core
                .queue_service
                .put_pending_message(&task, payload.run_id + 1)
                .await?;
            self.core
                .publish_task_event(
                    exchanges::TASK_PENDING,
                    &task,
                    serde_json::json!({"status": status, "runId": payload.run_id + 1}),
                )
                .await?;
            info!(
                task_id = %payload.task_id,
                run_id = payload.run_id + 1,
                "claim expired; task retried",
            );
        } else {
            self.core
                .queue_service
                .put_resolved_message(ResolutionMessage {
                    task_id: task.task_id.clone(),
                    task_group_id: task.task_group_id.clone(),
                    scheduler_id: task.scheduler_id.clone(),
                    resolution: RunState::Exception,
                })
                .await?;
            self.core
                .publish_task_event(
                    exchanges::TASK_EXCEPTION,
                    &task,
                    serde_json::json!({
                        "status": status,
                        "runId": payload.run_id,
                        "workerGroup": run.worker_group,
                        "workerId": run.worker_id,
                    }),
                )
                .await?;
            info!(
                task_id = %payload.task_id,
                run_id = payload.run_id,
                "claim expired; no retries left",
            );
        }

        message.remove().await?;
        Ok(())
    }

    /// Consume the claim-expiry queue until shutdown.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        let delay = self.core.config.reapers.polling_delay();
        loop {
            let handled = match self.process_once().await {
                Ok(count) => count,
                Err(err) => {
                    warn!(error = %err, "claim reaper pass failed");
                    0
                }
            };
            if handled == 0 {
                tokio::select! {
                    _ = tokio::time::sleep(delay) => {}
                    _ = shutdown.changed() => {}
                }
            }
            if *shutdown.borrow() {
                break;
            }
        }
    }
}
