//! # Deadline Reaper
//!
//! Enforces the hard guarantee that every task is resolved by its deadline,
//! whether or not any worker ever touched it. Consumes deadline-queue
//! messages that surface shortly after each task's deadline and forces
//! still-unresolved tasks into `exception` / `deadline-exceeded`. An
//! unscheduled task gets a run created and resolved in one step.

use chrono::Utc;
use futures::future::join_all;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{info, warn};

use crate::constants::exchanges;
use crate::error::Result;
use crate::messaging::{DeadlineMessage, DeliveredMessage, ResolutionMessage};
use crate::orchestration::core::QueueCore;
use crate::state_machine::{self, ReasonResolved, RunState};
use crate::store::EntityStore;

/// Background consumer of the deadline queue.
pub struct DeadlineReaper {
    core: Arc<QueueCore>,
}

impl DeadlineReaper {
    pub fn new(core: Arc<QueueCore>) -> Self {
        Self { core }
    }

    /// Drain one batch of deadline messages. Returns how many messages were
    /// fetched.
    pub async fn process_once(&self) -> Result<usize> {
        let config = &self.core.config.reapers;
        let messages = self
            .core
            .queue_service
            .poll_deadline_queue(config.batch_size, config.message_visibility())
            .await?;
        let count = messages.len();

        join_all(messages.into_iter().map(|message| async move {
            if let Err(err) = self.handle_message(&message).await {
                warn!(
                    task_id = %message.payload.task_id,
                    error = %err,
                    "failed to handle deadline message",
                );
            }
        }))
        .await;
        Ok(count)
    }

    async fn handle_message(&self, message: &DeliveredMessage<DeadlineMessage>) -> Result<()> {
        let payload = &message.payload;

        let Some(versioned) = self.core.tasks.load(&payload.task_id).await? else {
            // createTask enqueues the deadline message before the record, so
            // a missing task usually means creation failed part-way
            message.remove().await?;
            return Ok(());
        };
        // Deadlines are immutable; a mismatch means the id was reused by a
        // different task after expiry
        if versioned.value.deadline != payload.deadline {
            warn!(
                task_id = %payload.task_id,
                "deadline message does not match the task's deadline",
            );
            message.remove().await?;
            return Ok(());
        }

        let now = Utc::now();
        let (task, _) = self
            .core
            .modify_task(&payload.task_id, |task| {
                Ok(state_machine::expire_deadline(task, now))
            })
            .await?;

        // Announce from post-state so redelivery after a partial failure
        // repeats the announcements rather than dropping them
        if let Some(run) = task.runs.last() {
            if run.state == RunState::Exception
                && run.reason_resolved == Some(ReasonResolved::DeadlineExceeded)
            {
                let run_id = task.runs.len() - 1;
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
                            "status": task.status(),
                            "runId": run_id,
                            "workerGroup": run.worker_group,
                            "workerId": run.worker_id,
                        }),
                    )
                    .await?;
                info!(task_id = %payload.task_id, run_id, "task resolved deadline-exceeded");
            }
        }

        message.remove().await?;
        Ok(())
    }

    /// Consume the deadline queue until shutdown.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        let delay = self.core.config.reapers.polling_delay();
        loop {
            let handled = match self.process_once().await {
                Ok(count) => count,
                Err(err) => {
                    warn!(error = %err, "deadline reaper pass failed");
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
