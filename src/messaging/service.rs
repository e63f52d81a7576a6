//! # Distribution Queue Service
//!
//! Wraps the advisory queues used by the distribution protocol: one pending
//! queue per (task queue, priority), a claim-expiration queue, a deadline
//! queue, and a resolved queue feeding the dependency resolver.
//!
//! The queues uphold the distribution invariants:
//! - every pending run has at least one pending hint,
//! - every running claim has a claim-expiry message visible at/after its
//!   `takenUntil`,
//! - every unresolved task has a deadline message visible at/after its
//!   deadline.
//!
//! Messages are advisory; consumers compare the payload against the
//! record's current state and treat mismatches as no-ops.

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::Notify;
use tracing::debug;

use crate::error::Result;
use crate::messaging::message::{
    ClaimExpiryMessage, DeadlineMessage, PendingMessage, ResolutionMessage,
};
use crate::messaging::queue::{AdvisoryQueue, DeliveredMessage, InMemoryQueue};
use crate::models::{Priority, Task};

/// Queue fan-out for pending-task hints, claim expirations, deadlines, and
/// resolutions.
pub struct QueueService {
    pending: DashMap<(String, Priority), InMemoryQueue<PendingMessage>>,
    claim_queue: InMemoryQueue<ClaimExpiryMessage>,
    deadline_queue: InMemoryQueue<DeadlineMessage>,
    resolved_queue: InMemoryQueue<ResolutionMessage>,
    pending_notify: Arc<Notify>,
    /// Slack added to deadline visibility so the record is reliably past its
    /// deadline when the message surfaces.
    deadline_delay: Duration,
}

impl QueueService {
    pub fn new(deadline_delay: Duration) -> Self {
        Self {
            pending: DashMap::new(),
            claim_queue: InMemoryQueue::new(),
            deadline_queue: InMemoryQueue::new(),
            resolved_queue: InMemoryQueue::new(),
            pending_notify: Arc::new(Notify::new()),
            deadline_delay,
        }
    }

    fn pending_queue(&self, task_queue_id: &str, priority: Priority) -> InMemoryQueue<PendingMessage> {
        self.pending
            .entry((task_queue_id.to_string(), priority))
            .or_default()
            .clone()
    }

    /// Notified whenever a pending hint lands; long-polling claimers wait on
    /// this instead of spinning.
    pub fn pending_notify(&self) -> Arc<Notify> {
        Arc::clone(&self.pending_notify)
    }

    /// Enqueue a pending hint for `run_id` of `task`, expiring at the task's
    /// deadline. Returns the hint id bound into the eventual claim.
    pub async fn put_pending_message(&self, task: &Task, run_id: usize) -> Result<String> {
        let hint_id = uuid::Uuid::new_v4().simple().to_string();
        let queue = self.pending_queue(&task.task_queue_id(), task.priority);
        queue
            .put(
                PendingMessage {
                    task_id: task.task_id.clone(),
                    run_id,
                    hint_id: hint_id.clone(),
                },
                Utc::now(),
                Some(task.deadline),
            )
            .await?;
        debug!(
            task_id = %task.task_id,
            run_id,
            task_queue_id = %task.task_queue_id(),
            "pending hint enqueued"
        );
        self.pending_notify.notify_waiters();
        Ok(hint_id)
    }

    /// Poll pending hints for a task queue, highest priority first.
    pub async fn poll_pending(
        &self,
        task_queue_id: &str,
        limit: usize,
        visibility: Duration,
    ) -> Result<Vec<DeliveredMessage<PendingMessage>>> {
        let mut delivered = Vec::new();
        for priority in Priority::ALL {
            if delivered.len() >= limit {
                break;
            }
            let queue = self.pending_queue(task_queue_id, priority);
            let mut batch = queue.poll(limit - delivered.len(), visibility).await?;
            delivered.append(&mut batch);
        }
        Ok(delivered)
    }

    /// Approximate number of pending runs for a task queue. An
    /// over-approximation, as hints may reference runs already claimed.
    pub async fn pending_count(&self, task_queue_id: &str) -> Result<usize> {
        let mut count = 0;
        for priority in Priority::ALL {
            count += self
                .pending_queue(task_queue_id, priority)
                .approx_len()
                .await?;
        }
        Ok(count)
    }

    /// Enqueue a claim-expiry message, visible once `taken_until` passes.
    pub async fn put_claim_message(
        &self,
        task_id: &str,
        run_id: usize,
        taken_until: DateTime<Utc>,
    ) -> Result<()> {
        self.claim_queue
            .put(
                ClaimExpiryMessage {
                    task_id: task_id.to_string(),
                    run_id,
                    taken_until,
                },
                taken_until,
                None,
            )
            .await
    }

    pub async fn poll_claim_queue(
        &self,
        limit: usize,
        visibility: Duration,
    ) -> Result<Vec<DeliveredMessage<ClaimExpiryMessage>>> {
        self.claim_queue.poll(limit, visibility).await
    }

    /// Enqueue a deadline message, visible shortly after `deadline`.
    pub async fn put_deadline_message(
        &self,
        task_id: &str,
        task_group_id: &str,
        scheduler_id: &str,
        deadline: DateTime<Utc>,
    ) -> Result<()> {
        self.deadline_queue
            .put(
                DeadlineMessage {
                    task_id: task_id.to_string(),
                    task_group_id: task_group_id.to_string(),
                    scheduler_id: scheduler_id.to_string(),
                    deadline,
                },
                deadline + self.deadline_delay,
                None,
            )
            .await
    }

    pub async fn poll_deadline_queue(
        &self,
        limit: usize,
        visibility: Duration,
    ) -> Result<Vec<DeliveredMessage<DeadlineMessage>>> {
        self.deadline_queue.poll(limit, visibility).await
    }

    /// Record that a task reached a terminal state, for the dependency
    /// resolver to pick up.
    pub async fn put_resolved_message(&self, message: ResolutionMessage) -> Result<()> {
        self.resolved_queue.put(message, Utc::now(), None).await
    }

    pub async fn poll_resolved_queue(
        &self,
        limit: usize,
        visibility: Duration,
    ) -> Result<Vec<DeliveredMessage<ResolutionMessage>>> {
        self.resolved_queue.poll(limit, visibility).await
    }
}
