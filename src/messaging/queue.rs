//! # Advisory Queue
//!
//! At-least-once message queue with visibility delays, modeled on azure
//! queue storage semantics: a message becomes visible at its `visible_at`
//! time, polling hides it for a visibility timeout, and it reappears unless
//! deleted. Any broker with visibility-delay and at-least-once semantics
//! satisfies the [`AdvisoryQueue`] contract.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use std::sync::Arc;

use crate::error::Result;

/// Receipt identifying one delivery of one message. Deleting or releasing
/// with a stale receipt (the message was re-delivered since) is a no-op.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageReceipt {
    pub message_id: String,
    pub pop_receipt: u64,
}

/// A message delivered by `poll`, with handles to settle it.
#[derive(Debug, Clone)]
pub struct DeliveredMessage<M: Clone + Send + 'static> {
    pub payload: M,
    pub receipt: MessageReceipt,
    queue: InMemoryQueue<M>,
}

impl<M: Clone + Send + 'static> DeliveredMessage<M> {
    /// Remove the message permanently; call once it has been handled.
    pub async fn remove(&self) -> Result<bool> {
        self.queue.delete(&self.receipt).await
    }

    /// Make the message visible again immediately, e.g. when handling
    /// failed and another consumer should retry without waiting out the
    /// visibility timeout.
    pub async fn release(&self) -> Result<bool> {
        self.queue.release(&self.receipt).await
    }
}

/// Queue contract required by the distribution protocol.
#[async_trait]
pub trait AdvisoryQueue<M: Clone + Send + 'static>: Send + Sync {
    /// Enqueue a message that becomes visible at `visible_at` and is
    /// discarded after `expires_at`, if given.
    async fn put(
        &self,
        payload: M,
        visible_at: DateTime<Utc>,
        expires_at: Option<DateTime<Utc>>,
    ) -> Result<()>;

    /// Fetch up to `limit` visible messages, hiding each for `visibility`.
    async fn poll(&self, limit: usize, visibility: Duration) -> Result<Vec<DeliveredMessage<M>>>;

    /// Approximate number of live messages, visible or not.
    async fn approx_len(&self) -> Result<usize>;
}

#[derive(Debug)]
struct StoredMessage<M> {
    message_id: String,
    payload: M,
    visible_at: DateTime<Utc>,
    expires_at: Option<DateTime<Utc>>,
    pop_receipt: u64,
}

/// In-process advisory queue.
#[derive(Debug)]
pub struct InMemoryQueue<M> {
    messages: Arc<Mutex<Vec<StoredMessage<M>>>>,
}

impl<M> Clone for InMemoryQueue<M> {
    fn clone(&self) -> Self {
        Self {
            messages: Arc::clone(&self.messages),
        }
    }
}

impl<M: Clone + Send + 'static> InMemoryQueue<M> {
    pub fn new() -> Self {
        Self {
            messages: Arc::new(Mutex::new(Vec::new())),
        }
    }

    async fn delete(&self, receipt: &MessageReceipt) -> Result<bool> {
        let mut messages = self.messages.lock();
        let before = messages.len();
        messages.retain(|msg| {
            !(msg.message_id == receipt.message_id && msg.pop_receipt == receipt.pop_receipt)
        });
        Ok(messages.len() < before)
    }

    async fn release(&self, receipt: &MessageReceipt) -> Result<bool> {
        let mut messages = self.messages.lock();
        for msg in messages.iter_mut() {
            if msg.message_id == receipt.message_id && msg.pop_receipt == receipt.pop_receipt {
                msg.visible_at = Utc::now();
                return Ok(true);
            }
        }
        Ok(false)
    }
}

impl<M: Clone + Send + 'static> Default for InMemoryQueue<M> {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl<M: Clone + Send + Sync + 'static> AdvisoryQueue<M> for InMemoryQueue<M> {
    async fn put(
        &self,
        payload: M,
        visible_at: DateTime<Utc>,
        expires_at: Option<DateTime<Utc>>,
    ) -> Result<()> {
        let mut messages = self.messages.lock();
        messages.push(StoredMessage {
            message_id: uuid::Uuid::new_v4().simple().to_string(),
            payload,
            visible_at,
            expires_at,
            pop_receipt: 0,
        });
        Ok(())
    }

    async fn poll(&self, limit: usize, visibility: Duration) -> Result<Vec<DeliveredMessage<M>>> {
        let now = Utc::now();
        let mut messages = self.messages.lock();
        messages.retain(|msg| msg.expires_at.map(|at| at > now).unwrap_or(true));

        let mut delivered = Vec::new();
        for msg in messages.iter_mut() {
            if delivered.len() >= limit {
                break;
            }
            if msg.visible_at > now {
                continue;
            }
            msg.visible_at = now + visibility;
            msg.pop_receipt += 1;
            delivered.push(DeliveredMessage {
                payload: msg.payload.clone(),
                receipt: MessageReceipt {
                    message_id: msg.message_id.clone(),
                    pop_receipt: msg.pop_receipt,
                },
                queue: self.clone(),
            });
        }
        Ok(delivered)
    }

    async fn approx_len(&self) -> Result<usize> {
        let now = Utc::now();
        Ok(self
            .messages
            .lock()
            .iter()
            .filter(|msg| msg.expires_at.map(|at| at > now).unwrap_or(true))
            .count())
    }
}
