//! # Lifecycle Event Publisher
//!
//! In-process publisher for task lifecycle events. Each event names an
//! exchange, carries a JSON payload, and is CC'ed to the task's custom
//! routes. Delivery is at-least-once from a subscriber's perspective:
//! idempotent replays of API operations re-publish, and subscribers must
//! tolerate duplicates.

use serde_json::Value;
use tokio::sync::broadcast;

use crate::models::Task;

/// Event publisher fanning out over a broadcast channel.
#[derive(Debug, Clone)]
pub struct EventPublisher {
    sender: broadcast::Sender<PublishedEvent>,
}

/// One published lifecycle event.
#[derive(Debug, Clone)]
pub struct PublishedEvent {
    /// Exchange name, see [`crate::constants::exchanges`].
    pub exchange: String,
    pub payload: Value,
    /// Routing keys: the primary route plus `route.<r>` per custom route.
    pub routes: Vec<String>,
    pub published_at: chrono::DateTime<chrono::Utc>,
}

impl EventPublisher {
    /// Create a publisher with the given channel capacity.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publish an event. Publishing with no subscribers is not an error.
    pub async fn publish(
        &self,
        exchange: impl Into<String>,
        payload: Value,
        routes: Vec<String>,
    ) -> crate::error::Result<()> {
        let event = PublishedEvent {
            exchange: exchange.into(),
            payload,
            routes,
            published_at: chrono::Utc::now(),
        };
        // send() errs only when there are no subscribers, which is fine
        let _ = self.sender.send(event);
        Ok(())
    }

    /// Subscribe to events.
    pub fn subscribe(&self) -> broadcast::Receiver<PublishedEvent> {
        self.sender.subscribe()
    }

    /// Number of active subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventPublisher {
    fn default() -> Self {
        Self::new(1000)
    }
}

/// Routing keys for events about `task`: the primary route followed by the
/// task's custom routes, each prefixed `route.`.
pub fn task_routes(task: &Task) -> Vec<String> {
    let mut routes = vec![format!(
        "primary.{}.{}.{}.{}.{}",
        task.task_id,
        task.provisioner_id,
        task.worker_type,
        task.scheduler_id,
        task.task_group_id,
    )];
    routes.extend(task.routes.iter().map(|r| format!("route.{r}")));
    routes
}
