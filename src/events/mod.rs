//! # Event System
//!
//! Publication of task lifecycle events to subscribers.

pub mod publisher;

pub use publisher::{task_routes, EventPublisher, PublishedEvent};
