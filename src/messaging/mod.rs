//! # Messaging Layer
//!
//! Advisory queues and message formats for the claim-distribution protocol.
//! Delivery is at-least-once and unordered by contract; correctness comes
//! from consumers re-validating record state, never from the queues.

pub mod message;
pub mod queue;
pub mod service;

pub use message::{ClaimExpiryMessage, DeadlineMessage, PendingMessage, ResolutionMessage};
pub use queue::{AdvisoryQueue, DeliveredMessage, InMemoryQueue, MessageReceipt};
pub use service::QueueService;
