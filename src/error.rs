//! # Structured Error Handling
//!
//! Error taxonomy for the queue core. The variants mirror how callers are
//! expected to react: input errors are never retried, conflicts mean the
//! caller should re-fetch status and decide, congestion means optimistic
//! concurrency retries were exhausted and the record is contended.

use thiserror::Error;

/// Errors surfaced by queue operations and background processes.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum QueueError {
    /// Malformed parameters, bad timestamps, missing dependencies. Rejected
    /// before any record is created.
    #[error("Input error: {0}")]
    InputError(String),

    /// The addressed run/record no longer matches the precondition: already
    /// claimed, already resolved, or already defined differently.
    #[error("Request conflict: {0}")]
    Conflict(String),

    /// Task, run, or artifact does not exist.
    #[error("Resource not found: {0}")]
    ResourceNotFound(String),

    /// Optimistic-concurrency retries exhausted. Indicates contention on the
    /// record rather than a caller mistake.
    #[error("Congestion: {0}")]
    Congestion(String),

    /// Entity store failure outside the conflict/congestion protocol.
    #[error("Store error: {0}")]
    StoreError(String),

    /// Advisory queue failure.
    #[error("Queue error: {0}")]
    QueueServiceError(String),

    /// Event publishing failure.
    #[error("Event error: {0}")]
    EventError(String),

    /// Invalid or unloadable configuration.
    #[error("Configuration error: {0}")]
    ConfigurationError(String),

    /// Caller lacks a required capability.
    #[error("Insufficient scopes: {0}")]
    InsufficientScopes(String),
}

impl QueueError {
    pub fn input(msg: impl Into<String>) -> Self {
        Self::InputError(msg.into())
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::Conflict(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::ResourceNotFound(msg.into())
    }

    /// True when the error is a precondition conflict rather than a failure
    /// of the system itself.
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict(_))
    }
}

pub type Result<T> = std::result::Result<T, QueueError>;
