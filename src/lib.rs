#![allow(clippy::doc_markdown)] // Allow technical terms like takenUntil in docs
#![allow(clippy::missing_errors_doc)] // Allow public functions without # Errors sections
#![allow(clippy::must_use_candidate)] // Allow methods without must_use when context is clear

//! # Taskqueue Core
//!
//! Rust core of a distributed task-execution queue: clients submit tasks,
//! workers claim and execute them, and the system guarantees every task is
//! eventually resolved even across worker crashes, duplicated messages, and
//! concurrent callers.
//!
//! ## Architecture
//!
//! The task lifecycle is a formal state machine over an append-only run
//! list, mutated exclusively through optimistic-concurrency updates of the
//! entity store. Distribution runs over advisory queues with at-least-once
//! delivery; every consumer re-validates record state before acting, so
//! duplicated, delayed, and reordered messages are harmless. Background
//! reapers enforce the liveness invariants — deadlines, claim expirations,
//! record expirations — without relying on workers behaving correctly.
//!
//! ## Module Organization
//!
//! - [`models`] - Task, run, artifact, task-group, and dependency records
//! - [`state_machine`] - States and the pure lifecycle transition functions
//! - [`store`] - Entity store adapter with conditional updates
//! - [`messaging`] - Advisory queues for claim distribution
//! - [`events`] - Lifecycle event publication
//! - [`orchestration`] - API services, reapers, and system wiring
//! - [`artifacts`] - Per-run artifact protocol over storage backends
//! - [`config`] - Configuration structures and loader
//! - [`resilience`] - Shared exponential backoff
//! - [`scopes`] - Capability-check seam for external authorization
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use taskqueue_core::config::QueueConfig;
//! use taskqueue_core::orchestration::QueueSystem;
//!
//! # async fn example() -> taskqueue_core::Result<()> {
//! let system = QueueSystem::new(QueueConfig::default())?;
//! system.start();
//!
//! // Submit work, claim it from a worker, watch events...
//! let pending = system.pending_tasks("aws", "builder").await?;
//! println!("pending tasks: {pending}");
//!
//! system.stop().await;
//! # Ok(())
//! # }
//! ```

pub mod artifacts;
pub mod config;
pub mod constants;
pub mod error;
pub mod events;
pub mod logging;
pub mod messaging;
pub mod models;
pub mod orchestration;
pub mod resilience;
pub mod scopes;
pub mod state_machine;
pub mod store;

pub use config::{ClaimConfig, ConfigLoader, EventConfig, QueueConfig, ReaperConfig};
pub use error::{QueueError, Result};
pub use models::{
    generate_task_id, DependencyRequirement, Priority, Run, Task, TaskDefinition, TaskMetadata,
    TaskStatus,
};
pub use orchestration::{QueueSystem, TaskClaim};
pub use state_machine::{ReasonCreated, ReasonResolved, RunState, TaskState};
