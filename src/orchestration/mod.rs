//! # Orchestration Layer
//!
//! API services for the task lifecycle and the background processes that
//! keep it live. No component holds a lock across operations; everything
//! relies on the conditional-update / idempotent-replay discipline of the
//! entity store and the advisory queues.

pub mod claim_reaper;
pub mod core;
pub mod deadline_reaper;
pub mod dependency_tracker;
pub mod expiration;
pub mod system;
pub mod task_initializer;
pub mod task_resolver;
pub mod work_claimer;

pub use claim_reaper::ClaimReaper;
pub use self::core::{DependentTasksPage, QueueCore, TaskGroupPage};
pub use deadline_reaper::DeadlineReaper;
pub use dependency_tracker::DependencyTracker;
pub use expiration::{ExpirationCounts, ExpirationReaper};
pub use system::QueueSystem;
pub use task_initializer::TaskInitializer;
pub use task_resolver::TaskResolver;
pub use work_claimer::{TaskClaim, WorkClaimer};
