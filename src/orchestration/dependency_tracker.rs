//! # Dependency Tracker
//!
//! Tracks dependencies between tasks and promotes dependents from
//! `unscheduled` to `pending` once their satisfaction condition holds:
//! `all-completed` requires every dependency to resolve `completed`,
//! `all-resolved` accepts any terminal state. A dependency that resolves
//! unsatisfyingly under `all-completed` leaves the dependent unscheduled
//! indefinitely; that is accepted behavior, not a fault.
//!
//! Also owns the task-group active set: when the last member of a group
//! resolves, a `task-group-resolved` event goes out.

use chrono::Utc;
use std::collections::BTreeSet;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::constants::exchanges;
use crate::error::{QueueError, Result};
use crate::messaging::ResolutionMessage;
use crate::models::{DependencyEdge, DependencyKey, Task, TaskGroupMemberKey, TaskStatus};
use crate::orchestration::core::QueueCore;
use crate::state_machine::{self, ReasonCreated, RunState, ScheduleOutcome};
use crate::store::{self, EntityStore};

/// Dependency bookkeeping and unscheduled → pending promotion.
pub struct DependencyTracker {
    core: Arc<QueueCore>,
}

impl DependencyTracker {
    pub fn new(core: Arc<QueueCore>) -> Arc<Self> {
        Arc::new(Self { core })
    }

    /// Register dependency edges for a freshly created task. Returns the
    /// task status when the task was scheduled as a result.
    ///
    /// Missing dependencies, or dependencies expiring before this task's
    /// deadline, are fatal input errors: the just-created task record is
    /// removed again so the id cannot be triggered by defining the
    /// dependencies later.
    pub async fn track_dependencies(
        &self,
        task: &Task,
        schedule_if_ready: bool,
    ) -> Result<Option<TaskStatus>> {
        let unique: BTreeSet<&String> = task.dependencies.iter().collect();
        let mut missing = Vec::new();
        let mut expiring = Vec::new();
        let mut all_satisfied = true;

        for dep_id in unique {
            // A task may depend on itself; the edge is bookkeeping only and
            // never blocks scheduling
            let satisfied = if *dep_id == task.task_id {
                true
            } else {
                match self.core.tasks.load(dep_id).await? {
                    None => {
                        missing.push(dep_id.clone());
                        continue;
                    }
                    Some(required) => {
                        let required = required.value;
                        if required.expires < task.deadline {
                            expiring.push(dep_id.clone());
                            continue;
                        }
                        dependency_satisfied_by(task, required.state().into_run_state())
                    }
                }
            };
            if !satisfied {
                all_satisfied = false;
            }

            let edge = DependencyEdge {
                dependent_task_id: task.task_id.clone(),
                required_task_id: dep_id.clone(),
                requires: task.requires,
                satisfied,
                expires: task.expires,
            };
            // Replays find the edge already present
            if let Err(err) = self.core.dependencies.create(edge.key(), edge).await {
                if !err.is_conflict() {
                    return Err(err);
                }
            }
        }

        if !missing.is_empty() || !expiring.is_empty() {
            self.remove_task_and_edges(task).await?;
            let mut msg = String::new();
            if !missing.is_empty() {
                msg.push_str(&format!(
                    "`task.dependencies` references non-existing tasks: {missing:?}; \
                     all dependencies must exist before the task is created. ",
                ));
            }
            if !expiring.is_empty() {
                msg.push_str(&format!(
                    "`task.dependencies` references tasks that expire before this \
                     task's deadline: {expiring:?}",
                ));
            }
            return Err(QueueError::input(msg.trim_end()));
        }

        if schedule_if_ready && all_satisfied {
            return self.schedule_task(&task.task_id).await.map(Some);
        }
        Ok(None)
    }

    async fn remove_task_and_edges(&self, task: &Task) -> Result<()> {
        // Remove the task first; the edges make it easier to trigger, so
        // they go second
        self.core.tasks.remove(&task.task_id).await?;
        for dep_id in &task.dependencies {
            let key = DependencyKey {
                dependent_task_id: task.task_id.clone(),
                required_task_id: dep_id.clone(),
            };
            self.core.dependencies.remove(&key).await?;
        }
        Ok(())
    }

    /// Schedule an initial run for the task, even if its dependencies are
    /// unresolved. Idempotent: an already-scheduled task returns its
    /// current status. Fails with `Conflict` past the deadline.
    pub async fn schedule_task(&self, task_id: &str) -> Result<TaskStatus> {
        let task = self.core.load_task(task_id).await?;
        if task.deadline < Utc::now() {
            return Err(QueueError::conflict(format!(
                "Task `{task_id}` can't be scheduled past its deadline at {}",
                task.deadline,
            )));
        }

        let now = Utc::now();
        let (task, outcome) = self
            .core
            .modify_task(task_id, |task| {
                Ok(state_machine::schedule_task(
                    task,
                    ReasonCreated::Scheduled,
                    now,
                ))
            })
            .await?;

        let status = task.status();
        if let ScheduleOutcome::Scheduled { run_id } = outcome {
            self.core
                .queue_service
                .put_pending_message(&task, run_id)
                .await?;
            self.core
                .publish_task_event(
                    exchanges::TASK_PENDING,
                    &task,
                    serde_json::json!({"status": status, "runId": run_id}),
                )
                .await?;
            info!(task_id = %task_id, run_id, "task scheduled");
        }
        Ok(status)
    }

    /// Whether some unsatisfied requirement still blocks the task.
    pub async fn is_blocked(&self, task_id: &str) -> Result<bool> {
        Ok(self
            .core
            .dependencies
            .entries()
            .await?
            .into_iter()
            .any(|(key, edge)| key.dependent_task_id == task_id && !edge.satisfied))
    }

    /// Handle one resolution: satisfy qualifying edges, schedule unblocked
    /// dependents, and update group accounting. Idempotent under redelivery.
    pub async fn resolve_task(&self, message: &ResolutionMessage) -> Result<()> {
        debug!(
            task_id = %message.task_id,
            resolution = %message.resolution,
            "processing task resolution"
        );

        let dependents: Vec<DependencyKey> = self
            .core
            .dependencies
            .entries()
            .await?
            .into_iter()
            .filter(|(key, edge)| {
                key.required_task_id == message.task_id
                    && !edge.satisfied
                    && edge_qualifies(edge, message.resolution)
            })
            .map(|(key, _)| key)
            .collect();

        for key in dependents {
            let marked = store::modify(
                &self.core.dependencies,
                &self.core.config.backoff,
                &key,
                |edge| {
                    edge.satisfied = true;
                    Ok(())
                },
            )
            .await;
            match marked {
                Ok(_) => {}
                // The edge expired under us; nothing left to schedule
                Err(QueueError::ResourceNotFound(_)) => continue,
                Err(err) => return Err(err),
            }

            if !self.is_blocked(&key.dependent_task_id).await? {
                match self.schedule_task(&key.dependent_task_id).await {
                    Ok(_) => {}
                    // Past-deadline or half-created dependents are skipped;
                    // the deadline reaper owns the former
                    Err(QueueError::Conflict(reason)) => {
                        debug!(task_id = %key.dependent_task_id, %reason, "dependent not scheduled");
                    }
                    Err(QueueError::ResourceNotFound(_)) => {
                        warn!(
                            task_id = %key.dependent_task_id,
                            "dependent task vanished before scheduling",
                        );
                    }
                    Err(err) => return Err(err),
                }
            }
        }

        self.update_group_active_set(message).await
    }

    /// Mark the member resolved and publish `task-group-resolved` when no
    /// unresolved members remain.
    async fn update_group_active_set(&self, message: &ResolutionMessage) -> Result<()> {
        let key = TaskGroupMemberKey {
            task_group_id: message.task_group_id.clone(),
            task_id: message.task_id.clone(),
        };
        let marked = store::modify(
            &self.core.group_members,
            &self.core.config.backoff,
            &key,
            |member| {
                member.ever_resolved = true;
                Ok(())
            },
        )
        .await;
        match marked {
            Ok(_) => {}
            // Membership may have expired; group accounting is best-effort
            Err(QueueError::ResourceNotFound(_)) => return Ok(()),
            Err(err) => return Err(err),
        }

        let group_active = self
            .core
            .group_members
            .entries()
            .await?
            .into_iter()
            .any(|(key, member)| {
                key.task_group_id == message.task_group_id && !member.ever_resolved
            });

        if !group_active {
            let expires = self
                .core
                .task_groups
                .load(&message.task_group_id)
                .await?
                .map(|versioned| versioned.value.expires);
            self.core
                .publisher
                .publish(
                    exchanges::TASK_GROUP_RESOLVED,
                    serde_json::json!({
                        "taskGroupId": message.task_group_id,
                        "schedulerId": message.scheduler_id,
                        "expires": expires,
                    }),
                    vec![],
                )
                .await?;
            info!(task_group_id = %message.task_group_id, "task group resolved");
        }
        Ok(())
    }

    /// Drain one batch from the resolved queue. Returns the number of
    /// messages handled.
    pub async fn process_once(&self) -> Result<usize> {
        let config = &self.core.config.reapers;
        let messages = self
            .core
            .queue_service
            .poll_resolved_queue(config.batch_size, config.message_visibility())
            .await?;
        let count = messages.len();

        for message in messages {
            match self.resolve_task(&message.payload).await {
                Ok(()) => {
                    message.remove().await?;
                }
                Err(err) => {
                    // Leave the message; it reappears after the visibility
                    // timeout and gets retried
                    warn!(
                        task_id = %message.payload.task_id,
                        error = %err,
                        "failed to process resolution message",
                    );
                }
            }
        }
        Ok(count)
    }

    /// Consume the resolved queue until shutdown.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        let delay = self.core.config.reapers.polling_delay();
        loop {
            let handled = match self.process_once().await {
                Ok(count) => count,
                Err(err) => {
                    warn!(error = %err, "dependency resolver pass failed");
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

/// Whether a dependency resolving to `resolution` satisfies an edge.
fn edge_qualifies(edge: &DependencyEdge, resolution: RunState) -> bool {
    match edge.requires {
        crate::models::DependencyRequirement::AllCompleted => resolution == RunState::Completed,
        crate::models::DependencyRequirement::AllResolved => resolution.is_terminal(),
    }
}

/// Whether an already-existing dependency state satisfies the dependent at
/// creation time.
fn dependency_satisfied_by(task: &Task, state: Option<RunState>) -> bool {
    match state {
        Some(state) if state.is_terminal() => match task.requires {
            crate::models::DependencyRequirement::AllCompleted => state == RunState::Completed,
            crate::models::DependencyRequirement::AllResolved => true,
        },
        _ => false,
    }
}

trait TaskStateExt {
    fn into_run_state(self) -> Option<RunState>;
}

impl TaskStateExt for crate::state_machine::TaskState {
    fn into_run_state(self) -> Option<RunState> {
        match self {
            crate::state_machine::TaskState::Unscheduled => None,
            crate::state_machine::TaskState::Pending => Some(RunState::Pending),
            crate::state_machine::TaskState::Running => Some(RunState::Running),
            crate::state_machine::TaskState::Completed => Some(RunState::Completed),
            crate::state_machine::TaskState::Failed => Some(RunState::Failed),
            crate::state_machine::TaskState::Exception => Some(RunState::Exception),
        }
    }
}
