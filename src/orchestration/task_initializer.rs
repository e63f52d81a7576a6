//! # Task Initializer
//!
//! Intake path for new tasks: validation, task-group pinning, deadline
//! message enqueue, idempotent record creation, and dependency
//! registration. `createTask` schedules the first run as soon as the
//! dependency condition allows; `defineTask` always leaves the task
//! unscheduled for an explicit `scheduleTask` later.

use chrono::Utc;
use std::sync::Arc;
use tracing::info;

use crate::constants::exchanges;
use crate::error::{QueueError, Result};
use crate::models::{Task, TaskDefinition, TaskGroup, TaskGroupMember, TaskStatus};
use crate::orchestration::core::QueueCore;
use crate::orchestration::dependency_tracker::DependencyTracker;
use crate::state_machine::TaskState;
use crate::store::{self, EntityStore};

/// Creates and defines tasks.
pub struct TaskInitializer {
    core: Arc<QueueCore>,
    tracker: Arc<DependencyTracker>,
}

impl TaskInitializer {
    pub fn new(core: Arc<QueueCore>, tracker: Arc<DependencyTracker>) -> Self {
        Self { core, tracker }
    }

    /// Create a task, scheduling its first run once dependencies allow.
    /// Idempotent: an identical definition replays to the current status, a
    /// different definition under the same id is a conflict.
    pub async fn create_task(&self, task_id: &str, def: TaskDefinition) -> Result<TaskStatus> {
        self.create(task_id, def, true).await
    }

    /// Create a task that stays `unscheduled` until `scheduleTask`, even if
    /// it has no dependencies.
    pub async fn define_task(&self, task_id: &str, def: TaskDefinition) -> Result<TaskStatus> {
        self.create(task_id, def, false).await
    }

    async fn create(
        &self,
        task_id: &str,
        def: TaskDefinition,
        schedule_if_ready: bool,
    ) -> Result<TaskStatus> {
        let now = Utc::now();
        let task = def.into_task(task_id, now)?;

        self.ensure_task_group(&task).await?;

        // The deadline message goes in before the record exists, so the
        // deadline invariant holds even if creation fails part-way
        self.core
            .queue_service
            .put_deadline_message(
                &task.task_id,
                &task.task_group_id,
                &task.scheduler_id,
                task.deadline,
            )
            .await?;

        let task = match self
            .core
            .tasks
            .create(task.task_id.clone(), task.clone())
            .await
        {
            Ok(versioned) => versioned.value,
            Err(err) if err.is_conflict() => {
                let existing = self.core.load_task(task_id).await?;
                if existing.definition() != task.definition() {
                    return Err(QueueError::conflict(format!(
                        "taskId `{task_id}` already used by another task",
                    )));
                }
                existing
            }
            Err(err) => return Err(err),
        };

        // If the task already advanced past unscheduled, an earlier call
        // completed the whole intake; just report status
        if task.state() != TaskState::Unscheduled {
            return Ok(task.status());
        }

        self.core
            .publish_task_event(
                exchanges::TASK_DEFINED,
                &task,
                serde_json::json!({"status": task.status()}),
            )
            .await?;
        info!(task_id = %task_id, task_queue_id = %task.task_queue_id(), "task created");

        if let Some(status) = self
            .tracker
            .track_dependencies(&task, schedule_if_ready)
            .await?
        {
            return Ok(status);
        }
        Ok(self.core.load_task(task_id).await?.status())
    }

    /// Pin the task group's scheduler id, creating the group on first use,
    /// and declare membership. All tasks of a group must share one
    /// scheduler id.
    async fn ensure_task_group(&self, task: &Task) -> Result<()> {
        let group = TaskGroup {
            task_group_id: task.task_group_id.clone(),
            scheduler_id: task.scheduler_id.clone(),
            expires: task.expires,
        };
        match self
            .core
            .task_groups
            .create(task.task_group_id.clone(), group)
            .await
        {
            Ok(_) => {}
            Err(err) if err.is_conflict() => {
                let existing = self
                    .core
                    .task_groups
                    .load(&task.task_group_id)
                    .await?
                    .ok_or_else(|| QueueError::StoreError("task group vanished".to_string()))?
                    .value;
                if existing.scheduler_id != task.scheduler_id {
                    return Err(QueueError::conflict(format!(
                        "Task group `{}` contains tasks with a schedulerId other than `{}`; \
                         all tasks in the same task-group must have the same schedulerId",
                        task.task_group_id, task.scheduler_id,
                    )));
                }
                // The group lives at least as long as its longest member
                if existing.expires < task.expires {
                    store::modify(
                        &self.core.task_groups,
                        &self.core.config.backoff,
                        &task.task_group_id,
                        |group| {
                            if group.expires < task.expires {
                                group.expires = task.expires;
                            }
                            Ok(())
                        },
                    )
                    .await?;
                }
            }
            Err(err) => return Err(err),
        }

        let member = TaskGroupMember {
            task_group_id: task.task_group_id.clone(),
            task_id: task.task_id.clone(),
            expires: task.expires,
            ever_resolved: false,
        };
        match self.core.group_members.create(member.key(), member).await {
            Ok(_) => Ok(()),
            Err(err) if err.is_conflict() => Ok(()),
            Err(err) => Err(err),
        }
    }
}
