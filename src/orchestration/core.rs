//! # Queue Core Resources
//!
//! Shared resource container handed to every service and reaper: the entity
//! tables, the distribution queues, the event publisher, and the
//! configuration. No global state; everything is constructed here and
//! passed explicitly.

use chrono::Utc;
use std::sync::Arc;

use crate::config::QueueConfig;
use crate::error::{QueueError, Result};
use crate::events::{task_routes, EventPublisher};
use crate::messaging::QueueService;
use crate::models::{
    Artifact, ArtifactKey, DependencyEdge, DependencyKey, Task, TaskGroup, TaskGroupMember,
    TaskGroupMemberKey, TaskStatus,
};
use crate::store::{self, EntityStore, MemoryTable};

/// Shared state for all queue services.
pub struct QueueCore {
    pub config: QueueConfig,
    pub tasks: MemoryTable<String, Task>,
    pub artifacts: MemoryTable<ArtifactKey, Artifact>,
    pub task_groups: MemoryTable<String, TaskGroup>,
    pub group_members: MemoryTable<TaskGroupMemberKey, TaskGroupMember>,
    pub dependencies: MemoryTable<DependencyKey, DependencyEdge>,
    pub queue_service: QueueService,
    pub publisher: EventPublisher,
}

impl QueueCore {
    pub fn new(config: QueueConfig) -> Arc<Self> {
        let queue_service = QueueService::new(config.reapers.deadline_delay());
        let publisher = EventPublisher::new(config.events.channel_capacity);
        Arc::new(Self {
            config,
            tasks: MemoryTable::new(),
            artifacts: MemoryTable::new(),
            task_groups: MemoryTable::new(),
            group_members: MemoryTable::new(),
            dependencies: MemoryTable::new(),
            queue_service,
            publisher,
        })
    }

    /// Load a task or fail with `ResourceNotFound`.
    pub async fn load_task(&self, task_id: &str) -> Result<Task> {
        self.tasks
            .load(&task_id.to_string())
            .await?
            .map(|versioned| versioned.value)
            .ok_or_else(|| {
                QueueError::not_found(format!(
                    "Task `{task_id}` not found. Are you sure it was created?",
                ))
            })
    }

    /// Apply a lifecycle updater to a task with optimistic retries, using
    /// the shared backoff policy.
    pub async fn modify_task<F, O>(&self, task_id: &str, updater: F) -> Result<(Task, O)>
    where
        F: FnMut(&mut Task) -> Result<O>,
    {
        let (versioned, outcome) = store::modify(
            &self.tasks,
            &self.config.backoff,
            &task_id.to_string(),
            updater,
        )
        .await?;
        Ok((versioned.value, outcome))
    }

    /// Publish a lifecycle event about `task`, routed with its routes.
    pub async fn publish_task_event(
        &self,
        exchange: &str,
        task: &Task,
        payload: serde_json::Value,
    ) -> Result<()> {
        self.publisher
            .publish(exchange, payload, task_routes(task))
            .await
    }

    /// Page of member task statuses for a group, ordered by task id. The
    /// continuation token is the last task id of the previous page.
    pub async fn list_task_group(
        &self,
        task_group_id: &str,
        continuation_token: Option<&str>,
        limit: usize,
    ) -> Result<TaskGroupPage> {
        let group = self
            .task_groups
            .load(&task_group_id.to_string())
            .await?
            .map(|versioned| versioned.value)
            .ok_or_else(|| {
                QueueError::not_found(format!("No task-group with taskGroupId: {task_group_id}"))
            })?;

        let mut member_ids: Vec<String> = self
            .group_members
            .entries()
            .await?
            .into_iter()
            .filter(|(key, member)| {
                key.task_group_id == task_group_id && member.expires > Utc::now()
            })
            .map(|(key, _)| key.task_id)
            .collect();
        member_ids.sort();

        let start = match continuation_token {
            Some(token) => member_ids.partition_point(|id| id.as_str() <= token),
            None => 0,
        };
        let page: Vec<String> = member_ids[start..].iter().take(limit).cloned().collect();
        let continuation = if start + page.len() < member_ids.len() {
            page.last().cloned()
        } else {
            None
        };

        let mut statuses = Vec::with_capacity(page.len());
        for task_id in &page {
            // Members whose task record expired already are skipped
            if let Some(versioned) = self.tasks.load(task_id).await? {
                statuses.push(versioned.value.status());
            }
        }

        Ok(TaskGroupPage {
            task_group_id: group.task_group_id,
            scheduler_id: group.scheduler_id,
            expires: group.expires,
            tasks: statuses,
            continuation_token: continuation,
        })
    }

    /// Page of tasks that depend on `task_id`, ordered by task id.
    pub async fn list_dependent_tasks(
        &self,
        task_id: &str,
        continuation_token: Option<&str>,
        limit: usize,
    ) -> Result<DependentTasksPage> {
        // The addressed task must exist, mirroring the not-found contract of
        // the other task operations
        self.load_task(task_id).await?;

        let mut dependent_ids: Vec<String> = self
            .dependencies
            .entries()
            .await?
            .into_iter()
            .filter(|(key, _)| key.required_task_id == task_id)
            .map(|(key, _)| key.dependent_task_id)
            .collect();
        dependent_ids.sort();
        dependent_ids.dedup();

        let start = match continuation_token {
            Some(token) => dependent_ids.partition_point(|id| id.as_str() <= token),
            None => 0,
        };
        let page: Vec<String> = dependent_ids[start..].iter().take(limit).cloned().collect();
        let continuation = if start + page.len() < dependent_ids.len() {
            page.last().cloned()
        } else {
            None
        };

        let mut statuses = Vec::with_capacity(page.len());
        for dependent in &page {
            if let Some(versioned) = self.tasks.load(dependent).await? {
                statuses.push(versioned.value.status());
            }
        }

        Ok(DependentTasksPage {
            task_id: task_id.to_string(),
            tasks: statuses,
            continuation_token: continuation,
        })
    }
}

/// One page of `listTaskGroup`.
#[derive(Debug, Clone)]
pub struct TaskGroupPage {
    pub task_group_id: String,
    pub scheduler_id: String,
    pub expires: chrono::DateTime<Utc>,
    pub tasks: Vec<TaskStatus>,
    pub continuation_token: Option<String>,
}

/// One page of `listDependentTasks`.
#[derive(Debug, Clone)]
pub struct DependentTasksPage {
    pub task_id: String,
    pub tasks: Vec<TaskStatus>,
    pub continuation_token: Option<String>,
}
