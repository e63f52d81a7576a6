//! # Expiration Reaper
//!
//! Periodic garbage collection of records past their `expires`: task
//! records, artifacts (with their stored objects), task-group definitions,
//! group membership rows, and dependency edges. Each class expires
//! independently; dropping an expired membership row never touches
//! unexpired members of the same group.

use chrono::{DateTime, Utc};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{info, warn};

use crate::artifacts::ArtifactService;
use crate::error::Result;
use crate::orchestration::core::QueueCore;
use crate::store::EntityStore;

/// Counts of removed records from one expiration pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExpirationCounts {
    pub tasks: usize,
    pub artifacts: usize,
    pub task_groups: usize,
    pub group_members: usize,
    pub dependencies: usize,
}

/// Background scanner deleting expired records.
pub struct ExpirationReaper {
    core: Arc<QueueCore>,
    artifacts: Arc<ArtifactService>,
}

impl ExpirationReaper {
    pub fn new(core: Arc<QueueCore>, artifacts: Arc<ArtifactService>) -> Self {
        Self { core, artifacts }
    }

    /// Delete task records past expiry. Their artifacts expire no later
    /// than the task and are collected by the artifact pass.
    pub async fn expire_tasks(&self, now: DateTime<Utc>) -> Result<usize> {
        let mut removed = 0;
        for (task_id, task) in self.core.tasks.entries().await? {
            if task.expires < now && self.core.tasks.remove(&task_id).await? {
                removed += 1;
            }
        }
        Ok(removed)
    }

    /// Delete group definitions past expiry.
    pub async fn expire_task_groups(&self, now: DateTime<Utc>) -> Result<usize> {
        let mut removed = 0;
        for (group_id, group) in self.core.task_groups.entries().await? {
            if group.expires < now && self.core.task_groups.remove(&group_id).await? {
                removed += 1;
            }
        }
        Ok(removed)
    }

    /// Delete membership rows past expiry, row by row; unexpired members of
    /// the same group are untouched.
    pub async fn expire_group_members(&self, now: DateTime<Utc>) -> Result<usize> {
        let mut removed = 0;
        for (key, member) in self.core.group_members.entries().await? {
            if member.expires < now && self.core.group_members.remove(&key).await? {
                removed += 1;
            }
        }
        Ok(removed)
    }

    /// Delete dependency edges past expiry.
    pub async fn expire_dependencies(&self, now: DateTime<Utc>) -> Result<usize> {
        let mut removed = 0;
        for (key, edge) in self.core.dependencies.entries().await? {
            if edge.expires < now && self.core.dependencies.remove(&key).await? {
                removed += 1;
            }
        }
        Ok(removed)
    }

    /// Run every expiration scan once.
    pub async fn process_once(&self, now: DateTime<Utc>) -> Result<ExpirationCounts> {
        let counts = ExpirationCounts {
            artifacts: self.artifacts.expire_artifacts(now).await?,
            tasks: self.expire_tasks(now).await?,
            task_groups: self.expire_task_groups(now).await?,
            group_members: self.expire_group_members(now).await?,
            dependencies: self.expire_dependencies(now).await?,
        };
        if counts != ExpirationCounts::default() {
            info!(
                tasks = counts.tasks,
                artifacts = counts.artifacts,
                task_groups = counts.task_groups,
                group_members = counts.group_members,
                dependencies = counts.dependencies,
                "expired records collected",
            );
        }
        Ok(counts)
    }

    /// Scan on an interval until shutdown.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        let interval = self.core.config.reapers.expiration_interval();
        loop {
            tokio::select! {
                _ = tokio::time::sleep(interval) => {}
                _ = shutdown.changed() => {}
            }
            if *shutdown.borrow() {
                break;
            }
            if let Err(err) = self.process_once(Utc::now()).await {
                warn!(error = %err, "expiration pass failed");
            }
        }
    }
}
