//! # Artifact Protocol
//!
//! Per-run artifact creation and retrieval across storage backends.
//! Artifacts are immutable once created: identical re-creation is an
//! accepted idempotent replay (useful for refreshing signed urls mid
//! upload), expiry may only move later, and `reference` artifacts may
//! update their url. Everything else is a conflict.

pub mod storage;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, warn};

use crate::constants::{exchanges, system};
use crate::error::{QueueError, Result};
use crate::events::task_routes;
use crate::models::{Artifact, ArtifactDetails, ArtifactKey, Run};
use crate::orchestration::core::QueueCore;
use crate::scopes::ScopeChecker;
use crate::state_machine::RunState;
use crate::store::{self, EntityStore};

pub use storage::{SigningBackend, StaticSigner, StorageConfig};

/// Storage-specific part of a `createArtifact` request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "storageType", rename_all = "lowercase")]
pub enum UploadRequest {
    /// Upload to S3-compatible storage via a signed PUT url.
    S3,
    /// Upload to an Azure container via a SAS url.
    Azure,
    /// Artifact hosted elsewhere; requests redirect to `url`.
    Reference { url: String },
    /// Record that the artifact could not be produced.
    Error { message: String, reason: String },
}

/// Body of `createArtifact`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateArtifactRequest {
    #[serde(default = "default_content_type")]
    pub content_type: String,
    pub expires: DateTime<Utc>,
    #[serde(flatten)]
    pub upload: UploadRequest,
}

fn default_content_type() -> String {
    "application/json".to_string()
}

/// Upload instructions returned by `createArtifact`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "storageType", rename_all = "lowercase")]
pub enum CreateArtifactResponse {
    S3 {
        #[serde(rename = "putUrl")]
        put_url: String,
        expires: DateTime<Utc>,
        #[serde(rename = "contentType")]
        content_type: String,
    },
    Azure {
        #[serde(rename = "putUrl")]
        put_url: String,
        expires: DateTime<Utc>,
        #[serde(rename = "contentType")]
        content_type: String,
    },
    Reference,
    Error,
}

/// Result of a `getArtifact` request.
#[derive(Debug, Clone, PartialEq)]
pub enum ArtifactDownload {
    /// Redirect (303 See Other) to external storage.
    Redirect { url: String },
    /// The artifact is an error artifact; reject (424 Failed Dependency)
    /// with the stored message and reason.
    Error { message: String, reason: String },
}

/// One page of an artifact listing.
#[derive(Debug, Clone)]
pub struct ArtifactsPage {
    pub artifacts: Vec<serde_json::Value>,
    pub continuation_token: Option<String>,
}

/// Creates, serves, and expires artifacts.
pub struct ArtifactService {
    core: Arc<QueueCore>,
    signer: Arc<dyn SigningBackend>,
    storage: StorageConfig,
}

impl ArtifactService {
    pub fn new(core: Arc<QueueCore>, signer: Arc<dyn SigningBackend>, storage: StorageConfig) -> Self {
        Self {
            core,
            signer,
            storage,
        }
    }

    /// Create an artifact for a run and return upload instructions.
    ///
    /// The addressed run must have been claimed, and must be `running` —
    /// or resolved `exception` no more than 25 minutes ago, so workers can
    /// still upload logs after reporting a crash.
    pub async fn create_artifact(
        &self,
        task_id: &str,
        run_id: usize,
        name: &str,
        request: CreateArtifactRequest,
    ) -> Result<CreateArtifactResponse> {
        let now = Utc::now();
        if request.expires < now - Duration::minutes(system::TIMESTAMP_DRIFT_MINUTES) {
            return Err(QueueError::input("Artifact `expires` must be in the future"));
        }

        let task = self.core.load_task(task_id).await?;
        let run = task.runs.get(run_id).ok_or_else(|| {
            QueueError::not_found(format!("Run {run_id} not found on task `{task_id}`"))
        })?;
        let (worker_group, worker_id) = match (&run.worker_group, &run.worker_id) {
            (Some(group), Some(id)) => (group.clone(), id.clone()),
            _ => {
                return Err(QueueError::input(
                    "Run was never claimed by a worker, so no artifacts can exist",
                ));
            }
        };

        if request.expires > task.expires {
            return Err(QueueError::input(format!(
                "Artifact expires ({}) after the task expiration ({}); artifacts may \
                 not outlive the task they belong to",
                request.expires, task.expires,
            )));
        }

        if !artifact_window_open(run, now) {
            return Err(QueueError::conflict(format!(
                "Artifacts cannot be created for a task after it is resolved, unless it \
                 resolved `exception` within the last {} minutes; task state: {}",
                system::ARTIFACT_GRACE_MINUTES,
                task.state(),
            )));
        }

        let details = self.build_details(task_id, run_id, name, &request.upload);
        let artifact = Artifact {
            task_id: task_id.to_string(),
            run_id,
            name: name.to_string(),
            content_type: request.content_type.clone(),
            expires: request.expires,
            details: details.clone(),
        };
        let key = artifact.key();

        let artifact = match self.core.artifacts.create(key.clone(), artifact.clone()).await {
            Ok(versioned) => versioned.value,
            Err(err) if err.is_conflict() => self.recreate(&key, artifact).await?,
            Err(err) => return Err(err),
        };

        // The creation event is only meaningful for reference and error
        // artifacts; uploads to signed urls complete out of band
        if matches!(
            artifact.details,
            ArtifactDetails::Reference { .. } | ArtifactDetails::Error { .. },
        ) {
            self.core
                .publisher
                .publish(
                    exchanges::ARTIFACT_CREATED,
                    serde_json::json!({
                        "status": task.status(),
                        "artifact": artifact.json(),
                        "runId": run_id,
                        "workerGroup": worker_group,
                        "workerId": worker_id,
                    }),
                    task_routes(&task),
                )
                .await?;
        }
        info!(task_id = %task_id, run_id, name, storage_type = artifact.details.storage_type(), "artifact created");

        self.upload_instructions(&artifact).await
    }

    /// Idempotent re-creation: same storage type and content type, expiry
    /// not earlier than stored, and matching details (reference urls may
    /// differ). Accepted re-creations refresh expiry and details.
    async fn recreate(&self, key: &ArtifactKey, artifact: Artifact) -> Result<Artifact> {
        let existing = self
            .core
            .artifacts
            .load(key)
            .await?
            .ok_or_else(|| QueueError::StoreError("artifact vanished during create".to_string()))?
            .value;

        if existing.details.storage_type() != artifact.details.storage_type()
            || existing.content_type != artifact.content_type
            || existing.expires > artifact.expires
        {
            return Err(QueueError::conflict(format!(
                "Artifact `{}` already exists with different type or later expiration",
                artifact.name,
            )));
        }
        if !existing.details.matches_for_recreate(&artifact.details) {
            return Err(QueueError::conflict(format!(
                "Artifact `{}` already exists with different details",
                artifact.name,
            )));
        }

        let (updated, _) = store::modify(
            &self.core.artifacts,
            &self.core.config.backoff,
            key,
            |stored| {
                stored.expires = artifact.expires;
                stored.details = artifact.details.clone();
                Ok(())
            },
        )
        .await?;
        Ok(updated.value)
    }

    fn build_details(
        &self,
        task_id: &str,
        run_id: usize,
        name: &str,
        upload: &UploadRequest,
    ) -> ArtifactDetails {
        let prefix = format!("{task_id}/{run_id}/{name}");
        match upload {
            UploadRequest::S3 => ArtifactDetails::S3 {
                bucket: if name.starts_with("public/") {
                    self.storage.public_bucket.clone()
                } else {
                    self.storage.private_bucket.clone()
                },
                prefix,
            },
            UploadRequest::Azure => ArtifactDetails::Azure {
                container: self.storage.azure_container.clone(),
                path: prefix,
            },
            UploadRequest::Reference { url } => ArtifactDetails::Reference { url: url.clone() },
            UploadRequest::Error { message, reason } => ArtifactDetails::Error {
                message: message.clone(),
                reason: reason.clone(),
            },
        }
    }

    async fn upload_instructions(&self, artifact: &Artifact) -> Result<CreateArtifactResponse> {
        let ttl = self.storage.signed_url_ttl_minutes;
        let expiry = Utc::now() + Duration::minutes(ttl);
        match &artifact.details {
            ArtifactDetails::S3 { bucket, prefix } => Ok(CreateArtifactResponse::S3 {
                put_url: self
                    .signer
                    .signed_put_url(bucket, prefix, &artifact.content_type, ttl)
                    .await?,
                expires: expiry,
                content_type: artifact.content_type.clone(),
            }),
            ArtifactDetails::Azure { container, path } => Ok(CreateArtifactResponse::Azure {
                put_url: self.signer.sas_upload_url(container, path).await?,
                expires: expiry,
                content_type: artifact.content_type.clone(),
            }),
            ArtifactDetails::Reference { .. } => Ok(CreateArtifactResponse::Reference),
            ArtifactDetails::Error { .. } => Ok(CreateArtifactResponse::Error),
        }
    }

    /// Fetch an artifact: a redirect target for stored/reference artifacts,
    /// the stored error payload for error artifacts. `public/` names skip
    /// the capability check.
    pub async fn get_artifact(
        &self,
        task_id: &str,
        run_id: usize,
        name: &str,
        scopes: &dyn ScopeChecker,
    ) -> Result<ArtifactDownload> {
        if !name.starts_with("public/") {
            let requirement = format!("queue:get-artifact:{name}");
            if !scopes.satisfies(&requirement) {
                return Err(QueueError::InsufficientScopes(requirement));
            }
        }

        let key = ArtifactKey {
            task_id: task_id.to_string(),
            run_id,
            name: name.to_string(),
        };
        let artifact = self
            .core
            .artifacts
            .load(&key)
            .await?
            .ok_or_else(|| {
                QueueError::not_found(format!(
                    "Artifact `{name}` not found for run {run_id} of task `{task_id}`",
                ))
            })?
            .value;

        match &artifact.details {
            ArtifactDetails::S3 { bucket, prefix } => Ok(ArtifactDownload::Redirect {
                url: self.signer.signed_get_url(bucket, prefix).await?,
            }),
            ArtifactDetails::Azure { container, path } => Ok(ArtifactDownload::Redirect {
                url: self.signer.sas_download_url(container, path).await?,
            }),
            ArtifactDetails::Reference { url } => Ok(ArtifactDownload::Redirect { url: url.clone() }),
            ArtifactDetails::Error { message, reason } => Ok(ArtifactDownload::Error {
                message: message.clone(),
                reason: reason.clone(),
            }),
        }
    }

    /// Fetch an artifact from the latest run of the task.
    pub async fn get_latest_artifact(
        &self,
        task_id: &str,
        name: &str,
        scopes: &dyn ScopeChecker,
    ) -> Result<ArtifactDownload> {
        let task = self.core.load_task(task_id).await?;
        if task.runs.is_empty() {
            return Err(QueueError::not_found(format!(
                "Task `{task_id}` has no runs, so no artifacts exist",
            )));
        }
        self.get_artifact(task_id, task.runs.len() - 1, name, scopes)
            .await
    }

    /// Page of artifact summaries for a run, ordered by name.
    pub async fn list_artifacts(
        &self,
        task_id: &str,
        run_id: usize,
        continuation_token: Option<&str>,
        limit: usize,
    ) -> Result<ArtifactsPage> {
        let mut artifacts: Vec<Artifact> = self
            .core
            .artifacts
            .entries()
            .await?
            .into_iter()
            .filter(|(key, _)| key.task_id == task_id && key.run_id == run_id)
            .map(|(_, artifact)| artifact)
            .collect();
        artifacts.sort_by(|a, b| a.name.cmp(&b.name));

        let start = match continuation_token {
            Some(token) => artifacts.partition_point(|a| a.name.as_str() <= token),
            None => 0,
        };
        let page: Vec<&Artifact> = artifacts[start..].iter().take(limit).collect();
        let continuation = if start + page.len() < artifacts.len() {
            page.last().map(|a| a.name.clone())
        } else {
            None
        };

        Ok(ArtifactsPage {
            artifacts: page.into_iter().map(Artifact::json).collect(),
            continuation_token: continuation,
        })
    }

    /// Page of artifact summaries for the latest run.
    pub async fn list_latest_artifacts(
        &self,
        task_id: &str,
        continuation_token: Option<&str>,
        limit: usize,
    ) -> Result<ArtifactsPage> {
        let task = self.core.load_task(task_id).await?;
        if task.runs.is_empty() {
            return Err(QueueError::not_found(format!(
                "Task `{task_id}` has no runs, so no artifacts exist",
            )));
        }
        self.list_artifacts(task_id, task.runs.len() - 1, continuation_token, limit)
            .await
    }

    /// Delete artifact records (and their stored objects) past expiry.
    /// Records whose underlying object fails to delete are kept for the
    /// next pass.
    pub async fn expire_artifacts(&self, now: DateTime<Utc>) -> Result<usize> {
        let mut removed = 0;
        for (key, artifact) in self.core.artifacts.entries().await? {
            if artifact.expires >= now {
                continue;
            }
            if let Err(err) = self.signer.delete_object(&artifact.details).await {
                warn!(
                    task_id = %key.task_id,
                    name = %key.name,
                    error = %err,
                    "failed to delete expired artifact object; will retry",
                );
                continue;
            }
            if self.core.artifacts.remove(&key).await? {
                removed += 1;
            }
        }
        Ok(removed)
    }
}

/// Whether artifacts may still be created against this run.
fn artifact_window_open(run: &Run, now: DateTime<Utc>) -> bool {
    match run.state {
        RunState::Running => true,
        RunState::Exception => run
            .resolved
            .map(|resolved| now - resolved < Duration::minutes(system::ARTIFACT_GRACE_MINUTES))
            .unwrap_or(false),
        _ => false,
    }
}
