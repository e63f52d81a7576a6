//! # Artifact Model
//!
//! A named output of a specific (task, run). Artifacts are immutable once
//! created, with two carve-outs: identical re-creation is an accepted
//! idempotent replay, and `reference` artifacts may update their url. The
//! storage-specific location details are a tagged union over the storage
//! type rather than a free-form blob.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Storage-specific location details. The serde tag doubles as the wire-level
/// `storageType` string.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "storageType", rename_all = "lowercase")]
pub enum ArtifactDetails {
    /// Object stored in an S3-compatible bucket; uploads go through a signed
    /// PUT url.
    S3 { bucket: String, prefix: String },
    /// Blob in an Azure container; uploads go through a SAS url.
    Azure { container: String, path: String },
    /// Artifact hosted elsewhere; requests redirect to the url.
    Reference { url: String },
    /// A named artifact that could not be produced. Requests receive the
    /// stored message and reason instead of content.
    Error { message: String, reason: String },
}

impl ArtifactDetails {
    /// Wire-level storage type name.
    pub fn storage_type(&self) -> &'static str {
        match self {
            Self::S3 { .. } => "s3",
            Self::Azure { .. } => "azure",
            Self::Reference { .. } => "reference",
            Self::Error { .. } => "error",
        }
    }

    /// Whether two detail values are considered "the same artifact" for
    /// idempotent re-creation. Reference urls may differ; everything else
    /// must match exactly.
    pub fn matches_for_recreate(&self, other: &ArtifactDetails) -> bool {
        match (self, other) {
            (Self::Reference { .. }, Self::Reference { .. }) => true,
            (a, b) => a == b,
        }
    }
}

/// Stored artifact record, keyed (task_id, run_id, name).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Artifact {
    pub task_id: String,
    pub run_id: usize,
    pub name: String,
    pub content_type: String,
    pub expires: DateTime<Utc>,
    #[serde(flatten)]
    pub details: ArtifactDetails,
}

impl Artifact {
    /// Key for the artifact table.
    pub fn key(&self) -> ArtifactKey {
        ArtifactKey {
            task_id: self.task_id.clone(),
            run_id: self.run_id,
            name: self.name.clone(),
        }
    }

    /// Whether the artifact name makes it publicly readable, bypassing the
    /// capability check on download.
    pub fn is_public(&self) -> bool {
        self.name.starts_with("public/")
    }

    /// Summary returned to API callers and embedded in events.
    pub fn json(&self) -> serde_json::Value {
        serde_json::json!({
            "storageType": self.details.storage_type(),
            "name": self.name,
            "expires": self.expires,
            "contentType": self.content_type,
        })
    }
}

/// Composite key of an artifact record.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ArtifactKey {
    pub task_id: String,
    pub run_id: usize,
    pub name: String,
}
