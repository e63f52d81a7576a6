//! # Artifact Storage Backends
//!
//! The queue core never touches object storage itself; it only needs signed
//! upload/download urls and deletion of expired objects. Those are external
//! services behind the [`SigningBackend`] trait. [`StaticSigner`] produces
//! deterministic urls for embedded use and tests.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::models::ArtifactDetails;

/// Bucket/container layout for artifact storage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Bucket for `public/`-prefixed artifacts.
    pub public_bucket: String,
    /// Bucket for everything else.
    pub private_bucket: String,
    /// Azure container for azure-typed artifacts.
    pub azure_container: String,
    /// Lifetime of issued upload/download urls, in minutes.
    pub signed_url_ttl_minutes: i64,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            public_bucket: "taskqueue-public-artifacts".to_string(),
            private_bucket: "taskqueue-artifacts".to_string(),
            azure_container: "artifacts".to_string(),
            signed_url_ttl_minutes: 45,
        }
    }
}

/// External signing services: signed PUT/GET urls for buckets, SAS urls for
/// azure containers, and deletion of stored objects.
#[async_trait]
pub trait SigningBackend: Send + Sync {
    /// Signed url for uploading an object; the upload must carry the given
    /// content type.
    async fn signed_put_url(
        &self,
        bucket: &str,
        prefix: &str,
        content_type: &str,
        ttl_minutes: i64,
    ) -> Result<String>;

    /// Signed url for downloading an object.
    async fn signed_get_url(&self, bucket: &str, prefix: &str) -> Result<String>;

    /// SAS url for uploading a blob.
    async fn sas_upload_url(&self, container: &str, path: &str) -> Result<String>;

    /// SAS url for downloading a blob.
    async fn sas_download_url(&self, container: &str, path: &str) -> Result<String>;

    /// Delete the stored object behind an expired artifact. Reference and
    /// error artifacts have nothing to delete.
    async fn delete_object(&self, details: &ArtifactDetails) -> Result<()>;
}

/// Deterministic url construction without an external signer.
#[derive(Debug, Clone, Default)]
pub struct StaticSigner;

#[async_trait]
impl SigningBackend for StaticSigner {
    async fn signed_put_url(
        &self,
        bucket: &str,
        prefix: &str,
        content_type: &str,
        ttl_minutes: i64,
    ) -> Result<String> {
        Ok(format!(
            "https://{bucket}.example.net/{prefix}?sig=put&ct={}&ttl={ttl_minutes}",
            urlencode(content_type),
        ))
    }

    async fn signed_get_url(&self, bucket: &str, prefix: &str) -> Result<String> {
        Ok(format!("https://{bucket}.example.net/{prefix}?sig=get"))
    }

    async fn sas_upload_url(&self, container: &str, path: &str) -> Result<String> {
        Ok(format!(
            "https://blobs.example.net/{container}/{path}?sas=upload",
        ))
    }

    async fn sas_download_url(&self, container: &str, path: &str) -> Result<String> {
        Ok(format!(
            "https://blobs.example.net/{container}/{path}?sas=download",
        ))
    }

    async fn delete_object(&self, _details: &ArtifactDetails) -> Result<()> {
        Ok(())
    }
}

fn urlencode(value: &str) -> String {
    value.replace('/', "%2F").replace('+', "%2B")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_static_signer_urls() {
        let signer = StaticSigner;
        let put = signer
            .signed_put_url("bucket", "t1/0/public/log.txt", "text/plain", 45)
            .await
            .unwrap();
        assert!(put.starts_with("https://bucket.example.net/t1/0/public/log.txt"));
        assert!(put.contains("sig=put"));

        let sas = signer.sas_download_url("artifacts", "t1/0/log").await.unwrap();
        assert!(sas.contains("sas=download"));
    }
}
