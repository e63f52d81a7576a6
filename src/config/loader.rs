//! # Configuration Loader
//!
//! Environment-aware configuration loading. Discovers a YAML file for the
//! current environment, falls back to built-in defaults when none exists,
//! and validates the result before handing it out.

use std::env;
use std::path::{Path, PathBuf};
use tracing::debug;

use super::QueueConfig;
use crate::error::{QueueError, Result};

/// Environment variable naming the active environment.
const ENV_VAR: &str = "TASKQUEUE_ENV";
/// Environment variable overriding the config directory.
const CONFIG_DIR_VAR: &str = "TASKQUEUE_CONFIG_DIR";

/// Loads [`QueueConfig`] from `<config_dir>/<environment>.yaml`.
pub struct ConfigLoader {
    config_directory: PathBuf,
    environment: String,
}

impl ConfigLoader {
    /// Loader with environment auto-detection: `TASKQUEUE_ENV`, defaulting
    /// to `development`.
    pub fn new() -> Self {
        Self::with_environment(Self::detect_environment())
    }

    /// Loader for an explicit environment. Useful for tests, which should
    /// not mutate process-wide environment variables.
    pub fn with_environment(environment: impl Into<String>) -> Self {
        let config_directory = env::var(CONFIG_DIR_VAR)
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("config"));
        Self {
            config_directory,
            environment: environment.into(),
        }
    }

    /// Override the config directory.
    pub fn with_config_directory(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config_directory = dir.into();
        self
    }

    pub fn environment(&self) -> &str {
        &self.environment
    }

    fn detect_environment() -> String {
        env::var(ENV_VAR).unwrap_or_else(|_| "development".to_string())
    }

    /// Load and validate the configuration. A missing file yields the
    /// defaults; an unreadable or malformed file is an error.
    pub fn load(&self) -> Result<QueueConfig> {
        let path = self
            .config_directory
            .join(format!("{}.yaml", self.environment));

        let config = if path.exists() {
            debug!(path = %path.display(), "loading queue configuration");
            Self::load_file(&path)?
        } else {
            debug!(
                environment = %self.environment,
                "no configuration file, using defaults"
            );
            QueueConfig::default()
        };

        config.validate()?;
        Ok(config)
    }

    fn load_file(path: &Path) -> Result<QueueConfig> {
        let contents = std::fs::read_to_string(path).map_err(|e| {
            QueueError::ConfigurationError(format!("cannot read {}: {e}", path.display()))
        })?;
        serde_yaml::from_str(&contents).map_err(|e| {
            QueueError::ConfigurationError(format!("cannot parse {}: {e}", path.display()))
        })
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = ConfigLoader::with_environment("test")
            .with_config_directory(dir.path())
            .load()
            .unwrap();
        assert_eq!(config, QueueConfig::default());
    }

    #[test]
    fn test_loads_environment_file() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("test.yaml"),
            "claim:\n  claim_timeout_seconds: 77\n",
        )
        .unwrap();

        let config = ConfigLoader::with_environment("test")
            .with_config_directory(dir.path())
            .load()
            .unwrap();
        assert_eq!(config.claim.claim_timeout_seconds, 77);
    }

    #[test]
    fn test_malformed_file_is_error() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("test.yaml"), "claim: [not, a, map]").unwrap();

        let err = ConfigLoader::with_environment("test")
            .with_config_directory(dir.path())
            .load()
            .unwrap_err();
        assert!(matches!(err, QueueError::ConfigurationError(_)));
    }

    #[test]
    fn test_invalid_values_rejected() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("test.yaml"),
            "claim:\n  claim_timeout_seconds: 0\n",
        )
        .unwrap();

        let err = ConfigLoader::with_environment("test")
            .with_config_directory(dir.path())
            .load()
            .unwrap_err();
        assert!(matches!(err, QueueError::ConfigurationError(_)));
    }
}
