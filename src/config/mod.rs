//! # Configuration Management
//!
//! Explicit configuration for the queue core. There is no ambient global
//! state: a [`QueueConfig`] is constructed (from defaults, a YAML file, or
//! the loader's environment detection) and passed to `QueueSystem` at
//! construction.

pub mod loader;

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::{QueueError, Result};
use crate::resilience::RetryPolicy;

pub use loader::ConfigLoader;

/// Top-level configuration for the queue core.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    /// Claim protocol settings
    pub claim: ClaimConfig,
    /// Background reaper settings
    pub reapers: ReaperConfig,
    /// Optimistic-concurrency retry policy, shared by every `modify` call
    pub backoff: RetryPolicy,
    /// Event publication settings
    pub events: EventConfig,
    /// Artifact bucket/container layout
    pub storage: crate::artifacts::storage::StorageConfig,
}

impl QueueConfig {
    /// Validate invariants that serde defaults alone cannot express.
    pub fn validate(&self) -> Result<()> {
        if self.claim.claim_timeout_seconds == 0 {
            return Err(QueueError::ConfigurationError(
                "claim.claim_timeout_seconds must be positive".to_string(),
            ));
        }
        if self.reapers.batch_size == 0 {
            return Err(QueueError::ConfigurationError(
                "reapers.batch_size must be positive".to_string(),
            ));
        }
        if self.reapers.message_visibility_seconds == 0 {
            return Err(QueueError::ConfigurationError(
                "reapers.message_visibility_seconds must be positive".to_string(),
            ));
        }
        if self.backoff.max_attempts == 0 {
            return Err(QueueError::ConfigurationError(
                "backoff.max_attempts must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

/// Claim protocol configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClaimConfig {
    /// Seconds a claim lives before it must be reclaimed.
    pub claim_timeout_seconds: u64,
    /// Upper bound on how long `claimWork` blocks waiting for work.
    pub work_claim_timeout_seconds: u64,
    /// Sleep between pending-queue polls while long-polling.
    pub hint_poll_interval_ms: u64,
}

impl Default for ClaimConfig {
    fn default() -> Self {
        Self {
            claim_timeout_seconds: 1200, // 20 minutes
            work_claim_timeout_seconds: 20,
            hint_poll_interval_ms: 1000,
        }
    }
}

impl ClaimConfig {
    pub fn claim_timeout(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.claim_timeout_seconds as i64)
    }

    pub fn work_claim_timeout(&self) -> Duration {
        Duration::from_secs(self.work_claim_timeout_seconds)
    }

    pub fn hint_poll_interval(&self) -> Duration {
        Duration::from_millis(self.hint_poll_interval_ms)
    }
}

/// Background reaper configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReaperConfig {
    /// Sleep between polls when a queue comes up empty.
    pub polling_delay_ms: u64,
    /// Messages fetched per poll.
    pub batch_size: usize,
    /// Visibility timeout applied to polled messages; unhandled messages
    /// reappear after this.
    pub message_visibility_seconds: u64,
    /// Slack between a task's deadline and its message surfacing.
    pub deadline_delay_seconds: u64,
    /// Interval between expiration scans.
    pub expiration_interval_seconds: u64,
}

impl Default for ReaperConfig {
    fn default() -> Self {
        Self {
            polling_delay_ms: 5_000,
            batch_size: 32,
            message_visibility_seconds: 300, // 5 minutes
            deadline_delay_seconds: 60,
            expiration_interval_seconds: 3_600, // hourly
        }
    }
}

impl ReaperConfig {
    pub fn polling_delay(&self) -> Duration {
        Duration::from_millis(self.polling_delay_ms)
    }

    pub fn message_visibility(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.message_visibility_seconds as i64)
    }

    pub fn deadline_delay(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.deadline_delay_seconds as i64)
    }

    pub fn expiration_interval(&self) -> Duration {
        Duration::from_secs(self.expiration_interval_seconds)
    }
}

/// Event publication configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EventConfig {
    /// Broadcast channel capacity; slow subscribers past this lag drop
    /// events.
    pub channel_capacity: usize,
}

impl Default for EventConfig {
    fn default() -> Self {
        Self {
            channel_capacity: 1_000,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_validate() {
        let config = QueueConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.claim.claim_timeout_seconds, 1200);
        assert_eq!(config.reapers.batch_size, 32);
        assert_eq!(config.events.channel_capacity, 1000);
    }

    #[test]
    fn test_zero_claim_timeout_rejected() {
        let mut config = QueueConfig::default();
        config.claim.claim_timeout_seconds = 0;
        assert!(matches!(
            config.validate(),
            Err(QueueError::ConfigurationError(_)),
        ));
    }

    #[test]
    fn test_partial_yaml_uses_defaults() {
        let config: QueueConfig =
            serde_yaml::from_str("claim:\n  claim_timeout_seconds: 60\n").unwrap();
        assert_eq!(config.claim.claim_timeout_seconds, 60);
        assert_eq!(config.reapers.batch_size, 32);
    }
}
