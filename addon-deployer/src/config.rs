//! Deployer configuration.

use serde::Deserialize;
use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::time::Duration;

use thiserror::Error;

/// Errors loading a configuration file.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },

    #[error("invalid config {path}: {source}")]
    Parse {
        path: String,
        source: serde_json::Error,
    },
}

/// Top level configuration of the coordinator and the default handler.
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct DeployerConfig {
    pub topology: TopologyWaitConfig,
    pub child_teardown: RetryPolicy,
    pub callback: CallbackConfig,
}

impl DeployerConfig {
    /// Load the configuration from a JSON file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let file = File::open(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        serde_json::from_reader(BufReader::new(file)).map_err(|source| ConfigError::Parse {
            path: path.display().to_string(),
            source,
        })
    }
}

/// How long and how often to poll the backend for topology readiness.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct TopologyWaitConfig {
    /// Delay between two status polls
    pub poll_interval_ms: u64,
    /// Ceiling after which the wait fails with a timeout
    pub ready_timeout_ms: u64,
}

impl TopologyWaitConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn ready_timeout(&self) -> Duration {
        Duration::from_millis(self.ready_timeout_ms)
    }
}

impl Default for TopologyWaitConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 10_000,
            ready_timeout_ms: 15 * 60 * 1000,
        }
    }
}

/// Bounded retry with exponential backoff.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct RetryPolicy {
    /// Total attempts, including the first one
    pub attempts: u32,
    /// Delay before the second attempt, doubled for every further one
    pub backoff_ms: u64,
}

impl RetryPolicy {
    /// Delay to wait after the failed attempt number `attempt` (1-based).
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 2u64.saturating_pow(attempt.saturating_sub(1));
        Duration::from_millis(self.backoff_ms.saturating_mul(factor))
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            backoff_ms: 1_000,
        }
    }
}

/// Settings of the HTTP completion callback.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct CallbackConfig {
    /// Sent as `User-ID` header on the provision callback
    pub operator_id: String,
    pub request_timeout_ms: u64,
}

impl CallbackConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

impl Default for CallbackConfig {
    fn default() -> Self {
        Self {
            operator_id: "1100".to_string(),
            request_timeout_ms: 10_000,
        }
    }
}
