//! Queue timing and bounds configuration.

use crate::{QueueError, QueueResult};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Default hold after the link comes up, in milliseconds.
pub const DEFAULT_WAIT_AFTER_CONNECT_MS: u64 = 2_000;
/// Default hold between successful publishes, in milliseconds.
pub const DEFAULT_WAIT_BETWEEN_PUBLISH_MS: u64 = 1_000;
/// Default backoff after a failed publish, in milliseconds.
pub const DEFAULT_WAIT_AFTER_FAILURE_MS: u64 = 30_000;
/// Default maximum event name length, in bytes.
pub const DEFAULT_MAX_NAME_LEN: usize = 64;
/// Default maximum payload length, in bytes.
pub const DEFAULT_MAX_PAYLOAD_LEN: usize = 1024;

const ENV_WAIT_AFTER_CONNECT: &str = "PUBQ_WAIT_AFTER_CONNECT_MS";
const ENV_WAIT_BETWEEN_PUBLISH: &str = "PUBQ_WAIT_BETWEEN_PUBLISH_MS";
const ENV_WAIT_AFTER_FAILURE: &str = "PUBQ_WAIT_AFTER_FAILURE_MS";

/// Timing and bounds for the drain controller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    pub wait_after_connect_ms: u64,
    pub wait_between_publish_ms: u64,
    /// Must be strictly greater than `wait_between_publish_ms`.
    pub wait_after_failure_ms: u64,
    pub max_name_len: usize,
    pub max_payload_len: usize,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            wait_after_connect_ms: DEFAULT_WAIT_AFTER_CONNECT_MS,
            wait_between_publish_ms: DEFAULT_WAIT_BETWEEN_PUBLISH_MS,
            wait_after_failure_ms: DEFAULT_WAIT_AFTER_FAILURE_MS,
            max_name_len: DEFAULT_MAX_NAME_LEN,
            max_payload_len: DEFAULT_MAX_PAYLOAD_LEN,
        }
    }
}

impl QueueConfig {
    /// Load configuration from a JSON file. Missing keys keep their defaults.
    pub fn load_from_file(path: &Path) -> QueueResult<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: QueueConfig = serde_json::from_str(&content)?;
        Ok(config)
    }

    /// Override timings from environment variables.
    ///
    /// Unparseable values are ignored.
    pub fn load_from_env(&mut self) {
        if let Some(ms) = env_ms(ENV_WAIT_AFTER_CONNECT) {
            self.wait_after_connect_ms = ms;
        }
        if let Some(ms) = env_ms(ENV_WAIT_BETWEEN_PUBLISH) {
            self.wait_between_publish_ms = ms;
        }
        if let Some(ms) = env_ms(ENV_WAIT_AFTER_FAILURE) {
            self.wait_after_failure_ms = ms;
        }
    }

    pub fn validate(&self) -> QueueResult<()> {
        if self.wait_after_failure_ms <= self.wait_between_publish_ms {
            return Err(QueueError::Config(format!(
                "wait_after_failure_ms ({}) must be greater than wait_between_publish_ms ({})",
                self.wait_after_failure_ms, self.wait_between_publish_ms
            )));
        }
        if self.max_name_len == 0 {
            return Err(QueueError::Config(
                "max_name_len must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

fn env_ms(key: &str) -> Option<u64> {
    std::env::var(key).ok()?.trim().parse().ok()
}
