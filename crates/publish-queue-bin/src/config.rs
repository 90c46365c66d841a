//! Configuration for pubq.

use crate::paths::Paths;
use anyhow::{Context, Result};
use publish_queue_core::QueueConfig;
use publish_queue_transport::CloudPublisherConfig;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Default log level.
pub const DEFAULT_LOG_LEVEL: &str = "info";

/// pubq configuration, stored as JSON in `config.json`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,
    /// Queue timings and bounds.
    pub queue: QueueConfig,
    /// Cloud endpoint settings.
    pub cloud: CloudPublisherConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_level: DEFAULT_LOG_LEVEL.to_string(),
            queue: QueueConfig::default(),
            cloud: CloudPublisherConfig::default(),
        }
    }
}

impl Config {
    /// Load from `path`, or `paths.config_file()` when no path is given.
    ///
    /// A missing default config file yields defaults. Environment variables
    /// override file values.
    pub fn load(paths: &Paths, path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => Self::load_from_file(path)?,
            None => {
                let default_path = paths.config_file();
                if default_path.exists() {
                    Self::load_from_file(&default_path)?
                } else {
                    Self::default()
                }
            }
        };
        config.load_from_env();
        Ok(config)
    }

    pub fn load_from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;
        let config: Config = serde_json::from_str(&content)
            .with_context(|| format!("invalid config file {}", path.display()))?;
        Ok(config)
    }

    fn load_from_env(&mut self) {
        if let Ok(log_level) = std::env::var("PUBQ_LOG_LEVEL") {
            self.log_level = log_level;
        }
        if let Ok(endpoint) = std::env::var("PUBQ_ENDPOINT") {
            self.cloud.endpoint = endpoint;
        }
        if let Ok(token) = std::env::var("PUBQ_AUTH_TOKEN") {
            self.cloud.auth_token = Some(token);
        }
        self.queue.load_from_env();
    }
}
