//! File system paths for pubq.

use anyhow::{anyhow, Result};
use std::path::{Path, PathBuf};

/// Manages file system paths under the base directory (`~/.pubq`).
#[derive(Debug, Clone)]
pub struct Paths {
    base_dir: PathBuf,
}

impl Paths {
    pub fn new() -> Result<Self> {
        let home = dirs::home_dir().ok_or_else(|| anyhow!("Could not determine home directory"))?;
        Ok(Self {
            base_dir: home.join(".pubq"),
        })
    }

    pub fn with_base_dir(base_dir: PathBuf) -> Self {
        Self { base_dir }
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    /// Get the config file path (~/.pubq/config.json).
    pub fn config_file(&self) -> PathBuf {
        self.base_dir.join("config.json")
    }

    /// Get the queue database path (~/.pubq/queue.sqlite).
    pub fn database_file(&self) -> PathBuf {
        self.base_dir.join("queue.sqlite")
    }

    pub fn logs_dir(&self) -> PathBuf {
        self.base_dir.join("logs")
    }

    /// Get the JSONL log file path (~/.pubq/logs/pubq.jsonl).
    pub fn log_file(&self) -> PathBuf {
        self.logs_dir().join("pubq.jsonl")
    }

    pub fn ensure_dirs(&self) -> Result<()> {
        std::fs::create_dir_all(&self.base_dir)?;
        std::fs::create_dir_all(self.logs_dir())?;
        Ok(())
    }
}
