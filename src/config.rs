// Tue Jan 13 2026 - Alex

use crate::error::CacheError;
use crate::update::DEFAULT_WORKER_THREADS;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

pub const DEFAULT_UPDATE_INTERVAL_MINUTES: u64 = 120;
/// One leap year.
pub const MAX_UPDATE_INTERVAL_MINUTES: u64 = 366 * 24 * 60;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub update_interval_minutes: u64,
    pub worker_threads: usize,
    pub log_level: String,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            update_interval_minutes: DEFAULT_UPDATE_INTERVAL_MINUTES,
            worker_threads: DEFAULT_WORKER_THREADS,
            log_level: "info".to_string(),
        }
    }
}

impl CacheConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_update_interval_minutes(mut self, minutes: u64) -> Self {
        self.update_interval_minutes = minutes;
        self
    }

    pub fn with_worker_threads(mut self, threads: usize) -> Self {
        self.worker_threads = threads;
        self
    }

    pub fn with_log_level(mut self, level: &str) -> Self {
        self.log_level = level.to_string();
        self
    }

    pub fn update_interval(&self) -> Duration {
        Duration::from_secs(self.update_interval_minutes.saturating_mul(60))
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();

        if !path.exists() {
            return Err(ConfigError::NotFound(path.to_path_buf()));
        }

        let contents = fs::read_to_string(path).map_err(|e| ConfigError::Io(e.to_string()))?;
        let config: CacheConfig = serde_json::from_str(&contents).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigError> {
        let contents = serde_json::to_string_pretty(self).map_err(|e| ConfigError::Parse(e.to_string()))?;
        fs::write(path, contents).map_err(|e| ConfigError::Io(e.to_string()))
    }

    /// Loads `path`, falling back to defaults when it is missing or invalid.
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> Self {
        match Self::load(path.as_ref()) {
            Ok(config) => config,
            Err(ConfigError::NotFound(_)) => Self::default(),
            Err(e) => {
                log::warn!("Ignoring config {}: {}", path.as_ref().display(), e);
                Self::default()
            }
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.update_interval_minutes == 0 {
            return Err(ConfigError::Validation(
                "update_interval_minutes must be greater than 0".to_string(),
            ));
        }
        if self.update_interval_minutes > MAX_UPDATE_INTERVAL_MINUTES {
            return Err(ConfigError::Validation(format!(
                "update_interval_minutes must be at most {}",
                MAX_UPDATE_INTERVAL_MINUTES
            )));
        }
        if self.worker_threads == 0 {
            return Err(ConfigError::Validation("worker_threads must be greater than 0".to_string()));
        }
        if !matches!(
            self.log_level.to_lowercase().as_str(),
            "off" | "error" | "warn" | "warning" | "info" | "debug" | "trace"
        ) {
            return Err(ConfigError::Validation(format!("unknown log_level '{}'", self.log_level)));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("Config file not found: {0}")]
    NotFound(PathBuf),
    #[error("IO error: {0}")]
    Io(String),
    #[error("Parse error: {0}")]
    Parse(String),
    #[error("Invalid configuration: {0}")]
    Validation(String),
}

impl From<ConfigError> for CacheError {
    fn from(err: ConfigError) -> Self {
        CacheError::Configuration(err.to_string())
    }
}
