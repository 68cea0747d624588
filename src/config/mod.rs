//! Configuration
//!
//! `RunConfig` is what the engine and the pool consume. It is resolved from a
//! config file, then `GROVE_*` environment variables, then CLI flags, and is
//! sent verbatim to every worker inside `RUN`.

pub mod env;
pub mod file;

pub use env::EnvConfig;
pub use file::ConfigFile;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::error::GroveError;
use crate::trap::{DEFAULT_GRACE_PERIOD_MS, DEFAULT_TIMEOUT_MS};

/// Execution settings shared by the coordinator and its workers
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    /// Default trap timeout in milliseconds
    pub timeout_ms: u64,

    /// Default grace period in milliseconds
    pub grace_period_ms: u64,

    /// Cap on worker processes
    pub max_workers: usize,

    /// Files handed to a worker per `RUN`
    pub batch_size: usize,

    /// Preload routine each worker runs before its first batch
    pub preload: Option<String>,

    /// Fan files out across worker processes
    pub parallel: bool,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            timeout_ms: DEFAULT_TIMEOUT_MS,
            grace_period_ms: DEFAULT_GRACE_PERIOD_MS,
            max_workers: 4,
            batch_size: 1,
            preload: None,
            parallel: false,
        }
    }
}

impl RunConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn grace_period(&self) -> Duration {
        Duration::from_millis(self.grace_period_ms)
    }

    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = timeout_ms;
        self
    }

    pub fn with_max_workers(mut self, max_workers: usize) -> Self {
        self.max_workers = max_workers;
        self
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    pub fn with_preload(mut self, preload: impl Into<String>) -> Self {
        self.preload = Some(preload.into());
        self
    }

    pub fn validate(&self) -> Result<(), GroveError> {
        if self.timeout_ms == 0 {
            return Err(GroveError::Config("timeout_ms must be positive".to_string()));
        }
        if self.max_workers == 0 {
            return Err(GroveError::Config("max_workers must be at least 1".to_string()));
        }
        if self.batch_size == 0 {
            return Err(GroveError::Config("batch_size must be at least 1".to_string()));
        }
        Ok(())
    }

    /// Load a bare run configuration from a YAML or JSON file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).context("Failed to read config file")?;

        let config: Self = if file::is_yaml_file(path) {
            serde_yaml::from_str(&content).context("Failed to parse YAML config")?
        } else {
            serde_json::from_str(&content).context("Failed to parse JSON config")?
        };

        config.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_default_config() {
        let config = RunConfig::default();
        assert_eq!(config.timeout_ms, 5000);
        assert_eq!(config.grace_period_ms, 5);
        assert_eq!(config.batch_size, 1);
        assert!(config.preload.is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_zero_workers() {
        let config = RunConfig::default().with_max_workers(0);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_partial_yaml_uses_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("run.yaml");
        std::fs::write(&path, "timeout_ms: 250\nparallel: true\n").unwrap();

        let config = RunConfig::load(&path).unwrap();
        assert_eq!(config.timeout(), Duration::from_millis(250));
        assert!(config.parallel);
        assert_eq!(config.max_workers, 4);
    }
}
