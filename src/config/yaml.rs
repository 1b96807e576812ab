//! YAML configuration parsing.

use serde::{Deserialize, Serialize};
use std::path::Path;

use super::error::ConfigError;

/// Engine configuration (cascade.yaml).
///
/// ```yaml
/// workers: 8
/// handoff_capacity: 16
/// log_filter: "cascade=debug"
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Size of the worker pool used by parallel composers.
    pub workers: usize,
    /// Bound of the handoff channel. Defaults to the batch size.
    pub handoff_capacity: Option<usize>,
    /// Filter directive used when `RUST_LOG` is not set.
    pub log_filter: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            workers: 4,
            handoff_capacity: None,
            log_filter: "info".to_string(),
        }
    }
}

/// YAML configuration loader.
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load engine configuration from a file.
    pub fn load(path: impl AsRef<Path>) -> Result<EngineConfig, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::FileReadError {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&content)
    }

    /// Parse engine configuration from a YAML string.
    pub fn parse(yaml: &str) -> Result<EngineConfig, ConfigError> {
        let config: EngineConfig = serde_yaml::from_str(yaml)?;
        Self::validate(&config)?;
        Ok(config)
    }

    /// Validate an engine configuration.
    pub fn validate(config: &EngineConfig) -> Result<(), ConfigError> {
        if config.workers == 0 {
            return Err(ConfigError::InvalidConfig(
                "workers cannot be zero".to_string(),
            ));
        }
        if config.handoff_capacity == Some(0) {
            return Err(ConfigError::InvalidConfig(
                "handoff_capacity cannot be zero".to_string(),
            ));
        }
        if config.log_filter.trim().is_empty() {
            return Err(ConfigError::InvalidConfig(
                "log_filter cannot be empty".to_string(),
            ));
        }
        Ok(())
    }
}
