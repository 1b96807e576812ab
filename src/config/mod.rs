//! Configuration loading and parsing.
//!
//! This module provides YAML-based configuration for the engine: worker
//! pool size, handoff channel bound and the default log filter.

mod error;
mod yaml;

pub use error::ConfigError;
pub use yaml::{ConfigLoader, EngineConfig};
