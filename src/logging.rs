//! Logging setup.
//!
//! The engine logs through `tracing`. Applications embedding it call
//! [`init_logging`] once at startup, or install their own subscriber.

use tracing::debug;
use tracing_subscriber::EnvFilter;

use crate::config::{ConfigError, EngineConfig};
use crate::core::state::{ContextListener, StateChanged};

/// Install a `fmt` subscriber.
///
/// `RUST_LOG` takes precedence; otherwise the configured `log_filter` is
/// used. Calling this when a global subscriber is already installed is not
/// an error.
pub fn init_logging(config: &EngineConfig) -> Result<(), ConfigError> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(&config.log_filter)
            .map_err(|e| ConfigError::InvalidConfig(format!("log_filter: {e}")))?,
    };

    if tracing_subscriber::fmt()
        .with_env_filter(filter)
        .try_init()
        .is_err()
    {
        debug!("global subscriber already installed, keeping it");
    }
    Ok(())
}

/// Context listener that logs every state transition at debug level.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingListener;

impl ContextListener for TracingListener {
    fn state_changed(&self, event: &StateChanged) {
        debug!(
            context = %event.context_id,
            command = %event.command,
            previous = %event.previous,
            current = %event.current,
            "context state changed"
        );
    }
}
