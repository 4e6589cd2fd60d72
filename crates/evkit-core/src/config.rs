//! Bus configuration
//!
//! [`EventBusConfig`] controls the ambient behaviour of a bus: panic capture
//! around listener callbacks and how much dispatch detail goes to `tracing`.
//! Missing keys fall back to the defaults, so a TOML file only needs the
//! settings it changes:
//!
//! ```toml
//! capture_panics = true
//! trace_deliveries = true
//! log_finished = false
//! ```

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::ConfigError;

/// Configuration for an event bus
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EventBusConfig {
    /// Treat a panicking listener like one that returned an error.
    pub capture_panics: bool,
    /// Emit a `trace` record for every delivery.
    pub trace_deliveries: bool,
    /// Emit a `debug` record for every finished event.
    pub log_finished: bool,
}

impl Default for EventBusConfig {
    fn default() -> Self {
        Self {
            capture_panics: true,
            trace_deliveries: false,
            log_finished: true,
        }
    }
}

impl EventBusConfig {
    /// Parse a configuration from TOML text
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }

    /// Load a configuration from a TOML file
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let config = Self::from_toml_str(&content)?;
        tracing::debug!("Loaded event bus config from {}", path.display());
        Ok(config)
    }
}
