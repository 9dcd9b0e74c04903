//! Per-root configuration.

use crate::error::{Result, WatchError};
use serde::Deserialize;
use std::fs;
use std::path::Path;
use std::time::Duration;

/// Name of the optional per-root configuration file.
pub const CONFIG_FILE_NAME: &str = ".watchsub.json";

/// Default view-lock timeout for subscription queries (milliseconds).
pub const DEFAULT_SUBSCRIPTION_LOCK_TIMEOUT_MS: u64 = 100;

/// Root configuration.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct RootConfig {
    /// How long a subscription query may wait for the view lock.
    /// Default: 100ms
    pub subscription_lock_timeout_ms: u64,
}

impl Default for RootConfig {
    fn default() -> Self {
        Self {
            subscription_lock_timeout_ms: DEFAULT_SUBSCRIPTION_LOCK_TIMEOUT_MS,
        }
    }
}

impl RootConfig {
    /// Parse configuration from a JSON document. Unknown keys are ignored.
    pub fn from_json_str(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| WatchError::Config(e.to_string()))
    }

    /// Load the configuration file from a root directory, falling back to
    /// defaults if there is none.
    pub fn load(root_path: impl AsRef<Path>) -> Result<Self> {
        let path = root_path.as_ref().join(CONFIG_FILE_NAME);
        if !path.exists() {
            return Ok(Self::default());
        }
        let contents = fs::read_to_string(&path)?;
        Self::from_json_str(&contents)
    }

    pub fn subscription_lock_timeout(&self) -> Duration {
        Duration::from_millis(self.subscription_lock_timeout_ms)
    }
}
