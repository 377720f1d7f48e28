//! Configuration file support for Courier
//!
//! ## Example Configuration
//!
//! ```toml
//! # courier.toml
//!
//! [session]
//! auto_commit_sends = true
//! auto_commit_acks = false
//! xa = false
//! default_prefetch = 500
//!
//! [prompt_worker]
//! thread_name_prefix = "courier-prompt"
//!
//! [resource_manager]
//! default_timeout_secs = 300
//! min_timeout_secs = 1
//! max_timeout_secs = 3600
//! ```

use serde::{Deserialize, Serialize};
use std::path::Path;

use super::{PromptWorkerConfig, ResourceManagerConfig, SessionConfig};
use crate::error::{CourierError, Result};

/// Root configuration structure for TOML file
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConfigFile {
    /// Session defaults
    pub session: SessionConfig,

    /// Redelivery prompt worker
    pub prompt_worker: PromptWorkerConfig,

    /// XA resource manager registry
    pub resource_manager: ResourceManagerConfig,
}

impl ConfigFile {
    /// Load configuration from a TOML file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|e| {
            CourierError::Config(format!("Failed to read config file {:?}: {}", path, e))
        })?;

        let config = Self::parse(&contents).map_err(|e| {
            CourierError::Config(format!("Failed to parse config file {:?}: {}", path, e))
        })?;
        tracing::info!("Loaded configuration from {:?}", path);
        Ok(config)
    }

    /// Parse and validate configuration from a TOML string
    pub fn parse(contents: &str) -> Result<Self> {
        let config: ConfigFile =
            toml::from_str(contents).map_err(|e| CourierError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Validate every section
    pub fn validate(&self) -> Result<()> {
        self.session.validate()?;
        self.resource_manager.validate()
    }
}
