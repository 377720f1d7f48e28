//! Configuration module for Courier
//!
//! - `defaults` - Default constants and values
//! - `file` - TOML configuration file support

mod defaults;
pub mod file;

pub use defaults::*;
pub use file::ConfigFile;

use crate::error::{CourierError, Result};
use serde::{Deserialize, Serialize};

/// Per-session delivery and transaction behaviour.
///
/// A session created with `xa = true` starts without an attached transaction and
/// only gets one through the XA verbs. A non-XA session always carries a local
/// transaction that buffers sends and acknowledgements when the corresponding
/// auto-commit flag is off.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Sends take effect immediately instead of being buffered
    pub auto_commit_sends: bool,
    /// Acknowledgements take effect immediately instead of being buffered
    pub auto_commit_acks: bool,
    /// The session participates in distributed (XA) transactions
    pub xa: bool,
    /// Prefetch applied when a consumer is created without one
    pub default_prefetch: i32,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            auto_commit_sends: DEFAULT_AUTO_COMMIT_SENDS,
            auto_commit_acks: DEFAULT_AUTO_COMMIT_ACKS,
            xa: false,
            default_prefetch: DEFAULT_PREFETCH,
        }
    }
}

impl SessionConfig {
    /// A session that buffers both sends and acknowledgements in a local transaction
    pub fn transacted() -> Self {
        Self {
            auto_commit_sends: false,
            auto_commit_acks: false,
            ..Self::default()
        }
    }

    /// A session driven by an external transaction manager
    pub fn xa() -> Self {
        Self {
            auto_commit_sends: false,
            auto_commit_acks: false,
            xa: true,
            ..Self::default()
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.default_prefetch < 0 {
            return Err(CourierError::Config(format!(
                "session.default_prefetch must not be negative, got {}",
                self.default_prefetch
            )));
        }
        Ok(())
    }
}

/// Settings for the single-threaded redelivery prompt worker
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PromptWorkerConfig {
    /// Thread name prefix; the session id is appended
    pub thread_name_prefix: String,
}

impl Default for PromptWorkerConfig {
    fn default() -> Self {
        Self {
            thread_name_prefix: DEFAULT_PROMPT_THREAD_PREFIX.to_string(),
        }
    }
}

/// Resource manager registry settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResourceManagerConfig {
    /// Transaction timeout handed out before a client overrides it
    pub default_timeout_secs: u32,
    /// Smallest timeout a client may set
    pub min_timeout_secs: u32,
    /// Largest timeout a client may set
    pub max_timeout_secs: u32,
}

impl Default for ResourceManagerConfig {
    fn default() -> Self {
        Self {
            default_timeout_secs: DEFAULT_XA_TIMEOUT_SECS,
            min_timeout_secs: MIN_XA_TIMEOUT_SECS,
            max_timeout_secs: MAX_XA_TIMEOUT_SECS,
        }
    }
}

impl ResourceManagerConfig {
    pub fn validate(&self) -> Result<()> {
        if self.min_timeout_secs > self.max_timeout_secs {
            return Err(CourierError::Config(format!(
                "resource_manager.min_timeout_secs ({}) exceeds max_timeout_secs ({})",
                self.min_timeout_secs, self.max_timeout_secs
            )));
        }
        if !(self.min_timeout_secs..=self.max_timeout_secs).contains(&self.default_timeout_secs)
        {
            return Err(CourierError::Config(format!(
                "resource_manager.default_timeout_secs ({}) outside [{}, {}]",
                self.default_timeout_secs, self.min_timeout_secs, self.max_timeout_secs
            )));
        }
        Ok(())
    }

    /// Whether a client-requested timeout is acceptable
    pub fn accepts(&self, timeout_secs: u32) -> bool {
        (self.min_timeout_secs..=self.max_timeout_secs).contains(&timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_config_default() {
        let config = SessionConfig::default();
        assert!(config.auto_commit_sends);
        assert!(config.auto_commit_acks);
        assert!(!config.xa);
        assert_eq!(config.default_prefetch, DEFAULT_PREFETCH);
    }

    #[test]
    fn test_session_config_presets() {
        let transacted = SessionConfig::transacted();
        assert!(!transacted.auto_commit_sends);
        assert!(!transacted.auto_commit_acks);
        assert!(!transacted.xa);

        let xa = SessionConfig::xa();
        assert!(xa.xa);
        assert!(!xa.auto_commit_acks);
    }

    #[test]
    fn test_negative_prefetch_rejected() {
        let config = SessionConfig {
            default_prefetch: -1,
            ..SessionConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_resource_manager_bounds() {
        let config = ResourceManagerConfig::default();
        assert!(config.validate().is_ok());
        assert!(config.accepts(MIN_XA_TIMEOUT_SECS));
        assert!(config.accepts(MAX_XA_TIMEOUT_SECS));
        assert!(!config.accepts(0));
        assert!(!config.accepts(MAX_XA_TIMEOUT_SECS + 1));
    }

    #[test]
    fn test_resource_manager_inverted_bounds() {
        let config = ResourceManagerConfig {
            default_timeout_secs: 10,
            min_timeout_secs: 20,
            max_timeout_secs: 5,
        };
        assert!(config.validate().is_err());
    }
}
