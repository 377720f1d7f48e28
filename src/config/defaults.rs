//! Default constants for Courier configuration
//!
//! These constants define the default values used throughout the configuration
//! system when no explicit value is provided.

/// Default auto-commit mode for sends on a non-XA session
pub const DEFAULT_AUTO_COMMIT_SENDS: bool = true;

/// Default auto-commit mode for acknowledgements on a non-XA session
pub const DEFAULT_AUTO_COMMIT_ACKS: bool = true;

/// Default consumer prefetch (number of unacknowledged messages in flight)
pub const DEFAULT_PREFETCH: i32 = 1000;

/// Default name prefix for session prompt worker threads
pub const DEFAULT_PROMPT_THREAD_PREFIX: &str = "courier-prompt";

/// Default XA transaction timeout in seconds
pub const DEFAULT_XA_TIMEOUT_SECS: u32 = 300;

/// Minimum XA transaction timeout a client may set (in seconds)
pub const MIN_XA_TIMEOUT_SECS: u32 = 1;

/// Maximum XA transaction timeout a client may set (1 hour)
pub const MAX_XA_TIMEOUT_SECS: u32 = 3600;

/// Default configuration file name
pub const DEFAULT_CONFIG_FILE: &str = "courier.toml";
