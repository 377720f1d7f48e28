//! Error types for Courier
//!
//! This module defines the main error type used throughout the session engine and
//! the mapping of every error onto a stable messaging error code for the transport.
//!
//! Errors fall into two propagation channels:
//!
//! - **Recoverable** errors (domain, protocol, authorization, storage) are returned
//!   to the caller, which wire-encodes them.
//! - **Fatal** faults ([`CourierError::LedgerCorruption`] and
//!   [`CourierError::ResourceExhausted`]) signal a broken internal invariant; the
//!   operation is aborted and the fault must not be translated into a normal reply.
//!
//! XA verbs never surface their protocol errors through this type. They return an
//! [`XaErrorCode`] inside a tagged result instead, see [`crate::transaction::XaResult`].

use thiserror::Error;

mod domain;
mod xa_error_code;

pub use domain::{MessagingError, MessagingErrorCode, StorageError};
pub use xa_error_code::XaErrorCode;

/// Result type alias for Courier operations
pub type Result<T> = std::result::Result<T, CourierError>;

/// Main error type for Courier
#[derive(Error, Debug)]
pub enum CourierError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("{0}")]
    Messaging(#[from] MessagingError),

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Illegal state: {0}")]
    IllegalState(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Authorization failed: {0}")]
    AuthorizationFailed(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Delivery failed: {0}")]
    Delivery(String),

    #[error("Ledger corruption in session {session_id}: {detail}")]
    LedgerCorruption { session_id: String, detail: String },

    #[error("Resource exhausted: {0}")]
    ResourceExhausted(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl CourierError {
    /// Create a protocol error from a message string
    pub fn protocol_msg(msg: impl Into<String>) -> Self {
        CourierError::Protocol(msg.into())
    }

    /// Create an illegal state error
    pub fn illegal_state(msg: impl Into<String>) -> Self {
        CourierError::IllegalState(msg.into())
    }

    /// Create an invalid argument error
    pub fn invalid_argument(msg: impl Into<String>) -> Self {
        CourierError::InvalidArgument(msg.into())
    }

    /// Create a storage error with operation context
    ///
    /// # Example
    /// ```ignore
    /// CourierError::storage("commit", "journal closed")
    /// // produces: "Storage error: commit: journal closed"
    /// ```
    pub fn storage(operation: &str, detail: impl Into<String>) -> Self {
        CourierError::Storage(StorageError::operation(operation, detail))
    }

    /// Create an authorization error for an address and check type
    pub fn authz_failed(principal: &str, check: &str, address: &str) -> Self {
        CourierError::AuthorizationFailed(format!(
            "{} is not authorized to {} on {}",
            principal, check, address
        ))
    }

    /// Create a ledger corruption fault
    pub fn corrupted_ledger(session_id: &str, detail: impl Into<String>) -> Self {
        CourierError::LedgerCorruption {
            session_id: session_id.to_string(),
            detail: detail.into(),
        }
    }

    /// Shorthand for [`MessagingError::QueueDoesNotExist`]
    pub fn queue_does_not_exist(name: impl Into<String>) -> Self {
        CourierError::Messaging(MessagingError::QueueDoesNotExist(name.into()))
    }

    /// Returns true if this error is an unrecoverable fault rather than a reply
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            CourierError::LedgerCorruption { .. } | CourierError::ResourceExhausted(_)
        )
    }

    /// Convert this error to the messaging error code sent back to clients
    pub fn messaging_error_code(&self) -> MessagingErrorCode {
        match self {
            CourierError::Io(_) | CourierError::Storage(_) => MessagingErrorCode::StorageFailure,
            CourierError::Messaging(e) => e.code(),
            CourierError::Protocol(_) => MessagingErrorCode::IllegalState,
            CourierError::IllegalState(_) => MessagingErrorCode::IllegalState,
            CourierError::InvalidArgument(_) => MessagingErrorCode::InvalidArgument,
            CourierError::AuthorizationFailed(_) => MessagingErrorCode::SecurityException,
            CourierError::Config(_) => MessagingErrorCode::InternalError,
            CourierError::Serialization(_) => MessagingErrorCode::InvalidArgument,
            CourierError::Delivery(_) => MessagingErrorCode::ConnectionFailure,
            CourierError::LedgerCorruption { .. } => MessagingErrorCode::InternalError,
            CourierError::ResourceExhausted(_) => MessagingErrorCode::InternalError,
            CourierError::Internal(_) => MessagingErrorCode::InternalError,
        }
    }
}

impl From<&CourierError> for i32 {
    fn from(err: &CourierError) -> i32 {
        err.messaging_error_code().as_i32()
    }
}
