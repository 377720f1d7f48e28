//! Domain-specific error types for Courier

use thiserror::Error;

/// Structured storage error domain
#[derive(Debug, Error, Clone)]
pub enum StorageError {
    #[error("{operation}: {detail}")]
    Operation { operation: String, detail: String },
    #[error("{0}")]
    Message(String),
}

impl StorageError {
    pub fn operation(operation: impl Into<String>, detail: impl Into<String>) -> Self {
        Self::Operation {
            operation: operation.into(),
            detail: detail.into(),
        }
    }
}

impl From<String> for StorageError {
    fn from(value: String) -> Self {
        Self::Message(value)
    }
}

impl From<&str> for StorageError {
    fn from(value: &str) -> Self {
        Self::Message(value.to_string())
    }
}

/// Address and queue existence errors reported to clients
///
/// The caller decides how to surface these. In particular a denied
/// create-on-demand is reported as [`MessagingError::QueueDoesNotExist`]
/// rather than as an authorization failure.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum MessagingError {
    #[error("Queue does not exist: {0}")]
    QueueDoesNotExist(String),
    #[error("Queue already exists: {0}")]
    QueueExists(String),
    #[error("Address does not exist: {0}")]
    AddressDoesNotExist(String),
    #[error("Address already exists: {0}")]
    AddressExists(String),
}

impl MessagingError {
    /// The wire code for this error
    pub fn code(&self) -> MessagingErrorCode {
        match self {
            MessagingError::QueueDoesNotExist(_) => MessagingErrorCode::QueueDoesNotExist,
            MessagingError::QueueExists(_) => MessagingErrorCode::QueueExists,
            MessagingError::AddressDoesNotExist(_) => MessagingErrorCode::AddressDoesNotExist,
            MessagingError::AddressExists(_) => MessagingErrorCode::AddressExists,
        }
    }
}

/// Messaging error codes carried in error replies
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum MessagingErrorCode {
    /// Unexpected server-side failure
    InternalError = 0,
    /// The remote end went away while delivering
    ConnectionFailure = 2,
    /// Persistence layer failure
    StorageFailure = 6,
    /// Queue does not exist
    QueueDoesNotExist = 100,
    /// Queue already exists
    QueueExists = 101,
    /// Object is closed
    ObjectClosed = 102,
    /// Filter expression could not be parsed
    InvalidFilterExpression = 103,
    /// Operation not allowed in the current state
    IllegalState = 104,
    /// Security check failed
    SecurityException = 105,
    /// Address does not exist
    AddressDoesNotExist = 106,
    /// Address already exists
    AddressExists = 107,
    /// Invalid request argument
    InvalidArgument = 108,
}

impl MessagingErrorCode {
    /// Convert to the i32 code used on the wire
    pub fn as_i32(&self) -> i32 {
        *self as i32
    }
}
