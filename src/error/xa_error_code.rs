//! X/Open XA return and error codes
//!
//! These values are fixed by the XA specification and are what a transaction
//! manager on the other side of the wire expects to receive.

/// XA return codes (`XA_*`) and error codes (`XAER_*`)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i32)]
pub enum XaErrorCode {
    /// Normal execution (XA_OK)
    Ok = 0,
    /// The branch was read-only and has been committed (XA_RDONLY)
    ReadOnly = 3,
    /// A resource manager error occurred in the transaction branch (XAER_RMERR)
    ResourceManagerError = -3,
    /// The XID is not valid (XAER_NOTA)
    NotFound = -4,
    /// Invalid arguments were given (XAER_INVAL)
    InvalidArguments = -5,
    /// Routine invoked in an improper context (XAER_PROTO)
    Protocol = -6,
    /// Resource manager unavailable (XAER_RMFAIL)
    ResourceManagerFailure = -7,
    /// The XID already exists (XAER_DUPID)
    DuplicateId = -8,
    /// Resource manager doing work outside a global transaction (XAER_OUTSIDE)
    Outside = -9,
}

impl XaErrorCode {
    /// Returns true for the `XAER_*` family
    pub fn is_error(&self) -> bool {
        (*self as i32) < 0
    }

    /// Convert to the i32 code used on the wire
    pub fn as_i32(&self) -> i32 {
        *self as i32
    }

    /// Parse a wire code
    pub fn from_i32(code: i32) -> Option<Self> {
        match code {
            0 => Some(XaErrorCode::Ok),
            3 => Some(XaErrorCode::ReadOnly),
            -3 => Some(XaErrorCode::ResourceManagerError),
            -4 => Some(XaErrorCode::NotFound),
            -5 => Some(XaErrorCode::InvalidArguments),
            -6 => Some(XaErrorCode::Protocol),
            -7 => Some(XaErrorCode::ResourceManagerFailure),
            -8 => Some(XaErrorCode::DuplicateId),
            -9 => Some(XaErrorCode::Outside),
            _ => None,
        }
    }
}

impl std::fmt::Display for XaErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            XaErrorCode::Ok => "XA_OK",
            XaErrorCode::ReadOnly => "XA_RDONLY",
            XaErrorCode::ResourceManagerError => "XAER_RMERR",
            XaErrorCode::NotFound => "XAER_NOTA",
            XaErrorCode::InvalidArguments => "XAER_INVAL",
            XaErrorCode::Protocol => "XAER_PROTO",
            XaErrorCode::ResourceManagerFailure => "XAER_RMFAIL",
            XaErrorCode::DuplicateId => "XAER_DUPID",
            XaErrorCode::Outside => "XAER_OUTSIDE",
        };
        write!(f, "{}", name)
    }
}
