//! Global transaction identifiers

use crate::error::{CourierError, Result};
use serde::{Deserialize, Serialize};

/// Maximum size of a global transaction id (XA `MAXGTRIDSIZE`)
pub const MAX_GTRID_SIZE: usize = 64;

/// Maximum size of a branch qualifier (XA `MAXBQUALSIZE`)
pub const MAX_BQUAL_SIZE: usize = 64;

/// An XA transaction branch identifier
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Xid {
    format_id: i32,
    global_transaction_id: Vec<u8>,
    branch_qualifier: Vec<u8>,
}

impl Xid {
    pub fn new(
        format_id: i32,
        global_transaction_id: impl Into<Vec<u8>>,
        branch_qualifier: impl Into<Vec<u8>>,
    ) -> Result<Self> {
        let global_transaction_id = global_transaction_id.into();
        let branch_qualifier = branch_qualifier.into();

        if global_transaction_id.is_empty() || global_transaction_id.len() > MAX_GTRID_SIZE {
            return Err(CourierError::invalid_argument(format!(
                "global transaction id must be 1..={} bytes, got {}",
                MAX_GTRID_SIZE,
                global_transaction_id.len()
            )));
        }
        if branch_qualifier.len() > MAX_BQUAL_SIZE {
            return Err(CourierError::invalid_argument(format!(
                "branch qualifier must be at most {} bytes, got {}",
                MAX_BQUAL_SIZE,
                branch_qualifier.len()
            )));
        }

        Ok(Self {
            format_id,
            global_transaction_id,
            branch_qualifier,
        })
    }

    pub fn format_id(&self) -> i32 {
        self.format_id
    }

    pub fn global_transaction_id(&self) -> &[u8] {
        &self.global_transaction_id
    }

    pub fn branch_qualifier(&self) -> &[u8] {
        &self.branch_qualifier
    }
}

fn write_hex(f: &mut std::fmt::Formatter<'_>, bytes: &[u8]) -> std::fmt::Result {
    for b in bytes {
        write!(f, "{:02x}", b)?;
    }
    Ok(())
}

impl std::fmt::Display for Xid {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:", self.format_id)?;
        write_hex(f, &self.global_transaction_id)?;
        write!(f, ":")?;
        write_hex(f, &self.branch_qualifier)
    }
}
