//! Static allow/deny security store

use crate::collaborators::{CheckType, SecurityStore, ServerConnection};
use crate::error::{CourierError, Result};
use dashmap::DashSet;

/// Allows everything except explicitly denied `(address, check)` pairs
#[derive(Debug, Default)]
pub struct StaticSecurityStore {
    denied: DashSet<(String, CheckType)>,
}

impl StaticSecurityStore {
    pub fn allow_all() -> Self {
        Self::default()
    }

    pub fn deny(&self, address: &str, check: CheckType) {
        self.denied.insert((address.to_string(), check));
    }

    pub fn allow(&self, address: &str, check: CheckType) {
        self.denied.remove(&(address.to_string(), check));
    }
}

impl SecurityStore for StaticSecurityStore {
    fn check(
        &self,
        address: &str,
        check: CheckType,
        connection: &dyn ServerConnection,
    ) -> Result<()> {
        if self.denied.contains(&(address.to_string(), check)) {
            return Err(CourierError::authz_failed(
                connection.username().unwrap_or("anonymous"),
                &check.to_string(),
                address,
            ));
        }
        Ok(())
    }
}
