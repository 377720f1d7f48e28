//! Registry of XA transaction branches
//!
//! Branches are shared by every session on the server: one session can start
//! a branch and another can join, resume, prepare or commit it. The registry is
//! a `DashMap` so lookups from different sessions only contend on the shard
//! that holds the xid.

use crate::config::ResourceManagerConfig;
use crate::transaction::state::Transaction;
use crate::transaction::xid::Xid;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use tracing::debug;

/// Server-wide lookup of transaction branches by xid
pub trait ResourceManager: Send + Sync {
    /// Register a branch; false if the xid is already known
    fn put_transaction(&self, xid: Xid, tx: Arc<Transaction>) -> bool;

    fn get_transaction(&self, xid: &Xid) -> Option<Arc<Transaction>>;

    /// False if the xid was not registered
    fn remove_transaction(&self, xid: &Xid) -> bool;

    /// All registered branches
    fn xids(&self) -> Vec<Xid>;

    fn timeout_seconds(&self) -> u32;

    /// False if the value is out of the configured bounds
    fn set_timeout_seconds(&self, secs: u32) -> bool;
}

/// [`ResourceManager`] backed by a concurrent map
pub struct InMemoryResourceManager {
    transactions: DashMap<Xid, Arc<Transaction>>,
    timeout_secs: AtomicU32,
    config: ResourceManagerConfig,
}

impl InMemoryResourceManager {
    pub fn new(config: ResourceManagerConfig) -> Self {
        Self {
            transactions: DashMap::new(),
            timeout_secs: AtomicU32::new(config.default_timeout_secs),
            config,
        }
    }

    pub fn len(&self) -> usize {
        self.transactions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.transactions.is_empty()
    }
}

impl Default for InMemoryResourceManager {
    fn default() -> Self {
        Self::new(ResourceManagerConfig::default())
    }
}

impl ResourceManager for InMemoryResourceManager {
    fn put_transaction(&self, xid: Xid, tx: Arc<Transaction>) -> bool {
        match self.transactions.entry(xid) {
            Entry::Occupied(_) => false,
            Entry::Vacant(entry) => {
                debug!(xid = %entry.key(), "Registered transaction branch");
                entry.insert(tx);
                true
            }
        }
    }

    fn get_transaction(&self, xid: &Xid) -> Option<Arc<Transaction>> {
        self.transactions.get(xid).map(|e| Arc::clone(e.value()))
    }

    fn remove_transaction(&self, xid: &Xid) -> bool {
        let removed = self.transactions.remove(xid).is_some();
        if removed {
            debug!(xid = %xid, "Removed transaction branch");
        }
        removed
    }

    fn xids(&self) -> Vec<Xid> {
        self.transactions.iter().map(|e| e.key().clone()).collect()
    }

    fn timeout_seconds(&self) -> u32 {
        self.timeout_secs.load(Ordering::Relaxed)
    }

    fn set_timeout_seconds(&self, secs: u32) -> bool {
        if !self.config.accepts(secs) {
            return false;
        }
        self.timeout_secs.store(secs, Ordering::Relaxed);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn xid(b: &str) -> Xid {
        Xid::new(1, "gtrid", b).unwrap()
    }

    #[test]
    fn test_put_rejects_duplicates() {
        let rm = InMemoryResourceManager::default();
        assert!(rm.put_transaction(xid("a"), Arc::new(Transaction::xa(xid("a")))));
        assert!(!rm.put_transaction(xid("a"), Arc::new(Transaction::xa(xid("a")))));
        assert_eq!(rm.len(), 1);
    }

    #[test]
    fn test_get_and_remove() {
        let rm = InMemoryResourceManager::default();
        let tx = Arc::new(Transaction::xa(xid("a")));
        rm.put_transaction(xid("a"), Arc::clone(&tx));

        let found = rm.get_transaction(&xid("a")).unwrap();
        assert!(Arc::ptr_eq(&found, &tx));
        assert!(rm.get_transaction(&xid("b")).is_none());

        assert!(rm.remove_transaction(&xid("a")));
        assert!(!rm.remove_transaction(&xid("a")));
        assert!(rm.is_empty());
    }

    #[test]
    fn test_xids_lists_all_branches() {
        let rm = InMemoryResourceManager::default();
        for b in ["a", "b", "c"] {
            rm.put_transaction(xid(b), Arc::new(Transaction::xa(xid(b))));
        }
        let mut xids = rm.xids();
        xids.sort_by(|l, r| l.branch_qualifier().cmp(r.branch_qualifier()));
        assert_eq!(xids, vec![xid("a"), xid("b"), xid("c")]);
    }

    #[test]
    fn test_timeout_bounds() {
        let rm = InMemoryResourceManager::new(ResourceManagerConfig {
            default_timeout_secs: 30,
            min_timeout_secs: 5,
            max_timeout_secs: 60,
        });
        assert_eq!(rm.timeout_seconds(), 30);
        assert!(rm.set_timeout_seconds(45));
        assert_eq!(rm.timeout_seconds(), 45);
        assert!(!rm.set_timeout_seconds(1));
        assert!(!rm.set_timeout_seconds(61));
        assert_eq!(rm.timeout_seconds(), 45);
    }
}
