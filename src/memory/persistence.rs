//! Counting persistence manager
//!
//! Nothing is written anywhere. Every call is counted so callers can check
//! what would have reached storage, and the manager can be switched into a
//! failing mode to exercise storage error paths.

use crate::collaborators::{PersistenceManager, Queue};
use crate::error::{CourierError, Result};
use crate::message::MessageReference;
use crate::transaction::{DurableWork, PendingSend, Xid};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

#[derive(Debug, Default)]
struct PersistenceStats {
    added_messages: AtomicU64,
    deleted_references: AtomicU64,
    delivery_count_updates: AtomicU64,
    deleted_queues: AtomicU64,
    committed: AtomicU64,
    prepared: AtomicU64,
    committed_prepared: AtomicU64,
    unprepared: AtomicU64,
}

#[derive(Debug)]
pub struct InMemoryPersistence {
    next_message_id: AtomicU64,
    failing: AtomicBool,
    stats: PersistenceStats,
}

impl InMemoryPersistence {
    pub fn new() -> Self {
        Self {
            next_message_id: AtomicU64::new(1),
            failing: AtomicBool::new(false),
            stats: PersistenceStats::default(),
        }
    }

    /// Make every storage call fail until switched back
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    fn check(&self, operation: &str) -> Result<()> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(CourierError::storage(operation, "storage unavailable"));
        }
        Ok(())
    }

    fn count(counter: &AtomicU64) -> u64 {
        counter.load(Ordering::SeqCst)
    }

    pub fn added_messages(&self) -> u64 {
        Self::count(&self.stats.added_messages)
    }

    pub fn deleted_reference_count(&self) -> u64 {
        Self::count(&self.stats.deleted_references)
    }

    pub fn delivery_count_updates(&self) -> u64 {
        Self::count(&self.stats.delivery_count_updates)
    }

    pub fn deleted_queue_count(&self) -> u64 {
        Self::count(&self.stats.deleted_queues)
    }

    /// One-phase commits that carried durable work
    pub fn committed_transactions(&self) -> u64 {
        Self::count(&self.stats.committed)
    }

    pub fn prepared_transactions(&self) -> u64 {
        Self::count(&self.stats.prepared)
    }

    pub fn committed_prepared_transactions(&self) -> u64 {
        Self::count(&self.stats.committed_prepared)
    }

    pub fn unprepared_transactions(&self) -> u64 {
        Self::count(&self.stats.unprepared)
    }
}

impl Default for InMemoryPersistence {
    fn default() -> Self {
        Self::new()
    }
}

impl PersistenceManager for InMemoryPersistence {
    fn generate_message_id(&self) -> u64 {
        self.next_message_id.fetch_add(1, Ordering::SeqCst)
    }

    fn add_message(&self, _send: &PendingSend) -> Result<()> {
        self.check("add_message")?;
        self.stats.added_messages.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn delete_reference(&self, _reference: &MessageReference) -> Result<()> {
        self.check("delete_reference")?;
        self.stats.deleted_references.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn update_delivery_count(&self, _reference: &MessageReference) -> Result<()> {
        self.check("update_delivery_count")?;
        self.stats.delivery_count_updates.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn delete_all_references(&self, _queue: &dyn Queue) -> Result<()> {
        self.check("delete_all_references")?;
        self.stats.deleted_queues.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn commit_transaction(&self, _work: &DurableWork) -> Result<()> {
        self.check("commit_transaction")?;
        self.stats.committed.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn prepare_transaction(&self, _xid: &Xid, _work: &DurableWork) -> Result<()> {
        self.check("prepare_transaction")?;
        self.stats.prepared.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn commit_prepared_transaction(&self, _xid: &Xid) -> Result<()> {
        self.check("commit_prepared_transaction")?;
        self.stats.committed_prepared.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn unprepare_transaction(&self, _xid: &Xid) -> Result<()> {
        self.check("unprepare_transaction")?;
        self.stats.unprepared.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
