//! Transaction state structures
//!
//! A [`Transaction`] buffers routed sends and acknowledged references until it
//! is committed or rolled back. Local transactions are reusable: commit and
//! rollback leave them `Active` with empty lists. XA branches move through the
//! full state machine and end in a terminal state.
//!
//! # Locking
//!
//! The transaction mutex only guards the buffered lists and the state. It is
//! never held while calling back into queues, so a queue delivering into a
//! session (which takes the session lock) cannot deadlock with a commit.

use crate::collaborators::PersistenceManager;
use crate::error::{CourierError, Result};
use crate::message::{Message, MessageReference};
use crate::transaction::xid::Xid;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, warn};

/// Transaction state machine states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransactionState {
    /// Work can be added
    Active,
    /// XA branch detached with TMSUSPEND, waiting for TMRESUME
    Suspended,
    /// First phase of two-phase commit done
    Prepared,
    /// XA branch committed
    Committed,
    /// XA branch rolled back
    RolledBack,
}

impl TransactionState {
    /// Check if this state accepts new sends and acknowledgements
    pub fn can_add_work(&self) -> bool {
        matches!(self, TransactionState::Active)
    }

    /// Check if this state allows a prepare
    pub fn can_prepare(&self) -> bool {
        matches!(self, TransactionState::Active)
    }

    /// Check if this is a terminal state
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TransactionState::Committed | TransactionState::RolledBack
        )
    }
}

impl std::fmt::Display for TransactionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TransactionState::Active => write!(f, "Active"),
            TransactionState::Suspended => write!(f, "Suspended"),
            TransactionState::Prepared => write!(f, "Prepared"),
            TransactionState::Committed => write!(f, "Committed"),
            TransactionState::RolledBack => write!(f, "RolledBack"),
        }
    }
}

/// A routed message whose references are not yet visible on their queues
#[derive(Debug, Clone)]
pub struct PendingSend {
    pub message: Arc<Message>,
    pub references: Vec<Arc<MessageReference>>,
}

impl PendingSend {
    pub fn new(message: Arc<Message>, references: Vec<Arc<MessageReference>>) -> Self {
        Self {
            message,
            references,
        }
    }

    /// True when at least one reference must survive a restart
    pub fn is_durable(&self) -> bool {
        self.references.iter().any(|r| r.is_durable())
    }

    pub fn durable_references(&self) -> impl Iterator<Item = &Arc<MessageReference>> {
        self.references.iter().filter(|r| r.is_durable())
    }

    /// Make the message visible on every queue it was routed to
    pub fn deliver(&self) {
        for reference in &self.references {
            reference.queue().add_last(Arc::clone(reference));
        }
    }
}

/// The durable subset of a transaction, handed to storage
#[derive(Debug, Default, Clone)]
pub struct DurableWork {
    pub sends: Vec<PendingSend>,
    pub acknowledgements: Vec<Arc<MessageReference>>,
}

impl DurableWork {
    fn collect(sends: &[PendingSend], acknowledgements: &[Arc<MessageReference>]) -> Self {
        Self {
            sends: sends.iter().filter(|s| s.is_durable()).cloned().collect(),
            acknowledgements: acknowledgements
                .iter()
                .filter(|r| r.is_durable())
                .cloned()
                .collect(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.sends.is_empty() && self.acknowledgements.is_empty()
    }
}

/// Point-in-time view of a transaction, for diagnostics
#[derive(Debug, Clone, Serialize)]
pub struct TransactionSnapshot {
    pub xid: Option<String>,
    pub state: TransactionState,
    pub pending_sends: usize,
    pub pending_acknowledgements: usize,
    pub associated_session: Option<String>,
    pub idle_ms: u64,
}

struct TransactionInner {
    state: TransactionState,
    sends: Vec<PendingSend>,
    acknowledgements: Vec<Arc<MessageReference>>,
    associated_session: Option<String>,
    last_update: Instant,
}

impl TransactionInner {
    fn new() -> Self {
        Self {
            state: TransactionState::Active,
            sends: Vec::new(),
            acknowledgements: Vec::new(),
            associated_session: None,
            last_update: Instant::now(),
        }
    }

    fn transition(&mut self, state: TransactionState) {
        self.state = state;
        self.last_update = Instant::now();
    }
}

/// A local or XA transaction
pub struct Transaction {
    xid: Option<Xid>,
    inner: Mutex<TransactionInner>,
}

impl Transaction {
    /// A reusable session-local transaction
    pub fn local() -> Self {
        Self {
            xid: None,
            inner: Mutex::new(TransactionInner::new()),
        }
    }

    /// A new XA branch
    pub fn xa(xid: Xid) -> Self {
        Self {
            xid: Some(xid),
            inner: Mutex::new(TransactionInner::new()),
        }
    }

    /// A new XA branch already associated with `session_id`
    pub fn xa_for_session(xid: Xid, session_id: &str) -> Self {
        let mut inner = TransactionInner::new();
        inner.associated_session = Some(session_id.to_string());
        Self {
            xid: Some(xid),
            inner: Mutex::new(inner),
        }
    }

    pub fn xid(&self) -> Option<&Xid> {
        self.xid.as_ref()
    }

    pub fn is_local(&self) -> bool {
        self.xid.is_none()
    }

    pub fn state(&self) -> TransactionState {
        self.inner.lock().state
    }

    pub fn is_suspended(&self) -> bool {
        self.state() == TransactionState::Suspended
    }

    pub fn is_prepared(&self) -> bool {
        self.state() == TransactionState::Prepared
    }

    pub fn associated_session(&self) -> Option<String> {
        self.inner.lock().associated_session.clone()
    }

    pub fn is_empty(&self) -> bool {
        let inner = self.inner.lock();
        inner.sends.is_empty() && inner.acknowledgements.is_empty()
    }

    pub fn send_count(&self) -> usize {
        self.inner.lock().sends.len()
    }

    pub fn acknowledgement_count(&self) -> usize {
        self.inner.lock().acknowledgements.len()
    }

    pub fn add_send(&self, send: PendingSend) -> Result<()> {
        let mut inner = self.inner.lock();
        if !inner.state.can_add_work() {
            return Err(CourierError::illegal_state(format!(
                "Cannot add a send to transaction {} in {} state",
                self, inner.state
            )));
        }
        inner.sends.push(send);
        inner.last_update = Instant::now();
        Ok(())
    }

    pub fn add_acknowledgement(&self, reference: Arc<MessageReference>) -> Result<()> {
        let mut inner = self.inner.lock();
        if !inner.state.can_add_work() {
            return Err(CourierError::illegal_state(format!(
                "Cannot add an acknowledgement to transaction {} in {} state",
                self, inner.state
            )));
        }
        inner.acknowledgements.push(reference);
        inner.last_update = Instant::now();
        Ok(())
    }

    /// Attach `session_id` to an active branch.
    ///
    /// Several sessions may interleave work on one branch; the last one to
    /// attach is recorded. Fails with the current state if the branch cannot
    /// take work.
    pub fn associate(&self, session_id: &str) -> std::result::Result<(), TransactionState> {
        let mut inner = self.inner.lock();
        if !inner.state.can_add_work() {
            return Err(inner.state);
        }
        inner.associated_session = Some(session_id.to_string());
        Ok(())
    }

    /// Detach without changing the state (TMSUCCESS / TMFAIL)
    pub fn dissociate(&self) {
        self.inner.lock().associated_session = None;
    }

    /// Active to Suspended, detaching the current session
    pub fn suspend(&self) -> bool {
        let mut inner = self.inner.lock();
        if inner.state != TransactionState::Active {
            return false;
        }
        inner.associated_session = None;
        inner.transition(TransactionState::Suspended);
        true
    }

    /// Suspended to Active, attaching `session_id`
    pub fn resume(&self, session_id: &str) -> bool {
        let mut inner = self.inner.lock();
        if inner.state != TransactionState::Suspended {
            return false;
        }
        inner.associated_session = Some(session_id.to_string());
        inner.transition(TransactionState::Active);
        true
    }

    /// Suspended to Active without attaching anyone, used when a suspended
    /// branch is ended from another session
    pub fn release_suspended(&self) -> bool {
        let mut inner = self.inner.lock();
        if inner.state != TransactionState::Suspended {
            return false;
        }
        inner.transition(TransactionState::Active);
        true
    }

    /// First phase of two-phase commit
    pub fn prepare(&self, persistence: &dyn PersistenceManager) -> Result<()> {
        let xid = self
            .xid
            .as_ref()
            .ok_or_else(|| CourierError::illegal_state("Cannot prepare a local transaction"))?;

        let mut inner = self.inner.lock();
        if !inner.state.can_prepare() {
            return Err(CourierError::illegal_state(format!(
                "Cannot prepare transaction {} in {} state",
                xid, inner.state
            )));
        }
        let work = DurableWork::collect(&inner.sends, &inner.acknowledgements);
        persistence.prepare_transaction(xid, &work)?;
        inner.transition(TransactionState::Prepared);
        debug!(xid = %xid, "Transaction prepared");
        Ok(())
    }

    /// Persist and apply the buffered work.
    ///
    /// Sends become visible on their queues and acknowledged references are
    /// released. A local transaction is left `Active` and empty; an XA branch
    /// ends `Committed`. If storage fails nothing is applied and the buffered
    /// work is kept.
    pub fn commit(&self, one_phase: bool, persistence: &dyn PersistenceManager) -> Result<()> {
        let (sends, acknowledgements, was_prepared) = {
            let mut inner = self.inner.lock();
            match inner.state {
                TransactionState::Active if self.xid.is_some() && !one_phase => {
                    return Err(CourierError::illegal_state(format!(
                        "Cannot two-phase commit transaction {}, it is not prepared",
                        self
                    )));
                }
                TransactionState::Active => {}
                TransactionState::Prepared if one_phase => {
                    return Err(CourierError::illegal_state(format!(
                        "Cannot one-phase commit transaction {}, it is already prepared",
                        self
                    )));
                }
                TransactionState::Prepared => {}
                other => {
                    return Err(CourierError::illegal_state(format!(
                        "Cannot commit transaction {} in {} state",
                        self, other
                    )));
                }
            }
            (
                std::mem::take(&mut inner.sends),
                std::mem::take(&mut inner.acknowledgements),
                inner.state == TransactionState::Prepared,
            )
        };

        let persisted = match (&self.xid, was_prepared) {
            (Some(xid), true) => persistence.commit_prepared_transaction(xid),
            _ => {
                let work = DurableWork::collect(&sends, &acknowledgements);
                if work.is_empty() {
                    Ok(())
                } else {
                    persistence.commit_transaction(&work)
                }
            }
        };
        if let Err(e) = persisted {
            warn!(transaction = %self, error = %e, "Failed to persist transaction commit");
            self.restore(sends, acknowledgements);
            return Err(e);
        }

        {
            let mut inner = self.inner.lock();
            if self.xid.is_some() {
                inner.associated_session = None;
                inner.transition(TransactionState::Committed);
            } else {
                inner.last_update = Instant::now();
            }
        }

        for send in &sends {
            send.deliver();
        }
        for reference in &acknowledgements {
            reference.queue().reference_acknowledged(reference);
        }

        debug!(
            transaction = %self,
            sends = sends.len(),
            acknowledgements = acknowledgements.len(),
            "Transaction committed"
        );
        Ok(())
    }

    /// Discard buffered sends and return acknowledged references to their
    /// queues.
    ///
    /// References are cancelled in reverse order so each queue's head ends up
    /// in the original delivery order. A local transaction is left `Active`
    /// and empty; an XA branch ends `RolledBack`.
    pub fn rollback(&self, persistence: &dyn PersistenceManager) -> Result<()> {
        let (acknowledgements, was_prepared) = {
            let mut inner = self.inner.lock();
            match inner.state {
                TransactionState::Active | TransactionState::Prepared => {}
                other => {
                    return Err(CourierError::illegal_state(format!(
                        "Cannot roll back transaction {} in {} state",
                        self, other
                    )));
                }
            }
            let was_prepared = inner.state == TransactionState::Prepared;
            inner.sends.clear();
            let acknowledgements = std::mem::take(&mut inner.acknowledgements);
            if self.xid.is_some() {
                inner.associated_session = None;
                inner.transition(TransactionState::RolledBack);
            } else {
                inner.last_update = Instant::now();
            }
            (acknowledgements, was_prepared)
        };

        let mut first_error = None;
        for reference in acknowledgements.iter().rev() {
            if let Err(e) = reference.cancel(persistence) {
                warn!(transaction = %self, error = %e, "Failed to cancel reference on rollback");
                first_error.get_or_insert(e);
            }
        }

        if was_prepared {
            if let Some(xid) = &self.xid {
                if let Err(e) = persistence.unprepare_transaction(xid) {
                    first_error.get_or_insert(e);
                }
            }
        }

        debug!(
            transaction = %self,
            cancelled = acknowledgements.len(),
            "Transaction rolled back"
        );
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    pub fn snapshot(&self) -> TransactionSnapshot {
        let inner = self.inner.lock();
        TransactionSnapshot {
            xid: self.xid.as_ref().map(|x| x.to_string()),
            state: inner.state,
            pending_sends: inner.sends.len(),
            pending_acknowledgements: inner.acknowledgements.len(),
            associated_session: inner.associated_session.clone(),
            idle_ms: inner.last_update.elapsed().as_millis() as u64,
        }
    }

    fn restore(&self, sends: Vec<PendingSend>, acknowledgements: Vec<Arc<MessageReference>>) {
        let mut inner = self.inner.lock();
        let mut restored_sends = sends;
        restored_sends.append(&mut inner.sends);
        inner.sends = restored_sends;
        let mut restored_acks = acknowledgements;
        restored_acks.append(&mut inner.acknowledgements);
        inner.acknowledgements = restored_acks;
    }
}

impl std::fmt::Display for Transaction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.xid {
            Some(xid) => write!(f, "{}", xid),
            None => write!(f, "local"),
        }
    }
}

impl std::fmt::Debug for Transaction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("Transaction")
            .field("xid", &self.xid)
            .field("state", &inner.state)
            .field("sends", &inner.sends.len())
            .field("acknowledgements", &inner.acknowledgements.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collaborators::Queue;
    use crate::memory::{InMemoryPersistence, MemoryQueue};

    fn durable_queue() -> Arc<MemoryQueue> {
        Arc::new(MemoryQueue::new("q", true, false, None))
    }

    fn send_to(queue: &Arc<MemoryQueue>, durable: bool) -> PendingSend {
        let message = Arc::new(Message::new("m").with_durable(durable));
        let reference = MessageReference::new(Arc::clone(&message), queue.clone());
        PendingSend::new(message, vec![reference])
    }

    fn xid(b: &str) -> Xid {
        Xid::new(1, "gtrid", b).unwrap()
    }

    #[test]
    fn test_state_helpers() {
        assert!(TransactionState::Active.can_add_work());
        assert!(!TransactionState::Prepared.can_add_work());
        assert!(TransactionState::Committed.is_terminal());
        assert!(!TransactionState::Suspended.is_terminal());
        assert_eq!(TransactionState::RolledBack.to_string(), "RolledBack");
    }

    #[test]
    fn test_local_commit_delivers_and_stays_active() {
        let persistence = InMemoryPersistence::new();
        let queue = durable_queue();
        let tx = Transaction::local();
        tx.add_send(send_to(&queue, true)).unwrap();

        tx.commit(true, &persistence).unwrap();

        assert_eq!(queue.message_count(), 1);
        assert_eq!(tx.state(), TransactionState::Active);
        assert!(tx.is_empty());
        assert_eq!(persistence.committed_transactions(), 1);
    }

    #[test]
    fn test_commit_skips_storage_for_transient_work() {
        let persistence = InMemoryPersistence::new();
        let queue = Arc::new(MemoryQueue::new("q", false, false, None));
        let tx = Transaction::local();
        tx.add_send(send_to(&queue, true)).unwrap();
        tx.commit(true, &persistence).unwrap();
        assert_eq!(persistence.committed_transactions(), 0);
        assert_eq!(queue.message_count(), 1);
    }

    #[test]
    fn test_failed_commit_keeps_work() {
        let persistence = InMemoryPersistence::new();
        let queue = durable_queue();
        let tx = Transaction::local();
        tx.add_send(send_to(&queue, true)).unwrap();

        persistence.set_failing(true);
        assert!(tx.commit(true, &persistence).is_err());
        assert_eq!(tx.send_count(), 1);
        assert_eq!(queue.message_count(), 0);

        persistence.set_failing(false);
        tx.commit(true, &persistence).unwrap();
        assert_eq!(queue.message_count(), 1);
    }

    #[test]
    fn test_two_phase_commit_requires_prepare() {
        let persistence = InMemoryPersistence::new();
        let tx = Transaction::xa(xid("b"));
        assert!(matches!(
            tx.commit(false, &persistence),
            Err(CourierError::IllegalState(_))
        ));

        tx.prepare(&persistence).unwrap();
        assert!(tx.is_prepared());
        assert!(tx.commit(true, &persistence).is_err());
        tx.commit(false, &persistence).unwrap();
        assert_eq!(tx.state(), TransactionState::Committed);
    }

    #[test]
    fn test_prepared_work_rejects_additions() {
        let persistence = InMemoryPersistence::new();
        let queue = durable_queue();
        let tx = Transaction::xa(xid("b"));
        tx.prepare(&persistence).unwrap();
        assert!(tx.add_send(send_to(&queue, false)).is_err());
    }

    #[test]
    fn test_local_prepare_rejected() {
        let persistence = InMemoryPersistence::new();
        assert!(Transaction::local().prepare(&persistence).is_err());
    }

    #[test]
    fn test_rollback_cancels_in_reverse_order() {
        let persistence = InMemoryPersistence::new();
        let queue = durable_queue();
        let refs: Vec<_> = (0..3)
            .map(|i| MessageReference::new(Arc::new(Message::new(format!("m{}", i))), queue.clone()))
            .collect();
        let tx = Transaction::local();
        for r in &refs {
            tx.add_acknowledgement(Arc::clone(r)).unwrap();
        }
        tx.add_send(send_to(&queue, false)).unwrap();

        tx.rollback(&persistence).unwrap();

        let listed = queue.list(None);
        assert_eq!(listed.len(), 3);
        for (listed, original) in listed.iter().zip(refs.iter()) {
            assert!(Arc::ptr_eq(listed, original));
        }
        assert!(tx.is_empty());
        assert_eq!(tx.state(), TransactionState::Active);
    }

    #[test]
    fn test_rollback_of_prepared_branch_unprepares() {
        let persistence = InMemoryPersistence::new();
        let tx = Transaction::xa(xid("b"));
        tx.prepare(&persistence).unwrap();
        tx.rollback(&persistence).unwrap();
        assert_eq!(tx.state(), TransactionState::RolledBack);
        assert_eq!(persistence.unprepared_transactions(), 1);
    }

    #[test]
    fn test_association() {
        let tx = Transaction::xa(xid("b"));
        tx.associate("s1").unwrap();
        tx.associate("s2").unwrap();
        assert_eq!(tx.associated_session().as_deref(), Some("s2"));

        assert!(tx.suspend());
        assert_eq!(tx.associated_session(), None);
        assert_eq!(tx.associate("s3"), Err(TransactionState::Suspended));
        assert!(tx.resume("s3"));
        assert!(!tx.resume("s4"));
        assert_eq!(tx.associated_session().as_deref(), Some("s3"));

        tx.dissociate();
        assert_eq!(tx.associated_session(), None);
    }

    #[test]
    fn test_snapshot_serializes() {
        let tx = Transaction::xa(xid("b"));
        let json = serde_json::to_value(tx.snapshot()).unwrap();
        assert_eq!(json["state"], "Active");
        assert_eq!(json["pending_sends"], 0);
    }
}
