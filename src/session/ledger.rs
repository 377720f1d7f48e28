//! Per-session delivery ledger
//!
//! Deliveries are kept in assignment order. Ids come from a session-scoped
//! counter and strictly increase along the ledger; acknowledge-up-to relies on
//! that and treats any inversion as corruption of the ledger.
//!
//! The ledger is plain data. The session serializes access to it with its own
//! lock, together with the attached transaction.

use crate::collaborators::PersistenceManager;
use crate::error::{CourierError, Result};
use crate::message::MessageReference;
use crate::session::delivery::Delivery;
use crate::transaction::Transaction;
use std::collections::VecDeque;
use std::sync::Arc;
use tracing::{debug, warn};

/// What happens to a reference once its delivery is acknowledged
#[derive(Clone, Copy)]
pub enum AckPolicy<'a> {
    /// Acknowledge against storage right away (auto-commit acks)
    Immediate(&'a dyn PersistenceManager),
    /// Buffer the acknowledgement in a transaction
    Transactional(&'a Transaction),
}

impl AckPolicy<'_> {
    fn ensure_ready(&self) -> Result<()> {
        match self {
            AckPolicy::Immediate(_) => Ok(()),
            AckPolicy::Transactional(tx) => {
                let state = tx.state();
                if state.can_add_work() {
                    Ok(())
                } else {
                    Err(CourierError::illegal_state(format!(
                        "Cannot acknowledge into transaction {} in {} state",
                        tx, state
                    )))
                }
            }
        }
    }

    fn apply(&self, reference: &Arc<MessageReference>) -> Result<()> {
        match self {
            AckPolicy::Immediate(persistence) => reference.acknowledge(*persistence),
            AckPolicy::Transactional(tx) => {
                tx.add_acknowledgement(Arc::clone(reference))?;
                reference.increment_delivery_count();
                Ok(())
            }
        }
    }
}

/// Ordered record of deliveries awaiting acknowledgement
#[derive(Debug)]
pub struct DeliveryLedger {
    session_id: String,
    deliveries: VecDeque<Delivery>,
    /// Last id handed out, 0 before the first delivery
    sequence: u64,
}

impl DeliveryLedger {
    pub fn new(session_id: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            deliveries: VecDeque::new(),
            sequence: 0,
        }
    }

    /// Assign the next delivery id and append the delivery
    pub fn record(
        &mut self,
        reference: Arc<MessageReference>,
        consumer_id: &str,
    ) -> Result<Delivery> {
        let delivery_id = self.sequence + 1;
        if let Some(last) = self.deliveries.back() {
            if last.delivery_id() >= delivery_id {
                return Err(CourierError::corrupted_ledger(
                    &self.session_id,
                    format!(
                        "next delivery id {} does not follow {}",
                        delivery_id,
                        last.delivery_id()
                    ),
                ));
            }
        }
        self.sequence = delivery_id;
        let delivery = Delivery::new(reference, consumer_id, delivery_id);
        self.deliveries.push_back(delivery.clone());
        Ok(delivery)
    }

    /// Drop the most recent entry if it is `delivery_id`, used when the
    /// transport refused the delivery. The id is not reissued.
    pub fn discard_last(&mut self, delivery_id: u64) -> Option<Delivery> {
        if self.deliveries.back().map(Delivery::delivery_id) == Some(delivery_id) {
            self.deliveries.pop_back()
        } else {
            None
        }
    }

    /// Acknowledge every delivery up to and including `delivery_id`.
    ///
    /// Absent ids are a no-op: the delivery may already have been cancelled
    /// by a concurrent close or expired. Returns how many deliveries were
    /// removed. Deliveries are acknowledged oldest first and each leaves the
    /// ledger only once its acknowledgement succeeded; on the first failure
    /// the failed delivery and everything after it stay in the ledger, so a
    /// later rollback or cancel still requeues them.
    pub fn acknowledge_up_to(&mut self, delivery_id: u64, policy: AckPolicy<'_>) -> Result<usize> {
        let Some(position) = self
            .deliveries
            .iter()
            .position(|d| d.delivery_id() == delivery_id)
        else {
            debug!(session_id = %self.session_id, delivery_id, "Nothing to acknowledge");
            return Ok(0);
        };

        if let Some(out_of_order) = self
            .deliveries
            .iter()
            .take(position)
            .find(|d| d.delivery_id() > delivery_id)
        {
            return Err(CourierError::corrupted_ledger(
                &self.session_id,
                format!(
                    "failed to acknowledge contiguously: found delivery {} before {}",
                    out_of_order.delivery_id(),
                    delivery_id
                ),
            ));
        }

        policy.ensure_ready()?;

        let mut acknowledged = 0;
        while acknowledged <= position {
            let Some(head) = self.deliveries.front() else {
                break;
            };
            if let Err(e) = policy.apply(head.reference()) {
                warn!(
                    session_id = %self.session_id,
                    delivery_id = head.delivery_id(),
                    error = %e,
                    "Acknowledgement failed, delivery kept"
                );
                return Err(e);
            }
            self.deliveries.pop_front();
            acknowledged += 1;
        }
        debug!(
            session_id = %self.session_id,
            delivery_id,
            count = acknowledged,
            "Acknowledged deliveries"
        );
        Ok(acknowledged)
    }

    /// Acknowledge exactly one delivery; false if it was not in the ledger.
    /// A failed acknowledgement leaves the delivery in place.
    pub fn acknowledge_one(&mut self, delivery_id: u64, policy: AckPolicy<'_>) -> Result<bool> {
        let Some(position) = self
            .deliveries
            .iter()
            .position(|d| d.delivery_id() == delivery_id)
        else {
            return Ok(false);
        };
        policy.ensure_ready()?;

        policy.apply(self.deliveries[position].reference())?;
        self.deliveries.remove(position);
        Ok(true)
    }

    /// Drain the whole ledger into a fresh local transaction, ready to be
    /// rolled back. The id counter is left alone.
    pub fn cancel_all(&mut self) -> Result<Transaction> {
        let tx = Transaction::local();
        for delivery in self.deliveries.drain(..) {
            tx.add_acknowledgement(Arc::clone(delivery.reference()))?;
        }
        Ok(tx)
    }

    /// Remove one delivery and expire its reference, bypassing any
    /// transaction. False if the id was not in the ledger.
    pub fn expire_one(&mut self, delivery_id: u64, persistence: &dyn PersistenceManager) -> Result<bool> {
        let Some(position) = self
            .deliveries
            .iter()
            .position(|d| d.delivery_id() == delivery_id)
        else {
            return Ok(false);
        };
        if let Some(delivery) = self.deliveries.remove(position) {
            delivery.reference().expire(persistence)?;
        }
        Ok(true)
    }

    /// Move every unacknowledged reference into `tx` and clear the ledger.
    ///
    /// The id counter is wound back by the number of entries moved so that
    /// redeliveries of the same set reuse the same id range.
    pub fn rollback_into(&mut self, tx: &Transaction) -> Result<usize> {
        AckPolicy::Transactional(tx).ensure_ready()?;

        let moved = self.deliveries.len();
        for delivery in self.deliveries.drain(..) {
            tx.add_acknowledgement(Arc::clone(delivery.reference()))?;
        }
        self.sequence = self.sequence.saturating_sub(moved as u64);
        debug!(
            session_id = %self.session_id,
            moved,
            sequence = self.sequence,
            "Rolled back unacknowledged deliveries"
        );
        Ok(moved)
    }

    pub fn len(&self) -> usize {
        self.deliveries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.deliveries.is_empty()
    }

    /// Last delivery id handed out
    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    pub fn delivery_ids(&self) -> Vec<u64> {
        self.deliveries.iter().map(Delivery::delivery_id).collect()
    }

    pub fn clear(&mut self) {
        self.deliveries.clear();
    }

    /// Append `delivery` without any ordering check
    #[cfg(test)]
    pub(crate) fn push_unchecked(&mut self, delivery: Delivery) {
        self.sequence = self.sequence.max(delivery.delivery_id());
        self.deliveries.push_back(delivery);
    }
}
