//! XA verb state machine
//!
//! The `XaCoordinator` implements the two-phase-commit verbs a transaction
//! manager issues against one session:
//! - start / end / suspend / resume / join move the session's attachment
//! - prepare / commit / rollback drive a registered branch to completion
//! - forget, recover and the timeout verbs
//!
//! # Concurrency
//!
//! Attachment verbs take the session's attached-transaction slot by `&mut`,
//! so the caller must hold the session lock for their whole duration. The
//! completion verbs only need to know whether something is attached; the
//! session passes that snapshot in and releases its lock first, because
//! committing or rolling back calls into queues that may in turn deliver to
//! this session.
//!
//! Every violation is returned as an [`XaError`] carrying the standard
//! `XAER_*` code. Nothing here panics or returns a transport-level error.

use crate::collaborators::PersistenceManager;
use crate::error::{CourierError, XaErrorCode};
use crate::transaction::resource_manager::ResourceManager;
use crate::transaction::state::Transaction;
use crate::transaction::xid::Xid;

#[cfg(feature = "metrics")]
use metrics::counter;
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Successful outcome of an XA verb
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum XaOutcome {
    /// XA_OK
    Ok,
    /// XA_RDONLY, the branch had no work and was forgotten at prepare
    ReadOnly,
}

impl XaOutcome {
    pub fn code(&self) -> XaErrorCode {
        match self {
            XaOutcome::Ok => XaErrorCode::Ok,
            XaOutcome::ReadOnly => XaErrorCode::ReadOnly,
        }
    }
}

/// A refused XA verb
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{code}: {detail}")]
pub struct XaError {
    pub code: XaErrorCode,
    pub detail: String,
}

impl XaError {
    pub fn new(code: XaErrorCode, detail: impl Into<String>) -> Self {
        Self {
            code,
            detail: detail.into(),
        }
    }
}

/// Result type for XA verbs
pub type XaResult = std::result::Result<XaOutcome, XaError>;

/// Response payload for an XA verb
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct XaResponse {
    pub is_error: bool,
    pub response_code: i32,
    pub message: Option<String>,
}

impl From<XaResult> for XaResponse {
    fn from(result: XaResult) -> Self {
        match result {
            Ok(outcome) => Self {
                is_error: false,
                response_code: outcome.code().as_i32(),
                message: None,
            },
            Err(e) => Self {
                is_error: true,
                response_code: e.code.as_i32(),
                message: Some(e.detail),
            },
        }
    }
}

/// Storage failures are resource manager errors; state-machine refusals
/// coming out of the transaction are protocol errors
fn completion_error(e: CourierError) -> XaError {
    match e {
        CourierError::IllegalState(detail) => XaError::new(XaErrorCode::Protocol, detail),
        other => XaError::new(XaErrorCode::ResourceManagerError, other.to_string()),
    }
}

/// XA verbs for one session
pub struct XaCoordinator {
    session_id: String,
    resource_manager: Arc<dyn ResourceManager>,
    persistence: Arc<dyn PersistenceManager>,
}

impl XaCoordinator {
    pub fn new(
        session_id: impl Into<String>,
        resource_manager: Arc<dyn ResourceManager>,
        persistence: Arc<dyn PersistenceManager>,
    ) -> Self {
        Self {
            session_id: session_id.into(),
            resource_manager,
            persistence,
        }
    }

    pub fn resource_manager(&self) -> &Arc<dyn ResourceManager> {
        &self.resource_manager
    }

    fn refuse(&self, verb: &'static str, code: XaErrorCode, detail: impl Into<String>) -> XaResult {
        let detail = detail.into();
        warn!(session_id = %self.session_id, verb, code = %code, "{}", detail);
        #[cfg(feature = "metrics")]
        counter!("courier_xa_errors_total", "verb" => verb).increment(1);
        Err(XaError::new(code, detail))
    }

    fn fail(&self, verb: &'static str, error: XaError) -> XaResult {
        self.refuse(verb, error.code, error.detail)
    }

    /// TMNOFLAGS: create a branch, register it and attach it
    pub fn start(&self, attached: &mut Option<Arc<Transaction>>, xid: &Xid) -> XaResult {
        if let Some(tx) = attached.as_ref() {
            return self.refuse(
                "start",
                XaErrorCode::Protocol,
                format!(
                    "Cannot start, session is already doing work in a transaction {}",
                    tx
                ),
            );
        }

        let tx = Arc::new(Transaction::xa_for_session(xid.clone(), &self.session_id));
        if !self
            .resource_manager
            .put_transaction(xid.clone(), Arc::clone(&tx))
        {
            return self.refuse(
                "start",
                XaErrorCode::DuplicateId,
                format!("Cannot start, there is already a xid {}", xid),
            );
        }

        *attached = Some(tx);
        debug!(session_id = %self.session_id, xid = %xid, "Started XA branch");
        Ok(XaOutcome::Ok)
    }

    /// TMSUCCESS / TMFAIL: detach the branch from the session.
    ///
    /// Ending a branch the session is not attached to is only legal while it
    /// is suspended; that completes the suspension without attaching it here.
    pub fn end(&self, attached: &mut Option<Arc<Transaction>>, xid: &Xid, failed: bool) -> XaResult {
        if let Some(tx) = attached.as_ref().filter(|tx| tx.xid() == Some(xid)) {
            if tx.is_suspended() {
                return self.refuse(
                    "end",
                    XaErrorCode::Protocol,
                    "Cannot end, transaction is suspended",
                );
            }
            tx.dissociate();
            *attached = None;
            debug!(session_id = %self.session_id, xid = %xid, failed, "Ended XA branch");
            return Ok(XaOutcome::Ok);
        }

        let Some(tx) = self.resource_manager.get_transaction(xid) else {
            return self.refuse(
                "end",
                XaErrorCode::NotFound,
                format!("Cannot find suspended transaction to end {}", xid),
            );
        };
        if !tx.release_suspended() {
            return self.refuse(
                "end",
                XaErrorCode::Protocol,
                format!("Transaction is not suspended {}", xid),
            );
        }
        debug!(session_id = %self.session_id, xid = %xid, failed, "Ended suspended XA branch");
        Ok(XaOutcome::Ok)
    }

    /// TMSUSPEND: park the attached branch, leaving it registered
    pub fn suspend(&self, attached: &mut Option<Arc<Transaction>>) -> XaResult {
        let Some(tx) = attached.as_ref() else {
            return self.refuse(
                "suspend",
                XaErrorCode::Protocol,
                "Cannot suspend, session is not doing work in a transaction",
            );
        };
        if tx.is_local() {
            return self.refuse(
                "suspend",
                XaErrorCode::Outside,
                "Cannot suspend, session is doing work outside a global transaction",
            );
        }
        if !tx.suspend() {
            return self.refuse(
                "suspend",
                XaErrorCode::Protocol,
                format!(
                    "Cannot suspend, transaction is already suspended {}",
                    tx
                ),
            );
        }
        debug!(session_id = %self.session_id, transaction = %tx, "Suspended XA branch");
        *attached = None;
        Ok(XaOutcome::Ok)
    }

    /// TMRESUME: attach a suspended branch
    pub fn resume(&self, attached: &mut Option<Arc<Transaction>>, xid: &Xid) -> XaResult {
        if let Some(tx) = attached.as_ref() {
            return self.refuse(
                "resume",
                XaErrorCode::Protocol,
                format!(
                    "Cannot resume, session is currently doing work in a transaction {}",
                    tx
                ),
            );
        }
        let Some(tx) = self.resource_manager.get_transaction(xid) else {
            return self.refuse(
                "resume",
                XaErrorCode::NotFound,
                format!("Cannot find xid in resource manager: {}", xid),
            );
        };
        if !tx.resume(&self.session_id) {
            return self.refuse(
                "resume",
                XaErrorCode::Protocol,
                format!("Cannot resume transaction, it is not suspended {}", xid),
            );
        }
        debug!(session_id = %self.session_id, xid = %xid, "Resumed XA branch");
        *attached = Some(tx);
        Ok(XaOutcome::Ok)
    }

    /// TMJOIN: attach an existing, unsuspended branch
    ///
    /// Whatever the session had attached before is replaced.
    pub fn join(&self, attached: &mut Option<Arc<Transaction>>, xid: &Xid) -> XaResult {
        let Some(tx) = self.resource_manager.get_transaction(xid) else {
            return self.refuse(
                "join",
                XaErrorCode::NotFound,
                format!("Cannot find xid in resource manager: {}", xid),
            );
        };
        if tx.is_suspended() {
            return self.refuse(
                "join",
                XaErrorCode::Protocol,
                format!("Cannot join tx, it is suspended {}", xid),
            );
        }
        if let Err(state) = tx.associate(&self.session_id) {
            return self.refuse(
                "join",
                XaErrorCode::Protocol,
                format!("Cannot join tx, it is {} {}", state, xid),
            );
        }
        debug!(session_id = %self.session_id, xid = %xid, "Joined XA branch");
        *attached = Some(tx);
        Ok(XaOutcome::Ok)
    }

    /// Look up a branch for one of the completion verbs
    fn completion_target(
        &self,
        verb: &'static str,
        attached: Option<&Arc<Transaction>>,
        xid: &Xid,
    ) -> std::result::Result<Arc<Transaction>, XaError> {
        if let Some(tx) = attached {
            return Err(XaError::new(
                XaErrorCode::Protocol,
                format!(
                    "Cannot {}, session is currently doing work in a transaction {}",
                    verb,
                    tx
                ),
            ));
        }
        let tx = self.resource_manager.get_transaction(xid).ok_or_else(|| {
            XaError::new(
                XaErrorCode::NotFound,
                format!("Cannot find xid in resource manager: {}", xid),
            )
        })?;
        if tx.is_suspended() {
            return Err(XaError::new(
                XaErrorCode::Protocol,
                format!("Cannot {} transaction, it is suspended {}", verb, xid),
            ));
        }
        Ok(tx)
    }

    fn unregister(&self, verb: &'static str, xid: &Xid) -> XaResult {
        if !self.resource_manager.remove_transaction(xid) {
            return self.refuse(
                verb,
                XaErrorCode::Protocol,
                format!("Failed to remove transaction: {}", xid),
            );
        }
        Ok(XaOutcome::Ok)
    }

    /// First phase. An empty branch is dropped and reported read-only.
    pub fn prepare(&self, attached: Option<&Arc<Transaction>>, xid: &Xid) -> XaResult {
        let tx = match self.completion_target("prepare", attached, xid) {
            Ok(tx) => tx,
            Err(e) => return self.fail("prepare", e),
        };

        if tx.is_empty() {
            self.unregister("prepare", xid)?;
            debug!(session_id = %self.session_id, xid = %xid, "Prepared empty XA branch read-only");
            return Ok(XaOutcome::ReadOnly);
        }

        if let Err(e) = tx.prepare(self.persistence.as_ref()) {
            return self.fail("prepare", completion_error(e));
        }
        info!(session_id = %self.session_id, xid = %xid, "Prepared XA branch");
        Ok(XaOutcome::Ok)
    }

    /// Second phase, or a one-phase commit of an unprepared branch
    pub fn commit(&self, attached: Option<&Arc<Transaction>>, xid: &Xid, one_phase: bool) -> XaResult {
        let tx = match self.completion_target("commit", attached, xid) {
            Ok(tx) => tx,
            Err(e) => return self.fail("commit", e),
        };

        if let Err(e) = tx.commit(one_phase, self.persistence.as_ref()) {
            return self.fail("commit", completion_error(e));
        }
        self.unregister("commit", xid)?;

        #[cfg(feature = "metrics")]
        counter!("courier_xa_commits_total").increment(1);
        info!(session_id = %self.session_id, xid = %xid, one_phase, "Committed XA branch");
        Ok(XaOutcome::Ok)
    }

    pub fn rollback(&self, attached: Option<&Arc<Transaction>>, xid: &Xid) -> XaResult {
        let tx = match self.completion_target("rollback", attached, xid) {
            Ok(tx) => tx,
            Err(e) => return self.fail("rollback", e),
        };

        if let Err(e) = tx.rollback(self.persistence.as_ref()) {
            return self.fail("rollback", completion_error(e));
        }
        self.unregister("rollback", xid)?;

        #[cfg(feature = "metrics")]
        counter!("courier_xa_rollbacks_total").increment(1);
        info!(session_id = %self.session_id, xid = %xid, "Rolled back XA branch");
        Ok(XaOutcome::Ok)
    }

    /// Heuristic outcomes are never produced, so there is nothing to forget
    pub fn forget(&self, xid: &Xid) -> XaResult {
        debug!(session_id = %self.session_id, xid = %xid, "Forget");
        Ok(XaOutcome::Ok)
    }

    /// Prepared branches awaiting an outcome (XA recover)
    pub fn in_doubt_xids(&self) -> Vec<Xid> {
        self.resource_manager
            .xids()
            .into_iter()
            .filter(|xid| {
                self.resource_manager
                    .get_transaction(xid)
                    .is_some_and(|tx| tx.is_prepared())
            })
            .collect()
    }

    pub fn timeout_seconds(&self) -> u32 {
        self.resource_manager.timeout_seconds()
    }

    pub fn set_timeout_seconds(&self, secs: u32) -> bool {
        self.resource_manager.set_timeout_seconds(secs)
    }
}
