//! Local and distributed (XA) transactions
//!
//! Every session works inside a transaction. Sessions that are not XA get a
//! reusable local transaction attached at creation. XA sessions attach
//! branches through the verbs in [`XaCoordinator`]:
//!
//! - Branch registry shared by all sessions ([`ResourceManager`])
//! - Branch state machine (Active, Suspended, Prepared, Committed, RolledBack)
//! - Two-phase commit against the [`crate::collaborators::PersistenceManager`]
//! - XA return codes carried in [`XaResponse`]

mod coordinator;
mod resource_manager;
mod state;
mod xid;

pub use coordinator::{XaCoordinator, XaError, XaOutcome, XaResponse, XaResult};
pub use resource_manager::{InMemoryResourceManager, ResourceManager};
pub use state::{
    DurableWork, PendingSend, Transaction, TransactionSnapshot, TransactionState,
};
pub use xid::{Xid, MAX_BQUAL_SIZE, MAX_GTRID_SIZE};
