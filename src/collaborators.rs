//! Contracts the session engine requires from the rest of the broker
//!
//! Routing, storage, security, queue internals and the transport are owned by
//! other subsystems. The session only talks to them through these traits, which
//! lets embedders plug in their own implementations and lets tests run against
//! the in-memory ones in [`crate::memory`].

use crate::error::Result;
use crate::message::{Filter, Message, MessageReference};
use crate::session::Delivery;
use crate::transaction::{DurableWork, PendingSend, Xid};
use std::sync::Arc;

/// Outcome of offering a reference to a consumer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandleStatus {
    /// The consumer took the reference
    Handled,
    /// The consumer cannot take anything right now (stopped or closed)
    Busy,
    /// The consumer does not want this reference
    NoMatch,
}

/// Something a queue can hand references to
pub trait Consumer: Send + Sync {
    fn id(&self) -> &str;

    /// Consumer-level selector, evaluated by the queue
    fn filter(&self) -> Option<&Filter>;

    fn handle(&self, reference: &Arc<MessageReference>) -> Result<HandleStatus>;
}

/// A queue as seen from a session
pub trait Queue: Send + Sync {
    fn name(&self) -> &str;

    fn is_durable(&self) -> bool;

    fn is_temporary(&self) -> bool;

    fn filter(&self) -> Option<&Filter>;

    /// Maximum number of messages, -1 for unbounded
    fn max_size(&self) -> i32;

    fn consumer_count(&self) -> usize;

    /// Messages waiting plus messages delivered but not yet acknowledged
    fn message_count(&self) -> usize;

    fn add_last(&self, reference: Arc<MessageReference>);

    /// Requeue at the head, used by cancel and rollback
    fn add_first(&self, reference: Arc<MessageReference>);

    fn reference_acknowledged(&self, reference: &Arc<MessageReference>);

    fn add_consumer(&self, consumer: Arc<dyn Consumer>);

    fn remove_consumer(&self, consumer_id: &str) -> bool;

    /// Snapshot of waiting references, for browsing
    fn list(&self, filter: Option<&Filter>) -> Vec<Arc<MessageReference>>;

    /// Try to hand waiting references to consumers
    fn deliver(&self);
}

/// Association between an address and a queue
#[derive(Clone)]
pub struct Binding {
    pub address: String,
    pub queue: Arc<dyn Queue>,
}

impl std::fmt::Debug for Binding {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Binding")
            .field("address", &self.address)
            .field("queue", &self.queue.name())
            .finish()
    }
}

/// Address table and router
pub trait PostOffice: Send + Sync {
    fn contains_allowable_address(&self, address: &str) -> bool;

    /// Returns false if the address was already present
    fn add_allowable_address(&self, address: &str) -> bool;

    /// Returns false if the address was absent
    fn remove_allowable_address(&self, address: &str) -> bool;

    /// Fan a message out to the queues bound to `address`.
    ///
    /// The returned references have not been added to their queues yet; that
    /// happens when the send is committed.
    fn route(&self, address: &str, message: &Arc<Message>) -> Result<Vec<Arc<MessageReference>>>;

    fn get_binding(&self, queue_name: &str) -> Option<Binding>;

    fn add_binding(
        &self,
        address: &str,
        queue_name: &str,
        filter: Option<Filter>,
        durable: bool,
        temporary: bool,
    ) -> Result<Binding>;

    fn remove_binding(&self, queue_name: &str) -> Option<Binding>;

    fn bindings_for_address(&self, address: &str) -> Vec<Binding>;
}

/// Durable storage of messages, references and transaction outcomes
pub trait PersistenceManager: Send + Sync {
    /// Broker-unique message id
    fn generate_message_id(&self) -> u64;

    /// Store an auto-committed send that has at least one durable reference
    fn add_message(&self, send: &PendingSend) -> Result<()>;

    fn delete_reference(&self, reference: &MessageReference) -> Result<()>;

    fn update_delivery_count(&self, reference: &MessageReference) -> Result<()>;

    fn delete_all_references(&self, queue: &dyn Queue) -> Result<()>;

    /// One-phase commit of the durable part of a transaction
    fn commit_transaction(&self, work: &DurableWork) -> Result<()>;

    /// First phase of a two-phase commit
    fn prepare_transaction(&self, xid: &Xid, work: &DurableWork) -> Result<()>;

    fn commit_prepared_transaction(&self, xid: &Xid) -> Result<()>;

    /// Discard a prepared transaction on rollback
    fn unprepare_transaction(&self, xid: &Xid) -> Result<()>;
}

/// Permission checked against an address
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CheckType {
    Create,
    Read,
    Write,
}

impl std::fmt::Display for CheckType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CheckType::Create => write!(f, "CREATE"),
            CheckType::Read => write!(f, "READ"),
            CheckType::Write => write!(f, "WRITE"),
        }
    }
}

pub trait SecurityStore: Send + Sync {
    /// Fails with [`crate::error::CourierError::AuthorizationFailed`] when denied
    fn check(&self, address: &str, check: CheckType, connection: &dyn ServerConnection)
        -> Result<()>;
}

/// The connection that owns a session
pub trait ServerConnection: Send + Sync {
    fn id(&self) -> &str;

    fn username(&self) -> Option<&str>;

    fn is_started(&self) -> bool;

    fn remove_session(&self, session_id: &str) -> Result<()>;

    fn add_temporary_queue(&self, queue: Arc<dyn Queue>);

    fn remove_temporary_queue(&self, queue_name: &str);
}

/// Kinds of request handlers registered with the dispatcher
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandlerKind {
    Session,
    Consumer,
    Browser,
}

/// Routes inbound requests to handler objects by id
pub trait PacketDispatcher: Send + Sync {
    fn register(&self, handler_id: &str, kind: HandlerKind);

    fn unregister(&self, handler_id: &str);
}

/// Pushes deliveries to the remote client
pub trait DeliverySender: Send + Sync {
    fn send_delivery(&self, delivery: &Delivery) -> Result<()>;

    fn remote_address(&self) -> String;
}
