#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]

//! # Courier
//!
//! Courier is the server-side session engine of a message broker endpoint. A
//! client logical session maps onto one [`ServerSession`], which:
//!
//! - records every message handed to its consumers in a delivery ledger with
//!   strictly increasing delivery ids
//! - acknowledges, cancels, expires or rolls back those deliveries
//! - buffers sends and acknowledgements in a local transaction, or in an XA
//!   branch driven by an external transaction manager
//! - creates and deletes addresses, queues, consumers and browsers
//!
//! Routing, storage, security, queue internals and the wire transport live
//! elsewhere in the broker and are reached through the traits in
//! [`collaborators`]. In-process implementations of all of them are in
//! [`memory`].
//!
//! ## Example
//!
//! ```no_run
//! use courier::config::{PromptWorkerConfig, ResourceManagerConfig, SessionConfig};
//! use courier::memory::*;
//! use courier::{InMemoryResourceManager, Message, ServerSession, SessionContext};
//! use std::sync::Arc;
//!
//! fn main() -> courier::Result<()> {
//!     let connection = Arc::new(LocalConnection::new(Some("guest")));
//!     connection.set_started(true);
//!     let (sender, mut deliveries) = ChannelDeliverySender::new("127.0.0.1:5445");
//!
//!     let session = ServerSession::new(
//!         SessionConfig::default(),
//!         &PromptWorkerConfig::default(),
//!         SessionContext {
//!             connection: connection.clone(),
//!             resource_manager: Arc::new(InMemoryResourceManager::new(
//!                 ResourceManagerConfig::default(),
//!             )),
//!             sender: Arc::new(sender),
//!             dispatcher: Arc::new(RecordingDispatcher::new()),
//!             persistence: Arc::new(InMemoryPersistence::new()),
//!             post_office: Arc::new(InMemoryPostOffice::new()),
//!             security: Arc::new(StaticSecurityStore::allow_all()),
//!         },
//!     )?;
//!
//!     session.create_queue("orders", "orders.q", None, false, false)?;
//!     session.create_consumer("orders.q", None, false, false, -1)?;
//!     session.send("orders", Message::new("hello"))?;
//!
//!     if let Ok(delivered) = deliveries.try_recv() {
//!         session.acknowledge(delivered.delivery_id, true)?;
//!     }
//!     session.close()
//! }
//! ```
//!
//! ## Logging
//!
//! Courier logs through [`tracing`] and never installs a subscriber.
//! Lifecycle events are `info`, per-delivery events are `debug`, refused XA
//! verbs are `warn` and ledger faults are `error`.
//!
//! ## Metrics
//!
//! With the `metrics` feature enabled, deliveries, acknowledgements,
//! rollbacks and refused XA verbs are counted through the `metrics` facade.

pub mod collaborators;
pub mod config;
pub mod error;
pub mod memory;
pub mod message;
pub mod session;
pub mod transaction;

pub use config::{ConfigFile, PromptWorkerConfig, ResourceManagerConfig, SessionConfig};
pub use error::{CourierError, MessagingError, MessagingErrorCode, Result, XaErrorCode};
pub use message::{Filter, Message, MessageReference};
pub use session::{
    BindingQueryResponse, ConsumerOptions, CreateBrowserResponse, CreateConsumerResponse,
    Delivery, QueueQueryResponse, ServerBrowser, ServerConsumer, ServerSession, SessionContext,
};
pub use transaction::{
    InMemoryResourceManager, ResourceManager, Transaction, TransactionState, XaCoordinator,
    XaError, XaOutcome, XaResponse, XaResult, Xid,
};
