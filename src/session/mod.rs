//! Session orchestrator
//!
//! A [`ServerSession`] is one client logical session. It owns:
//!
//! - the [`DeliveryLedger`] of deliveries waiting for acknowledgement
//! - the attached transaction (local, an XA branch, or none between XA verbs)
//! - registries of its server-side consumers and browsers
//! - a prompt worker thread for redelivery passes
//!
//! # Concurrency
//!
//! A session is entered both by request handling and by queues delivering
//! to its consumers. The ledger and the attached transaction live behind one
//! mutex. Work that calls back into queues (commit, rollback, cancel-all)
//! runs after that mutex is released, so a queue delivering into this session
//! never waits on a thread that is itself waiting on the queue.

mod browser;
mod consumer;
mod delivery;
mod ledger;
mod prompt;
mod registry;
mod responses;

pub use browser::ServerBrowser;
pub use consumer::{ConsumerOptions, ServerConsumer};
pub use delivery::Delivery;
pub use ledger::{AckPolicy, DeliveryLedger};
pub use prompt::{PromptTask, PromptWorker};
pub use registry::Registry;
pub use responses::{
    BindingQueryResponse, CreateBrowserResponse, CreateConsumerResponse, QueueQueryResponse,
};

use crate::collaborators::{
    CheckType, DeliverySender, HandlerKind, PacketDispatcher, PersistenceManager, PostOffice,
    Queue, SecurityStore, ServerConnection,
};
use crate::config::{PromptWorkerConfig, SessionConfig};
use crate::error::{CourierError, MessagingError, Result};
use crate::message::{Filter, Message, MessageReference};
use crate::transaction::{
    PendingSend, ResourceManager, Transaction, XaCoordinator, XaResult, Xid,
};

#[cfg(feature = "metrics")]
use metrics::counter;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use tracing::{debug, error, info};

/// Collaborators a session is wired to at creation
#[derive(Clone)]
pub struct SessionContext {
    /// Owning connection; the session keeps only a weak reference
    pub connection: Arc<dyn ServerConnection>,
    pub resource_manager: Arc<dyn ResourceManager>,
    pub sender: Arc<dyn DeliverySender>,
    pub dispatcher: Arc<dyn PacketDispatcher>,
    pub persistence: Arc<dyn PersistenceManager>,
    pub post_office: Arc<dyn PostOffice>,
    pub security: Arc<dyn SecurityStore>,
}

struct SessionState {
    ledger: DeliveryLedger,
    tx: Option<Arc<Transaction>>,
}

pub struct ServerSession {
    id: String,
    config: SessionConfig,
    connection: Weak<dyn ServerConnection>,
    connection_id: String,
    sender: Arc<dyn DeliverySender>,
    dispatcher: Arc<dyn PacketDispatcher>,
    persistence: Arc<dyn PersistenceManager>,
    post_office: Arc<dyn PostOffice>,
    security: Arc<dyn SecurityStore>,
    xa: XaCoordinator,
    state: Mutex<SessionState>,
    consumers: Registry<ServerConsumer>,
    browsers: Registry<ServerBrowser>,
    prompter: PromptWorker,
    closed: AtomicBool,
}

impl ServerSession {
    /// Create a session and register it with the dispatcher.
    ///
    /// Non-XA sessions start with a local transaction attached; XA sessions
    /// start unattached and wait for `xa_start`, `xa_join` or `xa_resume`.
    pub fn new(
        config: SessionConfig,
        prompt_config: &PromptWorkerConfig,
        ctx: SessionContext,
    ) -> Result<Arc<Self>> {
        config.validate()?;

        let id = uuid::Uuid::new_v4().to_string();
        let prompter = PromptWorker::start(prompt_config, &id)?;
        let tx = if config.xa {
            None
        } else {
            Some(Arc::new(Transaction::local()))
        };

        let session = Arc::new(Self {
            xa: XaCoordinator::new(
                id.clone(),
                ctx.resource_manager,
                Arc::clone(&ctx.persistence),
            ),
            state: Mutex::new(SessionState {
                ledger: DeliveryLedger::new(id.clone()),
                tx,
            }),
            connection_id: ctx.connection.id().to_string(),
            connection: Arc::downgrade(&ctx.connection),
            sender: ctx.sender,
            dispatcher: ctx.dispatcher,
            persistence: ctx.persistence,
            post_office: ctx.post_office,
            security: ctx.security,
            consumers: Registry::new(),
            browsers: Registry::new(),
            prompter,
            closed: AtomicBool::new(false),
            config,
            id,
        });

        session.dispatcher.register(&session.id, HandlerKind::Session);
        info!(
            session_id = %session.id,
            remote = %session.sender.remote_address(),
            xa = session.config.xa,
            "Session created"
        );
        Ok(session)
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn connection_id(&self) -> &str {
        &self.connection_id
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn is_xa(&self) -> bool {
        self.config.xa
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Deliveries waiting for acknowledgement
    pub fn delivery_count(&self) -> usize {
        self.state.lock().ledger.len()
    }

    pub fn delivery_ids(&self) -> Vec<u64> {
        self.state.lock().ledger.delivery_ids()
    }

    /// Last delivery id handed out, 0 before the first delivery
    pub fn last_delivery_id(&self) -> u64 {
        self.state.lock().ledger.sequence()
    }

    /// The attached transaction, if any
    pub fn transaction(&self) -> Option<Arc<Transaction>> {
        self.state.lock().tx.clone()
    }

    pub fn consumer(&self, consumer_id: &str) -> Option<Arc<ServerConsumer>> {
        self.consumers.get(consumer_id)
    }

    pub fn consumer_count(&self) -> usize {
        self.consumers.len()
    }

    pub fn browser(&self, browser_id: &str) -> Option<Arc<ServerBrowser>> {
        self.browsers.get(browser_id)
    }

    pub fn browser_count(&self) -> usize {
        self.browsers.len()
    }

    fn ensure_open(&self) -> Result<()> {
        if self.is_closed() {
            return Err(CourierError::illegal_state(format!(
                "Session {} is closed",
                self.id
            )));
        }
        Ok(())
    }

    fn connection(&self) -> Result<Arc<dyn ServerConnection>> {
        self.connection.upgrade().ok_or_else(|| {
            CourierError::illegal_state(format!("Connection of session {} is gone", self.id))
        })
    }

    fn attached_transaction(&self) -> Result<Arc<Transaction>> {
        self.state.lock().tx.clone().ok_or_else(|| {
            CourierError::illegal_state(format!(
                "Session {} is not doing work in a transaction",
                self.id
            ))
        })
    }

    /// Log fatal faults before they propagate
    fn fault(&self, e: CourierError) -> CourierError {
        if e.is_fatal() {
            error!(session_id = %self.id, error = %e, "Session fault");
        }
        e
    }

    /// Make sure `address` exists, creating it if the connection may.
    /// A denied create is reported as `missing`.
    fn ensure_address(
        &self,
        address: &str,
        connection: &dyn ServerConnection,
        missing: impl FnOnce() -> CourierError,
    ) -> Result<()> {
        if self.post_office.contains_allowable_address(address) {
            return Ok(());
        }
        match self.security.check(address, CheckType::Create, connection) {
            Ok(()) => {
                self.post_office.add_allowable_address(address);
                debug!(session_id = %self.id, address, "Created address on demand");
                Ok(())
            }
            Err(CourierError::AuthorizationFailed(_)) => Err(missing()),
            Err(e) => Err(e),
        }
    }

    /// Record a reference handed to `consumer_id` and push it to the client.
    ///
    /// If the transport refuses the delivery it is taken back out of the
    /// ledger and the error returned, so the queue keeps the reference.
    pub fn handle_delivery(&self, reference: &Arc<MessageReference>, consumer_id: &str) -> Result<()> {
        let mut state = self.state.lock();
        let delivery = state
            .ledger
            .record(Arc::clone(reference), consumer_id)
            .map_err(|e| self.fault(e))?;

        if let Err(e) = delivery.deliver(self.sender.as_ref()) {
            state.ledger.discard_last(delivery.delivery_id());
            return Err(e);
        }

        #[cfg(feature = "metrics")]
        counter!("courier_deliveries_total").increment(1);
        debug!(
            session_id = %self.id,
            consumer_id,
            delivery_id = delivery.delivery_id(),
            "Delivered"
        );
        Ok(())
    }

    /// Ask `queue` to run a delivery pass on the prompt thread
    pub fn prompt_delivery(&self, queue: Arc<dyn Queue>) {
        if !self.prompter.prompt(queue) {
            debug!(session_id = %self.id, "Prompt worker stopped, dropping prompt");
        }
    }

    /// Start or stop every consumer of the session
    pub fn set_started(&self, started: bool) {
        for consumer in self.consumers.snapshot() {
            consumer.set_started(started);
        }
    }

    /// Route a message to `address`.
    ///
    /// Returns false if no queue matched. With auto-commit sends the message
    /// is persisted (when durably referenced) and made visible right away;
    /// otherwise it is buffered in the attached transaction.
    pub fn send(&self, address: &str, message: Message) -> Result<bool> {
        self.ensure_open()?;
        let connection = self.connection()?;

        self.ensure_address(address, connection.as_ref(), || {
            CourierError::queue_does_not_exist(address)
        })?;
        self.security
            .check(address, CheckType::Write, connection.as_ref())?;

        let mut message = message;
        message.set_message_id(self.persistence.generate_message_id());
        message.set_connection_id(self.connection_id.as_str());
        let message = Arc::new(message);

        let references = self.post_office.route(address, &message)?;
        if references.is_empty() {
            debug!(session_id = %self.id, address, "Message matched no queue");
            return Ok(false);
        }

        let send = PendingSend::new(message, references);
        if self.config.auto_commit_sends {
            if send.is_durable() {
                self.persistence.add_message(&send)?;
            }
            send.deliver();
        } else {
            self.attached_transaction()?.add_send(send)?;
        }
        Ok(true)
    }

    /// Acknowledge one delivery, or every delivery up to and including it.
    ///
    /// Unknown ids are ignored; a close may already have cancelled them.
    pub fn acknowledge(&self, delivery_id: u64, all_up_to: bool) -> Result<()> {
        let mut guard = self.state.lock();
        let state = &mut *guard;

        let policy = if self.config.auto_commit_acks {
            AckPolicy::Immediate(self.persistence.as_ref())
        } else {
            let tx = state.tx.as_deref().ok_or_else(|| {
                CourierError::illegal_state(format!(
                    "Session {} is not doing work in a transaction",
                    self.id
                ))
            })?;
            AckPolicy::Transactional(tx)
        };

        let acknowledged = if all_up_to {
            state.ledger.acknowledge_up_to(delivery_id, policy)
        } else {
            state
                .ledger
                .acknowledge_one(delivery_id, policy)
                .map(usize::from)
        }
        .map_err(|e| self.fault(e))?;

        #[cfg(feature = "metrics")]
        counter!("courier_acknowledgements_total").increment(acknowledged as u64);
        debug!(session_id = %self.id, delivery_id, acknowledged, all_up_to, "Acknowledge handled");
        Ok(())
    }

    /// Roll back everything not yet committed.
    ///
    /// Unacknowledged deliveries join the rollback and are requeued in order,
    /// and the delivery id counter is wound back by their number. A local
    /// transaction is replaced by a fresh one so new work can start at once.
    /// An attached XA branch is left to the transaction manager; only the
    /// unacknowledged deliveries are cancelled.
    pub fn rollback(&self) -> Result<()> {
        let rollback_tx = {
            let mut state = self.state.lock();
            let rollback_tx = match &state.tx {
                Some(tx) if tx.is_local() => Arc::clone(tx),
                _ => Arc::new(Transaction::local()),
            };
            state
                .ledger
                .rollback_into(&rollback_tx)
                .map_err(|e| self.fault(e))?;
            if state.tx.as_ref().is_some_and(|tx| tx.is_local()) {
                state.tx = Some(Arc::new(Transaction::local()));
            }
            rollback_tx
        };

        rollback_tx.rollback(self.persistence.as_ref())?;

        #[cfg(feature = "metrics")]
        counter!("courier_rollbacks_total").increment(1);
        debug!(session_id = %self.id, "Session rolled back");
        Ok(())
    }

    /// Cancel deliveries.
    ///
    /// `-1` cancels every delivery and requeues the references; any other id
    /// must come with `expired`, which drops that one delivery as expired.
    pub fn cancel(&self, delivery_id: i64, expired: bool) -> Result<()> {
        if delivery_id == -1 {
            let cancel_tx = self.state.lock().ledger.cancel_all()?;
            return cancel_tx.rollback(self.persistence.as_ref());
        }

        if !expired {
            return Err(CourierError::invalid_argument(format!(
                "Invalid delivery id {}",
                delivery_id
            )));
        }
        let delivery_id = u64::try_from(delivery_id).map_err(|_| {
            CourierError::invalid_argument(format!("Invalid delivery id {}", delivery_id))
        })?;
        self.state
            .lock()
            .ledger
            .expire_one(delivery_id, self.persistence.as_ref())?;
        Ok(())
    }

    /// Commit the attached local transaction
    pub fn commit(&self) -> Result<()> {
        let tx = self.attached_transaction()?;
        if !tx.is_local() {
            return Err(CourierError::illegal_state(format!(
                "Cannot commit XA branch {} from session {}, use xa_commit",
                tx, self.id
            )));
        }
        tx.commit(true, self.persistence.as_ref())?;
        debug!(session_id = %self.id, "Session committed");
        Ok(())
    }

    pub fn xa_start(&self, xid: &Xid) -> XaResult {
        let mut state = self.state.lock();
        self.xa.start(&mut state.tx, xid)
    }

    pub fn xa_end(&self, xid: &Xid, failed: bool) -> XaResult {
        let mut state = self.state.lock();
        self.xa.end(&mut state.tx, xid, failed)
    }

    pub fn xa_suspend(&self) -> XaResult {
        let mut state = self.state.lock();
        self.xa.suspend(&mut state.tx)
    }

    pub fn xa_resume(&self, xid: &Xid) -> XaResult {
        let mut state = self.state.lock();
        self.xa.resume(&mut state.tx, xid)
    }

    pub fn xa_join(&self, xid: &Xid) -> XaResult {
        let mut state = self.state.lock();
        self.xa.join(&mut state.tx, xid)
    }

    pub fn xa_prepare(&self, xid: &Xid) -> XaResult {
        let attached = self.transaction();
        self.xa.prepare(attached.as_ref(), xid)
    }

    pub fn xa_commit(&self, xid: &Xid, one_phase: bool) -> XaResult {
        let attached = self.transaction();
        self.xa.commit(attached.as_ref(), xid, one_phase)
    }

    pub fn xa_rollback(&self, xid: &Xid) -> XaResult {
        let attached = self.transaction();
        self.xa.rollback(attached.as_ref(), xid)
    }

    pub fn xa_forget(&self, xid: &Xid) -> XaResult {
        self.xa.forget(xid)
    }

    /// Prepared branches awaiting an outcome
    pub fn xa_in_doubt_xids(&self) -> Vec<Xid> {
        self.xa.in_doubt_xids()
    }

    pub fn xa_get_timeout(&self) -> u32 {
        self.xa.timeout_seconds()
    }

    /// False if the resource manager rejected the value
    pub fn xa_set_timeout(&self, secs: u32) -> bool {
        self.xa.set_timeout_seconds(secs)
    }

    pub fn add_address(&self, address: &str) -> Result<()> {
        if self.post_office.contains_allowable_address(address) {
            return Err(MessagingError::AddressExists(address.to_string()).into());
        }
        let connection = self.connection()?;
        self.security
            .check(address, CheckType::Create, connection.as_ref())?;
        self.post_office.add_allowable_address(address);
        Ok(())
    }

    pub fn remove_address(&self, address: &str) -> Result<()> {
        if !self.post_office.remove_allowable_address(address) {
            return Err(MessagingError::AddressDoesNotExist(address.to_string()).into());
        }
        Ok(())
    }

    /// Bind a new queue to `address`, creating the address if allowed.
    ///
    /// Temporary queues are never durable and are tracked by the connection
    /// so they go away with it.
    pub fn create_queue(
        &self,
        address: &str,
        queue_name: &str,
        filter: Option<&str>,
        durable: bool,
        temporary: bool,
    ) -> Result<()> {
        let connection = self.connection()?;
        self.ensure_address(address, connection.as_ref(), || {
            CourierError::queue_does_not_exist(queue_name)
        })?;

        if self.post_office.get_binding(queue_name).is_some() {
            return Err(MessagingError::QueueExists(queue_name.to_string()).into());
        }

        let filter = filter.map(Filter::parse).transpose()?;
        let durable = durable && !temporary;
        let binding = self
            .post_office
            .add_binding(address, queue_name, filter, durable, temporary)?;

        if temporary {
            connection.add_temporary_queue(Arc::clone(&binding.queue));
        }
        debug!(session_id = %self.id, address, queue = queue_name, durable, temporary, "Created queue");
        Ok(())
    }

    pub fn delete_queue(&self, queue_name: &str) -> Result<()> {
        let binding = self
            .post_office
            .remove_binding(queue_name)
            .ok_or_else(|| CourierError::queue_does_not_exist(queue_name))?;

        if binding.queue.is_durable() {
            self.persistence
                .delete_all_references(binding.queue.as_ref())?;
        }
        if binding.queue.is_temporary() {
            self.connection()?.remove_temporary_queue(queue_name);
        }
        debug!(session_id = %self.id, queue = queue_name, "Deleted queue");
        Ok(())
    }

    /// Attach a consumer to an existing queue.
    ///
    /// A negative `prefetch` takes the session default. The consumer starts
    /// if the connection is started.
    pub fn create_consumer(
        self: &Arc<Self>,
        queue_name: &str,
        filter: Option<&str>,
        no_local: bool,
        auto_delete_queue: bool,
        prefetch: i32,
    ) -> Result<CreateConsumerResponse> {
        self.ensure_open()?;
        let connection = self.connection()?;
        let binding = self
            .post_office
            .get_binding(queue_name)
            .ok_or_else(|| CourierError::queue_does_not_exist(queue_name))?;
        self.security
            .check(&binding.address, CheckType::Read, connection.as_ref())?;

        let prefetch = if prefetch < 0 {
            self.config.default_prefetch
        } else {
            prefetch
        };
        let options = ConsumerOptions {
            filter: filter.map(Filter::parse).transpose()?,
            no_local,
            auto_delete_queue,
            prefetch,
        };
        let started = connection.is_started();
        let consumer = Arc::new(ServerConsumer::new(
            Arc::clone(&binding.queue),
            options,
            self.connection_id.as_str(),
            Arc::downgrade(self),
            Arc::clone(&self.persistence),
            Arc::clone(&self.post_office),
            started,
        ));

        let consumer_id = crate::collaborators::Consumer::id(consumer.as_ref()).to_string();
        self.dispatcher.register(&consumer_id, HandlerKind::Consumer);
        self.consumers.insert(consumer_id.clone(), Arc::clone(&consumer));
        binding.queue.add_consumer(consumer);
        if started {
            self.prompt_delivery(Arc::clone(&binding.queue));
        }

        debug!(session_id = %self.id, consumer_id = %consumer_id, queue = queue_name, "Created consumer");
        Ok(CreateConsumerResponse {
            consumer_id,
            prefetch,
        })
    }

    /// Open a browser over an existing queue
    pub fn create_browser(
        self: &Arc<Self>,
        queue_name: &str,
        filter: Option<&str>,
    ) -> Result<CreateBrowserResponse> {
        self.ensure_open()?;
        let connection = self.connection()?;
        let binding = self
            .post_office
            .get_binding(queue_name)
            .ok_or_else(|| CourierError::queue_does_not_exist(queue_name))?;
        self.security
            .check(&binding.address, CheckType::Read, connection.as_ref())?;

        let filter = filter.map(Filter::parse).transpose()?;
        let browser = Arc::new(ServerBrowser::new(
            Arc::clone(&binding.queue),
            filter,
            Arc::downgrade(self),
        ));
        let browser_id = browser.id().to_string();
        self.browsers.insert(browser_id.clone(), browser);
        self.dispatcher.register(&browser_id, HandlerKind::Browser);

        debug!(session_id = %self.id, browser_id = %browser_id, queue = queue_name, "Created browser");
        Ok(CreateBrowserResponse { browser_id })
    }

    pub fn execute_queue_query(&self, queue_name: &str) -> Result<QueueQueryResponse> {
        if queue_name.is_empty() {
            return Err(CourierError::invalid_argument("Queue name is empty"));
        }
        let Some(binding) = self.post_office.get_binding(queue_name) else {
            return Ok(QueueQueryResponse::default());
        };
        let queue = &binding.queue;
        Ok(QueueQueryResponse {
            exists: true,
            durable: queue.is_durable(),
            temporary: queue.is_temporary(),
            max_size: queue.max_size(),
            consumer_count: queue.consumer_count(),
            message_count: queue.message_count(),
            filter_string: queue.filter().map(|f| f.expression().to_string()),
            address: Some(binding.address.clone()),
        })
    }

    pub fn execute_binding_query(&self, address: &str) -> Result<BindingQueryResponse> {
        if address.is_empty() {
            return Err(CourierError::invalid_argument("Address is empty"));
        }
        if !self.post_office.contains_allowable_address(address) {
            return Ok(BindingQueryResponse::default());
        }
        let queue_names = self
            .post_office
            .bindings_for_address(address)
            .iter()
            .map(|b| b.queue.name().to_string())
            .collect();
        Ok(BindingQueryResponse {
            exists: true,
            queue_names,
        })
    }

    pub fn remove_consumer(&self, consumer_id: &str) -> Result<()> {
        if self.consumers.remove(consumer_id).is_none() {
            return Err(CourierError::illegal_state(format!(
                "Cannot find consumer with id {} to remove",
                consumer_id
            )));
        }
        self.dispatcher.unregister(consumer_id);
        Ok(())
    }

    pub fn remove_browser(&self, browser_id: &str) -> Result<()> {
        if self.browsers.remove(browser_id).is_none() {
            return Err(CourierError::illegal_state(format!(
                "Cannot find browser with id {} to remove",
                browser_id
            )));
        }
        self.dispatcher.unregister(browser_id);
        Ok(())
    }

    /// Tear the session down.
    ///
    /// Consumers and browsers are closed, pending work is rolled back, the
    /// prompt worker is stopped and the session is removed from its
    /// connection and the dispatcher, in that order. Every step runs even if
    /// an earlier one failed; the first failure is returned.
    pub fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        let mut first_error = None;

        for consumer in self.consumers.snapshot() {
            if let Err(e) = consumer.close() {
                first_error.get_or_insert(e);
            }
        }
        self.consumers.clear();

        for browser in self.browsers.snapshot() {
            if let Err(e) = browser.close() {
                first_error.get_or_insert(e);
            }
        }
        self.browsers.clear();

        if let Err(e) = self.rollback() {
            first_error.get_or_insert(e);
        }

        self.prompter.shutdown();
        self.state.lock().ledger.clear();

        if let Some(connection) = self.connection.upgrade() {
            if let Err(e) = connection.remove_session(&self.id) {
                first_error.get_or_insert(e);
            }
        }
        self.dispatcher.unregister(&self.id);

        info!(session_id = %self.id, "Session closed");
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

impl std::fmt::Debug for ServerSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerSession")
            .field("id", &self.id)
            .field("xa", &self.config.xa)
            .field("consumers", &self.consumers.len())
            .field("browsers", &self.browsers.len())
            .field("closed", &self.is_closed())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ResourceManagerConfig;
    use crate::memory::{
        ChannelDeliverySender, InMemoryPersistence, InMemoryPostOffice, LocalConnection,
        MemoryQueue, RecordingDispatcher, StaticSecurityStore,
    };
    use crate::transaction::InMemoryResourceManager;

    fn open(connection: &Arc<LocalConnection>) -> Arc<ServerSession> {
        let (sender, _deliveries) = ChannelDeliverySender::new("127.0.0.1:5445");
        ServerSession::new(
            SessionConfig::default(),
            &PromptWorkerConfig::default(),
            SessionContext {
                connection: connection.clone(),
                resource_manager: Arc::new(InMemoryResourceManager::new(
                    ResourceManagerConfig::default(),
                )),
                sender: Arc::new(sender),
                dispatcher: Arc::new(RecordingDispatcher::new()),
                persistence: Arc::new(InMemoryPersistence::new()),
                post_office: Arc::new(InMemoryPostOffice::new()),
                security: Arc::new(StaticSecurityStore::allow_all()),
            },
        )
        .unwrap()
    }

    #[test]
    fn test_acknowledge_reports_ledger_corruption() {
        let connection = Arc::new(LocalConnection::new(Some("guest")));
        let session = open(&connection);
        let queue = Arc::new(MemoryQueue::new("q", false, false, None));
        {
            let mut state = session.state.lock();
            for delivery_id in [2, 4, 3] {
                let reference =
                    MessageReference::new(Arc::new(Message::new("m")), queue.clone());
                state
                    .ledger
                    .push_unchecked(Delivery::new(reference, "c1", delivery_id));
            }
        }

        let err = session.acknowledge(3, true).unwrap_err();

        assert!(matches!(err, CourierError::LedgerCorruption { .. }));
        assert!(err.is_fatal());
        assert_eq!(session.delivery_ids(), vec![2, 4, 3]);
        assert_eq!(queue.acknowledged_count(), 0);
        session.close().unwrap();
    }
}
