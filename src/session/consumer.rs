//! Server-side consumer endpoint
//!
//! A `ServerConsumer` is what a queue sees when it hands out references on
//! behalf of a client consumer. Accepted references are recorded in the owning
//! session's delivery ledger and pushed to the client.

use crate::collaborators::{Consumer, HandleStatus, PersistenceManager, PostOffice, Queue};
use crate::error::Result;
use crate::message::{Filter, MessageReference};
use crate::session::ServerSession;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use tracing::debug;

/// Settings a client chose when creating a consumer
#[derive(Debug, Clone, Default)]
pub struct ConsumerOptions {
    pub filter: Option<Filter>,
    /// Drop messages sent on the consumer's own connection
    pub no_local: bool,
    /// Remove the queue's binding when its last consumer closes
    pub auto_delete_queue: bool,
    /// Messages the client may buffer ahead of acknowledgement, 0 disables
    /// flow control
    pub prefetch: i32,
}

pub struct ServerConsumer {
    id: String,
    queue: Arc<dyn Queue>,
    options: ConsumerOptions,
    connection_id: String,
    session: Weak<ServerSession>,
    persistence: Arc<dyn PersistenceManager>,
    post_office: Arc<dyn PostOffice>,
    started: AtomicBool,
    closed: AtomicBool,
}

impl ServerConsumer {
    pub(crate) fn new(
        queue: Arc<dyn Queue>,
        options: ConsumerOptions,
        connection_id: impl Into<String>,
        session: Weak<ServerSession>,
        persistence: Arc<dyn PersistenceManager>,
        post_office: Arc<dyn PostOffice>,
        started: bool,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            queue,
            options,
            connection_id: connection_id.into(),
            session,
            persistence,
            post_office,
            started: AtomicBool::new(started),
            closed: AtomicBool::new(false),
        }
    }

    pub fn queue(&self) -> &Arc<dyn Queue> {
        &self.queue
    }

    pub fn is_no_local(&self) -> bool {
        self.options.no_local
    }

    pub fn is_auto_delete_queue(&self) -> bool {
        self.options.auto_delete_queue
    }

    pub fn prefetch(&self) -> i32 {
        self.options.prefetch
    }

    pub fn is_flow_control_enabled(&self) -> bool {
        self.options.prefetch > 0
    }

    pub fn is_started(&self) -> bool {
        self.started.load(Ordering::Acquire)
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Start or stop delivery. Starting prompts the queue so waiting
    /// references flow without waiting for the next send.
    pub fn set_started(&self, started: bool) {
        self.started.store(started, Ordering::Release);
        if started && !self.is_closed() {
            if let Some(session) = self.session.upgrade() {
                session.prompt_delivery(Arc::clone(&self.queue));
            }
        }
    }

    /// Detach from the queue and the session. Closing twice is a no-op.
    pub fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        self.started.store(false, Ordering::Release);
        self.queue.remove_consumer(&self.id);

        if self.options.auto_delete_queue && self.queue.consumer_count() == 0 {
            if let Some(binding) = self.post_office.remove_binding(self.queue.name()) {
                if binding.queue.is_durable() {
                    self.persistence.delete_all_references(binding.queue.as_ref())?;
                }
                debug!(queue = %self.queue.name(), "Auto-deleted queue");
            }
        }

        if let Some(session) = self.session.upgrade() {
            session.remove_consumer(&self.id)?;
        }
        debug!(consumer_id = %self.id, "Consumer closed");
        Ok(())
    }
}

impl Consumer for ServerConsumer {
    fn id(&self) -> &str {
        &self.id
    }

    fn filter(&self) -> Option<&Filter> {
        self.options.filter.as_ref()
    }

    fn handle(&self, reference: &Arc<MessageReference>) -> Result<HandleStatus> {
        if self.is_closed() || !self.is_started() {
            return Ok(HandleStatus::Busy);
        }

        if self.options.no_local
            && reference.message().connection_id() == Some(self.connection_id.as_str())
        {
            reference.acknowledge(self.persistence.as_ref())?;
            return Ok(HandleStatus::Handled);
        }

        let Some(session) = self.session.upgrade() else {
            return Ok(HandleStatus::Busy);
        };
        session.handle_delivery(reference, &self.id)?;
        Ok(HandleStatus::Handled)
    }
}

impl std::fmt::Debug for ServerConsumer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerConsumer")
            .field("id", &self.id)
            .field("queue", &self.queue.name())
            .field("started", &self.is_started())
            .field("closed", &self.is_closed())
            .finish()
    }
}
