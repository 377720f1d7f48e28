//! Connection, dispatcher and delivery sender stand-ins

use crate::collaborators::{DeliverySender, HandlerKind, PacketDispatcher, Queue, ServerConnection};
use crate::error::{CourierError, Result};
use crate::session::Delivery;
use dashmap::DashMap;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;

/// What a [`ChannelDeliverySender`] pushes to its receiver
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveredMessage {
    pub delivery_id: u64,
    pub consumer_id: String,
    pub message_id: u64,
    pub delivery_count: u32,
}

/// Forwards deliveries into an unbounded channel
pub struct ChannelDeliverySender {
    tx: mpsc::UnboundedSender<DeliveredMessage>,
    remote: String,
    refusing: AtomicBool,
}

impl ChannelDeliverySender {
    pub fn new(remote: impl Into<String>) -> (Self, mpsc::UnboundedReceiver<DeliveredMessage>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Self {
                tx,
                remote: remote.into(),
                refusing: AtomicBool::new(false),
            },
            rx,
        )
    }

    /// Simulate a broken transport
    pub fn set_refusing(&self, refusing: bool) {
        self.refusing.store(refusing, Ordering::SeqCst);
    }
}

impl DeliverySender for ChannelDeliverySender {
    fn send_delivery(&self, delivery: &Delivery) -> Result<()> {
        if self.refusing.load(Ordering::SeqCst) {
            return Err(CourierError::Delivery(format!(
                "transport to {} refused delivery {}",
                self.remote,
                delivery.delivery_id()
            )));
        }
        self.tx
            .send(DeliveredMessage {
                delivery_id: delivery.delivery_id(),
                consumer_id: delivery.consumer_id().to_string(),
                message_id: delivery.reference().message().message_id(),
                delivery_count: delivery.reference().delivery_count(),
            })
            .map_err(|_| CourierError::Delivery(format!("receiver for {} dropped", self.remote)))
    }

    fn remote_address(&self) -> String {
        self.remote.clone()
    }
}

/// Dispatcher that only remembers what is registered
#[derive(Debug, Default)]
pub struct RecordingDispatcher {
    handlers: DashMap<String, HandlerKind>,
}

impl RecordingDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn kind_of(&self, handler_id: &str) -> Option<HandlerKind> {
        self.handlers.get(handler_id).map(|k| *k)
    }

    pub fn is_registered(&self, handler_id: &str) -> bool {
        self.handlers.contains_key(handler_id)
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

impl PacketDispatcher for RecordingDispatcher {
    fn register(&self, handler_id: &str, kind: HandlerKind) {
        self.handlers.insert(handler_id.to_string(), kind);
    }

    fn unregister(&self, handler_id: &str) {
        self.handlers.remove(handler_id);
    }
}

/// Connection that owns no socket
pub struct LocalConnection {
    id: String,
    username: Option<String>,
    started: AtomicBool,
    removed_sessions: Mutex<Vec<String>>,
    temporary_queues: DashMap<String, Arc<dyn Queue>>,
}

impl LocalConnection {
    pub fn new(username: Option<&str>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            username: username.map(str::to_string),
            started: AtomicBool::new(false),
            removed_sessions: Mutex::new(Vec::new()),
            temporary_queues: DashMap::new(),
        }
    }

    /// Sessions created afterwards start their consumers immediately
    pub fn set_started(&self, started: bool) {
        self.started.store(started, Ordering::SeqCst);
    }

    pub fn removed_sessions(&self) -> Vec<String> {
        self.removed_sessions.lock().clone()
    }

    pub fn temporary_queue_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.temporary_queues.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }
}

impl ServerConnection for LocalConnection {
    fn id(&self) -> &str {
        &self.id
    }

    fn username(&self) -> Option<&str> {
        self.username.as_deref()
    }

    fn is_started(&self) -> bool {
        self.started.load(Ordering::SeqCst)
    }

    fn remove_session(&self, session_id: &str) -> Result<()> {
        self.removed_sessions.lock().push(session_id.to_string());
        Ok(())
    }

    fn add_temporary_queue(&self, queue: Arc<dyn Queue>) {
        self.temporary_queues.insert(queue.name().to_string(), queue);
    }

    fn remove_temporary_queue(&self, queue_name: &str) {
        self.temporary_queues.remove(queue_name);
    }
}
