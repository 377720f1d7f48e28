//! Messages and message references
//!
//! A [`Message`] is routed once and may end up referenced by several queues. Each
//! queue holds its own [`MessageReference`], which carries the per-queue delivery
//! bookkeeping. The session engine never touches a message payload; it only
//! acknowledges, expires or cancels references.

use crate::collaborators::{PersistenceManager, Queue};
use crate::error::{CourierError, Result};
use bytes::Bytes;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use tracing::debug;

/// A message as produced by a client
#[derive(Debug, Clone)]
pub struct Message {
    message_id: u64,
    connection_id: Option<String>,
    durable: bool,
    priority: u8,
    /// Creation time (Unix millis)
    timestamp: i64,
    /// Expiry time (Unix millis), 0 = never
    expiration: i64,
    headers: HashMap<String, String>,
    payload: Bytes,
}

impl Message {
    /// Create a non-durable message with default priority
    pub fn new(payload: impl Into<Bytes>) -> Self {
        Self {
            message_id: 0,
            connection_id: None,
            durable: false,
            priority: 4,
            timestamp: chrono::Utc::now().timestamp_millis(),
            expiration: 0,
            headers: HashMap::new(),
            payload: payload.into(),
        }
    }

    pub fn with_durable(mut self, durable: bool) -> Self {
        self.durable = durable;
        self
    }

    pub fn with_priority(mut self, priority: u8) -> Self {
        self.priority = priority.min(9);
        self
    }

    pub fn with_expiration(mut self, expiration: i64) -> Self {
        self.expiration = expiration;
        self
    }

    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(key.into(), value.into());
        self
    }

    pub fn message_id(&self) -> u64 {
        self.message_id
    }

    pub fn set_message_id(&mut self, id: u64) {
        self.message_id = id;
    }

    /// Connection the message was sent on, used for no-local filtering
    pub fn connection_id(&self) -> Option<&str> {
        self.connection_id.as_deref()
    }

    pub fn set_connection_id(&mut self, connection_id: impl Into<String>) {
        self.connection_id = Some(connection_id.into());
    }

    pub fn is_durable(&self) -> bool {
        self.durable
    }

    pub fn priority(&self) -> u8 {
        self.priority
    }

    pub fn timestamp(&self) -> i64 {
        self.timestamp
    }

    pub fn expiration(&self) -> i64 {
        self.expiration
    }

    pub fn is_expired(&self) -> bool {
        self.expiration != 0 && chrono::Utc::now().timestamp_millis() > self.expiration
    }

    pub fn header(&self, key: &str) -> Option<&str> {
        self.headers.get(key).map(String::as_str)
    }

    pub fn payload(&self) -> &Bytes {
        &self.payload
    }
}

/// A queue's handle on a routed message
pub struct MessageReference {
    message: Arc<Message>,
    queue: Arc<dyn Queue>,
    delivery_count: AtomicU32,
}

impl MessageReference {
    pub fn new(message: Arc<Message>, queue: Arc<dyn Queue>) -> Arc<Self> {
        Arc::new(Self {
            message,
            queue,
            delivery_count: AtomicU32::new(0),
        })
    }

    pub fn message(&self) -> &Arc<Message> {
        &self.message
    }

    pub fn queue(&self) -> &Arc<dyn Queue> {
        &self.queue
    }

    /// A reference is durable only if both the message and its queue are
    pub fn is_durable(&self) -> bool {
        self.message.is_durable() && self.queue.is_durable()
    }

    pub fn delivery_count(&self) -> u32 {
        self.delivery_count.load(Ordering::Acquire)
    }

    /// Bump the in-memory delivery count; storage only sees it on cancel
    pub fn increment_delivery_count(&self) -> u32 {
        self.delivery_count.fetch_add(1, Ordering::AcqRel) + 1
    }

    /// Consume the reference for good
    pub fn acknowledge(self: &Arc<Self>, persistence: &dyn PersistenceManager) -> Result<()> {
        if self.is_durable() {
            persistence.delete_reference(self)?;
        }
        self.queue.reference_acknowledged(self);
        Ok(())
    }

    /// Drop the reference because the message expired
    pub fn expire(self: &Arc<Self>, persistence: &dyn PersistenceManager) -> Result<()> {
        debug!(
            message_id = self.message.message_id(),
            queue = self.queue.name(),
            "Message expired"
        );
        self.acknowledge(persistence)
    }

    /// Return the reference to the head of its queue for redelivery,
    /// flushing the in-memory delivery count for durable references
    pub fn cancel(self: &Arc<Self>, persistence: &dyn PersistenceManager) -> Result<()> {
        if self.is_durable() {
            persistence.update_delivery_count(self)?;
        }
        self.queue.add_first(Arc::clone(self));
        Ok(())
    }
}

impl std::fmt::Debug for MessageReference {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MessageReference")
            .field("message_id", &self.message.message_id())
            .field("queue", &self.queue.name())
            .field("delivery_count", &self.delivery_count())
            .finish()
    }
}

/// A selector expression attached to a queue, consumer or browser.
///
/// Evaluation belongs to the queue implementation; the session only validates
/// and propagates the expression.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Filter {
    expression: String,
}

impl Filter {
    pub fn parse(expression: &str) -> Result<Self> {
        let expression = expression.trim();
        if expression.is_empty() {
            return Err(CourierError::invalid_argument("filter expression is empty"));
        }
        Ok(Self {
            expression: expression.to_string(),
        })
    }

    pub fn expression(&self) -> &str {
        &self.expression
    }
}

impl std::fmt::Display for Filter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.expression)
    }
}
