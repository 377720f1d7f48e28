//! In-memory FIFO queue with round-robin consumers

use crate::collaborators::{Consumer, HandleStatus, Queue};
use crate::message::{Filter, MessageReference};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::warn;

struct QueueInner {
    waiting: VecDeque<Arc<MessageReference>>,
    consumers: Vec<Arc<dyn Consumer>>,
    next_consumer: usize,
    /// Handed to a consumer, not yet acknowledged or cancelled
    delivering: usize,
}

#[derive(Debug, Default)]
struct QueueStats {
    delivered: AtomicU64,
    acknowledged: AtomicU64,
}

/// A non-persistent queue.
///
/// `add_last` runs a delivery pass right away. References requeued with
/// `add_first` wait for the next pass (`deliver`, a later send, or a
/// consumer starting). Selectors are carried but not evaluated.
pub struct MemoryQueue {
    name: String,
    durable: bool,
    temporary: bool,
    filter: Option<Filter>,
    inner: Mutex<QueueInner>,
    stats: QueueStats,
}

impl MemoryQueue {
    pub fn new(name: impl Into<String>, durable: bool, temporary: bool, filter: Option<Filter>) -> Self {
        Self {
            name: name.into(),
            durable,
            temporary,
            filter,
            inner: Mutex::new(QueueInner {
                waiting: VecDeque::new(),
                consumers: Vec::new(),
                next_consumer: 0,
                delivering: 0,
            }),
            stats: QueueStats::default(),
        }
    }

    /// References acknowledged since creation
    pub fn acknowledged_count(&self) -> u64 {
        self.stats.acknowledged.load(Ordering::Relaxed)
    }

    /// References handed to consumers since creation, redeliveries included
    pub fn delivered_count(&self) -> u64 {
        self.stats.delivered.load(Ordering::Relaxed)
    }

    /// References waiting for a consumer
    pub fn waiting_count(&self) -> usize {
        self.inner.lock().waiting.len()
    }

    pub fn delivering_count(&self) -> usize {
        self.inner.lock().delivering
    }

    /// Offer `reference` to each consumer once, starting at the round-robin
    /// cursor. The queue lock is not held while consumers run.
    fn offer(&self, reference: &Arc<MessageReference>, consumers: &[Arc<dyn Consumer>], start: usize) -> bool {
        for i in 0..consumers.len() {
            let consumer = &consumers[(start + i) % consumers.len()];
            match consumer.handle(reference) {
                Ok(HandleStatus::Handled) => {
                    self.inner.lock().next_consumer = (start + i + 1) % consumers.len();
                    self.stats.delivered.fetch_add(1, Ordering::Relaxed);
                    return true;
                }
                Ok(HandleStatus::Busy) | Ok(HandleStatus::NoMatch) => {}
                Err(e) => {
                    warn!(queue = %self.name, consumer_id = consumer.id(), error = %e, "Consumer failed to take reference");
                }
            }
        }
        false
    }
}

impl Queue for MemoryQueue {
    fn name(&self) -> &str {
        &self.name
    }

    fn is_durable(&self) -> bool {
        self.durable
    }

    fn is_temporary(&self) -> bool {
        self.temporary
    }

    fn filter(&self) -> Option<&Filter> {
        self.filter.as_ref()
    }

    fn max_size(&self) -> i32 {
        -1
    }

    fn consumer_count(&self) -> usize {
        self.inner.lock().consumers.len()
    }

    fn message_count(&self) -> usize {
        let inner = self.inner.lock();
        inner.waiting.len() + inner.delivering
    }

    fn add_last(&self, reference: Arc<MessageReference>) {
        self.inner.lock().waiting.push_back(reference);
        self.deliver();
    }

    fn add_first(&self, reference: Arc<MessageReference>) {
        let mut inner = self.inner.lock();
        inner.delivering = inner.delivering.saturating_sub(1);
        inner.waiting.push_front(reference);
    }

    fn reference_acknowledged(&self, _reference: &Arc<MessageReference>) {
        let mut inner = self.inner.lock();
        inner.delivering = inner.delivering.saturating_sub(1);
        self.stats.acknowledged.fetch_add(1, Ordering::Relaxed);
    }

    fn add_consumer(&self, consumer: Arc<dyn Consumer>) {
        self.inner.lock().consumers.push(consumer);
    }

    fn remove_consumer(&self, consumer_id: &str) -> bool {
        let mut inner = self.inner.lock();
        let before = inner.consumers.len();
        inner.consumers.retain(|c| c.id() != consumer_id);
        if inner.next_consumer >= inner.consumers.len() {
            inner.next_consumer = 0;
        }
        inner.consumers.len() != before
    }

    fn list(&self, _filter: Option<&Filter>) -> Vec<Arc<MessageReference>> {
        self.inner.lock().waiting.iter().cloned().collect()
    }

    fn deliver(&self) {
        loop {
            let (reference, consumers, start) = {
                let mut inner = self.inner.lock();
                if inner.consumers.is_empty() {
                    return;
                }
                let Some(reference) = inner.waiting.pop_front() else {
                    return;
                };
                // In flight counts as delivering, a consumer may acknowledge
                // before `handle` returns
                inner.delivering += 1;
                (reference, inner.consumers.clone(), inner.next_consumer)
            };

            if !self.offer(&reference, &consumers, start) {
                let mut inner = self.inner.lock();
                inner.delivering = inner.delivering.saturating_sub(1);
                inner.waiting.push_front(reference);
                return;
            }
        }
    }
}

impl std::fmt::Debug for MemoryQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryQueue")
            .field("name", &self.name)
            .field("durable", &self.durable)
            .field("temporary", &self.temporary)
            .field("message_count", &self.message_count())
            .finish()
    }
}
