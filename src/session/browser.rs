//! Server-side queue browser
//!
//! Browsing never consumes anything. The browser takes a snapshot of the
//! queue's waiting references on first use (and again after `reset`) and
//! walks it.

use crate::collaborators::Queue;
use crate::error::{CourierError, Result};
use crate::message::{Filter, Message};
use crate::session::ServerSession;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

struct Cursor {
    snapshot: Option<Vec<Arc<Message>>>,
    position: usize,
}

pub struct ServerBrowser {
    id: String,
    queue: Arc<dyn Queue>,
    filter: Option<Filter>,
    session: Weak<ServerSession>,
    cursor: Mutex<Cursor>,
    closed: AtomicBool,
}

impl ServerBrowser {
    pub(crate) fn new(queue: Arc<dyn Queue>, filter: Option<Filter>, session: Weak<ServerSession>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            queue,
            filter,
            session,
            cursor: Mutex::new(Cursor {
                snapshot: None,
                position: 0,
            }),
            closed: AtomicBool::new(false),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn queue(&self) -> &Arc<dyn Queue> {
        &self.queue
    }

    pub fn filter(&self) -> Option<&Filter> {
        self.filter.as_ref()
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(CourierError::illegal_state(format!(
                "Browser {} is closed",
                self.id
            )));
        }
        Ok(())
    }

    fn load<'a>(&self, cursor: &'a mut Cursor) -> &'a [Arc<Message>] {
        if cursor.snapshot.is_none() {
            let messages = self
                .queue
                .list(self.filter.as_ref())
                .iter()
                .map(|r| Arc::clone(r.message()))
                .collect();
            cursor.snapshot = Some(messages);
            cursor.position = 0;
        }
        cursor.snapshot.as_deref().unwrap_or(&[])
    }

    /// Forget the snapshot; the next call takes a fresh one
    pub fn reset(&self) -> Result<()> {
        self.ensure_open()?;
        let mut cursor = self.cursor.lock();
        cursor.snapshot = None;
        cursor.position = 0;
        Ok(())
    }

    pub fn has_next_message(&self) -> Result<bool> {
        self.ensure_open()?;
        let mut cursor = self.cursor.lock();
        let len = self.load(&mut cursor).len();
        Ok(cursor.position < len)
    }

    pub fn next_message(&self) -> Result<Option<Arc<Message>>> {
        self.ensure_open()?;
        let mut cursor = self.cursor.lock();
        let position = cursor.position;
        let next = self.load(&mut cursor).get(position).cloned();
        if next.is_some() {
            cursor.position += 1;
        }
        Ok(next)
    }

    /// Up to `max` messages from the current position
    pub fn next_message_block(&self, max: usize) -> Result<Vec<Arc<Message>>> {
        if max == 0 {
            return Err(CourierError::invalid_argument(
                "Browser block size must be greater than zero",
            ));
        }
        self.ensure_open()?;
        let mut cursor = self.cursor.lock();
        let start = cursor.position;
        let block: Vec<Arc<Message>> = self
            .load(&mut cursor)
            .iter()
            .skip(start)
            .take(max)
            .cloned()
            .collect();
        cursor.position += block.len();
        Ok(block)
    }

    pub fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        self.cursor.lock().snapshot = None;
        if let Some(session) = self.session.upgrade() {
            session.remove_browser(&self.id)?;
        }
        Ok(())
    }
}
