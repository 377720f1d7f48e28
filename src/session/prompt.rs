//! Redelivery prompt worker
//!
//! Queues are asked to re-run delivery from a dedicated thread per session
//! rather than inline. A consumer being started, or a reference being
//! cancelled, must not call back into queue delivery from inside the caller's
//! stack while the caller may still hold locks.
//!
//! Prompts are processed FIFO on one thread and carry nothing but the queue to
//! recheck, so duplicate or stale prompts are harmless.

use crate::collaborators::Queue;
use crate::config::PromptWorkerConfig;
use crate::error::{CourierError, Result};
use parking_lot::Mutex;
use std::sync::Arc;
use std::thread::JoinHandle;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Work items for the prompt thread
pub enum PromptTask {
    /// Ask the queue to hand waiting references to its consumers
    Deliver(Arc<dyn Queue>),
    /// Stop the worker
    Shutdown,
}

/// Handle on a session's prompt thread
pub struct PromptWorker {
    tx: mpsc::UnboundedSender<PromptTask>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl PromptWorker {
    /// Start the worker thread for `session_id`
    pub fn start(config: &PromptWorkerConfig, session_id: &str) -> Result<Self> {
        let (tx, rx) = mpsc::unbounded_channel();
        let short_id: String = session_id.chars().take(8).collect();
        let name = format!("{}-{}", config.thread_name_prefix, short_id);

        let handle = std::thread::Builder::new()
            .name(name.clone())
            .spawn(move || Self::run_loop(rx))
            .map_err(|e| {
                CourierError::ResourceExhausted(format!(
                    "Failed to spawn prompt worker thread {}: {}",
                    name, e
                ))
            })?;

        debug!(thread = %name, "Prompt worker started");

        Ok(Self {
            tx,
            handle: Mutex::new(Some(handle)),
        })
    }

    fn run_loop(mut rx: mpsc::UnboundedReceiver<PromptTask>) {
        while let Some(task) = rx.blocking_recv() {
            match task {
                PromptTask::Deliver(queue) => queue.deliver(),
                PromptTask::Shutdown => break,
            }
        }
        debug!("Prompt worker loop exited");
    }

    /// Schedule a delivery pass on `queue`; false once the worker is stopped
    pub fn prompt(&self, queue: Arc<dyn Queue>) -> bool {
        self.tx.send(PromptTask::Deliver(queue)).is_ok()
    }

    /// Stop the worker after it drains the prompts already queued.
    ///
    /// Waits for the thread unless called from the worker itself, which
    /// happens when a delivery pass ends up closing the session.
    pub fn shutdown(&self) {
        let Some(handle) = self.handle.lock().take() else {
            return;
        };
        let _ = self.tx.send(PromptTask::Shutdown);

        if handle.thread().id() == std::thread::current().id() {
            return;
        }
        if handle.join().is_err() {
            warn!("Prompt worker thread panicked");
        } else {
            info!("Prompt worker stopped");
        }
    }

    pub fn is_running(&self) -> bool {
        self.handle.lock().is_some()
    }
}

impl Drop for PromptWorker {
    fn drop(&mut self) {
        self.shutdown();
    }
}
