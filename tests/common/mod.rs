//! Shared fixtures for Courier integration tests
//!
//! # Usage
//!
//! ```rust,ignore
//! mod common;
//! use common::*;
//! ```
//!
//! A [`Broker`] bundles one set of in-memory collaborators. Sessions opened on
//! the same broker share its post office, storage and resource manager, the
//! way sessions on one server would.

#![allow(dead_code)]

use courier::collaborators::{PostOffice, Queue};
use courier::config::{PromptWorkerConfig, ResourceManagerConfig, SessionConfig};
use courier::memory::{
    ChannelDeliverySender, DeliveredMessage, InMemoryPersistence, InMemoryPostOffice,
    LocalConnection, RecordingDispatcher, StaticSecurityStore,
};
use courier::{InMemoryResourceManager, ServerSession, SessionContext, Xid};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;

/// Collaborators shared by every session of one broker
pub struct Broker {
    pub post_office: Arc<InMemoryPostOffice>,
    pub persistence: Arc<InMemoryPersistence>,
    pub resource_manager: Arc<InMemoryResourceManager>,
    pub security: Arc<StaticSecurityStore>,
    pub dispatcher: Arc<RecordingDispatcher>,
}

impl Broker {
    pub fn new() -> Self {
        Self {
            post_office: Arc::new(InMemoryPostOffice::new()),
            persistence: Arc::new(InMemoryPersistence::new()),
            resource_manager: Arc::new(InMemoryResourceManager::new(
                ResourceManagerConfig::default(),
            )),
            security: Arc::new(StaticSecurityStore::allow_all()),
            dispatcher: Arc::new(RecordingDispatcher::new()),
        }
    }

    /// Open a session on a fresh, started connection
    pub fn open(&self, config: SessionConfig) -> TestSession {
        let connection = Arc::new(LocalConnection::new(Some("guest")));
        connection.set_started(true);
        self.open_on(connection, config)
    }

    pub fn open_on(&self, connection: Arc<LocalConnection>, config: SessionConfig) -> TestSession {
        let (sender, deliveries) = ChannelDeliverySender::new("127.0.0.1:5445");
        let sender = Arc::new(sender);
        let session = ServerSession::new(
            config,
            &PromptWorkerConfig::default(),
            SessionContext {
                connection: connection.clone(),
                resource_manager: self.resource_manager.clone(),
                sender: sender.clone(),
                dispatcher: self.dispatcher.clone(),
                persistence: self.persistence.clone(),
                post_office: self.post_office.clone(),
                security: self.security.clone(),
            },
        )
        .expect("session");

        TestSession {
            session,
            connection,
            sender,
            deliveries,
        }
    }

    /// Bind a queue named after its address
    pub fn queue(&self, name: &str, durable: bool) {
        self.post_office.add_allowable_address(name);
        self.post_office
            .add_binding(name, name, None, durable, false)
            .expect("binding");
    }

    pub fn message_count(&self, queue_name: &str) -> usize {
        self.post_office
            .queue(queue_name)
            .map(|q| q.message_count())
            .unwrap_or(0)
    }
}

impl Default for Broker {
    fn default() -> Self {
        Self::new()
    }
}

pub struct TestSession {
    pub session: Arc<ServerSession>,
    pub connection: Arc<LocalConnection>,
    pub sender: Arc<ChannelDeliverySender>,
    pub deliveries: mpsc::UnboundedReceiver<DeliveredMessage>,
}

impl TestSession {
    /// Everything pushed to the client so far
    pub fn drain(&mut self) -> Vec<DeliveredMessage> {
        let mut out = Vec::new();
        while let Ok(d) = self.deliveries.try_recv() {
            out.push(d);
        }
        out
    }

    /// Wait until `n` deliveries arrived, for deliveries made by the prompt
    /// thread
    pub fn wait_for(&mut self, n: usize) -> Vec<DeliveredMessage> {
        let deadline = Instant::now() + Duration::from_secs(5);
        let mut out = Vec::new();
        while out.len() < n && Instant::now() < deadline {
            match self.deliveries.try_recv() {
                Ok(d) => out.push(d),
                Err(_) => std::thread::sleep(Duration::from_millis(5)),
            }
        }
        out
    }
}

pub fn xid(branch: &str) -> Xid {
    Xid::new(1, "gtrid-1", branch).expect("xid")
}

/// Install a test subscriber once; honours RUST_LOG
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}
