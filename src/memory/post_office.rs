//! In-memory address table and router

use crate::collaborators::{Binding, PostOffice};
use crate::error::{MessagingError, Result};
use crate::memory::MemoryQueue;
use crate::message::{Filter, Message, MessageReference};
use dashmap::{DashMap, DashSet};
use std::sync::Arc;

/// Routes every message sent to an address to all queues bound to it
#[derive(Default)]
pub struct InMemoryPostOffice {
    addresses: DashSet<String>,
    bindings: DashMap<String, Binding>,
}

impl InMemoryPostOffice {
    pub fn new() -> Self {
        Self::default()
    }

    /// Concrete queue behind a binding, for inspection
    pub fn queue(&self, queue_name: &str) -> Option<Arc<dyn crate::collaborators::Queue>> {
        self.bindings.get(queue_name).map(|b| Arc::clone(&b.queue))
    }
}

impl PostOffice for InMemoryPostOffice {
    fn contains_allowable_address(&self, address: &str) -> bool {
        self.addresses.contains(address)
    }

    fn add_allowable_address(&self, address: &str) -> bool {
        self.addresses.insert(address.to_string())
    }

    fn remove_allowable_address(&self, address: &str) -> bool {
        self.addresses.remove(address).is_some()
    }

    fn route(&self, address: &str, message: &Arc<Message>) -> Result<Vec<Arc<MessageReference>>> {
        Ok(self
            .bindings
            .iter()
            .filter(|b| b.address == address)
            .map(|b| MessageReference::new(Arc::clone(message), Arc::clone(&b.queue)))
            .collect())
    }

    fn get_binding(&self, queue_name: &str) -> Option<Binding> {
        self.bindings.get(queue_name).map(|b| b.clone())
    }

    fn add_binding(
        &self,
        address: &str,
        queue_name: &str,
        filter: Option<Filter>,
        durable: bool,
        temporary: bool,
    ) -> Result<Binding> {
        match self.bindings.entry(queue_name.to_string()) {
            dashmap::mapref::entry::Entry::Occupied(_) => {
                Err(MessagingError::QueueExists(queue_name.to_string()).into())
            }
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                let binding = Binding {
                    address: address.to_string(),
                    queue: Arc::new(MemoryQueue::new(queue_name, durable, temporary, filter)),
                };
                slot.insert(binding.clone());
                Ok(binding)
            }
        }
    }

    fn remove_binding(&self, queue_name: &str) -> Option<Binding> {
        self.bindings.remove(queue_name).map(|(_, b)| b)
    }

    fn bindings_for_address(&self, address: &str) -> Vec<Binding> {
        let mut bindings: Vec<Binding> = self
            .bindings
            .iter()
            .filter(|b| b.address == address)
            .map(|b| b.clone())
            .collect();
        bindings.sort_by(|a, b| a.queue.name().cmp(b.queue.name()));
        bindings
    }
}
