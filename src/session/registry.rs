//! Concurrent id-keyed registries for a session's consumers and browsers

use dashmap::DashMap;
use std::sync::Arc;

/// Handlers owned by a session, keyed by id.
///
/// Creation, lookup and removal can race with teardown, so teardown works on
/// a [`Registry::snapshot`] instead of iterating the live map.
pub struct Registry<T: ?Sized> {
    entries: DashMap<String, Arc<T>>,
}

impl<T: ?Sized> Registry<T> {
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
        }
    }

    /// Returns the previous entry with the same id, if any
    pub fn insert(&self, id: impl Into<String>, entry: Arc<T>) -> Option<Arc<T>> {
        self.entries.insert(id.into(), entry)
    }

    pub fn get(&self, id: &str) -> Option<Arc<T>> {
        self.entries.get(id).map(|e| Arc::clone(e.value()))
    }

    pub fn remove(&self, id: &str) -> Option<Arc<T>> {
        self.entries.remove(id).map(|(_, entry)| entry)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.entries.contains_key(id)
    }

    /// Copy of the current entries
    pub fn snapshot(&self) -> Vec<Arc<T>> {
        self.entries.iter().map(|e| Arc::clone(e.value())).collect()
    }

    pub fn ids(&self) -> Vec<String> {
        self.entries.iter().map(|e| e.key().clone()).collect()
    }

    pub fn clear(&self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<T: ?Sized> Default for Registry<T> {
    fn default() -> Self {
        Self::new()
    }
}
