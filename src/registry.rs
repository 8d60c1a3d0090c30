//! Registry of live subordinate managers.

use crate::types::ChangeBatch;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::trace;

/// A nested manager that follows the parent's change stream.
pub trait Subordinate: Send + Sync {
    /// Key the manager is registered under.
    fn key(&self) -> &str;

    /// Receive a batch from the parent subscription.
    fn apply_batch(&self, batch: &ChangeBatch);
}

/// Tracks which subordinates should receive the parent's batches.
pub struct SubordinateRegistry {
    members: RwLock<HashMap<String, Arc<dyn Subordinate>>>,
}

impl SubordinateRegistry {
    pub fn new() -> Self {
        Self {
            members: RwLock::new(HashMap::new()),
        }
    }

    /// Register a subordinate, replacing any previous one with the same key.
    pub fn register(&self, member: Arc<dyn Subordinate>) {
        let key = member.key().to_string();
        trace!(key = %key, "subordinate registered");
        self.members.write().insert(key, member);
    }

    /// Remove the subordinate registered under `key`, if any.
    pub fn unregister(&self, key: &str) -> bool {
        let removed = self.members.write().remove(key).is_some();
        if removed {
            trace!(key, "subordinate unregistered");
        }
        removed
    }

    pub fn contains(&self, key: &str) -> bool {
        self.members.read().contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.members.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Registered keys, sorted.
    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.members.read().keys().cloned().collect();
        keys.sort();
        keys
    }

    /// Deliver `batch` to every registered subordinate, then to the top level.
    ///
    /// Members are collected before delivery, so a subordinate may register
    /// or unregister while handling the batch.
    pub fn fan_out<R>(&self, batch: &ChangeBatch, top_level: impl FnOnce(&ChangeBatch) -> R) -> R {
        let members: Vec<Arc<dyn Subordinate>> = self.members.read().values().cloned().collect();
        for member in members {
            member.apply_batch(batch);
        }
        top_level(batch)
    }
}

impl Default for SubordinateRegistry {
    fn default() -> Self {
        Self::new()
    }
}
