//! Unordered keyed store for auxiliary lookups.

use super::sorted::{resolves_deleted, Filter, InitMap, UpdateMap};
use crate::error::{Result, SyncError};
use crate::types::{ChangeEvent, Keyed, SyncState};
use std::collections::HashMap;

/// Policy functions for an [`UnsortedKeyedStore`]. All optional.
pub struct StoreConfig<T> {
    pub init_filter: Option<Filter<T>>,
    pub init_map: Option<InitMap<T>>,
    pub update_filter: Option<Filter<T>>,
    pub update_map: Option<UpdateMap<T>>,
}

impl<T> Default for StoreConfig<T> {
    fn default() -> Self {
        Self {
            init_filter: None,
            init_map: None,
            update_filter: None,
            update_map: None,
        }
    }
}

impl<T> StoreConfig<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_init_filter(mut self, f: impl Fn(&T) -> bool + Send + Sync + 'static) -> Self {
        self.init_filter = Some(Box::new(f));
        self
    }

    pub fn with_init_map(mut self, f: impl Fn(T) -> T + Send + Sync + 'static) -> Self {
        self.init_map = Some(Box::new(f));
        self
    }

    pub fn with_update_filter(mut self, f: impl Fn(&T) -> bool + Send + Sync + 'static) -> Self {
        self.update_filter = Some(Box::new(f));
        self
    }

    pub fn with_update_map(
        mut self,
        f: impl Fn(T, Option<&T>) -> T + Send + Sync + 'static,
    ) -> Self {
        self.update_map = Some(Box::new(f));
        self
    }

    /// Use the same filter at bootstrap and for changes.
    pub fn with_filter(self, f: impl Fn(&T) -> bool + Clone + Send + Sync + 'static) -> Self {
        self.with_init_filter(f.clone()).with_update_filter(f)
    }
}

/// `id -> document` map kept current by change batches.
///
/// No ordering and no push targets: consumers look documents up when they
/// need them.
pub struct UnsortedKeyedStore<T> {
    config: StoreConfig<T>,
    state: SyncState,
    docs: HashMap<String, T>,
}

impl<T: Keyed + Clone> UnsortedKeyedStore<T> {
    pub fn new(config: StoreConfig<T>) -> Self {
        Self {
            config,
            state: SyncState::Reset,
            docs: HashMap::new(),
        }
    }

    pub fn state(&self) -> SyncState {
        self.state
    }

    pub fn is_ready(&self) -> bool {
        self.state == SyncState::Ready
    }

    pub fn get(&self, key: &str) -> Option<&T> {
        self.docs.get(key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.docs.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.docs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.docs.is_empty()
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.docs.keys().map(|k| k.as_str())
    }

    pub fn values(&self) -> impl Iterator<Item = &T> {
        self.docs.values()
    }

    /// Load the initial contents: filter, then map, then insert by key.
    pub fn bootstrap(&mut self, items: impl IntoIterator<Item = T>) -> Result<()> {
        if self.state != SyncState::Reset {
            return Err(SyncError::InvalidState {
                operation: "bootstrap",
                state: self.state,
            });
        }

        for doc in items {
            if let Some(filter) = &self.config.init_filter {
                if !filter(&doc) {
                    continue;
                }
            }
            let doc = match &self.config.init_map {
                Some(map) => map(doc),
                None => doc,
            };
            self.docs.insert(doc.key().to_string(), doc);
        }

        self.state = SyncState::Ready;
        Ok(())
    }

    /// Apply a batch of changes. Deleting an absent key is a no-op.
    pub fn apply_changes(&mut self, batch: &[ChangeEvent<T>]) -> Result<()> {
        if self.state != SyncState::Ready {
            return Err(SyncError::NotReady(self.state));
        }

        for event in batch {
            if resolves_deleted(event, self.config.update_filter.as_ref()) {
                self.docs.remove(&event.id);
                continue;
            }

            let Some(raw) = event.doc.clone() else {
                continue;
            };
            let doc = match &self.config.update_map {
                Some(map) => map(raw, self.docs.get(&event.id)),
                None => raw,
            };
            self.docs.insert(event.id.clone(), doc);
        }

        Ok(())
    }

    /// Drop everything and return to `Reset`. Idempotent.
    pub fn reset(&mut self) {
        self.docs.clear();
        self.state = SyncState::Reset;
    }
}
