//! Sorted collection kept in sync with a change feed.

use super::targets::{ChangeCallback, StreamTarget};
use crate::error::{Result, SyncError};
use crate::types::{ChangeEvent, Keyed, SyncState};
use std::cmp::Ordering;
use std::collections::HashMap;
use tracing::{debug, trace};

/// Predicate deciding whether a document belongs in the collection.
pub type Filter<T> = Box<dyn Fn(&T) -> bool + Send + Sync>;

/// Transform applied to documents at bootstrap.
pub type InitMap<T> = Box<dyn Fn(T) -> T + Send + Sync>;

/// Transform applied to changed documents; receives the stored previous
/// value when the document is already present.
pub type UpdateMap<T> = Box<dyn Fn(T, Option<&T>) -> T + Send + Sync>;

/// Total order over documents.
pub type Comparator<T> = Box<dyn Fn(&T, &T) -> Ordering + Send + Sync>;

/// Policy functions for a [`SortedCollectionSync`].
///
/// Everything is optional except `update_sort`, which orders the collection
/// while changes are applied. The `init_*` variants only run at bootstrap.
pub struct SyncConfig<T> {
    pub init_filter: Option<Filter<T>>,
    pub init_map: Option<InitMap<T>>,
    pub init_sort: Option<Comparator<T>>,
    pub update_filter: Option<Filter<T>>,
    pub update_map: Option<UpdateMap<T>>,
    pub update_sort: Comparator<T>,
}

impl<T> SyncConfig<T> {
    /// Config with only the (required) update comparator.
    pub fn new(update_sort: impl Fn(&T, &T) -> Ordering + Send + Sync + 'static) -> Self {
        Self {
            init_filter: None,
            init_map: None,
            init_sort: None,
            update_filter: None,
            update_map: None,
            update_sort: Box::new(update_sort),
        }
    }

    pub fn with_init_filter(mut self, f: impl Fn(&T) -> bool + Send + Sync + 'static) -> Self {
        self.init_filter = Some(Box::new(f));
        self
    }

    pub fn with_init_map(mut self, f: impl Fn(T) -> T + Send + Sync + 'static) -> Self {
        self.init_map = Some(Box::new(f));
        self
    }

    pub fn with_init_sort(
        mut self,
        f: impl Fn(&T, &T) -> Ordering + Send + Sync + 'static,
    ) -> Self {
        self.init_sort = Some(Box::new(f));
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
}

impl<T: 'static> SyncConfig<T> {
    /// Use the same filter at bootstrap and for changes.
    pub fn with_filter(self, f: impl Fn(&T) -> bool + Clone + Send + Sync + 'static) -> Self {
        self.with_init_filter(f.clone()).with_update_filter(f)
    }

    /// Use the same comparator at bootstrap and for changes.
    pub fn with_sort(self, f: impl Fn(&T, &T) -> Ordering + Clone + Send + Sync + 'static) -> Self {
        let mut config = self.with_init_sort(f.clone());
        config.update_sort = Box::new(f);
        config
    }
}

/// Decide whether a change event removes its document.
///
/// A change counts as a deletion if the feed says so, if it carries no
/// document, or if the document no longer passes the update filter.
pub(crate) fn resolves_deleted<T>(event: &ChangeEvent<T>, filter: Option<&Filter<T>>) -> bool {
    match &event.doc {
        _ if event.deleted => true,
        None => true,
        Some(doc) => filter.map_or(false, |f| !f(doc)),
    }
}

/// Documents staged for the insertion pass, in staging order.
struct Staged<T> {
    slots: Vec<Option<T>>,
    by_id: HashMap<String, usize>,
}

impl<T: Keyed> Staged<T> {
    fn new() -> Self {
        Self {
            slots: Vec::new(),
            by_id: HashMap::new(),
        }
    }

    fn get(&self, id: &str) -> Option<&T> {
        self.by_id.get(id).and_then(|&i| self.slots[i].as_ref())
    }

    fn put(&mut self, doc: T) {
        match self.by_id.get(doc.key()) {
            Some(&i) => self.slots[i] = Some(doc),
            None => {
                self.by_id.insert(doc.key().to_string(), self.slots.len());
                self.slots.push(Some(doc));
            }
        }
    }

    fn discard(&mut self, id: &str) {
        if let Some(i) = self.by_id.remove(id) {
            self.slots[i] = None;
        }
    }

    fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }
}

/// An ordered view over a document collection.
///
/// The collection is bootstrapped once from a snapshot and then kept current
/// by [`apply_changes`](Self::apply_changes). Stream targets receive the
/// minimal edits needed to follow along; change callbacks receive the full
/// sequence after every bootstrap and batch.
pub struct SortedCollectionSync<T> {
    config: SyncConfig<T>,
    state: SyncState,
    items: Vec<T>,
    /// id -> position in `items`.
    index: HashMap<String, usize>,
    callbacks: Vec<ChangeCallback<T>>,
    targets: Vec<Box<dyn StreamTarget<T>>>,
}

impl<T: Keyed + Clone> SortedCollectionSync<T> {
    /// Create an empty collection in the `Reset` state.
    pub fn new(config: SyncConfig<T>) -> Self {
        Self {
            config,
            state: SyncState::Reset,
            items: Vec::new(),
            index: HashMap::new(),
            callbacks: Vec::new(),
            targets: Vec::new(),
        }
    }

    pub fn state(&self) -> SyncState {
        self.state
    }

    pub fn is_ready(&self) -> bool {
        self.state == SyncState::Ready
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Current contents, in order.
    pub fn items(&self) -> &[T] {
        &self.items
    }

    /// Owned copy of the current contents.
    pub fn snapshot(&self) -> Vec<T> {
        self.items.clone()
    }

    pub fn position(&self, id: &str) -> Option<usize> {
        self.index.get(id).copied()
    }

    pub fn get(&self, id: &str) -> Option<&T> {
        self.position(id).map(|pos| &self.items[pos])
    }

    /// Load the initial contents.
    ///
    /// Applies the initial filter and map (each if configured), sorts with
    /// `init_sort` or else `update_sort`, then pushes the result to every
    /// callback and target.
    pub fn bootstrap(&mut self, items: impl IntoIterator<Item = T>) -> Result<()> {
        if self.state != SyncState::Reset {
            return Err(SyncError::InvalidState {
                operation: "bootstrap",
                state: self.state,
            });
        }

        let mut data: Vec<T> = match &self.config.init_filter {
            Some(filter) => items.into_iter().filter(|doc| filter(doc)).collect(),
            None => items.into_iter().collect(),
        };

        if let Some(map) = &self.config.init_map {
            data = data.into_iter().map(|doc| map(doc)).collect();
        }

        let sort = self.config.init_sort.as_ref().unwrap_or(&self.config.update_sort);
        data.sort_by(|a, b| sort(a, b));

        self.items = data;
        self.reindex_from(0);
        self.state = SyncState::Ready;
        trace!(len = self.items.len(), "sorted collection bootstrapped");

        for cb in self.callbacks.iter_mut() {
            cb(&self.items);
        }
        for target in self.targets.iter_mut() {
            target.init(&self.items);
        }

        Ok(())
    }

    /// Apply a batch of changes.
    ///
    /// Deletions and modifications are handled first, one event at a time in
    /// batch order. Modified documents that still sort between their
    /// neighbours are replaced in place; everything else is staged and
    /// inserted in a second pass after a resort.
    pub fn apply_changes(&mut self, batch: &[ChangeEvent<T>]) -> Result<()> {
        if self.state != SyncState::Ready {
            return Err(SyncError::NotReady(self.state));
        }

        let mut staged = Staged::new();

        for event in batch {
            if resolves_deleted(event, self.config.update_filter.as_ref()) {
                if let Some(pos) = self.position(&event.id) {
                    self.remove_at(pos);
                }
                staged.discard(&event.id);
                continue;
            }

            let Some(raw) = event.doc.clone() else {
                continue;
            };

            if let Some(prev) = staged.get(&event.id) {
                let doc = self.map_update(raw, Some(prev));
                staged.put(doc);
                continue;
            }

            match self.position(&event.id) {
                None => {
                    let doc = self.map_update(raw, None);
                    staged.put(doc);
                }
                Some(pos) => {
                    let doc = self.map_update(raw, Some(&self.items[pos]));
                    if self.fits_between_neighbours(pos, &doc) {
                        for target in self.targets.iter_mut() {
                            target.set(pos, &doc);
                        }
                        self.items[pos] = doc;
                    } else {
                        self.remove_at(pos);
                        staged.put(doc);
                    }
                }
            }
        }

        if !staged.is_empty() {
            self.insert_staged(staged);
        }

        for cb in self.callbacks.iter_mut() {
            cb(&self.items);
        }

        Ok(())
    }

    /// Register a full-snapshot callback; called immediately if ready.
    pub fn add_change_callback(&mut self, mut cb: ChangeCallback<T>) {
        if self.state == SyncState::Ready {
            cb(&self.items);
        }
        self.callbacks.push(cb);
    }

    /// Register a stream target; initialised immediately if ready.
    pub fn add_stream_target(&mut self, mut target: Box<dyn StreamTarget<T>>) {
        if self.state == SyncState::Ready {
            target.init(&self.items);
        }
        self.targets.push(target);
    }

    /// Drop all contents and registrations and return to `Reset`.
    ///
    /// A ready collection first tells its consumers it is now empty.
    pub fn reset(&mut self) {
        if self.state == SyncState::Ready {
            for cb in self.callbacks.iter_mut() {
                cb(&[]);
            }
            for target in self.targets.iter_mut() {
                target.clear();
            }
        }

        self.items.clear();
        self.index.clear();
        self.callbacks.clear();
        self.targets.clear();
        self.state = SyncState::Reset;
    }

    fn map_update(&self, doc: T, prev: Option<&T>) -> T {
        match &self.config.update_map {
            Some(map) => map(doc, prev),
            None => doc,
        }
    }

    /// True if `doc` sorts strictly between the neighbours of `pos`.
    ///
    /// A missing neighbour places no constraint on that side.
    fn fits_between_neighbours(&self, pos: usize, doc: &T) -> bool {
        let cmp = &self.config.update_sort;
        let left_ok = match pos.checked_sub(1) {
            Some(left) => cmp(&self.items[left], doc) == Ordering::Less,
            None => true,
        };
        let right_ok = match self.items.get(pos + 1) {
            Some(right) => cmp(doc, right) == Ordering::Less,
            None => true,
        };
        left_ok && right_ok
    }

    fn remove_at(&mut self, pos: usize) {
        let removed = self.items.remove(pos);
        self.index.remove(removed.key());
        self.reindex_from(pos);
        for target in self.targets.iter_mut() {
            target.remove(pos);
        }
    }

    fn insert_staged(&mut self, staged: Staged<T>) {
        let inserted: HashMap<String, usize> = staged.by_id;
        let cmp = &self.config.update_sort;

        // Existing items keep their relative order through the stable sort
        // only if they are already ordered by `update_sort`.
        let ordered = self
            .items
            .windows(2)
            .all(|pair| cmp(&pair[0], &pair[1]) != Ordering::Greater);

        self.items.extend(staged.slots.into_iter().flatten());
        self.items.sort_by(|a, b| cmp(a, b));

        if !ordered {
            debug!(
                len = self.items.len(),
                "collection reordered by update sort, reinitialising targets"
            );
            self.reindex_from(0);
            for target in self.targets.iter_mut() {
                target.init(&self.items);
            }
            return;
        }

        let mut first = None;
        for (pos, doc) in self.items.iter().enumerate() {
            if inserted.contains_key(doc.key()) {
                first.get_or_insert(pos);
                for target in self.targets.iter_mut() {
                    target.insert(pos, doc);
                }
            }
        }

        if let Some(first) = first {
            self.reindex_from(first);
        }
        trace!(inserted = inserted.len(), len = self.items.len(), "staged documents inserted");
    }

    /// Rebuild the index for every position from `start` onwards.
    fn reindex_from(&mut self, start: usize) {
        if start == 0 {
            self.index.clear();
        }
        for (pos, doc) in self.items.iter().enumerate().skip(start) {
            self.index.insert(doc.key().to_string(), pos);
        }
    }
}
