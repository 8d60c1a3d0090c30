//! Per-track sub-collections of an item and the keyed set holding them.

use super::policy::{TrackKey, TrackKind};
use crate::collections::{
    ChangeCallback, SetCallback, SetTarget, SortedCollectionSync, StreamTarget, SyncConfig,
};
use crate::error::Result;
use crate::types::{ChangeEvent, Document, SyncState};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tracing::trace;

/// Handle to one track's sorted collection.
///
/// Clones share the same collection.
#[derive(Clone)]
pub struct Track {
    key: TrackKey,
    sync: Arc<Mutex<SortedCollectionSync<Document>>>,
}

impl fmt::Debug for Track {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Track")
            .field("name", &self.key.name)
            .field("kind", &self.key.kind)
            .field("len", &self.len())
            .finish()
    }
}

impl Track {
    pub(crate) fn new(key: TrackKey, config: SyncConfig<Document>) -> Self {
        Self {
            key,
            sync: Arc::new(Mutex::new(SortedCollectionSync::new(config))),
        }
    }

    pub fn key(&self) -> &TrackKey {
        &self.key
    }

    pub fn name(&self) -> &str {
        &self.key.name
    }

    pub fn kind(&self) -> TrackKind {
        self.key.kind
    }

    pub fn state(&self) -> SyncState {
        self.sync.lock().state()
    }

    pub fn len(&self) -> usize {
        self.sync.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Current contents, in order.
    pub fn documents(&self) -> Vec<Document> {
        self.sync.lock().snapshot()
    }

    pub fn add_stream_target(&self, target: Box<dyn StreamTarget<Document>>) {
        self.sync.lock().add_stream_target(target);
    }

    pub fn add_change_callback(&self, cb: ChangeCallback<Document>) {
        self.sync.lock().add_change_callback(cb);
    }

    /// True if both handles point at the same collection.
    pub fn same_as(&self, other: &Track) -> bool {
        Arc::ptr_eq(&self.sync, &other.sync)
    }

    pub(crate) fn bootstrap(&self, docs: Vec<Document>) -> Result<()> {
        self.sync.lock().bootstrap(docs)
    }

    /// Tracks not bootstrapped yet skip batches; their snapshot comes later.
    pub(crate) fn apply_changes(&self, events: &[ChangeEvent]) -> Result<()> {
        let mut sync = self.sync.lock();
        if !sync.is_ready() {
            trace!(
                track = %self.key.name,
                events = events.len(),
                "batch skipped, track not ready"
            );
            return Ok(());
        }
        sync.apply_changes(events)
    }

    pub(crate) fn reset(&self) {
        self.sync.lock().reset();
    }
}

/// Keys added and removed by one reconciliation.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct TrackDelta {
    pub added: Vec<TrackKey>,
    pub removed: Vec<TrackKey>,
}

impl TrackDelta {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty()
    }
}

/// The set of tracks of one item, keyed by track name.
pub struct TrackSet {
    tracks: HashMap<String, Track>,
    callbacks: Vec<SetCallback<Track>>,
    targets: Vec<Box<dyn SetTarget<Track>>>,
}

impl TrackSet {
    pub fn new() -> Self {
        Self {
            tracks: HashMap::new(),
            callbacks: Vec::new(),
            targets: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.tracks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tracks.is_empty()
    }

    pub fn get(&self, name: &str) -> Option<&Track> {
        self.tracks.get(name)
    }

    /// Track names, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tracks.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn tracks(&self) -> impl Iterator<Item = &Track> {
        self.tracks.values()
    }

    pub fn snapshot(&self) -> HashMap<String, Track> {
        self.tracks.clone()
    }

    /// Bring the set in line with `keys`.
    ///
    /// Tracks whose name disappeared (or whose kind changed) are reset and
    /// dropped; `make` builds a track for every new key. Set targets get one
    /// `remove` or `set` per affected name, then callbacks get the full map.
    pub fn reconcile(
        &mut self,
        keys: Vec<TrackKey>,
        mut make: impl FnMut(&TrackKey) -> Track,
    ) -> TrackDelta {
        let wanted: HashMap<String, TrackKey> =
            keys.into_iter().map(|k| (k.name.clone(), k)).collect();

        let mut delta = TrackDelta::default();

        let stale: Vec<String> = self
            .tracks
            .iter()
            .filter(|(name, track)| wanted.get(*name) != Some(&track.key))
            .map(|(name, _)| name.clone())
            .collect();
        for name in &stale {
            if let Some(track) = self.tracks.remove(name) {
                track.reset();
                delta.removed.push(track.key);
            }
        }

        let mut added: Vec<&TrackKey> = wanted
            .values()
            .filter(|k| !self.tracks.contains_key(&k.name))
            .collect();
        added.sort_by(|a, b| a.name.cmp(&b.name));
        for key in added {
            self.tracks.insert(key.name.clone(), make(key));
            delta.added.push(key.clone());
        }

        if delta.is_empty() {
            return delta;
        }

        for target in self.targets.iter_mut() {
            for key in &delta.removed {
                if !self.tracks.contains_key(&key.name) {
                    target.remove(&key.name);
                }
            }
            for key in &delta.added {
                if let Some(track) = self.tracks.get(&key.name) {
                    target.set(&key.name, track);
                }
            }
        }
        for cb in self.callbacks.iter_mut() {
            cb(&self.tracks);
        }

        delta
    }

    /// Register a set target; it is initialised with the current map.
    pub fn add_set_target(&mut self, mut target: Box<dyn SetTarget<Track>>) {
        target.init(&self.tracks);
        self.targets.push(target);
    }

    /// Register a set callback; it is called with the current map.
    pub fn add_set_callback(&mut self, mut cb: SetCallback<Track>) {
        cb(&self.tracks);
        self.callbacks.push(cb);
    }

    /// Reset every track's collection, keeping membership and registrations.
    pub fn reset_tracks(&self) {
        for track in self.tracks.values() {
            track.reset();
        }
    }

    /// Tear down every track and drop all registrations.
    pub fn clear(&mut self) {
        for track in self.tracks.values() {
            track.reset();
        }
        self.tracks.clear();
        for target in self.targets.iter_mut() {
            target.clear();
        }
        for cb in self.callbacks.iter_mut() {
            cb(&self.tracks);
        }
        self.targets.clear();
        self.callbacks.clear();
    }
}

impl Default for TrackSet {
    fn default() -> Self {
        Self::new()
    }
}
