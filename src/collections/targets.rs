//! Push targets: consumers of granular edits and full snapshots.

use crossbeam_channel::Sender;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::warn;

/// Called with the full current sequence after every change.
pub type ChangeCallback<T> = Box<dyn FnMut(&[T]) + Send>;

/// Called with the full current map after every set-level change.
pub type SetCallback<V> = Box<dyn FnMut(&HashMap<String, V>) + Send>;

/// A consumer kept in sync with an ordered collection through minimal edits.
///
/// Positions refer to the target's own view after all previous edits have
/// been applied, so replaying the edits in order onto a `Vec` reproduces the
/// collection exactly.
pub trait StreamTarget<T>: Send {
    /// Replace everything with `items`.
    fn init(&mut self, items: &[T]);

    fn insert(&mut self, pos: usize, item: &T);

    fn remove(&mut self, pos: usize);

    fn set(&mut self, pos: usize, item: &T);

    fn clear(&mut self);
}

/// A consumer kept in sync with a keyed set.
pub trait SetTarget<V>: Send {
    fn init(&mut self, map: &HashMap<String, V>);

    fn set(&mut self, key: &str, value: &V);

    fn remove(&mut self, key: &str);

    fn clear(&mut self);
}

/// One edit pushed to a stream target.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum StreamEdit<T> {
    Init { items: Vec<T> },
    Insert { pos: usize, item: T },
    Remove { pos: usize },
    Set { pos: usize, item: T },
    Clear,
}

impl<T: Clone> StreamEdit<T> {
    /// Apply this edit to a plain vector.
    ///
    /// Returns false, leaving `items` untouched, if the position is out of
    /// range for the vector.
    pub fn apply_to(&self, items: &mut Vec<T>) -> bool {
        match self {
            StreamEdit::Init { items: new } => {
                items.clear();
                items.extend(new.iter().cloned());
            }
            StreamEdit::Insert { pos, item } if *pos <= items.len() => {
                items.insert(*pos, item.clone())
            }
            StreamEdit::Remove { pos } if *pos < items.len() => {
                items.remove(*pos);
            }
            StreamEdit::Set { pos, item } if *pos < items.len() => items[*pos] = item.clone(),
            StreamEdit::Clear => items.clear(),
            StreamEdit::Insert { pos, .. }
            | StreamEdit::Remove { pos }
            | StreamEdit::Set { pos, .. } => {
                warn!(pos, len = items.len(), "stream edit out of range, skipped");
                return false;
            }
        }
        true
    }
}

/// Forwards every edit as a channel message.
impl<T: Clone + Send> StreamTarget<T> for Sender<StreamEdit<T>> {
    fn init(&mut self, items: &[T]) {
        let _ = self.send(StreamEdit::Init {
            items: items.to_vec(),
        });
    }

    fn insert(&mut self, pos: usize, item: &T) {
        let _ = self.send(StreamEdit::Insert {
            pos,
            item: item.clone(),
        });
    }

    fn remove(&mut self, pos: usize) {
        let _ = self.send(StreamEdit::Remove { pos });
    }

    fn set(&mut self, pos: usize, item: &T) {
        let _ = self.send(StreamEdit::Set {
            pos,
            item: item.clone(),
        });
    }

    fn clear(&mut self) {
        let _ = self.send(StreamEdit::Clear);
    }
}

#[derive(Debug)]
struct MirrorState<T> {
    items: Vec<T>,
    edits: Vec<StreamEdit<T>>,
}

/// A stream target that replays edits onto its own vector.
///
/// Clones share the same mirror, so one clone can be registered while
/// another is kept for reading.
#[derive(Debug)]
pub struct MirrorTarget<T> {
    inner: Arc<Mutex<MirrorState<T>>>,
}

impl<T> Clone for MirrorTarget<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: Clone> MirrorTarget<T> {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(MirrorState {
                items: Vec::new(),
                edits: Vec::new(),
            })),
        }
    }

    /// Current mirrored contents.
    pub fn items(&self) -> Vec<T> {
        self.inner.lock().items.clone()
    }

    /// Every edit applied so far, oldest first. Out-of-range edits are
    /// logged and left out.
    pub fn edits(&self) -> Vec<StreamEdit<T>> {
        self.inner.lock().edits.clone()
    }

    /// Drain the edit log, keeping the mirrored contents.
    pub fn take_edits(&self) -> Vec<StreamEdit<T>> {
        std::mem::take(&mut self.inner.lock().edits)
    }

    fn record(&self, edit: StreamEdit<T>) {
        let mut state = self.inner.lock();
        if edit.apply_to(&mut state.items) {
            state.edits.push(edit);
        }
    }
}

impl<T: Clone> Default for MirrorTarget<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Clone + Send> StreamTarget<T> for MirrorTarget<T> {
    fn init(&mut self, items: &[T]) {
        self.record(StreamEdit::Init {
            items: items.to_vec(),
        });
    }

    fn insert(&mut self, pos: usize, item: &T) {
        self.record(StreamEdit::Insert {
            pos,
            item: item.clone(),
        });
    }

    fn remove(&mut self, pos: usize) {
        self.record(StreamEdit::Remove { pos });
    }

    fn set(&mut self, pos: usize, item: &T) {
        self.record(StreamEdit::Set {
            pos,
            item: item.clone(),
        });
    }

    fn clear(&mut self) {
        self.record(StreamEdit::Clear);
    }
}

/// One edit pushed to a set target.
#[derive(Clone, Debug, PartialEq)]
pub enum SetEdit {
    Init(Vec<String>),
    Set(String),
    Remove(String),
    Clear,
}

#[derive(Debug)]
struct SetMirrorState<V> {
    map: HashMap<String, V>,
    edits: Vec<SetEdit>,
}

/// A set target that mirrors the map and logs edits by key.
#[derive(Debug)]
pub struct SetMirror<V> {
    inner: Arc<Mutex<SetMirrorState<V>>>,
}

impl<V> Clone for SetMirror<V> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<V: Clone> SetMirror<V> {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(SetMirrorState {
                map: HashMap::new(),
                edits: Vec::new(),
            })),
        }
    }

    /// Mirrored keys, sorted.
    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.inner.lock().map.keys().cloned().collect();
        keys.sort();
        keys
    }

    pub fn get(&self, key: &str) -> Option<V> {
        self.inner.lock().map.get(key).cloned()
    }

    pub fn edits(&self) -> Vec<SetEdit> {
        self.inner.lock().edits.clone()
    }

    pub fn take_edits(&self) -> Vec<SetEdit> {
        std::mem::take(&mut self.inner.lock().edits)
    }
}

impl<V: Clone> Default for SetMirror<V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<V: Clone + Send> SetTarget<V> for SetMirror<V> {
    fn init(&mut self, map: &HashMap<String, V>) {
        let mut state = self.inner.lock();
        state.map = map.clone();
        let mut keys: Vec<String> = map.keys().cloned().collect();
        keys.sort();
        state.edits.push(SetEdit::Init(keys));
    }

    fn set(&mut self, key: &str, value: &V) {
        let mut state = self.inner.lock();
        state.map.insert(key.to_string(), value.clone());
        state.edits.push(SetEdit::Set(key.to_string()));
    }

    fn remove(&mut self, key: &str) {
        let mut state = self.inner.lock();
        state.map.remove(key);
        state.edits.push(SetEdit::Remove(key.to_string()));
    }

    fn clear(&mut self) {
        let mut state = self.inner.lock();
        state.map.clear();
        state.edits.push(SetEdit::Clear);
    }
}
