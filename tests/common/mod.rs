//! Shared fixtures for the integration tests.
#![allow(dead_code)]

use docsync::{
    BatchHandler, ChangeBatch, ChangeFeed, Cursor, Document, ItemPolicy, Reply, Result,
    StoreConfig, Subscription, SubscriptionId, SyncConfig, TrackKey, TrackKind,
};
use parking_lot::Mutex;
use serde_json::json;
use std::cmp::Ordering;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

// --- Documents ---

pub fn flight(id: &str, launch: f64) -> Document {
    Document::new(id, json!({"type": "flight", "launch": launch, "tracks": []}))
}

pub fn flight_with_tracks(id: &str, launch: f64, tracks: &[(&str, bool)]) -> Document {
    let tracks: Vec<serde_json::Value> = tracks
        .iter()
        .map(|(name, chaser)| json!({"name": name, "chaser": chaser}))
        .collect();
    Document::new(
        id,
        json!({"type": "flight", "launch": launch, "tracks": tracks}),
    )
}

pub fn telemetry(id: &str, flight: &str, track: &str, t: f64) -> Document {
    Document::new(
        id,
        json!({"type": "telemetry", "flight": flight, "track": track, "t": t}),
    )
}

pub fn meta(id: &str, flight: &str, name: &str) -> Document {
    Document::new(id, json!({"type": "meta", "flight": flight, "name": name}))
}

pub fn ids(docs: &[Document]) -> Vec<String> {
    docs.iter().map(|d| d.id.clone()).collect()
}

pub fn by_launch(a: &Document, b: &Document) -> Ordering {
    let a = a.f64_at("/launch").unwrap_or(0.0);
    let b = b.f64_at("/launch").unwrap_or(0.0);
    a.total_cmp(&b)
}

pub fn by_time(a: &Document, b: &Document) -> Ordering {
    let a = a.f64_at("/t").unwrap_or(0.0);
    let b = b.f64_at("/t").unwrap_or(0.0);
    a.total_cmp(&b)
}

pub fn flight_sync() -> SyncConfig<Document> {
    SyncConfig::new(by_launch)
        .with_init_sort(by_launch)
        .with_filter(|d: &Document| d.doc_type() == Some("flight"))
}

/// Scope function for a feed holding flights and their documents.
pub fn flight_scope(doc: &Document) -> Vec<String> {
    doc.str_field("flight")
        .map(|f| vec![f.to_string()])
        .unwrap_or_default()
}

// --- Item policy ---

/// Telemetry ordered by time, `meta` documents as auxiliary lookups and one
/// track per entry of the flight's `tracks` list.
pub struct FlightPolicy;

impl ItemPolicy for FlightPolicy {
    fn in_scope(&self, item_key: &str, doc: &Document) -> bool {
        doc.str_field("flight") == Some(item_key)
    }

    fn telemetry(&self, _item_key: &str) -> SyncConfig<Document> {
        SyncConfig::new(by_time)
            .with_init_sort(by_time)
            .with_filter(|d: &Document| d.doc_type() == Some("telemetry"))
    }

    fn auxiliary(&self, _item_key: &str) -> StoreConfig<Document> {
        StoreConfig::new().with_filter(|d: &Document| d.doc_type() == Some("meta"))
    }

    fn tracks(&self, item: &Document) -> Vec<TrackKey> {
        let Some(list) = item.pointer("/tracks").and_then(|v| v.as_array()) else {
            return Vec::new();
        };
        list.iter()
            .filter_map(|entry| {
                let name = entry.get("name")?.as_str()?;
                let chaser = entry.get("chaser").and_then(|v| v.as_bool()).unwrap_or(false);
                Some(if chaser {
                    TrackKey::chaser(name)
                } else {
                    TrackKey::primary(name)
                })
            })
            .collect()
    }

    fn track(&self, _item_key: &str, track: &TrackKey) -> SyncConfig<Document> {
        let name = track.name.clone();
        let variant = match track.kind {
            TrackKind::Primary => "primary",
            TrackKind::Chaser => "chaser",
        };
        let tag = move |mut doc: Document| {
            doc.body["variant"] = json!(variant);
            doc
        };
        let tag_update = tag.clone();
        SyncConfig::new(by_time)
            .with_init_sort(by_time)
            .with_filter(move |d: &Document| {
                d.doc_type() == Some("telemetry") && d.str_field("track") == Some(name.as_str())
            })
            .with_init_map(tag)
            .with_update_map(move |doc: Document, _prev: Option<&Document>| tag_update(doc))
    }
}

// --- Manually driven feed ---

struct ManualState {
    cursors: VecDeque<Reply<Cursor>>,
    snapshots: VecDeque<(Option<String>, Reply<Vec<Document>>)>,
    subscribers: HashMap<u64, (Cursor, BatchHandler)>,
    next_id: u64,
    refuse_subscribe: bool,
}

/// A feed whose replies are resolved by the test, in any order.
#[derive(Clone)]
pub struct ManualFeed {
    state: Arc<Mutex<ManualState>>,
}

impl ManualFeed {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(ManualState {
                cursors: VecDeque::new(),
                snapshots: VecDeque::new(),
                subscribers: HashMap::new(),
                next_id: 1,
                refuse_subscribe: false,
            })),
        }
    }

    pub fn pending_cursors(&self) -> usize {
        self.state.lock().cursors.len()
    }

    pub fn pending_snapshots(&self) -> usize {
        self.state.lock().snapshots.len()
    }

    /// Scope of every outstanding snapshot request, oldest first.
    pub fn snapshot_scopes(&self) -> Vec<Option<String>> {
        self.state
            .lock()
            .snapshots
            .iter()
            .map(|(scope, _)| scope.clone())
            .collect()
    }

    /// Resolve the oldest cursor request. Returns false if none is pending.
    pub fn resolve_cursor(&self, result: Result<Cursor>) -> bool {
        let reply = self.state.lock().cursors.pop_front();
        match reply {
            Some(reply) => {
                reply(result);
                true
            }
            None => false,
        }
    }

    /// Resolve the oldest snapshot request. Returns false if none is pending.
    pub fn resolve_snapshot(&self, result: Result<Vec<Document>>) -> bool {
        let reply = self.state.lock().snapshots.pop_front();
        match reply {
            Some((_, reply)) => {
                reply(result);
                true
            }
            None => false,
        }
    }

    /// Cursors of the live subscriptions.
    pub fn subscriptions(&self) -> Vec<Cursor> {
        self.state.lock().subscribers.values().map(|(c, _)| *c).collect()
    }

    pub fn refuse_subscribe(&self, refuse: bool) {
        self.state.lock().refuse_subscribe = refuse;
    }

    /// Deliver a batch to every live subscription.
    pub fn push(&self, batch: ChangeBatch) {
        let handlers: Vec<BatchHandler> = self
            .state
            .lock()
            .subscribers
            .values()
            .map(|(_, h)| Arc::clone(h))
            .collect();
        for handler in handlers {
            handler(batch.clone());
        }
    }
}

impl ChangeFeed for ManualFeed {
    fn cursor(&self, reply: Reply<Cursor>) {
        self.state.lock().cursors.push_back(reply);
    }

    fn snapshot(&self, scope: Option<&str>, reply: Reply<Vec<Document>>) {
        self.state
            .lock()
            .snapshots
            .push_back((scope.map(str::to_string), reply));
    }

    fn subscribe(&self, from: Cursor, handler: BatchHandler) -> Result<Box<dyn Subscription>> {
        let mut state = self.state.lock();
        if state.refuse_subscribe {
            return Err(docsync::SyncError::Feed("subscribe refused".to_string()));
        }
        let id = state.next_id;
        state.next_id += 1;
        state.subscribers.insert(id, (from, handler));
        Ok(Box::new(ManualSubscription {
            id,
            state: Arc::clone(&self.state),
        }))
    }
}

struct ManualSubscription {
    id: u64,
    state: Arc<Mutex<ManualState>>,
}

impl Subscription for ManualSubscription {
    fn id(&self) -> SubscriptionId {
        SubscriptionId(self.id)
    }

    fn stop(&mut self) {
        self.state.lock().subscribers.remove(&self.id);
    }
}
