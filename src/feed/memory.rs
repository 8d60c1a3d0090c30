//! In-process change feed backed by an append-only log.

use super::event_loop::EventLoop;
use super::types::{
    BatchHandler, ChangeFeed, FeedConfig, Reply, Subscription, SubscriptionId,
};
use crate::error::{Result, SyncError};
use crate::types::{ChangeBatch, ChangeEvent, Cursor, Document};
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tracing::{debug, trace};

/// Emits the keys a document is indexed under for scoped snapshots.
pub type ScopeFn = Arc<dyn Fn(&Document) -> Vec<String> + Send + Sync>;

/// A single write to the feed.
#[derive(Clone, Debug, PartialEq)]
pub enum Write {
    Put(Document),
    Delete(String),
}

/// Internal subscription state.
struct Subscriber {
    handler: BatchHandler,
    /// Everything up to and including this sequence has been handed out.
    delivered: Cursor,
    /// A delivery task is already queued.
    scheduled: bool,
}

struct FeedState {
    head: Cursor,
    docs: BTreeMap<String, Document>,
    /// `log[i]` holds the change committed at sequence `i + 1`.
    log: Vec<ChangeEvent>,
    subscribers: HashMap<SubscriptionId, Subscriber>,
    available: bool,
}

struct FeedInner {
    config: FeedConfig,
    state: RwLock<FeedState>,
    events: EventLoop,
    scope: RwLock<Option<ScopeFn>>,
    next_id: AtomicU64,
}

/// A change feed living entirely in memory.
///
/// Every write becomes one log entry with its own sequence number. Replies to
/// cursor and snapshot requests, and subscription deliveries, are queued on
/// the feed's [`EventLoop`] and only happen when the loop is driven with
/// [`run_one`](Self::run_one) or [`run_until_idle`](Self::run_until_idle).
/// Queries are evaluated when their task runs, not when they are issued.
#[derive(Clone)]
pub struct MemoryFeed {
    inner: Arc<FeedInner>,
}

impl MemoryFeed {
    pub fn new(config: FeedConfig) -> Self {
        Self {
            inner: Arc::new(FeedInner {
                config,
                state: RwLock::new(FeedState {
                    head: Cursor(0),
                    docs: BTreeMap::new(),
                    log: Vec::new(),
                    subscribers: HashMap::new(),
                    available: true,
                }),
                events: EventLoop::new(),
                scope: RwLock::new(None),
                next_id: AtomicU64::new(1),
            }),
        }
    }

    /// Set the key-emission function used by scoped snapshots.
    pub fn with_scope(
        self,
        scope: impl Fn(&Document) -> Vec<String> + Send + Sync + 'static,
    ) -> Self {
        *self.inner.scope.write() = Some(Arc::new(scope));
        self
    }

    // --- Writes ---

    /// Insert or replace a document. Returns the new head.
    pub fn put(&self, doc: Document) -> Cursor {
        self.commit(vec![Write::Put(doc)])
    }

    /// Delete a document. Returns the new head.
    pub fn delete(&self, id: impl Into<String>) -> Cursor {
        self.commit(vec![Write::Delete(id.into())])
    }

    /// Apply several writes, each getting its own sequence number, and
    /// schedule delivery to every subscriber. Returns the new head.
    pub fn commit(&self, writes: Vec<Write>) -> Cursor {
        let mut wake = Vec::new();

        let head = {
            let mut guard = self.inner.state.write();
            let state = &mut *guard;

            for write in writes {
                state.head = state.head.next();
                let event = match write {
                    Write::Put(doc) => {
                        state.docs.insert(doc.id.clone(), doc.clone());
                        ChangeEvent::upsert(state.head, doc)
                    }
                    Write::Delete(id) => {
                        state.docs.remove(&id);
                        ChangeEvent::deletion(state.head, id)
                    }
                };
                state.log.push(event);
            }

            for (id, sub) in state.subscribers.iter_mut() {
                if !sub.scheduled && sub.delivered < state.head {
                    sub.scheduled = true;
                    wake.push(*id);
                }
            }

            state.head
        };

        trace!(head = head.0, subscribers = wake.len(), "feed commit");
        for id in wake {
            schedule_delivery(&self.inner, id);
        }
        head
    }

    // --- Inspection ---

    pub fn head(&self) -> Cursor {
        self.inner.state.read().head
    }

    /// Number of live documents.
    pub fn len(&self) -> usize {
        self.inner.state.read().docs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn get(&self, id: &str) -> Option<Document> {
        self.inner.state.read().docs.get(id).cloned()
    }

    pub fn subscriber_count(&self) -> usize {
        self.inner.state.read().subscribers.len()
    }

    /// When unavailable, cursor and snapshot requests fail and subscribing
    /// is refused.
    pub fn set_available(&self, available: bool) {
        self.inner.state.write().available = available;
    }

    // --- Event loop ---

    pub fn run_one(&self) -> bool {
        self.inner.events.run_one()
    }

    pub fn run_until_idle(&self) -> usize {
        self.inner.events.run_until_idle()
    }

    pub fn pending_tasks(&self) -> usize {
        self.inner.events.pending()
    }

    /// Handle to the loop the feed schedules on.
    pub fn event_loop(&self) -> EventLoop {
        self.inner.events.clone()
    }
}

impl Default for MemoryFeed {
    fn default() -> Self {
        Self::new(FeedConfig::default())
    }
}

fn unavailable() -> SyncError {
    SyncError::Feed("feed unavailable".to_string())
}

fn schedule_delivery(inner: &Arc<FeedInner>, id: SubscriptionId) {
    let weak = Arc::downgrade(inner);
    inner.events.spawn(move || {
        if let Some(inner) = weak.upgrade() {
            deliver(&inner, id);
        }
    });
}

/// Hand the next slice of undelivered changes to a subscriber.
fn deliver(inner: &Arc<FeedInner>, id: SubscriptionId) {
    let max = inner.config.max_batch_size.max(1);

    let (handler, batch, more) = {
        let mut guard = inner.state.write();
        let state = &mut *guard;
        let Some(sub) = state.subscribers.get_mut(&id) else {
            return;
        };
        sub.scheduled = false;

        let start = sub.delivered.0 as usize;
        if start >= state.log.len() {
            return;
        }
        let end = (start + max).min(state.log.len());
        let results = state.log[start..end].to_vec();
        sub.delivered = Cursor(end as u64);

        let more = end < state.log.len();
        if more {
            sub.scheduled = true;
        }
        (Arc::clone(&sub.handler), ChangeBatch::new(results), more)
    };

    if more {
        schedule_delivery(inner, id);
    }
    trace!(subscription = id.0, events = batch.len(), "delivering batch");
    handler(batch);
}

impl ChangeFeed for MemoryFeed {
    fn cursor(&self, reply: Reply<Cursor>) {
        let weak = Arc::downgrade(&self.inner);
        self.inner.events.spawn(move || {
            if let Some(inner) = weak.upgrade() {
                let result = {
                    let state = inner.state.read();
                    if state.available {
                        Ok(state.head)
                    } else {
                        Err(unavailable())
                    }
                };
                reply(result);
            }
        });
    }

    fn snapshot(&self, scope: Option<&str>, reply: Reply<Vec<Document>>) {
        let weak = Arc::downgrade(&self.inner);
        let scope = scope.map(str::to_string);
        self.inner.events.spawn(move || {
            if let Some(inner) = weak.upgrade() {
                let result = run_snapshot(&inner, scope.as_deref());
                reply(result);
            }
        });
    }

    fn subscribe(&self, from: Cursor, handler: BatchHandler) -> Result<Box<dyn Subscription>> {
        let id = SubscriptionId(self.inner.next_id.fetch_add(1, Ordering::SeqCst));
        {
            let mut state = self.inner.state.write();
            if !state.available {
                return Err(unavailable());
            }
            state.subscribers.insert(
                id,
                Subscriber {
                    handler,
                    delivered: from,
                    scheduled: true,
                },
            );
        }

        debug!(subscription = id.0, from = from.0, "subscribed");
        schedule_delivery(&self.inner, id);

        Ok(Box::new(MemorySubscription {
            id,
            feed: Arc::downgrade(&self.inner),
        }))
    }
}

fn run_snapshot(inner: &FeedInner, scope: Option<&str>) -> Result<Vec<Document>> {
    let state = inner.state.read();
    if !state.available {
        return Err(unavailable());
    }

    let Some(key) = scope else {
        return Ok(state.docs.values().cloned().collect());
    };

    let scope_fn = inner.scope.read().clone();
    let Some(scope_fn) = scope_fn else {
        debug!(scope = key, "scoped snapshot without a scope function");
        return Ok(Vec::new());
    };

    Ok(state
        .docs
        .values()
        .filter(|doc| scope_fn(doc).iter().any(|k| k == key))
        .cloned()
        .collect())
}

/// Subscription handle returned by [`MemoryFeed::subscribe`].
pub struct MemorySubscription {
    id: SubscriptionId,
    feed: Weak<FeedInner>,
}

impl Subscription for MemorySubscription {
    fn id(&self) -> SubscriptionId {
        self.id
    }

    fn stop(&mut self) {
        if let Some(inner) = self.feed.upgrade() {
            if inner.state.write().subscribers.remove(&self.id).is_some() {
                debug!(subscription = self.id.0, "unsubscribed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use serde_json::json;

    fn doc(id: &str, flight: &str) -> Document {
        Document::new(id, json!({ "type": "telemetry", "flight": flight }))
    }

    fn collecting_handler() -> (BatchHandler, Arc<Mutex<Vec<ChangeBatch>>>) {
        let seen: Arc<Mutex<Vec<ChangeBatch>>> = Arc::new(Mutex::new(Vec::new()));
        let log = Arc::clone(&seen);
        let handler: BatchHandler = Arc::new(move |batch: ChangeBatch| log.lock().push(batch));
        (handler, seen)
    }

    #[test]
    fn test_cursor_is_evaluated_when_run() {
        let feed = MemoryFeed::default();
        let got: Arc<Mutex<Option<Cursor>>> = Arc::new(Mutex::new(None));
        let slot = Arc::clone(&got);
        feed.cursor(Box::new(move |res: Result<Cursor>| *slot.lock() = res.ok()));

        feed.put(doc("a", "f1"));
        assert!(got.lock().is_none());
        feed.run_until_idle();
        assert_eq!(*got.lock(), Some(Cursor(1)));
    }

    #[test]
    fn test_scoped_snapshot() {
        let feed = MemoryFeed::default().with_scope(|d: &Document| {
            d.str_field("flight").map(|f| vec![f.to_string()]).unwrap_or_default()
        });
        feed.put(doc("b", "f1"));
        feed.put(doc("a", "f1"));
        feed.put(doc("c", "f2"));

        let got: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
        let slot = Arc::clone(&got);
        feed.snapshot(
            Some("f1"),
            Box::new(move |res: Result<Vec<Document>>| {
                *slot.lock() = res.unwrap().into_iter().map(|d| d.id).collect();
            }),
        );
        feed.run_until_idle();
        assert_eq!(*got.lock(), vec!["a".to_string(), "b".to_string()]);
    }

    #[test]
    fn test_subscribe_catches_up_then_follows() {
        let feed = MemoryFeed::new(FeedConfig { max_batch_size: 2 });
        feed.put(doc("a", "f1"));
        feed.put(doc("b", "f1"));
        feed.put(doc("c", "f1"));

        let (handler, seen) = collecting_handler();
        let mut sub = feed.subscribe(Cursor(0), handler).unwrap();
        feed.run_until_idle();
        {
            let batches = seen.lock();
            assert_eq!(batches.len(), 2);
            assert_eq!(batches[0].len(), 2);
            assert_eq!(batches[1].last_seq, Cursor(3));
        }

        feed.delete("a");
        feed.run_until_idle();
        {
            let batches = seen.lock();
            assert_eq!(batches.len(), 3);
            assert!(batches[2].results[0].deleted);
        }

        sub.stop();
        feed.put(doc("d", "f1"));
        feed.run_until_idle();
        assert_eq!(seen.lock().len(), 3);
        assert_eq!(feed.subscriber_count(), 0);
    }

    #[test]
    fn test_subscribe_from_cursor_skips_older() {
        let feed = MemoryFeed::default();
        feed.put(doc("a", "f1"));
        let from = feed.put(doc("b", "f1"));
        feed.put(doc("c", "f1"));

        let (handler, seen) = collecting_handler();
        let _sub = feed.subscribe(from, handler).unwrap();
        feed.run_until_idle();

        let batches = seen.lock();
        assert_eq!(batches.len(), 1);
        assert_eq!(batches[0].results.len(), 1);
        assert_eq!(batches[0].results[0].id, "c");
    }

    #[test]
    fn test_unavailable() {
        let feed = MemoryFeed::default();
        feed.set_available(false);

        let failed = Arc::new(Mutex::new(false));
        let slot = Arc::clone(&failed);
        feed.cursor(Box::new(move |res: Result<Cursor>| *slot.lock() = res.is_err()));
        feed.run_until_idle();
        assert!(*failed.lock());

        let (handler, _) = collecting_handler();
        assert!(matches!(
            feed.subscribe(Cursor(0), handler),
            Err(SyncError::Feed(_))
        ));
    }
}
