//! Top-level collection controller.

use super::gate::Lifecycle;
use super::item::ItemController;
use super::policy::ItemPolicy;
use super::Completion;
use crate::collections::{ChangeCallback, SortedCollectionSync, StreamTarget, SyncConfig};
use crate::error::Result;
use crate::feed::{BatchHandler, ChangeFeed, Subscription};
use crate::registry::SubordinateRegistry;
use crate::types::{ChangeBatch, Cursor, Document, Epoch, SyncState};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, error, trace, warn};

/// Configuration for a [`CollectionController`].
#[derive(Clone, Debug)]
pub struct ControllerConfig {
    /// Name used in log output.
    /// Default: "collection"
    pub label: String,

    /// Snapshot scope passed to the feed; `None` downloads every document.
    /// Default: None
    pub scope: Option<String>,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            label: "collection".to_string(),
            scope: None,
        }
    }
}

impl ControllerConfig {
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            ..Self::default()
        }
    }

    pub fn with_scope(mut self, scope: impl Into<String>) -> Self {
        self.scope = Some(scope.into());
        self
    }
}

struct ControllerShared {
    config: ControllerConfig,
    feed: Arc<dyn ChangeFeed>,
    policy: Option<Arc<dyn ItemPolicy>>,
    lifecycle: Mutex<Lifecycle>,
    collection: Mutex<SortedCollectionSync<Document>>,
    registry: Arc<SubordinateRegistry>,
    items: Mutex<HashMap<String, ItemController>>,
    subscription: Mutex<Option<Box<dyn Subscription>>>,
    last_seq: Mutex<Cursor>,
}

impl Drop for ControllerShared {
    fn drop(&mut self) {
        if let Some(mut sub) = self.subscription.get_mut().take() {
            sub.stop();
        }
    }
}

/// Keeps one sorted collection in step with a change feed.
///
/// `init` reads the feed's cursor, downloads a snapshot, bootstraps the
/// collection and then subscribes from the cursor, so no change committed in
/// between is lost. Every delivered batch goes to the registered item
/// controllers first and to the top-level collection after.
///
/// Built with [`with_items`](Self::with_items), the controller also keeps
/// one idle [`ItemController`] per document of its collection.
#[derive(Clone)]
pub struct CollectionController {
    shared: Arc<ControllerShared>,
}

impl CollectionController {
    pub fn new(
        feed: Arc<dyn ChangeFeed>,
        sync: SyncConfig<Document>,
        config: ControllerConfig,
    ) -> Self {
        Self::build(feed, sync, config, None)
    }

    pub fn with_items(
        feed: Arc<dyn ChangeFeed>,
        sync: SyncConfig<Document>,
        config: ControllerConfig,
        policy: Arc<dyn ItemPolicy>,
    ) -> Self {
        Self::build(feed, sync, config, Some(policy))
    }

    fn build(
        feed: Arc<dyn ChangeFeed>,
        sync: SyncConfig<Document>,
        config: ControllerConfig,
        policy: Option<Arc<dyn ItemPolicy>>,
    ) -> Self {
        Self {
            shared: Arc::new(ControllerShared {
                config,
                feed,
                policy,
                lifecycle: Mutex::new(Lifecycle::new()),
                collection: Mutex::new(SortedCollectionSync::new(sync)),
                registry: Arc::new(SubordinateRegistry::new()),
                items: Mutex::new(HashMap::new()),
                subscription: Mutex::new(None),
                last_seq: Mutex::new(Cursor::default()),
            }),
        }
    }

    pub fn label(&self) -> &str {
        &self.shared.config.label
    }

    pub fn state(&self) -> SyncState {
        self.shared.lifecycle.lock().state()
    }

    pub fn epoch(&self) -> Epoch {
        self.shared.lifecycle.lock().epoch()
    }

    /// Start the cursor, snapshot, subscribe sequence.
    pub fn init(&self) -> Result<()> {
        self.init_then(|_| {})
    }

    /// Like [`init`](Self::init), calling `done` once subscribed or failed.
    ///
    /// `done` is dropped uncalled if the attempt is superseded by `reset`.
    pub fn init_then(&self, done: impl FnOnce(Result<()>) + Send + 'static) -> Result<()> {
        let epoch = self.shared.lifecycle.lock().begin_init()?;
        debug!(label = %self.shared.config.label, epoch = epoch.0, "init");
        ControllerShared::request_cursor(&self.shared, epoch, Box::new(done));
        Ok(())
    }

    /// Stop the subscription, tear down every item and empty the collection.
    pub fn reset(&self) {
        let shared = &self.shared;
        let epoch = shared.lifecycle.lock().reset();

        let subscription = shared.subscription.lock().take();
        if let Some(mut sub) = subscription {
            sub.stop();
        }

        shared.collection.lock().reset();
        *shared.last_seq.lock() = Cursor::default();

        let items: Vec<ItemController> = shared.items.lock().drain().map(|(_, v)| v).collect();
        for item in &items {
            item.teardown();
        }
        debug!(label = %shared.config.label, epoch = epoch.0, items = items.len(), "reset");
    }

    // --- Collection views ---

    pub fn len(&self) -> usize {
        self.shared.collection.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Current contents, in order.
    pub fn documents(&self) -> Vec<Document> {
        self.shared.collection.lock().snapshot()
    }

    pub fn get(&self, id: &str) -> Option<Document> {
        self.shared.collection.lock().get(id).cloned()
    }

    pub fn add_stream_target(&self, target: Box<dyn StreamTarget<Document>>) {
        self.shared.collection.lock().add_stream_target(target);
    }

    pub fn add_change_callback(&self, cb: ChangeCallback<Document>) {
        self.shared.collection.lock().add_change_callback(cb);
    }

    /// Highest sequence number received from the subscription.
    pub fn last_seq(&self) -> Cursor {
        *self.shared.last_seq.lock()
    }

    // --- Items ---

    pub fn item(&self, id: &str) -> Option<ItemController> {
        self.shared.items.lock().get(id).cloned()
    }

    /// Ids of every item controller, sorted.
    pub fn item_keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.shared.items.lock().keys().cloned().collect();
        keys.sort();
        keys
    }

    /// Keys of the items currently following the change stream.
    pub fn active_items(&self) -> Vec<String> {
        self.shared.registry.keys()
    }
}

impl ControllerShared {
    fn request_cursor(this: &Arc<Self>, epoch: Epoch, done: Completion) {
        let weak = Arc::downgrade(this);
        this.feed.cursor(Box::new(move |result: Result<Cursor>| {
            if let Some(shared) = weak.upgrade() {
                ControllerShared::on_cursor(&shared, epoch, result, done);
            }
        }));
    }

    fn on_cursor(this: &Arc<Self>, epoch: Epoch, result: Result<Cursor>, done: Completion) {
        if !this.lifecycle.lock().is_setting_up(epoch) {
            trace!(label = %this.config.label, epoch = epoch.0, "stale cursor reply dropped");
            return;
        }

        let cursor = match result {
            Ok(cursor) => cursor,
            Err(e) => {
                warn!(label = %this.config.label, error = %e, "cursor request failed");
                done(Err(e));
                return;
            }
        };

        let weak = Arc::downgrade(this);
        this.feed.snapshot(
            this.config.scope.as_deref(),
            Box::new(move |result: Result<Vec<Document>>| {
                if let Some(shared) = weak.upgrade() {
                    ControllerShared::on_snapshot(&shared, epoch, cursor, result, done);
                }
            }),
        );
    }

    fn on_snapshot(
        this: &Arc<Self>,
        epoch: Epoch,
        cursor: Cursor,
        result: Result<Vec<Document>>,
        done: Completion,
    ) {
        if !this.lifecycle.lock().is_setting_up(epoch) {
            trace!(label = %this.config.label, epoch = epoch.0, "stale snapshot reply dropped");
            return;
        }

        let docs = match result {
            Ok(docs) => docs,
            Err(e) => {
                warn!(label = %this.config.label, error = %e, "snapshot request failed");
                done(Err(e));
                return;
            }
        };

        let count = docs.len();
        let bootstrapped = this.collection.lock().bootstrap(docs);
        if let Err(e) = bootstrapped {
            error!(label = %this.config.label, error = %e, "bootstrap failed");
            done(Err(e));
            return;
        }
        *this.last_seq.lock() = cursor;
        this.reconcile_items();

        if !this.lifecycle.lock().mark_ready(epoch) {
            return;
        }

        let weak = Arc::downgrade(this);
        let handler: BatchHandler = Arc::new(move |batch: ChangeBatch| {
            if let Some(shared) = weak.upgrade() {
                shared.on_batch(epoch, batch);
            }
        });

        match this.feed.subscribe(cursor, handler) {
            Ok(mut sub) => {
                if !this.lifecycle.lock().is_live(epoch) {
                    sub.stop();
                    return;
                }
                *this.subscription.lock() = Some(sub);
                debug!(
                    label = %this.config.label,
                    cursor = cursor.0,
                    documents = count,
                    "ready"
                );
                done(Ok(()));
            }
            Err(e) => {
                this.lifecycle.lock().revert_to_setup(epoch);
                warn!(label = %this.config.label, error = %e, "subscribe failed");
                done(Err(e));
            }
        }
    }

    fn on_batch(&self, epoch: Epoch, batch: ChangeBatch) {
        if !self.lifecycle.lock().is_live(epoch) {
            trace!(label = %self.config.label, epoch = epoch.0, "stale batch dropped");
            return;
        }
        trace!(label = %self.config.label, events = batch.len(), "batch");

        let applied = self
            .registry
            .fan_out(&batch, |b| self.collection.lock().apply_changes(&b.results));
        if let Err(e) = applied {
            error!(label = %self.config.label, error = %e, "failed to apply changes");
        }

        let mut last_seq = self.last_seq.lock();
        if batch.last_seq > *last_seq {
            *last_seq = batch.last_seq;
        }
        drop(last_seq);

        self.reconcile_items();
    }

    /// Keep exactly one item controller per document of the collection.
    fn reconcile_items(&self) {
        let Some(policy) = &self.policy else {
            return;
        };
        let docs = self.collection.lock().snapshot();

        let mut gone = Vec::new();
        let mut changed = Vec::new();
        let mut created = 0;
        {
            let mut items = self.items.lock();
            let live: HashSet<&str> = docs.iter().map(|d| d.id.as_str()).collect();
            let stale: Vec<String> = items
                .keys()
                .filter(|k| !live.contains(k.as_str()))
                .cloned()
                .collect();
            for key in stale {
                if let Some(item) = items.remove(&key) {
                    gone.push(item);
                }
            }

            for doc in &docs {
                match items.get(&doc.id) {
                    Some(item) => {
                        if !item.has_document(doc) {
                            changed.push((item.clone(), doc.clone()));
                        }
                    }
                    None => {
                        let item = ItemController::new(
                            doc.clone(),
                            Arc::clone(&self.feed),
                            Arc::clone(policy),
                            Arc::downgrade(&self.registry),
                        );
                        items.insert(doc.id.clone(), item);
                        created += 1;
                    }
                }
            }
        }

        for item in &gone {
            item.teardown();
        }
        let updated = changed.len();
        for (item, doc) in changed {
            item.set_document(doc);
        }

        if created + updated + gone.len() > 0 {
            debug!(
                label = %self.config.label,
                created,
                updated,
                removed = gone.len(),
                "items reconciled"
            );
        }
    }
}
