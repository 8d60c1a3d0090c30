//! Per-item controller following the parent's change stream.

use super::gate::Lifecycle;
use super::policy::ItemPolicy;
use super::tracks::{Track, TrackDelta, TrackSet};
use super::Completion;
use crate::collections::{
    ChangeCallback, SetCallback, SetTarget, SortedCollectionSync, StoreConfig, StreamTarget,
    UnsortedKeyedStore,
};
use crate::error::Result;
use crate::feed::ChangeFeed;
use crate::registry::{Subordinate, SubordinateRegistry};
use crate::types::{ChangeBatch, ChangeEvent, Cursor, Document, Epoch, SyncState};
use parking_lot::Mutex;
use std::sync::{Arc, Weak};
use tracing::{debug, error, trace, warn};

pub(crate) struct ItemShared {
    key: String,
    feed: Arc<dyn ChangeFeed>,
    policy: Arc<dyn ItemPolicy>,
    registry: Weak<SubordinateRegistry>,
    lifecycle: Mutex<Lifecycle>,
    /// Serialises batch application; holds batches that arrive during setup.
    held: Mutex<Vec<ChangeBatch>>,
    /// Cursor the snapshot was taken at; older events are already applied.
    since: Mutex<Cursor>,
    document: Mutex<Document>,
    /// Every in-scope document, unmapped. New tracks bootstrap from here.
    documents: Mutex<UnsortedKeyedStore<Document>>,
    telemetry: Mutex<SortedCollectionSync<Document>>,
    auxiliary: Mutex<UnsortedKeyedStore<Document>>,
    tracks: Mutex<TrackSet>,
}

/// Controller for the data belonging to one item of a parent collection.
///
/// Created idle by the parent when the item appears. `init` downloads the
/// item's documents and from then on the controller follows the parent's
/// change stream through the registry; batches that arrive before the
/// download completes are held and replayed afterwards.
#[derive(Clone)]
pub struct ItemController {
    shared: Arc<ItemShared>,
}

impl ItemController {
    pub(crate) fn new(
        document: Document,
        feed: Arc<dyn ChangeFeed>,
        policy: Arc<dyn ItemPolicy>,
        registry: Weak<SubordinateRegistry>,
    ) -> Self {
        let key = document.id.clone();
        let shared = Arc::new(ItemShared {
            telemetry: Mutex::new(SortedCollectionSync::new(policy.telemetry(&key))),
            auxiliary: Mutex::new(UnsortedKeyedStore::new(policy.auxiliary(&key))),
            documents: Mutex::new(UnsortedKeyedStore::new(StoreConfig::new())),
            tracks: Mutex::new(TrackSet::new()),
            lifecycle: Mutex::new(Lifecycle::new()),
            held: Mutex::new(Vec::new()),
            since: Mutex::new(Cursor::default()),
            document: Mutex::new(document.clone()),
            key,
            feed,
            policy,
            registry,
        });

        let controller = Self { shared };
        controller.set_document(document);
        controller
    }

    pub fn key(&self) -> &str {
        &self.shared.key
    }

    pub fn state(&self) -> SyncState {
        self.shared.lifecycle.lock().state()
    }

    pub fn epoch(&self) -> Epoch {
        self.shared.lifecycle.lock().epoch()
    }

    /// The item's own document, as last seen in the parent collection.
    pub fn document(&self) -> Document {
        self.shared.document.lock().clone()
    }

    pub(crate) fn has_document(&self, doc: &Document) -> bool {
        *self.shared.document.lock() == *doc
    }

    /// Start downloading the item's documents.
    pub fn init(&self) -> Result<()> {
        self.init_then(|_| {})
    }

    /// Like [`init`](Self::init), calling `done` once ready or failed.
    ///
    /// `done` is dropped uncalled if the attempt is superseded by `reset`.
    pub fn init_then(&self, done: impl FnOnce(Result<()>) + Send + 'static) -> Result<()> {
        let epoch = self.shared.lifecycle.lock().begin_init()?;
        debug!(item = %self.shared.key, epoch = epoch.0, "item init");

        if let Some(registry) = self.shared.registry.upgrade() {
            registry.register(Arc::clone(&self.shared) as Arc<dyn Subordinate>);
        }

        ItemShared::request_cursor(&self.shared, epoch, Box::new(done));
        Ok(())
    }

    /// Stop following the parent and drop all downloaded data.
    ///
    /// The track set keeps its membership and registrations; only the
    /// tracks' contents are reset.
    pub fn reset(&self) {
        let shared = &self.shared;
        let mut held = shared.held.lock();
        let epoch = shared.lifecycle.lock().reset();
        held.clear();
        *shared.since.lock() = Cursor::default();

        if let Some(registry) = shared.registry.upgrade() {
            registry.unregister(&shared.key);
        }

        shared.telemetry.lock().reset();
        shared.documents.lock().reset();
        shared.auxiliary.lock().reset();
        shared.tracks.lock().reset_tracks();
        debug!(item = %shared.key, epoch = epoch.0, "item reset");
    }

    /// Reset and drop every track registration; used when the item leaves
    /// the parent collection.
    pub(crate) fn teardown(&self) {
        self.reset();
        self.shared.tracks.lock().clear();
    }

    /// Re-point the controller at a new version of its document and
    /// reconcile the track set against the sub-key list derived from it.
    pub fn set_document(&self, doc: Document) -> TrackDelta {
        let shared = &self.shared;
        let _apply = shared.held.lock();
        *shared.document.lock() = doc.clone();

        let keys = shared.policy.tracks(&doc);
        let ready = shared.lifecycle.lock().state() == SyncState::Ready;

        let delta = shared.tracks.lock().reconcile(keys, |key| {
            let track = Track::new(key.clone(), shared.policy.track(&shared.key, key));
            if ready {
                let docs = shared.scope_documents();
                if let Err(e) = track.bootstrap(docs) {
                    error!(item = %shared.key, track = %key.name, error = %e, "track bootstrap failed");
                }
            }
            track
        });

        if !delta.is_empty() {
            debug!(
                item = %shared.key,
                added = delta.added.len(),
                removed = delta.removed.len(),
                "tracks reconciled"
            );
        }
        delta
    }

    // --- Views ---

    /// Ordered item documents.
    pub fn telemetry(&self) -> Vec<Document> {
        self.shared.telemetry.lock().snapshot()
    }

    pub fn add_stream_target(&self, target: Box<dyn StreamTarget<Document>>) {
        self.shared.telemetry.lock().add_stream_target(target);
    }

    pub fn add_change_callback(&self, cb: ChangeCallback<Document>) {
        self.shared.telemetry.lock().add_change_callback(cb);
    }

    /// Look up an auxiliary document.
    pub fn auxiliary(&self, id: &str) -> Option<Document> {
        self.shared.auxiliary.lock().get(id).cloned()
    }

    /// Auxiliary document ids, sorted.
    pub fn auxiliary_keys(&self) -> Vec<String> {
        let store = self.shared.auxiliary.lock();
        let mut keys: Vec<String> = store.keys().map(str::to_string).collect();
        keys.sort();
        keys
    }

    pub fn track(&self, name: &str) -> Option<Track> {
        self.shared.tracks.lock().get(name).cloned()
    }

    /// Track names, sorted.
    pub fn track_names(&self) -> Vec<String> {
        self.shared.tracks.lock().names()
    }

    pub fn add_track_target(&self, target: Box<dyn SetTarget<Track>>) {
        self.shared.tracks.lock().add_set_target(target);
    }

    pub fn add_track_callback(&self, cb: SetCallback<Track>) {
        self.shared.tracks.lock().add_set_callback(cb);
    }
}

impl ItemShared {
    fn request_cursor(this: &Arc<Self>, epoch: Epoch, done: Completion) {
        let weak = Arc::downgrade(this);
        this.feed.cursor(Box::new(move |result: Result<Cursor>| {
            if let Some(shared) = weak.upgrade() {
                ItemShared::on_cursor(&shared, epoch, result, done);
            }
        }));
    }

    fn on_cursor(this: &Arc<Self>, epoch: Epoch, result: Result<Cursor>, done: Completion) {
        if !this.lifecycle.lock().is_setting_up(epoch) {
            trace!(item = %this.key, epoch = epoch.0, "stale cursor reply dropped");
            return;
        }

        let cursor = match result {
            Ok(cursor) => cursor,
            Err(e) => {
                warn!(item = %this.key, error = %e, "cursor request failed");
                done(Err(e));
                return;
            }
        };

        let weak = Arc::downgrade(this);
        this.feed.snapshot(
            Some(&this.key),
            Box::new(move |result: Result<Vec<Document>>| {
                if let Some(shared) = weak.upgrade() {
                    shared.on_snapshot(epoch, cursor, result, done);
                }
            }),
        );
    }

    fn on_snapshot(
        &self,
        epoch: Epoch,
        cursor: Cursor,
        result: Result<Vec<Document>>,
        done: Completion,
    ) {
        if !self.lifecycle.lock().is_setting_up(epoch) {
            trace!(item = %self.key, epoch = epoch.0, "stale snapshot reply dropped");
            return;
        }

        let docs = match result {
            Ok(docs) => docs,
            Err(e) => {
                warn!(item = %self.key, error = %e, "snapshot request failed");
                done(Err(e));
                return;
            }
        };

        let mut held = self.held.lock();
        if !self.lifecycle.lock().is_setting_up(epoch) {
            return;
        }
        if let Err(e) = self.bootstrap(docs) {
            drop(held);
            error!(item = %self.key, error = %e, "item bootstrap failed");
            done(Err(e));
            return;
        }

        // Everything up to the cursor is already in the snapshot.
        *self.since.lock() = cursor;
        let backlog = std::mem::take(&mut *held);
        let replayed = backlog.len();
        for batch in backlog {
            let events = self.scope_events(&batch);
            self.apply_events(&events);
        }

        if !self.lifecycle.lock().mark_ready(epoch) {
            return;
        }
        drop(held);

        debug!(item = %self.key, cursor = cursor.0, replayed, "item ready");
        done(Ok(()));
    }

    fn bootstrap(&self, docs: Vec<Document>) -> Result<()> {
        let scoped: Vec<Document> = docs
            .into_iter()
            .filter(|d| self.policy.in_scope(&self.key, d))
            .collect();

        self.documents.lock().bootstrap(scoped.clone())?;
        self.telemetry.lock().bootstrap(scoped.clone())?;
        self.auxiliary.lock().bootstrap(scoped.clone())?;

        let tracks = self.tracks.lock();
        for track in tracks.tracks() {
            track.bootstrap(scoped.clone())?;
        }
        Ok(())
    }

    /// Events of the batch newer than the snapshot, with upserts of
    /// out-of-scope documents turned into deletions so a document that leaves
    /// the item leaves every view.
    fn scope_events(&self, batch: &ChangeBatch) -> Vec<ChangeEvent> {
        let since = *self.since.lock();
        batch
            .results
            .iter()
            .filter(|event| event.seq > since)
            .map(|event| match &event.doc {
                Some(doc) if !event.deleted && !self.policy.in_scope(&self.key, doc) => {
                    ChangeEvent::deletion(event.seq, event.id.clone())
                }
                _ => event.clone(),
            })
            .collect()
    }

    fn apply_events(&self, events: &[ChangeEvent]) {
        if events.is_empty() {
            return;
        }

        let result = self.documents.lock().apply_changes(events);
        self.report("documents", result);
        let result = self.telemetry.lock().apply_changes(events);
        self.report("telemetry", result);
        let result = self.auxiliary.lock().apply_changes(events);
        self.report("auxiliary", result);

        let tracks = self.tracks.lock();
        for track in tracks.tracks() {
            if let Err(e) = track.apply_changes(events) {
                error!(item = %self.key, track = %track.name(), error = %e, "failed to apply changes");
            }
        }
    }

    fn report(&self, view: &str, result: Result<()>) {
        if let Err(e) = result {
            error!(item = %self.key, view, error = %e, "failed to apply changes");
        }
    }

    /// In-scope documents ordered by id.
    fn scope_documents(&self) -> Vec<Document> {
        let mut docs: Vec<Document> = self.documents.lock().values().cloned().collect();
        docs.sort_by(|a, b| a.id.cmp(&b.id));
        docs
    }
}

impl Subordinate for ItemShared {
    fn key(&self) -> &str {
        &self.key
    }

    fn apply_batch(&self, batch: &ChangeBatch) {
        let mut held = self.held.lock();
        match self.lifecycle.lock().state() {
            SyncState::Setup => {
                trace!(item = %self.key, events = batch.len(), "holding batch during setup");
                held.push(batch.clone());
                return;
            }
            SyncState::Reset => return,
            SyncState::Ready => {}
        }

        let events = self.scope_events(batch);
        self.apply_events(&events);
    }
}
