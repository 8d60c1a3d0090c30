//! # docsync
//!
//! Incremental synchronization of in-memory document collections with an
//! append-only change feed.
//!
//! ## Core Concepts
//!
//! - **Collections**: sorted and keyed views bootstrapped from a snapshot and
//!   kept current by applying change batches, pushing minimal edits to
//!   stream targets
//! - **Feed**: the cursor/snapshot/subscribe boundary, with an in-memory
//!   implementation driven by an explicit event loop
//! - **Lifecycle**: controllers that run the bootstrap protocol, discard
//!   stale replies by epoch and own reset
//! - **Items**: per-document controllers fed through a registry, each with
//!   its own views and a reconciled set of tracks
//!
//! ## Example
//!
//! ```ignore
//! use docsync::{CollectionController, ControllerConfig, Document, MemoryFeed, SyncConfig};
//!
//! let feed = MemoryFeed::default();
//! feed.put(Document::new("f1", json!({"type": "flight", "launch": 10})));
//!
//! let flights = CollectionController::new(
//!     Arc::new(feed.clone()),
//!     SyncConfig::new(by_launch).with_init_sort(by_launch),
//!     ControllerConfig::new("flights"),
//! );
//! flights.init()?;
//! feed.run_until_idle();
//! assert_eq!(flights.len(), 1);
//! ```

pub mod collections;
pub mod error;
pub mod feed;
pub mod lifecycle;
pub mod registry;
pub mod types;

// Re-exports
pub use collections::{
    ChangeCallback, MirrorTarget, SetCallback, SetEdit, SetMirror, SetTarget,
    SortedCollectionSync, StoreConfig, StreamEdit, StreamTarget, SyncConfig, UnsortedKeyedStore,
};
pub use error::{Result, SyncError};
pub use feed::{
    BatchHandler, ChangeFeed, EventLoop, FeedConfig, MemoryFeed, Reply, Subscription,
    SubscriptionId, Write,
};
pub use lifecycle::{
    CollectionController, Completion, ControllerConfig, ItemController, ItemPolicy, Track,
    TrackDelta, TrackKey, TrackKind, TrackSet,
};
pub use registry::{Subordinate, SubordinateRegistry};
pub use types::*;
