//! In-memory views maintained from change batches.
//!
//! - [`SortedCollectionSync`]: ordered view with stream targets and change
//!   callbacks
//! - [`UnsortedKeyedStore`]: keyed lookup table, no push machinery
//!
//! Both are bootstrapped once from a snapshot and then fed batches. A change
//! is treated as a deletion if the feed marks it deleted or if it fails the
//! update filter, so a document that stops being relevant leaves the view.
//!
//! # Example
//!
//! ```ignore
//! let mut flights = SortedCollectionSync::new(
//!     SyncConfig::new(|a: &Document, b: &Document| by_launch_time(a, b))
//!         .with_init_sort(by_launch_time),
//! );
//! let mirror = MirrorTarget::new();
//! flights.add_stream_target(Box::new(mirror.clone()));
//! flights.bootstrap(snapshot)?;
//! flights.apply_changes(&batch.results)?;
//! assert_eq!(mirror.items(), flights.snapshot());
//! ```

mod sorted;
mod targets;
mod unsorted;

pub use sorted::{Comparator, Filter, InitMap, SortedCollectionSync, SyncConfig, UpdateMap};
pub use targets::{
    ChangeCallback, MirrorTarget, SetCallback, SetEdit, SetMirror, SetTarget, StreamEdit,
    StreamTarget,
};
pub use unsorted::{StoreConfig, UnsortedKeyedStore};
