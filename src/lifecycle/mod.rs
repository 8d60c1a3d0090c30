//! Controllers that bootstrap collections from a change feed and keep them
//! live.
//!
//! A [`CollectionController`] owns the top-level collection and the feed
//! subscription. Each document of that collection can get an
//! [`ItemController`], which follows the same batches through the
//! controller's registry and keeps its own per-item views and tracks.

mod controller;
mod gate;
mod item;
mod policy;
mod tracks;

pub use controller::{CollectionController, ControllerConfig};
pub use gate::Lifecycle;
pub use item::ItemController;
pub use policy::{ItemPolicy, TrackKey, TrackKind};
pub use tracks::{Track, TrackDelta, TrackSet};

use crate::error::Result;

/// Completion handed to `init_then`.
pub type Completion = Box<dyn FnOnce(Result<()>) + Send>;
