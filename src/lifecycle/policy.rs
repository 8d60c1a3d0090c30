//! Pluggable per-item policy.

use crate::collections::{StoreConfig, SyncConfig};
use crate::types::Document;
use serde::{Deserialize, Serialize};

/// Which policy variant a track follows.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrackKind {
    /// A sub-entity carried by the item itself (e.g. a payload).
    Primary,
    /// A sub-entity following the item (e.g. a chase vehicle).
    Chaser,
}

/// One entry of the sub-key list derived from an item document.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TrackKey {
    pub name: String,
    pub kind: TrackKind,
}

impl TrackKey {
    pub fn primary(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: TrackKind::Primary,
        }
    }

    pub fn chaser(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: TrackKind::Chaser,
        }
    }
}

/// Describes, for one item key, which documents belong to it and how its
/// views are filtered, mapped and ordered.
///
/// The sync engine never looks inside documents itself; every schema
/// decision goes through this trait.
pub trait ItemPolicy: Send + Sync {
    /// Whether a raw document belongs to the item at all.
    fn in_scope(&self, item_key: &str, doc: &Document) -> bool;

    /// Ordered view over the item's documents.
    fn telemetry(&self, item_key: &str) -> SyncConfig<Document>;

    /// Keyed lookup table for auxiliary documents.
    fn auxiliary(&self, item_key: &str) -> StoreConfig<Document>;

    /// Sub-key list named inside the item document.
    fn tracks(&self, item: &Document) -> Vec<TrackKey>;

    /// Ordered view for one track. Implementations choose the variant from
    /// `track.kind`.
    fn track(&self, item_key: &str, track: &TrackKey) -> SyncConfig<Document>;
}
