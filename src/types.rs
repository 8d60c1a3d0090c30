//! Core types for the sync engine.

use crate::error::{Result, SyncError};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Position in the change log.
///
/// A subscription opened at cursor `C` delivers every change committed with
/// a sequence strictly greater than `C`.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default)]
pub struct Cursor(pub u64);

impl fmt::Debug for Cursor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Cursor({})", self.0)
    }
}

impl fmt::Display for Cursor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl Cursor {
    pub fn next(self) -> Self {
        Cursor(self.0 + 1)
    }
}

/// Generation counter owned by a controller.
///
/// Every asynchronous request carries the epoch it was issued under; the
/// response is dropped if the controller has moved on since.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Epoch(pub u64);

impl fmt::Debug for Epoch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Epoch({})", self.0)
    }
}

impl Epoch {
    pub fn next(self) -> Self {
        Epoch(self.0 + 1)
    }
}

/// Lifecycle state shared by collections and controllers.
///
/// Collections go `Reset -> Ready`; controllers pass through `Setup` while
/// their bootstrap requests are in flight.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
pub enum SyncState {
    #[default]
    Reset,
    Setup,
    Ready,
}

impl fmt::Display for SyncState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SyncState::Reset => "reset",
            SyncState::Setup => "setup",
            SyncState::Ready => "ready",
        };
        f.write_str(name)
    }
}

/// Anything stored in a collection must expose a stable key.
pub trait Keyed {
    fn key(&self) -> &str;
}

/// A document from the change feed.
///
/// The body is opaque to the engine; only policy functions look inside it.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Document {
    /// Stable identifier (the `_id` of the stored document).
    pub id: String,

    /// Full JSON body, including `_id`.
    pub body: serde_json::Value,
}

impl Document {
    /// Create a document from an id and a body.
    ///
    /// The `_id` field of an object body is overwritten with `id`.
    pub fn new(id: impl Into<String>, body: serde_json::Value) -> Self {
        let id = id.into();
        let mut body = body;
        if let serde_json::Value::Object(ref mut map) = body {
            map.insert("_id".to_string(), serde_json::Value::String(id.clone()));
        }
        Self { id, body }
    }

    /// Build a document from a JSON object carrying its own `_id`.
    pub fn from_value(body: serde_json::Value) -> Result<Self> {
        let id = body
            .get("_id")
            .and_then(|v| v.as_str())
            .ok_or_else(|| SyncError::InvalidDocument("missing string _id".to_string()))?
            .to_string();
        Ok(Self { id, body })
    }

    /// Parse a document from JSON text.
    pub fn from_json(text: &str) -> Result<Self> {
        let body: serde_json::Value = serde_json::from_str(text)?;
        Self::from_value(body)
    }

    /// Look up a field by JSON pointer (e.g. `/launch/time`).
    pub fn pointer(&self, pointer: &str) -> Option<&serde_json::Value> {
        self.body.pointer(pointer)
    }

    /// Top-level string field.
    pub fn str_field(&self, field: &str) -> Option<&str> {
        self.body.get(field).and_then(|v| v.as_str())
    }

    /// Numeric field by JSON pointer.
    pub fn f64_at(&self, pointer: &str) -> Option<f64> {
        self.body.pointer(pointer).and_then(|v| v.as_f64())
    }

    /// The conventional `type` field.
    pub fn doc_type(&self) -> Option<&str> {
        self.str_field("type")
    }
}

impl Keyed for Document {
    fn key(&self) -> &str {
        &self.id
    }
}

/// A single entry of a change batch.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ChangeEvent<D = Document> {
    /// Sequence the change was committed at.
    pub seq: Cursor,

    /// Id of the changed document.
    pub id: String,

    /// New document body (None for deletions).
    pub doc: Option<D>,

    /// True if the document was deleted.
    pub deleted: bool,
}

impl<D: Keyed> ChangeEvent<D> {
    /// An insert or update.
    pub fn upsert(seq: Cursor, doc: D) -> Self {
        Self {
            seq,
            id: doc.key().to_string(),
            doc: Some(doc),
            deleted: false,
        }
    }
}

impl<D> ChangeEvent<D> {
    /// A deletion of `id`.
    pub fn deletion(seq: Cursor, id: impl Into<String>) -> Self {
        Self {
            seq,
            id: id.into(),
            doc: None,
            deleted: true,
        }
    }
}

/// An ordered group of changes delivered together by a subscription.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ChangeBatch<D = Document> {
    pub results: Vec<ChangeEvent<D>>,

    /// Sequence of the last event in the batch.
    pub last_seq: Cursor,
}

impl<D> ChangeBatch<D> {
    pub fn new(results: Vec<ChangeEvent<D>>) -> Self {
        let last_seq = results.iter().map(|e| e.seq).max().unwrap_or_default();
        Self { results, last_seq }
    }

    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }

    pub fn len(&self) -> usize {
        self.results.len()
    }
}
