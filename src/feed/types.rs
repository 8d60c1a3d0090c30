//! The change feed boundary.

use crate::error::Result;
use crate::types::{ChangeBatch, Cursor, Document};
use std::sync::Arc;

/// Completion for an asynchronous feed request.
pub type Reply<T> = Box<dyn FnOnce(Result<T>) + Send>;

/// Invoked with every batch a subscription delivers.
pub type BatchHandler = Arc<dyn Fn(ChangeBatch) + Send + Sync>;

/// Source of documents and changes.
///
/// Requests complete through their `reply` at some later point, possibly
/// after other requests issued later have completed. Callers must tolerate
/// replies that arrive after they have lost interest.
pub trait ChangeFeed: Send + Sync {
    /// Current head of the change log.
    fn cursor(&self, reply: Reply<Cursor>);

    /// Every live document, or only those indexed under `scope`, ordered by
    /// id.
    fn snapshot(&self, scope: Option<&str>, reply: Reply<Vec<Document>>);

    /// Deliver every change committed after `from`, then follow live
    /// commits, until the returned subscription is stopped.
    fn subscribe(&self, from: Cursor, handler: BatchHandler) -> Result<Box<dyn Subscription>>;
}

/// Unique identifier for a subscription.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SubscriptionId(pub u64);

/// A live change subscription.
pub trait Subscription: Send {
    fn id(&self) -> SubscriptionId;

    /// End delivery. Batches already queued are dropped.
    fn stop(&mut self);
}

/// Configuration for [`MemoryFeed`](super::MemoryFeed).
#[derive(Clone, Debug)]
pub struct FeedConfig {
    /// Max events per delivered batch.
    /// Default: 100
    pub max_batch_size: usize,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            max_batch_size: 100,
        }
    }
}
