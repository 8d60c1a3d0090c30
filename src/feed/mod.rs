//! The change feed boundary and an in-memory implementation.
//!
//! A feed offers three things:
//! - the current cursor (head of its change log)
//! - snapshots of its documents, optionally scoped to one key
//! - subscriptions delivering every change after a cursor, in order
//!
//! Reading the cursor before taking the snapshot and subscribing from that
//! cursor afterwards means no change can fall between the two: anything
//! committed after the cursor is either already in the snapshot or will be
//! delivered by the subscription (or both, which is harmless because changes
//! are idempotent upserts and deletes).
//!
//! # Example
//!
//! ```ignore
//! let feed = MemoryFeed::default();
//! feed.put(Document::new("f1", json!({"type": "flight"})));
//!
//! let sub = feed.subscribe(Cursor(0), Arc::new(|batch| println!("{batch:?}")))?;
//! feed.run_until_idle();
//! ```

mod event_loop;
mod memory;
mod types;

pub use event_loop::{EventLoop, Task};
pub use memory::{MemoryFeed, MemorySubscription, ScopeFn, Write};
pub use types::{BatchHandler, ChangeFeed, FeedConfig, Reply, Subscription, SubscriptionId};
