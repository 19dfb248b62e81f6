//! Subscription system for live store updates.
//!
//! Every commit produces a [`ChangeSet`]. Consumers holding a live view of the
//! counter list or of one counter's details register either:
//! - a callback, invoked synchronously after the commit, or
//! - a bounded channel, dropped when it falls too far behind.
//!
//! # Example
//!
//! ```ignore
//! let id = store.on_change(SubscriptionFilter::details_of(counter.id), |set| {
//!     println!("refresh after commit {}", set.seq);
//! });
//! ```

mod manager;
mod types;

pub use manager::{ChangeCallback, SubscriptionManager};
pub use types::{
    Change, ChangeSet, DropReason, StoreEvent, SubscriptionConfig, SubscriptionFilter,
    SubscriptionHandle, SubscriptionId,
};
