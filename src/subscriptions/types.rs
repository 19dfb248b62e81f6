//! Subscription types for live store updates.

use crate::types::{Counter, CounterDetail, CounterId, DetailId};
use serde::{Deserialize, Serialize};

/// Configuration for a channel subscription.
#[derive(Clone, Debug)]
pub struct SubscriptionConfig {
    /// Max buffered events before dropping subscriber.
    /// Default: 1000
    pub buffer_size: usize,

    /// Filter criteria.
    pub filter: SubscriptionFilter,
}

impl Default for SubscriptionConfig {
    fn default() -> Self {
        Self {
            buffer_size: 1000,
            filter: SubscriptionFilter::all(),
        }
    }
}

/// Which changes a subscriber wants to hear about.
///
/// A filter mirrors a live query: the counter list, or the detail list of one
/// counter.
#[derive(Clone, Debug, Default)]
pub struct SubscriptionFilter {
    /// Include counter created/deleted changes.
    pub include_counters: bool,

    /// Include detail changes.
    pub include_details: bool,

    /// Restrict detail changes (and the counter's own deletion) to one counter.
    pub counter: Option<CounterId>,
}

impl SubscriptionFilter {
    /// Changes that affect `list_counters`.
    pub fn counters() -> Self {
        Self {
            include_counters: true,
            ..Default::default()
        }
    }

    /// Changes that affect `list_counter_details(counter)`.
    pub fn details_of(counter: CounterId) -> Self {
        Self {
            include_details: true,
            counter: Some(counter),
            ..Default::default()
        }
    }

    /// Everything.
    pub fn all() -> Self {
        Self {
            include_counters: true,
            include_details: true,
            counter: None,
        }
    }

    /// Check if a change passes this filter.
    pub fn matches(&self, change: &Change) -> bool {
        match change {
            Change::CounterCreated { .. } => self.include_counters,
            Change::CounterDeleted { id } => {
                self.include_counters || (self.include_details && self.counter == Some(*id))
            }
            _ => {
                self.include_details
                    && self
                        .counter
                        .map_or(true, |counter| change.counter_id() == counter)
            }
        }
    }
}

/// A single applied change.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Change {
    CounterCreated { counter: Counter },
    CounterDeleted { id: CounterId },
    DetailCreated { detail: CounterDetail },
    DetailUpdated { detail: CounterDetail },
    DetailDeleted { id: DetailId, counter: CounterId },
}

impl Change {
    /// The counter this change belongs to.
    pub fn counter_id(&self) -> CounterId {
        match self {
            Change::CounterCreated { counter } => counter.id,
            Change::CounterDeleted { id } => *id,
            Change::DetailCreated { detail } | Change::DetailUpdated { detail } => detail.counter,
            Change::DetailDeleted { counter, .. } => *counter,
        }
    }
}

/// The visible result of one commit.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeSet {
    /// Journal sequence of the commit.
    pub seq: u64,
    pub changes: Vec<Change>,
}

/// Events delivered to channel subscribers.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StoreEvent {
    /// A commit touched something the subscriber watches.
    Committed { changes: ChangeSet },

    /// Subscription was dropped.
    Dropped { reason: DropReason },
}

/// Why a subscription was dropped.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DropReason {
    /// Send buffer overflowed (slow consumer).
    BufferOverflow,
    /// Explicitly unsubscribed.
    Unsubscribed,
}

/// Unique identifier for a subscription.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SubscriptionId(pub u64);

/// Handle to a channel subscription.
pub struct SubscriptionHandle {
    pub id: SubscriptionId,
    /// Channel to receive events.
    pub receiver: crossbeam_channel::Receiver<StoreEvent>,
}

impl SubscriptionHandle {
    /// Receive the next event (blocking).
    pub fn recv(&self) -> Result<StoreEvent, crossbeam_channel::RecvError> {
        self.receiver.recv()
    }

    /// Try to receive an event (non-blocking).
    pub fn try_recv(&self) -> Result<StoreEvent, crossbeam_channel::TryRecvError> {
        self.receiver.try_recv()
    }

    /// Receive with timeout.
    pub fn recv_timeout(
        &self,
        timeout: std::time::Duration,
    ) -> Result<StoreEvent, crossbeam_channel::RecvTimeoutError> {
        self.receiver.recv_timeout(timeout)
    }

    /// Drain everything currently buffered.
    pub fn drain(&self) -> Vec<StoreEvent> {
        self.receiver.try_iter().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Timestamp;

    fn detail(counter: u64) -> CounterDetail {
        CounterDetail {
            id: DetailId(1),
            counter: CounterId(counter),
            name: "x".to_string(),
            count: 0,
        }
    }

    #[test]
    fn test_details_filter_scoped_to_counter() {
        let filter = SubscriptionFilter::details_of(CounterId(1));

        assert!(filter.matches(&Change::DetailUpdated { detail: detail(1) }));
        assert!(!filter.matches(&Change::DetailUpdated { detail: detail(2) }));
        assert!(filter.matches(&Change::CounterDeleted { id: CounterId(1) }));
        assert!(!filter.matches(&Change::CounterDeleted { id: CounterId(2) }));
    }

    #[test]
    fn test_counters_filter_ignores_details() {
        let filter = SubscriptionFilter::counters();
        let counter = Counter {
            id: CounterId(3),
            name: "c".to_string(),
            timestamp: Timestamp::now(),
        };

        assert!(filter.matches(&Change::CounterCreated { counter }));
        assert!(!filter.matches(&Change::DetailCreated { detail: detail(3) }));
    }

    #[test]
    fn test_change_serializes_tagged() {
        let change = Change::DetailDeleted {
            id: DetailId(4),
            counter: CounterId(2),
        };
        let json = serde_json::to_value(&change).unwrap();
        assert_eq!(json["type"], "detail_deleted");
        assert_eq!(json["id"], 4);
    }
}
