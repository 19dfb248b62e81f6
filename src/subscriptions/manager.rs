//! Subscription manager for broadcasting committed changes.

use crossbeam_channel::{bounded, Sender};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use super::types::{
    Change, ChangeSet, DropReason, StoreEvent, SubscriptionConfig, SubscriptionFilter,
    SubscriptionHandle, SubscriptionId,
};

/// Callback invoked synchronously after each matching commit.
pub type ChangeCallback = Arc<dyn Fn(&ChangeSet) + Send + Sync>;

/// Internal channel subscription state.
struct Subscription {
    filter: SubscriptionFilter,
    sender: Sender<StoreEvent>,
}

impl Subscription {
    /// Try to send an event. Returns false if buffer is full (subscriber will be dropped).
    fn try_send(&self, event: StoreEvent) -> bool {
        self.sender.try_send(event).is_ok()
    }
}

struct Listener {
    filter: SubscriptionFilter,
    callback: ChangeCallback,
}

/// Manages subscriptions and broadcasts change sets.
pub struct SubscriptionManager {
    /// Channel subscriptions by ID.
    subscriptions: RwLock<HashMap<SubscriptionId, Subscription>>,
    /// Callback listeners by ID.
    listeners: RwLock<HashMap<SubscriptionId, Listener>>,
    /// Counter for generating subscription IDs.
    next_id: AtomicU64,
}

impl SubscriptionManager {
    /// Create a new subscription manager.
    pub fn new() -> Self {
        Self {
            subscriptions: RwLock::new(HashMap::new()),
            listeners: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    fn allocate_id(&self) -> SubscriptionId {
        SubscriptionId(self.next_id.fetch_add(1, Ordering::SeqCst))
    }

    /// Create a channel subscription.
    pub fn subscribe(&self, config: SubscriptionConfig) -> SubscriptionHandle {
        let id = self.allocate_id();
        let (sender, receiver) = bounded(config.buffer_size);

        self.subscriptions.write().insert(
            id,
            Subscription {
                filter: config.filter,
                sender,
            },
        );

        SubscriptionHandle { id, receiver }
    }

    /// Register a callback.
    pub fn on_change<F>(&self, filter: SubscriptionFilter, callback: F) -> SubscriptionId
    where
        F: Fn(&ChangeSet) + Send + Sync + 'static,
    {
        let id = self.allocate_id();
        self.listeners.write().insert(
            id,
            Listener {
                filter,
                callback: Arc::new(callback),
            },
        );
        id
    }

    /// Unsubscribe and clean up. Works for both channels and callbacks.
    pub fn unsubscribe(&self, id: SubscriptionId) {
        if self.listeners.write().remove(&id).is_some() {
            return;
        }
        if let Some(sub) = self.subscriptions.write().remove(&id) {
            // Best effort
            let _ = sub.sender.try_send(StoreEvent::Dropped {
                reason: DropReason::Unsubscribed,
            });
        }
    }

    /// Number of live subscriptions and listeners.
    pub fn subscription_count(&self) -> usize {
        self.subscriptions.read().len() + self.listeners.read().len()
    }

    /// Deliver a commit to every matching subscriber.
    ///
    /// Callbacks run after the registry locks are released, so a callback may
    /// subscribe, unsubscribe or touch the store.
    pub fn broadcast(&self, seq: u64, changes: &[Change]) {
        let filtered = |filter: &SubscriptionFilter| -> Option<ChangeSet> {
            let matching: Vec<Change> = changes
                .iter()
                .filter(|c| filter.matches(c))
                .cloned()
                .collect();
            if matching.is_empty() {
                None
            } else {
                Some(ChangeSet {
                    seq,
                    changes: matching,
                })
            }
        };

        let mut to_remove = Vec::new();
        {
            let subs = self.subscriptions.read();
            for (id, sub) in subs.iter() {
                if let Some(set) = filtered(&sub.filter) {
                    if !sub.try_send(StoreEvent::Committed { changes: set }) {
                        to_remove.push(*id);
                    }
                }
            }
        }

        if !to_remove.is_empty() {
            let mut subs = self.subscriptions.write();
            for id in to_remove {
                if let Some(sub) = subs.remove(&id) {
                    tracing::warn!(subscription = id.0, "dropping slow subscriber");
                    let _ = sub.sender.try_send(StoreEvent::Dropped {
                        reason: DropReason::BufferOverflow,
                    });
                }
            }
        }

        let pending: Vec<(ChangeCallback, ChangeSet)> = {
            let listeners = self.listeners.read();
            listeners
                .values()
                .filter_map(|l| filtered(&l.filter).map(|set| (Arc::clone(&l.callback), set)))
                .collect()
        };

        for (callback, set) in pending {
            callback(&set);
        }
    }
}

impl Default for SubscriptionManager {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Counter, CounterDetail, CounterId, DetailId, Timestamp};
    use parking_lot::Mutex;
    use std::time::Duration;

    fn counter_created(id: u64) -> Change {
        Change::CounterCreated {
            counter: Counter {
                id: CounterId(id),
                name: format!("c{}", id),
                timestamp: Timestamp::now(),
            },
        }
    }

    fn detail_updated(counter: u64) -> Change {
        Change::DetailUpdated {
            detail: CounterDetail {
                id: DetailId(1),
                counter: CounterId(counter),
                name: "d".to_string(),
                count: 1,
            },
        }
    }

    #[test]
    fn test_subscribe_unsubscribe() {
        let manager = SubscriptionManager::new();

        let handle = manager.subscribe(SubscriptionConfig::default());
        let listener = manager.on_change(SubscriptionFilter::all(), |_| {});
        assert_eq!(manager.subscription_count(), 2);

        manager.unsubscribe(handle.id);
        manager.unsubscribe(listener);
        assert_eq!(manager.subscription_count(), 0);

        let event = handle.recv_timeout(Duration::from_millis(100)).unwrap();
        assert!(matches!(
            event,
            StoreEvent::Dropped {
                reason: DropReason::Unsubscribed
            }
        ));
    }

    #[test]
    fn test_broadcast_to_matching() {
        let manager = SubscriptionManager::new();
        let handle = manager.subscribe(SubscriptionConfig {
            filter: SubscriptionFilter::details_of(CounterId(1)),
            ..Default::default()
        });

        manager.broadcast(1, &[counter_created(1), detail_updated(1), detail_updated(2)]);

        match handle.recv_timeout(Duration::from_millis(100)).unwrap() {
            StoreEvent::Committed { changes } => {
                assert_eq!(changes.seq, 1);
                assert_eq!(changes.changes, vec![detail_updated(1)]);
            }
            other => panic!("Expected Committed event, got {:?}", other),
        }
    }

    #[test]
    fn test_broadcast_filters_non_matching() {
        let manager = SubscriptionManager::new();
        let handle = manager.subscribe(SubscriptionConfig {
            filter: SubscriptionFilter::counters(),
            ..Default::default()
        });

        manager.broadcast(1, &[detail_updated(1)]);

        let result = handle.recv_timeout(Duration::from_millis(50));
        assert!(result.is_err());
    }

    #[test]
    fn test_drop_slow_subscriber() {
        let manager = SubscriptionManager::new();
        let _handle = manager.subscribe(SubscriptionConfig {
            buffer_size: 2,
            filter: SubscriptionFilter::all(),
        });

        for i in 0..10 {
            manager.broadcast(i, &[counter_created(i)]);
        }

        assert_eq!(manager.subscription_count(), 0);
    }

    #[test]
    fn test_callback_invoked_synchronously() {
        let manager = SubscriptionManager::new();
        let seen = Arc::new(Mutex::new(Vec::new()));

        let sink = Arc::clone(&seen);
        manager.on_change(SubscriptionFilter::counters(), move |set| {
            sink.lock().push(set.seq);
        });

        manager.broadcast(3, &[counter_created(1)]);
        manager.broadcast(4, &[detail_updated(1)]);

        assert_eq!(*seen.lock(), vec![3]);
    }

    #[test]
    fn test_callback_may_unsubscribe_itself() {
        let manager = Arc::new(SubscriptionManager::new());
        let own_id = Arc::new(Mutex::new(None));

        let inner_manager = Arc::clone(&manager);
        let inner_id = Arc::clone(&own_id);
        let id = manager.on_change(SubscriptionFilter::all(), move |_| {
            if let Some(id) = *inner_id.lock() {
                inner_manager.unsubscribe(id);
            }
        });
        *own_id.lock() = Some(id);

        manager.broadcast(1, &[counter_created(1)]);
        assert_eq!(manager.subscription_count(), 0);
    }
}
