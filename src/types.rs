//! Core types for the counter store.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

/// Name shown for entities whose stored name is empty.
pub const PLACEHOLDER_NAME: &str = "Unknown";

/// Unique identifier for a counter.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct CounterId(pub u64);

impl fmt::Debug for CounterId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CounterId({})", self.0)
    }
}

impl fmt::Display for CounterId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Unique identifier for a counter detail.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct DetailId(pub u64);

impl fmt::Debug for DetailId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DetailId({})", self.0)
    }
}

impl fmt::Display for DetailId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Microseconds since Unix epoch.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default)]
pub struct Timestamp(pub i64);

impl Timestamp {
    /// Current time.
    pub fn now() -> Self {
        let duration = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default();
        Timestamp(duration.as_micros() as i64)
    }
}

impl fmt::Debug for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Timestamp({})", self.0)
    }
}

fn display_name(name: &str) -> &str {
    if name.trim().is_empty() {
        PLACEHOLDER_NAME
    } else {
        name
    }
}

/// A named group of tallies.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Counter {
    /// Unique identifier (assigned by store).
    pub id: CounterId,

    /// Name as entered by the user.
    pub name: String,

    /// When the counter was created. Default listing order.
    pub timestamp: Timestamp,
}

impl Counter {
    /// Name for display, falling back to a placeholder when empty.
    pub fn display_name(&self) -> &str {
        display_name(&self.name)
    }
}

/// A single named tally owned by a counter.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CounterDetail {
    /// Unique identifier (assigned by store).
    pub id: DetailId,

    /// Owning counter.
    pub counter: CounterId,

    /// Name as entered by the user.
    pub name: String,

    /// Current tally. Not bounded at the storage layer.
    pub count: i64,
}

impl CounterDetail {
    /// Name for display, falling back to a placeholder when empty.
    pub fn display_name(&self) -> &str {
        display_name(&self.name)
    }
}

/// A single change to the tables.
///
/// A commit is a list of mutations that is journaled and applied as a unit.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Mutation {
    CreateCounter {
        id: CounterId,
        name: String,
        timestamp: Timestamp,
    },
    CreateDetail {
        id: DetailId,
        counter: CounterId,
        name: String,
        count: i64,
    },
    SetCount {
        id: DetailId,
        count: i64,
    },
    DeleteDetail {
        id: DetailId,
    },
    DeleteCounter {
        id: CounterId,
    },
}

/// Store statistics.
#[derive(Clone, Debug, Default)]
pub struct StoreStats {
    pub counter_count: u64,
    pub detail_count: u64,
    pub journal_size_bytes: u64,
    /// Journal entries written since the last checkpoint.
    pub journal_entries: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_name_fallback() {
        let counter = Counter {
            id: CounterId(1),
            name: "   ".to_string(),
            timestamp: Timestamp::now(),
        };
        assert_eq!(counter.display_name(), PLACEHOLDER_NAME);

        let detail = CounterDetail {
            id: DetailId(1),
            counter: CounterId(1),
            name: "Cups".to_string(),
            count: 3,
        };
        assert_eq!(detail.display_name(), "Cups");
    }

    #[test]
    fn test_timestamp_ordering() {
        let earlier = Timestamp::now();
        let later = Timestamp(earlier.0 + 1);
        assert!(earlier < later);
    }

    #[test]
    fn test_mutation_msgpack_roundtrip() {
        let mutation = Mutation::CreateDetail {
            id: DetailId(7),
            counter: CounterId(2),
            name: "Birds, big".to_string(),
            count: 5,
        };
        let encoded = rmp_serde::to_vec(&mutation).unwrap();
        let decoded: Mutation = rmp_serde::from_slice(&encoded).unwrap();
        assert_eq!(decoded, mutation);
    }
}
