//! # EasyCount
//!
//! A local store for named tally counters.
//!
//! ## Core Concepts
//!
//! - **Counters**: named, timestamped groups listed oldest first
//! - **Details**: named integer tallies owned by one counter, listed by name
//! - **Journal**: every change is written to an append-only log before it is
//!   visible; `save()` folds the log into a snapshot
//! - **Subscriptions**: callbacks or channels notified after each commit
//! - **Export**: a counter's details as a `Name,Count` CSV file
//!
//! ## Example
//!
//! ```ignore
//! use easycount::{CounterService, Settings, Store, StoreConfig};
//!
//! let store = Store::open_or_create(StoreConfig {
//!     path: "./counts".into(),
//!     ..Default::default()
//! })?;
//! let mut service = CounterService::new(store, Settings::default());
//!
//! let mut input = String::from("Birds");
//! let birds = service.create_counter(&mut input)?.unwrap();
//!
//! let mut input = String::from("Crow");
//! let crow = service.create_counter_detail(birds.id, &mut input)?.unwrap();
//! service.increment(crow.id)?;
//!
//! let export = service.export_csv(birds.id)?;
//! println!("wrote {}", export.path.display());
//! ```

pub mod error;
pub mod export;
pub mod journal;
pub mod operations;
pub mod settings;
pub mod snapshot;
pub mod store;
pub mod subscriptions;
pub mod tables;
pub mod types;

// Re-exports
pub use error::{Result, StoreError};
pub use export::{write_details, CsvExport, CsvExporter, CSV_HEADER};
pub use journal::{Journal, JournalEntry};
pub use operations::{Alert, AlertKind, CounterService, COUNT_RANGE};
pub use settings::{Settings, SettingsStore};
pub use store::{Store, StoreConfig};
pub use subscriptions::{
    Change, ChangeSet, DropReason, StoreEvent, SubscriptionConfig, SubscriptionFilter,
    SubscriptionHandle, SubscriptionId, SubscriptionManager,
};
pub use types::*;
