//! Main Store struct tying all components together.

use crate::error::{Result, StoreError};
use crate::journal::Journal;
use crate::snapshot::Snapshot;
use crate::subscriptions::{
    Change, ChangeSet, SubscriptionConfig, SubscriptionFilter, SubscriptionHandle,
    SubscriptionId, SubscriptionManager,
};
use crate::tables::Tables;
use crate::types::{
    Counter, CounterDetail, CounterId, DetailId, Mutation, StoreStats, Timestamp,
};
use fs2::FileExt;
use parking_lot::{Mutex, RwLock};
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Store configuration.
#[derive(Clone, Debug)]
pub struct StoreConfig {
    /// Base path for the store.
    pub path: PathBuf,

    /// Whether to create the store if it doesn't exist.
    pub create_if_missing: bool,

    /// fsync the journal on every commit.
    pub sync_on_commit: bool,

    /// Checkpoint automatically after this many journal entries (0 = never).
    pub checkpoint_interval: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("./easycount-store"),
            create_if_missing: true,
            sync_on_commit: true,
            checkpoint_interval: 1000,
        }
    }
}

/// Magic bytes for store manifest.
const STORE_MAGIC: &[u8; 4] = b"ECT\0";

/// Current store format version.
const STORE_VERSION: u8 = 1;

const JOURNAL_FILE: &str = "journal.log";
const SNAPSHOT_FILE: &str = "snapshot.bin";

/// The counter store.
///
/// Holds every counter and counter detail in memory, backed by a journal and
/// a checkpoint snapshot on disk. Each mutating call is one transaction: it is
/// journaled first, then applied, then announced to subscribers.
pub struct Store {
    /// Store configuration.
    config: StoreConfig,

    /// Lock file for exclusive access.
    _lock_file: File,

    /// Mutation journal.
    journal: Journal,

    /// Committed state.
    tables: RwLock<Tables>,

    /// Live query observers.
    subscriptions: SubscriptionManager,

    /// Serializes commits and checkpoints.
    write_lock: Mutex<()>,
}

impl Store {
    /// Open an existing store or create a new one.
    pub fn open_or_create(config: StoreConfig) -> Result<Self> {
        if config.path.join("MANIFEST").exists() {
            Self::open(config)
        } else if config.create_if_missing {
            Self::create(config)
        } else {
            Err(StoreError::NotInitialized)
        }
    }

    /// Create a new store.
    ///
    /// Fails with `AlreadyExists` if the directory already holds store files.
    pub fn create(config: StoreConfig) -> Result<Self> {
        fs::create_dir_all(&config.path)?;

        let lock_file = Self::acquire_lock(&config.path)?;

        let journal_path = config.path.join(JOURNAL_FILE);
        let existing = ["MANIFEST", JOURNAL_FILE, SNAPSHOT_FILE]
            .iter()
            .any(|name| config.path.join(name).exists());
        if existing {
            return Err(StoreError::AlreadyExists(config.path.display().to_string()));
        }

        Self::write_manifest(&config.path)?;
        let (journal, _) = Journal::open(journal_path)?;

        info!(path = %config.path.display(), "created counter store");

        Ok(Self {
            config,
            _lock_file: lock_file,
            journal,
            tables: RwLock::new(Tables::default()),
            subscriptions: SubscriptionManager::new(),
            write_lock: Mutex::new(()),
        })
    }

    /// Open an existing store.
    pub fn open(config: StoreConfig) -> Result<Self> {
        if !config.path.join("MANIFEST").exists() {
            return Err(StoreError::NotInitialized);
        }
        Self::verify_manifest(&config.path)?;
        let lock_file = Self::acquire_lock(&config.path)?;

        let snapshot = Snapshot::load(&config.path.join(SNAPSHOT_FILE))?.unwrap_or_default();
        let (journal, entries) = Journal::open(config.path.join(JOURNAL_FILE))?;

        let mut tables = snapshot.tables;
        let mut replayed = 0usize;
        for entry in entries.iter().filter(|e| e.seq > snapshot.last_seq) {
            tables.apply_all(&entry.mutations).map_err(|e| {
                StoreError::Corruption(format!("journal entry {} does not apply: {}", entry.seq, e))
            })?;
            replayed += 1;
        }
        journal.ensure_next_seq(snapshot.last_seq + 1);

        info!(
            path = %config.path.display(),
            counters = tables.counter_count(),
            details = tables.detail_count(),
            replayed,
            "opened counter store"
        );

        Ok(Self {
            config,
            _lock_file: lock_file,
            journal,
            tables: RwLock::new(tables),
            subscriptions: SubscriptionManager::new(),
            write_lock: Mutex::new(()),
        })
    }

    // --- Commit ---

    /// Journal, apply and announce one batch of mutations.
    ///
    /// `build` sees the committed tables and returns the mutations to write;
    /// an empty batch is a no-op. Nothing becomes visible unless the journal
    /// write succeeded.
    fn commit<F>(&self, build: F) -> Result<Vec<Change>>
    where
        F: FnOnce(&Tables) -> Result<Vec<Mutation>>,
    {
        let guard = self.write_lock.lock();

        let mutations = build(&self.tables.read())?;
        if mutations.is_empty() {
            return Ok(Vec::new());
        }

        // Validate against a scratch copy before anything hits disk
        let mut next = self.tables.read().clone();
        let changes = next.apply_all(&mutations)?;

        let count = mutations.len();
        let entry = self.journal.append(mutations, self.config.sync_on_commit)?;
        *self.tables.write() = next;

        debug!(seq = entry.seq, mutations = count, "committed");

        if self.config.checkpoint_interval > 0
            && self.journal.entry_count() >= self.config.checkpoint_interval
        {
            if let Err(e) = self.checkpoint_locked() {
                warn!(error = %e, "automatic checkpoint failed");
            }
        }

        drop(guard);
        self.subscriptions.broadcast(entry.seq, &changes);

        Ok(changes)
    }

    // --- Counter Operations ---

    /// Create a counter stamped with the current time.
    pub fn create_counter(&self, name: impl Into<String>) -> Result<Counter> {
        let name = name.into();
        let changes = self.commit(|tables| {
            Ok(vec![Mutation::CreateCounter {
                id: tables.peek_counter_id(),
                name,
                timestamp: Timestamp::now(),
            }])
        })?;

        match changes.into_iter().next() {
            Some(Change::CounterCreated { counter }) => Ok(counter),
            _ => Err(StoreError::Corruption("create produced no counter".into())),
        }
    }

    /// Delete a counter and, first, every detail it owns.
    pub fn delete_counter(&self, id: CounterId) -> Result<()> {
        self.commit(|tables| {
            if tables.counter(id).is_none() {
                return Err(StoreError::CounterNotFound(id));
            }
            Ok(Self::cascade(tables, &[id]))
        })?;
        Ok(())
    }

    /// Delete several counters in one transaction. Unknown ids are skipped.
    ///
    /// Returns the number of counters removed.
    pub fn delete_counters(&self, ids: &[CounterId]) -> Result<usize> {
        let changes = self.commit(|tables| {
            let mut existing: Vec<CounterId> = ids
                .iter()
                .copied()
                .filter(|id| tables.counter(*id).is_some())
                .collect();
            existing.sort();
            existing.dedup();
            Ok(Self::cascade(tables, &existing))
        })?;
        Ok(changes
            .iter()
            .filter(|c| matches!(c, Change::CounterDeleted { .. }))
            .count())
    }

    fn cascade(tables: &Tables, counters: &[CounterId]) -> Vec<Mutation> {
        let mut mutations = Vec::new();
        for id in counters {
            mutations.extend(
                tables
                    .detail_ids_of(*id)
                    .into_iter()
                    .map(|detail| Mutation::DeleteDetail { id: detail }),
            );
            mutations.push(Mutation::DeleteCounter { id: *id });
        }
        mutations
    }

    /// Get a counter by ID.
    pub fn get_counter(&self, id: CounterId) -> Option<Counter> {
        self.tables.read().counter(id).cloned()
    }

    /// All counters, oldest first.
    pub fn list_counters(&self) -> Vec<Counter> {
        self.tables.read().counters_sorted()
    }

    // --- Detail Operations ---

    /// Create a detail under `counter` with an initial tally.
    pub fn create_counter_detail(
        &self,
        counter: CounterId,
        name: impl Into<String>,
        start_count: i64,
    ) -> Result<CounterDetail> {
        let name = name.into();
        let changes = self.commit(|tables| {
            Ok(vec![Mutation::CreateDetail {
                id: tables.peek_detail_id(),
                counter,
                name,
                count: start_count,
            }])
        })?;

        match changes.into_iter().next() {
            Some(Change::DetailCreated { detail }) => Ok(detail),
            _ => Err(StoreError::Corruption("create produced no detail".into())),
        }
    }

    /// Overwrite a detail's tally.
    pub fn set_count(&self, id: DetailId, count: i64) -> Result<CounterDetail> {
        let changes = self.commit(|tables| {
            let current = tables.detail(id).ok_or(StoreError::DetailNotFound(id))?;
            if current.count == count {
                return Ok(Vec::new());
            }
            Ok(vec![Mutation::SetCount { id, count }])
        })?;

        match changes.into_iter().next() {
            Some(Change::DetailUpdated { detail }) => Ok(detail),
            _ => self.get_counter_detail(id).ok_or(StoreError::DetailNotFound(id)),
        }
    }

    /// Delete one detail. The owning counter is untouched.
    pub fn delete_counter_detail(&self, id: DetailId) -> Result<()> {
        self.commit(|tables| {
            if tables.detail(id).is_none() {
                return Err(StoreError::DetailNotFound(id));
            }
            Ok(vec![Mutation::DeleteDetail { id }])
        })?;
        Ok(())
    }

    /// Delete several details in one transaction. Unknown ids are skipped.
    pub fn delete_counter_details(&self, ids: &[DetailId]) -> Result<usize> {
        let changes = self.commit(|tables| {
            let mut existing: Vec<DetailId> = ids
                .iter()
                .copied()
                .filter(|id| tables.detail(*id).is_some())
                .collect();
            existing.sort();
            existing.dedup();
            Ok(existing
                .into_iter()
                .map(|id| Mutation::DeleteDetail { id })
                .collect())
        })?;
        Ok(changes.len())
    }

    /// Get a detail by ID.
    pub fn get_counter_detail(&self, id: DetailId) -> Option<CounterDetail> {
        self.tables.read().detail(id).cloned()
    }

    /// Details of a counter, sorted by name.
    pub fn list_counter_details(&self, counter: CounterId) -> Vec<CounterDetail> {
        self.tables.read().details_sorted(counter)
    }

    // --- Subscriptions ---

    /// Subscribe through a bounded channel.
    pub fn subscribe(&self, config: SubscriptionConfig) -> SubscriptionHandle {
        self.subscriptions.subscribe(config)
    }

    /// Register a callback fired synchronously after each matching commit.
    pub fn on_change<F>(&self, filter: SubscriptionFilter, callback: F) -> SubscriptionId
    where
        F: Fn(&ChangeSet) + Send + Sync + 'static,
    {
        self.subscriptions.on_change(filter, callback)
    }

    /// Remove a channel subscription or callback.
    pub fn unsubscribe(&self, id: SubscriptionId) {
        self.subscriptions.unsubscribe(id);
    }

    // --- Store Operations ---

    /// Checkpoint: write a snapshot of the tables and truncate the journal.
    ///
    /// On failure the previous snapshot and the journal stay as they were, so
    /// the durable state still equals the in-memory state.
    pub fn save(&self) -> Result<()> {
        let _guard = self.write_lock.lock();
        self.checkpoint_locked()
    }

    fn checkpoint_locked(&self) -> Result<()> {
        let last_seq = self.journal.next_seq() - 1;
        {
            let tables = self.tables.read();
            Snapshot::save(&self.config.path.join(SNAPSHOT_FILE), last_seq, &tables)?;
        }
        // Entries up to last_seq are now in the snapshot; a crash before the
        // clear only leaves entries that replay skips.
        self.journal.clear()?;
        info!(seq = last_seq, "checkpoint written");
        Ok(())
    }

    /// Sync the journal to disk.
    pub fn sync(&self) -> Result<()> {
        self.journal.sync()
    }

    /// Get store statistics.
    pub fn stats(&self) -> StoreStats {
        let tables = self.tables.read();
        StoreStats {
            counter_count: tables.counter_count() as u64,
            detail_count: tables.detail_count() as u64,
            journal_size_bytes: self.journal.size(),
            journal_entries: self.journal.entry_count(),
        }
    }

    /// Get the store path.
    pub fn path(&self) -> &Path {
        &self.config.path
    }

    // --- Private Helpers ---

    fn write_manifest(path: &Path) -> Result<()> {
        use std::io::Write;

        let manifest_path = path.join("MANIFEST");
        let mut file = File::create(manifest_path)?;

        file.write_all(STORE_MAGIC)?;
        file.write_all(&[STORE_VERSION])?;
        file.sync_all()?;

        Ok(())
    }

    fn verify_manifest(path: &Path) -> Result<()> {
        use std::io::Read;

        let manifest_path = path.join("MANIFEST");
        let mut file = File::open(manifest_path)?;

        let mut magic = [0u8; 4];
        file.read_exact(&mut magic)?;
        if &magic != STORE_MAGIC {
            return Err(StoreError::InvalidFormat("Invalid store magic".into()));
        }

        let mut version = [0u8; 1];
        file.read_exact(&mut version)?;
        if version[0] != STORE_VERSION {
            return Err(StoreError::InvalidFormat(format!(
                "Unsupported store version: {}",
                version[0]
            )));
        }

        Ok(())
    }

    fn acquire_lock(path: &Path) -> Result<File> {
        let lock_path = path.join("LOCK");
        let lock_file = File::create(lock_path)?;

        lock_file
            .try_lock_exclusive()
            .map_err(|_| StoreError::Locked)?;

        Ok(lock_file)
    }
}

impl Drop for Store {
    fn drop(&mut self) {
        // Best-effort sync on drop
        let _ = self.sync();
    }
}
