//! Counting rules on top of the store.
//!
//! `CounterService` is what an interactive front end talks to: it validates
//! names, applies the configured step and start policy, keeps tallies inside
//! the stepper range and remembers the last failure as a user-facing alert.

use crate::error::{Result, StoreError};
use crate::export::{CsvExport, CsvExporter};
use crate::settings::Settings;
use crate::store::Store;
use crate::types::{Counter, CounterDetail, CounterId, DetailId};
use std::ops::RangeInclusive;
use tracing::warn;

/// Range a tally is kept in by increment, decrement and direct edits.
pub const COUNT_RANGE: RangeInclusive<i64> = 0..=99_999;

/// Title of alerts raised by failed store writes.
pub const PERSISTENCE_ALERT_TITLE: &str = "Could not save changes";

/// Title of alerts raised by failed exports.
pub const EXPORT_ALERT_TITLE: &str = "An error has occurred during CSV export";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AlertKind {
    Persistence,
    Export,
}

/// A failure to show the user.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Alert {
    pub kind: AlertKind,
    pub title: String,
    pub message: String,
}

impl Alert {
    fn new(kind: AlertKind, error: &StoreError) -> Self {
        let title = match kind {
            AlertKind::Persistence => PERSISTENCE_ALERT_TITLE,
            AlertKind::Export => EXPORT_ALERT_TITLE,
        };
        Self {
            kind,
            title: title.to_string(),
            message: error.to_string(),
        }
    }
}

/// Counter operations bound to one store and one set of preferences.
pub struct CounterService {
    store: Store,
    settings: Settings,
    exporter: CsvExporter,
    /// Only the most recent failure is kept.
    alert: Option<Alert>,
}

impl CounterService {
    /// Out-of-range settings are clamped, as in `set_settings`.
    pub fn new(store: Store, settings: Settings) -> Self {
        Self {
            store,
            settings: settings.clamped(),
            exporter: CsvExporter::default(),
            alert: None,
        }
    }

    /// Use a specific export directory.
    pub fn with_exporter(mut self, exporter: CsvExporter) -> Self {
        self.exporter = exporter;
        self
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Replace the preferences (values are clamped into range).
    pub fn set_settings(&mut self, settings: Settings) {
        self.settings = settings.clamped();
    }

    /// The current alert, if any.
    pub fn alert(&self) -> Option<&Alert> {
        self.alert.as_ref()
    }

    pub fn dismiss_alert(&mut self) {
        self.alert = None;
    }

    fn track<T>(&mut self, kind: AlertKind, result: Result<T>) -> Result<T> {
        if let Err(e) = &result {
            warn!(error = %e, ?kind, "operation failed");
            self.alert = Some(Alert::new(kind, e));
        }
        result
    }

    // --- Creation ---

    /// Create a counter from the input buffer.
    ///
    /// Blank input is ignored. On success the buffer is cleared; on failure it
    /// is kept so the user can retry.
    pub fn create_counter(&mut self, input: &mut String) -> Result<Option<Counter>> {
        if input.trim().is_empty() {
            return Ok(None);
        }
        let result = self.store.create_counter(input.as_str());
        let counter = self.track(AlertKind::Persistence, result)?;
        input.clear();
        Ok(Some(counter))
    }

    /// Create a detail under `counter` from the input buffer.
    ///
    /// The start value follows [`Settings::initial_count`].
    pub fn create_counter_detail(
        &mut self,
        counter: CounterId,
        input: &mut String,
    ) -> Result<Option<CounterDetail>> {
        if input.trim().is_empty() {
            return Ok(None);
        }
        let start = self.settings.initial_count();
        let result = self
            .store
            .create_counter_detail(counter, input.as_str(), start);
        let detail = self.track(AlertKind::Persistence, result)?;
        input.clear();
        Ok(Some(detail))
    }

    // --- Counting ---

    /// Add one step.
    pub fn increment(&mut self, detail: DetailId) -> Result<CounterDetail> {
        self.step(detail, i64::from(self.settings.step_count))
    }

    /// Remove one step, never going below zero.
    pub fn decrement(&mut self, detail: DetailId) -> Result<CounterDetail> {
        self.step(detail, -i64::from(self.settings.step_count))
    }

    fn step(&mut self, detail: DetailId, delta: i64) -> Result<CounterDetail> {
        let result = match self.store.get_counter_detail(detail) {
            Some(current) => {
                let next = clamp_count(current.count.saturating_add(delta));
                self.store.set_count(detail, next)
            }
            None => Err(StoreError::DetailNotFound(detail)),
        };
        self.track(AlertKind::Persistence, result)
    }

    /// Set a tally directly, clamped into [`COUNT_RANGE`].
    pub fn set_count(&mut self, detail: DetailId, value: i64) -> Result<CounterDetail> {
        let result = self.store.set_count(detail, clamp_count(value));
        self.track(AlertKind::Persistence, result)
    }

    // --- Deletion ---

    /// Delete the counters at `positions` of the list the user acted on.
    ///
    /// Positions are turned into ids before anything is deleted, so later
    /// inserts into the store cannot shift them onto another counter.
    /// Returns the number of counters removed.
    pub fn delete_counters_at(&mut self, view: &[Counter], positions: &[usize]) -> Result<usize> {
        let ids: Vec<CounterId> = resolve_positions(view, positions, "counter")
            .map(|c| c.id)
            .collect();
        let result = self.store.delete_counters(&ids);
        self.track(AlertKind::Persistence, result)
    }

    /// Delete the details at `positions` of the list the user acted on.
    pub fn delete_counter_details_at(
        &mut self,
        view: &[CounterDetail],
        positions: &[usize],
    ) -> Result<usize> {
        let ids: Vec<DetailId> = resolve_positions(view, positions, "detail")
            .map(|d| d.id)
            .collect();
        let result = self.store.delete_counter_details(&ids);
        self.track(AlertKind::Persistence, result)
    }

    // --- Export ---

    /// Export a counter's details to CSV.
    pub fn export_csv(&mut self, counter: CounterId) -> Result<CsvExport> {
        let result = self.exporter.export(&self.store, counter);
        self.track(AlertKind::Export, result)
    }

    /// Flush a checkpoint to disk.
    pub fn save(&mut self) -> Result<()> {
        let result = self.store.save();
        self.track(AlertKind::Persistence, result)
    }

    /// Give the store back.
    pub fn into_store(self) -> Store {
        self.store
    }
}

fn clamp_count(value: i64) -> i64 {
    value.clamp(*COUNT_RANGE.start(), *COUNT_RANGE.end())
}

fn resolve_positions<'a, T>(
    view: &'a [T],
    positions: &'a [usize],
    what: &'static str,
) -> impl Iterator<Item = &'a T> + 'a {
    positions.iter().filter_map(move |&position| {
        let item = view.get(position);
        if item.is_none() {
            warn!(position, len = view.len(), what, "ignoring out-of-range delete position");
        }
        item
    })
}
