//! User preferences that shape counting behaviour.

use crate::error::{Result, StoreError};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::Write;
use std::ops::RangeInclusive;
use std::path::{Path, PathBuf};
use tracing::warn;

/// Allowed step sizes.
pub const STEP_COUNT_RANGE: RangeInclusive<u32> = 0..=100;

/// Allowed list padding (presentation only).
pub const LIST_PADDING_RANGE: RangeInclusive<f64> = 1.0..=15.0;

/// Counting preferences.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Amount added or removed per increment/decrement.
    pub step_count: u32,

    /// New details start at 0 instead of `step_count`.
    pub start_counting_at_zero: bool,

    /// Row padding for list views. Not used by the core.
    pub list_padding: f64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            step_count: 1,
            start_counting_at_zero: true,
            list_padding: 5.0,
        }
    }
}

impl Settings {
    /// Initial tally for a newly created detail.
    pub fn initial_count(&self) -> i64 {
        if self.start_counting_at_zero {
            0
        } else {
            i64::from(self.step_count)
        }
    }

    /// Reject out-of-range values.
    pub fn validate(&self) -> Result<()> {
        if !STEP_COUNT_RANGE.contains(&self.step_count) {
            return Err(StoreError::InvalidSettings(format!(
                "step_count {} outside {:?}",
                self.step_count, STEP_COUNT_RANGE
            )));
        }
        if !LIST_PADDING_RANGE.contains(&self.list_padding) {
            return Err(StoreError::InvalidSettings(format!(
                "list_padding {} outside {:?}",
                self.list_padding, LIST_PADDING_RANGE
            )));
        }
        Ok(())
    }

    /// Clamp every value into its allowed range.
    pub fn clamped(mut self) -> Self {
        self.step_count = self
            .step_count
            .clamp(*STEP_COUNT_RANGE.start(), *STEP_COUNT_RANGE.end());
        self.list_padding = if self.list_padding.is_nan() {
            Settings::default().list_padding
        } else {
            self.list_padding
                .clamp(*LIST_PADDING_RANGE.start(), *LIST_PADDING_RANGE.end())
        };
        self
    }
}

/// Loads and saves [`Settings`] as a JSON file.
#[derive(Clone, Debug)]
pub struct SettingsStore {
    path: PathBuf,
}

impl SettingsStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load settings. A missing file yields the defaults; out-of-range values
    /// are clamped.
    pub fn load(&self) -> Result<Settings> {
        if !self.path.exists() {
            return Ok(Settings::default());
        }

        let raw = fs::read(&self.path)?;
        let settings: Settings = serde_json::from_slice(&raw)
            .map_err(|e| StoreError::Deserialization(e.to_string()))?;

        if let Err(e) = settings.validate() {
            warn!(path = %self.path.display(), error = %e, "clamping settings");
            return Ok(settings.clamped());
        }
        Ok(settings)
    }

    /// Save settings atomically. Invalid settings are rejected.
    pub fn save(&self, settings: &Settings) -> Result<()> {
        settings.validate()?;

        let encoded = serde_json::to_vec_pretty(settings)?;
        let tmp_path = self.path.with_extension("tmp");

        let written = (|| -> Result<()> {
            let mut file = fs::File::create(&tmp_path)?;
            file.write_all(&encoded)?;
            file.sync_all()?;
            fs::rename(&tmp_path, &self.path)?;
            Ok(())
        })();

        if written.is_err() {
            let _ = fs::remove_file(&tmp_path);
        }
        written
    }
}
