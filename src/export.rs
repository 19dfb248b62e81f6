//! CSV export of a counter's details.

use crate::error::{Result, StoreError};
use crate::store::Store;
use crate::types::{CounterDetail, CounterId};
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::info;

/// Header row of every export.
pub const CSV_HEADER: [&str; 2] = ["Name", "Count"];

/// Result of a successful export.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CsvExport {
    /// Final location of the CSV file.
    pub path: PathBuf,
    /// Number of detail rows (excluding the header).
    pub rows: usize,
}

/// Writes counter details to CSV files in one directory.
#[derive(Clone, Debug)]
pub struct CsvExporter {
    output_dir: PathBuf,
}

impl Default for CsvExporter {
    fn default() -> Self {
        Self::new(std::env::temp_dir())
    }
}

impl CsvExporter {
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        Self {
            output_dir: output_dir.into(),
        }
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    /// Export every detail of `counter`, sorted by name.
    ///
    /// The file is complete once it appears under its final name; on failure
    /// nothing is left behind.
    pub fn export(&self, store: &Store, counter: CounterId) -> Result<CsvExport> {
        let counter = store
            .get_counter(counter)
            .ok_or(StoreError::CounterNotFound(counter))?;
        let details = store.list_counter_details(counter.id);

        let file_name = format!("{}.csv", file_stem(counter.display_name()));
        let path = self.output_dir.join(&file_name);
        let partial = self.output_dir.join(format!(".{}.partial", file_name));

        let written = (|| -> Result<()> {
            let mut file = File::create(&partial)?;
            write_details(&details, &mut file)?;
            file.sync_all()?;
            fs::rename(&partial, &path)?;
            Ok(())
        })();

        if let Err(e) = written {
            let _ = fs::remove_file(&partial);
            return Err(e);
        }

        info!(
            counter = %counter.id,
            rows = details.len(),
            path = %path.display(),
            "exported counter to CSV"
        );

        Ok(CsvExport {
            path,
            rows: details.len(),
        })
    }
}

/// Serialize details as `Name,Count` CSV.
///
/// Names containing commas, quotes or line breaks are quoted.
pub fn write_details<W: Write>(details: &[CounterDetail], writer: W) -> Result<()> {
    let mut wtr = csv::WriterBuilder::new()
        .terminator(csv::Terminator::Any(b'\n'))
        .from_writer(writer);

    wtr.write_record(CSV_HEADER)?;
    for detail in details {
        let count = detail.count.to_string();
        wtr.write_record([detail.name.as_str(), count.as_str()])?;
    }
    wtr.flush()?;
    Ok(())
}

/// File name stem derived from a counter name.
fn file_stem(name: &str) -> String {
    let stem: String = name
        .trim()
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect();

    if stem.chars().all(|c| c == '_') {
        "counter".to_string()
    } else {
        stem
    }
}
