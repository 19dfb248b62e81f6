//! Checkpoint file holding the full table state.
//!
//! Layout: magic | version | last journal seq (u64) | body len (u64) |
//! msgpack body | crc32 of body. Written to a temporary sibling and renamed
//! into place, so a reader sees either the old or the new checkpoint.

use crate::error::{Result, StoreError};
use crate::tables::Tables;
use std::fs::{self, File, OpenOptions};
use std::io::{Read, Write};
use std::path::Path;

/// Magic bytes for snapshot file.
const SNAPSHOT_MAGIC: &[u8; 4] = b"ECS\0";

/// Current snapshot format version.
const SNAPSHOT_VERSION: u8 = 1;

/// Table state as of a journal sequence number.
#[derive(Clone, Debug, Default)]
pub struct Snapshot {
    /// Last journal entry folded into `tables`.
    pub last_seq: u64,
    pub tables: Tables,
}

impl Snapshot {
    /// Write the snapshot atomically.
    pub fn save(path: &Path, last_seq: u64, tables: &Tables) -> Result<()> {
        let encoded = rmp_serde::to_vec(tables)?;
        let tmp_path = path.with_extension("tmp");

        let written = (|| -> Result<()> {
            let mut file = OpenOptions::new()
                .write(true)
                .create(true)
                .truncate(true)
                .open(&tmp_path)?;

            file.write_all(SNAPSHOT_MAGIC)?;
            file.write_all(&[SNAPSHOT_VERSION])?;
            file.write_all(&last_seq.to_le_bytes())?;
            file.write_all(&(encoded.len() as u64).to_le_bytes())?;
            file.write_all(&encoded)?;
            file.write_all(&crc32fast::hash(&encoded).to_le_bytes())?;
            file.sync_all()?;

            fs::rename(&tmp_path, path)?;
            Ok(())
        })();

        if written.is_err() {
            let _ = fs::remove_file(&tmp_path);
        }
        written
    }

    /// Load a snapshot, or `None` if the file does not exist.
    pub fn load(path: &Path) -> Result<Option<Self>> {
        if !path.exists() {
            return Ok(None);
        }

        let mut file = File::open(path)?;

        let mut magic = [0u8; 4];
        file.read_exact(&mut magic)?;
        if &magic != SNAPSHOT_MAGIC {
            return Err(StoreError::InvalidFormat("Invalid snapshot magic".into()));
        }

        let mut version = [0u8; 1];
        file.read_exact(&mut version)?;
        if version[0] != SNAPSHOT_VERSION {
            return Err(StoreError::InvalidFormat(format!(
                "Unsupported snapshot version: {}",
                version[0]
            )));
        }

        let mut seq_bytes = [0u8; 8];
        file.read_exact(&mut seq_bytes)?;
        let last_seq = u64::from_le_bytes(seq_bytes);

        let mut len_bytes = [0u8; 8];
        file.read_exact(&mut len_bytes)?;
        let len = u64::from_le_bytes(len_bytes);

        let file_len = file.metadata()?.len();
        if len > file_len {
            return Err(StoreError::Corruption("Snapshot body length exceeds file".into()));
        }

        let mut encoded = vec![0u8; len as usize];
        file.read_exact(&mut encoded)
            .map_err(|_| StoreError::Corruption("Snapshot truncated".into()))?;

        let mut checksum_bytes = [0u8; 4];
        file.read_exact(&mut checksum_bytes)
            .map_err(|_| StoreError::Corruption("Snapshot truncated".into()))?;
        let stored = u32::from_le_bytes(checksum_bytes);
        let computed = crc32fast::hash(&encoded);
        if stored != computed {
            return Err(StoreError::ChecksumMismatch {
                expected: stored,
                got: computed,
            });
        }

        let tables: Tables = rmp_serde::from_slice(&encoded)?;
        Ok(Some(Self { last_seq, tables }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Mutation, Timestamp};
    use tempfile::TempDir;

    fn sample_tables() -> Tables {
        let mut tables = Tables::default();
        let id = tables.peek_counter_id();
        tables
            .apply(&Mutation::CreateCounter {
                id,
                name: "Coffee".to_string(),
                timestamp: Timestamp::now(),
            })
            .unwrap();
        tables
    }

    #[test]
    fn test_missing_snapshot_is_none() {
        let dir = TempDir::new().unwrap();
        assert!(Snapshot::load(&dir.path().join("snapshot.bin")).unwrap().is_none());
    }

    #[test]
    fn test_save_and_load() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("snapshot.bin");

        Snapshot::save(&path, 12, &sample_tables()).unwrap();
        assert!(!path.with_extension("tmp").exists());

        let loaded = Snapshot::load(&path).unwrap().unwrap();
        assert_eq!(loaded.last_seq, 12);
        assert_eq!(loaded.tables.counter_count(), 1);
        assert_eq!(loaded.tables.counters_sorted()[0].name, "Coffee");
    }

    #[test]
    fn test_corrupted_body_detected() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("snapshot.bin");
        Snapshot::save(&path, 1, &sample_tables()).unwrap();

        let mut bytes = fs::read(&path).unwrap();
        let body_start = 4 + 1 + 8 + 8;
        bytes[body_start + 1] ^= 0xFF;
        fs::write(&path, &bytes).unwrap();

        let result = Snapshot::load(&path);
        assert!(matches!(result, Err(StoreError::ChecksumMismatch { .. })));
    }
}
