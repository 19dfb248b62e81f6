//! Append-only mutation journal.
//!
//! Every commit is written here as one framed, checksummed entry before it is
//! applied to the in-memory tables. On open, the entries are replayed on top of
//! the last snapshot. A torn tail (crash in the middle of an append) is cut off;
//! a damaged entry followed by further entries is an error and the file is left
//! as it is.

use crate::error::{Result, StoreError};
use crate::types::{Mutation, Timestamp};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::{BufReader, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use tracing::{error, warn};

/// Magic bytes for journal file.
const JOURNAL_MAGIC: &[u8; 4] = b"ECJ\0";

/// Current journal format version.
const JOURNAL_VERSION: u8 = 1;

/// Header size (magic + version).
const HEADER_SIZE: u64 = 5;

/// Upper bound on a single encoded entry.
const MAX_ENTRY_SIZE: usize = 64 * 1024 * 1024;

/// A single committed batch of mutations.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct JournalEntry {
    /// Monotonic sequence number, never reused within a store.
    pub seq: u64,
    /// When the batch was committed.
    pub timestamp: Timestamp,
    /// Mutations, applied in order.
    pub mutations: Vec<Mutation>,
}

struct JournalState {
    file: File,
    /// End of the last complete entry.
    size: u64,
    next_seq: u64,
    /// Entries appended since the journal was last cleared.
    entries: u64,
}

/// Mutation journal manager.
pub struct Journal {
    path: PathBuf,
    state: Mutex<JournalState>,
}

impl Journal {
    /// Create or open a journal file.
    ///
    /// Returns the journal together with every complete entry found on disk.
    pub fn open(path: impl AsRef<Path>) -> Result<(Self, Vec<JournalEntry>)> {
        let path = path.as_ref().to_path_buf();

        let existing = path.exists() && std::fs::metadata(&path)?.len() > 0;

        let (file, size, entries) = if existing {
            let file = OpenOptions::new().read(true).write(true).open(&path)?;
            let file_len = file.metadata()?.len();
            let mut reader = BufReader::new(file);

            // Verify header
            let mut magic = [0u8; 4];
            reader.read_exact(&mut magic)?;
            if &magic != JOURNAL_MAGIC {
                return Err(StoreError::InvalidFormat("Invalid journal magic".into()));
            }

            let mut version = [0u8; 1];
            reader.read_exact(&mut version)?;
            if version[0] != JOURNAL_VERSION {
                return Err(StoreError::InvalidFormat(format!(
                    "Unsupported journal version: {}",
                    version[0]
                )));
            }

            let mut entries = Vec::new();
            let mut valid_end = HEADER_SIZE;
            while valid_end < file_len {
                let (body, checksum) = match Self::read_frame(&mut reader, file_len - valid_end)? {
                    Some(frame) => frame,
                    None => {
                        warn!(
                            path = %path.display(),
                            offset = valid_end,
                            discarded_bytes = file_len - valid_end,
                            "truncating incomplete journal tail"
                        );
                        break;
                    }
                };

                let frame_end = valid_end + body.len() as u64 + 8;
                match Self::decode_frame(&body, checksum) {
                    Ok(entry) => {
                        valid_end = frame_end;
                        entries.push(entry);
                    }
                    // The last frame may be garbage left by a crash mid-append
                    Err(e) if frame_end == file_len => {
                        warn!(
                            path = %path.display(),
                            offset = valid_end,
                            error = %e,
                            "discarding damaged final journal entry"
                        );
                        break;
                    }
                    Err(e) => {
                        error!(
                            path = %path.display(),
                            offset = valid_end,
                            error = %e,
                            "journal entry damaged with entries after it"
                        );
                        return Err(e);
                    }
                }
            }

            let file = reader.into_inner();
            if valid_end < file_len {
                file.set_len(valid_end)?;
                file.sync_all()?;
            }

            (file, valid_end, entries)
        } else {
            let mut file = OpenOptions::new()
                .read(true)
                .write(true)
                .create(true)
                .truncate(true)
                .open(&path)?;

            Self::write_header(&mut file)?;

            (file, HEADER_SIZE, Vec::new())
        };

        let next_seq = entries.iter().map(|e| e.seq).max().unwrap_or(0) + 1;
        let count = entries.len() as u64;

        Ok((
            Self {
                path,
                state: Mutex::new(JournalState {
                    file,
                    size,
                    next_seq,
                    entries: count,
                }),
            },
            entries,
        ))
    }

    /// Make sure future sequence numbers are at least `seq`.
    pub fn ensure_next_seq(&self, seq: u64) {
        let mut state = self.state.lock();
        state.next_seq = state.next_seq.max(seq);
    }

    /// Sequence number the next append will use.
    pub fn next_seq(&self) -> u64 {
        self.state.lock().next_seq
    }

    /// Append a batch of mutations as a single entry.
    ///
    /// If the write fails the file is cut back to its previous length and the
    /// sequence number is not consumed.
    pub fn append(&self, mutations: Vec<Mutation>, sync: bool) -> Result<JournalEntry> {
        let mut state = self.state.lock();

        let entry = JournalEntry {
            seq: state.next_seq,
            timestamp: Timestamp::now(),
            mutations,
        };

        let frame = Self::encode_frame(&entry)?;
        let offset = state.size;

        let written = Self::write_frame(&mut state.file, offset, &frame, sync);
        if let Err(e) = written {
            if let Err(rollback) = state.file.set_len(offset) {
                warn!(error = %rollback, "failed to roll back partial journal write");
            }
            return Err(e);
        }

        state.size = offset + frame.len() as u64;
        state.next_seq += 1;
        state.entries += 1;

        Ok(entry)
    }

    /// Force sync all pending writes to disk.
    pub fn sync(&self) -> Result<()> {
        self.state.lock().file.sync_all()?;
        Ok(())
    }

    /// Drop all entries (called after a successful checkpoint).
    ///
    /// Sequence numbers keep counting up so a stale journal can be told apart
    /// from one written after the checkpoint.
    pub fn clear(&self) -> Result<()> {
        let mut state = self.state.lock();
        state.file.set_len(HEADER_SIZE)?;
        state.size = HEADER_SIZE;
        state.entries = 0;
        state.file.sync_all()?;
        Ok(())
    }

    /// Current file size.
    pub fn size(&self) -> u64 {
        self.state.lock().size
    }

    /// Number of entries since the journal was last cleared.
    pub fn entry_count(&self) -> u64 {
        self.state.lock().entries
    }

    /// Path of the journal file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn write_header(file: &mut File) -> Result<()> {
        file.write_all(JOURNAL_MAGIC)?;
        file.write_all(&[JOURNAL_VERSION])?;
        file.sync_all()?;
        Ok(())
    }

    fn write_frame(file: &mut File, offset: u64, frame: &[u8], sync: bool) -> Result<()> {
        file.seek(SeekFrom::Start(offset))?;
        file.write_all(frame)?;
        file.flush()?;
        if sync {
            file.sync_data()?;
        }
        Ok(())
    }

    /// Encode an entry as `len | msgpack body | crc32`.
    fn encode_frame(entry: &JournalEntry) -> Result<Vec<u8>> {
        let encoded = rmp_serde::to_vec(entry)?;

        let mut frame = Vec::with_capacity(encoded.len() + 8);
        frame.extend_from_slice(&(encoded.len() as u32).to_le_bytes());
        frame.extend_from_slice(&encoded);
        frame.extend_from_slice(&crc32fast::hash(&encoded).to_le_bytes());

        Ok(frame)
    }

    /// Read one `len | body | crc32` frame.
    ///
    /// Returns `None` if the frame runs past the `remaining` bytes of the file.
    fn read_frame(reader: &mut BufReader<File>, remaining: u64) -> Result<Option<(Vec<u8>, u32)>> {
        if remaining < 4 {
            return Ok(None);
        }
        let mut len_bytes = [0u8; 4];
        reader.read_exact(&mut len_bytes)?;
        let len = u32::from_le_bytes(len_bytes) as usize;

        if len as u64 + 8 > remaining {
            return Ok(None);
        }
        if len > MAX_ENTRY_SIZE {
            return Err(StoreError::Corruption("Journal entry too large".into()));
        }

        let mut body = vec![0u8; len];
        reader.read_exact(&mut body)?;

        let mut checksum_bytes = [0u8; 4];
        reader.read_exact(&mut checksum_bytes)?;

        Ok(Some((body, u32::from_le_bytes(checksum_bytes))))
    }

    fn decode_frame(body: &[u8], checksum: u32) -> Result<JournalEntry> {
        let computed = crc32fast::hash(body);
        if checksum != computed {
            return Err(StoreError::ChecksumMismatch {
                expected: checksum,
                got: computed,
            });
        }
        Ok(rmp_serde::from_slice(body)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::CounterId;
    use tempfile::TempDir;

    fn create(id: u64) -> Mutation {
        Mutation::CreateCounter {
            id: CounterId(id),
            name: format!("counter {}", id),
            timestamp: Timestamp::now(),
        }
    }

    #[test]
    fn test_journal_basic() {
        let dir = TempDir::new().unwrap();
        let (journal, entries) = Journal::open(dir.path().join("test.log")).unwrap();
        assert!(entries.is_empty());

        let entry = journal.append(vec![create(1)], true).unwrap();
        assert_eq!(entry.seq, 1);
        assert_eq!(journal.entry_count(), 1);

        let entry = journal.append(vec![create(2), create(3)], true).unwrap();
        assert_eq!(entry.seq, 2);
        assert_eq!(entry.mutations.len(), 2);
    }

    #[test]
    fn test_journal_persistence() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("test.log");

        {
            let (journal, _) = Journal::open(&path).unwrap();
            journal.append(vec![create(1)], true).unwrap();
            journal.append(vec![create(2)], true).unwrap();
        }

        let (journal, entries) = Journal::open(&path).unwrap();
        assert_eq!(entries.len(), 2);
        assert!(matches!(
            entries[1].mutations[0],
            Mutation::CreateCounter { id: CounterId(2), .. }
        ));
        assert_eq!(journal.next_seq(), 3);
    }

    #[test]
    fn test_journal_truncates_torn_tail() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("test.log");

        let good_size = {
            let (journal, _) = Journal::open(&path).unwrap();
            journal.append(vec![create(1)], true).unwrap();
            journal.size()
        };

        // Simulate a crash halfway through the next append
        {
            let mut file = OpenOptions::new().append(true).open(&path).unwrap();
            file.write_all(&200u32.to_le_bytes()).unwrap();
            file.write_all(b"partial").unwrap();
        }

        let (journal, entries) = Journal::open(&path).unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(journal.size(), good_size);
        assert_eq!(std::fs::metadata(&path).unwrap().len(), good_size);

        // Appending after recovery produces a readable log
        journal.append(vec![create(2)], true).unwrap();
        drop(journal);
        let (_, entries) = Journal::open(&path).unwrap();
        assert_eq!(entries.len(), 2);
    }

    #[test]
    fn test_journal_damaged_middle_entry_is_an_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("test.log");

        {
            let (journal, _) = Journal::open(&path).unwrap();
            for id in 1..=5 {
                journal.append(vec![create(id)], true).unwrap();
            }
        }

        // Flip a body byte of the first entry
        let mut bytes = std::fs::read(&path).unwrap();
        bytes[HEADER_SIZE as usize + 4 + 1] ^= 0xFF;
        std::fs::write(&path, &bytes).unwrap();

        let result = Journal::open(&path);
        assert!(matches!(result, Err(StoreError::ChecksumMismatch { .. })));
        assert_eq!(std::fs::read(&path).unwrap(), bytes);
    }

    #[test]
    fn test_journal_damaged_final_entry_is_discarded() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("test.log");

        {
            let (journal, _) = Journal::open(&path).unwrap();
            journal.append(vec![create(1)], true).unwrap();
        }

        // Flip the last byte (part of the checksum)
        let mut bytes = std::fs::read(&path).unwrap();
        let last = bytes.len() - 1;
        bytes[last] ^= 0xFF;
        std::fs::write(&path, &bytes).unwrap();

        let (_, entries) = Journal::open(&path).unwrap();
        assert!(entries.is_empty());
        assert_eq!(std::fs::metadata(&path).unwrap().len(), HEADER_SIZE);
    }

    #[test]
    fn test_journal_clear_keeps_sequence() {
        let dir = TempDir::new().unwrap();
        let (journal, _) = Journal::open(dir.path().join("test.log")).unwrap();

        journal.append(vec![create(1)], true).unwrap();
        journal.append(vec![create(2)], true).unwrap();

        journal.clear().unwrap();
        assert_eq!(journal.entry_count(), 0);
        assert_eq!(journal.size(), HEADER_SIZE);

        let entry = journal.append(vec![create(3)], true).unwrap();
        assert_eq!(entry.seq, 3);

        // The new entry starts right after the header
        let path = journal.path().to_path_buf();
        let size = journal.size();
        drop(journal);
        assert_eq!(std::fs::metadata(&path).unwrap().len(), size);
        let (_, entries) = Journal::open(&path).unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].seq, 3);
    }

    #[test]
    fn test_journal_rejects_bad_magic() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("test.log");
        std::fs::write(&path, b"NOPE\x01").unwrap();

        let result = Journal::open(&path);
        assert!(matches!(result, Err(StoreError::InvalidFormat(_))));
    }
}
