//! Write-ahead journal for in-flight remote `PUT`s (spec.md §4.5).
//!
//! Grounded on the slotted, fixed-record file layout in `CrabKV`'s
//! `src/wal.rs`: a small header followed by fixed-size records written and
//! overwritten in place, so recovery is a single linear scan with no
//! parsing ambiguity.

use std::convert::TryInto;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;
use thiserror::Error;
use whip_lru_proto::AssetId;

const MAGIC: &[u8; 8] = b"WHIPLRU1";
const HEADER_LEN: u64 = 12; // magic (8) + record count (4)
const SLOT_LEN: u64 = 17; // status (1) + uuid (16)

const STATUS_EMPTY: u8 = 0;
const STATUS_PENDING: u8 = 1;

#[derive(Debug, Error)]
pub enum JournalError {
    #[error("journal file is corrupt: {0}")]
    Corrupt(String),
    #[error("journal is full ({0} slots)")]
    Full(u32),
    #[error("slot {0} is not reserved")]
    NotReserved(u32),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// A fixed-capacity, fixed-slot-size write-ahead log. Each slot is either
/// empty or holds one pending asset id. `reserve` claims a slot and fsyncs
/// before the caller starts the remote write; `release` clears it after the
/// write lands. `recover` is a startup scan returning every still-pending id.
pub struct WriteJournal {
    file: File,
    capacity: u32,
}

impl WriteJournal {
    pub fn open_or_create(path: &Path, capacity: u32) -> Result<Self, JournalError> {
        let is_new = !path.exists();
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(path)?;

        if is_new {
            Self::initialize(&mut file, capacity)?;
        }

        let mut journal = WriteJournal { file, capacity };
        journal.validate_header()?;
        Ok(journal)
    }

    fn initialize(file: &mut File, capacity: u32) -> Result<(), JournalError> {
        file.set_len(HEADER_LEN + SLOT_LEN * capacity as u64)?;
        file.seek(SeekFrom::Start(0))?;
        file.write_all(MAGIC)?;
        file.write_all(&capacity.to_be_bytes())?;
        file.sync_all()?;
        Ok(())
    }

    fn validate_header(&mut self) -> Result<(), JournalError> {
        self.file.seek(SeekFrom::Start(0))?;
        let mut magic = [0u8; 8];
        self.file.read_exact(&mut magic)?;
        if &magic != MAGIC {
            return Err(JournalError::Corrupt("bad magic".into()));
        }
        let mut count_bytes = [0u8; 4];
        self.file.read_exact(&mut count_bytes)?;
        let stored_capacity = u32::from_be_bytes(count_bytes);
        if stored_capacity != self.capacity {
            return Err(JournalError::Corrupt(format!(
                "capacity mismatch: file has {}, opened with {}",
                stored_capacity, self.capacity
            )));
        }
        Ok(())
    }

    fn slot_offset(&self, slot: u32) -> u64 {
        HEADER_LEN + slot as u64 * SLOT_LEN
    }

    fn read_slot(&mut self, slot: u32) -> Result<(u8, AssetId), JournalError> {
        self.file.seek(SeekFrom::Start(self.slot_offset(slot)))?;
        let mut buf = [0u8; SLOT_LEN as usize];
        self.file.read_exact(&mut buf)?;
        let status = buf[0];
        let id = uuid::Uuid::from_bytes(buf[1..17].try_into().unwrap());
        Ok((status, id))
    }

    fn write_slot(&mut self, slot: u32, status: u8, id: &AssetId) -> Result<(), JournalError> {
        let mut buf = [0u8; SLOT_LEN as usize];
        buf[0] = status;
        buf[1..17].copy_from_slice(id.as_bytes());
        self.file.seek(SeekFrom::Start(self.slot_offset(slot)))?;
        self.file.write_all(&buf)?;
        self.file.sync_data()?;
        Ok(())
    }

    /// Claims the first empty slot for `id`, fsyncs, and returns the slot
    /// index the caller must pass to `release` once the write completes.
    pub fn reserve(&mut self, id: &AssetId) -> Result<u32, JournalError> {
        for slot in 0..self.capacity {
            let (status, _) = self.read_slot(slot)?;
            if status == STATUS_EMPTY {
                self.write_slot(slot, STATUS_PENDING, id)?;
                return Ok(slot);
            }
        }
        Err(JournalError::Full(self.capacity))
    }

    pub fn release(&mut self, slot: u32) -> Result<(), JournalError> {
        let (status, _) = self.read_slot(slot)?;
        if status != STATUS_PENDING {
            return Err(JournalError::NotReserved(slot));
        }
        self.write_slot(slot, STATUS_EMPTY, &uuid::Uuid::nil())
    }

    /// Every id left pending from an unclean shutdown, in slot order.
    pub fn recover(&mut self) -> Result<Vec<AssetId>, JournalError> {
        Ok(self
            .recover_with_slots()?
            .into_iter()
            .map(|(_, id)| id)
            .collect())
    }

    /// Like `recover`, but keeps each pending id paired with the slot it
    /// occupies, so the caller can `release` it directly without having to
    /// re-derive the slot index.
    pub fn recover_with_slots(&mut self) -> Result<Vec<(u32, AssetId)>, JournalError> {
        let mut pending = Vec::new();
        for slot in 0..self.capacity {
            let (status, id) = self.read_slot(slot)?;
            if status == STATUS_PENDING {
                pending.push((slot, id));
            }
        }
        Ok(pending)
    }

    pub fn capacity(&self) -> u32 {
        self.capacity
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reserve_and_release_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("journal.bin");
        let mut journal = WriteJournal::open_or_create(&path, 4).unwrap();

        let id = uuid::Uuid::new_v4();
        let slot = journal.reserve(&id).unwrap();
        assert_eq!(journal.recover().unwrap(), vec![id]);

        journal.release(slot).unwrap();
        assert_eq!(journal.recover().unwrap(), Vec::<AssetId>::new());
    }

    #[test]
    fn full_journal_rejects_reservation() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("journal.bin");
        let mut journal = WriteJournal::open_or_create(&path, 2).unwrap();

        journal.reserve(&uuid::Uuid::new_v4()).unwrap();
        journal.reserve(&uuid::Uuid::new_v4()).unwrap();
        let err = journal.reserve(&uuid::Uuid::new_v4()).unwrap_err();
        assert!(matches!(err, JournalError::Full(2)));
    }

    #[test]
    fn releasing_empty_slot_errors() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("journal.bin");
        let mut journal = WriteJournal::open_or_create(&path, 2).unwrap();
        let err = journal.release(0).unwrap_err();
        assert!(matches!(err, JournalError::NotReserved(0)));
    }

    #[test]
    fn reopening_recovers_pending_entries() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("journal.bin");
        let id = uuid::Uuid::new_v4();

        {
            let mut journal = WriteJournal::open_or_create(&path, 4).unwrap();
            journal.reserve(&id).unwrap();
        }

        let mut reopened = WriteJournal::open_or_create(&path, 4).unwrap();
        assert_eq!(reopened.recover().unwrap(), vec![id]);
    }

    #[test]
    fn reopening_with_different_capacity_is_corrupt() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("journal.bin");
        {
            WriteJournal::open_or_create(&path, 4).unwrap();
        }
        let err = WriteJournal::open_or_create(&path, 8).unwrap_err();
        assert!(matches!(err, JournalError::Corrupt(_)));
    }
}
