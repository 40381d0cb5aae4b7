//! Durable device state.
//!
//! The whole device (registered households with their item tables and
//! checkpoints, the mutation journal, the logical clock and the device
//! identity) is persisted as a single CBOR file under the data directory,
//! written after every accepted local mutation and after every completed
//! sync cycle, so both the materialized view and the journal survive
//! process restart.

use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::PathBuf;
use thiserror::Error;

use crate::journal::MutationJournal;
use crate::model::PantryItem;

/// Filename of the device snapshot inside the data directory.
const DEVICE_FILE: &str = "device.pantry";

/// Errors from loading or saving device state.
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("I/O error for {}: {}", .0.display(), .1)]
    Io(PathBuf, #[source] io::Error),
    #[error("failed to decode {}: {}", .0.display(), .1)]
    Decode(PathBuf, String),
    #[error("failed to encode device state: {0}")]
    Encode(String),
}

/// Persisted state of one registered household.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HouseholdSnapshot {
    pub household_id: String,
    /// Item table including tombstones.
    pub items: Vec<PantryItem>,
    /// Last sync cursor confirmed against the authority.
    pub checkpoint: Option<u64>,
}

/// Persisted state of the whole device.
#[derive(Debug, Serialize, Deserialize)]
pub struct DeviceSnapshot {
    pub device_id: String,
    pub user_id: String,
    pub clock: u64,
    pub journal: MutationJournal,
    pub households: Vec<HouseholdSnapshot>,
}

/// File-backed storage for a device snapshot.
#[derive(Debug, Clone)]
pub struct FileStorage {
    data_dir: PathBuf,
}

impl FileStorage {
    /// Creates a storage instance rooted at `data_dir`.
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
        }
    }

    pub fn data_dir(&self) -> &PathBuf {
        &self.data_dir
    }

    /// Path of the device snapshot file.
    pub fn device_path(&self) -> PathBuf {
        self.data_dir.join(DEVICE_FILE)
    }

    /// Checks whether a snapshot exists on disk.
    pub fn exists(&self) -> bool {
        self.device_path().exists()
    }

    /// Loads the device snapshot.
    ///
    /// Returns `Ok(None)` if no snapshot has been written yet.
    pub fn load(&self) -> Result<Option<DeviceSnapshot>, StorageError> {
        let path = self.device_path();
        match fs::read(&path) {
            Ok(bytes) => {
                let snapshot = ciborium::from_reader(bytes.as_slice())
                    .map_err(|e| StorageError::Decode(path, e.to_string()))?;
                Ok(Some(snapshot))
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(StorageError::Io(path, e)),
        }
    }

    /// Saves the device snapshot, creating the data directory if needed.
    pub fn save(&self, snapshot: &DeviceSnapshot) -> Result<(), StorageError> {
        fs::create_dir_all(&self.data_dir)
            .map_err(|e| StorageError::Io(self.data_dir.clone(), e))?;

        let mut bytes = Vec::new();
        ciborium::into_writer(snapshot, &mut bytes)
            .map_err(|e| StorageError::Encode(e.to_string()))?;

        let path = self.device_path();
        // Write-then-rename so a crash mid-write never clobbers the
        // previous snapshot.
        let tmp = path.with_extension("pantry.tmp");
        fs::write(&tmp, &bytes).map_err(|e| StorageError::Io(tmp.clone(), e))?;
        fs::rename(&tmp, &path).map_err(|e| StorageError::Io(path, e))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::journal::MutationRecord;
    use crate::model::MutationPayload;
    use tempfile::TempDir;
    use uuid::Uuid;

    fn test_storage() -> (FileStorage, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let storage = FileStorage::new(temp_dir.path().to_path_buf());
        (storage, temp_dir)
    }

    fn snapshot() -> DeviceSnapshot {
        let mut journal = MutationJournal::new();
        let seq = journal.next_seq();
        journal.enqueue(MutationRecord {
            op_id: Uuid::new_v4(),
            household_id: "hh-1".to_string(),
            item_id: Uuid::new_v4(),
            payload: MutationPayload::QuantityDelta { delta: -2.0 },
            base_version: 3,
            produced_at: 8,
            device_id: "phone".to_string(),
            user_id: "erin".to_string(),
            seq,
        });
        DeviceSnapshot {
            device_id: "phone".to_string(),
            user_id: "erin".to_string(),
            clock: 8,
            journal,
            households: vec![HouseholdSnapshot {
                household_id: "hh-1".to_string(),
                items: Vec::new(),
                checkpoint: Some(12),
            }],
        }
    }

    #[test]
    fn test_load_nonexistent_returns_none() {
        let (storage, _temp) = test_storage();
        assert!(!storage.exists());
        assert!(storage.load().unwrap().is_none());
    }

    #[test]
    fn test_save_creates_directory() {
        let temp_dir = TempDir::new().unwrap();
        let nested = temp_dir.path().join("nested").join("data");
        let storage = FileStorage::new(nested.clone());

        storage.save(&snapshot()).unwrap();
        assert!(nested.exists());
        assert!(storage.exists());
    }

    #[test]
    fn test_save_and_load_roundtrip() {
        let (storage, _temp) = test_storage();
        storage.save(&snapshot()).unwrap();

        let loaded = storage.load().unwrap().unwrap();
        assert_eq!(loaded.device_id, "phone");
        assert_eq!(loaded.clock, 8);
        assert_eq!(loaded.journal.len(), 1);
        assert_eq!(loaded.households.len(), 1);
        assert_eq!(loaded.households[0].checkpoint, Some(12));
        // Journal contents survive restart verbatim.
        let pending = loaded.journal.pending("hh-1");
        assert_eq!(
            pending[0].payload,
            MutationPayload::QuantityDelta { delta: -2.0 }
        );
    }

    #[test]
    fn test_save_overwrites_previous_snapshot() {
        let (storage, _temp) = test_storage();
        storage.save(&snapshot()).unwrap();

        let mut second = snapshot();
        second.clock = 99;
        storage.save(&second).unwrap();

        let loaded = storage.load().unwrap().unwrap();
        assert_eq!(loaded.clock, 99);
    }
}
