use std::sync::Arc;

use meme_vault_core::{parse_document, MemeRecord, StoreError};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::storage::{DocumentStorage, Slot};

/// Snapshot text together with its parsed records.
#[derive(Debug, Clone, PartialEq)]
pub struct RestoredSnapshot {
    pub raw: String,
    pub records: Vec<MemeRecord>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SnapshotStatus {
    pub exists: bool,
    pub records: Option<usize>,
    pub sha256: Option<String>,
    pub malformed: Option<String>,
}

/// Owns the one-time copy of the Document that resets restore from.
#[derive(Debug, Clone)]
pub struct SnapshotManager {
    storage: Arc<dyn DocumentStorage>,
}

impl SnapshotManager {
    #[must_use]
    pub fn new(storage: Arc<dyn DocumentStorage>) -> Self {
        Self { storage }
    }

    /// Copy the Document verbatim into the snapshot slot unless a snapshot
    /// already exists. Returns `true` only when this call created it.
    ///
    /// The existence check and the copy are two separate storage calls.
    ///
    /// # Errors
    /// Returns [`StoreError::Io`] when the Document cannot be read or the
    /// snapshot cannot be written.
    pub fn ensure_snapshot(&self) -> Result<bool, StoreError> {
        if self.storage.exists(Slot::Snapshot)? {
            return Ok(false);
        }

        let raw = self.storage.read(Slot::Document)?;
        self.storage.write(Slot::Snapshot, &raw)?;
        Ok(true)
    }

    /// Read and validate the snapshot. Nothing is written.
    ///
    /// # Errors
    /// Returns [`StoreError::Io`] when no snapshot is readable, or
    /// [`StoreError::MalformedDocument`] when its content is not a record array.
    pub fn restore(&self) -> Result<RestoredSnapshot, StoreError> {
        let raw = self.storage.read(Slot::Snapshot)?;
        let records = parse_document(&raw)?;
        Ok(RestoredSnapshot { raw, records })
    }

    /// # Errors
    /// Returns [`StoreError::Io`] when the snapshot exists but cannot be read.
    pub fn status(&self) -> Result<SnapshotStatus, StoreError> {
        if !self.storage.exists(Slot::Snapshot)? {
            return Ok(SnapshotStatus { exists: false, records: None, sha256: None, malformed: None });
        }

        let raw = self.storage.read(Slot::Snapshot)?;
        let digest = Sha256::digest(raw.as_bytes());
        let (records, malformed) = match parse_document(&raw) {
            Ok(records) => (Some(records.len()), None),
            Err(err) => (None, Some(err.to_string())),
        };

        Ok(SnapshotStatus {
            exists: true,
            records,
            sha256: Some(format!("{digest:x}")),
            malformed,
        })
    }
}
