use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use meme_vault_core::{parse_document, MemeId, MemePatch, MemeRecord};
use meme_vault_store_json::{
    DocumentStorage, FileStorage, JsonStore, SnapshotStatus, DOCUMENT_FILE, SNAPSHOT_FILE,
};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

pub const API_CONTRACT_VERSION: &str = "api.v1";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StoreConfig {
    pub document_path: PathBuf,
    pub snapshot_path: PathBuf,
    /// Run updates and resets one at a time. Off means concurrent writers race
    /// and the last write wins.
    pub serialize_writes: bool,
}

impl StoreConfig {
    #[must_use]
    pub fn in_dir(dir: &Path) -> Self {
        Self {
            document_path: dir.join(DOCUMENT_FILE),
            snapshot_path: dir.join(SNAPSHOT_FILE),
            serialize_writes: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SeedResult {
    pub written: bool,
    pub records: usize,
}

/// Process-level entry point to the store.
///
/// Construction takes the snapshot before anything can mutate the Document.
#[derive(Debug, Clone)]
pub struct MemeVaultApi {
    store: JsonStore,
    write_gate: Option<Arc<Mutex<()>>>,
}

impl MemeVaultApi {
    #[must_use]
    pub fn open(config: &StoreConfig) -> Self {
        let storage =
            FileStorage::new(config.document_path.clone(), config.snapshot_path.clone());
        Self::with_storage(Arc::new(storage), config.serialize_writes)
    }

    #[must_use]
    pub fn with_storage(storage: Arc<dyn DocumentStorage>, serialize_writes: bool) -> Self {
        let api = Self::unsnapshotted(storage, serialize_writes);
        match api.store.snapshots().ensure_snapshot() {
            Ok(true) => tracing::info!("captured original snapshot of the meme document"),
            Ok(false) => tracing::debug!("original snapshot already present"),
            Err(err) => {
                tracing::warn!(error = %err, "snapshot not captured; reset unavailable until it is");
            }
        }
        api
    }

    /// Build without touching the snapshot. Used by tooling that must not
    /// capture one as a side effect, such as seeding.
    #[must_use]
    pub fn unsnapshotted(storage: Arc<dyn DocumentStorage>, serialize_writes: bool) -> Self {
        Self {
            store: JsonStore::new(storage),
            write_gate: serialize_writes.then(|| Arc::new(Mutex::new(()))),
        }
    }

    /// List all memes. A malformed Document is logged and answered with an empty list.
    ///
    /// # Errors
    /// Returns an error when the Document cannot be read.
    pub fn list(&self) -> Result<Vec<MemeRecord>> {
        let listing = self.store.list()?;
        if let Some(reason) = listing.malformed {
            tracing::warn!(%reason, "meme document is malformed; serving an empty list");
        }
        Ok(listing.records)
    }

    /// # Errors
    /// Returns `StoreError::NotFound` for an unknown id, or the read/parse failure.
    pub fn get(&self, id: MemeId) -> Result<MemeRecord> {
        Ok(self.store.get_by_id(id)?)
    }

    /// # Errors
    /// Returns `StoreError::NotFound` for an unknown id, or the read/parse/write failure.
    pub fn update(&self, id: MemeId, patch: &MemePatch) -> Result<MemeRecord> {
        let _guard = self.write_gate.as_ref().map(|gate| gate.lock());
        let record = self.store.update(id, patch)?;
        tracing::debug!(%id, "updated meme");
        Ok(record)
    }

    /// # Errors
    /// Returns an error when no valid snapshot exists or the Document cannot be written.
    pub fn reset(&self) -> Result<Vec<MemeRecord>> {
        let _guard = self.write_gate.as_ref().map(|gate| gate.lock());
        let records = self.store.reset()?;
        tracing::info!(records = records.len(), "reset meme document from snapshot");
        Ok(records)
    }

    /// # Errors
    /// Returns an error when the Document cannot be read or the snapshot cannot be written.
    pub fn ensure_snapshot(&self) -> Result<bool> {
        Ok(self.store.snapshots().ensure_snapshot()?)
    }

    /// # Errors
    /// Returns an error when an existing snapshot cannot be read.
    pub fn snapshot_status(&self) -> Result<SnapshotStatus> {
        Ok(self.store.snapshots().status()?)
    }

    /// # Errors
    /// Returns an error for duplicate ids or when the Document cannot be written.
    pub fn seed(&self, records: &[MemeRecord], force: bool) -> Result<SeedResult> {
        let _guard = self.write_gate.as_ref().map(|gate| gate.lock());
        let written = self.store.seed(records, force)?;
        Ok(SeedResult { written, records: records.len() })
    }

    /// Seed from a JSON file holding an array of meme records.
    ///
    /// # Errors
    /// Returns an error when the file cannot be read, is not a record array, or seeding fails.
    pub fn seed_from_file(&self, path: &Path, force: bool) -> Result<SeedResult> {
        let raw = fs::read_to_string(path)
            .with_context(|| format!("failed to read seed file {}", path.display()))?;
        let records = parse_document(&raw)
            .with_context(|| format!("seed file {} is not a meme array", path.display()))?;
        self.seed(&records, force)
    }
}
