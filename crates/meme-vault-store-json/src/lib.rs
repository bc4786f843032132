use std::path::Path;
use std::sync::Arc;

use meme_vault_core::{
    find_record, merge_record, parse_document, render_document, validate_unique_ids, MemeId,
    MemePatch, MemeRecord, StoreError,
};

mod snapshot;
mod storage;

pub use snapshot::{RestoredSnapshot, SnapshotManager, SnapshotStatus};
pub use storage::{DocumentStorage, FileStorage, MemoryStorage, Slot, DOCUMENT_FILE, SNAPSHOT_FILE};

/// Result of [`JsonStore::list`].
///
/// A malformed Document yields no records and the parse failure in `malformed`,
/// so the caller can log it while still answering.
#[derive(Debug, Clone, PartialEq)]
pub struct Listing {
    pub records: Vec<MemeRecord>,
    pub malformed: Option<String>,
}

/// File-backed record store over one JSON Document.
///
/// Mutations read the whole Document, change it, and write the whole Document
/// back. Nothing here serializes concurrent writers: the last write wins.
#[derive(Debug, Clone)]
pub struct JsonStore {
    storage: Arc<dyn DocumentStorage>,
    snapshots: SnapshotManager,
}

impl JsonStore {
    #[must_use]
    pub fn new(storage: Arc<dyn DocumentStorage>) -> Self {
        let snapshots = SnapshotManager::new(Arc::clone(&storage));
        Self { storage, snapshots }
    }

    /// Store over `memes.json` and `original-memes.json` in `dir`.
    #[must_use]
    pub fn open_dir(dir: &Path) -> Self {
        Self::new(Arc::new(FileStorage::in_dir(dir)))
    }

    #[must_use]
    pub fn snapshots(&self) -> &SnapshotManager {
        &self.snapshots
    }

    fn load(&self) -> Result<Vec<MemeRecord>, StoreError> {
        let raw = self.storage.read(Slot::Document)?;
        parse_document(&raw)
    }

    fn save(&self, records: &[MemeRecord]) -> Result<(), StoreError> {
        let rendered = render_document(records)?;
        self.storage.write(Slot::Document, &rendered)
    }

    /// All records in Document order.
    ///
    /// # Errors
    /// Returns [`StoreError::Io`] when the Document cannot be read. Malformed
    /// content is reported through [`Listing::malformed`] instead.
    pub fn list(&self) -> Result<Listing, StoreError> {
        match self.load() {
            Ok(records) => Ok(Listing { records, malformed: None }),
            Err(StoreError::MalformedDocument(reason)) => {
                Ok(Listing { records: Vec::new(), malformed: Some(reason) })
            }
            Err(err) => Err(err),
        }
    }

    /// # Errors
    /// Returns [`StoreError::NotFound`] when no record has `id`, or the
    /// underlying read/parse failure.
    pub fn get_by_id(&self, id: MemeId) -> Result<MemeRecord, StoreError> {
        let records = self.load()?;
        find_record(&records, id).cloned().ok_or(StoreError::NotFound(id))
    }

    /// Merge `patch` into the record with `id` and persist the whole Document.
    /// Never creates a record.
    ///
    /// # Errors
    /// Returns [`StoreError::NotFound`] for an unknown id (nothing is written),
    /// [`StoreError::MalformedDocument`] when there is no valid base document,
    /// or [`StoreError::Io`] when reading or writing fails.
    pub fn update(&self, id: MemeId, patch: &MemePatch) -> Result<MemeRecord, StoreError> {
        let mut records = self.load()?;
        let index =
            records.iter().position(|record| record.id == id).ok_or(StoreError::NotFound(id))?;

        let merged = merge_record(&records[index], patch);
        records[index] = merged.clone();
        self.save(&records)?;
        Ok(merged)
    }

    /// Overwrite the Document with the snapshot text and return its records.
    ///
    /// # Errors
    /// Returns [`StoreError::Io`] when there is no snapshot or the Document
    /// cannot be written, or [`StoreError::MalformedDocument`] for an invalid
    /// snapshot. In both snapshot cases the Document is left untouched.
    pub fn reset(&self) -> Result<Vec<MemeRecord>, StoreError> {
        let snapshot = self.snapshots.restore()?;
        self.storage.write(Slot::Document, &snapshot.raw)?;
        Ok(snapshot.records)
    }

    /// Write `records` as the Document when none exists yet, or always with
    /// `force`. Returns whether anything was written. The snapshot is not touched.
    ///
    /// # Errors
    /// Returns [`StoreError::InvalidSeed`] for duplicate ids, or the storage failure.
    pub fn seed(&self, records: &[MemeRecord], force: bool) -> Result<bool, StoreError> {
        validate_unique_ids(records)?;
        if !force && self.storage.exists(Slot::Document)? {
            return Ok(false);
        }
        self.save(records)?;
        Ok(true)
    }
}
