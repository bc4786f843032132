use std::collections::{BTreeMap, BTreeSet};
use std::fmt::Debug;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use meme_vault_core::StoreError;
use parking_lot::Mutex;
use tempfile::NamedTempFile;

pub const DOCUMENT_FILE: &str = "memes.json";
pub const SNAPSHOT_FILE: &str = "original-memes.json";

/// The two documents a store persists.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub enum Slot {
    Document,
    Snapshot,
}

impl Slot {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Document => "document",
            Self::Snapshot => "snapshot",
        }
    }
}

/// Whole-document storage. Every call is a single attempt; callers own retries.
pub trait DocumentStorage: Debug + Send + Sync {
    /// # Errors
    /// Returns [`StoreError::Io`] when existence cannot be determined.
    fn exists(&self, slot: Slot) -> Result<bool, StoreError>;

    /// # Errors
    /// Returns [`StoreError::Io`] when the slot is missing or unreadable.
    fn read(&self, slot: Slot) -> Result<String, StoreError>;

    /// Replace the full content of `slot`.
    ///
    /// # Errors
    /// Returns [`StoreError::Io`] when the slot cannot be written.
    fn write(&self, slot: Slot, contents: &str) -> Result<(), StoreError>;
}

#[derive(Debug, Clone)]
pub struct FileStorage {
    document_path: PathBuf,
    snapshot_path: PathBuf,
}

impl FileStorage {
    #[must_use]
    pub fn new(document_path: PathBuf, snapshot_path: PathBuf) -> Self {
        Self { document_path, snapshot_path }
    }

    /// Use the conventional file names inside `dir`.
    #[must_use]
    pub fn in_dir(dir: &Path) -> Self {
        Self::new(dir.join(DOCUMENT_FILE), dir.join(SNAPSHOT_FILE))
    }

    #[must_use]
    pub fn path(&self, slot: Slot) -> &Path {
        match slot {
            Slot::Document => &self.document_path,
            Slot::Snapshot => &self.snapshot_path,
        }
    }
}

impl DocumentStorage for FileStorage {
    fn exists(&self, slot: Slot) -> Result<bool, StoreError> {
        let path = self.path(slot);
        path.try_exists().map_err(|err| {
            StoreError::io(format!("failed to stat {} at {}", slot.as_str(), path.display()), err)
        })
    }

    fn read(&self, slot: Slot) -> Result<String, StoreError> {
        let path = self.path(slot);
        fs::read_to_string(path).map_err(|err| {
            StoreError::io(format!("failed to read {} at {}", slot.as_str(), path.display()), err)
        })
    }

    fn write(&self, slot: Slot, contents: &str) -> Result<(), StoreError> {
        let path = self.path(slot);
        let context = || format!("failed to write {} at {}", slot.as_str(), path.display());

        let parent = match path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };
        fs::create_dir_all(parent).map_err(|err| StoreError::io(context(), err))?;

        // Persisting a sibling temp file replaces the target in one rename.
        let mut temp = NamedTempFile::new_in(parent).map_err(|err| StoreError::io(context(), err))?;
        temp.write_all(contents.as_bytes()).map_err(|err| StoreError::io(context(), err))?;
        temp.as_file().sync_all().map_err(|err| StoreError::io(context(), err))?;
        temp.persist(path).map_err(|err| StoreError::io(context(), err.error))?;
        Ok(())
    }
}

/// In-process storage for tests and ephemeral runs.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    slots: Mutex<BTreeMap<Slot, String>>,
    read_only: Mutex<BTreeSet<Slot>>,
}

impl MemoryStorage {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_document(raw: impl Into<String>) -> Self {
        let storage = Self::default();
        storage.slots.lock().insert(Slot::Document, raw.into());
        storage
    }

    #[must_use]
    pub fn contents(&self, slot: Slot) -> Option<String> {
        self.slots.lock().get(&slot).cloned()
    }

    pub fn remove(&self, slot: Slot) {
        self.slots.lock().remove(&slot);
    }

    /// Make writes to `slot` fail with `PermissionDenied` until cleared.
    pub fn set_read_only(&self, slot: Slot, read_only: bool) {
        let mut guard = self.read_only.lock();
        if read_only {
            guard.insert(slot);
        } else {
            guard.remove(&slot);
        }
    }
}

impl DocumentStorage for MemoryStorage {
    fn exists(&self, slot: Slot) -> Result<bool, StoreError> {
        Ok(self.slots.lock().contains_key(&slot))
    }

    fn read(&self, slot: Slot) -> Result<String, StoreError> {
        self.slots.lock().get(&slot).cloned().ok_or_else(|| {
            StoreError::io(
                format!("failed to read {}", slot.as_str()),
                io::Error::new(io::ErrorKind::NotFound, "slot is empty"),
            )
        })
    }

    fn write(&self, slot: Slot, contents: &str) -> Result<(), StoreError> {
        if self.read_only.lock().contains(&slot) {
            return Err(StoreError::io(
                format!("failed to write {}", slot.as_str()),
                io::Error::new(io::ErrorKind::PermissionDenied, "slot is read-only"),
            ));
        }
        self.slots.lock().insert(slot, contents.to_string());
        Ok(())
    }
}
