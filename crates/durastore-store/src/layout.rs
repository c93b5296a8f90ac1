// ABOUTME: Filesystem layout for a durastore root: Data/, Backups/, and Temp/ directories.
// ABOUTME: Handles directory creation, key validation, and clearing the temp staging area.

use std::fs;
use std::path::{Path, PathBuf};

use durastore_core::{DataError, DataResult};

const DATA_DIR: &str = "Data";
const BLOBS_DIR: &str = "blobs";
const BACKUPS_DIR: &str = "Backups";
const TEMP_DIR: &str = "Temp";

/// Longest key accepted; keys become filename stems.
const MAX_KEY_LEN: usize = 200;

/// The directory tree under a store root.
#[derive(Debug, Clone)]
pub struct StorageLayout {
    root: PathBuf,
}

impl StorageLayout {
    /// Create a layout rooted at the given directory.
    /// Creates every subdirectory if it does not exist.
    pub fn new(root: impl Into<PathBuf>) -> DataResult<Self> {
        let layout = Self { root: root.into() };
        for dir in [
            layout.data_dir(),
            layout.blobs_dir(),
            layout.backups_dir(),
            layout.temp_dir(),
        ] {
            fs::create_dir_all(&dir).map_err(|e| DataError::from_io(e, &dir))?;
        }
        Ok(layout)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Live records (and the SQLite database when that backend is used).
    pub fn data_dir(&self) -> PathBuf {
        self.root.join(DATA_DIR)
    }

    pub fn blobs_dir(&self) -> PathBuf {
        self.data_dir().join(BLOBS_DIR)
    }

    pub fn backups_dir(&self) -> PathBuf {
        self.root.join(BACKUPS_DIR)
    }

    /// Staging area for in-flight writes. Safe to empty between operations.
    pub fn temp_dir(&self) -> PathBuf {
        self.root.join(TEMP_DIR)
    }

    /// Remove everything in Temp/. Returns the number of entries removed.
    /// Entries that fail to delete are logged and skipped.
    pub fn clear_temp(&self) -> DataResult<usize> {
        let temp = self.temp_dir();
        if !temp.exists() {
            return Ok(0);
        }

        let mut removed = 0;
        for entry in fs::read_dir(&temp)? {
            let entry = entry?;
            let path = entry.path();
            let result = if path.is_dir() {
                fs::remove_dir_all(&path)
            } else {
                fs::remove_file(&path)
            };
            match result {
                Ok(()) => removed += 1,
                Err(e) => tracing::warn!("failed to remove temp entry {}: {}", path.display(), e),
            }
        }

        if removed > 0 {
            tracing::debug!("cleared {} temp entries", removed);
        }
        Ok(removed)
    }
}

/// Reject keys that cannot safely become a single filename component.
pub fn validate_key(key: &str) -> DataResult<()> {
    let bad = key.is_empty()
        || key.len() > MAX_KEY_LEN
        || key.starts_with('.')
        || key.contains(['/', '\\', '\0'])
        || key.contains("..");
    if bad {
        return Err(DataError::InvalidKey(key.to_string()));
    }
    Ok(())
}
