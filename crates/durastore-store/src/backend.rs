// ABOUTME: Key-value backend abstraction holding the live payload for each record key.
// ABOUTME: FileBackend keeps one atomically-written file per key under Data/.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use durastore_core::{DataError, DataResult};

use crate::atomic::{AtomicFileWriter, WriteOptions};

/// Storage for live payloads. Implementations must make `write` atomic: a
/// reader sees either the previous payload or the new one.
pub trait KvBackend: Send + Sync {
    /// Returns `Ok(None)` when nothing is stored under `key`.
    fn read(&self, key: &str) -> DataResult<Option<Vec<u8>>>;

    fn write(&self, key: &str, bytes: &[u8]) -> DataResult<()>;

    /// Returns whether anything was removed.
    fn remove(&self, key: &str) -> DataResult<bool>;

    /// Every key with a live payload, sorted.
    fn keys(&self) -> DataResult<Vec<String>>;

    fn exists(&self, key: &str) -> DataResult<bool> {
        Ok(self.read(key)?.is_some())
    }
}

const RECORD_SUFFIX: &str = ".json";

/// One `{key}.json` file per record, replaced through an [`AtomicFileWriter`].
#[derive(Debug)]
pub struct FileBackend {
    dir: PathBuf,
    writer: Arc<AtomicFileWriter>,
}

impl FileBackend {
    pub fn new(dir: impl Into<PathBuf>, writer: Arc<AtomicFileWriter>) -> Self {
        Self {
            dir: dir.into(),
            writer,
        }
    }

    /// Location of the live payload for `key`.
    pub fn record_path(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{}{}", key, RECORD_SUFFIX))
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    #[cfg(test)]
    pub(crate) fn writer(&self) -> &AtomicFileWriter {
        &self.writer
    }
}

impl KvBackend for FileBackend {
    fn read(&self, key: &str) -> DataResult<Option<Vec<u8>>> {
        let path = self.record_path(key);
        match fs::read(&path) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(DataError::from_io(e, path)),
        }
    }

    fn write(&self, key: &str, bytes: &[u8]) -> DataResult<()> {
        let opts = WriteOptions {
            expected_size: Some(bytes.len() as u64),
            verify: None,
        };
        self.writer
            .write_atomic_with(&self.record_path(key), bytes, &opts)
    }

    fn remove(&self, key: &str) -> DataResult<bool> {
        let path = self.record_path(key);
        match fs::remove_file(&path) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(DataError::from_io(e, path)),
        }
    }

    fn keys(&self) -> DataResult<Vec<String>> {
        if !self.dir.exists() {
            return Ok(Vec::new());
        }

        let mut keys = Vec::new();
        for entry in fs::read_dir(&self.dir)? {
            let entry = entry?;
            if !entry.file_type()?.is_file() {
                continue;
            }
            let name = entry.file_name();
            if let Some(key) = name.to_string_lossy().strip_suffix(RECORD_SUFFIX) {
                keys.push(key.to_string());
            }
        }
        keys.sort();
        Ok(keys)
    }
}
