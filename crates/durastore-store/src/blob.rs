// ABOUTME: Storage for large binary payloads (images, attachments) addressed by filename.
// ABOUTME: Checks free space up front and replaces files via temp file plus atomic rename.

use std::fmt::Display;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use durastore_core::{DataError, DataResult};

use crate::atomic::{AtomicFileWriter, ensure_space};
use crate::layout::validate_key;

/// Blob files under `Data/blobs/`. Blobs are not backed up.
#[derive(Debug, Clone)]
pub struct BlobStore {
    dir: PathBuf,
    writer: Arc<AtomicFileWriter>,
    headroom: f64,
}

impl BlobStore {
    /// `headroom` multiplies the blob size for the free-space check; the
    /// temp copy briefly doubles the footprint, hence a default of 2.0.
    pub fn new(dir: impl Into<PathBuf>, writer: Arc<AtomicFileWriter>, headroom: f64) -> Self {
        Self {
            dir: dir.into(),
            writer,
            headroom,
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn blob_path(&self, name: &str) -> PathBuf {
        self.dir.join(name)
    }

    /// Write `bytes` as blob `name`, returning its final path.
    pub fn save_blob(&self, name: &str, bytes: &[u8]) -> DataResult<PathBuf> {
        validate_key(name)?;

        let len = bytes.len() as u64;
        let required = (len as f64 * self.headroom).ceil() as u64;
        ensure_space(&self.dir, required)?;

        let path = self.blob_path(name);
        self.writer.write_atomic(&path, bytes)?;

        let actual = fs::metadata(&path)
            .map_err(|e| DataError::from_io(e, &path))?
            .len();
        if actual != len {
            return Err(DataError::Integrity {
                target: path.display().to_string(),
                expected: len,
                actual,
            });
        }

        tracing::info!("saved blob '{}' ({} bytes)", name, len);
        Ok(path)
    }

    /// Read blob `name`, or `None` if it does not exist.
    pub fn load_blob(&self, name: &str) -> DataResult<Option<Vec<u8>>> {
        validate_key(name)?;
        let path = self.blob_path(name);
        match fs::read(&path) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(DataError::from_io(e, path)),
        }
    }

    /// Read blob `name` and run `decode` on it. Decoder failures are
    /// reported as `Deserialization`.
    pub fn load_blob_with<T, E, F>(&self, name: &str, decode: F) -> DataResult<Option<T>>
    where
        E: Display,
        F: FnOnce(&[u8]) -> Result<T, E>,
    {
        match self.load_blob(name)? {
            Some(bytes) => decode(&bytes)
                .map(Some)
                .map_err(|e| DataError::Deserialization {
                    reason: format!("blob '{}': {}", name, e),
                }),
            None => Ok(None),
        }
    }

    /// Returns whether a blob was removed.
    pub fn delete_blob(&self, name: &str) -> DataResult<bool> {
        validate_key(name)?;
        let path = self.blob_path(name);
        match fs::remove_file(&path) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(DataError::from_io(e, path)),
        }
    }

    /// Names of every stored blob, sorted.
    pub fn list_blobs(&self) -> DataResult<Vec<String>> {
        if !self.dir.exists() {
            return Ok(Vec::new());
        }
        let mut names = Vec::new();
        for entry in fs::read_dir(&self.dir)? {
            let entry = entry?;
            if entry.file_type()?.is_file() {
                names.push(entry.file_name().to_string_lossy().into_owned());
            }
        }
        names.sort();
        Ok(names)
    }
}
