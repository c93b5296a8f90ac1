// ABOUTME: Crash-safe file replacement via temp file, read-back verification, and rename.
// ABOUTME: Readers of the target path only ever see the old contents or the new contents.

use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use durastore_core::{DataError, DataResult};
use ulid::Ulid;

#[cfg(test)]
use std::collections::VecDeque;
#[cfg(test)]
use std::sync::Mutex;

/// Optional extras for a single atomic write.
#[derive(Default)]
pub struct WriteOptions<'a> {
    /// When set, free space is checked against this size times the writer's
    /// margin before anything is written.
    pub expected_size: Option<u64>,
    /// Content check run against the staged bytes before the rename.
    pub verify: Option<&'a dyn Fn(&[u8]) -> bool>,
}

/// Faults that tests can queue to exercise failure paths.
#[cfg_attr(not(test), allow(dead_code))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum WriteFault {
    /// Stage only half of the payload.
    ShortWrite,
    /// Fail the final rename after staging succeeded.
    FailRename,
}

/// Writes files by staging them in a directory on the same volume as their
/// destination, then renaming them into place.
#[derive(Debug)]
pub struct AtomicFileWriter {
    staging_dir: PathBuf,
    space_margin: f64,
    #[cfg(test)]
    faults: Mutex<VecDeque<WriteFault>>,
}

impl AtomicFileWriter {
    /// `staging_dir` must live on the same filesystem as every target path so
    /// the final rename is a single metadata operation.
    pub fn new(staging_dir: impl Into<PathBuf>, space_margin: f64) -> Self {
        Self {
            staging_dir: staging_dir.into(),
            space_margin,
            #[cfg(test)]
            faults: Mutex::new(VecDeque::new()),
        }
    }

    pub fn staging_dir(&self) -> &Path {
        &self.staging_dir
    }

    /// Atomically replace `path` with `bytes`.
    pub fn write_atomic(&self, path: &Path, bytes: &[u8]) -> DataResult<()> {
        self.write_atomic_with(path, bytes, &WriteOptions::default())
    }

    /// Atomically replace `path` with `bytes`, applying the space check and
    /// content verification from `opts`.
    ///
    /// Sequence:
    /// 1. Optional free-space check (`expected_size * margin`)
    /// 2. Write to `Temp/<ulid>.tmp` and fsync
    /// 3. Compare staged length (and run `verify`) against the payload
    /// 4. Rename over `path`, then fsync the parent directory
    ///
    /// Any failure before the rename removes the temp file and leaves `path`
    /// untouched.
    pub fn write_atomic_with(
        &self,
        path: &Path,
        bytes: &[u8],
        opts: &WriteOptions<'_>,
    ) -> DataResult<()> {
        if let Some(expected) = opts.expected_size {
            let required = (expected as f64 * self.space_margin).ceil() as u64;
            ensure_space(&self.staging_dir, required)?;
        }

        fs::create_dir_all(&self.staging_dir)
            .map_err(|e| DataError::from_io(e, &self.staging_dir))?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| DataError::from_io(e, parent))?;
        }

        let tmp_path = self.staging_dir.join(format!("{}.tmp", Ulid::new()));
        let result = self.stage_and_commit(&tmp_path, path, bytes, opts);

        if result.is_err()
            && let Err(e) = fs::remove_file(&tmp_path)
            && e.kind() != io::ErrorKind::NotFound
        {
            tracing::warn!("failed to remove temp file {}: {}", tmp_path.display(), e);
        }

        result
    }

    fn stage_and_commit(
        &self,
        tmp_path: &Path,
        path: &Path,
        bytes: &[u8],
        opts: &WriteOptions<'_>,
    ) -> DataResult<()> {
        let fault = self.next_fault();
        let staged: &[u8] = if fault == Some(WriteFault::ShortWrite) {
            &bytes[..bytes.len() / 2]
        } else {
            bytes
        };

        let mut file = File::create(tmp_path).map_err(|e| DataError::from_io(e, tmp_path))?;
        file.write_all(staged)
            .map_err(|e| DataError::from_io(e, tmp_path))?;
        file.sync_all()?;
        drop(file);

        let expected = bytes.len() as u64;
        let actual = fs::metadata(tmp_path)?.len();
        if actual != expected {
            return Err(DataError::Integrity {
                target: tmp_path.display().to_string(),
                expected,
                actual,
            });
        }

        if let Some(verify) = opts.verify {
            let staged_back = fs::read(tmp_path)?;
            if !verify(&staged_back) {
                return Err(DataError::Integrity {
                    target: tmp_path.display().to_string(),
                    expected,
                    actual,
                });
            }
        }

        if fault == Some(WriteFault::FailRename) {
            return Err(DataError::Io(io::Error::other("injected rename failure")));
        }

        fs::rename(tmp_path, path).map_err(|e| DataError::from_io(e, path))?;

        // Best-effort: the rename already succeeded, the directory fsync only
        // makes the new entry durable sooner.
        if let Some(parent) = path.parent()
            && let Ok(dir) = File::open(parent)
        {
            let _ = dir.sync_all();
        }

        Ok(())
    }

    #[cfg(test)]
    pub(crate) fn inject_fault(&self, fault: WriteFault) {
        self.faults
            .lock()
            .expect("fault queue poisoned")
            .push_back(fault);
    }

    #[cfg(test)]
    fn next_fault(&self) -> Option<WriteFault> {
        self.faults.lock().expect("fault queue poisoned").pop_front()
    }

    #[cfg(not(test))]
    fn next_fault(&self) -> Option<WriteFault> {
        None
    }
}

/// Fail with `InsufficientSpace` when the volume holding `dir` has fewer than
/// `required` bytes free. If free space cannot be determined the write is
/// allowed to proceed.
pub(crate) fn ensure_space(dir: &Path, required: u64) -> DataResult<()> {
    let volume = existing_ancestor(dir);
    match fs2::available_space(volume) {
        Ok(available) if available < required => {
            tracing::warn!(
                "insufficient space in {}: {} required, {} available",
                volume.display(),
                required,
                available
            );
            Err(DataError::InsufficientSpace {
                required: Some(required),
                available: Some(available),
            })
        }
        Ok(_) => Ok(()),
        Err(e) => {
            tracing::debug!("could not query free space for {}: {}", volume.display(), e);
            Ok(())
        }
    }
}

fn existing_ancestor(dir: &Path) -> &Path {
    dir.ancestors()
        .find(|p| p.exists())
        .unwrap_or(dir)
}
