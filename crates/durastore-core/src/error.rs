// ABOUTME: Error taxonomy shared by every durastore component.
// ABOUTME: Classifies failures into retryable write faults, caller bugs, and read-time corruption.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Convenience alias used throughout durastore.
pub type DataResult<T> = Result<T, DataError>;

/// Errors that can occur while saving, loading, or maintaining stored data.
#[derive(Debug, Error)]
pub enum DataError {
    /// The value could not be encoded. A caller bug, never retried.
    #[error("serialization error: {0}")]
    Serialization(#[source] serde_json::Error),

    #[error("deserialization error: {reason}")]
    Deserialization { reason: String },

    #[error("corrupted data for '{key}': {reason}")]
    Corruption { key: String, reason: String },

    /// Post-write verification found a different length than was written.
    /// `target` names what was checked: a file path or a backend record.
    #[error("integrity check failed for {target}: expected {expected} bytes, found {actual}")]
    Integrity {
        target: String,
        expected: u64,
        actual: u64,
    },

    /// Either a pre-write check came up short (both sizes known) or the
    /// device reported itself full mid-write (sizes unknown).
    #[error("insufficient space: {}", space_detail(.required, .available))]
    InsufficientSpace {
        required: Option<u64>,
        available: Option<u64>,
    },

    #[error("permission denied: {}", .path.display())]
    PermissionDenied { path: PathBuf },

    /// The retry budget ran out. Carries the last underlying failure.
    #[error("write failed for '{key}' after {attempts} attempts: {source}")]
    WriteFailed {
        key: String,
        attempts: u32,
        #[source]
        source: Box<DataError>,
    },

    #[error("invalid key: {0:?}")]
    InvalidKey(String),

    #[error("io error: {0}")]
    Io(#[from] io::Error),

    #[error("backend error: {0}")]
    Backend(String),
}

impl DataError {
    /// Whether a failed write may succeed if attempted again.
    ///
    /// Integrity mismatches, generic I/O faults and backend errors are
    /// transient. Space and permission errors will not change on retry, and
    /// serialization failures are caller bugs.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            DataError::Integrity { .. } | DataError::Io(_) | DataError::Backend(_)
        )
    }

    /// Whether this error means the stored bytes could not be decoded.
    pub fn is_corruption(&self) -> bool {
        matches!(
            self,
            DataError::Deserialization { .. } | DataError::Corruption { .. }
        )
    }

    /// Map an I/O error raised while touching `path` onto the taxonomy.
    ///
    /// Permission and out-of-space conditions get their own variants so they
    /// are surfaced instead of retried.
    pub fn from_io(err: io::Error, path: impl Into<PathBuf>) -> Self {
        match err.kind() {
            io::ErrorKind::PermissionDenied => DataError::PermissionDenied { path: path.into() },
            io::ErrorKind::StorageFull => DataError::InsufficientSpace {
                required: None,
                available: None,
            },
            _ => DataError::Io(err),
        }
    }
}

fn space_detail(required: &Option<u64>, available: &Option<u64>) -> String {
    match (required, available) {
        (Some(r), Some(a)) => format!("{} bytes required, {} available", r, a),
        (Some(r), None) => format!("{} bytes required", r),
        _ => "no space left on device".to_string(),
    }
}
