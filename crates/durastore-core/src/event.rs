// ABOUTME: Diagnostic events emitted by the store for backups, retries, pruning, and recovery.
// ABOUTME: Lets callers observe swallowed background failures without affecting control flow.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// Something notable that happened inside the store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum StoreEvent {
    Committed {
        key: String,
        len: u64,
        checksum: u32,
        attempts: u32,
    },
    WriteRetry {
        key: String,
        attempt: u32,
        error: String,
    },
    BackupCreated {
        key: String,
        path: PathBuf,
        created_at: DateTime<Utc>,
    },
    BackupFailed {
        key: String,
        error: String,
    },
    BackupsPruned {
        removed: usize,
        failed: usize,
    },
    Recovered {
        key: String,
        backup: PathBuf,
    },
    RecoveryFailed {
        key: String,
        backups_tried: usize,
    },
}

/// Fan-out channel for [`StoreEvent`]s. Cloning shares the same channel.
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<StoreEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StoreEvent> {
        self.tx.subscribe()
    }

    /// Publish an event. Having no subscribers is fine.
    pub fn emit(&self, event: StoreEvent) {
        let _ = self.tx.send(event);
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}
