// ABOUTME: Background maintenance worker that creates backups and prunes expired ones.
// ABOUTME: Runs on a dedicated thread fed by a tokio channel so save/load never wait on it.

use std::io;
use std::thread;
use std::time::Duration;

use chrono::{DateTime, Utc};
use durastore_core::{DataError, DataResult};
use tokio::sync::{mpsc, oneshot};

use crate::backup::{BackupStore, PruneReport};

/// Work items processed in order by the maintenance thread.
enum MaintenanceJob {
    Backup {
        key: String,
        payload: Vec<u8>,
        captured_at: DateTime<Utc>,
    },
    Prune {
        retention: Duration,
        reply: Option<oneshot::Sender<DataResult<PruneReport>>>,
    },
    Flush {
        reply: oneshot::Sender<()>,
    },
}

/// Handle for queueing maintenance work. The thread exits once every handle
/// has been dropped and the queue is drained.
#[derive(Debug, Clone)]
pub struct MaintenanceHandle {
    tx: mpsc::UnboundedSender<MaintenanceJob>,
}

impl std::fmt::Debug for MaintenanceJob {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MaintenanceJob::Backup { key, payload, .. } => f
                .debug_struct("Backup")
                .field("key", key)
                .field("len", &payload.len())
                .finish(),
            MaintenanceJob::Prune { retention, .. } => f
                .debug_struct("Prune")
                .field("retention", retention)
                .finish(),
            MaintenanceJob::Flush { .. } => f.write_str("Flush"),
        }
    }
}

impl MaintenanceHandle {
    /// Start the maintenance thread operating on `backups`.
    pub fn spawn(backups: BackupStore) -> DataResult<Self> {
        let (tx, rx) = mpsc::unbounded_channel();
        let worker = MaintenanceWorker { backups, rx };

        thread::Builder::new()
            .name("durastore-maintenance".to_string())
            .spawn(move || worker.run())?;

        Ok(Self { tx })
    }

    /// Queue a backup of `payload`. Never blocks; a stopped worker is logged.
    pub fn enqueue_backup(&self, key: &str, payload: Vec<u8>, captured_at: DateTime<Utc>) {
        let job = MaintenanceJob::Backup {
            key: key.to_string(),
            payload,
            captured_at,
        };
        if self.tx.send(job).is_err() {
            tracing::error!("maintenance worker stopped; backup for '{}' dropped", key);
        }
    }

    /// Queue a retention pass without waiting for it.
    pub fn enqueue_prune(&self, retention: Duration) {
        let job = MaintenanceJob::Prune {
            retention,
            reply: None,
        };
        if self.tx.send(job).is_err() {
            tracing::error!("maintenance worker stopped; retention pass dropped");
        }
    }

    /// Run a retention pass on the worker and wait for its report.
    pub async fn prune(&self, retention: Duration) -> DataResult<PruneReport> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(MaintenanceJob::Prune {
                retention,
                reply: Some(reply),
            })
            .map_err(|_| worker_stopped())?;
        rx.await.map_err(|_| worker_stopped())?
    }

    /// Resolve once every job queued before this call has finished.
    pub async fn flush(&self) {
        let (reply, rx) = oneshot::channel();
        if self.tx.send(MaintenanceJob::Flush { reply }).is_ok() {
            let _ = rx.await;
        }
    }
}

fn worker_stopped() -> DataError {
    DataError::Io(io::Error::other("maintenance worker stopped"))
}

struct MaintenanceWorker {
    backups: BackupStore,
    rx: mpsc::UnboundedReceiver<MaintenanceJob>,
}

impl MaintenanceWorker {
    fn run(mut self) {
        tracing::debug!("maintenance worker started");
        while let Some(job) = self.rx.blocking_recv() {
            match job {
                MaintenanceJob::Backup {
                    key,
                    payload,
                    captured_at,
                } => {
                    self.backups.create_backup(&key, &payload, captured_at);
                }
                MaintenanceJob::Prune { retention, reply } => {
                    let result = self.backups.prune_older_than(retention);
                    if let Err(e) = &result {
                        tracing::error!("backup retention pass failed: {}", e);
                    }
                    if let Some(reply) = reply {
                        // Ignore send error — the caller may have stopped waiting
                        let _ = reply.send(result);
                    }
                }
                MaintenanceJob::Flush { reply } => {
                    let _ = reply.send(());
                }
            }
        }
        tracing::debug!("maintenance worker stopped");
    }
}
