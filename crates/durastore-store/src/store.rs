// ABOUTME: Transactional record store: backup-then-write-then-verify saves and self-healing loads.
// ABOUTME: Retries transient write faults with backoff and recovers corrupted records from backups.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::Utc;
use durastore_core::config::retention_days;
use durastore_core::{DataError, DataResult, EventBus, StoreConfig, StoreEvent, codec};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::sync::broadcast;

use crate::atomic::AtomicFileWriter;
use crate::audit::{AuditStatus, IntegrityAuditor};
use crate::backend::{FileBackend, KvBackend};
use crate::backup::{BackupStore, PruneReport};
use crate::blob::BlobStore;
use crate::layout::{StorageLayout, validate_key};
use crate::sqlite::SqliteBackend;
use crate::worker::MaintenanceHandle;

const SQLITE_FILE: &str = "records.db";

/// The public save/load API over a [`KvBackend`].
///
/// Construct one per data root at application start and share it by
/// reference (or `Arc`). Calls for the same key are not serialized against
/// each other: the last write to commit wins.
pub struct TransactionalStore<B: KvBackend = FileBackend> {
    config: StoreConfig,
    layout: StorageLayout,
    backend: B,
    backups: BackupStore,
    blobs: BlobStore,
    maintenance: MaintenanceHandle,
    events: EventBus,
}

impl TransactionalStore<FileBackend> {
    /// Open a store that keeps one JSON file per key under `Data/`.
    pub fn open(config: StoreConfig) -> DataResult<Self> {
        let layout = StorageLayout::new(&config.root)?;
        let writer = Arc::new(AtomicFileWriter::new(layout.temp_dir(), config.space_margin));
        let backend = FileBackend::new(layout.data_dir(), Arc::clone(&writer));
        Self::assemble(config, layout, writer, backend)
    }
}

impl TransactionalStore<SqliteBackend> {
    /// Open a store whose live payloads live in `Data/records.db`.
    pub fn open_sqlite(config: StoreConfig) -> DataResult<Self> {
        let layout = StorageLayout::new(&config.root)?;
        let writer = Arc::new(AtomicFileWriter::new(layout.temp_dir(), config.space_margin));
        let backend = SqliteBackend::open(&layout.data_dir().join(SQLITE_FILE))?;
        Self::assemble(config, layout, writer, backend)
    }
}

impl<B: KvBackend> TransactionalStore<B> {
    /// Open a store over a caller-supplied backend. Backups, blobs and temp
    /// staging still live under `config.root`.
    pub fn open_with_backend(config: StoreConfig, backend: B) -> DataResult<Self> {
        let layout = StorageLayout::new(&config.root)?;
        let writer = Arc::new(AtomicFileWriter::new(layout.temp_dir(), config.space_margin));
        Self::assemble(config, layout, writer, backend)
    }

    fn assemble(
        config: StoreConfig,
        layout: StorageLayout,
        writer: Arc<AtomicFileWriter>,
        backend: B,
    ) -> DataResult<Self> {
        // Anything left in Temp/ belongs to a write that never committed.
        let stale = layout.clear_temp()?;
        if stale > 0 {
            tracing::info!("removed {} stale temp files", stale);
        }

        let events = EventBus::default();
        let backups = BackupStore::new(layout.backups_dir(), Arc::clone(&writer), events.clone());
        let blobs = BlobStore::new(layout.blobs_dir(), writer, config.blob_headroom);
        let maintenance = MaintenanceHandle::spawn(backups.clone())?;
        maintenance.enqueue_prune(config.backup_retention);

        tracing::info!("opened store at {}", layout.root().display());

        Ok(Self {
            config,
            layout,
            backend,
            backups,
            blobs,
            maintenance,
            events,
        })
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    pub fn layout(&self) -> &StorageLayout {
        &self.layout
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn backups(&self) -> &BackupStore {
        &self.backups
    }

    pub fn blobs(&self) -> &BlobStore {
        &self.blobs
    }

    /// Diagnostic events: backup failures, retries, recoveries, pruning.
    pub fn subscribe(&self) -> broadcast::Receiver<StoreEvent> {
        self.events.subscribe()
    }

    /// Persist `value` under `key`.
    ///
    /// 1. With `with_backup`, queue a backup of the current live payload
    /// 2. Encode (a failure here is returned at once)
    /// 3. Write atomically and verify the stored length, retrying transient
    ///    faults up to `max_retries` attempts with `delay * attempt` backoff
    pub async fn save<T>(&self, key: &str, value: &T, with_backup: bool) -> DataResult<()>
    where
        T: Serialize + ?Sized,
    {
        validate_key(key)?;

        if with_backup {
            self.backup_live_payload(key);
        }

        let bytes = codec::encode(value)?;
        self.write_with_retry(key, &bytes).await
    }

    /// Capture the current payload now, so the backup is older than whatever
    /// this save commits, and hand it to the maintenance worker.
    fn backup_live_payload(&self, key: &str) {
        match self.backend.read(key) {
            Ok(Some(prior)) => self.maintenance.enqueue_backup(key, prior, Utc::now()),
            Ok(None) => {}
            Err(e) => {
                tracing::warn!("could not read '{}' for backup: {}", key, e);
                self.events.emit(StoreEvent::BackupFailed {
                    key: key.to_string(),
                    error: e.to_string(),
                });
            }
        }
    }

    async fn write_with_retry(&self, key: &str, bytes: &[u8]) -> DataResult<()> {
        let max_attempts = self.config.max_retries.max(1);
        let mut attempt = 0;

        loop {
            attempt += 1;
            let err = match self.write_and_verify(key, bytes) {
                Ok(()) => {
                    tracing::debug!("saved '{}' ({} bytes, attempt {})", key, bytes.len(), attempt);
                    self.events.emit(StoreEvent::Committed {
                        key: key.to_string(),
                        len: bytes.len() as u64,
                        checksum: codec::checksum(bytes),
                        attempts: attempt,
                    });
                    return Ok(());
                }
                Err(e) => e,
            };

            if !err.is_transient() {
                tracing::error!("save of '{}' failed: {}", key, err);
                return Err(err);
            }

            if attempt >= max_attempts {
                tracing::error!(
                    "save of '{}' failed after {} attempts: {}",
                    key,
                    attempt,
                    err
                );
                return Err(DataError::WriteFailed {
                    key: key.to_string(),
                    attempts: attempt,
                    source: Box::new(err),
                });
            }

            tracing::warn!("save of '{}' attempt {} failed, retrying: {}", key, attempt, err);
            self.events.emit(StoreEvent::WriteRetry {
                key: key.to_string(),
                attempt,
                error: err.to_string(),
            });
            tokio::time::sleep(self.config.retry_base_delay * attempt).await;
        }
    }

    fn write_and_verify(&self, key: &str, bytes: &[u8]) -> DataResult<()> {
        self.backend.write(key, bytes)?;

        let expected = bytes.len() as u64;
        let actual = self
            .backend
            .read(key)?
            .map_or(0, |stored| stored.len() as u64);
        if actual != expected {
            return Err(DataError::Integrity {
                target: format!("record '{}'", key),
                expected,
                actual,
            });
        }
        Ok(())
    }

    /// Load the value stored under `key`.
    ///
    /// Returns `Ok(None)` when nothing was ever saved. A live payload that no
    /// longer decodes is replaced by the newest backup that does; if none
    /// does, `Corruption` is returned rather than a fallback value.
    pub async fn load<T: DeserializeOwned>(&self, key: &str) -> DataResult<Option<T>> {
        validate_key(key)?;

        let Some(bytes) = self.backend.read(key)? else {
            return Ok(None);
        };

        match codec::decode::<T>(&bytes) {
            Ok(value) => Ok(Some(value)),
            Err(e) => {
                tracing::warn!("live payload for '{}' is corrupted ({}), recovering", key, e);
                self.recover(key).await.map(Some)
            }
        }
    }

    async fn recover<T: DeserializeOwned>(&self, key: &str) -> DataResult<T> {
        // Backups queued by earlier saves must be on disk before the scan.
        self.maintenance.flush().await;

        let recovered = self.backups.recover(key, codec::decode::<T>)?;

        if let Err(e) = self.backend.write(key, &recovered.bytes) {
            tracing::warn!("recovered '{}' but could not re-commit it: {}", key, e);
        }

        tracing::warn!(
            "recovered '{}' from backup {}",
            key,
            recovered.entry.path.display()
        );
        self.events.emit(StoreEvent::Recovered {
            key: key.to_string(),
            backup: recovered.entry.path,
        });
        Ok(recovered.value)
    }

    /// Delete the live payload for `key`. Backups are kept.
    pub fn remove(&self, key: &str) -> DataResult<bool> {
        validate_key(key)?;
        self.backend.remove(key)
    }

    /// Per-key structural validation of the live payloads.
    pub fn perform_integrity_check<S: AsRef<str>>(&self, keys: &[S]) -> BTreeMap<String, bool> {
        IntegrityAuditor::new(&self.backend).audit_all(keys)
    }

    /// Detailed audit of every stored key.
    pub fn audit_stored(&self) -> DataResult<BTreeMap<String, AuditStatus>> {
        IntegrityAuditor::new(&self.backend).audit_stored()
    }

    /// Delete backups older than `retention_days`, on the maintenance worker.
    pub async fn cleanup_old_backups(&self, days: u32) -> DataResult<PruneReport> {
        self.maintenance
            .prune(retention_days(days))
            .await
    }

    /// Wait for queued backups and retention passes to finish.
    pub async fn flush(&self) {
        self.maintenance.flush().await;
    }

    /// Empty the staging area once queued backups have landed. Saves running
    /// concurrently on other tasks are not waited for.
    pub async fn clear_temp(&self) -> DataResult<usize> {
        self.maintenance.flush().await;
        self.layout.clear_temp()
    }

    /// Drop every backup of `key`.
    pub async fn clear_backups(&self, key: &str) -> DataResult<usize> {
        validate_key(key)?;
        self.maintenance.flush().await;
        self.backups.clear(key)
    }
}
