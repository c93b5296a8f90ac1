// ABOUTME: Timestamped backups of prior record payloads, with retention pruning and recovery scans.
// ABOUTME: Backups are named {key}_{ISO8601 basic UTC}.backup and never modified after creation.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, NaiveDateTime, TimeDelta, Utc};
use durastore_core::{DataError, DataResult, EventBus, StoreEvent};

use crate::atomic::AtomicFileWriter;

const BACKUP_SUFFIX: &str = ".backup";
const TIMESTAMP_FORMAT: &str = "%Y%m%dT%H%M%S%.6fZ";
const TIMESTAMP_PARSE_FORMAT: &str = "%Y%m%dT%H%M%S%.fZ";

/// A single backup file on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackupEntry {
    pub key: String,
    pub path: PathBuf,
    pub created_at: DateTime<Utc>,
}

/// Outcome of a retention pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PruneReport {
    pub removed: usize,
    pub failed: usize,
}

/// A value restored from a backup, along with the bytes it was decoded from.
#[derive(Debug)]
pub struct Recovered<T> {
    pub value: T,
    pub bytes: Vec<u8>,
    pub entry: BackupEntry,
}

/// Manages the Backups/ directory shared by all keys.
#[derive(Debug, Clone)]
pub struct BackupStore {
    dir: PathBuf,
    writer: Arc<AtomicFileWriter>,
    events: EventBus,
}

impl BackupStore {
    pub fn new(dir: impl Into<PathBuf>, writer: Arc<AtomicFileWriter>, events: EventBus) -> Self {
        Self {
            dir: dir.into(),
            writer,
            events,
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Write `payload` as a new backup of `key` stamped `captured_at`.
    ///
    /// Failures are logged and reported on the event bus, never returned: a
    /// failed backup must not block the write it precedes.
    pub fn create_backup(
        &self,
        key: &str,
        payload: &[u8],
        captured_at: DateTime<Utc>,
    ) -> Option<BackupEntry> {
        match self.try_create_backup(key, payload, captured_at) {
            Ok(entry) => {
                tracing::info!("created backup for '{}' at {}", key, entry.path.display());
                self.events.emit(StoreEvent::BackupCreated {
                    key: key.to_string(),
                    path: entry.path.clone(),
                    created_at: entry.created_at,
                });
                Some(entry)
            }
            Err(e) => {
                tracing::error!("failed to create backup for '{}': {}", key, e);
                self.events.emit(StoreEvent::BackupFailed {
                    key: key.to_string(),
                    error: e.to_string(),
                });
                None
            }
        }
    }

    fn try_create_backup(
        &self,
        key: &str,
        payload: &[u8],
        captured_at: DateTime<Utc>,
    ) -> DataResult<BackupEntry> {
        // Two saves inside the same microsecond would collide; nudge forward
        // so an existing backup is never overwritten.
        let mut created_at = captured_at;
        let mut path = self.dir.join(backup_file_name(key, created_at));
        while path.exists() {
            created_at += TimeDelta::microseconds(1);
            path = self.dir.join(backup_file_name(key, created_at));
        }

        self.writer.write_atomic(&path, payload)?;

        Ok(BackupEntry {
            key: key.to_string(),
            path,
            created_at,
        })
    }

    /// Backups of `key`, newest first. Ties are broken by filename, descending.
    pub fn list_backups(&self, key: &str) -> DataResult<Vec<BackupEntry>> {
        let mut entries: Vec<BackupEntry> = self
            .scan()?
            .into_iter()
            .filter(|e| e.key == key)
            .collect();
        sort_newest_first(&mut entries);
        Ok(entries)
    }

    /// Every backup across all keys, newest first.
    pub fn list_all(&self) -> DataResult<Vec<BackupEntry>> {
        let mut entries = self.scan()?;
        sort_newest_first(&mut entries);
        Ok(entries)
    }

    fn scan(&self) -> DataResult<Vec<BackupEntry>> {
        if !self.dir.exists() {
            return Ok(Vec::new());
        }

        let mut entries = Vec::new();
        for entry in fs::read_dir(&self.dir)? {
            let entry = entry?;
            let path = entry.path();
            if !path.is_file() {
                continue;
            }
            let name = entry.file_name();
            let name_str = name.to_string_lossy();

            if let Some((key, created_at)) = parse_backup_file_name(&name_str) {
                entries.push(BackupEntry {
                    key,
                    path,
                    created_at,
                });
            } else if let Some(stem) = name_str.strip_suffix(BACKUP_SUFFIX) {
                let Some((key, _)) = stem.rsplit_once('_').filter(|(k, _)| !k.is_empty()) else {
                    tracing::debug!("ignoring {} in backups dir: no key separator", name_str);
                    continue;
                };
                // Unrecognised timestamp: fall back to the file's mtime.
                match entry.metadata().and_then(|m| m.modified()) {
                    Ok(modified) => entries.push(BackupEntry {
                        key: key.to_string(),
                        path,
                        created_at: DateTime::<Utc>::from(modified),
                    }),
                    Err(e) => {
                        tracing::warn!("skipping backup {} with unreadable time: {}", name_str, e);
                    }
                }
            }
        }
        Ok(entries)
    }

    /// Delete every backup, of any key, created before `now - retention`.
    /// Individual deletion failures are logged and counted; the pass goes on.
    pub fn prune_older_than(&self, retention: Duration) -> DataResult<PruneReport> {
        let cutoff = TimeDelta::from_std(retention)
            .ok()
            .and_then(|age| Utc::now().checked_sub_signed(age))
            .unwrap_or(DateTime::<Utc>::MIN_UTC);

        let mut report = PruneReport::default();
        for entry in self.scan()? {
            if entry.created_at >= cutoff {
                continue;
            }
            match fs::remove_file(&entry.path) {
                Ok(()) => {
                    tracing::debug!("pruned backup {}", entry.path.display());
                    report.removed += 1;
                }
                Err(e) => {
                    tracing::warn!("failed to prune backup {}: {}", entry.path.display(), e);
                    report.failed += 1;
                }
            }
        }

        tracing::info!(
            "backup retention pass removed {} backups ({} failures)",
            report.removed,
            report.failed
        );
        self.events.emit(StoreEvent::BackupsPruned {
            removed: report.removed,
            failed: report.failed,
        });
        Ok(report)
    }

    /// Scan the backups of `key` newest first and return the first one that
    /// `decode` accepts.
    ///
    /// Fails with `Corruption("all backups corrupted")` when no backup decodes
    /// or none exist.
    pub fn recover<T, F>(&self, key: &str, decode: F) -> DataResult<Recovered<T>>
    where
        F: Fn(&[u8]) -> DataResult<T>,
    {
        let backups = self.list_backups(key)?;
        let tried = backups.len();

        for entry in backups {
            let bytes = match fs::read(&entry.path) {
                Ok(bytes) => bytes,
                Err(e) => {
                    tracing::warn!("unreadable backup {}: {}", entry.path.display(), e);
                    continue;
                }
            };
            match decode(&bytes) {
                Ok(value) => {
                    return Ok(Recovered {
                        value,
                        bytes,
                        entry,
                    });
                }
                Err(e) => {
                    tracing::warn!("backup {} is corrupted: {}", entry.path.display(), e);
                }
            }
        }

        tracing::error!("no usable backup for '{}' ({} tried)", key, tried);
        self.events.emit(StoreEvent::RecoveryFailed {
            key: key.to_string(),
            backups_tried: tried,
        });
        Err(DataError::Corruption {
            key: key.to_string(),
            reason: "all backups corrupted".to_string(),
        })
    }

    /// Delete every backup of `key`. Returns how many were removed.
    pub fn clear(&self, key: &str) -> DataResult<usize> {
        let entries = self.list_backups(key)?;
        Ok(remove_entries(&entries))
    }

    /// Delete every backup of every key.
    pub fn clear_all(&self) -> DataResult<usize> {
        let entries = self.scan()?;
        Ok(remove_entries(&entries))
    }
}

fn remove_entries(entries: &[BackupEntry]) -> usize {
    let mut removed = 0;
    for entry in entries {
        match fs::remove_file(&entry.path) {
            Ok(()) => removed += 1,
            Err(e) => tracing::warn!("failed to remove backup {}: {}", entry.path.display(), e),
        }
    }
    removed
}

fn sort_newest_first(entries: &mut [BackupEntry]) {
    entries.sort_by(|a, b| {
        b.created_at
            .cmp(&a.created_at)
            .then_with(|| b.path.file_name().cmp(&a.path.file_name()))
    });
}

/// `{key}_{timestamp}.backup`, with the timestamp in ISO 8601 basic format.
pub fn backup_file_name(key: &str, created_at: DateTime<Utc>) -> String {
    format!(
        "{}_{}{}",
        key,
        created_at.format(TIMESTAMP_FORMAT),
        BACKUP_SUFFIX
    )
}

/// Split a backup filename into its key and timestamp.
pub fn parse_backup_file_name(name: &str) -> Option<(String, DateTime<Utc>)> {
    let stem = name.strip_suffix(BACKUP_SUFFIX)?;
    let (key, stamp) = stem.rsplit_once('_')?;
    if key.is_empty() {
        return None;
    }
    let naive = NaiveDateTime::parse_from_str(stamp, TIMESTAMP_PARSE_FORMAT).ok()?;
    Some((key.to_string(), naive.and_utc()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use durastore_core::codec;
    use tempfile::TempDir;

    fn make_store(dir: &TempDir) -> BackupStore {
        let writer = Arc::new(AtomicFileWriter::new(dir.path().join("Temp"), 1.2));
        BackupStore::new(dir.path().join("Backups"), writer, EventBus::default())
    }

    fn days_ago(days: i64) -> DateTime<Utc> {
        Utc::now() - TimeDelta::days(days)
    }

    #[test]
    fn file_name_round_trip() {
        let ts = Utc::now();
        let name = backup_file_name("item_history", ts);
        assert!(name.starts_with("item_history_"));
        assert!(name.ends_with(".backup"));

        let (key, parsed) = parse_backup_file_name(&name).unwrap();
        assert_eq!(key, "item_history");
        assert_eq!(parsed.timestamp_micros(), ts.timestamp_micros());
    }

    #[test]
    fn parse_rejects_foreign_files() {
        assert!(parse_backup_file_name("settings.json").is_none());
        assert!(parse_backup_file_name("settings_notatime.backup").is_none());
        assert!(parse_backup_file_name("_20260101T000000.000000Z.backup").is_none());
    }

    #[test]
    fn list_is_newest_first_and_scoped_to_key() {
        let dir = TempDir::new().unwrap();
        let store = make_store(&dir);

        store.create_backup("settings", b"old", days_ago(2)).unwrap();
        store.create_backup("settings", b"newer", days_ago(1)).unwrap();
        store.create_backup("settings_extra", b"other", Utc::now()).unwrap();

        let list = store.list_backups("settings").unwrap();
        assert_eq!(list.len(), 2);
        assert!(list[0].created_at > list[1].created_at);
        assert_eq!(fs::read(&list[0].path).unwrap(), b"newer");
        assert_eq!(fs::read(&list[1].path).unwrap(), b"old");

        assert_eq!(store.list_backups("settings_extra").unwrap().len(), 1);
        assert_eq!(store.list_all().unwrap().len(), 3);
    }

    #[test]
    fn same_instant_backups_do_not_collide() {
        let dir = TempDir::new().unwrap();
        let store = make_store(&dir);
        let ts = Utc::now();

        let a = store.create_backup("settings", b"a", ts).unwrap();
        let b = store.create_backup("settings", b"b", ts).unwrap();

        assert_ne!(a.path, b.path);
        assert!(b.created_at > a.created_at);
        let list = store.list_backups("settings").unwrap();
        assert_eq!(fs::read(&list[0].path).unwrap(), b"b");
    }

    #[test]
    fn failed_backup_is_swallowed_and_reported() {
        let dir = TempDir::new().unwrap();
        let store = make_store(&dir);
        let mut rx = store.events.subscribe();

        // A regular file where the Temp/ directory should be makes staging fail.
        fs::write(dir.path().join("Temp"), b"not a directory").unwrap();

        assert!(store.create_backup("settings", b"data", Utc::now()).is_none());
        assert!(matches!(
            rx.try_recv().unwrap(),
            StoreEvent::BackupFailed { .. }
        ));
    }

    #[test]
    fn prune_removes_only_expired_backups() {
        let dir = TempDir::new().unwrap();
        let store = make_store(&dir);

        store.create_backup("settings", b"ancient", days_ago(10)).unwrap();
        store.create_backup("favorites", b"ancient", days_ago(8)).unwrap();
        store.create_backup("settings", b"recent", days_ago(3)).unwrap();
        store.create_backup("favorites", b"fresh", Utc::now()).unwrap();

        let report = store
            .prune_older_than(Duration::from_secs(7 * 86_400))
            .unwrap();
        assert_eq!(report, PruneReport { removed: 2, failed: 0 });

        let settings = store.list_backups("settings").unwrap();
        assert_eq!(settings.len(), 1);
        assert_eq!(fs::read(&settings[0].path).unwrap(), b"recent");
        assert_eq!(store.list_backups("favorites").unwrap().len(), 1);
    }

    #[test]
    fn prune_ignores_non_backup_files() {
        let dir = TempDir::new().unwrap();
        let store = make_store(&dir);
        fs::create_dir_all(store.dir()).unwrap();
        fs::write(store.dir().join("README.txt"), b"keep me").unwrap();

        let report = store.prune_older_than(Duration::ZERO).unwrap();
        assert_eq!(report.removed, 0);
        assert!(store.dir().join("README.txt").exists());
    }

    #[test]
    fn backup_names_without_key_separator_are_ignored() {
        let dir = TempDir::new().unwrap();
        let store = make_store(&dir);
        fs::create_dir_all(store.dir()).unwrap();
        fs::write(store.dir().join("settings.backup"), br#"{"theme":"stray"}"#).unwrap();
        fs::write(store.dir().join("_orphan.backup"), b"{}").unwrap();
        let manual = store.dir().join("settings_manual.backup");
        fs::write(&manual, br#"{"theme":"kept"}"#).unwrap();
        let hour_ago = std::time::SystemTime::now() - Duration::from_secs(3600);
        fs::File::options()
            .write(true)
            .open(&manual)
            .unwrap()
            .set_modified(hour_ago)
            .unwrap();

        // Only the unparseable-timestamp file with a key falls back to mtime.
        let all = store.list_all().unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].key, "settings");

        let recovered = store
            .recover("settings", codec::decode::<serde_json::Value>)
            .unwrap();
        assert_eq!(recovered.value["theme"], "kept");

        let report = store.prune_older_than(Duration::from_secs(60)).unwrap();
        assert_eq!(report.removed, 1);
        assert!(!manual.exists());
        assert!(store.dir().join("settings.backup").exists());
        assert!(store.dir().join("_orphan.backup").exists());
    }

    #[test]
    fn recover_returns_newest_decodable_backup() {
        let dir = TempDir::new().unwrap();
        let store = make_store(&dir);

        store
            .create_backup("settings", br#"{"theme":"solarized"}"#, days_ago(3))
            .unwrap();
        store
            .create_backup("settings", br#"{"theme":"dark"}"#, days_ago(2))
            .unwrap();
        store
            .create_backup("settings", br#"{"theme":"li"#, days_ago(1))
            .unwrap();

        let recovered = store
            .recover("settings", codec::decode::<serde_json::Value>)
            .unwrap();
        assert_eq!(recovered.value["theme"], "dark");
        assert_eq!(recovered.bytes, br#"{"theme":"dark"}"#);
    }

    #[test]
    fn recover_fails_when_all_backups_corrupted() {
        let dir = TempDir::new().unwrap();
        let store = make_store(&dir);
        store.create_backup("settings", b"{{{", days_ago(1)).unwrap();
        store.create_backup("settings", b"", days_ago(2)).unwrap();

        let err = store
            .recover("settings", codec::decode::<serde_json::Value>)
            .unwrap_err();
        match err {
            DataError::Corruption { key, reason } => {
                assert_eq!(key, "settings");
                assert_eq!(reason, "all backups corrupted");
            }
            other => panic!("expected corruption, got {other:?}"),
        }
    }

    #[test]
    fn recover_without_backups_is_corruption() {
        let dir = TempDir::new().unwrap();
        let store = make_store(&dir);
        let err = store
            .recover("missing", codec::decode::<serde_json::Value>)
            .unwrap_err();
        assert!(err.is_corruption());
    }

    #[test]
    fn clear_scopes_to_key() {
        let dir = TempDir::new().unwrap();
        let store = make_store(&dir);
        store.create_backup("settings", b"1", days_ago(1)).unwrap();
        store.create_backup("settings", b"2", Utc::now()).unwrap();
        store.create_backup("favorites", b"3", Utc::now()).unwrap();

        assert_eq!(store.clear("settings").unwrap(), 2);
        assert!(store.list_backups("settings").unwrap().is_empty());
        assert_eq!(store.clear_all().unwrap(), 1);
        assert!(store.list_all().unwrap().is_empty());
    }
}
