// ABOUTME: End-to-end smoke test for the durastore lifecycle.
// ABOUTME: Tests save/load, backups on overwrite, self-healing after corruption, blobs, and retention.

use std::fs;

use durastore::{DataError, StoreConfig, StoreEvent, TransactionalStore};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Settings {
    theme: String,
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("durastore_store=debug")),
        )
        .with_test_writer()
        .try_init();
}

fn theme(name: &str) -> Settings {
    Settings {
        theme: name.to_string(),
    }
}

#[tokio::test]
async fn smoke_test_settings_lifecycle() {
    init_tracing();

    // 1. Open a store in a temp root
    let dir = tempfile::TempDir::new().unwrap();
    let store = TransactionalStore::open(StoreConfig::new(dir.path())).unwrap();
    let mut events = store.subscribe();

    // 2. First save, then load it back
    store.save("settings", &theme("dark"), true).await.unwrap();
    let loaded: Option<Settings> = store.load("settings").await.unwrap();
    assert_eq!(loaded, Some(theme("dark")));

    // 3. Overwrite: the previous value lands in a backup
    store.save("settings", &theme("light"), true).await.unwrap();
    store.flush().await;

    let backups = store.backups().list_backups("settings").unwrap();
    assert_eq!(backups.len(), 1, "one backup of the dark theme");
    let name = backups[0].path.file_name().unwrap().to_string_lossy().to_string();
    assert!(name.starts_with("settings_") && name.ends_with(".backup"));
    let backed_up: Settings = serde_json::from_slice(&fs::read(&backups[0].path).unwrap()).unwrap();
    assert_eq!(backed_up, theme("dark"));

    let loaded: Option<Settings> = store.load("settings").await.unwrap();
    assert_eq!(loaded, Some(theme("light")));

    // 4. Corrupt the live file: load heals from the newest backup
    let live = dir.path().join("Data").join("settings.json");
    fs::write(&live, b"{\"theme\":\"li").unwrap();

    let loaded: Option<Settings> = store.load("settings").await.unwrap();
    assert_eq!(loaded, Some(theme("dark")));

    let mut saw_recovery = false;
    while let Ok(event) = events.try_recv() {
        if matches!(event, StoreEvent::Recovered { ref key, .. } if key == "settings") {
            saw_recovery = true;
        }
    }
    assert!(saw_recovery, "recovery should be reported on the event channel");

    // 5. The audit now passes for every stored key
    let report = store.perform_integrity_check(&["settings"]);
    assert!(report["settings"]);
}

#[tokio::test]
async fn smoke_test_unrecoverable_record() {
    init_tracing();

    let dir = tempfile::TempDir::new().unwrap();
    let store = TransactionalStore::open(StoreConfig::new(dir.path())).unwrap();

    store.save("favorites", &vec!["a", "b"], true).await.unwrap();
    store.save("favorites", &vec!["a"], true).await.unwrap();
    store.flush().await;

    for backup in store.backups().list_backups("favorites").unwrap() {
        fs::write(&backup.path, b"[").unwrap();
    }
    fs::write(dir.path().join("Data").join("favorites.json"), b"]").unwrap();

    let err = store.load::<Vec<String>>("favorites").await.unwrap_err();
    assert!(matches!(err, DataError::Corruption { .. }), "got {err:?}");
}

#[tokio::test]
async fn smoke_test_blobs_and_maintenance() {
    init_tracing();

    let dir = tempfile::TempDir::new().unwrap();
    let store = TransactionalStore::open(StoreConfig::new(dir.path())).unwrap();

    // Blobs round-trip through Data/blobs and leave Temp/ empty
    let image = vec![7u8; 64 * 1024];
    let path = store.blobs().save_blob("clip_0001.png", &image).unwrap();
    assert!(path.starts_with(dir.path().join("Data").join("blobs")));
    assert_eq!(store.blobs().load_blob("clip_0001.png").unwrap(), Some(image));
    assert!(store.blobs().load_blob("missing.png").unwrap().is_none());
    assert_eq!(fs::read_dir(dir.path().join("Temp")).unwrap().count(), 0);

    // Retention keeps fresh backups
    store.save("history", &vec![1], true).await.unwrap();
    store.save("history", &vec![1, 2], true).await.unwrap();
    let report = store.cleanup_old_backups(7).await.unwrap();
    assert_eq!(report.removed, 0);
    assert_eq!(store.backups().list_backups("history").unwrap().len(), 1);

    // A zero-day window prunes everything, but never live data
    let report = store.cleanup_old_backups(0).await.unwrap();
    assert_eq!(report.removed, 1);
    assert_eq!(
        store.load::<Vec<u32>>("history").await.unwrap(),
        Some(vec![1, 2])
    );
}
