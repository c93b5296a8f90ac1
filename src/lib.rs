// ABOUTME: Facade crate for durastore, re-exporting the core types and the storage layer.
// ABOUTME: Applications depend on this crate and open one TransactionalStore per data root.

pub use durastore_core::codec;
pub use durastore_core::{ConfigError, DataError, DataResult, EventBus, StoreConfig, StoreEvent};
pub use durastore_store::{
    AtomicFileWriter, AuditStatus, BackupEntry, BackupStore, BlobStore, FileBackend,
    IntegrityAuditor, KvBackend, PruneReport, SqliteBackend, StorageLayout, TransactionalStore,
    WriteOptions,
};
