// ABOUTME: Persistence layer for durastore, keeping local records and blobs durable.
// ABOUTME: Provides atomic writes, timestamped backups, self-healing loads, blobs, and integrity audits.

pub mod atomic;
pub mod audit;
pub mod backend;
pub mod backup;
pub mod blob;
pub mod layout;
pub mod sqlite;
pub mod store;
pub mod worker;

pub use atomic::{AtomicFileWriter, WriteOptions};
pub use audit::{AuditStatus, IntegrityAuditor};
pub use backend::{FileBackend, KvBackend};
pub use backup::{BackupEntry, BackupStore, PruneReport, Recovered};
pub use blob::BlobStore;
pub use layout::{StorageLayout, validate_key};
pub use sqlite::SqliteBackend;
pub use store::TransactionalStore;
pub use worker::MaintenanceHandle;
