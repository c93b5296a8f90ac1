// ABOUTME: Core types for durastore, shared by the storage crate and its callers.
// ABOUTME: Holds the error taxonomy, payload codec, store configuration, and diagnostic events.

pub mod codec;
pub mod config;
pub mod error;
pub mod event;

pub use config::{ConfigError, StoreConfig};
pub use error::{DataError, DataResult};
pub use event::{EventBus, StoreEvent};
