// ABOUTME: Converts typed records to and from JSON payload bytes.
// ABOUTME: Also provides structural validation and a CRC32 fingerprint for diagnostics.

use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::error::{DataError, DataResult};

/// Encode a value into the bytes stored for a record.
///
/// Two encodes of the same value are not guaranteed to be byte-identical
/// (map ordering may differ), so callers must compare decoded values.
pub fn encode<T: Serialize + ?Sized>(value: &T) -> DataResult<Vec<u8>> {
    serde_json::to_vec(value).map_err(DataError::Serialization)
}

/// Decode record bytes back into a typed value.
pub fn decode<T: DeserializeOwned>(bytes: &[u8]) -> DataResult<T> {
    serde_json::from_slice(bytes).map_err(|e| DataError::Deserialization {
        reason: e.to_string(),
    })
}

/// Check that bytes parse as well-formed structured data without knowing
/// the target type.
pub fn validate(bytes: &[u8]) -> DataResult<()> {
    decode::<serde_json::Value>(bytes).map(|_| ())
}

/// CRC32 fingerprint of a payload. Reported in events and audits, never
/// persisted alongside the payload.
pub fn checksum(bytes: &[u8]) -> u32 {
    crc32fast::hash(bytes)
}
