// ABOUTME: Read-only integrity audit that checks each stored record parses as structured data.
// ABOUTME: Reports per-key results for diagnostics without repairing or mutating anything.

use std::collections::BTreeMap;

use durastore_core::{DataResult, codec};

use crate::backend::KvBackend;
use crate::layout::validate_key;

/// Result of auditing one key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuditStatus {
    Valid { len: u64, checksum: u32 },
    /// No live payload. Nothing stored means nothing corrupt.
    Missing,
    Malformed { reason: String },
    Unreadable { reason: String },
}

impl AuditStatus {
    pub fn is_ok(&self) -> bool {
        matches!(self, AuditStatus::Valid { .. } | AuditStatus::Missing)
    }
}

pub struct IntegrityAuditor<'a, B: KvBackend + ?Sized> {
    backend: &'a B,
}

impl<'a, B: KvBackend + ?Sized> IntegrityAuditor<'a, B> {
    pub fn new(backend: &'a B) -> Self {
        Self { backend }
    }

    pub fn audit_key(&self, key: &str) -> AuditStatus {
        if let Err(e) = validate_key(key) {
            return AuditStatus::Unreadable {
                reason: e.to_string(),
            };
        }
        match self.backend.read(key) {
            Ok(None) => AuditStatus::Missing,
            Ok(Some(bytes)) => match codec::validate(&bytes) {
                Ok(()) => AuditStatus::Valid {
                    len: bytes.len() as u64,
                    checksum: codec::checksum(&bytes),
                },
                Err(e) => AuditStatus::Malformed {
                    reason: e.to_string(),
                },
            },
            Err(e) => AuditStatus::Unreadable {
                reason: e.to_string(),
            },
        }
    }

    /// Per-key pass/fail.
    pub fn audit_all<S: AsRef<str>>(&self, keys: &[S]) -> BTreeMap<String, bool> {
        self.audit_detailed(keys)
            .into_iter()
            .map(|(key, status)| (key, status.is_ok()))
            .collect()
    }

    pub fn audit_detailed<S: AsRef<str>>(&self, keys: &[S]) -> BTreeMap<String, AuditStatus> {
        let report: BTreeMap<String, AuditStatus> = keys
            .iter()
            .map(|k| (k.as_ref().to_string(), self.audit_key(k.as_ref())))
            .collect();

        let failed = report.values().filter(|s| !s.is_ok()).count();
        if failed > 0 {
            tracing::warn!("integrity audit: {} of {} keys failed", failed, report.len());
        } else {
            tracing::info!("integrity audit: all {} keys passed", report.len());
        }
        report
    }

    /// Audit every key the backend currently holds.
    pub fn audit_stored(&self) -> DataResult<BTreeMap<String, AuditStatus>> {
        let keys = self.backend.keys()?;
        Ok(self.audit_detailed(keys.as_slice()))
    }
}
