// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! The blob store contract shared by every backend.

use std::fmt;

use async_trait::async_trait;
use base64ct::{Base64, Encoding};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ErrorKind;

#[derive(Debug, thiserror::Error)]
pub enum BlobStoreError {
    #[error("blob not found: {0}")]
    NotFound(String),

    #[error("storage write failed: {0}")]
    Write(String),

    #[error("storage read failed: {0}")]
    Read(String),

    #[error("storage backend unavailable: {0}")]
    Unavailable(String),

    #[error("envelope metadata unreadable: {0}")]
    CorruptMetadata(String),

    #[error("partial delete of {record_id}: {removed} removed, {remaining} remains: {reason}")]
    PartialDelete {
        record_id: String,
        removed: String,
        remaining: String,
        reason: String,
    },

    #[error("invalid record id: {0}")]
    InvalidRecordId(String),

    /// The sidecar write failed and the ciphertext could not be rolled back.
    #[error("partial write of {record_id}: ciphertext left behind: {reason}")]
    PartialWrite { record_id: String, reason: String },
}

impl BlobStoreError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            BlobStoreError::NotFound(_) => ErrorKind::BlobNotFound,
            BlobStoreError::Write(_)
            | BlobStoreError::PartialDelete { .. }
            | BlobStoreError::PartialWrite { .. }
            | BlobStoreError::InvalidRecordId(_) => ErrorKind::StorageWriteFailure,
            BlobStoreError::Read(_) | BlobStoreError::Unavailable(_) => {
                ErrorKind::StorageUnavailable
            }
            BlobStoreError::CorruptMetadata(_) => ErrorKind::IntegrityError,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    Local,
    S3,
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackendKind::Local => write!(f, "local"),
            BackendKind::S3 => write!(f, "s3"),
        }
    }
}

/// Sidecar written next to each ciphertext object.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EnvelopeMetadata {
    /// Base64 nonce.
    pub iv: String,
    /// Base64 authentication tag.
    #[serde(rename = "authTag")]
    pub auth_tag: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
}

impl EnvelopeMetadata {
    pub fn new(nonce: &[u8], tag: &[u8]) -> Self {
        Self {
            iv: Base64::encode_string(nonce),
            auth_tag: Base64::encode_string(tag),
            timestamp: Some(Utc::now()),
        }
    }

    pub fn from_json(bytes: &[u8]) -> Result<Self, BlobStoreError> {
        serde_json::from_slice(bytes).map_err(|e| BlobStoreError::CorruptMetadata(e.to_string()))
    }

    pub fn to_json(&self) -> Result<Vec<u8>, BlobStoreError> {
        serde_json::to_vec(self).map_err(|e| BlobStoreError::Write(format!("metadata encode: {e}")))
    }

    /// Decode to `(nonce, tag)` bytes.
    pub fn decode(&self) -> Result<(Vec<u8>, Vec<u8>), BlobStoreError> {
        let nonce = Base64::decode_vec(&self.iv)
            .map_err(|e| BlobStoreError::CorruptMetadata(format!("iv: {e}")))?;
        let tag = Base64::decode_vec(&self.auth_tag)
            .map_err(|e| BlobStoreError::CorruptMetadata(format!("authTag: {e}")))?;
        Ok((nonce, tag))
    }
}

/// Ciphertext plus its nonce and tag, as read back from a backend.
#[derive(Debug, Clone)]
pub struct StoredEnvelope {
    pub ciphertext: Vec<u8>,
    pub nonce: Vec<u8>,
    pub tag: Vec<u8>,
}

#[derive(Debug, Clone, Serialize)]
pub struct BlobStats {
    pub backend: BackendKind,
    pub location: String,
    /// Number of ciphertext objects.
    pub total_files: u64,
    /// Number of objects of any kind.
    pub total_objects: u64,
    pub total_size: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct BlobHealth {
    pub healthy: bool,
    pub backend: BackendKind,
    pub location: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Persistence for ciphertext and its nonce/tag sidecar, keyed by record id.
///
/// Backends are interchangeable; the pipeline only sees this trait.
#[async_trait]
pub trait BlobStore: Send + Sync {
    fn backend(&self) -> BackendKind;

    /// Human-readable location (directory or bucket).
    fn location(&self) -> String;

    /// Create the directory or bucket if needed. Idempotent.
    async fn initialize(&self) -> Result<(), BlobStoreError>;

    /// Persist ciphertext and sidecar; returns a URI naming backend and location.
    ///
    /// A failed store leaves nothing behind, except on `PartialWrite`.
    async fn store(
        &self,
        record_id: &str,
        ciphertext: &[u8],
        nonce: &[u8],
        tag: &[u8],
    ) -> Result<String, BlobStoreError>;

    /// `NotFound` if either object is missing.
    async fn retrieve(&self, record_id: &str) -> Result<StoredEnvelope, BlobStoreError>;

    /// Remove both objects. `NotFound` if neither exists; `PartialDelete`
    /// if one was removed and the other could not be.
    async fn delete(&self, record_id: &str) -> Result<(), BlobStoreError>;

    async fn health_check(&self) -> BlobHealth;

    async fn stats(&self) -> Result<BlobStats, BlobStoreError>;
}

/// Outcome of removing one object: `Ok(true)` removed, `Ok(false)` absent.
pub(crate) type RemoveOutcome = Result<bool, BlobStoreError>;

/// Fold the two per-object delete outcomes into the contract's result.
pub(crate) fn combine_delete(
    record_id: &str,
    ciphertext: RemoveOutcome,
    metadata: RemoveOutcome,
) -> Result<(), BlobStoreError> {
    match (ciphertext, metadata) {
        (Ok(false), Ok(false)) => Err(BlobStoreError::NotFound(record_id.to_string())),
        (Ok(_), Ok(_)) => Ok(()),
        (Ok(true), Err(e)) => Err(BlobStoreError::PartialDelete {
            record_id: record_id.to_string(),
            removed: "ciphertext".to_string(),
            remaining: "metadata".to_string(),
            reason: e.to_string(),
        }),
        (Err(e), Ok(true)) => Err(BlobStoreError::PartialDelete {
            record_id: record_id.to_string(),
            removed: "metadata".to_string(),
            remaining: "ciphertext".to_string(),
            reason: e.to_string(),
        }),
        (Err(e), Ok(false)) | (Ok(false), Err(e)) => Err(BlobStoreError::Write(format!(
            "delete {record_id}: {e}"
        ))),
        (Err(a), Err(b)) => Err(BlobStoreError::Write(format!(
            "delete {record_id}: ciphertext: {a}; metadata: {b}"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sidecar_uses_wire_field_names() {
        let meta = EnvelopeMetadata {
            iv: "AAAA".to_string(),
            auth_tag: "BBBB".to_string(),
            timestamp: None,
        };
        let json = String::from_utf8(meta.to_json().unwrap()).unwrap();
        assert_eq!(json, r#"{"iv":"AAAA","authTag":"BBBB"}"#);
    }

    #[test]
    fn sidecar_decodes_nonce_and_tag() {
        let meta = EnvelopeMetadata::new(&[1u8; 12], &[2u8; 16]);
        let (nonce, tag) = meta.decode().unwrap();
        assert_eq!(nonce, vec![1u8; 12]);
        assert_eq!(tag, vec![2u8; 16]);
    }

    #[test]
    fn garbage_sidecar_is_integrity_error() {
        let err = EnvelopeMetadata::from_json(b"{not json").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::IntegrityError);

        let meta = EnvelopeMetadata {
            iv: "***".to_string(),
            auth_tag: "AAAA".to_string(),
            timestamp: None,
        };
        assert_eq!(meta.decode().unwrap_err().kind(), ErrorKind::IntegrityError);
    }

    #[test]
    fn delete_outcomes_follow_the_contract() {
        assert!(combine_delete("r", Ok(true), Ok(true)).is_ok());
        assert!(combine_delete("r", Ok(true), Ok(false)).is_ok());

        let missing = combine_delete("r", Ok(false), Ok(false)).unwrap_err();
        assert_eq!(missing.kind(), ErrorKind::BlobNotFound);

        let partial = combine_delete(
            "r",
            Ok(true),
            Err(BlobStoreError::Write("permission denied".to_string())),
        )
        .unwrap_err();
        assert!(matches!(
            partial,
            BlobStoreError::PartialDelete { ref remaining, .. } if remaining == "metadata"
        ));

        let both = combine_delete(
            "r",
            Err(BlobStoreError::Write("a".to_string())),
            Err(BlobStoreError::Write("b".to_string())),
        )
        .unwrap_err();
        assert_eq!(both.kind(), ErrorKind::StorageWriteFailure);
    }

    #[test]
    fn partial_write_is_a_write_failure() {
        let err = BlobStoreError::PartialWrite {
            record_id: "r".to_string(),
            reason: "delete refused".to_string(),
        };
        assert_eq!(err.kind(), ErrorKind::StorageWriteFailure);
        assert!(err.to_string().contains("ciphertext left behind"));
    }
}
