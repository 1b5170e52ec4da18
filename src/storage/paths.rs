// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Object keys, local blob paths and data-directory layout.

use std::path::{Path, PathBuf};

use super::BlobStoreError;

/// Default root for the journal and audit log.
pub const DATA_ROOT: &str = "./data";

/// Bucket prefix for ciphertext objects.
pub const CIPHERTEXT_PREFIX: &str = "encrypted";

/// Bucket prefix for sidecar metadata objects.
pub const METADATA_PREFIX: &str = "metadata";

pub const CIPHERTEXT_EXTENSION: &str = ".enc";
pub const METADATA_EXTENSION: &str = ".meta.json";

const MAX_RECORD_ID_LEN: usize = 128;

/// Record ids become file names and object keys; only allow characters that
/// are inert in both.
pub fn validate_record_id(record_id: &str) -> Result<(), BlobStoreError> {
    if record_id.is_empty() || record_id.len() > MAX_RECORD_ID_LEN {
        return Err(BlobStoreError::InvalidRecordId(format!(
            "length must be 1..={MAX_RECORD_ID_LEN}"
        )));
    }
    if record_id.starts_with('.') {
        return Err(BlobStoreError::InvalidRecordId(
            "must not start with '.'".to_string(),
        ));
    }
    if let Some(bad) = record_id
        .chars()
        .find(|c| !(c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.')))
    {
        return Err(BlobStoreError::InvalidRecordId(format!(
            "character {bad:?} not allowed"
        )));
    }
    Ok(())
}

/// Key derivation for bucket objects.
#[derive(Debug, Clone)]
pub struct BlobKeys;

impl BlobKeys {
    /// `encrypted/{record_id}.enc`
    pub fn ciphertext(record_id: &str) -> String {
        format!("{CIPHERTEXT_PREFIX}/{record_id}{CIPHERTEXT_EXTENSION}")
    }

    /// `metadata/{record_id}.meta.json`
    pub fn metadata(record_id: &str) -> String {
        format!("{METADATA_PREFIX}/{record_id}{METADATA_EXTENSION}")
    }

    /// `s3://{bucket}/encrypted/{record_id}.enc`
    pub fn s3_uri(bucket: &str, record_id: &str) -> String {
        format!("s3://{bucket}/{}", Self::ciphertext(record_id))
    }

    /// `{dir}/{record_id}.enc`
    pub fn local_ciphertext(dir: &Path, record_id: &str) -> PathBuf {
        dir.join(format!("{record_id}{CIPHERTEXT_EXTENSION}"))
    }

    /// `{dir}/{record_id}.meta.json`
    pub fn local_metadata(dir: &Path, record_id: &str) -> PathBuf {
        dir.join(format!("{record_id}{METADATA_EXTENSION}"))
    }

    /// `file://{dir}/{record_id}.enc`
    pub fn file_uri(dir: &Path, record_id: &str) -> String {
        format!("file://{}", Self::local_ciphertext(dir, record_id).display())
    }
}

/// Layout of the local data directory.
#[derive(Debug, Clone)]
pub struct DataPaths {
    root: PathBuf,
}

impl Default for DataPaths {
    fn default() -> Self {
        Self::new(DATA_ROOT)
    }
}

impl DataPaths {
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Upload journal database.
    pub fn journal_db(&self) -> PathBuf {
        self.root.join("journal.redb")
    }

    // ========== Audit Log Paths ==========

    pub fn audit_dir(&self) -> PathBuf {
        self.root.join("audit")
    }

    pub fn audit_date_dir(&self, date: &str) -> PathBuf {
        self.audit_dir().join(date)
    }

    /// Daily audit events file (JSONL).
    pub fn audit_events_file(&self, date: &str) -> PathBuf {
        self.audit_date_dir(date).join("events.jsonl")
    }
}
