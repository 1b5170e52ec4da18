// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Payloads exchanged with the record contract (snake_case JSON).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub const DEFAULT_RECORD_TYPE: &str = "Evidence";
pub const DEFAULT_POLICY_ID: &str = "default-policy";

fn default_record_type() -> String {
    DEFAULT_RECORD_TYPE.to_string()
}

fn default_policy_id() -> String {
    DEFAULT_POLICY_ID.to_string()
}

/// Lifecycle of a record on the ledger.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum RecordStatus {
    #[default]
    Active,
    Pending,
    Reviewed,
    Sealed,
    Deleted,
    /// A status this client does not know about.
    #[serde(other)]
    Unknown,
}

/// A record as the ledger stores it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    pub record_id: String,
    pub case_id: String,
    #[serde(default = "default_record_type")]
    pub record_type: String,
    #[serde(default)]
    pub uploader_org: String,
    pub offchain_uri: String,
    /// `sha256:<lowercase hex>` of the plaintext.
    pub file_hash: String,
    /// KMS ciphertext of the DEK (`vault:vN:...`).
    pub wrapped_key_ref: String,
    #[serde(default = "default_policy_id")]
    pub policy_id: String,
    #[serde(default)]
    pub filename: String,
    #[serde(default)]
    pub file_size: u64,
    #[serde(default)]
    pub mime_type: String,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub status: RecordStatus,
}

/// A record without its wrapped key, for callers outside the pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordSummary {
    pub record_id: String,
    pub case_id: String,
    pub record_type: String,
    pub uploader_org: String,
    pub offchain_uri: String,
    pub file_hash: String,
    pub policy_id: String,
    pub filename: String,
    pub file_size: u64,
    pub mime_type: String,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
    pub status: RecordStatus,
}

impl From<Record> for RecordSummary {
    fn from(record: Record) -> Self {
        Self {
            record_id: record.record_id,
            case_id: record.case_id,
            record_type: record.record_type,
            uploader_org: record.uploader_org,
            offchain_uri: record.offchain_uri,
            file_hash: record.file_hash,
            policy_id: record.policy_id,
            filename: record.filename,
            file_size: record.file_size,
            mime_type: record.mime_type,
            created_at: record.created_at,
            updated_at: record.updated_at,
            status: record.status,
        }
    }
}

/// Caller-supplied description of an upload.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UploadMetadata {
    pub case_id: String,
    #[serde(default)]
    pub record_type: Option<String>,
    #[serde(default)]
    pub policy_id: Option<String>,
    #[serde(default)]
    pub filename: String,
    #[serde(default)]
    pub mime_type: String,
}

impl UploadMetadata {
    pub fn new(case_id: impl Into<String>) -> Self {
        Self {
            case_id: case_id.into(),
            ..Self::default()
        }
    }

    pub fn with_file(mut self, filename: impl Into<String>, mime_type: impl Into<String>) -> Self {
        self.filename = filename.into();
        self.mime_type = mime_type.into();
        self
    }

    pub fn with_record_type(mut self, record_type: impl Into<String>) -> Self {
        self.record_type = Some(record_type.into());
        self
    }

    pub fn with_policy(mut self, policy_id: impl Into<String>) -> Self {
        self.policy_id = Some(policy_id.into());
        self
    }
}

/// An entry of the ledger's own audit trail.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEntry {
    #[serde(default)]
    pub audit_id: String,
    pub record_id: String,
    #[serde(default)]
    pub user_id: String,
    #[serde(default)]
    pub org: String,
    pub action: String,
    #[serde(default)]
    pub details: String,
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
    #[serde(default)]
    pub ip_address: String,
}

/// One committed version of a record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub tx_id: String,
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
    #[serde(default)]
    pub is_delete: bool,
    pub value: Option<Record>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_fills_contract_defaults() {
        let json = r#"{
            "record_id": "r1",
            "case_id": "CASE-001",
            "offchain_uri": "s3://cdms-files/encrypted/r1.enc",
            "file_hash": "sha256:00",
            "wrapped_key_ref": "vault:v1:AAAA"
        }"#;
        let record: Record = serde_json::from_str(json).unwrap();
        assert_eq!(record.record_type, "Evidence");
        assert_eq!(record.policy_id, "default-policy");
        assert_eq!(record.status, RecordStatus::Active);
        assert!(record.created_at.is_none());
    }

    #[test]
    fn unknown_status_does_not_break_parsing() {
        let json = r#"{
            "record_id": "r1", "case_id": "c", "offchain_uri": "u",
            "file_hash": "h", "wrapped_key_ref": "w", "status": "Archived"
        }"#;
        let record: Record = serde_json::from_str(json).unwrap();
        assert_eq!(record.status, RecordStatus::Unknown);
    }

    #[test]
    fn summary_drops_wrapped_key() {
        let record = Record {
            record_id: "r1".to_string(),
            case_id: "CASE-001".to_string(),
            record_type: DEFAULT_RECORD_TYPE.to_string(),
            uploader_org: "DistrictPoliceA".to_string(),
            offchain_uri: "file:///srv/r1.enc".to_string(),
            file_hash: "sha256:ab".to_string(),
            wrapped_key_ref: "vault:v1:secret".to_string(),
            policy_id: DEFAULT_POLICY_ID.to_string(),
            filename: "scene.jpg".to_string(),
            file_size: 10,
            mime_type: "image/jpeg".to_string(),
            created_at: None,
            updated_at: None,
            status: RecordStatus::Active,
        };
        let summary = RecordSummary::from(record);
        let json = serde_json::to_string(&summary).unwrap();
        assert!(!json.contains("wrapped_key_ref"));
        assert!(!json.contains("vault:v1"));
        assert_eq!(summary.filename, "scene.jpg");
    }
}
