// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Stage-tagged pipeline errors.
//!
//! Every component has its own `thiserror` enum (`CipherError`, `KmsError`,
//! `BlobStoreError`, `LedgerError`). The pipeline wraps whichever one fired
//! in a [`PipelineError`] carrying the record id and the [`Stage`] it was in,
//! so a log line or caller can always answer "which record, which step".
//!
//! [`ErrorKind`] is the closed classification callers branch on. It never
//! depends on message text.

use std::fmt;
use std::time::Duration;

use serde::Serialize;

use crate::crypto::CipherError;
use crate::kms::KmsError;
use crate::ledger::LedgerError;
use crate::storage::BlobStoreError;

/// Closed set of failure classes surfaced by the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum ErrorKind {
    /// Transport failure talking to the KMS.
    KmsUnavailable,
    /// KMS reachable but sealed or uninitialized.
    KmsSealed,
    KeyWrapFailure,
    KeyUnwrapFailure,
    EncryptionFailure,
    /// Tag or hash mismatch, or unreadable envelope metadata.
    IntegrityError,
    BlobNotFound,
    StorageWriteFailure,
    /// Blob backend unreachable or failed a read.
    StorageUnavailable,
    LedgerTransactionFailure,
    UnknownOrganization,
    /// A per-stage deadline elapsed.
    Timeout,
    Configuration,
}

impl ErrorKind {
    /// Failures that must abort the request with no partial result.
    pub fn is_fatal_integrity(&self) -> bool {
        matches!(self, ErrorKind::IntegrityError | ErrorKind::BlobNotFound)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::KmsUnavailable => "KmsUnavailable",
            ErrorKind::KmsSealed => "KmsSealed",
            ErrorKind::KeyWrapFailure => "KeyWrapFailure",
            ErrorKind::KeyUnwrapFailure => "KeyUnwrapFailure",
            ErrorKind::EncryptionFailure => "EncryptionFailure",
            ErrorKind::IntegrityError => "IntegrityError",
            ErrorKind::BlobNotFound => "BlobNotFound",
            ErrorKind::StorageWriteFailure => "StorageWriteFailure",
            ErrorKind::StorageUnavailable => "StorageUnavailable",
            ErrorKind::LedgerTransactionFailure => "LedgerTransactionFailure",
            ErrorKind::UnknownOrganization => "UnknownOrganization",
            ErrorKind::Timeout => "Timeout",
            ErrorKind::Configuration => "Configuration",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Pipeline step in which a failure happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    ResolveOrganization,
    GenerateKey,
    Encrypt,
    Store,
    Commit,
    Compensate,
    ReadRecord,
    ListRecords,
    Retrieve,
    Unwrap,
    Decrypt,
    VerifyHash,
    RotateKek,
    Rewrap,
    UpdateRecord,
    Delete,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::ResolveOrganization => "resolve_organization",
            Stage::GenerateKey => "generate_key",
            Stage::Encrypt => "encrypt",
            Stage::Store => "store",
            Stage::Commit => "commit",
            Stage::Compensate => "compensate",
            Stage::ReadRecord => "read_record",
            Stage::ListRecords => "list_records",
            Stage::Retrieve => "retrieve",
            Stage::Unwrap => "unwrap",
            Stage::Decrypt => "decrypt",
            Stage::VerifyHash => "verify_hash",
            Stage::RotateKek => "rotate_kek",
            Stage::Rewrap => "rewrap",
            Stage::UpdateRecord => "update_record",
            Stage::Delete => "delete",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The underlying cause of a stage failure.
#[derive(Debug, thiserror::Error)]
pub enum StageFailure {
    #[error(transparent)]
    Kms(#[from] KmsError),

    #[error(transparent)]
    Cipher(#[from] CipherError),

    #[error(transparent)]
    Storage(#[from] BlobStoreError),

    #[error(transparent)]
    Ledger(#[from] LedgerError),

    #[error("file hash mismatch: ledger has {expected}, recovered plaintext hashes to {actual}")]
    HashMismatch { expected: String, actual: String },

    #[error("deadline of {0:?} elapsed")]
    Timeout(Duration),
}

impl StageFailure {
    pub fn kind(&self) -> ErrorKind {
        match self {
            StageFailure::Kms(e) => e.kind(),
            StageFailure::Cipher(e) => e.kind(),
            StageFailure::Storage(e) => e.kind(),
            StageFailure::Ledger(e) => e.kind(),
            StageFailure::HashMismatch { .. } => ErrorKind::IntegrityError,
            StageFailure::Timeout(_) => ErrorKind::Timeout,
        }
    }
}

/// A failure of one pipeline stage for one record.
#[derive(Debug, thiserror::Error)]
#[error("[{record_id}] {stage} failed: {source}")]
pub struct PipelineError {
    pub record_id: String,
    pub stage: Stage,
    #[source]
    pub source: StageFailure,
}

impl PipelineError {
    pub fn new(record_id: impl Into<String>, stage: Stage, source: impl Into<StageFailure>) -> Self {
        Self {
            record_id: record_id.into(),
            stage,
            source: source.into(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        self.source.kind()
    }
}

pub type PipelineResult<T> = Result<T, PipelineError>;
