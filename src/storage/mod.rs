// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Storage Module
//!
//! Ciphertext persistence plus the local bookkeeping the pipeline needs.
//!
//! ## Blob Layout
//!
//! ```text
//! S3-compatible bucket:
//!   encrypted/{record_id}.enc            # raw ciphertext bytes
//!   metadata/{record_id}.meta.json       # {"iv": b64, "authTag": b64, "timestamp": ...}
//!
//! Local directory (FILES_PATH):
//!   {record_id}.enc
//!   {record_id}.meta.json
//! ```
//!
//! ## Data Directory
//!
//! ```text
//! DATA_DIR/
//!   journal.redb             # provisional uploads, rewrap sweep state
//!   audit/{date}/events.jsonl
//! ```
//!
//! Blobs carry no authority: the file hash and wrapped key live only on the
//! ledger. A blob backend never sees plaintext.

pub mod audit;
pub mod blob;
pub mod journal;
pub mod local;
pub mod paths;
pub mod s3;
pub mod sigv4;

pub use audit::{AuditError, AuditEvent, AuditEventType, AuditLog};
pub use blob::{
    BackendKind, BlobHealth, BlobStats, BlobStore, BlobStoreError, EnvelopeMetadata,
    StoredEnvelope,
};
pub use journal::{JournalError, PendingUpload, SweepState, UploadJournal};
pub use local::LocalBlobStore;
pub use paths::{validate_record_id, BlobKeys, DataPaths};
pub use s3::S3BlobStore;
