// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Record Pipeline
//!
//! Orchestrates the KMS, the cipher, the blob store and the ledger into
//! record uploads and downloads.
//!
//! ## Upload
//!
//! ```text
//! resolve org → generate key → encrypt (DEK dropped) → journal → store → commit
//!                                                                  │
//!                                   commit rejected → compensating delete
//!                                   commit unconfirmed → read back, else reaper
//! ```
//!
//! ## Download
//!
//! ```text
//! read record → retrieve → unwrap → decrypt → verify hash against ledger
//! ```
//!
//! Every failure is a [`PipelineError`] carrying the record id and the stage.
//! Nothing is retried here. Callers that retry must dedupe on record id.

pub mod reaper;
pub mod rotation;

pub use reaper::{OrphanReaper, ReapReport};
pub use rotation::{RewrapReport, RewrapSweep};

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, info, warn};
use uuid::Uuid;
use zeroize::Zeroize;

use crate::crypto::{file_hash, EnvelopeCipher};
use crate::error::{ErrorKind, PipelineError, PipelineResult, Stage, StageFailure};
use crate::kms::{KeyManagementClient, RecordKey};
use crate::ledger::{
    LedgerClient, LedgerError, LedgerSession, Record, RecordStatus, RecordSummary, UploadMetadata,
    DEFAULT_POLICY_ID, DEFAULT_RECORD_TYPE,
};
use crate::storage::{AuditEvent, AuditEventType, AuditLog, BlobStore, BlobStoreError, UploadJournal};

/// Record id placeholder for operations spanning many records.
pub const ALL_RECORDS: &str = "*";

/// Ledger audit actions written by the pipeline.
const AUDIT_UPLOAD: &str = "UPLOAD";
const AUDIT_DOWNLOAD: &str = "DOWNLOAD";
const AUDIT_PURGE: &str = "PURGE";

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UploadReceipt {
    pub record_id: String,
    /// `sha256:<lowercase hex>` of the uploaded bytes.
    pub file_hash: String,
    pub offchain_uri: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DownloadMetadata {
    pub record_id: String,
    pub case_id: String,
    pub filename: String,
    pub mime_type: String,
    pub file_size: u64,
    pub created_at: Option<DateTime<Utc>>,
    pub uploader_org: String,
    pub file_hash: String,
}

/// Verified plaintext plus the ledger metadata it was checked against.
#[derive(Debug)]
pub struct DownloadedRecord {
    pub plaintext: Vec<u8>,
    pub metadata: DownloadMetadata,
}

pub struct RecordPipeline {
    kms: Arc<KeyManagementClient>,
    cipher: EnvelopeCipher,
    blobs: Arc<dyn BlobStore>,
    ledger: LedgerClient,
    journal: Option<Arc<UploadJournal>>,
    audit: Option<AuditLog>,
    stage_timeout: Option<Duration>,
}

impl RecordPipeline {
    pub fn new(kms: Arc<KeyManagementClient>, blobs: Arc<dyn BlobStore>, ledger: LedgerClient) -> Self {
        Self {
            kms,
            cipher: EnvelopeCipher::new(),
            blobs,
            ledger,
            journal: None,
            audit: None,
            stage_timeout: None,
        }
    }

    /// Journal uploads so an unconfirmed blob can be found again.
    pub fn with_journal(mut self, journal: Arc<UploadJournal>) -> Self {
        self.journal = Some(journal);
        self
    }

    pub fn with_audit_log(mut self, audit: AuditLog) -> Self {
        self.audit = Some(audit);
        self
    }

    /// Deadline applied to each external call.
    pub fn with_stage_timeout(mut self, timeout: Duration) -> Self {
        self.stage_timeout = Some(timeout);
        self
    }

    pub fn kms(&self) -> &KeyManagementClient {
        &self.kms
    }

    pub fn blobs(&self) -> &Arc<dyn BlobStore> {
        &self.blobs
    }

    pub fn ledger(&self) -> &LedgerClient {
        &self.ledger
    }

    pub fn journal(&self) -> Option<&Arc<UploadJournal>> {
        self.journal.as_ref()
    }

    // =========================================================================
    // Stage plumbing
    // =========================================================================

    async fn deadline<T, E, F>(&self, fut: F) -> Result<T, StageFailure>
    where
        F: Future<Output = Result<T, E>>,
        StageFailure: From<E>,
    {
        match self.stage_timeout {
            Some(limit) => match tokio::time::timeout(limit, fut).await {
                Ok(result) => result.map_err(StageFailure::from),
                Err(_) => Err(StageFailure::Timeout(limit)),
            },
            None => fut.await.map_err(StageFailure::from),
        }
    }

    async fn stage<T, E, F>(&self, record_id: &str, stage: Stage, fut: F) -> PipelineResult<T>
    where
        F: Future<Output = Result<T, E>>,
        StageFailure: From<E>,
    {
        self.deadline(fut).await.map_err(|failure| {
            let err = PipelineError::new(record_id, stage, failure);
            warn!(
                record_id,
                stage = %stage,
                kind = %err.kind(),
                error = %err.source,
                "Pipeline stage failed"
            );
            err
        })
    }

    fn session(&self, record_id: &str, actor: &str, org: &str) -> PipelineResult<LedgerSession> {
        self.ledger
            .session(actor, org)
            .map_err(|e| PipelineError::new(record_id, Stage::ResolveOrganization, e))
    }

    pub(crate) fn audit(&self, event: AuditEvent) {
        if let Some(log) = &self.audit {
            if let Err(e) = log.log(&event) {
                warn!(error = %e, "Failed to write audit event");
            }
        }
    }

    /// The ledger's own audit trail is informational; a failed write does
    /// not fail the operation that triggered it.
    async fn ledger_audit(&self, session: &LedgerSession, record_id: &str, action: &str, details: String) {
        if let Err(e) = self
            .deadline(session.add_audit(record_id, action, &details))
            .await
        {
            warn!(record_id, action, error = %e, "Failed to append ledger audit entry");
        }
    }

    // =========================================================================
    // Upload
    // =========================================================================

    /// Encrypt `bytes` under a fresh DEK, store the ciphertext and anchor
    /// its hash and wrapped key on the ledger.
    pub async fn upload_record(
        &self,
        actor: &str,
        org: &str,
        bytes: &[u8],
        metadata: UploadMetadata,
    ) -> PipelineResult<UploadReceipt> {
        let record_id = Uuid::new_v4().to_string();
        let session = self.session(&record_id, actor, org)?;
        let org_id = session.profile().id.clone();

        let RecordKey {
            dek,
            wrapped_key,
            key_id,
        } = self
            .stage(&record_id, Stage::GenerateKey, self.kms.generate_record_key(&record_id))
            .await?;

        let sealed = self.cipher.encrypt(bytes, &dek);
        drop(dek);
        let sealed = sealed.map_err(|e| PipelineError::new(&record_id, Stage::Encrypt, e))?;
        debug!(record_id = %record_id, key_id = %key_id, "Record encrypted");

        if let Some(journal) = &self.journal {
            if let Err(e) = journal.begin_upload(&record_id, &org_id, actor) {
                warn!(record_id = %record_id, error = %e, "Failed to journal provisional upload");
            }
        }

        let uri = self
            .stage(
                &record_id,
                Stage::Store,
                self.blobs
                    .store(&record_id, &sealed.ciphertext, &sealed.nonce, &sealed.tag),
            )
            .await;
        let uri = match uri {
            Ok(uri) => uri,
            Err(e) => {
                // A partial write or an abandoned store may have left a
                // ciphertext behind; the reaper removes it.
                if matches!(
                    e.source,
                    StageFailure::Storage(BlobStoreError::PartialWrite { .. })
                        | StageFailure::Timeout(_)
                ) {
                    warn!(
                        record_id = %record_id,
                        error = %e.source,
                        "Store may have left a ciphertext; leaving upload for the orphan reaper"
                    );
                } else {
                    self.clear_journal(&record_id);
                }
                return Err(e);
            }
        };
        if let Some(journal) = &self.journal {
            if let Err(e) = journal.set_uri(&record_id, &uri) {
                warn!(record_id = %record_id, error = %e, "Failed to journal blob location");
            }
        }

        let record = Record {
            record_id: record_id.clone(),
            case_id: metadata.case_id.clone(),
            record_type: metadata
                .record_type
                .clone()
                .unwrap_or_else(|| DEFAULT_RECORD_TYPE.to_string()),
            uploader_org: session.profile().display_name.clone(),
            offchain_uri: uri.clone(),
            file_hash: sealed.file_hash.clone(),
            wrapped_key_ref: wrapped_key,
            policy_id: metadata
                .policy_id
                .clone()
                .unwrap_or_else(|| DEFAULT_POLICY_ID.to_string()),
            filename: metadata.filename.clone(),
            file_size: bytes.len() as u64,
            mime_type: metadata.mime_type.clone(),
            created_at: Some(Utc::now()),
            updated_at: None,
            status: RecordStatus::Active,
        };

        if let Err(err) = self
            .stage(&record_id, Stage::Commit, session.create_record(&record))
            .await
        {
            if let Err(err) = self.settle_failed_commit(&session, &record, err, actor).await {
                self.audit(
                    AuditEvent::new(AuditEventType::RecordUploaded)
                        .with_user(actor)
                        .with_org(&org_id)
                        .with_resource(&record_id)
                        .failed(err.to_string()),
                );
                return Err(err);
            }
        }
        self.clear_journal(&record_id);

        self.ledger_audit(
            &session,
            &record_id,
            AUDIT_UPLOAD,
            format!("case {} by {}", record.case_id, session.identity()),
        )
        .await;
        self.audit(
            AuditEvent::new(AuditEventType::RecordUploaded)
                .with_user(actor)
                .with_org(&org_id)
                .with_resource(&record_id)
                .with_details(serde_json::json!({
                    "case_id": record.case_id,
                    "file_size": record.file_size,
                    "offchain_uri": uri,
                })),
        );
        info!(
            record_id = %record_id,
            org = %org_id,
            case_id = %record.case_id,
            bytes = record.file_size,
            "Record uploaded"
        );

        Ok(UploadReceipt {
            record_id,
            file_hash: sealed.file_hash,
            offchain_uri: uri,
        })
    }

    fn clear_journal(&self, record_id: &str) {
        if let Some(journal) = &self.journal {
            if let Err(e) = journal.complete_upload(record_id) {
                warn!(record_id, error = %e, "Failed to clear journal entry");
            }
        }
    }

    /// Decide what a failed commit left behind. `Ok` means the record
    /// reached the ledger after all and the upload stands.
    ///
    /// Only an explicit rejection proves the record is absent. After a
    /// timeout or transport failure the transaction may still be ordered, so
    /// the record is read back first. The blob is deleted on the spot only
    /// when the record is absent and no journal is configured; otherwise the
    /// journal entry stays and the reaper decides after its TTL.
    async fn settle_failed_commit(
        &self,
        session: &LedgerSession,
        record: &Record,
        err: PipelineError,
        actor: &str,
    ) -> PipelineResult<()> {
        let record_id = record.record_id.as_str();
        let org_id = session.profile().id.clone();

        if matches!(err.source, StageFailure::Ledger(LedgerError::Transaction { .. })) {
            self.compensate(record_id, actor, &org_id).await;
            return Err(err);
        }

        match self.deadline(session.read_record(record_id)).await {
            Ok(found) if found.file_hash == record.file_hash => {
                info!(record_id, error = %err.source, "Commit landed despite failed acknowledgement");
                Ok(())
            }
            Err(StageFailure::Ledger(LedgerError::RecordNotFound(_))) if self.journal.is_none() => {
                self.compensate(record_id, actor, &org_id).await;
                Err(err)
            }
            _ => {
                warn!(
                    record_id,
                    error = %err.source,
                    "Commit outcome unknown; leaving upload for the orphan reaper"
                );
                Err(err)
            }
        }
    }

    /// Remove the blob of an upload whose ledger commit failed. If that
    /// also fails the journal entry stays for the reaper.
    async fn compensate(&self, record_id: &str, actor: &str, org: &str) {
        match self
            .stage(record_id, Stage::Compensate, self.blobs.delete(record_id))
            .await
        {
            Ok(()) => {
                self.clear_journal(record_id);
                self.audit(
                    AuditEvent::new(AuditEventType::UploadCompensated)
                        .with_user(actor)
                        .with_org(org)
                        .with_resource(record_id),
                );
                info!(record_id, "Removed blob of uncommitted upload");
            }
            Err(e) => {
                warn!(
                    record_id,
                    error = %e,
                    "Compensating delete failed; leaving upload for the orphan reaper"
                );
            }
        }
    }

    // =========================================================================
    // Download
    // =========================================================================

    /// Fetch, decrypt and verify a record. Plaintext is only returned when
    /// its hash matches the ledger's `file_hash`.
    pub async fn download_record(
        &self,
        actor: &str,
        org: &str,
        record_id: &str,
    ) -> PipelineResult<DownloadedRecord> {
        let session = self.session(record_id, actor, org)?;
        let org_id = session.profile().id.clone();

        let record = self
            .stage(record_id, Stage::ReadRecord, session.read_record(record_id))
            .await?;
        if record.status == RecordStatus::Deleted {
            return Err(PipelineError::new(
                record_id,
                Stage::Retrieve,
                BlobStoreError::NotFound(format!("{record_id}: record was purged")),
            ));
        }

        let envelope = self
            .stage(record_id, Stage::Retrieve, self.blobs.retrieve(record_id))
            .await?;

        let dek = self
            .stage(
                record_id,
                Stage::Unwrap,
                self.kms.unwrap_record_key(&record.wrapped_key_ref, record_id),
            )
            .await?;

        let decrypted = self
            .cipher
            .decrypt(&envelope.ciphertext, &dek, &envelope.nonce, &envelope.tag);
        drop(dek);
        let mut plaintext = match decrypted {
            Ok(plaintext) => plaintext,
            Err(e) => {
                let err = PipelineError::new(record_id, Stage::Decrypt, e);
                self.report_integrity_failure(&err, actor, &org_id);
                return Err(err);
            }
        };

        let actual = file_hash(&plaintext);
        if actual != record.file_hash {
            plaintext.zeroize();
            let err = PipelineError::new(
                record_id,
                Stage::VerifyHash,
                StageFailure::HashMismatch {
                    expected: record.file_hash.clone(),
                    actual,
                },
            );
            self.report_integrity_failure(&err, actor, &org_id);
            return Err(err);
        }

        self.ledger_audit(
            &session,
            record_id,
            AUDIT_DOWNLOAD,
            format!("by {}", session.identity()),
        )
        .await;
        self.audit(
            AuditEvent::new(AuditEventType::RecordDownloaded)
                .with_user(actor)
                .with_org(&org_id)
                .with_resource(record_id),
        );
        info!(record_id, org = %org_id, bytes = plaintext.len(), "Record downloaded");

        Ok(DownloadedRecord {
            plaintext,
            metadata: DownloadMetadata {
                record_id: record.record_id,
                case_id: record.case_id,
                filename: record.filename,
                mime_type: record.mime_type,
                file_size: record.file_size,
                created_at: record.created_at,
                uploader_org: record.uploader_org,
                file_hash: record.file_hash,
            },
        })
    }

    fn report_integrity_failure(&self, err: &PipelineError, actor: &str, org: &str) {
        if err.kind() != ErrorKind::IntegrityError {
            return;
        }
        warn!(
            record_id = %err.record_id,
            stage = %err.stage,
            "Integrity check failed; plaintext withheld"
        );
        self.audit(
            AuditEvent::new(AuditEventType::IntegrityFailure)
                .with_user(actor)
                .with_org(org)
                .with_resource(&err.record_id)
                .failed(err.to_string()),
        );
    }

    // =========================================================================
    // Metadata and listings
    // =========================================================================

    pub async fn read_metadata(
        &self,
        actor: &str,
        org: &str,
        record_id: &str,
    ) -> PipelineResult<RecordSummary> {
        let session = self.session(record_id, actor, org)?;
        let record = self
            .stage(record_id, Stage::ReadRecord, session.read_record(record_id))
            .await?;
        Ok(record.into())
    }

    pub async fn list_records_by_case(
        &self,
        actor: &str,
        org: &str,
        case_id: &str,
    ) -> PipelineResult<Vec<RecordSummary>> {
        let session = self.session(case_id, actor, org)?;
        let records = self
            .stage(case_id, Stage::ListRecords, session.query_records_by_case(case_id))
            .await?;
        Ok(records.into_iter().map(RecordSummary::from).collect())
    }

    pub async fn list_all_records(
        &self,
        actor: &str,
        org: &str,
    ) -> PipelineResult<Vec<RecordSummary>> {
        let session = self.session(ALL_RECORDS, actor, org)?;
        let records = self
            .stage(ALL_RECORDS, Stage::ListRecords, session.list_all_records())
            .await?;
        Ok(records.into_iter().map(RecordSummary::from).collect())
    }

    // =========================================================================
    // Purge
    // =========================================================================

    /// Soft-delete the record on the ledger, then remove its blob. A record
    /// already marked deleted only has its blob removed.
    pub async fn purge_record(&self, actor: &str, org: &str, record_id: &str) -> PipelineResult<()> {
        let session = self.session(record_id, actor, org)?;
        let org_id = session.profile().id.clone();

        let record = self
            .stage(record_id, Stage::ReadRecord, session.read_record(record_id))
            .await?;
        if record.status != RecordStatus::Deleted {
            self.stage(record_id, Stage::Delete, session.delete_record(record_id))
                .await?;
        }

        match self
            .stage(record_id, Stage::Delete, self.blobs.delete(record_id))
            .await
        {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::BlobNotFound => {
                debug!(record_id, "Blob already gone during purge");
            }
            Err(e) => return Err(e),
        }

        self.ledger_audit(
            &session,
            record_id,
            AUDIT_PURGE,
            format!("by {}", session.identity()),
        )
        .await;
        self.audit(
            AuditEvent::new(AuditEventType::RecordPurged)
                .with_user(actor)
                .with_org(&org_id)
                .with_resource(record_id),
        );
        info!(record_id, org = %org_id, "Record purged");
        Ok(())
    }
}
