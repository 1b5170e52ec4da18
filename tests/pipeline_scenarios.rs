// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! End-to-end record flows over the in-process KMS and ledger and the
//! local blob store.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tempfile::TempDir;

use evidence_vault::error::{ErrorKind, Stage};
use evidence_vault::kms::{InMemoryTransit, KeyManagementClient};
use evidence_vault::ledger::{
    default_profiles, functions, LedgerClient, LedgerError, LedgerGateway, MemoryLedger,
    OrgRegistry, UploadMetadata,
};
use evidence_vault::pipeline::{OrphanReaper, RecordPipeline};
use evidence_vault::storage::{
    BlobHealth, BlobStats, BlobStore, BlobStoreError, BackendKind, LocalBlobStore,
    StoredEnvelope, UploadJournal,
};

async fn kms() -> Arc<KeyManagementClient> {
    let kms = Arc::new(KeyManagementClient::new(Arc::new(InMemoryTransit::new(
        "cdms-kms",
        "master-kek",
    ))));
    kms.setup().await.unwrap();
    kms
}

fn ledger_client(gateway: Arc<dyn LedgerGateway>) -> LedgerClient {
    LedgerClient::new(Arc::new(
        OrgRegistry::with_shared_gateway(default_profiles(), gateway).unwrap(),
    ))
}

#[tokio::test]
async fn one_mebibyte_round_trip() {
    let dir = TempDir::new().unwrap();
    let ledger = Arc::new(MemoryLedger::new());
    let pipeline = RecordPipeline::new(
        kms().await,
        Arc::new(LocalBlobStore::new(dir.path())),
        ledger_client(ledger.clone()),
    );

    let bytes: Vec<u8> = (0..1024 * 1024).map(|i| (i % 251) as u8).collect();
    let receipt = pipeline
        .upload_record(
            "admin",
            "A",
            &bytes,
            UploadMetadata::new("CASE-001").with_file("scene.bin", "application/octet-stream"),
        )
        .await
        .unwrap();

    let hex = receipt.file_hash.strip_prefix("sha256:").unwrap();
    assert_eq!(hex.len(), 64);
    assert!(hex.chars().all(|c| c.is_ascii_digit() || ('a'..='f').contains(&c)));

    let record = ledger.record(&receipt.record_id).unwrap();
    assert_eq!(record.file_hash, receipt.file_hash);
    assert_eq!(record.case_id, "CASE-001");
    assert_eq!(record.file_size, bytes.len() as u64);

    let downloaded = pipeline
        .download_record("admin", "B", &receipt.record_id)
        .await
        .unwrap();
    assert_eq!(downloaded.plaintext, bytes);
    assert_eq!(downloaded.metadata.uploader_org, "DistrictPoliceA");
}

#[tokio::test]
async fn identical_uploads_get_distinct_keys_and_nonces() {
    let dir = TempDir::new().unwrap();
    let ledger = Arc::new(MemoryLedger::new());
    let blobs = Arc::new(LocalBlobStore::new(dir.path()));
    let pipeline = RecordPipeline::new(kms().await, blobs.clone(), ledger_client(ledger.clone()));

    let first = pipeline
        .upload_record("admin", "A", b"same bytes", UploadMetadata::new("CASE-001"))
        .await
        .unwrap();
    let second = pipeline
        .upload_record("admin", "A", b"same bytes", UploadMetadata::new("CASE-001"))
        .await
        .unwrap();

    assert_ne!(first.record_id, second.record_id);
    assert_eq!(first.file_hash, second.file_hash);
    assert_ne!(
        ledger.record(&first.record_id).unwrap().wrapped_key_ref,
        ledger.record(&second.record_id).unwrap().wrapped_key_ref
    );

    let a = blobs.retrieve(&first.record_id).await.unwrap();
    let b = blobs.retrieve(&second.record_id).await.unwrap();
    assert_ne!(a.nonce, b.nonce);
    assert_ne!(a.ciphertext, b.ciphertext);
}

#[tokio::test]
async fn corrupted_ciphertext_is_integrity_error() {
    let dir = TempDir::new().unwrap();
    let pipeline = RecordPipeline::new(
        kms().await,
        Arc::new(LocalBlobStore::new(dir.path())),
        ledger_client(Arc::new(MemoryLedger::new())),
    );
    let receipt = pipeline
        .upload_record("admin", "A", b"do not alter", UploadMetadata::new("CASE-002"))
        .await
        .unwrap();

    let path = dir.path().join(format!("{}.enc", receipt.record_id));
    let mut ciphertext = std::fs::read(&path).unwrap();
    ciphertext[0] ^= 0x01;
    std::fs::write(&path, ciphertext).unwrap();

    let err = pipeline
        .download_record("admin", "A", &receipt.record_id)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::IntegrityError);
    assert_eq!(err.stage, Stage::Decrypt);
    assert_eq!(err.record_id, receipt.record_id);
}

#[tokio::test]
async fn wrapped_key_of_another_record_does_not_unwrap() {
    let dir = TempDir::new().unwrap();
    let ledger = Arc::new(MemoryLedger::new());
    let pipeline = RecordPipeline::new(
        kms().await,
        Arc::new(LocalBlobStore::new(dir.path())),
        ledger_client(ledger.clone()),
    );
    let first = pipeline
        .upload_record("admin", "A", b"first", UploadMetadata::new("CASE-003"))
        .await
        .unwrap();
    let second = pipeline
        .upload_record("admin", "A", b"second", UploadMetadata::new("CASE-003"))
        .await
        .unwrap();

    // Point the first record at the second record's wrapped key.
    let mut record = ledger.record(&first.record_id).unwrap();
    record.wrapped_key_ref = ledger.record(&second.record_id).unwrap().wrapped_key_ref;
    let session = pipeline.ledger().session("admin", "A").unwrap();
    session.update_record(&record).await.unwrap();

    let err = pipeline
        .download_record("admin", "A", &first.record_id)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::KeyUnwrapFailure);
    assert_eq!(err.stage, Stage::Unwrap);
}

/// Local store whose deletes can be switched off.
struct StickyStore {
    inner: LocalBlobStore,
    refuse_delete: AtomicBool,
}

#[async_trait]
impl BlobStore for StickyStore {
    fn backend(&self) -> BackendKind {
        self.inner.backend()
    }

    fn location(&self) -> String {
        self.inner.location()
    }

    async fn initialize(&self) -> Result<(), BlobStoreError> {
        self.inner.initialize().await
    }

    async fn store(
        &self,
        record_id: &str,
        ciphertext: &[u8],
        nonce: &[u8],
        tag: &[u8],
    ) -> Result<String, BlobStoreError> {
        self.inner.store(record_id, ciphertext, nonce, tag).await
    }

    async fn retrieve(&self, record_id: &str) -> Result<StoredEnvelope, BlobStoreError> {
        self.inner.retrieve(record_id).await
    }

    async fn delete(&self, record_id: &str) -> Result<(), BlobStoreError> {
        if self.refuse_delete.load(Ordering::SeqCst) {
            return Err(BlobStoreError::Unavailable("volume is read-only".to_string()));
        }
        self.inner.delete(record_id).await
    }

    async fn health_check(&self) -> BlobHealth {
        self.inner.health_check().await
    }

    async fn stats(&self) -> Result<BlobStats, BlobStoreError> {
        self.inner.stats().await
    }
}

#[tokio::test]
async fn failed_compensation_is_settled_by_the_reaper() {
    let dir = TempDir::new().unwrap();
    let ledger = Arc::new(MemoryLedger::new());
    let blobs = Arc::new(StickyStore {
        inner: LocalBlobStore::new(dir.path().join("files")),
        refuse_delete: AtomicBool::new(true),
    });
    let journal = Arc::new(UploadJournal::open(&dir.path().join("journal.redb")).unwrap());
    let pipeline = Arc::new(
        RecordPipeline::new(kms().await, blobs.clone(), ledger_client(ledger.clone()))
            .with_journal(journal.clone()),
    );

    ledger.fail_function(functions::CREATE_RECORD);
    let err = pipeline
        .upload_record("admin", "A", b"stranded", UploadMetadata::new("CASE-004"))
        .await
        .unwrap_err();
    assert_eq!(err.stage, Stage::Commit);

    // Blob and journal entry are both still there.
    let pending = journal.pending_uploads().unwrap();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].record_id, err.record_id);
    assert!(pending[0].uri.is_some());
    assert_eq!(blobs.stats().await.unwrap().total_files, 1);

    blobs.refuse_delete.store(false, Ordering::SeqCst);
    let report = OrphanReaper::new(pipeline.clone())
        .with_ttl(Duration::ZERO)
        .sweep_once()
        .await;
    assert_eq!(report.reaped, 1);
    assert_eq!(blobs.stats().await.unwrap().total_objects, 0);
    assert!(journal.pending_uploads().unwrap().is_empty());
}

/// Forwards reads to a ledger. Submissions are applied after `apply_after`
/// (never, when `None`) and acknowledged only after `ack_after`.
struct SlowGateway {
    ledger: Arc<MemoryLedger>,
    apply_after: Option<Duration>,
    ack_after: Duration,
}

#[async_trait]
impl LedgerGateway for SlowGateway {
    async fn submit(
        &self,
        identity: &str,
        function: &str,
        args: &[String],
    ) -> Result<String, LedgerError> {
        if let Some(delay) = self.apply_after {
            tokio::time::sleep(delay).await;
            self.ledger.submit(identity, function, args).await?;
        }
        tokio::time::sleep(self.ack_after).await;
        Ok(String::new())
    }

    async fn evaluate(
        &self,
        identity: &str,
        function: &str,
        args: &[String],
    ) -> Result<String, LedgerError> {
        self.ledger.evaluate(identity, function, args).await
    }
}

#[tokio::test]
async fn late_commit_acknowledgement_keeps_the_record() {
    let dir = TempDir::new().unwrap();
    let ledger = Arc::new(MemoryLedger::new());
    let blobs = Arc::new(LocalBlobStore::new(dir.path().join("files")));
    let journal = Arc::new(UploadJournal::open(&dir.path().join("journal.redb")).unwrap());
    let gateway = Arc::new(SlowGateway {
        ledger: ledger.clone(),
        apply_after: Some(Duration::ZERO),
        ack_after: Duration::from_secs(30),
    });
    let pipeline = RecordPipeline::new(kms().await, blobs.clone(), ledger_client(gateway))
        .with_journal(journal.clone())
        .with_stage_timeout(Duration::from_millis(200));

    let receipt = pipeline
        .upload_record("admin", "A", b"acknowledged late", UploadMetadata::new("CASE-005"))
        .await
        .unwrap();

    assert!(ledger.record(&receipt.record_id).is_some());
    assert_eq!(blobs.stats().await.unwrap().total_files, 1);
    assert!(journal.pending_uploads().unwrap().is_empty());

    let downloaded = pipeline
        .download_record("admin", "A", &receipt.record_id)
        .await
        .unwrap();
    assert_eq!(downloaded.plaintext, b"acknowledged late");
}

#[tokio::test]
async fn unconfirmed_commit_is_left_for_the_reaper() {
    let dir = TempDir::new().unwrap();
    let ledger = Arc::new(MemoryLedger::new());
    let blobs = Arc::new(LocalBlobStore::new(dir.path().join("files")));
    let journal = Arc::new(UploadJournal::open(&dir.path().join("journal.redb")).unwrap());
    let gateway = Arc::new(SlowGateway {
        ledger: ledger.clone(),
        apply_after: None,
        ack_after: Duration::from_secs(30),
    });
    let pipeline = Arc::new(
        RecordPipeline::new(kms().await, blobs.clone(), ledger_client(gateway))
            .with_journal(journal.clone())
            .with_stage_timeout(Duration::from_millis(200)),
    );

    let err = pipeline
        .upload_record("admin", "A", b"never ordered", UploadMetadata::new("CASE-006"))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Timeout);
    assert_eq!(err.stage, Stage::Commit);

    // The transaction might still land, so nothing is deleted yet.
    assert_eq!(blobs.stats().await.unwrap().total_files, 1);
    let pending = journal.pending_uploads().unwrap();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].record_id, err.record_id);

    let report = OrphanReaper::new(pipeline.clone())
        .with_ttl(Duration::ZERO)
        .sweep_once()
        .await;
    assert_eq!(report.reaped, 1);
    assert_eq!(blobs.stats().await.unwrap().total_objects, 0);
    assert!(journal.pending_uploads().unwrap().is_empty());
}

#[tokio::test]
async fn unconfirmed_commit_without_journal_is_compensated_when_absent() {
    let dir = TempDir::new().unwrap();
    let ledger = Arc::new(MemoryLedger::new());
    let blobs = Arc::new(LocalBlobStore::new(dir.path()));
    let gateway = Arc::new(SlowGateway {
        ledger: ledger.clone(),
        apply_after: None,
        ack_after: Duration::from_secs(30),
    });
    let pipeline = RecordPipeline::new(kms().await, blobs.clone(), ledger_client(gateway))
        .with_stage_timeout(Duration::from_millis(200));

    let err = pipeline
        .upload_record("admin", "A", b"late", UploadMetadata::new("CASE-007"))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Timeout);
    assert_eq!(err.stage, Stage::Commit);
    assert_eq!(blobs.stats().await.unwrap().total_objects, 0);
    assert_eq!(ledger.record_count(), 0);
}
