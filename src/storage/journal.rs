// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Upload journal backed by redb (pure Rust, ACID).
//!
//! An upload is journaled before its ciphertext reaches the blob store and
//! cleared once the ledger commit lands (or the blob is compensated away).
//! Anything left behind is an orphan candidate for the reaper.
//!
//! ## Table Layout
//!
//! - `pending_uploads`: record_id → serialized PendingUpload
//! - `sweep_state`: key → serialized SweepState (rewrap checkpoint)

use std::path::Path;

use chrono::{DateTime, Utc};
use redb::{Database, ReadableDatabase, ReadableTable, TableDefinition};
use serde::{Deserialize, Serialize};

// =============================================================================
// Table Definitions
// =============================================================================

const PENDING_UPLOADS: TableDefinition<&str, &[u8]> = TableDefinition::new("pending_uploads");

const SWEEP_STATE: TableDefinition<&str, &[u8]> = TableDefinition::new("sweep_state");

const LAST_SWEEP_KEY: &str = "last_sweep";

// =============================================================================
// Error Type
// =============================================================================

#[derive(Debug, thiserror::Error)]
pub enum JournalError {
    #[error("redb error: {0}")]
    Redb(#[from] redb::Error),

    #[error("redb database error: {0}")]
    RedbDatabase(#[from] redb::DatabaseError),

    #[error("redb transaction error: {0}")]
    RedbTransaction(#[from] redb::TransactionError),

    #[error("redb table error: {0}")]
    RedbTable(#[from] redb::TableError),

    #[error("redb storage error: {0}")]
    RedbStorage(#[from] redb::StorageError),

    #[error("redb commit error: {0}")]
    RedbCommit(#[from] redb::CommitError),

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

pub type JournalResult<T> = Result<T, JournalError>;

// =============================================================================
// Entries
// =============================================================================

/// An upload whose ledger commit has not been confirmed yet.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PendingUpload {
    pub record_id: String,
    pub org: String,
    pub actor: String,
    /// Set once the blob store accepted the ciphertext.
    pub uri: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Progress of the most recent rewrap sweep.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct SweepState {
    pub target_version: u32,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub scanned: u64,
    pub rewrapped: u64,
    pub skipped: u64,
    pub failed: u64,
}

// =============================================================================
// UploadJournal
// =============================================================================

pub struct UploadJournal {
    db: Database,
}

impl UploadJournal {
    /// Open (or create) the journal at the given path.
    pub fn open(path: &Path) -> JournalResult<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let db = Database::create(path)?;

        // Pre-create all tables so later read transactions don't fail
        let write_txn = db.begin_write()?;
        {
            let _ = write_txn.open_table(PENDING_UPLOADS)?;
            let _ = write_txn.open_table(SWEEP_STATE)?;
        }
        write_txn.commit()?;

        Ok(Self { db })
    }

    fn put_pending(&self, entry: &PendingUpload) -> JournalResult<()> {
        let json = serde_json::to_vec(entry)?;
        let write_txn = self.db.begin_write()?;
        {
            let mut table = write_txn.open_table(PENDING_UPLOADS)?;
            table.insert(entry.record_id.as_str(), json.as_slice())?;
        }
        write_txn.commit()?;
        Ok(())
    }

    // =========================================================================
    // Pending uploads
    // =========================================================================

    /// Journal an upload before any bytes are stored.
    pub fn begin_upload(&self, record_id: &str, org: &str, actor: &str) -> JournalResult<()> {
        self.put_pending(&PendingUpload {
            record_id: record_id.to_string(),
            org: org.to_string(),
            actor: actor.to_string(),
            uri: None,
            created_at: Utc::now(),
        })
    }

    /// Remember where the blob landed. No-op for unknown records.
    pub fn set_uri(&self, record_id: &str, uri: &str) -> JournalResult<()> {
        if let Some(mut entry) = self.get(record_id)? {
            entry.uri = Some(uri.to_string());
            self.put_pending(&entry)?;
        }
        Ok(())
    }

    /// Clear an entry. Returns whether one existed.
    pub fn complete_upload(&self, record_id: &str) -> JournalResult<bool> {
        let write_txn = self.db.begin_write()?;
        let existed = {
            let mut table = write_txn.open_table(PENDING_UPLOADS)?;
            let removed = table.remove(record_id)?;
            removed.is_some()
        };
        write_txn.commit()?;
        Ok(existed)
    }

    pub fn get(&self, record_id: &str) -> JournalResult<Option<PendingUpload>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(PENDING_UPLOADS)?;
        match table.get(record_id)? {
            Some(value) => Ok(Some(serde_json::from_slice(value.value())?)),
            None => Ok(None),
        }
    }

    pub fn pending_uploads(&self) -> JournalResult<Vec<PendingUpload>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(PENDING_UPLOADS)?;

        let mut entries = Vec::new();
        for entry in table.iter()? {
            let (_, value) = entry?;
            entries.push(serde_json::from_slice::<PendingUpload>(value.value())?);
        }
        entries.sort_by_key(|e| e.created_at);
        Ok(entries)
    }

    /// Entries created strictly before `cutoff`, oldest first.
    pub fn pending_older_than(&self, cutoff: DateTime<Utc>) -> JournalResult<Vec<PendingUpload>> {
        Ok(self
            .pending_uploads()?
            .into_iter()
            .filter(|e| e.created_at < cutoff)
            .collect())
    }

    // =========================================================================
    // Sweep checkpoint
    // =========================================================================

    pub fn record_sweep(&self, state: &SweepState) -> JournalResult<()> {
        let json = serde_json::to_vec(state)?;
        let write_txn = self.db.begin_write()?;
        {
            let mut table = write_txn.open_table(SWEEP_STATE)?;
            table.insert(LAST_SWEEP_KEY, json.as_slice())?;
        }
        write_txn.commit()?;
        Ok(())
    }

    pub fn last_sweep(&self) -> JournalResult<Option<SweepState>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(SWEEP_STATE)?;
        match table.get(LAST_SWEEP_KEY)? {
            Some(value) => Ok(Some(serde_json::from_slice(value.value())?)),
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use tempfile::TempDir;

    fn open() -> (TempDir, UploadJournal) {
        let temp = TempDir::new().unwrap();
        let journal = UploadJournal::open(&temp.path().join("nested/journal.redb")).unwrap();
        (temp, journal)
    }

    #[test]
    fn upload_lifecycle() {
        let (_temp, journal) = open();
        journal.begin_upload("rec-1", "Org1", "officer@org1").unwrap();

        let entry = journal.get("rec-1").unwrap().unwrap();
        assert_eq!(entry.org, "Org1");
        assert!(entry.uri.is_none());

        journal.set_uri("rec-1", "file:///srv/rec-1.enc").unwrap();
        assert_eq!(
            journal.get("rec-1").unwrap().unwrap().uri.as_deref(),
            Some("file:///srv/rec-1.enc")
        );

        assert!(journal.complete_upload("rec-1").unwrap());
        assert!(!journal.complete_upload("rec-1").unwrap());
        assert!(journal.get("rec-1").unwrap().is_none());
    }

    #[test]
    fn set_uri_ignores_unknown_records() {
        let (_temp, journal) = open();
        journal.set_uri("ghost", "file:///x").unwrap();
        assert!(journal.pending_uploads().unwrap().is_empty());
    }

    #[test]
    fn filters_by_age() {
        let (_temp, journal) = open();
        journal.begin_upload("a", "Org1", "x").unwrap();
        journal.begin_upload("b", "Org2", "y").unwrap();

        assert_eq!(journal.pending_uploads().unwrap().len(), 2);
        let past = Utc::now() - Duration::hours(1);
        assert!(journal.pending_older_than(past).unwrap().is_empty());
        let future = Utc::now() + Duration::seconds(1);
        assert_eq!(journal.pending_older_than(future).unwrap().len(), 2);
    }

    #[test]
    fn sweep_checkpoint_persists_across_reopen() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("journal.redb");
        {
            let journal = UploadJournal::open(&path).unwrap();
            assert!(journal.last_sweep().unwrap().is_none());
            journal
                .record_sweep(&SweepState {
                    target_version: 3,
                    scanned: 10,
                    rewrapped: 7,
                    skipped: 3,
                    ..SweepState::default()
                })
                .unwrap();
        }

        let journal = UploadJournal::open(&path).unwrap();
        let state = journal.last_sweep().unwrap().unwrap();
        assert_eq!(state.target_version, 3);
        assert_eq!(state.rewrapped, 7);
    }
}
