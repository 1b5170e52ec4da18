// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Orphan Reaper
//!
//! Background task that settles provisional uploads left in the journal,
//! i.e. uploads whose blob was stored but whose ledger commit was never
//! confirmed and whose compensating delete did not happen.
//!
//! ## Strategy
//!
//! Every `interval` the reaper takes journal entries older than `ttl` and
//! asks the ledger about each one:
//! 1. Record exists: the commit landed after all. Clear the entry.
//! 2. Record does not exist: delete the blob (already absent is fine) and
//!    clear the entry.
//! 3. Anything else (ledger down, unknown org): leave it for the next pass.
//!
//! ## Shutdown
//!
//! Uses `tokio_util::sync::CancellationToken` for graceful shutdown.

use std::sync::Arc;
use std::time::Duration;

use chrono::{TimeDelta, Utc};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use super::RecordPipeline;
use crate::error::{ErrorKind, Stage, StageFailure};
use crate::identity::ADMIN_ACTOR;
use crate::ledger::LedgerError;
use crate::storage::{AuditEvent, AuditEventType, PendingUpload};

const DEFAULT_INTERVAL: Duration = Duration::from_secs(60);
const DEFAULT_TTL: Duration = Duration::from_secs(15 * 60);

/// Outcome of one reaper pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReapReport {
    pub examined: usize,
    /// Entries whose record turned out to be committed.
    pub cleared: usize,
    /// Orphaned blobs removed.
    pub reaped: usize,
    pub failed: usize,
}

enum Settlement {
    Committed,
    Reaped,
    Deferred,
}

pub struct OrphanReaper {
    pipeline: Arc<RecordPipeline>,
    actor: String,
    ttl: Duration,
    interval: Duration,
}

impl OrphanReaper {
    pub fn new(pipeline: Arc<RecordPipeline>) -> Self {
        Self {
            pipeline,
            actor: ADMIN_ACTOR.to_string(),
            ttl: DEFAULT_TTL,
            interval: DEFAULT_INTERVAL,
        }
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Identity used for the ledger lookups.
    pub fn with_actor(mut self, actor: impl Into<String>) -> Self {
        self.actor = actor.into();
        self
    }

    /// Run the reaper loop until the cancellation token is triggered.
    ///
    /// Should be spawned as a background task:
    /// ```rust,ignore
    /// tokio::spawn(reaper.run(shutdown.clone()));
    /// ```
    pub async fn run(self, shutdown: CancellationToken) {
        info!(
            interval_secs = self.interval.as_secs(),
            ttl_secs = self.ttl.as_secs(),
            "Orphan reaper starting"
        );

        loop {
            if shutdown.is_cancelled() {
                info!("Orphan reaper shutting down");
                return;
            }

            self.sweep_once().await;

            tokio::select! {
                _ = tokio::time::sleep(self.interval) => {},
                _ = shutdown.cancelled() => {
                    info!("Orphan reaper shutting down");
                    return;
                }
            }
        }
    }

    /// Settle every journal entry older than the TTL.
    pub async fn sweep_once(&self) -> ReapReport {
        let mut report = ReapReport::default();
        let Some(journal) = self.pipeline.journal() else {
            return report;
        };

        let Some(cutoff) = TimeDelta::from_std(self.ttl)
            .ok()
            .and_then(|ttl| Utc::now().checked_sub_signed(ttl))
        else {
            return report;
        };

        let stale = match journal.pending_older_than(cutoff) {
            Ok(stale) => stale,
            Err(e) => {
                warn!(error = %e, "Orphan reaper: failed to read journal");
                return report;
            }
        };
        if stale.is_empty() {
            return report;
        }

        info!(count = stale.len(), "Orphan reaper: settling provisional uploads");

        for entry in &stale {
            report.examined += 1;
            match self.settle(entry).await {
                Settlement::Committed => report.cleared += 1,
                Settlement::Reaped => report.reaped += 1,
                Settlement::Deferred => {
                    report.failed += 1;
                    continue;
                }
            }
            if let Err(e) = journal.complete_upload(&entry.record_id) {
                warn!(record_id = %entry.record_id, error = %e, "Orphan reaper: failed to clear entry");
            }
        }
        report
    }

    async fn settle(&self, entry: &PendingUpload) -> Settlement {
        let pipeline = &self.pipeline;
        let record_id = entry.record_id.as_str();

        let session = match pipeline.session(record_id, &self.actor, &entry.org) {
            Ok(session) => session,
            Err(e) => {
                warn!(record_id, org = %entry.org, error = %e, "Orphan reaper: cannot resolve organization");
                return Settlement::Deferred;
            }
        };

        match pipeline
            .stage(record_id, Stage::ReadRecord, session.read_record(record_id))
            .await
        {
            Ok(_) => {
                info!(record_id, "Orphan reaper: upload was committed");
                return Settlement::Committed;
            }
            Err(e) if matches!(e.source, StageFailure::Ledger(LedgerError::RecordNotFound(_))) => {}
            Err(_) => return Settlement::Deferred,
        }

        match pipeline
            .stage(record_id, Stage::Compensate, pipeline.blobs.delete(record_id))
            .await
        {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::BlobNotFound => {}
            Err(_) => return Settlement::Deferred,
        }

        pipeline.audit(
            AuditEvent::new(AuditEventType::OrphanReaped)
                .with_user(&entry.actor)
                .with_org(&entry.org)
                .with_resource(record_id)
                .with_details(serde_json::json!({
                    "offchain_uri": entry.uri,
                    "created_at": entry.created_at,
                })),
        );
        info!(record_id, "Orphan reaper: removed uncommitted blob");
        Settlement::Reaped
    }
}
