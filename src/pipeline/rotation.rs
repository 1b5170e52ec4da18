// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! KEK rotation and the rewrap sweep.
//!
//! Rotating the KEK only adds a key version; existing wrapped keys stay on
//! their old version until rewrapped. The sweep inventories every record
//! on the ledger, rewraps keys below the latest version and commits the
//! new `wrapped_key_ref` with `UpdateRecord`. The DEK never leaves the KMS
//! and `file_hash` is never touched.
//!
//! A sweep can be re-run at any time: records already on the latest
//! version are skipped, so an interrupted sweep resumes where it stopped.
//! The journal checkpoint tells a restarted process that a sweep was cut
//! short; [`RewrapSweep::interrupted`] reads it back.

use chrono::Utc;
use serde::Serialize;
use tracing::{info, warn};

use super::{RecordPipeline, ALL_RECORDS};
use crate::error::{PipelineResult, Stage};
use crate::kms::wrapped_key_version;
use crate::ledger::{LedgerSession, Record, RecordStatus};
use crate::storage::{AuditEvent, AuditEventType, SweepState};

/// Checkpoint the journal after this many records.
const CHECKPOINT_EVERY: u64 = 50;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RewrapReport {
    pub target_version: u32,
    pub scanned: u64,
    pub rewrapped: u64,
    pub skipped: u64,
    pub failed: u64,
}

impl RecordPipeline {
    /// Advance the KEK to a new version. Returns the new version.
    pub async fn rotate_kek(&self, actor: &str) -> PipelineResult<u32> {
        let version = self
            .stage(ALL_RECORDS, Stage::RotateKek, self.kms.rotate_kek())
            .await?;
        self.audit(
            AuditEvent::new(AuditEventType::KekRotated)
                .with_user(actor)
                .with_details(serde_json::json!({ "version": version })),
        );
        Ok(version)
    }
}

/// Inventory-and-rewrap batch over every ledger record.
pub struct RewrapSweep<'a> {
    pipeline: &'a RecordPipeline,
}

impl<'a> RewrapSweep<'a> {
    pub fn new(pipeline: &'a RecordPipeline) -> Self {
        Self { pipeline }
    }

    /// The last checkpoint, if that sweep started and never finished.
    pub fn interrupted(&self) -> Option<SweepState> {
        let journal = self.pipeline.journal()?;
        match journal.last_sweep() {
            Ok(state) => state.filter(|s| s.started_at.is_some() && s.finished_at.is_none()),
            Err(e) => {
                warn!(error = %e, "Failed to read rewrap sweep checkpoint");
                None
            }
        }
    }

    /// Rewrap every record below the KEK's latest version.
    ///
    /// Fails only when the inventory itself cannot be built; per-record
    /// failures are counted in the report and logged.
    pub async fn run(&self, actor: &str, org: &str) -> PipelineResult<RewrapReport> {
        let pipeline = self.pipeline;
        let session = pipeline.session(ALL_RECORDS, actor, org)?;

        let target_version = pipeline
            .stage(ALL_RECORDS, Stage::Rewrap, pipeline.kms.latest_key_version())
            .await?;
        let records = pipeline
            .stage(ALL_RECORDS, Stage::ListRecords, session.list_all_records())
            .await?;

        info!(
            records = records.len(),
            target_version,
            "Rewrap sweep starting"
        );

        let mut report = RewrapReport {
            target_version,
            ..RewrapReport::default()
        };
        let resumed = self
            .interrupted()
            .filter(|previous| previous.target_version == target_version);
        if let Some(previous) = &resumed {
            info!(
                target_version,
                started_at = ?previous.started_at,
                scanned = previous.scanned,
                rewrapped = previous.rewrapped,
                "Resuming interrupted rewrap sweep"
            );
        }
        let mut checkpoint = SweepState {
            target_version,
            started_at: resumed
                .and_then(|previous| previous.started_at)
                .or_else(|| Some(Utc::now())),
            ..SweepState::default()
        };
        self.checkpoint(&mut checkpoint, &report);

        for record in records {
            report.scanned += 1;

            let current = wrapped_key_version(&record.wrapped_key_ref);
            let up_to_date = current.is_some_and(|v| v >= target_version);
            if record.status == RecordStatus::Deleted || up_to_date {
                report.skipped += 1;
            } else if self.rewrap_one(&session, record, actor).await {
                report.rewrapped += 1;
            } else {
                report.failed += 1;
            }

            if report.scanned % CHECKPOINT_EVERY == 0 {
                self.checkpoint(&mut checkpoint, &report);
            }
        }

        checkpoint.finished_at = Some(Utc::now());
        self.checkpoint(&mut checkpoint, &report);

        info!(
            target_version,
            scanned = report.scanned,
            rewrapped = report.rewrapped,
            skipped = report.skipped,
            failed = report.failed,
            "Rewrap sweep finished"
        );
        Ok(report)
    }

    /// Stage failures are already logged by the pipeline.
    async fn rewrap_one(&self, session: &LedgerSession, mut record: Record, actor: &str) -> bool {
        let pipeline = self.pipeline;
        let record_id = record.record_id.clone();
        let previous = wrapped_key_version(&record.wrapped_key_ref);

        let Ok(rewrapped) = pipeline
            .stage(
                &record_id,
                Stage::Rewrap,
                pipeline
                    .kms
                    .rewrap_record_key(&record.wrapped_key_ref, &record_id),
            )
            .await
        else {
            return false;
        };

        record.wrapped_key_ref = rewrapped;
        record.updated_at = Some(Utc::now());
        if pipeline
            .stage(&record_id, Stage::UpdateRecord, session.update_record(&record))
            .await
            .is_err()
        {
            return false;
        }

        let version = wrapped_key_version(&record.wrapped_key_ref);
        pipeline.audit(
            AuditEvent::new(AuditEventType::RecordRewrapped)
                .with_user(actor)
                .with_resource(&record_id)
                .with_details(serde_json::json!({ "from": previous, "to": version })),
        );
        true
    }

    fn checkpoint(&self, state: &mut SweepState, report: &RewrapReport) {
        let Some(journal) = self.pipeline.journal() else {
            return;
        };
        state.scanned = report.scanned;
        state.rewrapped = report.rewrapped;
        state.skipped = report.skipped;
        state.failed = report.failed;
        if let Err(e) = journal.record_sweep(state) {
            warn!(error = %e, "Failed to checkpoint rewrap sweep");
        }
    }
}
