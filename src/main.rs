// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use evidence_vault::config::{env_or_default, AppConfig, StorageConfig, LOG_FORMAT_ENV};
use evidence_vault::kms::{KeyManagementClient, VaultTransit};
use evidence_vault::ledger::{default_profiles, LedgerClient, OrgRegistry};
use evidence_vault::pipeline::{OrphanReaper, RecordPipeline, RewrapSweep};
use evidence_vault::storage::{
    AuditLog, BlobStore, DataPaths, LocalBlobStore, S3BlobStore, UploadJournal,
};

type StartupResult<T> = Result<T, Box<dyn std::error::Error + Send + Sync>>;

#[tokio::main]
async fn main() {
    init_logging();

    if let Err(e) = run().await {
        error!(error = %e, "Evidence vault failed to start");
        std::process::exit(1);
    }
}

fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    if env_or_default(LOG_FORMAT_ENV, "pretty").eq_ignore_ascii_case("json") {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_current_span(false)
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

async fn run() -> StartupResult<()> {
    let config = AppConfig::from_env()?;

    // KMS first: a sealed Vault is fatal before anything touches storage.
    let transit = Arc::new(VaultTransit::new(&config.kms)?);
    let kms = Arc::new(
        KeyManagementClient::new(transit).with_rotation_period(config.kms.rotation_period.clone()),
    );
    kms.setup().await?;

    let blobs: Arc<dyn BlobStore> = match &config.storage {
        StorageConfig::Local { dir } => Arc::new(LocalBlobStore::new(dir)),
        StorageConfig::S3(s3) => Arc::new(S3BlobStore::new(s3)?),
    };
    blobs.initialize().await?;
    let health = blobs.health_check().await;
    if !health.healthy {
        warn!(backend = %health.backend, error = ?health.error, "Blob store unhealthy");
    }
    match blobs.stats().await {
        Ok(stats) => info!(
            backend = %stats.backend,
            location = %stats.location,
            files = stats.total_files,
            bytes = stats.total_size,
            "Blob store ready"
        ),
        Err(e) => warn!(error = %e, "Could not collect blob store stats"),
    }

    let paths = DataPaths::new(&config.data_dir);
    let journal = Arc::new(UploadJournal::open(&paths.journal_db())?);
    let pending = journal.pending_uploads()?.len();
    if pending > 0 {
        info!(pending, "Provisional uploads awaiting settlement");
    }

    let registry = match &config.org_registry_path {
        Some(path) => OrgRegistry::load(path, config.stage_timeout)?,
        None => OrgRegistry::from_profiles(default_profiles(), config.stage_timeout)?,
    };
    info!(organizations = registry.len(), "Organisation registry loaded");

    let pipeline = Arc::new(
        RecordPipeline::new(kms, blobs, LedgerClient::new(Arc::new(registry)))
            .with_journal(journal)
            .with_audit_log(AuditLog::new(paths))
            .with_stage_timeout(config.stage_timeout),
    );

    let maintenance = &config.maintenance;
    let sweep = RewrapSweep::new(&pipeline);
    let interrupted = sweep.interrupted();
    if let Some(state) = &interrupted {
        warn!(
            target_version = state.target_version,
            started_at = ?state.started_at,
            scanned = state.scanned,
            "Previous rewrap sweep did not finish"
        );
    }
    if maintenance.rewrap_on_start || interrupted.is_some() {
        match sweep
            .run(&maintenance.sweep_actor, &maintenance.sweep_org)
            .await
        {
            Ok(report) => info!(
                target_version = report.target_version,
                rewrapped = report.rewrapped,
                failed = report.failed,
                "Startup rewrap sweep complete"
            ),
            Err(e) => warn!(error = %e, "Startup rewrap sweep aborted"),
        }
    }

    let shutdown = CancellationToken::new();
    let reaper = OrphanReaper::new(pipeline.clone())
        .with_actor(maintenance.sweep_actor.clone())
        .with_ttl(maintenance.orphan_ttl)
        .with_interval(maintenance.reaper_interval);
    let reaper_handle = tokio::spawn(reaper.run(shutdown.clone()));

    info!("Evidence vault running; press Ctrl-C to stop");
    tokio::signal::ctrl_c().await?;

    info!("Shutdown requested");
    shutdown.cancel();
    if let Err(e) = reaper_handle.await {
        warn!(error = %e, "Orphan reaper task ended abnormally");
    }
    Ok(())
}
