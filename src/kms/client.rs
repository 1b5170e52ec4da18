// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Record-level key management on top of a [`TransitEngine`].

use std::sync::Arc;

use tracing::{info, warn};

use super::transit::{KmsHealth, TransitEngine};
use super::KmsError;
use crate::crypto::{DataKey, DEK_LENGTH};

/// Default automatic KEK rotation period (90 days).
pub const DEFAULT_ROTATION_PERIOD: &str = "2160h";

/// A freshly minted DEK and its wrapped form.
///
/// `dek` must be used for exactly one encryption and then dropped.
#[derive(Debug)]
pub struct RecordKey {
    pub dek: DataKey,
    /// Opaque KMS ciphertext to persist on the ledger.
    pub wrapped_key: String,
    /// `vault:<mount>/<kek>:<record_id>`
    pub key_id: String,
}

/// KEK version encoded in a `vault:v<N>:...` ciphertext.
pub fn wrapped_key_version(wrapped: &str) -> Option<u32> {
    let mut parts = wrapped.splitn(3, ':');
    if parts.next()? != "vault" {
        return None;
    }
    let version = parts.next()?.strip_prefix('v')?.parse().ok()?;
    parts.next()?;
    Some(version)
}

/// Wraps, unwraps and rotates per-record DEKs. Construct once at startup
/// and share behind an `Arc`.
pub struct KeyManagementClient {
    engine: Arc<dyn TransitEngine>,
    rotation_period: String,
}

impl KeyManagementClient {
    pub fn new(engine: Arc<dyn TransitEngine>) -> Self {
        Self {
            engine,
            rotation_period: DEFAULT_ROTATION_PERIOD.to_string(),
        }
    }

    pub fn with_rotation_period(mut self, period: impl Into<String>) -> Self {
        self.rotation_period = period.into();
        self
    }

    pub fn key_id(&self, record_id: &str) -> String {
        format!(
            "vault:{}/{}:{record_id}",
            self.engine.mount(),
            self.engine.key_name()
        )
    }

    pub async fn health(&self) -> Result<KmsHealth, KmsError> {
        self.engine.health().await
    }

    /// Enable the transit mount, create the KEK and set its rotation period.
    ///
    /// Safe to repeat. A failed rotation-period update is logged and ignored;
    /// a sealed or uninitialized KMS fails fast.
    pub async fn setup(&self) -> Result<(), KmsError> {
        let health = self.engine.health().await?;
        if !health.is_ready() {
            return Err(KmsError::Sealed(format!(
                "initialized={} sealed={}",
                health.initialized, health.sealed
            )));
        }

        self.engine.enable_mount().await?;
        self.engine.create_key().await?;

        if let Err(e) = self.engine.configure_rotation(&self.rotation_period).await {
            warn!(
                error = %e,
                period = %self.rotation_period,
                "Could not set KEK auto-rotation period"
            );
        }

        info!(
            mount = %self.engine.mount(),
            key = %self.engine.key_name(),
            "KMS transit engine ready"
        );
        Ok(())
    }

    /// Mint a DEK for `record_id` and wrap it under the current KEK.
    pub async fn generate_record_key(&self, record_id: &str) -> Result<RecordKey, KmsError> {
        let dek = DataKey::generate().map_err(|e| KmsError::WrapFailure(e.to_string()))?;
        let wrapped_key = self
            .engine
            .encrypt(dek.as_bytes(), record_id.as_bytes())
            .await?;

        Ok(RecordKey {
            dek,
            wrapped_key,
            key_id: self.key_id(record_id),
        })
    }

    /// Unwrap a DEK. Fails with `UnwrapFailure` when `record_id` is not the
    /// context the key was wrapped under.
    pub async fn unwrap_record_key(
        &self,
        wrapped_key: &str,
        record_id: &str,
    ) -> Result<DataKey, KmsError> {
        let plaintext = self
            .engine
            .decrypt(wrapped_key, record_id.as_bytes())
            .await?;
        DataKey::from_slice(&plaintext).map_err(|_| {
            KmsError::UnwrapFailure(format!(
                "unwrapped key is {} bytes, expected {DEK_LENGTH}",
                plaintext.len()
            ))
        })
    }

    /// Advance the KEK to a new version. Returns the new latest version.
    pub async fn rotate_kek(&self) -> Result<u32, KmsError> {
        self.engine.rotate_key().await?;
        let version = self.engine.latest_version().await?;
        info!(
            key = %self.engine.key_name(),
            version,
            "KEK rotated"
        );
        Ok(version)
    }

    /// Re-encrypt a wrapped key under the latest KEK version without
    /// exposing the DEK.
    pub async fn rewrap_record_key(
        &self,
        wrapped_key: &str,
        record_id: &str,
    ) -> Result<String, KmsError> {
        self.engine.rewrap(wrapped_key, record_id.as_bytes()).await
    }

    pub async fn latest_key_version(&self) -> Result<u32, KmsError> {
        self.engine.latest_version().await
    }
}
