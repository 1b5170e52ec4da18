// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Transit engine seam.

use async_trait::async_trait;
use serde::Serialize;
use zeroize::Zeroizing;

use super::KmsError;

/// Readiness as reported by the KMS health endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct KmsHealth {
    pub initialized: bool,
    pub sealed: bool,
    pub standby: bool,
}

impl KmsHealth {
    pub fn active() -> Self {
        Self {
            initialized: true,
            sealed: false,
            standby: false,
        }
    }

    /// Standby nodes still forward transit requests, so they count as ready.
    pub fn is_ready(&self) -> bool {
        self.initialized && !self.sealed
    }
}

/// Operations of a transit-style KMS bound to one mount and one KEK.
///
/// Wrap, unwrap and rewrap all take the derivation `context`; an engine must
/// refuse to unwrap under a context other than the one used to wrap.
#[async_trait]
pub trait TransitEngine: Send + Sync {
    /// Mount path of the transit engine.
    fn mount(&self) -> &str;

    /// Name of the master KEK.
    fn key_name(&self) -> &str;

    async fn health(&self) -> Result<KmsHealth, KmsError>;

    /// Enable the transit mount. Already-enabled counts as success.
    async fn enable_mount(&self) -> Result<(), KmsError>;

    /// Create the non-exportable, context-derived KEK. Already-existing counts
    /// as success.
    async fn create_key(&self) -> Result<(), KmsError>;

    /// Set the automatic rotation period (e.g. `2160h`).
    async fn configure_rotation(&self, period: &str) -> Result<(), KmsError>;

    async fn rotate_key(&self) -> Result<(), KmsError>;

    async fn latest_version(&self) -> Result<u32, KmsError>;

    async fn encrypt(&self, plaintext: &[u8], context: &[u8]) -> Result<String, KmsError>;

    async fn decrypt(
        &self,
        ciphertext: &str,
        context: &[u8],
    ) -> Result<Zeroizing<Vec<u8>>, KmsError>;

    async fn rewrap(&self, ciphertext: &str, context: &[u8]) -> Result<String, KmsError>;
}
