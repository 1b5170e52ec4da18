// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Key Management
//!
//! Per-record DEKs are wrapped by a master key-encryption-key (KEK) that
//! never leaves a transit-style KMS. Every wrap is bound to the record id as
//! derivation context, so a wrapped key only unwraps for the record it was
//! minted for.
//!
//! ## Layers
//!
//! - [`TransitEngine`] - raw transit operations (one impl per backend)
//! - [`VaultTransit`] - HashiCorp Vault transit over HTTP
//! - [`InMemoryTransit`] - in-process engine with the same semantics
//! - [`KeyManagementClient`] - record-level API used by the pipeline
//!
//! ## Wrapped key format
//!
//! `vault:v<N>:<base64>` where `N` is the KEK version that produced it.

pub mod client;
pub mod memory;
pub mod transit;
pub mod vault;

pub use client::{wrapped_key_version, KeyManagementClient, RecordKey};
pub use memory::InMemoryTransit;
pub use transit::{KmsHealth, TransitEngine};
pub use vault::VaultTransit;

use crate::error::ErrorKind;

#[derive(Debug, thiserror::Error)]
pub enum KmsError {
    #[error("KMS unreachable: {0}")]
    Unavailable(String),

    #[error("KMS sealed or not initialized: {0}")]
    Sealed(String),

    #[error("key wrap failed: {0}")]
    WrapFailure(String),

    #[error("key unwrap failed: {0}")]
    UnwrapFailure(String),

    #[error("key rewrap failed: {0}")]
    RewrapFailure(String),

    #[error("KMS request failed: {0}")]
    Request(String),

    #[error("KMS response was invalid: {0}")]
    InvalidResponse(String),
}

impl KmsError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            KmsError::Unavailable(_) | KmsError::Request(_) | KmsError::InvalidResponse(_) => {
                ErrorKind::KmsUnavailable
            }
            KmsError::Sealed(_) => ErrorKind::KmsSealed,
            KmsError::WrapFailure(_) | KmsError::RewrapFailure(_) => ErrorKind::KeyWrapFailure,
            KmsError::UnwrapFailure(_) => ErrorKind::KeyUnwrapFailure,
        }
    }
}
