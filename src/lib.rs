// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Evidence Vault - Envelope-Encrypted, Ledger-Anchored Record Storage
//!
//! Files are encrypted under a fresh per-record data key, the data key is
//! wrapped by a Vault transit KEK, the ciphertext goes to a blob store and
//! the file hash plus wrapped key are anchored on a permissioned ledger.
//!
//! ## Modules
//!
//! - `crypto` - AES-256-GCM envelope cipher and data keys
//! - `kms` - Key management over the Vault transit engine
//! - `storage` - Blob stores (local, S3), upload journal, audit log
//! - `ledger` - Organisation registry and the record contract facade
//! - `pipeline` - Upload, download, KEK rotation and background maintenance
//! - `identity` - Roles and ledger identities
//! - `config` - Environment configuration
//! - `error` - Stage-tagged pipeline errors

pub mod config;
pub mod crypto;
pub mod error;
pub mod identity;
pub mod kms;
pub mod ledger;
pub mod pipeline;
pub mod storage;
