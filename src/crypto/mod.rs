// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Envelope Cipher
//!
//! Authenticated file encryption under single-use data keys.
//!
//! ## Parameters
//!
//! | Item | Value |
//! |------|-------|
//! | Cipher | AES-256-GCM (`ring`) |
//! | Key | 256-bit random DEK, one per record |
//! | Nonce | 96-bit random, generated per call |
//! | Tag | 128-bit, stored beside the ciphertext |
//! | File hash | `sha256:<lowercase hex>` over the plaintext |
//!
//! A DEK encrypts exactly one file, so a random nonce per call is enough to
//! rule out nonce reuse without a counter service.

pub mod dek;
pub mod envelope;

pub use dek::{DataKey, DEK_LENGTH};
pub use envelope::{
    file_hash, CipherError, EnvelopeCipher, SealedFile, HASH_PREFIX, NONCE_LENGTH, TAG_LENGTH,
};
