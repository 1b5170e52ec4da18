// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Per-record Data Encryption Key.

use std::fmt;

use ring::rand::{SecureRandom, SystemRandom};
use zeroize::Zeroizing;

use super::CipherError;

/// DEK size in bytes (AES-256).
pub const DEK_LENGTH: usize = 32;

/// A plaintext DEK held only in process memory.
///
/// The key bytes are wiped on drop. Not `Clone`: a key moves through one
/// encrypt or decrypt call and is gone.
pub struct DataKey(Zeroizing<[u8; DEK_LENGTH]>);

impl DataKey {
    /// Draw a fresh random key from the system CSPRNG.
    pub fn generate() -> Result<Self, CipherError> {
        let mut bytes = Zeroizing::new([0u8; DEK_LENGTH]);
        SystemRandom::new()
            .fill(bytes.as_mut())
            .map_err(|_| CipherError::Rng)?;
        Ok(Self(bytes))
    }

    /// Rebuild a key from unwrapped KMS output.
    pub fn from_slice(bytes: &[u8]) -> Result<Self, CipherError> {
        if bytes.len() != DEK_LENGTH {
            return Err(CipherError::InvalidKeyLength {
                expected: DEK_LENGTH,
                got: bytes.len(),
            });
        }
        let mut key = Zeroizing::new([0u8; DEK_LENGTH]);
        key.copy_from_slice(bytes);
        Ok(Self(key))
    }

    pub fn as_bytes(&self) -> &[u8; DEK_LENGTH] {
        &self.0
    }
}

impl fmt::Debug for DataKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("DataKey(<redacted>)")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_keys_differ() {
        let a = DataKey::generate().unwrap();
        let b = DataKey::generate().unwrap();
        assert_ne!(a.as_bytes(), b.as_bytes());
    }

    #[test]
    fn from_slice_rejects_wrong_length() {
        let err = DataKey::from_slice(&[0u8; 16]).unwrap_err();
        assert!(matches!(
            err,
            CipherError::InvalidKeyLength {
                expected: 32,
                got: 16
            }
        ));
    }

    #[test]
    fn debug_never_prints_key_material() {
        let key = DataKey::from_slice(&[0xAB; DEK_LENGTH]).unwrap();
        let printed = format!("{key:?}");
        assert_eq!(printed, "DataKey(<redacted>)");
        assert!(!printed.to_lowercase().contains("ab"));
    }
}
