// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! AES-256-GCM file encryption with a detached tag.

use ring::aead::{Aad, LessSafeKey, Nonce, UnboundKey, AES_256_GCM};
use ring::rand::{SecureRandom, SystemRandom};
use sha2::{Digest, Sha256};
use zeroize::Zeroize;

use super::DataKey;
use crate::error::ErrorKind;

/// Nonce size in bytes.
pub const NONCE_LENGTH: usize = 12;

/// Authentication tag size in bytes.
pub const TAG_LENGTH: usize = 16;

/// Prefix of every file hash.
pub const HASH_PREFIX: &str = "sha256:";

#[derive(Debug, thiserror::Error)]
pub enum CipherError {
    #[error("system random number generator failed")]
    Rng,

    #[error("invalid key length: expected {expected}, got {got}")]
    InvalidKeyLength { expected: usize, got: usize },

    #[error("encryption failed: {0}")]
    Encryption(String),

    #[error("authentication failed: ciphertext, nonce or tag rejected")]
    Authentication,

    #[error("malformed envelope: {0}")]
    Malformed(String),
}

impl CipherError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            CipherError::Authentication | CipherError::Malformed(_) => ErrorKind::IntegrityError,
            CipherError::Rng | CipherError::InvalidKeyLength { .. } | CipherError::Encryption(_) => {
                ErrorKind::EncryptionFailure
            }
        }
    }
}

/// Output of one encryption.
#[derive(Debug, Clone)]
pub struct SealedFile {
    pub ciphertext: Vec<u8>,
    pub nonce: [u8; NONCE_LENGTH],
    pub tag: [u8; TAG_LENGTH],
    /// `sha256:<hex>` of the plaintext.
    pub file_hash: String,
}

/// Compute the `sha256:<lowercase hex>` digest of `bytes`.
pub fn file_hash(bytes: &[u8]) -> String {
    format!("{HASH_PREFIX}{}", hex::encode(Sha256::digest(bytes)))
}

/// Stateless AEAD front end. Cheap to construct; holds only the RNG handle.
#[derive(Debug)]
pub struct EnvelopeCipher {
    rng: SystemRandom,
}

impl Default for EnvelopeCipher {
    fn default() -> Self {
        Self::new()
    }
}

impl EnvelopeCipher {
    pub fn new() -> Self {
        Self {
            rng: SystemRandom::new(),
        }
    }

    /// Encrypt `plaintext` under `dek` with a fresh nonce.
    pub fn encrypt(&self, plaintext: &[u8], dek: &DataKey) -> Result<SealedFile, CipherError> {
        let key = aead_key(dek)?;

        let mut nonce = [0u8; NONCE_LENGTH];
        self.rng.fill(&mut nonce).map_err(|_| CipherError::Rng)?;

        let file_hash = file_hash(plaintext);

        let mut in_out = plaintext.to_vec();
        let tag = match key.seal_in_place_separate_tag(
            Nonce::assume_unique_for_key(nonce),
            Aad::empty(),
            &mut in_out,
        ) {
            Ok(tag) => tag,
            Err(_) => {
                in_out.zeroize();
                return Err(CipherError::Encryption("AES-256-GCM seal rejected input".to_string()));
            }
        };

        let mut tag_bytes = [0u8; TAG_LENGTH];
        tag_bytes.copy_from_slice(tag.as_ref());

        Ok(SealedFile {
            ciphertext: in_out,
            nonce,
            tag: tag_bytes,
            file_hash,
        })
    }

    /// Verify and decrypt. Any failure yields [`CipherError::Authentication`]
    /// or [`CipherError::Malformed`] and no plaintext.
    pub fn decrypt(
        &self,
        ciphertext: &[u8],
        dek: &DataKey,
        nonce: &[u8],
        tag: &[u8],
    ) -> Result<Vec<u8>, CipherError> {
        if nonce.len() != NONCE_LENGTH {
            return Err(CipherError::Malformed(format!(
                "nonce must be {NONCE_LENGTH} bytes, got {}",
                nonce.len()
            )));
        }
        if tag.len() != TAG_LENGTH {
            return Err(CipherError::Malformed(format!(
                "tag must be {TAG_LENGTH} bytes, got {}",
                tag.len()
            )));
        }

        let key = aead_key(dek)?;
        let nonce = Nonce::try_assume_unique_for_key(nonce)
            .map_err(|_| CipherError::Malformed("nonce rejected".to_string()))?;

        let mut in_out = Vec::with_capacity(ciphertext.len() + TAG_LENGTH);
        in_out.extend_from_slice(ciphertext);
        in_out.extend_from_slice(tag);

        let plaintext_len = match key.open_in_place(nonce, Aad::empty(), &mut in_out) {
            Ok(plaintext) => plaintext.len(),
            Err(_) => {
                in_out.zeroize();
                return Err(CipherError::Authentication);
            }
        };
        in_out.truncate(plaintext_len);
        Ok(in_out)
    }
}

fn aead_key(dek: &DataKey) -> Result<LessSafeKey, CipherError> {
    let unbound = UnboundKey::new(&AES_256_GCM, dek.as_bytes()).map_err(|_| {
        CipherError::InvalidKeyLength {
            expected: AES_256_GCM.key_len(),
            got: dek.as_bytes().len(),
        }
    })?;
    Ok(LessSafeKey::new(unbound))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_bytes(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i * 31 % 251) as u8).collect()
    }

    #[test]
    fn decrypt_recovers_plaintext_and_hash_matches() {
        let cipher = EnvelopeCipher::new();
        let dek = DataKey::generate().unwrap();
        let plaintext = sample_bytes(4096);

        let sealed = cipher.encrypt(&plaintext, &dek).unwrap();
        assert_ne!(sealed.ciphertext, plaintext);
        assert_eq!(sealed.ciphertext.len(), plaintext.len());

        let recovered = cipher
            .decrypt(&sealed.ciphertext, &dek, &sealed.nonce, &sealed.tag)
            .unwrap();
        assert_eq!(recovered, plaintext);
        assert_eq!(file_hash(&recovered), sealed.file_hash);
    }

    #[test]
    fn empty_file_is_supported() {
        let cipher = EnvelopeCipher::new();
        let dek = DataKey::generate().unwrap();
        let sealed = cipher.encrypt(b"", &dek).unwrap();
        assert!(sealed.ciphertext.is_empty());
        let recovered = cipher
            .decrypt(&sealed.ciphertext, &dek, &sealed.nonce, &sealed.tag)
            .unwrap();
        assert!(recovered.is_empty());
        assert_eq!(
            sealed.file_hash,
            "sha256:e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[test]
    fn hash_format_is_prefixed_lowercase_hex() {
        let hash = file_hash(b"abc");
        assert_eq!(
            hash,
            "sha256:ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn each_encryption_uses_a_new_nonce() {
        let cipher = EnvelopeCipher::new();
        let dek_a = DataKey::generate().unwrap();
        let dek_b = DataKey::generate().unwrap();
        let plaintext = sample_bytes(256);

        let a = cipher.encrypt(&plaintext, &dek_a).unwrap();
        let b = cipher.encrypt(&plaintext, &dek_b).unwrap();
        assert_ne!(a.nonce, b.nonce);
        assert_ne!(a.ciphertext, b.ciphertext);
        assert_eq!(a.file_hash, b.file_hash);
    }

    #[test]
    fn flipped_ciphertext_bit_is_rejected() {
        let cipher = EnvelopeCipher::new();
        let dek = DataKey::generate().unwrap();
        let sealed = cipher.encrypt(&sample_bytes(512), &dek).unwrap();

        for position in [0usize, 100, 511] {
            let mut tampered = sealed.ciphertext.clone();
            tampered[position] ^= 0x01;
            let err = cipher
                .decrypt(&tampered, &dek, &sealed.nonce, &sealed.tag)
                .unwrap_err();
            assert_eq!(err.kind(), ErrorKind::IntegrityError);
        }
    }

    #[test]
    fn flipped_tag_bit_is_rejected() {
        let cipher = EnvelopeCipher::new();
        let dek = DataKey::generate().unwrap();
        let sealed = cipher.encrypt(b"chain of custody", &dek).unwrap();

        let mut tag = sealed.tag;
        tag[TAG_LENGTH - 1] ^= 0x80;
        let err = cipher
            .decrypt(&sealed.ciphertext, &dek, &sealed.nonce, &tag)
            .unwrap_err();
        assert!(matches!(err, CipherError::Authentication));
    }

    #[test]
    fn wrong_key_is_rejected() {
        let cipher = EnvelopeCipher::new();
        let dek = DataKey::generate().unwrap();
        let other = DataKey::generate().unwrap();
        let sealed = cipher.encrypt(b"exhibit 12", &dek).unwrap();
        assert!(cipher
            .decrypt(&sealed.ciphertext, &other, &sealed.nonce, &sealed.tag)
            .is_err());
    }

    #[test]
    fn truncated_nonce_or_tag_is_malformed() {
        let cipher = EnvelopeCipher::new();
        let dek = DataKey::generate().unwrap();
        let sealed = cipher.encrypt(b"x", &dek).unwrap();

        let err = cipher
            .decrypt(&sealed.ciphertext, &dek, &sealed.nonce[..8], &sealed.tag)
            .unwrap_err();
        assert!(matches!(err, CipherError::Malformed(_)));

        let err = cipher
            .decrypt(&sealed.ciphertext, &dek, &sealed.nonce, &sealed.tag[..4])
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::IntegrityError);
    }
}
