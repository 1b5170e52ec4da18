// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! In-process transit engine.
//!
//! Mirrors the Vault transit behaviour the pipeline depends on: versioned
//! KEKs, context-bound wraps, decrypt under any retained version, rewrap to
//! the latest version and a seal switch. Used by tests and local runs
//! without a Vault server.

use std::sync::Mutex;

use async_trait::async_trait;
use base64ct::{Base64, Encoding};
use ring::aead::{Aad, LessSafeKey, Nonce, UnboundKey, AES_256_GCM, NONCE_LEN};
use ring::rand::{SecureRandom, SystemRandom};
use zeroize::Zeroizing;

use super::transit::{KmsHealth, TransitEngine};
use super::{wrapped_key_version, KmsError};

#[derive(Default)]
struct TransitState {
    mounted: bool,
    /// Index `n` holds KEK version `n + 1`.
    versions: Vec<Zeroizing<[u8; 32]>>,
    rotation_period: Option<String>,
    sealed: bool,
}

pub struct InMemoryTransit {
    mount: String,
    key_name: String,
    rng: SystemRandom,
    state: Mutex<TransitState>,
}

impl InMemoryTransit {
    /// Engine with nothing mounted; call `KeyManagementClient::setup` first.
    pub fn new(mount: impl Into<String>, key_name: impl Into<String>) -> Self {
        Self {
            mount: mount.into(),
            key_name: key_name.into(),
            rng: SystemRandom::new(),
            state: Mutex::new(TransitState::default()),
        }
    }

    pub fn seal(&self) {
        self.lock().sealed = true;
    }

    pub fn unseal(&self) {
        self.lock().sealed = false;
    }

    pub fn rotation_period(&self) -> Option<String> {
        self.lock().rotation_period.clone()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, TransitState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn ready(&self) -> Result<std::sync::MutexGuard<'_, TransitState>, KmsError> {
        let state = self.lock();
        if state.sealed {
            return Err(KmsError::Sealed("Vault is sealed".to_string()));
        }
        Ok(state)
    }

    fn random_key(&self) -> Result<Zeroizing<[u8; 32]>, KmsError> {
        let mut key = Zeroizing::new([0u8; 32]);
        self.rng
            .fill(key.as_mut())
            .map_err(|_| KmsError::Request("random generation failed".to_string()))?;
        Ok(key)
    }

    fn seal_under(
        &self,
        state: &TransitState,
        plaintext: &[u8],
        context: &[u8],
    ) -> Result<String, KmsError> {
        if context.is_empty() {
            return Err(KmsError::WrapFailure(
                "missing 'context' for key derivation".to_string(),
            ));
        }
        let version = state.versions.len();
        let kek = state
            .versions
            .last()
            .ok_or_else(|| KmsError::WrapFailure(format!("encryption key not found: {}", self.key_name)))?;

        let mut nonce = [0u8; NONCE_LEN];
        self.rng
            .fill(&mut nonce)
            .map_err(|_| KmsError::WrapFailure("random generation failed".to_string()))?;

        let key = aead_key(kek)?;
        let mut in_out = plaintext.to_vec();
        key.seal_in_place_append_tag(
            Nonce::assume_unique_for_key(nonce),
            Aad::from(context),
            &mut in_out,
        )
        .map_err(|_| KmsError::WrapFailure("seal failed".to_string()))?;

        let mut blob = Vec::with_capacity(NONCE_LEN + in_out.len());
        blob.extend_from_slice(&nonce);
        blob.extend_from_slice(&in_out);
        Ok(format!("vault:v{version}:{}", Base64::encode_string(&blob)))
    }

    fn open_under(
        &self,
        state: &TransitState,
        ciphertext: &str,
        context: &[u8],
    ) -> Result<Zeroizing<Vec<u8>>, KmsError> {
        let version = wrapped_key_version(ciphertext)
            .ok_or_else(|| KmsError::UnwrapFailure("invalid ciphertext: no prefix".to_string()))?;
        let kek = version
            .checked_sub(1)
            .and_then(|index| state.versions.get(index as usize))
            .ok_or_else(|| {
                KmsError::UnwrapFailure(format!("key version {version} is not available"))
            })?;

        let encoded = ciphertext.splitn(3, ':').nth(2).unwrap_or_default();
        let blob = Base64::decode_vec(encoded)
            .map_err(|e| KmsError::UnwrapFailure(format!("invalid ciphertext: {e}")))?;
        if blob.len() < NONCE_LEN {
            return Err(KmsError::UnwrapFailure("invalid ciphertext: too short".to_string()));
        }

        let (nonce, sealed) = blob.split_at(NONCE_LEN);
        let nonce = Nonce::try_assume_unique_for_key(nonce)
            .map_err(|_| KmsError::UnwrapFailure("invalid nonce".to_string()))?;
        let key = aead_key(kek)?;
        let mut in_out = Zeroizing::new(sealed.to_vec());
        let len = key
            .open_in_place(nonce, Aad::from(context), in_out.as_mut_slice())
            .map_err(|_| KmsError::UnwrapFailure("cipher: message authentication failed".to_string()))?
            .len();
        in_out.truncate(len);
        Ok(in_out)
    }
}

#[async_trait]
impl TransitEngine for InMemoryTransit {
    fn mount(&self) -> &str {
        &self.mount
    }

    fn key_name(&self) -> &str {
        &self.key_name
    }

    async fn health(&self) -> Result<KmsHealth, KmsError> {
        let sealed = self.lock().sealed;
        Ok(KmsHealth {
            sealed,
            ..KmsHealth::active()
        })
    }

    async fn enable_mount(&self) -> Result<(), KmsError> {
        self.ready()?.mounted = true;
        Ok(())
    }

    async fn create_key(&self) -> Result<(), KmsError> {
        let first = self.random_key()?;
        let mut state = self.ready()?;
        if !state.mounted {
            return Err(KmsError::Request(format!("no handler for route '{}'", self.mount)));
        }
        if state.versions.is_empty() {
            state.versions.push(first);
        }
        Ok(())
    }

    async fn configure_rotation(&self, period: &str) -> Result<(), KmsError> {
        let mut state = self.ready()?;
        if state.versions.is_empty() {
            return Err(KmsError::Request(format!("no such key: {}", self.key_name)));
        }
        state.rotation_period = Some(period.to_string());
        Ok(())
    }

    async fn rotate_key(&self) -> Result<(), KmsError> {
        let next = self.random_key()?;
        let mut state = self.ready()?;
        if state.versions.is_empty() {
            return Err(KmsError::Request(format!("no such key: {}", self.key_name)));
        }
        state.versions.push(next);
        Ok(())
    }

    async fn latest_version(&self) -> Result<u32, KmsError> {
        let state = self.ready()?;
        if state.versions.is_empty() {
            return Err(KmsError::Request(format!("no such key: {}", self.key_name)));
        }
        Ok(state.versions.len() as u32)
    }

    async fn encrypt(&self, plaintext: &[u8], context: &[u8]) -> Result<String, KmsError> {
        let state = self.ready()?;
        self.seal_under(&state, plaintext, context)
    }

    async fn decrypt(
        &self,
        ciphertext: &str,
        context: &[u8],
    ) -> Result<Zeroizing<Vec<u8>>, KmsError> {
        let state = self.ready()?;
        self.open_under(&state, ciphertext, context)
    }

    async fn rewrap(&self, ciphertext: &str, context: &[u8]) -> Result<String, KmsError> {
        let state = self.ready()?;
        let plaintext = self
            .open_under(&state, ciphertext, context)
            .map_err(|e| KmsError::RewrapFailure(e.to_string()))?;
        self.seal_under(&state, &plaintext, context)
            .map_err(|e| KmsError::RewrapFailure(e.to_string()))
    }
}

fn aead_key(kek: &[u8; 32]) -> Result<LessSafeKey, KmsError> {
    let unbound = UnboundKey::new(&AES_256_GCM, kek)
        .map_err(|_| KmsError::Request("invalid KEK material".to_string()))?;
    Ok(LessSafeKey::new(unbound))
}
