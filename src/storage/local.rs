// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Local filesystem blob backend.
//!
//! Ciphertext and sidecar live side by side in one directory. Writes go to
//! a temp file first and are renamed into place, so a reader never sees a
//! half-written object.

use std::io;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::fs;
use tracing::debug;

use super::blob::{
    combine_delete, BackendKind, BlobHealth, BlobStats, BlobStore, BlobStoreError,
    EnvelopeMetadata, RemoveOutcome, StoredEnvelope,
};
use super::paths::{validate_record_id, BlobKeys, CIPHERTEXT_EXTENSION, METADATA_EXTENSION};

const HEALTH_PROBE: &str = ".health_check";
const TEMP_SUFFIX: &str = ".tmp";

#[derive(Debug, Clone)]
pub struct LocalBlobStore {
    dir: PathBuf,
}

impl LocalBlobStore {
    pub fn new(dir: impl AsRef<Path>) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    async fn write_atomic(&self, path: &Path, bytes: &[u8]) -> Result<(), BlobStoreError> {
        let mut temp = path.as_os_str().to_owned();
        temp.push(TEMP_SUFFIX);
        let temp = PathBuf::from(temp);

        fs::write(&temp, bytes)
            .await
            .map_err(|e| BlobStoreError::Write(format!("{}: {e}", temp.display())))?;
        if let Err(e) = fs::rename(&temp, path).await {
            let _ = fs::remove_file(&temp).await;
            return Err(BlobStoreError::Write(format!("{}: {e}", path.display())));
        }
        Ok(())
    }

    async fn read_object(&self, path: &Path, record_id: &str) -> Result<Vec<u8>, BlobStoreError> {
        fs::read(path).await.map_err(|e| {
            if e.kind() == io::ErrorKind::NotFound {
                BlobStoreError::NotFound(format!("{record_id}: {}", path.display()))
            } else {
                BlobStoreError::Read(format!("{}: {e}", path.display()))
            }
        })
    }

    async fn remove_object(&self, path: &Path) -> RemoveOutcome {
        match fs::remove_file(path).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(BlobStoreError::Write(format!("{}: {e}", path.display()))),
        }
    }

    async fn probe(&self) -> Result<(), BlobStoreError> {
        fs::create_dir_all(&self.dir)
            .await
            .map_err(|e| BlobStoreError::Unavailable(format!("{}: {e}", self.dir.display())))?;

        let probe = self.dir.join(HEALTH_PROBE);
        let data = b"health_check_data";
        fs::write(&probe, data)
            .await
            .map_err(|e| BlobStoreError::Unavailable(format!("probe write: {e}")))?;
        let read_back = fs::read(&probe)
            .await
            .map_err(|e| BlobStoreError::Unavailable(format!("probe read: {e}")))?;
        fs::remove_file(&probe)
            .await
            .map_err(|e| BlobStoreError::Unavailable(format!("probe delete: {e}")))?;

        if read_back != data {
            return Err(BlobStoreError::Unavailable(
                "health check data mismatch".to_string(),
            ));
        }
        Ok(())
    }
}

#[async_trait]
impl BlobStore for LocalBlobStore {
    fn backend(&self) -> BackendKind {
        BackendKind::Local
    }

    fn location(&self) -> String {
        self.dir.display().to_string()
    }

    async fn initialize(&self) -> Result<(), BlobStoreError> {
        fs::create_dir_all(&self.dir)
            .await
            .map_err(|e| BlobStoreError::Write(format!("{}: {e}", self.dir.display())))
    }

    async fn store(
        &self,
        record_id: &str,
        ciphertext: &[u8],
        nonce: &[u8],
        tag: &[u8],
    ) -> Result<String, BlobStoreError> {
        validate_record_id(record_id)?;
        self.initialize().await?;

        let cipher_path = BlobKeys::local_ciphertext(&self.dir, record_id);
        let meta_path = BlobKeys::local_metadata(&self.dir, record_id);
        let sidecar = EnvelopeMetadata::new(nonce, tag).to_json()?;

        self.write_atomic(&cipher_path, ciphertext).await?;
        if let Err(e) = self.write_atomic(&meta_path, &sidecar).await {
            return Err(match self.remove_object(&cipher_path).await {
                Ok(_) => e,
                Err(rollback) => BlobStoreError::PartialWrite {
                    record_id: record_id.to_string(),
                    reason: format!("{e}; rollback: {rollback}"),
                },
            });
        }

        debug!(record_id, bytes = ciphertext.len(), "Stored ciphertext locally");
        Ok(BlobKeys::file_uri(&self.dir, record_id))
    }

    async fn retrieve(&self, record_id: &str) -> Result<StoredEnvelope, BlobStoreError> {
        validate_record_id(record_id)?;

        let ciphertext = self
            .read_object(&BlobKeys::local_ciphertext(&self.dir, record_id), record_id)
            .await?;
        let sidecar = self
            .read_object(&BlobKeys::local_metadata(&self.dir, record_id), record_id)
            .await?;
        let (nonce, tag) = EnvelopeMetadata::from_json(&sidecar)?.decode()?;

        Ok(StoredEnvelope {
            ciphertext,
            nonce,
            tag,
        })
    }

    async fn delete(&self, record_id: &str) -> Result<(), BlobStoreError> {
        validate_record_id(record_id)?;

        let ciphertext = self
            .remove_object(&BlobKeys::local_ciphertext(&self.dir, record_id))
            .await;
        let metadata = self
            .remove_object(&BlobKeys::local_metadata(&self.dir, record_id))
            .await;
        combine_delete(record_id, ciphertext, metadata)
    }

    async fn health_check(&self) -> BlobHealth {
        let result = self.probe().await;
        BlobHealth {
            healthy: result.is_ok(),
            backend: BackendKind::Local,
            location: self.location(),
            error: result.err().map(|e| e.to_string()),
        }
    }

    async fn stats(&self) -> Result<BlobStats, BlobStoreError> {
        let mut stats = BlobStats {
            backend: BackendKind::Local,
            location: self.location(),
            total_files: 0,
            total_objects: 0,
            total_size: 0,
        };

        let mut entries = match fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(stats),
            Err(e) => return Err(BlobStoreError::Read(format!("{}: {e}", self.dir.display()))),
        };

        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| BlobStoreError::Read(e.to_string()))?
        {
            let name = entry.file_name().to_string_lossy().into_owned();
            let is_cipher = name.ends_with(CIPHERTEXT_EXTENSION);
            if !is_cipher && !name.ends_with(METADATA_EXTENSION) {
                continue;
            }
            let meta = entry
                .metadata()
                .await
                .map_err(|e| BlobStoreError::Read(format!("{name}: {e}")))?;
            if !meta.is_file() {
                continue;
            }
            stats.total_objects += 1;
            stats.total_size += meta.len();
            if is_cipher {
                stats.total_files += 1;
            }
        }
        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    fn store() -> (LocalBlobStore, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        (LocalBlobStore::new(dir.path().join("files")), dir)
    }

    #[tokio::test]
    async fn store_then_retrieve() {
        let (store, _dir) = store();
        let uri = store
            .store("rec-1", b"ciphertext-bytes", &[1u8; 12], &[2u8; 16])
            .await
            .unwrap();
        assert!(uri.starts_with("file://"));
        assert!(uri.ends_with("/files/rec-1.enc"));

        let envelope = store.retrieve("rec-1").await.unwrap();
        assert_eq!(envelope.ciphertext, b"ciphertext-bytes");
        assert_eq!(envelope.nonce, vec![1u8; 12]);
        assert_eq!(envelope.tag, vec![2u8; 16]);

        let sidecar = std::fs::read_to_string(store.dir().join("rec-1.meta.json")).unwrap();
        assert!(sidecar.contains("\"authTag\""));
        assert!(!store.dir().join("rec-1.enc.tmp").exists());
    }

    #[tokio::test]
    async fn missing_sidecar_is_not_found() {
        let (store, _dir) = store();
        store.store("rec-2", b"c", &[0u8; 12], &[0u8; 16]).await.unwrap();
        std::fs::remove_file(store.dir().join("rec-2.meta.json")).unwrap();

        let err = store.retrieve("rec-2").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::BlobNotFound);
        let err = store.retrieve("never-stored").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::BlobNotFound);
    }

    #[tokio::test]
    async fn delete_removes_both_objects() {
        let (store, _dir) = store();
        store.store("rec-3", b"c", &[0u8; 12], &[0u8; 16]).await.unwrap();
        store.delete("rec-3").await.unwrap();
        assert!(!store.dir().join("rec-3.enc").exists());
        assert!(!store.dir().join("rec-3.meta.json").exists());

        let err = store.delete("rec-3").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::BlobNotFound);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn delete_surfaces_partial_failure() {
        let (store, _dir) = store();
        store.store("rec-4", b"c", &[0u8; 12], &[0u8; 16]).await.unwrap();

        // A directory in place of the sidecar cannot be removed with remove_file.
        let meta = store.dir().join("rec-4.meta.json");
        std::fs::remove_file(&meta).unwrap();
        std::fs::create_dir(&meta).unwrap();

        let err = store.delete("rec-4").await.unwrap_err();
        assert!(matches!(err, BlobStoreError::PartialDelete { .. }));
        assert!(!store.dir().join("rec-4.enc").exists());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn failed_sidecar_write_rolls_back_ciphertext() {
        let (store, _dir) = store();
        store.initialize().await.unwrap();
        std::fs::create_dir(store.dir().join("rec-5.meta.json")).unwrap();

        let err = store
            .store("rec-5", b"c", &[0u8; 12], &[0u8; 16])
            .await
            .unwrap_err();
        assert!(matches!(err, BlobStoreError::Write(_)));
        assert!(!store.dir().join("rec-5.enc").exists());
        assert!(!store.dir().join("rec-5.meta.json.tmp").exists());
    }

    #[tokio::test]
    async fn rejects_path_traversal() {
        let (store, _dir) = store();
        let err = store
            .store("../escape", b"c", &[0u8; 12], &[0u8; 16])
            .await
            .unwrap_err();
        assert!(matches!(err, BlobStoreError::InvalidRecordId(_)));
    }

    #[tokio::test]
    async fn stats_count_ciphertexts_and_sidecars() {
        let (store, _dir) = store();
        let empty = store.stats().await.unwrap();
        assert_eq!(empty.total_objects, 0);

        store.store("a", b"12345", &[0u8; 12], &[0u8; 16]).await.unwrap();
        store.store("b", b"123", &[0u8; 12], &[0u8; 16]).await.unwrap();
        std::fs::write(store.dir().join("notes.txt"), b"ignored").unwrap();

        let stats = store.stats().await.unwrap();
        assert_eq!(stats.backend, BackendKind::Local);
        assert_eq!(stats.total_files, 2);
        assert_eq!(stats.total_objects, 4);
        assert!(stats.total_size > 8);
    }

    #[tokio::test]
    async fn health_check_probes_directory() {
        let (store, _dir) = store();
        let health = store.health_check().await;
        assert!(health.healthy, "{:?}", health.error);
        assert!(!store.dir().join(HEALTH_PROBE).exists());
    }
}
