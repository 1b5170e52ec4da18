// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! S3-compatible blob backend (AWS S3, MinIO).
//!
//! Path-style addressing (`{endpoint}/{bucket}/{key}`) with SigV4 header
//! auth. Listing uses ListObjectsV2 and follows continuation tokens.

use async_trait::async_trait;
use chrono::Utc;
use quick_xml::events::Event as XmlEvent;
use quick_xml::Reader;
use reqwest::{Client, Method, Response, StatusCode};
use tracing::{debug, info};
use url::Url;

use super::blob::{
    combine_delete, BackendKind, BlobHealth, BlobStats, BlobStore, BlobStoreError,
    EnvelopeMetadata, RemoveOutcome, StoredEnvelope,
};
use super::paths::{validate_record_id, BlobKeys, CIPHERTEXT_EXTENSION, CIPHERTEXT_PREFIX};
use super::sigv4::{uri_encode, Signer};
use crate::config::S3Config;

#[derive(Debug, Clone)]
pub struct S3BlobStore {
    endpoint: Url,
    bucket: String,
    signer: Signer,
    http: Client,
}

/// One page of a ListObjectsV2 response.
#[derive(Debug, Default, PartialEq)]
struct ListPage {
    objects: Vec<(String, u64)>,
    next_token: Option<String>,
}

impl S3BlobStore {
    pub fn new(config: &S3Config) -> Result<Self, BlobStoreError> {
        let endpoint = Url::parse(&config.endpoint).map_err(|e| {
            BlobStoreError::Unavailable(format!("invalid S3 endpoint {}: {e}", config.endpoint))
        })?;
        let http = Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| BlobStoreError::Unavailable(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            endpoint,
            bucket: config.bucket.clone(),
            signer: Signer::new(&config.access_key, &config.secret_key, &config.region),
            http,
        })
    }

    fn object_url(&self, key: Option<&str>, query: &[(&str, &str)]) -> Result<Url, BlobStoreError> {
        let base = self.endpoint.as_str().trim_end_matches('/');
        let mut raw = format!("{base}/{}", uri_encode(&self.bucket));
        if let Some(key) = key {
            let encoded: Vec<String> = key.split('/').map(uri_encode).collect();
            raw.push('/');
            raw.push_str(&encoded.join("/"));
        }
        if !query.is_empty() {
            let pairs: Vec<String> = query
                .iter()
                .map(|(k, v)| format!("{}={}", uri_encode(k), uri_encode(v)))
                .collect();
            raw.push('?');
            raw.push_str(&pairs.join("&"));
        }
        Url::parse(&raw).map_err(|e| BlobStoreError::Unavailable(format!("bad URL {raw}: {e}")))
    }

    async fn send(
        &self,
        method: Method,
        url: Url,
        body: Vec<u8>,
        content_type: Option<&str>,
    ) -> Result<Response, BlobStoreError> {
        let label = format!("{method} {}", url.path());
        let signed = self
            .signer
            .sign(method.as_str(), &url, &body, Utc::now())
            .map_err(|e| BlobStoreError::Unavailable(format!("{label}: signing: {e}")))?;

        let mut request = self
            .http
            .request(method, url)
            .header("host", signed.host)
            .header("x-amz-date", signed.amz_date)
            .header("x-amz-content-sha256", signed.content_sha256)
            .header("authorization", signed.authorization);
        if let Some(content_type) = content_type {
            request = request.header("content-type", content_type);
        }

        request
            .body(body)
            .send()
            .await
            .map_err(|e| BlobStoreError::Unavailable(format!("{label}: {e}")))
    }

    async fn put_object(
        &self,
        key: &str,
        body: Vec<u8>,
        content_type: &str,
    ) -> Result<(), BlobStoreError> {
        let url = self.object_url(Some(key), &[])?;
        let response = self.send(Method::PUT, url, body, Some(content_type)).await?;
        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(BlobStoreError::Write(format!(
                "PUT {key} returned {status}: {text}"
            )));
        }
        Ok(())
    }

    async fn get_object(&self, key: &str) -> Result<Option<Vec<u8>>, BlobStoreError> {
        let url = self.object_url(Some(key), &[])?;
        let response = self.send(Method::GET, url, Vec::new(), None).await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(BlobStoreError::Read(format!(
                "GET {key} returned {status}: {text}"
            )));
        }
        let bytes = response
            .bytes()
            .await
            .map_err(|e| BlobStoreError::Read(format!("GET {key} body: {e}")))?;
        Ok(Some(bytes.to_vec()))
    }

    async fn head_object(&self, key: &str) -> Result<bool, BlobStoreError> {
        let url = self.object_url(Some(key), &[])?;
        let response = self.send(Method::HEAD, url, Vec::new(), None).await?;
        match response.status() {
            s if s.is_success() => Ok(true),
            StatusCode::NOT_FOUND => Ok(false),
            s => Err(BlobStoreError::Read(format!("HEAD {key} returned {s}"))),
        }
    }

    /// S3 DELETE succeeds on absent keys, so existence is checked first.
    async fn remove_object(&self, key: &str) -> RemoveOutcome {
        if !self.head_object(key).await? {
            return Ok(false);
        }
        let url = self.object_url(Some(key), &[])?;
        let response = self.send(Method::DELETE, url, Vec::new(), None).await?;
        let status = response.status();
        if status.is_success() || status == StatusCode::NOT_FOUND {
            return Ok(true);
        }
        let text = response.text().await.unwrap_or_default();
        Err(BlobStoreError::Write(format!(
            "DELETE {key} returned {status}: {text}"
        )))
    }

    async fn bucket_exists(&self) -> Result<bool, BlobStoreError> {
        let url = self.object_url(None, &[])?;
        let response = self.send(Method::HEAD, url, Vec::new(), None).await?;
        match response.status() {
            s if s.is_success() => Ok(true),
            StatusCode::NOT_FOUND => Ok(false),
            s => Err(BlobStoreError::Unavailable(format!(
                "HEAD bucket {} returned {s}",
                self.bucket
            ))),
        }
    }

    async fn list_page(&self, token: Option<&str>) -> Result<ListPage, BlobStoreError> {
        let mut query = vec![("list-type", "2")];
        if let Some(token) = token {
            query.push(("continuation-token", token));
        }
        let url = self.object_url(None, &query)?;
        let response = self.send(Method::GET, url, Vec::new(), None).await?;
        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(BlobStoreError::Read(format!(
                "ListObjectsV2 returned {status}: {text}"
            )));
        }
        let body = response
            .text()
            .await
            .map_err(|e| BlobStoreError::Read(format!("ListObjectsV2 body: {e}")))?;
        parse_list_page(&body)
    }
}

#[async_trait]
impl BlobStore for S3BlobStore {
    fn backend(&self) -> BackendKind {
        BackendKind::S3
    }

    fn location(&self) -> String {
        format!("{}/{}", self.endpoint.as_str().trim_end_matches('/'), self.bucket)
    }

    async fn initialize(&self) -> Result<(), BlobStoreError> {
        if self.bucket_exists().await? {
            return Ok(());
        }
        let url = self.object_url(None, &[])?;
        let response = self.send(Method::PUT, url, Vec::new(), None).await?;
        let status = response.status();
        if status.is_success() {
            info!(bucket = %self.bucket, "Created storage bucket");
            return Ok(());
        }
        let text = response.text().await.unwrap_or_default();
        if text.contains("BucketAlreadyOwnedByYou") {
            return Ok(());
        }
        Err(BlobStoreError::Write(format!(
            "create bucket {} returned {status}: {text}",
            self.bucket
        )))
    }

    async fn store(
        &self,
        record_id: &str,
        ciphertext: &[u8],
        nonce: &[u8],
        tag: &[u8],
    ) -> Result<String, BlobStoreError> {
        validate_record_id(record_id)?;
        let sidecar = EnvelopeMetadata::new(nonce, tag).to_json()?;

        let ciphertext_key = BlobKeys::ciphertext(record_id);
        self.put_object(&ciphertext_key, ciphertext.to_vec(), "application/octet-stream")
            .await?;
        if let Err(e) = self
            .put_object(&BlobKeys::metadata(record_id), sidecar, "application/json")
            .await
        {
            return Err(match self.remove_object(&ciphertext_key).await {
                Ok(_) => e,
                Err(rollback) => BlobStoreError::PartialWrite {
                    record_id: record_id.to_string(),
                    reason: format!("{e}; rollback: {rollback}"),
                },
            });
        }

        debug!(record_id, bucket = %self.bucket, "Stored ciphertext in bucket");
        Ok(BlobKeys::s3_uri(&self.bucket, record_id))
    }

    async fn retrieve(&self, record_id: &str) -> Result<StoredEnvelope, BlobStoreError> {
        validate_record_id(record_id)?;

        let ciphertext_key = BlobKeys::ciphertext(record_id);
        let ciphertext = self
            .get_object(&ciphertext_key)
            .await?
            .ok_or_else(|| BlobStoreError::NotFound(format!("{record_id}: {ciphertext_key}")))?;

        let metadata_key = BlobKeys::metadata(record_id);
        let sidecar = self
            .get_object(&metadata_key)
            .await?
            .ok_or_else(|| BlobStoreError::NotFound(format!("{record_id}: {metadata_key}")))?;

        let (nonce, tag) = EnvelopeMetadata::from_json(&sidecar)?.decode()?;
        Ok(StoredEnvelope {
            ciphertext,
            nonce,
            tag,
        })
    }

    async fn delete(&self, record_id: &str) -> Result<(), BlobStoreError> {
        validate_record_id(record_id)?;
        let ciphertext = self.remove_object(&BlobKeys::ciphertext(record_id)).await;
        let metadata = self.remove_object(&BlobKeys::metadata(record_id)).await;
        combine_delete(record_id, ciphertext, metadata)
    }

    async fn health_check(&self) -> BlobHealth {
        let error = match self.bucket_exists().await {
            Ok(true) => None,
            Ok(false) => Some(format!("bucket {} does not exist", self.bucket)),
            Err(e) => Some(e.to_string()),
        };
        BlobHealth {
            healthy: error.is_none(),
            backend: BackendKind::S3,
            location: self.location(),
            error,
        }
    }

    async fn stats(&self) -> Result<BlobStats, BlobStoreError> {
        let mut stats = BlobStats {
            backend: BackendKind::S3,
            location: self.location(),
            total_files: 0,
            total_objects: 0,
            total_size: 0,
        };

        let mut token: Option<String> = None;
        loop {
            let page = self.list_page(token.as_deref()).await?;
            for (key, size) in &page.objects {
                stats.total_objects += 1;
                stats.total_size += size;
                if key.starts_with(CIPHERTEXT_PREFIX) && key.ends_with(CIPHERTEXT_EXTENSION) {
                    stats.total_files += 1;
                }
            }
            match page.next_token {
                Some(next) => token = Some(next),
                None => break,
            }
        }
        Ok(stats)
    }
}

#[derive(Default)]
struct ListEntry {
    key: Option<String>,
    size: String,
}

/// Parse a ListObjectsV2 body. Element names are matched on their local
/// part, so namespace prefixes and attributes are ignored.
fn parse_list_page(xml: &str) -> Result<ListPage, BlobStoreError> {
    let mut reader = Reader::from_str(xml);
    let mut page = ListPage::default();
    let mut path: Vec<String> = Vec::new();
    let mut entry = ListEntry::default();
    let mut truncated = String::new();
    let mut token = String::new();

    loop {
        let text = match reader.read_event() {
            Ok(XmlEvent::Start(ref e)) => {
                let tag = String::from_utf8_lossy(e.local_name().as_ref()).into_owned();
                if tag == "Contents" {
                    entry = ListEntry::default();
                }
                path.push(tag);
                continue;
            }
            Ok(XmlEvent::End(_)) => {
                let closed = path.pop();
                if closed.as_deref() == Some("Contents") {
                    let entry = std::mem::take(&mut entry);
                    let key = entry.key.ok_or_else(|| {
                        BlobStoreError::Read("ListObjectsV2 entry without Key".to_string())
                    })?;
                    let size = match entry.size.trim() {
                        "" => 0,
                        raw => raw.parse::<u64>().map_err(|e| {
                            BlobStoreError::Read(format!("ListObjectsV2 size of {key}: {e}"))
                        })?,
                    };
                    page.objects.push((key, size));
                }
                continue;
            }
            Ok(XmlEvent::Text(e)) => e
                .unescape()
                .map_err(|e| BlobStoreError::Read(format!("ListObjectsV2 text: {e}")))?
                .into_owned(),
            Ok(XmlEvent::CData(e)) => String::from_utf8_lossy(&e).into_owned(),
            Ok(XmlEvent::Eof) => break,
            Err(e) => {
                return Err(BlobStoreError::Read(format!(
                    "ListObjectsV2 body at byte {}: {e}",
                    reader.buffer_position()
                )))
            }
            Ok(_) => continue,
        };

        let parent = path.len().checked_sub(2).and_then(|i| path.get(i));
        match (parent.map(String::as_str), path.last().map(String::as_str)) {
            (Some("Contents"), Some("Key")) => {
                entry.key.get_or_insert_with(String::new).push_str(&text)
            }
            (Some("Contents"), Some("Size")) => entry.size.push_str(&text),
            (Some("ListBucketResult"), Some("IsTruncated")) => truncated.push_str(&text),
            (Some("ListBucketResult"), Some("NextContinuationToken")) => token.push_str(&text),
            _ => {}
        }
    }

    if truncated.trim() == "true" && !token.is_empty() {
        page.next_token = Some(token);
    }
    Ok(page)
}
