// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! HashiCorp Vault transit engine over HTTP.
//!
//! ## Endpoints
//!
//! | Operation | Request |
//! |-----------|---------|
//! | enable mount | `POST /v1/sys/mounts/<mount>` |
//! | create KEK | `POST /v1/<mount>/keys/<kek>` |
//! | rotation period | `POST /v1/<mount>/keys/<kek>/config` |
//! | rotate | `POST /v1/<mount>/keys/<kek>/rotate` |
//! | key info | `GET /v1/<mount>/keys/<kek>` |
//! | wrap | `POST /v1/<mount>/encrypt/<kek>` |
//! | unwrap | `POST /v1/<mount>/decrypt/<kek>` |
//! | rewrap | `POST /v1/<mount>/rewrap/<kek>` |
//! | health | `GET /v1/sys/health` |

use std::fmt;

use async_trait::async_trait;
use base64ct::{Base64, Encoding};
use reqwest::{Client, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::debug;
use url::Url;
use zeroize::Zeroizing;

use super::transit::{KmsHealth, TransitEngine};
use super::KmsError;
use crate::config::KmsConfig;

const TOKEN_HEADER: &str = "X-Vault-Token";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Operation {
    Admin,
    Encrypt,
    Decrypt,
    Rewrap,
}

#[derive(Debug, Deserialize)]
struct DataEnvelope<T> {
    data: T,
}

#[derive(Debug, Deserialize)]
struct CiphertextData {
    ciphertext: String,
}

#[derive(Debug, Deserialize)]
struct PlaintextData {
    plaintext: String,
}

#[derive(Debug, Deserialize)]
struct KeyData {
    latest_version: u32,
}

#[derive(Debug, Deserialize)]
struct HealthBody {
    initialized: Option<bool>,
    sealed: Option<bool>,
    standby: Option<bool>,
}

/// Vault transit client bound to one mount and KEK.
#[derive(Clone)]
pub struct VaultTransit {
    base_url: String,
    token: String,
    mount: String,
    key_name: String,
    http: Client,
}

impl fmt::Debug for VaultTransit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VaultTransit")
            .field("base_url", &self.base_url)
            .field("mount", &self.mount)
            .field("key_name", &self.key_name)
            .finish_non_exhaustive()
    }
}

impl VaultTransit {
    pub fn new(config: &KmsConfig) -> Result<Self, KmsError> {
        let parsed = Url::parse(&config.addr)
            .map_err(|e| KmsError::Request(format!("invalid KMS address {}: {e}", config.addr)))?;

        let http = Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| KmsError::Request(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            base_url: parsed.as_str().trim_end_matches('/').to_string(),
            token: config.token.clone(),
            mount: config.mount.clone(),
            key_name: config.key_name.clone(),
            http,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/v1/{path}", self.base_url)
    }

    fn key_path(&self, action: &str) -> String {
        format!("{}/{action}/{}", self.mount, self.key_name)
    }

    async fn post(&self, path: &str, body: &Value) -> Result<Response, KmsError> {
        self.http
            .post(self.url(path))
            .header(TOKEN_HEADER, &self.token)
            .json(body)
            .send()
            .await
            .map_err(|e| KmsError::Unavailable(format!("POST {path}: {e}")))
    }

    async fn get(&self, path: &str) -> Result<Response, KmsError> {
        self.http
            .get(self.url(path))
            .header(TOKEN_HEADER, &self.token)
            .send()
            .await
            .map_err(|e| KmsError::Unavailable(format!("GET {path}: {e}")))
    }

    /// POST and require a 2xx, treating "already ..." rejections as success.
    async fn post_idempotent(&self, path: &str, body: &Value) -> Result<(), KmsError> {
        let response = self.post(path, body).await?;
        let status = response.status();
        if status.is_success() {
            return Ok(());
        }
        let text = response.text().await.unwrap_or_default();
        if is_already_present(status, &text) {
            debug!(path, "KMS object already present");
            return Ok(());
        }
        Err(classify_failure(
            Operation::Admin,
            status,
            format!("POST {path} returned {status}: {text}"),
        ))
    }

    async fn post_data<T: DeserializeOwned>(
        &self,
        operation: Operation,
        path: &str,
        body: &Value,
    ) -> Result<T, KmsError> {
        let response = self.post(path, body).await?;
        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(classify_failure(
                operation,
                status,
                format!("POST {path} returned {status}: {text}"),
            ));
        }
        let envelope: DataEnvelope<T> = response
            .json()
            .await
            .map_err(|e| KmsError::InvalidResponse(format!("POST {path} invalid JSON: {e}")))?;
        Ok(envelope.data)
    }
}

#[async_trait]
impl TransitEngine for VaultTransit {
    fn mount(&self) -> &str {
        &self.mount
    }

    fn key_name(&self) -> &str {
        &self.key_name
    }

    async fn health(&self) -> Result<KmsHealth, KmsError> {
        let response = self.get("sys/health").await?;
        let status = response.status();
        let body: Option<HealthBody> = response.json().await.ok();
        Ok(health_from_response(status, body))
    }

    async fn enable_mount(&self) -> Result<(), KmsError> {
        let path = format!("sys/mounts/{}", self.mount);
        self.post_idempotent(&path, &json!({ "type": "transit" }))
            .await
    }

    async fn create_key(&self) -> Result<(), KmsError> {
        let path = format!("{}/keys/{}", self.mount, self.key_name);
        let body = json!({
            "type": "aes256-gcm96",
            "exportable": false,
            "allow_plaintext_backup": false,
            "derived": true,
        });
        self.post_idempotent(&path, &body).await
    }

    async fn configure_rotation(&self, period: &str) -> Result<(), KmsError> {
        let path = format!("{}/keys/{}/config", self.mount, self.key_name);
        self.post_idempotent(&path, &json!({ "auto_rotate_period": period }))
            .await
    }

    async fn rotate_key(&self) -> Result<(), KmsError> {
        let path = format!("{}/keys/{}/rotate", self.mount, self.key_name);
        let response = self.post(&path, &json!({})).await?;
        let status = response.status();
        if status.is_success() {
            return Ok(());
        }
        let text = response.text().await.unwrap_or_default();
        Err(classify_failure(
            Operation::Admin,
            status,
            format!("POST {path} returned {status}: {text}"),
        ))
    }

    async fn latest_version(&self) -> Result<u32, KmsError> {
        let path = format!("{}/keys/{}", self.mount, self.key_name);
        let response = self.get(&path).await?;
        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(classify_failure(
                Operation::Admin,
                status,
                format!("GET {path} returned {status}: {text}"),
            ));
        }
        let envelope: DataEnvelope<KeyData> = response
            .json()
            .await
            .map_err(|e| KmsError::InvalidResponse(format!("GET {path} invalid JSON: {e}")))?;
        Ok(envelope.data.latest_version)
    }

    async fn encrypt(&self, plaintext: &[u8], context: &[u8]) -> Result<String, KmsError> {
        let body = json!({
            "plaintext": Base64::encode_string(plaintext),
            "context": Base64::encode_string(context),
        });
        let data: CiphertextData = self
            .post_data(Operation::Encrypt, &self.key_path("encrypt"), &body)
            .await?;
        Ok(data.ciphertext)
    }

    async fn decrypt(
        &self,
        ciphertext: &str,
        context: &[u8],
    ) -> Result<Zeroizing<Vec<u8>>, KmsError> {
        let body = json!({
            "ciphertext": ciphertext,
            "context": Base64::encode_string(context),
        });
        let data: PlaintextData = self
            .post_data(Operation::Decrypt, &self.key_path("decrypt"), &body)
            .await?;
        let encoded = Zeroizing::new(data.plaintext);
        Base64::decode_vec(&encoded)
            .map(Zeroizing::new)
            .map_err(|e| KmsError::UnwrapFailure(format!("plaintext is not base64: {e}")))
    }

    async fn rewrap(&self, ciphertext: &str, context: &[u8]) -> Result<String, KmsError> {
        let body = json!({
            "ciphertext": ciphertext,
            "context": Base64::encode_string(context),
        });
        let data: CiphertextData = self
            .post_data(Operation::Rewrap, &self.key_path("rewrap"), &body)
            .await?;
        Ok(data.ciphertext)
    }
}

fn is_already_present(status: StatusCode, body: &str) -> bool {
    status == StatusCode::BAD_REQUEST && body.contains("already")
}

fn classify_failure(operation: Operation, status: StatusCode, message: String) -> KmsError {
    if status == StatusCode::SERVICE_UNAVAILABLE || message.contains("Vault is sealed") {
        return KmsError::Sealed(message);
    }
    match operation {
        Operation::Admin => KmsError::Request(message),
        Operation::Encrypt => KmsError::WrapFailure(message),
        Operation::Decrypt => KmsError::UnwrapFailure(message),
        Operation::Rewrap => KmsError::RewrapFailure(message),
    }
}

/// Map `/sys/health` status codes: 200 active, 429/472/473 standby,
/// 501 uninitialized, 503 sealed.
fn health_from_response(status: StatusCode, body: Option<HealthBody>) -> KmsHealth {
    let mut health = match status.as_u16() {
        200 => KmsHealth::active(),
        429 | 472 | 473 => KmsHealth {
            standby: true,
            ..KmsHealth::active()
        },
        501 => KmsHealth {
            initialized: false,
            sealed: true,
            standby: false,
        },
        _ => KmsHealth {
            initialized: true,
            sealed: true,
            standby: false,
        },
    };
    if let Some(body) = body {
        health.initialized = body.initialized.unwrap_or(health.initialized);
        health.sealed = body.sealed.unwrap_or(health.sealed);
        health.standby = body.standby.unwrap_or(health.standby);
    }
    health
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use axum::http::HeaderMap;
    use axum::routing::{get, post};
    use axum::{Json, Router};
    use std::time::Duration;

    const TOKEN: &str = "root-token";

    fn test_config(addr: &str) -> KmsConfig {
        KmsConfig {
            addr: addr.to_string(),
            token: TOKEN.to_string(),
            mount: "cdms-kms".to_string(),
            key_name: "master-kek".to_string(),
            rotation_period: "2160h".to_string(),
            request_timeout: Duration::from_secs(5),
        }
    }

    fn authorized(headers: &HeaderMap) -> bool {
        headers.get(TOKEN_HEADER).and_then(|v| v.to_str().ok()) == Some(TOKEN)
    }

    /// Fake transit that "wraps" by concatenating plaintext and context.
    async fn spawn_fake_vault(health_status: u16) -> String {
        let app = Router::new()
            .route(
                "/v1/sys/mounts/cdms-kms",
                post(|| async {
                    (
                        StatusCode::BAD_REQUEST,
                        Json(json!({ "errors": ["path is already in use at cdms-kms/"] })),
                    )
                }),
            )
            .route(
                "/v1/cdms-kms/encrypt/master-kek",
                post(|headers: HeaderMap, Json(body): Json<Value>| async move {
                    if !authorized(&headers) {
                        return (StatusCode::FORBIDDEN, Json(json!({ "errors": ["permission denied"] })));
                    }
                    let plaintext = body["plaintext"].as_str().unwrap_or_default();
                    let context = body["context"].as_str().unwrap_or_default();
                    (
                        StatusCode::OK,
                        Json(json!({ "data": { "ciphertext": format!("vault:v1:{plaintext}.{context}") } })),
                    )
                }),
            )
            .route(
                "/v1/cdms-kms/decrypt/master-kek",
                post(|Json(body): Json<Value>| async move {
                    let ciphertext = body["ciphertext"].as_str().unwrap_or_default();
                    let context = body["context"].as_str().unwrap_or_default();
                    let inner = ciphertext.trim_start_matches("vault:v1:");
                    match inner.split_once('.') {
                        Some((plaintext, bound)) if bound == context => (
                            StatusCode::OK,
                            Json(json!({ "data": { "plaintext": plaintext } })),
                        ),
                        _ => (
                            StatusCode::BAD_REQUEST,
                            Json(json!({ "errors": ["cipher: message authentication failed"] })),
                        ),
                    }
                }),
            )
            .route(
                "/v1/sys/health",
                get(move || async move {
                    (
                        StatusCode::from_u16(health_status).unwrap(),
                        Json(json!({ "initialized": true, "sealed": health_status == 503, "standby": false })),
                    )
                }),
            );

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{addr}")
    }

    #[test]
    fn health_codes_map_to_state() {
        assert!(health_from_response(StatusCode::OK, None).is_ready());

        let standby = health_from_response(StatusCode::TOO_MANY_REQUESTS, None);
        assert!(standby.standby);
        assert!(standby.is_ready());

        let uninit = health_from_response(StatusCode::NOT_IMPLEMENTED, None);
        assert!(!uninit.initialized);
        assert!(!uninit.is_ready());

        let sealed = health_from_response(StatusCode::SERVICE_UNAVAILABLE, None);
        assert!(sealed.sealed);
        assert!(!sealed.is_ready());
    }

    #[test]
    fn failures_classify_by_operation() {
        let wrap = classify_failure(Operation::Encrypt, StatusCode::BAD_REQUEST, "x".into());
        assert_eq!(wrap.kind(), ErrorKind::KeyWrapFailure);

        let unwrap = classify_failure(Operation::Decrypt, StatusCode::BAD_REQUEST, "x".into());
        assert_eq!(unwrap.kind(), ErrorKind::KeyUnwrapFailure);

        let sealed = classify_failure(Operation::Decrypt, StatusCode::SERVICE_UNAVAILABLE, "x".into());
        assert_eq!(sealed.kind(), ErrorKind::KmsSealed);

        let sealed_body = classify_failure(
            Operation::Admin,
            StatusCode::BAD_REQUEST,
            "Vault is sealed".into(),
        );
        assert_eq!(sealed_body.kind(), ErrorKind::KmsSealed);
    }

    #[test]
    fn already_in_use_is_success() {
        assert!(is_already_present(
            StatusCode::BAD_REQUEST,
            r#"{"errors":["path is already in use at cdms-kms/"]}"#
        ));
        assert!(!is_already_present(StatusCode::FORBIDDEN, "already"));
    }

    #[test]
    fn rejects_invalid_address() {
        let err = VaultTransit::new(&test_config("not a url")).unwrap_err();
        assert!(matches!(err, KmsError::Request(_)));
    }

    #[tokio::test]
    async fn wraps_and_unwraps_against_http_endpoint() {
        let addr = spawn_fake_vault(200).await;
        let vault = VaultTransit::new(&test_config(&addr)).unwrap();

        vault.enable_mount().await.unwrap();

        let wrapped = vault.encrypt(b"0123456789abcdef", b"record-a").await.unwrap();
        assert!(wrapped.starts_with("vault:v1:"));

        let plaintext = vault.decrypt(&wrapped, b"record-a").await.unwrap();
        assert_eq!(plaintext.as_slice(), b"0123456789abcdef");

        let err = vault.decrypt(&wrapped, b"record-b").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::KeyUnwrapFailure);
    }

    #[tokio::test]
    async fn bad_token_is_wrap_failure() {
        let addr = spawn_fake_vault(200).await;
        let mut config = test_config(&addr);
        config.token = "wrong".to_string();
        let vault = VaultTransit::new(&config).unwrap();

        let err = vault.encrypt(b"k", b"r").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::KeyWrapFailure);
    }

    #[tokio::test]
    async fn sealed_health_is_reported() {
        let addr = spawn_fake_vault(503).await;
        let vault = VaultTransit::new(&test_config(&addr)).unwrap();
        let health = vault.health().await.unwrap();
        assert!(health.sealed);
        assert!(!health.is_ready());
    }

    #[tokio::test]
    async fn unreachable_vault_is_unavailable() {
        let vault = VaultTransit::new(&test_config("http://127.0.0.1:1")).unwrap();
        let err = vault.encrypt(b"k", b"r").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::KmsUnavailable);
    }
}
