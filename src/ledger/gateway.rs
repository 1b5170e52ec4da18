// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Transport for named ledger transactions.
//!
//! `submit` goes through endorsement and ordering and changes state;
//! `evaluate` is a read against one peer. Both take the transaction name
//! and its string arguments and return the contract's string result.

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::debug;
use url::Url;

use super::LedgerError;

pub const IDENTITY_HEADER: &str = "X-Ledger-Identity";
pub const MSP_HEADER: &str = "X-Ledger-Msp";
pub const API_KEY_HEADER: &str = "X-Api-Key";

#[async_trait]
pub trait LedgerGateway: Send + Sync {
    /// State-changing transaction under `identity`.
    async fn submit(
        &self,
        identity: &str,
        function: &str,
        args: &[String],
    ) -> Result<String, LedgerError>;

    /// Read-only query under `identity`.
    async fn evaluate(
        &self,
        identity: &str,
        function: &str,
        args: &[String],
    ) -> Result<String, LedgerError>;
}

#[derive(Debug, Serialize)]
struct TransactionRequest<'a> {
    channel: &'a str,
    chaincode: &'a str,
    function: &'a str,
    args: &'a [String],
}

#[derive(Debug, Deserialize)]
struct TransactionResponse {
    result: String,
}

#[derive(Debug, Deserialize)]
struct GatewayErrorBody {
    error: String,
}

/// Ledger gateway reached over HTTP, one per organisation.
#[derive(Clone)]
pub struct HttpLedgerGateway {
    base_url: Url,
    channel: String,
    chaincode: String,
    msp_id: String,
    api_key: Option<String>,
    http: Client,
}

impl fmt::Debug for HttpLedgerGateway {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpLedgerGateway")
            .field("base_url", &self.base_url.as_str())
            .field("channel", &self.channel)
            .field("chaincode", &self.chaincode)
            .field("msp_id", &self.msp_id)
            .finish_non_exhaustive()
    }
}

impl HttpLedgerGateway {
    pub fn new(
        gateway_url: &str,
        channel: impl Into<String>,
        chaincode: impl Into<String>,
        msp_id: impl Into<String>,
        api_key: Option<String>,
        timeout: Duration,
    ) -> Result<Self, LedgerError> {
        let base_url = Url::parse(gateway_url)
            .map_err(|e| LedgerError::Registry(format!("invalid gateway url {gateway_url}: {e}")))?;
        let http = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| LedgerError::Registry(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            base_url,
            channel: channel.into(),
            chaincode: chaincode.into(),
            msp_id: msp_id.into(),
            api_key,
            http,
        })
    }

    fn endpoint(&self, mode: &str) -> String {
        format!(
            "{}/transactions/{mode}",
            self.base_url.as_str().trim_end_matches('/')
        )
    }

    async fn call(
        &self,
        mode: &str,
        identity: &str,
        function: &str,
        args: &[String],
    ) -> Result<String, LedgerError> {
        let body = TransactionRequest {
            channel: &self.channel,
            chaincode: &self.chaincode,
            function,
            args,
        };

        let mut request = self
            .http
            .post(self.endpoint(mode))
            .header(IDENTITY_HEADER, identity)
            .header(MSP_HEADER, &self.msp_id)
            .json(&body);
        if let Some(key) = &self.api_key {
            request = request.header(API_KEY_HEADER, key);
        }

        let response = request
            .send()
            .await
            .map_err(|e| LedgerError::Unavailable(format!("{mode} {function}: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            let reason = serde_json::from_str::<GatewayErrorBody>(&text)
                .map(|b| b.error)
                .unwrap_or(text);
            return Err(match status {
                StatusCode::SERVICE_UNAVAILABLE
                | StatusCode::BAD_GATEWAY
                | StatusCode::GATEWAY_TIMEOUT => {
                    LedgerError::Unavailable(format!("{function}: {reason}"))
                }
                _ => LedgerError::transaction(function, format!("{status}: {reason}")),
            });
        }

        let parsed: TransactionResponse = response
            .json()
            .await
            .map_err(|e| LedgerError::InvalidResponse(format!("{function}: {e}")))?;

        debug!(function, mode, channel = %self.channel, "Ledger call completed");
        Ok(parsed.result)
    }
}

#[async_trait]
impl LedgerGateway for HttpLedgerGateway {
    async fn submit(
        &self,
        identity: &str,
        function: &str,
        args: &[String],
    ) -> Result<String, LedgerError> {
        self.call("submit", identity, function, args).await
    }

    async fn evaluate(
        &self,
        identity: &str,
        function: &str,
        args: &[String],
    ) -> Result<String, LedgerError> {
        self.call("evaluate", identity, function, args).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use axum::extract::Path;
    use axum::http::HeaderMap;
    use axum::routing::post;
    use axum::{Json, Router};
    use serde_json::{json, Value};

    async fn spawn_fake_gateway() -> String {
        async fn handle(
            Path(mode): Path<String>,
            headers: HeaderMap,
            Json(body): Json<Value>,
        ) -> (StatusCode, Json<Value>) {
            if headers.get(API_KEY_HEADER).and_then(|v| v.to_str().ok()) != Some("k-1") {
                return (StatusCode::UNAUTHORIZED, Json(json!({"error": "bad api key"})));
            }
            let function = body["function"].as_str().unwrap_or_default();
            if function == "CreateRecord" && mode == "submit" && body["args"][0] == "slow" {
                return (
                    StatusCode::GATEWAY_TIMEOUT,
                    Json(json!({"error": "commit status not received"})),
                );
            }
            if function == "ReadRecord" && body["args"][0] == "missing" {
                return (
                    StatusCode::BAD_REQUEST,
                    Json(json!({"error": "The record missing does not exist"})),
                );
            }
            let identity = headers
                .get(IDENTITY_HEADER)
                .and_then(|v| v.to_str().ok())
                .unwrap_or_default();
            let echo = format!(
                "{mode}|{}|{}|{function}|{identity}|{}",
                body["channel"].as_str().unwrap_or_default(),
                body["chaincode"].as_str().unwrap_or_default(),
                body["args"].as_array().map(|a| a.len()).unwrap_or(0)
            );
            (StatusCode::OK, Json(json!({ "result": echo })))
        }

        let app = Router::new().route("/transactions/{mode}", post(handle));
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{addr}")
    }

    fn gateway(url: &str, api_key: Option<&str>) -> HttpLedgerGateway {
        HttpLedgerGateway::new(
            url,
            "mychannel",
            "cdmscontract",
            "Org1MSP",
            api_key.map(str::to_string),
            Duration::from_secs(5),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn posts_named_transactions() {
        let url = spawn_fake_gateway().await;
        let gw = gateway(&url, Some("k-1"));

        let result = gw
            .submit("AdminOrg1", "CreateRecord", &["{}".to_string()])
            .await
            .unwrap();
        assert_eq!(result, "submit|mychannel|cdmscontract|CreateRecord|AdminOrg1|1");

        let result = gw.evaluate("AdminOrg1", "ListAllRecords", &[]).await.unwrap();
        assert_eq!(result, "evaluate|mychannel|cdmscontract|ListAllRecords|AdminOrg1|0");
    }

    #[tokio::test]
    async fn contract_errors_surface_reason() {
        let url = spawn_fake_gateway().await;
        let gw = gateway(&url, Some("k-1"));

        let err = gw
            .evaluate("AdminOrg1", "ReadRecord", &["missing".to_string()])
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::LedgerTransactionFailure);
        assert!(err.to_string().contains("does not exist"));

        let err = gateway(&url, None)
            .evaluate("AdminOrg1", "ListAllRecords", &[])
            .await
            .unwrap_err();
        assert!(err.to_string().contains("bad api key"));
    }

    #[tokio::test]
    async fn gateway_timeout_is_not_a_rejection() {
        let url = spawn_fake_gateway().await;
        let err = gateway(&url, Some("k-1"))
            .submit("AdminOrg1", "CreateRecord", &["slow".to_string()])
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::Unavailable(ref reason) if reason.contains("commit status")));
    }

    #[tokio::test]
    async fn unreachable_gateway_is_unavailable() {
        let gw = gateway("http://127.0.0.1:1", None);
        let err = gw.evaluate("x", "ListAllRecords", &[]).await.unwrap_err();
        assert!(matches!(err, LedgerError::Unavailable(_)));
    }

    #[test]
    fn rejects_bad_url() {
        let err = HttpLedgerGateway::new("not a url", "c", "cc", "m", None, Duration::from_secs(1))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Configuration);
    }
}
