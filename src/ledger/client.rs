// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Typed facade over the record contract.

use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde_json::Value;

use super::functions as f;
use super::gateway::LedgerGateway;
use super::registry::{OrgProfile, OrgRegistry};
use super::types::{AuditEntry, HistoryEntry, Record};
use super::LedgerError;
use crate::identity::ledger_identity;

/// Entry point: resolves the caller's organisation and identity.
#[derive(Debug, Clone)]
pub struct LedgerClient {
    registry: Arc<OrgRegistry>,
}

impl LedgerClient {
    pub fn new(registry: Arc<OrgRegistry>) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &OrgRegistry {
        &self.registry
    }

    /// Bind `actor` in `org` to that organisation's gateway.
    pub fn session(&self, actor: &str, org: &str) -> Result<LedgerSession, LedgerError> {
        let connection = self.registry.resolve(org)?;
        Ok(LedgerSession {
            identity: ledger_identity(actor, &connection.profile),
            profile: connection.profile.clone(),
            gateway: connection.gateway.clone(),
        })
    }
}

/// Ledger calls made as one identity of one organisation.
#[derive(Clone)]
pub struct LedgerSession {
    identity: String,
    profile: OrgProfile,
    gateway: Arc<dyn LedgerGateway>,
}

impl std::fmt::Debug for LedgerSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LedgerSession")
            .field("identity", &self.identity)
            .field("org", &self.profile.id)
            .finish_non_exhaustive()
    }
}

impl LedgerSession {
    pub fn identity(&self) -> &str {
        &self.identity
    }

    pub fn profile(&self) -> &OrgProfile {
        &self.profile
    }

    async fn submit(&self, function: &str, args: Vec<String>) -> Result<String, LedgerError> {
        self.gateway.submit(&self.identity, function, &args).await
    }

    async fn evaluate(&self, function: &str, args: Vec<String>) -> Result<String, LedgerError> {
        self.gateway.evaluate(&self.identity, function, &args).await
    }

    // =========================================================================
    // Records
    // =========================================================================

    pub async fn create_record(&self, record: &Record) -> Result<(), LedgerError> {
        let body = encode(f::CREATE_RECORD, record)?;
        self.submit(f::CREATE_RECORD, vec![body]).await?;
        Ok(())
    }

    /// `RecordNotFound` when the contract reports the id as absent.
    pub async fn read_record(&self, record_id: &str) -> Result<Record, LedgerError> {
        let raw = self
            .evaluate(f::READ_RECORD, vec![record_id.to_string()])
            .await
            .map_err(|e| match e {
                LedgerError::Transaction { ref reason, .. } if reason.contains("does not exist") => {
                    LedgerError::RecordNotFound(record_id.to_string())
                }
                other => other,
            })?;
        decode(f::READ_RECORD, &raw)
    }

    pub async fn query_records_by_case(&self, case_id: &str) -> Result<Vec<Record>, LedgerError> {
        let raw = self
            .evaluate(f::QUERY_RECORDS_BY_CASE, vec![case_id.to_string()])
            .await?;
        decode_list(f::QUERY_RECORDS_BY_CASE, &raw)
    }

    pub async fn list_all_records(&self) -> Result<Vec<Record>, LedgerError> {
        let raw = self.evaluate(f::LIST_ALL_RECORDS, Vec::new()).await?;
        decode_list(f::LIST_ALL_RECORDS, &raw)
    }

    /// Replace a record's mutable fields. The contract rejects changes to
    /// `record_id`, `case_id` and `file_hash`.
    pub async fn update_record(&self, record: &Record) -> Result<(), LedgerError> {
        let body = encode(f::UPDATE_RECORD, record)?;
        self.submit(f::UPDATE_RECORD, vec![record.record_id.clone(), body])
            .await?;
        Ok(())
    }

    /// Soft delete: the record stays on the ledger with status `Deleted`.
    pub async fn delete_record(&self, record_id: &str) -> Result<(), LedgerError> {
        self.submit(f::DELETE_RECORD, vec![record_id.to_string()])
            .await?;
        Ok(())
    }

    pub async fn record_history(&self, record_id: &str) -> Result<Vec<HistoryEntry>, LedgerError> {
        let raw = self
            .evaluate(f::GET_RECORD_HISTORY, vec![record_id.to_string()])
            .await?;
        decode_list(f::GET_RECORD_HISTORY, &raw)
    }

    // =========================================================================
    // Policies (opaque JSON bodies)
    // =========================================================================

    pub async fn create_policy(&self, policy_id: &str, policy: &Value) -> Result<(), LedgerError> {
        let body = encode(f::CREATE_POLICY, policy)?;
        self.submit(f::CREATE_POLICY, vec![policy_id.to_string(), body])
            .await?;
        Ok(())
    }

    pub async fn update_policy(&self, policy_id: &str, policy: &Value) -> Result<(), LedgerError> {
        let body = encode(f::UPDATE_POLICY, policy)?;
        self.submit(f::UPDATE_POLICY, vec![policy_id.to_string(), body])
            .await?;
        Ok(())
    }

    pub async fn get_policy(&self, policy_id: &str) -> Result<Value, LedgerError> {
        let raw = self
            .evaluate(f::GET_POLICY, vec![policy_id.to_string()])
            .await?;
        decode(f::GET_POLICY, &raw)
    }

    pub async fn list_policies(&self) -> Result<Vec<Value>, LedgerError> {
        let raw = self.evaluate(f::LIST_ALL_POLICIES, Vec::new()).await?;
        decode_list(f::LIST_ALL_POLICIES, &raw)
    }

    // =========================================================================
    // Audit trail
    // =========================================================================

    pub async fn add_audit(
        &self,
        record_id: &str,
        action: &str,
        details: &str,
    ) -> Result<(), LedgerError> {
        self.submit(
            f::ADD_AUDIT,
            vec![record_id.to_string(), action.to_string(), details.to_string()],
        )
        .await?;
        Ok(())
    }

    pub async fn get_audit_trail(&self, record_id: &str) -> Result<Vec<AuditEntry>, LedgerError> {
        let raw = self
            .evaluate(f::GET_AUDIT_TRAIL, vec![record_id.to_string()])
            .await?;
        decode_list(f::GET_AUDIT_TRAIL, &raw)
    }
}

fn encode<T: serde::Serialize + ?Sized>(function: &str, value: &T) -> Result<String, LedgerError> {
    serde_json::to_string(value)
        .map_err(|e| LedgerError::InvalidResponse(format!("{function}: encode argument: {e}")))
}

fn decode<T: DeserializeOwned>(function: &str, raw: &str) -> Result<T, LedgerError> {
    serde_json::from_str(raw).map_err(|e| LedgerError::InvalidResponse(format!("{function}: {e}")))
}

/// Contracts answer an empty string instead of `[]` when nothing matches.
fn decode_list<T: DeserializeOwned>(function: &str, raw: &str) -> Result<Vec<T>, LedgerError> {
    if raw.trim().is_empty() {
        return Ok(Vec::new());
    }
    decode(function, raw)
}
