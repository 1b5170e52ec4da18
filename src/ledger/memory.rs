// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! In-process ledger with the record contract's transaction semantics.
//!
//! Used for hermetic tests and local runs without a ledger network. State
//! lives behind a mutex; every committed write appends to the record's
//! history the way the real ledger keeps a key history.

use std::collections::{BTreeMap, HashSet};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::Utc;
use serde::Serialize;

use super::functions as f;
use super::gateway::LedgerGateway;
use super::types::{AuditEntry, HistoryEntry, Record, RecordStatus};
use super::LedgerError;

#[derive(Default)]
struct LedgerState {
    records: BTreeMap<String, Record>,
    history: BTreeMap<String, Vec<HistoryEntry>>,
    policies: BTreeMap<String, serde_json::Value>,
    audits: Vec<AuditEntry>,
    tx_counter: u64,
}

impl LedgerState {
    fn next_tx_id(&mut self) -> String {
        self.tx_counter += 1;
        format!("tx-{:08}", self.tx_counter)
    }

    fn push_history(&mut self, record_id: &str, value: Option<Record>, is_delete: bool) {
        let tx_id = self.next_tx_id();
        self.history
            .entry(record_id.to_string())
            .or_default()
            .push(HistoryEntry {
                tx_id,
                timestamp: Some(Utc::now()),
                is_delete,
                value,
            });
    }
}

#[derive(Default)]
pub struct MemoryLedger {
    state: Mutex<LedgerState>,
    failing: Mutex<HashSet<String>>,
}

impl MemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every call to `function` fail until [`Self::clear_failures`].
    pub fn fail_function(&self, function: &str) {
        lock(&self.failing).insert(function.to_string());
    }

    pub fn clear_failures(&self) {
        lock(&self.failing).clear();
    }

    /// Direct view of a stored record, bypassing the contract.
    pub fn record(&self, record_id: &str) -> Option<Record> {
        lock(&self.state).records.get(record_id).cloned()
    }

    pub fn record_count(&self) -> usize {
        lock(&self.state).records.len()
    }

    fn dispatch(&self, identity: &str, function: &str, args: &[String]) -> Result<String, LedgerError> {
        if lock(&self.failing).contains(function) {
            return Err(LedgerError::transaction(function, "injected failure"));
        }

        let mut state = lock(&self.state);
        match function {
            f::CREATE_RECORD => {
                let mut record: Record = parse(function, arg(function, args, 0)?)?;
                if state.records.contains_key(&record.record_id) {
                    return Err(LedgerError::transaction(
                        function,
                        format!("The record {} already exists", record.record_id),
                    ));
                }
                let now = Utc::now();
                record.created_at.get_or_insert(now);
                record.updated_at = Some(now);
                state.push_history(&record.record_id, Some(record.clone()), false);
                let id = record.record_id.clone();
                state.records.insert(id, record.clone());
                to_json(function, &record)
            }
            f::READ_RECORD => {
                let id = arg(function, args, 0)?;
                let record = state
                    .records
                    .get(id)
                    .ok_or_else(|| not_exists(function, id))?;
                to_json(function, record)
            }
            f::UPDATE_RECORD => {
                let id = arg(function, args, 0)?.to_string();
                let mut update: Record = parse(function, arg(function, args, 1)?)?;
                let existing = state
                    .records
                    .get(&id)
                    .ok_or_else(|| not_exists(function, &id))?;
                if update.record_id != existing.record_id
                    || update.case_id != existing.case_id
                    || update.file_hash != existing.file_hash
                {
                    return Err(LedgerError::transaction(
                        function,
                        "record_id, case_id and file_hash are immutable",
                    ));
                }
                update.created_at = existing.created_at;
                update.updated_at = Some(Utc::now());
                state.push_history(&id, Some(update.clone()), false);
                state.records.insert(id, update.clone());
                to_json(function, &update)
            }
            f::DELETE_RECORD => {
                let id = arg(function, args, 0)?.to_string();
                let record = state
                    .records
                    .get_mut(&id)
                    .ok_or_else(|| not_exists(function, &id))?;
                record.status = RecordStatus::Deleted;
                record.updated_at = Some(Utc::now());
                let snapshot = record.clone();
                state.push_history(&id, Some(snapshot), true);
                Ok(String::new())
            }
            f::QUERY_RECORDS_BY_CASE => {
                let case_id = arg(function, args, 0)?;
                let matches: Vec<&Record> = state
                    .records
                    .values()
                    .filter(|r| r.case_id == case_id)
                    .collect();
                to_json(function, &matches)
            }
            f::LIST_ALL_RECORDS => {
                let all: Vec<&Record> = state.records.values().collect();
                to_json(function, &all)
            }
            f::GET_RECORD_HISTORY => {
                let id = arg(function, args, 0)?;
                let history = state.history.get(id).cloned().unwrap_or_default();
                to_json(function, &history)
            }
            f::CREATE_POLICY => {
                let id = arg(function, args, 0)?.to_string();
                let body: serde_json::Value = parse(function, arg(function, args, 1)?)?;
                if state.policies.contains_key(&id) {
                    return Err(LedgerError::transaction(
                        function,
                        format!("The policy {id} already exists"),
                    ));
                }
                state.policies.insert(id, body.clone());
                to_json(function, &body)
            }
            f::UPDATE_POLICY => {
                let id = arg(function, args, 0)?.to_string();
                let body: serde_json::Value = parse(function, arg(function, args, 1)?)?;
                if !state.policies.contains_key(&id) {
                    return Err(LedgerError::transaction(
                        function,
                        format!("The policy {id} does not exist"),
                    ));
                }
                state.policies.insert(id, body.clone());
                to_json(function, &body)
            }
            f::GET_POLICY => {
                let id = arg(function, args, 0)?;
                let body = state.policies.get(id).ok_or_else(|| {
                    LedgerError::transaction(function, format!("The policy {id} does not exist"))
                })?;
                to_json(function, body)
            }
            f::LIST_ALL_POLICIES => {
                let all: Vec<&serde_json::Value> = state.policies.values().collect();
                to_json(function, &all)
            }
            f::ADD_AUDIT => {
                let entry = AuditEntry {
                    audit_id: state.next_tx_id(),
                    record_id: arg(function, args, 0)?.to_string(),
                    user_id: identity.to_string(),
                    org: String::new(),
                    action: arg(function, args, 1)?.to_string(),
                    details: args.get(2).cloned().unwrap_or_default(),
                    timestamp: Some(Utc::now()),
                    ip_address: String::new(),
                };
                state.audits.push(entry.clone());
                to_json(function, &entry)
            }
            f::GET_AUDIT_TRAIL => {
                let id = arg(function, args, 0)?;
                let trail: Vec<&AuditEntry> =
                    state.audits.iter().filter(|a| a.record_id == id).collect();
                to_json(function, &trail)
            }
            other => Err(LedgerError::transaction(
                other,
                format!("function {other} not found in contract"),
            )),
        }
    }
}

#[async_trait]
impl LedgerGateway for MemoryLedger {
    async fn submit(
        &self,
        identity: &str,
        function: &str,
        args: &[String],
    ) -> Result<String, LedgerError> {
        self.dispatch(identity, function, args)
    }

    async fn evaluate(
        &self,
        identity: &str,
        function: &str,
        args: &[String],
    ) -> Result<String, LedgerError> {
        self.dispatch(identity, function, args)
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn arg<'a>(function: &str, args: &'a [String], index: usize) -> Result<&'a str, LedgerError> {
    args.get(index)
        .map(String::as_str)
        .ok_or_else(|| LedgerError::transaction(function, format!("missing argument {index}")))
}

fn parse<T: serde::de::DeserializeOwned>(function: &str, raw: &str) -> Result<T, LedgerError> {
    serde_json::from_str(raw)
        .map_err(|e| LedgerError::transaction(function, format!("invalid JSON argument: {e}")))
}

fn to_json<T: Serialize + ?Sized>(function: &str, value: &T) -> Result<String, LedgerError> {
    serde_json::to_string(value)
        .map_err(|e| LedgerError::transaction(function, format!("encode result: {e}")))
}

fn not_exists(function: &str, record_id: &str) -> LedgerError {
    LedgerError::transaction(function, format!("The record {record_id} does not exist"))
}
