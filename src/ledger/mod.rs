// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Ledger Module
//!
//! Thin facade over the external permissioned ledger. The ledger is an
//! opaque collaborator exposing named transactions with string arguments;
//! this module gives those transactions types and routes each call to the
//! caller's organisation.
//!
//! ## Structure
//!
//! - [`gateway`]: the `LedgerGateway` seam and its HTTP transport
//! - [`memory`]: in-process ledger with the same transaction semantics
//! - [`registry`]: organisation id/alias → connection profile + gateway
//! - [`client`]: `LedgerClient` and per-caller `LedgerSession`
//! - [`types`]: record, audit and history payloads
//!
//! The ledger is the authority for `file_hash` and `wrapped_key_ref`.

pub mod client;
pub mod gateway;
pub mod memory;
pub mod registry;
pub mod types;

pub use client::{LedgerClient, LedgerSession};
pub use gateway::{HttpLedgerGateway, LedgerGateway};
pub use memory::MemoryLedger;
pub use registry::{default_profiles, OrgConnection, OrgProfile, OrgRegistry};
pub use types::{
    AuditEntry, HistoryEntry, Record, RecordStatus, RecordSummary, UploadMetadata,
    DEFAULT_POLICY_ID, DEFAULT_RECORD_TYPE,
};

use crate::error::ErrorKind;

/// Transaction names understood by the record contract.
pub mod functions {
    pub const CREATE_RECORD: &str = "CreateRecord";
    pub const READ_RECORD: &str = "ReadRecord";
    pub const UPDATE_RECORD: &str = "UpdateRecord";
    pub const DELETE_RECORD: &str = "DeleteRecord";
    pub const QUERY_RECORDS_BY_CASE: &str = "QueryRecordsByCase";
    pub const LIST_ALL_RECORDS: &str = "ListAllRecords";
    pub const GET_RECORD_HISTORY: &str = "GetRecordHistory";

    pub const CREATE_POLICY: &str = "CreatePolicy";
    pub const GET_POLICY: &str = "GetPolicy";
    pub const UPDATE_POLICY: &str = "UpdatePolicy";
    pub const LIST_ALL_POLICIES: &str = "ListAllPolicies";

    pub const ADD_AUDIT: &str = "AddAudit";
    pub const GET_AUDIT_TRAIL: &str = "GetAuditTrail";
}

#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    #[error("unknown organization: {0}")]
    UnknownOrganization(String),

    #[error("ledger transaction {function} failed: {reason}")]
    Transaction { function: String, reason: String },

    #[error("record {0} does not exist on the ledger")]
    RecordNotFound(String),

    #[error("invalid ledger response: {0}")]
    InvalidResponse(String),

    #[error("ledger gateway unavailable: {0}")]
    Unavailable(String),

    #[error("organization registry: {0}")]
    Registry(String),
}

impl LedgerError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            LedgerError::UnknownOrganization(_) => ErrorKind::UnknownOrganization,
            LedgerError::Registry(_) => ErrorKind::Configuration,
            LedgerError::Transaction { .. }
            | LedgerError::RecordNotFound(_)
            | LedgerError::InvalidResponse(_)
            | LedgerError::Unavailable(_) => ErrorKind::LedgerTransactionFailure,
        }
    }

    pub(crate) fn transaction(function: &str, reason: impl Into<String>) -> Self {
        LedgerError::Transaction {
            function: function.to_string(),
            reason: reason.into(),
        }
    }
}
