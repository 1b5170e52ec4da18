// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Local audit trail for pipeline operations.
//!
//! Complements the ledger's own audit entries with events the ledger never
//! sees (integrity failures, compensations, reaped orphans). Events are
//! appended to a daily JSONL file under the data directory.

use std::fs::{self, OpenOptions};
use std::io::Write;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use super::paths::DataPaths;

#[derive(Debug, thiserror::Error)]
pub enum AuditError {
    #[error("audit io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("audit serialization error: {0}")]
    Serialization(String),
}

pub type AuditResult<T> = Result<T, AuditError>;

/// Types of auditable events.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AuditEventType {
    // Record events
    RecordUploaded,
    RecordDownloaded,
    RecordPurged,
    IntegrityFailure,

    // Key events
    KekRotated,
    RecordRewrapped,

    // Recovery events
    UploadCompensated,
    OrphanReaped,
}

/// An audit log entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEvent {
    pub event_id: String,
    pub timestamp: DateTime<Utc>,
    pub event_type: AuditEventType,
    /// Acting user (email or admin identity).
    pub user_id: Option<String>,
    pub org: Option<String>,
    /// Record id the event concerns.
    pub resource_id: Option<String>,
    pub details: Option<serde_json::Value>,
    pub success: bool,
    pub error: Option<String>,
}

impl AuditEvent {
    pub fn new(event_type: AuditEventType) -> Self {
        Self {
            event_id: uuid::Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
            event_type,
            user_id: None,
            org: None,
            resource_id: None,
            details: None,
            success: true,
            error: None,
        }
    }

    pub fn with_user(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    pub fn with_org(mut self, org: impl Into<String>) -> Self {
        self.org = Some(org.into());
        self
    }

    pub fn with_resource(mut self, record_id: impl Into<String>) -> Self {
        self.resource_id = Some(record_id.into());
        self
    }

    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }

    /// Mark as failed with error message.
    pub fn failed(mut self, error: impl Into<String>) -> Self {
        self.success = false;
        self.error = Some(error.into());
        self
    }
}

/// Append-only JSONL audit log, one file per UTC day.
#[derive(Debug, Clone)]
pub struct AuditLog {
    paths: DataPaths,
}

impl AuditLog {
    pub fn new(paths: DataPaths) -> Self {
        Self { paths }
    }

    pub fn log(&self, event: &AuditEvent) -> AuditResult<()> {
        let date = event.timestamp.format("%Y-%m-%d").to_string();
        fs::create_dir_all(self.paths.audit_date_dir(&date))?;

        let mut line = serde_json::to_vec(event)
            .map_err(|e| AuditError::Serialization(format!("encode audit event: {e}")))?;
        line.push(b'\n');

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.paths.audit_events_file(&date))?;
        file.write_all(&line)?;
        Ok(())
    }

    /// Events for one `YYYY-MM-DD` day. Missing days are empty.
    pub fn read_events(&self, date: &str) -> AuditResult<Vec<AuditEvent>> {
        let path = self.paths.audit_events_file(date);
        let content = match fs::read_to_string(&path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        content
            .lines()
            .filter(|line| !line.trim().is_empty())
            .map(|line| {
                serde_json::from_str(line)
                    .map_err(|e| AuditError::Serialization(format!("decode audit event: {e}")))
            })
            .collect()
    }

    /// Events for an inclusive date range.
    pub fn read_events_range(&self, start_date: &str, end_date: &str) -> AuditResult<Vec<AuditEvent>> {
        let start = NaiveDate::parse_from_str(start_date, "%Y-%m-%d")
            .map_err(|e| AuditError::Serialization(format!("invalid start date: {e}")))?;
        let end = NaiveDate::parse_from_str(end_date, "%Y-%m-%d")
            .map_err(|e| AuditError::Serialization(format!("invalid end date: {e}")))?;

        let mut all_events = Vec::new();
        let mut current = start;
        while current <= end {
            all_events.extend(self.read_events(&current.format("%Y-%m-%d").to_string())?);
            current = current
                .succ_opt()
                .ok_or_else(|| AuditError::Serialization("date overflow".to_string()))?;
        }
        Ok(all_events)
    }

    pub fn search_by_resource(&self, record_id: &str, date: &str) -> AuditResult<Vec<AuditEvent>> {
        Ok(self
            .read_events(date)?
            .into_iter()
            .filter(|e| e.resource_id.as_deref() == Some(record_id))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn setup() -> (TempDir, AuditLog) {
        let temp = TempDir::new().unwrap();
        let log = AuditLog::new(DataPaths::new(temp.path()));
        (temp, log)
    }

    fn today() -> String {
        Utc::now().format("%Y-%m-%d").to_string()
    }

    #[test]
    fn create_audit_event() {
        let event = AuditEvent::new(AuditEventType::IntegrityFailure)
            .with_user("officer@org1.example.com")
            .with_org("Org1")
            .with_resource("rec-1")
            .failed("hash mismatch");

        assert_eq!(event.event_type, AuditEventType::IntegrityFailure);
        assert_eq!(event.resource_id.as_deref(), Some("rec-1"));
        assert!(!event.success);
    }

    #[test]
    fn log_and_read_events() {
        let (_temp, log) = setup();
        log.log(&AuditEvent::new(AuditEventType::RecordUploaded).with_resource("rec-1"))
            .unwrap();
        log.log(&AuditEvent::new(AuditEventType::RecordDownloaded).with_resource("rec-1"))
            .unwrap();
        log.log(&AuditEvent::new(AuditEventType::RecordUploaded).with_resource("rec-2"))
            .unwrap();

        let events = log.read_events(&today()).unwrap();
        assert_eq!(events.len(), 3);
        assert_eq!(events[1].event_type, AuditEventType::RecordDownloaded);

        let rec1 = log.search_by_resource("rec-1", &today()).unwrap();
        assert_eq!(rec1.len(), 2);
    }

    #[test]
    fn missing_day_is_empty() {
        let (_temp, log) = setup();
        assert!(log.read_events("2001-01-01").unwrap().is_empty());
    }

    #[test]
    fn range_spans_days() {
        let (_temp, log) = setup();
        log.log(&AuditEvent::new(AuditEventType::KekRotated)).unwrap();

        let yesterday = (Utc::now() - chrono::Duration::days(1))
            .format("%Y-%m-%d")
            .to_string();
        let events = log.read_events_range(&yesterday, &today()).unwrap();
        assert_eq!(events.len(), 1);

        assert!(log.read_events_range("not-a-date", &today()).is_err());
    }
}
