//! Append-only JSON-lines audit log.
//!
//! Stores one [`AuditRecord`] per line under
//! `dirs::data_dir()/<namespace>/auth_log.jsonl`. Lines are only ever
//! appended; nothing rewrites or truncates the file.

use crate::authz::decision::ReasonCode;
use crate::clock::{Clock, SystemClock};
use crate::store::models::{AuditRecord, NewAuditRecord};
use crate::store::AuditRecorder;
use crate::IpWardenError;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

/// File name of the log inside its namespace directory.
pub const AUDIT_LOG_FILE: &str = "auth_log.jsonl";

/// Decision counts over a time window.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AuditSummary {
    /// All records in the log.
    pub total: u64,

    /// Start of the window.
    pub since: DateTime<Utc>,

    /// Records in the window, per result.
    pub by_result: BTreeMap<ReasonCode, u64>,
}

/// File-backed audit recorder.
pub struct FileAuditLog {
    path: PathBuf,
    /// Next record id; also serializes appends within the process.
    next_id: Mutex<i64>,
    clock: Arc<dyn Clock>,
}

impl FileAuditLog {
    /// Open the log for a namespace under the platform data directory.
    pub fn new(namespace: &str) -> Result<Self, IpWardenError> {
        let base_dir = dirs::data_dir()
            .ok_or_else(|| IpWardenError::AuditIo("Could not find data directory".to_string()))?;

        Self::with_path(base_dir.join(namespace).join(AUDIT_LOG_FILE))
    }

    /// Open the log at an explicit file path.
    pub fn with_path(path: PathBuf) -> Result<Self, IpWardenError> {
        Self::with_path_and_clock(path, Arc::new(SystemClock))
    }

    /// Open the log at an explicit path, stamping records with `clock`.
    pub fn with_path_and_clock(
        path: PathBuf,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, IpWardenError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .map_err(|e| IpWardenError::AuditIo(format!("Failed to create log dir: {}", e)))?;
        }

        let last_id = read_records(&path)?.last().map(|r| r.id).unwrap_or(0);

        Ok(Self {
            path,
            next_id: Mutex::new(last_id + 1),
            clock,
        })
    }

    /// Location of the log file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read every record, oldest first.
    pub fn load_all(&self) -> Result<Vec<AuditRecord>, IpWardenError> {
        read_records(&self.path)
    }

    /// Total count plus per-result counts for records at or after `since`.
    pub fn summarize(&self, since: DateTime<Utc>) -> Result<AuditSummary, IpWardenError> {
        let records = self.load_all()?;
        let mut by_result = BTreeMap::new();
        for record in records.iter().filter(|r| r.created_at >= since) {
            *by_result.entry(record.result).or_insert(0) += 1;
        }
        Ok(AuditSummary {
            total: records.len() as u64,
            since,
            by_result,
        })
    }

    /// [`summarize`](Self::summarize) over the last 24 hours.
    pub fn summarize_last_day(&self) -> Result<AuditSummary, IpWardenError> {
        self.summarize(self.clock.now_utc() - chrono::Duration::hours(24))
    }
}

impl AuditRecorder for FileAuditLog {
    fn record(&self, record: NewAuditRecord) -> Result<AuditRecord, IpWardenError> {
        let mut next_id = self
            .next_id
            .lock()
            .map_err(|_| IpWardenError::AuditIo("audit log lock poisoned".to_string()))?;

        let stored = AuditRecord::from_new(*next_id, record, self.clock.now_utc());
        let mut line = serde_json::to_string(&stored)
            .map_err(|e| IpWardenError::AuditIo(format!("Failed to serialize: {}", e)))?;
        line.push('\n');

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|e| IpWardenError::AuditIo(format!("Failed to open log: {}", e)))?;
        file.write_all(line.as_bytes())
            .map_err(|e| IpWardenError::AuditIo(format!("Failed to append: {}", e)))?;

        *next_id += 1;
        Ok(stored)
    }
}

fn read_records(path: &Path) -> Result<Vec<AuditRecord>, IpWardenError> {
    if !path.exists() {
        return Ok(Vec::new());
    }

    let contents = fs::read_to_string(path)
        .map_err(|e| IpWardenError::AuditIo(format!("Failed to read log: {}", e)))?;

    contents
        .lines()
        .filter(|line| !line.trim().is_empty())
        .enumerate()
        .map(|(n, line)| {
            serde_json::from_str(line).map_err(|e| {
                IpWardenError::AuditIo(format!("Corrupt log line {}: {}", n + 1, e))
            })
        })
        .collect()
}
