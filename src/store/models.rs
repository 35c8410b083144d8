//! Rows read from and written to the storage collaborator.

use crate::authz::decision::ReasonCode;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A license.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct License {
    /// Row id; also the owner reference on the device.
    pub id: i64,

    /// Optional display name.
    pub name: Option<String>,

    /// Unique secret key.
    pub license_key: String,

    /// Switched-off licenses are denied before any other check.
    pub active: bool,

    /// Creation time.
    pub created_at: DateTime<Utc>,

    /// Expiry time, if the license expires.
    pub expires_at: Option<DateTime<Utc>>,
}

impl License {
    /// Whether the expiry is strictly before `now`.
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|expiry| expiry < now)
    }
}

/// One allow-list entry of a license.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AllowedIp {
    /// Row id.
    pub id: i64,

    /// Owning license.
    pub license_id: i64,

    /// Exact address or CIDR block, as entered.
    pub ip_cidr: String,

    /// Optional note.
    pub note: Option<String>,

    /// Creation time.
    pub created_at: DateTime<Utc>,
}

/// Allow-list row to insert.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewAllowedIp {
    /// Owning license.
    pub license_id: i64,

    /// Exact address or CIDR block.
    pub ip_cidr: String,

    /// Optional note.
    pub note: Option<String>,
}

/// Audit record to append.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewAuditRecord {
    /// License key verbatim, even when it resolves to nothing.
    pub license_key: String,

    /// Address the request claimed.
    pub request_ip: String,

    /// Caller-supplied machine identifier.
    pub machine_id: Option<String>,

    /// Decision reason.
    pub result: ReasonCode,

    /// Full inbound payload.
    pub raw_request: serde_json::Value,
}

/// Persisted, immutable audit record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditRecord {
    /// Row id.
    pub id: i64,

    /// License key verbatim.
    pub license_key: String,

    /// Address the request claimed.
    pub request_ip: String,

    /// Caller-supplied machine identifier.
    pub machine_id: Option<String>,

    /// Decision reason.
    pub result: ReasonCode,

    /// Full inbound payload.
    pub raw_request: serde_json::Value,

    /// When the record was written.
    pub created_at: DateTime<Utc>,
}

impl AuditRecord {
    /// Stamp a new record with its id and creation time.
    pub fn from_new(id: i64, record: NewAuditRecord, created_at: DateTime<Utc>) -> Self {
        Self {
            id,
            license_key: record.license_key,
            request_ip: record.request_ip,
            machine_id: record.machine_id,
            result: record.result,
            raw_request: record.raw_request,
            created_at,
        }
    }
}
