//! Storage collaborator interface.
//!
//! Licenses, allow-list rows and audit records live in an external
//! relational store. The core only needs the queries below; connection
//! resilience belongs to the implementation, so errors here are surfaced
//! as [`IpWardenError::Storage`] without retry.

pub mod file;
pub mod memory;
pub mod models;

use crate::IpWardenError;
use models::{AllowedIp, AuditRecord, License, NewAllowedIp, NewAuditRecord};

/// Read access to licenses plus allow-list mutation.
pub trait LicenseStore: Send + Sync {
    /// Look up a license by its secret key.
    fn find_license_by_key(&self, license_key: &str) -> Result<Option<License>, IpWardenError>;

    /// Look up a license by id.
    fn find_license_by_id(&self, license_id: i64) -> Result<Option<License>, IpWardenError>;

    /// All allow-list rows of a license.
    fn allowed_ips_for_license(&self, license_id: i64) -> Result<Vec<AllowedIp>, IpWardenError>;

    /// One allow-list row, scoped to its license.
    fn find_allowed_ip(
        &self,
        license_id: i64,
        ip_id: i64,
    ) -> Result<Option<AllowedIp>, IpWardenError>;

    /// Insert an allow-list row.
    ///
    /// A duplicate `(license_id, ip_cidr)` pair must be reported as
    /// [`IpWardenError::AlreadyExists`].
    fn insert_allowed_ip(&self, new: NewAllowedIp) -> Result<AllowedIp, IpWardenError>;

    /// Delete an allow-list row. Returns whether a row was removed.
    fn delete_allowed_ip(&self, ip_id: i64) -> Result<bool, IpWardenError>;

    /// Every allow-list row of every license.
    fn all_allowed_ips(&self) -> Result<Vec<AllowedIp>, IpWardenError>;
}

/// Append-only sink for authorization decisions.
pub trait AuditRecorder: Send + Sync {
    /// Persist one decision record.
    fn record(&self, record: NewAuditRecord) -> Result<AuditRecord, IpWardenError>;
}
