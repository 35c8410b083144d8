//! In-process store.
//!
//! Implements both [`LicenseStore`] and [`AuditRecorder`] over a single
//! lock. Used for tests and for embedding without a database.

use crate::clock::{Clock, SystemClock};
use crate::store::models::{AllowedIp, AuditRecord, License, NewAllowedIp, NewAuditRecord};
use crate::store::{AuditRecorder, LicenseStore};
use crate::IpWardenError;
use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

#[derive(Default)]
struct Tables {
    licenses: Vec<License>,
    allowed_ips: Vec<AllowedIp>,
    audit: Vec<AuditRecord>,
    next_license_id: i64,
    next_ip_id: i64,
    next_audit_id: i64,
}

/// Thread-safe in-memory store.
pub struct MemoryStore {
    tables: RwLock<Tables>,
    clock: Arc<dyn Clock>,
    unavailable: AtomicBool,
    audit_unavailable: AtomicBool,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    /// Empty store stamped with wall-clock time.
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    /// Empty store stamped with the given clock.
    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            tables: RwLock::new(Tables::default()),
            clock,
            unavailable: AtomicBool::new(false),
            audit_unavailable: AtomicBool::new(false),
        }
    }

    /// Simulate the store being down: every query fails.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Simulate audit writes failing while reads keep working.
    pub fn set_audit_unavailable(&self, unavailable: bool) {
        self.audit_unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Insert a license. Keys must be unique.
    pub fn insert_license(
        &self,
        name: Option<&str>,
        license_key: &str,
        active: bool,
        expires_at: Option<DateTime<Utc>>,
    ) -> Result<License, IpWardenError> {
        let mut tables = self.write()?;
        if tables.licenses.iter().any(|l| l.license_key == license_key) {
            return Err(IpWardenError::Storage(
                "License key already exists".to_string(),
            ));
        }
        tables.next_license_id += 1;
        let license = License {
            id: tables.next_license_id,
            name: name.map(String::from),
            license_key: license_key.to_string(),
            active,
            created_at: self.clock.now_utc(),
            expires_at,
        };
        tables.licenses.push(license.clone());
        Ok(license)
    }

    /// Switch a license on or off.
    pub fn set_active(&self, license_id: i64, active: bool) -> Result<(), IpWardenError> {
        self.update_license(license_id, |l| l.active = active)
    }

    /// Change or clear a license's expiry.
    pub fn set_expiry(
        &self,
        license_id: i64,
        expires_at: Option<DateTime<Utc>>,
    ) -> Result<(), IpWardenError> {
        self.update_license(license_id, |l| l.expires_at = expires_at)
    }

    /// Snapshot of the audit log, oldest first.
    pub fn audit_records(&self) -> Result<Vec<AuditRecord>, IpWardenError> {
        Ok(self.read()?.audit.clone())
    }

    fn update_license<F>(&self, license_id: i64, apply: F) -> Result<(), IpWardenError>
    where
        F: FnOnce(&mut License),
    {
        let mut tables = self.write()?;
        let license = tables
            .licenses
            .iter_mut()
            .find(|l| l.id == license_id)
            .ok_or(IpWardenError::LicenseNotFound { license_id })?;
        apply(license);
        Ok(())
    }

    fn check_available(&self) -> Result<(), IpWardenError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(IpWardenError::Storage("store unavailable".to_string()));
        }
        Ok(())
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, Tables>, IpWardenError> {
        self.check_available()?;
        self.tables
            .read()
            .map_err(|_| IpWardenError::Storage("memory store lock poisoned".to_string()))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, Tables>, IpWardenError> {
        self.check_available()?;
        self.tables
            .write()
            .map_err(|_| IpWardenError::Storage("memory store lock poisoned".to_string()))
    }
}

impl LicenseStore for MemoryStore {
    fn find_license_by_key(&self, license_key: &str) -> Result<Option<License>, IpWardenError> {
        Ok(self
            .read()?
            .licenses
            .iter()
            .find(|l| l.license_key == license_key)
            .cloned())
    }

    fn find_license_by_id(&self, license_id: i64) -> Result<Option<License>, IpWardenError> {
        Ok(self
            .read()?
            .licenses
            .iter()
            .find(|l| l.id == license_id)
            .cloned())
    }

    fn allowed_ips_for_license(&self, license_id: i64) -> Result<Vec<AllowedIp>, IpWardenError> {
        Ok(self
            .read()?
            .allowed_ips
            .iter()
            .filter(|ip| ip.license_id == license_id)
            .cloned()
            .collect())
    }

    fn find_allowed_ip(
        &self,
        license_id: i64,
        ip_id: i64,
    ) -> Result<Option<AllowedIp>, IpWardenError> {
        Ok(self
            .read()?
            .allowed_ips
            .iter()
            .find(|ip| ip.id == ip_id && ip.license_id == license_id)
            .cloned())
    }

    fn insert_allowed_ip(&self, new: NewAllowedIp) -> Result<AllowedIp, IpWardenError> {
        let mut tables = self.write()?;
        if !tables.licenses.iter().any(|l| l.id == new.license_id) {
            return Err(IpWardenError::LicenseNotFound {
                license_id: new.license_id,
            });
        }
        if tables
            .allowed_ips
            .iter()
            .any(|ip| ip.license_id == new.license_id && ip.ip_cidr == new.ip_cidr)
        {
            return Err(IpWardenError::AlreadyExists {
                license_id: new.license_id,
                ip_cidr: new.ip_cidr,
            });
        }
        tables.next_ip_id += 1;
        let row = AllowedIp {
            id: tables.next_ip_id,
            license_id: new.license_id,
            ip_cidr: new.ip_cidr,
            note: new.note,
            created_at: self.clock.now_utc(),
        };
        tables.allowed_ips.push(row.clone());
        Ok(row)
    }

    fn delete_allowed_ip(&self, ip_id: i64) -> Result<bool, IpWardenError> {
        let mut tables = self.write()?;
        let before = tables.allowed_ips.len();
        tables.allowed_ips.retain(|ip| ip.id != ip_id);
        Ok(tables.allowed_ips.len() != before)
    }

    fn all_allowed_ips(&self) -> Result<Vec<AllowedIp>, IpWardenError> {
        Ok(self.read()?.allowed_ips.clone())
    }
}

impl AuditRecorder for MemoryStore {
    fn record(&self, record: NewAuditRecord) -> Result<AuditRecord, IpWardenError> {
        if self.audit_unavailable.load(Ordering::SeqCst) {
            return Err(IpWardenError::Storage("audit log unavailable".to_string()));
        }
        let mut tables = self.write()?;
        tables.next_audit_id += 1;
        let stored = AuditRecord::from_new(tables.next_audit_id, record, self.clock.now_utc());
        tables.audit.push(stored.clone());
        Ok(stored)
    }
}
