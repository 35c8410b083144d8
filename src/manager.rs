//! Access manager - the main public API for ipwarden.
//!
//! The `AccessManager` ties the pieces together:
//! - Authorization checks against the license store
//! - Allow-list mutations with best-effort device propagation
//! - Operator-triggered full resync of the device address list

use crate::address::matcher;
use crate::authz::decision::{AuthRequest, Decision};
use crate::authz::evaluator::Evaluator;
use crate::clock::{Clock, SystemClock};
use crate::config::DeviceConfig;
use crate::device::session::DeviceConnector;
use crate::reconcile::engine::{DesiredEntry, Reconciler, ResyncReport};
use crate::store::models::{AllowedIp, NewAllowedIp};
use crate::store::{AuditRecorder, LicenseStore};
use crate::IpWardenError;
use std::sync::Arc;

/// Main entry point for ipwarden.
///
/// Create one instance per process and share it; every call is independent.
pub struct AccessManager {
    store: Arc<dyn LicenseStore>,
    evaluator: Evaluator,
    reconciler: Reconciler,
}

impl AccessManager {
    /// Create an access manager using the system clock.
    ///
    /// # Errors
    /// Returns `ConfigError` if the device configuration does not validate.
    pub fn new(
        store: Arc<dyn LicenseStore>,
        audit: Arc<dyn AuditRecorder>,
        config: DeviceConfig,
        connector: Arc<dyn DeviceConnector>,
    ) -> Result<Self, IpWardenError> {
        Self::with_clock(store, audit, config, connector, Arc::new(SystemClock))
    }

    /// Create an access manager with a custom clock (for testing).
    #[cfg(any(test, feature = "test-seams"))]
    pub fn new_with_clock(
        store: Arc<dyn LicenseStore>,
        audit: Arc<dyn AuditRecorder>,
        config: DeviceConfig,
        connector: Arc<dyn DeviceConnector>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, IpWardenError> {
        Self::with_clock(store, audit, config, connector, clock)
    }

    fn with_clock(
        store: Arc<dyn LicenseStore>,
        audit: Arc<dyn AuditRecorder>,
        config: DeviceConfig,
        connector: Arc<dyn DeviceConnector>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, IpWardenError> {
        let reconciler = Reconciler::new(config, connector)?;
        let evaluator = Evaluator::with_clock(Arc::clone(&store), audit, clock);

        Ok(Self {
            store,
            evaluator,
            reconciler,
        })
    }

    /// Decide whether a license may be used from the request's address.
    ///
    /// # Errors
    /// Only storage failures; denials are `Ok` decisions.
    pub fn check(&self, request: &AuthRequest) -> Result<Decision, IpWardenError> {
        self.evaluator.evaluate(request)
    }

    /// Add an address or CIDR block to a license's allow-list.
    ///
    /// The result depends on the database alone. The device entry is added
    /// afterwards; a device failure is logged and does not fail the call.
    ///
    /// # Errors
    /// - `InvalidRequest` - empty address
    /// - `InvalidAddress` - not an IP address or CIDR block
    /// - `LicenseNotFound` - no such license
    /// - `AlreadyExists` - the address is already on this license's list
    pub fn add_allowed_ip(
        &self,
        license_id: i64,
        ip_cidr: &str,
        note: Option<&str>,
    ) -> Result<AllowedIp, IpWardenError> {
        let ip_cidr = ip_cidr.trim();
        if ip_cidr.is_empty() {
            return Err(IpWardenError::InvalidRequest(
                "ip_cidr is required".to_string(),
            ));
        }
        if !matcher::is_valid_ip_or_cidr(ip_cidr) {
            return Err(IpWardenError::InvalidAddress(ip_cidr.to_string()));
        }

        if self.store.find_license_by_id(license_id)?.is_none() {
            return Err(IpWardenError::LicenseNotFound { license_id });
        }

        let row = self.store.insert_allowed_ip(NewAllowedIp {
            license_id,
            ip_cidr: ip_cidr.to_string(),
            note: note.map(String::from),
        })?;

        if let Err(e) = self.reconciler.add_entry(&row.ip_cidr, license_id) {
            tracing::warn!(
                license_id,
                ip_cidr = %row.ip_cidr,
                error = %e,
                "device sync failed after adding allowed IP"
            );
        }

        Ok(row)
    }

    /// Remove an allow-list row and return it.
    ///
    /// Device removal is best-effort, as for [`AccessManager::add_allowed_ip`].
    ///
    /// # Errors
    /// `AllowedIpNotFound` if the row does not exist for this license.
    pub fn remove_allowed_ip(
        &self,
        license_id: i64,
        ip_id: i64,
    ) -> Result<AllowedIp, IpWardenError> {
        let row = self
            .store
            .find_allowed_ip(license_id, ip_id)?
            .ok_or(IpWardenError::AllowedIpNotFound { ip_id })?;

        // a concurrent delete can win between the lookup and here
        if !self.store.delete_allowed_ip(ip_id)? {
            return Err(IpWardenError::AllowedIpNotFound { ip_id });
        }

        if let Err(e) = self.reconciler.remove_entry(&row.ip_cidr, license_id) {
            tracing::warn!(
                license_id,
                ip_cidr = %row.ip_cidr,
                error = %e,
                "device sync failed after removing allowed IP"
            );
        }

        Ok(row)
    }

    /// Rebuild the device address list from every allow-list row.
    ///
    /// Unlike the mutation paths, device errors are returned: there is no
    /// database change to protect.
    pub fn resync_device(&self) -> Result<ResyncReport, IpWardenError> {
        let desired: Vec<DesiredEntry> = self
            .store
            .all_allowed_ips()?
            .iter()
            .map(DesiredEntry::from)
            .collect();

        self.reconciler.full_resync(&desired)
    }

    /// Allow-list rows for a license.
    pub fn allowed_ips(&self, license_id: i64) -> Result<Vec<AllowedIp>, IpWardenError> {
        self.store.allowed_ips_for_license(license_id)
    }

    /// The reconciler in use.
    pub fn reconciler(&self) -> &Reconciler {
        &self.reconciler
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::authz::decision::ReasonCode;
    use crate::clock::MockClock;
    use crate::config::RetryPolicy;
    use crate::device::memory::MemoryDevice;
    use crate::reconcile::engine::ADDRESS_LIST_MENU;
    use crate::store::memory::MemoryStore;

    const NOW: &str = "2025-06-15T12:00:00Z";

    fn device_config() -> DeviceConfig {
        DeviceConfig {
            enabled: true,
            host: "router.test".to_string(),
            user: "api".to_string(),
            password: "pw".to_string(),
            interface: "ether1".to_string(),
            public_nat_ip: "203.0.113.10".to_string(),
            ..DeviceConfig::disabled()
        }
        .with_retry(RetryPolicy::immediate(2))
    }

    struct Fixture {
        store: Arc<MemoryStore>,
        device: MemoryDevice,
        manager: AccessManager,
        license_id: i64,
    }

    fn fixture() -> Fixture {
        let clock: Arc<dyn Clock> = Arc::new(MockClock::from_rfc3339(NOW));
        let store = Arc::new(MemoryStore::with_clock(Arc::clone(&clock)));
        let device = MemoryDevice::new();
        let license_id = store.insert_license(Some("L1"), "KEY-1", true, None).unwrap().id;

        let manager = AccessManager::new_with_clock(
            store.clone(),
            store.clone(),
            device_config(),
            Arc::new(device.clone()),
            clock,
        )
        .unwrap();

        Fixture {
            store,
            device,
            manager,
            license_id,
        }
    }

    #[test]
    fn invalid_device_config_rejected() {
        let store = Arc::new(MemoryStore::new());
        let mut config = device_config();
        config.public_nat_ip = "not-an-ip".to_string();

        let result = AccessManager::new(
            store.clone(),
            store,
            config,
            Arc::new(MemoryDevice::new()),
        );
        assert!(matches!(result, Err(IpWardenError::ConfigError(_))));
    }

    #[test]
    fn add_then_check_allows() {
        let f = fixture();
        f.manager
            .add_allowed_ip(f.license_id, "198.51.100.0/24", Some("office"))
            .unwrap();

        let decision = f
            .manager
            .check(&AuthRequest::new("KEY-1", "198.51.100.42", None))
            .unwrap();
        assert!(decision.allowed);
        assert_eq!(decision.reason, ReasonCode::Allowed);
        assert_eq!(f.device.rows(ADDRESS_LIST_MENU).len(), 1);
    }

    #[test]
    fn add_rejects_bad_input_before_storage() {
        let f = fixture();
        assert!(matches!(
            f.manager.add_allowed_ip(f.license_id, "  ", None),
            Err(IpWardenError::InvalidRequest(_))
        ));
        assert!(matches!(
            f.manager.add_allowed_ip(f.license_id, "10.0.0.0/33", None),
            Err(IpWardenError::InvalidAddress(_))
        ));
        assert!(matches!(
            f.manager.add_allowed_ip(999, "10.0.0.1", None),
            Err(IpWardenError::LicenseNotFound { license_id: 999 })
        ));
        assert!(f.store.all_allowed_ips().unwrap().is_empty());
        assert_eq!(f.device.connect_attempts(), 0);
    }

    #[test]
    fn duplicate_add_leaves_device_alone() {
        let f = fixture();
        f.manager.add_allowed_ip(f.license_id, "10.0.0.1", None).unwrap();
        let attempts = f.device.connect_attempts();

        let err = f
            .manager
            .add_allowed_ip(f.license_id, "10.0.0.1", None)
            .unwrap_err();
        assert!(matches!(err, IpWardenError::AlreadyExists { .. }));
        assert_eq!(f.device.connect_attempts(), attempts);
        assert_eq!(f.device.rows(ADDRESS_LIST_MENU).len(), 1);
    }

    #[test]
    fn device_failure_does_not_fail_add() {
        let f = fixture();
        f.device.set_unreachable(true);

        let row = f.manager.add_allowed_ip(f.license_id, "10.0.0.1", None).unwrap();
        assert_eq!(row.ip_cidr, "10.0.0.1");
        assert_eq!(f.manager.allowed_ips(f.license_id).unwrap().len(), 1);
        assert_eq!(f.device.connect_attempts(), 2);
    }

    #[test]
    fn remove_deletes_row_and_device_entry() {
        let f = fixture();
        let row = f.manager.add_allowed_ip(f.license_id, "10.0.0.1", None).unwrap();

        let removed = f.manager.remove_allowed_ip(f.license_id, row.id).unwrap();
        assert_eq!(removed.id, row.id);
        assert!(f.manager.allowed_ips(f.license_id).unwrap().is_empty());
        assert!(f.device.rows(ADDRESS_LIST_MENU).is_empty());
    }

    #[test]
    fn remove_unknown_row_is_not_found() {
        let f = fixture();
        assert!(matches!(
            f.manager.remove_allowed_ip(f.license_id, 42),
            Err(IpWardenError::AllowedIpNotFound { ip_id: 42 })
        ));
    }

    #[test]
    fn remove_survives_unreachable_device() {
        let f = fixture();
        let row = f.manager.add_allowed_ip(f.license_id, "10.0.0.1", None).unwrap();
        f.device.set_unreachable(true);

        f.manager.remove_allowed_ip(f.license_id, row.id).unwrap();
        assert!(f.manager.allowed_ips(f.license_id).unwrap().is_empty());
        // device still has the entry until the next resync
        assert_eq!(f.device.rows(ADDRESS_LIST_MENU).len(), 1);
    }

    #[test]
    fn resync_reports_device_errors() {
        let f = fixture();
        f.manager.add_allowed_ip(f.license_id, "10.0.0.1", None).unwrap();
        f.device.set_unreachable(true);

        assert!(matches!(
            f.manager.resync_device(),
            Err(IpWardenError::DeviceUnreachable { attempts: 2, .. })
        ));
    }

    #[test]
    fn resync_restores_drifted_list() {
        let f = fixture();
        f.device.set_unreachable(true);
        f.manager.add_allowed_ip(f.license_id, "10.0.0.1", None).unwrap();
        f.manager.add_allowed_ip(f.license_id, "10.0.1.0/24", None).unwrap();
        f.device.set_unreachable(false);

        let report = f.manager.resync_device().unwrap();
        assert_eq!(report, ResyncReport { removed: 0, added: 2 });
        assert_eq!(f.device.rows(ADDRESS_LIST_MENU).len(), 2);
    }
}
