//! Address-list reconciliation against the external device.
//!
//! Device state is never cached locally: every operation opens its own
//! session, reads what it needs and closes. Nothing here serializes
//! concurrent operations on the same list; run [`Reconciler::full_resync`]
//! only when no add/remove is in flight.

use crate::config::DeviceConfig;
use crate::device::protocol::Command;
use crate::device::session::{DeviceConnector, Session};
use crate::reconcile::owner::OwnerTag;
use crate::store::models::AllowedIp;
use crate::IpWardenError;
use serde::Serialize;
use std::sync::Arc;

/// Menu holding address-list entries.
pub const ADDRESS_LIST_MENU: &str = "/ip/firewall/address-list";

/// Menu holding NAT rules.
pub const NAT_MENU: &str = "/ip/firewall/nat";

/// Chain the source-NAT rule lives in.
pub const SRCNAT_CHAIN: &str = "srcnat";

/// Comment placed on the NAT rule this crate creates.
pub const NAT_RULE_COMMENT: &str = "Auto-created by License System";

/// One entry the device should hold.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DesiredEntry {
    /// Address or CIDR block.
    pub ip_cidr: String,

    /// Owning license.
    pub license_id: i64,
}

impl DesiredEntry {
    /// Build from parts.
    pub fn new(ip_cidr: impl Into<String>, license_id: i64) -> Self {
        Self {
            ip_cidr: ip_cidr.into(),
            license_id,
        }
    }
}

impl From<&AllowedIp> for DesiredEntry {
    fn from(row: &AllowedIp) -> Self {
        Self::new(row.ip_cidr.clone(), row.license_id)
    }
}

/// What a full resync did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ResyncReport {
    /// Entries removed from the list.
    pub removed: usize,

    /// Entries added to the list.
    pub added: usize,
}

/// Keeps the device's address list and NAT rule in line with the database.
pub struct Reconciler {
    config: DeviceConfig,
    connector: Arc<dyn DeviceConnector>,
}

impl Reconciler {
    /// Create a reconciler.
    ///
    /// # Errors
    /// Returns `ConfigError` if the configuration does not validate.
    pub fn new(
        config: DeviceConfig,
        connector: Arc<dyn DeviceConnector>,
    ) -> Result<Self, IpWardenError> {
        config.validate()?;
        Ok(Self { config, connector })
    }

    /// Whether device sync is turned on.
    pub fn is_enabled(&self) -> bool {
        self.config.enabled
    }

    /// The configuration in use.
    pub fn config(&self) -> &DeviceConfig {
        &self.config
    }

    /// Check whether the address list has any entries.
    ///
    /// The device creates a list on its first member, so this only logs.
    pub fn ensure_address_list_exists(&self) -> Result<(), IpWardenError> {
        if !self.is_enabled() {
            return Ok(());
        }
        let mut session = self.open_session()?;
        self.lookup_address_list(&mut session);
        Ok(())
    }

    /// Create the source-NAT rule for the list if it is missing.
    ///
    /// Returns `true` if a rule was created. When a rule already exists no
    /// mutating command is sent.
    pub fn ensure_forwarding_rule(&self) -> Result<bool, IpWardenError> {
        if !self.is_enabled() {
            return Ok(false);
        }
        let mut session = self.open_session()?;
        self.ensure_rule_in(&mut session)
    }

    /// Add one entry tagged with its owning license.
    ///
    /// Not idempotent on the device: call once per successful insert.
    pub fn add_entry(&self, ip_cidr: &str, license_id: i64) -> Result<(), IpWardenError> {
        if !self.is_enabled() {
            tracing::debug!(ip_cidr, license_id, "device sync disabled, skipping add");
            return Ok(());
        }
        let mut session = self.open_session()?;
        self.lookup_address_list(&mut session);
        self.ensure_rule_in(&mut session)?;
        self.add_in(&mut session, &DesiredEntry::new(ip_cidr, license_id))?;

        tracing::info!(
            ip_cidr,
            license_id,
            address_list = %self.config.address_list,
            "added entry to device address list"
        );
        Ok(())
    }

    /// Remove every entry for `(ip_cidr, license_id)` in the list.
    ///
    /// Returns how many were removed; zero is not an error.
    pub fn remove_entry(&self, ip_cidr: &str, license_id: i64) -> Result<usize, IpWardenError> {
        if !self.is_enabled() {
            tracing::debug!(ip_cidr, license_id, "device sync disabled, skipping remove");
            return Ok(0);
        }
        let mut session = self.open_session()?;

        let matches = session.execute(
            &Command::new(format!("{}/print", ADDRESS_LIST_MENU))
                .query("list", self.config.address_list.as_str())
                .query("address", ip_cidr)
                .query("comment", OwnerTag::new(license_id).comment()),
        )?;

        let mut removed = 0;
        for entry in &matches {
            let Some(id) = entry.id() else {
                tracing::warn!(ip_cidr, license_id, "device entry has no id, cannot remove");
                continue;
            };
            self.remove_in(&mut session, id)?;
            removed += 1;
        }

        tracing::info!(
            ip_cidr,
            license_id,
            removed,
            address_list = %self.config.address_list,
            "removed entries from device address list"
        );
        Ok(removed)
    }

    /// Clear the list and rebuild it from `entries`.
    ///
    /// The list is empty between the remove and add phases, so enforcement
    /// briefly lapses. Running it twice with the same input leaves exactly
    /// one device entry per input entry.
    pub fn full_resync(&self, entries: &[DesiredEntry]) -> Result<ResyncReport, IpWardenError> {
        if !self.is_enabled() {
            tracing::debug!("device sync disabled, skipping resync");
            return Ok(ResyncReport::default());
        }
        let mut session = self.open_session()?;
        self.ensure_rule_in(&mut session)?;

        let existing = session.execute(
            &Command::new(format!("{}/print", ADDRESS_LIST_MENU))
                .query("list", self.config.address_list.as_str()),
        )?;

        let mut report = ResyncReport::default();
        for entry in &existing {
            if let Some(id) = entry.id() {
                self.remove_in(&mut session, id)?;
                report.removed += 1;
            }
        }

        for desired in entries {
            self.add_in(&mut session, desired)?;
            report.added += 1;
        }

        tracing::info!(
            removed = report.removed,
            added = report.added,
            address_list = %self.config.address_list,
            "device address list resynced"
        );
        Ok(report)
    }

    fn open_session(&self) -> Result<Session<'_>, IpWardenError> {
        Session::open(self.connector.as_ref(), &self.config)
    }

    fn lookup_address_list(&self, session: &mut Session<'_>) {
        let result = session.execute(
            &Command::new(format!("{}/print", ADDRESS_LIST_MENU))
                .query("list", self.config.address_list.as_str()),
        );
        match result {
            Ok(rows) if rows.is_empty() => tracing::debug!(
                address_list = %self.config.address_list,
                "address list is empty, device will create it on first add"
            ),
            Ok(rows) => tracing::debug!(
                address_list = %self.config.address_list,
                entries = rows.len(),
                "address list present"
            ),
            Err(e) => tracing::warn!(
                address_list = %self.config.address_list,
                error = %e,
                "failed to look up address list"
            ),
        }
    }

    fn ensure_rule_in(&self, session: &mut Session<'_>) -> Result<bool, IpWardenError> {
        let rules = session.execute(
            &Command::new(format!("{}/print", NAT_MENU))
                .query("chain", SRCNAT_CHAIN)
                .query("src-address-list", self.config.address_list.as_str())
                .query("out-interface", self.config.interface.as_str()),
        )?;

        if !rules.is_empty() {
            tracing::debug!(address_list = %self.config.address_list, "NAT rule already exists");
            return Ok(false);
        }

        session.execute(
            &Command::new(format!("{}/add", NAT_MENU))
                .attr("chain", SRCNAT_CHAIN)
                .attr("src-address-list", self.config.address_list.as_str())
                .attr("out-interface", self.config.interface.as_str())
                .attr("to-addresses", self.config.public_nat_ip.as_str())
                .attr("action", "src-nat")
                .attr("comment", NAT_RULE_COMMENT),
        )?;
        tracing::info!(
            address_list = %self.config.address_list,
            interface = %self.config.interface,
            "created NAT rule for licensed addresses"
        );
        Ok(true)
    }

    fn add_in(&self, session: &mut Session<'_>, entry: &DesiredEntry) -> Result<(), IpWardenError> {
        session.execute(
            &Command::new(format!("{}/add", ADDRESS_LIST_MENU))
                .attr("list", self.config.address_list.as_str())
                .attr("address", entry.ip_cidr.as_str())
                .attr("comment", OwnerTag::new(entry.license_id).comment()),
        )?;
        Ok(())
    }

    fn remove_in(&self, session: &mut Session<'_>, id: &str) -> Result<(), IpWardenError> {
        session.execute(&Command::new(format!("{}/remove", ADDRESS_LIST_MENU)).attr(".id", id))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RetryPolicy;
    use crate::device::memory::MemoryDevice;

    fn enabled_config() -> DeviceConfig {
        DeviceConfig {
            enabled: true,
            host: "router.test".to_string(),
            user: "api".to_string(),
            password: "pw".to_string(),
            interface: "ether1".to_string(),
            public_nat_ip: "203.0.113.10".to_string(),
            ..DeviceConfig::disabled()
        }
        .with_retry(RetryPolicy::immediate(3))
    }

    fn reconciler(device: &MemoryDevice) -> Reconciler {
        Reconciler::new(enabled_config(), Arc::new(device.clone())).unwrap()
    }

    fn list_rows(device: &MemoryDevice) -> Vec<(String, String)> {
        device
            .rows(ADDRESS_LIST_MENU)
            .iter()
            .map(|e| {
                (
                    e.get("address").unwrap_or_default().to_string(),
                    e.get("comment").unwrap_or_default().to_string(),
                )
            })
            .collect()
    }

    #[test]
    fn invalid_config_rejected() {
        let mut config = enabled_config();
        config.interface.clear();
        assert!(Reconciler::new(config, Arc::new(MemoryDevice::new())).is_err());
    }

    #[test]
    fn address_list_lookup_never_mutates() {
        let device = MemoryDevice::new();
        reconciler(&device).ensure_address_list_exists().unwrap();
        assert_eq!(device.mutating_commands(), 0);
        assert_eq!(device.open_sessions(), 0);
    }

    #[test]
    fn forwarding_rule_created_once() {
        let device = MemoryDevice::new();
        let r = reconciler(&device);

        assert!(r.ensure_forwarding_rule().unwrap());
        assert_eq!(device.mutating_commands(), 1);

        assert!(!r.ensure_forwarding_rule().unwrap());
        assert!(!r.ensure_forwarding_rule().unwrap());
        assert_eq!(device.mutating_commands(), 1);

        let rules = device.rows(NAT_MENU);
        assert_eq!(rules.len(), 1);
        assert_eq!(rules[0].get("action"), Some("src-nat"));
        assert_eq!(rules[0].get("to-addresses"), Some("203.0.113.10"));
        assert_eq!(rules[0].get("comment"), Some(NAT_RULE_COMMENT));
    }

    #[test]
    fn rule_on_other_interface_does_not_count() {
        let device = MemoryDevice::new();
        device.seed(
            NAT_MENU,
            &[
                ("chain", "srcnat"),
                ("src-address-list", "LICENSED_IPS"),
                ("out-interface", "ether9"),
            ],
        );
        assert!(reconciler(&device).ensure_forwarding_rule().unwrap());
        assert_eq!(device.rows(NAT_MENU).len(), 2);
    }

    #[test]
    fn add_entry_tags_owner() {
        let device = MemoryDevice::new();
        reconciler(&device).add_entry("198.51.100.0/24", 7).unwrap();

        assert_eq!(
            list_rows(&device),
            vec![("198.51.100.0/24".to_string(), "License:7".to_string())]
        );
        assert_eq!(device.rows(NAT_MENU).len(), 1);
        assert_eq!(device.open_sessions(), 0);
        assert_eq!(device.connect_attempts(), 1);
    }

    #[test]
    fn remove_only_touches_owner_entries() {
        let device = MemoryDevice::new();
        let r = reconciler(&device);
        r.add_entry("10.0.0.1", 1).unwrap();
        r.add_entry("10.0.0.1", 2).unwrap();

        assert_eq!(r.remove_entry("10.0.0.1", 1).unwrap(), 1);
        assert_eq!(
            list_rows(&device),
            vec![("10.0.0.1".to_string(), "License:2".to_string())]
        );
    }

    #[test]
    fn remove_takes_out_duplicates() {
        let device = MemoryDevice::new();
        let r = reconciler(&device);
        r.add_entry("10.0.0.1", 1).unwrap();
        r.add_entry("10.0.0.1", 1).unwrap();

        assert_eq!(r.remove_entry("10.0.0.1", 1).unwrap(), 2);
        assert!(list_rows(&device).is_empty());
    }

    #[test]
    fn remove_missing_is_zero() {
        let device = MemoryDevice::new();
        assert_eq!(reconciler(&device).remove_entry("10.9.9.9", 3).unwrap(), 0);
        assert_eq!(device.mutating_commands(), 0);
    }

    #[test]
    fn resync_replaces_list_contents() {
        let device = MemoryDevice::new();
        device.seed(
            ADDRESS_LIST_MENU,
            &[("list", "LICENSED_IPS"), ("address", "192.0.2.99"), ("comment", "License:99")],
        );
        device.seed(
            ADDRESS_LIST_MENU,
            &[("list", "OTHER"), ("address", "192.0.2.1"), ("comment", "manual")],
        );

        let desired = vec![DesiredEntry::new("10.0.0.1", 1), DesiredEntry::new("10.1.0.0/16", 2)];
        let report = reconciler(&device).full_resync(&desired).unwrap();
        assert_eq!(report, ResyncReport { removed: 1, added: 2 });

        let mut rows = list_rows(&device);
        rows.sort();
        assert_eq!(
            rows,
            vec![
                ("10.0.0.1".to_string(), "License:1".to_string()),
                ("10.1.0.0/16".to_string(), "License:2".to_string()),
                ("192.0.2.1".to_string(), "manual".to_string()),
            ]
        );
    }

    #[test]
    fn unreachable_device_fails_after_bounded_attempts() {
        let device = MemoryDevice::new();
        device.set_unreachable(true);
        let err = reconciler(&device).add_entry("10.0.0.1", 1).unwrap_err();

        assert!(matches!(err, IpWardenError::DeviceUnreachable { attempts: 3, .. }));
        assert_eq!(device.connect_attempts(), 3);
        assert!(device.rows(ADDRESS_LIST_MENU).is_empty());
    }

    #[test]
    fn disabled_config_never_connects() {
        let device = MemoryDevice::new();
        let r = Reconciler::new(DeviceConfig::disabled(), Arc::new(device.clone())).unwrap();

        r.ensure_address_list_exists().unwrap();
        assert!(!r.ensure_forwarding_rule().unwrap());
        r.add_entry("10.0.0.1", 1).unwrap();
        assert_eq!(r.remove_entry("10.0.0.1", 1).unwrap(), 0);
        assert_eq!(
            r.full_resync(&[DesiredEntry::new("10.0.0.1", 1)]).unwrap(),
            ResyncReport::default()
        );
        assert_eq!(device.connect_attempts(), 0);
    }
}
