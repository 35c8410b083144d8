//! Administrative flows through the access manager.

use ipwarden::reconcile::engine::ADDRESS_LIST_MENU;
use ipwarden::{
    AccessManager, AuthRequest, DeviceConfig, IpWardenError, LicenseStore, MemoryDevice,
    MemoryStore, ReasonCode, RetryPolicy,
};
use std::sync::Arc;

fn device_config() -> DeviceConfig {
    DeviceConfig::from_lookup(|name| {
        let value = match name {
            "ENABLE_MIKROTIK_SYNC" => "true",
            "MT_HOST" => "192.0.2.1",
            "MT_USER" => "api",
            "MT_PASS" => "secret",
            "MT_INTERFACE" => "ether1",
            "MT_PUBLIC_NAT_IP" => "203.0.113.10",
            _ => return None,
        };
        Some(value.to_string())
    })
    .unwrap()
    .with_retry(RetryPolicy::immediate(3))
}

fn manager(store: &Arc<MemoryStore>, device: &MemoryDevice) -> AccessManager {
    AccessManager::new(
        store.clone(),
        store.clone(),
        device_config(),
        Arc::new(device.clone()),
    )
    .unwrap()
}

#[test]
fn allow_list_lifecycle() {
    let store = Arc::new(MemoryStore::new());
    let device = MemoryDevice::new();
    let m = manager(&store, &device);
    let license = store.insert_license(Some("L1"), "KEY", true, None).unwrap();
    let request = AuthRequest::new("KEY", "198.51.100.42", None);

    assert_eq!(m.check(&request).unwrap().reason, ReasonCode::NoAllowedIps);

    let row = m.add_allowed_ip(license.id, "198.51.100.0/24", None).unwrap();
    assert_eq!(m.check(&request).unwrap().reason, ReasonCode::Allowed);

    let device_rows = device.rows(ADDRESS_LIST_MENU);
    assert_eq!(device_rows.len(), 1);
    assert_eq!(device_rows[0].get("address"), Some("198.51.100.0/24"));
    assert_eq!(
        device_rows[0].get("comment"),
        Some(format!("License:{}", license.id).as_str())
    );

    m.remove_allowed_ip(license.id, row.id).unwrap();
    assert_eq!(m.check(&request).unwrap().reason, ReasonCode::NoAllowedIps);
    assert!(device.rows(ADDRESS_LIST_MENU).is_empty());
}

#[test]
fn unreachable_device_never_fails_mutations() {
    let store = Arc::new(MemoryStore::new());
    let device = MemoryDevice::new();
    device.set_unreachable(true);
    let m = manager(&store, &device);
    let license = store.insert_license(None, "KEY", true, None).unwrap();

    let row = m.add_allowed_ip(license.id, "10.0.0.1", Some("lab")).unwrap();
    assert_eq!(row.note.as_deref(), Some("lab"));
    m.remove_allowed_ip(license.id, row.id).unwrap();

    assert!(store.all_allowed_ips().unwrap().is_empty());
    assert_eq!(device.connect_attempts(), 6);
}

#[test]
fn duplicate_is_distinguishable() {
    let store = Arc::new(MemoryStore::new());
    let device = MemoryDevice::new();
    let m = manager(&store, &device);
    let license = store.insert_license(None, "KEY", true, None).unwrap();

    m.add_allowed_ip(license.id, "10.0.0.1", None).unwrap();
    match m.add_allowed_ip(license.id, "10.0.0.1", None) {
        Err(IpWardenError::AlreadyExists { license_id, ip_cidr }) => {
            assert_eq!(license_id, license.id);
            assert_eq!(ip_cidr, "10.0.0.1");
        }
        other => panic!("expected AlreadyExists, got {:?}", other),
    }
    assert_eq!(device.rows(ADDRESS_LIST_MENU).len(), 1);
}

#[test]
fn same_address_on_two_licenses() {
    let store = Arc::new(MemoryStore::new());
    let device = MemoryDevice::new();
    let m = manager(&store, &device);
    let a = store.insert_license(None, "KEY-A", true, None).unwrap();
    let b = store.insert_license(None, "KEY-B", true, None).unwrap();

    let row_a = m.add_allowed_ip(a.id, "10.0.0.1", None).unwrap();
    m.add_allowed_ip(b.id, "10.0.0.1", None).unwrap();
    m.remove_allowed_ip(a.id, row_a.id).unwrap();

    let rows = device.rows(ADDRESS_LIST_MENU);
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].get("comment"), Some(format!("License:{}", b.id).as_str()));
}

#[test]
fn row_of_another_license_is_not_found() {
    let store = Arc::new(MemoryStore::new());
    let device = MemoryDevice::new();
    let m = manager(&store, &device);
    let a = store.insert_license(None, "KEY-A", true, None).unwrap();
    let b = store.insert_license(None, "KEY-B", true, None).unwrap();

    let row = m.add_allowed_ip(a.id, "10.0.0.1", None).unwrap();
    assert!(matches!(
        m.remove_allowed_ip(b.id, row.id),
        Err(IpWardenError::AllowedIpNotFound { .. })
    ));
    assert_eq!(m.allowed_ips(a.id).unwrap().len(), 1);
}

#[test]
fn operator_resync_rebuilds_from_database() {
    let store = Arc::new(MemoryStore::new());
    let device = MemoryDevice::new();
    let m = manager(&store, &device);
    let license = store.insert_license(None, "KEY", true, None).unwrap();
    m.add_allowed_ip(license.id, "10.0.0.1", None).unwrap();
    m.add_allowed_ip(license.id, "fd00::/8", None).unwrap();

    // someone deletes entries by hand on the device
    device.seed(
        ADDRESS_LIST_MENU,
        &[("list", "LICENSED_IPS"), ("address", "192.0.2.200"), ("comment", "manual")],
    );

    let report = m.resync_device().unwrap();
    assert_eq!(report.removed, 3);
    assert_eq!(report.added, 2);

    let mut addresses: Vec<String> = device
        .rows(ADDRESS_LIST_MENU)
        .iter()
        .filter_map(|e| e.get("address").map(String::from))
        .collect();
    addresses.sort();
    assert_eq!(addresses, vec!["10.0.0.1".to_string(), "fd00::/8".to_string()]);
}
