//! Allow-list check and device sync example.
//!
//! Registers a license with one allow-list entry, checks a client address
//! against it, and mirrors the entry onto the router's address list.
//!
//! # Running
//!
//! ```bash
//! # Without a router: the in-memory device stands in.
//! cargo run --example check_and_sync -- 198.51.100.42
//!
//! # Against a RouterOS device.
//! export ENABLE_MIKROTIK_SYNC=true MT_HOST=192.0.2.1 MT_USER=api MT_PASS=secret
//! export MT_INTERFACE=ether1 MT_PUBLIC_NAT_IP=203.0.113.10
//! cargo run --example check_and_sync -- 198.51.100.42
//! ```

use ipwarden::reconcile::engine::ADDRESS_LIST_MENU;
use ipwarden::{
    AccessManager, AuthRequest, DeviceConfig, DeviceConnector, IpWardenError, MemoryDevice,
    MemoryStore, RouterOsConnector,
};
use std::sync::Arc;

const LICENSE_KEY: &str = "DEMO-0001";
const ALLOWED_CIDR: &str = "198.51.100.0/24";

fn simulated_config() -> DeviceConfig {
    DeviceConfig {
        enabled: true,
        host: "router.invalid".to_string(),
        user: "demo".to_string(),
        password: "demo".to_string(),
        interface: "ether1".to_string(),
        public_nat_ip: "203.0.113.10".to_string(),
        ..DeviceConfig::disabled()
    }
}

fn main() {
    let client_ip = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "198.51.100.42".to_string());

    let from_env = match DeviceConfig::from_env() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Configuration error: {}", e);
            std::process::exit(1);
        }
    };

    // Real router when sync is on; otherwise an enabled config aimed at the simulator.
    let simulated = MemoryDevice::new();
    let on_router = from_env.enabled;
    let (config, connector): (DeviceConfig, Arc<dyn DeviceConnector>) = if on_router {
        (from_env, Arc::new(RouterOsConnector::new()))
    } else {
        (simulated_config(), Arc::new(simulated.clone()))
    };
    let address_list = config.address_list.clone();

    let store = Arc::new(MemoryStore::new());
    let manager = match AccessManager::new(store.clone(), store.clone(), config, connector) {
        Ok(m) => m,
        Err(e) => {
            eprintln!("Configuration error: {}", e);
            std::process::exit(1);
        }
    };

    let license = match store.insert_license(Some("demo"), LICENSE_KEY, true, None) {
        Ok(l) => l,
        Err(e) => {
            eprintln!("Storage error: {}", e);
            std::process::exit(1);
        }
    };

    // Device failures are logged and swallowed here; the row is still stored.
    match manager.add_allowed_ip(license.id, ALLOWED_CIDR, Some("office")) {
        Ok(row) => println!("Added {} for license {}", row.ip_cidr, license.id),
        Err(e) => {
            eprintln!("Could not add allow-list entry: {}", e);
            std::process::exit(1);
        }
    }

    match manager.check(&AuthRequest::new(LICENSE_KEY, &client_ip, None)) {
        Ok(decision) if decision.allowed => {
            println!("✓ {} allowed", client_ip);
        }
        Ok(decision) => {
            println!("✗ {} refused: {} ({})", client_ip, decision.message, decision.reason);
        }
        Err(e) => {
            eprintln!("Lookup failed: {}", e);
            std::process::exit(1);
        }
    }

    if !on_router {
        println!("Simulated device, list {}:", address_list);
        for entry in simulated.rows(ADDRESS_LIST_MENU) {
            println!(
                "  {} {}",
                entry.get("address").unwrap_or("?"),
                entry.get("comment").unwrap_or("")
            );
        }
        return;
    }

    match manager.resync_device() {
        Ok(report) => println!(
            "Resynced {}: removed {}, added {}",
            address_list, report.removed, report.added
        ),
        Err(IpWardenError::DeviceUnreachable { attempts, .. }) => {
            eprintln!("Router unreachable after {} attempts", attempts);
            std::process::exit(1);
        }
        Err(e) => {
            eprintln!("Resync failed: {}", e);
            std::process::exit(1);
        }
    }
}
