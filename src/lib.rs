//! # Ipwarden
//!
//! **License-key and source-address authorization with RouterOS
//! address-list reconciliation.**
//!
//! Ipwarden decides whether a license key may be used from a given public
//! address, records every decision, and keeps a RouterOS device's address
//! list and source-NAT rule in line with the allow-list database.
//!
//! ## Features
//!
//! - **Ordered decision pipeline** with machine-readable reason codes
//! - **Address-family-aware matching** of exact addresses and CIDR blocks
//! - **One audit record per decision**, including the raw request payload
//! - **Best-effort device sync**: device failures never fail a database change
//! - **Full resync** to recover from device drift
//!
//! ## Quickstart
//!
//! ```no_run
//! use ipwarden::{AccessManager, AuthRequest, DeviceConfig, MemoryStore, RouterOsConnector};
//! use std::sync::Arc;
//!
//! fn main() -> Result<(), ipwarden::IpWardenError> {
//!     let store = Arc::new(MemoryStore::new());
//!     let license = store.insert_license(Some("office"), "KEY-123", true, None)?;
//!
//!     let manager = AccessManager::new(
//!         store.clone(),
//!         store.clone(),
//!         DeviceConfig::from_env()?,
//!         Arc::new(RouterOsConnector::new()),
//!     )?;
//!
//!     manager.add_allowed_ip(license.id, "198.51.100.0/24", Some("office NAT"))?;
//!
//!     let decision = manager.check(&AuthRequest::new("KEY-123", "198.51.100.42", None))?;
//!     println!("{} ({})", decision.allowed, decision.reason);
//!     Ok(())
//! }
//! ```
//!
//! ## Device sync
//!
//! Configured through `ENABLE_MIKROTIK_SYNC`, `MT_HOST`, `MT_PORT`,
//! `MT_USER`, `MT_PASS`, `MT_INTERFACE`, `MT_PUBLIC_NAT_IP` and
//! `MT_ADDRESS_LIST`. With sync disabled every device operation returns
//! immediately without connecting. See [`DeviceConfig`].
//!
//! Ipwarden does not install a `tracing` subscriber; that is up to the
//! embedding application.

#![warn(missing_docs)]

// Core modules
pub mod clock;
pub mod config;
pub mod errors;

// Address matching
pub mod address;

// Authorization
pub mod authz;

// Storage collaborators
pub mod store;

// Device access
pub mod device;

// Reconciliation
pub mod reconcile;

// Manager (main public API)
pub mod manager;

// Re-exports for public API
pub use authz::decision::{AuthRequest, AuthResponse, Decision, ReasonCode};
pub use authz::evaluator::Evaluator;
pub use clock::{Clock, SystemClock};
pub use config::{DeviceConfig, RetryPolicy};
pub use device::memory::MemoryDevice;
pub use device::routeros::RouterOsConnector;
pub use device::session::{DeviceConnector, DeviceTransport};
pub use errors::IpWardenError;
pub use manager::AccessManager;
pub use reconcile::engine::{DesiredEntry, Reconciler, ResyncReport};
pub use reconcile::owner::OwnerTag;
pub use store::file::FileAuditLog;
pub use store::memory::MemoryStore;
pub use store::models::{AllowedIp, AuditRecord, License};
pub use store::{AuditRecorder, LicenseStore};

#[cfg(any(test, feature = "test-seams"))]
pub use clock::MockClock;
