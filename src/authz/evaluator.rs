//! License + source-address authorization pipeline.
//!
//! The checks run in a fixed order and the first one that fails decides:
//!
//! 1. key or IP missing → `invalid-request` (no lookup, no audit record)
//! 2. unknown key → `license-not-found`
//! 3. inactive → `license-inactive`
//! 4. expired → `license-expired`
//! 5. empty allow-list → `no-allowed-ips`
//! 6. no entry matches → `denied`
//! 7. otherwise → `allowed`
//!
//! Every outcome from step 2 on writes exactly one audit record.

use crate::address::matcher;
use crate::authz::decision::{AuthRequest, Decision, ReasonCode};
use crate::clock::{Clock, SystemClock};
use crate::store::models::NewAuditRecord;
use crate::store::{AuditRecorder, LicenseStore};
use crate::IpWardenError;
use std::sync::Arc;

/// Stateless evaluator over the storage collaborator.
pub struct Evaluator {
    store: Arc<dyn LicenseStore>,
    audit: Arc<dyn AuditRecorder>,
    clock: Arc<dyn Clock>,
}

impl Evaluator {
    /// Create an evaluator using the system clock.
    pub fn new(store: Arc<dyn LicenseStore>, audit: Arc<dyn AuditRecorder>) -> Self {
        Self::with_clock(store, audit, Arc::new(SystemClock))
    }

    /// Create an evaluator with an explicit clock.
    pub fn with_clock(
        store: Arc<dyn LicenseStore>,
        audit: Arc<dyn AuditRecorder>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            store,
            audit,
            clock,
        }
    }

    /// Evaluate a request.
    ///
    /// # Errors
    /// Only storage failures are errors; every business outcome, including
    /// denial, is an `Ok(Decision)`. A failed audit write is logged and
    /// does not change the decision.
    pub fn evaluate(&self, request: &AuthRequest) -> Result<Decision, IpWardenError> {
        if !request.is_complete() {
            return Ok(Decision::from_reason(ReasonCode::InvalidRequest));
        }

        let reason = self.decide(request)?;
        self.record(request, reason);

        tracing::info!(
            key = %key_fingerprint(&request.license_key),
            public_ip = %request.public_ip,
            result = %reason,
            "authorization evaluated"
        );

        Ok(Decision::from_reason(reason))
    }

    /// Evaluate from loose parts.
    pub fn evaluate_parts(
        &self,
        license_key: &str,
        public_ip: &str,
        machine_id: Option<&str>,
    ) -> Result<Decision, IpWardenError> {
        self.evaluate(&AuthRequest::new(license_key, public_ip, machine_id))
    }

    fn decide(&self, request: &AuthRequest) -> Result<ReasonCode, IpWardenError> {
        let license = match self.store.find_license_by_key(&request.license_key)? {
            Some(license) => license,
            None => return Ok(ReasonCode::LicenseNotFound),
        };

        if !license.active {
            return Ok(ReasonCode::LicenseInactive);
        }

        if license.is_expired_at(self.clock.now_utc()) {
            return Ok(ReasonCode::LicenseExpired);
        }

        let allowed_ips = self.store.allowed_ips_for_license(license.id)?;
        if allowed_ips.is_empty() {
            return Ok(ReasonCode::NoAllowedIps);
        }

        let candidate = match matcher::parse(&request.public_ip) {
            Ok(addr) => addr,
            Err(_) => {
                tracing::debug!(
                    license_id = license.id,
                    public_ip = %request.public_ip,
                    "request address is not a valid IP, treating as unmatched"
                );
                return Ok(ReasonCode::Denied);
            }
        };

        if allowed_ips
            .iter()
            .any(|row| matcher::matches(&candidate, &row.ip_cidr))
        {
            Ok(ReasonCode::Allowed)
        } else {
            Ok(ReasonCode::Denied)
        }
    }

    fn record(&self, request: &AuthRequest, reason: ReasonCode) {
        let raw_request = serde_json::to_value(request).unwrap_or(serde_json::Value::Null);
        let record = NewAuditRecord {
            license_key: request.license_key.clone(),
            request_ip: request.public_ip.clone(),
            machine_id: request.machine_id.clone(),
            result: reason,
            raw_request,
        };

        if let Err(e) = self.audit.record(record) {
            tracing::warn!(
                key = %key_fingerprint(&request.license_key),
                result = %reason,
                error = %e,
                "failed to record authorization decision"
            );
        }
    }
}

/// Short SHA-256 fingerprint of a license key, safe to log.
pub fn key_fingerprint(license_key: &str) -> String {
    use sha2::{Digest, Sha256};
    let hash = Sha256::digest(license_key.as_bytes());
    hex::encode(&hash[..8])
}
