//! Authorization request, decision and reason codes.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Machine-readable explanation attached to every decision.
///
/// Serialized in kebab-case (`license-not-found`, `no-allowed-ips`, ...),
/// which is also the `result` column of the audit log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ReasonCode {
    /// License key or public IP missing.
    InvalidRequest,
    /// No license with the supplied key.
    LicenseNotFound,
    /// License exists but is switched off.
    LicenseInactive,
    /// License expiry is in the past.
    LicenseExpired,
    /// License has an empty allow-list.
    NoAllowedIps,
    /// Request IP matched no allow-list entry.
    Denied,
    /// Access granted.
    Allowed,
}

impl ReasonCode {
    /// Every code, in pipeline order.
    pub const ALL: [ReasonCode; 7] = [
        ReasonCode::InvalidRequest,
        ReasonCode::LicenseNotFound,
        ReasonCode::LicenseInactive,
        ReasonCode::LicenseExpired,
        ReasonCode::NoAllowedIps,
        ReasonCode::Denied,
        ReasonCode::Allowed,
    ];

    /// Wire form of the code.
    pub fn as_str(self) -> &'static str {
        match self {
            ReasonCode::InvalidRequest => "invalid-request",
            ReasonCode::LicenseNotFound => "license-not-found",
            ReasonCode::LicenseInactive => "license-inactive",
            ReasonCode::LicenseExpired => "license-expired",
            ReasonCode::NoAllowedIps => "no-allowed-ips",
            ReasonCode::Denied => "denied",
            ReasonCode::Allowed => "allowed",
        }
    }

    /// Human-readable message returned to the caller.
    pub fn message(self) -> &'static str {
        match self {
            ReasonCode::InvalidRequest => "Missing required fields: license_key, public_ip",
            ReasonCode::LicenseNotFound => "License not found",
            ReasonCode::LicenseInactive => "License is inactive",
            ReasonCode::LicenseExpired => "License has expired",
            ReasonCode::NoAllowedIps => "No IPs configured for this license",
            ReasonCode::Denied => "IP address not authorized for this license",
            ReasonCode::Allowed => "OK",
        }
    }

    /// HTTP-equivalent status for transports that need one.
    pub fn status_code(self) -> u16 {
        match self {
            ReasonCode::Allowed => 200,
            ReasonCode::InvalidRequest => 400,
            _ => 403,
        }
    }
}

impl fmt::Display for ReasonCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of one authorization evaluation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Decision {
    /// Whether access is granted.
    pub allowed: bool,

    /// Why.
    pub reason: ReasonCode,

    /// Human-readable reason.
    pub message: String,
}

impl Decision {
    /// Build the decision for a reason code.
    pub fn from_reason(reason: ReasonCode) -> Self {
        Self {
            allowed: reason == ReasonCode::Allowed,
            reason,
            message: reason.message().to_string(),
        }
    }

    /// HTTP-equivalent status.
    pub fn status_code(&self) -> u16 {
        self.reason.status_code()
    }

    /// Wire response body.
    pub fn to_response(&self) -> AuthResponse {
        AuthResponse {
            allowed: self.allowed,
            message: self.message.clone(),
        }
    }
}

/// Inbound authorization request.
///
/// Fields the evaluator does not know about are kept in `extra` so the
/// audit log can store the payload exactly as it arrived.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AuthRequest {
    /// License key as supplied by the caller.
    #[serde(default)]
    pub license_key: String,

    /// Caller's public address.
    #[serde(default)]
    pub public_ip: String,

    /// Optional machine identifier.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub machine_id: Option<String>,

    /// Any other payload fields.
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl AuthRequest {
    /// Build a request from its parts.
    pub fn new(license_key: &str, public_ip: &str, machine_id: Option<&str>) -> Self {
        Self {
            license_key: license_key.to_string(),
            public_ip: public_ip.to_string(),
            machine_id: machine_id.map(String::from),
            extra: serde_json::Map::new(),
        }
    }

    /// Whether both required fields are present.
    pub fn is_complete(&self) -> bool {
        !self.license_key.is_empty() && !self.public_ip.is_empty()
    }
}

/// Outbound authorization response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthResponse {
    /// Whether access is granted.
    pub allowed: bool,

    /// `"OK"` or the denial reason.
    pub message: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reason_codes_serialize_kebab_case() {
        for code in ReasonCode::ALL {
            let json = serde_json::to_string(&code).unwrap();
            assert_eq!(json, format!("\"{}\"", code.as_str()));
        }
    }

    #[test]
    fn only_allowed_is_allowed() {
        for code in ReasonCode::ALL {
            assert_eq!(Decision::from_reason(code).allowed, code == ReasonCode::Allowed);
        }
    }

    #[test]
    fn status_codes() {
        assert_eq!(Decision::from_reason(ReasonCode::Allowed).status_code(), 200);
        assert_eq!(Decision::from_reason(ReasonCode::InvalidRequest).status_code(), 400);
        assert_eq!(Decision::from_reason(ReasonCode::Denied).status_code(), 403);
    }

    #[test]
    fn success_response_says_ok() {
        let response = Decision::from_reason(ReasonCode::Allowed).to_response();
        assert_eq!(
            serde_json::to_value(&response).unwrap(),
            serde_json::json!({"allowed": true, "message": "OK"})
        );
    }

    #[test]
    fn request_keeps_unknown_fields() {
        let raw = r#"{"license_key":"K","public_ip":"1.2.3.4","hostname":"node-7"}"#;
        let request: AuthRequest = serde_json::from_str(raw).unwrap();
        assert_eq!(request.license_key, "K");
        assert_eq!(request.machine_id, None);
        assert_eq!(request.extra["hostname"], "node-7");

        let round: serde_json::Value = serde_json::to_value(&request).unwrap();
        assert_eq!(round["hostname"], "node-7");
        assert!(round.get("machine_id").is_none());
    }

    #[test]
    fn missing_fields_default_to_empty() {
        let request: AuthRequest = serde_json::from_str(r#"{"public_ip":"1.2.3.4"}"#).unwrap();
        assert!(request.license_key.is_empty());
        assert!(!request.is_complete());
    }
}
