//! Ipwarden error types.
//!
//! Authorization denials are not errors: they are [`crate::Decision`] values.
//! Everything here is either a validation failure, an administrative target
//! that does not exist, or a collaborator (storage, device, audit log) fault.

use thiserror::Error;

/// Errors that can occur during authorization, storage access or device sync.
#[derive(Debug, Error)]
pub enum IpWardenError {
    /// Configuration is invalid.
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// Text is not a valid IP address or CIDR block.
    #[error("Invalid IP address or CIDR format: {0}")]
    InvalidAddress(String),

    /// A required field of an administrative request is missing.
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Storage collaborator failed or is unavailable.
    #[error("Storage error: {0}")]
    Storage(String),

    /// The (license, ip_cidr) pair is already on the allow-list.
    #[error("IP {ip_cidr} already added to license {license_id}")]
    AlreadyExists {
        /// License the entry belongs to.
        license_id: i64,
        /// The duplicated IP or CIDR text.
        ip_cidr: String,
    },

    /// Administrative target license does not exist.
    #[error("License {license_id} not found")]
    LicenseNotFound {
        /// The missing license id.
        license_id: i64,
    },

    /// Administrative target allow-list row does not exist.
    #[error("Allowed IP {ip_id} not found")]
    AllowedIpNotFound {
        /// The missing allow-list row id.
        ip_id: i64,
    },

    /// Every connection attempt to the device failed.
    #[error("Device unreachable after {attempts} attempt(s): {reason}")]
    DeviceUnreachable {
        /// Number of attempts made.
        attempts: u32,
        /// Error reported by the last attempt.
        reason: String,
    },

    /// Device sent something the API codec does not understand.
    #[error("Device protocol error: {0}")]
    DeviceProtocol(String),

    /// Device rejected a command.
    #[error("Device rejected {command}: {message}")]
    DeviceTrap {
        /// Command path that was rejected.
        command: String,
        /// Message carried by the trap reply.
        message: String,
    },

    /// Socket failure on an established device session.
    #[error("Device I/O error: {0}")]
    DeviceIo(String),

    /// Audit log I/O error.
    #[error("Audit log I/O error: {0}")]
    AuditIo(String),
}

impl IpWardenError {
    /// Whether this error came from the external device rather than storage.
    pub fn is_device_error(&self) -> bool {
        matches!(
            self,
            IpWardenError::DeviceUnreachable { .. }
                | IpWardenError::DeviceProtocol(_)
                | IpWardenError::DeviceTrap { .. }
                | IpWardenError::DeviceIo(_)
        )
    }
}
