//! Device synchronization configuration.

use crate::IpWardenError;
use std::net::IpAddr;
use std::time::Duration;

/// Address list used when none is configured.
pub const DEFAULT_ADDRESS_LIST: &str = "LICENSED_IPS";

/// Default RouterOS API port (plaintext).
pub const DEFAULT_API_PORT: u16 = 8728;

/// Default per-attempt connection timeout.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Bounded connect retry with linearly increasing delay.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total connection attempts before giving up.
    pub max_attempts: u32,

    /// Delay unit; the wait after attempt `n` is `base_delay * n`.
    pub base_delay: Duration,
}

impl RetryPolicy {
    /// Retry policy with no delay between attempts.
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            base_delay: Duration::ZERO,
        }
    }

    /// Delay to wait after the given (1-based) failed attempt.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        self.base_delay.saturating_mul(attempt)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
        }
    }
}

/// Configuration for the external device and its address list.
///
/// Built once and injected into the reconciler; nothing reads process-wide
/// state after construction.
#[derive(Clone)]
pub struct DeviceConfig {
    /// When false every device operation is a no-op.
    pub enabled: bool,

    /// Device hostname or IP.
    pub host: String,

    /// API port.
    pub port: u16,

    /// API user.
    pub user: String,

    /// API password.
    pub password: String,

    /// Egress interface the source-NAT rule is scoped to.
    pub interface: String,

    /// Address licensed traffic is translated to.
    pub public_nat_ip: String,

    /// Address list holding licensed entries.
    pub address_list: String,

    /// Timeout applied to each connection attempt and socket read/write.
    pub connect_timeout: Duration,

    /// Connect retry policy.
    pub retry: RetryPolicy,
}

impl std::fmt::Debug for DeviceConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceConfig")
            .field("enabled", &self.enabled)
            .field("host", &self.host)
            .field("port", &self.port)
            .field("user", &self.user)
            .field("password", &"<redacted>")
            .field("interface", &self.interface)
            .field("public_nat_ip", &self.public_nat_ip)
            .field("address_list", &self.address_list)
            .field("connect_timeout", &self.connect_timeout)
            .field("retry", &self.retry)
            .finish()
    }
}

impl DeviceConfig {
    /// A configuration with device sync turned off.
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            host: String::new(),
            port: DEFAULT_API_PORT,
            user: String::new(),
            password: String::new(),
            interface: String::new(),
            public_nat_ip: String::new(),
            address_list: DEFAULT_ADDRESS_LIST.to_string(),
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            retry: RetryPolicy::default(),
        }
    }

    /// Read configuration from the process environment.
    ///
    /// Variables: `ENABLE_MIKROTIK_SYNC`, `MT_HOST`, `MT_USER`, `MT_PASS`,
    /// `MT_PORT`, `MT_INTERFACE`, `MT_PUBLIC_NAT_IP`, `MT_ADDRESS_LIST`.
    pub fn from_env() -> Result<Self, IpWardenError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build configuration from an arbitrary variable lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, IpWardenError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &str| lookup(name).unwrap_or_default();

        let port = match lookup("MT_PORT").filter(|p| !p.is_empty()) {
            Some(raw) => raw.parse::<u16>().map_err(|_| {
                IpWardenError::ConfigError(format!("MT_PORT must be a port number, got {:?}", raw))
            })?,
            None => DEFAULT_API_PORT,
        };

        let address_list = lookup("MT_ADDRESS_LIST")
            .filter(|l| !l.is_empty())
            .unwrap_or_else(|| DEFAULT_ADDRESS_LIST.to_string());

        Ok(Self {
            enabled: var("ENABLE_MIKROTIK_SYNC") == "true",
            host: var("MT_HOST"),
            port,
            user: var("MT_USER"),
            password: var("MT_PASS"),
            interface: var("MT_INTERFACE"),
            public_nat_ip: var("MT_PUBLIC_NAT_IP"),
            address_list,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            retry: RetryPolicy::default(),
        })
    }

    /// Replace the retry policy.
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Validate configuration for obvious errors.
    ///
    /// A disabled configuration is always accepted.
    pub fn validate(&self) -> Result<(), IpWardenError> {
        if !self.enabled {
            return Ok(());
        }

        let required = [
            ("host", &self.host),
            ("user", &self.user),
            ("interface", &self.interface),
            ("public_nat_ip", &self.public_nat_ip),
            ("address_list", &self.address_list),
        ];
        for (name, value) in required {
            if value.is_empty() {
                return Err(IpWardenError::ConfigError(format!(
                    "{} cannot be empty when device sync is enabled",
                    name
                )));
            }
        }

        if self.public_nat_ip.parse::<IpAddr>().is_err() {
            return Err(IpWardenError::ConfigError(format!(
                "public_nat_ip is not an IP address: {}",
                self.public_nat_ip
            )));
        }

        if self.retry.max_attempts == 0 {
            return Err(IpWardenError::ConfigError(
                "retry.max_attempts must be at least 1".to_string(),
            ));
        }

        Ok(())
    }
}
