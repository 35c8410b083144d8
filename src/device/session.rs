//! Device session lifecycle.
//!
//! `Disconnected → Connecting → Connected → Closed`. Connecting makes up to
//! `retry.max_attempts` attempts with a linear delay between them. A session
//! is opened per logical operation and closed when it is dropped, so every
//! exit path, including `?` returns, tears the connection down.

use crate::config::DeviceConfig;
use crate::device::protocol::{Command, Entry};
use crate::IpWardenError;

/// An established, authenticated connection to the device.
pub trait DeviceTransport: Send {
    /// Run one command and return the rows it produced.
    fn execute(&mut self, command: &Command) -> Result<Vec<Entry>, IpWardenError>;

    /// Tear the connection down. Must be safe to call more than once.
    fn close(&mut self);
}

/// Factory for device connections (one attempt per call).
pub trait DeviceConnector: Send + Sync {
    /// Make a single connection attempt.
    fn connect(&self, config: &DeviceConfig) -> Result<Box<dyn DeviceTransport>, IpWardenError>;
}

/// Lifecycle state of a [`Session`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Not yet connected.
    Disconnected,
    /// Retry loop in progress.
    Connecting,
    /// Ready for commands.
    Connected,
    /// Torn down (or never came up).
    Closed,
}

/// One logical device session.
pub struct Session<'a> {
    connector: &'a dyn DeviceConnector,
    config: &'a DeviceConfig,
    transport: Option<Box<dyn DeviceTransport>>,
    state: SessionState,
}

impl<'a> Session<'a> {
    /// A session that has not connected yet.
    pub fn new(connector: &'a dyn DeviceConnector, config: &'a DeviceConfig) -> Self {
        Self {
            connector,
            config,
            transport: None,
            state: SessionState::Disconnected,
        }
    }

    /// Create and connect in one step.
    pub fn open(
        connector: &'a dyn DeviceConnector,
        config: &'a DeviceConfig,
    ) -> Result<Self, IpWardenError> {
        let mut session = Self::new(connector, config);
        session.connect()?;
        Ok(session)
    }

    /// Current state.
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Run the bounded connect loop.
    ///
    /// # Errors
    /// `DeviceUnreachable` once every attempt has failed; the session is
    /// then `Closed`.
    pub fn connect(&mut self) -> Result<(), IpWardenError> {
        if self.state != SessionState::Disconnected {
            return Err(IpWardenError::DeviceProtocol(format!(
                "cannot connect a session in state {:?}",
                self.state
            )));
        }

        self.state = SessionState::Connecting;
        let retry = self.config.retry;
        let max_attempts = retry.max_attempts.max(1);
        let mut last_error = String::new();

        for attempt in 1..=max_attempts {
            match self.connector.connect(self.config) {
                Ok(transport) => {
                    tracing::debug!(host = %self.config.host, attempt, "device session connected");
                    self.transport = Some(transport);
                    self.state = SessionState::Connected;
                    return Ok(());
                }
                Err(e) => {
                    tracing::warn!(
                        host = %self.config.host,
                        attempt,
                        max_attempts,
                        error = %e,
                        "device connection attempt failed"
                    );
                    last_error = e.to_string();
                    if attempt < max_attempts {
                        std::thread::sleep(retry.delay_for(attempt));
                    }
                }
            }
        }

        self.state = SessionState::Closed;
        Err(IpWardenError::DeviceUnreachable {
            attempts: max_attempts,
            reason: last_error,
        })
    }

    /// Run a command on the connected device.
    pub fn execute(&mut self, command: &Command) -> Result<Vec<Entry>, IpWardenError> {
        match (self.state, self.transport.as_mut()) {
            (SessionState::Connected, Some(transport)) => transport.execute(command),
            (state, _) => Err(IpWardenError::DeviceProtocol(format!(
                "cannot run {} on a session in state {:?}",
                command.path, state
            ))),
        }
    }

    /// Close the session. Idempotent.
    pub fn close(&mut self) {
        if let Some(mut transport) = self.transport.take() {
            transport.close();
            tracing::debug!(host = %self.config.host, "device session closed");
        }
        self.state = SessionState::Closed;
    }
}

impl Drop for Session<'_> {
    fn drop(&mut self) {
        self.close();
    }
}
