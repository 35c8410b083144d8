//! In-memory RouterOS-style device.
//!
//! Interprets `print`, `add` and `remove` on any menu path, honouring `?`
//! filters and handing out `*N` identifiers the way the real API does.
//! Counters for connection attempts, open sessions and mutating commands
//! let tests assert on side effects.

use crate::config::DeviceConfig;
use crate::device::protocol::{Command, Entry, ID_ATTRIBUTE};
use crate::device::session::{DeviceConnector, DeviceTransport};
use crate::IpWardenError;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

#[derive(Default)]
struct DeviceState {
    tables: BTreeMap<String, Vec<Entry>>,
    next_id: u64,
    connect_attempts: u32,
    refuse_remaining: u32,
    unreachable: bool,
    open_sessions: u32,
    mutations: u32,
    log: Vec<Command>,
}

impl DeviceState {
    fn apply(&mut self, command: &Command) -> Result<Vec<Entry>, IpWardenError> {
        self.log.push(command.clone());
        if command.is_mutation() {
            self.mutations += 1;
        }
        let menu = command.menu().to_string();

        match command.verb() {
            "print" => Ok(self
                .tables
                .get(&menu)
                .map(|rows| {
                    rows.iter()
                        .filter(|row| row.matches_all(&command.queries))
                        .cloned()
                        .collect()
                })
                .unwrap_or_default()),
            "add" => {
                self.next_id += 1;
                let mut entry: Entry = command.attributes.iter().cloned().collect();
                entry.insert(ID_ATTRIBUTE, format!("*{:X}", self.next_id));
                self.tables.entry(menu).or_default().push(entry);
                Ok(Vec::new())
            }
            "remove" => {
                let id = command
                    .attributes
                    .iter()
                    .find(|(k, _)| k == ID_ATTRIBUTE)
                    .map(|(_, v)| v.clone())
                    .unwrap_or_default();
                let rows = self.tables.entry(menu).or_default();
                let before = rows.len();
                rows.retain(|row| row.id() != Some(id.as_str()));
                if rows.len() == before {
                    return Err(IpWardenError::DeviceTrap {
                        command: command.path.clone(),
                        message: "no such item".to_string(),
                    });
                }
                Ok(Vec::new())
            }
            _ => Err(IpWardenError::DeviceTrap {
                command: command.path.clone(),
                message: "no such command".to_string(),
            }),
        }
    }
}

/// Simulated device; clones share state.
#[derive(Clone, Default)]
pub struct MemoryDevice {
    state: Arc<Mutex<DeviceState>>,
}

impl MemoryDevice {
    /// Empty device.
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, DeviceState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Refuse the next `n` connection attempts.
    pub fn refuse_next(&self, n: u32) {
        self.lock().refuse_remaining = n;
    }

    /// Refuse every connection attempt while set.
    pub fn set_unreachable(&self, unreachable: bool) {
        self.lock().unreachable = unreachable;
    }

    /// Connection attempts so far, successful or not.
    pub fn connect_attempts(&self) -> u32 {
        self.lock().connect_attempts
    }

    /// Sessions connected and not yet closed.
    pub fn open_sessions(&self) -> u32 {
        self.lock().open_sessions
    }

    /// `add` / `remove` commands executed so far.
    pub fn mutating_commands(&self) -> u32 {
        self.lock().mutations
    }

    /// Every command executed, in order.
    pub fn command_log(&self) -> Vec<Command> {
        self.lock().log.clone()
    }

    /// Rows under a menu path, e.g. `/ip/firewall/nat`.
    pub fn rows(&self, menu: &str) -> Vec<Entry> {
        self.lock().tables.get(menu).cloned().unwrap_or_default()
    }

    /// Insert a row directly, bypassing the command path (for drift setup).
    pub fn seed(&self, menu: &str, attributes: &[(&str, &str)]) {
        let mut state = self.lock();
        state.next_id += 1;
        let mut entry: Entry = attributes.iter().copied().collect();
        entry.insert(ID_ATTRIBUTE, format!("*{:X}", state.next_id));
        state.tables.entry(menu.to_string()).or_default().push(entry);
    }
}

impl DeviceConnector for MemoryDevice {
    fn connect(&self, config: &DeviceConfig) -> Result<Box<dyn DeviceTransport>, IpWardenError> {
        let mut state = self.lock();
        state.connect_attempts += 1;

        if state.unreachable || state.refuse_remaining > 0 {
            state.refuse_remaining = state.refuse_remaining.saturating_sub(1);
            return Err(IpWardenError::DeviceIo(format!(
                "connection refused by {}:{}",
                config.host, config.port
            )));
        }

        state.open_sessions += 1;
        Ok(Box::new(MemoryTransport {
            state: Arc::clone(&self.state),
            open: true,
        }))
    }
}

struct MemoryTransport {
    state: Arc<Mutex<DeviceState>>,
    open: bool,
}

impl DeviceTransport for MemoryTransport {
    fn execute(&mut self, command: &Command) -> Result<Vec<Entry>, IpWardenError> {
        if !self.open {
            return Err(IpWardenError::DeviceIo("transport closed".to_string()));
        }
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .apply(command)
    }

    fn close(&mut self) {
        if self.open {
            self.open = false;
            let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
            state.open_sessions = state.open_sessions.saturating_sub(1);
        }
    }
}
