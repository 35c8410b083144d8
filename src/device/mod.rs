//! External device access: wire codec, sessions and connectors.

pub mod memory;
pub mod protocol;
pub mod routeros;
pub mod session;
