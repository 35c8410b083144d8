//! Device reconciliation.

pub mod engine;
pub mod owner;
