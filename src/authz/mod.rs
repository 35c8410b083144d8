//! Authorization decisions.

pub mod decision;
pub mod evaluator;
