//! Address parsing, CIDR containment and range classification.

pub mod matcher;
pub mod range;
