//! Owner attribution for device entries.
//!
//! The device has no foreign keys, so ownership is carried in the free-text
//! comment as `License:<id>`. Both the add and remove paths go through this
//! type so the format cannot drift between them.

use std::fmt;

/// Comment prefix marking an entry as owned by a license.
pub const OWNER_PREFIX: &str = "License:";

/// Owning license of a device entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct OwnerTag(i64);

impl OwnerTag {
    /// Tag for a license id.
    pub fn new(license_id: i64) -> Self {
        Self(license_id)
    }

    /// License id carried by the tag.
    pub fn license_id(self) -> i64 {
        self.0
    }

    /// Comment text written to the device.
    pub fn comment(self) -> String {
        format!("{}{}", OWNER_PREFIX, self.0)
    }

    /// Recover the tag from a device comment. Anything else is `None`.
    pub fn parse(comment: &str) -> Option<Self> {
        comment
            .strip_prefix(OWNER_PREFIX)
            .and_then(|id| id.parse::<i64>().ok())
            .map(Self)
    }
}

impl fmt::Display for OwnerTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", OWNER_PREFIX, self.0)
    }
}
