//! IP / CIDR parsing and allow-list matching.
//!
//! An allow-list entry is free text: an exact address (`203.0.113.5`) or a
//! CIDR block (`198.51.100.0/24`), told apart only by the presence of `/`.
//! Matching never mixes address families: an IPv4-mapped IPv6 address does
//! not satisfy an IPv4 entry, and vice versa.

use crate::address::range::{classify, RangeKind};
use crate::IpWardenError;
use ipnet::IpNet;
use std::net::IpAddr;

/// IPv4 or IPv6.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AddressFamily {
    /// IPv4.
    V4,
    /// IPv6.
    V6,
}

impl AddressFamily {
    /// Family of an address.
    pub fn of(addr: &IpAddr) -> Self {
        match addr {
            IpAddr::V4(_) => AddressFamily::V4,
            IpAddr::V6(_) => AddressFamily::V6,
        }
    }
}

/// Parse a dotted-decimal IPv4 or colon-form IPv6 address.
pub fn parse(text: &str) -> Result<IpAddr, IpWardenError> {
    text.parse::<IpAddr>()
        .map_err(|_| IpWardenError::InvalidAddress(text.to_string()))
}

/// Parse `address/prefix` into the address as written and its prefix length.
///
/// Text without `/` is rejected. The prefix must be 0-32 for IPv4 and 0-128
/// for IPv6. Host bits are allowed and ignored when matching.
pub fn parse_cidr(text: &str) -> Result<(IpAddr, u8), IpWardenError> {
    let net = parse_net(text)?;
    Ok((net.addr(), net.prefix_len()))
}

fn parse_net(text: &str) -> Result<IpNet, IpWardenError> {
    if !text.contains('/') {
        return Err(IpWardenError::InvalidAddress(format!(
            "{} (expected CIDR notation)",
            text
        )));
    }
    text.parse::<IpNet>()
        .map_err(|_| IpWardenError::InvalidAddress(text.to_string()))
}

/// Whether `candidate` is covered by the allow-list entry `allowed`.
///
/// Malformed entries and family mismatches yield `false`; the distinction
/// is only visible in debug logs.
pub fn matches(candidate: &IpAddr, allowed: &str) -> bool {
    if allowed.contains('/') {
        let net = match parse_net(allowed) {
            Ok(net) => net,
            Err(_) => {
                tracing::debug!(allowed, "allow-list entry is not a valid CIDR");
                return false;
            }
        };
        if AddressFamily::of(candidate) != AddressFamily::of(&net.addr()) {
            return false;
        }
        net.contains(candidate)
    } else {
        match parse(allowed) {
            Ok(exact) => *candidate == exact,
            Err(_) => {
                tracing::debug!(allowed, "allow-list entry is not a valid IP address");
                false
            }
        }
    }
}

/// Text form of [`matches`], for callers holding the raw request address.
pub fn matches_text(candidate: &str, allowed: &str) -> bool {
    match parse(candidate) {
        Ok(addr) => matches(&addr, allowed),
        Err(_) => {
            tracing::debug!(candidate, "request address is not a valid IP address");
            false
        }
    }
}

/// True iff `text` parses as an address, or as CIDR when it contains `/`.
pub fn is_valid_ip_or_cidr(text: &str) -> bool {
    if text.contains('/') {
        parse_cidr(text).is_ok()
    } else {
        parse(text).is_ok()
    }
}

/// True unless the address is globally routable unicast.
pub fn is_private_address(addr: &IpAddr) -> bool {
    classify(addr) != RangeKind::Unicast
}

/// Text form of [`is_private_address`]; unparsable text is not private.
pub fn is_private_ip(text: &str) -> bool {
    parse(text).map(|a| is_private_address(&a)).unwrap_or(false)
}
