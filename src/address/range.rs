//! Special-purpose address range classification.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

/// Assigned range an address falls into.
///
/// Anything that is not [`RangeKind::Unicast`] is treated as non-public.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RangeKind {
    /// `0.0.0.0/8`, `::/128`.
    Unspecified,
    /// `255.255.255.255/32`.
    Broadcast,
    /// `224.0.0.0/4`, `ff00::/8`.
    Multicast,
    /// `169.254.0.0/16`, `fe80::/10`.
    LinkLocal,
    /// `127.0.0.0/8`, `::1/128`.
    Loopback,
    /// `100.64.0.0/10`.
    CarrierGradeNat,
    /// RFC 1918 space.
    Private,
    /// `fc00::/7`.
    UniqueLocal,
    /// `::ffff:0:0/96`.
    Ipv4Mapped,
    /// `::ffff:0:0:0/96`.
    Rfc6145,
    /// `64:ff9b::/96`.
    Rfc6052,
    /// `2002::/16`.
    SixToFour,
    /// `2001::/32`.
    Teredo,
    /// `2001:2::/48`.
    Benchmarking,
    /// `2001:3::/32`.
    Amt,
    /// `2001:4:112::/48`.
    As112v6,
    /// `2001:10::/28`.
    Deprecated,
    /// `2001:20::/28`.
    Orchid2,
    /// `2001:30::/28`.
    DroneRemoteId,
    /// `100::/64`.
    Discard,
    /// Documentation, benchmarking and future-use blocks.
    Reserved,
    /// Globally routable unicast.
    Unicast,
}

const V4_RANGES: &[([u8; 4], u8, RangeKind)] = &[
    ([0, 0, 0, 0], 8, RangeKind::Unspecified),
    ([255, 255, 255, 255], 32, RangeKind::Broadcast),
    ([224, 0, 0, 0], 4, RangeKind::Multicast),
    ([169, 254, 0, 0], 16, RangeKind::LinkLocal),
    ([127, 0, 0, 0], 8, RangeKind::Loopback),
    ([100, 64, 0, 0], 10, RangeKind::CarrierGradeNat),
    ([10, 0, 0, 0], 8, RangeKind::Private),
    ([172, 16, 0, 0], 12, RangeKind::Private),
    ([192, 168, 0, 0], 16, RangeKind::Private),
    ([192, 0, 0, 0], 24, RangeKind::Reserved),
    ([192, 0, 2, 0], 24, RangeKind::Reserved),
    ([192, 88, 99, 0], 24, RangeKind::Reserved),
    ([198, 18, 0, 0], 15, RangeKind::Reserved),
    ([198, 51, 100, 0], 24, RangeKind::Reserved),
    ([203, 0, 113, 0], 24, RangeKind::Reserved),
    ([240, 0, 0, 0], 4, RangeKind::Reserved),
];

const V6_RANGES: &[([u16; 8], u8, RangeKind)] = &[
    ([0, 0, 0, 0, 0, 0, 0, 0], 128, RangeKind::Unspecified),
    ([0xfe80, 0, 0, 0, 0, 0, 0, 0], 10, RangeKind::LinkLocal),
    ([0xff00, 0, 0, 0, 0, 0, 0, 0], 8, RangeKind::Multicast),
    ([0, 0, 0, 0, 0, 0, 0, 1], 128, RangeKind::Loopback),
    ([0xfc00, 0, 0, 0, 0, 0, 0, 0], 7, RangeKind::UniqueLocal),
    ([0, 0, 0, 0, 0, 0xffff, 0, 0], 96, RangeKind::Ipv4Mapped),
    ([0, 0, 0, 0, 0xffff, 0, 0, 0], 96, RangeKind::Rfc6145),
    ([0x64, 0xff9b, 0, 0, 0, 0, 0, 0], 96, RangeKind::Rfc6052),
    ([0x2002, 0, 0, 0, 0, 0, 0, 0], 16, RangeKind::SixToFour),
    ([0x2001, 0, 0, 0, 0, 0, 0, 0], 32, RangeKind::Teredo),
    ([0x2001, 0x2, 0, 0, 0, 0, 0, 0], 48, RangeKind::Benchmarking),
    ([0x2001, 0x3, 0, 0, 0, 0, 0, 0], 32, RangeKind::Amt),
    ([0x2001, 0x4, 0x112, 0, 0, 0, 0, 0], 48, RangeKind::As112v6),
    ([0x2001, 0x10, 0, 0, 0, 0, 0, 0], 28, RangeKind::Deprecated),
    ([0x2001, 0x20, 0, 0, 0, 0, 0, 0], 28, RangeKind::Orchid2),
    ([0x2001, 0x30, 0, 0, 0, 0, 0, 0], 28, RangeKind::DroneRemoteId),
    ([0x2001, 0xdb8, 0, 0, 0, 0, 0, 0], 32, RangeKind::Reserved),
    ([0x100, 0, 0, 0, 0, 0, 0, 0], 64, RangeKind::Discard),
];

/// Classify an address into its assigned range.
pub fn classify(addr: &IpAddr) -> RangeKind {
    match addr {
        IpAddr::V4(v4) => classify_v4(v4),
        IpAddr::V6(v6) => classify_v6(v6),
    }
}

fn classify_v4(addr: &Ipv4Addr) -> RangeKind {
    let value = u32::from(*addr);
    V4_RANGES
        .iter()
        .find(|(network, len, _)| prefix_eq_u32(value, u32::from(Ipv4Addr::from(*network)), *len))
        .map(|(_, _, kind)| *kind)
        .unwrap_or(RangeKind::Unicast)
}

fn classify_v6(addr: &Ipv6Addr) -> RangeKind {
    let value = u128::from(*addr);
    V6_RANGES
        .iter()
        .find(|(segments, len, _)| {
            let network = u128::from(Ipv6Addr::from(*segments));
            prefix_eq_u128(value, network, *len)
        })
        .map(|(_, _, kind)| *kind)
        .unwrap_or(RangeKind::Unicast)
}

fn prefix_eq_u32(a: u32, b: u32, len: u8) -> bool {
    let mask = u32::MAX.checked_shl(32 - u32::from(len)).unwrap_or(0);
    (a & mask) == (b & mask)
}

fn prefix_eq_u128(a: u128, b: u128, len: u8) -> bool {
    let mask = u128::MAX.checked_shl(128 - u32::from(len)).unwrap_or(0);
    (a & mask) == (b & mask)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kind(s: &str) -> RangeKind {
        classify(&s.parse().unwrap())
    }

    #[test]
    fn ipv4_ranges() {
        assert_eq!(kind("0.1.2.3"), RangeKind::Unspecified);
        assert_eq!(kind("255.255.255.255"), RangeKind::Broadcast);
        assert_eq!(kind("239.1.1.1"), RangeKind::Multicast);
        assert_eq!(kind("169.254.10.1"), RangeKind::LinkLocal);
        assert_eq!(kind("127.0.0.1"), RangeKind::Loopback);
        assert_eq!(kind("100.100.0.1"), RangeKind::CarrierGradeNat);
        assert_eq!(kind("172.31.255.1"), RangeKind::Private);
        assert_eq!(kind("172.32.0.1"), RangeKind::Unicast);
        assert_eq!(kind("203.0.113.5"), RangeKind::Reserved);
        assert_eq!(kind("250.0.0.1"), RangeKind::Reserved);
        assert_eq!(kind("1.1.1.1"), RangeKind::Unicast);
    }

    #[test]
    fn ipv6_ranges() {
        assert_eq!(kind("::"), RangeKind::Unspecified);
        assert_eq!(kind("::1"), RangeKind::Loopback);
        assert_eq!(kind("fe80::1"), RangeKind::LinkLocal);
        assert_eq!(kind("ff02::1"), RangeKind::Multicast);
        assert_eq!(kind("fd12:3456::1"), RangeKind::UniqueLocal);
        assert_eq!(kind("::ffff:8.8.8.8"), RangeKind::Ipv4Mapped);
        assert_eq!(kind("64:ff9b::808:808"), RangeKind::Rfc6052);
        assert_eq!(kind("2002:c000:204::1"), RangeKind::SixToFour);
        assert_eq!(kind("2001:0:4136:e378::1"), RangeKind::Teredo);
        assert_eq!(kind("2001:db8::1"), RangeKind::Reserved);
        assert_eq!(kind("100::1"), RangeKind::Discard);
        assert_eq!(kind("2a00:1450:4001::1"), RangeKind::Unicast);
    }

    #[test]
    fn zero_length_prefix_matches_everything() {
        assert!(prefix_eq_u32(1, u32::MAX, 0));
        assert!(prefix_eq_u128(0, u128::MAX, 0));
    }
}
