//! Reserved and private network ranges that outbound fetches may never reach

use ipnet::IpNet;
use once_cell::sync::Lazy;
use std::fmt;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

/// A blocked network prefix with a human-readable label
#[derive(Debug, Clone)]
pub struct BlockedRange {
    pub net: IpNet,
    pub label: &'static str,
}

impl fmt::Display for BlockedRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.net, self.label)
    }
}

/// Blocked networks - both IPv4 and IPv6. First match wins for labelling.
static BLOCKED_RANGES: Lazy<Vec<BlockedRange>> = Lazy::new(|| {
    [
        // === IPv4 ===
        ("0.0.0.0/8", "\"this\" network"),
        ("10.0.0.0/8", "RFC-1918 private"),
        ("100.64.0.0/10", "shared address space (carrier NAT)"),
        ("127.0.0.0/8", "loopback"),
        ("169.254.0.0/16", "link-local / cloud metadata"),
        ("172.16.0.0/12", "RFC-1918 private"),
        ("192.0.0.0/24", "IETF protocol assignments"),
        ("192.0.2.0/24", "TEST-NET-1 documentation"),
        ("192.168.0.0/16", "RFC-1918 private"),
        ("198.18.0.0/15", "benchmarking"),
        ("198.51.100.0/24", "TEST-NET-2 documentation"),
        ("203.0.113.0/24", "TEST-NET-3 documentation"),
        ("224.0.0.0/4", "multicast"),
        ("255.255.255.255/32", "broadcast"),
        ("240.0.0.0/4", "reserved"),

        // === IPv6 ===
        ("::/128", "unspecified"),
        ("::1/128", "loopback"),
        ("64:ff9b:1::/48", "local-use NAT64"),
        ("100::/64", "discard-only"),
        ("2001:db8::/32", "documentation"),
        ("fc00::/7", "unique local"),
        ("fe80::/10", "link-local"),
        ("ff00::/8", "multicast"),
    ]
    .into_iter()
    .map(|(cidr, label)| BlockedRange {
        net: cidr.parse().expect("static CIDR literal"),
        label,
    })
    .collect()
});

/// The full blocked-network table
pub fn blocked_ranges() -> &'static [BlockedRange] {
    &BLOCKED_RANGES
}

/// Well-known NAT64 prefix (RFC 6052), IPv4 in the low 32 bits
const NAT64_PREFIX: [u16; 6] = [0x64, 0xff9b, 0, 0, 0, 0];

/// The IPv4 address an IPv6 address carries, if it is one of the
/// embedding forms: mapped (`::ffff:a.b.c.d`), compatible (`::a.b.c.d`)
/// or well-known NAT64 (`64:ff9b::a.b.c.d`).
fn embedded_ipv4(ip: Ipv6Addr) -> Option<Ipv4Addr> {
    if let Some(v4) = ip.to_ipv4_mapped() {
        return Some(v4);
    }

    let segments = ip.segments();
    let low = (u32::from(segments[6]) << 16) | u32::from(segments[7]);
    let prefix = &segments[0..6];

    // :: and ::1 stay IPv6 and hit their own entries
    if (prefix == [0u16; 6] && low > 1) || prefix == NAT64_PREFIX {
        Some(Ipv4Addr::from(low))
    } else {
        None
    }
}

/// Find the blocked range an address falls in, if any
///
/// IPv6 addresses that embed an IPv4 address are judged by the IPv4
/// address they carry.
pub fn classify(ip: IpAddr) -> Option<&'static BlockedRange> {
    let ip = match ip {
        IpAddr::V6(v6) => match embedded_ipv4(v6) {
            Some(v4) => IpAddr::V4(v4),
            None => IpAddr::V6(v6),
        },
        v4 => v4,
    };

    BLOCKED_RANGES.iter().find(|range| range.net.contains(&ip))
}

/// Check if an address must not be fetched
pub fn is_blocked(ip: IpAddr) -> bool {
    classify(ip).is_some()
}

/// Check a textual address; anything that does not parse counts as blocked
pub fn is_blocked_str(ip: &str) -> bool {
    let trimmed = ip.trim().trim_start_matches('[').trim_end_matches(']');
    match trimmed.parse::<IpAddr>() {
        Ok(addr) => is_blocked(addr),
        Err(_) => true,
    }
}
