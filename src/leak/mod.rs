pub mod probe;
pub mod stun;

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use lazy_static::lazy_static;
use regex::Regex;
use serde::Serialize;

use crate::config::PrivateRangePolicy;

pub use probe::LeakProbe;
pub use stun::{CandidateSource, StunCandidateSource};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum LeakStatus {
    Pending,
    Clean,
    Leaked,
}

impl LeakStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, LeakStatus::Pending)
    }
}

/// Verdict of the ICE-candidate leak probe.
///
/// Leaves `Pending` at most once; terminal states are never overwritten.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LeakProbeResult {
    status: LeakStatus,
    exposed_address: Option<String>,
}

impl Default for LeakProbeResult {
    fn default() -> Self {
        Self::pending()
    }
}

impl LeakProbeResult {
    pub fn pending() -> Self {
        Self {
            status: LeakStatus::Pending,
            exposed_address: None,
        }
    }

    pub fn status(&self) -> LeakStatus {
        self.status
    }

    pub fn exposed_address(&self) -> Option<&str> {
        self.exposed_address.as_deref()
    }

    /// Inspects one candidate line. Returns true if this flipped the verdict to `Leaked`.
    pub fn observe_candidate(&mut self, candidate: &str, policy: PrivateRangePolicy) -> bool {
        if self.status.is_terminal() {
            return false;
        }
        match extract_addresses(candidate)
            .into_iter()
            .find(|addr| !is_private(addr, policy))
        {
            Some(exposed) => {
                self.status = LeakStatus::Leaked;
                self.exposed_address = Some(exposed);
                true
            }
            None => false,
        }
    }

    /// Deadline passed without a public address. Returns true if this flipped the verdict.
    pub fn expire(&mut self) -> bool {
        if self.status.is_terminal() {
            return false;
        }
        self.status = LeakStatus::Clean;
        true
    }

    /// Adopts `other` only while still pending.
    pub fn settle_from(&mut self, other: &LeakProbeResult) -> bool {
        if self.status.is_terminal() || !other.status.is_terminal() {
            return false;
        }
        *self = other.clone();
        true
    }
}

lazy_static! {
    static ref IPV4_LITERAL: Regex =
        Regex::new(r"\b(?:[0-9]{1,3}\.){3}[0-9]{1,3}\b").expect("IPv4 literal pattern");
    // Any colon-bearing run of hex digits, colons and dots; parsing decides.
    // Dots are kept so IPv4-mapped tails like `::ffff:192.168.1.5` stay whole.
    static ref IPV6_LITERAL: Regex =
        Regex::new(r"[0-9A-Fa-f.]*:[0-9A-Fa-f:.]*").expect("IPv6 literal pattern");
}

/// Every IPv4/IPv6 literal in a candidate line that parses as an address,
/// in the order they appear. Dotted quads inside an IPv6 literal are part
/// of that literal, not separate hits.
pub fn extract_addresses(candidate: &str) -> Vec<String> {
    let v6: Vec<(usize, usize, String)> = IPV6_LITERAL
        .find_iter(candidate)
        .filter_map(|m| {
            let text = m.as_str().trim_end_matches('.');
            let addr = text.parse::<Ipv6Addr>().ok()?;
            Some((m.start(), m.start() + text.len(), addr.to_string()))
        })
        .collect();
    let v4 = IPV4_LITERAL
        .find_iter(candidate)
        .filter(|m| !v6.iter().any(|(start, end, _)| m.start() < *end && *start < m.end()))
        .filter_map(|m| {
            let addr = m.as_str().parse::<Ipv4Addr>().ok()?;
            Some((m.start(), m.end(), addr.to_string()))
        });

    let mut hits: Vec<(usize, usize, String)> = v4.chain(v6.iter().cloned()).collect();
    hits.sort_by_key(|(start, _, _)| *start);

    let mut found: Vec<String> = Vec::new();
    for (_, _, addr) in hits {
        if !found.contains(&addr) {
            found.push(addr);
        }
    }
    found
}

pub fn is_private(address: &str, policy: PrivateRangePolicy) -> bool {
    match policy {
        PrivateRangePolicy::Prefix => is_private_by_prefix(address),
        PrivateRangePolicy::Cidr => address
            .parse::<IpAddr>()
            .map(|addr| is_private_by_cidr(&addr))
            .unwrap_or(false),
    }
}

/// Plain string check on "10." / "172." / "192.168.".
/// Over-matches 172.0.0.0/8 outside 172.16.0.0/12.
pub fn is_private_by_prefix(address: &str) -> bool {
    ["10.", "172.", "192.168."]
        .iter()
        .any(|prefix| address.starts_with(prefix))
}

/// RFC 1918, plus addresses that never leave the local link or host.
pub fn is_private_by_cidr(addr: &IpAddr) -> bool {
    match addr {
        IpAddr::V4(v4) => v4.is_private() || v4.is_loopback() || v4.is_link_local() || v4.is_unspecified(),
        IpAddr::V6(v6) => {
            if let Some(mapped) = v6.to_ipv4_mapped() {
                return is_private_by_cidr(&IpAddr::V4(mapped));
            }
            let first = v6.segments()[0];
            v6.is_loopback()
                || v6.is_unspecified()
                || (first & 0xfe00) == 0xfc00
                || (first & 0xffc0) == 0xfe80
        }
    }
}
