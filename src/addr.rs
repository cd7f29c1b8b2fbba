//! Rotation sequences for local addresses and proxy endpoints.
//!
//! Both sequences are infinite and cyclic; the pair of values drawn from them
//! on each call forms the rotation key a [`Network`](crate::Network) caches
//! its clients under.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::str::FromStr;

use crate::{HttpError, Result};

/// One configured local-address entry: a single IP or a CIDR block.
#[derive(Debug, Clone)]
enum AddressEntry {
    Single(IpAddr),
    V4 { base: u32, prefix: u8 },
    V6 { base: u128, prefix: u8 },
}

impl AddressEntry {
    /// First host and host count for a CIDR entry.
    ///
    /// Matches the usual host semantics: an IPv4 block excludes the network
    /// and broadcast addresses (except /31 and /32); an IPv6 block excludes
    /// only the subnet-router anycast address (except /127 and /128).
    fn hosts(&self) -> (u128, u128) {
        match *self {
            AddressEntry::Single(_) => (0, 1),
            AddressEntry::V4 { base, prefix } => {
                let total = 1u128 << (32 - u32::from(prefix));
                if prefix >= 31 {
                    (u128::from(base), total)
                } else {
                    (u128::from(base) + 1, total - 2)
                }
            }
            AddressEntry::V6 { base, prefix } => {
                if prefix >= 127 {
                    (base, 1u128 << (128 - u32::from(prefix)))
                } else if prefix == 0 {
                    (base + 1, u128::MAX)
                } else {
                    (base + 1, (1u128 << (128 - u32::from(prefix))) - 1)
                }
            }
        }
    }

    fn address_at(&self, offset: u128) -> IpAddr {
        let (first, _) = self.hosts();
        match *self {
            AddressEntry::Single(ip) => ip,
            AddressEntry::V4 { .. } => {
                IpAddr::V4(Ipv4Addr::from((first + offset) as u32))
            }
            AddressEntry::V6 { .. } => IpAddr::V6(Ipv6Addr::from(first + offset)),
        }
    }
}

/// Infinite cyclic sequence over the configured local addresses.
///
/// CIDR entries expand to their host addresses in ascending order before the
/// cycle moves to the next entry. An empty configuration yields `None`
/// forever (no local-address binding).
#[derive(Debug)]
pub struct AddressCycle {
    entries: Vec<AddressEntry>,
    entry_idx: usize,
    offset: u128,
}

impl AddressCycle {
    /// Parses and validates address specs; invalid entries are configuration
    /// errors.
    pub fn parse(specs: &[String]) -> Result<Self> {
        let mut entries = Vec::with_capacity(specs.len());
        for spec in specs {
            entries.push(parse_entry(spec)?);
        }
        Ok(Self {
            entries,
            entry_idx: 0,
            offset: 0,
        })
    }

    /// Advances the cycle by one step.
    pub fn next_address(&mut self) -> Option<IpAddr> {
        if self.entries.is_empty() {
            return None;
        }
        let entry = &self.entries[self.entry_idx];
        let address = entry.address_at(self.offset);
        let (_, count) = entry.hosts();
        self.offset += 1;
        if self.offset >= count {
            self.offset = 0;
            self.entry_idx = (self.entry_idx + 1) % self.entries.len();
        }
        Some(address)
    }
}

fn parse_entry(spec: &str) -> Result<AddressEntry> {
    if let Some((addr, prefix)) = spec.split_once('/') {
        let prefix: u8 = prefix
            .parse()
            .map_err(|_| bad_address(spec))?;
        match IpAddr::from_str(addr).map_err(|_| bad_address(spec))? {
            IpAddr::V4(v4) => {
                if prefix > 32 {
                    return Err(bad_address(spec));
                }
                let mask = if prefix == 0 { 0 } else { u32::MAX << (32 - u32::from(prefix)) };
                Ok(AddressEntry::V4 {
                    base: u32::from(v4) & mask,
                    prefix,
                })
            }
            IpAddr::V6(v6) => {
                if prefix > 128 {
                    return Err(bad_address(spec));
                }
                let mask = if prefix == 0 {
                    0
                } else {
                    u128::MAX << (128 - u32::from(prefix))
                };
                Ok(AddressEntry::V6 {
                    base: u128::from(v6) & mask,
                    prefix,
                })
            }
        }
    } else {
        IpAddr::from_str(spec)
            .map(AddressEntry::Single)
            .map_err(|_| bad_address(spec))
    }
}

fn bad_address(spec: &str) -> HttpError {
    HttpError::Configuration(format!("invalid local address: {spec}"))
}

/// requests-style proxy pattern shorthand, normalized to `scheme://`.
fn normalize_pattern(pattern: &str) -> String {
    let trimmed = pattern.trim_end_matches(':');
    match trimmed {
        "all" | "http" | "https" | "socks4" | "socks5" | "socks5h" => format!("{trimmed}://"),
        _ => pattern.to_string(),
    }
}

#[derive(Debug)]
struct ProxyEntry {
    pattern: String,
    urls: Vec<String>,
    idx: usize,
}

/// Infinite cyclic sequence of proxy assignments.
///
/// Each URL pattern owns its own cyclic URL list; one step draws the current
/// URL of every pattern and advances each list by one. The drawn ordered
/// tuple is part of the rotation key.
#[derive(Debug)]
pub struct ProxyCycle {
    entries: Vec<ProxyEntry>,
}

impl ProxyCycle {
    /// Builds a cycle from `(pattern, urls)` rules, preserving rule order.
    pub fn new(rules: &[(String, Vec<String>)]) -> Self {
        let entries = rules
            .iter()
            .filter(|(_, urls)| !urls.is_empty())
            .map(|(pattern, urls)| ProxyEntry {
                pattern: normalize_pattern(pattern),
                urls: urls.clone(),
                idx: 0,
            })
            .collect();
        Self { entries }
    }

    /// Draws the next proxy assignment tuple.
    pub fn next_slot(&mut self) -> Vec<(String, String)> {
        self.entries
            .iter_mut()
            .map(|entry| {
                let url = entry.urls[entry.idx].clone();
                entry.idx = (entry.idx + 1) % entry.urls.len();
                (entry.pattern.clone(), url)
            })
            .collect()
    }
}
