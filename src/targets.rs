//! Target expansion and exclusion filtering.
//!
//! Literal tokens come first in the order given, followed by the usable
//! hosts of each range in address order. Duplicates are dropped across the
//! whole merged sequence.

use std::collections::HashSet;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use ipnetwork::{IpNetwork, Ipv4Network};
use log::warn;

use crate::error::ConfigError;

/// Validates every range up front and returns the lazy target sequence.
///
/// A malformed range fails the whole call, nothing is yielded.
pub fn expand_targets<L, R>(literals: L, ranges: R) -> Result<TargetExpander, ConfigError>
where
    L: IntoIterator,
    L::Item: AsRef<str>,
    R: IntoIterator,
    R::Item: AsRef<str>,
{
    let literals: Vec<String> = literals
        .into_iter()
        .map(|t| t.as_ref().trim().to_string())
        .filter(|t| !t.is_empty())
        .collect();

    let mut networks = Vec::new();
    for spec in ranges {
        let spec = spec.as_ref().trim();
        if spec.is_empty() {
            continue;
        }
        let network = spec
            .parse::<IpNetwork>()
            .map_err(|e| ConfigError::InvalidRange {
                spec: spec.to_string(),
                reason: e.to_string(),
            })?;
        networks.push(network);
    }

    Ok(TargetExpander {
        literals: literals.into_iter(),
        ranges: networks.into_iter(),
        current: None,
        seen: HashSet::new(),
    })
}

/// Lazy deduplicated address sequence produced by [`expand_targets`].
#[derive(Debug)]
pub struct TargetExpander {
    literals: std::vec::IntoIter<String>,
    ranges: std::vec::IntoIter<IpNetwork>,
    current: Option<HostRange>,
    seen: HashSet<String>,
}

impl Iterator for TargetExpander {
    type Item = String;

    fn next(&mut self) -> Option<String> {
        for literal in self.literals.by_ref() {
            if self.seen.insert(literal.clone()) {
                return Some(literal);
            }
        }
        loop {
            if let Some(hosts) = self.current.as_mut() {
                for addr in hosts.by_ref() {
                    let addr = addr.to_string();
                    if self.seen.insert(addr.clone()) {
                        return Some(addr);
                    }
                }
            }
            self.current = Some(HostRange::usable(self.ranges.next()?));
        }
    }
}

/// Usable host addresses of one network.
///
/// IPv4 prefixes shorter than /31 skip the network and broadcast addresses;
/// IPv6 prefixes shorter than /127 skip the subnet-router anycast address.
#[derive(Debug)]
struct HostRange {
    next: Option<u128>,
    last: u128,
    v6: bool,
}

impl HostRange {
    fn usable(network: IpNetwork) -> Self {
        match network {
            IpNetwork::V4(net) => {
                let first = u32::from(net.network());
                let last = u32::from(net.broadcast());
                let (first, last) = if net.prefix() < 31 {
                    (first + 1, last - 1)
                } else {
                    (first, last)
                };
                HostRange {
                    next: Some(u128::from(first)),
                    last: u128::from(last),
                    v6: false,
                }
            }
            IpNetwork::V6(net) => {
                let prefix = u32::from(net.prefix());
                let mask = if prefix == 0 {
                    0
                } else {
                    u128::MAX << (128 - prefix)
                };
                let first = u128::from(net.ip()) & mask;
                let last = first | !mask;
                let first = if prefix < 127 { first + 1 } else { first };
                HostRange {
                    next: Some(first),
                    last,
                    v6: true,
                }
            }
        }
    }
}

impl Iterator for HostRange {
    type Item = IpAddr;

    fn next(&mut self) -> Option<IpAddr> {
        let current = self.next?;
        if current > self.last {
            self.next = None;
            return None;
        }
        self.next = current.checked_add(1);
        let addr = if self.v6 {
            IpAddr::V6(Ipv6Addr::from(current))
        } else {
            IpAddr::V4(Ipv4Addr::from(current as u32))
        };
        Some(addr)
    }
}

/// Addresses and networks removed from the target list.
#[derive(Debug, Default, Clone)]
pub struct ExclusionSet {
    addresses: HashSet<String>,
    networks: Vec<IpNetwork>,
}

impl ExclusionSet {
    /// Builds the set from user entries; each entry may itself be a
    /// comma-separated list.
    ///
    /// A bare IPv4 address ending in `.0.0` is widened to its /16 and one
    /// ending in `.0` to its /24. This is a convenience shorthand for
    /// "network-looking" addresses, not a CIDR parse. Entries that fail to
    /// parse are logged and skipped.
    pub fn parse<I>(specs: I) -> Self
    where
        I: IntoIterator,
        I::Item: AsRef<str>,
    {
        let mut set = ExclusionSet::default();
        for raw in specs {
            for spec in raw.as_ref().split(',').map(str::trim) {
                if spec.is_empty() {
                    continue;
                }
                if let Err(reason) = set.add(spec) {
                    warn!("bad exclusion entry '{spec}': {reason}");
                }
            }
        }
        set
    }

    fn add(&mut self, spec: &str) -> Result<(), String> {
        if spec.contains('/') {
            let net = spec.parse::<IpNetwork>().map_err(|e| e.to_string())?;
            self.networks.push(net);
            return Ok(());
        }
        let ip = spec.parse::<IpAddr>().map_err(|e| e.to_string())?;
        if let IpAddr::V4(v4) = ip {
            let [a, b, c, d] = v4.octets();
            let widened = match (c, d) {
                (0, 0) => Some((Ipv4Addr::new(a, b, 0, 0), 16)),
                (_, 0) => Some((Ipv4Addr::new(a, b, c, 0), 24)),
                _ => None,
            };
            if let Some((base, prefix)) = widened {
                let net = Ipv4Network::new(base, prefix).map_err(|e| e.to_string())?;
                self.networks.push(IpNetwork::V4(net));
                return Ok(());
            }
        }
        self.addresses.insert(ip.to_string());
        Ok(())
    }

    pub fn is_empty(&self) -> bool {
        self.addresses.is_empty() && self.networks.is_empty()
    }

    /// True if the address matches an excluded address or range.
    ///
    /// Tokens that are not IP literals only match exactly.
    pub fn excludes(&self, address: &str) -> bool {
        if self.addresses.contains(address) {
            return true;
        }
        match address.parse::<IpAddr>() {
            Ok(ip) => {
                self.addresses.contains(&ip.to_string())
                    || self.networks.iter().any(|net| net.contains(ip))
            }
            Err(_) => false,
        }
    }

    /// Final filter pass over an expanded sequence.
    pub fn filter<'a, I>(&'a self, targets: I) -> impl Iterator<Item = String> + 'a
    where
        I: IntoIterator<Item = String>,
        I::IntoIter: 'a,
    {
        targets.into_iter().filter(move |t| !self.excludes(t))
    }
}
