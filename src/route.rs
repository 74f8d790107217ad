//! IPv4 routing table with longest-prefix-match lookup.
//!
//! Routes are kept newest-first in a flat list: lookup scans every
//! entry and keeps the one with the most netmask bits set, so when two
//! routes tie on prefix length the most recently added wins.  The
//! table is populated during startup and read-only afterwards; for a
//! single-digit route count a linear scan is all the structure this
//! needs.

use std::sync::{Arc, Mutex};

use log::{error, info};

use crate::ipv4::IpIface;
use crate::sched::lock;
use crate::types::Ipv4Addr;

/// A single routing table entry.
#[derive(Clone)]
pub struct Route {
    /// Network address of the covered prefix.
    pub network: Ipv4Addr,
    /// Netmask of the covered prefix.  `network`/`netmask` both zero
    /// is the default route.
    pub netmask: Ipv4Addr,
    /// Gateway.  Zero means directly connected: the destination
    /// itself is the next hop.
    pub nexthop: Ipv4Addr,
    /// Outgoing interface.
    pub iface: Arc<IpIface>,
}

impl Route {
    /// `true` if `dst` falls within this route's prefix.
    #[inline]
    pub fn matches(&self, dst: Ipv4Addr) -> bool {
        dst.in_subnet(self.network, self.netmask)
    }

    /// Next hop for a destination matching this route.
    #[inline]
    pub fn nexthop_for(&self, dst: Ipv4Addr) -> Ipv4Addr {
        if self.nexthop.is_any() {
            dst
        } else {
            self.nexthop
        }
    }
}

/// Flat routing table; see the module docs for the lookup rules.
pub struct RouteTable {
    routes: Vec<Route>,
}

impl RouteTable {
    pub const fn new() -> Self {
        Self { routes: Vec::new() }
    }

    /// Add a route.  Newest routes take precedence among equal-length
    /// prefixes.
    pub fn add(&mut self, route: Route) {
        self.routes.insert(0, route);
    }

    /// Longest-prefix-match lookup.
    pub fn lookup(&self, dst: Ipv4Addr) -> Option<&Route> {
        let mut best: Option<&Route> = None;
        for route in &self.routes {
            if !route.matches(dst) {
                continue;
            }
            match best {
                Some(current)
                    if route.netmask.to_u32().count_ones()
                        <= current.netmask.to_u32().count_ones() => {}
                _ => best = Some(route),
            }
        }
        best
    }
}

impl Default for RouteTable {
    fn default() -> Self {
        Self::new()
    }
}

static TABLE: Mutex<RouteTable> = Mutex::new(RouteTable::new());

/// Add a route to the global table.
///
/// Must not be called after [`crate::netstack::run`].
pub fn add(network: Ipv4Addr, netmask: Ipv4Addr, nexthop: Ipv4Addr, iface: &Arc<IpIface>) {
    lock(&TABLE).add(Route {
        network,
        netmask,
        nexthop,
        iface: Arc::clone(iface),
    });
    info!(
        "route added: network={}, netmask={}, nexthop={}, iface={}",
        network, netmask, nexthop, iface.unicast
    );
}

/// Install a default route through `gateway`, parsed from dotted-quad
/// notation.
pub fn set_default_gateway(iface: &Arc<IpIface>, gateway: &str) -> Result<(), crate::NetError> {
    let gw: Ipv4Addr = gateway.parse().map_err(|_| {
        error!("bad gateway address: {}", gateway);
        crate::NetError::Malformed
    })?;
    add(Ipv4Addr::ANY, Ipv4Addr::ANY, gw, iface);
    Ok(())
}

/// Look `dst` up in the global table.
pub fn lookup(dst: Ipv4Addr) -> Option<Route> {
    lock(&TABLE).lookup(dst).cloned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ipv4::IpIface;

    fn ip(s: &str) -> Ipv4Addr {
        s.parse().unwrap()
    }

    fn iface(addr: &str) -> Arc<IpIface> {
        IpIface::new(ip(addr), ip("255.255.255.0"))
    }

    #[test]
    fn longest_prefix_wins() {
        let mut table = RouteTable::new();
        let gw_iface = iface("192.0.2.2");
        table.add(Route {
            network: ip("0.0.0.0"),
            netmask: ip("0.0.0.0"),
            nexthop: ip("192.0.2.1"),
            iface: Arc::clone(&gw_iface),
        });
        table.add(Route {
            network: ip("192.0.2.0"),
            netmask: ip("255.255.255.0"),
            nexthop: ip("0.0.0.0"),
            iface: Arc::clone(&gw_iface),
        });

        let direct = table.lookup(ip("192.0.2.42")).unwrap();
        assert_eq!(direct.netmask, ip("255.255.255.0"));
        assert_eq!(direct.nexthop_for(ip("192.0.2.42")), ip("192.0.2.42"));

        let via_default = table.lookup(ip("8.8.8.8")).unwrap();
        assert_eq!(via_default.netmask, ip("0.0.0.0"));
        assert_eq!(via_default.nexthop_for(ip("8.8.8.8")), ip("192.0.2.1"));
    }

    #[test]
    fn equal_prefixes_tie_break_newest_first() {
        let mut table = RouteTable::new();
        table.add(Route {
            network: ip("10.0.0.0"),
            netmask: ip("255.0.0.0"),
            nexthop: ip("10.0.0.1"),
            iface: iface("10.0.0.2"),
        });
        table.add(Route {
            network: ip("10.0.0.0"),
            netmask: ip("255.0.0.0"),
            nexthop: ip("10.0.0.254"),
            iface: iface("10.0.0.3"),
        });

        let chosen = table.lookup(ip("10.1.2.3")).unwrap();
        assert_eq!(chosen.nexthop, ip("10.0.0.254"));
    }

    #[test]
    fn lookup_is_idempotent_and_total_miss_is_none() {
        let mut table = RouteTable::new();
        table.add(Route {
            network: ip("192.0.2.0"),
            netmask: ip("255.255.255.0"),
            nexthop: ip("0.0.0.0"),
            iface: iface("192.0.2.2"),
        });
        let first = table.lookup(ip("192.0.2.9")).unwrap().network;
        let second = table.lookup(ip("192.0.2.9")).unwrap().network;
        assert_eq!(first, second);
        assert!(table.lookup(ip("198.51.100.1")).is_none());
    }
}
