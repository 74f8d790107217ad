//! ARP for Ethernet/IPv4 pairs (RFC 826).
//!
//! Incoming messages first merge into the cache (an update succeeds
//! only for already-known senders), then — if the target protocol
//! address is ours — insert the sender and answer requests with a
//! unicast reply.
//!
//! The cache is a fixed array of 32 entries with a small state
//! machine per entry:
//!
//! ```text
//! FREE -> INCOMPLETE   resolve miss; a REQUEST is broadcast
//! INCOMPLETE -> RESOLVED   matching reply or gratuitous update
//! RESOLVED -> RESOLVED     refresh on every matching ingress
//! RESOLVED -> FREE         sweep finds the entry >= 30 s old
//! ```
//!
//! STATIC entries are exempt from the sweep.  Cache methods take an
//! explicit `now` so the periodic sweep and the aging tests share one
//! code path.

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use log::{debug, error};

use crate::ethernet;
use crate::ingress;
use crate::ipv4::IpIface;
use crate::netdev::{self, NetDevice};
use crate::sched::lock;
use crate::timer;
use crate::types::{Ipv4Addr, MacAddr, NetError};

const HRD_ETHER: u16 = 0x0001;
const PRO_IP: u16 = ethernet::TYPE_IP;

const OP_REQUEST: u16 = 1;
const OP_REPLY: u16 = 2;

/// Size of an Ethernet/IPv4 ARP message.
pub const MSG_SIZE: usize = 28;

const CACHE_SIZE: usize = 32;
const CACHE_TIMEOUT: Duration = Duration::from_secs(30);

// =============================================================================
// Message
// =============================================================================

struct ArpMessage {
    op: u16,
    sha: MacAddr,
    spa: Ipv4Addr,
    #[allow(dead_code)]
    tha: MacAddr,
    tpa: Ipv4Addr,
}

fn parse(data: &[u8]) -> Result<ArpMessage, NetError> {
    if data.len() < MSG_SIZE {
        error!("too short, len={}", data.len());
        return Err(NetError::TooShort);
    }
    let hrd = u16::from_be_bytes([data[0], data[1]]);
    let pro = u16::from_be_bytes([data[2], data[3]]);
    let hln = data[4];
    let pln = data[5];
    if hrd != HRD_ETHER || hln != ethernet::ADDR_LEN as u8 {
        error!("hardware address is not Ethernet");
        return Err(NetError::Malformed);
    }
    if pro != PRO_IP || pln != 4 {
        error!("protocol address is not IPv4");
        return Err(NetError::Malformed);
    }
    Ok(ArpMessage {
        op: u16::from_be_bytes([data[6], data[7]]),
        sha: MacAddr([data[8], data[9], data[10], data[11], data[12], data[13]]),
        spa: Ipv4Addr([data[14], data[15], data[16], data[17]]),
        tha: MacAddr([data[18], data[19], data[20], data[21], data[22], data[23]]),
        tpa: Ipv4Addr([data[24], data[25], data[26], data[27]]),
    })
}

fn build(op: u16, sha: MacAddr, spa: Ipv4Addr, tha: MacAddr, tpa: Ipv4Addr) -> [u8; MSG_SIZE] {
    let mut msg = [0u8; MSG_SIZE];
    msg[0..2].copy_from_slice(&HRD_ETHER.to_be_bytes());
    msg[2..4].copy_from_slice(&PRO_IP.to_be_bytes());
    msg[4] = ethernet::ADDR_LEN as u8;
    msg[5] = 4;
    msg[6..8].copy_from_slice(&op.to_be_bytes());
    msg[8..14].copy_from_slice(&sha.0);
    msg[14..18].copy_from_slice(&spa.0);
    msg[18..24].copy_from_slice(&tha.0);
    msg[24..28].copy_from_slice(&tpa.0);
    msg
}

// =============================================================================
// Cache
// =============================================================================

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
enum ArpState {
    Free,
    Incomplete,
    Resolved,
    Static,
}

#[derive(Clone, Copy)]
struct ArpEntry {
    state: ArpState,
    pa: Ipv4Addr,
    ha: MacAddr,
    timestamp: Option<Instant>,
}

impl ArpEntry {
    const EMPTY: Self = Self {
        state: ArpState::Free,
        pa: Ipv4Addr::ANY,
        ha: MacAddr::ZERO,
        timestamp: None,
    };
}

struct ArpCache {
    entries: [ArpEntry; CACHE_SIZE],
}

impl ArpCache {
    const fn new() -> Self {
        Self {
            entries: [ArpEntry::EMPTY; CACHE_SIZE],
        }
    }

    fn select(&self, pa: Ipv4Addr) -> Option<usize> {
        self.entries
            .iter()
            .position(|e| e.state != ArpState::Free && e.pa == pa)
    }

    fn delete(&mut self, index: usize) {
        let entry = &mut self.entries[index];
        debug!("DELETE: pa={}, ha={}", entry.pa, entry.ha);
        *entry = ArpEntry::EMPTY;
    }

    /// First free slot, evicting the oldest entry when none is free.
    fn alloc(&mut self) -> usize {
        let mut oldest: Option<usize> = None;
        for (index, entry) in self.entries.iter().enumerate() {
            if entry.state == ArpState::Free {
                return index;
            }
            match oldest {
                Some(o) if self.entries[o].timestamp <= entry.timestamp => {}
                _ => oldest = Some(index),
            }
        }
        let victim = oldest.unwrap_or(0);
        self.delete(victim);
        victim
    }

    /// Update an existing entry; fails (returns `false`) for unknown
    /// protocol addresses.
    fn update(&mut self, pa: Ipv4Addr, ha: MacAddr, now: Instant) -> bool {
        let Some(index) = self.select(pa) else {
            return false;
        };
        let entry = &mut self.entries[index];
        entry.state = ArpState::Resolved;
        entry.ha = ha;
        entry.timestamp = Some(now);
        debug!("UPDATE: pa={}, ha={}", pa, ha);
        true
    }

    fn insert(&mut self, pa: Ipv4Addr, ha: MacAddr, state: ArpState, now: Instant) -> usize {
        let index = self.alloc();
        self.entries[index] = ArpEntry {
            state,
            pa,
            ha,
            timestamp: Some(now),
        };
        debug!("INSERT: pa={}, ha={}", pa, ha);
        index
    }

    /// Expire non-static entries untouched for [`CACHE_TIMEOUT`].
    fn sweep(&mut self, now: Instant) {
        for index in 0..self.entries.len() {
            let entry = &self.entries[index];
            if entry.state == ArpState::Free || entry.state == ArpState::Static {
                continue;
            }
            if let Some(timestamp) = entry.timestamp {
                if now.duration_since(timestamp) >= CACHE_TIMEOUT {
                    self.delete(index);
                }
            }
        }
    }
}

static CACHE: Mutex<ArpCache> = Mutex::new(ArpCache::new());

/// Seed the cache with a permanent entry, exempt from expiry.
pub fn add_static(pa: Ipv4Addr, ha: MacAddr) {
    lock(&CACHE).insert(pa, ha, ArpState::Static, Instant::now());
}

// =============================================================================
// Resolve
// =============================================================================

/// Outcome of a successful [`resolve`] call.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Resolution {
    /// The hardware address is known.
    Found(MacAddr),
    /// A request is in flight; retry later.
    Incomplete,
}

/// Resolve `pa` through `iface`'s device.
///
/// A cache miss inserts an INCOMPLETE entry and broadcasts a REQUEST;
/// hitting an entry that is still INCOMPLETE re-broadcasts the
/// REQUEST in case the first one was lost.
pub fn resolve(iface: &Arc<IpIface>, pa: Ipv4Addr) -> Result<Resolution, NetError> {
    let dev = iface.dev().ok_or(NetError::Unsupported)?;
    if dev.dtype != netdev::TYPE_ETHERNET {
        debug!("unsupported hardware address type, dev={}", dev.name());
        return Err(NetError::Unsupported);
    }

    let mut cache = lock(&CACHE);
    match cache.select(pa) {
        None => {
            debug!("cache not found, pa={}", pa);
            cache.insert(pa, MacAddr::ZERO, ArpState::Incomplete, Instant::now());
            drop(cache);
            request(iface, &dev, pa)?;
            Ok(Resolution::Incomplete)
        }
        Some(index) if cache.entries[index].state == ArpState::Incomplete => {
            drop(cache);
            // just in case packet loss
            request(iface, &dev, pa)?;
            Ok(Resolution::Incomplete)
        }
        Some(index) => {
            let ha = cache.entries[index].ha;
            drop(cache);
            debug!("resolved, pa={}, ha={}", pa, ha);
            Ok(Resolution::Found(ha))
        }
    }
}

// =============================================================================
// Request / reply emission
// =============================================================================

fn request(iface: &Arc<IpIface>, dev: &Arc<NetDevice>, tpa: Ipv4Addr) -> Result<(), NetError> {
    let mut sha = [0u8; ethernet::ADDR_LEN];
    sha.copy_from_slice(&dev.addr()[..ethernet::ADDR_LEN]);
    let msg = build(
        OP_REQUEST,
        MacAddr(sha),
        iface.unicast,
        MacAddr::ZERO,
        tpa,
    );
    debug!("dev={}, len={}, tpa={}", dev.name(), msg.len(), tpa);
    dev.output(ethernet::TYPE_ARP, &msg, &dev.broadcast)
}

fn reply(
    iface: &Arc<IpIface>,
    dev: &Arc<NetDevice>,
    tha: MacAddr,
    tpa: Ipv4Addr,
) -> Result<(), NetError> {
    let mut sha = [0u8; ethernet::ADDR_LEN];
    sha.copy_from_slice(&dev.addr()[..ethernet::ADDR_LEN]);
    let msg = build(OP_REPLY, MacAddr(sha), iface.unicast, tha, tpa);
    debug!("dev={}, len={}, tha={}, tpa={}", dev.name(), msg.len(), tha, tpa);
    dev.output(ethernet::TYPE_ARP, &msg, &tha.0)
}

// =============================================================================
// Input
// =============================================================================

pub(crate) fn input(data: &[u8], dev: &Arc<NetDevice>) {
    let msg = match parse(data) {
        Ok(msg) => msg,
        Err(_) => return,
    };
    debug!(
        "dev={}, op={}, spa={}, sha={}, tpa={}",
        dev.name(),
        msg.op,
        msg.spa,
        msg.sha,
        msg.tpa
    );

    // Merge first: refresh the sender if it is already cached.
    let merge = lock(&CACHE).update(msg.spa, msg.sha, Instant::now());

    let Some(iface) = dev.iface() else {
        return;
    };
    if iface.unicast != msg.tpa {
        return;
    }
    if !merge {
        lock(&CACHE).insert(msg.spa, msg.sha, ArpState::Resolved, Instant::now());
    }
    if msg.op == OP_REQUEST {
        let _ = reply(&iface, dev, msg.sha, msg.spa);
    }
}

// =============================================================================
// Timer + init
// =============================================================================

/// Periodic cache sweep; registered at a 1-second interval.
pub fn timer_handler() {
    lock(&CACHE).sweep(Instant::now());
}

pub(crate) fn init() -> Result<(), NetError> {
    ingress::register(ethernet::TYPE_ARP, input)?;
    timer::register(Duration::from_secs(1), timer_handler);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ip(s: &str) -> Ipv4Addr {
        s.parse().unwrap()
    }

    fn mac(s: &str) -> MacAddr {
        s.parse().unwrap()
    }

    #[test]
    fn update_requires_existing_entry() {
        let mut cache = ArpCache::new();
        let now = Instant::now();
        assert!(!cache.update(ip("192.0.2.1"), mac("aa:bb:cc:dd:ee:ff"), now));
        cache.insert(ip("192.0.2.1"), MacAddr::ZERO, ArpState::Incomplete, now);
        assert!(cache.update(ip("192.0.2.1"), mac("aa:bb:cc:dd:ee:ff"), now));
        let index = cache.select(ip("192.0.2.1")).unwrap();
        assert_eq!(cache.entries[index].state, ArpState::Resolved);
        assert_eq!(cache.entries[index].ha, mac("aa:bb:cc:dd:ee:ff"));
    }

    #[test]
    fn full_cache_evicts_oldest() {
        let mut cache = ArpCache::new();
        let base = Instant::now();
        for i in 0..CACHE_SIZE {
            let pa = Ipv4Addr([10, 0, (i >> 8) as u8, i as u8]);
            // Entry 7 keeps the oldest timestamp.
            let age = if i == 7 { 0 } else { i as u64 + 1 };
            cache.insert(
                pa,
                mac("02:00:00:00:00:01"),
                ArpState::Resolved,
                base + Duration::from_secs(age),
            );
        }
        cache.insert(
            ip("192.0.2.99"),
            mac("02:00:00:00:00:02"),
            ArpState::Resolved,
            base + Duration::from_secs(400),
        );
        assert!(cache.select(Ipv4Addr([10, 0, 0, 7])).is_none());
        assert!(cache.select(ip("192.0.2.99")).is_some());
    }

    #[test]
    fn sweep_expires_only_stale_dynamic_entries() {
        let mut cache = ArpCache::new();
        let base = Instant::now();
        cache.insert(ip("192.0.2.1"), mac("02:00:00:00:00:01"), ArpState::Resolved, base);
        cache.insert(ip("192.0.2.2"), mac("02:00:00:00:00:02"), ArpState::Static, base);
        cache.insert(
            ip("192.0.2.3"),
            mac("02:00:00:00:00:03"),
            ArpState::Resolved,
            base + Duration::from_secs(29),
        );

        // 30 seconds after `base`: entry 1 is exactly at the timeout,
        // entry 3 is still fresh, the static entry never expires.
        cache.sweep(base + CACHE_TIMEOUT);
        assert!(cache.select(ip("192.0.2.1")).is_none());
        assert!(cache.select(ip("192.0.2.2")).is_some());
        assert!(cache.select(ip("192.0.2.3")).is_some());
    }

    #[test]
    fn parse_rejects_non_ethernet_ip_pairs() {
        let msg = build(
            OP_REQUEST,
            mac("aa:bb:cc:dd:ee:ff"),
            ip("192.0.2.1"),
            MacAddr::ZERO,
            ip("192.0.2.2"),
        );
        assert!(parse(&msg).is_ok());

        let mut bad_hrd = msg;
        bad_hrd[0..2].copy_from_slice(&6u16.to_be_bytes()); // IEEE 802
        assert!(matches!(parse(&bad_hrd), Err(NetError::Malformed)));

        let mut bad_pln = msg;
        bad_pln[5] = 16;
        assert!(matches!(parse(&bad_pln), Err(NetError::Malformed)));

        assert!(matches!(parse(&msg[..27]), Err(NetError::TooShort)));
    }
}
