//! UDP endpoints with blocking receive.
//!
//! The protocol control blocks live in a fixed 16-slot table behind
//! one mutex; the slot index is the application's socket id.  Each
//! slot has a wait context outside the lock so `recvfrom` can sleep
//! while ingress keeps running.  Releasing a PCB with live waiters is
//! deferred: the slot moves to CLOSING and is freed by the last waiter
//! on its way out.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use log::{debug, error, log_enabled, trace, Level};

use crate::checksum::{cksum16, pseudo_sum};
use crate::event;
use crate::ipv4::{self, IpIface};
use crate::logging::hexdump;
use crate::route;
use crate::sched::{lock, WaitCtx, Wake};
use crate::types::{Endpoint, Ipv4Addr, NetError};

pub const HDR_SIZE: usize = 8;

const PCB_COUNT: usize = 16;

/// Ephemeral source-port range scanned by `sendto` for unbound
/// endpoints (IANA dynamic range).
const SOURCE_PORT_MIN: u16 = 49152;
const SOURCE_PORT_MAX: u16 = 65535;

/// Longest datagram payload the 16-bit UDP length field can carry.
const PAYLOAD_SIZE_MAX: usize = u16::MAX as usize - HDR_SIZE;

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
enum PcbState {
    Free,
    Open,
    Closing,
}

struct QueueEntry {
    foreign: Endpoint,
    data: Vec<u8>,
}

struct UdpPcb {
    state: PcbState,
    local: Endpoint,
    queue: VecDeque<QueueEntry>,
}

impl UdpPcb {
    const fn new() -> Self {
        Self {
            state: PcbState::Free,
            local: Endpoint::ANY,
            queue: VecDeque::new(),
        }
    }
}

static PCBS: Mutex<[UdpPcb; PCB_COUNT]> = Mutex::new([const { UdpPcb::new() }; PCB_COUNT]);
static CONTEXTS: [WaitCtx; PCB_COUNT] = [const { WaitCtx::new() }; PCB_COUNT];

// =============================================================================
// PCB helpers (table lock held)
// =============================================================================

fn pcb_alloc(pcbs: &mut [UdpPcb; PCB_COUNT]) -> Option<usize> {
    let id = pcbs.iter().position(|p| p.state == PcbState::Free)?;
    pcbs[id].state = PcbState::Open;
    CONTEXTS[id].reset();
    Some(id)
}

fn pcb_release(pcbs: &mut [UdpPcb; PCB_COUNT], id: usize) {
    if CONTEXTS[id].waiters() > 0 {
        // Waiters observe CLOSING after wakeup and perform the final
        // release themselves.
        pcbs[id].state = PcbState::Closing;
        CONTEXTS[id].wakeup();
        return;
    }
    let pcb = &mut pcbs[id];
    pcb.state = PcbState::Free;
    pcb.local = Endpoint::ANY;
    pcb.queue.clear();
}

fn pcb_select(pcbs: &[UdpPcb; PCB_COUNT], addr: Ipv4Addr, port: u16) -> Option<usize> {
    pcbs.iter().position(|p| {
        p.state == PcbState::Open
            && p.local.port == port
            && (p.local.addr.is_any() || addr.is_any() || p.local.addr == addr)
    })
}

fn pcb_check(pcbs: &[UdpPcb; PCB_COUNT], id: usize) -> Result<(), NetError> {
    if id >= PCB_COUNT || pcbs[id].state != PcbState::Open {
        return Err(NetError::BadHandle);
    }
    Ok(())
}

// =============================================================================
// Ingress
// =============================================================================

pub(crate) fn input(data: &[u8], src: Ipv4Addr, dst: Ipv4Addr, _iface: &Arc<IpIface>) {
    if data.len() < HDR_SIZE {
        error!("too short, len={}", data.len());
        return;
    }
    let declared = u16::from_be_bytes([data[4], data[5]]) as usize;
    if data.len() != declared {
        error!("length error: len={}, hdr.len={}", data.len(), declared);
        return;
    }
    let psum = pseudo_sum(src, dst, ipv4::PROTOCOL_UDP, data.len() as u16);
    if cksum16(data, psum) != 0 {
        error!("checksum error");
        return;
    }
    let src_port = u16::from_be_bytes([data[0], data[1]]);
    let dst_port = u16::from_be_bytes([data[2], data[3]]);
    debug!(
        "{}:{} => {}:{}, len={} (payload={})",
        src,
        src_port,
        dst,
        dst_port,
        data.len(),
        data.len() - HDR_SIZE
    );
    if log_enabled!(Level::Trace) {
        trace!("\n{}", hexdump(data));
    }

    let mut pcbs = lock(&PCBS);
    let Some(id) = pcb_select(&pcbs, dst, dst_port) else {
        // port unreachable
        debug!("no endpoint, {}:{}", dst, dst_port);
        return;
    };
    pcbs[id].queue.push_back(QueueEntry {
        foreign: Endpoint::new(src, src_port),
        data: data[HDR_SIZE..].to_vec(),
    });
    debug!("queue pushed: id={}, num={}", id, pcbs[id].queue.len());
    CONTEXTS[id].wakeup();
}

// =============================================================================
// Egress
// =============================================================================

fn output(local: Endpoint, foreign: Endpoint, data: &[u8]) -> Result<usize, NetError> {
    if data.len() > PAYLOAD_SIZE_MAX {
        error!("too long, len={}", data.len());
        return Err(NetError::MtuExceeded);
    }
    let total = HDR_SIZE + data.len();
    let mut datagram = vec![0u8; total];
    datagram[0..2].copy_from_slice(&local.port.to_be_bytes());
    datagram[2..4].copy_from_slice(&foreign.port.to_be_bytes());
    datagram[4..6].copy_from_slice(&(total as u16).to_be_bytes());
    datagram[HDR_SIZE..].copy_from_slice(data);
    let psum = pseudo_sum(local.addr, foreign.addr, ipv4::PROTOCOL_UDP, total as u16);
    let sum = cksum16(&datagram, psum);
    datagram[6..8].copy_from_slice(&sum.to_be_bytes());

    debug!(
        "{} => {}, len={} (payload={})",
        local,
        foreign,
        total,
        data.len()
    );
    if log_enabled!(Level::Trace) {
        trace!("\n{}", hexdump(&datagram));
    }
    ipv4::output(ipv4::PROTOCOL_UDP, &datagram, local.addr, foreign.addr)?;
    Ok(data.len())
}

// =============================================================================
// Application interface
// =============================================================================

/// Allocate an endpoint; the returned id is the socket handle.
pub fn open() -> Result<usize, NetError> {
    let mut pcbs = lock(&PCBS);
    let Some(id) = pcb_alloc(&mut pcbs) else {
        error!("no free pcb");
        return Err(NetError::PoolExhausted);
    };
    debug!("opened, id={}", id);
    Ok(id)
}

/// Bind a local endpoint.  The wildcard address matches every
/// interface during ingress selection.
pub fn bind(id: usize, local: Endpoint) -> Result<(), NetError> {
    let mut pcbs = lock(&PCBS);
    pcb_check(&pcbs, id)?;
    if let Some(existing) = pcb_select(&pcbs, local.addr, local.port) {
        if existing != id {
            error!("already in use, id={}, want={}", existing, local);
            return Err(NetError::AddrInUse);
        }
    }
    pcbs[id].local = local;
    debug!("bound, id={}, local={}", id, local);
    Ok(())
}

/// Send a datagram to `foreign`.
///
/// An unbound source address is picked from the route to the
/// destination; an unbound source port is the first unused port in
/// the ephemeral range on the chosen address, and stays reserved for
/// this endpoint.
pub fn sendto(id: usize, data: &[u8], foreign: Endpoint) -> Result<usize, NetError> {
    let mut pcbs = lock(&PCBS);
    pcb_check(&pcbs, id)?;
    let mut local = pcbs[id].local;
    if local.addr.is_any() {
        let Some(route) = route::lookup(foreign.addr) else {
            error!("no route to host, addr={}", foreign.addr);
            return Err(NetError::NoRoute);
        };
        local.addr = route.iface.unicast;
        debug!("select local address, addr={}", local.addr);
    }
    if local.port == 0 {
        let picked = (SOURCE_PORT_MIN..=SOURCE_PORT_MAX)
            .find(|&port| pcb_select(&pcbs, local.addr, port).is_none());
        let Some(port) = picked else {
            error!("failed to dynamically assign local port, addr={}", local.addr);
            return Err(NetError::AddrInUse);
        };
        pcbs[id].local.port = port;
        local.port = port;
        debug!("dynamic assign local port, id={}, port={}", id, port);
    }
    drop(pcbs);
    output(local, foreign, data)
}

/// Receive one datagram, blocking until one arrives.
///
/// Delivery truncates to `buf`; the sender's endpoint is returned
/// alongside the copied length.
pub fn recvfrom(id: usize, buf: &mut [u8]) -> Result<(usize, Endpoint), NetError> {
    let mut pcbs = lock(&PCBS);
    pcb_check(&pcbs, id)?;
    loop {
        if let Some(entry) = pcbs[id].queue.pop_front() {
            let len = entry.data.len().min(buf.len());
            buf[..len].copy_from_slice(&entry.data[..len]);
            debug!("received, id={}, foreign={}, len={}", id, entry.foreign, len);
            return Ok((len, entry.foreign));
        }
        let (guard, wake) = CONTEXTS[id].sleep(pcbs);
        pcbs = guard;
        if wake == Wake::Interrupted {
            return Err(NetError::Interrupted);
        }
        if pcbs[id].state == PcbState::Closing {
            debug!("closed while waiting, id={}", id);
            pcb_release(&mut pcbs, id);
            return Err(NetError::Closed);
        }
    }
}

/// Release the endpoint and discard anything still queued.
pub fn close(id: usize) -> Result<(), NetError> {
    let mut pcbs = lock(&PCBS);
    pcb_check(&pcbs, id)?;
    pcb_release(&mut pcbs, id);
    debug!("closed, id={}", id);
    Ok(())
}

// =============================================================================
// Init
// =============================================================================

fn event_handler() {
    let pcbs = lock(&PCBS);
    for (id, pcb) in pcbs.iter().enumerate() {
        if pcb.state != PcbState::Free {
            CONTEXTS[id].interrupt();
        }
    }
}

pub(crate) fn init() -> Result<(), NetError> {
    ipv4::protocol_register(ipv4::PROTOCOL_UDP, input)?;
    event::subscribe(event_handler);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ep(s: &str) -> Endpoint {
        s.parse().unwrap()
    }

    #[test]
    fn bind_rejects_conflicts_including_wildcard_overlap() {
        let _serial = crate::testing::serial();
        let a = open().unwrap();
        let b = open().unwrap();

        bind(a, ep("192.0.2.2:7")).unwrap();
        assert_eq!(bind(b, ep("192.0.2.2:7")), Err(NetError::AddrInUse));
        // The wildcard overlaps any bound address on the same port.
        assert_eq!(bind(b, ep("0.0.0.0:7")), Err(NetError::AddrInUse));
        bind(b, ep("192.0.2.2:8")).unwrap();

        close(a).unwrap();
        close(b).unwrap();
    }

    #[test]
    fn pool_is_bounded() {
        let _serial = crate::testing::serial();
        let ids: Vec<usize> = (0..PCB_COUNT).map(|_| open().unwrap()).collect();
        assert_eq!(open(), Err(NetError::PoolExhausted));
        for id in ids {
            close(id).unwrap();
        }
    }

    #[test]
    fn handle_validity_tracks_pcb_state() {
        let _serial = crate::testing::serial();
        let id = open().unwrap();
        close(id).unwrap();
        let mut buf = [0u8; 16];
        assert_eq!(recvfrom(id, &mut buf), Err(NetError::BadHandle));
        assert_eq!(close(id), Err(NetError::BadHandle));
        assert_eq!(close(PCB_COUNT + 1), Err(NetError::BadHandle));
    }
}
