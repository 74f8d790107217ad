//! TCP: RFC 793 passive open, in-order data delivery, window-paced
//! send.
//!
//! Segment processing follows the RFC 793 "segment arrives" order for
//! the implemented subset: CLOSED synthesis of RST, the LISTEN
//! handshake, the acceptability test, ACK processing in SYN_RECEIVED
//! and ESTABLISHED, and in-order text delivery into the per-connection
//! window buffer.  Retransmission, congestion control, urgent data,
//! and active open are not implemented; close tears the connection
//! down with RST.
//!
//! Sequence-number comparisons use serial-number arithmetic
//! (wrapping), so the window predicates stay correct across the
//! 2^32 wrap.

use std::sync::{Arc, Mutex};

use log::{debug, error, log_enabled, trace, Level};
use rand::Rng;

use crate::checksum::{cksum16, pseudo_sum};
use crate::event;
use crate::ipv4::{self, IpIface};
use crate::logging::hexdump;
use crate::sched::{lock, WaitCtx, Wake};
use crate::types::{Endpoint, Ipv4Addr, NetError};

pub const HDR_SIZE: usize = 20;

pub const FLG_FIN: u8 = 0x01;
pub const FLG_SYN: u8 = 0x02;
pub const FLG_RST: u8 = 0x04;
pub const FLG_PSH: u8 = 0x08;
pub const FLG_ACK: u8 = 0x10;
pub const FLG_URG: u8 = 0x20;

const PCB_COUNT: usize = 16;

/// Size of the per-connection receive window buffer.
const BUF_SIZE: usize = 65535;

// =============================================================================
// Sequence-number arithmetic
// =============================================================================

#[inline]
fn seq_lt(a: u32, b: u32) -> bool {
    (a.wrapping_sub(b) as i32) < 0
}

#[inline]
fn seq_le(a: u32, b: u32) -> bool {
    a == b || seq_lt(a, b)
}

/// RFC 793 acceptability test over `rcv.nxt .. rcv.nxt + rcv.wnd`.
fn acceptable(rcv_nxt: u32, rcv_wnd: u16, seg_seq: u32, seg_len: u32) -> bool {
    let wnd_end = rcv_nxt.wrapping_add(rcv_wnd as u32);
    match (seg_len == 0, rcv_wnd == 0) {
        (true, true) => seg_seq == rcv_nxt,
        (true, false) => seq_le(rcv_nxt, seg_seq) && seq_lt(seg_seq, wnd_end),
        (false, true) => false,
        (false, false) => {
            let seg_end = seg_seq.wrapping_add(seg_len - 1);
            (seq_le(rcv_nxt, seg_seq) && seq_lt(seg_seq, wnd_end))
                || (seq_le(rcv_nxt, seg_end) && seq_lt(seg_end, wnd_end))
        }
    }
}

fn flg_string(flg: u8) -> String {
    let mut s = String::from("--");
    for (bit, c) in [
        (FLG_URG, 'U'),
        (FLG_ACK, 'A'),
        (FLG_PSH, 'P'),
        (FLG_RST, 'R'),
        (FLG_SYN, 'S'),
        (FLG_FIN, 'F'),
    ] {
        s.push(if flg & bit != 0 { c } else { '-' });
    }
    s
}

// =============================================================================
// Protocol control blocks
// =============================================================================

/// Connection states.  Only the passive-open subset is entered today.
#[allow(dead_code)]
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub(crate) enum TcpState {
    Free,
    Closed,
    Listen,
    SynSent,
    SynReceived,
    Established,
    FinWait1,
    FinWait2,
    Closing,
    TimeWait,
    CloseWait,
    LastAck,
}

#[derive(Clone, Copy)]
struct SndVars {
    nxt: u32,
    una: u32,
    wnd: u16,
    wl1: u32,
    wl2: u32,
}

#[derive(Clone, Copy)]
struct RcvVars {
    nxt: u32,
    wnd: u16,
}

struct TcpPcb {
    state: TcpState,
    local: Endpoint,
    foreign: Endpoint,
    snd: SndVars,
    iss: u32,
    rcv: RcvVars,
    irs: u32,
    mss: u16,
    buf: [u8; BUF_SIZE],
}

impl TcpPcb {
    const fn new() -> Self {
        Self {
            state: TcpState::Free,
            local: Endpoint::ANY,
            foreign: Endpoint::ANY,
            snd: SndVars {
                nxt: 0,
                una: 0,
                wnd: 0,
                wl1: 0,
                wl2: 0,
            },
            iss: 0,
            rcv: RcvVars { nxt: 0, wnd: 0 },
            irs: 0,
            mss: 0,
            buf: [0; BUF_SIZE],
        }
    }
}

static PCBS: Mutex<[TcpPcb; PCB_COUNT]> = Mutex::new([const { TcpPcb::new() }; PCB_COUNT]);
static CONTEXTS: [WaitCtx; PCB_COUNT] = [const { WaitCtx::new() }; PCB_COUNT];

fn pcb_alloc(pcbs: &mut [TcpPcb; PCB_COUNT]) -> Option<usize> {
    let id = pcbs.iter().position(|p| p.state == TcpState::Free)?;
    pcbs[id].state = TcpState::Closed;
    CONTEXTS[id].reset();
    Some(id)
}

fn pcb_release(pcbs: &mut [TcpPcb; PCB_COUNT], id: usize) {
    if CONTEXTS[id].waiters() > 0 {
        // Waiters unwind with an interrupted error and release on
        // their way out.
        CONTEXTS[id].interrupt();
        return;
    }
    let pcb = &mut pcbs[id];
    *pcb = TcpPcb::new();
    debug!("released, id={}", id);
}

/// Match a segment to a connection: exact local/foreign pair first, a
/// wildcard LISTEN endpoint as fallback.
fn pcb_select(
    pcbs: &[TcpPcb; PCB_COUNT],
    local: Endpoint,
    foreign: Endpoint,
) -> Option<usize> {
    let mut listener = None;
    for (id, pcb) in pcbs.iter().enumerate() {
        if pcb.state == TcpState::Free {
            continue;
        }
        if pcb.local.port != local.port
            || !(pcb.local.addr.is_any() || pcb.local.addr == local.addr)
        {
            continue;
        }
        if pcb.foreign == foreign {
            return Some(id);
        }
        if pcb.state == TcpState::Listen
            && pcb.foreign.addr.is_any()
            && pcb.foreign.port == 0
        {
            listener = Some(id);
        }
    }
    listener
}

fn pcb_check(pcbs: &[TcpPcb; PCB_COUNT], id: usize) -> Result<(), NetError> {
    if id >= PCB_COUNT || pcbs[id].state == TcpState::Free {
        return Err(NetError::BadHandle);
    }
    Ok(())
}

#[cfg(test)]
pub(crate) fn state(id: usize) -> TcpState {
    lock(&PCBS)[id].state
}

// =============================================================================
// Segment emission
// =============================================================================

struct Segment {
    seq: u32,
    ack: u32,
    len: u32,
    wnd: u16,
    #[allow(dead_code)]
    up: u16,
}

fn output_segment(
    seq: u32,
    ack: u32,
    flg: u8,
    wnd: u16,
    data: &[u8],
    local: Endpoint,
    foreign: Endpoint,
) -> Result<usize, NetError> {
    let total = HDR_SIZE + data.len();
    let mut segment = vec![0u8; total];
    segment[0..2].copy_from_slice(&local.port.to_be_bytes());
    segment[2..4].copy_from_slice(&foreign.port.to_be_bytes());
    segment[4..8].copy_from_slice(&seq.to_be_bytes());
    segment[8..12].copy_from_slice(&ack.to_be_bytes());
    segment[12] = ((HDR_SIZE / 4) as u8) << 4;
    segment[13] = flg;
    segment[14..16].copy_from_slice(&wnd.to_be_bytes());
    segment[HDR_SIZE..].copy_from_slice(data);
    let psum = pseudo_sum(local.addr, foreign.addr, ipv4::PROTOCOL_TCP, total as u16);
    let sum = cksum16(&segment, psum);
    segment[16..18].copy_from_slice(&sum.to_be_bytes());

    debug!(
        "{} => {}, len={} (payload={}), flags={}",
        local,
        foreign,
        total,
        data.len(),
        flg_string(flg)
    );
    if log_enabled!(Level::Trace) {
        trace!("\n{}", hexdump(&segment));
    }
    ipv4::output(ipv4::PROTOCOL_TCP, &segment, local.addr, foreign.addr)?;
    Ok(data.len())
}

fn output(pcb: &TcpPcb, flg: u8, data: &[u8]) -> Result<usize, NetError> {
    let seq = if flg & FLG_SYN != 0 {
        pcb.iss
    } else {
        pcb.snd.nxt
    };
    output_segment(
        seq,
        pcb.rcv.nxt,
        flg,
        pcb.rcv.wnd,
        data,
        pcb.local,
        pcb.foreign,
    )
}

// =============================================================================
// Segment arrives
// =============================================================================

fn mss_for(iface: &Arc<IpIface>) -> u16 {
    let mtu = iface.dev().map(|dev| dev.mtu).unwrap_or(0);
    mtu.saturating_sub((ipv4::HDR_SIZE_MIN + HDR_SIZE) as u16)
}

/// RFC 793: "If the state is CLOSED ... all data in the incoming
/// segment is discarded" and a RST is synthesised from the segment.
fn segment_arrives_closed(seg: &Segment, flg: u8, local: Endpoint, foreign: Endpoint) {
    if flg & FLG_RST != 0 {
        return;
    }
    if flg & FLG_ACK == 0 {
        let _ = output_segment(
            0,
            seg.seq.wrapping_add(seg.len),
            FLG_RST | FLG_ACK,
            0,
            &[],
            local,
            foreign,
        );
    } else {
        let _ = output_segment(seg.ack, 0, FLG_RST, 0, &[], local, foreign);
    }
}

fn segment_arrives(
    pcbs: &mut [TcpPcb; PCB_COUNT],
    seg: &Segment,
    flg: u8,
    data: &[u8],
    local: Endpoint,
    foreign: Endpoint,
    iface: &Arc<IpIface>,
) {
    let id = match pcb_select(pcbs, local, foreign) {
        Some(id) if pcbs[id].state != TcpState::Closed => id,
        _ => {
            segment_arrives_closed(seg, flg, local, foreign);
            return;
        }
    };

    match pcbs[id].state {
        TcpState::Listen => {
            // 1. RST: ignored.
            if flg & FLG_RST != 0 {
                return;
            }
            // 2. ACK: a listener has nothing outstanding to ack.
            if flg & FLG_ACK != 0 {
                let _ = output_segment(seg.ack, 0, FLG_RST, 0, &[], local, foreign);
                return;
            }
            // 3. SYN: start the handshake on this PCB.
            if flg & FLG_SYN != 0 {
                // security/compartment and precedence checks omitted
                let pcb = &mut pcbs[id];
                pcb.local = local;
                pcb.foreign = foreign;
                pcb.rcv.wnd = BUF_SIZE as u16;
                pcb.rcv.nxt = seg.seq.wrapping_add(1);
                pcb.irs = seg.seq;
                pcb.mss = mss_for(iface);
                pcb.iss = rand::thread_rng().gen();
                let _ = output(pcb, FLG_SYN | FLG_ACK, &[]);
                pcb.snd.nxt = pcb.iss.wrapping_add(1);
                pcb.snd.una = pcb.iss;
                pcb.state = TcpState::SynReceived;
                // any other control or text should be queued for
                // processing later; this implementation drops it
                return;
            }
            // 4. anything else is dropped.
            return;
        }
        TcpState::SynSent => {
            // Active open is not implemented.
            return;
        }
        _ => {}
    }

    // Otherwise: first check sequence number.
    {
        let pcb = &pcbs[id];
        if !acceptable(pcb.rcv.nxt, pcb.rcv.wnd, seg.seq, seg.len) {
            if flg & FLG_RST == 0 {
                let _ = output(pcb, FLG_ACK, &[]);
            }
            return;
        }
    }
    // Second (RST), third (security), and fourth (SYN) checks are
    // not implemented.

    // Fifth: ACK is required from here on.
    if flg & FLG_ACK == 0 {
        return;
    }
    match pcbs[id].state {
        TcpState::SynReceived => {
            let pcb = &mut pcbs[id];
            if seq_lt(pcb.snd.una, seg.ack) && seq_le(seg.ack, pcb.snd.nxt) {
                pcb.state = TcpState::Established;
                pcb.snd.una = seg.ack;
                pcb.snd.wnd = seg.wnd;
                pcb.snd.wl1 = seg.seq;
                pcb.snd.wl2 = seg.ack;
                debug!(
                    "connection established, id={}, local={}, foreign={}",
                    id, pcb.local, pcb.foreign
                );
                CONTEXTS[id].wakeup();
            } else {
                let _ = output_segment(seg.ack, 0, FLG_RST, 0, &[], local, foreign);
                return;
            }
        }
        TcpState::Established => {
            let pcb = &mut pcbs[id];
            if seq_lt(pcb.snd.una, seg.ack) && seq_le(seg.ack, pcb.snd.nxt) {
                pcb.snd.una = seg.ack;
                // There is no retransmission queue to clean; senders
                // blocked on the window are woken instead.
                if seq_lt(pcb.snd.wl1, seg.seq)
                    || (pcb.snd.wl1 == seg.seq && seq_le(pcb.snd.wl2, seg.ack))
                {
                    pcb.snd.wnd = seg.wnd;
                    pcb.snd.wl1 = seg.seq;
                    pcb.snd.wl2 = seg.ack;
                }
                CONTEXTS[id].wakeup();
            } else if seq_le(seg.ack, pcb.snd.una) {
                // duplicate ack, ignore
            } else {
                // ack for data not yet sent
                let _ = output(pcb, FLG_ACK, &[]);
                return;
            }
        }
        _ => {
            return;
        }
    }

    // Sixth (URG) is not implemented.

    // Seventh: segment text.
    if !data.is_empty() && pcbs[id].state == TcpState::Established {
        let pcb = &mut pcbs[id];
        if seg.seq == pcb.rcv.nxt && data.len() <= pcb.rcv.wnd as usize {
            let offset = BUF_SIZE - pcb.rcv.wnd as usize;
            pcb.buf[offset..offset + data.len()].copy_from_slice(data);
            pcb.rcv.nxt = seg.seq.wrapping_add(seg.len);
            pcb.rcv.wnd -= data.len() as u16;
            let _ = output(pcb, FLG_ACK, &[]);
            CONTEXTS[id].wakeup();
        } else {
            // In-window but not the next expected byte (or it does
            // not fit): re-ack what we expect and let the peer retry.
            let _ = output(pcb, FLG_ACK, &[]);
        }
    }

    // Eighth (FIN) is not implemented; close() tears down with RST.
}

pub(crate) fn input(data: &[u8], src: Ipv4Addr, dst: Ipv4Addr, iface: &Arc<IpIface>) {
    if data.len() < HDR_SIZE {
        error!("too short, len={}", data.len());
        return;
    }
    let psum = pseudo_sum(src, dst, ipv4::PROTOCOL_TCP, data.len() as u16);
    if cksum16(data, psum) != 0 {
        error!("checksum error");
        return;
    }
    if src.is_broadcast() || dst.is_broadcast() {
        error!(
            "broadcast addresses are not allowed, src={}, dst={}",
            src, dst
        );
        return;
    }
    let hlen = ((data[12] >> 4) as usize) * 4;
    if hlen < HDR_SIZE || hlen > data.len() {
        error!("bad data offset, hlen={}", hlen);
        return;
    }
    let flg = data[13] & 0x3f;
    let local = Endpoint::new(dst, u16::from_be_bytes([data[2], data[3]]));
    let foreign = Endpoint::new(src, u16::from_be_bytes([data[0], data[1]]));
    let payload = &data[hlen..];
    let seg = Segment {
        seq: u32::from_be_bytes([data[4], data[5], data[6], data[7]]),
        ack: u32::from_be_bytes([data[8], data[9], data[10], data[11]]),
        len: payload.len() as u32
            + u32::from(flg & FLG_SYN != 0)
            + u32::from(flg & FLG_FIN != 0),
        wnd: u16::from_be_bytes([data[14], data[15]]),
        up: u16::from_be_bytes([data[18], data[19]]),
    };
    debug!(
        "{} => {}, len={} (payload={}), flags={}",
        foreign,
        local,
        data.len(),
        payload.len(),
        flg_string(flg)
    );
    if log_enabled!(Level::Trace) {
        trace!("\n{}", hexdump(data));
    }

    let mut pcbs = lock(&PCBS);
    segment_arrives(&mut pcbs, &seg, flg, payload, local, foreign, iface);
}

// =============================================================================
// Application interface (passive open only)
// =============================================================================

/// Open a connection in the RFC 793 style.
///
/// Passive open only: the PCB enters LISTEN and the call blocks until
/// a handshake completes (returning the connection id), the state
/// machine fails (error), or the cancellation event fires
/// (interrupted; the PCB is released).
pub fn open_rfc793(
    local: Endpoint,
    foreign: Option<Endpoint>,
    active: bool,
) -> Result<usize, NetError> {
    if active {
        error!("active open is not supported");
        return Err(NetError::Unsupported);
    }
    let mut pcbs = lock(&PCBS);
    let Some(id) = pcb_alloc(&mut pcbs) else {
        error!("no free pcb");
        return Err(NetError::PoolExhausted);
    };
    pcbs[id].local = local;
    if let Some(foreign) = foreign {
        pcbs[id].foreign = foreign;
    }
    pcbs[id].state = TcpState::Listen;
    debug!("listening, id={}, local={}", id, local);

    let mut observed = TcpState::Listen;
    loop {
        while pcbs[id].state == observed {
            let (guard, wake) = CONTEXTS[id].sleep(pcbs);
            pcbs = guard;
            if wake == Wake::Interrupted {
                debug!("interrupted, id={}", id);
                pcbs[id].state = TcpState::Closed;
                pcb_release(&mut pcbs, id);
                return Err(NetError::Interrupted);
            }
        }
        match pcbs[id].state {
            TcpState::Established => break,
            TcpState::SynReceived => {
                // Handshake in progress; wait for the final ACK.
                observed = TcpState::SynReceived;
            }
            state => {
                error!("open error, id={}, state={:?}", id, state);
                pcbs[id].state = TcpState::Closed;
                pcb_release(&mut pcbs, id);
                return Err(NetError::InvalidState);
            }
        }
    }
    let pcb = &pcbs[id];
    debug!(
        "established, id={}, local={}, foreign={}",
        id, pcb.local, pcb.foreign
    );
    Ok(id)
}

/// Send application data, pacing against the peer's advertised
/// window in MSS-sized segments.
///
/// Blocks while the window is closed.  When interrupted after at
/// least one byte went out, the partial count is returned instead of
/// an error.
pub fn send(id: usize, data: &[u8]) -> Result<usize, NetError> {
    let mut pcbs = lock(&PCBS);
    pcb_check(&pcbs, id)?;
    if pcbs[id].state != TcpState::Established {
        error!("not established, id={}, state={:?}", id, pcbs[id].state);
        return Err(NetError::InvalidState);
    }
    if pcbs[id].mss == 0 {
        error!("interface MTU cannot carry IP+TCP headers, id={}", id);
        return Err(NetError::MtuExceeded);
    }

    let mut sent = 0usize;
    while sent < data.len() {
        if pcbs[id].state != TcpState::Established {
            error!("connection lost, id={}", id);
            return if sent > 0 {
                Ok(sent)
            } else {
                Err(NetError::InvalidState)
            };
        }
        let pcb = &pcbs[id];
        let inflight = pcb.snd.nxt.wrapping_sub(pcb.snd.una);
        let cap = (pcb.snd.wnd as u32).saturating_sub(inflight);
        if cap == 0 {
            let (guard, wake) = CONTEXTS[id].sleep(pcbs);
            pcbs = guard;
            if wake == Wake::Interrupted {
                debug!("interrupted, id={}, sent={}", id, sent);
                if sent > 0 {
                    return Ok(sent);
                }
                return Err(NetError::Interrupted);
            }
            continue;
        }
        let chunk = (pcb.mss as usize).min(data.len() - sent).min(cap as usize);
        output(pcb, FLG_ACK | FLG_PSH, &data[sent..sent + chunk])?;
        let pcb = &mut pcbs[id];
        pcb.snd.nxt = pcb.snd.nxt.wrapping_add(chunk as u32);
        sent += chunk;
    }
    Ok(sent)
}

/// Receive buffered data, blocking until at least one byte is
/// available.
pub fn receive(id: usize, buf: &mut [u8]) -> Result<usize, NetError> {
    let mut pcbs = lock(&PCBS);
    pcb_check(&pcbs, id)?;
    if pcbs[id].state != TcpState::Established {
        error!("not established, id={}, state={:?}", id, pcbs[id].state);
        return Err(NetError::InvalidState);
    }
    loop {
        let buffered = BUF_SIZE - pcbs[id].rcv.wnd as usize;
        if buffered > 0 {
            let len = buffered.min(buf.len());
            let pcb = &mut pcbs[id];
            buf[..len].copy_from_slice(&pcb.buf[..len]);
            // Shift the undelivered remainder to the front and open
            // the window by what was handed out.
            pcb.buf.copy_within(len..buffered, 0);
            pcb.rcv.wnd += len as u16;
            debug!("received, id={}, len={}", id, len);
            return Ok(len);
        }
        let (guard, wake) = CONTEXTS[id].sleep(pcbs);
        pcbs = guard;
        if wake == Wake::Interrupted {
            debug!("interrupted, id={}", id);
            return Err(NetError::Interrupted);
        }
        if pcbs[id].state != TcpState::Established {
            debug!("closed while waiting, id={}", id);
            return Err(NetError::Closed);
        }
    }
}

/// Tear the connection down and release the PCB.
// TODO: graceful close (FIN handshake); RST teardown is the interim
// behavior.
pub fn close(id: usize) -> Result<(), NetError> {
    let mut pcbs = lock(&PCBS);
    pcb_check(&pcbs, id)?;
    if matches!(
        pcbs[id].state,
        TcpState::SynReceived | TcpState::Established
    ) {
        let _ = output(&pcbs[id], FLG_RST, &[]);
    }
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
        if pcb.state != TcpState::Free {
            CONTEXTS[id].interrupt();
        }
    }
}

pub(crate) fn init() -> Result<(), NetError> {
    ipv4::protocol_register(ipv4::PROTOCOL_TCP, input)?;
    event::subscribe(event_handler);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serial_comparison_wraps() {
        assert!(seq_lt(0xffff_fff0, 0x0000_0010));
        assert!(seq_le(0x0000_0010, 0x0000_0010));
        assert!(!seq_lt(0x0000_0010, 0xffff_fff0));
    }

    #[test]
    fn acceptability_zero_length_segment() {
        // seg.len == 0, rcv.wnd > 0: rcv.nxt <= seq < rcv.nxt + wnd.
        let nxt = 1000;
        let wnd = 100;
        assert!(acceptable(nxt, wnd, 1000, 0));
        assert!(acceptable(nxt, wnd, 1099, 0));
        assert!(!acceptable(nxt, wnd, 1100, 0));
        assert!(!acceptable(nxt, wnd, 999, 0));

        // seg.len == 0, rcv.wnd == 0: only seq == rcv.nxt.
        assert!(acceptable(nxt, 0, 1000, 0));
        assert!(!acceptable(nxt, 0, 1001, 0));
    }

    #[test]
    fn acceptability_with_payload() {
        let nxt = 1000;
        let wnd = 100;
        // Entirely inside the window.
        assert!(acceptable(nxt, wnd, 1000, 50));
        // Head before the window but tail inside (overlap).
        assert!(acceptable(nxt, wnd, 990, 20));
        // Entirely before the window.
        assert!(!acceptable(nxt, wnd, 900, 50));
        // Head inside, tail past the end: still acceptable by the
        // first disjunct.
        assert!(acceptable(nxt, wnd, 1099, 10));
        // Zero window never accepts payload.
        assert!(!acceptable(nxt, 0, 1000, 1));
    }

    #[test]
    fn acceptability_across_the_wrap() {
        let nxt = 0xffff_fff0;
        let wnd = 0x100;
        assert!(acceptable(nxt, wnd, 0xffff_fff8, 0));
        assert!(acceptable(nxt, wnd, 0x0000_0010, 8));
        assert!(!acceptable(nxt, wnd, 0x0000_00f0, 8));
    }

    #[test]
    fn flag_rendering() {
        assert_eq!(flg_string(FLG_SYN | FLG_ACK), "---A--S-");
        assert_eq!(flg_string(FLG_RST), "-----R--");
    }
}
