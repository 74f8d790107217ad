//! IPv4: interfaces, datagram validation, routing output path, and
//! upper-protocol dispatch.
//!
//! Incoming datagrams are validated in a fixed order (length, version,
//! header length, total length, checksum, fragmentation) and dropped
//! silently unless addressed to the receiving interface's unicast,
//! its subnet broadcast, or the limited broadcast.  The output path
//! looks the destination up in the routing table, enforces the source
//! address policy, and resolves the next hop through ARP on devices
//! that need it.

use std::sync::{Arc, Mutex, OnceLock, Weak};

use log::{debug, error, log_enabled, trace, Level};

use crate::arp;
use crate::checksum::cksum16;
use crate::ethernet;
use crate::logging::hexdump;
use crate::netdev::{self, DeviceFlags, NetDevice};
use crate::route;
use crate::sched::lock;
use crate::types::{Ipv4Addr, NetError};

pub const VERSION: u8 = 4;
pub const HDR_SIZE_MIN: usize = 20;
pub const HDR_SIZE_MAX: usize = 60;

pub const PROTOCOL_ICMP: u8 = 1;
pub const PROTOCOL_TCP: u8 = 6;
pub const PROTOCOL_UDP: u8 = 17;

// =============================================================================
// Interfaces
// =============================================================================

/// The layer-3 identity attached to a device.
pub struct IpIface {
    pub unicast: Ipv4Addr,
    pub netmask: Ipv4Addr,
    /// Derived subnet broadcast: `unicast | !netmask`.
    pub broadcast: Ipv4Addr,
    dev: OnceLock<Weak<NetDevice>>,
}

impl IpIface {
    pub fn new(unicast: Ipv4Addr, netmask: Ipv4Addr) -> Arc<Self> {
        let broadcast = Ipv4Addr::from_u32(unicast.to_u32() | !netmask.to_u32());
        Arc::new(Self {
            unicast,
            netmask,
            broadcast,
            dev: OnceLock::new(),
        })
    }

    pub(crate) fn attach(&self, dev: &Arc<NetDevice>) {
        let _ = self.dev.set(Arc::downgrade(dev));
    }

    /// The device this interface is attached to.
    pub fn dev(&self) -> Option<Arc<NetDevice>> {
        self.dev.get()?.upgrade()
    }
}

static IFACES: Mutex<Vec<Arc<IpIface>>> = Mutex::new(Vec::new());

/// Attach `iface` to `dev` and link it into the interface list.
///
/// Must not be called after [`crate::netstack::run`].
pub fn iface_register(dev: &Arc<NetDevice>, iface: &Arc<IpIface>) -> Result<(), NetError> {
    dev.add_iface(Arc::clone(iface))?;
    lock(&IFACES).push(Arc::clone(iface));
    log::info!(
        "registered: dev={}, unicast={}, netmask={}, broadcast={}",
        dev.name(),
        iface.unicast,
        iface.netmask,
        iface.broadcast
    );
    Ok(())
}

/// Find the interface owning `addr`.
pub fn iface_select(addr: Ipv4Addr) -> Option<Arc<IpIface>> {
    lock(&IFACES).iter().find(|i| i.unicast == addr).cloned()
}

// =============================================================================
// Upper-protocol registry
// =============================================================================

/// Transport-layer handler, invoked from soft-IRQ context with the
/// datagram payload.
pub type IpProtocolHandler =
    fn(data: &[u8], src: Ipv4Addr, dst: Ipv4Addr, iface: &Arc<IpIface>);

static PROTOCOLS: Mutex<Vec<(u8, IpProtocolHandler)>> = Mutex::new(Vec::new());

/// Register an upper-layer protocol keyed by IP protocol number.
///
/// Must not be called after [`crate::netstack::run`].
pub fn protocol_register(protocol: u8, handler: IpProtocolHandler) -> Result<(), NetError> {
    let mut protocols = lock(&PROTOCOLS);
    if protocols.iter().any(|(p, _)| *p == protocol) {
        error!("already registered, protocol={}", protocol);
        return Err(NetError::AlreadyRegistered);
    }
    protocols.push((protocol, handler));
    log::info!("registered, protocol={}", protocol);
    Ok(())
}

// =============================================================================
// Header
// =============================================================================

pub(crate) struct IpHeader {
    pub total: usize,
    pub protocol: u8,
    pub src: Ipv4Addr,
    pub dst: Ipv4Addr,
}

/// Validate an incoming datagram and split it into header and payload.
///
/// Checks run in a fixed order; each failure is logged and the caller
/// drops the datagram.
pub(crate) fn parse_datagram(data: &[u8]) -> Result<(IpHeader, &[u8]), NetError> {
    if data.len() < HDR_SIZE_MIN {
        error!("too short, len={}", data.len());
        return Err(NetError::TooShort);
    }
    let version = (data[0] & 0xf0) >> 4;
    if version != VERSION {
        error!("not IPv4, version={}", version);
        return Err(NetError::Malformed);
    }
    let hlen = ((data[0] & 0x0f) << 2) as usize;
    if data.len() < hlen {
        error!("smaller than header length, len={}, hlen={}", data.len(), hlen);
        return Err(NetError::TooShort);
    }
    let total = u16::from_be_bytes([data[2], data[3]]) as usize;
    if data.len() < total {
        error!(
            "smaller than total length, len={}, total={}",
            data.len(),
            total
        );
        return Err(NetError::LengthMismatch);
    }
    if cksum16(&data[..hlen], 0) != 0 {
        error!("checksum error");
        return Err(NetError::BadChecksum);
    }
    let offset = u16::from_be_bytes([data[6], data[7]]);
    if offset & 0x2000 != 0 || offset & 0x1fff != 0 {
        error!("fragments are not supported");
        return Err(NetError::Unsupported);
    }
    let header = IpHeader {
        total,
        protocol: data[9],
        src: Ipv4Addr([data[12], data[13], data[14], data[15]]),
        dst: Ipv4Addr([data[16], data[17], data[18], data[19]]),
    };
    Ok((header, &data[hlen..total]))
}

// =============================================================================
// Input
// =============================================================================

pub(crate) fn input(data: &[u8], dev: &Arc<NetDevice>) {
    let (header, payload) = match parse_datagram(data) {
        Ok(parsed) => parsed,
        Err(_) => return,
    };
    let Some(iface) = dev.iface() else {
        return;
    };
    if header.dst != iface.unicast
        && header.dst != iface.broadcast
        && !header.dst.is_broadcast()
    {
        // for other host
        return;
    }
    debug!(
        "dev={}, iface={}, protocol={}, total={}",
        dev.name(),
        iface.unicast,
        header.protocol,
        header.total
    );
    if log_enabled!(Level::Trace) {
        trace!("\n{}", hexdump(&data[..header.total]));
    }

    let handler = lock(&PROTOCOLS)
        .iter()
        .find(|(p, _)| *p == header.protocol)
        .map(|(_, h)| *h);
    match handler {
        Some(handler) => handler(payload, header.src, header.dst, &iface),
        None => debug!("unsupported protocol={}", header.protocol),
    }
}

// =============================================================================
// Output
// =============================================================================

static IP_ID: Mutex<u16> = Mutex::new(128);

fn generate_id() -> u16 {
    let mut id = lock(&IP_ID);
    let value = *id;
    *id = id.wrapping_add(1);
    value
}

fn build_datagram(
    protocol: u8,
    src: Ipv4Addr,
    dst: Ipv4Addr,
    id: u16,
    data: &[u8],
) -> Vec<u8> {
    let total = HDR_SIZE_MIN + data.len();
    let mut datagram = vec![0u8; total];
    datagram[0] = (VERSION << 4) | ((HDR_SIZE_MIN >> 2) as u8);
    datagram[2..4].copy_from_slice(&(total as u16).to_be_bytes());
    datagram[4..6].copy_from_slice(&id.to_be_bytes());
    datagram[8] = 255; // TTL
    datagram[9] = protocol;
    datagram[12..16].copy_from_slice(&src.0);
    datagram[16..20].copy_from_slice(&dst.0);
    let sum = cksum16(&datagram[..HDR_SIZE_MIN], 0);
    datagram[10..12].copy_from_slice(&sum.to_be_bytes());
    datagram[HDR_SIZE_MIN..].copy_from_slice(data);
    datagram
}

fn output_device(
    iface: &Arc<IpIface>,
    dev: &Arc<NetDevice>,
    datagram: &[u8],
    dst: Ipv4Addr,
    nexthop: Ipv4Addr,
) -> Result<(), NetError> {
    let mut hwaddr = [0u8; netdev::ADDR_LEN];
    if dev.flags().contains(DeviceFlags::NEED_ARP) {
        if dst == iface.broadcast || dst.is_broadcast() {
            hwaddr = dev.broadcast;
        } else {
            match arp::resolve(iface, nexthop)? {
                arp::Resolution::Found(ha) => hwaddr[..6].copy_from_slice(&ha.0),
                arp::Resolution::Incomplete => return Err(NetError::Incomplete),
            }
        }
    }
    dev.output(ethernet::TYPE_IP, datagram, &hwaddr)
}

/// Build and send a datagram carrying `data`.
///
/// `src` may be the wildcard, in which case the outgoing interface's
/// unicast is used.  Returns the number of payload bytes accepted.
/// [`NetError::Incomplete`] means address resolution was started and
/// the datagram was not sent.
pub fn output(
    protocol: u8,
    data: &[u8],
    src: Ipv4Addr,
    dst: Ipv4Addr,
) -> Result<usize, NetError> {
    if src.is_any() && dst.is_broadcast() {
        error!("source address is required for broadcast addresses");
        return Err(NetError::SourceRequired);
    }
    let Some(route) = route::lookup(dst) else {
        error!("no route to host, addr={}", dst);
        return Err(NetError::NoRoute);
    };
    let nexthop = route.nexthop_for(dst);
    let iface = route.iface;
    if !src.is_any() && src != iface.unicast {
        error!(
            "unable to output with the specified source address, addr={}",
            src
        );
        return Err(NetError::SourceUnreachable);
    }
    let Some(dev) = iface.dev() else {
        error!("interface has no device, iface={}", iface.unicast);
        return Err(NetError::DeviceIo);
    };
    if HDR_SIZE_MIN + data.len() > dev.mtu as usize {
        error!(
            "too long, dev={}, mtu={}, total={}",
            dev.name(),
            dev.mtu,
            HDR_SIZE_MIN + data.len()
        );
        return Err(NetError::MtuExceeded);
    }
    let id = generate_id();
    let datagram = build_datagram(protocol, iface.unicast, dst, id, data);
    debug!(
        "dev={}, iface={}, protocol={}, len={}",
        dev.name(),
        iface.unicast,
        protocol,
        datagram.len()
    );
    if log_enabled!(Level::Trace) {
        trace!("\n{}", hexdump(&datagram));
    }
    output_device(&iface, &dev, &datagram, dst, nexthop)?;
    Ok(data.len())
}

pub(crate) fn init() -> Result<(), NetError> {
    crate::ingress::register(ethernet::TYPE_IP, input)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ip(s: &str) -> Ipv4Addr {
        s.parse().unwrap()
    }

    #[test]
    fn broadcast_is_derived_from_netmask() {
        let iface = IpIface::new(ip("192.0.2.2"), ip("255.255.255.0"));
        assert_eq!(iface.broadcast, ip("192.0.2.255"));
        let iface = IpIface::new(ip("10.1.2.3"), ip("255.0.0.0"));
        assert_eq!(iface.broadcast, ip("10.255.255.255"));
    }

    #[test]
    fn parse_accepts_a_well_formed_datagram() {
        let datagram = build_datagram(PROTOCOL_UDP, ip("192.0.2.1"), ip("192.0.2.2"), 1, b"data");
        let (header, payload) = parse_datagram(&datagram).unwrap();
        assert_eq!(header.protocol, PROTOCOL_UDP);
        assert_eq!(header.src, ip("192.0.2.1"));
        assert_eq!(header.dst, ip("192.0.2.2"));
        assert_eq!(payload, b"data");
    }

    #[test]
    fn parse_validation_order() {
        let good = build_datagram(PROTOCOL_UDP, ip("192.0.2.1"), ip("192.0.2.2"), 1, b"data");

        assert!(matches!(
            parse_datagram(&good[..10]),
            Err(NetError::TooShort)
        ));

        let mut bad_version = good.clone();
        bad_version[0] = (6 << 4) | 5;
        assert!(matches!(
            parse_datagram(&bad_version),
            Err(NetError::Malformed)
        ));

        let mut bad_total = good.clone();
        bad_total[2..4].copy_from_slice(&100u16.to_be_bytes());
        assert!(matches!(
            parse_datagram(&bad_total),
            Err(NetError::LengthMismatch)
        ));

        let mut bad_sum = good.clone();
        bad_sum[10] ^= 0xff;
        assert!(matches!(
            parse_datagram(&bad_sum),
            Err(NetError::BadChecksum)
        ));
    }

    #[test]
    fn fragments_are_rejected() {
        // More-fragments bit set.
        let mut mf = build_datagram(PROTOCOL_UDP, ip("192.0.2.1"), ip("192.0.2.2"), 1, b"data");
        mf[6] = 0x20;
        mf[10..12].copy_from_slice(&[0, 0]);
        let sum = cksum16(&mf[..HDR_SIZE_MIN], 0);
        mf[10..12].copy_from_slice(&sum.to_be_bytes());
        assert!(matches!(parse_datagram(&mf), Err(NetError::Unsupported)));

        // Nonzero fragment offset.
        let mut frag = build_datagram(PROTOCOL_UDP, ip("192.0.2.1"), ip("192.0.2.2"), 1, b"data");
        frag[7] = 0x08;
        frag[10..12].copy_from_slice(&[0, 0]);
        let sum = cksum16(&frag[..HDR_SIZE_MIN], 0);
        frag[10..12].copy_from_slice(&sum.to_be_bytes());
        assert!(matches!(parse_datagram(&frag), Err(NetError::Unsupported)));
    }

    #[test]
    fn id_counter_increments() {
        let _serial = crate::testing::serial();
        let first = generate_id();
        let second = generate_id();
        assert_eq!(second, first.wrapping_add(1));
    }
}
