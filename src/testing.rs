//! Shared test harness.
//!
//! The device, interface, route, and PCB tables are process-wide, so
//! tests that touch them serialize on [`serial`] and share one
//! topology, built once:
//!
//! - loopback with `127.0.0.1/8` and its connected route,
//! - a frame-capturing Ethernet device with `192.0.2.2/24`, its
//!   connected route, and a static ARP entry for the test peer
//!   `192.0.2.1`.
//!
//! Ingress is driven synchronously: [`Harness::pump`] dispatches the
//! loopback IRQ and drains the soft-IRQ queues the way the interrupt
//! thread would.

use std::sync::{Arc, Mutex, MutexGuard, OnceLock, PoisonError};

use crate::drivers::loopback;
use crate::ethernet;
use crate::ipv4::IpIface;
use crate::netdev::{self, NetDevice};
use crate::sched::lock;
use crate::types::{Ipv4Addr, MacAddr, NetError};
use crate::{arp, ingress, intr, netstack, route};

static SERIAL: Mutex<()> = Mutex::new(());

/// Take the test-serialization lock.
pub(crate) fn serial() -> MutexGuard<'static, ()> {
    SERIAL.lock().unwrap_or_else(PoisonError::into_inner)
}

/// MAC of the capturing Ethernet device.
pub(crate) const ETH_MAC: MacAddr = MacAddr([0x02, 0x00, 0x00, 0x00, 0x00, 0x01]);
/// MAC the static ARP entry maps the test peer to.
pub(crate) const PEER_MAC: MacAddr = MacAddr([0x02, 0x00, 0x00, 0x00, 0x00, 0xfe]);

pub(crate) fn peer_addr() -> Ipv4Addr {
    "192.0.2.1".parse().unwrap()
}

pub(crate) fn local_addr() -> Ipv4Addr {
    "192.0.2.2".parse().unwrap()
}

/// One transmitted frame, as handed to the driver.
#[derive(Clone)]
pub(crate) struct Captured {
    pub ptype: u16,
    pub data: Vec<u8>,
    pub dst: Vec<u8>,
}

struct CaptureDriver {
    frames: Arc<Mutex<Vec<Captured>>>,
}

impl netdev::DeviceDriver for CaptureDriver {
    fn transmit(
        &self,
        _dev: &NetDevice,
        ptype: u16,
        data: &[u8],
        dst: &[u8],
    ) -> Result<(), NetError> {
        lock(&self.frames).push(Captured {
            ptype,
            data: data.to_vec(),
            dst: dst.to_vec(),
        });
        Ok(())
    }
}

pub(crate) struct Harness {
    pub eth: Arc<NetDevice>,
    pub eth_iface: Arc<IpIface>,
    frames: Arc<Mutex<Vec<Captured>>>,
}

impl Harness {
    /// Drain and return everything transmitted on the Ethernet device
    /// since the last call.
    pub fn drain_frames(&self) -> Vec<Captured> {
        std::mem::take(&mut *lock(&self.frames))
    }

    /// Deliver pending loopback traffic and run the soft-IRQ drain,
    /// exactly as the interrupt thread would.
    pub fn pump(&self) {
        intr::dispatch(loopback::irq());
        ingress::softirq_handler();
    }
}

static HARNESS: OnceLock<Harness> = OnceLock::new();

/// The shared topology; built on first use.
pub(crate) fn harness() -> &'static Harness {
    HARNESS.get_or_init(|| {
        netstack::init().expect("protocol registration");

        let lo = loopback::create().expect("loopback registration");
        let lo_iface = IpIface::new("127.0.0.1".parse().unwrap(), "255.0.0.0".parse().unwrap());
        crate::ipv4::iface_register(&lo, &lo_iface).unwrap();
        route::add(
            "127.0.0.0".parse().unwrap(),
            "255.0.0.0".parse().unwrap(),
            Ipv4Addr::ANY,
            &lo_iface,
        );
        lo.open().unwrap();

        let frames = Arc::new(Mutex::new(Vec::new()));
        let eth = netdev::register(
            ethernet::device_spec(ETH_MAC),
            Box::new(CaptureDriver {
                frames: Arc::clone(&frames),
            }),
        );
        let eth_iface = IpIface::new(local_addr(), "255.255.255.0".parse().unwrap());
        crate::ipv4::iface_register(&eth, &eth_iface).unwrap();
        route::add(
            "192.0.2.0".parse().unwrap(),
            "255.255.255.0".parse().unwrap(),
            Ipv4Addr::ANY,
            &eth_iface,
        );
        eth.open().unwrap();

        // The test peer is always resolvable.
        arp::add_static(peer_addr(), PEER_MAC);

        Harness {
            eth,
            eth_iface,
            frames,
        }
    })
}
