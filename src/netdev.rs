//! Network device abstraction and registry.
//!
//! A [`NetDevice`] carries the fields every device shares (index,
//! name, type tag, MTU, flags, addresses) and delegates I/O to a
//! [`DeviceDriver`] trait object.  Driver methods take `&self`;
//! implementations use interior mutability for their private state, so
//! transmit and receive paths never need `&mut` through the shared
//! `Arc`.
//!
//! Devices are registered during startup and live until shutdown.  The
//! registry itself is append-only behind a mutex; the UP flag is the
//! only device field that changes at runtime.

use std::sync::atomic::{AtomicU16, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use bitflags::bitflags;
use log::{debug, error, info, log_enabled, trace, Level};

use crate::ipv4::IpIface;
use crate::logging::hexdump;
use crate::sched::lock;
use crate::types::NetError;

/// Fixed size of the hardware-address buffers; `alen` bytes are
/// significant.
pub const ADDR_LEN: usize = 16;

pub const TYPE_DUMMY: u16 = 0x0000;
pub const TYPE_LOOPBACK: u16 = 0x0001;
pub const TYPE_ETHERNET: u16 = 0x0002;

bitflags! {
    /// Device capability and state bits.
    #[derive(Clone, Copy, PartialEq, Eq, Debug)]
    pub struct DeviceFlags: u16 {
        const UP        = 0x0001;
        const LOOPBACK  = 0x0010;
        const BROADCAST = 0x0020;
        const P2P       = 0x0040;
        const NEED_ARP  = 0x0100;
    }
}

/// Operations a device driver provides to the stack.
///
/// `open`/`close` are optional lifecycle hooks; `transmit` is
/// required.  Drivers deliver received frames by calling
/// [`crate::ingress::input_handler`] (directly or through
/// [`crate::ethernet::input_helper`]).
pub trait DeviceDriver: Send + Sync {
    fn open(&self, _dev: &NetDevice) -> Result<(), NetError> {
        Ok(())
    }

    fn close(&self, _dev: &NetDevice) -> Result<(), NetError> {
        Ok(())
    }

    /// Transmit one frame's worth of payload.  `dst` is the
    /// destination hardware address (`alen` significant bytes).
    fn transmit(&self, dev: &NetDevice, ptype: u16, data: &[u8], dst: &[u8])
        -> Result<(), NetError>;
}

/// Static parameters a driver supplies at registration.
pub struct DeviceSpec {
    pub dtype: u16,
    pub mtu: u16,
    pub flags: DeviceFlags,
    pub hlen: u16,
    pub alen: u16,
    pub addr: [u8; ADDR_LEN],
    pub broadcast: [u8; ADDR_LEN],
}

/// A registered network device.
pub struct NetDevice {
    index: u32,
    name: String,
    pub dtype: u16,
    pub mtu: u16,
    pub hlen: u16,
    pub alen: u16,
    flags: AtomicU16,
    addr: Mutex<[u8; ADDR_LEN]>,
    pub broadcast: [u8; ADDR_LEN],
    driver: Box<dyn DeviceDriver>,
    iface: Mutex<Option<Arc<IpIface>>>,
}

static DEVICES: Mutex<Vec<Arc<NetDevice>>> = Mutex::new(Vec::new());
static NEXT_INDEX: AtomicU32 = AtomicU32::new(0);

/// Register a device: assign its index and `net<index>` name and link
/// it into the global device list.
///
/// Must not be called after [`crate::netstack::run`].
pub fn register(spec: DeviceSpec, driver: Box<dyn DeviceDriver>) -> Arc<NetDevice> {
    let index = NEXT_INDEX.fetch_add(1, Ordering::Relaxed);
    let dev = Arc::new(NetDevice {
        index,
        name: format!("net{}", index),
        dtype: spec.dtype,
        mtu: spec.mtu,
        hlen: spec.hlen,
        alen: spec.alen,
        flags: AtomicU16::new(spec.flags.bits()),
        addr: Mutex::new(spec.addr),
        broadcast: spec.broadcast,
        driver,
        iface: Mutex::new(None),
    });
    lock(&DEVICES).push(Arc::clone(&dev));
    info!("registered, dev={}, type=0x{:04x}", dev.name, dev.dtype);
    dev
}

/// Snapshot of the registered devices.
pub fn devices() -> Vec<Arc<NetDevice>> {
    lock(&DEVICES).clone()
}

impl NetDevice {
    pub fn index(&self) -> u32 {
        self.index
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn flags(&self) -> DeviceFlags {
        DeviceFlags::from_bits_retain(self.flags.load(Ordering::Relaxed))
    }

    pub fn is_up(&self) -> bool {
        self.flags().contains(DeviceFlags::UP)
    }

    fn state(&self) -> &'static str {
        if self.is_up() {
            "up"
        } else {
            "down"
        }
    }

    /// Hardware address (`alen` significant bytes).
    pub fn addr(&self) -> [u8; ADDR_LEN] {
        *lock(&self.addr)
    }

    /// Overwrite the hardware address; used by drivers that discover
    /// it at open time.
    pub fn set_addr(&self, addr: &[u8]) {
        let mut buf = lock(&self.addr);
        buf[..addr.len()].copy_from_slice(addr);
    }

    /// Bring the device up, invoking the driver's open hook.
    pub fn open(&self) -> Result<(), NetError> {
        if self.is_up() {
            error!("already opened, dev={}", self.name);
            return Err(NetError::InvalidState);
        }
        if let Err(err) = self.driver.open(self) {
            error!("driver open failure, dev={}", self.name);
            return Err(err);
        }
        self.flags
            .fetch_or(DeviceFlags::UP.bits(), Ordering::Relaxed);
        info!("dev={}, state={}", self.name, self.state());
        Ok(())
    }

    /// Take the device down, invoking the driver's close hook.
    pub fn close(&self) -> Result<(), NetError> {
        if !self.is_up() {
            error!("not opened, dev={}", self.name);
            return Err(NetError::InvalidState);
        }
        if let Err(err) = self.driver.close(self) {
            error!("driver close failure, dev={}", self.name);
            return Err(err);
        }
        self.flags
            .fetch_and(!DeviceFlags::UP.bits(), Ordering::Relaxed);
        info!("dev={}, state={}", self.name, self.state());
        Ok(())
    }

    /// Hand a payload to the driver for transmission.
    ///
    /// Rejected while the device is down or when `data` exceeds the
    /// MTU.
    pub fn output(&self, ptype: u16, data: &[u8], dst: &[u8]) -> Result<(), NetError> {
        if !self.is_up() {
            error!("not opened, dev={}", self.name);
            return Err(NetError::NotUp);
        }
        if data.len() > self.mtu as usize {
            error!(
                "too long, dev={}, mtu={}, len={}",
                self.name,
                self.mtu,
                data.len()
            );
            return Err(NetError::MtuExceeded);
        }
        debug!(
            "dev={}, type=0x{:04x}, len={}",
            self.name,
            ptype,
            data.len()
        );
        if log_enabled!(Level::Trace) {
            trace!("\n{}", hexdump(data));
        }
        self.driver.transmit(self, ptype, data, dst).map_err(|err| {
            error!("driver transmit failure, dev={}, len={}", self.name, data.len());
            err
        })
    }

    /// Attach an IP interface.  A device holds at most one interface
    /// per family, and IP is the only family here.
    pub fn add_iface(self: &Arc<Self>, iface: Arc<IpIface>) -> Result<(), NetError> {
        let mut slot = lock(&self.iface);
        if slot.is_some() {
            error!("interface already exists, dev={}", self.name);
            return Err(NetError::AlreadyRegistered);
        }
        iface.attach(self);
        *slot = Some(iface);
        Ok(())
    }

    /// The attached IP interface, if any.
    pub fn iface(&self) -> Option<Arc<IpIface>> {
        lock(&self.iface).clone()
    }
}
