//! Linux TAP Ethernet device.
//!
//! The driver clones `/dev/net/tun`, attaches the named TAP interface
//! (`IFF_TAP | IFF_NO_PI`), and configures signal-driven I/O so that
//! frame arrival delivers the device IRQ (`O_ASYNC` + `F_SETSIG`).
//! If no hardware address is supplied, the kernel's is fetched with
//! `SIOCGIFHWADDR`.  The ISR polls the descriptor and pushes frames
//! through the Ethernet input helper until the queue is dry.

use std::io;
use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::Arc;

use log::{debug, error};

use crate::ethernet;
use crate::intr;
use crate::netdev::{self, NetDevice};
use crate::types::{MacAddr, NetError};

// Not exported by the libc crate; values from <linux/if_tun.h> and
// <asm-generic/fcntl.h>.
const TUNSETIFF: libc::c_ulong = 0x4004_54ca;
const IFF_TAP: libc::c_short = 0x0002;
const IFF_NO_PI: libc::c_short = 0x1000;
const F_SETSIG: libc::c_int = 10;

const CLONE_DEVICE: &str = "/dev/net/tun\0";
const IFNAMSIZ: usize = 16;

pub fn irq() -> i32 {
    intr::irq_base() + 2
}

// The request structs are written here and read by the kernel only.
#[repr(C)]
#[allow(dead_code)]
struct IfreqFlags {
    name: [libc::c_char; IFNAMSIZ],
    flags: libc::c_short,
    _pad: [u8; 22],
}

#[repr(C)]
struct IfreqHwaddr {
    #[allow(dead_code)]
    name: [libc::c_char; IFNAMSIZ],
    hwaddr: libc::sockaddr,
}

fn ifname_bytes(name: &str) -> Result<[libc::c_char; IFNAMSIZ], NetError> {
    if name.len() >= IFNAMSIZ {
        error!("interface name too long: {}", name);
        return Err(NetError::Malformed);
    }
    let mut buf = [0 as libc::c_char; IFNAMSIZ];
    for (slot, byte) in buf.iter_mut().zip(name.bytes()) {
        *slot = byte as libc::c_char;
    }
    Ok(buf)
}

/// Fetch the interface's hardware address via a throwaway socket
/// (`SIOCGIFHWADDR` only works on a socket descriptor).
fn fetch_hwaddr(name: &str) -> Result<[u8; 6], NetError> {
    // SAFETY: plain socket/ioctl/close sequence on a local descriptor.
    let ifname = ifname_bytes(name)?;
    unsafe {
        let soc = libc::socket(libc::AF_INET, libc::SOCK_DGRAM, 0);
        if soc == -1 {
            error!("socket: {}", io::Error::last_os_error());
            return Err(NetError::DeviceIo);
        }
        let mut ifr = IfreqHwaddr {
            name: ifname,
            hwaddr: std::mem::zeroed(),
        };
        if libc::ioctl(soc, libc::SIOCGIFHWADDR, &mut ifr) == -1 {
            error!("ioctl [SIOCGIFHWADDR]: {}", io::Error::last_os_error());
            libc::close(soc);
            return Err(NetError::DeviceIo);
        }
        libc::close(soc);
        let mut addr = [0u8; 6];
        for (slot, byte) in addr.iter_mut().zip(ifr.hwaddr.sa_data.iter()) {
            *slot = *byte as u8;
        }
        Ok(addr)
    }
}

struct TapDriver {
    ifname: String,
    irq: i32,
    fd: Arc<AtomicI32>,
}

impl netdev::DeviceDriver for TapDriver {
    fn open(&self, dev: &NetDevice) -> Result<(), NetError> {
        let ifname = ifname_bytes(&self.ifname)?;
        // SAFETY: open/ioctl/fcntl sequence on a descriptor this
        // driver owns; error paths close it.
        unsafe {
            let fd = libc::open(CLONE_DEVICE.as_ptr() as *const libc::c_char, libc::O_RDWR);
            if fd == -1 {
                error!("open [{}]: {}", self.ifname, io::Error::last_os_error());
                return Err(NetError::DeviceIo);
            }
            let mut ifr = IfreqFlags {
                name: ifname,
                flags: IFF_TAP | IFF_NO_PI,
                _pad: [0; 22],
            };
            if libc::ioctl(fd, TUNSETIFF, &mut ifr) == -1 {
                error!("ioctl [TUNSETIFF]: {}", io::Error::last_os_error());
                libc::close(fd);
                return Err(NetError::DeviceIo);
            }
            // Signal-driven I/O: this process, this IRQ, async +
            // non-blocking reads.
            if libc::fcntl(fd, libc::F_SETOWN, libc::getpid()) == -1
                || libc::fcntl(fd, libc::F_SETFL, libc::O_ASYNC | libc::O_NONBLOCK) == -1
                || libc::fcntl(fd, F_SETSIG, self.irq) == -1
            {
                error!("fcntl: {}", io::Error::last_os_error());
                libc::close(fd);
                return Err(NetError::DeviceIo);
            }
            if dev.addr()[..ethernet::ADDR_LEN] == [0; ethernet::ADDR_LEN] {
                let hwaddr = match fetch_hwaddr(&self.ifname) {
                    Ok(hwaddr) => hwaddr,
                    Err(err) => {
                        libc::close(fd);
                        return Err(err);
                    }
                };
                dev.set_addr(&hwaddr);
                debug!(
                    "hardware address fetched, dev={}, addr={}",
                    dev.name(),
                    MacAddr(hwaddr)
                );
            }
            self.fd.store(fd, Ordering::Release);
        }
        Ok(())
    }

    fn close(&self, _dev: &NetDevice) -> Result<(), NetError> {
        let fd = self.fd.swap(-1, Ordering::AcqRel);
        if fd != -1 {
            // SAFETY: fd was taken out of circulation by the swap.
            unsafe { libc::close(fd) };
        }
        Ok(())
    }

    fn transmit(
        &self,
        dev: &NetDevice,
        ptype: u16,
        data: &[u8],
        dst: &[u8],
    ) -> Result<(), NetError> {
        let fd = self.fd.load(Ordering::Acquire);
        if fd == -1 {
            return Err(NetError::NotUp);
        }
        ethernet::transmit_helper(dev, ptype, data, dst, |frame| {
            // SAFETY: writing a local buffer to an open descriptor.
            let n = unsafe {
                libc::write(fd, frame.as_ptr() as *const libc::c_void, frame.len())
            };
            if n < 0 {
                return Err(io::Error::last_os_error());
            }
            Ok(n as usize)
        })
    }
}

/// Register a TAP device bound to the named kernel interface.
///
/// `hwaddr` overrides the kernel-assigned hardware address; pass
/// `None` to use the kernel's.
pub fn create(ifname: &str, hwaddr: Option<MacAddr>) -> Result<Arc<NetDevice>, NetError> {
    let fd = Arc::new(AtomicI32::new(-1));
    let driver = TapDriver {
        ifname: ifname.to_string(),
        irq: irq(),
        fd: Arc::clone(&fd),
    };
    let spec = ethernet::device_spec(hwaddr.unwrap_or(MacAddr::ZERO));
    let dev = netdev::register(spec, Box::new(driver));

    let isr_dev = Arc::clone(&dev);
    intr::request_irq(
        irq(),
        dev.name(),
        false,
        Box::new(move |_irq| loop {
            let fd = fd.load(Ordering::Acquire);
            if fd == -1 {
                break;
            }
            let mut pfd = libc::pollfd {
                fd,
                events: libc::POLLIN,
                revents: 0,
            };
            // SAFETY: zero-timeout readiness check on an open fd.
            let ready = unsafe { libc::poll(&mut pfd, 1, 0) };
            if ready < 1 {
                break;
            }
            let _ = ethernet::input_helper(&isr_dev, |buf| {
                // SAFETY: reading into a local buffer from an open fd.
                let n = unsafe {
                    libc::read(fd, buf.as_mut_ptr() as *mut libc::c_void, buf.len())
                };
                if n < 0 {
                    return Err(io::Error::last_os_error());
                }
                Ok(n as usize)
            });
        }),
    )?;
    Ok(dev)
}
