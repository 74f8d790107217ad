//! Ethernet II framing.
//!
//! Frame construction and validation are shared helpers: a driver owns
//! the file-descriptor I/O and passes a closure, so the TAP driver's
//! read/write stays out of the protocol path.  The loopback device
//! carries raw payloads and bypasses this module entirely.

use std::io;
use std::sync::Arc;

use log::{debug, error, log_enabled, trace, Level};

use crate::ingress;
use crate::logging::hexdump;
use crate::netdev::{self, DeviceFlags, DeviceSpec, NetDevice};
use crate::types::{MacAddr, NetError};

pub const ADDR_LEN: usize = 6;
pub const HDR_SIZE: usize = 14;
pub const FRAME_SIZE_MIN: usize = 60; // without FCS
pub const FRAME_SIZE_MAX: usize = 1514; // without FCS
pub const PAYLOAD_SIZE_MIN: usize = FRAME_SIZE_MIN - HDR_SIZE;
pub const PAYLOAD_SIZE_MAX: usize = FRAME_SIZE_MAX - HDR_SIZE;

pub const TYPE_IP: u16 = 0x0800;
pub const TYPE_ARP: u16 = 0x0806;

/// Device parameters common to every Ethernet device.
pub fn device_spec(addr: MacAddr) -> DeviceSpec {
    let mut addr_buf = [0u8; netdev::ADDR_LEN];
    addr_buf[..ADDR_LEN].copy_from_slice(&addr.0);
    let mut bcast_buf = [0u8; netdev::ADDR_LEN];
    bcast_buf[..ADDR_LEN].copy_from_slice(&MacAddr::BROADCAST.0);
    DeviceSpec {
        dtype: netdev::TYPE_ETHERNET,
        mtu: PAYLOAD_SIZE_MAX as u16,
        flags: DeviceFlags::BROADCAST | DeviceFlags::NEED_ARP,
        hlen: HDR_SIZE as u16,
        alen: ADDR_LEN as u16,
        addr: addr_buf,
        broadcast: bcast_buf,
    }
}

/// Build a frame around `data` and hand it to the driver's `write`
/// closure.
///
/// The header carries `dst`, the device address, and the big-endian
/// EtherType; payloads below the Ethernet minimum are zero-padded.  A
/// short write is reported as failure.
pub fn transmit_helper(
    dev: &NetDevice,
    ptype: u16,
    data: &[u8],
    dst: &[u8],
    write: impl FnOnce(&[u8]) -> io::Result<usize>,
) -> Result<(), NetError> {
    let payload_len = data.len().max(PAYLOAD_SIZE_MIN);
    let mut frame = vec![0u8; HDR_SIZE + payload_len];
    frame[0..ADDR_LEN].copy_from_slice(&dst[..ADDR_LEN]);
    frame[ADDR_LEN..ADDR_LEN * 2].copy_from_slice(&dev.addr()[..ADDR_LEN]);
    frame[ADDR_LEN * 2..HDR_SIZE].copy_from_slice(&ptype.to_be_bytes());
    frame[HDR_SIZE..HDR_SIZE + data.len()].copy_from_slice(data);

    debug!("dev={}, type=0x{:04x}, len={}", dev.name(), ptype, frame.len());
    if log_enabled!(Level::Trace) {
        trace!("\n{}", hexdump(&frame));
    }
    match write(&frame) {
        Ok(written) if written == frame.len() => Ok(()),
        Ok(written) => {
            error!(
                "short write, dev={}, len={}, written={}",
                dev.name(),
                frame.len(),
                written
            );
            Err(NetError::DeviceIo)
        }
        Err(err) => {
            error!("write failed, dev={}: {}", dev.name(), err);
            Err(NetError::DeviceIo)
        }
    }
}

/// Validate a received frame against the device address.
///
/// Returns the EtherType and payload for frames addressed to `addr`
/// or to the Ethernet broadcast, `None` for frames destined to other
/// hosts (dropped without error).
pub(crate) fn check_frame(addr: MacAddr, frame: &[u8]) -> Result<Option<(u16, &[u8])>, NetError> {
    if frame.len() < HDR_SIZE {
        error!("frame too short, len={}", frame.len());
        return Err(NetError::TooShort);
    }
    let dst = MacAddr([frame[0], frame[1], frame[2], frame[3], frame[4], frame[5]]);
    if dst != addr && !dst.is_broadcast() {
        // for other host
        return Ok(None);
    }
    let ptype = u16::from_be_bytes([frame[12], frame[13]]);
    Ok(Some((ptype, &frame[HDR_SIZE..])))
}

/// Read one frame through the driver's `read` closure, filter it by
/// destination, and dispatch the payload by EtherType.
pub fn input_helper(
    dev: &Arc<NetDevice>,
    read: impl FnOnce(&mut [u8]) -> io::Result<usize>,
) -> Result<(), NetError> {
    let mut buf = [0u8; FRAME_SIZE_MAX];
    let flen = read(&mut buf).map_err(|err| {
        error!("read failed, dev={}: {}", dev.name(), err);
        NetError::DeviceIo
    })?;
    let frame = &buf[..flen];

    let mut addr = [0u8; ADDR_LEN];
    addr.copy_from_slice(&dev.addr()[..ADDR_LEN]);
    match check_frame(MacAddr(addr), frame)? {
        Some((ptype, payload)) => {
            debug!("dev={}, type=0x{:04x}, len={}", dev.name(), ptype, flen);
            if log_enabled!(Level::Trace) {
                trace!("\n{}", hexdump(frame));
            }
            ingress::input_handler(ptype, payload, dev)
        }
        None => Ok(()),
    }
}
