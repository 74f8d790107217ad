//! ICMP: echo reply only.
//!
//! A valid ECHO arriving at a local interface is answered with an
//! ECHOREPLY carrying the original identifier, sequence number, and
//! payload; the reply's source is the receiving interface's unicast,
//! so echo requests to a broadcast address are answered correctly.
//! Every other message type is logged and ignored.

use std::sync::Arc;

use log::{debug, error, log_enabled, trace, Level};

use crate::checksum::cksum16;
use crate::ipv4::{self, IpIface};
use crate::logging::hexdump;
use crate::types::{Ipv4Addr, NetError};

pub const HDR_SIZE: usize = 8;

pub const TYPE_ECHOREPLY: u8 = 0;
pub const TYPE_ECHO: u8 = 8;

pub(crate) fn input(data: &[u8], src: Ipv4Addr, dst: Ipv4Addr, iface: &Arc<IpIface>) {
    if data.len() < HDR_SIZE {
        error!("too short, len={}", data.len());
        return;
    }
    if cksum16(data, 0) != 0 {
        error!("checksum error");
        return;
    }
    let msg_type = data[0];
    let code = data[1];
    debug!(
        "{} => {}, type={}, code={}, len={}",
        src,
        dst,
        msg_type,
        code,
        data.len()
    );
    if log_enabled!(Level::Trace) {
        trace!("\n{}", hexdump(data));
    }
    match msg_type {
        TYPE_ECHO => {
            let values = u32::from_be_bytes([data[4], data[5], data[6], data[7]]);
            // Reply from the interface unicast even when the request
            // was addressed to a broadcast.
            let _ = output(
                TYPE_ECHOREPLY,
                code,
                values,
                &data[HDR_SIZE..],
                iface.unicast,
                src,
            );
        }
        _ => {
            debug!("ignored, type={}", msg_type);
        }
    }
}

/// Build and send an ICMP message.
///
/// `values` is the 4-byte message-specific field; for echo messages it
/// carries the identifier (high 16 bits) and sequence number (low 16).
pub fn output(
    msg_type: u8,
    code: u8,
    values: u32,
    data: &[u8],
    src: Ipv4Addr,
    dst: Ipv4Addr,
) -> Result<usize, NetError> {
    let mut msg = vec![0u8; HDR_SIZE + data.len()];
    msg[0] = msg_type;
    msg[1] = code;
    msg[4..8].copy_from_slice(&values.to_be_bytes());
    msg[HDR_SIZE..].copy_from_slice(data);
    let sum = cksum16(&msg, 0);
    msg[2..4].copy_from_slice(&sum.to_be_bytes());

    debug!("{} => {}, type={}, len={}", src, dst, msg_type, msg.len());
    if log_enabled!(Level::Trace) {
        trace!("\n{}", hexdump(&msg));
    }
    ipv4::output(ipv4::PROTOCOL_ICMP, &msg, src, dst)
}

pub(crate) fn init() -> Result<(), NetError> {
    ipv4::protocol_register(ipv4::PROTOCOL_ICMP, input)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn echo_message_checksum_folds_to_zero() {
        let mut msg = vec![0u8; HDR_SIZE + 4];
        msg[0] = TYPE_ECHO;
        msg[4..8].copy_from_slice(&0x1234_0001u32.to_be_bytes());
        msg[8..12].copy_from_slice(b"abcd");
        let sum = cksum16(&msg, 0);
        msg[2..4].copy_from_slice(&sum.to_be_bytes());
        assert_eq!(cksum16(&msg, 0), 0);
    }
}
