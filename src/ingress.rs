//! Ingress pipeline: per-protocol queues and soft-IRQ dispatch.
//!
//! Drivers hand every received payload to [`input_handler`] with its
//! L2 protocol type.  The handler copies the payload onto the matching
//! protocol's FIFO and raises the soft-IRQ; the interrupt thread then
//! drains every queue in [`softirq_handler`], invoking each protocol's
//! handler once per entry.  Draining is single-threaded, so within one
//! protocol, handler invocations preserve arrival order.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use log::{debug, info, log_enabled, trace, Level};

use crate::intr;
use crate::logging::hexdump;
use crate::netdev::NetDevice;
use crate::sched::lock;
use crate::types::NetError;

/// Upper-layer protocol handler, invoked from soft-IRQ context.
pub type ProtocolHandler = fn(data: &[u8], dev: &Arc<NetDevice>);

struct QueueEntry {
    dev: Arc<NetDevice>,
    data: Vec<u8>,
}

struct ProtocolEntry {
    ptype: u16,
    handler: ProtocolHandler,
    queue: Mutex<VecDeque<QueueEntry>>,
}

static PROTOCOLS: Mutex<Vec<Arc<ProtocolEntry>>> = Mutex::new(Vec::new());

/// Register an upper-layer protocol keyed by EtherType.
///
/// Must not be called after [`crate::netstack::run`].
pub fn register(ptype: u16, handler: ProtocolHandler) -> Result<(), NetError> {
    let mut protocols = lock(&PROTOCOLS);
    if protocols.iter().any(|p| p.ptype == ptype) {
        log::error!("already registered, type=0x{:04x}", ptype);
        return Err(NetError::AlreadyRegistered);
    }
    protocols.push(Arc::new(ProtocolEntry {
        ptype,
        handler,
        queue: Mutex::new(VecDeque::new()),
    }));
    info!("registered, type=0x{:04x}", ptype);
    Ok(())
}

/// Entry point for received payloads.
///
/// Queues the payload for its protocol and raises the soft-IRQ.
/// Payloads with no registered protocol are silently dropped.
pub fn input_handler(ptype: u16, data: &[u8], dev: &Arc<NetDevice>) -> Result<(), NetError> {
    let proto = lock(&PROTOCOLS)
        .iter()
        .find(|p| p.ptype == ptype)
        .cloned();
    let Some(proto) = proto else {
        debug!("unsupported, dev={}, type=0x{:04x}", dev.name(), ptype);
        return Ok(());
    };

    let depth = {
        let mut queue = lock(&proto.queue);
        queue.push_back(QueueEntry {
            dev: Arc::clone(dev),
            data: data.to_vec(),
        });
        queue.len()
    };
    debug!(
        "queue pushed (num={}), dev={}, type=0x{:04x}, len={}",
        depth,
        dev.name(),
        ptype,
        data.len()
    );
    if log_enabled!(Level::Trace) {
        trace!("\n{}", hexdump(data));
    }
    intr::raise(intr::IRQ_SOFTIRQ)
}

/// Drain every protocol queue FIFO and invoke the handlers.
///
/// Runs on the interrupt thread when the soft-IRQ fires; tests call it
/// directly to drive the pipeline synchronously.
pub fn softirq_handler() {
    let protocols = lock(&PROTOCOLS).clone();
    for proto in protocols {
        loop {
            let entry = lock(&proto.queue).pop_front();
            let Some(entry) = entry else {
                break;
            };
            debug!(
                "queue popped, dev={}, type=0x{:04x}, len={}",
                entry.dev.name(),
                proto.ptype,
                entry.data.len()
            );
            (proto.handler)(&entry.data, &entry.dev);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::netdev::{self, DeviceFlags, DeviceSpec, ADDR_LEN, TYPE_DUMMY};

    struct NullDriver;

    impl crate::netdev::DeviceDriver for NullDriver {
        fn transmit(
            &self,
            _dev: &NetDevice,
            _ptype: u16,
            _data: &[u8],
            _dst: &[u8],
        ) -> Result<(), NetError> {
            Ok(())
        }
    }

    fn test_dev() -> Arc<NetDevice> {
        netdev::register(
            DeviceSpec {
                dtype: TYPE_DUMMY,
                mtu: 1500,
                flags: DeviceFlags::empty(),
                hlen: 0,
                alen: 0,
                addr: [0; ADDR_LEN],
                broadcast: [0; ADDR_LEN],
            },
            Box::new(NullDriver),
        )
    }

    // Experimental EtherTypes (0x88b5/0x88b6) keep these tests out of
    // the real protocols' way.
    static SEEN: Mutex<Vec<Vec<u8>>> = Mutex::new(Vec::new());

    fn recording_handler(data: &[u8], _dev: &Arc<NetDevice>) {
        lock(&SEEN).push(data.to_vec());
    }

    #[test]
    fn fifo_order_is_preserved() {
        let _serial = crate::testing::serial();
        let dev = test_dev();
        register(0x88b5, recording_handler).unwrap();
        input_handler(0x88b5, b"one", &dev).unwrap();
        input_handler(0x88b5, b"two", &dev).unwrap();
        input_handler(0x88b5, b"three", &dev).unwrap();

        softirq_handler();
        let seen = lock(&SEEN);
        assert_eq!(*seen, vec![b"one".to_vec(), b"two".to_vec(), b"three".to_vec()]);
    }

    #[test]
    fn duplicate_registration_fails() {
        register(0x88b6, recording_handler).unwrap();
        assert_eq!(
            register(0x88b6, recording_handler),
            Err(NetError::AlreadyRegistered)
        );
    }

    #[test]
    fn unknown_type_is_dropped() {
        let _serial = crate::testing::serial();
        let dev = test_dev();
        // 0x88b7 is never registered; the push must succeed silently.
        input_handler(0x88b7, b"junk", &dev).unwrap();
        softirq_handler();
    }
}
