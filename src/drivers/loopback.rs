//! In-process loopback device.
//!
//! `transmit` parks the payload (with its protocol type) on an
//! internal queue and raises the device IRQ; the ISR drains the queue
//! back into the ingress pipeline.  No framing, no checksums, no ARP.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use log::{debug, error};

use crate::ingress;
use crate::intr;
use crate::netdev::{self, DeviceFlags, DeviceSpec, NetDevice};
use crate::sched::lock;
use crate::types::NetError;

const QUEUE_LIMIT: usize = 16;

/// Big enough for any IP datagram.
const LOOPBACK_MTU: u16 = u16::MAX;

/// The loopback IRQ; shared, since every loopback instance drains on
/// the same signal.
pub fn irq() -> i32 {
    intr::irq_base() + 1
}

type Queue = Mutex<VecDeque<(u16, Vec<u8>)>>;

struct LoopbackDriver {
    irq: i32,
    queue: Arc<Queue>,
}

impl netdev::DeviceDriver for LoopbackDriver {
    fn transmit(
        &self,
        dev: &NetDevice,
        ptype: u16,
        data: &[u8],
        _dst: &[u8],
    ) -> Result<(), NetError> {
        let depth = {
            let mut queue = lock(&self.queue);
            if queue.len() >= QUEUE_LIMIT {
                error!("queue is full, dev={}", dev.name());
                return Err(NetError::QueueFull);
            }
            queue.push_back((ptype, data.to_vec()));
            queue.len()
        };
        debug!(
            "queue pushed (num={}), dev={}, type=0x{:04x}, len={}",
            depth,
            dev.name(),
            ptype,
            data.len()
        );
        intr::raise(self.irq)
    }
}

/// Register a loopback device and its ISR.
pub fn create() -> Result<Arc<NetDevice>, NetError> {
    let queue: Arc<Queue> = Arc::new(Mutex::new(VecDeque::new()));
    let driver = LoopbackDriver {
        irq: irq(),
        queue: Arc::clone(&queue),
    };
    let spec = DeviceSpec {
        dtype: netdev::TYPE_LOOPBACK,
        mtu: LOOPBACK_MTU,
        flags: DeviceFlags::LOOPBACK,
        hlen: 0,
        alen: 0,
        addr: [0; netdev::ADDR_LEN],
        broadcast: [0; netdev::ADDR_LEN],
    };
    let dev = netdev::register(spec, Box::new(driver));

    let isr_dev = Arc::clone(&dev);
    let isr_queue = Arc::clone(&queue);
    intr::request_irq(
        irq(),
        dev.name(),
        true,
        Box::new(move |_irq| loop {
            let entry = lock(&isr_queue).pop_front();
            let Some((ptype, data)) = entry else {
                break;
            };
            debug!(
                "queue popped, dev={}, type=0x{:04x}, len={}",
                isr_dev.name(),
                ptype,
                data.len()
            );
            let _ = ingress::input_handler(ptype, &data, &isr_dev);
        }),
    )?;
    Ok(dev)
}
