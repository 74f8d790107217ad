//! Discard device: transmit drops the payload and raises the IRQ so
//! the interrupt path can be exercised without hardware.

use std::sync::Arc;

use log::debug;

use crate::intr;
use crate::netdev::{self, DeviceFlags, DeviceSpec, NetDevice};
use crate::types::NetError;

pub fn irq() -> i32 {
    intr::irq_base()
}

struct DummyDriver {
    irq: i32,
}

impl netdev::DeviceDriver for DummyDriver {
    fn transmit(
        &self,
        dev: &NetDevice,
        ptype: u16,
        data: &[u8],
        _dst: &[u8],
    ) -> Result<(), NetError> {
        debug!(
            "dev={}, type=0x{:04x}, len={} (discarded)",
            dev.name(),
            ptype,
            data.len()
        );
        intr::raise(self.irq)
    }
}

/// Register a dummy device and its (no-op) ISR.
pub fn create() -> Result<Arc<NetDevice>, NetError> {
    let spec = DeviceSpec {
        dtype: netdev::TYPE_DUMMY,
        mtu: u16::MAX,
        flags: DeviceFlags::empty(),
        hlen: 0,
        alen: 0,
        addr: [0; netdev::ADDR_LEN],
        broadcast: [0; netdev::ADDR_LEN],
    };
    let dev = netdev::register(spec, Box::new(DummyDriver { irq: irq() }));

    let isr_dev = Arc::clone(&dev);
    intr::request_irq(
        irq(),
        dev.name(),
        true,
        Box::new(move |irq| {
            debug!("irq={}, dev={}", irq, isr_dev.name());
        }),
    )?;
    Ok(dev)
}
