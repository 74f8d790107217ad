//! Device drivers: the in-process loopback, a discard device for
//! exercising the device layer, and the Linux TAP driver.

pub mod dummy;
pub mod loopback;
pub mod tap;
