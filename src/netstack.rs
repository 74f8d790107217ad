//! Stack lifecycle: `init`, `run`, `shutdown`, `interrupt`.
//!
//! An application initialises the stack, registers its devices,
//! interfaces, and routes, then calls [`run`].  From that point the
//! registries are append-only and the interrupt thread owns ingress.
//! [`interrupt`] raises the process-wide cancellation event (it is
//! safe to call from a signal handler); [`shutdown`] stops the
//! interrupt thread and closes every device.

use log::{debug, info};

use crate::types::NetError;
use crate::{arp, icmp, intr, ipv4, netdev, tcp, udp};

/// Initialise the stack: register the built-in protocols, their
/// timers, and their event subscriptions.
///
/// Call exactly once, before any device registration.
pub fn init() -> Result<(), NetError> {
    ipv4::init()?;
    icmp::init()?;
    arp::init()?;
    udp::init()?;
    tcp::init()?;
    info!("initialized");
    Ok(())
}

/// Start the stack: launch the interrupt machinery, then open every
/// registered device.
///
/// Must be called from the main thread before application threads are
/// spawned, so they inherit the signal mask.
pub fn run() -> Result<(), NetError> {
    intr::run()?;
    debug!("open all devices...");
    for dev in netdev::devices() {
        // A device that fails to open stays down; the rest of the
        // stack keeps running.
        let _ = dev.open();
    }
    debug!("running...");
    Ok(())
}

/// Stop the stack: terminate the interrupt thread, then close every
/// device.
pub fn shutdown() {
    intr::shutdown();
    debug!("close all devices...");
    for dev in netdev::devices() {
        let _ = dev.close();
    }
    debug!("shutting down");
}

/// Raise the process-wide cancellation event, unblocking every
/// sleeping socket call with an interrupted error.
///
/// Async-signal-safe: applications may call this from a `SIGINT`
/// handler.
pub fn interrupt() {
    let _ = intr::raise(intr::IRQ_EVENT);
}
