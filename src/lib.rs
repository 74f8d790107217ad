//! A user-space TCP/IP protocol stack.
//!
//! `ustack` terminates Ethernet frames, answers ARP, delivers IPv4,
//! replies to ICMP echo, and exposes blocking UDP and passive-open TCP
//! socket APIs to threads in the same process.  Frames enter through a
//! kernel TAP device or the in-process loopback.
//!
//! # Architecture
//!
//! The stack is layered bottom-up:
//!
//! - [`netdev`] — abstract network devices over a [`netdev::DeviceDriver`]
//!   trait, plus the device registry.
//! - [`intr`] — the interrupt layer.  A dedicated thread blocks on a
//!   signal set; each device IRQ maps to a distinct real-time signal.
//! - [`ingress`] — per-protocol ingress queues and the soft-IRQ drain.
//! - [`ethernet`], [`arp`], [`ipv4`], [`icmp`] — the datagram layers.
//! - [`udp`], [`tcp`] — socket-like endpoints with blocking semantics
//!   built on [`sched::WaitCtx`].
//! - [`netstack`] — `init`/`run`/`shutdown` orchestration.
//!
//! # Concurrency model
//!
//! Registries (devices, protocols, routes, interfaces, timers, events)
//! are built during startup and append-only afterwards; each sits
//! behind its own mutex.  The ARP cache and the UDP/TCP endpoint
//! tables are guarded by one mutex each.  Application threads block on
//! per-endpoint condition variables and are woken by protocol events
//! or interrupted by the process-wide cancellation event.

pub mod arp;
pub mod checksum;
pub mod drivers;
pub mod ethernet;
pub mod event;
pub mod icmp;
pub mod ingress;
pub mod intr;
pub mod ipv4;
pub mod logging;
pub mod netdev;
pub mod netstack;
pub mod route;
pub mod sched;
pub mod tcp;
pub mod timer;
pub mod types;
pub mod udp;

#[cfg(test)]
mod testing;

pub use types::{Endpoint, Ipv4Addr, MacAddr, NetError};
