//! Process-wide event subscriptions.
//!
//! The single event is cancellation: [`crate::netstack::interrupt`]
//! raises it, the interrupt thread calls [`handler`], and each
//! subscriber (the UDP and TCP layers) interrupts every blocked
//! endpoint so application threads return with
//! [`crate::types::NetError::Interrupted`].

use std::sync::Mutex;

use log::debug;

use crate::sched::lock;

static SUBSCRIPTIONS: Mutex<Vec<fn()>> = Mutex::new(Vec::new());

/// Subscribe to the process-wide event.
///
/// Must not be called after [`crate::netstack::run`].
pub fn subscribe(callback: fn()) {
    debug!("subscribed");
    lock(&SUBSCRIPTIONS).push(callback);
}

/// Invoke every subscriber.
///
/// Runs on the interrupt thread when the event signal fires; tests
/// call it directly.
pub fn handler() {
    let subscribers = lock(&SUBSCRIPTIONS).clone();
    for callback in subscribers {
        callback();
    }
}
