//! Periodic timers for protocol housekeeping.
//!
//! Each timer holds an interval, the instant it last fired, and a
//! plain `fn()` callback.  [`handler`] is the tick entry point: the
//! interrupt thread calls it on every timer signal, and it fires each
//! timer whose interval has elapsed.  Expired callbacks are collected
//! under the list lock and dispatched outside it, so a callback may
//! take protocol locks freely.

use std::sync::Mutex;
use std::time::{Duration, Instant};

use log::info;

use crate::sched::lock;

struct NetTimer {
    interval: Duration,
    last: Instant,
    callback: fn(),
}

static TIMERS: Mutex<Vec<NetTimer>> = Mutex::new(Vec::new());

/// Register a periodic timer.
///
/// Must not be called after [`crate::netstack::run`].
pub fn register(interval: Duration, callback: fn()) {
    lock(&TIMERS).push(NetTimer {
        interval,
        last: Instant::now(),
        callback,
    });
    info!("registered: interval={:?}", interval);
}

/// Fire every timer whose interval has elapsed, updating its
/// last-fire time.
pub fn handler() {
    let now = Instant::now();
    let expired: Vec<fn()> = {
        let mut timers = lock(&TIMERS);
        timers
            .iter_mut()
            .filter(|t| now.duration_since(t.last) >= t.interval)
            .map(|t| {
                t.last = now;
                t.callback
            })
            .collect()
    };
    for callback in expired {
        callback();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    static FIRED: AtomicUsize = AtomicUsize::new(0);

    fn count_fire() {
        FIRED.fetch_add(1, Ordering::Relaxed);
    }

    #[test]
    fn zero_interval_fires_every_tick_once() {
        register(Duration::ZERO, count_fire);
        handler();
        let after_first = FIRED.load(Ordering::Relaxed);
        assert!(after_first >= 1);
        handler();
        assert!(FIRED.load(Ordering::Relaxed) > after_first);
    }
}
