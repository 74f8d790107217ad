//! Blocking-endpoint scheduler: a wait context per protocol control
//! block.
//!
//! A [`WaitCtx`] pairs a condition variable with an interrupt flag and
//! a waiter count.  Application threads sleep on their endpoint's
//! context while holding the endpoint table's mutex; protocol handlers
//! wake them with a broadcast.  The process-wide cancellation event
//! interrupts every sleeper, which then returns an EINTR-class error
//! to its caller.
//!
//! The counters are atomics only so they can live outside the
//! mutex-protected table data; every access happens with the table
//! lock held.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};

/// Lock a mutex, ignoring poisoning.
///
/// Poisoning only occurs when a thread panics with the lock held; the
/// stack treats that as fatal rather than recoverable, so every lock
/// site goes through this helper.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// How a sleeper was woken.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Wake {
    /// Broadcast wakeup — re-check the condition and continue.
    Ready,
    /// The cancellation event fired; unwind with an interrupted error.
    Interrupted,
}

/// Per-endpoint wait context.
pub struct WaitCtx {
    cond: Condvar,
    interrupted: AtomicBool,
    waiters: AtomicUsize,
}

impl WaitCtx {
    pub const fn new() -> Self {
        Self {
            cond: Condvar::new(),
            interrupted: AtomicBool::new(false),
            waiters: AtomicUsize::new(0),
        }
    }

    /// Sleep until woken, releasing `guard` while waiting and
    /// reacquiring it before returning.
    ///
    /// Returns [`Wake::Interrupted`] without sleeping if the interrupt
    /// flag is already set.  The flag clears once the last interrupted
    /// sleeper has left.
    pub fn sleep<'a, T>(&self, guard: MutexGuard<'a, T>) -> (MutexGuard<'a, T>, Wake) {
        if self.interrupted.load(Ordering::Relaxed) {
            return (guard, Wake::Interrupted);
        }
        self.waiters.fetch_add(1, Ordering::Relaxed);
        let guard = self
            .cond
            .wait(guard)
            .unwrap_or_else(PoisonError::into_inner);
        let remaining = self.waiters.fetch_sub(1, Ordering::Relaxed) - 1;
        if self.interrupted.load(Ordering::Relaxed) {
            if remaining == 0 {
                self.interrupted.store(false, Ordering::Relaxed);
            }
            return (guard, Wake::Interrupted);
        }
        (guard, Wake::Ready)
    }

    /// Broadcast-wake every sleeper.
    pub fn wakeup(&self) {
        self.cond.notify_all();
    }

    /// Set the interrupt flag and broadcast-wake every sleeper.
    pub fn interrupt(&self) {
        self.interrupted.store(true, Ordering::Relaxed);
        self.cond.notify_all();
    }

    /// Number of threads currently sleeping on this context.
    pub fn waiters(&self) -> usize {
        self.waiters.load(Ordering::Relaxed)
    }

    /// Re-arm a context for a freshly allocated endpoint.
    ///
    /// A released slot may carry a stale interrupt flag when the
    /// cancellation event fired while nothing was sleeping; the next
    /// owner must not inherit it.
    pub fn reset(&self) {
        debug_assert_eq!(self.waiters(), 0);
        self.interrupted.store(false, Ordering::Relaxed);
    }
}

impl Default for WaitCtx {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn wakeup_reacquires_guard() {
        let table = Arc::new(Mutex::new(0u32));
        let ctx = Arc::new(WaitCtx::new());

        let sleeper = {
            let table = Arc::clone(&table);
            let ctx = Arc::clone(&ctx);
            thread::spawn(move || {
                let mut guard = lock(&table);
                while *guard == 0 {
                    let (g, wake) = ctx.sleep(guard);
                    guard = g;
                    assert_eq!(wake, Wake::Ready);
                }
                *guard
            })
        };

        // Let the sleeper reach the condvar, then publish and wake.
        thread::sleep(Duration::from_millis(20));
        *lock(&table) = 7;
        ctx.wakeup();
        assert_eq!(sleeper.join().unwrap(), 7);
    }

    #[test]
    fn interrupt_unblocks_all_sleepers() {
        let table = Arc::new(Mutex::new(()));
        let ctx = Arc::new(WaitCtx::new());

        let sleepers: Vec<_> = (0..3)
            .map(|_| {
                let table = Arc::clone(&table);
                let ctx = Arc::clone(&ctx);
                thread::spawn(move || {
                    let guard = lock(&table);
                    let (_guard, wake) = ctx.sleep(guard);
                    wake
                })
            })
            .collect();

        thread::sleep(Duration::from_millis(20));
        {
            let _guard = lock(&table);
            ctx.interrupt();
        }
        for sleeper in sleepers {
            assert_eq!(sleeper.join().unwrap(), Wake::Interrupted);
        }
        // The last sleeper out clears the flag and the waiter count.
        assert_eq!(ctx.waiters(), 0);
        assert!(!ctx.interrupted.load(Ordering::Relaxed));
    }

    #[test]
    fn interrupt_flag_short_circuits() {
        let table = Mutex::new(());
        let ctx = WaitCtx::new();
        ctx.interrupted.store(true, Ordering::Relaxed);
        let (_guard, wake) = ctx.sleep(lock(&table));
        assert_eq!(wake, Wake::Interrupted);
    }
}
