//! Interrupt layer: POSIX signals as IRQs.
//!
//! A dedicated thread blocks on a signal set with `sigwait`; raising
//! an IRQ sends the corresponding signal to that thread.  Device IRQs
//! occupy the real-time signal range starting at [`irq_base`].  Four
//! fixed signals multiplex the stack's own work:
//!
//! - `SIGHUP` terminates the interrupt thread,
//! - `SIGUSR1` is the soft-IRQ (drain the protocol ingress queues),
//! - `SIGUSR2` is the process-wide cancellation event,
//! - `SIGALRM` is the periodic timer tick (armed via `setitimer`).
//!
//! [`run`] masks the set in the calling thread so the mask is
//! inherited by every thread spawned afterwards; call it from the main
//! thread before starting application threads.  Drivers may raise IRQs
//! from any thread.

use std::mem::MaybeUninit;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Barrier, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

use log::{debug, error};

use crate::sched::lock;
use crate::types::NetError;
use crate::{event, ingress, timer};

/// Interval of the periodic timer tick.
const TICK_INTERVAL: Duration = Duration::from_millis(100);

/// Soft-IRQ: drain the protocol ingress queues.
pub const IRQ_SOFTIRQ: i32 = libc::SIGUSR1;
/// Process-wide cancellation event.
pub const IRQ_EVENT: i32 = libc::SIGUSR2;

/// First signal number available for device IRQs.
///
/// `SIGRTMIN` itself is left alone; some libc implementations reserve
/// the low real-time signals for their threading internals.
pub fn irq_base() -> i32 {
    libc::SIGRTMIN() + 1
}

/// Handler invoked on the interrupt thread when its IRQ fires.
pub type IrqHandler = Box<dyn Fn(i32) + Send + Sync>;

struct IrqEntry {
    irq: i32,
    name: String,
    shared: bool,
    handler: IrqHandler,
}

static IRQS: Mutex<Vec<IrqEntry>> = Mutex::new(Vec::new());

/// pthread id of the interrupt thread; 0 while not running.
static INTR_TID: AtomicU64 = AtomicU64::new(0);

static INTR_THREAD: Mutex<Option<JoinHandle<()>>> = Mutex::new(None);

/// Register `handler` for `irq`.
///
/// Rejects a second registration of the same IRQ number unless both
/// registrations allow sharing.  Must be called before [`run`].
pub fn request_irq(
    irq: i32,
    name: &str,
    shared: bool,
    handler: IrqHandler,
) -> Result<(), NetError> {
    debug!("request irq={}, name={}, shared={}", irq, name, shared);
    let mut irqs = lock(&IRQS);
    for entry in irqs.iter() {
        if entry.irq == irq && !(entry.shared && shared) {
            error!("irq={} conflicts with already registered {}", irq, entry.name);
            return Err(NetError::AlreadyRegistered);
        }
    }
    irqs.push(IrqEntry {
        irq,
        name: name.to_string(),
        shared,
        handler,
    });
    Ok(())
}

/// Raise an IRQ: send its signal to the interrupt thread.
///
/// A raise while the interrupt thread is not running is dropped;
/// tests drive [`dispatch`] directly instead.
pub fn raise(irq: i32) -> Result<(), NetError> {
    let tid = INTR_TID.load(Ordering::Acquire);
    if tid == 0 {
        debug!("interrupt thread not running, irq={} dropped", irq);
        return Ok(());
    }
    // SAFETY: tid was published by the live interrupt thread and stays
    // valid until shutdown() joins it.
    let err = unsafe { libc::pthread_kill(tid as libc::pthread_t, irq) };
    if err != 0 {
        error!("pthread_kill failed, irq={}, err={}", irq, err);
        return Err(NetError::DeviceIo);
    }
    Ok(())
}

/// Deliver `irq` to every matching registered handler, in registration
/// order.
///
/// Called by the interrupt thread for device signals; tests call it to
/// deliver IRQs synchronously.
pub fn dispatch(irq: i32) {
    let irqs = lock(&IRQS);
    for entry in irqs.iter() {
        if entry.irq == irq {
            debug!("irq={}, name={}", entry.irq, entry.name);
            (entry.handler)(irq);
        }
    }
}

fn build_sigset() -> libc::sigset_t {
    // SAFETY: sigemptyset fully initialises the set before use.
    unsafe {
        let mut set = MaybeUninit::<libc::sigset_t>::uninit();
        libc::sigemptyset(set.as_mut_ptr());
        libc::sigaddset(set.as_mut_ptr(), libc::SIGHUP);
        libc::sigaddset(set.as_mut_ptr(), libc::SIGUSR1);
        libc::sigaddset(set.as_mut_ptr(), libc::SIGUSR2);
        libc::sigaddset(set.as_mut_ptr(), libc::SIGALRM);
        for entry in lock(&IRQS).iter() {
            libc::sigaddset(set.as_mut_ptr(), entry.irq);
        }
        set.assume_init()
    }
}

fn set_tick_timer(interval: Duration) -> Result<(), NetError> {
    let tv = libc::timeval {
        tv_sec: interval.as_secs() as libc::time_t,
        tv_usec: interval.subsec_micros() as libc::suseconds_t,
    };
    let timer = libc::itimerval {
        it_interval: tv,
        it_value: tv,
    };
    // SAFETY: plain syscall with a stack-local argument.
    let ret = unsafe { libc::setitimer(libc::ITIMER_REAL, &timer, std::ptr::null_mut()) };
    if ret == -1 {
        error!("setitimer failed");
        return Err(NetError::DeviceIo);
    }
    Ok(())
}

fn intr_thread(set: libc::sigset_t, barrier: Arc<Barrier>) {
    debug!("start...");
    INTR_TID.store(unsafe { libc::pthread_self() } as u64, Ordering::Release);
    barrier.wait();
    loop {
        let mut sig: libc::c_int = 0;
        // SAFETY: set outlives the loop; sig is written before use.
        let err = unsafe { libc::sigwait(&set, &mut sig) };
        if err != 0 {
            error!("sigwait failed, err={}", err);
            break;
        }
        match sig {
            libc::SIGHUP => break,
            libc::SIGUSR1 => ingress::softirq_handler(),
            libc::SIGUSR2 => event::handler(),
            libc::SIGALRM => timer::handler(),
            irq => dispatch(irq),
        }
    }
    debug!("terminated");
}

/// Start the interrupt machinery: mask the signal set in the calling
/// thread, spawn the interrupt thread, and arm the periodic tick.
pub fn run() -> Result<(), NetError> {
    let set = build_sigset();
    // SAFETY: blocking signals in the current thread; the mask is
    // inherited by threads spawned from here on.
    let err = unsafe { libc::pthread_sigmask(libc::SIG_BLOCK, &set, std::ptr::null_mut()) };
    if err != 0 {
        error!("pthread_sigmask failed, err={}", err);
        return Err(NetError::DeviceIo);
    }

    let barrier = Arc::new(Barrier::new(2));
    let thread_barrier = Arc::clone(&barrier);
    let handle = std::thread::Builder::new()
        .name("intr".to_string())
        .spawn(move || intr_thread(set, thread_barrier))
        .map_err(|e| {
            error!("failed to spawn interrupt thread: {}", e);
            NetError::PoolExhausted
        })?;
    *lock(&INTR_THREAD) = Some(handle);

    // Wait until the thread has published its id and entered sigwait.
    barrier.wait();
    set_tick_timer(TICK_INTERVAL)?;
    Ok(())
}

/// Stop the interrupt machinery: disarm the tick, signal the interrupt
/// thread to terminate, and join it.
pub fn shutdown() {
    let zero = libc::itimerval {
        it_interval: libc::timeval { tv_sec: 0, tv_usec: 0 },
        it_value: libc::timeval { tv_sec: 0, tv_usec: 0 },
    };
    // SAFETY: disarming the interval timer.
    unsafe { libc::setitimer(libc::ITIMER_REAL, &zero, std::ptr::null_mut()) };

    let handle = lock(&INTR_THREAD).take();
    if let Some(handle) = handle {
        let tid = INTR_TID.load(Ordering::Acquire);
        if tid != 0 {
            // SAFETY: the thread is alive until join() below returns.
            unsafe { libc::pthread_kill(tid as libc::pthread_t, libc::SIGHUP) };
        }
        let _ = handle.join();
        INTR_TID.store(0, Ordering::Release);
    }
}
