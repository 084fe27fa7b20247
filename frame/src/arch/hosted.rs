// SPDX-License-Identifier: MPL-2.0

//! Hosted backend.
//!
//! Kernel threads map onto `std` threads. The interrupt-disable critical
//! section becomes a process-global recursive lock: on a single-core target
//! masking PRIMASK guarantees that no other kernel code runs concurrently,
//! and a global lock gives the hosted build the same guarantee.

use core::cell::Cell;
use core::marker::PhantomData;
use core::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::{Condvar, Mutex, MutexGuard};
use std::time::{Duration, Instant};

static NEXT_OWNER_ID: AtomicU64 = AtomicU64::new(1);

std::thread_local! {
    static OWNER_ID: Cell<u64> = const { Cell::new(0) };
}

fn owner_id() -> u64 {
    OWNER_ID.with(|id| {
        if id.get() == 0 {
            id.set(NEXT_OWNER_ID.fetch_add(1, Ordering::Relaxed));
        }
        id.get()
    })
}

struct CriticalSection {
    owner: AtomicU64,
    depth: AtomicU32,
}

static CRITICAL: CriticalSection = CriticalSection {
    owner: AtomicU64::new(0),
    depth: AtomicU32::new(0),
};

/// A guard for disabled local IRQs.
///
/// Dropping the outermost guard re-enables interrupts; nested guards only
/// decrement the depth. The guard must be dropped on the thread that created
/// it.
pub struct IrqGuard {
    _not_send: PhantomData<*mut ()>,
}

/// Disable local IRQs until the returned guard is dropped.
///
/// Nestable: interrupts are only re-enabled when the outermost guard goes
/// away. Code holding a guard must not block.
#[must_use]
pub fn disable_interrupts() -> IrqGuard {
    let me = owner_id();
    if CRITICAL.owner.load(Ordering::Acquire) == me {
        CRITICAL.depth.fetch_add(1, Ordering::Relaxed);
    } else {
        while CRITICAL
            .owner
            .compare_exchange_weak(0, me, Ordering::Acquire, Ordering::Relaxed)
            .is_err()
        {
            core::hint::spin_loop();
        }
        CRITICAL.depth.store(1, Ordering::Relaxed);
    }
    IrqGuard {
        _not_send: PhantomData,
    }
}

impl Drop for IrqGuard {
    fn drop(&mut self) {
        if CRITICAL.depth.fetch_sub(1, Ordering::Relaxed) == 1 {
            CRITICAL.owner.store(0, Ordering::Release);
        }
    }
}

/// Whether the calling thread currently holds the critical section.
pub fn interrupts_disabled() -> bool {
    CRITICAL.owner.load(Ordering::Acquire) == owner_id()
}

/// One thread's sleep token.
///
/// `unpark` delivers a single token; a park that finds the token pending
/// consumes it and returns immediately, so an unpark that races ahead of the
/// park is never lost. Spurious wakeups are allowed; callers loop on their
/// own condition.
pub struct Parker {
    token: Mutex<bool>,
    cvar: Condvar,
}

impl Parker {
    pub fn new() -> Self {
        Self {
            token: Mutex::new(false),
            cvar: Condvar::new(),
        }
    }

    fn token(&self) -> MutexGuard<'_, bool> {
        self.token.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Block the calling thread until a token is delivered.
    pub fn park(&self) {
        let mut token = self.token();
        while !*token {
            token = self
                .cvar
                .wait(token)
                .unwrap_or_else(|e| e.into_inner());
        }
        *token = false;
    }

    /// Block until a token is delivered or the monotonic clock passes
    /// `deadline_ns`. Returns `true` if a token was consumed.
    pub fn park_deadline(&self, deadline_ns: i64) -> bool {
        let mut token = self.token();
        loop {
            if *token {
                *token = false;
                return true;
            }
            let now = monotonic_ns();
            if now >= deadline_ns {
                return false;
            }
            let wait = Duration::from_nanos((deadline_ns - now) as u64);
            let (guard, _) = self
                .cvar
                .wait_timeout(token, wait)
                .unwrap_or_else(|e| e.into_inner());
            token = guard;
        }
    }

    /// Deliver a token, waking the parked owner if there is one.
    pub fn unpark(&self) {
        let mut token = self.token();
        *token = true;
        self.cvar.notify_one();
    }
}

impl Default for Parker {
    fn default() -> Self {
        Self::new()
    }
}

/// Spawn a host thread backing a kernel thread.
pub fn spawn_thread(
    name: &str,
    stack_size: usize,
    entry: alloc::boxed::Box<dyn FnOnce() + Send + 'static>,
) -> Result<(), ()> {
    // Host stacks need room for std machinery below the kernel entry.
    let stack_size = stack_size.max(128 * 1024);
    std::thread::Builder::new()
        .name(name.into())
        .stack_size(stack_size)
        .spawn(entry)
        .map(|_| ())
        .map_err(|err| {
            log::error!("host thread spawn failed: {}", err);
        })
}

/// Give up the CPU to the host scheduler.
pub fn relax() {
    std::thread::yield_now();
}

// The NVIC does not exist here; vector enable state is tracked so tests can
// observe the dispatcher driving it.

static ENABLED_VECTORS: spin::Mutex<[u64; 4]> = spin::Mutex::new([0; 4]);

pub fn nvic_enable_irq(irq: u32) {
    let mut words = ENABLED_VECTORS.lock();
    words[(irq / 64) as usize] |= 1 << (irq % 64);
}

pub fn nvic_disable_irq(irq: u32) {
    let mut words = ENABLED_VECTORS.lock();
    words[(irq / 64) as usize] &= !(1 << (irq % 64));
}

pub fn nvic_set_priority(_irq: u32, _priority: u8) {}

pub fn nvic_irq_enabled(irq: u32) -> bool {
    let words = ENABLED_VECTORS.lock();
    words[(irq / 64) as usize] & (1 << (irq % 64)) != 0
}

static EPOCH: spin::Once<Instant> = spin::Once::new();

/// Nanoseconds on the monotonic clock since the first call in this process.
pub fn monotonic_ns() -> i64 {
    let epoch = *EPOCH.call_once(Instant::now);
    Instant::now().duration_since(epoch).as_nanos() as i64
}
