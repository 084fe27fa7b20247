// SPDX-License-Identifier: MPL-2.0

//! The scheduler.
//!
//! Single-core, preemptive, priority-banded: 32 FIFO ready bands, the head
//! of the highest non-empty band runs, equal-priority threads round-robin on
//! the timer tick. On `target_os = "none"` dispatch happens in the PendSV
//! handler; on hosted builds the host OS dispatches and the queues are
//! maintained for bookkeeping and tests.

pub mod wait;

pub(crate) mod park;
pub(crate) mod queues;

pub use queues::priority_to_level;

use crate::prelude::*;
use crate::thread::{self, ThreadState};
use crate::time::{self, deadline_after};

/// Period of the scheduler tick.
pub const TICK_PERIOD: TimeValNanos = TimeValNanos::from_millis(1);

static IDLE_TIME: SpinLock<i64> = SpinLock::new(0);

/// Accumulated idle time since boot.
pub fn get_idle_time() -> TimeValNanos {
    TimeValNanos::from_nanos(*IDLE_TIME.lock())
}

/// Give up the CPU; the thread goes to the tail of its band.
pub fn yield_now() {
    #[cfg(target_os = "none")]
    pados_frame::arch::trigger_reschedule();
    #[cfg(not(target_os = "none"))]
    pados_frame::arch::relax();
}

/// Sleep for `duration`, then become ready again. Not interruptible by
/// signals; wakes directed at the thread are ignored until the deadline.
pub fn snooze(duration: TimeValNanos) {
    snooze_until(deadline_after(duration));
}

/// Sleep until the monotonic clock passes `deadline`.
pub fn snooze_until(deadline: TimeValNanos) {
    if deadline.is_infinite() {
        loop {
            park::park_current(None, ThreadState::Waiting);
        }
    }
    while time::get_monotonic_time() < deadline {
        park::park_current(Some(deadline), ThreadState::Sleeping);
    }
}

/// The scheduler tick: charges the elapsed slice to the running thread,
/// wakes expired sleepers and round-robins the current band.
pub fn timer_tick() {
    #[cfg(target_os = "none")]
    pados_frame::arch::tick_advance(TICK_PERIOD.nanos());

    let current = thread::try_current_thread();
    if let Some(current) = &current {
        current.charge_runtime(TICK_PERIOD);
    }

    let now = time::get_monotonic_time();
    let expired = queues::SLEEP_QUEUE.lock_irq_disabled().expire(now);
    for sleeper in &expired {
        park::unpark(sleeper);
    }

    #[cfg(target_os = "none")]
    if let Some(current) = &current {
        let level = queues::priority_to_level(current.priority());
        if queues::RUN_QUEUES.lock_irq_disabled().should_preempt(level) {
            pados_frame::arch::trigger_reschedule();
        }
    }
}

cfg_if::cfg_if! {
    if #[cfg(target_os = "none")] {
        use pados_frame::arch;

        /// Called by the PendSV handler with the outgoing thread's saved
        /// stack pointer; returns the incoming thread's.
        #[no_mangle]
        extern "C" fn pados_switch_context(current_sp: usize) -> usize {
            let _irq = arch::disable_interrupts();

            if let Some(prev) = thread::take_current_thread() {
                prev.save_stack_pointer(current_sp);
                match prev.state() {
                    ThreadState::Running => {
                        prev.set_state(ThreadState::Ready);
                        queues::run_queue_enqueue(prev);
                    }
                    // Waiting, sleeping and dead threads stay off the ready
                    // queues; their wakers re-enqueue them.
                    _ => (),
                }
            }

            let next = queues::RUN_QUEUES
                .lock_irq_disabled()
                .pick_next()
                .unwrap_or_else(thread::idle_thread);
            next.set_state(ThreadState::Running);
            let sp = next.saved_stack_pointer();
            thread::set_current_thread(next);
            sp
        }

        /// The system tick vector.
        #[no_mangle]
        extern "C" fn SysTick_Handler() {
            timer_tick();
        }

        /// Hand the CPU to the scheduler. Runs the idle loop whenever no
        /// thread is ready.
        pub fn start_scheduler() -> ! {
            thread::init_idle_thread();
            loop {
                let slept = time::get_monotonic_time();
                arch::wait_for_interrupt();
                *IDLE_TIME.lock_irq_disabled() +=
                    (time::get_monotonic_time() - slept).nanos();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::time::get_monotonic_time;

    #[test]
    fn snooze_waits_out_its_deadline() {
        let start = get_monotonic_time();
        snooze(TimeValNanos::from_millis(30));
        let elapsed = get_monotonic_time() - start;
        assert!(elapsed >= TimeValNanos::from_millis(30));
    }

    #[test]
    fn tick_charges_the_running_thread() {
        let current = crate::thread::current_thread();
        let before = current.run_time();
        timer_tick();
        assert!(current.run_time() >= before + TICK_PERIOD);
    }
}
