// SPDX-License-Identifier: MPL-2.0

//! Parking and unparking of kernel threads.
//!
//! A park delivers the calling thread to the scheduler until somebody
//! unparks it or its deadline passes. Unparking delivers a single token, so
//! an unpark racing ahead of the park is never lost. Spurious returns are
//! allowed; callers loop on their own condition.

use crate::prelude::*;
use crate::sched::queues;
use crate::thread::{self, ThreadCb, ThreadState};

cfg_if::cfg_if! {
    if #[cfg(target_os = "none")] {
        use pados_frame::arch;

        /// Park the calling thread in `state` until unparked or past
        /// `deadline`.
        pub(crate) fn park_current(deadline: Option<TimeValNanos>, state: ThreadState) {
            let current = thread::current_thread();
            let sleep_entry = deadline.filter(|d| !d.is_infinite());
            {
                let _irq = arch::disable_interrupts();
                if current.take_wake_token() {
                    return;
                }
                current.set_state(state);
                if let Some(resume_time) = sleep_entry {
                    queues::sleep_queue_insert(&current, resume_time);
                }
                arch::trigger_reschedule();
            }
            // Interrupts are enabled here; PendSV takes us off the CPU until
            // a wake or the tick expiry makes us ready again.
            let _irq = arch::disable_interrupts();
            if sleep_entry.is_some() {
                queues::sleep_queue_remove(&current);
            }
            current.set_state(ThreadState::Running);
        }

        /// Make `thread` ready, requesting preemption if it outranks the
        /// running thread.
        pub(crate) fn unpark(thread: &Arc<ThreadCb>) {
            let _irq = arch::disable_interrupts();
            thread.set_wake_token();
            match thread.state() {
                ThreadState::Waiting | ThreadState::Sleeping => {
                    thread.set_state(ThreadState::Ready);
                    queues::run_queue_enqueue(thread.clone());
                    if thread.priority() > thread::current_thread().priority() {
                        arch::trigger_reschedule();
                    }
                }
                _ => (),
            }
        }
    } else {
        /// Park the calling thread in `state` until unparked or past
        /// `deadline`. The host OS performs the actual dispatch; the kernel
        /// states and the sleep queue are maintained for introspection.
        pub(crate) fn park_current(deadline: Option<TimeValNanos>, state: ThreadState) {
            let current = thread::current_thread();
            let sleep_entry = deadline.filter(|d| !d.is_infinite());
            current.set_state(state);
            if let Some(resume_time) = sleep_entry {
                queues::sleep_queue_insert(&current, resume_time);
            }
            match sleep_entry {
                Some(resume_time) => {
                    current.parker().park_deadline(resume_time.nanos());
                }
                None => current.parker().park(),
            }
            if sleep_entry.is_some() {
                queues::sleep_queue_remove(&current);
            }
            current.set_state(ThreadState::Running);
        }

        pub(crate) fn unpark(thread: &Arc<ThreadCb>) {
            match thread.state() {
                ThreadState::Waiting | ThreadState::Sleeping => {
                    thread.set_state(ThreadState::Ready);
                }
                _ => (),
            }
            thread.parker().unpark();
        }
    }
}
