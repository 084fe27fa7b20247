// SPDX-License-Identifier: MPL-2.0

//! The condition variable.
//!
//! Bound to a clock at construction; deadline waits are interpreted on that
//! clock. `wait` atomically enqueues the caller and releases the mutex, so a
//! waker that publishes its state under the mutex and then calls `wake`
//! cannot be missed. Spurious wakeups are observable; callers recheck their
//! predicate.

use crate::object::{KernelObject, ObjectMeta, ObjectType, TypedObject};
use crate::prelude::*;
use crate::sched::wait::{WaitList, WaitMode, WaitNode, WaitableObject};
use crate::sync::Mutex;
use crate::thread::BlockingObject;
use crate::time::{self, deadline_after, ClockId, TimeValNanos};

pub struct ConditionVariable {
    meta: ObjectMeta,
    clock: ClockId,
    waiters: WaitList,
}

impl ConditionVariable {
    pub fn new(name: &str) -> ConditionVariable {
        Self::new_with_clock(name, ClockId::Monotonic)
    }

    pub fn new_with_clock(name: &str, clock: ClockId) -> ConditionVariable {
        ConditionVariable {
            meta: ObjectMeta::new(name, ObjectType::ConditionVariable),
            clock,
            waiters: WaitList::new(),
        }
    }

    pub fn name(&self) -> &str {
        self.meta.name()
    }

    pub fn clock(&self) -> ClockId {
        self.clock
    }

    fn wait_inner(&self, mutex: &Mutex, deadline: Option<TimeValNanos>) -> Result<()> {
        let node = WaitNode::new_for_current_thread();
        node.thread()
            .set_blocking_object(Some(BlockingObject::from_meta(&self.meta)));
        // Enqueue before releasing the mutex: a waker that takes the mutex
        // after our unlock already sees our node.
        self.waiters.append(&node);
        if let Err(err) = mutex.unlock() {
            self.waiters.cancel_wait(&node);
            node.thread().set_blocking_object(None);
            return Err(err);
        }
        let wait_result = node.wait(deadline, true);
        if wait_result.is_err() {
            self.waiters.cancel_wait(&node);
        }
        node.thread().set_blocking_object(None);
        // The mutex is reacquired before returning, even when the wait
        // itself failed.
        let lock_result = mutex.lock_uninterruptible();
        wait_result.and(lock_result)
    }

    /// Atomically release `mutex` and park until woken; reacquires `mutex`
    /// before returning.
    pub fn wait(&self, mutex: &Mutex) -> Result<()> {
        self.wait_inner(mutex, None)
    }

    pub fn wait_timeout(&self, mutex: &Mutex, timeout: TimeValNanos) -> Result<()> {
        let deadline = deadline_after(timeout);
        self.wait_inner(mutex, (!deadline.is_infinite()).then_some(deadline))
    }

    /// Deadline variant; `deadline` is interpreted on the condvar's bound
    /// clock.
    pub fn wait_deadline(&self, mutex: &Mutex, deadline: TimeValNanos) -> Result<()> {
        let deadline = time::monotonic_deadline(deadline, self.clock);
        self.wait_inner(mutex, (!deadline.is_infinite()).then_some(deadline))
    }

    fn irq_wait_inner(&self, deadline: Option<TimeValNanos>) -> Result<()> {
        let node = WaitNode::new_for_current_thread();
        self.waiters.append(&node);
        // IRQ-context waits are never interrupted by signals.
        let result = node.wait(deadline, false);
        if result.is_err() {
            self.waiters.cancel_wait(&node);
        }
        result
    }

    /// Park on the condvar without a mutex. For driver threads synchronizing
    /// with ISRs through `wake` alone.
    pub fn irq_wait(&self) -> Result<()> {
        self.irq_wait_inner(None)
    }

    pub fn irq_wait_timeout(&self, timeout: TimeValNanos) -> Result<()> {
        let deadline = deadline_after(timeout);
        self.irq_wait_inner((!deadline.is_infinite()).then_some(deadline))
    }

    pub fn irq_wait_deadline(&self, deadline: TimeValNanos) -> Result<()> {
        let deadline = time::monotonic_deadline(deadline, self.clock);
        self.irq_wait_inner((!deadline.is_infinite()).then_some(deadline))
    }

    /// Wake up to `count` waiters in FIFO order; `0` wakes all.
    pub fn wake(&self, count: usize) {
        self.waiters.wake_n(count);
    }

    pub fn wake_one(&self) {
        self.wake(1);
    }

    pub fn wake_all(&self) {
        self.wake(0);
    }
}

impl KernelObject for ConditionVariable {
    fn meta(&self) -> &ObjectMeta {
        &self.meta
    }

    fn as_any_arc(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
        self
    }
}

impl TypedObject for ConditionVariable {
    const TYPE: ObjectType = ObjectType::ConditionVariable;
}

impl WaitableObject for ConditionVariable {
    fn add_listener(&self, node: &Arc<WaitNode>, _mode: WaitMode) {
        self.waiters.append(node);
    }

    fn remove_listener(&self, node: &Arc<WaitNode>, _mode: WaitMode) {
        self.waiters.remove(node);
    }
}

impl Drop for ConditionVariable {
    fn drop(&mut self) {
        self.waiters.wake_all_target_deleted();
    }
}

impl Debug for ConditionVariable {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("ConditionVariable")
            .field("name", &self.name())
            .field("clock", &self.clock)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sync::RecursionMode;
    use crate::thread::{spawn_thread, wait_for_thread};
    use core::sync::atomic::{AtomicBool, Ordering};

    #[test]
    fn wait_without_holding_the_mutex_fails() {
        let m = Mutex::new("cv_m", RecursionMode::RaiseError);
        let cv = ConditionVariable::new("cv");
        let err = cv.wait(&m).unwrap_err();
        assert_eq!(err.code(), ErrorCode::NotOwner);
    }

    #[test]
    fn wake_is_not_missed_between_unlock_and_park() {
        // The waiter holds the mutex while deciding to wait; the waker sets
        // the predicate under the same mutex. Whenever the waker runs, the
        // waiter must observe the predicate after wait() returns.
        struct Shared {
            mutex: Mutex,
            cond: ConditionVariable,
            ready: AtomicBool,
        }
        let shared = Arc::new(Shared {
            mutex: Mutex::new("cv_atomic_m", RecursionMode::RaiseError),
            cond: ConditionVariable::new("cv_atomic"),
            ready: AtomicBool::new(false),
        });

        let waiter_shared = shared.clone();
        let waiter = spawn_thread("cv_waiter", 0, move || {
            let s = &*waiter_shared;
            s.mutex.lock().unwrap();
            while !s.ready.load(Ordering::Acquire) {
                s.cond.wait(&s.mutex).unwrap();
            }
            assert!(s.ready.load(Ordering::Acquire));
            s.mutex.unlock().unwrap();
        })
        .unwrap();

        crate::sched::snooze(TimeValNanos::from_millis(30));
        shared.mutex.lock().unwrap();
        shared.ready.store(true, Ordering::Release);
        shared.cond.wake(1);
        shared.mutex.unlock().unwrap();

        wait_for_thread(waiter).unwrap();
    }

    #[test]
    fn wait_timeout_reacquires_the_mutex() {
        let m = Mutex::new("cv_to_m", RecursionMode::RaiseError);
        let cv = ConditionVariable::new("cv_to");
        m.lock().unwrap();
        let err = cv.wait_timeout(&m, TimeValNanos::from_millis(30)).unwrap_err();
        assert_eq!(err.code(), ErrorCode::TimedOut);
        // Still the holder afterwards.
        let err = m.lock().unwrap_err();
        assert_eq!(err.code(), ErrorCode::DeadlockWouldOccur);
        m.unlock().unwrap();
    }

    #[test]
    fn wake_n_releases_that_many_waiters() {
        let shared = Arc::new((
            Mutex::new("cv_n_m", RecursionMode::RaiseError),
            ConditionVariable::new("cv_n"),
        ));
        let mut workers = Vec::new();
        for i in 0..3 {
            let s = shared.clone();
            workers.push(
                spawn_thread("cv_sleeper", 0, move || {
                    let (m, cv) = &*s;
                    m.lock().unwrap();
                    // Tolerate spurious wakes: each waiter waits once and
                    // leaves; the test only counts completions.
                    let _ = cv.wait_timeout(m, TimeValNanos::from_millis(i as i64 * 10 + 500));
                    m.unlock().unwrap();
                })
                .unwrap(),
            );
        }
        crate::sched::snooze(TimeValNanos::from_millis(50));
        shared.1.wake_all();
        for w in workers {
            wait_for_thread(w).unwrap();
        }
    }
}
