// SPDX-License-Identifier: MPL-2.0

//! The counting semaphore.

use crate::object::{KernelObject, ObjectMeta, ObjectType, TypedObject};
use crate::prelude::*;
use crate::sched::wait::{WaitList, WaitMode, WaitNode, WaitableObject};
use crate::thread::BlockingObject;
use crate::time::{deadline_after, TimeValNanos};

#[derive(Debug)]
struct SemState {
    count: usize,
    max: usize,
}

/// A non-negative count with an upper bound. `acquire` blocks while the
/// count is zero; `release` wakes waiters and fails with `Overflow` beyond
/// the maximum.
pub struct Semaphore {
    meta: ObjectMeta,
    state: SpinLock<SemState>,
    waiters: WaitList,
    listeners: WaitList,
}

impl Semaphore {
    pub fn new(name: &str, initial_count: usize, max_count: usize) -> Semaphore {
        debug_assert!(initial_count <= max_count);
        Semaphore {
            meta: ObjectMeta::new(name, ObjectType::Semaphore),
            state: SpinLock::new(SemState {
                count: initial_count,
                max: max_count,
            }),
            waiters: WaitList::new(),
            listeners: WaitList::new(),
        }
    }

    pub fn name(&self) -> &str {
        self.meta.name()
    }

    pub fn count(&self) -> usize {
        self.state.lock_irq_disabled().count
    }

    /// Take one unit if the count allows it.
    pub fn try_acquire(&self) -> bool {
        let mut state = self.state.lock_irq_disabled();
        if state.count > 0 {
            state.count -= 1;
            true
        } else {
            false
        }
    }

    fn acquire_inner(&self, deadline: TimeValNanos) -> Result<()> {
        if self.try_acquire() {
            return Ok(());
        }
        let deadline = (!deadline.is_infinite()).then_some(deadline);
        let node = WaitNode::new_for_current_thread();
        node.thread()
            .set_blocking_object(Some(BlockingObject::from_meta(&self.meta)));
        let result = loop {
            self.waiters.append(&node);
            if self.try_acquire() {
                self.waiters.cancel_wait(&node);
                break Ok(());
            }
            if let Err(err) = node.wait(deadline, true) {
                self.waiters.cancel_wait(&node);
                break Err(err);
            }
        };
        node.thread().set_blocking_object(None);
        result
    }

    /// Take one unit, blocking while the count is zero.
    pub fn acquire(&self) -> Result<()> {
        self.acquire_inner(TimeValNanos::INFINITE)
    }

    pub fn acquire_timeout(&self, timeout: TimeValNanos) -> Result<()> {
        self.acquire_inner(deadline_after(timeout))
    }

    pub fn acquire_deadline(&self, deadline: TimeValNanos) -> Result<()> {
        self.acquire_inner(deadline)
    }

    /// Put back `count` units and wake up to that many waiters.
    pub fn release(&self, count: usize) -> Result<()> {
        if count == 0 {
            return Ok(());
        }
        {
            let mut state = self.state.lock_irq_disabled();
            if state.count + count > state.max {
                return Err(Error::new(ErrorCode::Overflow));
            }
            state.count += count;
        }
        self.waiters.wake_n(count);
        self.listeners.wake_all();
        Ok(())
    }
}

impl KernelObject for Semaphore {
    fn meta(&self) -> &ObjectMeta {
        &self.meta
    }

    fn as_any_arc(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
        self
    }
}

impl TypedObject for Semaphore {
    const TYPE: ObjectType = ObjectType::Semaphore;
}

impl WaitableObject for Semaphore {
    fn add_listener(&self, node: &Arc<WaitNode>, _mode: WaitMode) {
        self.listeners.append(node);
    }

    fn remove_listener(&self, node: &Arc<WaitNode>, _mode: WaitMode) {
        self.listeners.remove(node);
    }
}

impl Drop for Semaphore {
    fn drop(&mut self) {
        self.waiters.wake_all_target_deleted();
        self.listeners.wake_all_target_deleted();
    }
}

impl Debug for Semaphore {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Semaphore")
            .field("name", &self.name())
            .field("count", &self.count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::thread::{spawn_thread, wait_for_thread};

    #[test]
    fn counts_and_bounds() {
        let s = Semaphore::new("bounded", 1, 2);
        assert!(s.try_acquire());
        assert!(!s.try_acquire());
        s.release(2).unwrap();
        assert_eq!(s.count(), 2);
        let err = s.release(1).unwrap_err();
        assert_eq!(err.code(), ErrorCode::Overflow);
        assert_eq!(s.count(), 2);
    }

    #[test]
    fn acquire_timeout_expires_when_empty() {
        let s = Semaphore::new("empty", 0, 1);
        let err = s
            .acquire_timeout(TimeValNanos::from_millis(30))
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::TimedOut);
    }

    #[test]
    fn signals_interrupt_a_blocked_acquire() {
        use crate::thread::current_thread;
        use core::sync::atomic::{AtomicI32, Ordering};

        let s = Arc::new(Semaphore::new("interruptible", 0, 1));
        let outcome = Arc::new(AtomicI32::new(0));

        let s2 = s.clone();
        let outcome2 = outcome.clone();
        let waiter = spawn_thread("sem_interruptee", 0, move || {
            current_thread().set_restart_syscalls(false);
            match s2.acquire() {
                Err(err) if err.code() == ErrorCode::Interrupted => {
                    outcome2.store(1, Ordering::Release)
                }
                _ => outcome2.store(-1, Ordering::Release),
            }
        })
        .unwrap();

        crate::sched::snooze(TimeValNanos::from_millis(40));
        crate::thread::send_thread_signal(waiter, 10).unwrap();
        wait_for_thread(waiter).unwrap();
        assert_eq!(outcome.load(Ordering::Acquire), 1);
        // Nothing was consumed.
        s.release(1).unwrap();
        assert_eq!(s.count(), 1);
    }

    #[test]
    fn release_wakes_a_blocked_acquirer() {
        let s = Arc::new(Semaphore::new("handoff", 0, 1));
        let s2 = s.clone();
        let consumer = spawn_thread("sem_consumer", 0, move || {
            s2.acquire().unwrap();
        })
        .unwrap();

        crate::sched::snooze(TimeValNanos::from_millis(30));
        s.release(1).unwrap();
        wait_for_thread(consumer).unwrap();
        assert_eq!(s.count(), 0);
    }
}
