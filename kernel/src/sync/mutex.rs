// SPDX-License-Identifier: MPL-2.0

//! The kernel mutex.
//!
//! Plain holder/depth semantics with three recursion modes, plus shared
//! (reader) locking with writer preference. No priority inheritance:
//! deadlocks from priority inversion are possible and must be handled by
//! lock ordering at higher layers.

use crate::object::{KernelObject, ObjectMeta, ObjectType, TypedObject};
use crate::prelude::*;
use crate::sched::wait::{WaitList, WaitMode, WaitNode, WaitableObject};
use crate::thread::{self, BlockingObject, ThreadId};
use crate::time::{deadline_after, TimeValNanos};

/// What a second `lock` by the holding thread does.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecursionMode {
    /// Bump the depth and succeed.
    Recurse,
    /// Fail with `DeadlockWouldOccur`.
    RaiseError,
    /// Abort the kernel with a diagnostic.
    Panic,
}

const NO_HOLDER: ThreadId = -1;

#[derive(Debug)]
struct MutexState {
    holder: ThreadId,
    depth: u32,
    readers: u32,
}

pub struct Mutex {
    meta: ObjectMeta,
    mode: RecursionMode,
    state: SpinLock<MutexState>,
    writer_waiters: WaitList,
    reader_waiters: WaitList,
    listeners: WaitList,
}

enum Grab {
    Acquired,
    Contended,
}

impl Mutex {
    pub fn new(name: &str, mode: RecursionMode) -> Mutex {
        Mutex {
            meta: ObjectMeta::new(name, ObjectType::Mutex),
            mode,
            state: SpinLock::new(MutexState {
                holder: NO_HOLDER,
                depth: 0,
                readers: 0,
            }),
            writer_waiters: WaitList::new(),
            reader_waiters: WaitList::new(),
            listeners: WaitList::new(),
        }
    }

    pub fn name(&self) -> &str {
        self.meta.name()
    }

    pub fn recursion_mode(&self) -> RecursionMode {
        self.mode
    }

    fn try_grab(&self, me: ThreadId) -> Result<Grab> {
        let mut state = self.state.lock_irq_disabled();
        if state.holder == me {
            return match self.mode {
                RecursionMode::Recurse => {
                    state.depth += 1;
                    Ok(Grab::Acquired)
                }
                RecursionMode::RaiseError => Err(Error::new(ErrorCode::DeadlockWouldOccur)),
                RecursionMode::Panic => {
                    panic!("mutex '{}': recursive lock by holder", self.name())
                }
            };
        }
        if state.holder == NO_HOLDER && state.readers == 0 {
            state.holder = me;
            state.depth = 1;
            Ok(Grab::Acquired)
        } else {
            Ok(Grab::Contended)
        }
    }

    fn lock_inner(&self, deadline: TimeValNanos, interruptible: bool) -> Result<()> {
        let me = thread::current_thread_id();
        if let Grab::Acquired = self.try_grab(me)? {
            return Ok(());
        }
        let deadline = (!deadline.is_infinite()).then_some(deadline);
        let node = WaitNode::new_for_current_thread();
        node.thread()
            .set_blocking_object(Some(BlockingObject::from_meta(&self.meta)));
        let result = loop {
            self.writer_waiters.append(&node);
            match self.try_grab(me) {
                Ok(Grab::Acquired) => {
                    self.writer_waiters.cancel_wait(&node);
                    break Ok(());
                }
                Ok(Grab::Contended) => (),
                Err(err) => {
                    self.writer_waiters.cancel_wait(&node);
                    break Err(err);
                }
            }
            if let Err(err) = node.wait(deadline, interruptible) {
                self.writer_waiters.cancel_wait(&node);
                break Err(err);
            }
        };
        node.thread().set_blocking_object(None);
        result
    }

    /// Acquire the mutex, blocking while another thread holds it.
    pub fn lock(&self) -> Result<()> {
        self.lock_inner(TimeValNanos::INFINITE, true)
    }

    pub fn lock_timeout(&self, timeout: TimeValNanos) -> Result<()> {
        self.lock_inner(deadline_after(timeout), true)
    }

    pub fn lock_deadline(&self, deadline: TimeValNanos) -> Result<()> {
        self.lock_inner(deadline, true)
    }

    /// Acquire without the possibility of being interrupted by signals.
    /// Reacquire paths that must not fail use this.
    pub(crate) fn lock_uninterruptible(&self) -> Result<()> {
        self.lock_inner(TimeValNanos::INFINITE, false)
    }

    /// Acquire the mutex if that is possible right now.
    pub fn try_lock(&self) -> bool {
        matches!(
            self.try_grab(thread::current_thread_id()),
            Ok(Grab::Acquired)
        )
    }

    /// Release the mutex. Fails with `NotOwner` when the calling thread does
    /// not hold it.
    pub fn unlock(&self) -> Result<()> {
        {
            let mut state = self.state.lock_irq_disabled();
            if state.holder != thread::current_thread_id() {
                return Err(Error::new(ErrorCode::NotOwner));
            }
            state.depth -= 1;
            if state.depth > 0 {
                return Ok(());
            }
            state.holder = NO_HOLDER;
        }
        if !self.writer_waiters.wake_one() {
            self.reader_waiters.wake_all();
        }
        self.listeners.wake_all();
        Ok(())
    }

    fn try_grab_shared(&self, me: ThreadId) -> Result<Grab> {
        let mut state = self.state.lock_irq_disabled();
        if state.holder == me {
            return Err(Error::with_message(
                ErrorCode::DeadlockWouldOccur,
                "shared lock while holding exclusively",
            ));
        }
        // Writer preference: new readers queue up while a writer waits.
        if state.holder == NO_HOLDER && self.writer_waiters.is_empty() {
            state.readers += 1;
            Ok(Grab::Acquired)
        } else {
            Ok(Grab::Contended)
        }
    }

    fn lock_shared_inner(&self, deadline: TimeValNanos) -> Result<()> {
        let me = thread::current_thread_id();
        if let Grab::Acquired = self.try_grab_shared(me)? {
            return Ok(());
        }
        let deadline = (!deadline.is_infinite()).then_some(deadline);
        let node = WaitNode::new_for_current_thread();
        loop {
            self.reader_waiters.append(&node);
            match self.try_grab_shared(me) {
                Ok(Grab::Acquired) => {
                    self.reader_waiters.cancel_wait(&node);
                    return Ok(());
                }
                Ok(Grab::Contended) => (),
                Err(err) => {
                    self.reader_waiters.cancel_wait(&node);
                    return Err(err);
                }
            }
            if let Err(err) = node.wait(deadline, true) {
                self.reader_waiters.cancel_wait(&node);
                return Err(err);
            }
        }
    }

    /// Take a shared (reader) lock: any number of readers, no writer.
    pub fn lock_shared(&self) -> Result<()> {
        self.lock_shared_inner(TimeValNanos::INFINITE)
    }

    pub fn lock_shared_timeout(&self, timeout: TimeValNanos) -> Result<()> {
        self.lock_shared_inner(deadline_after(timeout))
    }

    pub fn lock_shared_deadline(&self, deadline: TimeValNanos) -> Result<()> {
        self.lock_shared_inner(deadline)
    }

    pub fn try_lock_shared(&self) -> bool {
        matches!(
            self.try_grab_shared(thread::current_thread_id()),
            Ok(Grab::Acquired)
        )
    }

    pub fn unlock_shared(&self) -> Result<()> {
        {
            let mut state = self.state.lock_irq_disabled();
            if state.readers == 0 {
                return Err(Error::new(ErrorCode::NotOwner));
            }
            state.readers -= 1;
            if state.readers > 0 {
                return Ok(());
            }
        }
        // Writers drain before any queued reader gets another turn.
        if !self.writer_waiters.wake_one() {
            self.reader_waiters.wake_all();
        }
        Ok(())
    }

    pub fn is_locked(&self) -> bool {
        let state = self.state.lock_irq_disabled();
        state.holder != NO_HOLDER || state.readers > 0
    }

    /// The holding thread, if any. Exposed for diagnostics.
    pub fn holder(&self) -> Option<ThreadId> {
        let state = self.state.lock_irq_disabled();
        (state.holder != NO_HOLDER).then_some(state.holder)
    }

    pub(crate) fn depth(&self) -> u32 {
        self.state.lock_irq_disabled().depth
    }

    /// Acquire and return a guard that unlocks on drop.
    pub fn guard(&self) -> Result<MutexGuard<'_>> {
        self.lock()?;
        Ok(MutexGuard { mutex: self })
    }
}

impl KernelObject for Mutex {
    fn meta(&self) -> &ObjectMeta {
        &self.meta
    }

    fn as_any_arc(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
        self
    }
}

impl TypedObject for Mutex {
    const TYPE: ObjectType = ObjectType::Mutex;
}

impl WaitableObject for Mutex {
    fn add_listener(&self, node: &Arc<WaitNode>, _mode: WaitMode) {
        self.listeners.append(node);
    }

    fn remove_listener(&self, node: &Arc<WaitNode>, _mode: WaitMode) {
        self.listeners.remove(node);
    }
}

impl Drop for Mutex {
    fn drop(&mut self) {
        self.writer_waiters.wake_all_target_deleted();
        self.reader_waiters.wake_all_target_deleted();
        self.listeners.wake_all_target_deleted();
    }
}

impl Debug for Mutex {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Mutex")
            .field("name", &self.name())
            .field("holder", &self.holder())
            .finish()
    }
}

/// RAII lock scope over a [`Mutex`].
#[must_use]
pub struct MutexGuard<'a> {
    mutex: &'a Mutex,
}

impl Drop for MutexGuard<'_> {
    fn drop(&mut self) {
        if let Err(err) = self.mutex.unlock() {
            error!("mutex '{}': guard unlock failed: {}", self.mutex.name(), err);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::thread::{spawn_thread, wait_for_thread};
    use core::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn raise_error_mode_reports_deadlock() {
        let m = Mutex::new("ownership_test", RecursionMode::RaiseError);
        m.lock().unwrap();
        let err = m.lock().unwrap_err();
        assert_eq!(err.code(), ErrorCode::DeadlockWouldOccur);
        assert_eq!(m.depth(), 1);
        m.unlock().unwrap();
        let err = m.unlock().unwrap_err();
        assert_eq!(err.code(), ErrorCode::NotOwner);
    }

    #[test]
    fn recurse_mode_tracks_depth() {
        let m = Mutex::new("recursive", RecursionMode::Recurse);
        m.lock().unwrap();
        m.lock().unwrap();
        assert_eq!(m.depth(), 2);
        m.unlock().unwrap();
        assert!(m.is_locked());
        m.unlock().unwrap();
        assert!(!m.is_locked());
    }

    #[test]
    fn contended_lock_waits_for_the_holder() {
        let m = Arc::new(Mutex::new("contended", RecursionMode::RaiseError));
        m.lock().unwrap();

        let m2 = m.clone();
        let worker = spawn_thread("mutex_contender", 0, move || {
            m2.lock().unwrap();
            m2.unlock().unwrap();
        })
        .unwrap();

        // Give the contender time to park, then release.
        crate::sched::snooze(TimeValNanos::from_millis(50));
        m.unlock().unwrap();
        wait_for_thread(worker).unwrap();
    }

    #[test]
    fn lock_timeout_expires() {
        let m = Arc::new(Mutex::new("timeout", RecursionMode::RaiseError));
        let m2 = m.clone();
        let holder = spawn_thread("mutex_holder", 0, move || {
            m2.lock().unwrap();
            crate::sched::snooze(TimeValNanos::from_millis(150));
            m2.unlock().unwrap();
        })
        .unwrap();

        crate::sched::snooze(TimeValNanos::from_millis(30));
        let err = m.lock_timeout(TimeValNanos::from_millis(30)).unwrap_err();
        assert_eq!(err.code(), ErrorCode::TimedOut);
        wait_for_thread(holder).unwrap();
    }

    #[test]
    fn try_lock_respects_the_holder() {
        let m = Mutex::new("try", RecursionMode::RaiseError);
        assert!(m.try_lock());
        assert!(!m.try_lock());
        m.unlock().unwrap();
    }

    #[test]
    fn shared_locks_admit_many_readers() {
        let m = Mutex::new("shared", RecursionMode::RaiseError);
        m.lock_shared().unwrap();
        m.lock_shared().unwrap();
        assert!(m.is_locked());
        assert!(!m.try_lock());
        m.unlock_shared().unwrap();
        m.unlock_shared().unwrap();
        assert!(m.try_lock());
        m.unlock().unwrap();
    }

    #[test]
    fn writers_wait_until_readers_drain() {
        let m = Arc::new(Mutex::new("rw", RecursionMode::RaiseError));
        let hits = Arc::new(AtomicU32::new(0));
        m.lock_shared().unwrap();

        let m2 = m.clone();
        let hits2 = hits.clone();
        let writer = spawn_thread("rw_writer", 0, move || {
            m2.lock().unwrap();
            hits2.fetch_add(1, Ordering::AcqRel);
            m2.unlock().unwrap();
        })
        .unwrap();

        crate::sched::snooze(TimeValNanos::from_millis(50));
        assert_eq!(hits.load(Ordering::Acquire), 0);
        m.unlock_shared().unwrap();
        wait_for_thread(writer).unwrap();
        assert_eq!(hits.load(Ordering::Acquire), 1);
    }

    #[test]
    fn guard_unlocks_on_drop() {
        let m = Mutex::new("guarded", RecursionMode::RaiseError);
        {
            let _guard = m.guard().unwrap();
            assert!(m.is_locked());
        }
        assert!(!m.is_locked());
    }
}
