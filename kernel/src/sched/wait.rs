// SPDX-License-Identifier: MPL-2.0

//! Wait nodes and wait lists.
//!
//! A waitable object keeps one [`WaitList`] per wait mode. A blocking thread
//! allocates a [`WaitNode`], appends it to the object's list, re-checks the
//! condition it is waiting for, and parks. Wakers pop nodes in FIFO order
//! and deliver a single wake token; the token handshake means an unpark that
//! races ahead of the park is never lost, and a node woken after its owner
//! gave up can pass the wake on.

use core::sync::atomic::{AtomicBool, AtomicU8, Ordering};

use crate::prelude::*;
use crate::sched::park;
use crate::thread::{self, ThreadCb, ThreadState};
use crate::time;

/// The mode a thread blocks on a waitable object in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitMode {
    Read,
    Write,
    ReadWrite,
}

const REASON_WAKE: u8 = 0;
const REASON_TARGET_DELETED: u8 = 1;

/// One thread's membership on one waitable's list.
pub struct WaitNode {
    thread: Arc<ThreadCb>,
    fired: AtomicBool,
    reason: AtomicU8,
}

impl WaitNode {
    pub fn new_for_current_thread() -> Arc<WaitNode> {
        Arc::new(WaitNode {
            thread: thread::current_thread(),
            fired: AtomicBool::new(false),
            reason: AtomicU8::new(REASON_WAKE),
        })
    }

    pub fn thread(&self) -> &Arc<ThreadCb> {
        &self.thread
    }

    /// Deliver a wake token. Returns `false` if the node had already been
    /// woken and the token was not consumed yet.
    pub fn wake(&self) -> bool {
        self.reason.store(REASON_WAKE, Ordering::Release);
        if self.fired.swap(true, Ordering::AcqRel) {
            return false;
        }
        park::unpark(&self.thread);
        true
    }

    /// Deliver a wake token flagged "the object this node was parked on has
    /// been destroyed".
    pub fn wake_target_deleted(&self) {
        self.reason.store(REASON_TARGET_DELETED, Ordering::Release);
        if !self.fired.swap(true, Ordering::AcqRel) {
            park::unpark(&self.thread);
        }
    }

    /// Whether an unconsumed wake token is pending.
    pub fn has_fired(&self) -> bool {
        self.fired.load(Ordering::Acquire)
    }

    /// Whether the last wake came from the target being destroyed.
    pub fn is_target_deleted(&self) -> bool {
        self.reason.load(Ordering::Acquire) == REASON_TARGET_DELETED
    }

    /// Consume a pending wake token, if any.
    pub fn take_fired(&self) -> bool {
        self.fired.swap(false, Ordering::AcqRel)
    }

    /// Park the owning thread until this node is woken, the deadline passes
    /// or (for interruptible waits) a signal becomes pending.
    ///
    /// Must be called by the thread the node was created on, after the node
    /// has been appended to the lists it waits on.
    pub fn wait(&self, deadline: Option<TimeValNanos>, interruptible: bool) -> Result<()> {
        debug_assert!(Arc::ptr_eq(&self.thread, &thread::current_thread()));
        loop {
            if self.fired.swap(false, Ordering::AcqRel) {
                if self.reason.load(Ordering::Acquire) == REASON_TARGET_DELETED {
                    return Err(Error::with_message(
                        ErrorCode::BadState,
                        "wait target deleted",
                    ));
                }
                return Ok(());
            }
            if interruptible {
                if let Some(err) = self.thread.check_pending_signal() {
                    return Err(err);
                }
            }
            let state = match deadline {
                Some(d) if !d.is_infinite() => {
                    if time::get_monotonic_time() >= d {
                        return Err(Error::new(ErrorCode::TimedOut));
                    }
                    ThreadState::Sleeping
                }
                _ => ThreadState::Waiting,
            };
            park::park_current(deadline, state);
        }
    }
}

impl Debug for WaitNode {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("WaitNode")
            .field("thread", &self.thread.id())
            .field("fired", &self.has_fired())
            .finish()
    }
}

/// A FIFO list of parked wait nodes belonging to one waitable object.
pub struct WaitList {
    waiters: SpinLock<VecDeque<Arc<WaitNode>>>,
}

impl WaitList {
    pub const fn new() -> Self {
        WaitList {
            waiters: SpinLock::new(VecDeque::new()),
        }
    }

    pub fn append(&self, node: &Arc<WaitNode>) {
        self.waiters.lock_irq_disabled().push_back(node.clone());
    }

    /// Unlink `node`. Idempotent: removing a node that is not on the list is
    /// a no-op.
    pub fn remove(&self, node: &Arc<WaitNode>) {
        self.waiters
            .lock_irq_disabled()
            .retain(|waiter| !Arc::ptr_eq(waiter, node));
    }

    /// Unlink `node` after a failed wait. If a wake raced in anyway, the
    /// token is passed on to the next waiter so it is not lost.
    pub fn cancel_wait(&self, node: &Arc<WaitNode>) {
        self.remove(node);
        if node.take_fired() {
            self.wake_one();
        }
    }

    /// Wake the first waiter that accepts the token.
    ///
    /// The token is delivered while the list lock is held: a waiter
    /// cancelling its wait synchronizes on the same lock, so it either
    /// unlinks the node before any waker sees it or observes the delivered
    /// token and passes it on. Without this ordering an unlock's wake could
    /// vanish into a node whose owner just timed out.
    pub fn wake_one(&self) -> bool {
        let mut waiters = self.waiters.lock_irq_disabled();
        while let Some(node) = waiters.pop_front() {
            if node.wake() {
                return true;
            }
        }
        false
    }

    /// Wake up to `count` waiters; `0` wakes all. Returns the number woken.
    pub fn wake_n(&self, count: usize) -> usize {
        let mut waiters = self.waiters.lock_irq_disabled();
        let mut woken = 0;
        while count == 0 || woken < count {
            match waiters.pop_front() {
                Some(node) => {
                    if node.wake() {
                        woken += 1;
                    }
                }
                None => break,
            }
        }
        woken
    }

    pub fn wake_all(&self) -> usize {
        self.wake_n(0)
    }

    /// Wake every waiter with the target-deleted flag set. Used by object
    /// destructors that find threads still parked on them.
    pub fn wake_all_target_deleted(&self) {
        let mut waiters = self.waiters.lock_irq_disabled();
        while let Some(node) = waiters.pop_front() {
            node.wake_target_deleted();
        }
    }

    pub fn is_empty(&self) -> bool {
        self.waiters.lock_irq_disabled().is_empty()
    }

    pub fn len(&self) -> usize {
        self.waiters.lock_irq_disabled().len()
    }
}

impl Default for WaitList {
    fn default() -> Self {
        Self::new()
    }
}

impl Debug for WaitList {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("WaitList").field("len", &self.len()).finish()
    }
}

/// Implemented by objects a wait group can multiplex over.
///
/// Listener nodes are observers: they are notified alongside the object's
/// own waiters but never consume the wakes meant for them.
pub trait WaitableObject: Send + Sync {
    fn add_listener(&self, node: &Arc<WaitNode>, mode: WaitMode);
    fn remove_listener(&self, node: &Arc<WaitNode>, mode: WaitMode);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wake_one_is_fifo() {
        let list = WaitList::new();
        let a = WaitNode::new_for_current_thread();
        let b = WaitNode::new_for_current_thread();
        list.append(&a);
        list.append(&b);
        assert_eq!(list.len(), 2);

        assert!(list.wake_one());
        assert!(a.has_fired());
        assert!(!b.has_fired());
        assert!(list.wake_one());
        assert!(b.has_fired());
        assert!(!list.wake_one());
    }

    #[test]
    fn remove_is_idempotent() {
        let list = WaitList::new();
        let node = WaitNode::new_for_current_thread();
        list.append(&node);
        list.remove(&node);
        list.remove(&node);
        assert!(list.is_empty());
        assert!(!list.wake_one());
    }

    #[test]
    fn cancel_wait_passes_the_token_on() {
        let list = WaitList::new();
        let loser = WaitNode::new_for_current_thread();
        let next = WaitNode::new_for_current_thread();
        list.append(&loser);
        list.append(&next);

        // A waker popped and fired `loser`, but its owner timed out first.
        assert!(list.wake_one());
        assert!(loser.has_fired());
        list.cancel_wait(&loser);
        assert!(next.has_fired());
    }

    #[test]
    fn target_deleted_wake_reports_bad_state() {
        let list = WaitList::new();
        let node = WaitNode::new_for_current_thread();
        list.append(&node);
        list.wake_all_target_deleted();
        let err = node.wait(None, false).unwrap_err();
        assert_eq!(err.code(), ErrorCode::BadState);
    }
}
