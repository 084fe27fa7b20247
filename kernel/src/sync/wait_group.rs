// SPDX-License-Identifier: MPL-2.0

//! The object wait group.
//!
//! Aggregates heterogeneous waitables and parks the caller on all of them at
//! once. Any member firing wakes the whole group; which members fired is
//! reported through an optional ready-bitmask buffer, one bit per member in
//! membership order.
//!
//! The member list may be modified while a thread is waiting: modifications
//! bump a pending counter and prod the waiter, which detaches, rebuilds its
//! listener set from the new membership and parks again.

use crate::object::{self, KernelObject, ObjectMeta, ObjectType, TypedObject};
use crate::prelude::*;
use crate::sched::park;
use crate::sched::wait::{WaitList, WaitMode, WaitNode, WaitableObject};
use crate::sync::{ConditionVariable, Mutex, Semaphore};
use crate::thread::{self, BlockingObject, ThreadCb, ThreadState};
use crate::time::{self, TimeValNanos};

pub struct ObjectWaitGroup {
    meta: ObjectMeta,
    inner: SpinLock<GroupInner>,
    /// Prodded whenever the member list changes under a waiter.
    mod_wakeup: WaitList,
}

struct GroupInner {
    members: Vec<(Arc<dyn WaitableObject>, WaitMode)>,
    mods_pending: u32,
}

impl ObjectWaitGroup {
    pub fn new(name: &str) -> ObjectWaitGroup {
        ObjectWaitGroup {
            meta: ObjectMeta::new(name, ObjectType::ObjectWaitGroup),
            inner: SpinLock::new(GroupInner {
                members: Vec::new(),
                mods_pending: 0,
            }),
            mod_wakeup: WaitList::new(),
        }
    }

    pub fn name(&self) -> &str {
        self.meta.name()
    }

    pub fn len(&self) -> usize {
        self.inner.lock_irq_disabled().members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn note_modification(&self) {
        self.mod_wakeup.wake_all();
    }

    pub fn add_object(&self, object: Arc<dyn WaitableObject>, mode: WaitMode) {
        {
            let mut inner = self.inner.lock_irq_disabled();
            inner.members.push((object, mode));
            inner.mods_pending += 1;
        }
        self.note_modification();
    }

    /// Remove one membership of `object` in `mode`. Fails with `NotFound` if
    /// it is not a member.
    pub fn remove_object(&self, object: &Arc<dyn WaitableObject>, mode: WaitMode) -> Result<()> {
        {
            let mut inner = self.inner.lock_irq_disabled();
            let pos = inner
                .members
                .iter()
                .position(|(member, member_mode)| {
                    Arc::ptr_eq(member, object) && *member_mode == mode
                })
                .ok_or(Error::new(ErrorCode::NotFound))?;
            inner.members.remove(pos);
            inner.mods_pending += 1;
        }
        self.note_modification();
        Ok(())
    }

    /// Replace the membership with `objects`, all in `mode`.
    pub fn set_objects(&self, objects: Vec<Arc<dyn WaitableObject>>, mode: WaitMode) {
        {
            let mut inner = self.inner.lock_irq_disabled();
            inner.members = objects.into_iter().map(|o| (o, mode)).collect();
            inner.mods_pending += 1;
        }
        self.note_modification();
    }

    pub fn append_objects(&self, objects: Vec<Arc<dyn WaitableObject>>, mode: WaitMode) {
        {
            let mut inner = self.inner.lock_irq_disabled();
            inner
                .members
                .extend(objects.into_iter().map(|o| (o, mode)));
            inner.mods_pending += 1;
        }
        self.note_modification();
    }

    pub fn clear(&self) {
        {
            let mut inner = self.inner.lock_irq_disabled();
            inner.members.clear();
            inner.mods_pending += 1;
        }
        self.note_modification();
    }

    /// Park the caller on every member at once.
    ///
    /// `lock`, if given, is released while waiting and reacquired before
    /// returning. `ready_flags`, if given, is cleared and receives one bit
    /// per member (membership order) for the members that fired; surplus
    /// buffer bits stay zero. Returns `TimedOut` when the deadline passes
    /// with no member firing.
    pub fn wait(
        &self,
        deadline: Option<TimeValNanos>,
        lock: Option<&Mutex>,
        mut ready_flags: Option<&mut [u8]>,
    ) -> Result<()> {
        let deadline = deadline.filter(|d| !d.is_infinite());
        let current = thread::current_thread();
        current.set_blocking_object(Some(BlockingObject::from_meta(&self.meta)));

        if let Some(buffer) = ready_flags.as_deref_mut() {
            buffer.fill(0);
        }

        let result = self.wait_on_members(deadline, lock, &current, &mut ready_flags);

        current.set_blocking_object(None);
        let relock = match (lock, &result) {
            // The unlock itself failed; nothing to reacquire.
            (_, Err(err)) if err.code() == ErrorCode::NotOwner => Ok(()),
            (Some(lock), _) => lock.lock_uninterruptible(),
            (None, _) => Ok(()),
        };
        result.and(relock)
    }

    fn wait_on_members(
        &self,
        deadline: Option<TimeValNanos>,
        lock: Option<&Mutex>,
        current: &Arc<ThreadCb>,
        ready_flags: &mut Option<&mut [u8]>,
    ) -> Result<()> {
        let mut external_lock = lock;
        'rebuild: loop {
            let (snapshot, generation) = {
                let inner = self.inner.lock_irq_disabled();
                (inner.members.clone(), inner.mods_pending)
            };

            let nodes: Vec<Arc<WaitNode>> = snapshot
                .iter()
                .map(|_| WaitNode::new_for_current_thread())
                .collect();
            for ((member, mode), node) in snapshot.iter().zip(&nodes) {
                member.add_listener(node, *mode);
            }
            let mod_node = WaitNode::new_for_current_thread();
            self.mod_wakeup.append(&mod_node);

            // The external lock is released only now, with the listener set
            // in place: an event published under that lock cannot slip by
            // between the release and the park.
            if let Some(lock) = external_lock.take() {
                if let Err(err) = lock.unlock() {
                    for ((member, mode), node) in snapshot.iter().zip(&nodes) {
                        member.remove_listener(node, *mode);
                    }
                    self.mod_wakeup.remove(&mod_node);
                    return Err(err);
                }
            }

            let detach = |nodes: &[Arc<WaitNode>]| {
                for ((member, mode), node) in snapshot.iter().zip(nodes) {
                    member.remove_listener(node, *mode);
                }
                self.mod_wakeup.remove(&mod_node);
            };

            loop {
                if nodes.iter().any(|n| n.has_fired()) {
                    let mut any_ready = false;
                    let mut target_deleted = false;
                    for (index, node) in nodes.iter().enumerate() {
                        if !node.has_fired() {
                            continue;
                        }
                        if node.is_target_deleted() {
                            target_deleted = true;
                        } else {
                            any_ready = true;
                        }
                        if let Some(buffer) = ready_flags.as_deref_mut() {
                            let byte = index / 8;
                            if byte < buffer.len() {
                                buffer[byte] |= 1 << (index % 8);
                            }
                        }
                    }
                    detach(&nodes);
                    return if any_ready || !target_deleted {
                        Ok(())
                    } else {
                        Err(Error::with_message(
                            ErrorCode::BadState,
                            "wait group member deleted",
                        ))
                    };
                }

                if mod_node.take_fired()
                    || self.inner.lock_irq_disabled().mods_pending != generation
                {
                    detach(&nodes);
                    continue 'rebuild;
                }

                if let Some(err) = current.check_pending_signal() {
                    detach(&nodes);
                    return Err(err);
                }
                if let Some(d) = deadline {
                    if time::get_monotonic_time() >= d {
                        detach(&nodes);
                        return Err(Error::new(ErrorCode::TimedOut));
                    }
                }

                let state = if deadline.is_some() {
                    ThreadState::Sleeping
                } else {
                    ThreadState::Waiting
                };
                park::park_current(deadline, state);
            }
        }
    }
}

impl KernelObject for ObjectWaitGroup {
    fn meta(&self) -> &ObjectMeta {
        &self.meta
    }

    fn as_any_arc(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
        self
    }
}

impl TypedObject for ObjectWaitGroup {
    const TYPE: ObjectType = ObjectType::ObjectWaitGroup;
}

impl Drop for ObjectWaitGroup {
    fn drop(&mut self) {
        self.mod_wakeup.wake_all_target_deleted();
    }
}

impl Debug for ObjectWaitGroup {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("ObjectWaitGroup")
            .field("name", &self.name())
            .field("members", &self.len())
            .finish()
    }
}

/// Resolve a handle to the waitable facet of the object it names.
pub fn waitable_from_handle(handle: i32) -> Option<Arc<dyn WaitableObject>> {
    let object = object::get_object_any(handle)?;
    match object.meta().object_type() {
        ObjectType::Semaphore => {
            object::get_object::<Semaphore>(handle).map(|o| o as Arc<dyn WaitableObject>)
        }
        ObjectType::Mutex => {
            object::get_object::<Mutex>(handle).map(|o| o as Arc<dyn WaitableObject>)
        }
        ObjectType::ConditionVariable => {
            object::get_object::<ConditionVariable>(handle).map(|o| o as Arc<dyn WaitableObject>)
        }
        ObjectType::Thread => {
            object::get_object::<ThreadCb>(handle).map(|o| o as Arc<dyn WaitableObject>)
        }
        ObjectType::MessagePort => {
            object::get_object::<crate::port::MessagePort>(handle)
                .map(|o| o as Arc<dyn WaitableObject>)
        }
        _ => None,
    }
}
