// SPDX-License-Identifier: MPL-2.0

//! The process-wide handle table.
//!
//! A sparse slot vector with a free list: handle values are slot indices, so
//! lookups are O(1). Each live slot owns one strong reference to its object.
//! Updates run with interrupts masked; the dropped reference of a freed
//! handle is released only after the table lock is gone, so object teardown
//! (which may wake waiters) never runs inside the critical section.

use super::{KernelObject, ObjectType, TypedObject};
use crate::prelude::*;
use crate::thread;

struct HandleTable {
    slots: Vec<Option<Arc<dyn KernelObject>>>,
    free: Vec<usize>,
}

static HANDLE_TABLE: SpinLock<HandleTable> = SpinLock::new(HandleTable {
    slots: Vec::new(),
    free: Vec::new(),
});

/// Store `object` in the table, returning its new handle.
///
/// The table takes a strong reference and records the handle in the object's
/// metadata.
pub fn register_object(object: Arc<dyn KernelObject>) -> Result<i32> {
    let mut table = HANDLE_TABLE.lock_irq_disabled();
    let index = match table.free.pop() {
        Some(index) => index,
        None => {
            table.slots.push(None);
            table.slots.len() - 1
        }
    };
    let handle = index as i32;
    object.meta().set_handle(handle);
    table.slots[index] = Some(object);
    Ok(handle)
}

/// Release `handle`, dropping the table's reference to the object.
pub fn free_handle(handle: i32) -> Result<()> {
    free_handle_checked(handle, None)
}

/// Release `handle` after checking its type tag. A mismatch fails without
/// mutating the table.
pub fn free_handle_typed(handle: i32, expected: ObjectType) -> Result<()> {
    free_handle_checked(handle, Some(expected))
}

fn free_handle_checked(handle: i32, expected: Option<ObjectType>) -> Result<()> {
    let released = {
        let mut guard = HANDLE_TABLE.lock_irq_disabled();
        let table = &mut *guard;
        let slot = table
            .slots
            .get_mut(handle as usize)
            .filter(|_| handle >= 0)
            .ok_or(Error::new(ErrorCode::NotFound))?;
        match (slot.as_ref(), expected) {
            (None, _) => return Err(Error::new(ErrorCode::NotFound)),
            (Some(object), Some(expected)) if object.meta().object_type() != expected => {
                return Err(Error::with_message(
                    ErrorCode::InvalidArgument,
                    "handle type mismatch",
                ));
            }
            _ => (),
        }
        let object = slot.take();
        table.free.push(handle as usize);
        object
    };
    // The reference dies outside the critical section; object teardown may
    // wake waiters.
    drop(released);
    Ok(())
}

/// Look up `handle` without a type check.
pub fn get_object_any(handle: i32) -> Option<Arc<dyn KernelObject>> {
    if handle < 0 {
        return None;
    }
    let table = HANDLE_TABLE.lock_irq_disabled();
    table.slots.get(handle as usize)?.clone()
}

/// Look up `handle` typed as `T`; fails if the stored object's type tag does
/// not match.
pub fn get_object<T: TypedObject>(handle: i32) -> Option<Arc<T>> {
    let object = get_object_any(handle)?;
    if object.meta().object_type() != T::TYPE {
        return None;
    }
    object.as_any_arc().downcast::<T>().ok()
}

/// Allocate a second handle naming the same object.
pub fn duplicate_handle(handle: i32) -> Result<i32> {
    let object = get_object_any(handle).ok_or(Error::new(ErrorCode::NotFound))?;
    register_object(object)
}

/// Look up `handle` typed as `T` and run `f` on it, translating a missing or
/// mistyped handle into `invalid_error`.
pub fn forward_to_handle<T, R, F>(handle: i32, invalid_error: ErrorCode, f: F) -> Result<R>
where
    T: TypedObject,
    F: FnOnce(&T) -> Result<R>,
{
    match get_object::<T>(handle) {
        Some(object) => f(&object),
        None => Err(Error::new(invalid_error)),
    }
}

/// As [`forward_to_handle`], but loops while the forwarded call reports
/// `RestartSyscall`, forcing pending thread signals between iterations.
pub fn forward_to_handle_restartable<T, R, F>(
    handle: i32,
    invalid_error: ErrorCode,
    f: F,
) -> Result<R>
where
    T: TypedObject,
    F: Fn(&T) -> Result<R>,
{
    loop {
        match forward_to_handle::<T, R, _>(handle, invalid_error, &f) {
            Err(e) if e.code() == ErrorCode::RestartSyscall => {
                thread::force_process_signals();
            }
            result => return result,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::super::{ObjectMeta, INVALID_HANDLE};
    use super::*;

    struct Dummy {
        meta: ObjectMeta,
        payload: u32,
    }

    impl Dummy {
        fn new(payload: u32) -> Arc<Self> {
            Arc::new(Dummy {
                meta: ObjectMeta::new("dummy", ObjectType::Generic),
                payload,
            })
        }
    }

    impl KernelObject for Dummy {
        fn meta(&self) -> &ObjectMeta {
            &self.meta
        }

        fn as_any_arc(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
            self
        }
    }

    impl TypedObject for Dummy {
        const TYPE: ObjectType = ObjectType::Generic;
    }

    #[test]
    fn register_get_free_round_trip() {
        let obj = Dummy::new(7);
        let handle = register_object(obj.clone()).unwrap();
        assert_eq!(obj.meta().handle(), handle);

        let found = get_object::<Dummy>(handle).unwrap();
        assert_eq!(found.payload, 7);
        assert!(Arc::ptr_eq(&found, &obj));

        free_handle(handle).unwrap();
        assert!(get_object::<Dummy>(handle).is_none());
        assert!(free_handle(handle).is_err());
    }

    #[test]
    fn typed_free_rejects_mismatch() {
        let handle = register_object(Dummy::new(0)).unwrap();
        let err = free_handle_typed(handle, ObjectType::Mutex).unwrap_err();
        assert_eq!(err.code(), ErrorCode::InvalidArgument);
        // The failed free must not have mutated the slot.
        assert!(get_object::<Dummy>(handle).is_some());
        free_handle_typed(handle, ObjectType::Generic).unwrap();
        assert!(get_object_any(handle).is_none());
    }

    #[test]
    fn duplicate_shares_the_object() {
        let obj = Dummy::new(3);
        let h1 = register_object(obj.clone()).unwrap();
        let h2 = duplicate_handle(h1).unwrap();
        assert_ne!(h1, h2);
        assert!(Arc::ptr_eq(
            &get_object::<Dummy>(h1).unwrap(),
            &get_object::<Dummy>(h2).unwrap()
        ));
        free_handle(h1).unwrap();
        // The second handle keeps the object alive.
        assert_eq!(get_object::<Dummy>(h2).unwrap().payload, 3);
        free_handle(h2).unwrap();
    }

    #[test]
    fn restartable_forwarder_loops_until_settled() {
        use core::sync::atomic::{AtomicU32, Ordering};

        let handle = register_object(Dummy::new(9)).unwrap();
        let attempts = AtomicU32::new(0);
        let value = forward_to_handle_restartable::<Dummy, u32, _>(
            handle,
            ErrorCode::InvalidArgument,
            |d| {
                if attempts.fetch_add(1, Ordering::AcqRel) < 2 {
                    Err(Error::new(ErrorCode::RestartSyscall))
                } else {
                    Ok(d.payload)
                }
            },
        )
        .unwrap();
        assert_eq!(value, 9);
        assert_eq!(attempts.load(Ordering::Acquire), 3);
        free_handle(handle).unwrap();
    }

    #[test]
    fn forwarder_translates_invalid_handles() {
        let err = forward_to_handle::<Dummy, u32, _>(INVALID_HANDLE, ErrorCode::InvalidArgument, |d| {
            Ok(d.payload)
        })
        .unwrap_err();
        assert_eq!(err.code(), ErrorCode::InvalidArgument);
    }
}
