// SPDX-License-Identifier: MPL-2.0

//! Named kernel objects.
//!
//! Every object a thread can hold a handle to carries an [`ObjectMeta`]: a
//! short name, a type tag from the closed [`ObjectType`] set, and the handle
//! it is registered under (or [`INVALID_HANDLE`]). Objects are shared as
//! `Arc<dyn KernelObject>`; the handle table owns one strong reference per
//! live handle.

mod handle_table;

pub use handle_table::{
    duplicate_handle, forward_to_handle, forward_to_handle_restartable, free_handle,
    free_handle_typed, get_object, get_object_any, register_object,
};

use core::sync::atomic::{AtomicI32, Ordering};

use crate::config::OS_NAME_LENGTH;
use crate::prelude::*;

pub const INVALID_HANDLE: i32 = -1;

/// The closed set of object types a handle can name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObjectType {
    Generic,
    Thread,
    Semaphore,
    Mutex,
    ConditionVariable,
    ObjectWaitGroup,
    MessagePort,
}

/// The naming metadata embedded in every kernel object.
#[derive(Debug)]
pub struct ObjectMeta {
    name: String,
    object_type: ObjectType,
    handle: AtomicI32,
}

impl ObjectMeta {
    pub fn new(name: &str, object_type: ObjectType) -> Self {
        let mut name = String::from(name);
        if name.len() >= OS_NAME_LENGTH {
            let mut cut = OS_NAME_LENGTH - 1;
            while !name.is_char_boundary(cut) {
                cut -= 1;
            }
            name.truncate(cut);
        }
        ObjectMeta {
            name,
            object_type,
            handle: AtomicI32::new(INVALID_HANDLE),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn object_type(&self) -> ObjectType {
        self.object_type
    }

    /// The handle this object is registered under, or `INVALID_HANDLE`.
    pub fn handle(&self) -> i32 {
        self.handle.load(Ordering::Acquire)
    }

    pub(crate) fn set_handle(&self, handle: i32) {
        self.handle.store(handle, Ordering::Release);
    }
}

/// A reference-counted, named, typed kernel object.
pub trait KernelObject: Any + Send + Sync {
    fn meta(&self) -> &ObjectMeta;

    /// Upcast for typed handle lookups.
    fn as_any_arc(self: Arc<Self>) -> Arc<dyn Any + Send + Sync>;
}

/// Implemented by each concrete object kind; binds the type tag used for
/// typed lookups.
pub trait TypedObject: KernelObject + Sized {
    const TYPE: ObjectType;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn meta_truncates_long_names() {
        let meta = ObjectMeta::new(
            "a_very_long_object_name_that_exceeds_the_limit",
            ObjectType::Generic,
        );
        assert!(meta.name().len() < OS_NAME_LENGTH);
        assert_eq!(meta.handle(), INVALID_HANDLE);
    }
}
