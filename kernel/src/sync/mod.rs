// SPDX-License-Identifier: MPL-2.0

//! Kernel synchronization objects.
//!
//! All of these are named objects: they can be registered in the handle
//! table and waited on through an [`ObjectWaitGroup`].

mod condvar;
mod mutex;
mod semaphore;
mod wait_group;

pub use condvar::ConditionVariable;
pub use mutex::{Mutex, MutexGuard, RecursionMode};
pub use semaphore::Semaphore;
pub use wait_group::{waitable_from_handle, ObjectWaitGroup};
