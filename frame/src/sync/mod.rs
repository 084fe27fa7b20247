// SPDX-License-Identifier: MPL-2.0

mod spin_lock;

pub use spin_lock::{SpinLock, SpinLockGuard};
