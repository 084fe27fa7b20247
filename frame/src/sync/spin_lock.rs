// SPDX-License-Identifier: MPL-2.0

use core::fmt;
use core::ops::{Deref, DerefMut};

use crate::arch::{disable_interrupts, IrqGuard};

/// A spin lock.
///
/// `lock` is for thread-only data. Data that is also touched from IRQ
/// context must be taken with `lock_irq_disabled`, which masks interrupts
/// for the lifetime of the guard so an ISR cannot deadlock against its own
/// thread.
pub struct SpinLock<T: ?Sized> {
    inner: spin::Mutex<T>,
}

impl<T> SpinLock<T> {
    pub const fn new(val: T) -> Self {
        Self {
            inner: spin::Mutex::new(val),
        }
    }
}

impl<T: ?Sized> SpinLock<T> {
    /// Acquire the lock without touching the interrupt state.
    pub fn lock(&self) -> SpinLockGuard<'_, T> {
        SpinLockGuard {
            inner: self.inner.lock(),
            _irq: None,
        }
    }

    /// Acquire the lock with local IRQs masked until the guard is dropped.
    pub fn lock_irq_disabled(&self) -> SpinLockGuard<'_, T> {
        let irq = disable_interrupts();
        SpinLockGuard {
            inner: self.inner.lock(),
            _irq: Some(irq),
        }
    }

    pub fn try_lock(&self) -> Option<SpinLockGuard<'_, T>> {
        self.inner.try_lock().map(|inner| SpinLockGuard {
            inner,
            _irq: None,
        })
    }
}

impl<T: ?Sized + fmt::Debug> fmt::Debug for SpinLock<T> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        fmt::Debug::fmt(&self.inner, f)
    }
}

pub struct SpinLockGuard<'a, T: ?Sized> {
    // Declaration order matters: the lock is released before interrupts are
    // re-enabled.
    inner: spin::MutexGuard<'a, T>,
    _irq: Option<IrqGuard>,
}

impl<T: ?Sized> Deref for SpinLockGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.inner
    }
}

impl<T: ?Sized> DerefMut for SpinLockGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        &mut self.inner
    }
}

impl<T: ?Sized + fmt::Debug> fmt::Debug for SpinLockGuard<'_, T> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        fmt::Debug::fmt(&**self, f)
    }
}
