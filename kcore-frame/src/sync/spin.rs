// SPDX-License-Identifier: MPL-2.0

//! A thin, non-sleeping spin lock for the short critical sections inside
//! the scheduler and wait queue themselves (which cannot use [`Mutex`],
//! since [`Mutex`] is itself built on a wait queue).

use core::ops::{Deref, DerefMut};

/// A spin lock. Never sleeps; callers must keep critical sections short
/// and must not call back into the scheduler while holding the guard.
pub struct SpinLock<T: ?Sized> {
    inner: spin::Mutex<T>,
}

pub struct SpinLockGuard<'a, T: ?Sized + 'a> {
    inner: spin::MutexGuard<'a, T>,
}

impl<T> SpinLock<T> {
    pub const fn new(val: T) -> Self {
        Self {
            inner: spin::Mutex::new(val),
        }
    }
}

impl<T: ?Sized> SpinLock<T> {
    pub fn lock(&self) -> SpinLockGuard<'_, T> {
        SpinLockGuard {
            inner: self.inner.lock(),
        }
    }
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
