// SPDX-License-Identifier: MPL-2.0

//! A reader-writer mutex built on the same wait queue and scheduler as
//! [`super::Mutex`] (spec component C's sibling primitive, used by the
//! process table and other structures that are read far more often than
//! written).
//!
//! The locking discipline mirrors a standard atomic-bitfield rwlock: many
//! readers, or one writer, never both. An upgradeable reader (`upread`) can
//! later promote itself to a writer without first releasing its read
//! access to intervening writers, which is the pattern the process table
//! needs for "check, then maybe mutate" operations.

use alloc::sync::Arc;
use core::{
    cell::UnsafeCell,
    fmt,
    ops::{Deref, DerefMut},
    sync::atomic::{
        AtomicUsize,
        Ordering::{AcqRel, Acquire, Relaxed, Release},
    },
};

use super::wait::WaitQueue;
use crate::task::{scheduler, Task};

const READER: usize = 1;
const WRITER: usize = 1 << (usize::BITS - 1);
const UPGRADEABLE_READER: usize = 1 << (usize::BITS - 2);
const BEING_UPGRADED: usize = 1 << (usize::BITS - 3);
const MAX_READER: usize = 1 << (usize::BITS - 4);

/// A mutex that grants either many concurrent readers or one exclusive
/// writer.
pub struct RwMutex<T: ?Sized> {
    /// Bit 63: writer held. Bit 62: an upgradeable reader is held. Bit 61:
    /// that upgradeable reader is mid-upgrade. Bits 60-0: reader count.
    lock: AtomicUsize,
    queue: WaitQueue,
    val: UnsafeCell<T>,
}

impl<T> RwMutex<T> {
    pub const fn new(val: T) -> Self {
        Self {
            lock: AtomicUsize::new(0),
            queue: WaitQueue::new(),
            val: UnsafeCell::new(val),
        }
    }
}

impl<T: ?Sized> RwMutex<T> {
    /// Acquires a read mutex, sleeping while a writer holds or is
    /// upgrading.
    pub fn read(&self) -> RwMutexReadGuard<'_, T> {
        loop {
            if let Some(guard) = self.try_read() {
                return guard;
            }
            scheduler::sleep_on(&self.queue);
        }
    }

    /// Acquires the write mutex, sleeping while any reader, upreader, or
    /// writer holds it.
    pub fn write(&self) -> RwMutexWriteGuard<'_, T> {
        loop {
            if let Some(guard) = self.try_write() {
                return guard;
            }
            scheduler::sleep_on(&self.queue);
        }
    }

    /// Acquires an upgradeable read mutex. At most one of these may be
    /// held at a time, which is what makes `upgrade` deadlock-free.
    pub fn upread(&self) -> RwMutexUpgradeableGuard<'_, T> {
        loop {
            if let Some(guard) = self.try_upread() {
                return guard;
            }
            scheduler::sleep_on(&self.queue);
        }
    }

    pub fn try_read(&self) -> Option<RwMutexReadGuard<'_, T>> {
        let lock = self.lock.fetch_add(READER, Acquire);
        if lock & (WRITER | BEING_UPGRADED | MAX_READER) == 0 {
            Some(RwMutexReadGuard { inner: self })
        } else {
            self.lock.fetch_sub(READER, Release);
            None
        }
    }

    pub fn try_write(&self) -> Option<RwMutexWriteGuard<'_, T>> {
        if self
            .lock
            .compare_exchange(0, WRITER, Acquire, Relaxed)
            .is_ok()
        {
            Some(RwMutexWriteGuard { inner: self })
        } else {
            None
        }
    }

    pub fn try_upread(&self) -> Option<RwMutexUpgradeableGuard<'_, T>> {
        let lock = self.lock.fetch_or(UPGRADEABLE_READER, Acquire) & (WRITER | UPGRADEABLE_READER);
        if lock == 0 {
            return Some(RwMutexUpgradeableGuard { inner: self });
        } else if lock == WRITER {
            self.lock.fetch_sub(UPGRADEABLE_READER, Release);
        }
        None
    }

    /// Wakes every thread parked on this mutex. Readers and a single
    /// writer may both be among them; each re-checks its own condition on
    /// the way back through `read`/`write`/`upread`, so waking everyone is
    /// safe, just occasionally wasteful.
    fn wake_all(&self) {
        for task in self.queue.broadcast() {
            task.inner().waitq = None;
            scheduler::make_runnable(task);
        }
    }

    fn wake_one(&self) {
        if let Some(task) = self.queue.dequeue() {
            task.inner().waitq = None;
            scheduler::make_runnable(task);
        }
    }
}

impl<T: ?Sized + fmt::Debug> fmt::Debug for RwMutex<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(unsafe { &*self.val.get() }, f)
    }
}

unsafe impl<T: ?Sized + Send> Send for RwMutex<T> {}
unsafe impl<T: ?Sized + Send + Sync> Sync for RwMutex<T> {}

impl<T: ?Sized> !Send for RwMutexWriteGuard<'_, T> {}
unsafe impl<T: ?Sized + Sync> Sync for RwMutexWriteGuard<'_, T> {}

impl<T: ?Sized> !Send for RwMutexReadGuard<'_, T> {}
unsafe impl<T: ?Sized + Sync> Sync for RwMutexReadGuard<'_, T> {}

impl<T: ?Sized> !Send for RwMutexUpgradeableGuard<'_, T> {}
unsafe impl<T: ?Sized + Sync> Sync for RwMutexUpgradeableGuard<'_, T> {}

/// A guard granting shared, read-only access.
pub struct RwMutexReadGuard<'a, T: ?Sized> {
    inner: &'a RwMutex<T>,
}

impl<T: ?Sized> Deref for RwMutexReadGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        unsafe { &*self.inner.val.get() }
    }
}

impl<T: ?Sized> Drop for RwMutexReadGuard<'_, T> {
    fn drop(&mut self) {
        if self.inner.lock.fetch_sub(READER, Release) == READER {
            self.inner.wake_one();
        }
    }
}

/// A guard granting exclusive, mutable access.
pub struct RwMutexWriteGuard<'a, T: ?Sized> {
    inner: &'a RwMutex<T>,
}

impl<T: ?Sized> Deref for RwMutexWriteGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        unsafe { &*self.inner.val.get() }
    }
}

impl<T: ?Sized> DerefMut for RwMutexWriteGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        unsafe { &mut *self.inner.val.get() }
    }
}

impl<T: ?Sized> Drop for RwMutexWriteGuard<'_, T> {
    fn drop(&mut self) {
        self.inner.lock.fetch_and(!WRITER, Release);
        self.inner.wake_all();
    }
}

/// A guard granting read-only access that can be atomically promoted to
/// [`RwMutexWriteGuard`] without an intervening writer being able to slip
/// in.
pub struct RwMutexUpgradeableGuard<'a, T: ?Sized> {
    inner: &'a RwMutex<T>,
}

impl<'a, T: ?Sized> RwMutexUpgradeableGuard<'a, T> {
    /// Upgrades to a write guard, spinning until the last plain reader
    /// drops. Does not sleep: upgraders are expected to hold the mutex
    /// only briefly, and a second wait-queue round trip here would cost
    /// more than it saves.
    pub fn upgrade(mut self) -> RwMutexWriteGuard<'a, T> {
        self.inner.lock.fetch_or(BEING_UPGRADED, Acquire);
        loop {
            self = match self.try_upgrade() {
                Ok(guard) => return guard,
                Err(e) => e,
            };
            core::hint::spin_loop();
        }
    }

    pub fn try_upgrade(self) -> Result<RwMutexWriteGuard<'a, T>, Self> {
        let inner = self.inner;
        let res = inner.lock.compare_exchange(
            UPGRADEABLE_READER | BEING_UPGRADED,
            WRITER | UPGRADEABLE_READER,
            AcqRel,
            Relaxed,
        );
        if res.is_ok() {
            drop(self);
            Ok(RwMutexWriteGuard { inner })
        } else {
            Err(self)
        }
    }
}

impl<T: ?Sized> Deref for RwMutexUpgradeableGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        unsafe { &*self.inner.val.get() }
    }
}

impl<T: ?Sized> Drop for RwMutexUpgradeableGuard<'_, T> {
    fn drop(&mut self) {
        let res = self.inner.lock.fetch_sub(UPGRADEABLE_READER, Release);
        if res == 0 {
            self.inner.wake_all();
        }
    }
}
