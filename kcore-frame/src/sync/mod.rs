// SPDX-License-Identifier: MPL-2.0

mod mutex;
mod rwmutex;
mod spin;
mod wait;

pub use mutex::{Mutex, MutexGuard};
pub use rwmutex::{RwMutex, RwMutexReadGuard, RwMutexUpgradeableGuard, RwMutexWriteGuard};
pub use spin::{SpinLock, SpinLockGuard};
pub use wait::WaitQueue;
