// SPDX-License-Identifier: MPL-2.0

//! Low-level primitives shared by the kernel core: wait queues, the
//! cooperative scheduler, mutexes, and the kernel-thread abstraction.
//!
//! This crate plays the role that `aster-frame` plays under `aster-nix`:
//! it owns everything below the process/VFS/VM layer and knows nothing
//! about pids, vnodes, or vmareas.

#![feature(negative_impls)]
#![no_std]

extern crate alloc;

pub mod config;
pub mod sync;
pub mod task;

pub mod prelude {
    pub use alloc::{boxed::Box, string::String, sync::Arc, vec::Vec};
    pub use log::{debug, error, info, trace, warn};

    pub use crate::{
        config::PAGE_SIZE,
        sync::{Mutex, MutexGuard, RwMutex, SpinLock, SpinLockGuard, WaitQueue},
        task::{scheduler, Task, TaskOptions, TaskStatus},
    };
}
