// SPDX-License-Identifier: MPL-2.0

#![allow(unused)]

pub(crate) use alloc::{
    boxed::Box,
    collections::{BTreeMap, VecDeque},
    string::{String, ToString},
    sync::{Arc, Weak},
    vec,
    vec::Vec,
};
pub(crate) use core::fmt::Debug;

pub(crate) use bitflags::bitflags;
pub(crate) use kcore_frame::{
    sync::{Mutex, MutexGuard, SpinLock, SpinLockGuard, WaitQueue},
    task::{scheduler, Task, TaskOptions},
};
pub(crate) use log::{debug, error, info, trace, warn};

pub(crate) use crate::{
    config::PAGE_SIZE,
    error::{Errno, Error},
    return_errno, return_errno_with_message,
};

pub(crate) type Result<T> = core::result::Result<T, Error>;
