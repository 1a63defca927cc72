// SPDX-License-Identifier: MPL-2.0

//! Crate-wide constants for the process/VFS/VM layer, mirroring
//! `kcore_frame::config` one level down and `aster_frame::config` /
//! `kernel/src/fs/*` constants in the teacher.

/// Re-exported so callers need not also depend on `kcore-frame` just to
/// talk about page sizes.
pub const PAGE_SIZE: usize = kcore_frame::config::PAGE_SIZE;

/// Maximum length of a single pathname component, not counting the `NUL`
/// terminator a C implementation would need.
pub const NAME_LEN: usize = 255;

/// Maximum length of a full pathname.
pub const MAXPATHLEN: usize = 4096;

/// Size of a process's fixed file-descriptor table.
pub const NFILES: usize = 32;

/// Upper bound on live pids; pid allocation wraps here and skips in-use
/// values.
pub const PROC_MAX_COUNT: u32 = 1 << 16;

/// The reserved pid of the idle process: created first, has no parent.
pub const PID_IDLE: u32 = 0;
/// The reserved pid of the init process: created second, reparented
/// zombies land here.
pub const PID_INIT: u32 = 1;
/// The reserved pid of the kernel daemon process, exempted from
/// `kill_all` alongside idle/init.
pub const PID_KERNEL_DAEMON: u32 = 2;

/// Lowest valid user-space virtual page number a `vmarea` may cover.
pub const USER_MEM_LOW: usize = PAGE_SIZE;
/// One past the highest valid user-space virtual page number.
pub const USER_MEM_HIGH: usize = 0x0000_8000_0000_0000;

/// Below this resident-shadow-chain depth, `Shadow::put` does not bother
/// attempting the single-parent collapse optimization (spec §2.1
/// `SHADOW_SINGLETON_THRESHOLD`). Purely a heuristic; correctness never
/// depends on it firing.
pub const SHADOW_SINGLETON_THRESHOLD: usize = 1;
