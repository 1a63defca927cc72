// SPDX-License-Identifier: MPL-2.0

//! Crate-wide constants, mirroring `aster_frame::config`.

/// Size in bytes of one virtual-memory page. Fixed for the lifetime of the
/// crate; the out-of-scope MMU collaborator is expected to use the same
/// value.
pub const PAGE_SIZE: usize = 4096;

/// Default kernel stack size for a newly created thread, in bytes.
pub const KERNEL_STACK_SIZE: usize = PAGE_SIZE * 16;
