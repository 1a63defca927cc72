// SPDX-License-Identifier: MPL-2.0

//! The virtual filesystem layer (spec §3 "Vnode"/"File object", §4.G–I,
//! §6 "VFS filesystem contract"). Grounded on the module layout of
//! `kernel/aster-nix/src/fs` (a `utils` operations-trait layer plus a
//! concrete filesystem implementation plus a syscall-facing surface),
//! narrowed to the single in-memory filesystem this crate ships.

pub mod file;
pub mod path;
pub mod ramfs;
pub mod rootfs;
pub mod syscall;
pub mod vnode;
