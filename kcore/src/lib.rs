// SPDX-License-Identifier: MPL-2.0

//! The process / VFS / virtual-memory core of the teaching kernel,
//! built on top of `kcore-frame`'s threads, scheduler, and mutexes.
//!
//! This crate plays the role `aster-nix` plays over `aster-frame`: it
//! owns pids, vnodes, file descriptors, vmareas, and memory objects, and
//! knows nothing about real hardware. The physical page allocator,
//! page-table/TLB primitives, and on-disk filesystem implementations are
//! all out of scope (spec §1); this crate fixes their interface as the
//! [`collab`] traits and is otherwise fully testable on a host target.

#![no_std]

extern crate alloc;

pub mod collab;
pub mod config;
pub mod error;
pub mod fs;
pub mod process;
pub mod vm;

pub mod prelude;
