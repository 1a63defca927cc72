// SPDX-License-Identifier: MPL-2.0

//! The virtual-memory subsystem: memory objects, anonymous and shadow
//! (copy-on-write) objects, per-process address-space maps, and the
//! `mmap`/page-fault surface (spec §4.J–M).

pub mod anon;
pub mod mmap;
pub mod mmobj;
pub mod shadow;
pub mod vmarea;
