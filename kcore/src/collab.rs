// SPDX-License-Identifier: MPL-2.0

//! Interface-only seams onto the hardware collaborators the base spec
//! places out of scope: the physical page allocator, the per-process
//! page table, and the TLB (spec §1 "Out of scope", SPEC_FULL.md §1.2).
//!
//! A real embedder backs these with `ostd`/`aster-frame`-style `VmSpace`
//! and frame-allocator types, the same seam `aster-nix` draws around
//! `ostd`. For this crate's own tests, [`sim`] supplies a trivial
//! in-process implementation of all three so fork/COW/page-fault logic
//! can be exercised on a host target.

use alloc::boxed::Box;

use crate::{config::PAGE_SIZE, prelude::Result};

/// An owned, page-sized, page-aligned block of physical memory.
///
/// Standing in for a real kernel's physical-frame handle: this crate
/// never interprets the bytes it contains, only copies in and out of it
/// on behalf of [`crate::vm::mmobj::MemObject`] implementations.
pub struct Frame {
    bytes: Box<[u8; PAGE_SIZE]>,
}

impl Frame {
    pub fn zeroed() -> Self {
        Self {
            bytes: Box::new([0u8; PAGE_SIZE]),
        }
    }

    pub fn as_bytes(&self) -> &[u8; PAGE_SIZE] {
        &self.bytes
    }

    pub fn as_bytes_mut(&mut self) -> &mut [u8; PAGE_SIZE] {
        &mut self.bytes
    }

    /// A fabricated "physical address" identifying this frame uniquely
    /// for the lifetime of the process, used only so `PageTable::map`
    /// callers have something to log/compare; it carries no real
    /// hardware meaning in this crate.
    pub fn phys_addr(&self) -> usize {
        self.bytes.as_ptr() as usize
    }
}

/// Allocates and releases physical page frames. Out of scope per the
/// base spec ("the physical page allocator and slab allocator"); fixed
/// here as a trait so the rest of the crate has a concrete thing to
/// call.
pub trait FrameAllocator: Send + Sync {
    fn alloc_zeroed(&self) -> Result<Frame>;
    fn dealloc(&self, frame: Frame);
}

/// One page-table entry as reported by `PageTable::query`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageTableEntry {
    pub present: bool,
    pub writable: bool,
    pub phys_addr: usize,
}

/// The per-process page table / page directory (spec §6 "Page-table and
/// TLB collaborator": `pt_map`, `pt_unmap_range`). Out of scope at the
/// MMU level; this crate only ever calls through the trait.
pub trait PageTable: Send + Sync {
    fn map(&self, vaddr: usize, phys_addr: usize, writable: bool);
    fn unmap(&self, vaddr: usize);
    /// Removes every mapping in `[lo, hi)`, half-open byte-address range
    /// (same units as `map`/`unmap`/`query`'s `vaddr`).
    fn unmap_range(&self, lo: usize, hi: usize);
    fn protect(&self, vaddr: usize, writable: bool);
    fn query(&self, vaddr: usize) -> Option<PageTableEntry>;
}

/// TLB invalidation (spec §6 `tlb_flush`/`tlb_flush_all`). Out of scope
/// at the hardware level.
pub trait TlbFlusher: Send + Sync {
    fn flush(&self, vaddr: usize);
    fn flush_all(&self);
}

/// In-memory stand-ins for the three collaborator traits above, used by
/// this crate's own tests and available to downstream integration tests
/// under the `sim` feature-equivalent (there is no Cargo feature gate
/// here since the crate has no `std`-only code path to hide; the types
/// are simply public and only exercised from `#[cfg(test)]`).
pub mod sim {
    use alloc::{collections::BTreeMap, sync::Arc};

    use super::*;
    use crate::prelude::SpinLock;

    /// Hands out zeroed heap-backed frames; never fails.
    #[derive(Default)]
    pub struct HeapFrameAllocator;

    impl FrameAllocator for HeapFrameAllocator {
        fn alloc_zeroed(&self) -> Result<Frame> {
            Ok(Frame::zeroed())
        }

        fn dealloc(&self, _frame: Frame) {
            // Dropping `Frame` frees the heap allocation.
        }
    }

    /// A page table backed by a plain map from vaddr to (phys, writable).
    /// No real MMU effect; exists purely so fault-handler and fork tests
    /// can assert on what *would* have been installed.
    #[derive(Default)]
    pub struct SimPageTable {
        entries: SpinLock<BTreeMap<usize, PageTableEntry>>,
    }

    impl SimPageTable {
        pub fn new() -> Arc<Self> {
            Arc::new(Self::default())
        }
    }

    impl PageTable for SimPageTable {
        fn map(&self, vaddr: usize, phys_addr: usize, writable: bool) {
            self.entries.lock().insert(
                vaddr,
                PageTableEntry {
                    present: true,
                    writable,
                    phys_addr,
                },
            );
        }

        fn unmap(&self, vaddr: usize) {
            self.entries.lock().remove(&vaddr);
        }

        fn unmap_range(&self, lo: usize, hi: usize) {
            self.entries.lock().retain(|&v, _| v < lo || v >= hi);
        }

        fn protect(&self, vaddr: usize, writable: bool) {
            if let Some(entry) = self.entries.lock().get_mut(&vaddr) {
                entry.writable = writable;
            }
        }

        fn query(&self, vaddr: usize) -> Option<PageTableEntry> {
            self.entries.lock().get(&vaddr).copied()
        }
    }

    /// A TLB flusher with nothing to invalidate; records nothing, does
    /// nothing, included only so call sites compile and read naturally.
    #[derive(Default)]
    pub struct NullTlbFlusher;

    impl TlbFlusher for NullTlbFlusher {
        fn flush(&self, _vaddr: usize) {}
        fn flush_all(&self) {}
    }
}
