// SPDX-License-Identifier: MPL-2.0

//! Anonymous (zero-fill) memory objects (spec §4.K "Anonymous object").

use crate::{
    collab::{sim::HeapFrameAllocator, FrameAllocator},
    prelude::*,
    vm::mmobj::{MemObject, PageFrame},
};

/// Backs a mapping with no file behind it: every page reads as zero
/// until first written. Always the bottom of whatever shadow chain (if
/// any) sits above it.
pub struct AnonObject {
    allocator: Arc<dyn FrameAllocator>,
    pages: SpinLock<BTreeMap<usize, Arc<PageFrame>>>,
}

impl AnonObject {
    /// Creates an anonymous object backed by the default heap allocator.
    /// `mmap`'s own `MAP_ANON` path and `VnodeOps::mmap` stubs (spec §4.L
    /// `map`: "attach `anon_create()` if file is null") both go through
    /// this; a caller that owns a process-specific [`FrameAllocator`]
    /// should use [`Self::with_allocator`] instead.
    pub fn new() -> Arc<Self> {
        Self::with_allocator(Arc::new(HeapFrameAllocator))
    }

    pub fn with_allocator(allocator: Arc<dyn FrameAllocator>) -> Arc<Self> {
        Arc::new(Self {
            allocator,
            pages: SpinLock::new(BTreeMap::new()),
        })
    }
}

impl MemObject for AnonObject {
    fn lookuppage(&self, pagenum: usize, _forwrite: bool) -> Result<Arc<PageFrame>> {
        if let Some(frame) = self.pages.lock().get(&pagenum).cloned() {
            frame.wait_until_ready();
            return Ok(frame);
        }
        let raw = self.allocator.alloc_zeroed()?;
        let frame = PageFrame::new_ready(pagenum, raw);
        self.pages.lock().insert(pagenum, frame.clone());
        Ok(frame)
    }

    fn fillpage(&self, frame: &Arc<PageFrame>) -> Result<()> {
        frame.mark_ready();
        Ok(())
    }

    fn resident_count(&self) -> usize {
        self.pages.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookuppage_allocates_zero_filled_page_on_demand() {
        let anon = AnonObject::new();
        let frame = anon.lookuppage(3, false).unwrap();
        let mut buf = [0xffu8; 8];
        frame.read_into(0, &mut buf);
        assert_eq!(buf, [0u8; 8]);
        assert_eq!(anon.resident_count(), 1);
    }

    #[test]
    fn repeated_lookup_of_same_page_returns_the_same_frame() {
        let anon = AnonObject::new();
        let a = anon.lookuppage(1, false).unwrap();
        let b = anon.lookuppage(1, true).unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(anon.resident_count(), 1);
    }
}
