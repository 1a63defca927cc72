// SPDX-License-Identifier: MPL-2.0

//! Shadow objects: the copy-on-write chain (spec §4.K "Shadow object").
//!
//! A shadow never mutates what it shadows; it only reads through it on
//! a miss and materializes a private copy on a writing fault. Dropping
//! the last `Arc` to a shadow drops its one reference on what it
//! shadowed, which is the spec's "`put` ... drop one reference on what
//! it shadowed" expressed via `Arc`/`Drop` rather than a manual count.

use crate::{
    collab::{sim::HeapFrameAllocator, FrameAllocator},
    prelude::*,
    vm::mmobj::{MemObject, PageFrame},
};

/// Below this many resident pages a lone shadow sitting directly on
/// another shadow could in principle be collapsed into its parent (the
/// base spec notes this as an optional source optimization); this crate
/// does not implement the collapse, only records the threshold it would
/// use (SPEC_FULL.md §2.1).
pub const SHADOW_COLLAPSE_THRESHOLD: usize = crate::config::SHADOW_SINGLETON_THRESHOLD;

/// One link in a COW chain. Holds a reference to whatever it shadows
/// (another shadow, an anonymous object, or a file-backed object); the
/// bottom of any chain is always non-shadow (spec §4.K invariant).
pub struct ShadowObject {
    shadowed: Arc<dyn MemObject>,
    allocator: Arc<dyn FrameAllocator>,
    pages: SpinLock<BTreeMap<usize, Arc<PageFrame>>>,
}

impl ShadowObject {
    pub fn new(shadowed: Arc<dyn MemObject>) -> Arc<Self> {
        Self::with_allocator(shadowed, Arc::new(HeapFrameAllocator))
    }

    pub fn with_allocator(
        shadowed: Arc<dyn MemObject>,
        allocator: Arc<dyn FrameAllocator>,
    ) -> Arc<Self> {
        Arc::new(Self {
            shadowed,
            allocator,
            pages: SpinLock::new(BTreeMap::new()),
        })
    }

    /// What this shadow sits on top of, for chain-depth bookkeeping
    /// (`fork`'s "increment the bottom object's refcount" needs to find
    /// the bottom, see [`crate::vm::vmarea`]).
    pub fn shadowed(&self) -> &Arc<dyn MemObject> {
        &self.shadowed
    }
}

impl MemObject for ShadowObject {
    fn lookuppage(&self, pagenum: usize, forwrite: bool) -> Result<Arc<PageFrame>> {
        if let Some(frame) = self.pages.lock().get(&pagenum).cloned() {
            frame.wait_until_ready();
            return Ok(frame);
        }
        if !forwrite {
            // Not resident here: walk down the chain for the nearest
            // read-only copy, all the way to the bottom object.
            return self.shadowed.lookuppage(pagenum, false);
        }

        // Materialize a private writable copy in this shadow.
        let source = self.shadowed.lookuppage(pagenum, false)?;
        let mut raw = self.allocator.alloc_zeroed()?;
        let mut buf = [0u8; PAGE_SIZE];
        source.read_into(0, &mut buf);
        raw.as_bytes_mut().copy_from_slice(&buf);
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
    use crate::vm::anon::AnonObject;

    #[test]
    fn read_only_lookup_falls_through_to_bottom_object() {
        let anon = AnonObject::new();
        let bottom: Arc<dyn MemObject> = anon.clone();
        let shadow = ShadowObject::new(bottom);

        let from_anon = anon.lookuppage(0, false).unwrap();
        let from_shadow = shadow.lookuppage(0, false).unwrap();
        assert!(Arc::ptr_eq(&from_anon, &from_shadow));
        assert_eq!(shadow.resident_count(), 0);
    }

    #[test]
    fn write_fault_materializes_private_copy_without_touching_bottom() {
        let anon = AnonObject::new();
        let bottom: Arc<dyn MemObject> = anon.clone();
        let shadow = ShadowObject::new(bottom);

        let original = anon.lookuppage(0, false).unwrap();
        original.write_from(0, b"from anon");

        let private = shadow.lookuppage(0, true).unwrap();
        assert!(!Arc::ptr_eq(&original, &private));
        private.write_from(0, b"from shadow");

        let mut anon_buf = [0u8; 9];
        original.read_into(0, &mut anon_buf);
        assert_eq!(&anon_buf, b"from anon");

        assert_eq!(shadow.resident_count(), 1);
    }

    #[test]
    fn two_sibling_shadows_diverge_independently() {
        let anon = AnonObject::new();
        let bottom: Arc<dyn MemObject> = anon.clone();
        let left = ShadowObject::new(bottom.clone());
        let right = ShadowObject::new(bottom);

        left.lookuppage(0, true).unwrap().write_from(0, b"left");
        right.lookuppage(0, true).unwrap().write_from(0, b"right");

        let mut left_buf = [0u8; 4];
        let mut right_buf = [0u8; 5];
        left.lookuppage(0, false).unwrap().read_into(0, &mut left_buf);
        right.lookuppage(0, false).unwrap().read_into(0, &mut right_buf);
        assert_eq!(&left_buf, b"left");
        assert_eq!(&right_buf, b"right");
    }
}
