// SPDX-License-Identifier: MPL-2.0

//! Memory objects and page frames (spec §4.J "Memory object & page
//! frame").
//!
//! As with vnodes and file objects, `ref`/`put` ride on `Arc`/`Drop`
//! (see [`mref`]/[`mput`]); `lookuppage`/`fillpage`/`dirtypage`/
//! `cleanpage` are the real per-variant dispatch and live on the
//! [`MemObject`] trait, implemented by [`crate::vm::anon::AnonObject`]
//! and [`crate::vm::shadow::ShadowObject`].

use crate::{collab::Frame, prelude::*};

bitflags! {
    /// Page-frame state bits (spec §4.J "Page frames have states Busy,
    /// Dirty, Pinned").
    pub struct PageFrameFlags: u32 {
        const BUSY = 1 << 0;
        const DIRTY = 1 << 1;
        const PINNED = 1 << 2;
    }
}

struct PageFrameInner {
    frame: Frame,
    flags: PageFrameFlags,
}

/// One resident page of a memory object.
///
/// `lookuppage` may hand out a frame that is still being filled; callers
/// block on [`PageFrame::wait_until_ready`] rather than observing
/// half-written content, mirroring the base spec's "`lookuppage` may
/// block while a frame is Busy".
pub struct PageFrame {
    pagenum: usize,
    inner: SpinLock<PageFrameInner>,
    busy_wq: WaitQueue,
}

impl PageFrame {
    /// Creates a frame already marked `Busy`; the caller must fill it
    /// and call [`mark_ready`](Self::mark_ready) before anyone else may
    /// observe its content.
    pub fn new_busy(pagenum: usize, frame: Frame) -> Arc<Self> {
        Arc::new(Self {
            pagenum,
            inner: SpinLock::new(PageFrameInner {
                frame,
                flags: PageFrameFlags::BUSY,
            }),
            busy_wq: WaitQueue::new(),
        })
    }

    /// Creates a frame that is immediately ready, for callers (like
    /// `AnonObject::lookuppage`) that fill it synchronously before
    /// anyone else can reach it.
    pub fn new_ready(pagenum: usize, frame: Frame) -> Arc<Self> {
        Arc::new(Self {
            pagenum,
            inner: SpinLock::new(PageFrameInner {
                frame,
                flags: PageFrameFlags::empty(),
            }),
            busy_wq: WaitQueue::new(),
        })
    }

    pub fn pagenum(&self) -> usize {
        self.pagenum
    }

    pub fn phys_addr(&self) -> usize {
        self.inner.lock().frame.phys_addr()
    }

    pub fn is_dirty(&self) -> bool {
        self.inner.lock().flags.contains(PageFrameFlags::DIRTY)
    }

    pub fn is_pinned(&self) -> bool {
        self.inner.lock().flags.contains(PageFrameFlags::PINNED)
    }

    pub fn pin(&self) {
        self.inner.lock().flags.insert(PageFrameFlags::PINNED);
    }

    pub fn unpin(&self) {
        self.inner.lock().flags.remove(PageFrameFlags::PINNED);
    }

    pub fn mark_dirty(&self) {
        self.inner.lock().flags.insert(PageFrameFlags::DIRTY);
    }

    pub fn mark_clean(&self) {
        self.inner.lock().flags.remove(PageFrameFlags::DIRTY);
    }

    /// Clears `Busy` and wakes every thread parked waiting for this
    /// frame to settle.
    pub fn mark_ready(&self) {
        self.inner.lock().flags.remove(PageFrameFlags::BUSY);
        scheduler::broadcast_on(&self.busy_wq);
    }

    /// Blocks the current thread until the frame is no longer `Busy`.
    pub fn wait_until_ready(&self) {
        loop {
            if !self.inner.lock().flags.contains(PageFrameFlags::BUSY) {
                return;
            }
            scheduler::sleep_on(&self.busy_wq);
        }
    }

    pub fn read_into(&self, offset: usize, buf: &mut [u8]) {
        let inner = self.inner.lock();
        let bytes = inner.frame.as_bytes();
        let n = buf.len().min(PAGE_SIZE - offset);
        buf[..n].copy_from_slice(&bytes[offset..offset + n]);
    }

    pub fn write_from(&self, offset: usize, buf: &[u8]) {
        let mut inner = self.inner.lock();
        let n = buf.len().min(PAGE_SIZE - offset);
        inner.frame.as_bytes_mut()[offset..offset + n].copy_from_slice(&buf[..n]);
    }
}

/// The fixed operation set a memory object supplies (spec §4.J). A sum
/// type over {anon, shadow, file-backed} rather than a runtime class
/// hierarchy, per the base spec's "variant dispatch" guidance.
pub trait MemObject: Send + Sync {
    /// Returns the resident-or-faulted-in page for `pagenum`. When
    /// `forwrite` is true the returned frame is guaranteed writable
    /// (triggering COW materialization in shadow objects).
    fn lookuppage(&self, pagenum: usize, forwrite: bool) -> Result<Arc<PageFrame>>;

    /// Fills `frame` with this object's backing content (zero, or a
    /// file's bytes) and calls [`PageFrame::mark_ready`].
    fn fillpage(&self, frame: &Arc<PageFrame>) -> Result<()>;

    fn dirtypage(&self, frame: &Arc<PageFrame>) -> Result<()> {
        frame.mark_dirty();
        Ok(())
    }

    fn cleanpage(&self, frame: &Arc<PageFrame>) -> Result<()> {
        frame.mark_clean();
        Ok(())
    }

    /// Number of pages currently resident, for the `refcount >=
    /// resident_pages` garbage check (spec §8 invariant 5).
    fn resident_count(&self) -> usize;
}

/// Adds a reference to a memory object (spec §4.J `ref`). A plain `Arc`
/// clone.
pub fn mref(obj: &Arc<dyn MemObject>) -> Arc<dyn MemObject> {
    obj.clone()
}

/// Releases one reference (spec §4.J `put`). The base spec's "refcount
/// meets resident pages" garbage rule is `Arc`'s own drop-to-zero in
/// this crate: once every handle is gone the object, and the pages it
/// still owns, are freed by `Drop`.
pub fn mput(_obj: Arc<dyn MemObject>) {}
