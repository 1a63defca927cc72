// SPDX-License-Identifier: MPL-2.0

//! Per-process address-space maps: `vmarea` and `vmmap` (spec §4.L).
//!
//! Areas are kept in a single `start`-sorted, non-overlapping list, as
//! the base spec requires (§8 invariant 4). Mutating fields (`start`,
//! `end`, `off`, the backing object) live behind a lock each so a
//! `VmArea` can be shared as an `Arc` the way vnodes and file objects
//! are, matching this crate's refcounting idiom.

use core::fmt;

use crate::{
    config::{PAGE_SIZE, USER_MEM_HIGH, USER_MEM_LOW},
    fs::vnode::Vnode,
    prelude::*,
    vm::{
        anon::AnonObject,
        mmobj::{mput, MemObject},
        shadow::ShadowObject,
    },
};

bitflags! {
    /// Page protection bits (spec §4.M page-fault handler: `area.prot &
    /// cause`).
    pub struct Prot: u32 {
        const READ = 1 << 0;
        const WRITE = 1 << 1;
        const EXEC = 1 << 2;
    }
}

bitflags! {
    /// `mmap` flags (spec §4.L `map`).
    pub struct MapFlags: u32 {
        const SHARED = 1 << 0;
        const PRIVATE = 1 << 1;
        const FIXED = 1 << 2;
        const ANON = 1 << 3;
    }
}

/// Search direction for [`VmMap::find_range`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dir {
    /// Lowest sufficient gap, ascending.
    LoHi,
    /// `gap_end - npages`, from the top down.
    HiLo,
}

struct VmAreaInner {
    start: usize,
    end: usize,
    off: usize,
    object: Option<Arc<dyn MemObject>>,
}

/// One mapped, contiguous range of virtual pages (spec §4.L, §3
/// "vmarea").
pub struct VmArea {
    pub prot: Prot,
    pub flags: MapFlags,
    inner: SpinLock<VmAreaInner>,
}

impl VmArea {
    pub fn new(start: usize, end: usize, off: usize, prot: Prot, flags: MapFlags) -> Arc<Self> {
        Arc::new(Self {
            prot,
            flags,
            inner: SpinLock::new(VmAreaInner {
                start,
                end,
                off,
                object: None,
            }),
        })
    }

    pub fn start(&self) -> usize {
        self.inner.lock().start
    }

    pub fn end(&self) -> usize {
        self.inner.lock().end
    }

    pub fn off(&self) -> usize {
        self.inner.lock().off
    }

    pub fn npages(&self) -> usize {
        self.end() - self.start()
    }

    pub fn contains(&self, pagenum: usize) -> bool {
        let inner = self.inner.lock();
        pagenum >= inner.start && pagenum < inner.end
    }

    pub fn object(&self) -> Option<Arc<dyn MemObject>> {
        self.inner.lock().object.clone()
    }

    pub fn set_object(&self, object: Arc<dyn MemObject>) {
        self.inner.lock().object = Some(object);
    }

    fn set_start(&self, start: usize) {
        self.inner.lock().start = start;
    }

    fn set_end(&self, end: usize) {
        self.inner.lock().end = end;
    }

    fn set_off(&self, off: usize) {
        self.inner.lock().off = off;
    }
}

impl fmt::Debug for VmArea {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("VmArea")
            .field("start", &inner.start)
            .field("end", &inner.end)
            .field("off", &inner.off)
            .field("prot", &self.prot)
            .field("flags", &self.flags)
            .field(
                "resident",
                &inner.object.as_ref().map(|o| o.resident_count()),
            )
            .finish()
    }
}

/// A process's address-space map: a sorted, non-overlapping list of
/// [`VmArea`]s (spec §4.L, §3 "vmmap").
pub struct VmMap {
    areas: SpinLock<Vec<Arc<VmArea>>>,
}

impl VmMap {
    pub fn new() -> Self {
        Self {
            areas: SpinLock::new(Vec::new()),
        }
    }

    /// Places `area` into the sorted list (spec §4.L `insert`).
    /// Preconditions: `start < end`; the range lies in
    /// `[USER_MEM_LOW, USER_MEM_HIGH)`.
    pub fn insert(&self, area: Arc<VmArea>) -> Result<()> {
        if area.start() >= area.end() {
            return_errno_with_message!(Errno::EINVAL, "vmarea start must precede end");
        }
        if area.start() < USER_MEM_LOW / PAGE_SIZE || area.end() > USER_MEM_HIGH / PAGE_SIZE {
            return_errno_with_message!(Errno::EINVAL, "vmarea outside user address space");
        }
        let mut areas = self.areas.lock();
        let pos = areas.partition_point(|a| a.start() < area.start());
        areas.insert(pos, area);
        Ok(())
    }

    /// First-fit search over the gaps between areas (spec §4.L
    /// `find_range`). Returns `None` if no gap of `npages` fits.
    pub fn find_range(&self, npages: usize, dir: Dir) -> Option<usize> {
        let areas = self.areas.lock();
        let lo = USER_MEM_LOW / PAGE_SIZE;
        let hi = USER_MEM_HIGH / PAGE_SIZE;

        let mut gaps = Vec::new();
        let mut cursor = lo;
        for area in areas.iter() {
            if area.start() > cursor {
                gaps.push((cursor, area.start()));
            }
            cursor = cursor.max(area.end());
        }
        if cursor < hi {
            gaps.push((cursor, hi));
        }

        match dir {
            Dir::LoHi => gaps
                .into_iter()
                .find(|(start, end)| end - start >= npages)
                .map(|(start, _)| start),
            Dir::HiLo => gaps
                .into_iter()
                .rev()
                .find(|(start, end)| end - start >= npages)
                .map(|(_, end)| end - npages),
        }
    }

    /// Linear scan for the area containing page `vfn` (spec §4.L
    /// `lookup`).
    pub fn lookup(&self, vfn: usize) -> Option<Arc<VmArea>> {
        self.areas
            .lock()
            .iter()
            .find(|a| a.contains(vfn))
            .cloned()
    }

    /// `true` iff no area overlaps `[start, start + npages)` (spec §4.L
    /// `is_range_empty`).
    pub fn is_range_empty(&self, start: usize, npages: usize) -> bool {
        let end = start + npages;
        self.areas
            .lock()
            .iter()
            .all(|a| a.end() <= start || a.start() >= end)
    }

    /// Mirrors every area's `start`/`end`/`off`/`prot`/`flags` into a
    /// fresh map; memory objects are left unset (spec §4.L `clone`:
    /// "the caller (fork) installs shadows").
    pub fn clone_areas(&self) -> VmMap {
        let cloned = VmMap::new();
        for area in self.areas.lock().iter() {
            let fresh = VmArea::new(area.start(), area.end(), area.off(), area.prot, area.flags);
            cloned.areas.lock().push(fresh);
        }
        cloned
    }

    /// Removes every area overlapping `[lopage, lopage + npages)`,
    /// splitting or shrinking edge areas as needed (spec §4.L `remove`).
    pub fn remove(&self, lopage: usize, npages: usize) -> Result<()> {
        let range_end = lopage + npages;
        let mut areas = self.areas.lock();
        let mut kept = Vec::new();

        for area in areas.drain(..) {
            let (start, end) = (area.start(), area.end());
            if end <= lopage || start >= range_end {
                // No overlap.
                kept.push(area);
                continue;
            }
            if lopage <= start && range_end >= end {
                // Case 4: region fully contains the area.
                if let Some(obj) = area.object() {
                    mput(obj);
                }
                continue;
            }
            if lopage > start && range_end < end {
                // Case 1: region fully inside the area; split in two.
                let left = VmArea::new(start, lopage, area.off(), area.prot, area.flags);
                let right_off = area.off() + (range_end - start);
                let right = VmArea::new(range_end, end, right_off, area.prot, area.flags);
                if let Some(obj) = area.object() {
                    left.set_object(obj.clone());
                    right.set_object(obj);
                }
                kept.push(left);
                kept.push(right);
                continue;
            }
            if lopage <= start {
                // Case 3: region overlaps the area's head.
                let advance = range_end - start;
                area.set_start(range_end);
                area.set_off(area.off() + advance);
                kept.push(area);
                continue;
            }
            // Case 2: region overlaps the area's tail.
            area.set_end(lopage);
            kept.push(area);
        }

        kept.sort_by_key(|a| a.start());
        *areas = kept;
        Ok(())
    }

    /// Picks a location (via `find_range` if `lopage == 0`, else by
    /// clearing any colliding mapping), attaches a memory object, and
    /// inserts the new area (spec §4.L `map`). Returns the base page
    /// number of the new mapping.
    #[allow(clippy::too_many_arguments)]
    pub fn map(
        &self,
        file: Option<&Arc<Vnode>>,
        lopage: usize,
        npages: usize,
        prot: Prot,
        flags: MapFlags,
        off: usize,
        dir: Dir,
    ) -> Result<usize> {
        let base = if lopage == 0 {
            self.find_range(npages, dir)
                .ok_or_else(|| Error::with_message(Errno::ENOMEM, "no free virtual range"))?
        } else {
            if !self.is_range_empty(lopage, npages) {
                self.remove(lopage, npages)?;
            }
            lopage
        };

        let object: Arc<dyn MemObject> = match file {
            Some(vnode) => vnode.ops().mmap(vnode)?,
            None => AnonObject::new(),
        };
        let object: Arc<dyn MemObject> = if flags.contains(MapFlags::PRIVATE) {
            ShadowObject::new(object)
        } else {
            object
        };

        let area = VmArea::new(base, base + npages, off, prot, flags);
        area.set_object(object);
        self.insert(area)?;
        Ok(base)
    }

    pub fn areas_snapshot(&self) -> Vec<Arc<VmArea>> {
        self.areas.lock().clone()
    }

    /// Installs a fresh area list wholesale, used by `fork` to populate
    /// a freshly created child's otherwise-empty map.
    pub fn install_areas(&self, areas: Vec<Arc<VmArea>>) {
        *self.areas.lock() = areas;
    }

    /// Empties the map without releasing each area's memory object;
    /// callers (`proc_cleanup`) are expected to `put` each object first.
    pub fn clear(&self) {
        self.areas.lock().clear();
    }
}

impl fmt::Debug for VmMap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.areas.lock().iter()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pages(n: usize) -> usize {
        USER_MEM_LOW / PAGE_SIZE + n
    }

    #[test]
    fn insert_keeps_areas_sorted_by_start() {
        let map = VmMap::new();
        map.insert(VmArea::new(pages(10), pages(12), 0, Prot::READ, MapFlags::PRIVATE))
            .unwrap();
        map.insert(VmArea::new(pages(0), pages(2), 0, Prot::READ, MapFlags::PRIVATE))
            .unwrap();
        let starts: Vec<_> = map.areas_snapshot().iter().map(|a| a.start()).collect();
        assert_eq!(starts, vec![pages(0), pages(10)]);
    }

    #[test]
    fn find_range_lohi_returns_first_sufficient_gap() {
        let map = VmMap::new();
        map.insert(VmArea::new(pages(0), pages(2), 0, Prot::READ, MapFlags::PRIVATE))
            .unwrap();
        map.insert(VmArea::new(pages(4), pages(6), 0, Prot::READ, MapFlags::PRIVATE))
            .unwrap();
        let found = map.find_range(2, Dir::LoHi).unwrap();
        assert_eq!(found, pages(2));
    }

    #[test]
    fn remove_splits_area_fully_inside_the_range() {
        let map = VmMap::new();
        let area = VmArea::new(pages(0), pages(10), 0, Prot::READ, MapFlags::PRIVATE);
        area.set_object(AnonObject::new());
        map.insert(area).unwrap();

        map.remove(pages(3), 2).unwrap();
        let starts: Vec<_> = map
            .areas_snapshot()
            .iter()
            .map(|a| (a.start(), a.end()))
            .collect();
        assert_eq!(starts, vec![(pages(0), pages(3)), (pages(5), pages(10))]);
    }

    #[test]
    fn remove_fully_containing_area_drops_it() {
        let map = VmMap::new();
        map.insert(VmArea::new(pages(0), pages(2), 0, Prot::READ, MapFlags::PRIVATE))
            .unwrap();
        map.remove(pages(0), 5).unwrap();
        assert!(map.areas_snapshot().is_empty());
    }

    #[test]
    fn clone_areas_mirrors_geometry_but_not_objects() {
        let map = VmMap::new();
        let area = VmArea::new(pages(0), pages(2), 0, Prot::READ, MapFlags::PRIVATE);
        area.set_object(AnonObject::new());
        map.insert(area).unwrap();

        let cloned = map.clone_areas();
        let snap = cloned.areas_snapshot();
        assert_eq!(snap.len(), 1);
        assert_eq!(snap[0].start(), pages(0));
        assert!(snap[0].object().is_none());
    }
}
