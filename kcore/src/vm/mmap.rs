// SPDX-License-Identifier: MPL-2.0

//! `mmap`/`munmap` syscalls and the user-mode page-fault handler (spec
//! §4.M).
//!
//! Parameterized over [`VmContext`] for the same reason
//! [`crate::fs::syscall`] is parameterized over `FsContext`: this module
//! needs "the current process's address-space map and hardware
//! collaborators" without depending concretely on `process::Process`.

use crate::{
    collab::{PageTable, TlbFlusher},
    config::PAGE_SIZE,
    fs::vnode::Vnode,
    prelude::*,
    vm::vmarea::{Dir, MapFlags, Prot, VmMap},
};

/// The process-level state `do_mmap`/`do_munmap`/the fault handler need.
pub trait VmContext {
    fn vmmap(&self) -> &VmMap;
    fn page_table(&self) -> &Arc<dyn PageTable>;
    fn tlb(&self) -> &Arc<dyn TlbFlusher>;
}

/// Why a user-mode access faulted (spec §4.M "Page-fault handler").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultCause {
    Read,
    Write,
    Exec,
}

impl FaultCause {
    fn required_prot(self) -> Prot {
        match self {
            FaultCause::Read => Prot::READ,
            FaultCause::Write => Prot::WRITE,
            FaultCause::Exec => Prot::EXEC,
        }
    }
}

fn page_align(x: usize) -> bool {
    x % PAGE_SIZE == 0
}

fn page_count(len: usize) -> usize {
    len.div_ceil(PAGE_SIZE)
}

/// spec §4.M `do_mmap`. `file` is `None` for `MAP_ANON`. Returns the
/// base virtual address of the new mapping.
pub fn do_mmap(
    ctx: &impl VmContext,
    addr: usize,
    len: usize,
    prot: Prot,
    flags: MapFlags,
    file: Option<Arc<Vnode>>,
    off: usize,
) -> Result<usize> {
    if len == 0 {
        return_errno_with_message!(Errno::EINVAL, "mmap length must be nonzero");
    }
    len.checked_add(off)
        .ok_or_else(|| Error::with_message(Errno::EINVAL, "len + off overflows"))?;
    if !page_align(off) {
        return_errno_with_message!(Errno::EINVAL, "mmap offset must be page-aligned");
    }
    if flags.contains(MapFlags::FIXED) && !page_align(addr) {
        return_errno_with_message!(Errno::EINVAL, "MAP_FIXED address must be page-aligned");
    }
    if flags.contains(MapFlags::ANON) && file.is_some() {
        return_errno_with_message!(Errno::EINVAL, "MAP_ANON is incompatible with a backing file");
    }

    let npages = page_count(len);
    let lopage = if flags.contains(MapFlags::FIXED) {
        addr / PAGE_SIZE
    } else {
        0
    };

    let base = ctx.vmmap().map(
        file.as_ref(),
        lopage,
        npages,
        prot,
        flags,
        off / PAGE_SIZE,
        Dir::LoHi,
    )?;

    let base_addr = base * PAGE_SIZE;
    ctx.tlb().flush(base_addr);
    Ok(base_addr)
}

/// spec §4.M `do_munmap`.
pub fn do_munmap(ctx: &impl VmContext, addr: usize, len: usize) -> Result<()> {
    if len == 0 {
        return_errno_with_message!(Errno::EINVAL, "munmap length must be nonzero");
    }
    if !page_align(addr) {
        return_errno_with_message!(Errno::EINVAL, "munmap address must be page-aligned");
    }
    let lopage = addr / PAGE_SIZE;
    ctx.vmmap().remove(lopage, page_count(len))?;
    ctx.tlb().flush(addr);
    Ok(())
}

/// spec §4.M "Page-fault handler". `Err(Errno::EFAULT)` means the
/// current process has no right to this address; the caller (the
/// process layer, which owns the running thread) is responsible for
/// killing the process with that status, matching §7's "an unexpected
/// user-mode page fault ... kills the process with exit status
/// `EFAULT`".
pub fn handle_page_fault(ctx: &impl VmContext, vaddr: usize, cause: FaultCause) -> Result<()> {
    let pagenum = vaddr / PAGE_SIZE;
    let area = ctx.vmmap().lookup(pagenum).ok_or_else(|| {
        warn!("page fault at {vaddr:#x} ({cause:?}): no mapping covers this address");
        Error::with_message(Errno::EFAULT, "no mapping covers this address")
    })?;

    if !area.prot.contains(cause.required_prot()) {
        warn!("page fault at {vaddr:#x} ({cause:?}): violates area protection bits");
        return_errno_with_message!(Errno::EFAULT, "access violates the area's protection bits");
    }

    let object = area
        .object()
        .ok_or_else(|| Error::with_message(Errno::EFAULT, "area has no backing object"))?;
    let forwrite = cause == FaultCause::Write;
    let obj_pagenum = area.off() + (pagenum - area.start());
    let frame = object.lookuppage(obj_pagenum, forwrite)?;
    trace!("page fault at {vaddr:#x} ({cause:?}) resolved to frame {:#x}", frame.phys_addr());

    ctx.page_table()
        .map(vaddr, frame.phys_addr(), forwrite);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collab::sim::{NullTlbFlusher, SimPageTable};

    struct TestCtx {
        map: VmMap,
        pt: Arc<dyn PageTable>,
        tlb: Arc<dyn TlbFlusher>,
    }

    impl TestCtx {
        fn new() -> Self {
            Self {
                map: VmMap::new(),
                pt: SimPageTable::new(),
                tlb: Arc::new(NullTlbFlusher),
            }
        }
    }

    impl VmContext for TestCtx {
        fn vmmap(&self) -> &VmMap {
            &self.map
        }
        fn page_table(&self) -> &Arc<dyn PageTable> {
            &self.pt
        }
        fn tlb(&self) -> &Arc<dyn TlbFlusher> {
            &self.tlb
        }
    }

    #[test]
    fn anon_mmap_then_fault_installs_a_mapping() {
        let ctx = TestCtx::new();
        let base = do_mmap(
            &ctx,
            0,
            PAGE_SIZE,
            Prot::READ | Prot::WRITE,
            MapFlags::PRIVATE | MapFlags::ANON,
            None,
            0,
        )
        .unwrap();

        handle_page_fault(&ctx, base, FaultCause::Write).unwrap();
        assert!(ctx.page_table().query(base).unwrap().present);
    }

    #[test]
    fn fault_outside_any_mapping_is_efault() {
        let ctx = TestCtx::new();
        assert_eq!(
            handle_page_fault(&ctx, 0x5000, FaultCause::Read)
                .unwrap_err()
                .error(),
            Errno::EFAULT
        );
    }

    #[test]
    fn write_fault_on_read_only_area_is_efault() {
        let ctx = TestCtx::new();
        let base = do_mmap(&ctx, 0, PAGE_SIZE, Prot::READ, MapFlags::PRIVATE | MapFlags::ANON, None, 0).unwrap();
        assert_eq!(
            handle_page_fault(&ctx, base, FaultCause::Write)
                .unwrap_err()
                .error(),
            Errno::EFAULT
        );
    }

    #[test]
    fn munmap_then_fault_is_efault_again() {
        let ctx = TestCtx::new();
        let base = do_mmap(&ctx, 0, PAGE_SIZE, Prot::READ, MapFlags::PRIVATE | MapFlags::ANON, None, 0).unwrap();
        do_munmap(&ctx, base, PAGE_SIZE).unwrap();
        assert_eq!(
            handle_page_fault(&ctx, base, FaultCause::Read)
                .unwrap_err()
                .error(),
            Errno::EFAULT
        );
    }

    #[test]
    fn mmap_rejects_zero_length() {
        let ctx = TestCtx::new();
        assert_eq!(
            do_mmap(&ctx, 0, 0, Prot::READ, MapFlags::ANON, None, 0)
                .unwrap_err()
                .error(),
            Errno::EINVAL
        );
    }
}
