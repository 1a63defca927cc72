// SPDX-License-Identifier: MPL-2.0

//! File objects and the per-process file-descriptor table (spec §3
//! "File object", §4.G `fget`/`fput`/`fref`).
//!
//! As with [`crate::fs::vnode`], refcounting rides on `Arc`: `fget`
//! clones, `fput` drops, and "decrements to zero, `vput`s the vnode"
//! becomes `FileObject`'s `Drop` impl.

use crate::{config::NFILES, fs::vnode::Vnode, prelude::*};

bitflags! {
    /// File-object mode bits (spec §3 "File object", §6 "Open flag
    /// bits"). Access mode (`O_RDONLY`/`O_WRONLY`/`O_RDWR`) is encoded
    /// separately from `APPEND` because `O_RDONLY` is numerically zero
    /// and cannot be a flag bit.
    pub struct FileMode: u32 {
        const WRITE = 1 << 0;
        const APPEND = 1 << 1;
    }
}

/// Access mode requested at `open` (spec §6 "Open flag bits").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessMode {
    ReadOnly,
    WriteOnly,
    ReadWrite,
}

impl AccessMode {
    pub fn readable(self) -> bool {
        !matches!(self, AccessMode::WriteOnly)
    }

    pub fn writable(self) -> bool {
        !matches!(self, AccessMode::ReadOnly)
    }
}

bitflags! {
    /// `open`/`do_mknod` status flags (spec §6).
    pub struct OpenFlags: u32 {
        const O_CREAT = 1 << 0;
        const O_TRUNC = 1 << 1;
        const O_APPEND = 1 << 2;
    }
}

struct FileObjectInner {
    writable: bool,
    append: bool,
    pos: usize,
}

/// Shareable open-file state: mode bits, byte position, and a vnode
/// reference (spec §3 "File object"). Multiple fds may point at the
/// same `FileObject` via `dup`/`dup2`.
pub struct FileObject {
    vnode: Arc<Vnode>,
    inner: SpinLock<FileObjectInner>,
}

impl FileObject {
    pub fn new(vnode: Arc<Vnode>, access: AccessMode, flags: OpenFlags) -> Arc<Self> {
        Arc::new(Self {
            vnode,
            inner: SpinLock::new(FileObjectInner {
                writable: access.writable(),
                append: flags.contains(OpenFlags::O_APPEND),
                pos: 0,
            }),
        })
    }

    pub fn vnode(&self) -> &Arc<Vnode> {
        &self.vnode
    }

    pub fn is_writable(&self) -> bool {
        self.inner.lock().writable
    }

    pub fn is_appending(&self) -> bool {
        self.inner.lock().append
    }

    pub fn pos(&self) -> usize {
        self.inner.lock().pos
    }

    pub fn set_pos(&self, pos: usize) {
        self.inner.lock().pos = pos;
    }

    pub fn advance(&self, count: usize) {
        self.inner.lock().pos += count;
    }
}

/// Adds a reference to a file object held by fd `ofd`, or (if `ofd ==
/// -1`) allocates a fresh, not-yet-installed file object with refcount
/// one (spec §4.G `fget`).
pub fn fget_new(vnode: Arc<Vnode>, access: AccessMode, flags: OpenFlags) -> Arc<FileObject> {
    FileObject::new(vnode, access, flags)
}

/// Adds a reference to an existing file object (spec §4.G `fref`).
pub fn fref(file: &Arc<FileObject>) -> Arc<FileObject> {
    file.clone()
}

/// Releases one reference (spec §4.G `fput`). A plain drop: once the
/// last `Arc` is gone the embedded vnode reference is released too,
/// since `Vnode`'s own refcounting is `Arc`-based.
pub fn fput(_file: Arc<FileObject>) {}

/// A process's fixed-size table of open files (spec §3 Process
/// "file-descriptor table of size `NFILES`").
pub struct FdTable {
    slots: [Option<Arc<FileObject>>; NFILES],
}

impl Default for FdTable {
    fn default() -> Self {
        Self {
            slots: core::array::from_fn(|_| None),
        }
    }
}

impl FdTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, fd: i32) -> Option<Arc<FileObject>> {
        let idx = usize::try_from(fd).ok()?;
        self.slots.get(idx)?.clone()
    }

    /// Finds the lowest-numbered empty slot and installs `file`. Returns
    /// `EMFILE` if the table is full.
    pub fn install(&mut self, file: Arc<FileObject>) -> Result<i32> {
        for (idx, slot) in self.slots.iter_mut().enumerate() {
            if slot.is_none() {
                *slot = Some(file);
                return Ok(idx as i32);
            }
        }
        return_errno_with_message!(Errno::EMFILE, "file descriptor table is full");
    }

    /// Installs `file` at exactly `fd`, replacing whatever was there
    /// (spec §4.I `do_dup2`'s override case). Returns the file object
    /// being replaced, if any, so the caller can `fput` it.
    pub fn install_at(&mut self, fd: i32, file: Arc<FileObject>) -> Option<Arc<FileObject>> {
        let idx = usize::try_from(fd).ok()?;
        let slot = self.slots.get_mut(idx)?;
        slot.replace(file)
    }

    /// Clears a slot, returning its previous contents so the caller can
    /// `fput` exactly once (spec §4.I `do_close`, fixing the source's
    /// double-`fput` bug: the contract here is a single release matching
    /// the single reference the table held).
    pub fn take(&mut self, fd: i32) -> Option<Arc<FileObject>> {
        let idx = usize::try_from(fd).ok()?;
        self.slots.get_mut(idx)?.take()
    }

    pub fn is_valid_fd(fd: i32) -> bool {
        usize::try_from(fd).is_ok_and(|idx| idx < NFILES)
    }

    /// Clones every occupied slot, `fref`-ing each file object (spec
    /// §4.F `fork` step 5).
    pub fn fork(&self) -> Self {
        Self {
            slots: core::array::from_fn(|i| self.slots[i].as_ref().map(fref)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::ramfs::RamFs;

    fn test_file() -> Arc<FileObject> {
        let fs = RamFs::new();
        let root = fs.root();
        let vnode = root.ops().create(&root, "f").unwrap();
        FileObject::new(vnode, AccessMode::ReadWrite, OpenFlags::empty())
    }

    #[test]
    fn install_finds_lowest_free_slot() {
        let mut table = FdTable::new();
        let a = table.install(test_file()).unwrap();
        let b = table.install(test_file()).unwrap();
        assert_eq!(a, 0);
        assert_eq!(b, 1);
        table.take(0);
        let c = table.install(test_file()).unwrap();
        assert_eq!(c, 0);
    }

    #[test]
    fn fork_shares_underlying_file_object() {
        let mut table = FdTable::new();
        let fd = table.install(test_file()).unwrap();
        let cloned = table.fork();
        assert!(Arc::ptr_eq(
            &table.get(fd).unwrap(),
            &cloned.get(fd).unwrap()
        ));
    }

    #[test]
    fn install_fails_when_table_is_full() {
        let mut table = FdTable::new();
        for _ in 0..NFILES {
            table.install(test_file()).unwrap();
        }
        assert_eq!(
            table.install(test_file()).unwrap_err().error(),
            Errno::EMFILE
        );
    }
}
