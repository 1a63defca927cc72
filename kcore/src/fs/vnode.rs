// SPDX-License-Identifier: MPL-2.0

//! Vnodes and the filesystem operations table (spec §3 "Vnode", §4.G,
//! §6 "VFS filesystem contract").
//!
//! Grounded on `kernel/aster-nix/src/fs/utils/fs.rs`'s `FileSystem`
//! trait and the `Inode`-table pattern it dispatches through (the
//! `Inode` trait itself was not retrieved in the example pack; this
//! module's `VnodeOps` plays the same dispatch role, sized to exactly
//! the operation set spec §3 lists). Refcounting is `Arc`'s own: `vget`
//! is a clone, `vput` is a drop, and the "refcount reaches zero" case
//! the spec calls out is simply `Vnode`'s `Drop` impl — Rust's ownership
//! model *is* the refcount discipline the spec asks for, expressed
//! idiomatically instead of with manual inc/dec calls.

use core::fmt;

use crate::{prelude::*, vm::mmobj::MemObject};

/// What kind of file a vnode names (spec §6 "Mode bits").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VnodeKind {
    Regular,
    Directory,
    CharDevice(DevId),
    BlockDevice(DevId),
}

impl VnodeKind {
    pub fn is_dir(&self) -> bool {
        matches!(self, VnodeKind::Directory)
    }
}

/// Major/minor device number pair, spec §6 "Device namespace".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DevId {
    pub major: u32,
    pub minor: u32,
}

impl DevId {
    pub const fn new(major: u32, minor: u32) -> Self {
        Self { major, minor }
    }
}

/// The result of `do_stat` (spec §4.I `do_stat`).
#[derive(Debug, Clone, Copy)]
pub struct Stat {
    pub ino: u64,
    pub kind: VnodeKind,
    pub len: usize,
}

/// One directory entry, as produced by `readdir` (spec §4.I
/// `do_getdent`). Kept as a plain struct rather than a packed C
/// `dirent` buffer: the struct *is* the decoded result, which is the
/// idiomatic Rust shape for this operation.
#[derive(Debug, Clone)]
pub struct Dirent {
    pub ino: u64,
    pub name: String,
}

/// The fixed set of operations a filesystem supplies per vnode (spec
/// §3 Vnode "operations table", §6 "VFS filesystem contract"). The core
/// never interprets on-disk structures; it only dispatches through this
/// trait.
pub trait VnodeOps: Send + Sync {
    fn lookup(&self, dir: &Arc<Vnode>, name: &str) -> Result<Arc<Vnode>>;
    fn create(&self, dir: &Arc<Vnode>, name: &str) -> Result<Arc<Vnode>>;
    fn mkdir(&self, dir: &Arc<Vnode>, name: &str) -> Result<()>;
    fn rmdir(&self, dir: &Arc<Vnode>, name: &str) -> Result<()>;
    fn mknod(&self, dir: &Arc<Vnode>, name: &str, kind: VnodeKind) -> Result<()>;
    fn link(&self, dir: &Arc<Vnode>, target: &Arc<Vnode>, name: &str) -> Result<()>;
    fn unlink(&self, dir: &Arc<Vnode>, name: &str) -> Result<()>;
    fn rename(
        &self,
        old_dir: &Arc<Vnode>,
        old_name: &str,
        new_dir: &Arc<Vnode>,
        new_name: &str,
    ) -> Result<()>;
    fn read(&self, vnode: &Vnode, offset: usize, buf: &mut [u8]) -> Result<usize>;
    fn write(&self, vnode: &Vnode, offset: usize, buf: &[u8]) -> Result<usize>;
    /// Returns the entry at `index` (an opaque, monotonically-advancing
    /// cursor; `do_getdent` drives it with `f_pos`), or `None` at
    /// end-of-directory.
    fn readdir(&self, vnode: &Vnode, index: usize) -> Result<Option<Dirent>>;
    fn stat(&self, vnode: &Vnode) -> Result<Stat>;
    /// Returns a memory object backing this vnode for `mmap`. Filesystems
    /// that do not support mapping (most character/block devices) return
    /// `ENODEV`.
    fn mmap(&self, vnode: &Arc<Vnode>) -> Result<Arc<dyn MemObject>>;
}

/// A refcounted handle onto a filesystem inode (spec §3 "Vnode").
///
/// `ino`/`kind` are fixed at creation; `len` changes as the backing file
/// grows (tracked separately from the filesystem's own inode table so
/// `stat` can read it without re-dispatching through `ops`).
pub struct Vnode {
    pub ino: u64,
    kind: SpinLock<VnodeKind>,
    len: SpinLock<usize>,
    ops: Arc<dyn VnodeOps>,
}

impl Vnode {
    pub fn new(ino: u64, kind: VnodeKind, ops: Arc<dyn VnodeOps>) -> Arc<Self> {
        Arc::new(Self {
            ino,
            kind: SpinLock::new(kind),
            len: SpinLock::new(0),
            ops,
        })
    }

    pub fn ops(&self) -> &Arc<dyn VnodeOps> {
        &self.ops
    }

    pub fn kind(&self) -> VnodeKind {
        *self.kind.lock()
    }

    pub fn set_kind(&self, kind: VnodeKind) {
        *self.kind.lock() = kind;
    }

    pub fn is_dir(&self) -> bool {
        self.kind().is_dir()
    }

    pub fn len(&self) -> usize {
        *self.len.lock()
    }

    pub fn set_len(&self, len: usize) {
        *self.len.lock() = len;
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of outstanding handles to this vnode, spec §3 "refcount".
    /// Backed by `Arc::strong_count`, which is exactly what the spec's
    /// manual refcount tracks.
    pub fn refcount(self: &Arc<Self>) -> usize {
        Arc::strong_count(self)
    }
}

impl fmt::Debug for Vnode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Vnode")
            .field("ino", &self.ino)
            .field("kind", &self.kind())
            .field("len", &self.len())
            .finish()
    }
}

/// Increments a vnode's refcount (spec §4.G `vget`). A plain `Arc`
/// clone: every successful lookup/open path-resolution step is expected
/// to hand the caller one of these.
pub fn vget(vnode: &Arc<Vnode>) -> Arc<Vnode> {
    vnode.clone()
}

/// Balances a `vget`/lookup-returned reference (spec §4.G `vput`). A
/// plain drop: when the last `Arc` goes away the vnode itself is freed.
pub fn vput(_vnode: Arc<Vnode>) {}

/// Adds a reference to a vnode held elsewhere (e.g. cloning a cwd
/// pointer on `fork`), spec §4.F step 5 "`vref`".
pub fn vref(vnode: &Arc<Vnode>) -> Arc<Vnode> {
    vnode.clone()
}
