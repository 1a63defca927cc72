// SPDX-License-Identifier: MPL-2.0

//! A minimal in-memory filesystem implementing [`VnodeOps`] (spec §6
//! "VFS filesystem contract": "A filesystem supplies a vnode-operations
//! table ... the core never interprets on-disk structures; it only
//! dispatches").
//!
//! The base spec assumes a pluggable on-disk filesystem and places real
//! ones out of scope; this module is the minimal implementation needed
//! to exercise the VFS syscalls end to end (and to host `/dev`, spec §6
//! "Device namespace") without a real disk. Grounded on the *shape* of
//! `kernel/aster-nix/src/fs/ramfs` (an inode table keyed by a monotonic
//! number, directories as name-to-ino maps) though that module's actual
//! source was not retrieved in the example pack; here the table is a
//! single `SpinLock`-protected struct rather than per-inode locks, which
//! is adequate for a single-core cooperative kernel with no true
//! concurrent access.

use crate::{
    fs::vnode::{DevId, Dirent, Stat, Vnode, VnodeKind, VnodeOps},
    prelude::*,
    vm::mmobj::MemObject,
};

const ROOT_INO: u64 = 1;

enum RamNodeData {
    Dir(BTreeMap<String, u64>),
    File(Vec<u8>),
    Device(DevId),
}

struct RamNode {
    parent: u64,
    data: RamNodeData,
}

struct RamFsInner {
    next_ino: u64,
    nodes: BTreeMap<u64, RamNode>,
    vnodes: BTreeMap<u64, Arc<Vnode>>,
}

/// An in-memory filesystem: every vnode it hands out carries `self`
/// (via `Arc<dyn VnodeOps>`) as its operations table.
pub struct RamFs {
    self_weak: Weak<RamFs>,
    inner: SpinLock<RamFsInner>,
}

impl RamFs {
    pub fn new() -> Arc<Self> {
        let fs = Arc::new_cyclic(|weak| Self {
            self_weak: weak.clone(),
            inner: SpinLock::new(RamFsInner {
                next_ino: ROOT_INO + 1,
                nodes: BTreeMap::new(),
                vnodes: BTreeMap::new(),
            }),
        });
        fs.inner.lock().nodes.insert(
            ROOT_INO,
            RamNode {
                parent: ROOT_INO,
                data: RamNodeData::Dir(BTreeMap::new()),
            },
        );
        let root = Vnode::new(ROOT_INO, VnodeKind::Directory, fs.self_arc());
        fs.inner.lock().vnodes.insert(ROOT_INO, root);
        fs
    }

    /// Recovers an `Arc<RamFs>` coerced to the `VnodeOps` trait object
    /// every vnode this filesystem creates needs to store. Every `RamFs`
    /// is always reached through the `Arc` produced by `new`, so the
    /// weak reference captured at construction is always upgradable for
    /// as long as `self` is reachable.
    fn self_arc(&self) -> Arc<dyn VnodeOps> {
        self.self_weak
            .upgrade()
            .expect("RamFs dropped while a method on it is executing")
    }

    pub fn root(&self) -> Arc<Vnode> {
        self.inner.lock().vnodes.get(&ROOT_INO).unwrap().clone()
    }

    fn cached_vnode(&self, ino: u64) -> Arc<Vnode> {
        self.inner.lock().vnodes.get(&ino).unwrap().clone()
    }

    fn alloc_ino(&self) -> u64 {
        let mut inner = self.inner.lock();
        let ino = inner.next_ino;
        inner.next_ino += 1;
        ino
    }

    fn dir_lookup_ino(&self, dir_ino: u64, name: &str) -> Result<u64> {
        let inner = self.inner.lock();
        let node = inner.nodes.get(&dir_ino).expect("dangling directory ino");
        match &node.data {
            RamNodeData::Dir(entries) => entries
                .get(name)
                .copied()
                .ok_or_else(|| Error::new(Errno::ENOENT)),
            _ => Err(Error::new(Errno::ENOTDIR)),
        }
    }

    fn insert_child(
        &self,
        parent_ino: u64,
        name: &str,
        ino: u64,
        parent_for_child: u64,
        data: RamNodeData,
        kind: VnodeKind,
    ) -> Result<Arc<Vnode>> {
        let mut inner = self.inner.lock();
        {
            let parent = inner
                .nodes
                .get_mut(&parent_ino)
                .expect("dangling directory ino");
            let RamNodeData::Dir(entries) = &mut parent.data else {
                return_errno!(Errno::ENOTDIR);
            };
            if entries.contains_key(name) {
                return_errno!(Errno::EEXIST);
            }
            entries.insert(name.to_string(), ino);
        }
        inner.nodes.insert(
            ino,
            RamNode {
                parent: parent_for_child,
                data,
            },
        );
        drop(inner);
        let vnode = Vnode::new(ino, kind, self.self_arc());
        self.inner.lock().vnodes.insert(ino, vnode.clone());
        Ok(vnode)
    }
}

impl VnodeOps for RamFs {
    fn lookup(&self, dir: &Arc<Vnode>, name: &str) -> Result<Arc<Vnode>> {
        if !dir.is_dir() {
            return_errno!(Errno::ENOTDIR);
        }
        if name == "." {
            return Ok(dir.clone());
        }
        if name == ".." {
            let parent_ino = self.inner.lock().nodes.get(&dir.ino).unwrap().parent;
            return Ok(self.cached_vnode(parent_ino));
        }
        let ino = self.dir_lookup_ino(dir.ino, name)?;
        Ok(self.cached_vnode(ino))
    }

    fn create(&self, dir: &Arc<Vnode>, name: &str) -> Result<Arc<Vnode>> {
        if !dir.is_dir() {
            return_errno!(Errno::ENOTDIR);
        }
        let ino = self.alloc_ino();
        self.insert_child(
            dir.ino,
            name,
            ino,
            dir.ino,
            RamNodeData::File(Vec::new()),
            VnodeKind::Regular,
        )
    }

    fn mkdir(&self, dir: &Arc<Vnode>, name: &str) -> Result<()> {
        if !dir.is_dir() {
            return_errno!(Errno::ENOTDIR);
        }
        let ino = self.alloc_ino();
        self.insert_child(
            dir.ino,
            name,
            ino,
            dir.ino,
            RamNodeData::Dir(BTreeMap::new()),
            VnodeKind::Directory,
        )?;
        Ok(())
    }

    fn rmdir(&self, dir: &Arc<Vnode>, name: &str) -> Result<()> {
        let ino = self.dir_lookup_ino(dir.ino, name)?;
        let mut inner = self.inner.lock();
        let is_empty_dir = match &inner.nodes.get(&ino).unwrap().data {
            RamNodeData::Dir(entries) => entries.is_empty(),
            _ => return_errno!(Errno::ENOTDIR),
        };
        if !is_empty_dir {
            return_errno!(Errno::ENOTEMPTY);
        }
        inner.nodes.remove(&ino);
        inner.vnodes.remove(&ino);
        if let RamNodeData::Dir(entries) = &mut inner.nodes.get_mut(&dir.ino).unwrap().data {
            entries.remove(name);
        }
        Ok(())
    }

    fn mknod(&self, dir: &Arc<Vnode>, name: &str, kind: VnodeKind) -> Result<()> {
        if !dir.is_dir() {
            return_errno!(Errno::ENOTDIR);
        }
        let dev = match kind {
            VnodeKind::CharDevice(d) | VnodeKind::BlockDevice(d) => d,
            _ => return_errno_with_message!(Errno::EINVAL, "mknod kind must be a device"),
        };
        let ino = self.alloc_ino();
        self.insert_child(
            dir.ino,
            name,
            ino,
            dir.ino,
            RamNodeData::Device(dev),
            kind,
        )?;
        Ok(())
    }

    fn link(&self, dir: &Arc<Vnode>, target: &Arc<Vnode>, name: &str) -> Result<()> {
        if !dir.is_dir() {
            return_errno!(Errno::ENOTDIR);
        }
        if target.is_dir() {
            return_errno!(Errno::EISDIR);
        }
        let mut inner = self.inner.lock();
        let parent = inner.nodes.get_mut(&dir.ino).expect("dangling directory");
        let RamNodeData::Dir(entries) = &mut parent.data else {
            return_errno!(Errno::ENOTDIR);
        };
        if entries.contains_key(name) {
            return_errno!(Errno::EEXIST);
        }
        entries.insert(name.to_string(), target.ino);
        Ok(())
    }

    fn unlink(&self, dir: &Arc<Vnode>, name: &str) -> Result<()> {
        let ino = self.dir_lookup_ino(dir.ino, name)?;
        let mut inner = self.inner.lock();
        if let RamNodeData::Dir(_) = inner.nodes.get(&ino).unwrap().data {
            return_errno!(Errno::EISDIR);
        }
        if let RamNodeData::Dir(entries) = &mut inner.nodes.get_mut(&dir.ino).unwrap().data {
            entries.remove(name);
        }
        Ok(())
    }

    fn rename(
        &self,
        old_dir: &Arc<Vnode>,
        old_name: &str,
        new_dir: &Arc<Vnode>,
        new_name: &str,
    ) -> Result<()> {
        let ino = self.dir_lookup_ino(old_dir.ino, old_name)?;
        {
            let mut inner = self.inner.lock();
            let parent = inner
                .nodes
                .get_mut(&new_dir.ino)
                .expect("dangling directory");
            let RamNodeData::Dir(entries) = &mut parent.data else {
                return_errno!(Errno::ENOTDIR);
            };
            if entries.contains_key(new_name) {
                return_errno!(Errno::EEXIST);
            }
            entries.insert(new_name.to_string(), ino);
        }
        let mut inner = self.inner.lock();
        if let RamNodeData::Dir(entries) = &mut inner.nodes.get_mut(&old_dir.ino).unwrap().data {
            entries.remove(old_name);
        }
        Ok(())
    }

    fn read(&self, vnode: &Vnode, offset: usize, buf: &mut [u8]) -> Result<usize> {
        let inner = self.inner.lock();
        match &inner.nodes.get(&vnode.ino).unwrap().data {
            RamNodeData::File(bytes) => {
                if offset >= bytes.len() {
                    return Ok(0);
                }
                let n = buf.len().min(bytes.len() - offset);
                buf[..n].copy_from_slice(&bytes[offset..offset + n]);
                Ok(n)
            }
            RamNodeData::Device(dev) => Ok(device_read(*dev, buf)),
            RamNodeData::Dir(_) => return_errno!(Errno::EISDIR),
        }
    }

    fn write(&self, vnode: &Vnode, offset: usize, buf: &[u8]) -> Result<usize> {
        let mut inner = self.inner.lock();
        match &mut inner.nodes.get_mut(&vnode.ino).unwrap().data {
            RamNodeData::File(bytes) => {
                let end = offset + buf.len();
                if bytes.len() < end {
                    bytes.resize(end, 0);
                }
                bytes[offset..end].copy_from_slice(buf);
                drop(inner);
                vnode.set_len(end.max(vnode.len()));
                Ok(buf.len())
            }
            RamNodeData::Device(dev) => Ok(device_write(*dev, buf)),
            RamNodeData::Dir(_) => return_errno!(Errno::EISDIR),
        }
    }

    fn readdir(&self, vnode: &Vnode, index: usize) -> Result<Option<Dirent>> {
        let inner = self.inner.lock();
        let node = inner.nodes.get(&vnode.ino).unwrap();
        let RamNodeData::Dir(entries) = &node.data else {
            return_errno!(Errno::ENOTDIR);
        };
        if index == 0 {
            return Ok(Some(Dirent {
                ino: vnode.ino,
                name: ".".to_string(),
            }));
        }
        if index == 1 {
            return Ok(Some(Dirent {
                ino: node.parent,
                name: "..".to_string(),
            }));
        }
        Ok(entries
            .iter()
            .nth(index - 2)
            .map(|(name, ino)| Dirent {
                ino: *ino,
                name: name.clone(),
            }))
    }

    fn stat(&self, vnode: &Vnode) -> Result<Stat> {
        Ok(Stat {
            ino: vnode.ino,
            kind: vnode.kind(),
            len: vnode.len(),
        })
    }

    fn mmap(&self, vnode: &Arc<Vnode>) -> Result<Arc<dyn MemObject>> {
        if vnode.is_dir() {
            return_errno!(Errno::EISDIR);
        }
        Ok(crate::vm::anon::AnonObject::new())
    }
}

fn device_read(dev: DevId, buf: &mut [u8]) -> usize {
    match (dev.major, dev.minor) {
        (1, 1) => {
            // /dev/zero
            buf.fill(0);
            buf.len()
        }
        _ => 0, // /dev/null, /dev/tty0: always EOF on read
    }
}

fn device_write(_dev: DevId, buf: &[u8]) -> usize {
    // /dev/null, /dev/zero, /dev/tty0 all discard writes successfully.
    buf.len()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_then_lookup_round_trips() {
        let fs = RamFs::new();
        let root = fs.root();
        let child = root.ops().create(&root, "a.txt").unwrap();
        let found = root.ops().lookup(&root, "a.txt").unwrap();
        assert_eq!(found.ino, child.ino);
    }

    #[test]
    fn dot_and_dotdot_resolve() {
        let fs = RamFs::new();
        let root = fs.root();
        root.ops().mkdir(&root, "sub").unwrap();
        let sub = root.ops().lookup(&root, "sub").unwrap();
        let dot = sub.ops().lookup(&sub, ".").unwrap();
        let dotdot = sub.ops().lookup(&sub, "..").unwrap();
        assert_eq!(dot.ino, sub.ino);
        assert_eq!(dotdot.ino, root.ino);
    }

    #[test]
    fn rmdir_requires_empty_directory() {
        let fs = RamFs::new();
        let root = fs.root();
        root.ops().mkdir(&root, "sub").unwrap();
        let sub = root.ops().lookup(&root, "sub").unwrap();
        sub.ops().create(&sub, "f").unwrap();
        assert_eq!(
            root.ops().rmdir(&root, "sub").unwrap_err().error(),
            Errno::ENOTEMPTY
        );
    }

    #[test]
    fn write_then_read_round_trips() {
        let fs = RamFs::new();
        let root = fs.root();
        let file = root.ops().create(&root, "f").unwrap();
        let n = root.ops().write(&file, 0, b"hello").unwrap();
        assert_eq!(n, 5);
        let mut buf = [0u8; 5];
        let n = root.ops().read(&file, 0, &mut buf).unwrap();
        assert_eq!(n, 5);
        assert_eq!(&buf, b"hello");
    }

    #[test]
    fn dev_zero_fills_and_dev_null_reads_empty() {
        let fs = RamFs::new();
        let root = fs.root();
        root.ops()
            .mknod(&root, "zero", VnodeKind::CharDevice(DevId::new(1, 1)))
            .unwrap();
        root.ops()
            .mknod(&root, "null", VnodeKind::CharDevice(DevId::new(1, 0)))
            .unwrap();
        let zero = root.ops().lookup(&root, "zero").unwrap();
        let null = root.ops().lookup(&root, "null").unwrap();

        let mut buf = [0xffu8; 4];
        assert_eq!(root.ops().read(&zero, 0, &mut buf).unwrap(), 4);
        assert_eq!(buf, [0u8; 4]);

        let mut buf = [0xffu8; 4];
        assert_eq!(root.ops().read(&null, 0, &mut buf).unwrap(), 0);
    }
}
