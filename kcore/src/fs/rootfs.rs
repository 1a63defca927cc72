// SPDX-License-Identifier: MPL-2.0

//! The single process-global filesystem root (spec §1 Non-goals:
//! "mounting of multiple filesystems... optional stubs" — there is
//! exactly one mount, the root, and this module is that stub).

use lazy_static::lazy_static;

use crate::{
    fs::vnode::{DevId, VnodeKind},
    prelude::*,
};

lazy_static! {
    static ref ROOT: SpinLock<Option<Arc<crate::fs::vnode::Vnode>>> = SpinLock::new(None);
}

/// Installs `root` as the filesystem root. Must be called exactly once
/// before any path resolution happens.
pub fn init(root: Arc<crate::fs::vnode::Vnode>) {
    *ROOT.lock() = Some(root);
}

/// Returns the filesystem root vnode.
///
/// # Panics
/// If called before [`init`].
pub fn get() -> Arc<crate::fs::vnode::Vnode> {
    ROOT.lock()
        .clone()
        .expect("fs::rootfs::get called before init")
}

/// Creates the `/dev` device namespace (spec §2.1 "`/dev` bring-up",
/// §6 "Device namespace"): `/dev`, `/dev/null` (`1,0`), `/dev/zero`
/// (`1,1`), `/dev/tty0` (`2,0`). The embedder calls this once after
/// [`init`], from idle-process initialization.
pub fn devinit() -> Result<()> {
    let root = get();
    root.ops().mkdir(&root, "dev")?;
    let dev = root.ops().lookup(&root, "dev")?;
    dev.ops()
        .mknod(&dev, "null", VnodeKind::CharDevice(DevId::new(1, 0)))?;
    dev.ops()
        .mknod(&dev, "zero", VnodeKind::CharDevice(DevId::new(1, 1)))?;
    dev.ops()
        .mknod(&dev, "tty0", VnodeKind::CharDevice(DevId::new(2, 0)))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use serial_test::serial;

    use super::*;
    use crate::fs::ramfs::RamFs;

    // `ROOT` is a process-global static, so every test that touches it
    // must be `#[serial]` to avoid two tests' filesystems racing.
    #[test]
    #[serial]
    fn devinit_creates_dev_namespace() {
        let fs = RamFs::new();
        init(fs.root());
        devinit().unwrap();

        let root = get();
        let dev = root.ops().lookup(&root, "dev").unwrap();
        let null = dev.ops().lookup(&dev, "null").unwrap();
        assert_eq!(null.kind(), VnodeKind::CharDevice(DevId::new(1, 0)));
    }
}
