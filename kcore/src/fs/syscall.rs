// SPDX-License-Identifier: MPL-2.0

//! The VFS syscall surface (spec §4.I).
//!
//! Every function here restores, on every exit path including errors,
//! the refcounts of every vnode it touched plus exactly what its own
//! contract promises (spec §4.I "Refcount law") — in this crate that
//! guarantee comes for free from RAII: a `Arc<Vnode>` picked up with
//! `lookup`/`vget` that is not threaded into a long-lived slot (a cwd
//! cell, an fd table entry) is simply dropped at end of scope.
//!
//! Calls are parameterized over [`FsContext`] rather than taking a
//! concrete `Process` directly, so this module has no dependency on the
//! process layer above it (spec §2 dependency order has `I` feeding
//! `F`, not the other way around) while still getting "the current
//! process's open fds/cwd" the way spec §9 "Global mutable state" asks
//! for: passed in explicitly rather than read from an ambient global.

use crate::{
    config::MAXPATHLEN,
    fs::{
        file::{AccessMode, FdTable, FileObject, OpenFlags},
        path,
        vnode::{vput, vref, Dirent, Stat, Vnode, VnodeKind},
    },
    prelude::*,
};

/// Whence argument to `do_lseek` (spec §4.I `do_lseek`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Whence {
    Set,
    Cur,
    End,
}

/// The process-level state the VFS syscalls need: a root, a current
/// working directory, and a file-descriptor table.
pub trait FsContext {
    fn cwd(&self) -> Arc<Vnode>;
    fn set_cwd(&self, vnode: Arc<Vnode>);
    fn fd_table(&self) -> &Mutex<FdTable>;
}

fn root() -> Arc<Vnode> {
    crate::fs::rootfs::get()
}

fn access_mode(flags: i32) -> Result<AccessMode> {
    match flags & 0b11 {
        0 => Ok(AccessMode::ReadOnly),
        1 => Ok(AccessMode::WriteOnly),
        2 => Ok(AccessMode::ReadWrite),
        _ => return_errno_with_message!(Errno::EINVAL, "invalid access mode bits"),
    }
}

/// spec §4.I `do_open`.
pub fn do_open(ctx: &impl FsContext, path: &str, raw_flags: i32, open: OpenFlags) -> Result<i32> {
    if path.is_empty() {
        return_errno_with_message!(Errno::EINVAL, "empty path");
    }
    if path.len() > MAXPATHLEN {
        return_errno!(Errno::ENAMETOOLONG);
    }
    let access = access_mode(raw_flags)?;

    let vnode = path::open_namev(path, open, &root(), &ctx.cwd())?;
    if vnode.is_dir() && access.writable() {
        return_errno!(Errno::EISDIR);
    }
    let file = FileObject::new(vnode, access, open);
    let fd = ctx.fd_table().lock().install(file);
    trace!("open({path:?}) -> {fd:?}");
    fd
}

/// spec §4.I `do_read`.
pub fn do_read(ctx: &impl FsContext, fd: i32, buf: &mut [u8]) -> Result<usize> {
    if !FdTable::is_valid_fd(fd) {
        return_errno!(Errno::EBADF);
    }
    let file = ctx.fd_table().lock().get(fd).ok_or(Error::new(Errno::EBADF))?;
    let vnode = file.vnode();
    if vnode.is_dir() {
        return_errno!(Errno::EISDIR);
    }
    let pos = file.pos();
    let n = vnode.ops().read(vnode, pos, buf)?;
    file.advance(n);
    Ok(n)
}

/// spec §4.I `do_read/write`.
pub fn do_write(ctx: &impl FsContext, fd: i32, buf: &[u8]) -> Result<usize> {
    if !FdTable::is_valid_fd(fd) {
        return_errno!(Errno::EBADF);
    }
    let file = ctx.fd_table().lock().get(fd).ok_or(Error::new(Errno::EBADF))?;
    if !file.is_writable() {
        return_errno!(Errno::EBADF);
    }
    let vnode = file.vnode();
    if vnode.is_dir() {
        return_errno!(Errno::EISDIR);
    }
    if file.is_appending() {
        file.set_pos(vnode.len());
    }
    let pos = file.pos();
    let n = vnode.ops().write(vnode, pos, buf)?;
    file.advance(n);
    Ok(n)
}

/// spec §4.I `do_close`: a single `fput`, fixing the source's
/// double-release (spec §9 bug (c)).
pub fn do_close(ctx: &impl FsContext, fd: i32) -> Result<()> {
    let file = ctx
        .fd_table()
        .lock()
        .take(fd)
        .ok_or(Error::new(Errno::EBADF))?;
    crate::fs::file::fput(file);
    Ok(())
}

/// spec §4.I `do_dup`.
pub fn do_dup(ctx: &impl FsContext, oldfd: i32) -> Result<i32> {
    let file = ctx
        .fd_table()
        .lock()
        .get(oldfd)
        .ok_or(Error::new(Errno::EBADF))?;
    ctx.fd_table().lock().install(file)
}

/// spec §4.I `do_dup2`, fixing the source's refcount leak on the
/// replaced fd (spec §9 bug (e)): the file object previously at `newfd`
/// is `fput` exactly once here.
pub fn do_dup2(ctx: &impl FsContext, oldfd: i32, newfd: i32) -> Result<i32> {
    if !FdTable::is_valid_fd(newfd) {
        return_errno!(Errno::EBADF);
    }
    let file = ctx
        .fd_table()
        .lock()
        .get(oldfd)
        .ok_or(Error::new(Errno::EBADF))?;
    if oldfd == newfd {
        return Ok(newfd);
    }
    let replaced = ctx.fd_table().lock().install_at(newfd, file);
    if let Some(replaced) = replaced {
        crate::fs::file::fput(replaced);
    }
    Ok(newfd)
}

/// spec §4.I `do_mknod`, fixing the source's tautological mode check
/// (spec §9 bug (d)): only `S_IFCHR`/`S_IFBLK` vnode kinds are accepted.
pub fn do_mknod(ctx: &impl FsContext, path: &str, kind: VnodeKind) -> Result<()> {
    if !matches!(kind, VnodeKind::CharDevice(_) | VnodeKind::BlockDevice(_)) {
        return_errno_with_message!(Errno::EINVAL, "mknod kind must be a char or block device");
    }
    if path.len() > MAXPATHLEN {
        return_errno!(Errno::ENAMETOOLONG);
    }
    let (parent, name) = path::dir_namev(path, &root(), &ctx.cwd())?;
    if name.is_empty() {
        return_errno!(Errno::EINVAL);
    }
    if path::lookup(&parent, name).is_ok() {
        return_errno!(Errno::EEXIST);
    }
    debug!("mknod({path:?}, {kind:?})");
    parent.ops().mknod(&parent, name, kind)
}

/// spec §4.I `do_mkdir`.
pub fn do_mkdir(ctx: &impl FsContext, path: &str) -> Result<()> {
    let (parent, name) = path::dir_namev(path, &root(), &ctx.cwd())?;
    if name.is_empty() {
        return_errno!(Errno::EINVAL);
    }
    if path::lookup(&parent, name).is_ok() {
        return_errno!(Errno::EEXIST);
    }
    parent.ops().mkdir(&parent, name)
}

/// spec §4.I `do_rmdir`.
pub fn do_rmdir(ctx: &impl FsContext, path: &str) -> Result<()> {
    let (parent, name) = path::dir_namev(path, &root(), &ctx.cwd())?;
    if name == "." {
        return_errno!(Errno::EINVAL);
    }
    if name == ".." {
        return_errno!(Errno::ENOTEMPTY);
    }
    parent.ops().rmdir(&parent, name)
}

/// spec §4.I `do_unlink`.
pub fn do_unlink(ctx: &impl FsContext, path: &str) -> Result<()> {
    let (parent, name) = path::dir_namev(path, &root(), &ctx.cwd())?;
    let target = path::lookup(&parent, name)?;
    if target.is_dir() {
        warn!("unlink({path:?}) rejected: target is a directory");
        return_errno!(Errno::EISDIR);
    }
    parent.ops().unlink(&parent, name)
}

/// spec §4.I `do_link`.
pub fn do_link(ctx: &impl FsContext, from: &str, to: &str) -> Result<()> {
    let source = path::open_namev(from, OpenFlags::empty(), &root(), &ctx.cwd())?;
    let (dest_parent, dest_name) = path::dir_namev(to, &root(), &ctx.cwd())?;
    if path::lookup(&dest_parent, dest_name).is_ok() {
        return_errno!(Errno::EEXIST);
    }
    dest_parent.ops().link(&dest_parent, &source, dest_name)
}

/// spec §4.I `do_rename`: link then unlink, not crash-safe (SPEC_FULL.md
/// §9 open question, decided in DESIGN.md) — if the unlink half fails
/// both names remain.
pub fn do_rename(ctx: &impl FsContext, old: &str, new: &str) -> Result<()> {
    do_link(ctx, old, new)?;
    do_unlink(ctx, old).inspect_err(|e| {
        warn!("rename({old:?}, {new:?}): unlink half failed after link succeeded: {e:?}");
    })
}

/// spec §4.I `do_chdir`.
pub fn do_chdir(ctx: &impl FsContext, path: &str) -> Result<()> {
    let vnode = path::open_namev(path, OpenFlags::empty(), &root(), &ctx.cwd())?;
    if !vnode.is_dir() {
        return_errno!(Errno::ENOTDIR);
    }
    let old = ctx.cwd();
    vput(old);
    ctx.set_cwd(vref(&vnode));
    Ok(())
}

/// spec §4.I `do_lseek`.
pub fn do_lseek(ctx: &impl FsContext, fd: i32, offset: i64, whence: Whence) -> Result<usize> {
    let file = ctx.fd_table().lock().get(fd).ok_or(Error::new(Errno::EBADF))?;
    let base = match whence {
        Whence::Set => 0i64,
        Whence::Cur => file.pos() as i64,
        Whence::End => file.vnode().len() as i64,
    };
    let new_pos = base + offset;
    if new_pos < 0 {
        return_errno!(Errno::EINVAL);
    }
    file.set_pos(new_pos as usize);
    Ok(new_pos as usize)
}

/// spec §4.I `do_stat`.
pub fn do_stat(ctx: &impl FsContext, path: &str) -> Result<Stat> {
    let vnode = path::open_namev(path, OpenFlags::empty(), &root(), &ctx.cwd())?;
    vnode.ops().stat(&vnode)
}

/// spec §4.I `do_getdent`: returns `Some(dirent)` and advances `f_pos`
/// by one entry on success, `None` at end-of-directory. The spec's
/// "return `sizeof(dirent)`/0" translates to `Some`/`None` here since
/// this crate returns a decoded struct rather than filling a raw byte
/// buffer (see [`crate::fs::vnode::Dirent`]).
pub fn do_getdent(ctx: &impl FsContext, fd: i32) -> Result<Option<Dirent>> {
    let file = ctx.fd_table().lock().get(fd).ok_or(Error::new(Errno::EBADF))?;
    let vnode = file.vnode();
    if !vnode.is_dir() {
        return_errno!(Errno::ENOTDIR);
    }
    let index = file.pos();
    let entry = vnode.ops().readdir(vnode, index)?;
    if entry.is_some() {
        file.advance(1);
    }
    Ok(entry)
}

#[cfg(test)]
mod tests {
    use serial_test::serial;

    use super::*;
    use crate::fs::ramfs::RamFs;

    struct TestCtx {
        cwd: SpinLock<Arc<Vnode>>,
        fds: Mutex<FdTable>,
    }

    impl TestCtx {
        fn new(cwd: Arc<Vnode>) -> Self {
            Self {
                cwd: SpinLock::new(cwd),
                fds: Mutex::new(FdTable::new()),
            }
        }
    }

    impl FsContext for TestCtx {
        fn cwd(&self) -> Arc<Vnode> {
            self.cwd.lock().clone()
        }
        fn set_cwd(&self, vnode: Arc<Vnode>) {
            *self.cwd.lock() = vnode;
        }
        fn fd_table(&self) -> &Mutex<FdTable> {
            &self.fds
        }
    }

    fn setup() -> TestCtx {
        let fs = RamFs::new();
        crate::fs::rootfs::init(fs.root());
        TestCtx::new(fs.root())
    }

    // `fs::rootfs`'s root is a process-global static.
    #[test]
    #[serial]
    fn open_write_close_open_read_round_trip() {
        let ctx = setup();
        let fd = do_open(&ctx, "test.txt", 1, OpenFlags::O_CREAT).unwrap();
        assert_eq!(do_write(&ctx, fd, b"i hate OS! i hate OS!").unwrap(), 22);
        do_close(&ctx, fd).unwrap();

        let fd = do_open(&ctx, "test.txt", 0, OpenFlags::empty()).unwrap();
        let mut buf = [0u8; 22];
        assert_eq!(do_read(&ctx, fd, &mut buf).unwrap(), 22);
        assert_eq!(&buf, b"i hate OS! i hate OS!");
        do_close(&ctx, fd).unwrap();
    }

    #[test]
    #[serial]
    fn mkdir_then_rmdir_scenario() {
        let ctx = setup();
        do_mkdir(&ctx, "sub").unwrap();
        assert_eq!(do_rmdir(&ctx, "..").unwrap_err().error(), Errno::ENOTEMPTY);
        assert_eq!(do_rmdir(&ctx, ".").unwrap_err().error(), Errno::EINVAL);
        do_rmdir(&ctx, "sub").unwrap();
        assert_eq!(do_stat(&ctx, "sub").unwrap_err().error(), Errno::ENOENT);
    }

    #[test]
    #[serial]
    fn dup_shares_file_object_and_survives_one_close() {
        let ctx = setup();
        let fd = do_open(&ctx, "a.txt", 1, OpenFlags::O_CREAT).unwrap();
        let dupped = do_dup(&ctx, fd).unwrap();
        do_write(&ctx, fd, b"hi").unwrap();
        do_close(&ctx, fd).unwrap();
        // The duplicate is still valid and shares the same position.
        let mut buf = [0u8; 2];
        do_lseek(&ctx, dupped, 0, Whence::Set).unwrap();
        assert_eq!(do_read(&ctx, dupped, &mut buf).unwrap(), 2);
        assert_eq!(&buf, b"hi");
    }

    #[test]
    #[serial]
    fn link_unlink_then_rename_scenario() {
        let ctx = setup();
        let fd = do_open(&ctx, "a.txt", 1, OpenFlags::O_CREAT).unwrap();
        do_close(&ctx, fd).unwrap();

        do_link(&ctx, "a.txt", "b.txt").unwrap();
        do_unlink(&ctx, "b.txt").unwrap();
        // a's inode is intact.
        do_stat(&ctx, "a.txt").unwrap();

        do_rename(&ctx, "a.txt", "c.txt").unwrap();
        assert_eq!(do_stat(&ctx, "a.txt").unwrap_err().error(), Errno::ENOENT);
        do_stat(&ctx, "c.txt").unwrap();
    }

    #[test]
    #[serial]
    fn mknod_dev_null_stat_round_trip() {
        let ctx = setup();
        do_mknod(
            &ctx,
            "/devnull",
            VnodeKind::CharDevice(crate::fs::vnode::DevId::new(1, 0)),
        )
        .unwrap();
        let stat = do_stat(&ctx, "/devnull").unwrap();
        assert_eq!(
            stat.kind,
            VnodeKind::CharDevice(crate::fs::vnode::DevId::new(1, 0))
        );
    }

    #[test]
    #[serial]
    fn getdent_enumerates_directory_then_ends() {
        let ctx = setup();
        do_mkdir(&ctx, "sub").unwrap();
        let fd = do_open(&ctx, "sub", 0, OpenFlags::empty()).unwrap();
        let mut names = Vec::new();
        while let Some(dirent) = do_getdent(&ctx, fd).unwrap() {
            names.push(dirent.name);
        }
        assert_eq!(names, vec![".".to_string(), "..".to_string()]);
    }
}
