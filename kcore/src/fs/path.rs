// SPDX-License-Identifier: MPL-2.0

//! Pathname resolution (spec §4.H, §6 "Path grammar").
//!
//! Corrected relative to the C source's known bugs (spec §9): component
//! length is computed by scanning for the next `/` or end-of-string, not
//! by `strlen` arithmetic that double-counts consecutive slashes, and no
//! vnode is ever `vput` before it is done being read through.

use crate::{
    config::{MAXPATHLEN, NAME_LEN},
    fs::{
        file::OpenFlags,
        vnode::{vget, Vnode},
    },
    prelude::*,
};

/// Splits `path` into `(component, rest)`, where `component` excludes
/// any separating `/` and `rest` starts at the next non-`/` byte or is
/// empty. Tolerates (and skips) runs of consecutive slashes, fixing the
/// source's double-counted `strlen` arithmetic (spec §9 bug (a)).
fn next_component(path: &str) -> (&str, &str) {
    let path = path.trim_start_matches('/');
    match path.find('/') {
        Some(idx) => (&path[..idx], path[idx..].trim_start_matches('/')),
        None => (path, ""),
    }
}

/// Resolves a single pathname component under `dir` (spec §4.H
/// `lookup`). The returned vnode carries a fresh reference; on failure
/// `dir`'s refcount is left unchanged.
pub fn lookup(dir: &Arc<Vnode>, name: &str) -> Result<Arc<Vnode>> {
    if !dir.is_dir() {
        return_errno!(Errno::ENOTDIR);
    }
    if name.is_empty() {
        return Ok(vget(dir));
    }
    if name.len() > NAME_LEN {
        return_errno!(Errno::ENAMETOOLONG);
    }
    dir.ops().lookup(dir, name)
}

/// Resolves every component but the last of `path`, returning `(parent,
/// basename)` (spec §4.H `dir_namev`). Absolute paths start at `root`;
/// relative paths start at `base`. Trailing slashes are tolerated: they
/// leave the basename as the last non-empty component (so `"a/b/"`
/// behaves like `"a/b"`).
pub fn dir_namev<'p>(
    path: &'p str,
    root: &Arc<Vnode>,
    base: &Arc<Vnode>,
) -> Result<(Arc<Vnode>, &'p str)> {
    if path.is_empty() {
        return_errno_with_message!(Errno::EINVAL, "empty path");
    }
    if path.len() > MAXPATHLEN {
        return_errno!(Errno::ENAMETOOLONG);
    }

    let mut dir = if path.starts_with('/') {
        vget(root)
    } else {
        vget(base)
    };

    let mut rest = path;
    loop {
        let (component, next) = next_component(rest);
        if next.is_empty() {
            // `component` (possibly empty, for paths ending in "/") is
            // the basename; stop here without resolving it.
            return Ok((dir, component));
        }
        let child = lookup(&dir, component)?;
        dir = child;
        rest = next;
    }
}

/// Resolves a full pathname to a vnode (spec §4.H `open_namev`). If the
/// basename is missing and `flags` requests `O_CREAT`, creates it via
/// the parent's `create` op instead of failing.
pub fn open_namev(
    path: &str,
    flags: OpenFlags,
    root: &Arc<Vnode>,
    base: &Arc<Vnode>,
) -> Result<Arc<Vnode>> {
    let (parent, name) = dir_namev(path, root, base)?;
    match lookup(&parent, name) {
        Ok(vnode) => Ok(vnode),
        Err(e) if e.error() == Errno::ENOENT && flags.contains(OpenFlags::O_CREAT) => {
            parent.ops().create(&parent, name)
        }
        Err(e) => Err(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::ramfs::RamFs;

    #[test]
    fn next_component_skips_consecutive_slashes() {
        assert_eq!(next_component("a//b"), ("a", "b"));
        assert_eq!(next_component("a"), ("a", ""));
        assert_eq!(next_component(""), ("", ""));
    }

    #[test]
    fn dir_namev_tolerates_trailing_slash() {
        let fs = RamFs::new();
        let root = fs.root();
        root.ops().mkdir(&root, "a").unwrap();
        let a = root.ops().lookup(&root, "a").unwrap();
        a.ops().mkdir(&a, "b").unwrap();

        let (parent, name) = dir_namev("a/b/", &root, &root).unwrap();
        assert_eq!(parent.ino, a.ino);
        assert_eq!(name, "b");
    }

    #[test]
    fn open_namev_creates_on_enoent_with_o_creat() {
        let fs = RamFs::new();
        let root = fs.root();
        let result = open_namev("new.txt", OpenFlags::O_CREAT, &root, &root);
        assert!(result.is_ok());

        let result = open_namev("missing.txt", OpenFlags::empty(), &root, &root);
        assert_eq!(result.unwrap_err().error(), Errno::ENOENT);
    }

    #[test]
    fn dir_namev_rejects_empty_path() {
        let fs = RamFs::new();
        let root = fs.root();
        assert_eq!(
            dir_namev("", &root, &root).unwrap_err().error(),
            Errno::EINVAL
        );
    }
}
