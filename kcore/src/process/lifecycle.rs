// SPDX-License-Identifier: MPL-2.0

//! `fork`, `waitpid`, `exit`, `proc_cleanup`, and `kill_all` (spec §4.F).
//!
//! `fork`'s step 4 ("clone the current thread; reset its saved context
//! to resume in user mode at the post-fork instruction") has no
//! counterpart in this crate: there is no user-mode return path to
//! resume, since the hardware trap frame that instruction describes is
//! exactly the out-of-scope collaborator seam (SPEC_FULL.md §1.2). This
//! crate's `fork` instead takes the child's entry point as a closure,
//! the same accommodation `kcore_frame::task::TaskOptions` already makes
//! for thread creation generally.

use crate::{
    config::{NFILES, PID_IDLE, PID_INIT, PID_KERNEL_DAEMON, USER_MEM_HIGH, USER_MEM_LOW},
    fs::{
        file::fput,
        vnode::vput,
    },
    prelude::*,
    process::{table, Process, ProcessStatus},
    vm::{
        mmobj::mput,
        vmarea::{MapFlags, VmArea},
    },
};

/// spec §4.F `fork`. Requires VM to be enabled (every process created
/// through [`Process::create`] already has one).
pub fn fork<F>(parent: &Arc<Process>, child_entry: F) -> Result<Arc<Process>>
where
    F: FnOnce() + Send + 'static,
{
    let child = Process::create(&alloc::format!("{}-child", parent.name()), parent)?;
    info!("fork: pid {} -> pid {}", parent.pid(), child.pid());

    // Steps 2-3: clone the parent's vmmap; install fresh shadows over
    // every private mapping so both sides fault-in COW from here on.
    let mut child_areas = Vec::new();
    for area in parent.vmmap().areas_snapshot() {
        let mirrored = VmArea::new(area.start(), area.end(), area.off(), area.prot, area.flags);
        if let Some(object) = area.object() {
            if area.flags.contains(MapFlags::PRIVATE) {
                let parent_shadow = crate::vm::shadow::ShadowObject::new(object.clone());
                let child_shadow = crate::vm::shadow::ShadowObject::new(object);
                area.set_object(parent_shadow);
                mirrored.set_object(child_shadow);
            } else {
                mirrored.set_object(crate::vm::mmobj::mref(&object));
            }
        }
        child_areas.push(mirrored);
    }
    child.vmmap().install_areas(child_areas);

    // Step 5: fd table (fref each fd), cwd (already `vref`'d by
    // `Process::create`).
    let forked_fds = parent.fd_table().lock().fork();
    *child.fd_table().lock() = forked_fds;

    // Step 6: unmap the user range on both sides and flush, so the next
    // access in either process takes the page-fault path. `unmap_range`
    // is keyed by byte vaddr, same as `map`/`unmap`/`query`.
    parent.page_table().unmap_range(USER_MEM_LOW, USER_MEM_HIGH);
    child.page_table().unmap_range(USER_MEM_LOW, USER_MEM_HIGH);
    parent.tlb().flush_all();
    child.tlb().flush_all();

    // Steps 4 and 7: a new thread for the child, made runnable.
    let task = TaskOptions::new(move || {
        child_entry();
        Task::exit(0);
    })
    .spawn();
    child.add_thread(task);

    Ok(child)
}

fn reap(parent: &Arc<Process>, child: &Arc<Process>) -> (u32, i32) {
    let ProcessStatus::Dead(status) = child.status() else {
        unreachable!("reap called on a process that is not Dead")
    };
    debug!("waitpid: reaping pid {} (status {status}) into pid {}", child.pid(), parent.pid());
    parent.remove_child(child.pid());
    table::remove(child.pid());
    (child.pid(), status)
}

/// spec §4.F `waitpid`. Only `pid == -1` (any child) and `pid > 0` (a
/// specific child) are supported; `options` is always treated as `0`.
pub fn waitpid(parent: &Arc<Process>, pid: i32) -> Result<(u32, i32)> {
    loop {
        let children = parent.children();
        if children.is_empty() {
            return_errno!(Errno::ECHILD);
        }

        if pid == -1 {
            if let Some(dead) = children
                .iter()
                .find(|c| matches!(c.status(), ProcessStatus::Dead(_)))
            {
                return Ok(reap(parent, dead));
            }
            scheduler::sleep_on(parent.p_wait());
            continue;
        }

        if pid > 0 {
            let pid_u = pid as u32;
            let Some(child) = children.iter().find(|c| c.pid() == pid_u) else {
                return_errno!(Errno::ECHILD);
            };
            if matches!(child.status(), ProcessStatus::Dead(_)) {
                return Ok(reap(parent, child));
            }
            scheduler::sleep_on(parent.p_wait());
            continue;
        }

        return_errno_with_message!(Errno::EINVAL, "unsupported waitpid argument");
    }
}

/// spec §4.F `proc_cleanup`, run by the last thread on the way out.
/// Order matters: cwd, then fds, then vmmap, then reparenting, then the
/// status flip and parent wakeup, exactly as listed.
pub fn proc_cleanup(proc: &Arc<Process>, status: i32) {
    assert!(proc.pid() >= 1, "the idle process never exits");
    let parent = proc
        .parent()
        .expect("an exiting process always has a parent");

    vput(proc.cwd());

    {
        let mut fds = proc.fd_table().lock();
        for fd in 0..NFILES as i32 {
            if let Some(file) = fds.take(fd) {
                fput(file);
            }
        }
    }

    for area in proc.vmmap().areas_snapshot() {
        if let Some(object) = area.object() {
            mput(object);
        }
    }
    proc.vmmap().clear();

    let init = table::init();
    let orphans = proc.take_children();
    if !orphans.is_empty() {
        debug!(
            "proc_cleanup: reparenting {} orphan(s) of pid {} to init",
            orphans.len(),
            proc.pid()
        );
    }
    for child in orphans {
        init.adopt_child(child);
    }

    proc.set_status(ProcessStatus::Dead(status));
    info!("pid {} exited with status {status}", proc.pid());
    scheduler::broadcast_on(parent.p_wait());
}

/// spec §4.F `exit`.
pub fn exit(proc: &Arc<Process>, status: i32) -> ! {
    let current = Task::current();
    for thread in proc.threads() {
        if !Arc::ptr_eq(&thread, &current) {
            scheduler::cancel(&thread);
        }
    }
    proc_cleanup(proc, status);
    Task::exit(0)
}

/// spec §4.F `kill_all`: cancel every process except idle, init, the
/// kernel daemon, and the caller; then exit unless the caller is init.
pub fn kill_all(current: &Arc<Process>) {
    let excluded = [PID_IDLE, PID_INIT, PID_KERNEL_DAEMON, current.pid()];
    let victims = table::all_except(&excluded);
    warn!("kill_all: cancelling {} process(es)", victims.len());
    for proc in victims {
        for thread in proc.threads() {
            scheduler::cancel(&thread);
        }
    }
    if current.pid() != PID_INIT {
        exit(current, 0);
    }
}

#[cfg(test)]
mod tests {
    use serial_test::serial;

    use super::*;
    use crate::{
        collab::sim::{NullTlbFlusher, SimPageTable},
        fs::ramfs::RamFs,
        vm::vmarea::{Dir, Prot},
    };

    fn fresh_idle() -> Arc<Process> {
        table::reset_for_test();
        crate::fs::rootfs::init(RamFs::new().root());
        Process::create_idle(
            crate::fs::rootfs::get(),
            SimPageTable::new(),
            Arc::new(NullTlbFlusher),
        )
        .unwrap()
    }

    // `ROOT` and `TABLE` are process-globals.
    #[test]
    #[serial]
    fn fork_private_mapping_diverges_shared_mapping_is_shared() {
        let idle = fresh_idle();
        let parent = Process::create("parent", &idle).unwrap();

        let private_base = parent
            .vmmap()
            .map(
                None,
                0,
                1,
                Prot::READ | Prot::WRITE,
                crate::vm::vmarea::MapFlags::PRIVATE | crate::vm::vmarea::MapFlags::ANON,
                0,
                Dir::LoHi,
            )
            .unwrap();
        let shared_base = parent
            .vmmap()
            .map(
                None,
                0,
                1,
                Prot::READ | Prot::WRITE,
                crate::vm::vmarea::MapFlags::SHARED | crate::vm::vmarea::MapFlags::ANON,
                0,
                Dir::LoHi,
            )
            .unwrap();

        // Seed both pages with a known pattern before fork.
        let private_area = parent.vmmap().lookup(private_base).unwrap();
        let private_obj = private_area.object().unwrap();
        private_obj
            .lookuppage(private_base, true)
            .unwrap()
            .write_from(0, &[1, 1, 1]);
        let shared_area = parent.vmmap().lookup(shared_base).unwrap();
        let shared_obj = shared_area.object().unwrap();
        shared_obj
            .lookuppage(shared_base, true)
            .unwrap()
            .write_from(0, &[2, 2, 2]);

        let child = fork(&parent, || {}).unwrap();
        // Drains the child's spawned thread (an empty closure that exits
        // immediately) so it doesn't linger in the run queue for a later
        // test; the run queue is a process-global static.
        scheduler::switch();

        // Child's private mapping writes a different pattern; parent's
        // original bytes must survive untouched.
        let child_private_area = child.vmmap().lookup(private_base).unwrap();
        let child_private_obj = child_private_area.object().unwrap();
        child_private_obj
            .lookuppage(private_base, true)
            .unwrap()
            .write_from(0, &[9, 9, 9]);

        let mut parent_bytes = [0u8; 3];
        private_obj
            .lookuppage(private_base, false)
            .unwrap()
            .read_into(0, &mut parent_bytes);
        assert_eq!(parent_bytes, [1, 1, 1]);

        let mut child_bytes = [0u8; 3];
        child_private_obj
            .lookuppage(private_base, false)
            .unwrap()
            .read_into(0, &mut child_bytes);
        assert_eq!(child_bytes, [9, 9, 9]);

        // Shared mapping: a write through the child is visible to the
        // parent's own object handle, since both sides hold the same
        // underlying object (refcounted, not shadowed).
        let child_shared_area = child.vmmap().lookup(shared_base).unwrap();
        let child_shared_obj = child_shared_area.object().unwrap();
        child_shared_obj
            .lookuppage(shared_base, true)
            .unwrap()
            .write_from(0, &[7, 7, 7]);

        let mut shared_bytes = [0u8; 3];
        shared_obj
            .lookuppage(shared_base, false)
            .unwrap()
            .read_into(0, &mut shared_bytes);
        assert_eq!(shared_bytes, [7, 7, 7]);
    }

    // `ROOT` and `TABLE` are process-globals.
    #[test]
    #[serial]
    fn waitpid_minus_one_reaps_children_in_exit_order() {
        let idle = fresh_idle();
        let parent = Process::create("parent", &idle).unwrap();
        let child_a = Process::create("a", &parent).unwrap();
        let child_b = Process::create("b", &parent).unwrap();
        let pid_a = child_a.pid();
        let pid_b = child_b.pid();

        // Simulate each child's last thread running `proc_cleanup`
        // directly, as `exit` would after cancelling its siblings.
        proc_cleanup(&child_a, 0);
        proc_cleanup(&child_b, 7);

        let (reaped_first, status_first) = waitpid(&parent, -1).unwrap();
        assert_eq!(reaped_first, pid_a);
        assert_eq!(status_first, 0);

        let (reaped_second, status_second) = waitpid(&parent, -1).unwrap();
        assert_eq!(reaped_second, pid_b);
        assert_eq!(status_second, 7);

        assert!(parent.children().is_empty());
        assert!(table::get(pid_a).is_none());
        assert!(table::get(pid_b).is_none());
        assert!(waitpid(&parent, -1).is_err());
    }
}
