// SPDX-License-Identifier: MPL-2.0

//! The global process list and pid allocation (spec §4.E "link into
//! global list", §8 invariant 1: "exactly one process per live pid").

use lazy_static::lazy_static;

use crate::{config::PROC_MAX_COUNT, prelude::*, process::Process};

struct Table {
    processes: BTreeMap<u32, Arc<Process>>,
    next_pid: u32,
    init: Option<Weak<Process>>,
}

impl Table {
    const fn new() -> Self {
        Self {
            processes: BTreeMap::new(),
            next_pid: 0,
            init: None,
        }
    }

    fn alloc_pid(&mut self) -> Result<u32> {
        for _ in 0..PROC_MAX_COUNT {
            let pid = self.next_pid;
            self.next_pid = (self.next_pid + 1) % PROC_MAX_COUNT;
            if !self.processes.contains_key(&pid) {
                return Ok(pid);
            }
        }
        return_errno_with_message!(Errno::EAGAIN, "process table exhausted");
    }
}

lazy_static! {
    static ref TABLE: SpinLock<Table> = SpinLock::new(Table::new());
}

/// Reserves the next free pid (spec §4.E: sequential allocation gives
/// IDLE=0, INIT=1, KERNEL_DAEMON=2 their reserved numbers naturally,
/// since they are the first three processes ever created).
pub(crate) fn alloc_pid() -> Result<u32> {
    TABLE.lock().alloc_pid()
}

/// Links a newly created process into the global list (spec §4.E "link
/// into global list").
pub(crate) fn insert(proc: Arc<Process>) {
    TABLE.lock().processes.insert(proc.pid(), proc);
}

/// Removes a process from the global list, spec §4.F `proc_cleanup`'s
/// reaping step ("remove from parent's children list and the global
/// list").
pub(crate) fn remove(pid: u32) -> Option<Arc<Process>> {
    TABLE.lock().processes.remove(&pid)
}

pub fn get(pid: u32) -> Option<Arc<Process>> {
    TABLE.lock().processes.get(&pid).cloned()
}

/// Records the init process, for later reparenting (spec §4.E "a
/// process-global `init` pointer is recorded here").
pub(crate) fn set_init(proc: &Arc<Process>) {
    TABLE.lock().init = Some(Arc::downgrade(proc));
}

/// The init process.
///
/// # Panics
/// If called before [`set_init`].
pub fn init() -> Arc<Process> {
    TABLE
        .lock()
        .init
        .as_ref()
        .and_then(Weak::upgrade)
        .expect("process::table::init called before the init process exists")
}

/// Every live process except the pids in `excluded` (spec §4.F
/// `kill_all`: "every process except pid 0, pid 1, pid 2, and self").
pub(crate) fn all_except(excluded: &[u32]) -> Vec<Arc<Process>> {
    TABLE
        .lock()
        .processes
        .values()
        .filter(|p| !excluded.contains(&p.pid()))
        .cloned()
        .collect()
}

#[cfg(test)]
pub(crate) fn reset_for_test() {
    *TABLE.lock() = Table::new();
}

#[cfg(test)]
mod tests {
    use serial_test::serial;

    use super::*;

    // `TABLE` is a process-global static.
    #[test]
    #[serial]
    fn pid_allocation_is_sequential_then_skips_in_use() {
        reset_for_test();
        assert_eq!(alloc_pid().unwrap(), 0);
        assert_eq!(alloc_pid().unwrap(), 1);
    }
}
