// SPDX-License-Identifier: MPL-2.0

//! Processes: the unit this crate schedules, owns memory for, and
//! reaps (spec §3 "Process", §4.E "`create`", §4.F "Lifecycle").
//!
//! Grounded on the shape of `kernel/aster-nix/src/process/process/mod.rs`
//! (mutable fields behind their own lock, a `Weak` parent pointer, an
//! `Arc<Process>` children list) narrowed to the fields the base spec
//! actually names: no credentials, namespaces, or signal state, since
//! those are explicit Non-goals.

use crate::{
    collab::{PageTable, TlbFlusher},
    fs::{
        file::FdTable,
        syscall::FsContext,
        vnode::{vref, Vnode},
    },
    prelude::*,
    vm::{mmap::VmContext, vmarea::VmMap},
};

pub mod lifecycle;
pub mod table;

/// A process's lifecycle state (spec §4.E `state=Running`, §4.F
/// `proc_cleanup` step 5 `state=Dead`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessStatus {
    Running,
    /// Carries the exit status recorded by `proc_cleanup`.
    Dead(i32),
}

struct ProcessInner {
    name: String,
    parent: Weak<Process>,
    children: Vec<Arc<Process>>,
    threads: Vec<Arc<Task>>,
    status: ProcessStatus,
    cwd: Arc<Vnode>,
}

/// A process: pid, lineage, threads, the VFS context it carries
/// (cwd/fd table), and the address space it owns (spec §3 "Process").
pub struct Process {
    pid: u32,
    inner: SpinLock<ProcessInner>,
    p_wait: WaitQueue,
    fd_table: Mutex<FdTable>,
    vmmap: VmMap,
    page_table: Arc<dyn PageTable>,
    tlb: Arc<dyn TlbFlusher>,
}

impl Process {
    /// Creates the idle process: pid `PID_IDLE`, no parent (spec §4.E
    /// "The first process created has pid IDLE").
    pub fn create_idle(
        root_cwd: Arc<Vnode>,
        page_table: Arc<dyn PageTable>,
        tlb: Arc<dyn TlbFlusher>,
    ) -> Result<Arc<Process>> {
        let pid = table::alloc_pid()?;
        let proc = Arc::new(Process {
            pid,
            inner: SpinLock::new(ProcessInner {
                name: "idle".to_string(),
                parent: Weak::new(),
                children: Vec::new(),
                threads: Vec::new(),
                status: ProcessStatus::Running,
                cwd: root_cwd,
            }),
            p_wait: WaitQueue::new(),
            fd_table: Mutex::new(FdTable::new()),
            vmmap: VmMap::new(),
            page_table,
            tlb,
        });
        table::insert(proc.clone());
        Ok(proc)
    }

    /// Creates a process parented under `parent` (spec §4.E `create`):
    /// allocates a pid, links into the global list and the parent's
    /// children, clones the parent's cwd reference, and starts with an
    /// empty vmmap and fd table.
    pub fn create(name: &str, parent: &Arc<Process>) -> Result<Arc<Process>> {
        let pid = table::alloc_pid()?;
        let cwd = vref(&parent.cwd());
        let proc = Arc::new(Process {
            pid,
            inner: SpinLock::new(ProcessInner {
                name: name.to_string(),
                parent: Arc::downgrade(parent),
                children: Vec::new(),
                threads: Vec::new(),
                status: ProcessStatus::Running,
                cwd,
            }),
            p_wait: WaitQueue::new(),
            fd_table: Mutex::new(FdTable::new()),
            vmmap: VmMap::new(),
            page_table: parent.page_table.clone(),
            tlb: parent.tlb.clone(),
        });
        parent.inner.lock().children.push(proc.clone());
        table::insert(proc.clone());
        if pid == crate::config::PID_INIT {
            table::set_init(&proc);
        }
        Ok(proc)
    }

    pub fn pid(&self) -> u32 {
        self.pid
    }

    pub fn name(&self) -> String {
        self.inner.lock().name.clone()
    }

    pub fn parent(&self) -> Option<Arc<Process>> {
        self.inner.lock().parent.upgrade()
    }

    pub fn children(&self) -> Vec<Arc<Process>> {
        self.inner.lock().children.clone()
    }

    pub fn status(&self) -> ProcessStatus {
        self.inner.lock().status
    }

    pub fn set_status(&self, status: ProcessStatus) {
        self.inner.lock().status = status;
    }

    pub fn p_wait(&self) -> &WaitQueue {
        &self.p_wait
    }

    pub fn cwd(&self) -> Arc<Vnode> {
        self.inner.lock().cwd.clone()
    }

    pub fn threads(&self) -> Vec<Arc<Task>> {
        self.inner.lock().threads.clone()
    }

    pub fn add_thread(&self, thread: Arc<Task>) {
        self.inner.lock().threads.push(thread);
    }

    pub fn remove_child(&self, pid: u32) -> Option<Arc<Process>> {
        let mut inner = self.inner.lock();
        let idx = inner.children.iter().position(|c| c.pid() == pid)?;
        Some(inner.children.remove(idx))
    }

    /// Empties this process's children list, handing the old contents to
    /// the caller (spec §4.F `proc_cleanup` step 4 "reparent every
    /// child").
    pub fn take_children(&self) -> Vec<Arc<Process>> {
        core::mem::take(&mut self.inner.lock().children)
    }

    pub fn adopt_child(self: &Arc<Self>, child: Arc<Process>) {
        child.inner.lock().parent = Arc::downgrade(self);
        self.inner.lock().children.push(child);
    }

    pub fn vmmap(&self) -> &VmMap {
        &self.vmmap
    }

    pub fn page_table(&self) -> &Arc<dyn PageTable> {
        &self.page_table
    }

    pub fn tlb(&self) -> &Arc<dyn TlbFlusher> {
        &self.tlb
    }
}

impl FsContext for Process {
    fn cwd(&self) -> Arc<Vnode> {
        Process::cwd(self)
    }

    fn set_cwd(&self, vnode: Arc<Vnode>) {
        self.inner.lock().cwd = vnode;
    }

    fn fd_table(&self) -> &Mutex<FdTable> {
        &self.fd_table
    }
}

impl VmContext for Process {
    fn vmmap(&self) -> &VmMap {
        &self.vmmap
    }

    fn page_table(&self) -> &Arc<dyn PageTable> {
        &self.page_table
    }

    fn tlb(&self) -> &Arc<dyn TlbFlusher> {
        &self.tlb
    }
}
