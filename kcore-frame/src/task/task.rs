// SPDX-License-Identifier: MPL-2.0

use alloc::{boxed::Box, sync::Arc, vec::Vec};
use core::{cell::UnsafeCell, ptr::NonNull};

use log::debug;

use super::scheduler;
use crate::sync::{SpinLock, SpinLockGuard, WaitQueue};

pub const KERNEL_STACK_SIZE: usize = crate::config::KERNEL_STACK_SIZE;

core::arch::global_asm!(include_str!("switch.S"));

/// Callee-saved general-purpose registers, laid out to match what
/// `switch.S` spills and restores across a context switch.
#[derive(Debug, Default, Clone, Copy)]
#[repr(C)]
pub struct CalleeRegs {
    pub rsp: u64,
    pub rbx: u64,
    pub rbp: u64,
    pub r12: u64,
    pub r13: u64,
    pub r14: u64,
    pub r15: u64,
}

/// The machine context saved across a [`context_switch`]: the callee-saved
/// registers plus the instruction pointer to resume at.
#[derive(Debug, Default, Clone, Copy)]
#[repr(C)]
pub struct TaskContext {
    pub regs: CalleeRegs,
    pub rip: usize,
}

extern "C" {
    pub(crate) fn context_switch(cur: *mut TaskContext, nxt: *const TaskContext);
}

/// A heap-allocated kernel stack.
///
/// The hardware MMU is out of scope here (see the `FrameAllocator`/
/// `PageTable` collaborator traits), so unlike a real kernel this stack is
/// plain heap memory with no guard page; stack overflow is not detected.
pub struct KernelStack {
    mem: Vec<u8>,
}

impl KernelStack {
    pub fn new() -> Self {
        Self {
            mem: alloc::vec![0u8; KERNEL_STACK_SIZE],
        }
    }

    /// Address one-past-the-end of the stack, where a descending stack
    /// pointer starts.
    fn top(&self) -> usize {
        self.mem.as_ptr() as usize + self.mem.len()
    }
}

impl Default for KernelStack {
    fn default() -> Self {
        Self::new()
    }
}

/// The lifecycle states a thread moves through (spec §3 Thread / §4.B).
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum TaskStatus {
    /// On the run queue, waiting for the scheduler to pick it.
    Runnable,
    /// Currently executing on the (single) CPU.
    Running,
    /// Parked on a wait queue; `cancel` cannot wake it early.
    SleepingUninterruptible,
    /// Parked on a wait queue; `cancel` can wake it early with `EINTR`.
    SleepingCancellable,
    /// Finished; `retval` holds its exit value.
    Exited,
}

pub(crate) struct TaskInner {
    pub status: TaskStatus,
    pub cancelled: bool,
    pub retval: i32,
    /// The wait queue this task is parked on, if any. Set by
    /// `sleep_on`/`cancellable_sleep_on` and read by `cancel`, which needs
    /// to remove a `SleepingCancellable` task from the middle of a queue.
    pub waitq: Option<NonNull<WaitQueue>>,
}

// SAFETY: `waitq` only ever points at a `WaitQueue` borrowed for the
// duration of the sleep (either a `'static` global or one embedded in a
// longer-lived object such as a `Mutex`), and is cleared before that
// borrow ends.
unsafe impl Send for TaskInner {}

/// A schedulable unit of kernel execution (spec component D).
///
/// Unlike a full kernel task, `Task` here carries no notion of user space
/// or page tables: everything above "a stack and a machine context" is the
/// caller's business (the process/thread split lives in the layer above
/// this crate).
pub struct Task {
    func: SpinLock<Option<Box<dyn FnOnce() + Send + 'static>>>,
    inner: SpinLock<TaskInner>,
    ctx: UnsafeCell<TaskContext>,
    kstack: KernelStack,
}

// SAFETY: `ctx` is only read or written while this task is not concurrently
// running (either by `switch_to` finding it `current`, or by the scheduler
// holding exclusive access while it is parked).
unsafe impl Sync for Task {}

impl Task {
    /// Returns the task currently executing on this CPU.
    pub fn current() -> Arc<Task> {
        scheduler::current_task().expect("Task::current called with no running task")
    }

    pub(crate) fn inner(&self) -> SpinLockGuard<'_, TaskInner> {
        self.inner.lock()
    }

    pub(crate) fn ctx(&self) -> &UnsafeCell<TaskContext> {
        &self.ctx
    }

    pub fn status(&self) -> TaskStatus {
        self.inner.lock().status
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.lock().cancelled
    }

    /// Voluntarily gives up the CPU so another runnable thread may run.
    /// The caller remains Runnable and is re-enqueued.
    pub fn yield_now() {
        scheduler::yield_now();
    }

    /// Marks this task Exited with `retval` and switches away for good.
    /// Never returns.
    pub fn exit(retval: i32) -> ! {
        scheduler::exit_current(retval)
    }
}

/// Builder for a new [`Task`], mirroring the spec's `Thread::create`.
pub struct TaskOptions {
    func: Box<dyn FnOnce() + Send + 'static>,
}

impl TaskOptions {
    pub fn new<F>(func: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        Self {
            func: Box::new(func),
        }
    }

    /// Builds the task without scheduling it.
    pub fn build(self) -> Arc<Task> {
        extern "C" fn kernel_task_entry() -> ! {
            let current = Task::current();
            let func = current
                .func
                .lock()
                .take()
                .expect("kernel_task_entry invoked twice for the same task");
            func();
            Task::exit(0);
        }

        let kstack = KernelStack::new();
        let mut ctx = TaskContext::default();
        ctx.rip = kernel_task_entry as usize;
        // Reserve 16 bytes below the top for the (unused) return address
        // slot `context_switch`'s `ret` pops, keeping rsp 16-byte aligned
        // per the System V AMD64 ABI.
        ctx.regs.rsp = (kstack.top() - 16) as u64;

        let task = Arc::new(Task {
            func: SpinLock::new(Some(self.func)),
            inner: SpinLock::new(TaskInner {
                status: TaskStatus::Runnable,
                cancelled: false,
                retval: 0,
                waitq: None,
            }),
            ctx: UnsafeCell::new(ctx),
            kstack,
        });
        debug!("task {:p} created", Arc::as_ptr(&task));
        task
    }

    /// Builds the task and places it on the run queue.
    pub fn spawn(self) -> Arc<Task> {
        let task = self.build();
        scheduler::make_runnable(task.clone());
        task
    }
}
