// SPDX-License-Identifier: MPL-2.0

//! The cooperative, single-core scheduler (spec component B).
//!
//! Exactly one task runs at a time; a switch only ever happens at an
//! explicit suspension point (`yield_now`, `sleep_on`,
//! `cancellable_sleep_on`, or a task exiting). There is no timer
//! preemption and no multiprocessor support: both are out of scope.

use alloc::sync::Arc;
use core::ptr::NonNull;

use lazy_static::lazy_static;
use log::trace;

use super::task::{context_switch, Task, TaskContext, TaskStatus};
use crate::sync::{SpinLock, WaitQueue};

lazy_static! {
    /// The FIFO of threads ready to run. `make_runnable` pushes to the
    /// back; `switch` pops from the front.
    static ref RUN_QUEUE: WaitQueue = WaitQueue::new();
    static ref CURRENT: SpinLock<Option<Arc<Task>>> = SpinLock::new(None);
}

/// The idle context a core resumes when the run queue is empty. It lives
/// for the crate's lifetime and is never itself scheduled as a `Task`.
static mut IDLE_CTX: TaskContext = TaskContext {
    regs: crate::task::CalleeRegs {
        rsp: 0,
        rbx: 0,
        rbp: 0,
        r12: 0,
        r13: 0,
        r14: 0,
        r15: 0,
    },
    rip: 0,
};

pub(crate) fn current_task() -> Option<Arc<Task>> {
    CURRENT.lock().clone()
}

/// The result of a cancellable sleep.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SleepResult {
    /// Woken normally by `wakeup_on`/`broadcast_on`.
    Woken,
    /// Woken early because `cancel` ran while parked.
    Cancelled,
}

/// Sets `t`'s state to Runnable and places it on the run queue.
pub fn make_runnable(t: Arc<Task>) {
    t.inner().status = TaskStatus::Runnable;
    trace!("task {:p} made runnable", Arc::as_ptr(&t));
    RUN_QUEUE.enqueue(t);
}

/// Gives up the CPU voluntarily. The caller is re-enqueued as Runnable.
pub fn yield_now() {
    let me = Task::current();
    make_runnable(me);
    switch();
}

/// Parks the current task on `q` in uninterruptible sleep and switches
/// away. Returns once some `wakeup_on`/`broadcast_on` call makes the task
/// runnable again.
pub fn sleep_on(q: &WaitQueue) {
    let me = Task::current();
    {
        let mut inner = me.inner();
        inner.status = TaskStatus::SleepingUninterruptible;
        inner.waitq = Some(NonNull::from(q));
    }
    trace!("task {:p} sleeping uninterruptibly on {:p}", Arc::as_ptr(&me), q);
    q.enqueue(me);
    switch();
}

/// As [`sleep_on`], but the sleep can be cut short by `cancel`.
pub fn cancellable_sleep_on(q: &WaitQueue) -> SleepResult {
    let me = Task::current();
    {
        let mut inner = me.inner();
        inner.status = TaskStatus::SleepingCancellable;
        inner.waitq = Some(NonNull::from(q));
    }
    q.enqueue(me.clone());
    switch();
    if me.inner().cancelled {
        SleepResult::Cancelled
    } else {
        SleepResult::Woken
    }
}

/// Dequeues one parked thread from `q`, if any, and makes it runnable.
/// Returns the thread woken, if any (used by `Mutex::unlock` to hand off
/// ownership without an observable unlocked window).
pub fn wakeup_on(q: &WaitQueue) -> Option<Arc<Task>> {
    let t = q.dequeue()?;
    t.inner().waitq = None;
    make_runnable(t.clone());
    Some(t)
}

/// Makes every thread parked on `q` runnable.
pub fn broadcast_on(q: &WaitQueue) {
    for t in q.broadcast() {
        t.inner().waitq = None;
        make_runnable(t);
    }
}

/// Sets `t`'s cancellation flag. If `t` is currently `SleepingCancellable`,
/// removes it from its wait queue and makes it runnable immediately so it
/// can observe the flag; otherwise this only sets the flag for `t` to
/// notice later.
pub fn cancel(t: &Arc<Task>) {
    trace!("cancelling task {:p}", Arc::as_ptr(t));
    let waitq = {
        let mut inner = t.inner();
        inner.cancelled = true;
        if inner.status == TaskStatus::SleepingCancellable {
            inner.waitq.take()
        } else {
            None
        }
    };
    let Some(waitq) = waitq else { return };
    // SAFETY: `waitq` was set by `sleep_on`/`cancellable_sleep_on` from a
    // `WaitQueue` borrow that is still live (the sleeper has not yet
    // returned from its suspension point), so the pointer is valid.
    let waitq = unsafe { waitq.as_ref() };
    if waitq.remove(t) {
        make_runnable(t.clone());
    }
}

/// Marks the current task Exited with `retval` and switches away. Never
/// returns: the task's stack is abandoned once another task resumes.
pub fn exit_current(retval: i32) -> ! {
    let me = Task::current();
    trace!("task {:p} exiting with retval {retval}", Arc::as_ptr(&me));
    {
        let mut inner = me.inner();
        inner.status = TaskStatus::Exited;
        inner.retval = retval;
    }
    switch();
    unreachable!("an Exited task was resumed")
}

/// Dequeues the next Runnable thread and performs a machine-context swap.
/// If the run queue is empty, the idle context runs.
pub fn switch() {
    let next = RUN_QUEUE.dequeue();

    // The caller has already set the outgoing task's status (Runnable for
    // a plain yield, Sleeping* for a wait, Exited on the way out) and, if
    // Runnable, re-enqueued it; `switch` only needs its context pointer.
    let cur_ctx_ptr: *mut TaskContext = match current_task() {
        None => core::ptr::addr_of_mut!(IDLE_CTX),
        Some(cur) => cur.ctx().get(),
    };

    let Some(next) = next else {
        // Nothing runnable: resume the idle context. On a single core with
        // no interrupts this only makes sense if something will later call
        // `make_runnable` from an interrupt-like context; tests drive the
        // scheduler directly and should never hit this arm with an empty
        // queue forever.
        let idle_ctx_ptr: *const TaskContext = core::ptr::addr_of!(IDLE_CTX);
        *CURRENT.lock() = None;
        unsafe { context_switch(cur_ctx_ptr, idle_ctx_ptr) };
        return;
    };

    next.inner().status = TaskStatus::Running;
    let next_ctx_ptr: *const TaskContext = next.ctx().get().cast_const();
    *CURRENT.lock() = Some(next);

    unsafe { context_switch(cur_ctx_ptr, next_ctx_ptr) };
}

#[cfg(test)]
mod tests {
    use alloc::vec::Vec;

    use serial_test::serial;

    use super::*;
    use crate::task::TaskOptions;

    /// The idle/test context calling the very first `switch()` kicks off a
    /// chain: each task that finishes or parks calls `switch()` itself to
    /// find the next runnable one, only returning to idle once nothing is
    /// left to run. A single top-level `switch()` call therefore drains an
    /// entire batch of non-blocking tasks.
    ///
    /// All tests in this module are `#[serial]`: the run queue and current
    /// task are process-global statics, so two of these tests executing on
    /// cargo's default parallel test threads would corrupt each other's
    /// scheduling state.
    #[test]
    #[serial]
    fn run_queue_executes_in_fifo_spawn_order() {
        let order = Arc::new(SpinLock::new(Vec::new()));
        for id in 0..3u8 {
            let order = order.clone();
            TaskOptions::new(move || {
                order.lock().push(id);
                Task::exit(0);
            })
            .spawn();
        }

        switch();

        assert_eq!(*order.lock(), [0, 1, 2]);
    }

    #[test]
    #[serial]
    fn cancel_wakes_a_cancellable_sleeper() {
        let queue = Arc::new(WaitQueue::new());
        let result = Arc::new(SpinLock::new(None));

        let sleeper = {
            let queue = queue.clone();
            let result = result.clone();
            TaskOptions::new(move || {
                let outcome = cancellable_sleep_on(&queue);
                *result.lock() = Some(outcome);
                Task::exit(0);
            })
            .spawn()
        };

        switch(); // runs the sleeper until it parks on `queue`
        assert_eq!(*result.lock(), None);
        assert_eq!(sleeper.status(), TaskStatus::SleepingCancellable);

        cancel(&sleeper);
        switch(); // resumes it past the wake point

        assert_eq!(*result.lock(), Some(SleepResult::Cancelled));
    }

    #[test]
    #[serial]
    fn wakeup_on_makes_one_waiter_runnable_in_fifo_order() {
        let queue = Arc::new(WaitQueue::new());
        let order = Arc::new(SpinLock::new(Vec::new()));

        for id in 0..2u8 {
            let queue = queue.clone();
            let order = order.clone();
            TaskOptions::new(move || {
                sleep_on(&queue);
                order.lock().push(id);
                Task::exit(0);
            })
            .spawn();
        }

        switch(); // both tasks run up to their `sleep_on` and park

        assert!(wakeup_on(&queue).is_some());
        switch();
        assert_eq!(*order.lock(), [0]);

        assert!(wakeup_on(&queue).is_some());
        switch();
        assert_eq!(*order.lock(), [0, 1]);

        assert!(wakeup_on(&queue).is_none());
    }
}
