// SPDX-License-Identifier: MPL-2.0

use alloc::{collections::VecDeque, sync::Arc};

use super::SpinLock;
use crate::task::Task;

/// A FIFO of parked threads (spec component A).
///
/// `WaitQueue` itself never blocks: it is a bookkeeping structure used by
/// the scheduler (`sleep_on`/`wakeup_on`/`broadcast_on`) and by the
/// run queue. Parking and resuming a thread is the scheduler's job, not
/// this type's.
pub struct WaitQueue {
    parked: SpinLock<VecDeque<Arc<Task>>>,
}

impl WaitQueue {
    pub const fn new() -> Self {
        Self {
            parked: SpinLock::new(VecDeque::new()),
        }
    }

    pub fn enqueue(&self, task: Arc<Task>) {
        self.parked.lock().push_back(task);
    }

    pub fn dequeue(&self) -> Option<Arc<Task>> {
        self.parked.lock().pop_front()
    }

    /// Drains every parked thread, in FIFO order.
    pub fn broadcast(&self) -> VecDeque<Arc<Task>> {
        core::mem::take(&mut *self.parked.lock())
    }

    /// Removes a specific thread from the middle of the queue (used by
    /// `cancel`). Returns true if the thread was found and removed.
    pub fn remove(&self, task: &Arc<Task>) -> bool {
        let mut parked = self.parked.lock();
        if let Some(pos) = parked.iter().position(|t| Arc::ptr_eq(t, task)) {
            parked.remove(pos);
            true
        } else {
            false
        }
    }

    pub fn is_empty(&self) -> bool {
        self.parked.lock().is_empty()
    }

    pub fn len(&self) -> usize {
        self.parked.lock().len()
    }
}

impl Default for WaitQueue {
    fn default() -> Self {
        Self::new()
    }
}
