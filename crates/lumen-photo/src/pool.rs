//! Task Free Pool
//!
//! Unbounded free list of recycled tasks. A task's identity persists
//! across many requests: it is acquired at `start_load`, recycled on
//! terminal completion, and handed out again for a later request.

use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::task::PhotoTask;

pub(crate) struct TaskPool {
    free: Mutex<VecDeque<Arc<PhotoTask>>>,
}

impl TaskPool {
    pub fn new() -> Self {
        Self {
            free: Mutex::new(VecDeque::new()),
        }
    }

    /// Take a free task, if any. Callers allocate on `None`.
    pub fn acquire(&self) -> Option<Arc<PhotoTask>> {
        self.free.lock().pop_front()
    }

    /// Return a recycled task to the pool.
    pub fn release(&self, task: Arc<PhotoTask>) {
        self.free.lock().push_back(task);
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.free.lock().len()
    }
}
