//! Worker Pools
//!
//! Fixed-size pools of named threads draining an unbounded pending
//! queue of tasks. The fetch pool and the decode pool are two
//! independent instances differing only in thread count and runner.
//!
//! Pending work can be removed best-effort before a thread picks it up
//! (`remove`), and the pending queue can be snapshotted for bulk
//! cancellation (`pending`). Threads wake at least once per keep-alive
//! interval to observe shutdown.

use std::collections::VecDeque;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use parking_lot::{Condvar, Mutex};

use crate::task::PhotoTask;

type Runner = dyn Fn(Arc<PhotoTask>) + Send + Sync;

struct PoolShared {
    queue: Mutex<VecDeque<Arc<PhotoTask>>>,
    available: Condvar,
    shutdown: Mutex<bool>,
    keep_alive: Duration,
    runner: Box<Runner>,
}

pub(crate) struct WorkerPool {
    shared: Arc<PoolShared>,
    handles: Mutex<Vec<JoinHandle<()>>>,
}

impl WorkerPool {
    /// Spawn `threads` named worker threads running `runner` over each
    /// dequeued task.
    pub fn new(
        name: &str,
        threads: usize,
        keep_alive: Duration,
        runner: impl Fn(Arc<PhotoTask>) + Send + Sync + 'static,
    ) -> Self {
        let shared = Arc::new(PoolShared {
            queue: Mutex::new(VecDeque::new()),
            available: Condvar::new(),
            shutdown: Mutex::new(false),
            keep_alive,
            runner: Box::new(runner),
        });

        let mut handles = Vec::with_capacity(threads.max(1));
        for i in 0..threads.max(1) {
            let shared = shared.clone();
            let handle = std::thread::Builder::new()
                .name(format!("{name}-{i}"))
                .spawn(move || worker_loop(shared))
                .expect("failed to spawn worker thread");
            handles.push(handle);
        }

        Self {
            shared,
            handles: Mutex::new(handles),
        }
    }

    /// Queue a task for execution.
    pub fn execute(&self, task: Arc<PhotoTask>) {
        self.shared.queue.lock().push_back(task);
        self.shared.available.notify_one();
    }

    /// Remove a not-yet-started task from the pending queue.
    ///
    /// Best-effort: returns false when the task already left the queue.
    pub fn remove(&self, task: &Arc<PhotoTask>) -> bool {
        let mut queue = self.shared.queue.lock();
        if let Some(pos) = queue.iter().position(|t| Arc::ptr_eq(t, task)) {
            queue.remove(pos);
            true
        } else {
            false
        }
    }

    /// Snapshot of the pending (not yet started) tasks.
    pub fn pending(&self) -> Vec<Arc<PhotoTask>> {
        self.shared.queue.lock().iter().cloned().collect()
    }

    /// Stop accepting visible work and join all threads. Pending tasks
    /// that no thread has picked up are discarded.
    pub fn shutdown(&self) {
        *self.shared.shutdown.lock() = true;
        self.shared.available.notify_all();

        let handles = std::mem::take(&mut *self.handles.lock());
        for handle in handles {
            let _ = handle.join();
        }
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn worker_loop(shared: Arc<PoolShared>) {
    loop {
        let task = {
            let mut queue = shared.queue.lock();
            loop {
                if *shared.shutdown.lock() {
                    return;
                }
                if let Some(task) = queue.pop_front() {
                    break task;
                }
                shared.available.wait_for(&mut queue, shared.keep_alive);
            }
        };

        (shared.runner)(task);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Instant;

    const KEEP_ALIVE: Duration = Duration::from_millis(50);

    fn wait_until(deadline: Duration, mut done: impl FnMut() -> bool) -> bool {
        let start = Instant::now();
        while start.elapsed() < deadline {
            if done() {
                return true;
            }
            std::thread::sleep(Duration::from_millis(5));
        }
        done()
    }

    #[test]
    fn test_executes_queued_tasks() {
        let ran = Arc::new(AtomicUsize::new(0));
        let counter = ran.clone();
        let pool = WorkerPool::new("test-exec", 2, KEEP_ALIVE, move |_task| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        for _ in 0..5 {
            pool.execute(PhotoTask::new());
        }

        assert!(wait_until(Duration::from_secs(5), || {
            ran.load(Ordering::SeqCst) == 5
        }));
    }

    #[test]
    fn test_remove_pending_task() {
        let gate = Arc::new((Mutex::new(false), Condvar::new()));
        let ran = Arc::new(AtomicUsize::new(0));

        let runner_gate = gate.clone();
        let counter = ran.clone();
        // Single thread so the second task stays pending while the
        // first blocks on the gate.
        let pool = WorkerPool::new("test-remove", 1, KEEP_ALIVE, move |_task| {
            counter.fetch_add(1, Ordering::SeqCst);
            let (lock, cv) = &*runner_gate;
            let mut open = lock.lock();
            while !*open {
                cv.wait(&mut open);
            }
        });

        let first = PhotoTask::new();
        let second = PhotoTask::new();
        pool.execute(first.clone());
        assert!(wait_until(Duration::from_secs(5), || {
            ran.load(Ordering::SeqCst) == 1
        }));

        pool.execute(second.clone());
        assert_eq!(pool.pending().len(), 1);
        assert!(pool.remove(&second));
        assert!(!pool.remove(&second));
        assert!(pool.pending().is_empty());

        let (lock, cv) = &*gate;
        *lock.lock() = true;
        cv.notify_all();

        std::thread::sleep(Duration::from_millis(100));
        assert_eq!(ran.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_shutdown_joins_idle_threads() {
        let pool = WorkerPool::new("test-shutdown", 4, KEEP_ALIVE, |_task| {});
        pool.shutdown();
        assert!(pool.handles.lock().is_empty());
    }
}
