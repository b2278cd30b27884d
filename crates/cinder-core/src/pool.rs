//! Worker pool for deferred destruction.
//!
//! A fixed set of OS threads consuming one FIFO task queue under a
//! mutex and a "not empty" condition variable. The pool exists so that
//! dropping a large sorted set never happens on the event-loop thread;
//! workers only ever receive values that have already been removed from
//! the keyspace, so there is no shared state beyond the queue itself.
//!
//! Plain `std::thread` rather than an async runtime: destructor work is
//! CPU-bound and the rest of the server is a synchronous poll loop.

use std::collections::VecDeque;
use std::sync::{Arc, Condvar, Mutex};
use std::thread::{self, JoinHandle};

/// A unit of work: owns everything it needs and runs exactly once.
type Task = Box<dyn FnOnce() + Send + 'static>;

/// Queue state shared between submitters and workers. The shutdown flag
/// lives under the same mutex as the queue so workers observe the two
/// consistently.
struct Shared {
    tasks: VecDeque<Task>,
    shutdown: bool,
}

/// A fixed-size pool of worker threads.
///
/// Dropping the pool flips the shutdown flag, wakes every worker, and
/// joins them. Workers drain the queue before exiting, so every task
/// submitted before shutdown runs exactly once.
pub struct WorkerPool {
    shared: Arc<(Mutex<Shared>, Condvar)>,
    workers: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    /// Default number of worker threads.
    pub const DEFAULT_WORKERS: usize = 4;

    /// Spawns a pool with `workers` threads (at least one).
    pub fn new(workers: usize) -> Self {
        let shared = Arc::new((
            Mutex::new(Shared {
                tasks: VecDeque::new(),
                shutdown: false,
            }),
            Condvar::new(),
        ));

        let workers = workers.max(1);
        let handles = (0..workers)
            .map(|i| {
                let shared = Arc::clone(&shared);
                thread::Builder::new()
                    .name(format!("cinder-worker-{i}"))
                    .spawn(move || worker_loop(&shared))
                    .expect("failed to spawn worker thread")
            })
            .collect();

        Self {
            shared,
            workers: handles,
        }
    }

    /// Enqueues a task and wakes one waiting worker. O(1).
    ///
    /// Submissions after shutdown has begun are silently dropped; by
    /// then the only submitter left is the pool's own teardown path.
    pub fn submit<F>(&self, task: F)
    where
        F: FnOnce() + Send + 'static,
    {
        let (lock, not_empty) = &*self.shared;
        let mut shared = lock.lock().unwrap();
        if shared.shutdown {
            return;
        }
        shared.tasks.push_back(Box::new(task));
        not_empty.notify_one();
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        {
            let (lock, not_empty) = &*self.shared;
            lock.lock().unwrap().shutdown = true;
            not_empty.notify_all();
        }

        for handle in self.workers.drain(..) {
            let _ = handle.join();
        }
    }
}

/// Worker start-up function: pop and run tasks until shutdown, draining
/// whatever is still queued before exiting.
fn worker_loop(shared: &(Mutex<Shared>, Condvar)) {
    let (lock, not_empty) = shared;
    loop {
        let task = {
            let mut shared = lock.lock().unwrap();
            loop {
                if let Some(task) = shared.tasks.pop_front() {
                    break task;
                }
                if shared.shutdown {
                    return;
                }
                shared = not_empty.wait(shared).unwrap();
            }
        };

        // run outside the lock so long tasks never block submitters
        task();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::mpsc;
    use std::time::Duration;

    #[test]
    fn runs_a_task() {
        let pool = WorkerPool::new(2);
        let (tx, rx) = mpsc::channel();
        pool.submit(move || tx.send(42).unwrap());
        assert_eq!(rx.recv_timeout(Duration::from_secs(5)).unwrap(), 42);
    }

    #[test]
    fn every_task_runs_exactly_once_across_shutdown() {
        let counter = Arc::new(AtomicUsize::new(0));
        let pool = WorkerPool::new(4);

        const TASKS: usize = 500;
        for _ in 0..TASKS {
            let counter = Arc::clone(&counter);
            pool.submit(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            });
        }

        // dropping the pool must drain the queue and join every worker
        drop(pool);
        assert_eq!(counter.load(Ordering::SeqCst), TASKS);
    }

    #[test]
    fn tasks_own_their_payload() {
        let pool = WorkerPool::new(1);
        let (tx, rx) = mpsc::channel();
        let payload = vec![1u8; 1024];
        pool.submit(move || {
            // the task owns and drops the payload
            tx.send(payload.len()).unwrap();
        });
        assert_eq!(rx.recv_timeout(Duration::from_secs(5)).unwrap(), 1024);
    }

    #[test]
    fn single_worker_preserves_fifo_order() {
        let pool = WorkerPool::new(1);
        let (tx, rx) = mpsc::channel();
        for i in 0..10 {
            let tx = tx.clone();
            pool.submit(move || tx.send(i).unwrap());
        }
        drop(pool);
        let order: Vec<i32> = rx.try_iter().collect();
        assert_eq!(order, (0..10).collect::<Vec<_>>());
    }

    #[test]
    fn zero_workers_is_clamped_to_one() {
        let pool = WorkerPool::new(0);
        let (tx, rx) = mpsc::channel();
        pool.submit(move || tx.send(()).unwrap());
        assert!(rx.recv_timeout(Duration::from_secs(5)).is_ok());
    }
}
