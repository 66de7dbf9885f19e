/*!
 * Worker Pool
 * Fixed-concurrency worker pool and the deferred micro-queue
 *
 * The pool is deliberately dumb: ordering among concurrently submitted
 * tasks is unspecified, and every accepted task eventually runs. Results
 * travel through operation result cells, never through the pool itself.
 */

use crate::core::limits::DEFAULT_IO_PARALLELISM;
use crossbeam_queue::SegQueue;
use parking_lot::{Condvar, Mutex};
use std::cell::RefCell;
use std::collections::VecDeque;
use std::sync::{Arc, OnceLock};
use std::thread::JoinHandle;
use tracing::debug;

/// A unit of work accepted by the pool
pub type PoolTask = Box<dyn FnOnce() + Send + 'static>;

struct PoolShared {
    queue: SegQueue<PoolTask>,
    /// Guards the shutdown flag; also serializes push+notify against the
    /// workers' check-then-wait to avoid lost wakeups.
    gate: Mutex<bool>,
    available: Condvar,
}

/// Fixed worker pool driving operation thunks.
///
/// Workers pop from a lock-free injector queue and park on a condvar when
/// idle. Dropping the pool stops the workers after the queue is drained.
pub struct WorkerPool {
    shared: Arc<PoolShared>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    concurrency: usize,
}

impl WorkerPool {
    /// Spawn a pool with the given number of worker threads
    pub fn new(threads: usize) -> Arc<Self> {
        assert!(threads > 0, "worker pool needs at least one thread");
        let shared = Arc::new(PoolShared {
            queue: SegQueue::new(),
            gate: Mutex::new(false),
            available: Condvar::new(),
        });

        let mut workers = Vec::with_capacity(threads);
        for index in 0..threads {
            let shared = Arc::clone(&shared);
            workers.push(
                std::thread::Builder::new()
                    .name(format!("iodispatch-worker-{index}"))
                    .spawn(move || worker_loop(&shared))
                    .expect("failed to spawn worker thread"),
            );
        }

        debug!(threads, "worker pool started");
        Arc::new(Self {
            shared,
            workers: Mutex::new(workers),
            concurrency: threads,
        })
    }

    /// Submit a task. Fails (returning the task) only after shutdown has
    /// begun.
    pub(crate) fn submit_task(&self, task: PoolTask) -> Result<(), PoolTask> {
        let shutdown = self.shared.gate.lock();
        if *shutdown {
            return Err(task);
        }
        self.shared.queue.push(task);
        self.shared.available.notify_one();
        Ok(())
    }

    /// Submit a closure for execution on the pool
    pub fn submit<F>(&self, task: F) -> bool
    where
        F: FnOnce() + Send + 'static,
    {
        self.submit_task(Box::new(task)).is_ok()
    }

    /// The fixed number of worker threads
    pub fn concurrency(&self) -> usize {
        self.concurrency
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        {
            let mut shutdown = self.shared.gate.lock();
            *shutdown = true;
        }
        self.shared.available.notify_all();
        // The last reference can die on a worker (a completion holding the
        // engine alive): that thread must not join itself
        let current = std::thread::current().id();
        for worker in self.workers.lock().drain(..) {
            if worker.thread().id() == current {
                continue;
            }
            let _ = worker.join();
        }
    }
}

fn worker_loop(shared: &PoolShared) {
    loop {
        if let Some(task) = shared.queue.pop() {
            task();
            continue;
        }
        let mut shutdown = shared.gate.lock();
        if *shutdown {
            break;
        }
        // Re-check under the gate: a submitter pushes while holding it,
        // so either we see the task here or the notify reaches our wait.
        if let Some(task) = shared.queue.pop() {
            drop(shutdown);
            task();
            continue;
        }
        shared.available.wait(&mut shutdown);
    }
    // Tasks accepted before shutdown still run
    while let Some(task) = shared.queue.pop() {
        task();
    }
}

/// The process-wide shared pool used by dispatchers that do not bring
/// their own. This is effectively how many file I/O operations the
/// process performs at once.
pub fn process_pool() -> Arc<WorkerPool> {
    static PROCESS_POOL: OnceLock<Arc<WorkerPool>> = OnceLock::new();
    Arc::clone(PROCESS_POOL.get_or_init(|| WorkerPool::new(DEFAULT_IO_PARALLELISM)))
}

/// Scope-bound queue of thunks that must run before the current dispatcher
/// call returns.
///
/// Continuations flagged for immediate completion are pushed here by the
/// chaining and completion engines and flushed, in insertion order, when
/// the submission scope unwinds. The queue never touches the pool's locks.
#[derive(Default)]
pub struct ImmediateQueue {
    tasks: RefCell<VecDeque<Box<dyn FnOnce()>>>,
}

impl ImmediateQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push<F>(&self, task: F)
    where
        F: FnOnce() + 'static,
    {
        self.tasks.borrow_mut().push_back(Box::new(task));
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.borrow().is_empty()
    }
}

impl Drop for ImmediateQueue {
    fn drop(&mut self) {
        // A flushed task may push further tasks; keep draining until quiet
        loop {
            let task = self.tasks.borrow_mut().pop_front();
            match task {
                Some(task) => task(),
                None => break,
            }
        }
    }
}
