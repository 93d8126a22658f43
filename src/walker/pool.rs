//! Queue-per-thread task pool.
//!
//! Each worker owns one FIFO queue. Any task may push work onto any queue,
//! including its own, through the [`TaskContext`] it is handed. There is no
//! stealing: placement is decided by whoever enqueues. `wait()` returns once
//! no task is queued or running anywhere in the pool.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread::{self, JoinHandle};

use crossbeam_channel as channel;
use parking_lot::{Condvar, Mutex};

use crate::core::errors::{Result, RollupError};

/// A unit of work. Receives the context of the worker that runs it.
pub type Task = Box<dyn FnOnce(&TaskContext) + Send + 'static>;

enum Message {
    Run(Task),
    Stop,
}

struct Shared {
    queues: Vec<channel::Sender<Message>>,
    outstanding: Mutex<usize>,
    drained: Condvar,
    completed: AtomicUsize,
    panicked: AtomicUsize,
    next_queue: AtomicUsize,
}

impl Shared {
    fn submit(&self, queue: usize, task: Task) {
        let index = queue % self.queues.len();
        *self.outstanding.lock() += 1;
        if self.queues[index].send(Message::Run(task)).is_err() {
            eprintln!("[GUR-POOL] queue {index} is closed; task dropped");
            self.finish_one();
        }
    }

    fn finish_one(&self) {
        let mut outstanding = self.outstanding.lock();
        *outstanding = outstanding.saturating_sub(1);
        if *outstanding == 0 {
            self.drained.notify_all();
        }
    }

    fn round_robin(&self) -> usize {
        self.next_queue.fetch_add(1, Ordering::Relaxed) % self.queues.len()
    }
}

/// Handle given to a running task: identifies its worker and lets it enqueue more work.
pub struct TaskContext {
    worker: usize,
    shared: Arc<Shared>,
}

impl TaskContext {
    /// Index of the worker (and of its queue) running the current task.
    pub fn worker_id(&self) -> usize {
        self.worker
    }

    /// Number of workers in the pool.
    pub fn thread_count(&self) -> usize {
        self.shared.queues.len()
    }

    /// Push a task onto `queue` (taken modulo the thread count).
    pub fn enqueue<F>(&self, queue: usize, task: F)
    where
        F: FnOnce(&TaskContext) + Send + 'static,
    {
        self.shared.submit(queue, Box::new(task));
    }

    /// Push a task onto the next queue in round-robin order.
    pub fn enqueue_next<F>(&self, task: F)
    where
        F: FnOnce(&TaskContext) + Send + 'static,
    {
        let queue = self.shared.round_robin();
        self.shared.submit(queue, Box::new(task));
    }
}

/// Fixed pool of worker threads, one FIFO queue per worker.
pub struct QueuePool {
    shared: Arc<Shared>,
    workers: Vec<JoinHandle<()>>,
}

impl QueuePool {
    /// Spawn `threads` workers. Fails if `threads` is zero or a thread cannot start.
    pub fn start(threads: usize) -> Result<Self> {
        if threads == 0 {
            return Err(RollupError::InvalidConfig {
                details: "task pool needs at least one thread".to_string(),
            });
        }

        let (senders, receivers): (Vec<_>, Vec<_>) =
            (0..threads).map(|_| channel::unbounded::<Message>()).unzip();

        let shared = Arc::new(Shared {
            queues: senders,
            outstanding: Mutex::new(0),
            drained: Condvar::new(),
            completed: AtomicUsize::new(0),
            panicked: AtomicUsize::new(0),
            next_queue: AtomicUsize::new(0),
        });

        let mut pool = Self {
            shared: Arc::clone(&shared),
            workers: Vec::with_capacity(threads),
        };

        for (worker, receiver) in receivers.into_iter().enumerate() {
            let ctx = TaskContext {
                worker,
                shared: Arc::clone(&shared),
            };
            let spawned = thread::Builder::new()
                .name(format!("gufi-worker-{worker}"))
                .spawn(move || worker_loop(&ctx, &receiver));
            match spawned {
                Ok(handle) => pool.workers.push(handle),
                Err(err) => {
                    pool.shutdown();
                    return Err(RollupError::Pool {
                        details: format!("failed to start worker {worker} of {threads}: {err}"),
                    });
                }
            }
        }

        Ok(pool)
    }

    /// Push a task onto `queue` (taken modulo the thread count).
    pub fn enqueue<F>(&self, queue: usize, task: F)
    where
        F: FnOnce(&TaskContext) + Send + 'static,
    {
        self.shared.submit(queue, Box::new(task));
    }

    /// Block until every queue is empty and every worker is idle.
    pub fn wait(&self) {
        let mut outstanding = self.shared.outstanding.lock();
        while *outstanding > 0 {
            self.shared.drained.wait(&mut outstanding);
        }
    }

    /// Number of worker threads.
    pub fn thread_count(&self) -> usize {
        self.shared.queues.len()
    }

    /// Tasks that have finished running, including ones that panicked.
    pub fn tasks_completed(&self) -> usize {
        self.shared.completed.load(Ordering::Acquire)
    }

    /// Tasks that panicked. Their panic was contained to the task.
    pub fn tasks_panicked(&self) -> usize {
        self.shared.panicked.load(Ordering::Acquire)
    }

    /// Drain outstanding work, then stop and join every worker.
    pub fn shutdown(&mut self) {
        if self.workers.is_empty() {
            return;
        }
        self.wait();
        for queue in &self.shared.queues {
            let _ = queue.send(Message::Stop);
        }
        for handle in self.workers.drain(..) {
            if handle.join().is_err() {
                eprintln!("[GUR-POOL] worker thread exited abnormally");
            }
        }
    }
}

impl Drop for QueuePool {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn worker_loop(ctx: &TaskContext, receiver: &channel::Receiver<Message>) {
    for message in receiver {
        match message {
            Message::Run(task) => {
                if catch_unwind(AssertUnwindSafe(|| task(ctx))).is_err() {
                    ctx.shared.panicked.fetch_add(1, Ordering::AcqRel);
                    eprintln!("[GUR-POOL] task panicked on worker {}", ctx.worker);
                }
                ctx.shared.completed.fetch_add(1, Ordering::AcqRel);
                ctx.shared.finish_one();
            }
            Message::Stop => return,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn zero_threads_is_rejected() {
        let err = QueuePool::start(0).err().expect("zero threads must fail");
        assert_eq!(err.code(), "GUR-1001");
    }

    #[test]
    fn tasks_run_on_their_target_queue() {
        let pool = QueuePool::start(3).unwrap();
        let seen = Arc::new(Mutex::new(Vec::new()));
        for queue in 0..9 {
            let seen = Arc::clone(&seen);
            pool.enqueue(queue, move |ctx| {
                seen.lock().push((queue % 3, ctx.worker_id()));
            });
        }
        pool.wait();
        let seen = seen.lock();
        assert_eq!(seen.len(), 9);
        assert!(seen.iter().all(|(expected, actual)| expected == actual));
    }

    fn fan_out(ctx: &TaskContext, depth: usize, counter: Arc<AtomicUsize>) {
        counter.fetch_add(1, Ordering::Relaxed);
        if depth == 0 {
            return;
        }
        for _ in 0..2 {
            let counter = Arc::clone(&counter);
            ctx.enqueue_next(move |ctx| fan_out(ctx, depth - 1, counter));
        }
    }

    #[test]
    fn wait_covers_work_enqueued_by_tasks() {
        let pool = QueuePool::start(4).unwrap();
        let counter = Arc::new(AtomicUsize::new(0));
        let root_counter = Arc::clone(&counter);
        pool.enqueue(0, move |ctx| fan_out(ctx, 6, root_counter));
        pool.wait();
        // Full binary tree of depth 6.
        assert_eq!(counter.load(Ordering::Relaxed), (1 << 7) - 1);
        assert_eq!(pool.tasks_completed(), (1 << 7) - 1);
    }

    #[test]
    fn enqueue_next_spreads_across_workers() {
        let pool = QueuePool::start(2).unwrap();
        let workers = Arc::new(Mutex::new(HashSet::new()));
        let outer = Arc::clone(&workers);
        pool.enqueue(0, move |ctx| {
            for _ in 0..4 {
                let workers = Arc::clone(&outer);
                ctx.enqueue_next(move |ctx| {
                    workers.lock().insert(ctx.worker_id());
                });
            }
        });
        pool.wait();
        assert_eq!(workers.lock().len(), 2);
    }

    #[test]
    fn panicking_task_does_not_wedge_wait() {
        let pool = QueuePool::start(2).unwrap();
        pool.enqueue(0, |_| panic!("boom"));
        let ran = Arc::new(AtomicUsize::new(0));
        let after = Arc::clone(&ran);
        pool.enqueue(0, move |_| {
            after.fetch_add(1, Ordering::Relaxed);
        });
        pool.wait();
        assert_eq!(pool.tasks_panicked(), 1);
        assert_eq!(ran.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn shutdown_is_idempotent() {
        let mut pool = QueuePool::start(2).unwrap();
        pool.enqueue(1, |_| {});
        pool.shutdown();
        pool.shutdown();
        assert_eq!(pool.tasks_completed(), 1);
    }
}
