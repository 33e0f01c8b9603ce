//! A small work-stealing thread pool and the barrier used to detect that a
//! saturation has gone quiet.

use std::{
    cell::RefCell,
    panic::{catch_unwind, AssertUnwindSafe},
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Arc,
    },
    thread::JoinHandle,
};

use crossbeam_deque::{Injector, Steal, Stealer, Worker};
use log::{debug, error};
use parking_lot::{Condvar, Mutex};

pub type Job = Box<dyn FnOnce() + Send + 'static>;

static NEXT_POOL_ID: AtomicUsize = AtomicUsize::new(0);

struct LocalQueue {
    pool: usize,
    queue: Worker<Job>,
}

thread_local! {
    /// The deque of the pool worker running on this thread, if any.
    static LOCAL: RefCell<Option<LocalQueue>> = const { RefCell::new(None) };
}

struct Shared {
    id: usize,
    injector: Injector<Job>,
    stealers: Vec<Stealer<Job>>,
    stop: AtomicBool,
    /// Held by submitters while notifying and by idle workers while they
    /// re-check for work, so a wakeup cannot fall between the two.
    idle: Mutex<()>,
    wake: Condvar,
}

impl Shared {
    fn find_job(&self) -> Option<Job> {
        // First try the local deque.
        let local = LOCAL.with(|local| {
            local
                .borrow()
                .as_ref()
                .filter(|l| l.pool == self.id)
                .and_then(|l| l.queue.pop())
        });
        if local.is_some() {
            return local;
        }

        loop {
            match self.injector.steal() {
                Steal::Success(job) => return Some(job),
                Steal::Empty => break,
                Steal::Retry => continue,
            }
        }

        for stealer in &self.stealers {
            loop {
                match stealer.steal() {
                    Steal::Success(job) => return Some(job),
                    Steal::Empty => break,
                    Steal::Retry => continue,
                }
            }
        }
        None
    }

    fn run_worker(self: Arc<Self>, index: usize, queue: Worker<Job>) {
        LOCAL.with(|local| {
            *local.borrow_mut() = Some(LocalQueue {
                pool: self.id,
                queue,
            })
        });
        while !self.stop.load(Ordering::Acquire) {
            if let Some(job) = self.find_job() {
                self.run(index, job);
                continue;
            }
            let mut guard = self.idle.lock();
            if self.stop.load(Ordering::Acquire) {
                break;
            }
            match self.find_job() {
                Some(job) => {
                    drop(guard);
                    self.run(index, job);
                }
                None => self.wake.wait(&mut guard),
            }
        }
        LOCAL.with(|local| local.borrow_mut().take());
    }

    fn run(&self, index: usize, job: Job) {
        if catch_unwind(AssertUnwindSafe(job)).is_err() {
            error!("Job panicked on worker {} of pool {}", index, self.id);
        }
    }
}

/// Runs jobs on a fixed set of threads. A job submitted from one of the
/// pool's own workers goes onto that worker's deque; any other submission
/// goes to the shared injector. Idle workers steal from both.
pub struct WorkStealingPool {
    shared: Arc<Shared>,
    threads: Mutex<Vec<JoinHandle<()>>>,
}

impl WorkStealingPool {
    pub fn new(threads: usize) -> Self {
        let threads = threads.max(1);
        let queues: Vec<Worker<Job>> = (0..threads).map(|_| Worker::new_lifo()).collect();
        let shared = Arc::new(Shared {
            id: NEXT_POOL_ID.fetch_add(1, Ordering::Relaxed),
            injector: Injector::new(),
            stealers: queues.iter().map(Worker::stealer).collect(),
            stop: AtomicBool::new(false),
            idle: Mutex::new(()),
            wake: Condvar::new(),
        });
        let threads = queues
            .into_iter()
            .enumerate()
            .map(|(index, queue)| {
                let shared = Arc::clone(&shared);
                std::thread::spawn(move || shared.run_worker(index, queue))
            })
            .collect::<Vec<_>>();
        debug!("Started pool {} with {} workers", shared.id, threads.len());
        Self {
            shared,
            threads: Mutex::new(threads),
        }
    }

    pub fn submit(&self, job: Job) {
        let job = LOCAL.with(|local| match local.borrow().as_ref() {
            Some(l) if l.pool == self.shared.id => {
                l.queue.push(job);
                None
            }
            _ => Some(job),
        });
        if let Some(job) = job {
            self.shared.injector.push(job);
        }
        let _guard = self.shared.idle.lock();
        self.shared.wake.notify_one();
    }

    /// Whether the calling thread is one of this pool's workers.
    pub fn on_worker_thread(&self) -> bool {
        LOCAL.with(|local| {
            local
                .borrow()
                .as_ref()
                .is_some_and(|l| l.pool == self.shared.id)
        })
    }

    pub fn threads(&self) -> usize {
        self.threads.lock().len()
    }

    /// Stops the workers once they finish their current job and joins them.
    /// Queued jobs are dropped.
    pub fn shutdown(&self) {
        let threads: Vec<JoinHandle<()>> = self.threads.lock().drain(..).collect();
        if threads.is_empty() {
            return;
        }
        self.shared.stop.store(true, Ordering::Release);
        {
            let _guard = self.shared.idle.lock();
            self.shared.wake.notify_all();
        }
        let current = std::thread::current().id();
        for handle in threads {
            // The last handle to the pool may be dropped by one of its jobs.
            if handle.thread().id() == current {
                continue;
            }
            if handle.join().is_err() {
                error!("Worker of pool {} panicked", self.shared.id);
            }
        }
        debug!("Stopped pool {}", self.shared.id);
    }
}

impl Drop for WorkStealingPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Counts outstanding jobs. Every submission increments the count before the
/// job is queued, and every job decrements it when it finishes, after having
/// counted its own submissions. The count therefore reaches zero only once no
/// job is queued or running.
#[derive(Debug, Default)]
pub struct CountingBarrier {
    count: Mutex<usize>,
    zero: Condvar,
}

impl CountingBarrier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn increment(&self) {
        *self.count.lock() += 1;
    }

    pub fn decrement(&self) {
        let mut count = self.count.lock();
        debug_assert!(*count > 0, "barrier decremented below zero");
        *count = count.saturating_sub(1);
        if *count == 0 {
            self.zero.notify_all();
        }
    }

    /// Blocks until the count is zero.
    pub fn wait(&self) {
        let mut count = self.count.lock();
        // Condvar waits may wake spuriously.
        while *count > 0 {
            self.zero.wait(&mut count);
        }
    }

    pub fn count(&self) -> usize {
        *self.count.lock()
    }
}

/// Decrements a barrier when dropped, so a panicking job still counts as done.
pub struct BarrierGuard(pub Arc<CountingBarrier>);

impl Drop for BarrierGuard {
    fn drop(&mut self) {
        self.0.decrement();
    }
}
