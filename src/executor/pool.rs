//! Bounded worker pool with caller-runs backpressure

use super::{Executor, Task};
use crate::config::PoolConfig;
use crate::error::{EventError, Result};
use crate::subscriber::panic_message;
use crossbeam::channel::{self, Receiver, RecvTimeoutError, Sender, TrySendError};
use parking_lot::{Condvar, Mutex, RwLock};
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

static POOL_SEQ: AtomicUsize = AtomicUsize::new(1);

/// Shared bounded worker pool
///
/// Never drops or blocks on a task while running: a full queue first grows
/// the pool up to `max_workers`, then falls back to running the task on the
/// submitting thread, which throttles a bursty producer.
pub struct WorkerPool {
    shared: Arc<Shared>,
}

struct Shared {
    name: String,
    sender: RwLock<Option<Sender<Task>>>,
    receiver: Receiver<Task>,
    max_workers: usize,
    keep_alive: Duration,
    thread_seq: AtomicUsize,
    live: Mutex<usize>,
    terminated: Condvar,
    shutdown: AtomicBool,
}

enum Submit {
    Queued,
    Grown,
    CallerRuns(Task),
}

impl WorkerPool {
    /// Start a pool with `config.core_workers` workers
    pub fn new(config: &PoolConfig) -> Result<Self> {
        config.validate()?;

        let (sender, receiver) = channel::bounded(config.queue_capacity);
        let name = format!(
            "{}-pool-{}",
            config.thread_name_prefix,
            POOL_SEQ.fetch_add(1, Ordering::Relaxed)
        );

        let pool = Self {
            shared: Arc::new(Shared {
                name,
                sender: RwLock::new(Some(sender)),
                receiver,
                max_workers: config.max_workers,
                keep_alive: config.keep_alive(),
                thread_seq: AtomicUsize::new(1),
                live: Mutex::new(0),
                terminated: Condvar::new(),
                shutdown: AtomicBool::new(false),
            }),
        };

        for _ in 0..config.core_workers {
            *pool.shared.live.lock() += 1;
            if let Err((e, _)) = pool.shared.spawn_worker(None, true) {
                return Err(EventError::Config(format!(
                    "Failed to start worker for {}: {}",
                    pool.shared.name, e
                )));
            }
        }

        tracing::debug!(
            pool = %pool.shared.name,
            core = config.core_workers,
            max = config.max_workers,
            capacity = config.queue_capacity,
            "Worker pool started"
        );

        Ok(pool)
    }

    /// Pool name, the prefix of its worker thread names
    pub fn name(&self) -> &str {
        &self.shared.name
    }

    /// Workers currently alive
    pub fn live_workers(&self) -> usize {
        *self.shared.live.lock()
    }

    /// Tasks waiting in the queue
    pub fn queued(&self) -> usize {
        self.shared.receiver.len()
    }

    /// Whether `shutdown` has been called
    pub fn is_shutdown(&self) -> bool {
        self.shared.shutdown.load(Ordering::Acquire)
    }

    /// Stop accepting tasks
    ///
    /// Already queued tasks still run; workers exit once the queue is
    /// drained. Does not wait for that, see [`await_termination`](Self::await_termination).
    /// Returns `false` if the pool was already shut down.
    pub fn shutdown(&self) -> bool {
        if self.shared.shutdown.swap(true, Ordering::AcqRel) {
            tracing::warn!(pool = %self.shared.name, "Worker pool already shut down");
            return false;
        }

        drop(self.shared.sender.write().take());
        tracing::info!(
            pool = %self.shared.name,
            queued = self.queued(),
            "Worker pool shutting down"
        );
        true
    }

    /// Wait until every worker has exited, up to `timeout`
    ///
    /// Only returns `true` after `shutdown`; core workers never exit otherwise.
    pub fn await_termination(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut live = self.shared.live.lock();
        while *live > 0 {
            if self
                .shared
                .terminated
                .wait_until(&mut live, deadline)
                .timed_out()
            {
                return *live == 0;
            }
        }
        true
    }

    fn rejected(&self, reason: &str) -> EventError {
        EventError::Rejected {
            executor: self.shared.name.clone(),
            reason: reason.to_string(),
        }
    }
}

impl Executor for WorkerPool {
    fn execute(&self, task: Task) -> Result<()> {
        let submit = {
            let sender = self.shared.sender.read();
            let Some(sender) = sender.as_ref() else {
                return Err(self.rejected("worker pool is shut down"));
            };

            match sender.try_send(task) {
                Ok(()) => Submit::Queued,
                Err(TrySendError::Disconnected(_)) => {
                    return Err(self.rejected("worker pool is shut down"));
                }
                Err(TrySendError::Full(task)) => match self.shared.grow(task) {
                    Ok(()) => Submit::Grown,
                    Err(task) => Submit::CallerRuns(task),
                },
            }
        };

        match submit {
            Submit::Queued => {}
            Submit::Grown => {
                tracing::debug!(pool = %self.shared.name, "Queue full, started extra worker");
            }
            Submit::CallerRuns(task) => {
                tracing::debug!(
                    pool = %self.shared.name,
                    "Queue full at max workers, running task on submitting thread"
                );
                run_task(&self.shared.name, task);
            }
        }
        Ok(())
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        if !self.is_shutdown() {
            self.shutdown();
        }
    }
}

impl Shared {
    /// Start an extra worker that takes `task` as its first job
    ///
    /// Hands the task back if the pool is at `max_workers` or the thread
    /// could not be spawned.
    fn grow(self: &Arc<Self>, task: Task) -> std::result::Result<(), Task> {
        {
            let mut live = self.live.lock();
            if *live >= self.max_workers {
                return Err(task);
            }
            *live += 1;
        }

        match self.spawn_worker(Some(task), false) {
            Ok(()) => Ok(()),
            Err((e, task)) => {
                tracing::warn!(pool = %self.name, error = %e, "Failed to spawn extra worker");
                match task {
                    Some(task) => Err(task),
                    None => Ok(()),
                }
            }
        }
    }

    /// Spawn a worker thread; the caller has already counted it in `live`
    fn spawn_worker(
        self: &Arc<Self>,
        first: Option<Task>,
        core: bool,
    ) -> std::result::Result<(), (std::io::Error, Option<Task>)> {
        let thread_name = format!(
            "{}-thread-{}",
            self.name,
            self.thread_seq.fetch_add(1, Ordering::Relaxed)
        );
        let slot = Arc::new(Mutex::new(first));
        let job = slot.clone();
        let shared = Arc::clone(self);

        let spawned = thread::Builder::new()
            .name(thread_name)
            .spawn(move || {
                let first = job.lock().take();
                shared.run_worker(first, core);
            });

        match spawned {
            Ok(_) => Ok(()),
            Err(e) => {
                self.worker_exited();
                let task = slot.lock().take();
                Err((e, task))
            }
        }
    }

    fn run_worker(&self, first: Option<Task>, core: bool) {
        if let Some(task) = first {
            run_task(&self.name, task);
        }

        loop {
            let next = if core {
                self.receiver.recv().ok()
            } else {
                match self.receiver.recv_timeout(self.keep_alive) {
                    Ok(task) => Some(task),
                    Err(RecvTimeoutError::Timeout) => {
                        tracing::debug!(pool = %self.name, "Idle extra worker retiring");
                        None
                    }
                    Err(RecvTimeoutError::Disconnected) => None,
                }
            };

            match next {
                Some(task) => run_task(&self.name, task),
                None => break,
            }
        }

        self.worker_exited();
    }

    fn worker_exited(&self) {
        let mut live = self.live.lock();
        *live -= 1;
        if *live == 0 {
            self.terminated.notify_all();
        }
    }
}

fn run_task(pool: &str, task: Task) {
    if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(task)) {
        tracing::error!(
            pool = %pool,
            panic = %panic_message(&*payload),
            "Task panicked on worker pool"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;

    fn config(core: usize, max: usize, capacity: usize) -> PoolConfig {
        PoolConfig {
            core_workers: core,
            max_workers: max,
            queue_capacity: capacity,
            keep_alive_secs: 60,
            thread_name_prefix: "test".to_string(),
        }
    }

    /// Occupies one worker until the returned sender is dropped or signalled
    fn block_worker(pool: &WorkerPool) -> mpsc::Sender<()> {
        let (started_tx, started_rx) = mpsc::channel();
        let (release_tx, release_rx) = mpsc::channel::<()>();
        pool.execute(Box::new(move || {
            started_tx.send(()).unwrap();
            let _ = release_rx.recv();
        }))
        .unwrap();
        started_rx.recv_timeout(Duration::from_secs(5)).unwrap();
        release_tx
    }

    #[test]
    fn test_runs_on_named_worker() {
        let pool = WorkerPool::new(&config(1, 1, 4)).unwrap();
        assert_eq!(pool.live_workers(), 1);

        let (tx, rx) = mpsc::channel();
        pool.execute(Box::new(move || {
            let name = thread::current().name().map(str::to_string);
            tx.send(name).unwrap();
        }))
        .unwrap();

        let name = rx.recv_timeout(Duration::from_secs(5)).unwrap().unwrap();
        assert!(name.starts_with("test-pool-"));
        assert!(name.ends_with("-thread-1"));
        assert!(name.starts_with(pool.name()));
    }

    #[test]
    fn test_caller_runs_when_saturated() {
        let pool = WorkerPool::new(&config(1, 1, 1)).unwrap();
        let release = block_worker(&pool);

        // Fills the single queue slot
        pool.execute(Box::new(|| {})).unwrap();
        assert_eq!(pool.queued(), 1);

        let caller = thread::current().id();
        let (tx, rx) = mpsc::channel();
        pool.execute(Box::new(move || {
            tx.send(thread::current().id()).unwrap();
        }))
        .unwrap();

        // Ran synchronously, before execute returned
        assert_eq!(rx.try_recv().unwrap(), caller);
        drop(release);
    }

    #[test]
    fn test_grows_to_max_before_caller_runs() {
        let pool = WorkerPool::new(&config(1, 2, 1)).unwrap();
        let release = block_worker(&pool);
        pool.execute(Box::new(|| {})).unwrap();

        let caller = thread::current().id();
        let (tx, rx) = mpsc::channel();
        pool.execute(Box::new(move || {
            tx.send(thread::current().id()).unwrap();
        }))
        .unwrap();

        let ran_on = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_ne!(ran_on, caller);
        assert_eq!(pool.live_workers(), 2);
        drop(release);
    }

    #[test]
    fn test_extra_worker_retires_after_keep_alive() {
        let mut cfg = config(1, 2, 1);
        cfg.keep_alive_secs = 0;
        let pool = WorkerPool::new(&cfg).unwrap();
        let release = block_worker(&pool);
        pool.execute(Box::new(|| {})).unwrap();

        let (tx, rx) = mpsc::channel();
        pool.execute(Box::new(move || tx.send(()).unwrap())).unwrap();
        rx.recv_timeout(Duration::from_secs(5)).unwrap();

        let deadline = Instant::now() + Duration::from_secs(5);
        while pool.live_workers() > 1 && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(10));
        }
        assert_eq!(pool.live_workers(), 1);
        drop(release);
    }

    #[test]
    fn test_shutdown_rejects_and_is_idempotent() {
        let pool = WorkerPool::new(&config(2, 2, 4)).unwrap();
        assert!(pool.shutdown());
        assert!(pool.is_shutdown());
        assert!(!pool.shutdown());

        let err = pool.execute(Box::new(|| {})).unwrap_err();
        assert!(matches!(err, EventError::Rejected { .. }));
        assert!(pool.await_termination(Duration::from_secs(5)));
        assert_eq!(pool.live_workers(), 0);
    }

    #[test]
    fn test_shutdown_drains_queue() {
        let pool = WorkerPool::new(&config(1, 1, 16)).unwrap();
        let release = block_worker(&pool);

        let counter = Arc::new(AtomicUsize::new(0));
        for _ in 0..5 {
            let counter = counter.clone();
            pool.execute(Box::new(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            }))
            .unwrap();
        }

        pool.shutdown();
        assert!(!pool.await_termination(Duration::from_millis(50)));
        drop(release);

        assert!(pool.await_termination(Duration::from_secs(5)));
        assert_eq!(counter.load(Ordering::SeqCst), 5);
    }

    #[test]
    fn test_panicking_task_keeps_worker_alive() {
        let pool = WorkerPool::new(&config(1, 1, 4)).unwrap();
        pool.execute(Box::new(|| panic!("task failure"))).unwrap();

        let (tx, rx) = mpsc::channel();
        pool.execute(Box::new(move || tx.send(42).unwrap())).unwrap();
        assert_eq!(rx.recv_timeout(Duration::from_secs(5)).unwrap(), 42);
        assert_eq!(pool.live_workers(), 1);
    }

    #[test]
    fn test_invalid_config_rejected() {
        let err = WorkerPool::new(&config(0, 1, 1)).err().unwrap();
        assert!(matches!(err, EventError::Config(_)));
    }
}
