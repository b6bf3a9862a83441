// Copyright 2024 Google LLC
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! A worker-thread pool with a bounded task queue and elastic growth.

use crate::macros::{log_debug, log_error, log_warn};
use crate::result::{result_channel, TaskResult};
use crate::task::{FnTask, QueuedTask, Task};
use crate::worker::{next_worker_id, Worker};
// Platforms that support `libc::sched_setaffinity()`.
#[cfg(all(
    not(miri),
    any(
        target_os = "android",
        target_os = "dragonfly",
        target_os = "freebsd",
        target_os = "linux"
    )
))]
use nix::{
    sched::{sched_setaffinity, CpuSet},
    unistd::Pid,
};
use std::collections::{HashMap, VecDeque};
use std::convert::TryFrom;
use std::io;
use std::num::NonZeroUsize;
use std::sync::{Arc, Condvar, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use thiserror::Error;

/// Default cap on the number of queued tasks, effectively unbounded.
pub const DEFAULT_QUEUE_CAPACITY: usize = i32::MAX as usize;

/// Default ceiling on the worker count in [`PoolMode::Cached`].
pub const DEFAULT_WORKER_CEILING: usize = 10;

/// Default idle duration after which a [`PoolMode::Cached`] worker beyond the
/// initial count is reaped.
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(60);

/// How long a submission waits for queue room before the task is rejected.
const SUBMIT_TIMEOUT: Duration = Duration::from_secs(1);

/// How often an idle [`PoolMode::Cached`] worker wakes up to check whether it
/// should be reaped.
const IDLE_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Operating mode of a [`ThreadPool`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PoolMode {
    /// The worker count chosen at [`start()`](ThreadPool::start) never
    /// changes.
    Fixed,
    /// The pool grows a worker whenever pending tasks outnumber idle workers
    /// (up to the configured ceiling), and reaps workers idle past the
    /// configured timeout, never shrinking below the initial count.
    Cached,
}

/// Policy to pin worker threads to CPUs.
#[derive(Clone, Copy)]
pub enum CpuPinningPolicy {
    /// Don't pin worker threads to CPUs.
    No,
    /// Pin each worker thread to a CPU, if CPU pinning is supported and
    /// implemented on this platform.
    IfSupported,
    /// Pin each worker thread to a CPU. If CPU pinning isn't supported on this
    /// platform (or not implemented), starting the pool will panic.
    Always,
}

/// Number of worker threads to spawn at [`ThreadPool::start()`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WorkerCount {
    /// Spawn the number of workers returned by
    /// [`std::thread::available_parallelism()`].
    AvailableParallelism,
    /// Spawn the given number of workers.
    Count(NonZeroUsize),
}

impl TryFrom<usize> for WorkerCount {
    type Error = <NonZeroUsize as TryFrom<usize>>::Error;

    fn try_from(worker_count: usize) -> Result<Self, Self::Error> {
        let count = NonZeroUsize::try_from(worker_count)?;
        Ok(WorkerCount::Count(count))
    }
}

/// Errors reported by [`ThreadPool`] operations.
///
/// Backpressure rejection is deliberately *not* part of this taxonomy: a
/// submission that times out on a full queue yields an invalid [`TaskResult`],
/// not an error.
#[derive(Debug, Error)]
pub enum PoolError {
    /// [`start()`](ThreadPool::start) was called more than once.
    #[error("the pool has already been started")]
    AlreadyStarted,
    /// A configuration setter was called after
    /// [`start()`](ThreadPool::start); policy is immutable while the pool
    /// runs.
    #[error("the pool is running, its configuration is immutable")]
    AlreadyRunning,
    /// A task was submitted before [`start()`](ThreadPool::start) or after
    /// shutdown.
    #[error("the pool is not running")]
    NotRunning,
    /// A worker thread could not be spawned.
    #[error("failed to spawn a worker thread: {0}")]
    Spawn(#[from] io::Error),
}

/// A builder for [`ThreadPool`].
pub struct ThreadPoolBuilder {
    /// Operating mode of the pool.
    pub mode: PoolMode,
    /// Maximum number of queued tasks before submissions block (and, past the
    /// submission timeout, get rejected).
    pub queue_capacity: usize,
    /// Ceiling on the worker count. Only consulted in [`PoolMode::Cached`].
    pub worker_ceiling: usize,
    /// Idle duration after which a [`PoolMode::Cached`] worker beyond the
    /// initial count exits.
    pub idle_timeout: Duration,
    /// Policy to pin worker threads to CPUs.
    pub cpu_pinning: CpuPinningPolicy,
}

impl Default for ThreadPoolBuilder {
    fn default() -> Self {
        Self {
            mode: PoolMode::Fixed,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            worker_ceiling: DEFAULT_WORKER_CEILING,
            idle_timeout: DEFAULT_IDLE_TIMEOUT,
            cpu_pinning: CpuPinningPolicy::No,
        }
    }
}

impl ThreadPoolBuilder {
    /// Creates an idle thread pool with this configuration.
    ///
    /// The pool spawns no threads until [`start()`](ThreadPool::start) is
    /// called.
    ///
    /// ```
    /// # use workpool::{PoolMode, ThreadPoolBuilder, WorkerCount};
    /// let pool = ThreadPoolBuilder {
    ///     mode: PoolMode::Cached,
    ///     worker_ceiling: 4,
    ///     ..Default::default()
    /// }
    /// .build();
    /// pool.start(WorkerCount::try_from(2).unwrap()).unwrap();
    ///
    /// let result = pool.submit(|| 6 * 7).unwrap();
    /// assert_eq!(result.get_as::<i32>().unwrap(), 42);
    /// ```
    pub fn build(&self) -> ThreadPool {
        ThreadPool::new(self)
    }
}

/// A worker-thread pool consuming a bounded task queue.
///
/// The pool is constructed idle via [`ThreadPoolBuilder`], spawns its initial
/// workers at [`start()`](Self::start), and tears down on
/// [`shutdown()`](Self::shutdown) (also run on drop), joining every worker
/// thread after queued and in-flight tasks have finished.
pub struct ThreadPool {
    shared: Arc<PoolShared>,
}

/// State and conditions shared between the pool handle and its workers.
struct PoolShared {
    /// Single lock guarding the queue, the registry and all counters.
    state: Mutex<PoolState>,
    /// Signaled by workers after a dequeue: the queue has room again.
    not_full: Condvar,
    /// Signaled by submitters after an enqueue, and by shutdown.
    not_empty: Condvar,
    /// Signaled by an exiting worker once it has left the registry.
    all_exited: Condvar,
}

struct PoolState {
    mode: PoolMode,
    queue_capacity: usize,
    worker_ceiling: usize,
    idle_timeout: Duration,
    cpu_pinning: CpuPinningPolicy,
    /// Set once by `start()`, never reset.
    started: bool,
    /// Cleared by `shutdown()`; workers only exit once the queue is empty.
    running: bool,
    /// Pending tasks, dequeued in submission order. The queue length is the
    /// task count.
    queue: VecDeque<QueuedTask>,
    /// Registry of live workers, keyed by worker id.
    workers: HashMap<usize, Worker>,
    /// Join handles parked by exited workers, collected by `shutdown()`.
    exited: Vec<JoinHandle<()>>,
    initial_workers: usize,
    current_workers: usize,
    idle_workers: usize,
}

impl ThreadPool {
    /// Creates a new idle thread pool using the given configuration.
    fn new(builder: &ThreadPoolBuilder) -> Self {
        Self {
            shared: Arc::new(PoolShared {
                state: Mutex::new(PoolState {
                    mode: builder.mode,
                    queue_capacity: builder.queue_capacity,
                    worker_ceiling: builder.worker_ceiling,
                    idle_timeout: builder.idle_timeout,
                    cpu_pinning: builder.cpu_pinning,
                    started: false,
                    running: false,
                    queue: VecDeque::new(),
                    workers: HashMap::new(),
                    exited: Vec::new(),
                    initial_workers: 0,
                    current_workers: 0,
                    idle_workers: 0,
                }),
                not_full: Condvar::new(),
                not_empty: Condvar::new(),
                all_exited: Condvar::new(),
            }),
        }
    }

    /// Sets the operating mode.
    ///
    /// Fails with [`PoolError::AlreadyRunning`] once the pool has started.
    pub fn set_mode(&self, mode: PoolMode) -> Result<(), PoolError> {
        let mut state = self.shared.state.lock().unwrap();
        if state.started {
            return Err(PoolError::AlreadyRunning);
        }
        state.mode = mode;
        Ok(())
    }

    /// Sets the cap on the number of queued tasks.
    ///
    /// Fails with [`PoolError::AlreadyRunning`] once the pool has started.
    pub fn set_queue_capacity(&self, capacity: usize) -> Result<(), PoolError> {
        let mut state = self.shared.state.lock().unwrap();
        if state.started {
            return Err(PoolError::AlreadyRunning);
        }
        state.queue_capacity = capacity;
        Ok(())
    }

    /// Sets the ceiling on the worker count, consulted in
    /// [`PoolMode::Cached`] only.
    ///
    /// Fails with [`PoolError::AlreadyRunning`] once the pool has started.
    pub fn set_worker_ceiling(&self, ceiling: usize) -> Result<(), PoolError> {
        let mut state = self.shared.state.lock().unwrap();
        if state.started {
            return Err(PoolError::AlreadyRunning);
        }
        state.worker_ceiling = ceiling;
        Ok(())
    }

    /// Starts the pool, spawning the given number of workers.
    ///
    /// Valid exactly once: a second call fails with
    /// [`PoolError::AlreadyStarted`]. If spawning fails partway, the error is
    /// returned and the pool keeps running with the workers spawned so far.
    pub fn start(&self, count: WorkerCount) -> Result<(), PoolError> {
        let num_workers: usize = match count {
            WorkerCount::AvailableParallelism => usize::from(
                std::thread::available_parallelism()
                    .expect("Getting the available parallelism failed"),
            ),
            WorkerCount::Count(count) => count.into(),
        };

        let mut state = self.shared.state.lock().unwrap();
        if state.started {
            return Err(PoolError::AlreadyStarted);
        }

        #[cfg(any(
            miri,
            not(any(
                target_os = "android",
                target_os = "dragonfly",
                target_os = "freebsd",
                target_os = "linux"
            ))
        ))]
        match state.cpu_pinning {
            CpuPinningPolicy::No => (),
            CpuPinningPolicy::IfSupported => {
                log_warn!("Pinning threads to CPUs is not implemented on this platform.")
            }
            CpuPinningPolicy::Always => {
                panic!("Pinning threads to CPUs is not implemented on this platform.")
            }
        }

        state.started = true;
        state.running = true;
        state.initial_workers = num_workers;
        for _ in 0..num_workers {
            Self::spawn_worker(&self.shared, &mut state)?;
        }
        log_debug!("[pool] Started with {num_workers} worker(s)");
        Ok(())
    }

    /// Submits a closure to the pool.
    ///
    /// See [`submit_task()`](Self::submit_task) for the submission semantics;
    /// the closure's output is retrieved from the returned handle with
    /// [`TaskResult::get_as()`].
    pub fn submit<T, F>(&self, f: F) -> Result<TaskResult, PoolError>
    where
        T: Send + 'static,
        F: FnOnce() -> T + Send + 'static,
    {
        self.submit_task(Box::new(FnTask::new(f)))
    }

    /// Submits a task to the pool, returning the handle to its future output.
    ///
    /// Blocks while the queue is full, up to a 1-second timeout. On timeout
    /// the task is rejected — a deliberate load-shedding policy, not a fatal
    /// error: the returned handle is invalid
    /// ([`TaskResult::is_valid()`] is `false`) and its `get()` yields an
    /// empty value immediately. A rejected task is never re-queued.
    ///
    /// In [`PoolMode::Cached`], submission grows the pool by one worker when
    /// pending tasks outnumber idle workers and the ceiling hasn't been
    /// reached, inline in the submitting thread.
    pub fn submit_task(&self, task: Box<dyn Task>) -> Result<TaskResult, PoolError> {
        let state = self.shared.state.lock().unwrap();
        if !state.running {
            return Err(PoolError::NotRunning);
        }

        let (mut state, timeout) = self
            .shared
            .not_full
            .wait_timeout_while(state, SUBMIT_TIMEOUT, |state| {
                state.queue.len() >= state.queue_capacity
            })
            .unwrap();
        if timeout.timed_out() && state.queue.len() >= state.queue_capacity {
            log_warn!("[pool] The queue stayed full past the submission timeout, rejecting");
            return Ok(TaskResult::invalid());
        }
        // The pool may have been shut down while this thread was waiting for
        // queue room; don't enqueue into a pool whose workers are exiting.
        if !state.running {
            return Err(PoolError::NotRunning);
        }

        let (sink, result) = result_channel();
        state.queue.push_back(QueuedTask::new(task, sink));
        self.shared.not_empty.notify_all();

        if state.mode == PoolMode::Cached
            && state.queue.len() > state.idle_workers
            && state.current_workers < state.worker_ceiling
        {
            // Growth is best-effort: the task is already queued, so a spawn
            // failure only delays it.
            if let Err(_e) = Self::spawn_worker(&self.shared, &mut state) {
                log_error!("[pool] Failed to grow the pool: {_e}");
            }
        }

        Ok(result)
    }

    /// Returns the number of live workers.
    pub fn worker_count(&self) -> usize {
        self.shared.state.lock().unwrap().current_workers
    }

    /// Returns the number of workers currently waiting for work.
    pub fn idle_workers(&self) -> usize {
        self.shared.state.lock().unwrap().idle_workers
    }

    /// Returns the number of tasks waiting in the queue.
    pub fn queued_tasks(&self) -> usize {
        self.shared.state.lock().unwrap().queue.len()
    }

    /// Shuts the pool down, blocking until every worker has exited.
    ///
    /// Already-queued and in-flight tasks run to completion first; only new
    /// dispatch iterations are prevented once the queue drains. Safe to call
    /// concurrently with submissions (which then fail with
    /// [`PoolError::NotRunning`]) and more than once. Also runs on drop.
    pub fn shutdown(&self) {
        let mut state = self.shared.state.lock().unwrap();
        if !state.started {
            return;
        }
        state.running = false;
        // Mandatory even with an empty queue: idle workers block on the
        // not-empty condition and would otherwise never observe the shutdown.
        self.shared.not_empty.notify_all();

        log_debug!("[pool] Shutting down, waiting for workers to exit...");
        while !state.workers.is_empty() {
            state = self.shared.all_exited.wait(state).unwrap();
        }
        let handles = std::mem::take(&mut state.exited);
        drop(state);

        for handle in handles {
            match handle.join() {
                Ok(()) => log_debug!("[pool] Joined a worker thread"),
                Err(_) => log_error!("[pool] A worker thread panicked"),
            }
        }
        log_debug!("[pool] Shutdown complete");
    }

    /// Spawns one worker and registers it as idle.
    ///
    /// The caller holds the state lock, so the new thread (whose first action
    /// is to take that lock) cannot observe the registry without its own
    /// entry.
    fn spawn_worker(shared: &Arc<PoolShared>, state: &mut PoolState) -> Result<(), PoolError> {
        let id = next_worker_id();
        let cpu_pinning = state.cpu_pinning;
        let handle = std::thread::Builder::new()
            .name(format!("workpool-{id}"))
            .spawn({
                let shared = Arc::clone(shared);
                move || {
                    pin_current_thread(id, cpu_pinning);
                    shared.worker_loop(id);
                }
            })?;
        let worker = Worker::new(id, handle);
        state.workers.insert(worker.id(), worker);
        state.current_workers += 1;
        state.idle_workers += 1;
        log_debug!("[pool] Spawned worker {id}");
        Ok(())
    }
}

impl Drop for ThreadPool {
    /// Shuts the pool down, joining all the worker threads.
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl PoolShared {
    /// Dispatch loop run by each worker thread.
    fn worker_loop(&self, id: usize) {
        log_debug!("[worker {id}] Entering the dispatch loop");
        let mut last_active = Instant::now();
        let mut state = self.state.lock().unwrap();
        loop {
            while state.queue.is_empty() {
                if !state.running {
                    Self::deregister(&mut state, id);
                    self.all_exited.notify_all();
                    log_debug!("[worker {id}] Exiting: the pool is shutting down");
                    return;
                }
                match state.mode {
                    PoolMode::Cached => {
                        let (guard, timeout) = self
                            .not_empty
                            .wait_timeout(state, IDLE_POLL_INTERVAL)
                            .unwrap();
                        state = guard;
                        // Elastic shrink-back: workers beyond the initial
                        // count don't outlive a sustained idle period.
                        if timeout.timed_out()
                            && last_active.elapsed() >= state.idle_timeout
                            && state.current_workers > state.initial_workers
                        {
                            Self::deregister(&mut state, id);
                            log_debug!("[worker {id}] Exiting: idle past the timeout");
                            return;
                        }
                    }
                    PoolMode::Fixed => {
                        state = self.not_empty.wait(state).unwrap();
                    }
                }
            }

            state.idle_workers -= 1;
            let task = state.queue.pop_front();
            if !state.queue.is_empty() {
                self.not_empty.notify_all();
            }
            self.not_full.notify_all();
            drop(state);

            log_debug!("[worker {id}] Executing a task");
            if let Some(task) = task {
                task.execute();
            }

            state = self.state.lock().unwrap();
            state.idle_workers += 1;
            last_active = Instant::now();
        }
    }

    /// Removes the given worker from the registry and updates the counters.
    ///
    /// Callable only by the exiting worker itself, from within the idle wait
    /// loop (so the worker is counted idle). Its join handle is parked for
    /// `shutdown()` to collect, since a thread cannot join itself.
    fn deregister(state: &mut PoolState, id: usize) {
        state.current_workers -= 1;
        state.idle_workers -= 1;
        if let Some(mut worker) = state.workers.remove(&id) {
            if let Some(handle) = worker.take_handle() {
                state.exited.push(handle);
            }
        }
    }
}

/// Pins the calling worker thread to a CPU, according to the policy.
///
/// Elastic worker ids grow without bound, so ids wrap around the available
/// CPUs.
#[cfg(all(
    not(miri),
    any(
        target_os = "android",
        target_os = "dragonfly",
        target_os = "freebsd",
        target_os = "linux"
    )
))]
fn pin_current_thread(id: usize, cpu_pinning: CpuPinningPolicy) {
    let num_cpus = std::thread::available_parallelism().map_or(1, usize::from);
    let cpu = id % num_cpus;
    match cpu_pinning {
        CpuPinningPolicy::No => (),
        CpuPinningPolicy::IfSupported => {
            let mut cpu_set = CpuSet::new();
            if let Err(_e) = cpu_set.set(cpu) {
                log_warn!("Failed to set CPU affinity for worker {id}: {_e}");
            } else if let Err(_e) = sched_setaffinity(Pid::from_raw(0), &cpu_set) {
                log_warn!("Failed to set CPU affinity for worker {id}: {_e}");
            } else {
                log_debug!("Pinned worker {id} to CPU #{cpu}");
            }
        }
        CpuPinningPolicy::Always => {
            let mut cpu_set = CpuSet::new();
            if let Err(e) = cpu_set.set(cpu) {
                panic!("Failed to set CPU affinity for worker {id}: {e}");
            } else if let Err(e) = sched_setaffinity(Pid::from_raw(0), &cpu_set) {
                panic!("Failed to set CPU affinity for worker {id}: {e}");
            } else {
                log_debug!("Pinned worker {id} to CPU #{cpu}");
            }
        }
    }
}

#[cfg(any(
    miri,
    not(any(
        target_os = "android",
        target_os = "dragonfly",
        target_os = "freebsd",
        target_os = "linux"
    ))
))]
fn pin_current_thread(_id: usize, _cpu_pinning: CpuPinningPolicy) {}

#[cfg(test)]
mod test {
    use super::*;
    use crate::task::TaskValue;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::mpsc;

    /// Polls the given condition until it holds, for at most 10 seconds.
    fn wait_until(what: &str, condition: impl Fn() -> bool) {
        let deadline = Instant::now() + Duration::from_secs(10);
        while !condition() {
            if Instant::now() > deadline {
                panic!("timed out waiting until {what}");
            }
            std::thread::sleep(Duration::from_millis(10));
        }
    }

    fn fixed_pool(queue_capacity: usize, num_workers: usize) -> ThreadPool {
        let pool = ThreadPoolBuilder {
            mode: PoolMode::Fixed,
            queue_capacity,
            ..Default::default()
        }
        .build();
        pool.start(WorkerCount::try_from(num_workers).unwrap())
            .unwrap();
        pool
    }

    #[test]
    fn every_task_executes_exactly_once() {
        const NUM_TASKS: usize = 100;

        let pool = fixed_pool(DEFAULT_QUEUE_CAPACITY, 4);
        let executions = Arc::new(AtomicUsize::new(0));

        let results: Vec<_> = (0..NUM_TASKS as u64)
            .map(|i| {
                let executions = executions.clone();
                pool.submit(move || {
                    executions.fetch_add(1, Ordering::SeqCst);
                    i * i
                })
                .unwrap()
            })
            .collect();

        let mut sum = 0;
        for result in results {
            assert!(result.is_valid());
            sum += result.get_as::<u64>().unwrap();
        }
        assert_eq!(sum, (0..NUM_TASKS as u64).map(|i| i * i).sum());
        assert_eq!(executions.load(Ordering::SeqCst), NUM_TASKS);
    }

    #[test]
    fn tasks_run_in_submission_order_on_one_worker() {
        const NUM_TASKS: usize = 20;

        let pool = fixed_pool(DEFAULT_QUEUE_CAPACITY, 1);
        let order = Arc::new(Mutex::new(Vec::new()));

        let results: Vec<_> = (0..NUM_TASKS)
            .map(|i| {
                let order = order.clone();
                pool.submit(move || order.lock().unwrap().push(i)).unwrap()
            })
            .collect();
        for result in results {
            result.get();
        }

        assert_eq!(*order.lock().unwrap(), (0..NUM_TASKS).collect::<Vec<_>>());
    }

    #[test]
    fn full_queue_rejects_submission_in_bounded_time() {
        let pool = fixed_pool(1, 1);
        let (gate_tx, gate_rx) = mpsc::channel::<()>();

        // Block the only worker outside the queue.
        let gated = pool
            .submit(move || gate_rx.recv().unwrap())
            .unwrap();
        wait_until("the worker picked up the gate task", || {
            pool.queued_tasks() == 0 && pool.idle_workers() == 0
        });

        // Fill the queue to capacity.
        let filler = pool.submit(|| ()).unwrap();
        assert!(filler.is_valid());

        // One more submission can't fit; it must be rejected after the
        // submission timeout, not enqueued.
        let before = Instant::now();
        let rejected = pool.submit(|| ()).unwrap();
        assert!(before.elapsed() >= SUBMIT_TIMEOUT);
        assert!(!rejected.is_valid());

        // The rejected handle resolves immediately, to an empty value.
        let before = Instant::now();
        assert!(!rejected.get().is_some());
        assert!(before.elapsed() < SUBMIT_TIMEOUT);

        gate_tx.send(()).unwrap();
        gated.get();
        filler.get();
    }

    #[test]
    fn cached_pool_grows_up_to_the_ceiling() {
        let pool = ThreadPoolBuilder {
            mode: PoolMode::Cached,
            worker_ceiling: 3,
            ..Default::default()
        }
        .build();
        pool.start(WorkerCount::try_from(1).unwrap()).unwrap();
        assert_eq!(pool.worker_count(), 1);

        let (gate_tx, gate_rx) = mpsc::channel::<()>();
        let gate_rx = Arc::new(Mutex::new(gate_rx));

        const NUM_TASKS: usize = 5;
        let results: Vec<_> = (0..NUM_TASKS)
            .map(|_| {
                let gate_rx = gate_rx.clone();
                let result = pool
                    .submit(move || gate_rx.lock().unwrap().recv().unwrap())
                    .unwrap();
                // Let the freshly grown worker (if any) pick up the task, so
                // that growth is observable deterministically.
                wait_until("the pool settled", || {
                    pool.queued_tasks() == 0 || pool.worker_count() == 3
                });
                result
            })
            .collect();

        // Growth stops at the ceiling, even with more tasks than workers.
        assert_eq!(pool.worker_count(), 3);

        for _ in 0..NUM_TASKS {
            gate_tx.send(()).unwrap();
        }
        for result in results {
            result.get();
        }
        assert_eq!(pool.worker_count(), 3);
    }

    #[test]
    fn cached_pool_reaps_down_to_the_initial_count() {
        let pool = ThreadPoolBuilder {
            mode: PoolMode::Cached,
            worker_ceiling: 3,
            idle_timeout: Duration::from_millis(50),
            ..Default::default()
        }
        .build();
        pool.start(WorkerCount::try_from(1).unwrap()).unwrap();

        let (gate_tx, gate_rx) = mpsc::channel::<()>();
        let gate_rx = Arc::new(Mutex::new(gate_rx));
        let results: Vec<_> = (0..4)
            .map(|_| {
                let gate_rx = gate_rx.clone();
                let result = pool
                    .submit(move || gate_rx.lock().unwrap().recv().unwrap())
                    .unwrap();
                wait_until("the pool settled", || {
                    pool.queued_tasks() == 0 || pool.worker_count() == 3
                });
                result
            })
            .collect();
        assert_eq!(pool.worker_count(), 3);

        for _ in 0..4 {
            gate_tx.send(()).unwrap();
        }
        for result in results {
            result.get();
        }

        // The extra workers notice their idleness at the next poll tick and
        // shrink the pool back, never below the initial count.
        wait_until("the pool reaped its extra workers", || {
            pool.worker_count() == 1
        });
        std::thread::sleep(2 * IDLE_POLL_INTERVAL);
        assert_eq!(pool.worker_count(), 1);
    }

    #[test]
    fn fixed_pool_never_changes_worker_count() {
        let pool = fixed_pool(DEFAULT_QUEUE_CAPACITY, 2);
        assert_eq!(pool.worker_count(), 2);

        let results: Vec<_> = (0..50)
            .map(|i| pool.submit(move || i).unwrap())
            .collect();
        for result in results {
            result.get();
        }
        assert_eq!(pool.worker_count(), 2);
    }

    #[test]
    fn heterogeneous_tasks_share_the_queue() {
        struct Double(u64);
        impl Task for Double {
            fn run(&mut self) -> TaskValue {
                TaskValue::new(self.0 * 2)
            }
        }
        struct Greet;
        impl Task for Greet {
            fn run(&mut self) -> TaskValue {
                TaskValue::new("hello".to_owned())
            }
        }

        let pool = fixed_pool(DEFAULT_QUEUE_CAPACITY, 2);
        let doubled = pool.submit_task(Box::new(Double(21))).unwrap();
        let greeting = pool.submit_task(Box::new(Greet)).unwrap();

        assert_eq!(doubled.get_as::<u64>(), Ok(42));
        // Asking for the wrong type is a recoverable error, not garbage.
        assert!(matches!(
            greeting.get_as::<u64>(),
            Err(crate::ValueError::TypeMismatch { .. })
        ));
    }

    #[test]
    fn panicking_task_resolves_empty_and_spares_the_worker() {
        let pool = fixed_pool(DEFAULT_QUEUE_CAPACITY, 1);

        let panicked = pool.submit(|| -> u32 { panic!("task panic") }).unwrap();
        assert!(panicked.is_valid());
        assert!(!panicked.get().is_some());

        // The single worker survived and keeps serving the queue.
        let next = pool.submit(|| 7u32).unwrap();
        assert_eq!(next.get_as::<u32>(), Ok(7));
        assert_eq!(pool.worker_count(), 1);
    }

    #[test]
    fn shutdown_waits_for_queued_tasks() {
        let pool = fixed_pool(DEFAULT_QUEUE_CAPACITY, 1);
        let completed = Arc::new(AtomicUsize::new(0));

        let results: Vec<_> = (0..3)
            .map(|_| {
                let completed = completed.clone();
                pool.submit(move || {
                    std::thread::sleep(Duration::from_millis(100));
                    completed.fetch_add(1, Ordering::SeqCst);
                })
                .unwrap()
            })
            .collect();

        pool.shutdown();
        assert_eq!(completed.load(Ordering::SeqCst), 3);
        assert_eq!(pool.worker_count(), 0);
        for result in results {
            assert!(result.is_valid());
            assert!(result.get().is_some());
        }
    }

    #[test]
    fn shutdown_with_empty_queue_does_not_deadlock() {
        let pool = fixed_pool(DEFAULT_QUEUE_CAPACITY, 4);
        pool.shutdown();
        // Idempotent.
        pool.shutdown();
        assert_eq!(pool.worker_count(), 0);
    }

    #[test]
    fn drop_drains_the_pool() {
        let pool = fixed_pool(DEFAULT_QUEUE_CAPACITY, 2);
        let result = pool.submit(|| 123i64).unwrap();
        drop(pool);
        assert_eq!(result.get_as::<i64>(), Ok(123));
    }

    #[test]
    fn submitting_after_shutdown_fails() {
        let pool = fixed_pool(DEFAULT_QUEUE_CAPACITY, 1);
        pool.shutdown();
        assert!(matches!(
            pool.submit(|| ()),
            Err(PoolError::NotRunning)
        ));
    }

    #[test]
    fn submitting_before_start_fails() {
        let pool = ThreadPoolBuilder::default().build();
        assert!(matches!(
            pool.submit(|| ()),
            Err(PoolError::NotRunning)
        ));
    }

    #[test]
    fn starting_twice_fails() {
        let pool = fixed_pool(DEFAULT_QUEUE_CAPACITY, 1);
        assert!(matches!(
            pool.start(WorkerCount::try_from(1).unwrap()),
            Err(PoolError::AlreadyStarted)
        ));
        assert_eq!(pool.worker_count(), 1);
    }

    #[test]
    fn configuring_a_running_pool_fails() {
        let pool = ThreadPoolBuilder::default().build();
        pool.set_mode(PoolMode::Cached).unwrap();
        pool.set_queue_capacity(16).unwrap();
        pool.set_worker_ceiling(4).unwrap();
        pool.start(WorkerCount::try_from(1).unwrap()).unwrap();

        assert!(matches!(
            pool.set_mode(PoolMode::Fixed),
            Err(PoolError::AlreadyRunning)
        ));
        assert!(matches!(
            pool.set_queue_capacity(32),
            Err(PoolError::AlreadyRunning)
        ));
        assert!(matches!(
            pool.set_worker_ceiling(8),
            Err(PoolError::AlreadyRunning)
        ));
    }

    #[test]
    fn one_worker_serializes_execution() {
        const UNIT: Duration = Duration::from_millis(150);

        let pool = fixed_pool(2, 1);
        let before = Instant::now();
        let results: Vec<_> = (0..3i32)
            .map(|i| {
                pool.submit(move || {
                    std::thread::sleep(UNIT);
                    i
                })
                .unwrap()
            })
            .collect();

        for (i, result) in results.into_iter().enumerate() {
            assert!(result.is_valid());
            assert_eq!(result.get_as::<i32>(), Ok(i as i32));
        }
        assert!(before.elapsed() >= 3 * UNIT);
    }

    #[test]
    fn worker_count_try_from_usize() {
        assert!(WorkerCount::try_from(0).is_err());
        assert_eq!(
            WorkerCount::try_from(1),
            Ok(WorkerCount::Count(NonZeroUsize::try_from(1).unwrap()))
        );
    }
}
