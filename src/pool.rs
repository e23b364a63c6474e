//! A bounded pool of reusable worker threads with idle expiry.

use crate::monitor::Monitor;
use crate::runnable::RunnableRef;
use crate::semaphore::Semaphore;
use crate::thread::{self, ThreadHandle};
use crate::Interrupted;
use log::{debug, trace};
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// A reusable worker thread.
///
/// A worker is in exactly one of: being created, idle (listed in the
/// pool's idle list), running a job, or terminated (expired, told to
/// shut down, or interrupted while idle). Its monitor covers the job
/// hand-off and the idle sleep.
struct Worker {
    id: usize,
    monitor: Monitor,
    job: Mutex<Option<RunnableRef>>,

    /// Interruption handle of the worker's thread, stored by the
    /// thread itself as its first action.
    thread: Mutex<Option<ThreadHandle>>,

    expired: AtomicBool,
}

impl Worker {
    fn new(id: usize, job: RunnableRef) -> Self {
        Worker {
            id,
            monitor: Monitor::new(),
            job: Mutex::new(Some(job)),
            thread: Mutex::new(None),
            expired: AtomicBool::new(false),
        }
    }

    /// Hands a job to the worker and wakes it out of its idle sleep.
    fn assign(&self, job: RunnableRef) {
        *self.job.lock() = Some(job);
        self.monitor.enter();
        self.monitor.notify_all();
        self.monitor.exit();
    }

    fn take_job(&self) -> Option<RunnableRef> {
        self.job.lock().take()
    }

    fn has_job(&self) -> bool {
        self.job.lock().is_some()
    }

    fn interrupt(&self) {
        if let Some(thread) = self.thread.lock().as_ref() {
            thread.interrupt();
        }
    }
}

struct Lists {
    /// Every worker that has been spawned and not yet terminated.
    live: Vec<Arc<Worker>>,

    /// The subset of `live` with no job assigned.
    idle: Vec<Arc<Worker>>,

    /// Join handles of live workers, by worker id.
    handles: FxHashMap<usize, std::thread::JoinHandle<()>>,

    /// Join handles whose workers have terminated, ready to reap.
    joinable: Vec<std::thread::JoinHandle<()>>,

    /// Workers that terminated before their join handle was recorded.
    early_dead: Vec<usize>,
}

struct PoolInner {
    /// Permits equal remaining spawn capacity: one is held for the
    /// lifetime of each worker and released when it terminates, not
    /// when a job completes.
    semaphore: Semaphore,

    /// Parks `join_all` and gates job submission during a shutdown.
    monitor: Monitor,

    lists: Mutex<Lists>,
    idle_expire_ms: AtomicU64,
    stack_size: Mutex<Option<usize>>,
    next_worker_id: AtomicUsize,
    terminating: AtomicBool,
}

/// A bounded pool of reusable worker threads.
///
/// `max_workers` caps how many workers exist at once: 0 means no
/// concurrency at all (jobs run inline in the caller), and
/// [`WorkerPool::UNBOUNDED`] removes the cap. A worker that sits idle
/// for `idle_expire_ms` milliseconds terminates itself (0 disables
/// expiry). Both are live-tunable.
#[derive(Clone)]
pub struct WorkerPool {
    inner: Arc<PoolInner>,
}

impl WorkerPool {
    /// No cap on the number of workers.
    pub const UNBOUNDED: usize = usize::MAX;

    /// Creates a pool allowing up to `max_workers` concurrent workers,
    /// each expiring after `idle_expire_ms` milliseconds idle.
    pub fn new(max_workers: usize, idle_expire_ms: u64) -> Self {
        WorkerPool {
            inner: Arc::new(PoolInner {
                semaphore: Semaphore::new(max_workers),
                monitor: Monitor::new(),
                lists: Mutex::new(Lists {
                    live: Vec::new(),
                    idle: Vec::new(),
                    handles: FxHashMap::default(),
                    joinable: Vec::new(),
                    early_dead: Vec::new(),
                }),
                idle_expire_ms: AtomicU64::new(idle_expire_ms),
                stack_size: Mutex::new(None),
                next_worker_id: AtomicUsize::new(0),
                terminating: AtomicBool::new(false),
            }),
        }
    }

    /// Suggests a stack size for workers spawned from now on. The
    /// platform may ignore it.
    pub fn set_stack_size(&self, bytes: Option<usize>) {
        *self.inner.stack_size.lock() = bytes;
    }

    /// Changes the worker cap. Lowering it never kills a worker; the
    /// excess drains as workers expire or terminate.
    pub fn set_max_workers(&self, max_workers: usize) {
        self.inner.semaphore.set_max_permits(max_workers);
    }

    /// The configured worker cap.
    pub fn max_workers(&self) -> usize {
        self.inner.semaphore.max_permits()
    }

    /// Changes the idle expiry. Existing workers observe the new value
    /// at their next idle check, which this forces.
    pub fn set_idle_expire_ms(&self, idle_expire_ms: u64) {
        self.inner.idle_expire_ms.store(idle_expire_ms, Ordering::SeqCst);
        for worker in self.inner.lists.lock().idle.iter() {
            worker.monitor.signal_all();
        }
    }

    /// The configured idle expiry in milliseconds; 0 means never.
    pub fn idle_expire_ms(&self) -> u64 {
        self.inner.idle_expire_ms.load(Ordering::SeqCst)
    }

    /// Number of live workers, idle or running.
    pub fn worker_count(&self) -> usize {
        self.inner.lists.lock().live.len()
    }

    /// Number of live workers with no job.
    pub fn idle_worker_count(&self) -> usize {
        self.inner.lists.lock().idle.len()
    }

    /// True when a job handed to the pool right now would be taken
    /// without blocking: an idle worker exists, there is capacity to
    /// spawn one, or the pool is in inline mode.
    pub fn has_capacity(&self) -> bool {
        self.max_workers() == 0
            || self.idle_worker_count() > 0
            || self.inner.semaphore.available_permits() > 0
    }

    /// How many jobs could be committed right now without blocking:
    /// idle workers plus spawn capacity, unlimited in inline mode.
    pub(crate) fn capacity(&self) -> usize {
        if self.max_workers() == 0 {
            usize::MAX
        } else {
            self.idle_worker_count() + self.inner.semaphore.available_permits()
        }
    }

    /// Runs `job` on a worker, blocking while the pool is at its cap
    /// with no idle worker and no worker has terminated.
    ///
    /// With `max_workers` 0 the job runs inline in the calling thread.
    /// Returns `Err(Interrupted)` (dropping the job) only if the
    /// calling thread is interrupted while blocked.
    pub fn run(&self, job: RunnableRef) -> Result<(), Interrupted> {
        if self.max_workers() == 0 {
            job.run();
            return Ok(());
        }
        self.block_while_terminating();
        if self.assign_to_idle(&job).is_none() {
            self.inner.semaphore.acquire()?;
            self.spawn_worker(job);
        }
        Ok(())
    }

    /// Like [`run`](WorkerPool::run) but never blocks: hands the job
    /// back if no idle worker exists and no permit is available.
    pub fn try_run(&self, job: RunnableRef) -> Result<(), RunnableRef> {
        if self.max_workers() == 0 {
            job.run();
            return Ok(());
        }
        if self.inner.terminating.load(Ordering::SeqCst) {
            return Err(job);
        }
        match self.assign_to_idle(&job) {
            Some(()) => Ok(()),
            None => {
                if self.inner.semaphore.try_acquire() {
                    self.spawn_worker(job);
                    Ok(())
                } else {
                    Err(job)
                }
            }
        }
    }

    /// Sets the interrupted flag on every live worker's thread. Idle
    /// workers terminate; a worker running a job leaves noticing to the
    /// job and survives it.
    pub fn interrupt_all(&self) {
        let workers: Vec<_> = self.inner.lists.lock().live.clone();
        debug!("interrupting {} pool workers", workers.len());
        for worker in workers {
            worker.interrupt();
        }
    }

    /// Shuts every worker down and collects the threads: running jobs
    /// finish first, idle workers exit immediately. The pool is usable
    /// again afterwards.
    pub fn join_all(&self) {
        self.inner.terminating.store(true, Ordering::SeqCst);

        loop {
            // Force every idle worker through its maintenance check.
            // Re-signaled each round: a worker racing into its idle
            // sleep can miss one signal but not the next.
            for worker in self.inner.lists.lock().idle.iter() {
                worker.monitor.signal_all();
            }

            let joinable = {
                let mut lists = self.inner.lists.lock();
                std::mem::take(&mut lists.joinable)
            };
            for handle in joinable {
                let _ = handle.join();
            }

            {
                let mut lists = self.inner.lists.lock();
                if lists.live.is_empty() {
                    // Anything left is a handle whose worker terminated
                    // before the handle was recorded.
                    let rest: Vec<_> = lists.handles.drain().map(|(_, h)| h).collect();
                    lists.early_dead.clear();
                    drop(lists);
                    for handle in rest {
                        let _ = handle.join();
                    }
                    break;
                }
            }

            self.inner.monitor.enter();
            // Re-checked above; the timeout guards a termination
            // notification racing in ahead of this wait.
            self.inner.monitor.wait_uninterruptibly(50);
            self.inner.monitor.exit();
        }

        self.inner.terminating.store(false, Ordering::SeqCst);
        self.inner.monitor.signal_all();
        debug!("worker pool joined");
    }

    fn block_while_terminating(&self) {
        while self.inner.terminating.load(Ordering::SeqCst) {
            self.inner.monitor.enter();
            if self.inner.terminating.load(Ordering::SeqCst) {
                self.inner.monitor.wait_uninterruptibly(10);
            }
            self.inner.monitor.exit();
        }
    }

    /// Claims an idle worker for `job`, preferring the most recently
    /// parked one.
    fn assign_to_idle(&self, job: &RunnableRef) -> Option<()> {
        let worker = self.inner.lists.lock().idle.pop()?;
        trace!("reusing idle worker {}", worker.id);
        worker.assign(job.clone());
        Some(())
    }

    /// Spawns a worker that starts out owning `job` and the permit the
    /// caller just acquired.
    fn spawn_worker(&self, job: RunnableRef) {
        let id = self.inner.next_worker_id.fetch_add(1, Ordering::SeqCst);
        let worker = Arc::new(Worker::new(id, job));
        {
            let mut lists = self.inner.lists.lock();
            lists.live.push(worker.clone());
        }

        let mut builder = std::thread::Builder::new().name(format!("modest-worker-{}", id));
        if let Some(bytes) = *self.inner.stack_size.lock() {
            builder = builder.stack_size(bytes);
        }

        debug!("spawning worker {}", id);
        let inner = self.inner.clone();
        let handle = builder
            .spawn({
                let worker = worker.clone();
                move || worker_loop(inner, worker)
            })
            .expect("failed to spawn worker thread");

        let mut lists = self.inner.lists.lock();
        if let Some(index) = lists.early_dead.iter().position(|dead| *dead == id) {
            lists.early_dead.remove(index);
            lists.joinable.push(handle);
        } else {
            lists.handles.insert(id, handle);
        }
    }
}

impl PoolInner {
    /// Returns a worker to the idle list after a job.
    fn job_completed(&self, worker: &Arc<Worker>) {
        let mut lists = self.lists.lock();
        trace!("worker {} idle", worker.id);
        lists.idle.push(worker.clone());
    }

    /// Removes a worker that has decided to terminate from the idle
    /// list, unless a submitter claimed it first.
    ///
    /// Returns false in the claimed case: a job is on its way and the
    /// worker must keep running.
    fn retire_from_idle(&self, worker: &Arc<Worker>) -> bool {
        let mut lists = self.lists.lock();
        match lists.idle.iter().position(|idle| idle.id == worker.id) {
            Some(index) => {
                lists.idle.remove(index);
                true
            }
            None => false,
        }
    }

    /// Final bookkeeping, run by the worker thread itself on the way
    /// out: leave the lists, surrender the permit, wake `join_all`.
    fn worker_terminated(&self, worker: &Arc<Worker>) {
        debug!(
            "worker {} terminated{}",
            worker.id,
            if worker.expired.load(Ordering::SeqCst) {
                " (expired)"
            } else {
                ""
            }
        );
        {
            let mut lists = self.lists.lock();
            if let Some(index) = lists.live.iter().position(|live| live.id == worker.id) {
                lists.live.remove(index);
            }
            match lists.handles.remove(&worker.id) {
                Some(handle) => lists.joinable.push(handle),
                None => lists.early_dead.push(worker.id),
            }
        }
        self.semaphore.release();
        self.monitor.signal_all();
    }

    fn idle_expire(&self) -> u64 {
        self.idle_expire_ms.load(Ordering::SeqCst)
    }
}

fn worker_loop(pool: Arc<PoolInner>, worker: Arc<Worker>) {
    *worker.thread.lock() = Some(thread::current());

    loop {
        if let Some(job) = worker.take_job() {
            trace!("worker {} running a job", worker.id);
            job.run();
            // A job-level interruption does not outlive the job.
            thread::clear_interrupted();
            pool.job_completed(&worker);
            continue;
        }

        match idle_until_work(&pool, &worker) {
            IdleOutcome::Work => continue,
            IdleOutcome::Terminate => {
                // Unless a submitter claimed this worker in the window
                // between leaving the monitor and here, in which case
                // its job wins.
                if pool.retire_from_idle(&worker) {
                    break;
                }
            }
        }
    }

    pool.worker_terminated(&worker);
}

enum IdleOutcome {
    Work,
    Terminate,
}

/// Sleeps on the worker's monitor until a job is assigned, the pool
/// shuts down, the worker's thread is interrupted, or the idle expiry
/// elapses.
fn idle_until_work(pool: &PoolInner, worker: &Worker) -> IdleOutcome {
    let parked_at = Instant::now();
    worker.monitor.enter();
    let outcome = loop {
        if worker.has_job() {
            break IdleOutcome::Work;
        }
        if pool.terminating.load(Ordering::SeqCst) {
            break IdleOutcome::Terminate;
        }
        let expire = pool.idle_expire();
        if expire != 0 && parked_at.elapsed() >= Duration::from_millis(expire) {
            worker.expired.store(true, Ordering::SeqCst);
            break IdleOutcome::Terminate;
        }
        if worker.monitor.wait(expire).is_err() {
            // Interrupted while idle: this worker is done.
            thread::clear_interrupted();
            break IdleOutcome::Terminate;
        }
    };
    worker.monitor.exit();
    outcome
}

impl std::fmt::Debug for WorkerPool {
    fn fmt(&self, fmt: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        fmt.debug_struct("WorkerPool")
            .field("max_workers", &self.max_workers())
            .field("workers", &self.worker_count())
            .field("idle", &self.idle_worker_count())
            .finish()
    }
}
