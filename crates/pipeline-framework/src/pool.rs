//! # Bounded Worker Pool
//!
//! A task executor with a bounded number of workers and a bounded queue, modelled on the
//! classic core/max thread pool:
//!
//! 1. While fewer than `core` workers exist, every submission starts a new worker.
//! 2. Otherwise the task is queued while the queue has room. A pool with no live worker
//!    (`core = 0`) starts one for it instead, so accepted work always runs.
//! 3. With a full queue, new workers are started up to `max`.
//! 4. Beyond that the [`OverflowPolicy`] decides: run on the caller, reject with
//!    [`PoolError::QueueSaturation`], or evict the oldest queued task.
//!
//! Workers above `core` retire after `idle_timeout` without work.
//!
//! Every accepted task runs in its own Tokio task so that [`WorkerPool::shutdown`] can abort
//! it once the grace period has expired. A task is settled exactly once, either as completed
//! (by the task itself) or as cancelled (by eviction or forced shutdown), under the pool lock,
//! so `completed + cancelled == submitted` holds once the pool has drained.
//!
//! Tasks run by the caller under [`OverflowPolicy::RunOnCaller`] execute outside the worker
//! bound; that is the backpressure, since the submitter cannot submit anything else meanwhile.

use crate::error::PoolError;
use futures::future::{BoxFuture, FutureExt};
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::sync::{oneshot, Notify};
use tokio::task::{AbortHandle, JoinHandle};
use tracing::{debug, info, warn};

/// What to do with a submission when the queue is full and `max` workers are busy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum OverflowPolicy {
    /// The submitter runs the task itself before `submit` returns.
    RunOnCaller,
    /// `submit` fails immediately with [`PoolError::QueueSaturation`].
    RejectWithError,
    /// The oldest queued task is dropped (its handle resolves to [`PoolError::Cancelled`]).
    DiscardOldest,
}

/// Pool sizing and overflow behaviour. Fixed once the pool is built.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    /// Used in logs and errors.
    pub name: String,
    pub core: usize,
    pub max: usize,
    #[serde(with = "crate::duration_ms")]
    pub idle_timeout: Duration,
    pub queue_capacity: usize,
    pub overflow: OverflowPolicy,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            name: "pool".to_string(),
            core: 2,
            max: 4,
            idle_timeout: Duration::from_secs(60),
            queue_capacity: 100,
            overflow: OverflowPolicy::RunOnCaller,
        }
    }
}

impl PoolConfig {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn with_bounds(mut self, core: usize, max: usize) -> Self {
        self.core = core;
        self.max = max;
        self
    }

    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity;
        self
    }

    pub fn with_overflow(mut self, policy: OverflowPolicy) -> Self {
        self.overflow = policy;
        self
    }

    pub fn with_idle_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout = timeout;
        self
    }

    pub fn validate(&self) -> Result<(), PoolError> {
        if self.max == 0 {
            return Err(PoolError::InvalidConfig(format!(
                "pool '{}': max must be at least 1",
                self.name
            )));
        }
        if self.core > self.max {
            return Err(PoolError::InvalidConfig(format!(
                "pool '{}': core ({}) exceeds max ({})",
                self.name, self.core, self.max
            )));
        }
        if self.overflow == OverflowPolicy::DiscardOldest && self.queue_capacity == 0 {
            return Err(PoolError::InvalidConfig(format!(
                "pool '{}': discard-oldest needs a queue to discard from",
                self.name
            )));
        }
        Ok(())
    }
}

/// Point-in-time counters of a pool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PoolStatus {
    pub name: String,
    /// Live worker loops, busy or idle.
    pub workers: usize,
    /// Tasks currently executing on workers.
    pub active: usize,
    pub queued: usize,
    pub submitted: u64,
    pub completed: u64,
    pub cancelled: u64,
    pub rejected: u64,
    pub discarded: u64,
    pub caller_runs: u64,
    pub panicked: u64,
}

/// Outcome of [`WorkerPool::shutdown`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PoolShutdownReport {
    pub pool: String,
    pub submitted: u64,
    pub completed: u64,
    /// Evicted tasks plus everything cancelled when the grace period ran out.
    pub cancelled: u64,
    /// Tasks cancelled by this shutdown because the grace period ran out.
    pub forced: u64,
}

/// Resolves to the task's output, or to the reason it never produced one.
#[derive(Debug)]
pub struct TaskHandle<T> {
    receiver: oneshot::Receiver<Result<T, PoolError>>,
}

impl<T> TaskHandle<T> {
    fn ready(result: Result<T, PoolError>) -> Self {
        let (sender, receiver) = oneshot::channel();
        let _ = sender.send(result);
        Self { receiver }
    }
}

impl<T> Future for TaskHandle<T> {
    type Output = Result<T, PoolError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.receiver)
            .poll(cx)
            .map(|received| received.unwrap_or(Err(PoolError::Cancelled)))
    }
}

struct Job {
    id: u64,
    work: BoxFuture<'static, ()>,
}

#[derive(Default)]
struct PoolState {
    queue: VecDeque<Job>,
    running: HashMap<u64, AbortHandle>,
    workers: usize,
    shutting_down: bool,
    submitted: u64,
    completed: u64,
    cancelled: u64,
    rejected: u64,
    discarded: u64,
    caller_runs: u64,
    panicked: u64,
}

impl PoolState {
    fn is_drained(&self) -> bool {
        self.queue.is_empty() && self.running.is_empty()
    }
}

struct PoolInner {
    config: PoolConfig,
    state: Mutex<PoolState>,
    next_id: AtomicU64,
    work_ready: Notify,
    drained: Notify,
}

enum Admission<F, T> {
    Worker(JoinHandle<()>),
    Queued(Option<Job>),
    Inline(F, oneshot::Sender<Result<T, PoolError>>),
}

/// A cloneable handle to a bounded worker pool.
#[derive(Clone)]
pub struct WorkerPool {
    inner: Arc<PoolInner>,
}

impl WorkerPool {
    pub fn new(config: PoolConfig) -> Result<Self, PoolError> {
        config.validate()?;
        debug!(
            pool = %config.name,
            core = config.core,
            max = config.max,
            queue = config.queue_capacity,
            policy = ?config.overflow,
            "Pool created"
        );
        Ok(Self {
            inner: Arc::new(PoolInner {
                config,
                state: Mutex::new(PoolState::default()),
                next_id: AtomicU64::new(1),
                work_ready: Notify::new(),
                drained: Notify::new(),
            }),
        })
    }

    pub fn name(&self) -> &str {
        &self.inner.config.name
    }

    pub fn config(&self) -> &PoolConfig {
        &self.inner.config
    }

    /// Submit a task.
    ///
    /// Admission is decided synchronously, on the first poll. Under
    /// [`OverflowPolicy::RunOnCaller`] the returned future also runs the task to completion,
    /// and the handle it yields is already resolved.
    pub async fn submit<F, T>(&self, task: F) -> Result<TaskHandle<T>, PoolError>
    where
        F: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        let inner = &self.inner;
        let config = &inner.config;
        let (sender, receiver) = oneshot::channel();

        let admission = {
            let mut state = inner.lock();
            if state.shutting_down {
                return Err(PoolError::ShutDown {
                    pool: config.name.clone(),
                });
            }
            let queue_full = state.queue.len() >= config.queue_capacity;
            if state.workers < config.core || (queue_full && state.workers < config.max) {
                let job = inner.job(task, sender);
                state.workers += 1;
                state.submitted += 1;
                Admission::Worker(inner.start(&mut state, job))
            } else if !queue_full {
                let job = inner.job(task, sender);
                state.submitted += 1;
                // With core = 0 the queue still needs one worker to drain it.
                if state.workers == 0 {
                    state.workers += 1;
                    Admission::Worker(inner.start(&mut state, job))
                } else {
                    state.queue.push_back(job);
                    Admission::Queued(None)
                }
            } else {
                match config.overflow {
                    OverflowPolicy::RejectWithError => {
                        state.rejected += 1;
                        warn!(
                            pool = %config.name,
                            queued = state.queue.len(),
                            workers = state.workers,
                            "Submission rejected"
                        );
                        return Err(PoolError::QueueSaturation {
                            pool: config.name.clone(),
                        });
                    }
                    OverflowPolicy::DiscardOldest => {
                        let evicted = state.queue.pop_front();
                        if evicted.is_some() {
                            state.discarded += 1;
                            state.cancelled += 1;
                        }
                        state.queue.push_back(inner.job(task, sender));
                        state.submitted += 1;
                        Admission::Queued(evicted)
                    }
                    OverflowPolicy::RunOnCaller => Admission::Inline(task, sender),
                }
            }
        };

        match admission {
            Admission::Worker(first) => {
                tokio::spawn(run_worker(Arc::clone(inner), first));
            }
            Admission::Queued(evicted) => {
                inner.work_ready.notify_one();
                if let Some(job) = evicted {
                    warn!(
                        pool = %config.name,
                        task_id = job.id,
                        "Queue full; discarded oldest task"
                    );
                }
            }
            Admission::Inline(task, sender) => {
                debug!(pool = %config.name, "Queue full; running task on caller");
                let outcome = AssertUnwindSafe(task).catch_unwind().await;
                {
                    let mut state = inner.lock();
                    state.submitted += 1;
                    state.completed += 1;
                    state.caller_runs += 1;
                    if outcome.is_err() {
                        state.panicked += 1;
                    }
                }
                return Ok(TaskHandle::ready(outcome.map_err(panic_error)));
            }
        }

        Ok(TaskHandle { receiver })
    }

    /// Wait until nothing is queued or running.
    pub async fn wait_idle(&self) {
        self.inner.wait_drained().await;
    }

    /// Stop accepting tasks, wait up to `grace` for queued and running tasks, then cancel
    /// whatever is left. Calling it again just reports the current counters.
    pub async fn shutdown(&self, grace: Duration) -> PoolShutdownReport {
        let inner = &self.inner;
        let first_call = {
            let mut state = inner.lock();
            !std::mem::replace(&mut state.shutting_down, true)
        };
        if first_call {
            info!(
                pool = %inner.config.name,
                grace_ms = grace.as_millis() as u64,
                "Pool shutting down"
            );
        }
        // Wake idle workers so they drain the queue and exit.
        inner.work_ready.notify_waiters();

        let mut forced = 0;
        if tokio::time::timeout(grace, inner.wait_drained()).await.is_err() {
            let (queued, running) = {
                let mut state = inner.lock();
                let queued: Vec<Job> = state.queue.drain(..).collect();
                let running: Vec<AbortHandle> = state.running.drain().map(|(_, h)| h).collect();
                state.cancelled += (queued.len() + running.len()) as u64;
                (queued, running)
            };
            for handle in &running {
                handle.abort();
            }
            forced = (queued.len() + running.len()) as u64;
            warn!(
                pool = %inner.config.name,
                queued = queued.len(),
                running = running.len(),
                "Grace period expired; cancelled remaining tasks"
            );
            drop(queued);
            inner.drained.notify_waiters();
        }

        let state = inner.lock();
        let report = PoolShutdownReport {
            pool: inner.config.name.clone(),
            submitted: state.submitted,
            completed: state.completed,
            cancelled: state.cancelled,
            forced,
        };
        if first_call {
            info!(
                pool = %report.pool,
                completed = report.completed,
                cancelled = report.cancelled,
                "Pool shut down"
            );
        }
        report
    }

    pub fn is_shut_down(&self) -> bool {
        self.inner.lock().shutting_down
    }

    pub fn status(&self) -> PoolStatus {
        let state = self.inner.lock();
        PoolStatus {
            name: self.inner.config.name.clone(),
            workers: state.workers,
            active: state.running.len(),
            queued: state.queue.len(),
            submitted: state.submitted,
            completed: state.completed,
            cancelled: state.cancelled,
            rejected: state.rejected,
            discarded: state.discarded,
            caller_runs: state.caller_runs,
            panicked: state.panicked,
        }
    }
}

impl PoolInner {
    fn lock(&self) -> MutexGuard<'_, PoolState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn job<F, T>(self: &Arc<Self>, task: F, sender: oneshot::Sender<Result<T, PoolError>>) -> Job
    where
        F: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let pool: Weak<PoolInner> = Arc::downgrade(self);
        let work = async move {
            let outcome = AssertUnwindSafe(task).catch_unwind().await;
            let settled = match pool.upgrade() {
                Some(pool) => pool.settle(id, outcome.is_err()),
                None => true,
            };
            // Losing the race means the task was cancelled; dropping the sender reports it.
            if settled {
                let _ = sender.send(outcome.map_err(panic_error));
            }
        }
        .boxed();
        Job { id, work }
    }

    /// Spawn a job and register it as running. Must be called with the state locked so a
    /// job is never in neither the queue nor the running set.
    fn start(&self, state: &mut PoolState, job: Job) -> JoinHandle<()> {
        let handle = tokio::spawn(job.work);
        state.running.insert(job.id, handle.abort_handle());
        handle
    }

    fn settle(&self, id: u64, panicked: bool) -> bool {
        let mut state = self.lock();
        if state.running.remove(&id).is_none() {
            return false;
        }
        state.completed += 1;
        if panicked {
            state.panicked += 1;
        }
        let drained = state.is_drained();
        drop(state);
        if drained {
            self.drained.notify_waiters();
        }
        true
    }

    async fn next_job(&self) -> Option<JoinHandle<()>> {
        loop {
            let notified = self.work_ready.notified();
            let surplus = {
                let mut state = self.lock();
                if let Some(job) = state.queue.pop_front() {
                    return Some(self.start(&mut state, job));
                }
                if state.shutting_down {
                    state.workers -= 1;
                    return None;
                }
                state.workers > self.config.core
            };

            if !surplus {
                notified.await;
                continue;
            }
            if tokio::time::timeout(self.config.idle_timeout, notified)
                .await
                .is_err()
            {
                let mut state = self.lock();
                if state.queue.is_empty() && state.workers > self.config.core {
                    state.workers -= 1;
                    debug!(
                        pool = %self.config.name,
                        workers = state.workers,
                        "Idle worker retired"
                    );
                    return None;
                }
            }
        }
    }

    async fn wait_drained(&self) {
        loop {
            let notified = self.drained.notified();
            if self.lock().is_drained() {
                return;
            }
            notified.await;
        }
    }
}

async fn run_worker(inner: Arc<PoolInner>, first: JoinHandle<()>) {
    let mut current = Some(first);
    while let Some(task) = current.take() {
        // Tasks catch their own panics, so an error here is an abort from shutdown.
        if let Err(e) = task.await {
            debug!(pool = %inner.config.name, cancelled = e.is_cancelled(), "Task aborted");
        }
        current = inner.next_job().await;
    }
    debug!(pool = %inner.config.name, "Worker exited");
}

fn panic_error(payload: Box<dyn Any + Send>) -> PoolError {
    let message = payload
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string());
    PoolError::Panicked(message)
}
