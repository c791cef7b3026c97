//! Execution Engine: a fixed set of long-lived workers fed from one FIFO
//! queue.
//!
//! All bookkeeping (worker slots, queue, in-flight tasks) lives in a single
//! mutex-guarded [`PoolState`]. The lock is never held across an `.await`;
//! workers and supervisors only touch it through short synchronous calls.
//!
//! Each dispatched task gets a supervisor that races the worker's reply
//! against the task deadline. Whoever settles an in-flight entry first
//! resolves it; later settlements for the same task are ignored, so every
//! submitted task resolves exactly once.

use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::task::{Context, Poll};
use std::time::{Duration, Instant};

use serde::Serialize;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;

use crate::error::Result;
use crate::memory::effective_concurrency;
use crate::runner::{self, TestResult, WorkerTask};
use crate::toolchain::Toolchain;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PoolError {
    #[error("worker pool is shutting down")]
    ShuttingDown,

    #[error("task was cancelled before a worker picked it up")]
    Cancelled,

    #[error("worker {worker} faulted {faults} times in a row; aborting run")]
    RestartLimit { worker: usize, faults: u32 },

    #[error("worker pool dropped the task")]
    Closed,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PoolConfig {
    pub max_workers: usize,
    pub task_timeout: Duration,
    pub max_tasks_per_worker: u64,
    pub health_check_interval: Duration,
    pub stale_idle_threshold: Duration,
    /// Faults (errors, crashes, stuck workers) one slot may accumulate in a
    /// row before the pool gives up. Timeouts and recycling do not count.
    pub max_consecutive_faults: u32,
    pub shutdown_grace: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        PoolConfig {
            max_workers: 8,
            task_timeout: Duration::from_millis(10_000),
            max_tasks_per_worker: 100,
            health_check_interval: Duration::from_millis(30_000),
            stale_idle_threshold: Duration::from_millis(120_000),
            max_consecutive_faults: 5,
            shutdown_grace: Duration::from_millis(1_500),
        }
    }
}

/// What a worker actually runs. The production executor drives the
/// toolchain in a fresh workspace.
pub trait TaskExecutor: Send + Sync + 'static {
    fn execute(&self, task: WorkerTask) -> impl Future<Output = Result<TestResult>> + Send;
}

pub struct ToolchainExecutor {
    toolchain: Toolchain,
}

impl ToolchainExecutor {
    pub fn new(toolchain: Toolchain) -> Self {
        ToolchainExecutor { toolchain }
    }
}

impl TaskExecutor for ToolchainExecutor {
    fn execute(&self, task: WorkerTask) -> impl Future<Output = Result<TestResult>> + Send {
        runner::execute_task(task, &self.toolchain)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WorkerState {
    Starting,
    Idle,
    Busy,
    Terminated,
}

enum WorkerMessage {
    Execute {
        task: WorkerTask,
        reply: oneshot::Sender<std::result::Result<TestResult, String>>,
    },
    Shutdown,
}

struct WorkerInfo {
    generation: u64,
    state: WorkerState,
    inbox: mpsc::UnboundedSender<WorkerMessage>,
    handle: Option<JoinHandle<()>>,
    current_task: Option<u64>,
    completed_tasks: u64,
    last_activity: Instant,
    restart_count: u32,
    consecutive_faults: u32,
}

struct QueuedTask {
    id: u64,
    task: WorkerTask,
    reply: oneshot::Sender<std::result::Result<TestResult, PoolError>>,
}

struct InFlight {
    mutation_id: usize,
    started: Instant,
    reply: oneshot::Sender<std::result::Result<TestResult, PoolError>>,
}

struct PoolState {
    workers: Vec<WorkerInfo>,
    queue: VecDeque<QueuedTask>,
    in_flight: HashMap<u64, InFlight>,
    accepting: bool,
    terminated: bool,
    failure: Option<PoolError>,
    next_task_id: u64,
    next_generation: u64,
    completed: u64,
    restarts: u64,
    /// Aborted workers that may still be unwinding.
    retired: Vec<JoinHandle<()>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RestartReason {
    TimedOut,
    Fault,
    Stuck,
    Recycled,
    StaleIdle,
    Exited,
}

impl RestartReason {
    fn is_fault(self) -> bool {
        matches!(self, RestartReason::Fault | RestartReason::Stuck | RestartReason::Exited)
    }
}

enum Settlement {
    Done(TestResult),
    Fault(String),
    TimedOut,
}

/// Point-in-time view of the pool.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PoolStatus {
    pub total_workers: usize,
    pub starting_workers: usize,
    pub idle_workers: usize,
    pub busy_workers: usize,
    pub queued_tasks: usize,
    pub in_flight_tasks: usize,
    pub completed_tasks: u64,
    pub restarts: u64,
    pub throttling_factor: f64,
    pub effective_concurrency: usize,
}

struct Shared<E> {
    config: PoolConfig,
    executor: Arc<E>,
    throttle: watch::Receiver<f64>,
    state: Mutex<PoolState>,
}

/// Resolves to the task's result, or a [`PoolError`] if it never ran.
pub struct TaskHandle {
    rx: oneshot::Receiver<std::result::Result<TestResult, PoolError>>,
}

impl Future for TaskHandle {
    type Output = std::result::Result<TestResult, PoolError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.rx)
            .poll(cx)
            .map(|received| received.unwrap_or(Err(PoolError::Closed)))
    }
}

pub struct WorkerPool<E: TaskExecutor> {
    shared: Arc<Shared<E>>,
    background: Vec<JoinHandle<()>>,
}

impl<E: TaskExecutor> WorkerPool<E> {
    /// Start `config.max_workers` workers. `throttle` carries the memory
    /// throttling factor; a receiver that never changes leaves dispatch at
    /// full concurrency.
    pub fn new(config: PoolConfig, executor: E, throttle: watch::Receiver<f64>) -> Self {
        let worker_count = config.max_workers.max(1);
        let shared = Arc::new(Shared {
            config,
            executor: Arc::new(executor),
            throttle: throttle.clone(),
            state: Mutex::new(PoolState {
                workers: Vec::with_capacity(worker_count),
                queue: VecDeque::new(),
                in_flight: HashMap::new(),
                accepting: true,
                terminated: false,
                failure: None,
                next_task_id: 0,
                next_generation: 0,
                completed: 0,
                restarts: 0,
                retired: Vec::new(),
            }),
        });

        {
            let mut state = shared.lock();
            for slot in 0..worker_count {
                let worker = shared.spawn_worker(&mut state, slot);
                state.workers.push(worker);
            }
        }
        tracing::info!(workers = worker_count, "worker pool started");

        let background = vec![
            tokio::spawn(health_loop(Arc::clone(&shared))),
            tokio::spawn(throttle_loop(Arc::clone(&shared), throttle)),
        ];
        WorkerPool { shared, background }
    }

    /// Queue a task. Never blocks; the handle resolves once a worker has
    /// evaluated it, it timed out, or the pool gave up on it.
    pub fn submit(&self, task: WorkerTask) -> TaskHandle {
        let (reply, rx) = oneshot::channel();
        let mut state = self.shared.lock();

        if let Some(failure) = &state.failure {
            let _ = reply.send(Err(failure.clone()));
        } else if !state.accepting {
            let _ = reply.send(Err(PoolError::ShuttingDown));
        } else {
            let id = state.next_task_id;
            state.next_task_id += 1;
            state.queue.push_back(QueuedTask { id, task, reply });
            self.shared.dispatch_locked(&mut state);
        }
        TaskHandle { rx }
    }

    /// Stop dispatching and cancel everything still queued. Tasks already
    /// running keep going and resolve normally.
    pub fn signal_shutdown(&self) {
        let mut state = self.shared.lock();
        if state.accepting {
            tracing::info!(queued = state.queue.len(), "worker pool stopped accepting tasks");
        }
        state.accepting = false;
        cancel_queue(&mut state, PoolError::Cancelled);
    }

    /// Stop every worker. Each gets `shutdown_grace` to finish what it is
    /// running; stragglers are aborted, which kills their subprocesses.
    /// Returns once every worker task, including ones aborted earlier by
    /// restarts, has been dropped.
    pub async fn shutdown(&self) {
        self.signal_shutdown();

        let (handles, retired): (Vec<JoinHandle<()>>, Vec<JoinHandle<()>>) = {
            let mut state = self.shared.lock();
            state.terminated = true;
            for (_, entry) in state.in_flight.drain() {
                let _ = entry.reply.send(Err(PoolError::Cancelled));
            }
            let handles = state
                .workers
                .iter_mut()
                .filter_map(|worker| {
                    let _ = worker.inbox.send(WorkerMessage::Shutdown);
                    worker.state = WorkerState::Terminated;
                    worker.current_task = None;
                    worker.handle.take()
                })
                .collect();
            (handles, std::mem::take(&mut state.retired))
        };

        for handle in &self.background {
            handle.abort();
        }

        let deadline = Instant::now() + self.shared.config.shutdown_grace;
        let mut aborted = 0;
        for mut handle in handles {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if tokio::time::timeout(remaining, &mut handle).await.is_err() {
                handle.abort();
                let _ = handle.await;
                aborted += 1;
            }
        }
        for handle in retired {
            let _ = handle.await;
        }
        tracing::info!(aborted, "worker pool shut down");
    }

    pub fn status(&self) -> PoolStatus {
        let state = self.shared.lock();
        let count = |s: WorkerState| state.workers.iter().filter(|w| w.state == s).count();
        let factor = self.shared.throttling_factor();
        PoolStatus {
            total_workers: state.workers.len(),
            starting_workers: count(WorkerState::Starting),
            idle_workers: count(WorkerState::Idle),
            busy_workers: count(WorkerState::Busy),
            queued_tasks: state.queue.len(),
            in_flight_tasks: state.in_flight.len(),
            completed_tasks: state.completed,
            restarts: state.restarts,
            throttling_factor: factor,
            effective_concurrency: effective_concurrency(state.workers.len(), factor),
        }
    }

    /// The error that stopped the pool, if it gave up.
    pub fn failure(&self) -> Option<PoolError> {
        self.shared.lock().failure.clone()
    }
}

impl<E: TaskExecutor> Drop for WorkerPool<E> {
    fn drop(&mut self) {
        for handle in &self.background {
            handle.abort();
        }
        let mut state = self.shared.lock();
        state.terminated = true;
        for worker in &mut state.workers {
            if let Some(handle) = worker.handle.take() {
                handle.abort();
            }
        }
        for handle in state.retired.drain(..) {
            handle.abort();
        }
    }
}

fn cancel_queue(state: &mut PoolState, error: PoolError) {
    for queued in state.queue.drain(..) {
        let _ = queued.reply.send(Err(error.clone()));
    }
}

impl<E: TaskExecutor> Shared<E> {
    fn lock(&self) -> MutexGuard<'_, PoolState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn throttling_factor(&self) -> f64 {
        *self.throttle.borrow()
    }

    fn spawn_worker(self: &Arc<Self>, state: &mut PoolState, slot: usize) -> WorkerInfo {
        let generation = state.next_generation;
        state.next_generation += 1;
        let (inbox, rx) = mpsc::unbounded_channel();
        let handle = tokio::spawn(worker_loop(Arc::clone(self), slot, generation, rx));
        tracing::debug!(worker = slot, generation, "worker starting");
        WorkerInfo {
            generation,
            state: WorkerState::Starting,
            inbox,
            handle: Some(handle),
            current_task: None,
            completed_tasks: 0,
            last_activity: Instant::now(),
            restart_count: 0,
            consecutive_faults: 0,
        }
    }

    fn worker_ready(self: &Arc<Self>, slot: usize, generation: u64) {
        let mut state = self.lock();
        let Some(worker) = state.workers.get_mut(slot) else {
            return;
        };
        if worker.generation != generation || worker.state != WorkerState::Starting {
            return;
        }
        worker.state = WorkerState::Idle;
        worker.last_activity = Instant::now();
        self.dispatch_locked(&mut state);
    }

    fn dispatch(self: &Arc<Self>) {
        let mut state = self.lock();
        self.dispatch_locked(&mut state);
    }

    /// Hand queued tasks to idle workers, up to the throttled concurrency.
    fn dispatch_locked(self: &Arc<Self>, state: &mut PoolState) {
        if !state.accepting || state.terminated || state.failure.is_some() {
            return;
        }
        let limit = effective_concurrency(state.workers.len(), self.throttling_factor());

        loop {
            let busy = state.workers.iter().filter(|w| w.state == WorkerState::Busy).count();
            if busy >= limit || state.queue.is_empty() {
                return;
            }
            let Some(slot) = state.workers.iter().position(|w| w.state == WorkerState::Idle) else {
                return;
            };
            let Some(queued) = state.queue.pop_front() else {
                return;
            };

            let mutation_id = queued.task.mutation.id;
            let (worker_reply, worker_rx) = oneshot::channel();
            let worker = &mut state.workers[slot];
            let message = WorkerMessage::Execute {
                task: queued.task,
                reply: worker_reply,
            };

            if let Err(mpsc::error::SendError(message)) = worker.inbox.send(message) {
                // The worker is gone; put the task back and replace it.
                if let WorkerMessage::Execute { task, .. } = message {
                    state.queue.push_front(QueuedTask {
                        id: queued.id,
                        task,
                        reply: queued.reply,
                    });
                }
                self.restart_worker(state, slot, RestartReason::Exited);
                continue;
            }

            worker.state = WorkerState::Busy;
            worker.current_task = Some(queued.id);
            worker.last_activity = Instant::now();
            let generation = worker.generation;
            state.in_flight.insert(
                queued.id,
                InFlight {
                    mutation_id,
                    started: Instant::now(),
                    reply: queued.reply,
                },
            );
            tracing::debug!(worker = slot, mutation = mutation_id, "task assigned");

            tokio::spawn(supervise(
                Arc::clone(self),
                slot,
                generation,
                queued.id,
                worker_rx,
            ));
        }
    }

    /// Resolve an in-flight task and update its worker. Ignored if the task
    /// was already resolved elsewhere.
    fn settle(self: &Arc<Self>, slot: usize, generation: u64, task_id: u64, settlement: Settlement) {
        let mut state = self.lock();
        let Some(entry) = state.in_flight.remove(&task_id) else {
            return;
        };
        state.completed += 1;

        let timeout_ms = self.config.task_timeout.as_millis() as u64;
        let (result, restart) = match settlement {
            Settlement::Done(result) => (result, None),
            Settlement::TimedOut => {
                tracing::warn!(worker = slot, mutation = entry.mutation_id, timeout_ms, "task timed out");
                (TestResult::timed_out(entry.mutation_id, timeout_ms), Some(RestartReason::TimedOut))
            }
            Settlement::Fault(error) => {
                tracing::warn!(worker = slot, mutation = entry.mutation_id, "worker fault: {error}");
                let elapsed = entry.started.elapsed().as_millis() as u64;
                (TestResult::failed(entry.mutation_id, error, elapsed), Some(RestartReason::Fault))
            }
        };
        let _ = entry.reply.send(Ok(result));

        if state.terminated {
            return;
        }
        let max_tasks = self.config.max_tasks_per_worker;
        let Some(worker) = state.workers.get_mut(slot).filter(|w| w.generation == generation) else {
            self.dispatch_locked(&mut state);
            return;
        };

        let restart = restart.or_else(|| {
            worker.completed_tasks += 1;
            worker.consecutive_faults = 0;
            worker.state = WorkerState::Idle;
            worker.current_task = None;
            worker.last_activity = Instant::now();
            (worker.completed_tasks >= max_tasks).then_some(RestartReason::Recycled)
        });
        if let Some(reason) = restart {
            self.restart_worker(&mut state, slot, reason);
        }
        self.dispatch_locked(&mut state);
    }

    /// Terminate the worker in `slot` and start a fresh one in its place.
    /// Too many faults in a row poison the pool instead.
    fn restart_worker(self: &Arc<Self>, state: &mut PoolState, slot: usize, reason: RestartReason) {
        let Some(old) = state.workers.get_mut(slot) else {
            return;
        };
        let _ = old.inbox.send(WorkerMessage::Shutdown);
        let retired = old.handle.take();
        old.state = WorkerState::Terminated;

        let faults = if reason.is_fault() {
            old.consecutive_faults + 1
        } else {
            old.consecutive_faults
        };
        let restart_count = old.restart_count + 1;

        if let Some(handle) = retired {
            handle.abort();
            state.retired.retain(|h| !h.is_finished());
            state.retired.push(handle);
        }

        if reason.is_fault() && faults > self.config.max_consecutive_faults {
            let failure = PoolError::RestartLimit { worker: slot, faults };
            tracing::error!(worker = slot, faults, "worker keeps failing; giving up");
            state.accepting = false;
            state.failure = Some(failure.clone());
            cancel_queue(state, failure);
            return;
        }

        let mut fresh = self.spawn_worker(state, slot);
        fresh.restart_count = restart_count;
        fresh.consecutive_faults = faults;
        state.workers[slot] = fresh;
        state.restarts += 1;
        tracing::info!(worker = slot, reason = ?reason, restarts = restart_count, "worker restarted");
    }

    /// Replace workers that are stuck, went stale while idle, or exited.
    fn health_sweep(self: &Arc<Self>) {
        let mut state = self.lock();
        if state.terminated {
            return;
        }
        let now = Instant::now();
        let stuck_after = self.config.task_timeout * 2;
        let stale_after = self.config.stale_idle_threshold;

        let mut actions = Vec::new();
        for (slot, worker) in state.workers.iter().enumerate() {
            let quiet = now.saturating_duration_since(worker.last_activity);
            let exited = worker.handle.as_ref().is_some_and(JoinHandle::is_finished);
            match worker.state {
                WorkerState::Busy if quiet > stuck_after => actions.push((slot, RestartReason::Stuck)),
                WorkerState::Idle | WorkerState::Starting if exited => actions.push((slot, RestartReason::Exited)),
                WorkerState::Idle if quiet > stale_after => actions.push((slot, RestartReason::StaleIdle)),
                _ => {}
            }
        }

        for (slot, reason) in actions {
            if state.failure.is_some() {
                break;
            }
            if reason == RestartReason::Stuck {
                let task = state.workers[slot].current_task.take();
                if let Some(entry) = task.and_then(|id| state.in_flight.remove(&id)) {
                    tracing::warn!(worker = slot, mutation = entry.mutation_id, "worker unresponsive");
                    state.completed += 1;
                    let elapsed = entry.started.elapsed().as_millis() as u64;
                    let result = TestResult::failed(entry.mutation_id, "worker unresponsive", elapsed);
                    let _ = entry.reply.send(Ok(result));
                }
            }
            self.restart_worker(&mut state, slot, reason);
        }
        self.dispatch_locked(&mut state);
    }
}

async fn worker_loop<E: TaskExecutor>(
    shared: Arc<Shared<E>>,
    slot: usize,
    generation: u64,
    mut inbox: mpsc::UnboundedReceiver<WorkerMessage>,
) {
    let executor = Arc::clone(&shared.executor);
    shared.worker_ready(slot, generation);
    drop(shared);

    while let Some(message) = inbox.recv().await {
        match message {
            WorkerMessage::Execute { task, reply } => {
                let outcome = executor.execute(task).await;
                let _ = reply.send(outcome.map_err(|e| e.to_string()));
            }
            WorkerMessage::Shutdown => break,
        }
    }
    tracing::trace!(worker = slot, generation, "worker exited");
}

/// Race the worker's reply against the task deadline.
async fn supervise<E: TaskExecutor>(
    shared: Arc<Shared<E>>,
    slot: usize,
    generation: u64,
    task_id: u64,
    reply: oneshot::Receiver<std::result::Result<TestResult, String>>,
) {
    let timeout = shared.config.task_timeout;
    let settlement = tokio::select! {
        received = reply => match received {
            Ok(Ok(result)) => Settlement::Done(result),
            Ok(Err(error)) => Settlement::Fault(error),
            Err(_) => Settlement::Fault("worker exited without replying".to_string()),
        },
        _ = tokio::time::sleep(timeout) => Settlement::TimedOut,
    };
    shared.settle(slot, generation, task_id, settlement);
}

async fn health_loop<E: TaskExecutor>(shared: Arc<Shared<E>>) {
    let period = shared.config.health_check_interval;
    let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        ticker.tick().await;
        shared.health_sweep();
    }
}

/// Re-run dispatch whenever the throttling factor changes, so a relaxed
/// limit takes effect without waiting for the next completion.
async fn throttle_loop<E: TaskExecutor>(shared: Arc<Shared<E>>, mut throttle: watch::Receiver<f64>) {
    while throttle.changed().await.is_ok() {
        let factor = *throttle.borrow_and_update();
        tracing::debug!(factor, "throttling factor changed");
        shared.dispatch();
    }
}
