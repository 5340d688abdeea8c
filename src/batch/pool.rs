//! Pool supervisor for batch-mode workers.
//!
//! All pool state lives in one supervisor task. [`Pool`] handles talk to it
//! over a command channel, and worker stream tasks report to it over an event
//! channel, so every state transition happens on a single logical thread.

use super::pending::Expired;
use super::process::WorkerEvent;
use super::protocol::ToolProtocol;
use super::task::{Job, SubmitOptions, Task, TaskJob};
use super::worker::{Delivery, RetireReason, WorkerHandle, WorkerInfo, WorkerState};
use crate::error::{ExifBatchError, Result};
use serde::Serialize;
use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::{Instant, sleep_until};
use tracing::{Instrument, debug, debug_span, info, trace, warn};

/// Configuration for the worker pool.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolConfig {
    /// Ceiling on live worker processes (including ones still ending).
    pub max_procs: usize,
    /// Tasks a worker runs before it is retired. 0 disables the quota.
    pub max_tasks_per_process: u64,
    /// Requests a worker may have outstanding at once.
    pub pipeline_depth: usize,
    /// Default per-request deadline, counted from submission.
    pub task_timeout: Option<Duration>,
    /// Deadline for the post-spawn version probe.
    pub spawn_timeout: Duration,
    /// Consecutive spawn failures tolerated before spawning pauses. Queued
    /// tasks are only rejected if no other worker is left to serve them.
    pub max_spawn_attempts: u32,
    /// How long an ending worker may take before it is signalled.
    pub end_grace_period: Duration,
    /// Default re-dispatch attempts after a worker exit or timeout.
    pub task_retries: u32,
    /// Kill a worker whose oldest timed-out request stays unanswered this long.
    /// Requests pipelined behind it are requeued. `None` waits forever.
    pub stall_timeout: Option<Duration>,
    /// How long a finished response waits for trailing stderr lines.
    pub stream_flush: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        let cpus = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1);
        Self {
            max_procs: cpus.clamp(1, 4),
            max_tasks_per_process: 500,
            pipeline_depth: 1,
            task_timeout: Some(Duration::from_secs(20)),
            spawn_timeout: Duration::from_secs(30),
            max_spawn_attempts: 3,
            end_grace_period: Duration::from_secs(5),
            task_retries: 0,
            stall_timeout: Some(Duration::from_secs(1)),
            stream_flush: Duration::from_millis(10),
        }
    }
}

impl PoolConfig {
    pub fn with_max_procs(mut self, max_procs: usize) -> Self {
        self.max_procs = max_procs.max(1);
        self
    }

    pub fn with_max_tasks_per_process(mut self, max_tasks: u64) -> Self {
        self.max_tasks_per_process = max_tasks;
        self
    }

    pub fn with_pipeline_depth(mut self, depth: usize) -> Self {
        self.pipeline_depth = depth.max(1);
        self
    }

    pub fn with_task_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.task_timeout = timeout;
        self
    }

    pub fn with_spawn_timeout(mut self, timeout: Duration) -> Self {
        self.spawn_timeout = timeout;
        self
    }

    pub fn with_max_spawn_attempts(mut self, attempts: u32) -> Self {
        self.max_spawn_attempts = attempts.max(1);
        self
    }

    pub fn with_end_grace_period(mut self, grace: Duration) -> Self {
        self.end_grace_period = grace;
        self
    }

    pub fn with_task_retries(mut self, retries: u32) -> Self {
        self.task_retries = retries;
        self
    }

    pub fn with_stall_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.stall_timeout = timeout;
        self
    }

    pub fn with_stream_flush(mut self, flush: Duration) -> Self {
        self.stream_flush = flush;
        self
    }
}

/// Point-in-time view of the pool.
#[derive(Debug, Clone, Default, Serialize)]
pub struct PoolStats {
    pub workers: Vec<WorkerInfo>,
    /// Tasks waiting for a worker.
    pub queued: usize,
    pub ended: bool,
    pub tasks_completed: u64,
    pub spawn_failures: u64,
    pub timeouts: u64,
    pub retired: u64,
    pub correlation_failures: u64,
}

impl PoolStats {
    pub fn live_workers(&self) -> usize {
        self.workers.len()
    }

    pub fn worker_ids(&self) -> Vec<u64> {
        self.workers.iter().map(|w| w.id).collect()
    }
}

enum Command {
    Submit(Box<dyn Job>),
    Stats(oneshot::Sender<PoolStats>),
    End(oneshot::Sender<()>),
}

struct PoolShared {
    commands: mpsc::UnboundedSender<Command>,
    ended: AtomicBool,
    config: watch::Sender<PoolConfig>,
}

/// Handle to a pool of batch-mode workers. Cheap to clone.
///
/// Dropping the last handle without calling [`Pool::end`] ends every worker
/// in the background.
#[derive(Clone)]
pub struct Pool {
    shared: Arc<PoolShared>,
}

impl std::fmt::Debug for Pool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pool")
            .field("ended", &self.is_ended())
            .finish_non_exhaustive()
    }
}

impl Pool {
    /// Start a pool supervisor.
    ///
    /// Must be called from within a Tokio runtime. No worker is spawned until
    /// the first task arrives.
    pub fn new(protocol: ToolProtocol, config: PoolConfig) -> Self {
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let (config_tx, config_rx) = watch::channel(config.clone());
        let (events_tx, events_rx) = mpsc::unbounded_channel();

        let supervisor = Supervisor {
            protocol: Arc::new(protocol),
            config,
            config_rx,
            commands: commands_rx,
            events_tx,
            events_rx,
            workers: BTreeMap::new(),
            queue: VecDeque::new(),
            next_worker_id: 1,
            ended: false,
            end_waiters: Vec::new(),
            consecutive_spawn_failures: 0,
            spawn_paused: false,
            tasks_completed: 0,
            spawn_failures: 0,
            timeouts: 0,
            retired: 0,
            correlation_failures: 0,
        };
        tokio::spawn(supervisor.run().instrument(debug_span!("pool")));

        Self {
            shared: Arc::new(PoolShared {
                commands: commands_tx,
                ended: AtomicBool::new(false),
                config: config_tx,
            }),
        }
    }

    /// Submit a task with the pool's default timeout and retries.
    pub async fn submit<T: Task>(&self, task: T) -> Result<T::Output> {
        self.submit_with(task, SubmitOptions::default()).await
    }

    /// Submit a task with per-request overrides.
    pub async fn submit_with<T: Task>(&self, task: T, options: SubmitOptions) -> Result<T::Output> {
        if self.is_ended() {
            return Err(ExifBatchError::PoolEnded);
        }
        let (timeout, retries) = {
            let config = self.shared.config.borrow();
            (
                options.timeout.or(config.task_timeout),
                options.retries.unwrap_or(config.task_retries),
            )
        };
        let (job, reply) = TaskJob::new(task, timeout, retries);
        self.shared
            .commands
            .send(Command::Submit(Box::new(job)))
            .map_err(|_| ExifBatchError::PoolEnded)?;
        reply.await.map_err(|_| ExifBatchError::PoolEnded)?
    }

    /// End every worker and reject queued tasks. Resolves once all workers
    /// have exited. Idempotent.
    pub async fn end(&self) {
        self.shared.ended.store(true, Ordering::SeqCst);
        let (tx, rx) = oneshot::channel();
        if self.shared.commands.send(Command::End(tx)).is_ok() {
            let _ = rx.await;
        }
    }

    pub fn is_ended(&self) -> bool {
        self.shared.ended.load(Ordering::SeqCst)
    }

    pub async fn stats(&self) -> Result<PoolStats> {
        let (tx, rx) = oneshot::channel();
        self.shared
            .commands
            .send(Command::Stats(tx))
            .map_err(|_| ExifBatchError::PoolEnded)?;
        rx.await.map_err(|_| ExifBatchError::PoolEnded)
    }

    pub fn config(&self) -> PoolConfig {
        self.shared.config.borrow().clone()
    }

    /// Replace the configuration. Running workers pick up new limits on the
    /// supervisor's next pass; a lower `max_procs` retires idle workers.
    pub fn reconfigure(&self, config: PoolConfig) {
        self.shared.config.send_replace(config);
    }

    /// Subscribe to configuration changes.
    pub fn subscribe_config(&self) -> watch::Receiver<PoolConfig> {
        self.shared.config.subscribe()
    }
}

struct Supervisor {
    protocol: Arc<ToolProtocol>,
    config: PoolConfig,
    config_rx: watch::Receiver<PoolConfig>,
    commands: mpsc::UnboundedReceiver<Command>,
    events_tx: mpsc::UnboundedSender<WorkerEvent>,
    events_rx: mpsc::UnboundedReceiver<WorkerEvent>,
    /// Ordered by id so older workers are preferred.
    workers: BTreeMap<u64, WorkerHandle>,
    queue: VecDeque<Box<dyn Job>>,
    next_worker_id: u64,
    ended: bool,
    end_waiters: Vec<oneshot::Sender<()>>,
    consecutive_spawn_failures: u32,
    /// Set when spawning gave up while other workers were still serving.
    spawn_paused: bool,
    tasks_completed: u64,
    spawn_failures: u64,
    timeouts: u64,
    retired: u64,
    correlation_failures: u64,
}

impl Supervisor {
    async fn run(mut self) {
        let mut commands_open = true;
        let mut config_open = true;

        loop {
            if !commands_open && self.workers.is_empty() {
                break;
            }
            let wakeup = self.next_wakeup();

            tokio::select! {
                command = self.commands.recv(), if commands_open => match command {
                    Some(command) => self.on_command(command),
                    None => {
                        commands_open = false;
                        debug!("All pool handles dropped; ending workers");
                        self.begin_end();
                    }
                },
                changed = self.config_rx.changed(), if config_open => match changed {
                    Ok(()) => {
                        self.config = self.config_rx.borrow_and_update().clone();
                        debug!(config = ?self.config, "Pool reconfigured");
                    }
                    Err(_) => config_open = false,
                },
                Some(event) = self.events_rx.recv() => self.on_event(event),
                _ = sleep_until(wakeup.unwrap_or_else(Instant::now)), if wakeup.is_some() => {}
            }

            self.service(Instant::now());
        }

        debug!("Pool supervisor stopped");
    }

    fn on_command(&mut self, command: Command) {
        match command {
            Command::Submit(job) => {
                if self.ended {
                    job.fail(ExifBatchError::PoolEnded);
                } else {
                    self.spawn_paused = false;
                    self.queue.push_back(job);
                    trace!(queued = self.queue.len(), "Task queued");
                }
            }
            Command::Stats(reply) => {
                let _ = reply.send(self.stats());
            }
            Command::End(reply) => {
                self.begin_end();
                self.end_waiters.push(reply);
            }
        }
    }

    fn on_event(&mut self, event: WorkerEvent) {
        match event {
            WorkerEvent::Stdout { worker_id, chunk } => {
                let Some(worker) = self.workers.get_mut(&worker_id) else {
                    return;
                };
                let orphans = worker.on_stdout(&chunk);
                if orphans > 0 {
                    self.correlation_failures += orphans as u64;
                    self.retire(worker_id, RetireReason::Desynchronized);
                }
            }
            WorkerEvent::Stderr { worker_id, chunk } => {
                if let Some(worker) = self.workers.get_mut(&worker_id) {
                    worker.on_stderr(&chunk);
                }
            }
            WorkerEvent::Exited { worker_id, reason } => {
                let Some(mut worker) = self.workers.remove(&worker_id) else {
                    return;
                };
                let outcome = worker.on_exit(reason, Instant::now());
                let probe_answered = outcome.delivery.probe.is_some();
                self.record_delivery(worker_id, outcome.delivery);

                if outcome.was_spawning
                    && !probe_answered
                    && worker.retire_reason() != Some(RetireReason::ProbeFailed)
                    && !self.ended
                {
                    self.record_spawn_failure(format!(
                        "worker {} {} before answering its version probe",
                        worker_id, outcome.reason
                    ));
                }

                if worker.retire_reason() == Some(RetireReason::Stalled) && !self.ended {
                    // Stuck behind a hung command, never started.
                    debug!(
                        worker_id,
                        requeued = outcome.orphaned.len(),
                        "Requeueing tasks from stalled worker"
                    );
                    for job in outcome.orphaned.into_iter().rev() {
                        self.queue.push_front(job);
                    }
                    return;
                }

                let reason = outcome.reason.to_string();
                for job in outcome.orphaned {
                    self.fail_or_retry(
                        job,
                        ExifBatchError::WorkerExited {
                            worker_id,
                            reason: reason.clone(),
                        },
                    );
                }
                debug!(
                    worker_id,
                    expected = outcome.expected,
                    live = self.workers.len(),
                    "Worker removed from pool"
                );
            }
        }
    }

    /// One pass over timers, retirement and dispatch.
    fn service(&mut self, now: Instant) {
        let ids: Vec<u64> = self.workers.keys().copied().collect();
        for id in ids {
            self.service_worker(id, now);
        }
        self.trim_to_ceiling();
        self.expire_queue(now);
        self.dispatch_queue();

        if self.ended && self.workers.is_empty() {
            for waiter in self.end_waiters.drain(..) {
                let _ = waiter.send(());
            }
        }
    }

    fn service_worker(&mut self, id: u64, now: Instant) {
        let max_tasks = self.config.max_tasks_per_process;
        let grace = self.config.end_grace_period;
        let stall_timeout = self.config.stall_timeout;

        let Some(worker) = self.workers.get_mut(&id) else {
            return;
        };
        let expired = worker.expire(now);
        let delivery = worker.deliver(now, false);
        worker.escalate(now, grace);
        let stalled = match (stall_timeout, worker.stalled_since()) {
            (Some(limit), Some(since)) => worker.retire_reason().is_none() && now >= since + limit,
            _ => false,
        };
        let quota_exhausted = worker.quota_exhausted(max_tasks);

        for item in expired {
            match item {
                Expired::Probe => {
                    if let Some(worker) = self.workers.get_mut(&id) {
                        worker.abort(RetireReason::ProbeFailed);
                    }
                    self.record_spawn_failure(format!(
                        "worker {} did not answer its version probe within {}ms",
                        id,
                        self.config.spawn_timeout.as_millis()
                    ));
                }
                Expired::Task(job, elapsed) => {
                    self.timeouts += 1;
                    self.fail_or_retry(job, ExifBatchError::Timeout(elapsed));
                }
            }
        }
        self.record_delivery(id, delivery);

        if stalled {
            warn!(worker_id = id, "Worker stopped answering after a timeout; killing it");
            self.retire(id, RetireReason::Stalled);
        } else if quota_exhausted {
            info!(worker_id = id, max_tasks, "Worker reached its task quota; retiring it");
            self.retire(id, RetireReason::TaskQuota);
        }
    }

    fn record_delivery(&mut self, id: u64, delivery: Delivery) {
        self.tasks_completed += delivery.completed;
        match delivery.probe {
            Some(Ok(_)) => self.consecutive_spawn_failures = 0,
            Some(Err(e)) => {
                if let Some(worker) = self.workers.get_mut(&id) {
                    worker.abort(RetireReason::ProbeFailed);
                }
                self.record_spawn_failure(format!("worker {} failed its version probe: {}", id, e));
            }
            None => {}
        }
    }

    fn record_spawn_failure(&mut self, reason: String) {
        self.spawn_failures += 1;
        self.consecutive_spawn_failures += 1;
        let max_attempts = self.config.max_spawn_attempts.max(1);
        warn!(
            attempt = self.consecutive_spawn_failures,
            max_attempts,
            reason = %reason,
            "Worker spawn failed"
        );
        if self.consecutive_spawn_failures < max_attempts {
            return;
        }
        self.consecutive_spawn_failures = 0;
        if self.has_serving_worker() {
            debug!(
                queued = self.queue.len(),
                "Pausing spawns; queued tasks wait for running workers"
            );
            self.spawn_paused = true;
            return;
        }
        if !self.queue.is_empty() {
            warn!(
                queued = self.queue.len(),
                "Giving up on spawning for now; rejecting queued tasks"
            );
        }
        for job in self.queue.drain(..) {
            job.fail(ExifBatchError::SpawnFailed(reason.clone()));
        }
    }

    /// A worker that is up (or coming up) and not on its way out.
    fn has_serving_worker(&self) -> bool {
        self.workers.values().any(|w| {
            w.retire_reason().is_none()
                && matches!(
                    w.state(),
                    WorkerState::Spawning | WorkerState::Ready | WorkerState::Busy
                )
        })
    }

    /// Reject queued tasks whose deadline passed before any worker took them.
    fn expire_queue(&mut self, now: Instant) {
        if !self
            .queue
            .iter()
            .any(|job| job.deadline().is_some_and(|d| d <= now))
        {
            return;
        }
        let (expired, waiting): (Vec<_>, Vec<_>) = std::mem::take(&mut self.queue)
            .into_iter()
            .partition(|job| job.deadline().is_some_and(|d| d <= now));
        self.queue = waiting.into();
        for job in expired {
            let elapsed = now.saturating_duration_since(job.submitted_at());
            warn!(
                elapsed_ms = elapsed.as_millis(),
                "Task timed out waiting for a worker"
            );
            self.timeouts += 1;
            self.fail_or_retry(job, ExifBatchError::Timeout(elapsed));
        }
    }

    fn fail_or_retry(&mut self, mut job: Box<dyn Job>, error: ExifBatchError) {
        if error.is_retryable() && !self.ended && !job.is_abandoned() && job.take_retry() {
            debug!(error = %error, "Retrying task");
            self.queue.push_front(job);
        } else {
            job.fail(error);
        }
    }

    fn retire(&mut self, id: u64, reason: RetireReason) {
        if let Some(worker) = self.workers.get_mut(&id) {
            if worker.retire_reason().is_none() {
                self.retired += 1;
            }
            match reason {
                // A stalled worker is not reading its input.
                RetireReason::Stalled => worker.abort(reason),
                _ => worker.retire(reason),
            }
        }
    }

    /// Retire idle workers above a lowered ceiling.
    fn trim_to_ceiling(&mut self) {
        let max_procs = self.config.max_procs.max(1);
        let active = self
            .workers
            .values()
            .filter(|w| !matches!(w.state(), WorkerState::Ending | WorkerState::Ended))
            .count();
        if active <= max_procs {
            return;
        }
        let idle: Vec<u64> = self
            .workers
            .values()
            .rev()
            .filter(|w| w.state() == WorkerState::Ready)
            .map(|w| w.id())
            .take(active - max_procs)
            .collect();
        for id in idle {
            self.retire(id, RetireReason::OverCeiling);
        }
    }

    fn dispatch_queue(&mut self) {
        if self.ended {
            return;
        }
        while let Some(job) = self.queue.pop_front() {
            if job.is_abandoned() {
                trace!("Dropping task whose caller stopped waiting");
                continue;
            }
            if let Some(id) = self.pick_worker(WorkerState::Ready) {
                self.dispatch_to(id, job);
                continue;
            }
            self.queue.push_front(job);
            if self.should_spawn() {
                self.spawn_worker();
                continue;
            }
            if let Some(id) = self.pick_worker(WorkerState::Busy)
                && let Some(job) = self.queue.pop_front()
            {
                self.dispatch_to(id, job);
                continue;
            }
            break;
        }
    }

    /// Lowest-id worker in `state` that can take a task; for busy workers the
    /// one with the shortest queue.
    fn pick_worker(&self, state: WorkerState) -> Option<u64> {
        let max_tasks = self.config.max_tasks_per_process;
        let depth = self.config.pipeline_depth;
        self.workers
            .values()
            .filter(|w| w.state() == state && w.accepts_work(max_tasks, depth))
            .min_by_key(|w| (w.pending_len(), w.id()))
            .map(|w| w.id())
    }

    fn should_spawn(&self) -> bool {
        let spawning = self
            .workers
            .values()
            .filter(|w| w.state() == WorkerState::Spawning)
            .count();
        if self.spawn_paused && self.has_serving_worker() {
            return false;
        }
        self.workers.len() < self.config.max_procs.max(1) && spawning < self.queue.len()
    }

    fn spawn_worker(&mut self) {
        let id = self.next_worker_id;
        self.next_worker_id += 1;
        match WorkerHandle::spawn(
            id,
            Arc::clone(&self.protocol),
            self.events_tx.clone(),
            self.config.spawn_timeout,
            self.config.stream_flush,
        ) {
            Ok(worker) => {
                self.workers.insert(id, worker);
            }
            Err(e) => self.record_spawn_failure(e.to_string()),
        }
    }

    fn dispatch_to(&mut self, id: u64, job: Box<dyn Job>) {
        let Some(worker) = self.workers.get_mut(&id) else {
            self.queue.push_front(job);
            return;
        };
        match worker.dispatch(job) {
            Ok(()) => {}
            Err((job, e @ ExifBatchError::InvalidArgument(_))) => job.fail(e),
            Err((job, e)) => {
                debug!(worker_id = id, error = %e, "Dispatch failed; requeueing task");
                self.queue.push_front(job);
                self.retire(id, RetireReason::InputClosed);
            }
        }
    }

    fn begin_end(&mut self) {
        if self.ended {
            return;
        }
        self.ended = true;
        info!(
            live = self.workers.len(),
            queued = self.queue.len(),
            "Ending pool"
        );
        for job in self.queue.drain(..) {
            job.fail(ExifBatchError::PoolEnded);
        }
        for worker in self.workers.values_mut() {
            worker.retire(RetireReason::PoolEnded);
        }
    }

    fn next_wakeup(&self) -> Option<Instant> {
        let grace = self.config.end_grace_period;
        let stall = self.config.stall_timeout;
        self.workers
            .values()
            .flat_map(|w| {
                let stalled = match (stall, w.stalled_since()) {
                    (Some(limit), Some(since)) if w.retire_reason().is_none() => Some(since + limit),
                    _ => None,
                };
                [w.next_wakeup(grace), stalled]
            })
            .flatten()
            .chain(self.queue.iter().filter_map(|job| job.deadline()))
            .min()
    }

    fn stats(&self) -> PoolStats {
        PoolStats {
            workers: self.workers.values().map(WorkerHandle::info).collect(),
            queued: self.queue.len(),
            ended: self.ended,
            tasks_completed: self.tasks_completed,
            spawn_failures: self.spawn_failures,
            timeouts: self.timeouts,
            retired: self.retired,
            correlation_failures: self.correlation_failures,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::batch::task::{Response, VersionTask};
    use crate::batch::testing::{mock_protocol, mock_protocol_with};

    struct Echo(String);

    impl Task for Echo {
        type Output = String;
        fn args(&self) -> Vec<String> {
            vec!["-mock-echo".to_string(), self.0.clone()]
        }
        fn parse(&self, response: Response) -> Result<String> {
            Ok(response.stdout)
        }
    }

    struct Raw(Vec<&'static str>);

    impl Task for Raw {
        type Output = Response;
        fn args(&self) -> Vec<String> {
            self.0.iter().map(|s| s.to_string()).collect()
        }
        fn parse(&self, response: Response) -> Result<Response> {
            Ok(response)
        }
    }

    fn config() -> PoolConfig {
        PoolConfig::default()
            .with_max_procs(2)
            .with_spawn_timeout(Duration::from_secs(10))
            .with_task_timeout(Some(Duration::from_secs(10)))
            .with_end_grace_period(Duration::from_secs(2))
    }

    #[test]
    fn test_pool_config_default() {
        let config = PoolConfig::default();
        assert!(config.max_procs >= 1 && config.max_procs <= 4);
        assert_eq!(config.pipeline_depth, 1);
        assert_eq!(config.task_retries, 0);
        assert_eq!(config.stall_timeout, Some(Duration::from_secs(1)));
    }

    #[test]
    fn test_pool_config_builders_clamp() {
        let config = PoolConfig::default()
            .with_max_procs(0)
            .with_pipeline_depth(0)
            .with_max_spawn_attempts(0);
        assert_eq!(config.max_procs, 1);
        assert_eq!(config.pipeline_depth, 1);
        assert_eq!(config.max_spawn_attempts, 1);
    }

    #[tokio::test]
    async fn test_submit_and_end() {
        let pool = Pool::new(mock_protocol(), config());
        assert_eq!(pool.submit(Echo("hello".into())).await.unwrap(), "hello");
        assert_eq!(pool.submit(VersionTask::default()).await.unwrap(), "12.40");

        let stats = pool.stats().await.unwrap();
        assert_eq!(stats.live_workers(), 1);
        assert_eq!(stats.tasks_completed, 2);
        assert_eq!(stats.workers[0].tool_version.as_deref(), Some("12.40"));

        pool.end().await;
        assert!(pool.is_ended());
        assert_eq!(pool.stats().await.unwrap().live_workers(), 0);
        pool.end().await;
    }

    #[tokio::test]
    async fn test_submit_after_end_is_rejected() {
        let pool = Pool::new(mock_protocol(), config());
        pool.end().await;
        let err = pool.submit(Echo("late".into())).await.unwrap_err();
        assert!(matches!(err, ExifBatchError::PoolEnded));
        assert_eq!(pool.stats().await.unwrap().queued, 0);
    }

    #[tokio::test]
    async fn test_worker_exit_is_request_local() {
        let pool = Pool::new(mock_protocol(), config());
        let err = pool.submit(Raw(vec!["-mock-exit", "1"])).await.unwrap_err();
        assert!(matches!(err, ExifBatchError::WorkerExited { .. }));
        // Capacity is replaced on demand.
        assert_eq!(pool.submit(Echo("again".into())).await.unwrap(), "again");
        assert!(!pool.is_ended());
        pool.end().await;
    }

    #[tokio::test]
    async fn test_retry_after_worker_exit() {
        let pool = Pool::new(mock_protocol(), config());
        // The crash directive kills the worker each time, so the retry fails too,
        // but only after a second worker was spawned for it.
        let err = pool
            .submit_with(
                Raw(vec!["-mock-exit", "2"]),
                SubmitOptions::default().with_retries(1),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, ExifBatchError::WorkerExited { .. }));
        pool.end().await;
    }

    #[tokio::test]
    async fn test_broken_tool_rejects_without_ending_pool() {
        let pool = Pool::new(
            mock_protocol_with(&["--broken"]),
            config().with_max_spawn_attempts(2),
        );
        for _ in 0..3 {
            let err = pool.submit(Echo("x".into())).await.unwrap_err();
            assert!(matches!(err, ExifBatchError::SpawnFailed(_)), "{err}");
        }
        assert!(!pool.is_ended());
        let stats = pool.stats().await.unwrap();
        assert!(stats.spawn_failures >= 6);
        pool.end().await;
    }

    #[tokio::test]
    async fn test_missing_program_is_spawn_failure() {
        let protocol = crate::batch::ToolProtocol::exiftool("/nonexistent/exiftool");
        let pool = Pool::new(protocol, config());
        let err = pool.submit(Echo("x".into())).await.unwrap_err();
        assert!(matches!(err, ExifBatchError::SpawnFailed(_)));
        pool.end().await;
    }

    #[tokio::test]
    async fn test_reconfigure_is_observed() {
        let pool = Pool::new(mock_protocol(), config());
        let mut rx = pool.subscribe_config();
        pool.reconfigure(config().with_max_tasks_per_process(1));
        rx.changed().await.unwrap();
        assert_eq!(pool.config().max_tasks_per_process, 1);

        pool.submit(Echo("a".into())).await.unwrap();
        pool.submit(Echo("b".into())).await.unwrap();
        let stats = pool.stats().await.unwrap();
        assert!(stats.retired >= 1);
        pool.end().await;
    }

    #[tokio::test]
    async fn test_dropping_pool_ends_workers() {
        let pool = Pool::new(mock_protocol(), config());
        pool.submit(Echo("x".into())).await.unwrap();
        let pid = pool.stats().await.unwrap().workers[0].pid;
        drop(pool);

        let deadline = Instant::now() + Duration::from_secs(5);
        while Instant::now() < deadline {
            if nix::sys::signal::kill(nix::unistd::Pid::from_raw(pid as i32), None).is_err() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        panic!("worker {pid} still running after pool was dropped");
    }
}
