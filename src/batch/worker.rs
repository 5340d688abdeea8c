//! One worker process and its request/response state machine.
//!
//! ```text
//! Spawning ──probe ok──▶ Ready ⇄ Busy ──end()──▶ Ending ──exit──▶ Ended
//! ```
//!
//! A `WorkerHandle` is owned by the pool supervisor and is only touched from
//! the supervisor task, so none of its state needs locking.

use super::pending::{Expired, Payload, PendingQueue, PendingRequest};
use super::process::WorkerProcess;
use super::protocol::{ResponseBuffer, ToolProtocol};
use super::signals::TerminationReason;
use super::task::{Job, parse_version};
use crate::error::{ExifBatchError, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, error, info, trace, warn};

use super::process::WorkerEvent;

/// Delay between SIGTERM and SIGKILL when a worker ignores its end command.
const SIGKILL_DELAY: Duration = Duration::from_millis(500);

/// Lifecycle state of a worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkerState {
    /// Process launched, version probe outstanding.
    Spawning,
    /// Idle, nothing pending.
    Ready,
    /// At least one request pending.
    Busy,
    /// End command sent, draining.
    Ending,
    /// Process exited.
    Ended,
}

impl std::fmt::Display for WorkerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Spawning => "spawning",
            Self::Ready => "ready",
            Self::Busy => "busy",
            Self::Ending => "ending",
            Self::Ended => "ended",
        };
        f.write_str(s)
    }
}

/// Snapshot of one worker for diagnostics.
#[derive(Debug, Clone, Serialize)]
pub struct WorkerInfo {
    pub id: u64,
    pub pid: u32,
    pub state: WorkerState,
    pub created_at: DateTime<Utc>,
    pub tasks_completed: u64,
    pub pending: usize,
    pub tool_version: Option<String>,
}

/// Why a worker is being retired early.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum RetireReason {
    TaskQuota,
    Desynchronized,
    Stalled,
    ProbeFailed,
    InputClosed,
    OverCeiling,
    PoolEnded,
}

/// Result of feeding stdout or a timer tick into a worker.
#[derive(Debug, Default)]
pub(crate) struct Delivery {
    /// The version probe finished (successfully or not).
    pub(crate) probe: Option<Result<String>>,
    pub(crate) completed: u64,
    pub(crate) discarded: u64,
}

/// What is left over when a worker's process exits.
pub(crate) struct ExitOutcome {
    pub(crate) reason: TerminationReason,
    pub(crate) was_spawning: bool,
    pub(crate) expected: bool,
    pub(crate) orphaned: Vec<Box<dyn Job>>,
    pub(crate) delivery: Delivery,
}

pub(crate) struct WorkerHandle {
    id: u64,
    protocol: Arc<ToolProtocol>,
    process: WorkerProcess,
    created_at: DateTime<Utc>,
    pending: PendingQueue,
    output: ResponseBuffer,
    stream_flush: Duration,
    probed: bool,
    tool_version: Option<String>,
    tasks_dispatched: u64,
    tasks_completed: u64,
    ending_since: Option<Instant>,
    terminate_sent_at: Option<Instant>,
    kill_sent: bool,
    retire_reason: Option<RetireReason>,
    ended: bool,
}

impl WorkerHandle {
    /// Launch a worker and send its version probe.
    pub(crate) fn spawn(
        id: u64,
        protocol: Arc<ToolProtocol>,
        events: mpsc::UnboundedSender<WorkerEvent>,
        spawn_timeout: Duration,
        stream_flush: Duration,
    ) -> Result<Self> {
        let process = WorkerProcess::spawn(id, &protocol, events)?;
        let probe = protocol.encode_command(&protocol.version_args)?;
        process.write(probe)?;

        let mut pending = PendingQueue::default();
        pending.push(PendingRequest::new(
            Payload::Probe,
            Instant::now(),
            Some(spawn_timeout),
        ));

        info!(worker_id = id, pid = process.pid(), "Worker spawned");

        Ok(Self {
            id,
            output: ResponseBuffer::new(protocol.sentinel.clone()),
            protocol,
            process,
            created_at: Utc::now(),
            pending,
            stream_flush,
            probed: false,
            tool_version: None,
            tasks_dispatched: 0,
            tasks_completed: 0,
            ending_since: None,
            terminate_sent_at: None,
            kill_sent: false,
            retire_reason: None,
            ended: false,
        })
    }

    pub(crate) fn id(&self) -> u64 {
        self.id
    }

    pub(crate) fn state(&self) -> WorkerState {
        if self.ended {
            WorkerState::Ended
        } else if self.ending_since.is_some() {
            WorkerState::Ending
        } else if !self.probed {
            WorkerState::Spawning
        } else if self.pending.is_empty() {
            WorkerState::Ready
        } else {
            WorkerState::Busy
        }
    }

    pub(crate) fn pending_len(&self) -> usize {
        self.pending.len()
    }

    pub(crate) fn tasks_completed(&self) -> u64 {
        self.tasks_completed
    }

    pub(crate) fn retire_reason(&self) -> Option<RetireReason> {
        self.retire_reason
    }

    /// Whether the supervisor may hand this worker another task.
    pub(crate) fn accepts_work(&self, max_tasks: u64, pipeline_depth: usize) -> bool {
        matches!(self.state(), WorkerState::Ready | WorkerState::Busy)
            && self.retire_reason.is_none()
            && (max_tasks == 0 || self.tasks_dispatched < max_tasks)
            && self.pending.len() < pipeline_depth.max(1)
    }

    /// Whether the task quota is used up and nothing is left in flight.
    pub(crate) fn quota_exhausted(&self, max_tasks: u64) -> bool {
        max_tasks > 0
            && self.tasks_dispatched >= max_tasks
            && self.state() == WorkerState::Ready
    }

    /// Mark the worker for retirement and send the end command.
    pub(crate) fn retire(&mut self, reason: RetireReason) {
        if self.retire_reason.is_none() {
            self.retire_reason = Some(reason);
        }
        self.end();
    }

    /// Append a request to the pending queue and write its command.
    ///
    /// The request's deadline counts from submission, so time spent queued in
    /// the pool is part of its timeout. On failure the job is handed back
    /// untouched so the caller can requeue or reject it.
    pub(crate) fn dispatch(
        &mut self,
        job: Box<dyn Job>,
    ) -> std::result::Result<(), (Box<dyn Job>, ExifBatchError)> {
        if matches!(self.state(), WorkerState::Ending | WorkerState::Ended) {
            return Err((
                job,
                ExifBatchError::WorkerExited {
                    worker_id: self.id,
                    reason: "worker is ending".to_string(),
                },
            ));
        }
        let command = match self.protocol.encode_command(job.args()) {
            Ok(command) => command,
            Err(e) => return Err((job, e)),
        };
        if let Err(e) = self.process.write(command) {
            return Err((job, e));
        }

        let (started_at, timeout) = (job.submitted_at(), job.timeout());
        self.pending
            .push(PendingRequest::new(Payload::Task(job), started_at, timeout));
        self.tasks_dispatched += 1;
        trace!(
            worker_id = self.id,
            pending = self.pending.len(),
            dispatched = self.tasks_dispatched,
            "Dispatched task"
        );
        Ok(())
    }

    /// Feed a stdout chunk. Returns the number of blocks that matched no request.
    pub(crate) fn on_stdout(&mut self, chunk: &str) -> usize {
        let deliver_at = Instant::now() + self.stream_flush;
        let mut orphans = 0;
        for block in self.output.push(chunk) {
            if !self.pending.attach_stdout(block, deliver_at) {
                orphans += 1;
            }
        }
        if orphans > 0 {
            error!(
                worker_id = self.id,
                pid = self.process.pid(),
                orphans,
                "Worker response arrived with no pending request; protocol desynchronized"
            );
        }
        orphans
    }

    /// Attribute a stderr chunk to the request currently at the head.
    pub(crate) fn on_stderr(&mut self, chunk: &str) {
        for line in chunk.lines() {
            let line = line.trim_end();
            if line.is_empty() {
                continue;
            }
            if !self.pending.attach_stderr(line.to_string()) {
                debug!(worker_id = self.id, line, "Stderr with no pending request");
            }
        }
    }

    /// Hand finished responses to their owners.
    pub(crate) fn deliver(&mut self, now: Instant, force: bool) -> Delivery {
        let mut delivery = Delivery::default();
        for finished in self.pending.take_finished(now, force) {
            match finished.payload {
                Payload::Probe => {
                    let result = parse_version(&finished.response.stdout);
                    if let Ok(version) = &result {
                        self.probed = true;
                        self.tool_version = Some(version.clone());
                        debug!(
                            worker_id = self.id,
                            version = %version,
                            elapsed_ms = finished.elapsed.as_millis(),
                            "Worker ready"
                        );
                    }
                    delivery.probe = Some(result);
                }
                Payload::Task(job) => {
                    self.tasks_completed += 1;
                    delivery.completed += 1;
                    trace!(
                        worker_id = self.id,
                        elapsed_ms = finished.elapsed.as_millis(),
                        "Task response delivered"
                    );
                    job.complete(finished.response);
                }
                Payload::Tombstone => {
                    delivery.discarded += 1;
                    debug!(
                        worker_id = self.id,
                        elapsed_ms = finished.elapsed.as_millis(),
                        "Discarded late response for timed-out task"
                    );
                }
            }
        }
        delivery
    }

    /// Sweep deadlines. Timed-out requests stay queued as tombstones.
    pub(crate) fn expire(&mut self, now: Instant) -> Vec<Expired> {
        let expired = self.pending.expire(now);
        for item in &expired {
            match item {
                Expired::Probe => {
                    warn!(worker_id = self.id, "Worker did not answer its version probe in time")
                }
                Expired::Task(_, elapsed) => warn!(
                    worker_id = self.id,
                    elapsed_ms = elapsed.as_millis(),
                    "Task timed out; worker kept running"
                ),
            }
        }
        expired
    }

    /// When the oldest unanswered timed-out request gave up.
    pub(crate) fn stalled_since(&self) -> Option<Instant> {
        self.pending.oldest_tombstone()
    }

    /// Escalate an end that the process ignored. Returns true if a signal was sent.
    pub(crate) fn escalate(&mut self, now: Instant, grace: Duration) -> bool {
        if self.ended {
            return false;
        }
        let Some(since) = self.ending_since else {
            return false;
        };
        match self.terminate_sent_at {
            None if now >= since + grace => {
                warn!(worker_id = self.id, pid = self.process.pid(), "Worker ignored end; sending SIGTERM");
                self.process.terminate();
                self.terminate_sent_at = Some(now);
                true
            }
            Some(sent) if !self.kill_sent && now >= sent + SIGKILL_DELAY => {
                warn!(worker_id = self.id, pid = self.process.pid(), "Worker still running; sending SIGKILL");
                self.process.kill();
                self.kill_sent = true;
                true
            }
            _ => false,
        }
    }

    /// Terminate immediately, without waiting for the end command to be read.
    pub(crate) fn abort(&mut self, reason: RetireReason) {
        self.retire_reason.get_or_insert(reason);
        self.ending_since.get_or_insert_with(Instant::now);
        self.process.close_input();
        self.process.kill();
        self.kill_sent = true;
    }

    /// Earliest instant this worker needs attention from the timer.
    pub(crate) fn next_wakeup(&self, grace: Duration) -> Option<Instant> {
        let escalation = match (self.ending_since, self.terminate_sent_at) {
            _ if self.ended || self.kill_sent => None,
            (Some(since), None) => Some(since + grace),
            (Some(_), Some(sent)) => Some(sent + SIGKILL_DELAY),
            (None, _) => None,
        };
        [self.pending.next_wakeup(), escalation]
            .into_iter()
            .flatten()
            .min()
    }

    /// Graceful end: send the end-of-session command and half-close stdin. Idempotent.
    pub(crate) fn end(&mut self) {
        if self.ended || self.ending_since.is_some() {
            return;
        }
        if let Err(e) = self.process.write(self.protocol.encode_exit()) {
            debug!(worker_id = self.id, error = %e, "Could not send end command; stdin closed");
        }
        self.process.close_input();
        self.ending_since = Some(Instant::now());
        debug!(
            worker_id = self.id,
            pending = self.pending.len(),
            reason = ?self.retire_reason,
            "Ending worker"
        );
    }

    /// The process is gone: deliver what arrived, hand back everything else.
    pub(crate) fn on_exit(&mut self, reason: TerminationReason, now: Instant) -> ExitOutcome {
        let was_spawning = !self.probed;
        let expected = self.ending_since.is_some();
        // A trailing partial block can never complete now.
        self.output.clear();
        let delivery = self.deliver(now, true);

        self.ended = true;
        self.process.mark_exited();

        let mut orphaned = Vec::new();
        for entry in self.pending.drain() {
            if let Payload::Task(job) = entry.payload {
                orphaned.push(job);
            }
        }

        if expected {
            debug!(worker_id = self.id, reason = %reason, "Worker ended");
        } else {
            warn!(
                worker_id = self.id,
                reason = %reason,
                orphaned = orphaned.len(),
                "Worker exited unexpectedly"
            );
        }

        ExitOutcome {
            reason,
            was_spawning,
            expected,
            orphaned,
            delivery,
        }
    }

    pub(crate) fn info(&self) -> WorkerInfo {
        WorkerInfo {
            id: self.id,
            pid: self.process.pid(),
            state: self.state(),
            created_at: self.created_at,
            tasks_completed: self.tasks_completed,
            pending: self.pending.len(),
            tool_version: self.tool_version.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::batch::task::{Response, Task, TaskJob};
    use crate::batch::testing::mock_protocol;

    struct Cmd(Vec<&'static str>);

    impl Task for Cmd {
        type Output = Response;
        fn args(&self) -> Vec<String> {
            self.0.iter().map(|s| s.to_string()).collect()
        }
        fn parse(&self, response: Response) -> Result<Response> {
            Ok(response)
        }
    }

    fn job(args: Vec<&'static str>) -> (Box<dyn Job>, tokio::sync::oneshot::Receiver<Result<Response>>) {
        let (job, rx) = TaskJob::new(Cmd(args), None, 0);
        (Box::new(job), rx)
    }

    /// Run the worker's event loop by hand until `done` holds.
    async fn pump(
        worker: &mut WorkerHandle,
        rx: &mut mpsc::UnboundedReceiver<WorkerEvent>,
        mut done: impl FnMut(&WorkerHandle, &Delivery) -> bool,
    ) -> Delivery {
        loop {
            let event = tokio::time::timeout(Duration::from_secs(10), rx.recv())
                .await
                .expect("worker event timeout")
                .expect("event channel closed");
            let mut delivery = match event {
                WorkerEvent::Stdout { chunk, .. } => {
                    worker.on_stdout(&chunk);
                    Delivery::default()
                }
                WorkerEvent::Stderr { chunk, .. } => {
                    worker.on_stderr(&chunk);
                    Delivery::default()
                }
                WorkerEvent::Exited { reason, .. } => worker.on_exit(reason, Instant::now()).delivery,
            };
            if delivery.probe.is_none() && delivery.completed == 0 {
                delivery = worker.deliver(Instant::now(), true);
            }
            if done(worker, &delivery) {
                return delivery;
            }
        }
    }

    async fn ready_worker() -> (WorkerHandle, mpsc::UnboundedReceiver<WorkerEvent>) {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut worker = WorkerHandle::spawn(
            1,
            Arc::new(mock_protocol()),
            tx,
            Duration::from_secs(10),
            Duration::ZERO,
        )
        .expect("spawn mock");
        assert_eq!(worker.state(), WorkerState::Spawning);
        let delivery = pump(&mut worker, &mut rx, |_, d| d.probe.is_some()).await;
        assert_eq!(delivery.probe.unwrap().unwrap(), "12.40");
        assert_eq!(worker.state(), WorkerState::Ready);
        (worker, rx)
    }

    #[tokio::test]
    async fn test_pipelined_responses_arrive_in_dispatch_order() {
        let (mut worker, mut rx) = ready_worker().await;

        let mut receivers = Vec::new();
        for (i, text) in ["one", "two", "three", "four", "five"].into_iter().enumerate() {
            // Earlier commands sleep longer; order must still follow dispatch.
            let sleep = ["0.2", "0.1", "0", "0.05", "0"][i];
            let (job, rx) = job(vec!["-mock-sleep", sleep, "-mock-echo", text]);
            worker.dispatch(job).map_err(|(_, e)| e).unwrap();
            receivers.push((text, rx));
        }
        assert_eq!(worker.state(), WorkerState::Busy);

        pump(&mut worker, &mut rx, |w, _| w.pending_len() == 0).await;
        for (text, rx) in receivers {
            assert_eq!(rx.await.unwrap().unwrap().stdout, text);
        }
        assert_eq!(worker.tasks_completed(), 5);
        assert_eq!(worker.state(), WorkerState::Ready);
    }

    #[tokio::test]
    async fn test_stderr_attributed_to_head() {
        let (mut worker, mut rx) = ready_worker().await;
        let (job, reply) = job(vec!["-mock-stderr", "Warning: odd", "-mock-echo", "body"]);
        worker.dispatch(job).map_err(|(_, e)| e).unwrap();
        pump(&mut worker, &mut rx, |w, _| w.pending_len() == 0).await;
        let response = reply.await.unwrap().unwrap();
        assert_eq!(response.stdout, "body");
        // Stderr may trail stdout; with no flush window it can be missed, never misattributed.
        assert!(response.stderr.is_empty() || response.stderr == vec!["Warning: odd"]);
    }

    #[tokio::test]
    async fn test_extra_sentinel_is_counted_as_orphan() {
        let (mut worker, _rx) = ready_worker().await;
        assert_eq!(worker.on_stdout("{ready}\n"), 1);
    }

    #[tokio::test]
    async fn test_end_is_idempotent_and_rejects_dispatch() {
        let (mut worker, mut rx) = ready_worker().await;
        worker.end();
        worker.end();
        assert_eq!(worker.state(), WorkerState::Ending);

        let (job, _reply) = job(vec!["-mock-echo", "late"]);
        let (_, err) = worker.dispatch(job).unwrap_err();
        assert!(matches!(err, ExifBatchError::WorkerExited { .. }));

        pump(&mut worker, &mut rx, |w, _| w.state() == WorkerState::Ended).await;
    }

    #[tokio::test]
    async fn test_exit_hands_back_pending_jobs() {
        let (mut worker, mut rx) = ready_worker().await;
        let (crash, _r1) = job(vec!["-mock-exit", "3"]);
        let (behind, _r2) = job(vec!["-mock-echo", "never"]);
        worker.dispatch(crash).map_err(|(_, e)| e).unwrap();
        worker.dispatch(behind).map_err(|(_, e)| e).unwrap();

        loop {
            match rx.recv().await.expect("events") {
                WorkerEvent::Exited { reason, .. } => {
                    let outcome = worker.on_exit(reason, Instant::now());
                    assert_eq!(outcome.reason, TerminationReason::Exited(3));
                    assert!(!outcome.expected);
                    assert!(!outcome.was_spawning);
                    assert_eq!(outcome.orphaned.len(), 2);
                    break;
                }
                WorkerEvent::Stdout { chunk, .. } => {
                    worker.on_stdout(&chunk);
                }
                WorkerEvent::Stderr { .. } => {}
            }
        }
        assert_eq!(worker.state(), WorkerState::Ended);
    }

    #[tokio::test]
    async fn test_end_with_closed_stdin_still_ends() {
        let (mut worker, mut rx) = ready_worker().await;
        // The end command cannot be written; EOF on stdin must still end the tool.
        worker.process.close_input();
        worker.end();
        assert_eq!(worker.state(), WorkerState::Ending);
        assert!(worker.process.write("-ver\n".to_string()).is_err());

        pump(&mut worker, &mut rx, |w, _| w.state() == WorkerState::Ended).await;
    }

    #[tokio::test]
    async fn test_abort_does_not_wait_for_a_hung_command() {
        let (mut worker, mut rx) = ready_worker().await;
        let (hung, _r1) = job(vec!["-mock-sleep", "30", "-mock-echo", "never"]);
        worker.dispatch(hung).map_err(|(_, e)| e).unwrap();
        worker.abort(RetireReason::Stalled);
        assert_eq!(worker.state(), WorkerState::Ending);
        assert_eq!(worker.retire_reason(), Some(RetireReason::Stalled));

        let started = Instant::now();
        loop {
            if let WorkerEvent::Exited { reason, .. } = rx.recv().await.expect("events") {
                let outcome = worker.on_exit(reason, Instant::now());
                assert_eq!(outcome.reason, TerminationReason::Killed);
                assert_eq!(outcome.orphaned.len(), 1);
                break;
            }
        }
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_quota_and_acceptance() {
        let (mut worker, mut rx) = ready_worker().await;
        assert!(worker.accepts_work(1, 1));
        let (job, reply) = job(vec!["-mock-echo", "x"]);
        worker.dispatch(job).map_err(|(_, e)| e).unwrap();
        assert!(!worker.accepts_work(0, 1), "pipeline depth 1 is full");
        assert!(worker.accepts_work(0, 2));
        pump(&mut worker, &mut rx, |w, _| w.pending_len() == 0).await;
        reply.await.unwrap().unwrap();
        assert!(worker.quota_exhausted(1));
        assert!(!worker.accepts_work(1, 1));
        assert!(!worker.quota_exhausted(2));
    }
}
