//! Per-worker FIFO of outstanding requests.
//!
//! The Nth sentinel-terminated block a worker prints belongs to the Nth entry
//! that has not yet received output. Entries are only ever removed from the
//! head, so a timed-out request stays in place as a tombstone until its late
//! block arrives and is discarded.

use super::task::{Job, Response};
use std::collections::VecDeque;
use std::time::Duration;
use tokio::time::Instant;

/// What a queue entry is waiting for.
pub(crate) enum Payload {
    /// The post-spawn version probe.
    Probe,
    /// A caller's task.
    Task(Box<dyn Job>),
    /// A task whose caller was already answered (timed out); output is dropped.
    Tombstone,
}

pub(crate) struct PendingRequest {
    pub(crate) payload: Payload,
    /// Submission time for tasks, spawn time for the probe.
    pub(crate) started_at: Instant,
    pub(crate) deadline: Option<Instant>,
    /// Set when this request's block has arrived.
    pub(crate) stdout: Option<String>,
    /// Stderr lines attributed while this entry was at the head.
    pub(crate) stderr: Vec<String>,
    /// When a parked response may be delivered (stderr flush window).
    pub(crate) deliver_at: Option<Instant>,
    pub(crate) timed_out_at: Option<Instant>,
}

impl PendingRequest {
    pub(crate) fn new(payload: Payload, started_at: Instant, timeout: Option<Duration>) -> Self {
        Self {
            payload,
            started_at,
            deadline: timeout.map(|t| started_at + t),
            stdout: None,
            stderr: Vec::new(),
            deliver_at: None,
            timed_out_at: None,
        }
    }

    pub(crate) fn is_tombstone(&self) -> bool {
        matches!(self.payload, Payload::Tombstone)
    }

    pub(crate) fn is_probe(&self) -> bool {
        matches!(self.payload, Payload::Probe)
    }

    fn awaiting_output(&self) -> bool {
        self.stdout.is_none()
    }
}

/// A request whose response is complete and ready to hand to its owner.
pub(crate) struct Finished {
    pub(crate) payload: Payload,
    pub(crate) response: Response,
    pub(crate) elapsed: Duration,
}

/// Outcome of a deadline sweep.
pub(crate) enum Expired {
    Probe,
    Task(Box<dyn Job>, Duration),
}

#[derive(Default)]
pub(crate) struct PendingQueue {
    entries: VecDeque<PendingRequest>,
}

impl PendingQueue {
    pub(crate) fn push(&mut self, request: PendingRequest) {
        self.entries.push_back(request);
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries that still have a caller or probe attached.
    pub(crate) fn live_len(&self) -> usize {
        self.entries.iter().filter(|e| !e.is_tombstone()).count()
    }

    pub(crate) fn has_probe(&self) -> bool {
        self.entries.iter().any(PendingRequest::is_probe)
    }

    /// Give a completed block to the oldest entry still waiting for output.
    ///
    /// Returns false if no entry is waiting: the worker printed more blocks
    /// than it was sent commands.
    pub(crate) fn attach_stdout(&mut self, block: String, deliver_at: Instant) -> bool {
        match self.entries.iter_mut().find(|e| e.awaiting_output()) {
            Some(entry) => {
                entry.stdout = Some(block);
                entry.deliver_at = Some(deliver_at);
                entry.deadline = None;
                true
            }
            None => false,
        }
    }

    /// Attribute a stderr line to the head entry. Returns false if the queue is empty.
    pub(crate) fn attach_stderr(&mut self, line: String) -> bool {
        match self.entries.front_mut() {
            Some(head) => {
                head.stderr.push(line);
                true
            }
            None => false,
        }
    }

    /// Pop head entries whose output is in and whose flush window has passed.
    ///
    /// With `force`, every head entry that has output is popped regardless of
    /// its window (used when the process is gone).
    pub(crate) fn take_finished(&mut self, now: Instant, force: bool) -> Vec<Finished> {
        let mut finished = Vec::new();
        while let Some(head) = self.entries.front() {
            let ready = head.stdout.is_some()
                && (force || head.deliver_at.is_none_or(|at| at <= now));
            if !ready {
                break;
            }
            let Some(entry) = self.entries.pop_front() else {
                break;
            };
            finished.push(Finished {
                elapsed: now.saturating_duration_since(entry.started_at),
                response: Response {
                    stdout: entry.stdout.unwrap_or_default(),
                    stderr: entry.stderr,
                },
                payload: entry.payload,
            });
        }
        finished
    }

    /// Turn every entry past its deadline into a tombstone and return what expired.
    pub(crate) fn expire(&mut self, now: Instant) -> Vec<Expired> {
        let mut expired = Vec::new();
        for entry in self.entries.iter_mut() {
            let Some(deadline) = entry.deadline else {
                continue;
            };
            if deadline > now || !entry.awaiting_output() {
                continue;
            }
            entry.deadline = None;
            entry.timed_out_at = Some(now);
            let elapsed = now.saturating_duration_since(entry.started_at);
            match std::mem::replace(&mut entry.payload, Payload::Tombstone) {
                Payload::Probe => expired.push(Expired::Probe),
                Payload::Task(job) => expired.push(Expired::Task(job, elapsed)),
                Payload::Tombstone => {}
            }
        }
        expired
    }

    /// Earliest instant at which `expire` or `take_finished` has work to do.
    pub(crate) fn next_wakeup(&self) -> Option<Instant> {
        let deadlines = self.entries.iter().filter_map(|e| e.deadline);
        let delivery = self.entries.front().and_then(|head| head.deliver_at);
        deadlines.chain(delivery).min()
    }

    /// When the oldest still-unanswered tombstone timed out.
    pub(crate) fn oldest_tombstone(&self) -> Option<Instant> {
        self.entries
            .iter()
            .filter(|e| e.is_tombstone() && e.awaiting_output())
            .filter_map(|e| e.timed_out_at)
            .min()
    }

    /// Remove everything; used once the process has exited.
    pub(crate) fn drain(&mut self) -> Vec<PendingRequest> {
        self.entries.drain(..).collect()
    }
}
