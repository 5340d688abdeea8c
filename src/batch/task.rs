//! Units of work submitted to the pool.
//!
//! A [`Task`] is an argument list plus a parser for the response block. The
//! pool only sees type-erased [`Job`]s so workers can hold tasks with
//! different output types in one queue.

use crate::error::{ExifBatchError, Result};
use std::panic::AssertUnwindSafe;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::time::Instant;

/// Raw response for one command: the stdout block and any stderr lines
/// attributed to it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Response {
    pub stdout: String,
    pub stderr: Vec<String>,
}

impl Response {
    pub fn new(stdout: impl Into<String>) -> Self {
        Self {
            stdout: stdout.into(),
            stderr: Vec::new(),
        }
    }

    /// Split stderr into warnings and errors.
    pub fn diagnostics(&self) -> Diagnostics {
        Diagnostics::classify(&self.stderr)
    }
}

/// Stderr lines classified by their marker prefix.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Diagnostics {
    pub warnings: Vec<String>,
    pub errors: Vec<String>,
}

impl Diagnostics {
    /// `Error:` lines are errors; `Warning:` and any other text are warnings.
    pub fn classify<S: AsRef<str>>(lines: &[S]) -> Self {
        let mut diagnostics = Self::default();
        for line in lines {
            let line = line.as_ref().trim();
            if line.is_empty() {
                continue;
            }
            if let Some(rest) = strip_marker(line, "Error") {
                diagnostics.errors.push(rest.to_string());
            } else if let Some(rest) = strip_marker(line, "Warning") {
                diagnostics.warnings.push(rest.to_string());
            } else {
                diagnostics.warnings.push(line.to_string());
            }
        }
        diagnostics
    }

    /// Fail with the first error, if any.
    pub fn into_result(self) -> Result<Vec<String>> {
        match self.errors.into_iter().next() {
            Some(err) => Err(ExifBatchError::Tool(err)),
            None => Ok(self.warnings),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.warnings.is_empty() && self.errors.is_empty()
    }
}

/// Strip `Marker:` (case-insensitive on the marker) and following whitespace.
fn strip_marker<'a>(line: &'a str, marker: &str) -> Option<&'a str> {
    let head = line.get(..marker.len())?;
    if !head.eq_ignore_ascii_case(marker) {
        return None;
    }
    line[marker.len()..].strip_prefix(':').map(str::trim_start)
}

/// A unit of work: the command to send and how to read its answer.
pub trait Task: Send + 'static {
    type Output: Send + 'static;

    /// Arguments for one command, without the execute directive.
    fn args(&self) -> Vec<String>;

    /// Turn the response into a typed result.
    fn parse(&self, response: Response) -> Result<Self::Output>;
}

/// Per-submission overrides.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SubmitOptions {
    /// Deadline for this request; `None` uses the pool default.
    pub timeout: Option<Duration>,
    /// Re-dispatch attempts after a worker exit or timeout; `None` uses the pool default.
    pub retries: Option<u32>,
}

impl SubmitOptions {
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_retries(mut self, retries: u32) -> Self {
        self.retries = Some(retries);
        self
    }
}

/// Type-erased task held by the pool and its workers.
pub(crate) trait Job: Send {
    fn args(&self) -> &[String];
    fn timeout(&self) -> Option<Duration>;
    /// Start of the current attempt; the timeout runs from here, queue wait included.
    fn submitted_at(&self) -> Instant;
    fn deadline(&self) -> Option<Instant> {
        self.timeout().map(|t| self.submitted_at() + t)
    }
    /// Consume one retry and restart the clock; false if none remain.
    fn take_retry(&mut self) -> bool;
    /// The caller stopped waiting.
    fn is_abandoned(&self) -> bool;
    fn complete(self: Box<Self>, response: Response);
    fn fail(self: Box<Self>, error: ExifBatchError);
}

/// Reply channel for a submitted task.
pub(crate) type Reply<T> = oneshot::Receiver<Result<T>>;

pub(crate) struct TaskJob<T: Task> {
    task: T,
    args: Vec<String>,
    timeout: Option<Duration>,
    submitted_at: Instant,
    retries_left: u32,
    reply: oneshot::Sender<Result<T::Output>>,
}

impl<T: Task> TaskJob<T> {
    pub(crate) fn new(task: T, timeout: Option<Duration>, retries: u32) -> (Self, Reply<T::Output>) {
        let (reply, rx) = oneshot::channel();
        let args = task.args();
        (
            Self {
                task,
                args,
                timeout,
                submitted_at: Instant::now(),
                retries_left: retries,
                reply,
            },
            rx,
        )
    }
}

impl<T: Task> Job for TaskJob<T> {
    fn args(&self) -> &[String] {
        &self.args
    }

    fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    fn submitted_at(&self) -> Instant {
        self.submitted_at
    }

    fn take_retry(&mut self) -> bool {
        if self.retries_left == 0 {
            return false;
        }
        self.retries_left -= 1;
        self.submitted_at = Instant::now();
        true
    }

    fn is_abandoned(&self) -> bool {
        self.reply.is_closed()
    }

    fn complete(self: Box<Self>, response: Response) {
        let raw = response.stdout.clone();
        // Parsers run on the supervisor task; a panic there must stay with this caller.
        let result = std::panic::catch_unwind(AssertUnwindSafe(|| self.task.parse(response)))
            .unwrap_or_else(|_| Err(ExifBatchError::parse("response parser panicked", raw)));
        let _ = self.reply.send(result);
    }

    fn fail(self: Box<Self>, error: ExifBatchError) {
        let _ = self.reply.send(Err(error));
    }
}

/// Health probe sent right after spawn; output is the tool version.
#[derive(Debug, Clone, Default)]
pub struct VersionTask {
    args: Vec<String>,
}

impl VersionTask {
    pub fn new(args: Vec<String>) -> Self {
        Self { args }
    }
}

impl Task for VersionTask {
    type Output = String;

    fn args(&self) -> Vec<String> {
        if self.args.is_empty() {
            vec!["-ver".to_string()]
        } else {
            self.args.clone()
        }
    }

    fn parse(&self, response: Response) -> Result<String> {
        parse_version(&response.stdout)
    }
}

/// Accept `NN.NN` (optionally followed by more text on the same line).
pub(crate) fn parse_version(stdout: &str) -> Result<String> {
    let line = stdout.trim();
    let token = line.split_whitespace().next().unwrap_or("");
    let mut parts = token.split('.');
    let valid = matches!(
        (parts.next(), parts.next()),
        (Some(major), Some(minor))
            if !major.is_empty()
                && !minor.is_empty()
                && major.bytes().all(|b| b.is_ascii_digit())
                && minor.bytes().all(|b| b.is_ascii_digit())
    );
    if valid {
        Ok(token.to_string())
    } else {
        Err(ExifBatchError::parse("expected a version number", stdout))
    }
}
