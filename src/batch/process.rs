//! Worker subprocess spawning and stream plumbing.
//!
//! Each worker process gets three background tasks: a stdin writer fed by a
//! channel, and stdout/stderr readers that forward chunks to the supervisor as
//! [`WorkerEvent`]s. A waiter task reaps the child and reports the exit after
//! both readers have drained, so the final output of a worker is always seen
//! before its exit.

use super::protocol::ToolProtocol;
use super::signals::{self, TerminationReason, analyze_exit_status};
use crate::error::{ExifBatchError, Result};
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWriteExt, BufReader};
use tokio::process::{ChildStdin, Command};
use tokio::sync::mpsc;
use tracing::{debug, trace, warn};

/// How long the waiter gives the readers to reach EOF after the child exits.
const READER_DRAIN_TIMEOUT: Duration = Duration::from_secs(1);

/// Default buffer size for stdout/stderr readers (64KB).
const READ_BUFFER_SIZE: usize = 64 * 1024;

/// Something that happened on a worker's process boundary.
#[derive(Debug)]
pub(crate) enum WorkerEvent {
    Stdout { worker_id: u64, chunk: String },
    Stderr { worker_id: u64, chunk: String },
    Exited { worker_id: u64, reason: TerminationReason },
}

/// Handle to a spawned worker process.
///
/// Owned by its `WorkerHandle`; dropping the input sender half-closes stdin.
#[derive(Debug)]
pub(crate) struct WorkerProcess {
    pid: u32,
    input: Option<mpsc::UnboundedSender<String>>,
    exited: bool,
}

impl WorkerProcess {
    /// Spawn a worker in batch mode and start its stream tasks.
    pub(crate) fn spawn(
        worker_id: u64,
        protocol: &ToolProtocol,
        events: mpsc::UnboundedSender<WorkerEvent>,
    ) -> Result<Self> {
        let mut cmd = Command::new(&protocol.program);
        cmd.args(&protocol.launch_args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = cmd.spawn().map_err(|e| {
            ExifBatchError::SpawnFailed(format!(
                "could not start {}: {}",
                protocol.program.display(),
                e
            ))
        })?;

        let pid = child
            .id()
            .ok_or_else(|| ExifBatchError::SpawnFailed("child exited before start".into()))?;
        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| ExifBatchError::SpawnFailed("child stdin not captured".into()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| ExifBatchError::SpawnFailed("child stdout not captured".into()))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| ExifBatchError::SpawnFailed("child stderr not captured".into()))?;

        let (input_tx, input_rx) = mpsc::unbounded_channel();
        tokio::spawn(write_loop(worker_id, stdin, input_rx));

        let stdout_task = tokio::spawn(read_loop(worker_id, stdout, events.clone(), Stream::Stdout));
        let stderr_task = tokio::spawn(read_loop(worker_id, stderr, events.clone(), Stream::Stderr));

        tokio::spawn(async move {
            let reason = match child.wait().await {
                Ok(status) => analyze_exit_status(status),
                Err(e) => {
                    warn!(worker_id, error = %e, "Failed to wait for worker");
                    TerminationReason::Unknown
                }
            };
            let drain = async {
                let _ = stdout_task.await;
                let _ = stderr_task.await;
            };
            if tokio::time::timeout(READER_DRAIN_TIMEOUT, drain).await.is_err() {
                debug!(worker_id, "Worker streams still open after exit");
            }
            let _ = events.send(WorkerEvent::Exited { worker_id, reason });
        });

        debug!(worker_id, pid, program = %protocol.program.display(), "Spawned worker");

        Ok(Self {
            pid,
            input: Some(input_tx),
            exited: false,
        })
    }

    pub(crate) fn pid(&self) -> u32 {
        self.pid
    }

    /// Queue bytes for the worker's stdin. Never blocks.
    pub(crate) fn write(&self, data: String) -> Result<()> {
        let input = self
            .input
            .as_ref()
            .ok_or_else(|| ExifBatchError::Io(std::io::Error::other("worker stdin closed")))?;
        input
            .send(data)
            .map_err(|_| ExifBatchError::Io(std::io::Error::other("worker stdin writer gone")))
    }

    /// Half-close stdin once queued writes are flushed.
    pub(crate) fn close_input(&mut self) {
        self.input = None;
    }

    /// Record that the waiter has reaped the process; signals are no longer sent.
    pub(crate) fn mark_exited(&mut self) {
        self.exited = true;
        self.input = None;
    }

    pub(crate) fn terminate(&self) {
        if !self.exited
            && let Err(e) = signals::terminate(self.pid)
        {
            trace!(pid = self.pid, error = %e, "SIGTERM failed");
        }
    }

    pub(crate) fn kill(&self) {
        if !self.exited
            && let Err(e) = signals::kill(self.pid)
        {
            trace!(pid = self.pid, error = %e, "SIGKILL failed");
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum Stream {
    Stdout,
    Stderr,
}

async fn write_loop(worker_id: u64, mut stdin: ChildStdin, mut rx: mpsc::UnboundedReceiver<String>) {
    while let Some(data) = rx.recv().await {
        trace!(worker_id, bytes = data.len(), "Writing to worker stdin");
        let result = async {
            stdin.write_all(data.as_bytes()).await?;
            stdin.flush().await
        }
        .await;
        if let Err(e) = result {
            debug!(worker_id, error = %e, "Worker stdin write failed");
            return;
        }
    }
    let _ = stdin.shutdown().await;
}

/// Forward a stream line by line. Splitting on `\n` keeps UTF-8 sequences whole.
async fn read_loop<R>(
    worker_id: u64,
    stream: R,
    events: mpsc::UnboundedSender<WorkerEvent>,
    kind: Stream,
) where
    R: AsyncRead + Unpin,
{
    let mut reader = BufReader::with_capacity(READ_BUFFER_SIZE, stream);
    let mut line = Vec::with_capacity(4096);
    loop {
        line.clear();
        match reader.read_until(b'\n', &mut line).await {
            Ok(0) => return,
            Ok(_) => {
                let chunk = String::from_utf8_lossy(&line).into_owned();
                let event = match kind {
                    Stream::Stdout => WorkerEvent::Stdout { worker_id, chunk },
                    Stream::Stderr => WorkerEvent::Stderr { worker_id, chunk },
                };
                if events.send(event).is_err() {
                    return;
                }
            }
            Err(e) => {
                debug!(worker_id, stream = ?kind, error = %e, "Worker stream read failed");
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cat_protocol() -> ToolProtocol {
        ToolProtocol {
            program: "cat".into(),
            launch_args: Vec::new(),
            ..ToolProtocol::exiftool("cat")
        }
    }

    #[tokio::test]
    async fn test_spawn_echoes_through_stdout() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut proc = WorkerProcess::spawn(1, &cat_protocol(), tx).expect("spawn cat");
        assert!(proc.pid() > 0);

        proc.write("hello\n".to_string()).unwrap();
        match rx.recv().await {
            Some(WorkerEvent::Stdout { worker_id, chunk }) => {
                assert_eq!(worker_id, 1);
                assert_eq!(chunk, "hello\n");
            }
            other => panic!("unexpected event: {:?}", other),
        }

        proc.close_input();
        match rx.recv().await {
            Some(WorkerEvent::Exited { reason, .. }) => assert!(reason.is_success()),
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_spawn_missing_program() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let protocol = ToolProtocol::exiftool("/nonexistent/exiftool-binary");
        let err = WorkerProcess::spawn(1, &protocol, tx).unwrap_err();
        assert!(matches!(err, ExifBatchError::SpawnFailed(_)));
    }

    #[tokio::test]
    async fn test_kill_reports_exit() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let proc = WorkerProcess::spawn(2, &cat_protocol(), tx).expect("spawn cat");
        proc.kill();
        match rx.recv().await {
            Some(WorkerEvent::Exited { worker_id, reason }) => {
                assert_eq!(worker_id, 2);
                assert_eq!(reason, TerminationReason::Killed);
            }
            other => panic!("unexpected event: {:?}", other),
        }
    }
}
