//! Exit analysis and signal delivery for worker processes.

use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;
use std::os::unix::process::ExitStatusExt;
use std::process::ExitStatus;

/// Reason why a worker process terminated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TerminationReason {
    /// Normal exit with status code.
    Exited(i32),
    /// Killed by SIGKILL (our escalation, or the OOM killer).
    Killed,
    /// Killed by another signal.
    Signaled(Signal),
    /// The exit status could not be collected.
    Unknown,
}

impl TerminationReason {
    /// Check if this is a successful exit.
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Exited(0))
    }

    /// Get a human-readable description.
    pub fn description(&self) -> String {
        match self {
            Self::Exited(code) => format!("exited with code {}", code),
            Self::Killed => "killed (SIGKILL)".to_string(),
            Self::Signaled(sig) => format!("killed by signal {:?}", sig),
            Self::Unknown => "unknown reason".to_string(),
        }
    }
}

impl std::fmt::Display for TerminationReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.description())
    }
}

/// Analyze an `ExitStatus` to determine the termination reason.
pub fn analyze_exit_status(status: ExitStatus) -> TerminationReason {
    if let Some(code) = status.code() {
        return TerminationReason::Exited(code);
    }
    match status.signal().map(Signal::try_from) {
        Some(Ok(Signal::SIGKILL)) => TerminationReason::Killed,
        Some(Ok(sig)) => TerminationReason::Signaled(sig),
        _ => TerminationReason::Unknown,
    }
}

/// Send SIGTERM to a process. Errors (e.g. already gone) are returned, not logged.
pub fn terminate(pid: u32) -> nix::Result<()> {
    signal::kill(Pid::from_raw(pid as i32), Signal::SIGTERM)
}

/// Send SIGKILL to a process.
pub fn kill(pid: u32) -> nix::Result<()> {
    signal::kill(Pid::from_raw(pid as i32), Signal::SIGKILL)
}
