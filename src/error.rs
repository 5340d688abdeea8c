//! Error types for exifbatch.

use std::time::Duration;
use thiserror::Error;

/// Main error type for exifbatch.
#[derive(Error, Debug)]
pub enum ExifBatchError {
    /// A worker could not be started, or failed its version probe.
    #[error("Failed to spawn exiftool worker: {0}")]
    SpawnFailed(String),

    /// A single request exceeded its deadline. The worker is left running.
    #[error("Task timed out after {}ms", .0.as_millis())]
    Timeout(Duration),

    /// The response did not have the shape the task expected.
    #[error("Failed to parse exiftool output: {message}")]
    Parse { message: String, raw: String },

    /// A sentinel arrived with no pending request to match it.
    #[error("Worker {worker_id} emitted a response with no pending request")]
    Correlation { worker_id: u64 },

    /// The worker process exited while the request was pending.
    #[error("Worker {worker_id} exited ({reason})")]
    WorkerExited { worker_id: u64, reason: String },

    /// The pool was told to end before this submission.
    #[error("Pool has ended; no new tasks are accepted")]
    PoolEnded,

    /// The tool reported an `Error:` marker for this operation.
    #[error("exiftool error: {0}")]
    Tool(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl ExifBatchError {
    /// Build a parse failure that keeps the raw response for diagnosis.
    pub fn parse(message: impl Into<String>, raw: impl Into<String>) -> Self {
        Self::Parse {
            message: message.into(),
            raw: raw.into(),
        }
    }

    /// Whether the supervisor may re-dispatch the task after this failure.
    ///
    /// Only transient, worker-side failures qualify. Parse and tool errors
    /// would fail the same way on any worker.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::WorkerExited { .. } | Self::Timeout(_))
    }

    /// Whether this failure concerns one request only.
    ///
    /// Everything except `PoolEnded` is local; the pool never ends itself.
    pub fn is_request_local(&self) -> bool {
        !matches!(self, Self::PoolEnded)
    }

    /// Raw response text carried by a parse failure.
    pub fn raw_output(&self) -> Option<&str> {
        match self {
            Self::Parse { raw, .. } => Some(raw),
            _ => None,
        }
    }
}

/// Result type alias for exifbatch operations.
pub type Result<T> = std::result::Result<T, ExifBatchError>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;

    #[test]
    fn test_timeout_error_message() {
        let err = ExifBatchError::Timeout(Duration::from_millis(1500));
        let msg = err.to_string();
        assert!(msg.contains("1500ms"));
        assert!(msg.contains("timed out"));
    }

    #[test]
    fn test_parse_error_keeps_raw_output() {
        let err = ExifBatchError::parse("expected JSON array", "garbage{");
        assert!(err.to_string().contains("expected JSON array"));
        assert_eq!(err.raw_output(), Some("garbage{"));
        assert!(ExifBatchError::PoolEnded.raw_output().is_none());
    }

    #[test]
    fn test_worker_exited_error_message() {
        let err = ExifBatchError::WorkerExited {
            worker_id: 7,
            reason: "exited with code 1".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("Worker 7"));
        assert!(msg.contains("code 1"));
    }

    #[test]
    fn test_retryable_classification() {
        assert!(ExifBatchError::Timeout(Duration::from_secs(1)).is_retryable());
        assert!(
            ExifBatchError::WorkerExited {
                worker_id: 1,
                reason: "killed".into()
            }
            .is_retryable()
        );
        assert!(!ExifBatchError::PoolEnded.is_retryable());
        assert!(!ExifBatchError::Tool("File not found".into()).is_retryable());
        assert!(!ExifBatchError::parse("bad", "").is_retryable());
        assert!(!ExifBatchError::Correlation { worker_id: 2 }.is_retryable());
    }

    #[test]
    fn test_only_pool_ended_is_not_request_local() {
        assert!(!ExifBatchError::PoolEnded.is_request_local());
        assert!(ExifBatchError::Timeout(Duration::from_secs(1)).is_request_local());
        assert!(ExifBatchError::SpawnFailed("probe".into()).is_request_local());
    }

    #[test]
    fn test_io_error_conversion() {
        let io_err = io::Error::new(io::ErrorKind::NotFound, "exiftool not found");
        let err: ExifBatchError = io_err.into();
        assert!(err.to_string().contains("exiftool not found"));
    }

    #[test]
    fn test_json_error_conversion() {
        let json_err = serde_json::from_str::<serde_json::Value>("{ nope").unwrap_err();
        let err: ExifBatchError = json_err.into();
        assert!(err.to_string().contains("JSON"));
    }
}
