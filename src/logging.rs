//! Logging setup for the exifbatch library and CLI.
//!
//! The library only emits `tracing` events; installing a subscriber is up to
//! the application. The CLI calls [`init`] once at startup.
//!
//! # Environment Variables
//!
//! - `EXIFBATCH_LOG` - Log filter (overrides RUST_LOG)
//! - `EXIFBATCH_LOG_LEVEL` - Log level: error, warn, info, debug, trace
//! - `EXIFBATCH_LOG_FORMAT` - Output format: pretty, compact, json
//! - `EXIFBATCH_LOG_FILE` - Path to log file (in addition to stderr)
//! - `RUST_LOG` - Standard Rust log filter (fallback)
//!
//! # Example
//!
//! ```no_run
//! use exifbatch::logging::{LogConfig, init};
//!
//! init(LogConfig::from_verbosity(1).with_env_overrides());
//! ```

use std::io::IsTerminal;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use tracing::{Level, Subscriber};
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{
    EnvFilter, Layer,
    fmt::{self, MakeWriter, format::FmtSpan},
    layer::SubscriberExt,
    registry::LookupSpan,
    util::SubscriberInitExt,
};

pub const LOG_ENV: &str = "EXIFBATCH_LOG";
pub const LOG_LEVEL_ENV: &str = "EXIFBATCH_LOG_LEVEL";
pub const LOG_FORMAT_ENV: &str = "EXIFBATCH_LOG_FORMAT";
pub const LOG_FILE_ENV: &str = "EXIFBATCH_LOG_FILE";

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LogFormat {
    /// Human-readable multi-field format
    #[default]
    Pretty,
    /// Compact single-line format
    Compact,
    /// JSON lines for log aggregation
    Json,
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pretty" | "full" => Ok(Self::Pretty),
            "compact" => Ok(Self::Compact),
            "json" => Ok(Self::Json),
            _ => Err(format!(
                "Unknown log format: '{}'. Valid options: pretty, compact, json",
                s
            )),
        }
    }
}

impl std::fmt::Display for LogFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pretty => write!(f, "pretty"),
            Self::Compact => write!(f, "compact"),
            Self::Json => write!(f, "json"),
        }
    }
}

/// Rotation of the log file.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LogRotation {
    Hourly,
    Daily,
    /// Single file, appended to (default)
    #[default]
    Never,
}

impl FromStr for LogRotation {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "hourly" => Ok(Self::Hourly),
            "daily" => Ok(Self::Daily),
            "never" => Ok(Self::Never),
            _ => Err(format!(
                "Unknown log rotation: '{}'. Valid options: hourly, daily, never",
                s
            )),
        }
    }
}

impl From<LogRotation> for Rotation {
    fn from(rotation: LogRotation) -> Self {
        match rotation {
            LogRotation::Hourly => Rotation::HOURLY,
            LogRotation::Daily => Rotation::DAILY,
            LogRotation::Never => Rotation::NEVER,
        }
    }
}

/// Logging configuration.
///
/// Use the builder methods to customize, then pass to [`init`].
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Base log level (default: WARN, so batch output stays clean)
    pub level: Level,
    pub format: LogFormat,
    /// Additional log file (None = stderr only)
    pub file_path: Option<PathBuf>,
    pub rotation: LogRotation,
    /// Log span timing on close
    pub span_events: bool,
    /// Custom filter string (overrides level if set)
    pub filter: Option<String>,
    pub show_target: bool,
    pub show_thread_ids: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: Level::WARN,
            format: LogFormat::Pretty,
            file_path: None,
            rotation: LogRotation::Never,
            span_events: false,
            filter: None,
            show_target: true,
            show_thread_ids: false,
        }
    }
}

impl LogConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Level from a `-v` count: none is WARN, `-v` INFO, `-vv` DEBUG, more TRACE.
    pub fn from_verbosity(verbose: u8) -> Self {
        let level = match verbose {
            0 => Level::WARN,
            1 => Level::INFO,
            2 => Level::DEBUG,
            _ => Level::TRACE,
        };
        let mut config = Self::default().with_level(level);
        // Worker lifecycles are easiest to follow with span timing.
        config.span_events = verbose >= 3;
        config
    }

    pub fn with_level(mut self, level: Level) -> Self {
        self.level = level;
        self
    }

    pub fn with_format(mut self, format: LogFormat) -> Self {
        self.format = format;
        self
    }

    pub fn with_file(mut self, path: PathBuf) -> Self {
        self.file_path = Some(path);
        self
    }

    pub fn with_rotation(mut self, rotation: LogRotation) -> Self {
        self.rotation = rotation;
        self
    }

    pub fn with_span_events(mut self, enabled: bool) -> Self {
        self.span_events = enabled;
        self
    }

    pub fn with_filter(mut self, filter: String) -> Self {
        self.filter = Some(filter);
        self
    }

    /// Apply environment variable overrides.
    ///
    /// `EXIFBATCH_LOG` (or `RUST_LOG`) sets the filter unless one was given
    /// explicitly. `EXIFBATCH_LOG_LEVEL` only applies while no filter is set.
    pub fn with_env_overrides(self) -> Self {
        self.with_overrides_from(|key| std::env::var(key).ok())
    }

    fn with_overrides_from(mut self, var: impl Fn(&str) -> Option<String>) -> Self {
        if self.filter.is_none() {
            self.filter = var(LOG_ENV).or_else(|| var("RUST_LOG"));
        }

        if self.filter.is_none()
            && let Some(level) = var(LOG_LEVEL_ENV).as_deref().and_then(parse_level)
        {
            self.level = level;
        }

        if let Some(format) = var(LOG_FORMAT_ENV)
            && let Ok(f) = format.parse()
        {
            self.format = f;
        }

        if let Some(path) = var(LOG_FILE_ENV).filter(|p| !p.trim().is_empty()) {
            self.file_path = Some(PathBuf::from(path));
        }

        self
    }

    fn build_filter(&self) -> EnvFilter {
        let fallback = || EnvFilter::new(self.level.to_string().to_lowercase());
        match self.filter {
            Some(ref filter) => EnvFilter::try_new(filter).unwrap_or_else(|_| {
                eprintln!("Warning: Invalid log filter '{}', using default", filter);
                fallback()
            }),
            None => fallback(),
        }
    }

    fn span_events(&self) -> FmtSpan {
        if self.span_events {
            FmtSpan::CLOSE
        } else {
            FmtSpan::NONE
        }
    }

    /// One formatting layer for the configured format and the given writer.
    fn layer<S, W>(&self, writer: W, ansi: bool) -> Box<dyn Layer<S> + Send + Sync>
    where
        S: Subscriber + for<'a> LookupSpan<'a>,
        W: for<'w> MakeWriter<'w> + Send + Sync + 'static,
    {
        let base = fmt::layer()
            .with_span_events(self.span_events())
            .with_target(self.show_target)
            .with_thread_ids(self.show_thread_ids)
            .with_ansi(ansi)
            .with_writer(writer);
        match self.format {
            LogFormat::Json => base.json().boxed(),
            LogFormat::Compact => base.compact().boxed(),
            LogFormat::Pretty => base.boxed(),
        }
    }
}

fn parse_level(s: &str) -> Option<Level> {
    match s.to_lowercase().as_str() {
        "error" => Some(Level::ERROR),
        "warn" | "warning" => Some(Level::WARN),
        "info" => Some(Level::INFO),
        "debug" => Some(Level::DEBUG),
        "trace" => Some(Level::TRACE),
        _ => None,
    }
}

fn file_appender(path: &Path, rotation: LogRotation) -> RollingFileAppender {
    let parent = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    let file_name = path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("exifbatch.log");
    RollingFileAppender::new(rotation.into(), parent, file_name)
}

/// Initialize the global tracing subscriber.
///
/// Logs go to stderr, and also to `config.file_path` when set. Subsequent
/// calls are silently ignored.
pub fn init(config: LogConfig) {
    let filter = config.build_filter();
    let stderr = config.layer(std::io::stderr, std::io::stderr().is_terminal());
    let file = config
        .file_path
        .as_deref()
        .map(|path| config.layer(file_appender(path, config.rotation), false));

    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(stderr)
        .with(file)
        .try_init();
}
