//! Command-line interface definitions using clap.

use crate::output::OutputFormat;
use clap::{CommandFactory, Parser, Subcommand, ValueEnum};
use clap_complete::Shell;
use exifbatch::batch::{PoolConfig, ToolProtocol};
use exifbatch::logging::LogFormat;
use exifbatch::paths;
use exifbatch::tz::TzConfig;
use std::path::PathBuf;
use std::time::Duration;

/// Read and write image metadata through a pool of stay-open exiftool processes.
#[derive(Parser, Debug)]
#[command(name = "exifbatch")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Path to the exiftool executable.
    #[arg(long, env = paths::EXIFTOOL_ENV, default_value_os_t = paths::exiftool_path(), global = true)]
    pub exiftool: PathBuf,

    /// Maximum number of concurrent exiftool processes.
    #[arg(long, default_value_t = PoolConfig::default().max_procs, global = true)]
    pub max_procs: usize,

    /// Recycle each process after this many tasks.
    #[arg(long, default_value_t = PoolConfig::default().max_tasks_per_process, global = true)]
    pub max_tasks: u64,

    /// Per-file timeout in seconds (0 disables it).
    #[arg(long, default_value_t = 20, global = true)]
    pub timeout: u64,

    /// Accept historical UTC offsets such as -10:30 or +0:20.
    #[arg(long, global = true)]
    pub allow_archaic_offsets: bool,

    /// Do not infer the timezone from differing timestamps.
    #[arg(long, global = true)]
    pub no_datestamp_inference: bool,

    /// Largest GPS clock mismatch, in minutes, that still yields a timezone.
    #[arg(long, default_value_t = TzConfig::default().gps_tolerance_minutes, global = true)]
    pub gps_tolerance: u32,

    /// Enable verbose logging (-v info, -vv debug, -vvv trace).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress everything except results and errors.
    #[arg(short, long, conflicts_with = "verbose", global = true)]
    pub quiet: bool,

    /// Log output format.
    #[arg(long, value_enum, default_value_t = LogFormatArg::Pretty, global = true)]
    pub log_format: LogFormatArg,

    /// Disable colored output.
    #[arg(long, env = "NO_COLOR", global = true)]
    pub no_color: bool,

    #[command(subcommand)]
    pub command: Commands,
}

/// Available subcommands.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Print the metadata of one or more files.
    Read(ReadArgs),

    /// Write tags to a file in place.
    Write(WriteArgs),

    /// Print the exiftool version.
    Version,

    /// Generate shell completions.
    Completions(CompletionsArgs),
}

/// Arguments for shell completions.
#[derive(Parser, Debug)]
pub struct CompletionsArgs {
    /// Shell to generate completions for.
    #[arg(value_enum)]
    pub shell: Shell,
}

impl CompletionsArgs {
    /// Generate and print completions to stdout.
    pub fn generate(&self) {
        clap_complete::generate(
            self.shell,
            &mut Cli::command(),
            "exifbatch",
            &mut std::io::stdout(),
        );
    }
}

#[derive(Parser, Debug)]
pub struct ReadArgs {
    /// Files to read.
    #[arg(required = true)]
    pub files: Vec<PathBuf>,

    /// Output format.
    #[arg(short, long, value_enum, default_value_t = OutputFormatArg::Plain)]
    pub format: OutputFormatArg,

    /// Leave out filesystem tags such as FileSize and Directory.
    #[arg(long)]
    pub no_file_tags: bool,

    /// Print raw numeric values instead of converted ones.
    #[arg(short = 'n', long)]
    pub numeric: bool,
}

#[derive(Parser, Debug)]
pub struct WriteArgs {
    /// File to modify.
    pub file: PathBuf,

    /// Tag assignment; an empty value deletes the tag.
    #[arg(short, long = "tag", value_name = "TAG=VALUE", required = true, value_parser = parse_assignment)]
    pub tags: Vec<(String, String)>,

    /// Output format.
    #[arg(short, long, value_enum, default_value_t = OutputFormatArg::Plain)]
    pub format: OutputFormatArg,
}

fn parse_assignment(s: &str) -> Result<(String, String), String> {
    match s.split_once('=') {
        Some((tag, value)) if !tag.trim().is_empty() => {
            Ok((tag.trim().to_string(), value.to_string()))
        }
        _ => Err(format!("expected TAG=VALUE, got '{}'", s)),
    }
}

#[derive(ValueEnum, Clone, Copy, Debug, Default)]
pub enum OutputFormatArg {
    #[default]
    Plain,
    Json,
}

impl From<OutputFormatArg> for OutputFormat {
    fn from(arg: OutputFormatArg) -> Self {
        match arg {
            OutputFormatArg::Plain => OutputFormat::Plain,
            OutputFormatArg::Json => OutputFormat::Json,
        }
    }
}

#[derive(ValueEnum, Clone, Copy, Debug, Default)]
pub enum LogFormatArg {
    #[default]
    Pretty,
    Compact,
    Json,
}

impl From<LogFormatArg> for LogFormat {
    fn from(arg: LogFormatArg) -> Self {
        match arg {
            LogFormatArg::Pretty => LogFormat::Pretty,
            LogFormatArg::Compact => LogFormat::Compact,
            LogFormatArg::Json => LogFormat::Json,
        }
    }
}

impl Cli {
    pub fn protocol(&self) -> ToolProtocol {
        ToolProtocol::exiftool(paths::expand_tilde(&self.exiftool))
    }

    pub fn pool_config(&self) -> PoolConfig {
        let timeout = (self.timeout > 0).then(|| Duration::from_secs(self.timeout));
        PoolConfig::default()
            .with_max_procs(self.max_procs)
            .with_max_tasks_per_process(self.max_tasks)
            .with_task_timeout(timeout)
    }

    pub fn tz_config(&self) -> TzConfig {
        TzConfig {
            gps_tolerance_minutes: self.gps_tolerance,
            infer_from_datestamps: !self.no_datestamp_inference,
            allow_archaic_offsets: self.allow_archaic_offsets,
        }
    }
}
