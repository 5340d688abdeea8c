//! exifbatch - batch metadata access through stay-open exiftool processes

mod cli;
mod output;
mod theme;

use anyhow::{Context, Result, bail};
use clap::Parser;
use exifbatch::ExifTool;
use exifbatch::exif::ReadOptions;
use exifbatch::logging::{self, LogConfig};
use owo_colors::{OwoColorize, Stream::Stderr};
use tracing::Level;

use cli::{Cli, Commands, ReadArgs, WriteArgs};
use theme::Themed;

/// Program entry point: parses CLI arguments, dispatches the selected command,
/// and prints the error chain before exiting with status 1 on failure.
fn main() {
    let cli = Cli::parse();

    if cli.no_color {
        theme::disable_colors();
    }

    let mut log = LogConfig::from_verbosity(cli.verbose);
    if cli.quiet {
        log = log.with_level(Level::ERROR);
    }
    logging::init(log.with_format(cli.log_format.into()).with_env_overrides());

    let result = match &cli.command {
        Commands::Completions(args) => {
            args.generate();
            Ok(())
        }
        _ => run(&cli),
    };

    if let Err(e) = result {
        eprintln!(
            "{}: {}",
            "error"
                .if_supports_color(Stderr, |text| text.red())
                .if_supports_color(Stderr, |text| text.bold()),
            e
        );
        for cause in e.chain().skip(1) {
            eprintln!(
                "  {}: {}",
                "caused by".if_supports_color(Stderr, |text| text.yellow()),
                cause
            );
        }
        std::process::exit(1);
    }
}

/// Run a command that needs exiftool. The pool is always ended before returning.
fn run(cli: &Cli) -> Result<()> {
    let rt = tokio::runtime::Runtime::new().context("Failed to create Tokio runtime")?;
    rt.block_on(async {
        let exiftool = ExifTool::new(cli.protocol(), cli.pool_config(), cli.tz_config());
        let result = match &cli.command {
            Commands::Read(args) => cmd_read(&exiftool, args).await,
            Commands::Write(args) => cmd_write(&exiftool, args).await,
            Commands::Version => cmd_version(&exiftool).await,
            Commands::Completions(_) => Ok(()),
        };
        if let Ok(stats) = exiftool.stats().await {
            tracing::debug!(
                tasks_completed = stats.tasks_completed,
                spawn_failures = stats.spawn_failures,
                timeouts = stats.timeouts,
                retired = stats.retired,
                "Pool finished"
            );
        }
        exiftool.end().await;
        result
    })
}

/// Read every file concurrently, print the successes in argument order and
/// report each failure on stderr.
async fn cmd_read(exiftool: &ExifTool, args: &ReadArgs) -> Result<()> {
    let options = ReadOptions {
        include_file_tags: !args.no_file_tags,
        numeric: args.numeric,
        ..ReadOptions::default()
    };

    let handles: Vec<_> = args
        .files
        .iter()
        .map(|path| {
            let exiftool = exiftool.clone();
            let options = options.clone();
            let path = path.clone();
            tokio::spawn(async move { exiftool.read_with(&path, options).await })
        })
        .collect();

    let mut results = Vec::with_capacity(handles.len());
    let mut failed = 0;
    for (path, handle) in args.files.iter().zip(handles) {
        match handle.await.context("read task panicked")? {
            Ok(metadata) => results.push(metadata),
            Err(e) => {
                failed += 1;
                eprintln!("{} {}: {}", "error:".error_style(), path.display(), e);
            }
        }
    }

    output::print_metadata(&results, args.format.into())?;

    if failed > 0 {
        bail!("{} of {} files could not be read", failed, args.files.len());
    }
    Ok(())
}

async fn cmd_write(exiftool: &ExifTool, args: &WriteArgs) -> Result<()> {
    let summary = exiftool
        .write(&args.file, &args.tags)
        .await
        .with_context(|| format!("Failed to write {}", args.file.display()))?;
    output::print_write_summary(&args.file, &summary, args.format.into())
}

async fn cmd_version(exiftool: &ExifTool) -> Result<()> {
    let version = exiftool
        .version()
        .await
        .context("Failed to query the exiftool version")?;
    println!("{}", version);
    Ok(())
}
