//! Output formatting for command results.

pub mod json;
pub mod plain;

use exifbatch::exif::{Metadata, WriteSummary};
use std::path::Path;

/// Output format options.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum OutputFormat {
    /// Aligned `Tag: value` lines per file (default).
    #[default]
    Plain,
    /// One JSON array with an object per file.
    Json,
}

/// Format and print read results.
pub fn print_metadata(results: &[Metadata], format: OutputFormat) -> anyhow::Result<()> {
    match format {
        OutputFormat::Plain => print!("{}", plain::render_metadata(results)),
        OutputFormat::Json => println!("{}", json::render_metadata(results)?),
    }
    Ok(())
}

/// Format and print the outcome of a write.
pub fn print_write_summary(
    path: &Path,
    summary: &WriteSummary,
    format: OutputFormat,
) -> anyhow::Result<()> {
    match format {
        OutputFormat::Plain => print!("{}", plain::render_write_summary(path, summary)),
        OutputFormat::Json => println!("{}", json::render_write_summary(path, summary)?),
    }
    Ok(())
}
