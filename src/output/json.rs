//! JSON output.

use exifbatch::exif::{Metadata, WriteSummary};
use serde::Serialize;
use std::path::Path;

/// Pretty JSON array, one object per file, in the shape exiftool's `-json` uses.
pub fn render_metadata(results: &[Metadata]) -> serde_json::Result<String> {
    serde_json::to_string_pretty(results)
}

#[derive(Serialize)]
struct WriteReport<'a> {
    #[serde(rename = "SourceFile")]
    source_file: std::borrow::Cow<'a, str>,
    #[serde(flatten)]
    summary: &'a WriteSummary,
}

pub fn render_write_summary(path: &Path, summary: &WriteSummary) -> serde_json::Result<String> {
    serde_json::to_string_pretty(&WriteReport {
        source_file: path.to_string_lossy(),
        summary,
    })
}
