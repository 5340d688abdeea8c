//! Plain text output: one block of aligned `Tag: value` lines per file.

use crate::theme::Themed;
use exifbatch::exif::{Metadata, WriteSummary};
use std::fmt::Write;
use std::path::Path;

/// Column width for tag names, as in exiftool's own listing.
const NAME_WIDTH: usize = 32;

pub fn render_metadata(results: &[Metadata]) -> String {
    let mut out = String::new();
    for (i, metadata) in results.iter().enumerate() {
        if i > 0 {
            out.push('\n');
        }
        render_one(&mut out, metadata);
    }
    out
}

fn render_one(out: &mut String, metadata: &Metadata) {
    let _ = writeln!(out, "{}", format!("======== {}", metadata.source_file).file_header());
    for (name, value) in &metadata.tags {
        let _ = writeln!(
            out,
            "{} : {}",
            format!("{:<NAME_WIDTH$}", name).tag_name(),
            value
        );
    }
    if let Some(ref tz) = metadata.tz {
        let _ = writeln!(
            out,
            "{} : {} {}",
            format!("{:<NAME_WIDTH$}", "Timezone").tag_name(),
            tz.timezone(),
            format!("(from {})", metadata.tz_source).muted()
        );
    }
    for warning in &metadata.warnings {
        let _ = writeln!(out, "{} {}", "warning:".warning(), warning);
    }
    for error in &metadata.errors {
        let _ = writeln!(out, "{} {}", "error:".error_style(), error);
    }
}

pub fn render_write_summary(path: &Path, summary: &WriteSummary) -> String {
    let mut out = String::new();
    let verb = if summary.updated > 0 { "updated" } else { "unchanged" };
    let _ = writeln!(out, "{}: {}", path.display(), verb);
    for warning in &summary.warnings {
        let _ = writeln!(out, "{} {}", "warning:".warning(), warning);
    }
    out
}
