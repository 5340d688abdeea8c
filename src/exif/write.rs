//! Tasks that change files: writing tags, extracting binaries, rewriting metadata.

use super::args::{extract_binary_args, rewrite_all_tags_args, write_args};
use crate::batch::{Response, Task};
use crate::error::{ExifBatchError, Result};
use serde::Serialize;
use std::path::Path;

/// Counts from exiftool's closing summary lines (`    1 image files updated`).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct WriteSummary {
    pub updated: u32,
    pub unchanged: u32,
    pub created: u32,
    pub failed: u32,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
}

impl WriteSummary {
    pub fn parse(stdout: &str) -> Self {
        let mut summary = Self::default();
        for line in stdout.lines() {
            let line = line.trim();
            let Some((count, phrase)) = line.split_once(' ') else {
                continue;
            };
            let Ok(count) = count.parse::<u32>() else {
                continue;
            };
            if phrase.contains("weren't") || phrase.contains("failed") {
                summary.failed += count;
            } else if phrase.ends_with("updated") {
                summary.updated += count;
            } else if phrase.ends_with("unchanged") {
                summary.unchanged += count;
            } else if phrase.ends_with("created") {
                summary.created += count;
            }
        }
        summary
    }
}

/// Fail unless the summary shows `ok` and nothing failed.
fn check(response: &Response, ok: impl Fn(&WriteSummary) -> bool) -> Result<WriteSummary> {
    let warnings = response.diagnostics().into_result()?;
    let mut summary = WriteSummary::parse(&response.stdout);
    if summary.failed > 0 || !ok(&summary) {
        let stdout = response.stdout.trim();
        let message = if stdout.is_empty() {
            "no files were changed".to_string()
        } else {
            stdout.to_string()
        };
        return Err(ExifBatchError::Tool(message));
    }
    summary.warnings = warnings;
    Ok(summary)
}

/// Assign tags in place. An empty value deletes the tag.
#[derive(Debug, Clone)]
pub struct WriteTask {
    args: Vec<String>,
}

impl WriteTask {
    pub fn new(path: impl AsRef<Path>, tags: &[(String, String)], overwrite_original: bool) -> Result<Self> {
        Ok(Self {
            args: write_args(path.as_ref(), tags, overwrite_original)?,
        })
    }
}

impl Task for WriteTask {
    type Output = WriteSummary;

    fn args(&self) -> Vec<String> {
        self.args.clone()
    }

    fn parse(&self, response: Response) -> Result<WriteSummary> {
        check(&response, |s| s.updated + s.unchanged > 0)
    }
}

/// Save one binary tag (thumbnail, preview) to a file.
#[derive(Debug, Clone)]
pub struct ExtractBinaryTask {
    args: Vec<String>,
}

impl ExtractBinaryTask {
    pub fn new(path: impl AsRef<Path>, tag: &str, dest: impl AsRef<Path>) -> Result<Self> {
        Ok(Self {
            args: extract_binary_args(path.as_ref(), tag, dest.as_ref())?,
        })
    }
}

impl Task for ExtractBinaryTask {
    type Output = ();

    fn args(&self) -> Vec<String> {
        self.args.clone()
    }

    fn parse(&self, response: Response) -> Result<()> {
        check(&response, |s| s.created > 0).map(|_| ())
    }
}

/// Copy a file with its metadata rebuilt, which repairs most structural damage.
#[derive(Debug, Clone)]
pub struct RewriteAllTagsTask {
    args: Vec<String>,
}

impl RewriteAllTagsTask {
    pub fn new(path: impl AsRef<Path>, dest: impl AsRef<Path>) -> Self {
        Self {
            args: rewrite_all_tags_args(path.as_ref(), dest.as_ref()),
        }
    }
}

impl Task for RewriteAllTagsTask {
    type Output = WriteSummary;

    fn args(&self) -> Vec<String> {
        self.args.clone()
    }

    fn parse(&self, response: Response) -> Result<WriteSummary> {
        check(&response, |s| s.created > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn response(stdout: &str, stderr: &[&str]) -> Response {
        Response {
            stdout: stdout.to_string(),
            stderr: stderr.iter().map(|s| s.to_string()).collect(),
        }
    }

    #[test]
    fn test_summary_parse() {
        let summary = WriteSummary::parse(
            "    1 directories scanned\n    2 image files updated\n    1 image files unchanged\n    1 files weren't updated due to errors",
        );
        assert_eq!(summary.updated, 2);
        assert_eq!(summary.unchanged, 1);
        assert_eq!(summary.failed, 1);
        assert_eq!(summary.created, 0);
    }

    #[test]
    fn test_write_task() {
        let task = WriteTask::new("a.jpg", &[("Artist".into(), "Me".into())], false).unwrap();
        assert_eq!(task.args(), ["-Artist=Me", "a.jpg"]);

        let ok = task
            .parse(response("    1 image files updated", &["Warning: Icc_profile deleted"]))
            .unwrap();
        assert_eq!(ok.updated, 1);
        assert_eq!(ok.warnings, vec!["Icc_profile deleted"]);

        let err = task
            .parse(response("", &["Error: File not found - a.jpg"]))
            .unwrap_err();
        assert!(matches!(err, ExifBatchError::Tool(_)));

        let err = task
            .parse(response("    0 image files updated\n    1 files weren't updated due to errors", &[]))
            .unwrap_err();
        assert!(err.to_string().contains("weren't updated"));
    }

    #[test]
    fn test_extract_and_rewrite_need_created_files() {
        let extract = ExtractBinaryTask::new("a.jpg", "ThumbnailImage", "t.jpg").unwrap();
        assert!(extract.parse(response("    1 output files created", &[])).is_ok());
        assert!(extract.parse(response("", &[])).is_err());

        let rewrite = RewriteAllTagsTask::new("a.jpg", "b.jpg");
        assert_eq!(rewrite.parse(response("    1 image files created", &[])).unwrap().created, 1);
        assert!(rewrite.parse(response("    0 image files created", &[])).is_err());
    }
}
