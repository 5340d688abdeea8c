//! Reading metadata: the `-json` task and its result model.

use super::args::{ReadOptions, read_args};
use super::tags::{TagValue, Tags, is_intrinsic_file_tag};
use crate::batch::{Response, Task};
use crate::error::{ExifBatchError, Result};
use crate::tz::{self, TzConfig, TzOffset, TzResolution, TzSource};
use serde::Serialize;
use serde_json::{Map, Value};
use std::path::{Path, PathBuf};
use tracing::trace;

/// Metadata of one file, with timezone inference applied.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Metadata {
    #[serde(rename = "SourceFile")]
    pub source_file: String,
    #[serde(flatten)]
    pub tags: Tags,
    /// `Warning` tags and warning lines from stderr.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
    /// `Error` tags reported inside an otherwise successful response.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<String>,
    /// Zone name of the resolved offset, e.g. `UTC+8`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tz: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tz_offset: Option<TzOffset>,
    #[serde(skip_serializing_if = "TzSource::is_none")]
    pub tz_source: TzSource,
}

impl Metadata {
    /// Build from one object of exiftool's JSON array.
    pub fn from_json(object: Map<String, Value>, options: &ReadOptions) -> Self {
        let mut metadata = Self::default();
        for (name, value) in object {
            match name.as_str() {
                "SourceFile" => {
                    metadata.source_file = match value {
                        Value::String(s) => s,
                        other => other.to_string(),
                    }
                }
                "Warning" => metadata.warnings.extend(messages(value)),
                "Error" => metadata.errors.extend(messages(value)),
                _ if !options.include_file_tags && is_intrinsic_file_tag(&name) => {}
                _ => {
                    let value = TagValue::from_json(&name, value);
                    metadata.tags.insert(name, value);
                }
            }
        }
        metadata
    }

    pub fn get(&self, tag: &str) -> Option<&TagValue> {
        self.tags.get(tag)
    }

    /// Run timezone inference and record the outcome.
    pub fn apply_tz(&mut self, config: &TzConfig) -> TzResolution {
        let resolution = tz::resolve(&self.tags, config);
        let changed = tz::apply(&mut self.tags, &resolution);
        trace!(
            file = %self.source_file,
            offset = ?resolution.offset_minutes(),
            source = %resolution.source,
            changed,
            "Timezone applied"
        );
        self.tz = resolution.zone_name();
        self.tz_offset = resolution.offset;
        self.tz_source = resolution.source.clone();
        resolution
    }
}

fn messages(value: Value) -> Vec<String> {
    match value {
        Value::String(s) => vec![s],
        Value::Array(items) => items.into_iter().flat_map(messages).collect(),
        Value::Null => Vec::new(),
        other => vec![other.to_string()],
    }
}

/// Read all tags of one file.
#[derive(Debug, Clone)]
pub struct ReadTask {
    path: PathBuf,
    options: ReadOptions,
    tz: TzConfig,
}

impl ReadTask {
    pub fn new(path: impl AsRef<Path>, options: ReadOptions, tz: TzConfig) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            options,
            tz,
        }
    }
}

impl Task for ReadTask {
    type Output = Metadata;

    fn args(&self) -> Vec<String> {
        read_args(&self.path, &self.options)
    }

    fn parse(&self, response: Response) -> Result<Metadata> {
        let warnings = response.diagnostics().into_result()?;
        let object = parse_first_object(&response.stdout)?;

        let mut metadata = Metadata::from_json(object, &self.options);
        if metadata.source_file.is_empty() {
            metadata.source_file = self.path.to_string_lossy().into_owned();
        }
        metadata.warnings.extend(warnings);
        metadata.apply_tz(&self.tz);
        Ok(metadata)
    }
}

/// exiftool prints a JSON array with one object per file.
fn parse_first_object(stdout: &str) -> Result<Map<String, Value>> {
    let trimmed = stdout.trim();
    if trimmed.is_empty() {
        return Err(ExifBatchError::parse("empty response", stdout));
    }
    let value: Value = serde_json::from_str(trimmed)
        .map_err(|e| ExifBatchError::parse(format!("invalid JSON: {}", e), stdout))?;
    let first = match value {
        Value::Array(items) => items.into_iter().next(),
        object @ Value::Object(_) => Some(object),
        _ => None,
    };
    match first {
        Some(Value::Object(map)) => Ok(map),
        _ => Err(ExifBatchError::parse("expected a JSON array of objects", stdout)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn read(stdout: &str, stderr: &[&str]) -> Result<Metadata> {
        let task = ReadTask::new("photo.jpg", ReadOptions::default(), TzConfig::default());
        task.parse(Response {
            stdout: stdout.to_string(),
            stderr: stderr.iter().map(|s| s.to_string()).collect(),
        })
    }

    #[test]
    fn test_parse_read_response() {
        let metadata = read(
            r#"[{
                "SourceFile": "photo.jpg",
                "Make": "Canon",
                "ISO": 200,
                "TimeZone": "+09:00",
                "DateTimeOriginal": "2016:08:12 13:28:50",
                "Warning": "[minor] Bad MakerNotes offset"
            }]"#,
            &["Warning: Truncated PreviewImage"],
        )
        .unwrap();

        assert_eq!(metadata.source_file, "photo.jpg");
        assert_eq!(metadata.get("Make").and_then(TagValue::as_str), Some("Canon"));
        assert_eq!(metadata.get("ISO").and_then(TagValue::as_f64), Some(200.0));
        assert_eq!(
            metadata.warnings,
            vec!["[minor] Bad MakerNotes offset", "Truncated PreviewImage"]
        );
        assert_eq!(metadata.tz.as_deref(), Some("UTC+9"));
        assert_eq!(metadata.tz_offset.map(TzOffset::minutes), Some(540));
        assert_eq!(metadata.tz_source.to_string(), "TimeZone");

        let dto = metadata
            .get("DateTimeOriginal")
            .and_then(TagValue::as_datetime)
            .unwrap();
        assert!(dto.inferred);
        assert_eq!(dto.to_iso(), "2016-08-12T13:28:50+09:00");
    }

    #[test]
    fn test_malformed_offsets_stay_text() {
        let metadata = read(
            r#"[{
                "SourceFile": "photo.jpg",
                "TimeZone": "+é1",
                "OffsetTime": "-1é",
                "DateTimeOriginal": "2016:08:12 13:28:50+é1",
                "GPSTimeStamp": "05:28:4é"
            }]"#,
            &[],
        )
        .unwrap();

        assert!(metadata.tz.is_none());
        assert!(metadata.tz_source.is_none());
        assert_eq!(
            metadata.get("DateTimeOriginal").and_then(TagValue::as_str),
            Some("2016:08:12 13:28:50+é1")
        );
        assert_eq!(metadata.get("TimeZone").and_then(TagValue::as_str), Some("+é1"));
    }

    #[test]
    fn test_error_marker_fails_task() {
        let err = read("", &["Error: File not found - photo.jpg"]).unwrap_err();
        match err {
            ExifBatchError::Tool(msg) => assert!(msg.contains("File not found")),
            other => panic!("unexpected: {other}"),
        }
    }

    #[test]
    fn test_error_tag_is_kept_on_result() {
        let metadata = read(
            r#"[{"SourceFile": "photo.jpg", "Error": "File format error"}]"#,
            &[],
        )
        .unwrap();
        assert_eq!(metadata.errors, vec!["File format error"]);
    }

    #[test]
    fn test_garbage_is_parse_error_with_raw_text() {
        let err = read("not json at all", &[]).unwrap_err();
        assert_eq!(err.raw_output(), Some("not json at all"));
        assert!(matches!(read("", &[]), Err(ExifBatchError::Parse { .. })));
        assert!(matches!(read("[1, 2]", &[]), Err(ExifBatchError::Parse { .. })));
    }

    #[test]
    fn test_file_tags_can_be_dropped() {
        let json = r#"[{"SourceFile": "a.jpg", "FileSize": "1 kB", "Directory": ".", "Make": "X"}]"#;
        let Value::Array(items) = serde_json::from_str::<Value>(json).unwrap() else {
            panic!("array");
        };
        let Some(Value::Object(object)) = items.into_iter().next() else {
            panic!("object");
        };
        let options = ReadOptions {
            include_file_tags: false,
            ..ReadOptions::default()
        };
        let metadata = Metadata::from_json(object, &options);
        assert_eq!(metadata.source_file, "a.jpg");
        assert_eq!(metadata.tags.keys().collect::<Vec<_>>(), vec!["Make"]);
    }

    #[test]
    fn test_serialized_shape() {
        let metadata = read(
            r#"[{"SourceFile": "p.jpg", "GPSDateTime": "2016:08:12 05:28:49Z", "DateTimeOriginal": "2016:08:12 13:28:50"}]"#,
            &[],
        )
        .unwrap();
        let json = serde_json::to_value(&metadata).unwrap();
        assert_eq!(json["SourceFile"], "p.jpg");
        assert_eq!(json["DateTimeOriginal"], "2016-08-12T13:28:50+08:00");
        assert_eq!(json["tz"], "UTC+8");
        assert_eq!(json["tz_offset"], "+08:00");
        assert_eq!(json["tz_source"], "GPS");
        assert!(json.get("warnings").is_none());
    }
}
