//! Tag values and the table deciding how each field is parsed.

use super::datetime::{ExifDate, ExifDateTime, ExifTime};
use serde::Serialize;
use std::collections::BTreeMap;

/// All tags of one file, keyed by tag name.
pub type Tags = BTreeMap<String, TagValue>;

/// One parsed tag value.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum TagValue {
    Text(String),
    Number(serde_json::Number),
    Bool(bool),
    List(Vec<TagValue>),
    Struct(BTreeMap<String, TagValue>),
    DateTime(ExifDateTime),
    Date(ExifDate),
    Time(ExifTime),
}

/// What kind of value a field holds when it is text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    DateTime,
    Date,
    Time,
    Plain,
}

/// Fields whose names would otherwise match a suffix rule.
const EXACT_KINDS: &[(&str, FieldKind)] = &[
    ("GPSDateStamp", FieldKind::Date),
    ("GPSTimeStamp", FieldKind::Time),
    ("DateCreated", FieldKind::DateTime),
    ("DigitalCreationDate", FieldKind::Date),
    ("DigitalCreationTime", FieldKind::Time),
    ("TimeCreated", FieldKind::Time),
    ("OffsetTime", FieldKind::Plain),
    ("OffsetTimeOriginal", FieldKind::Plain),
    ("OffsetTimeDigitized", FieldKind::Plain),
    ("SubSecTime", FieldKind::Plain),
    ("SubSecTimeOriginal", FieldKind::Plain),
    ("SubSecTimeDigitized", FieldKind::Plain),
    ("ExposureTime", FieldKind::Plain),
    ("TimeZone", FieldKind::Plain),
    ("TimeZoneOffset", FieldKind::Plain),
    ("TimeZoneCity", FieldKind::Plain),
];

/// Checked in order after the exact names.
const SUFFIX_KINDS: &[(&str, FieldKind)] = &[
    ("DateTimeOriginal", FieldKind::DateTime),
    ("DateTime", FieldKind::DateTime),
    ("Date", FieldKind::DateTime),
    ("Time", FieldKind::Time),
];

/// Decide how a field's text value should be parsed.
pub fn field_kind(name: &str) -> FieldKind {
    if let Some((_, kind)) = EXACT_KINDS.iter().find(|(exact, _)| *exact == name) {
        return *kind;
    }
    SUFFIX_KINDS
        .iter()
        .find(|(suffix, _)| name.ends_with(suffix))
        .map(|(_, kind)| *kind)
        .unwrap_or(FieldKind::Plain)
}

/// Filesystem facts about the file rather than metadata stored in it.
const FILE_TAGS: &[&str] = &[
    "SourceFile",
    "FileName",
    "Directory",
    "FileSize",
    "FileModifyDate",
    "FileAccessDate",
    "FileInodeChangeDate",
    "FileCreateDate",
    "FilePermissions",
    "FileType",
    "FileTypeExtension",
    "MIMEType",
    "ExifToolVersion",
];

pub fn is_intrinsic_file_tag(name: &str) -> bool {
    FILE_TAGS.contains(&name)
}

impl TagValue {
    /// Convert one JSON value from exiftool, parsing date-like text by field name.
    pub fn from_json(name: &str, value: serde_json::Value) -> Self {
        Self::from_json_as(field_kind(name), value)
    }

    fn from_json_as(kind: FieldKind, value: serde_json::Value) -> Self {
        use serde_json::Value;
        match value {
            Value::String(s) => Self::from_text(kind, s),
            Value::Number(n) => Self::Number(n),
            Value::Bool(b) => Self::Bool(b),
            Value::Null => Self::Text(String::new()),
            Value::Array(items) => {
                Self::List(items.into_iter().map(|v| Self::from_json_as(kind, v)).collect())
            }
            Value::Object(map) => Self::Struct(
                map.into_iter()
                    .map(|(k, v)| {
                        let value = Self::from_json(&k, v);
                        (k, value)
                    })
                    .collect(),
            ),
        }
    }

    /// Text that does not parse as its field kind stays text.
    fn from_text(kind: FieldKind, s: String) -> Self {
        let parsed = match kind {
            FieldKind::DateTime => ExifDateTime::parse(&s)
                .map(Self::DateTime)
                .or_else(|| ExifDate::parse(&s).map(Self::Date)),
            FieldKind::Date => ExifDate::parse(&s).map(Self::Date),
            FieldKind::Time => ExifTime::parse(&s).map(Self::Time),
            FieldKind::Plain => None,
        };
        parsed.unwrap_or(Self::Text(s))
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Number(n) => n.as_f64(),
            _ => None,
        }
    }

    pub fn as_datetime(&self) -> Option<&ExifDateTime> {
        match self {
            Self::DateTime(dt) => Some(dt),
            _ => None,
        }
    }
}

impl std::fmt::Display for TagValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Text(s) => f.write_str(s),
            Self::Number(n) => write!(f, "{}", n),
            Self::Bool(b) => write!(f, "{}", b),
            Self::List(items) => {
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{}", item)?;
                }
                Ok(())
            }
            Self::Struct(map) => {
                let json = serde_json::to_string(map).map_err(|_| std::fmt::Error)?;
                f.write_str(&json)
            }
            Self::DateTime(dt) => write!(f, "{}", dt),
            Self::Date(d) => write!(f, "{}", d),
            Self::Time(t) => write!(f, "{}", t),
        }
    }
}
