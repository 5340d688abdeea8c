//! Timezone inference for one file's metadata.
//!
//! Most timestamps in image metadata are local wall-clock time with no
//! offset. [`resolve`] picks one offset for the whole response from the
//! available signals, in order:
//!
//! 1. An explicit offset tag (`TimeZone`, `OffsetTimeOriginal`, ...).
//! 2. The difference between a GPS UTC timestamp and a local capture time.
//! 3. An offset embedded in a secondary datestamp (optional).
//!
//! A candidate that is not a plausible offset falls through to the next
//! rule. [`apply`] then attaches the result to every offset-less timestamp.

mod offset;

pub use offset::{
    ARCHAIC_OFFSETS, MAX_OFFSET_MINUTES, TzOffset, UNINHABITED_OFFSET, VALID_OFFSETS,
    nearest_allowed,
};

use crate::exif::{ExifDateTime, TagValue, Tags};
use chrono::{NaiveDateTime, TimeDelta, Timelike};
use serde::{Serialize, Serializer};
use std::fmt;
use tracing::trace;

/// Tags holding an explicit offset, highest precedence first.
const EXPLICIT_TAGS: &[&str] = &[
    "TimeZone",
    "OffsetTimeOriginal",
    "OffsetTime",
    "OffsetTimeDigitized",
    "TimeZoneOffset",
];

/// Local capture times compared against GPS time.
const LOCAL_TAGS: &[&str] = &[
    "SubSecDateTimeOriginal",
    "DateTimeOriginal",
    "SubSecCreateDate",
    "CreateDate",
    "DateTimeCreated",
    "DigitalCreationDateTime",
    "SubSecModifyDate",
    "ModifyDate",
];

/// Datestamps from other metadata groups that may carry their own offset.
const DATESTAMP_TAGS: &[&str] = &[
    "SubSecDateTimeOriginal",
    "DateTimeOriginal",
    "SubSecCreateDate",
    "CreateDate",
    "DateTimeCreated",
    "DateCreated",
    "CreationDate",
    "DigitalCreationDateTime",
    "SubSecModifyDate",
    "ModifyDate",
];

/// Timestamps recorded in UTC regardless of where the file was made.
const UTC_TAGS: &[&str] = &[
    "MediaCreateDate",
    "MediaModifyDate",
    "TrackCreateDate",
    "TrackModifyDate",
];

/// Inference policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TzConfig {
    /// How far (minutes) a GPS-derived offset may be from a real one.
    pub gps_tolerance_minutes: u32,
    /// Use offsets embedded in secondary datestamps.
    pub infer_from_datestamps: bool,
    /// Accept archaic and uninhabited offsets.
    pub allow_archaic_offsets: bool,
}

impl Default for TzConfig {
    fn default() -> Self {
        Self {
            gps_tolerance_minutes: 30,
            infer_from_datestamps: true,
            allow_archaic_offsets: false,
        }
    }
}

/// Which rule produced an offset.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum TzSource {
    ExplicitTag(String),
    Gps,
    Datestamp(String),
    #[default]
    None,
}

impl TzSource {
    pub fn is_none(&self) -> bool {
        matches!(self, Self::None)
    }
}

impl fmt::Display for TzSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ExplicitTag(tag) | Self::Datestamp(tag) => f.write_str(tag),
            Self::Gps => f.write_str("GPS"),
            Self::None => f.write_str("none"),
        }
    }
}

impl Serialize for TzSource {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// Outcome of [`resolve`].
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct TzResolution {
    pub offset: Option<TzOffset>,
    pub source: TzSource,
}

impl TzResolution {
    fn found(offset: TzOffset, source: TzSource) -> Self {
        Self {
            offset: Some(offset),
            source,
        }
    }

    pub fn offset_minutes(&self) -> Option<i32> {
        self.offset.map(TzOffset::minutes)
    }

    /// Zone name such as `UTC+8`.
    pub fn zone_name(&self) -> Option<String> {
        self.offset.map(TzOffset::zone_name)
    }
}

/// Pick the offset to use for this response.
pub fn resolve(tags: &Tags, config: &TzConfig) -> TzResolution {
    if let Some(resolution) = from_explicit_tags(tags, config) {
        return resolution;
    }
    if let Some(resolution) = from_gps(tags, config) {
        return resolution;
    }
    if config.infer_from_datestamps
        && let Some(resolution) = from_datestamps(tags, config)
    {
        return resolution;
    }
    TzResolution::default()
}

/// Give every offset-less timestamp the resolved offset. UTC-typed fields get
/// UTC instead. Returns how many values changed.
pub fn apply(tags: &mut Tags, resolution: &TzResolution) -> usize {
    let mut changed = 0;
    for (name, value) in tags.iter_mut() {
        let offset = if is_utc_tag(name) {
            Some(TzOffset::UTC)
        } else {
            resolution.offset
        };
        if let Some(offset) = offset {
            changed += attach_offset(value, offset);
        }
    }
    changed
}

/// GPS fields and QuickTime media/track dates are always UTC.
pub fn is_utc_tag(name: &str) -> bool {
    name.starts_with("GPS") || UTC_TAGS.contains(&name)
}

fn attach_offset(value: &mut TagValue, offset: TzOffset) -> usize {
    match value {
        TagValue::DateTime(dt) if dt.offset.is_none() => {
            dt.offset = Some(offset);
            dt.inferred = true;
            1
        }
        TagValue::List(items) => items.iter_mut().map(|v| attach_offset(v, offset)).sum(),
        _ => 0,
    }
}

fn accept(offset: TzOffset, tag: &str, config: &TzConfig) -> bool {
    let allowed = offset.is_allowed(config.allow_archaic_offsets);
    if !allowed {
        trace!(tag, offset = %offset, "Ignoring implausible UTC offset");
    }
    allowed
}

fn from_explicit_tags(tags: &Tags, config: &TzConfig) -> Option<TzResolution> {
    EXPLICIT_TAGS.iter().find_map(|&name| {
        let offset = tags.get(name).and_then(offset_from_value)?;
        accept(offset, name, config)
            .then(|| TzResolution::found(offset, TzSource::ExplicitTag(name.to_string())))
    })
}

/// Read an offset from a tag value: text like `+09:00`, or hours as a number.
fn offset_from_value(value: &TagValue) -> Option<TzOffset> {
    match value {
        TagValue::Text(s) => TzOffset::parse(s),
        TagValue::Number(n) => n.as_f64().and_then(TzOffset::from_hours),
        TagValue::List(items) => items.first().and_then(offset_from_value),
        _ => None,
    }
}

fn from_gps(tags: &Tags, config: &TzConfig) -> Option<TzResolution> {
    let gps = gps_utc(tags)?;
    let (name, local) = LOCAL_TAGS.iter().find_map(|&name| match tags.get(name) {
        Some(TagValue::DateTime(dt)) if dt.offset.is_none() => Some((name, whole_seconds(dt))),
        _ => None,
    })?;

    let delta_minutes = ((local - gps).num_seconds() as f64 / 60.0).round();
    let tolerance = config.gps_tolerance_minutes;
    if delta_minutes.abs() > (MAX_OFFSET_MINUTES as u32 + tolerance) as f64 {
        trace!(local_tag = name, delta_minutes, "GPS and local time too far apart");
        return None;
    }

    let offset = nearest_allowed(delta_minutes as i32, tolerance, config.allow_archaic_offsets);
    match offset {
        Some(offset) => Some(TzResolution::found(offset, TzSource::Gps)),
        None => {
            trace!(local_tag = name, delta_minutes, "GPS delta matches no offset");
            None
        }
    }
}

/// GPS capture time in UTC, as whole seconds.
fn gps_utc(tags: &Tags) -> Option<NaiveDateTime> {
    if let Some(TagValue::DateTime(dt)) = tags.get("GPSDateTime") {
        return Some(utc_whole_seconds(dt));
    }
    let date = match tags.get("GPSDateStamp")? {
        TagValue::Date(d) => d.date,
        TagValue::DateTime(dt) => dt.naive.date(),
        _ => return None,
    };
    let time = match tags.get("GPSTimeStamp")? {
        TagValue::Time(t) => t.time.with_nanosecond(0)?,
        _ => return None,
    };
    Some(date.and_time(time))
}

fn whole_seconds(dt: &ExifDateTime) -> NaiveDateTime {
    dt.naive.with_nanosecond(0).unwrap_or(dt.naive)
}

fn utc_whole_seconds(dt: &ExifDateTime) -> NaiveDateTime {
    let offset = dt.offset.map(TzOffset::minutes).unwrap_or(0);
    whole_seconds(dt) - TimeDelta::minutes(offset as i64)
}

fn from_datestamps(tags: &Tags, config: &TzConfig) -> Option<TzResolution> {
    DATESTAMP_TAGS.iter().find_map(|&name| match tags.get(name) {
        Some(TagValue::DateTime(ExifDateTime {
            offset: Some(offset),
            inferred: false,
            ..
        })) if accept(*offset, name, config) => Some(TzResolution::found(
            *offset,
            TzSource::Datestamp(name.to_string()),
        )),
        _ => None,
    })
}
