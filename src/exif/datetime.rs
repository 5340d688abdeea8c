//! Date and time values as exiftool prints them.
//!
//! Exif timestamps look like `2016:08:12 13:28:50.123+08:00`; ISO-8601 forms
//! (`2016-08-12T13:28:50Z`) are accepted as well. Fractional seconds keep the
//! precision they were written with.

use crate::tz::TzOffset;
use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, NaiveTime, Timelike, Utc};
use serde::{Serialize, Serializer};
use std::fmt;

/// A wall-clock timestamp with an optional UTC offset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExifDateTime {
    pub naive: NaiveDateTime,
    /// Digits of fractional seconds in the source value (0 = none).
    pub precision: u8,
    pub offset: Option<TzOffset>,
    /// The offset was attached by timezone inference, not read from the value.
    pub inferred: bool,
}

impl ExifDateTime {
    pub fn parse(input: &str) -> Option<Self> {
        let s = input.trim();
        let split = s.find([' ', 'T'])?;
        let date = parse_date(&s[..split])?;
        let time = ExifTime::parse(s[split + 1..].trim_start())?;
        Some(Self {
            naive: date.and_time(time.time),
            precision: time.precision,
            offset: time.offset,
            inferred: false,
        })
    }

    pub fn with_offset(mut self, offset: TzOffset) -> Self {
        self.offset = Some(offset);
        self
    }

    /// The instant this value names, if its offset is known.
    pub fn to_utc(&self) -> Option<DateTime<Utc>> {
        self.to_fixed().map(|dt| dt.with_timezone(&Utc))
    }

    pub fn to_fixed(&self) -> Option<DateTime<FixedOffset>> {
        let offset = self.offset?.to_fixed_offset()?;
        self.naive.and_local_timezone(offset).single()
    }

    /// ISO-8601 form, e.g. `2016-08-12T13:28:50.123+08:00`.
    pub fn to_iso(&self) -> String {
        format!(
            "{}T{}{}",
            self.naive.format("%Y-%m-%d"),
            format_time(self.naive.time(), self.precision),
            format_offset(self.offset)
        )
    }
}

impl fmt::Display for ExifDateTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {}{}",
            self.naive.format("%Y:%m:%d"),
            format_time(self.naive.time(), self.precision),
            format_offset(self.offset)
        )
    }
}

impl Serialize for ExifDateTime {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_iso())
    }
}

/// A calendar date (`GPSDateStamp`, IPTC `DateCreated`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExifDate {
    pub date: NaiveDate,
}

impl ExifDate {
    pub fn parse(input: &str) -> Option<Self> {
        parse_date(input.trim()).map(|date| Self { date })
    }
}

impl fmt::Display for ExifDate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.date.format("%Y:%m:%d"))
    }
}

impl Serialize for ExifDate {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(&self.date.format("%Y-%m-%d"))
    }
}

/// A time of day with an optional offset (`GPSTimeStamp`, `TimeCreated`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExifTime {
    pub time: NaiveTime,
    pub precision: u8,
    pub offset: Option<TzOffset>,
}

impl ExifTime {
    /// `HH:MM[:SS][.fff][Z|±HH:MM]`.
    pub fn parse(input: &str) -> Option<Self> {
        let s = input.trim();
        let (clock, offset) = match s.find(['Z', 'z', '+', '-']) {
            Some(i) => (&s[..i], Some(TzOffset::parse(&s[i..])?)),
            None => (s, None),
        };
        let (hms, fraction) = match clock.split_once('.') {
            Some((hms, fraction)) => (hms, Some(fraction)),
            None => (clock, None),
        };

        let mut parts = hms.split(':');
        let hour = number(parts.next()?)?;
        let minute = number(parts.next()?)?;
        let second = match parts.next() {
            Some(sec) => number(sec)?,
            None => 0,
        };
        if parts.next().is_some() {
            return None;
        }

        let (nanos, precision) = match fraction {
            Some(digits) => parse_fraction(digits)?,
            None => (0, 0),
        };
        let time = NaiveTime::from_hms_nano_opt(hour, minute, second, nanos)?;
        Some(Self {
            time,
            precision,
            offset,
        })
    }
}

impl fmt::Display for ExifTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}{}",
            format_time(self.time, self.precision),
            format_offset(self.offset)
        )
    }
}

impl Serialize for ExifTime {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// `YYYY:MM:DD` or `YYYY-MM-DD`. All-zero dates are rejected.
fn parse_date(s: &str) -> Option<NaiveDate> {
    let sep = if s.contains(':') { ':' } else { '-' };
    let mut parts = s.split(sep);
    let year = parts.next().filter(|y| y.len() == 4)?.parse().ok()?;
    let month = number(parts.next()?)?;
    let day = number(parts.next()?)?;
    if parts.next().is_some() {
        return None;
    }
    NaiveDate::from_ymd_opt(year, month, day)
}

fn number(s: &str) -> Option<u32> {
    if s.is_empty() || s.len() > 2 || !s.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    s.parse().ok()
}

/// Fraction digits to nanoseconds; precision is capped at nanoseconds.
fn parse_fraction(digits: &str) -> Option<(u32, u8)> {
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let kept = &digits[..digits.len().min(9)];
    let nanos: u32 = kept.parse().ok()?;
    let scale = 10u32.pow(9 - kept.len() as u32);
    Some((nanos * scale, kept.len() as u8))
}

fn format_time(time: NaiveTime, precision: u8) -> String {
    let base = time.format("%H:%M:%S").to_string();
    if precision == 0 {
        return base;
    }
    let nanos = format!("{:09}", time.nanosecond() % 1_000_000_000);
    format!("{}.{}", base, &nanos[..precision as usize])
}

fn format_offset(offset: Option<TzOffset>) -> String {
    match offset {
        Some(o) if o.is_utc() => "Z".to_string(),
        Some(o) => o.to_string(),
        None => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_exif_datetime() {
        let dt = ExifDateTime::parse("2016:08:12 13:28:50").unwrap();
        assert_eq!(dt.naive.to_string(), "2016-08-12 13:28:50");
        assert_eq!(dt.offset, None);
        assert_eq!(dt.precision, 0);
        assert_eq!(dt.to_string(), "2016:08:12 13:28:50");
    }

    #[test]
    fn test_parse_keeps_fraction_and_offset() {
        let dt = ExifDateTime::parse("2016:08:12 13:28:50.120+08:00").unwrap();
        assert_eq!(dt.precision, 3);
        assert_eq!(dt.offset.map(TzOffset::minutes), Some(480));
        assert_eq!(dt.to_string(), "2016:08:12 13:28:50.120+08:00");
        assert_eq!(dt.to_iso(), "2016-08-12T13:28:50.120+08:00");
        assert_eq!(
            dt.to_utc().unwrap().to_rfc3339(),
            "2016-08-12T05:28:50.120+00:00"
        );
    }

    #[test]
    fn test_parse_iso_forms() {
        let utc = ExifDateTime::parse("2016-08-12T05:28:49Z").unwrap();
        assert_eq!(utc.offset, Some(TzOffset::UTC));
        assert_eq!(utc.to_string(), "2016:08:12 05:28:49Z");

        let negative = ExifDateTime::parse("2020-02-29T23:59:59.5-0330").unwrap();
        assert_eq!(negative.offset.map(TzOffset::minutes), Some(-210));
        assert_eq!(negative.precision, 1);
    }

    #[test]
    fn test_minutes_only_time() {
        let dt = ExifDateTime::parse("2019:01:01 10:15").unwrap();
        assert_eq!(dt.naive.to_string(), "2019-01-01 10:15:00");
    }

    #[test]
    fn test_invalid_values() {
        assert!(ExifDateTime::parse("0000:00:00 00:00:00").is_none());
        assert!(ExifDateTime::parse("2016:13:01 00:00:00").is_none());
        assert!(ExifDateTime::parse("2016:08:12").is_none());
        assert!(ExifDateTime::parse("not a date").is_none());
        assert!(ExifDateTime::parse("2016:08:12 25:00:00").is_none());
        assert!(ExifDateTime::parse("2016:08:12 10:00:00+99:00").is_none());
    }

    #[test]
    fn test_dates_and_times() {
        let date = ExifDate::parse("2016:08:12").unwrap();
        assert_eq!(date.to_string(), "2016:08:12");
        assert_eq!(serde_json::to_string(&date).unwrap(), "\"2016-08-12\"");
        assert!(ExifDate::parse("0000:00:00").is_none());

        let time = ExifTime::parse("05:28:49.25").unwrap();
        assert_eq!(time.precision, 2);
        assert_eq!(time.to_string(), "05:28:49.25");
        let zoned = ExifTime::parse("10:00:00-05:00").unwrap();
        assert_eq!(zoned.offset.map(TzOffset::minutes), Some(-300));
        assert!(ExifTime::parse("1/125").is_none());
    }

    #[test]
    fn test_serializes_as_iso() {
        let dt = ExifDateTime::parse("2016:08:12 13:28:50").unwrap();
        assert_eq!(serde_json::to_string(&dt).unwrap(), "\"2016-08-12T13:28:50\"");
    }
}
