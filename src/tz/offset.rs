//! UTC offsets in minutes, and the tables deciding which ones are plausible.

use chrono::FixedOffset;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

/// Largest offset in use anywhere (UTC+14:00, Line Islands).
pub const MAX_OFFSET_MINUTES: i32 = 14 * 60;

/// Offsets of time zones currently in use, in minutes.
pub const VALID_OFFSETS: &[i32] = &[
    -11 * 60,
    -10 * 60,
    -(9 * 60 + 30),
    -9 * 60,
    -8 * 60,
    -7 * 60,
    -6 * 60,
    -5 * 60,
    -4 * 60,
    -(3 * 60 + 30),
    -3 * 60,
    -2 * 60,
    -60,
    0,
    60,
    2 * 60,
    3 * 60,
    3 * 60 + 30,
    4 * 60,
    4 * 60 + 30,
    5 * 60,
    5 * 60 + 30,
    5 * 60 + 45,
    6 * 60,
    6 * 60 + 30,
    7 * 60,
    8 * 60,
    8 * 60 + 45,
    9 * 60,
    9 * 60 + 30,
    10 * 60,
    10 * 60 + 30,
    11 * 60,
    12 * 60,
    12 * 60 + 45,
    13 * 60,
    14 * 60,
];

/// Historical offsets no longer used by any zone.
pub const ARCHAIC_OFFSETS: &[i32] = &[
    -(10 * 60 + 30),
    -(4 * 60 + 30),
    -44,
    20,
    30,
    60 + 24,
    60 + 30,
    2 * 60 + 30,
    4 * 60 + 51,
    5 * 60 + 40,
    7 * 60 + 20,
    7 * 60 + 30,
    11 * 60 + 30,
];

/// UTC-12:00 only covers uninhabited islands.
pub const UNINHABITED_OFFSET: i32 = -12 * 60;

/// A fixed offset from UTC, in signed minutes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TzOffset(i32);

impl TzOffset {
    pub const UTC: Self = Self(0);

    /// `None` if the offset is outside ±14:00.
    pub fn from_minutes(minutes: i32) -> Option<Self> {
        (minutes.abs() <= MAX_OFFSET_MINUTES).then_some(Self(minutes))
    }

    /// Offset from fractional hours, as some tags store it (`9`, `-3.5`).
    pub fn from_hours(hours: f64) -> Option<Self> {
        if !hours.is_finite() {
            return None;
        }
        Self::from_minutes((hours * 60.0).round() as i32)
    }

    pub fn minutes(self) -> i32 {
        self.0
    }

    pub fn is_utc(self) -> bool {
        self.0 == 0
    }

    /// Parse `Z`, `UTC`, `GMT`, `±HH:MM`, `±HHMM`, `±HH`, `±H`, `UTC+8`,
    /// `GMT-05:30`, or a bare hour count.
    pub fn parse(input: &str) -> Option<Self> {
        let s = input.trim();
        if s.is_empty() {
            return None;
        }
        if s.eq_ignore_ascii_case("z") {
            return Some(Self::UTC);
        }
        let rest = strip_prefix_ignore_case(s, "UTC")
            .or_else(|| strip_prefix_ignore_case(s, "GMT"))
            .unwrap_or(s)
            .trim_start();
        if rest.is_empty() {
            // Bare "UTC"/"GMT".
            return (rest.len() != s.len()).then_some(Self::UTC);
        }

        let (sign, body) = match rest.as_bytes()[0] {
            b'+' => (1, &rest[1..]),
            b'-' => (-1, &rest[1..]),
            _ => (1, rest),
        };
        if body.is_empty() {
            return None;
        }

        let (hours, minutes) = if let Some((h, m)) = body.split_once(':') {
            (parse_digits(h, 1, 2)?, parse_digits(m, 2, 2)?)
        } else if body.contains('.') {
            let hours: f64 = body.parse().ok()?;
            return Self::from_hours(sign as f64 * hours);
        } else {
            match body.len() {
                1 | 2 => (parse_digits(body, 1, 2)?, 0),
                3 | 4 => {
                    let split = body.len() - 2;
                    (
                        parse_digits(body.get(..split)?, 1, 2)?,
                        parse_digits(body.get(split..)?, 2, 2)?,
                    )
                }
                _ => return None,
            }
        };
        if minutes >= 60 {
            return None;
        }
        Self::from_minutes(sign * (hours * 60 + minutes))
    }

    /// Zone name: `UTC`, `UTC+8`, `UTC-9:30`.
    pub fn zone_name(self) -> String {
        if self.0 == 0 {
            return "UTC".to_string();
        }
        let sign = if self.0 < 0 { '-' } else { '+' };
        let abs = self.0.abs();
        match abs % 60 {
            0 => format!("UTC{}{}", sign, abs / 60),
            m => format!("UTC{}{}:{:02}", sign, abs / 60, m),
        }
    }

    pub fn to_fixed_offset(self) -> Option<FixedOffset> {
        FixedOffset::east_opt(self.0 * 60)
    }

    /// Whether any zone currently uses this offset.
    pub fn is_current(self) -> bool {
        VALID_OFFSETS.contains(&self.0)
    }

    pub fn is_archaic(self) -> bool {
        ARCHAIC_OFFSETS.contains(&self.0)
    }

    pub fn is_uninhabited(self) -> bool {
        self.0 == UNINHABITED_OFFSET
    }

    /// Accepted as a resolved offset under the given policy.
    pub fn is_allowed(self, allow_archaic: bool) -> bool {
        self.is_current() || (allow_archaic && (self.is_archaic() || self.is_uninhabited()))
    }
}

/// Closest allowed offset within `tolerance` minutes of `minutes`.
///
/// Ties go to the offset nearer zero.
pub fn nearest_allowed(minutes: i32, tolerance: u32, allow_archaic: bool) -> Option<TzOffset> {
    let extra: &[i32] = if allow_archaic { ARCHAIC_OFFSETS } else { &[] };
    let uninhabited: &[i32] = if allow_archaic { &[UNINHABITED_OFFSET] } else { &[] };
    VALID_OFFSETS
        .iter()
        .chain(extra)
        .chain(uninhabited)
        .copied()
        .filter(|candidate| candidate.abs_diff(minutes) <= tolerance)
        .min_by_key(|candidate| (candidate.abs_diff(minutes), candidate.unsigned_abs()))
        .map(TzOffset)
}

impl fmt::Display for TzOffset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sign = if self.0 < 0 { '-' } else { '+' };
        let abs = self.0.abs();
        write!(f, "{}{:02}:{:02}", sign, abs / 60, abs % 60)
    }
}

impl Serialize for TzOffset {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for TzOffset {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Self::parse(&s).ok_or_else(|| serde::de::Error::custom(format!("invalid UTC offset: {s}")))
    }
}

fn strip_prefix_ignore_case<'a>(s: &'a str, prefix: &str) -> Option<&'a str> {
    let head = s.get(..prefix.len())?;
    head.eq_ignore_ascii_case(prefix).then(|| &s[prefix.len()..])
}

fn parse_digits(s: &str, min: usize, max: usize) -> Option<i32> {
    if s.len() < min || s.len() > max || !s.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    s.parse().ok()
}


#[cfg(test)]
mod proptests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        /// Every representable offset survives formatting and parsing.
        #[test]
        fn display_parses_back(minutes in -MAX_OFFSET_MINUTES..=MAX_OFFSET_MINUTES) {
            let offset = TzOffset::from_minutes(minutes).unwrap();
            prop_assert_eq!(TzOffset::parse(&offset.to_string()), Some(offset));
            prop_assert_eq!(TzOffset::parse(&offset.zone_name()), Some(offset));
        }

        /// Arbitrary text never panics the parser.
        #[test]
        fn parse_is_total(input in "\\PC{0,8}") {
            let _ = TzOffset::parse(&input);
            let _ = TzOffset::parse(&format!("+{input}"));
        }
    }
}
