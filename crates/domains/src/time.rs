//! # Time Values
//!
//! Wall-clock and weekday value types. All interval arithmetic in the core
//! happens on minutes since midnight, never on `HH:MM` strings.

use std::fmt;
use std::str::FromStr;

use chrono::{Datelike, NaiveDate, NaiveTime, Timelike};
use serde::{Deserialize, Serialize};

use crate::error::{AppError, Result};

const MINUTES_PER_DAY: u16 = 24 * 60;

/// A wall-clock time of day with minute precision.
///
/// `24:00` is representable so that a window may close at midnight, but it is
/// never a valid start.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TimeOfDay(u16);

impl TimeOfDay {
    pub const MIDNIGHT: TimeOfDay = TimeOfDay(0);
    pub const END_OF_DAY: TimeOfDay = TimeOfDay(MINUTES_PER_DAY);

    pub fn from_minutes(minutes: u32) -> Result<Self> {
        if minutes > u32::from(MINUTES_PER_DAY) {
            return Err(AppError::invalid(format!("{minutes} minutes is past the end of the day")));
        }
        Ok(Self(minutes as u16))
    }

    pub fn from_hm(hours: u32, minutes: u32) -> Result<Self> {
        if minutes > 59 || hours > 24 || (hours == 24 && minutes != 0) {
            return Err(AppError::invalid(format!("{hours:02}:{minutes:02} is not a time of day")));
        }
        Self::from_minutes(hours * 60 + minutes)
    }

    /// Parses strict `HH:MM` (two digits each side).
    pub fn parse(raw: &str) -> Result<Self> {
        let bytes = raw.as_bytes();
        let well_formed = bytes.len() == 5
            && bytes[2] == b':'
            && [0, 1, 3, 4].iter().all(|&i| bytes[i].is_ascii_digit());
        if !well_formed {
            return Err(AppError::invalid(format!("'{raw}' is not an HH:MM time")));
        }
        let hours = u32::from(bytes[0] - b'0') * 10 + u32::from(bytes[1] - b'0');
        let minutes = u32::from(bytes[3] - b'0') * 10 + u32::from(bytes[4] - b'0');
        Self::from_hm(hours, minutes)
    }

    /// Rounds a clock reading up to the next whole minute.
    pub fn ceil_from(time: NaiveTime) -> Self {
        let mut minutes = time.hour() * 60 + time.minute();
        if time.second() > 0 || time.nanosecond() > 0 {
            minutes += 1;
        }
        Self(minutes.min(u32::from(MINUTES_PER_DAY)) as u16)
    }

    pub fn minutes_since_midnight(self) -> u32 {
        u32::from(self.0)
    }

    pub fn hours(self) -> u32 {
        u32::from(self.0 / 60)
    }

    pub fn minutes(self) -> u32 {
        u32::from(self.0 % 60)
    }

    /// `None` when the result would run past `24:00`.
    pub fn checked_add_minutes(self, minutes: u32) -> Option<Self> {
        let total = self.minutes_since_midnight().checked_add(minutes)?;
        Self::from_minutes(total).ok()
    }

    /// `None` for `24:00`, which has no `NaiveTime` counterpart.
    pub fn to_naive_time(self) -> Option<NaiveTime> {
        NaiveTime::from_hms_opt(self.hours(), self.minutes(), 0)
    }
}

impl fmt::Display for TimeOfDay {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02}:{:02}", self.hours(), self.minutes())
    }
}

impl FromStr for TimeOfDay {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl TryFrom<String> for TimeOfDay {
    type Error = AppError;

    fn try_from(value: String) -> Result<Self> {
        Self::parse(&value)
    }
}

impl From<TimeOfDay> for String {
    fn from(value: TimeOfDay) -> Self {
        value.to_string()
    }
}

/// Day of the week, numbered 0 (Sunday) to 6 (Saturday).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum DayOfWeek {
    Sunday = 0,
    Monday = 1,
    Tuesday = 2,
    Wednesday = 3,
    Thursday = 4,
    Friday = 5,
    Saturday = 6,
}

impl DayOfWeek {
    pub const ALL: [DayOfWeek; 7] = [
        DayOfWeek::Sunday,
        DayOfWeek::Monday,
        DayOfWeek::Tuesday,
        DayOfWeek::Wednesday,
        DayOfWeek::Thursday,
        DayOfWeek::Friday,
        DayOfWeek::Saturday,
    ];

    pub fn from_index(index: u8) -> Result<Self> {
        Self::ALL
            .get(usize::from(index))
            .copied()
            .ok_or_else(|| AppError::invalid(format!("day of week {index} is outside 0-6")))
    }

    pub fn index(self) -> u8 {
        self as u8
    }

    pub fn of(date: NaiveDate) -> Self {
        Self::ALL[date.weekday().num_days_from_sunday() as usize]
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Sunday => "Sunday",
            Self::Monday => "Monday",
            Self::Tuesday => "Tuesday",
            Self::Wednesday => "Wednesday",
            Self::Thursday => "Thursday",
            Self::Friday => "Friday",
            Self::Saturday => "Saturday",
        }
    }
}

impl fmt::Display for DayOfWeek {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Accepts `0`-`6`, full English names and three-letter abbreviations.
impl FromStr for DayOfWeek {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self> {
        let trimmed = s.trim();
        if let Ok(index) = trimmed.parse::<u8>() {
            return Self::from_index(index);
        }
        let lower = trimmed.to_ascii_lowercase();
        Self::ALL
            .into_iter()
            .find(|day| {
                let name = day.name().to_ascii_lowercase();
                lower == name || (lower.len() == 3 && name.starts_with(&lower))
            })
            .ok_or_else(|| AppError::invalid(format!("'{s}' is not a day of the week")))
    }
}

impl Serialize for DayOfWeek {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_u8(self.index())
    }
}

impl<'de> Deserialize<'de> for DayOfWeek {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Index(u8),
            Name(String),
        }

        let parsed = match Raw::deserialize(deserializer)? {
            Raw::Index(index) => Self::from_index(index),
            Raw::Name(name) => name.parse(),
        };
        parsed.map_err(serde::de::Error::custom)
    }
}

/// Half-open interval `[start, end)` within one day.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TimeRange {
    pub start: TimeOfDay,
    pub end: TimeOfDay,
}

impl TimeRange {
    pub fn new(start: TimeOfDay, end: TimeOfDay) -> Result<Self> {
        if start >= end {
            return Err(AppError::invalid(format!("start {start} must be before end {end}")));
        }
        Ok(Self { start, end })
    }

    /// A range of `minutes` starting at `start`, if it ends by midnight.
    pub fn starting_at(start: TimeOfDay, minutes: u32) -> Result<Self> {
        let end = start
            .checked_add_minutes(minutes)
            .ok_or_else(|| AppError::invalid(format!("{minutes} minutes from {start} runs past midnight")))?;
        Self::new(start, end)
    }

    /// `[a,b)` and `[c,d)` overlap iff `a < d && c < b`.
    pub fn overlaps(&self, other: &TimeRange) -> bool {
        self.start < other.end && other.start < self.end
    }

    pub fn contains(&self, other: &TimeRange) -> bool {
        self.start <= other.start && other.end <= self.end
    }

    pub fn duration_minutes(&self) -> u32 {
        self.end.minutes_since_midnight() - self.start.minutes_since_midnight()
    }
}

impl fmt::Display for TimeRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.start, self.end)
    }
}

/// Union of ranges: sorted, with overlapping ranges coalesced. Ranges that
/// only touch stay separate.
pub fn merge_ranges(mut ranges: Vec<TimeRange>) -> Vec<TimeRange> {
    ranges.sort_by_key(|r| (r.start, r.end));
    let mut merged: Vec<TimeRange> = Vec::with_capacity(ranges.len());
    for range in ranges {
        match merged.last_mut() {
            Some(last) if range.start < last.end => last.end = last.end.max(range.end),
            _ => merged.push(range),
        }
    }
    merged
}

/// Parses a concrete calendar day written as `YYYY-MM-DD`.
pub fn parse_calendar_date(raw: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d")
        .map_err(|_| AppError::invalid(format!("'{raw}' is not a valid YYYY-MM-DD date")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn t(raw: &str) -> TimeOfDay {
        TimeOfDay::parse(raw).unwrap()
    }

    fn range(a: &str, b: &str) -> TimeRange {
        TimeRange::new(t(a), t(b)).unwrap()
    }

    #[test]
    fn parses_strict_hh_mm() {
        assert_eq!(t("08:30").minutes_since_midnight(), 510);
        assert_eq!(t("24:00"), TimeOfDay::END_OF_DAY);
        for bad in ["8:30", "08:60", "25:00", "24:01", "0830", "08:3a", " 08:30", ""] {
            assert!(TimeOfDay::parse(bad).is_err(), "{bad} should be rejected");
        }
    }

    #[test]
    fn displays_zero_padded() {
        assert_eq!(t("07:05").to_string(), "07:05");
        assert_eq!(TimeOfDay::END_OF_DAY.to_string(), "24:00");
    }

    #[test]
    fn ceil_rounds_partial_minutes_up() {
        let exact = NaiveTime::from_hms_opt(9, 15, 0).unwrap();
        let partial = NaiveTime::from_hms_opt(9, 15, 1).unwrap();
        assert_eq!(TimeOfDay::ceil_from(exact), t("09:15"));
        assert_eq!(TimeOfDay::ceil_from(partial), t("09:16"));
    }

    #[test]
    fn day_of_week_from_date_and_names() {
        let monday = NaiveDate::from_ymd_opt(2026, 10, 19).unwrap();
        assert_eq!(DayOfWeek::of(monday), DayOfWeek::Monday);
        assert_eq!("1".parse::<DayOfWeek>().unwrap(), DayOfWeek::Monday);
        assert_eq!("saturday".parse::<DayOfWeek>().unwrap(), DayOfWeek::Saturday);
        assert_eq!("Wed".parse::<DayOfWeek>().unwrap(), DayOfWeek::Wednesday);
        assert!("7".parse::<DayOfWeek>().is_err());
        assert!("Funday".parse::<DayOfWeek>().is_err());
    }

    #[test]
    fn day_of_week_serde_accepts_index_or_name() {
        let by_index: DayOfWeek = serde_json::from_str("2").unwrap();
        let by_name: DayOfWeek = serde_json::from_str("\"Tuesday\"").unwrap();
        assert_eq!(by_index, by_name);
        assert_eq!(serde_json::to_string(&by_index).unwrap(), "2");
    }

    #[test]
    fn range_requires_start_before_end() {
        assert!(TimeRange::new(t("09:00"), t("09:00")).is_err());
        assert!(TimeRange::new(t("10:00"), t("09:00")).is_err());
        assert!(TimeRange::starting_at(t("23:45"), 30).is_err());
    }

    #[test]
    fn half_open_overlap() {
        assert!(range("08:00", "08:30").overlaps(&range("08:15", "08:45")));
        assert!(!range("08:00", "08:30").overlaps(&range("08:30", "09:00")));
        assert!(range("08:00", "10:00").overlaps(&range("08:30", "09:00")));
    }

    #[test]
    fn merge_coalesces_overlapping_only() {
        let merged = merge_ranges(vec![
            range("13:00", "15:00"),
            range("08:00", "10:00"),
            range("09:30", "11:00"),
            range("11:00", "12:00"),
        ]);
        assert_eq!(
            merged,
            vec![range("08:00", "11:00"), range("11:00", "12:00"), range("13:00", "15:00")]
        );
    }

    #[test]
    fn calendar_dates_are_validated() {
        assert_eq!(
            parse_calendar_date("2026-10-19").unwrap(),
            NaiveDate::from_ymd_opt(2026, 10, 19).unwrap()
        );
        assert!(parse_calendar_date("2026-02-30").is_err());
        assert!(parse_calendar_date("19/10/2026").is_err());
        assert!(parse_calendar_date("next monday").is_err());
    }

    proptest! {
        #[test]
        fn prop_merged_ranges_are_disjoint_and_cover_inputs(
            raw in proptest::collection::vec((0u32..1400, 1u32..120), 0..12)
        ) {
            let ranges: Vec<TimeRange> = raw
                .into_iter()
                .filter_map(|(start, len)| {
                    let start = TimeOfDay::from_minutes(start).ok()?;
                    TimeRange::starting_at(start, len).ok()
                })
                .collect();
            let merged = merge_ranges(ranges.clone());
            for pair in merged.windows(2) {
                prop_assert!(pair[0].end <= pair[1].start);
            }
            for r in &ranges {
                prop_assert!(merged.iter().any(|m| m.contains(r)));
            }
        }
    }
}
