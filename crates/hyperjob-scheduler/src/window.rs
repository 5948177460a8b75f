//! Time-window gate: a job may only start while one of its windows is open.

use chrono::{DateTime, Datelike, Days, NaiveTime, TimeZone, Utc, Weekday};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};

use crate::error::{Result, SchedulerError};

/// How far ahead `next_opening` looks. One week plus a day so a window on
/// today's weekday that already started is found again next week.
const LOOKAHEAD_DAYS: u64 = 8;

/// A recurring `[start, end)` time-of-day range on selected weekdays, in
/// its own timezone.
///
/// `end < start` wraps past midnight: the window belongs to the weekday it
/// starts on and also admits the early hours of the next day. `start == end`
/// means the whole day.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeWindow {
    #[serde(with = "hhmm")]
    pub start: NaiveTime,
    #[serde(with = "hhmm")]
    pub end: NaiveTime,
    pub days: Vec<Weekday>,
    pub timezone: Tz,
}

impl TimeWindow {
    pub fn new(
        start: NaiveTime,
        end: NaiveTime,
        days: impl IntoIterator<Item = Weekday>,
        timezone: Tz,
    ) -> Self {
        Self {
            start,
            end,
            days: days.into_iter().collect(),
            timezone,
        }
    }

    /// Build a window from `HH:MM` times, weekday names and an IANA zone.
    pub fn parse(start: &str, end: &str, days: &[&str], timezone: &str) -> Result<Self> {
        let start = parse_hhmm(start)?;
        let end = parse_hhmm(end)?;
        let days = days
            .iter()
            .map(|d| {
                d.parse::<Weekday>()
                    .map_err(|_| SchedulerError::InvalidDefinition(format!("unknown weekday: {d}")))
            })
            .collect::<Result<Vec<_>>>()?;
        let timezone = timezone.parse::<Tz>().map_err(|_| {
            SchedulerError::InvalidDefinition(format!("unknown timezone: {timezone}"))
        })?;
        let window = Self::new(start, end, days, timezone);
        window.validate()?;
        Ok(window)
    }

    pub fn validate(&self) -> Result<()> {
        if self.days.is_empty() {
            return Err(SchedulerError::InvalidDefinition(
                "time window must name at least one weekday".into(),
            ));
        }
        Ok(())
    }

    pub fn contains(&self, now: DateTime<Utc>) -> bool {
        let local = now.with_timezone(&self.timezone);
        let time = local.time();
        let today = local.weekday();

        if self.start == self.end {
            return self.days.contains(&today);
        }
        if self.start < self.end {
            return self.days.contains(&today) && time >= self.start && time < self.end;
        }
        (self.days.contains(&today) && time >= self.start)
            || (self.days.contains(&today.pred()) && time < self.end)
    }

    /// First start of this window strictly after `now`.
    pub fn next_start_after(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let today = now.with_timezone(&self.timezone).date_naive();
        (0..=LOOKAHEAD_DAYS)
            .filter_map(|ahead| today.checked_add_days(Days::new(ahead)))
            .filter(|date| self.days.contains(&date.weekday()))
            .filter_map(|date| {
                // None inside a DST gap; that day's opening is skipped.
                self.timezone
                    .from_local_datetime(&date.and_time(self.start))
                    .earliest()
            })
            .map(|start| start.with_timezone(&Utc))
            .find(|start| *start > now)
    }
}

/// Open when the list is empty or any window contains `now`.
pub fn is_open(windows: &[TimeWindow], now: DateTime<Utc>) -> bool {
    windows.is_empty() || windows.iter().any(|w| w.contains(now))
}

/// Earliest upcoming window start across every window, if any.
pub fn next_opening(windows: &[TimeWindow], now: DateTime<Utc>) -> Option<DateTime<Utc>> {
    windows.iter().filter_map(|w| w.next_start_after(now)).min()
}

fn parse_hhmm(s: &str) -> Result<NaiveTime> {
    NaiveTime::parse_from_str(s, "%H:%M")
        .map_err(|e| SchedulerError::InvalidDefinition(format!("invalid time {s:?}: {e}")))
}

mod hhmm {
    use chrono::NaiveTime;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(t: &NaiveTime, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&t.format("%H:%M").to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<NaiveTime, D::Error> {
        let raw = String::deserialize(d)?;
        NaiveTime::parse_from_str(&raw, "%H:%M").map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(s: &str) -> DateTime<Utc> {
        s.parse().unwrap()
    }

    fn business_hours() -> TimeWindow {
        TimeWindow::parse("09:00", "17:00", &["Mon", "Tue", "Wed", "Thu", "Fri"], "UTC").unwrap()
    }

    #[test]
    fn empty_list_is_always_open() {
        assert!(is_open(&[], at("2026-02-07T20:00:00Z")));
        assert!(is_open(&[], at("2026-02-08T03:17:00Z")));
    }

    #[test]
    fn business_hours_reject_saturday_and_admit_friday() {
        let windows = [business_hours()];
        assert!(!is_open(&windows, at("2026-02-07T20:00:00Z")));
        assert!(is_open(&windows, at("2026-02-06T10:00:00Z")));
    }

    #[test]
    fn end_is_exclusive() {
        let w = business_hours();
        assert!(w.contains(at("2026-02-06T09:00:00Z")));
        assert!(w.contains(at("2026-02-06T16:59:59Z")));
        assert!(!w.contains(at("2026-02-06T17:00:00Z")));
    }

    #[test]
    fn overnight_window_belongs_to_start_day() {
        let w = TimeWindow::parse("22:00", "06:00", &["Fri"], "UTC").unwrap();
        assert!(w.contains(at("2026-02-06T23:30:00Z")));
        // Saturday morning is the tail of Friday's window.
        assert!(w.contains(at("2026-02-07T05:59:00Z")));
        assert!(!w.contains(at("2026-02-07T06:00:00Z")));
        // Friday morning would be Thursday's tail.
        assert!(!w.contains(at("2026-02-06T03:00:00Z")));
    }

    #[test]
    fn each_window_uses_its_own_zone() {
        // 09:00-17:00 in Tokyo is 00:00-08:00 UTC.
        let tokyo = TimeWindow::parse("09:00", "17:00", &["Fri"], "Asia/Tokyo").unwrap();
        let windows = [business_hours(), tokyo];
        assert!(is_open(&windows, at("2026-02-06T02:00:00Z")));
        assert!(is_open(&windows, at("2026-02-06T12:00:00Z")));
        assert!(!is_open(&windows, at("2026-02-06T08:30:00Z")));
    }

    #[test]
    fn equal_start_and_end_is_whole_day() {
        let w = TimeWindow::parse("00:00", "00:00", &["Sun"], "Europe/Berlin").unwrap();
        assert!(w.contains(at("2026-02-08T12:00:00Z")));
        assert!(!w.contains(at("2026-02-09T12:00:00Z")));
    }

    #[test]
    fn next_opening_skips_the_weekend() {
        let next = next_opening(&[business_hours()], at("2026-02-07T20:00:00Z"));
        assert_eq!(next, Some(at("2026-02-09T09:00:00Z")));
    }

    #[test]
    fn next_opening_wraps_a_full_week() {
        let w = TimeWindow::parse("09:00", "10:00", &["Fri"], "UTC").unwrap();
        let next = w.next_start_after(at("2026-02-06T09:30:00Z"));
        assert_eq!(next, Some(at("2026-02-13T09:00:00Z")));
    }

    #[test]
    fn invalid_windows_are_rejected() {
        assert!(TimeWindow::parse("9am", "17:00", &["Mon"], "UTC").is_err());
        assert!(TimeWindow::parse("09:00", "17:00", &["Funday"], "UTC").is_err());
        assert!(TimeWindow::parse("09:00", "17:00", &["Mon"], "Mars/Olympus").is_err());
        assert!(TimeWindow::parse("09:00", "17:00", &[], "UTC").is_err());
    }

    #[test]
    fn serde_uses_hhmm_and_zone_names() {
        let json = serde_json::to_value(business_hours()).unwrap();
        assert_eq!(json["start"], "09:00");
        assert_eq!(json["timezone"], "UTC");
        let back: TimeWindow = serde_json::from_value(json).unwrap();
        assert_eq!(back, business_hours());
    }
}
