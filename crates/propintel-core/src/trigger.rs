//! Weekly wall-clock trigger rule.
//!
//! The rule is a weekday, a time of day and a fixed UTC offset. Weekdays are
//! accepted by name only: numeric day-of-week indices mean Sunday=0 in some
//! cron dialects and Monday=0 in others, so `"0"` is rejected rather than
//! guessed. The offset is fixed (no DST), so the same rule always fires at the
//! same UTC instant of the week.

use std::fmt;

use chrono::{DateTime, Datelike, FixedOffset, NaiveTime, TimeDelta, TimeZone, Utc, Weekday};
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TriggerError {
    #[error("weekday \"{0}\" must be a name such as SUN or Sunday; numeric indices are ambiguous")]
    NumericWeekday(String),

    #[error("unknown weekday \"{0}\"")]
    UnknownWeekday(String),

    #[error("invalid time of day \"{0}\": expected HH:MM (24h)")]
    InvalidTime(String),

    #[error("invalid UTC offset \"{0}\": expected UTC, Z or ±HH:MM")]
    InvalidOffset(String),
}

/// Fires once a week at `time` on `weekday`, evaluated in `offset`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WeeklyTrigger {
    weekday: Weekday,
    time: NaiveTime,
    offset: FixedOffset,
}

impl WeeklyTrigger {
    #[must_use]
    pub fn new(weekday: Weekday, time: NaiveTime, offset: FixedOffset) -> Self {
        Self {
            weekday,
            time,
            offset,
        }
    }

    /// Builds a trigger from its three textual config values.
    ///
    /// # Errors
    ///
    /// Returns [`TriggerError`] naming the first value that fails to parse.
    pub fn parse(weekday: &str, time: &str, offset: &str) -> Result<Self, TriggerError> {
        Ok(Self::new(
            parse_weekday(weekday)?,
            parse_time(time)?,
            parse_offset(offset)?,
        ))
    }

    #[must_use]
    pub fn weekday(&self) -> Weekday {
        self.weekday
    }

    #[must_use]
    pub fn time(&self) -> NaiveTime {
        self.time
    }

    #[must_use]
    pub fn offset(&self) -> FixedOffset {
        self.offset
    }

    /// Returns the first fire instant strictly after `now`.
    ///
    /// A `now` that lands exactly on a fire instant yields the following week,
    /// so a run that just fired never reports itself as next.
    #[must_use]
    pub fn next_fire_after(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        let local = now.with_timezone(&self.offset);
        let target = i64::from(self.weekday.num_days_from_monday());
        let current = i64::from(local.weekday().num_days_from_monday());
        let days_ahead = (target - current).rem_euclid(7);

        let local_fire = (local.date_naive() + TimeDelta::days(days_ahead)).and_time(self.time);
        let utc_fire = local_fire - TimeDelta::seconds(i64::from(self.offset.local_minus_utc()));
        let candidate = Utc.from_utc_datetime(&utc_fire);

        if candidate > now {
            candidate
        } else {
            candidate + TimeDelta::weeks(1)
        }
    }

    /// Renders the rule as a six-field cron expression with a named weekday,
    /// e.g. `0 0 2 * * SUN`. The expression is meant to be evaluated in
    /// [`Self::offset`].
    #[must_use]
    pub fn cron_expression(&self) -> String {
        use chrono::Timelike;
        format!(
            "0 {} {} * * {}",
            self.time.minute(),
            self.time.hour(),
            weekday_abbrev(self.weekday)
        )
    }
}

impl fmt::Display for WeeklyTrigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:?} {} UTC{}",
            self.weekday,
            self.time.format("%H:%M"),
            self.offset
        )
    }
}

fn weekday_abbrev(day: Weekday) -> &'static str {
    match day {
        Weekday::Mon => "MON",
        Weekday::Tue => "TUE",
        Weekday::Wed => "WED",
        Weekday::Thu => "THU",
        Weekday::Fri => "FRI",
        Weekday::Sat => "SAT",
        Weekday::Sun => "SUN",
    }
}

fn parse_weekday(raw: &str) -> Result<Weekday, TriggerError> {
    let trimmed = raw.trim();
    if !trimmed.is_empty() && trimmed.chars().all(|c| c.is_ascii_digit()) {
        return Err(TriggerError::NumericWeekday(trimmed.to_string()));
    }
    match trimmed.to_ascii_lowercase().as_str() {
        "mon" | "monday" => Ok(Weekday::Mon),
        "tue" | "tuesday" => Ok(Weekday::Tue),
        "wed" | "wednesday" => Ok(Weekday::Wed),
        "thu" | "thursday" => Ok(Weekday::Thu),
        "fri" | "friday" => Ok(Weekday::Fri),
        "sat" | "saturday" => Ok(Weekday::Sat),
        "sun" | "sunday" => Ok(Weekday::Sun),
        _ => Err(TriggerError::UnknownWeekday(trimmed.to_string())),
    }
}

fn parse_time(raw: &str) -> Result<NaiveTime, TriggerError> {
    NaiveTime::parse_from_str(raw.trim(), "%H:%M")
        .map_err(|_| TriggerError::InvalidTime(raw.to_string()))
}

fn parse_offset(raw: &str) -> Result<FixedOffset, TriggerError> {
    let trimmed = raw.trim();
    if trimmed.eq_ignore_ascii_case("utc") || trimmed == "Z" {
        return FixedOffset::east_opt(0).ok_or_else(|| TriggerError::InvalidOffset(raw.to_string()));
    }

    let invalid = || TriggerError::InvalidOffset(raw.to_string());
    let (sign, rest) = match trimmed.as_bytes().first() {
        Some(b'+') => (1, &trimmed[1..]),
        Some(b'-') => (-1, &trimmed[1..]),
        _ => return Err(invalid()),
    };
    let (hours, minutes) = rest.split_once(':').ok_or_else(invalid)?;
    if hours.len() != 2 || minutes.len() != 2 {
        return Err(invalid());
    }
    let hours: i32 = hours.parse().map_err(|_| invalid())?;
    let minutes: i32 = minutes.parse().map_err(|_| invalid())?;
    if hours > 14 || minutes > 59 {
        return Err(invalid());
    }

    FixedOffset::east_opt(sign * (hours * 3600 + minutes * 60)).ok_or_else(invalid)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn utc(s: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(s)
            .expect("valid rfc3339")
            .with_timezone(&Utc)
    }

    fn sunday_2am_utc() -> WeeklyTrigger {
        WeeklyTrigger::parse("SUN", "02:00", "UTC").expect("valid trigger")
    }

    #[test]
    fn friday_afternoon_fires_on_the_upcoming_sunday() {
        // 2026-10-16 is a Friday.
        let next = sunday_2am_utc().next_fire_after(utc("2026-10-16T14:00:00Z"));
        assert_eq!(next, utc("2026-10-18T02:00:00Z"));
        assert_eq!(next.weekday(), Weekday::Sun);
    }

    #[test]
    fn sunday_before_fire_time_fires_same_day() {
        let next = sunday_2am_utc().next_fire_after(utc("2026-10-18T01:59:00Z"));
        assert_eq!(next, utc("2026-10-18T02:00:00Z"));
    }

    #[test]
    fn exact_fire_instant_rolls_to_next_week() {
        let next = sunday_2am_utc().next_fire_after(utc("2026-10-18T02:00:00Z"));
        assert_eq!(next, utc("2026-10-25T02:00:00Z"));
    }

    #[test]
    fn sunday_after_fire_time_rolls_to_next_week() {
        let next = sunday_2am_utc().next_fire_after(utc("2026-10-18T02:00:01Z"));
        assert_eq!(next, utc("2026-10-25T02:00:00Z"));
    }

    #[test]
    fn monday_reference_waits_six_days() {
        let next = sunday_2am_utc().next_fire_after(utc("2026-10-19T00:00:00Z"));
        assert_eq!(next, utc("2026-10-25T02:00:00Z"));
    }

    #[test]
    fn positive_offset_is_applied_before_weekday_matching() {
        // Sunday 02:00 at +05:30 is Saturday 20:30 UTC.
        let trigger = WeeklyTrigger::parse("Sunday", "02:00", "+05:30").expect("valid");
        let next = trigger.next_fire_after(utc("2026-10-16T14:00:00Z"));
        assert_eq!(next, utc("2026-10-17T20:30:00Z"));
    }

    #[test]
    fn negative_offset_can_cross_into_the_next_utc_day() {
        // Sunday 22:00 at -05:00 is Monday 03:00 UTC.
        let trigger = WeeklyTrigger::parse("sun", "22:00", "-05:00").expect("valid");
        let next = trigger.next_fire_after(utc("2026-10-16T14:00:00Z"));
        assert_eq!(next, utc("2026-10-19T03:00:00Z"));
    }

    #[test]
    fn numeric_weekday_is_rejected() {
        assert_eq!(
            WeeklyTrigger::parse("0", "02:00", "UTC"),
            Err(TriggerError::NumericWeekday("0".to_string()))
        );
        assert!(matches!(
            WeeklyTrigger::parse("7", "02:00", "UTC"),
            Err(TriggerError::NumericWeekday(_))
        ));
    }

    #[test]
    fn unknown_weekday_is_rejected() {
        assert!(matches!(
            WeeklyTrigger::parse("Sundae", "02:00", "UTC"),
            Err(TriggerError::UnknownWeekday(_))
        ));
    }

    #[test]
    fn invalid_time_and_offset_are_rejected() {
        assert!(matches!(
            WeeklyTrigger::parse("SUN", "2am", "UTC"),
            Err(TriggerError::InvalidTime(_))
        ));
        assert!(matches!(
            WeeklyTrigger::parse("SUN", "02:00", "IST"),
            Err(TriggerError::InvalidOffset(_))
        ));
        assert!(matches!(
            WeeklyTrigger::parse("SUN", "02:00", "+5:30"),
            Err(TriggerError::InvalidOffset(_))
        ));
    }

    #[test]
    fn cron_expression_uses_named_weekday() {
        assert_eq!(sunday_2am_utc().cron_expression(), "0 0 2 * * SUN");
        let trigger = WeeklyTrigger::parse("Wednesday", "23:45", "UTC").expect("valid");
        assert_eq!(trigger.cron_expression(), "0 45 23 * * WED");
    }

    #[test]
    fn display_names_weekday_time_and_offset() {
        assert_eq!(sunday_2am_utc().to_string(), "Sun 02:00 UTC+00:00");
    }
}
