//! Schedule expressions.
//!
//! Only a small fixed vocabulary is understood (case-insensitive, trimmed):
//!
//! ```text
//! manual                 -> Manual
//! daily@HH:MM            -> Daily { hour, minute }
//! interval@N             -> Interval { minutes: N }
//! weekly@DDD:HH:MM       -> Weekly { weekday: first three letters of DDD, hour, minute }
//! ```
//!
//! Daily and weekly times are wall-clock times in the zone of the `DateTime`
//! passed to [`ScheduleSpec::next_after`].

use core::fmt;
use core::str::FromStr;

use chrono::{DateTime, Datelike, Duration, NaiveDate, TimeZone, Weekday};

use crate::error::ScheduleParseError;

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum ScheduleSpec {
    Manual,
    Daily { hour: u32, minute: u32 },
    Interval { minutes: u32 },
    Weekly { weekday: Weekday, hour: u32, minute: u32 },
}

impl ScheduleSpec {
    pub fn is_manual(&self) -> bool {
        matches!(self, ScheduleSpec::Manual)
    }

    /// Next firing once the firing planned for `scheduled` has run at `now`.
    ///
    /// Intervals stay on the grid anchored at `scheduled`, so a late tick
    /// does not push later firings back. Wall-clock schedules are simply the
    /// next occurrence after `now`.
    pub fn next_after_firing<Tz: TimeZone>(
        &self,
        scheduled: &DateTime<Tz>,
        now: &DateTime<Tz>,
    ) -> Option<DateTime<Tz>> {
        match *self {
            ScheduleSpec::Interval { minutes } if minutes > 0 => {
                let step = Duration::minutes(i64::from(minutes));
                let behind = (now.clone() - scheduled.clone()).num_milliseconds().max(0);
                let steps = i32::try_from(behind / step.num_milliseconds() + 1).ok();
                steps
                    .and_then(|n| step.checked_mul(n))
                    .and_then(|offset| scheduled.clone().checked_add_signed(offset))
                    .or_else(|| self.next_after(now))
            }
            _ => self.next_after(now),
        }
    }

    /// First firing strictly after `after`, or `None` for manual schedules.
    pub fn next_after<Tz: TimeZone>(&self, after: &DateTime<Tz>) -> Option<DateTime<Tz>> {
        match *self {
            ScheduleSpec::Manual => None,
            ScheduleSpec::Interval { minutes } => {
                Some(after.clone() + Duration::minutes(i64::from(minutes)))
            }
            ScheduleSpec::Daily { hour, minute } => {
                next_wall_clock(after, 3, |_| true, hour, minute)
            }
            ScheduleSpec::Weekly {
                weekday,
                hour,
                minute,
            } => next_wall_clock(after, 15, |d| d.weekday() == weekday, hour, minute),
        }
    }
}

/// Earliest `hour:minute` on a day accepted by `day_matches`, scanning forward
/// from the day of `after`. Days where that wall-clock time does not exist
/// (DST gaps) are skipped.
fn next_wall_clock<Tz, F>(
    after: &DateTime<Tz>,
    horizon_days: usize,
    day_matches: F,
    hour: u32,
    minute: u32,
) -> Option<DateTime<Tz>>
where
    Tz: TimeZone,
    F: Fn(NaiveDate) -> bool,
{
    let tz = after.timezone();
    let start = after.date_naive();
    start
        .iter_days()
        .take(horizon_days)
        .filter(|d| day_matches(*d))
        .filter_map(|d| d.and_hms_opt(hour, minute, 0))
        .filter_map(|naive| tz.from_local_datetime(&naive).earliest())
        .find(|candidate| candidate > after)
}

impl FromStr for ScheduleSpec {
    type Err = ScheduleParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase();
        if normalized == "manual" {
            return Ok(ScheduleSpec::Manual);
        }

        let Some((kind, arg)) = normalized.split_once('@') else {
            return Err(ScheduleParseError::Unrecognized(s.trim().to_string()));
        };

        match kind {
            "daily" => {
                let (hour, minute) = parse_time(arg)?;
                Ok(ScheduleSpec::Daily { hour, minute })
            }
            "interval" => {
                let minutes = arg
                    .trim()
                    .parse::<u32>()
                    .ok()
                    .filter(|m| *m > 0)
                    .ok_or_else(|| ScheduleParseError::InvalidInterval(arg.to_string()))?;
                Ok(ScheduleSpec::Interval { minutes })
            }
            "weekly" => {
                let (day, time) = arg
                    .split_once(':')
                    .ok_or_else(|| ScheduleParseError::InvalidTime(arg.to_string()))?;
                let weekday = parse_weekday(day)?;
                let (hour, minute) = parse_time(time)?;
                Ok(ScheduleSpec::Weekly {
                    weekday,
                    hour,
                    minute,
                })
            }
            _ => Err(ScheduleParseError::Unrecognized(s.trim().to_string())),
        }
    }
}

fn parse_time(raw: &str) -> Result<(u32, u32), ScheduleParseError> {
    let invalid = || ScheduleParseError::InvalidTime(raw.to_string());
    let (h, m) = raw.split_once(':').ok_or_else(invalid)?;
    let hour = h.trim().parse::<u32>().map_err(|_| invalid())?;
    let minute = m.trim().parse::<u32>().map_err(|_| invalid())?;
    if hour > 23 || minute > 59 {
        return Err(invalid());
    }
    Ok((hour, minute))
}

fn parse_weekday(raw: &str) -> Result<Weekday, ScheduleParseError> {
    let abbrev = raw.trim().get(..3).unwrap_or_default();
    let weekday = match abbrev {
        "mon" => Weekday::Mon,
        "tue" => Weekday::Tue,
        "wed" => Weekday::Wed,
        "thu" => Weekday::Thu,
        "fri" => Weekday::Fri,
        "sat" => Weekday::Sat,
        "sun" => Weekday::Sun,
        _ => return Err(ScheduleParseError::InvalidWeekday(raw.to_string())),
    };
    Ok(weekday)
}

/// Lowercase three-letter weekday, as written in schedule expressions.
pub fn weekday_abbrev(weekday: Weekday) -> &'static str {
    match weekday {
        Weekday::Mon => "mon",
        Weekday::Tue => "tue",
        Weekday::Wed => "wed",
        Weekday::Thu => "thu",
        Weekday::Fri => "fri",
        Weekday::Sat => "sat",
        Weekday::Sun => "sun",
    }
}

impl fmt::Display for ScheduleSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScheduleSpec::Manual => f.write_str("manual"),
            ScheduleSpec::Daily { hour, minute } => write!(f, "daily@{hour:02}:{minute:02}"),
            ScheduleSpec::Interval { minutes } => write!(f, "interval@{minutes}"),
            ScheduleSpec::Weekly {
                weekday,
                hour,
                minute,
            } => write!(f, "weekly@{}:{hour:02}:{minute:02}", weekday_abbrev(*weekday)),
        }
    }
}
