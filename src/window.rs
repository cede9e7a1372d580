/// Daily charging windows
/// Resolves the next start and stop instants from time-of-day pairs that repeat every day

use chrono::{DateTime, Days, LocalResult, NaiveDateTime, NaiveTime, Offset, TimeDelta, TimeZone, Timelike};
use serde::Deserialize;
use std::fmt;

use crate::error::{Error, Result};

/// Parse "HH:MM" or "HH:MM:SS" into a time of day
pub fn parse_time_of_day(value: &str) -> Result<NaiveTime> {
    let trimmed = value.trim();
    NaiveTime::parse_from_str(trimmed, "%H:%M:%S")
        .or_else(|_| NaiveTime::parse_from_str(trimmed, "%H:%M"))
        .map_err(|_| {
            Error::config(format!(
                "invalid time of day '{}', expected HH:MM or HH:MM:SS",
                value
            ))
        })
}

/// One daily charging period. `stop` earlier than `start` crosses midnight.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(try_from = "RawWindow")]
pub struct TimeWindow {
    pub start: NaiveTime,
    pub stop: NaiveTime,
}

#[derive(Deserialize)]
struct RawWindow {
    start: String,
    stop: String,
}

impl TryFrom<RawWindow> for TimeWindow {
    type Error = Error;

    fn try_from(raw: RawWindow) -> Result<Self> {
        TimeWindow::parse(&raw.start, &raw.stop)
    }
}

impl TimeWindow {
    pub fn new(start: NaiveTime, stop: NaiveTime) -> Self {
        Self { start, stop }
    }

    pub fn parse(start: &str, stop: &str) -> Result<Self> {
        Ok(Self {
            start: parse_time_of_day(start)?,
            stop: parse_time_of_day(stop)?,
        })
    }

    pub fn crosses_midnight(&self) -> bool {
        self.stop < self.start
    }

    /// Whether a wall-clock time falls inside the window (start inclusive, stop exclusive)
    pub fn contains(&self, time: NaiveTime) -> bool {
        if self.start <= self.stop {
            time >= self.start && time < self.stop
        } else {
            time >= self.start || time < self.stop
        }
    }
}

fn format_time_of_day(time: NaiveTime) -> String {
    if time.second() == 0 {
        time.format("%H:%M").to_string()
    } else {
        time.format("%H:%M:%S").to_string()
    }
}

impl fmt::Display for TimeWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}-{}",
            format_time_of_day(self.start),
            format_time_of_day(self.stop)
        )
    }
}

/// All instants a local wall-clock time maps to, earliest first.
/// A time skipped by a DST gap is shifted forward by the length of the gap.
fn local_instants<Tz: TimeZone>(tz: &Tz, local: NaiveDateTime) -> Vec<DateTime<Tz>> {
    match tz.from_local_datetime(&local) {
        LocalResult::Single(dt) => vec![dt],
        LocalResult::Ambiguous(first, second) => vec![first, second],
        LocalResult::None => {
            // Use the offset in force before the gap
            let before = local - TimeDelta::hours(6);
            match tz.offset_from_local_datetime(&before).earliest() {
                Some(offset) => {
                    let utc = local - TimeDelta::seconds(offset.fix().local_minus_utc() as i64);
                    vec![tz.from_utc_datetime(&utc)]
                }
                None => vec![tz.from_utc_datetime(&local)],
            }
        }
    }
}

/// Next instant at or after `now` whose wall-clock time is `time_of_day`.
///
/// Today's occurrence is used when it has not passed yet, otherwise tomorrow's.
/// Never looks further than one day ahead since windows repeat daily.
pub fn next_occurrence<Tz: TimeZone>(now: &DateTime<Tz>, time_of_day: NaiveTime) -> DateTime<Tz> {
    let tz = now.timezone();
    let today = now.naive_local().date();

    (0..2)
        .filter_map(|offset| today.checked_add_days(Days::new(offset)))
        .flat_map(|day| local_instants(&tz, day.and_time(time_of_day)))
        .find(|instant| instant >= now)
        .unwrap_or_else(|| now.clone() + TimeDelta::days(1))
}

/// Earliest upcoming start across all windows
pub fn next_start<Tz: TimeZone>(now: &DateTime<Tz>, windows: &[TimeWindow]) -> Result<DateTime<Tz>> {
    earliest(now, windows.iter().map(|w| w.start))
}

/// Earliest upcoming stop across all windows
pub fn next_stop<Tz: TimeZone>(now: &DateTime<Tz>, windows: &[TimeWindow]) -> Result<DateTime<Tz>> {
    earliest(now, windows.iter().map(|w| w.stop))
}

fn earliest<Tz, I>(now: &DateTime<Tz>, times: I) -> Result<DateTime<Tz>>
where
    Tz: TimeZone,
    I: Iterator<Item = NaiveTime>,
{
    times
        .map(|t| next_occurrence(now, t))
        .min()
        .ok_or_else(|| Error::config("no charging windows defined"))
}
