use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Days, Local, NaiveTime, TimeZone, Utc};

use super::interval::{IntervalDescriptor, IntervalUnit};
use crate::error::MonitorError;

/// Wall-clock time of the daily aggregate check
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeOfDay {
    pub hour: u32,
    pub minute: u32,
}

impl TimeOfDay {
    pub const DEFAULT: Self = Self { hour: 9, minute: 0 };

    pub fn new(hour: u32, minute: u32) -> Result<Self, MonitorError> {
        if hour > 23 || minute > 59 {
            return Err(MonitorError::InvalidTimeOfDay(format!("{hour}:{minute}")));
        }
        Ok(Self { hour, minute })
    }

    fn naive(self) -> NaiveTime {
        NaiveTime::from_hms_opt(self.hour, self.minute, 0).unwrap_or(NaiveTime::MIN)
    }
}

impl Default for TimeOfDay {
    fn default() -> Self {
        Self::DEFAULT
    }
}

impl FromStr for TimeOfDay {
    type Err = MonitorError;

    /// Parse 24-hour `HH:MM`
    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let invalid = || MonitorError::InvalidTimeOfDay(raw.to_string());

        let (hour, minute) = raw.trim().split_once(':').ok_or_else(invalid)?;
        let hour: u32 = hour.trim().parse().map_err(|_| invalid())?;
        let minute: u32 = minute.trim().parse().map_err(|_| invalid())?;

        Self::new(hour, minute).map_err(|_| invalid())
    }
}

impl fmt::Display for TimeOfDay {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02}:{:02}", self.hour, self.minute)
    }
}

/// When a scheduled job fires
///
/// `Every` fires on epoch-aligned boundaries (UTC): every `step` seconds, every
/// `step` minutes at second 0, every `step` hours at minute 0, every `step` days
/// at midnight. `DailyAt` fires once a day at a local wall-clock time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trigger {
    Every { step: u64, unit: IntervalUnit },
    DailyAt(TimeOfDay),
}

impl Trigger {
    pub fn every(descriptor: IntervalDescriptor) -> Self {
        Trigger::Every { step: descriptor.value.max(1), unit: descriptor.unit }
    }

    pub fn daily_at(time: TimeOfDay) -> Self {
        Trigger::DailyAt(time)
    }

    /// Six-field cron-style rendering, seconds first
    pub fn expression(&self) -> String {
        match self {
            Trigger::Every { step, unit: IntervalUnit::Second } => format!("*/{step} * * * * *"),
            Trigger::Every { step, unit: IntervalUnit::Minute } => format!("0 */{step} * * * *"),
            Trigger::Every { step, unit: IntervalUnit::Hour } => format!("0 0 */{step} * * *"),
            Trigger::Every { step, unit: IntervalUnit::Day } => format!("0 0 0 */{step} * *"),
            Trigger::DailyAt(time) => format!("0 {} {} * * *", time.minute, time.hour),
        }
    }

    /// First firing instant strictly after `now`
    pub fn next_after(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        match self {
            Trigger::Every { step, unit } => {
                let period = i64::try_from(step.saturating_mul(unit.seconds()))
                    .unwrap_or(i64::MAX)
                    .max(1);
                let next = now
                    .timestamp()
                    .div_euclid(period)
                    .checked_add(1)
                    .and_then(|slot| slot.checked_mul(period));

                next.and_then(|secs| DateTime::from_timestamp(secs, 0))
                    .unwrap_or(DateTime::<Utc>::MAX_UTC)
            }
            Trigger::DailyAt(time) => {
                let today = now.with_timezone(&Local).date_naive();
                // Two days of lookahead covers a skipped local time on a DST change
                (0..=2)
                    .filter_map(|offset| today.checked_add_days(Days::new(offset)))
                    .filter_map(|day| Local.from_local_datetime(&day.and_time(time.naive())).earliest())
                    .map(|at| at.with_timezone(&Utc))
                    .find(|at| *at > now)
                    .unwrap_or_else(|| now + chrono::Duration::days(1))
            }
        }
    }
}

impl fmt::Display for Trigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.expression())
    }
}
