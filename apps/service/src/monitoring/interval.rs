//! Polling interval descriptions.
//!
//! Intervals are stored the way users typed them: raw seconds, `"30 seconds"`,
//! `"5分钟"` or an additive pair such as `"1 hour 30 minutes"`. Parsing never
//! fails; anything unusable falls back to the leading integer (seconds) or to
//! [`IntervalDescriptor::DEFAULT`].

use std::fmt;
use std::sync::LazyLock;

use regex::Regex;

use super::trigger::Trigger;
use crate::models::RawInterval;

/// `<N> <unit>[s]`, optionally followed by a second clause which is added on
static INTERVAL_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)^(\d+)\s*(second|minute|hour|day|秒|分钟|小时|天)s?(?:\s*(\d+)\s*(second|minute|hour|day|秒|分钟|小时|天)s?)?$",
    )
    .expect("interval pattern is valid")
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IntervalUnit {
    Second,
    Minute,
    Hour,
    Day,
}

impl IntervalUnit {
    pub fn seconds(self) -> u64 {
        match self {
            IntervalUnit::Second => 1,
            IntervalUnit::Minute => 60,
            IntervalUnit::Hour => 3_600,
            IntervalUnit::Day => 86_400,
        }
    }

    /// Map an English or Chinese unit word onto a unit
    fn from_word(word: &str) -> Option<Self> {
        match word.to_lowercase().as_str() {
            "second" | "秒" => Some(IntervalUnit::Second),
            "minute" | "分钟" => Some(IntervalUnit::Minute),
            "hour" | "小时" => Some(IntervalUnit::Hour),
            "day" | "天" => Some(IntervalUnit::Day),
            _ => None,
        }
    }

    fn name(self) -> &'static str {
        match self {
            IntervalUnit::Second => "second",
            IntervalUnit::Minute => "minute",
            IntervalUnit::Hour => "hour",
            IntervalUnit::Day => "day",
        }
    }
}

/// Normalized polling period
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct IntervalDescriptor {
    pub value: u64,
    pub unit: IntervalUnit,
}

impl IntervalDescriptor {
    pub const DEFAULT: Self = Self { value: 60, unit: IntervalUnit::Second };

    pub fn new(value: u64, unit: IntervalUnit) -> Self {
        Self { value, unit }
    }

    pub fn seconds(value: u64) -> Self {
        Self::new(value, IntervalUnit::Second)
    }

    /// Parse a stored interval
    pub fn parse(raw: &RawInterval) -> Self {
        match raw {
            RawInterval::Seconds(seconds) => u64::try_from(*seconds)
                .ok()
                .filter(|s| *s > 0)
                .map_or(Self::DEFAULT, Self::seconds),
            RawInterval::Text(text) => Self::parse_str(text),
        }
    }

    /// Parse a textual interval; see the module docs for accepted forms
    pub fn parse_str(raw: &str) -> Self {
        let raw = raw.trim();

        if let Some(captures) = INTERVAL_PATTERN.captures(raw) {
            let clause = |value: usize, unit: usize| -> Option<(u64, IntervalUnit)> {
                let value = captures.get(value)?.as_str().parse::<u64>().ok()?;
                let unit = IntervalUnit::from_word(captures.get(unit)?.as_str())?;
                Some((value, unit))
            };

            let parsed = match (clause(1, 2), clause(3, 4)) {
                (Some((value, unit)), None) => Some(Self::new(value, unit)),
                (Some((v1, u1)), Some((v2, u2))) => v1
                    .checked_mul(u1.seconds())
                    .zip(v2.checked_mul(u2.seconds()))
                    .and_then(|(a, b)| a.checked_add(b))
                    .map(Self::seconds),
                _ => None,
            };

            return parsed.filter(|d| d.value > 0).unwrap_or(Self::DEFAULT);
        }

        leading_integer(raw).filter(|s| *s > 0).map_or(Self::DEFAULT, Self::seconds)
    }

    pub fn total_seconds(&self) -> u64 {
        self.value.saturating_mul(self.unit.seconds())
    }

    pub fn to_trigger(&self) -> Trigger {
        Trigger::every(*self)
    }
}

impl Default for IntervalDescriptor {
    fn default() -> Self {
        Self::DEFAULT
    }
}

impl fmt::Display for IntervalDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let plural = if self.value == 1 { "" } else { "s" };
        write!(f, "{} {}{}", self.value, self.unit.name(), plural)
    }
}

/// Leading decimal integer of a string, ignoring leading whitespace
fn leading_integer(raw: &str) -> Option<u64> {
    let digits: String = raw.trim_start().chars().take_while(char::is_ascii_digit).collect();
    digits.parse().ok()
}
