//! Informational conditions on an update. Never block the operation.

use chrono::{DateTime, Datelike, FixedOffset, Timelike, Utc, Weekday};
use serde::Serialize;

pub const WORKDAY_START_HOUR: u32 = 9;
pub const WORKDAY_END_HOUR: u32 = 18;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Advisory {
    /// Update recorded on a Saturday or Sunday.
    Weekend,
    /// Update recorded before 09:00 or from 18:00 local time.
    OutsideWorkingHours,
}

/// Advisories for an update made at `now`, judged in the site's local offset.
pub fn advisories_at(now: DateTime<Utc>, local_offset: FixedOffset) -> Vec<Advisory> {
    let local = now.with_timezone(&local_offset);
    let mut advisories = Vec::new();
    if matches!(local.weekday(), Weekday::Sat | Weekday::Sun) {
        advisories.push(Advisory::Weekend);
    }
    if local.hour() < WORKDAY_START_HOUR || local.hour() >= WORKDAY_END_HOUR {
        advisories.push(Advisory::OutsideWorkingHours);
    }
    advisories
}
