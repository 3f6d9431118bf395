use chrono::{DateTime, NaiveDateTime, NaiveTime, Utc};

use crate::conflict::local_to_utc;
use crate::error::ScheduleError;

pub mod public;
pub mod staff;

/// Accepts an RFC3339 instant (with offset) or a naive local datetime.
pub(crate) fn parse_instant(raw: &str) -> Result<DateTime<Utc>, ScheduleError> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Ok(dt.with_timezone(&Utc));
    }
    let naive = NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S")
        .or_else(|_| NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M"))
        .map_err(|_| ScheduleError::InvalidInput(format!("invalid datetime '{raw}'")))?;
    local_to_utc(naive)
}

/// "HH:MM" or "HH:MM:SS".
pub(crate) fn parse_time_of_day(raw: &str) -> Result<NaiveTime, ScheduleError> {
    NaiveTime::parse_from_str(raw, "%H:%M")
        .or_else(|_| NaiveTime::parse_from_str(raw, "%H:%M:%S"))
        .map_err(|_| ScheduleError::InvalidInput(format!("invalid time '{raw}'")))
}
