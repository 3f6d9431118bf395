use chrono::{DateTime, Duration, Local, NaiveDate, NaiveDateTime, Timelike, Utc};
use sqlx::SqlitePool;

use crate::conflict::{self, local_to_utc, BUFFER_MINUTES};
use crate::error::ScheduleError;
use crate::models::{TimeBlockRow, STATUS_CANCELLED};

/// Daily working window, local time.
pub const OPEN_HOUR: u32 = 8;
pub const CLOSE_HOUR: u32 = 20;
/// Candidate slot granularity.
pub const STEP_MINUTES: i64 = 10;

/// Walks the working window in 10-minute steps and keeps every start whose
/// `[t, t+duration)` clears all occupied intervals under the 5-minute buffer
/// rule. Pure over its inputs: calling it again with the same state yields
/// the same labels.
pub fn free_slots(
    day: NaiveDate,
    duration_minutes: i64,
    now_local: NaiveDateTime,
    occupied: &[(NaiveDateTime, NaiveDateTime)],
) -> Vec<String> {
    let mut window_start = match day.and_hms_opt(OPEN_HOUR, 0, 0) {
        Some(t) => t,
        None => return Vec::new(),
    };
    let window_end = match day.and_hms_opt(CLOSE_HOUR, 0, 0) {
        Some(t) => t,
        None => return Vec::new(),
    };

    // Never offer past slots today: round now up to the next 10-minute mark.
    if now_local.date() == day {
        let rounded = round_up_to_step(now_local);
        if rounded > window_start {
            window_start = rounded;
        }
    }

    let step = Duration::minutes(STEP_MINUTES);
    let duration = Duration::minutes(duration_minutes);
    let buf = Duration::minutes(BUFFER_MINUTES);

    let mut slots = Vec::new();
    let mut cur = window_start;
    while cur + duration <= window_end {
        let end = cur + duration;
        let conflict = occupied
            .iter()
            .any(|(busy_start, busy_end)| *busy_start - buf < end && *busy_end + buf > cur);
        if !conflict {
            slots.push(cur.format("%H:%M").to_string());
        }
        cur += step;
    }
    slots
}

fn round_up_to_step(t: NaiveDateTime) -> NaiveDateTime {
    let minutes = (t.minute() as i64 + STEP_MINUTES - 1) / STEP_MINUTES * STEP_MINUTES;
    t.date().and_hms_opt(t.hour(), 0, 0).unwrap_or(t) + Duration::minutes(minutes)
}

/// Loads the barber's calendar for `day` and produces the available "HH:MM"
/// start labels for a service of the given duration. A full-day block empties
/// the day outright.
pub async fn find_slots(
    pool: &SqlitePool,
    barber_id: &str,
    day: NaiveDate,
    duration_minutes: i64,
) -> Result<Vec<String>, ScheduleError> {
    if duration_minutes <= 0 {
        return Err(ScheduleError::InvalidInput(
            "service duration is required".to_string(),
        ));
    }

    let blocks: Vec<TimeBlockRow> = sqlx::query_as(
        r#"SELECT id, barber_id, date, start_time, end_time, full_day, reason
           FROM time_blocks WHERE barber_id = ? AND date = ?"#,
    )
    .bind(barber_id)
    .bind(day)
    .fetch_all(pool)
    .await?;

    if blocks.iter().any(|b| b.full_day) {
        return Ok(Vec::new());
    }

    let window_start = local_to_utc(
        day.and_hms_opt(OPEN_HOUR, 0, 0)
            .ok_or_else(|| ScheduleError::Internal("bad window start".to_string()))?,
    )?;
    let window_end = local_to_utc(
        day.and_hms_opt(CLOSE_HOUR, 0, 0)
            .ok_or_else(|| ScheduleError::Internal("bad window end".to_string()))?,
    )?;

    // Everything not cancelled occupies its interval, including done rows.
    let existing: Vec<(DateTime<Utc>, DateTime<Utc>)> = sqlx::query_as(
        r#"SELECT start_datetime, end_datetime FROM appointments
           WHERE barber_id = ? AND status != ? AND start_datetime < ? AND end_datetime > ?"#,
    )
    .bind(barber_id)
    .bind(STATUS_CANCELLED)
    .bind(window_end)
    .bind(window_start)
    .fetch_all(pool)
    .await?;

    let mut occupied: Vec<(NaiveDateTime, NaiveDateTime)> = existing
        .into_iter()
        .map(|(s, e)| {
            (
                s.with_timezone(&Local).naive_local(),
                e.with_timezone(&Local).naive_local(),
            )
        })
        .collect();
    for block in &blocks {
        occupied.push(conflict::partial_block_interval(block, day)?);
    }

    let now_local = Local::now().naive_local();
    Ok(free_slots(day, duration_minutes, now_local, &occupied))
}
