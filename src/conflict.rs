use chrono::{DateTime, Duration, Local, NaiveDate, NaiveDateTime, TimeZone, Utc};
use sqlx::SqlitePool;

use crate::error::ScheduleError;
use crate::models::{TimeBlockRow, STATUS_SCHEDULED};

/// Symmetric cushion applied to appointment-vs-appointment overlap checks,
/// so back-to-back bookings keep a gap against overruns.
pub const BUFFER_MINUTES: i64 = 5;

/// A booking being checked for legality. `end` is already resolved (explicit
/// or start + service duration) by the time validation runs.
#[derive(Debug, Clone)]
pub struct Candidate<'a> {
    pub barber_id: &'a str,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub status: &'a str,
}

/// Buffered overlap between a candidate interval and another scheduled
/// appointment: `other.start < cand.end + 5m && other.end > cand.start - 5m`.
pub fn buffered_overlap(
    cand_start: DateTime<Utc>,
    cand_end: DateTime<Utc>,
    other_start: DateTime<Utc>,
    other_end: DateTime<Utc>,
) -> bool {
    let buf = Duration::minutes(BUFFER_MINUTES);
    other_start < cand_end + buf && other_end > cand_start - buf
}

/// Maps a partial block's time-of-day pair onto `day`. A partial block with
/// missing or inverted times is malformed data and must not silently pass as
/// "no conflict".
pub fn partial_block_interval(
    block: &TimeBlockRow,
    day: NaiveDate,
) -> Result<(NaiveDateTime, NaiveDateTime), ScheduleError> {
    let (start, end) = match (block.start_time, block.end_time) {
        (Some(start), Some(end)) if start < end => (start, end),
        _ => {
            return Err(ScheduleError::Internal(format!(
                "time block {} has invalid bounds",
                block.id
            )))
        }
    };
    Ok((day.and_time(start), day.and_time(end)))
}

/// Strict (zero-buffer) intersection between a partial block and the
/// candidate's local interval. Blocks are hard boundaries; only the
/// appointment-vs-appointment rule carries the 5-minute cushion.
pub fn block_conflicts(
    block: &TimeBlockRow,
    day: NaiveDate,
    cand_start_local: NaiveDateTime,
    cand_end_local: NaiveDateTime,
) -> Result<bool, ScheduleError> {
    if block.full_day {
        return Ok(true);
    }
    let (block_start, block_end) = partial_block_interval(block, day)?;
    Ok(block_start < cand_end_local && block_end > cand_start_local)
}

/// Checks a candidate against the barber's existing scheduled appointments
/// and declared unavailability. Done/cancelled candidates are historical or
/// withdrawn and bypass the check entirely.
///
/// Callers on the write path must hold the barber's booking lock across this
/// call and the subsequent insert/update.
pub async fn validate(
    pool: &SqlitePool,
    candidate: &Candidate<'_>,
    exclude_id: Option<&str>,
) -> Result<(), ScheduleError> {
    if candidate.status != STATUS_SCHEDULED {
        return Ok(());
    }
    if candidate.end <= candidate.start {
        return Err(ScheduleError::InvalidInput(
            "appointment end must be after its start".to_string(),
        ));
    }

    let others: Vec<(DateTime<Utc>, DateTime<Utc>)> = sqlx::query_as(
        r#"SELECT start_datetime, end_datetime FROM appointments
           WHERE barber_id = ? AND status = ? AND id != ?"#,
    )
    .bind(candidate.barber_id)
    .bind(STATUS_SCHEDULED)
    .bind(exclude_id.unwrap_or(""))
    .fetch_all(pool)
    .await?;

    for (other_start, other_end) in others {
        if buffered_overlap(candidate.start, candidate.end, other_start, other_end) {
            return Err(ScheduleError::Conflict(
                "barber already has an appointment in this interval".to_string(),
            ));
        }
    }

    let start_local = candidate.start.with_timezone(&Local).naive_local();
    let end_local = candidate.end.with_timezone(&Local).naive_local();
    let day = start_local.date();

    let blocks: Vec<TimeBlockRow> = sqlx::query_as(
        r#"SELECT id, barber_id, date, start_time, end_time, full_day, reason
           FROM time_blocks WHERE barber_id = ? AND date = ?"#,
    )
    .bind(candidate.barber_id)
    .bind(day)
    .fetch_all(pool)
    .await?;

    for block in &blocks {
        if block_conflicts(block, day, start_local, end_local)? {
            let reason = if block.full_day {
                "barber is unavailable for the whole day"
            } else {
                "interval is blocked by the barber"
            };
            return Err(ScheduleError::Conflict(reason.to_string()));
        }
    }

    Ok(())
}

/// Converts a local wall-clock instant to UTC, rejecting DST gaps instead of
/// guessing.
pub fn local_to_utc(naive: NaiveDateTime) -> Result<DateTime<Utc>, ScheduleError> {
    Local
        .from_local_datetime(&naive)
        .earliest()
        .map(|dt| dt.with_timezone(&Utc))
        .ok_or_else(|| ScheduleError::InvalidInput(format!("invalid local time {naive}")))
}
