use chrono::{DateTime, Duration, Local, Utc};
use serde_json::{json, Value};
use sqlx::SqlitePool;

use crate::auth::new_id;
use crate::db;
use crate::error::ScheduleError;
use crate::models::{AppointmentRow, STATUS_SCHEDULED};
use crate::push::{self, Delivery};

/// Reminder windows are 1-minute buckets, so a slower tick can skip an
/// appointment's window entirely. Best effort, not a delivery guarantee.
pub const CYCLE_SECONDS: u64 = 60;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReminderKind {
    Confirmation,
    Reminder30,
    Reminder15,
    Reminder0,
}

impl ReminderKind {
    pub const ALL: [ReminderKind; 4] = [
        ReminderKind::Confirmation,
        ReminderKind::Reminder30,
        ReminderKind::Reminder15,
        ReminderKind::Reminder0,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            ReminderKind::Confirmation => "confirmation",
            ReminderKind::Reminder30 => "reminder_30",
            ReminderKind::Reminder15 => "reminder_15",
            ReminderKind::Reminder0 => "reminder_0",
        }
    }
}

/// One scheduler pass at instant `now`. Scans the four windows, fans out to
/// every subscribed device, and writes a ledger row per (appointment, kind)
/// once at least one delivery succeeded. Always returns a count; failures
/// inside a window are logged, never propagated to the invoker.
pub async fn run_cycle<D: Delivery>(pool: &SqlitePool, delivery: &D, now: DateTime<Utc>) -> usize {
    let mut sent = 0;
    for kind in ReminderKind::ALL {
        match process_kind(pool, delivery, now, kind).await {
            Ok(count) => sent += count,
            Err(err) => log::error!("notification scan failed for {}: {err}", kind.as_str()),
        }
    }
    if sent > 0 {
        log::info!("notifications sent: {sent}");
    }
    sent
}

/// Periodic driver, spawned at startup.
pub async fn run_loop<D: Delivery>(pool: SqlitePool, delivery: D) {
    let mut ticker = tokio::time::interval(std::time::Duration::from_secs(CYCLE_SECONDS));
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        ticker.tick().await;
        run_cycle(&pool, &delivery, Utc::now()).await;
    }
}

async fn process_kind<D: Delivery>(
    pool: &SqlitePool,
    delivery: &D,
    now: DateTime<Utc>,
    kind: ReminderKind,
) -> Result<usize, ScheduleError> {
    let due = due_appointments(pool, now, kind).await?;
    let mut sent = 0;
    for appt in due {
        if ledgered(pool, &appt.id, kind).await? {
            continue;
        }
        let subs = push::subscriptions_for(pool, &appt.id).await?;
        if subs.is_empty() {
            // No ledger row either: the appointment stays eligible while it
            // still matches the window, in case a device subscribes late.
            continue;
        }

        let (title, body, data) = compose(kind, &appt);
        let mut any_sent = false;
        for sub in &subs {
            if delivery.deliver(sub, &title, &body, &data).await {
                any_sent = true;
            }
        }
        if any_sent && write_ledger(pool, &appt.id, kind).await? {
            sent += 1;
        }
    }
    Ok(sent)
}

async fn due_appointments(
    pool: &SqlitePool,
    now: DateTime<Utc>,
    kind: ReminderKind,
) -> Result<Vec<AppointmentRow>, ScheduleError> {
    let rows = match kind {
        // Created between 5m and 30s ago: long enough to be settled, recent
        // enough to still read as a booking confirmation.
        ReminderKind::Confirmation => {
            sqlx::query_as::<_, AppointmentRow>(&db::appointment_select(
                "a.status = ? AND a.created_at >= ? AND a.created_at <= ?",
            ))
            .bind(STATUS_SCHEDULED)
            .bind(now - Duration::minutes(5))
            .bind(now - Duration::seconds(30))
            .fetch_all(pool)
            .await?
        }
        _ => {
            let offset = match kind {
                ReminderKind::Reminder30 => 30,
                ReminderKind::Reminder15 => 15,
                _ => 0,
            };
            let from = now + Duration::minutes(offset);
            let to = from + Duration::minutes(1);
            sqlx::query_as::<_, AppointmentRow>(&db::appointment_select(
                "a.status = ? AND a.start_datetime >= ? AND a.start_datetime < ?",
            ))
            .bind(STATUS_SCHEDULED)
            .bind(from)
            .bind(to)
            .fetch_all(pool)
            .await?
        }
    };
    Ok(rows)
}

async fn ledgered(
    pool: &SqlitePool,
    appointment_id: &str,
    kind: ReminderKind,
) -> Result<bool, ScheduleError> {
    let exists: Option<(i64,)> = sqlx::query_as(
        "SELECT 1 FROM appointment_notifications WHERE appointment_id = ? AND kind = ?",
    )
    .bind(appointment_id)
    .bind(kind.as_str())
    .fetch_optional(pool)
    .await?;
    Ok(exists.is_some())
}

/// Write-once ledger row. `INSERT OR IGNORE` keeps overlapping runs from
/// double-counting; returns whether this run actually inserted it.
async fn write_ledger(
    pool: &SqlitePool,
    appointment_id: &str,
    kind: ReminderKind,
) -> Result<bool, ScheduleError> {
    let result = sqlx::query(
        r#"INSERT OR IGNORE INTO appointment_notifications (id, appointment_id, kind, sent_at)
           VALUES (?, ?, ?, ?)"#,
    )
    .bind(new_id())
    .bind(appointment_id)
    .bind(kind.as_str())
    .bind(Utc::now())
    .execute(pool)
    .await?;
    Ok(result.rows_affected() == 1)
}

fn compose(kind: ReminderKind, appt: &AppointmentRow) -> (String, String, Value) {
    let start_local = appt.start_datetime.with_timezone(&Local);
    match kind {
        ReminderKind::Confirmation => (
            "✅ Appointment confirmed!".to_string(),
            format!(
                "You're all set! {} with {} is confirmed for {}.",
                appt.service_title,
                appt.barber_label,
                start_local.format("%d/%m at %H:%M"),
            ),
            json!({ "type": kind.as_str(), "appointmentId": appt.id }),
        ),
        ReminderKind::Reminder30 => (
            format!(
                "Reminder: {} at {}",
                appt.service_title,
                start_local.format("%H:%M")
            ),
            format!(
                "Hi! {} is expecting you for {} in 30 minutes.",
                appt.barber_label, appt.service_title
            ),
            json!({
                "type": kind.as_str(),
                "appointmentId": appt.id,
                "service": appt.service_title,
            }),
        ),
        ReminderKind::Reminder15 => (
            "⏰ 15 minutes to go!".to_string(),
            format!(
                "Your appointment with {} is coming right up. We're waiting for you!",
                appt.barber_label
            ),
            json!({
                "type": kind.as_str(),
                "appointmentId": appt.id,
                "service": appt.service_title,
            }),
        ),
        ReminderKind::Reminder0 => (
            "✂️ It's time!".to_string(),
            format!(
                "Your {} with {} starts now. See you in the chair!",
                appt.service_title, appt.barber_label
            ),
            json!({
                "type": kind.as_str(),
                "appointmentId": appt.id,
                "service": appt.service_title,
            }),
        ),
    }
}
