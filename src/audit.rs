use chrono::{DateTime, Utc};
use serde_json::{json, Value};
use sqlx::SqlitePool;

use crate::auth::new_id;
use crate::error::ScheduleError;
use crate::models::{STATUS_CANCELLED, STATUS_DONE};

pub const ACTION_CREATE: &str = "create";
pub const ACTION_UPDATE: &str = "update";
pub const ACTION_DELETE: &str = "delete";
pub const ACTION_LOGIN: &str = "login";
pub const ACTION_LOGOUT: &str = "logout";

/// The tracked fields of an appointment as they stood before (or after) a
/// write. Fields outside this set (notes, client phone) never produce an
/// audit entry.
#[derive(Debug, Clone, PartialEq, sqlx::FromRow)]
pub struct Snapshot {
    pub status: String,
    pub start_datetime: DateTime<Utc>,
    pub end_datetime: DateTime<Utc>,
    pub service_id: String,
    pub service_title: String,
    pub barber_id: String,
    pub barber_label: String,
    pub client_name: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    Create,
    Cancel,
    Done,
    StatusChange,
    Reschedule,
    BarberChange,
    ServiceChange,
}

impl ChangeKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ChangeKind::Create => "create",
            ChangeKind::Cancel => "cancel",
            ChangeKind::Done => "done",
            ChangeKind::StatusChange => "status_change",
            ChangeKind::Reschedule => "reschedule",
            ChangeKind::BarberChange => "barber_change",
            ChangeKind::ServiceChange => "service_change",
        }
    }
}

pub async fn snapshot(
    pool: &SqlitePool,
    appointment_id: &str,
) -> Result<Option<Snapshot>, ScheduleError> {
    let row = sqlx::query_as::<_, Snapshot>(
        r#"SELECT a.status, a.start_datetime, a.end_datetime,
                  a.service_id, s.title AS service_title,
                  a.barber_id, u.display_name AS barber_label,
                  a.client_name
           FROM appointments a
           JOIN services s ON a.service_id = s.id
           JOIN users u ON a.barber_id = u.id
           WHERE a.id = ?"#,
    )
    .bind(appointment_id)
    .fetch_optional(pool)
    .await?;
    Ok(row)
}

/// Classifies what changed, with a strict precedence when several tracked
/// fields moved in the same write: status beats time beats barber beats
/// service. A cancellation that also moves the start is a `cancel`, not a
/// `reschedule`.
pub fn classify(before: Option<&Snapshot>, after: &Snapshot) -> Option<ChangeKind> {
    let before = match before {
        Some(b) => b,
        None => return Some(ChangeKind::Create),
    };

    let status_changed = before.status != after.status;
    let time_changed = before.start_datetime != after.start_datetime
        || before.end_datetime != after.end_datetime;
    let barber_changed = before.barber_id != after.barber_id;
    let service_changed = before.service_id != after.service_id;

    if status_changed {
        Some(match after.status.as_str() {
            STATUS_CANCELLED => ChangeKind::Cancel,
            STATUS_DONE => ChangeKind::Done,
            _ => ChangeKind::StatusChange,
        })
    } else if time_changed {
        Some(ChangeKind::Reschedule)
    } else if barber_changed {
        Some(ChangeKind::BarberChange)
    } else if service_changed {
        Some(ChangeKind::ServiceChange)
    } else {
        None
    }
}

fn base_payload(after: &Snapshot) -> serde_json::Map<String, Value> {
    let mut obj = serde_json::Map::new();
    obj.insert("barber".to_string(), json!(after.barber_id));
    obj.insert("barber_label".to_string(), json!(after.barber_label));
    obj.insert("client_name".to_string(), json!(after.client_name));
    obj.insert("start".to_string(), json!(after.start_datetime.to_rfc3339()));
    obj.insert("end".to_string(), json!(after.end_datetime.to_rfc3339()));
    obj.insert("status".to_string(), json!(after.status));
    obj.insert("service_id".to_string(), json!(after.service_id));
    obj.insert("service_title".to_string(), json!(after.service_title));
    obj
}

/// Current-state context attached to every appointment entry. The
/// `change_type` label follows the classification precedence, but the old
/// values of every changed category are recorded independently, so a cancel
/// that also moves the start still keeps the old interval.
pub fn build_payload(before: Option<&Snapshot>, after: &Snapshot, kind: ChangeKind) -> Value {
    let mut obj = base_payload(after);

    let before = match before {
        Some(b) => b,
        None => return Value::Object(obj),
    };
    obj.insert("change_type".to_string(), json!(kind.as_str()));
    if before.status != after.status {
        obj.insert("old_status".to_string(), json!(before.status));
    }
    if before.start_datetime != after.start_datetime || before.end_datetime != after.end_datetime {
        obj.insert("old_start".to_string(), json!(before.start_datetime.to_rfc3339()));
        obj.insert("old_end".to_string(), json!(before.end_datetime.to_rfc3339()));
    }
    if before.barber_id != after.barber_id {
        obj.insert("old_barber".to_string(), json!(before.barber_id));
        obj.insert("old_barber_label".to_string(), json!(before.barber_label));
    }
    if before.service_id != after.service_id {
        obj.insert("old_service_id".to_string(), json!(before.service_id));
        obj.insert("old_service_title".to_string(), json!(before.service_title));
    }
    Value::Object(obj)
}

/// Diffs before/after and appends the resulting entry, if any. The actor is
/// threaded explicitly by the caller; public/anonymous writes pass `None`.
/// A no-op update emits nothing.
pub async fn record_appointment_change(
    pool: &SqlitePool,
    actor_id: Option<&str>,
    appointment_id: &str,
    before: Option<&Snapshot>,
    after: &Snapshot,
) {
    let kind = match classify(before, after) {
        Some(kind) => kind,
        None => return,
    };
    let action = if kind == ChangeKind::Create {
        ACTION_CREATE
    } else {
        ACTION_UPDATE
    };
    let payload = build_payload(before, after, kind);
    append(pool, actor_id, action, "Appointment", appointment_id, payload).await;
}

/// Records the removal of an appointment with its last known state as the
/// payload.
pub async fn record_appointment_delete(
    pool: &SqlitePool,
    actor_id: Option<&str>,
    appointment_id: &str,
    last: &Snapshot,
) {
    append(
        pool,
        actor_id,
        ACTION_DELETE,
        "Appointment",
        appointment_id,
        Value::Object(base_payload(last)),
    )
    .await;
}

pub async fn record_session_event(pool: &SqlitePool, action: &str, user_id: &str, username: &str) {
    append(
        pool,
        Some(user_id),
        action,
        "User",
        user_id,
        json!({ "username": username }),
    )
    .await;
}

/// Append-only write. Audit failures are logged and never fail the request
/// that triggered them.
async fn append(
    pool: &SqlitePool,
    actor_id: Option<&str>,
    action: &str,
    target_type: &str,
    target_id: &str,
    payload: Value,
) {
    let result = sqlx::query(
        r#"INSERT INTO audit_log (id, actor_id, action, target_type, target_id, payload, created_at)
           VALUES (?, ?, ?, ?, ?, ?, ?)"#,
    )
    .bind(new_id())
    .bind(actor_id)
    .bind(action)
    .bind(target_type)
    .bind(target_id)
    .bind(payload.to_string())
    .bind(Utc::now())
    .execute(pool)
    .await;
    if let Err(err) = result {
        log::error!("audit append failed for {target_type} {target_id}: {err}");
    }
}
