use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use serde::Serialize;

pub const ROLE_ADMIN: &str = "admin";
pub const ROLE_BARBER: &str = "barber";

pub const STATUS_SCHEDULED: &str = "scheduled";
pub const STATUS_DONE: &str = "done";
pub const STATUS_CANCELLED: &str = "cancelled";

pub const STATUSES: [&str; 3] = [STATUS_SCHEDULED, STATUS_DONE, STATUS_CANCELLED];

#[allow(dead_code)]
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct UserRow {
    pub id: String,
    pub username: String,
    pub display_name: String,
    pub role: String,
    pub password_hash: String,
    pub active: i64,
    pub created_at: String,
}

#[derive(Debug, Clone, sqlx::FromRow, Serialize)]
pub struct ServiceRow {
    pub id: String,
    pub title: String,
    pub price_cents: i64,
    pub duration_minutes: i64,
    pub active: bool,
    pub sort_order: i64,
    pub description: String,
}

/// An appointment joined with its barber and service labels. Every read
/// path (listing, reminders, audit payloads) wants the labels anyway, so
/// the bare table row never travels on its own.
#[derive(Debug, Clone, sqlx::FromRow, Serialize)]
pub struct AppointmentRow {
    pub id: String,
    pub barber_id: String,
    pub barber_label: String,
    pub client_name: String,
    pub client_phone: String,
    pub service_id: String,
    pub service_title: String,
    pub duration_minutes: i64,
    pub start_datetime: DateTime<Utc>,
    pub end_datetime: DateTime<Utc>,
    pub status: String,
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, sqlx::FromRow, Serialize)]
pub struct TimeBlockRow {
    pub id: String,
    pub barber_id: String,
    pub date: NaiveDate,
    pub start_time: Option<NaiveTime>,
    pub end_time: Option<NaiveTime>,
    pub full_day: bool,
    pub reason: String,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct SubscriptionRow {
    pub endpoint: String,
    pub p256dh: String,
    pub auth: String,
}
