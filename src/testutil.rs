//! Shared fixtures for unit tests: an in-memory SQLite pool with the real
//! migrations applied, plus row seeding helpers.

use chrono::{DateTime, Duration, Utc};
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::SqlitePool;

use crate::auth::new_id;

/// In-memory SQLite shares nothing between connections, so the pool is
/// pinned to a single one.
pub async fn pool() -> SqlitePool {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .unwrap();
    sqlx::migrate!("./migrations").run(&pool).await.unwrap();
    pool
}

pub async fn seed_barber(pool: &SqlitePool, id: &str, name: &str) {
    sqlx::query(
        r#"INSERT INTO users (id, username, display_name, role, password_hash, active, created_at)
           VALUES (?, ?, ?, 'barber', 'x', 1, ?)"#,
    )
    .bind(id)
    .bind(name.to_lowercase())
    .bind(name)
    .bind(Utc::now().to_rfc3339())
    .execute(pool)
    .await
    .unwrap();
}

/// A staff login that can pass HTTP Basic auth in route tests.
pub async fn seed_staff(pool: &SqlitePool, id: &str, username: &str, role: &str, password: &str) {
    let hash = crate::auth::hash_password(password).unwrap();
    sqlx::query(
        r#"INSERT INTO users (id, username, display_name, role, password_hash, active, created_at)
           VALUES (?, ?, ?, ?, ?, 1, ?)"#,
    )
    .bind(id)
    .bind(username)
    .bind(username)
    .bind(role)
    .bind(hash)
    .bind(Utc::now().to_rfc3339())
    .execute(pool)
    .await
    .unwrap();
}

pub async fn seed_service(pool: &SqlitePool, id: &str, title: &str, duration_minutes: i64) {
    sqlx::query(
        r#"INSERT INTO services (id, title, price_cents, duration_minutes, active, sort_order, description)
           VALUES (?, ?, 5000, ?, 1, 0, '')"#,
    )
    .bind(id)
    .bind(title)
    .bind(duration_minutes)
    .execute(pool)
    .await
    .unwrap();
}

pub async fn seed_appointment(
    pool: &SqlitePool,
    barber_id: &str,
    service_id: &str,
    start: DateTime<Utc>,
    status: &str,
    created_at: DateTime<Utc>,
) -> String {
    let id = new_id();
    sqlx::query(
        r#"INSERT INTO appointments
           (id, barber_id, client_name, client_phone, service_id, start_datetime, end_datetime, status, notes, created_at)
           VALUES (?, ?, 'Ana', '5511999990000', ?, ?, ?, ?, NULL, ?)"#,
    )
    .bind(&id)
    .bind(barber_id)
    .bind(service_id)
    .bind(start)
    .bind(start + Duration::minutes(30))
    .bind(status)
    .bind(created_at)
    .execute(pool)
    .await
    .unwrap();
    id
}

pub async fn seed_subscription(pool: &SqlitePool, appointment_id: &str, endpoint: &str) {
    sqlx::query(
        r#"INSERT INTO notification_subscriptions (id, appointment_id, endpoint, p256dh, auth, created_at)
           VALUES (?, ?, ?, 'p256dh-key', 'auth-key', ?)
           ON CONFLICT(appointment_id, endpoint) DO NOTHING"#,
    )
    .bind(new_id())
    .bind(appointment_id)
    .bind(endpoint)
    .bind(Utc::now())
    .execute(pool)
    .await
    .unwrap();
}

pub async fn seed_block(
    pool: &SqlitePool,
    barber_id: &str,
    date: chrono::NaiveDate,
    times: Option<(chrono::NaiveTime, chrono::NaiveTime)>,
    full_day: bool,
) {
    sqlx::query(
        r#"INSERT INTO time_blocks (id, barber_id, date, start_time, end_time, full_day, reason, created_at)
           VALUES (?, ?, ?, ?, ?, ?, '', ?)"#,
    )
    .bind(new_id())
    .bind(barber_id)
    .bind(date)
    .bind(times.map(|(s, _)| s))
    .bind(times.map(|(_, e)| e))
    .bind(full_day)
    .bind(Utc::now())
    .execute(pool)
    .await
    .unwrap();
}
