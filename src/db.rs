use std::{env, fs, path::Path};

use chrono::{DateTime, Utc};
use sqlx::SqlitePool;

use crate::auth::{hash_password, new_id};
use crate::error::ScheduleError;
use crate::models::{AppointmentRow, ServiceRow, ROLE_ADMIN, ROLE_BARBER, STATUS_DONE, STATUS_SCHEDULED};

pub async fn run_migrations(pool: &SqlitePool) -> Result<(), sqlx::migrate::MigrateError> {
    sqlx::migrate!("./migrations").run(pool).await
}

pub fn ensure_sqlite_dir(db_url: &str) -> std::io::Result<()> {
    let path = if let Some(path) = db_url.strip_prefix("sqlite://") {
        Some(path)
    } else if let Some(path) = db_url.strip_prefix("sqlite:") {
        Some(path)
    } else {
        None
    };

    let Some(path) = path else {
        return Ok(());
    };

    let path = path.split('?').next().unwrap_or(path);
    if path == ":memory:" || path.is_empty() {
        return Ok(());
    }

    let path = path.strip_prefix("file:").unwrap_or(path);
    let db_path = Path::new(path);
    if let Some(parent) = db_path.parent() {
        fs::create_dir_all(parent)?;
    }
    Ok(())
}

/// Appointment rows are always read joined with their barber and service
/// labels; `filter` is the WHERE body with positional binds.
pub fn appointment_select(filter: &str) -> String {
    format!(
        r#"SELECT a.id, a.barber_id, u.display_name AS barber_label,
                  a.client_name, a.client_phone,
                  a.service_id, s.title AS service_title, s.duration_minutes,
                  a.start_datetime, a.end_datetime, a.status, a.notes, a.created_at
           FROM appointments a
           JOIN users u ON a.barber_id = u.id
           JOIN services s ON a.service_id = s.id
           WHERE {filter}"#
    )
}

pub async fn fetch_appointment(
    pool: &SqlitePool,
    id: &str,
) -> Result<Option<AppointmentRow>, ScheduleError> {
    let row = sqlx::query_as::<_, AppointmentRow>(&appointment_select("a.id = ?"))
        .bind(id)
        .fetch_optional(pool)
        .await?;
    Ok(row)
}

/// Resolves a barber by id, or by username/display name (case-insensitive)
/// when only a name was given.
pub async fn resolve_barber(
    pool: &SqlitePool,
    id: Option<&str>,
    name: Option<&str>,
) -> Result<(String, String), ScheduleError> {
    if let Some(id) = id.filter(|v| !v.trim().is_empty()) {
        let row: Option<(String, String)> = sqlx::query_as(
            "SELECT id, display_name FROM users WHERE id = ? AND role = ? AND active = 1",
        )
        .bind(id)
        .bind(ROLE_BARBER)
        .fetch_optional(pool)
        .await?;
        return row.ok_or(ScheduleError::NotFound("barber"));
    }
    if let Some(name) = name.filter(|v| !v.trim().is_empty()) {
        let row: Option<(String, String)> = sqlx::query_as(
            r#"SELECT id, display_name FROM users
               WHERE role = ? AND active = 1
                 AND (LOWER(username) = LOWER(?) OR LOWER(display_name) = LOWER(?))
               LIMIT 1"#,
        )
        .bind(ROLE_BARBER)
        .bind(name)
        .bind(name)
        .fetch_optional(pool)
        .await?;
        return row.ok_or(ScheduleError::NotFound("barber"));
    }
    Err(ScheduleError::InvalidInput(
        "barber id or name is required".to_string(),
    ))
}

/// Resolves a service by id or by title (case-insensitive).
pub async fn resolve_service(
    pool: &SqlitePool,
    id: Option<&str>,
    title: Option<&str>,
) -> Result<ServiceRow, ScheduleError> {
    let select = "SELECT id, title, price_cents, duration_minutes, active, sort_order, description FROM services";
    if let Some(id) = id.filter(|v| !v.trim().is_empty()) {
        let row = sqlx::query_as::<_, ServiceRow>(&format!("{select} WHERE id = ?"))
            .bind(id)
            .fetch_optional(pool)
            .await?;
        return row.ok_or(ScheduleError::NotFound("service"));
    }
    if let Some(title) = title.filter(|v| !v.trim().is_empty()) {
        let row = sqlx::query_as::<_, ServiceRow>(&format!(
            "{select} WHERE LOWER(title) = LOWER(?) LIMIT 1"
        ))
        .bind(title)
        .fetch_optional(pool)
        .await?;
        return row.ok_or(ScheduleError::NotFound("service"));
    }
    Err(ScheduleError::InvalidInput(
        "service id or title is required".to_string(),
    ))
}

/// Sweeps past scheduled appointments to done. Bulk bookkeeping update,
/// no audit entries.
pub async fn complete_past_appointments(
    pool: &SqlitePool,
    now: DateTime<Utc>,
) -> Result<u64, ScheduleError> {
    let result = sqlx::query("UPDATE appointments SET status = ? WHERE status = ? AND end_datetime <= ?")
        .bind(STATUS_DONE)
        .bind(STATUS_SCHEDULED)
        .bind(now)
        .execute(pool)
        .await?;
    Ok(result.rows_affected())
}

pub async fn seed_defaults(pool: &SqlitePool) -> Result<(), sqlx::Error> {
    seed_admin(pool).await?;
    seed_services(pool).await?;
    Ok(())
}

async fn seed_admin(pool: &SqlitePool) -> Result<(), sqlx::Error> {
    let existing = sqlx::query_as::<_, (String,)>("SELECT id FROM users WHERE role = ? LIMIT 1")
        .bind(ROLE_ADMIN)
        .fetch_optional(pool)
        .await?;
    if existing.is_some() {
        return Ok(());
    }

    let username = env::var("ADMIN_USER").unwrap_or_else(|_| "admin".to_string());
    let password = env::var("ADMIN_PASSWORD").unwrap_or_else(|_| "admin".to_string());
    let display_name = env::var("ADMIN_DISPLAY_NAME").unwrap_or_else(|_| "Shop Admin".to_string());

    if password == "admin" {
        log::warn!("ADMIN_PASSWORD not set. Using default password 'admin'. Set ADMIN_PASSWORD in production.");
    }

    let password_hash = hash_password(&password)
        .map_err(|_| sqlx::Error::Protocol("password hash failed".into()))?;

    sqlx::query(
        r#"INSERT INTO users (id, username, display_name, role, password_hash, active, created_at)
           VALUES (?, ?, ?, ?, ?, 1, ?)"#,
    )
    .bind(new_id())
    .bind(username)
    .bind(display_name)
    .bind(ROLE_ADMIN)
    .bind(password_hash)
    .bind(Utc::now().to_rfc3339())
    .execute(pool)
    .await?;

    Ok(())
}

async fn seed_services(pool: &SqlitePool) -> Result<(), sqlx::Error> {
    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM services")
        .fetch_one(pool)
        .await?;
    if count > 0 {
        return Ok(());
    }

    let catalog = [
        ("Signature Cut", 5500, 45, "Precision cut, styling, and lineup."),
        ("Fade & Line-Up", 4500, 35, "Skin fade with sharp finishing touches."),
        ("Beard Sculpt", 3500, 25, "Shape, trim, and conditioning for the beard."),
        ("Full Grooming", 8000, 60, "Cut, beard, and grooming refresh."),
    ];

    for (order, (title, price_cents, duration, description)) in catalog.into_iter().enumerate() {
        sqlx::query(
            r#"INSERT INTO services (id, title, price_cents, duration_minutes, active, sort_order, description)
               VALUES (?, ?, ?, ?, 1, ?, ?)"#,
        )
        .bind(new_id())
        .bind(title)
        .bind(price_cents)
        .bind(duration)
        .bind(order as i64)
        .bind(description)
        .execute(pool)
        .await?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil;
    use chrono::Duration;

    #[tokio::test]
    async fn resolve_barber_by_name_is_case_insensitive() {
        let pool = testutil::pool().await;
        testutil::seed_barber(&pool, "b1", "Rico").await;

        let (id, label) = resolve_barber(&pool, None, Some("rico")).await.unwrap();
        assert_eq!(id, "b1");
        assert_eq!(label, "Rico");

        assert!(matches!(
            resolve_barber(&pool, None, Some("nobody")).await,
            Err(ScheduleError::NotFound("barber"))
        ));
        assert!(matches!(
            resolve_barber(&pool, None, None).await,
            Err(ScheduleError::InvalidInput(_))
        ));
    }

    #[tokio::test]
    async fn sweep_completes_only_past_scheduled_rows() {
        let pool = testutil::pool().await;
        let now = Utc::now();
        testutil::seed_barber(&pool, "b1", "Rico").await;
        testutil::seed_service(&pool, "s1", "Signature Cut", 45).await;

        let past = testutil::seed_appointment(
            &pool, "b1", "s1",
            now - Duration::hours(2),
            STATUS_SCHEDULED,
            now - Duration::hours(3),
        )
        .await;
        let future = testutil::seed_appointment(
            &pool, "b1", "s1",
            now + Duration::hours(2),
            STATUS_SCHEDULED,
            now,
        )
        .await;

        assert_eq!(complete_past_appointments(&pool, now).await.unwrap(), 1);

        let past_row = fetch_appointment(&pool, &past).await.unwrap().unwrap();
        assert_eq!(past_row.status, STATUS_DONE);
        let future_row = fetch_appointment(&pool, &future).await.unwrap().unwrap();
        assert_eq!(future_row.status, STATUS_SCHEDULED);
    }
}
