use actix_web::{web, HttpResponse};
use chrono::{Duration, NaiveDate, Utc};
use serde::Deserialize;
use serde_json::json;

use crate::audit;
use crate::auth::new_id;
use crate::conflict::{self, Candidate};
use crate::db;
use crate::error::ScheduleError;
use crate::models::{ROLE_BARBER, STATUS_CANCELLED, STATUS_SCHEDULED};
use crate::push::{self, PushSubscriptionInput};
use crate::routes::{parse_instant, parse_time_of_day};
use crate::slots;
use crate::state::AppState;

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/api/public")
            .service(web::resource("/appointments").route(web::post().to(create_booking)))
            .service(web::resource("/appointments/cancel").route(web::post().to(cancel_booking)))
            .service(
                web::resource("/appointments/available-slots")
                    .route(web::get().to(available_slots)),
            )
            .service(
                web::resource("/appointments/{id}/subscribe").route(web::post().to(subscribe)),
            )
            .service(web::resource("/barbers").route(web::get().to(list_barbers)))
            .service(web::resource("/services").route(web::get().to(list_services))),
    )
    .service(web::resource("/health").route(web::get().to(health)));
}

async fn health() -> HttpResponse {
    HttpResponse::Ok().body("ok")
}

#[derive(Debug, Deserialize)]
struct CreateBookingBody {
    #[serde(default, alias = "barberId")]
    barber: Option<String>,
    #[serde(default, alias = "barberName", alias = "barber_username")]
    barber_name: Option<String>,
    #[serde(default, alias = "serviceId")]
    service: Option<String>,
    #[serde(default, alias = "serviceTitle")]
    service_title: Option<String>,
    #[serde(default, alias = "startDatetime")]
    start_datetime: Option<String>,
    #[serde(default, alias = "endDatetime")]
    end_datetime: Option<String>,
    #[serde(default, alias = "startDate")]
    date: Option<NaiveDate>,
    #[serde(default, alias = "startTime")]
    time: Option<String>,
    #[serde(alias = "clientName")]
    client_name: String,
    #[serde(alias = "clientPhone")]
    client_phone: String,
    #[serde(default)]
    notes: Option<String>,
    #[serde(default)]
    subscription: Option<PushSubscriptionInput>,
}

/// Public booking: resolves barber and service by id or name, builds the
/// interval (end defaults to start + service duration), validates conflicts
/// under the barber's booking lock, persists, and audits a `create` with no
/// actor.
async fn create_booking(
    state: web::Data<AppState>,
    body: web::Json<CreateBookingBody>,
) -> Result<HttpResponse, ScheduleError> {
    let body = body.into_inner();
    if body.client_name.trim().is_empty() || body.client_phone.trim().is_empty() {
        return Err(ScheduleError::InvalidInput(
            "client name and phone are required".to_string(),
        ));
    }

    let (barber_id, _) = db::resolve_barber(
        &state.db,
        body.barber.as_deref(),
        body.barber_name.as_deref(),
    )
    .await?;
    let service = db::resolve_service(
        &state.db,
        body.service.as_deref(),
        body.service_title.as_deref(),
    )
    .await?;

    let start = match body.start_datetime.as_deref() {
        Some(raw) => parse_instant(raw)?,
        None => {
            let (date, time) = match (body.date, body.time.as_deref()) {
                (Some(date), Some(time)) => (date, time),
                _ => {
                    return Err(ScheduleError::InvalidInput(
                        "date and time are required".to_string(),
                    ))
                }
            };
            conflict::local_to_utc(date.and_time(parse_time_of_day(time)?))?
        }
    };
    let end = match body.end_datetime.as_deref() {
        Some(raw) => parse_instant(raw)?,
        None => start + Duration::minutes(service.duration_minutes),
    };

    let candidate = Candidate {
        barber_id: &barber_id,
        start,
        end,
        status: STATUS_SCHEDULED,
    };

    let appointment_id = new_id();
    {
        let _guard = state.booking_locks.acquire(&barber_id).await;
        conflict::validate(&state.db, &candidate, None).await?;

        sqlx::query(
            r#"INSERT INTO appointments
               (id, barber_id, client_name, client_phone, service_id, start_datetime, end_datetime, status, notes, created_at)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"#,
        )
        .bind(&appointment_id)
        .bind(&barber_id)
        .bind(body.client_name.trim())
        .bind(body.client_phone.trim())
        .bind(&service.id)
        .bind(start)
        .bind(end)
        .bind(STATUS_SCHEDULED)
        .bind(body.notes.as_deref())
        .bind(Utc::now())
        .execute(&state.db)
        .await?;
    }

    if let Some(after) = audit::snapshot(&state.db, &appointment_id).await? {
        audit::record_appointment_change(&state.db, None, &appointment_id, None, &after).await;
    }

    if let Some(subscription) = &body.subscription {
        if let Err(err) = push::store_subscription(&state.db, &appointment_id, subscription).await {
            log::warn!("inline subscription failed for {appointment_id}: {err}");
        }
    }

    let row = db::fetch_appointment(&state.db, &appointment_id)
        .await?
        .ok_or(ScheduleError::NotFound("appointment"))?;
    Ok(HttpResponse::Created().json(row))
}

#[derive(Debug, Deserialize)]
struct CancelBody {
    #[serde(alias = "appointmentId")]
    id: String,
}

/// Public cancellation records the audit entry with no actor.
async fn cancel_booking(
    state: web::Data<AppState>,
    body: web::Json<CancelBody>,
) -> Result<HttpResponse, ScheduleError> {
    let before = audit::snapshot(&state.db, &body.id)
        .await?
        .ok_or(ScheduleError::NotFound("appointment"))?;

    sqlx::query("UPDATE appointments SET status = ? WHERE id = ?")
        .bind(STATUS_CANCELLED)
        .bind(&body.id)
        .execute(&state.db)
        .await?;

    if let Some(after) = audit::snapshot(&state.db, &body.id).await? {
        audit::record_appointment_change(&state.db, None, &body.id, Some(&before), &after).await;
    }

    let row = db::fetch_appointment(&state.db, &body.id)
        .await?
        .ok_or(ScheduleError::NotFound("appointment"))?;
    Ok(HttpResponse::Ok().json(row))
}

#[derive(Debug, Deserialize)]
struct SlotsQuery {
    #[serde(default, alias = "barberId")]
    barber_id: Option<String>,
    #[serde(default, alias = "barberName")]
    barber_name: Option<String>,
    date: NaiveDate,
    #[serde(default, alias = "serviceId")]
    service_id: Option<String>,
    #[serde(default, alias = "durationMinutes")]
    duration_minutes: Option<i64>,
}

async fn available_slots(
    state: web::Data<AppState>,
    query: web::Query<SlotsQuery>,
) -> Result<HttpResponse, ScheduleError> {
    let query = query.into_inner();
    let (barber_id, _) = db::resolve_barber(
        &state.db,
        query.barber_id.as_deref(),
        query.barber_name.as_deref(),
    )
    .await?;

    let duration_minutes = match query.service_id.as_deref() {
        Some(service_id) => {
            db::resolve_service(&state.db, Some(service_id), None)
                .await?
                .duration_minutes
        }
        None => query.duration_minutes.ok_or_else(|| {
            ScheduleError::InvalidInput("serviceId or durationMinutes is required".to_string())
        })?,
    };

    let slots = slots::find_slots(&state.db, &barber_id, query.date, duration_minutes).await?;
    Ok(HttpResponse::Ok().json(json!({ "slots": slots })))
}

async fn subscribe(
    state: web::Data<AppState>,
    path: web::Path<String>,
    body: web::Json<PushSubscriptionInput>,
) -> Result<HttpResponse, ScheduleError> {
    let appointment_id = path.into_inner();
    if db::fetch_appointment(&state.db, &appointment_id).await?.is_none() {
        return Err(ScheduleError::NotFound("appointment"));
    }
    push::store_subscription(&state.db, &appointment_id, &body).await?;
    Ok(HttpResponse::Ok().json(json!({ "ok": true })))
}

async fn list_barbers(state: web::Data<AppState>) -> Result<HttpResponse, ScheduleError> {
    let rows: Vec<(String, String)> = sqlx::query_as(
        "SELECT id, display_name FROM users WHERE role = ? AND active = 1 ORDER BY display_name",
    )
    .bind(ROLE_BARBER)
    .fetch_all(&state.db)
    .await?;

    let barbers: Vec<_> = rows
        .into_iter()
        .map(|(id, name)| json!({ "id": id, "name": name }))
        .collect();
    Ok(HttpResponse::Ok().json(json!({ "barbers": barbers })))
}

async fn list_services(state: web::Data<AppState>) -> Result<HttpResponse, ScheduleError> {
    let rows: Vec<crate::models::ServiceRow> = sqlx::query_as(
        r#"SELECT id, title, price_cents, duration_minutes, active, sort_order, description
           FROM services WHERE active = 1 ORDER BY sort_order"#,
    )
    .fetch_all(&state.db)
    .await?;
    Ok(HttpResponse::Ok().json(json!({ "services": rows })))
}
