use actix_web::{web, HttpResponse};
use chrono::{Duration, NaiveDate, Utc};
use serde::Deserialize;
use serde_json::json;
use sqlx::QueryBuilder;

use crate::audit;
use crate::auth::{new_id, staff_validator, AuthUser};
use crate::conflict::{self, local_to_utc, Candidate};
use crate::db;
use crate::error::ScheduleError;
use crate::models::{AppointmentRow, TimeBlockRow, ROLE_BARBER, STATUSES, STATUS_SCHEDULED};
use crate::push::{self, Delivery, WebPushDelivery};
use crate::routes::{parse_instant, parse_time_of_day};
use crate::state::AppState;

pub fn configure(cfg: &mut web::ServiceConfig) {
    use actix_web_httpauth::middleware::HttpAuthentication;

    cfg.service(
        web::scope("/api/staff")
            .wrap(HttpAuthentication::basic(staff_validator))
            .service(
                web::resource("/appointments")
                    .route(web::get().to(list_appointments))
                    .route(web::post().to(create_appointment)),
            )
            .service(
                web::resource("/appointments/{id}")
                    .route(web::patch().to(update_appointment))
                    .route(web::delete().to(delete_appointment)),
            )
            .service(
                web::resource("/appointments/{id}/status").route(web::patch().to(update_status)),
            )
            .service(
                web::resource("/appointments/{id}/notify-test").route(web::post().to(notify_test)),
            )
            .service(
                web::resource("/time-blocks")
                    .route(web::get().to(list_blocks))
                    .route(web::post().to(create_block)),
            )
            .service(web::resource("/time-blocks/{id}").route(web::delete().to(delete_block)))
            .service(web::resource("/promotions").route(web::post().to(send_promotion)))
            .service(web::resource("/login").route(web::get().to(login)))
            .service(web::resource("/logout").route(web::post().to(logout))),
    );
}

fn truthy(value: Option<&str>) -> bool {
    matches!(
        value.map(str::to_lowercase).as_deref(),
        Some("1") | Some("true") | Some("on") | Some("yes")
    )
}

#[derive(Debug, Deserialize)]
struct ListQuery {
    #[serde(default)]
    date: Option<NaiveDate>,
    #[serde(default)]
    status: Option<String>,
    #[serde(default, alias = "barberId")]
    barber_id: Option<String>,
    #[serde(default)]
    future: Option<String>,
    #[serde(default)]
    all: Option<String>,
}

/// Staff calendar listing. Sweeps past scheduled rows to done first, then
/// filters. Barbers see their own calendar unless an admin asks for all.
async fn list_appointments(
    state: web::Data<AppState>,
    auth: web::ReqData<AuthUser>,
    query: web::Query<ListQuery>,
) -> Result<HttpResponse, ScheduleError> {
    let query = query.into_inner();
    db::complete_past_appointments(&state.db, Utc::now()).await?;

    let mut qb: QueryBuilder<sqlx::Sqlite> = QueryBuilder::new(db::appointment_select("1 = 1"));

    let show_all = truthy(query.all.as_deref()) && auth.is_admin();
    if !show_all {
        if auth.role == ROLE_BARBER {
            qb.push(" AND a.barber_id = ").push_bind(auth.id.clone());
        } else if let Some(barber_id) = &query.barber_id {
            qb.push(" AND a.barber_id = ").push_bind(barber_id.clone());
        }
    }
    if let Some(status) = &query.status {
        qb.push(" AND a.status = ").push_bind(status.clone());
    }
    if let Some(date) = query.date {
        let day_start = local_to_utc(
            date.and_hms_opt(0, 0, 0)
                .ok_or_else(|| ScheduleError::Internal("bad day start".to_string()))?,
        )?;
        let day_end = day_start + Duration::days(1);
        qb.push(" AND a.start_datetime >= ").push_bind(day_start);
        qb.push(" AND a.start_datetime < ").push_bind(day_end);
    }
    if truthy(query.future.as_deref()) {
        qb.push(" AND a.end_datetime >= ").push_bind(Utc::now());
    }
    qb.push(" ORDER BY a.start_datetime");

    let rows: Vec<AppointmentRow> = qb.build_query_as().fetch_all(&state.db).await?;
    Ok(HttpResponse::Ok().json(json!({ "appointments": rows })))
}

fn check_ownership(auth: &AuthUser, appointment: &AppointmentRow) -> Result<(), ScheduleError> {
    if !auth.is_admin() && appointment.barber_id != auth.id {
        return Err(ScheduleError::Forbidden(
            "appointment belongs to another barber".to_string(),
        ));
    }
    Ok(())
}

#[derive(Debug, Deserialize)]
struct StaffCreateBody {
    #[serde(default, alias = "barber", alias = "barberId")]
    barber_id: Option<String>,
    #[serde(alias = "service", alias = "serviceId")]
    service_id: String,
    #[serde(alias = "startDatetime")]
    start_datetime: String,
    #[serde(default, alias = "endDatetime")]
    end_datetime: Option<String>,
    #[serde(alias = "clientName")]
    client_name: String,
    #[serde(alias = "clientPhone")]
    client_phone: String,
    #[serde(default)]
    notes: Option<String>,
}

/// Walk-in booking entered at the counter. Barbers book onto their own
/// calendar; admins may name the barber. Audited with the acting staff
/// identity, unlike the anonymous public flow.
async fn create_appointment(
    state: web::Data<AppState>,
    auth: web::ReqData<AuthUser>,
    body: web::Json<StaffCreateBody>,
) -> Result<HttpResponse, ScheduleError> {
    let body = body.into_inner();
    if body.client_name.trim().is_empty() || body.client_phone.trim().is_empty() {
        return Err(ScheduleError::InvalidInput(
            "client name and phone are required".to_string(),
        ));
    }

    let barber_id = match &body.barber_id {
        Some(id) => {
            let (resolved, _) = db::resolve_barber(&state.db, Some(id), None).await?;
            if !auth.is_admin() && resolved != auth.id {
                return Err(ScheduleError::Forbidden(
                    "appointments can only be created on your own calendar".to_string(),
                ));
            }
            resolved
        }
        None if auth.role == ROLE_BARBER => auth.id.clone(),
        None => {
            return Err(ScheduleError::InvalidInput(
                "barber is required".to_string(),
            ))
        }
    };
    let service = db::resolve_service(&state.db, Some(&body.service_id), None).await?;

    let start = parse_instant(&body.start_datetime)?;
    let end = match body.end_datetime.as_deref() {
        Some(raw) => parse_instant(raw)?,
        None => start + Duration::minutes(service.duration_minutes),
    };

    let appointment_id = new_id();
    {
        let _guard = state.booking_locks.acquire(&barber_id).await;
        let candidate = Candidate {
            barber_id: &barber_id,
            start,
            end,
            status: STATUS_SCHEDULED,
        };
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
        audit::record_appointment_change(&state.db, Some(&auth.id), &appointment_id, None, &after)
            .await;
    }

    let row = db::fetch_appointment(&state.db, &appointment_id)
        .await?
        .ok_or(ScheduleError::NotFound("appointment"))?;
    Ok(HttpResponse::Created().json(row))
}

/// Hard removal, distinct from cancellation. The last known state goes into
/// the audit entry since the row itself is gone afterwards.
async fn delete_appointment(
    state: web::Data<AppState>,
    auth: web::ReqData<AuthUser>,
    path: web::Path<String>,
) -> Result<HttpResponse, ScheduleError> {
    let appointment_id = path.into_inner();
    let existing = db::fetch_appointment(&state.db, &appointment_id)
        .await?
        .ok_or(ScheduleError::NotFound("appointment"))?;
    check_ownership(&auth, &existing)?;

    let last = audit::snapshot(&state.db, &appointment_id)
        .await?
        .ok_or(ScheduleError::NotFound("appointment"))?;

    sqlx::query("DELETE FROM appointments WHERE id = ?")
        .bind(&appointment_id)
        .execute(&state.db)
        .await?;

    audit::record_appointment_delete(&state.db, Some(&auth.id), &appointment_id, &last).await;
    Ok(HttpResponse::Ok().json(json!({ "ok": true })))
}

#[derive(Debug, Deserialize)]
struct UpdateBody {
    #[serde(default, alias = "clientName")]
    client_name: Option<String>,
    #[serde(default, alias = "clientPhone")]
    client_phone: Option<String>,
    #[serde(default)]
    notes: Option<String>,
    #[serde(default, alias = "barber", alias = "barberId")]
    barber_id: Option<String>,
    #[serde(default, alias = "service", alias = "serviceId")]
    service_id: Option<String>,
    #[serde(default, alias = "startDatetime")]
    start_datetime: Option<String>,
    #[serde(default, alias = "endDatetime")]
    end_datetime: Option<String>,
    #[serde(default)]
    status: Option<String>,
}

/// Staff edit. Applies only the given fields, revalidates the resulting
/// interval under the target barber's lock, and emits the classified audit
/// entry with the acting staff identity.
async fn update_appointment(
    state: web::Data<AppState>,
    auth: web::ReqData<AuthUser>,
    path: web::Path<String>,
    body: web::Json<UpdateBody>,
) -> Result<HttpResponse, ScheduleError> {
    let appointment_id = path.into_inner();
    let body = body.into_inner();

    let existing = db::fetch_appointment(&state.db, &appointment_id)
        .await?
        .ok_or(ScheduleError::NotFound("appointment"))?;
    check_ownership(&auth, &existing)?;

    let barber_id = match &body.barber_id {
        Some(id) => db::resolve_barber(&state.db, Some(id), None).await?.0,
        None => existing.barber_id.clone(),
    };
    let service = match &body.service_id {
        Some(id) => db::resolve_service(&state.db, Some(id), None).await?,
        None => db::resolve_service(&state.db, Some(&existing.service_id), None).await?,
    };

    let status = match &body.status {
        Some(status) => {
            if !STATUSES.contains(&status.as_str()) {
                return Err(ScheduleError::InvalidInput(format!(
                    "invalid status '{status}'"
                )));
            }
            status.clone()
        }
        None => existing.status.clone(),
    };

    let start = match body.start_datetime.as_deref() {
        Some(raw) => parse_instant(raw)?,
        None => existing.start_datetime,
    };
    let end = match body.end_datetime.as_deref() {
        Some(raw) => parse_instant(raw)?,
        // A moved start without an explicit end keeps the service duration.
        None if body.start_datetime.is_some() => {
            start + Duration::minutes(service.duration_minutes)
        }
        None => existing.end_datetime,
    };

    let before = audit::snapshot(&state.db, &appointment_id).await?;

    {
        let _guard = state.booking_locks.acquire(&barber_id).await;
        let candidate = Candidate {
            barber_id: &barber_id,
            start,
            end,
            status: &status,
        };
        conflict::validate(&state.db, &candidate, Some(&appointment_id)).await?;

        sqlx::query(
            r#"UPDATE appointments
               SET barber_id = ?, client_name = ?, client_phone = ?, service_id = ?,
                   start_datetime = ?, end_datetime = ?, status = ?, notes = ?
               WHERE id = ?"#,
        )
        .bind(&barber_id)
        .bind(body.client_name.as_deref().unwrap_or(&existing.client_name))
        .bind(body.client_phone.as_deref().unwrap_or(&existing.client_phone))
        .bind(&service.id)
        .bind(start)
        .bind(end)
        .bind(&status)
        .bind(body.notes.as_deref().or(existing.notes.as_deref()))
        .bind(&appointment_id)
        .execute(&state.db)
        .await?;
    }

    if let Some(after) = audit::snapshot(&state.db, &appointment_id).await? {
        audit::record_appointment_change(
            &state.db,
            Some(&auth.id),
            &appointment_id,
            before.as_ref(),
            &after,
        )
        .await;
    }

    let row = db::fetch_appointment(&state.db, &appointment_id)
        .await?
        .ok_or(ScheduleError::NotFound("appointment"))?;
    Ok(HttpResponse::Ok().json(row))
}

#[derive(Debug, Deserialize)]
struct StatusBody {
    status: String,
}

async fn update_status(
    state: web::Data<AppState>,
    auth: web::ReqData<AuthUser>,
    path: web::Path<String>,
    body: web::Json<StatusBody>,
) -> Result<HttpResponse, ScheduleError> {
    let appointment_id = path.into_inner();
    if !STATUSES.contains(&body.status.as_str()) {
        return Err(ScheduleError::InvalidInput(format!(
            "invalid status '{}'",
            body.status
        )));
    }

    let existing = db::fetch_appointment(&state.db, &appointment_id)
        .await?
        .ok_or(ScheduleError::NotFound("appointment"))?;
    check_ownership(&auth, &existing)?;

    let before = audit::snapshot(&state.db, &appointment_id).await?;

    // Reopening a slot (back to scheduled) must pass conflict validation
    // again; other transitions bypass it.
    if body.status == STATUS_SCHEDULED {
        let _guard = state.booking_locks.acquire(&existing.barber_id).await;
        let candidate = Candidate {
            barber_id: &existing.barber_id,
            start: existing.start_datetime,
            end: existing.end_datetime,
            status: STATUS_SCHEDULED,
        };
        conflict::validate(&state.db, &candidate, Some(&appointment_id)).await?;
        set_status(&state.db, &appointment_id, &body.status).await?;
    } else {
        set_status(&state.db, &appointment_id, &body.status).await?;
    }

    if let Some(after) = audit::snapshot(&state.db, &appointment_id).await? {
        audit::record_appointment_change(
            &state.db,
            Some(&auth.id),
            &appointment_id,
            before.as_ref(),
            &after,
        )
        .await;
    }

    let row = db::fetch_appointment(&state.db, &appointment_id)
        .await?
        .ok_or(ScheduleError::NotFound("appointment"))?;
    Ok(HttpResponse::Ok().json(row))
}

async fn set_status(
    pool: &sqlx::SqlitePool,
    appointment_id: &str,
    status: &str,
) -> Result<(), ScheduleError> {
    sqlx::query("UPDATE appointments SET status = ? WHERE id = ?")
        .bind(status)
        .bind(appointment_id)
        .execute(pool)
        .await?;
    Ok(())
}

#[derive(Debug, Deserialize)]
struct NotifyTestBody {
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    body: Option<String>,
}

/// Immediate test fan-out to every device subscribed to the appointment.
async fn notify_test(
    state: web::Data<AppState>,
    path: web::Path<String>,
    body: Option<web::Json<NotifyTestBody>>,
) -> Result<HttpResponse, ScheduleError> {
    let appointment_id = path.into_inner();
    if db::fetch_appointment(&state.db, &appointment_id).await?.is_none() {
        return Err(ScheduleError::NotFound("appointment"));
    }

    let subs = push::subscriptions_for(&state.db, &appointment_id).await?;
    if subs.is_empty() {
        return Err(ScheduleError::NotFound("subscription"));
    }

    let body = body.map(|b| b.into_inner());
    let title = body
        .as_ref()
        .and_then(|b| b.title.clone())
        .unwrap_or_else(|| "Test notification".to_string());
    let text = body
        .and_then(|b| b.body)
        .unwrap_or_else(|| "Test push delivered successfully.".to_string());
    let data = json!({ "type": "test", "appointmentId": appointment_id });

    let delivery = WebPushDelivery::new(state.push.clone());
    let mut sent = 0;
    for sub in &subs {
        if delivery.deliver(sub, &title, &text, &data).await {
            sent += 1;
        }
    }
    Ok(HttpResponse::Ok().json(json!({ "ok": true, "sent": sent, "total": subs.len() })))
}

#[derive(Debug, Deserialize)]
struct BlocksQuery {
    #[serde(default, alias = "barberId")]
    barber_id: Option<String>,
    #[serde(default)]
    date: Option<NaiveDate>,
}

async fn list_blocks(
    state: web::Data<AppState>,
    auth: web::ReqData<AuthUser>,
    query: web::Query<BlocksQuery>,
) -> Result<HttpResponse, ScheduleError> {
    let mut qb: QueryBuilder<sqlx::Sqlite> = QueryBuilder::new(
        "SELECT id, barber_id, date, start_time, end_time, full_day, reason FROM time_blocks WHERE 1 = 1",
    );
    if auth.role == ROLE_BARBER {
        qb.push(" AND barber_id = ").push_bind(auth.id.clone());
    } else if let Some(barber_id) = &query.barber_id {
        qb.push(" AND barber_id = ").push_bind(barber_id.clone());
    }
    if let Some(date) = query.date {
        qb.push(" AND date = ").push_bind(date);
    }
    qb.push(" ORDER BY date, start_time");

    let rows: Vec<TimeBlockRow> = qb.build_query_as().fetch_all(&state.db).await?;
    Ok(HttpResponse::Ok().json(json!({ "time_blocks": rows })))
}

#[derive(Debug, Deserialize)]
struct CreateBlockBody {
    #[serde(default, alias = "barberId")]
    barber_id: Option<String>,
    date: NaiveDate,
    #[serde(default, alias = "startTime")]
    start_time: Option<String>,
    #[serde(default, alias = "endTime")]
    end_time: Option<String>,
    #[serde(default, alias = "fullDay")]
    full_day: bool,
    #[serde(default)]
    reason: Option<String>,
}

async fn create_block(
    state: web::Data<AppState>,
    auth: web::ReqData<AuthUser>,
    body: web::Json<CreateBlockBody>,
) -> Result<HttpResponse, ScheduleError> {
    let body = body.into_inner();

    // Barbers block their own calendar; admins may name the barber.
    let barber_id = match (&body.barber_id, auth.role.as_str()) {
        (Some(id), role) if role != ROLE_BARBER => {
            db::resolve_barber(&state.db, Some(id), None).await?.0
        }
        _ => auth.id.clone(),
    };

    let (start_time, end_time) = if body.full_day {
        (None, None)
    } else {
        let start = body.start_time.as_deref().map(parse_time_of_day).transpose()?;
        let end = body.end_time.as_deref().map(parse_time_of_day).transpose()?;
        match (start, end) {
            (Some(start), Some(end)) if start < end => (Some(start), Some(end)),
            (Some(_), Some(_)) => {
                return Err(ScheduleError::InvalidInput(
                    "block start must be before its end".to_string(),
                ))
            }
            _ => {
                return Err(ScheduleError::InvalidInput(
                    "partial blocks need both start and end times".to_string(),
                ))
            }
        }
    };

    let id = new_id();
    sqlx::query(
        r#"INSERT INTO time_blocks (id, barber_id, date, start_time, end_time, full_day, reason, created_at)
           VALUES (?, ?, ?, ?, ?, ?, ?, ?)"#,
    )
    .bind(&id)
    .bind(&barber_id)
    .bind(body.date)
    .bind(start_time)
    .bind(end_time)
    .bind(body.full_day)
    .bind(body.reason.as_deref().unwrap_or(""))
    .bind(Utc::now())
    .execute(&state.db)
    .await?;

    let row = sqlx::query_as::<_, TimeBlockRow>(
        "SELECT id, barber_id, date, start_time, end_time, full_day, reason FROM time_blocks WHERE id = ?",
    )
    .bind(&id)
    .fetch_one(&state.db)
    .await?;
    Ok(HttpResponse::Created().json(row))
}

async fn delete_block(
    state: web::Data<AppState>,
    auth: web::ReqData<AuthUser>,
    path: web::Path<String>,
) -> Result<HttpResponse, ScheduleError> {
    let block_id = path.into_inner();
    let row: Option<(String,)> =
        sqlx::query_as("SELECT barber_id FROM time_blocks WHERE id = ?")
            .bind(&block_id)
            .fetch_optional(&state.db)
            .await?;
    let (barber_id,) = row.ok_or(ScheduleError::NotFound("time block"))?;
    if !auth.is_admin() && barber_id != auth.id {
        return Err(ScheduleError::Forbidden(
            "time block belongs to another barber".to_string(),
        ));
    }

    sqlx::query("DELETE FROM time_blocks WHERE id = ?")
        .bind(&block_id)
        .execute(&state.db)
        .await?;
    Ok(HttpResponse::Ok().json(json!({ "ok": true })))
}

#[derive(Debug, Deserialize)]
struct PromotionBody {
    title: String,
    body: String,
}

/// Broadcast to every endpoint in the global token registry. Best effort,
/// admin only.
async fn send_promotion(
    state: web::Data<AppState>,
    auth: web::ReqData<AuthUser>,
    body: web::Json<PromotionBody>,
) -> Result<HttpResponse, ScheduleError> {
    if !auth.is_admin() {
        return Err(ScheduleError::Forbidden(
            "admin access required".to_string(),
        ));
    }

    let tokens = push::registered_tokens(&state.db).await?;
    let delivery = WebPushDelivery::new(state.push.clone());
    let data = json!({ "type": "promotion" });
    let mut sent = 0;
    for token in &tokens {
        if delivery.deliver(token, &body.title, &body.body, &data).await {
            sent += 1;
        }
    }
    Ok(HttpResponse::Ok().json(json!({ "ok": true, "sent": sent, "total": tokens.len() })))
}

async fn login(
    state: web::Data<AppState>,
    auth: web::ReqData<AuthUser>,
) -> Result<HttpResponse, ScheduleError> {
    audit::record_session_event(&state.db, audit::ACTION_LOGIN, &auth.id, &auth.username).await;
    Ok(HttpResponse::Ok().json(json!({
        "id": auth.id,
        "username": auth.username,
        "display_name": auth.display_name,
        "role": auth.role,
    })))
}

async fn logout(
    state: web::Data<AppState>,
    auth: web::ReqData<AuthUser>,
) -> Result<HttpResponse, ScheduleError> {
    audit::record_session_event(&state.db, audit::ACTION_LOGOUT, &auth.id, &auth.username).await;
    Ok(HttpResponse::Ok().json(json!({ "ok": true })))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ROLE_ADMIN;
    use crate::state::{BookingLocks, PushConfig};
    use crate::testutil;
    use actix_web::{http::StatusCode, test, App};
    use serde_json::Value;

    // base64("rico:secret") and base64("admin:secret"); all test staff use
    // the same password.
    const RICO_AUTH: &str = "Basic cmljbzpzZWNyZXQ=";
    const ADMIN_AUTH: &str = "Basic YWRtaW46c2VjcmV0";

    async fn seeded_state() -> AppState {
        let pool = testutil::pool().await;
        testutil::seed_staff(&pool, "b1", "rico", ROLE_BARBER, "secret").await;
        testutil::seed_staff(&pool, "b2", "leo", ROLE_BARBER, "secret").await;
        testutil::seed_staff(&pool, "a1", "admin", ROLE_ADMIN, "secret").await;
        testutil::seed_service(&pool, "s1", "Signature Cut", 45).await;
        AppState {
            db: pool,
            push: PushConfig {
                public_key: String::new(),
                private_key: String::new(),
                subject: String::new(),
            },
            booking_locks: BookingLocks::new(),
        }
    }

    #[actix_web::test]
    async fn barber_cannot_touch_anothers_appointment() {
        let state = seeded_state().await;
        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(state.clone()))
                .configure(configure),
        )
        .await;

        let start = Utc::now() + Duration::days(3);
        let id = testutil::seed_appointment(
            &state.db,
            "b2",
            "s1",
            start,
            STATUS_SCHEDULED,
            Utc::now(),
        )
        .await;

        let req = test::TestRequest::patch()
            .uri(&format!("/api/staff/appointments/{id}/status"))
            .insert_header(("Authorization", RICO_AUTH))
            .set_json(json!({ "status": "done" }))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::FORBIDDEN);

        // The admin can.
        let req = test::TestRequest::patch()
            .uri(&format!("/api/staff/appointments/{id}/status"))
            .insert_header(("Authorization", ADMIN_AUTH))
            .set_json(json!({ "status": "done" }))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[actix_web::test]
    async fn walk_in_booking_defaults_to_own_chair() {
        let state = seeded_state().await;
        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(state.clone()))
                .configure(configure),
        )
        .await;

        let start = Utc::now() + Duration::days(3);
        let req = test::TestRequest::post()
            .uri("/api/staff/appointments")
            .insert_header(("Authorization", RICO_AUTH))
            .set_json(json!({
                "serviceId": "s1",
                "startDatetime": start.to_rfc3339(),
                "clientName": "Walk-in Bruno",
                "clientPhone": "5511999990001"
            }))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::CREATED);

        let body: Value = test::read_body_json(resp).await;
        assert_eq!(body["barber_id"], "b1");
        let id = body["id"].as_str().unwrap().to_string();

        // Staff creates carry the acting staff identity, unlike public ones.
        let (action, actor): (String, Option<String>) =
            sqlx::query_as("SELECT action, actor_id FROM audit_log WHERE target_id = ?")
                .bind(&id)
                .fetch_one(&state.db)
                .await
                .unwrap();
        assert_eq!(action, "create");
        assert_eq!(actor.as_deref(), Some("b1"));

        // The same slot is now taken.
        let req = test::TestRequest::post()
            .uri("/api/staff/appointments")
            .insert_header(("Authorization", RICO_AUTH))
            .set_json(json!({
                "serviceId": "s1",
                "startDatetime": start.to_rfc3339(),
                "clientName": "Walk-in Caio",
                "clientPhone": "5511999990002"
            }))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::CONFLICT);
    }

    #[actix_web::test]
    async fn barber_cannot_create_on_anothers_calendar() {
        let state = seeded_state().await;
        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(state.clone()))
                .configure(configure),
        )
        .await;

        let start = Utc::now() + Duration::days(3);
        let body = json!({
            "barberId": "b2",
            "serviceId": "s1",
            "startDatetime": start.to_rfc3339(),
            "clientName": "Walk-in Bruno",
            "clientPhone": "5511999990001"
        });

        let req = test::TestRequest::post()
            .uri("/api/staff/appointments")
            .insert_header(("Authorization", RICO_AUTH))
            .set_json(body.clone())
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::FORBIDDEN);

        // Admins may book for any barber.
        let req = test::TestRequest::post()
            .uri("/api/staff/appointments")
            .insert_header(("Authorization", ADMIN_AUTH))
            .set_json(body)
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::CREATED);
    }

    #[actix_web::test]
    async fn delete_removes_the_row_and_audits_last_state() {
        let state = seeded_state().await;
        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(state.clone()))
                .configure(configure),
        )
        .await;

        let start = Utc::now() + Duration::days(3);
        let id = testutil::seed_appointment(
            &state.db,
            "b2",
            "s1",
            start,
            STATUS_SCHEDULED,
            Utc::now(),
        )
        .await;

        // Not rico's appointment.
        let req = test::TestRequest::delete()
            .uri(&format!("/api/staff/appointments/{id}"))
            .insert_header(("Authorization", RICO_AUTH))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::FORBIDDEN);

        let req = test::TestRequest::delete()
            .uri(&format!("/api/staff/appointments/{id}"))
            .insert_header(("Authorization", ADMIN_AUTH))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::OK);

        assert!(db::fetch_appointment(&state.db, &id).await.unwrap().is_none());

        let (actor, payload): (Option<String>, String) = sqlx::query_as(
            "SELECT actor_id, payload FROM audit_log WHERE target_id = ? AND action = 'delete'",
        )
        .bind(&id)
        .fetch_one(&state.db)
        .await
        .unwrap();
        assert_eq!(actor.as_deref(), Some("a1"));
        let payload: Value = serde_json::from_str(&payload).unwrap();
        assert_eq!(payload["status"], "scheduled");
        assert_eq!(payload["barber"], "b2");
    }

    #[actix_web::test]
    async fn cancel_with_time_change_classifies_as_cancel() {
        let state = seeded_state().await;
        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(state.clone()))
                .configure(configure),
        )
        .await;

        let start = Utc::now() + Duration::days(3);
        let id = testutil::seed_appointment(
            &state.db,
            "b1",
            "s1",
            start,
            STATUS_SCHEDULED,
            Utc::now(),
        )
        .await;

        let new_start = start + Duration::hours(2);
        let req = test::TestRequest::patch()
            .uri(&format!("/api/staff/appointments/{id}"))
            .insert_header(("Authorization", RICO_AUTH))
            .set_json(json!({
                "status": "cancelled",
                "startDatetime": new_start.to_rfc3339(),
            }))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::OK);

        let (actor, payload): (Option<String>, String) = sqlx::query_as(
            "SELECT actor_id, payload FROM audit_log WHERE target_id = ? AND action = 'update'",
        )
        .bind(&id)
        .fetch_one(&state.db)
        .await
        .unwrap();
        assert_eq!(actor.as_deref(), Some("b1"));
        let payload: Value = serde_json::from_str(&payload).unwrap();
        // Status change outranks the simultaneous time change for the label,
        // but both categories keep their old values.
        assert_eq!(payload["change_type"], "cancel");
        assert_eq!(payload["old_status"], "scheduled");
        assert_eq!(payload["old_start"], start.to_rfc3339());
    }

    #[actix_web::test]
    async fn reschedule_recomputes_end_and_audits_old_interval() {
        let state = seeded_state().await;
        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(state.clone()))
                .configure(configure),
        )
        .await;

        let start = Utc::now() + Duration::days(3);
        let id = testutil::seed_appointment(
            &state.db,
            "b1",
            "s1",
            start,
            STATUS_SCHEDULED,
            Utc::now(),
        )
        .await;

        let new_start = start + Duration::hours(2);
        let req = test::TestRequest::patch()
            .uri(&format!("/api/staff/appointments/{id}"))
            .insert_header(("Authorization", RICO_AUTH))
            .set_json(json!({ "startDatetime": new_start.to_rfc3339() }))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::OK);

        let row = db::fetch_appointment(&state.db, &id).await.unwrap().unwrap();
        // End follows the service duration when not given explicitly.
        assert_eq!(row.end_datetime - row.start_datetime, Duration::minutes(45));

        let payload: String = sqlx::query_scalar(
            "SELECT payload FROM audit_log WHERE target_id = ? AND action = 'update'",
        )
        .bind(&id)
        .fetch_one(&state.db)
        .await
        .unwrap();
        let payload: Value = serde_json::from_str(&payload).unwrap();
        assert_eq!(payload["change_type"], "reschedule");
        assert_eq!(payload["old_start"], start.to_rfc3339());
    }

    #[actix_web::test]
    async fn edit_into_a_conflict_is_rejected() {
        let state = seeded_state().await;
        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(state.clone()))
                .configure(configure),
        )
        .await;

        let start = Utc::now() + Duration::days(3);
        testutil::seed_appointment(&state.db, "b1", "s1", start, STATUS_SCHEDULED, Utc::now())
            .await;
        let other_start = start + Duration::hours(2);
        let id = testutil::seed_appointment(
            &state.db,
            "b1",
            "s1",
            other_start,
            STATUS_SCHEDULED,
            Utc::now(),
        )
        .await;

        // Move the second appointment onto the first one.
        let req = test::TestRequest::patch()
            .uri(&format!("/api/staff/appointments/{id}"))
            .insert_header(("Authorization", RICO_AUTH))
            .set_json(json!({ "startDatetime": start.to_rfc3339() }))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::CONFLICT);

        // No audit entry for the rejected write.
        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM audit_log WHERE target_id = ?")
                .bind(&id)
                .fetch_one(&state.db)
                .await
                .unwrap();
        assert_eq!(count, 0);
    }

    #[actix_web::test]
    async fn partial_block_requires_both_times_in_order() {
        let state = seeded_state().await;
        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(state.clone()))
                .configure(configure),
        )
        .await;

        let req = test::TestRequest::post()
            .uri("/api/staff/time-blocks")
            .insert_header(("Authorization", RICO_AUTH))
            .set_json(json!({ "date": "2099-06-10", "start_time": "12:00" }))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

        let req = test::TestRequest::post()
            .uri("/api/staff/time-blocks")
            .insert_header(("Authorization", RICO_AUTH))
            .set_json(json!({
                "date": "2099-06-10",
                "start_time": "13:00",
                "end_time": "12:00"
            }))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

        let req = test::TestRequest::post()
            .uri("/api/staff/time-blocks")
            .insert_header(("Authorization", RICO_AUTH))
            .set_json(json!({
                "date": "2099-06-10",
                "start_time": "12:00",
                "end_time": "13:00",
                "reason": "lunch"
            }))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::CREATED);
    }

    #[actix_web::test]
    async fn promotions_are_admin_only() {
        let state = seeded_state().await;
        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(state.clone()))
                .configure(configure),
        )
        .await;

        let req = test::TestRequest::post()
            .uri("/api/staff/promotions")
            .insert_header(("Authorization", RICO_AUTH))
            .set_json(json!({ "title": "Deal", "body": "Half price Tuesdays" }))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::FORBIDDEN);
    }

    #[actix_web::test]
    async fn listing_sweeps_past_scheduled_to_done() {
        let state = seeded_state().await;
        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(state.clone()))
                .configure(configure),
        )
        .await;

        let past = Utc::now() - Duration::hours(3);
        let id = testutil::seed_appointment(
            &state.db,
            "b1",
            "s1",
            past,
            STATUS_SCHEDULED,
            past,
        )
        .await;

        let req = test::TestRequest::get()
            .uri("/api/staff/appointments")
            .insert_header(("Authorization", RICO_AUTH))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::OK);

        let row = db::fetch_appointment(&state.db, &id).await.unwrap().unwrap();
        assert_eq!(row.status, crate::models::STATUS_DONE);
    }

    #[actix_web::test]
    async fn login_and_logout_are_audited() {
        let state = seeded_state().await;
        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(state.clone()))
                .configure(configure),
        )
        .await;

        let req = test::TestRequest::get()
            .uri("/api/staff/login")
            .insert_header(("Authorization", RICO_AUTH))
            .to_request();
        assert_eq!(test::call_service(&app, req).await.status(), StatusCode::OK);

        let req = test::TestRequest::post()
            .uri("/api/staff/logout")
            .insert_header(("Authorization", RICO_AUTH))
            .to_request();
        assert_eq!(test::call_service(&app, req).await.status(), StatusCode::OK);

        let actions: Vec<(String,)> = sqlx::query_as(
            "SELECT action FROM audit_log WHERE actor_id = 'b1' ORDER BY created_at",
        )
        .fetch_all(&state.db)
        .await
        .unwrap();
        let actions: Vec<_> = actions.into_iter().map(|(a,)| a).collect();
        assert_eq!(actions, vec!["login", "logout"]);
    }
}
