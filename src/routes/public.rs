//! Public surface: health, identity echo, slot availability, guest booking
//! and invite acceptance. The appointment read endpoints share these paths
//! but require an admin, which the extractor on each handler enforces.

use actix_web::{web, HttpResponse};
use serde::Deserialize;
use serde_json::json;

use crate::audit;
use crate::auth::{AdminUser, AuthUser};
use crate::error::ApiError;
use crate::models::{parse_wire_datetime, PaymentPeriod};
use crate::onboarding::{self, ClientSignup, InviteAcceptance};
use crate::scheduling::{self, slot_label, BookingRequest};
use crate::state::AppState;

async fn health() -> HttpResponse {
    HttpResponse::Ok().json(json!({ "status": "ok" }))
}

async fn me(user: AuthUser) -> HttpResponse {
    HttpResponse::Ok().json(json!({
        "id": user.id,
        "username": user.username,
        "role": user.role,
    }))
}

#[derive(Deserialize)]
struct SlotQuery {
    date: String,
}

async fn available_slots(
    state: web::Data<AppState>,
    path: web::Path<i64>,
    query: web::Query<SlotQuery>,
) -> Result<HttpResponse, ApiError> {
    let barber_id = path.into_inner();
    let slots = scheduling::available_slots(state.store.as_ref(), barber_id, &query.date).await?;
    Ok(HttpResponse::Ok().json(json!({
        "barber_id": barber_id,
        "date": query.date,
        "slots": slots,
    })))
}

#[derive(Deserialize)]
struct BookingBody {
    client_id: Option<i64>,
    client_name: Option<String>,
    client_email: Option<String>,
    client_phone: Option<String>,
    barber_id: i64,
    service_id: i64,
    date: String,
    notes: Option<String>,
}

/// Guest booking. An unknown caller supplies name/email instead of a
/// `client_id` and gets a client account created on the spot; a duplicate
/// phone number fails with its structured code.
async fn create_appointment(
    state: web::Data<AppState>,
    body: web::Json<BookingBody>,
) -> Result<HttpResponse, ApiError> {
    let body = body.into_inner();
    let store = state.store.as_ref();

    // Reject a bad date before a guest client account gets created.
    if parse_wire_datetime(&body.date).is_none() {
        return Err(ApiError::Validation(format!("invalid date: {}", body.date)));
    }

    let client_id = match body.client_id {
        Some(id) => id,
        None => {
            let name = body
                .client_name
                .filter(|name| !name.trim().is_empty())
                .ok_or_else(|| {
                    ApiError::Validation("client_id or client_name is required".into())
                })?;
            let email = body.client_email.ok_or_else(|| {
                ApiError::Validation("client_email is required for guest booking".into())
            })?;
            let client = onboarding::create_client(
                store,
                ClientSignup {
                    username: name,
                    email,
                    phone: body.client_phone,
                    password: None,
                    metadata: None,
                },
            )
            .await?;
            client.id
        }
    };

    let appointment = scheduling::create_appointment(
        store,
        BookingRequest {
            client_id,
            barber_id: body.barber_id,
            service_id: body.service_id,
            date: body.date,
            notes: body.notes,
        },
    )
    .await?;
    audit::record(
        store,
        None,
        "appointment.create",
        "appointment",
        Some(appointment.id),
        Some(json!({ "slot": slot_label(&appointment.date) }).to_string()),
    )
    .await;
    Ok(HttpResponse::Created().json(appointment))
}

async fn list_appointments(
    state: web::Data<AppState>,
    _admin: AdminUser,
) -> Result<HttpResponse, ApiError> {
    let appointments = scheduling::list_appointments(state.store.as_ref()).await?;
    Ok(HttpResponse::Ok().json(appointments))
}

async fn upcoming_appointments(
    state: web::Data<AppState>,
    _admin: AdminUser,
) -> Result<HttpResponse, ApiError> {
    let appointments = scheduling::upcoming_appointments(state.store.as_ref()).await?;
    Ok(HttpResponse::Ok().json(appointments))
}

async fn appointment_detail(
    state: web::Data<AppState>,
    _admin: AdminUser,
    path: web::Path<i64>,
) -> Result<HttpResponse, ApiError> {
    let detail = scheduling::appointment_detail(state.store.as_ref(), path.into_inner()).await?;
    Ok(HttpResponse::Ok().json(detail))
}

#[derive(Deserialize)]
struct StatusBody {
    status: String,
}

// Deliberately unauthenticated, matching the deployed behavior this server
// replaces.
async fn update_appointment_status(
    state: web::Data<AppState>,
    path: web::Path<i64>,
    body: web::Json<StatusBody>,
) -> Result<HttpResponse, ApiError> {
    let id = path.into_inner();
    let store = state.store.as_ref();
    let appointment = scheduling::update_appointment_status(store, id, &body.status).await?;
    audit::record(
        store,
        None,
        "appointment.status",
        "appointment",
        Some(id),
        Some(json!({ "status": body.status }).to_string()),
    )
    .await;
    Ok(HttpResponse::Ok().json(appointment))
}

#[derive(Deserialize)]
struct AcceptInviteBody {
    username: String,
    email: String,
    password: String,
    phone: Option<String>,
    nif: Option<String>,
    iban: Option<String>,
    payment_period: Option<PaymentPeriod>,
}

async fn accept_invite(
    state: web::Data<AppState>,
    path: web::Path<String>,
    body: web::Json<AcceptInviteBody>,
) -> Result<HttpResponse, ApiError> {
    let body = body.into_inner();
    let store = state.store.as_ref();
    let (user, barber) = onboarding::accept_invite(
        store,
        InviteAcceptance {
            token: path.into_inner(),
            username: body.username,
            email: body.email,
            password: body.password,
            phone: body.phone,
            nif: body.nif,
            iban: body.iban,
            payment_period: body.payment_period.unwrap_or(PaymentPeriod::Monthly),
        },
    )
    .await?;
    audit::record(
        store,
        Some(user.id),
        "invite.accept",
        "barber",
        Some(barber.id),
        None,
    )
    .await;
    Ok(HttpResponse::Created().json(json!({ "user": user, "barber": barber })))
}

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(web::resource("/api/health").route(web::get().to(health)))
        .service(web::resource("/api/auth/me").route(web::get().to(me)))
        .service(
            web::resource("/api/barbers/{id}/available-slots")
                .route(web::get().to(available_slots)),
        )
        .service(
            web::resource("/api/appointments")
                .route(web::post().to(create_appointment))
                .route(web::get().to(list_appointments)),
        )
        .service(
            web::resource("/api/appointments/upcoming")
                .route(web::get().to(upcoming_appointments)),
        )
        .service(web::resource("/api/appointments/{id}").route(web::get().to(appointment_detail)))
        .service(
            web::resource("/api/appointments/{id}/status")
                .route(web::patch().to(update_appointment_status)),
        )
        .service(
            web::resource("/api/invites/{token}/accept").route(web::post().to(accept_invite)),
        );
}
