use std::sync::Arc;

use actix_web::{test, web, App};
use actix_web_httpauth::headers::authorization::{Authorization, Basic};
use rust_decimal::Decimal;
use serde_json::{json, Value};

use barberdesk::auth::hash_password;
use barberdesk::models::{NewBarber, NewService, NewUser, PaymentPeriod, Role};
use barberdesk::routes;
use barberdesk::state::AppState;
use barberdesk::storage::{MemStorage, Storage};

macro_rules! test_app {
    ($store:expr) => {
        test::init_service(
            App::new()
                .app_data(web::Data::new(AppState::new($store)))
                .configure(routes::public::configure)
                .configure(routes::admin::configure)
                .configure(routes::barber::configure),
        )
        .await
    };
}

struct Fixture {
    barber_id: i64,
    service_id: i64,
}

async fn seed(store: &MemStorage) -> Fixture {
    store
        .create_user(NewUser {
            username: "joana".into(),
            email: "joana@example.com".into(),
            phone: None,
            role: Role::Admin,
            password_hash: hash_password("adminpw").unwrap(),
            metadata: None,
        })
        .await
        .unwrap();
    let barber_user = store
        .create_user(NewUser {
            username: "miguel".into(),
            email: "miguel@example.com".into(),
            phone: None,
            role: Role::Barber,
            password_hash: hash_password("barberpw").unwrap(),
            metadata: None,
        })
        .await
        .unwrap();
    let barber = store
        .create_barber(NewBarber {
            user_id: barber_user.id,
            nif: None,
            iban: None,
            payment_period: PaymentPeriod::Monthly,
            calendar_visible: true,
        })
        .await
        .unwrap();
    let service = store
        .create_service(NewService {
            name: "Corte".into(),
            price: Decimal::new(1500, 2),
            duration_minutes: 30,
        })
        .await
        .unwrap();
    Fixture {
        barber_id: barber.id,
        service_id: service.id,
    }
}

fn admin_auth() -> Authorization<Basic> {
    Authorization::from(Basic::new("joana", Some("adminpw")))
}

fn barber_auth() -> Authorization<Basic> {
    Authorization::from(Basic::new("miguel", Some("barberpw")))
}

#[actix_web::test]
async fn health_answers_without_auth() {
    let store = Arc::new(MemStorage::new());
    let app = test_app!(store);
    let resp = test::call_service(&app, test::TestRequest::get().uri("/api/health").to_request())
        .await;
    assert!(resp.status().is_success());
}

#[actix_web::test]
async fn empty_day_offers_the_full_grid() {
    let store = Arc::new(MemStorage::new());
    let fx = seed(&store).await;
    let app = test_app!(store);

    let uri = format!(
        "/api/barbers/{}/available-slots?date=2024-03-01",
        fx.barber_id
    );
    let body: Value =
        test::call_and_read_body_json(&app, test::TestRequest::get().uri(&uri).to_request()).await;
    let slots = body["slots"].as_array().unwrap();
    assert_eq!(slots.len(), 18);
    assert_eq!(slots[0], "09:00");
    assert_eq!(slots[17], "17:30");
}

#[actix_web::test]
async fn guest_booking_takes_the_slot_and_rebooking_fails() {
    let store = Arc::new(MemStorage::new());
    let fx = seed(&store).await;
    let app = test_app!(store);

    let booking = json!({
        "client_name": "Rui",
        "client_email": "rui@example.com",
        "client_phone": "911111111",
        "barber_id": fx.barber_id,
        "service_id": fx.service_id,
        "date": "2024-03-01T10:00",
    });
    let resp = test::call_service(
        &app,
        test::TestRequest::post()
            .uri("/api/appointments")
            .set_json(&booking)
            .to_request(),
    )
    .await;
    assert_eq!(resp.status(), 201);

    let uri = format!(
        "/api/barbers/{}/available-slots?date=2024-03-01",
        fx.barber_id
    );
    let body: Value =
        test::call_and_read_body_json(&app, test::TestRequest::get().uri(&uri).to_request()).await;
    let slots = body["slots"].as_array().unwrap();
    assert_eq!(slots.len(), 17);
    assert!(!slots.iter().any(|slot| slot == "10:00"));

    // Same slot again, different guest.
    let again = json!({
        "client_name": "Ana",
        "client_email": "ana@example.com",
        "barber_id": fx.barber_id,
        "service_id": fx.service_id,
        "date": "2024-03-01T10:15",
    });
    let resp = test::call_service(
        &app,
        test::TestRequest::post()
            .uri("/api/appointments")
            .set_json(&again)
            .to_request(),
    )
    .await;
    assert_eq!(resp.status(), 400);
}

#[actix_web::test]
async fn failed_guest_booking_leaves_no_client_behind() {
    let store = Arc::new(MemStorage::new());
    let fx = seed(&store).await;
    let app = test_app!(store);

    let broken = json!({
        "client_name": "Rui",
        "client_email": "rui@example.com",
        "client_phone": "911111111",
        "barber_id": fx.barber_id,
        "service_id": fx.service_id,
        "date": "not-a-date",
    });
    let resp = test::call_service(
        &app,
        test::TestRequest::post()
            .uri("/api/appointments")
            .set_json(&broken)
            .to_request(),
    )
    .await;
    assert_eq!(resp.status(), 400);

    // The rejected booking must not have registered the guest, so the
    // same phone books fine once the date is valid.
    let valid = json!({
        "client_name": "Rui",
        "client_email": "rui@example.com",
        "client_phone": "911111111",
        "barber_id": fx.barber_id,
        "service_id": fx.service_id,
        "date": "2024-03-01T10:00",
    });
    let resp = test::call_service(
        &app,
        test::TestRequest::post()
            .uri("/api/appointments")
            .set_json(&valid)
            .to_request(),
    )
    .await;
    assert_eq!(resp.status(), 201);
}

#[actix_web::test]
async fn reused_guest_phone_reports_its_code() {
    let store = Arc::new(MemStorage::new());
    let fx = seed(&store).await;
    let app = test_app!(store);

    let first = json!({
        "client_name": "Rui",
        "client_email": "rui@example.com",
        "client_phone": "911111111",
        "barber_id": fx.barber_id,
        "service_id": fx.service_id,
        "date": "2024-03-01T10:00",
    });
    let resp = test::call_service(
        &app,
        test::TestRequest::post()
            .uri("/api/appointments")
            .set_json(&first)
            .to_request(),
    )
    .await;
    assert_eq!(resp.status(), 201);

    let second = json!({
        "client_name": "Ana",
        "client_email": "ana@example.com",
        "client_phone": "911111111",
        "barber_id": fx.barber_id,
        "service_id": fx.service_id,
        "date": "2024-03-01T11:00",
    });
    let resp = test::call_service(
        &app,
        test::TestRequest::post()
            .uri("/api/appointments")
            .set_json(&second)
            .to_request(),
    )
    .await;
    assert_eq!(resp.status(), 400);
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["code"], "PHONE_ALREADY_EXISTS");
}

#[actix_web::test]
async fn appointment_listing_is_admin_only() {
    let store = Arc::new(MemStorage::new());
    seed(&store).await;
    let app = test_app!(store);

    let resp = test::call_service(
        &app,
        test::TestRequest::get().uri("/api/appointments").to_request(),
    )
    .await;
    assert_eq!(resp.status(), 401);

    let resp = test::call_service(
        &app,
        test::TestRequest::get()
            .uri("/api/appointments")
            .insert_header(barber_auth())
            .to_request(),
    )
    .await;
    assert_eq!(resp.status(), 403);

    let resp = test::call_service(
        &app,
        test::TestRequest::get()
            .uri("/api/appointments")
            .insert_header(admin_auth())
            .to_request(),
    )
    .await;
    assert_eq!(resp.status(), 200);
}

#[actix_web::test]
async fn barber_cannot_report_work_for_someone_else() {
    let store = Arc::new(MemStorage::new());
    let fx = seed(&store).await;
    let app = test_app!(store);

    let report = json!({
        "barber_id": fx.barber_id + 99,
        "service_id": fx.service_id,
        "client_name": "Rui",
        "date": "2024-03-01T10:00",
    });
    let resp = test::call_service(
        &app,
        test::TestRequest::post()
            .uri("/api/completed-services")
            .insert_header(barber_auth())
            .set_json(&report)
            .to_request(),
    )
    .await;
    assert_eq!(resp.status(), 403);
}

#[actix_web::test]
async fn reported_work_moves_from_pending_to_validated() {
    let store = Arc::new(MemStorage::new());
    let fx = seed(&store).await;
    let app = test_app!(store);

    let report = json!({
        "barber_id": fx.barber_id,
        "service_id": fx.service_id,
        "client_name": "Rui",
        "date": "2024-03-01T10:00",
    });
    let record: Value = test::call_and_read_body_json(
        &app,
        test::TestRequest::post()
            .uri("/api/completed-services")
            .insert_header(barber_auth())
            .set_json(&report)
            .to_request(),
    )
    .await;
    let record_id = record["id"].as_i64().unwrap();

    let pending: Value = test::call_and_read_body_json(
        &app,
        test::TestRequest::get()
            .uri("/api/barber/services/pending")
            .insert_header(barber_auth())
            .to_request(),
    )
    .await;
    assert_eq!(pending.as_array().unwrap().len(), 1);

    let resp = test::call_service(
        &app,
        test::TestRequest::patch()
            .uri(&format!("/api/completed-services/{record_id}/validate"))
            .insert_header(admin_auth())
            .to_request(),
    )
    .await;
    assert_eq!(resp.status(), 200);

    let pending: Value = test::call_and_read_body_json(
        &app,
        test::TestRequest::get()
            .uri("/api/barber/services/pending")
            .insert_header(barber_auth())
            .to_request(),
    )
    .await;
    assert!(pending.as_array().unwrap().is_empty());

    let validated: Value = test::call_and_read_body_json(
        &app,
        test::TestRequest::get()
            .uri("/api/barber/services/validated")
            .insert_header(barber_auth())
            .to_request(),
    )
    .await;
    assert_eq!(validated["services"].as_array().unwrap().len(), 1);
}

#[actix_web::test]
async fn invite_flow_creates_a_barber_once() {
    let store = Arc::new(MemStorage::new());
    seed(&store).await;
    let app = test_app!(store);

    let invite: Value = test::call_and_read_body_json(
        &app,
        test::TestRequest::post()
            .uri("/api/invites")
            .insert_header(admin_auth())
            .set_json(json!({ "email": "novo@example.com" }))
            .to_request(),
    )
    .await;
    let token = invite["token"].as_str().unwrap().to_string();

    let acceptance = json!({
        "username": "novo",
        "email": "novo@example.com",
        "password": "s3cret",
        "payment_period": "monthly",
    });
    let resp = test::call_service(
        &app,
        test::TestRequest::post()
            .uri(&format!("/api/invites/{token}/accept"))
            .set_json(&acceptance)
            .to_request(),
    )
    .await;
    assert_eq!(resp.status(), 201);

    let retry = json!({
        "username": "outro",
        "email": "outro@example.com",
        "password": "s3cret",
    });
    let resp = test::call_service(
        &app,
        test::TestRequest::post()
            .uri(&format!("/api/invites/{token}/accept"))
            .set_json(&retry)
            .to_request(),
    )
    .await;
    assert_eq!(resp.status(), 400);
}

#[actix_web::test]
async fn terminal_appointment_status_survives_an_invalid_update() {
    let store = Arc::new(MemStorage::new());
    let fx = seed(&store).await;
    let app = test_app!(store);

    let booking = json!({
        "client_name": "Rui",
        "client_email": "rui@example.com",
        "barber_id": fx.barber_id,
        "service_id": fx.service_id,
        "date": "2024-03-01T10:00",
    });
    let appointment: Value = test::call_and_read_body_json(
        &app,
        test::TestRequest::post()
            .uri("/api/appointments")
            .set_json(&booking)
            .to_request(),
    )
    .await;
    let id = appointment["id"].as_i64().unwrap();

    let resp = test::call_service(
        &app,
        test::TestRequest::patch()
            .uri(&format!("/api/appointments/{id}/status"))
            .set_json(json!({ "status": "canceled" }))
            .to_request(),
    )
    .await;
    assert_eq!(resp.status(), 200);

    let resp = test::call_service(
        &app,
        test::TestRequest::patch()
            .uri(&format!("/api/appointments/{id}/status"))
            .set_json(json!({ "status": "confirmed" }))
            .to_request(),
    )
    .await;
    assert_eq!(resp.status(), 400);

    let detail: Value = test::call_and_read_body_json(
        &app,
        test::TestRequest::get()
            .uri(&format!("/api/appointments/{id}"))
            .insert_header(admin_auth())
            .to_request(),
    )
    .await;
    assert_eq!(detail["status"], "canceled");
}
