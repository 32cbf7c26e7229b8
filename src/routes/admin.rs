//! Management surface: barbers, clients, services, products, commissions,
//! payments, invites and the action log. The barber list stays public so
//! the booking page can render it; everything else requires an admin.

use actix_web::{web, HttpResponse};
use rust_decimal::Decimal;
use serde::Deserialize;
use serde_json::json;

use crate::audit;
use crate::auth::AdminUser;
use crate::error::ApiError;
use crate::models::{
    NewCommission, NewProduct, NewProductCommission, NewService, PaymentPeriod, Role,
};
use crate::onboarding::{self, BarberAccount, ClientSignup};
use crate::settlement::{self, PaymentRequest};
use crate::state::AppState;
use crate::storage::Storage;

const DEFAULT_LOG_LIMIT: i64 = 100;

// Public: the booking page needs the roster. Inactive and hidden barbers
// are filtered out.
async fn list_barbers(state: web::Data<AppState>) -> Result<HttpResponse, ApiError> {
    let barbers = state.store.list_barbers().await?;
    let visible: Vec<_> = barbers
        .into_iter()
        .filter(|profile| profile.barber.active && profile.barber.calendar_visible)
        .collect();
    Ok(HttpResponse::Ok().json(visible))
}

#[derive(Deserialize)]
struct BarberBody {
    username: String,
    email: String,
    password: String,
    phone: Option<String>,
    nif: Option<String>,
    iban: Option<String>,
    payment_period: Option<PaymentPeriod>,
    calendar_visible: Option<bool>,
}

async fn create_barber(
    state: web::Data<AppState>,
    admin: AdminUser,
    body: web::Json<BarberBody>,
) -> Result<HttpResponse, ApiError> {
    let body = body.into_inner();
    let store = state.store.as_ref();
    let (user, barber) = onboarding::create_barber(
        store,
        BarberAccount {
            username: body.username,
            email: body.email,
            phone: body.phone,
            password: body.password,
            nif: body.nif,
            iban: body.iban,
            payment_period: body.payment_period.unwrap_or(PaymentPeriod::Monthly),
            calendar_visible: body.calendar_visible.unwrap_or(true),
        },
    )
    .await?;
    audit::record(store, Some(admin.0.id), "barber.create", "barber", Some(barber.id), None).await;
    Ok(HttpResponse::Created().json(json!({ "user": user, "barber": barber })))
}

async fn barber_detail(
    state: web::Data<AppState>,
    _admin: AdminUser,
    path: web::Path<i64>,
) -> Result<HttpResponse, ApiError> {
    let barber = state
        .store
        .barber_by_id(path.into_inner())
        .await?
        .ok_or_else(|| ApiError::NotFound("barber".into()))?;
    Ok(HttpResponse::Ok().json(barber))
}

async fn deactivate_barber(
    state: web::Data<AppState>,
    admin: AdminUser,
    path: web::Path<i64>,
) -> Result<HttpResponse, ApiError> {
    let id = path.into_inner();
    let store = state.store.as_ref();
    if !store.deactivate_barber(id).await? {
        return Err(ApiError::NotFound("barber".into()));
    }
    audit::record(store, Some(admin.0.id), "barber.deactivate", "barber", Some(id), None).await;
    Ok(HttpResponse::NoContent().finish())
}

#[derive(Deserialize)]
struct ClientBody {
    username: String,
    email: String,
    phone: Option<String>,
    password: Option<String>,
    metadata: Option<String>,
}

async fn create_client(
    state: web::Data<AppState>,
    admin: AdminUser,
    body: web::Json<ClientBody>,
) -> Result<HttpResponse, ApiError> {
    let body = body.into_inner();
    let store = state.store.as_ref();
    let client = onboarding::create_client(
        store,
        ClientSignup {
            username: body.username,
            email: body.email,
            phone: body.phone,
            password: body.password,
            metadata: body.metadata,
        },
    )
    .await?;
    audit::record(store, Some(admin.0.id), "client.create", "user", Some(client.id), None).await;
    Ok(HttpResponse::Created().json(client))
}

async fn list_clients(
    state: web::Data<AppState>,
    _admin: AdminUser,
) -> Result<HttpResponse, ApiError> {
    let clients = state.store.list_users_by_role(Role::Client).await?;
    Ok(HttpResponse::Ok().json(clients))
}

#[derive(Deserialize)]
struct ServiceBody {
    name: String,
    price: Decimal,
    duration_minutes: Option<i64>,
}

async fn create_service(
    state: web::Data<AppState>,
    admin: AdminUser,
    body: web::Json<ServiceBody>,
) -> Result<HttpResponse, ApiError> {
    let body = body.into_inner();
    if body.name.trim().is_empty() {
        return Err(ApiError::Validation("name is required".into()));
    }
    let store = state.store.as_ref();
    let service = store
        .create_service(NewService {
            name: body.name,
            price: body.price,
            duration_minutes: body.duration_minutes.unwrap_or(30),
        })
        .await?;
    audit::record(store, Some(admin.0.id), "service.create", "service", Some(service.id), None)
        .await;
    Ok(HttpResponse::Created().json(service))
}

#[derive(Deserialize)]
struct CatalogQuery {
    #[serde(default)]
    include_inactive: bool,
}

// Public: bookers pick from the active services.
async fn list_services(
    state: web::Data<AppState>,
    query: web::Query<CatalogQuery>,
) -> Result<HttpResponse, ApiError> {
    let services = state.store.list_services(!query.include_inactive).await?;
    Ok(HttpResponse::Ok().json(services))
}

async fn deactivate_service(
    state: web::Data<AppState>,
    admin: AdminUser,
    path: web::Path<i64>,
) -> Result<HttpResponse, ApiError> {
    let id = path.into_inner();
    let store = state.store.as_ref();
    if !store.deactivate_service(id).await? {
        return Err(ApiError::NotFound("service".into()));
    }
    audit::record(store, Some(admin.0.id), "service.deactivate", "service", Some(id), None).await;
    Ok(HttpResponse::NoContent().finish())
}

#[derive(Deserialize)]
struct ProductBody {
    name: String,
    price: Decimal,
}

async fn create_product(
    state: web::Data<AppState>,
    admin: AdminUser,
    body: web::Json<ProductBody>,
) -> Result<HttpResponse, ApiError> {
    let body = body.into_inner();
    if body.name.trim().is_empty() {
        return Err(ApiError::Validation("name is required".into()));
    }
    let store = state.store.as_ref();
    let product = store
        .create_product(NewProduct {
            name: body.name,
            price: body.price,
        })
        .await?;
    audit::record(store, Some(admin.0.id), "product.create", "product", Some(product.id), None)
        .await;
    Ok(HttpResponse::Created().json(product))
}

async fn list_products(
    state: web::Data<AppState>,
    _admin: AdminUser,
    query: web::Query<CatalogQuery>,
) -> Result<HttpResponse, ApiError> {
    let products = state.store.list_products(!query.include_inactive).await?;
    Ok(HttpResponse::Ok().json(products))
}

async fn deactivate_product(
    state: web::Data<AppState>,
    admin: AdminUser,
    path: web::Path<i64>,
) -> Result<HttpResponse, ApiError> {
    let id = path.into_inner();
    let store = state.store.as_ref();
    if !store.deactivate_product(id).await? {
        return Err(ApiError::NotFound("product".into()));
    }
    audit::record(store, Some(admin.0.id), "product.deactivate", "product", Some(id), None).await;
    Ok(HttpResponse::NoContent().finish())
}

#[derive(Deserialize)]
struct CommissionBody {
    barber_id: i64,
    service_id: i64,
    percentage: Decimal,
}

async fn create_commission(
    state: web::Data<AppState>,
    admin: AdminUser,
    body: web::Json<CommissionBody>,
) -> Result<HttpResponse, ApiError> {
    let body = body.into_inner();
    if body.percentage < Decimal::ZERO || body.percentage > Decimal::ONE_HUNDRED {
        return Err(ApiError::Validation("percentage must be between 0 and 100".into()));
    }
    let store = state.store.as_ref();
    if store.barber_by_id(body.barber_id).await?.is_none() {
        return Err(ApiError::NotFound("barber".into()));
    }
    if store.service_by_id(body.service_id).await?.is_none() {
        return Err(ApiError::NotFound("service".into()));
    }
    let commission = store
        .create_commission(NewCommission {
            barber_id: body.barber_id,
            service_id: body.service_id,
            percentage: body.percentage,
        })
        .await?;
    audit::record(
        store,
        Some(admin.0.id),
        "commission.create",
        "commission",
        Some(commission.id),
        None,
    )
    .await;
    Ok(HttpResponse::Created().json(commission))
}

async fn list_commissions(
    state: web::Data<AppState>,
    _admin: AdminUser,
    path: web::Path<i64>,
) -> Result<HttpResponse, ApiError> {
    let commissions = state.store.list_commissions(path.into_inner()).await?;
    Ok(HttpResponse::Ok().json(commissions))
}

#[derive(Deserialize)]
struct ProductCommissionBody {
    barber_id: i64,
    product_id: i64,
    percentage: Decimal,
}

async fn create_product_commission(
    state: web::Data<AppState>,
    admin: AdminUser,
    body: web::Json<ProductCommissionBody>,
) -> Result<HttpResponse, ApiError> {
    let body = body.into_inner();
    if body.percentage < Decimal::ZERO || body.percentage > Decimal::ONE_HUNDRED {
        return Err(ApiError::Validation("percentage must be between 0 and 100".into()));
    }
    let store = state.store.as_ref();
    if store.barber_by_id(body.barber_id).await?.is_none() {
        return Err(ApiError::NotFound("barber".into()));
    }
    if store.product_by_id(body.product_id).await?.is_none() {
        return Err(ApiError::NotFound("product".into()));
    }
    let commission = store
        .create_product_commission(NewProductCommission {
            barber_id: body.barber_id,
            product_id: body.product_id,
            percentage: body.percentage,
        })
        .await?;
    audit::record(
        store,
        Some(admin.0.id),
        "product_commission.create",
        "product_commission",
        Some(commission.id),
        None,
    )
    .await;
    Ok(HttpResponse::Created().json(commission))
}

async fn list_product_commissions(
    state: web::Data<AppState>,
    _admin: AdminUser,
    path: web::Path<i64>,
) -> Result<HttpResponse, ApiError> {
    let commissions = state.store.list_product_commissions(path.into_inner()).await?;
    Ok(HttpResponse::Ok().json(commissions))
}

#[derive(Deserialize)]
struct PaymentBody {
    barber_id: i64,
    amount: Decimal,
    period_start: String,
    period_end: String,
    notes: Option<String>,
}

async fn create_payment(
    state: web::Data<AppState>,
    admin: AdminUser,
    body: web::Json<PaymentBody>,
) -> Result<HttpResponse, ApiError> {
    let body = body.into_inner();
    let store = state.store.as_ref();
    let created = settlement::create_payment(
        store,
        PaymentRequest {
            barber_id: body.barber_id,
            amount: body.amount,
            period_start: body.period_start,
            period_end: body.period_end,
            notes: body.notes,
        },
    )
    .await?;
    audit::record(
        store,
        Some(admin.0.id),
        "payment.create",
        "payment",
        Some(created.payment.id),
        Some(json!({ "amount": created.payment.amount, "owed": created.owed }).to_string()),
    )
    .await;
    Ok(HttpResponse::Created().json(created))
}

async fn mark_payment_paid(
    state: web::Data<AppState>,
    admin: AdminUser,
    path: web::Path<i64>,
) -> Result<HttpResponse, ApiError> {
    let id = path.into_inner();
    let store = state.store.as_ref();
    let payment = settlement::mark_payment_paid(store, id).await?;
    audit::record(store, Some(admin.0.id), "payment.paid", "payment", Some(id), None).await;
    Ok(HttpResponse::Ok().json(payment))
}

async fn barber_completed_services(
    state: web::Data<AppState>,
    _admin: AdminUser,
    path: web::Path<i64>,
) -> Result<HttpResponse, ApiError> {
    let records = state
        .store
        .completed_services_for_barber(path.into_inner())
        .await?;
    Ok(HttpResponse::Ok().json(records))
}

async fn barber_payments(
    state: web::Data<AppState>,
    _admin: AdminUser,
    path: web::Path<i64>,
) -> Result<HttpResponse, ApiError> {
    let payments = state.store.payments_for_barber(path.into_inner()).await?;
    Ok(HttpResponse::Ok().json(payments))
}

#[derive(Deserialize)]
struct InviteBody {
    email: String,
}

async fn create_invite(
    state: web::Data<AppState>,
    admin: AdminUser,
    body: web::Json<InviteBody>,
) -> Result<HttpResponse, ApiError> {
    let store = state.store.as_ref();
    let invite = onboarding::create_invite(store, admin.0.id, body.into_inner().email).await?;
    audit::record(store, Some(admin.0.id), "invite.create", "invite", Some(invite.id), None).await;
    Ok(HttpResponse::Created().json(invite))
}

#[derive(Deserialize)]
struct LogQuery {
    limit: Option<i64>,
}

async fn list_actions(
    state: web::Data<AppState>,
    _admin: AdminUser,
    query: web::Query<LogQuery>,
) -> Result<HttpResponse, ApiError> {
    let limit = query.limit.unwrap_or(DEFAULT_LOG_LIMIT).max(1);
    let actions = state.store.list_actions(limit).await?;
    Ok(HttpResponse::Ok().json(actions))
}

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::resource("/api/barbers")
            .route(web::get().to(list_barbers))
            .route(web::post().to(create_barber)),
    )
    .service(
        web::resource("/api/barbers/{id}")
            .route(web::get().to(barber_detail))
            .route(web::delete().to(deactivate_barber)),
    )
    .service(web::resource("/api/barbers/{id}/payments").route(web::get().to(barber_payments)))
    .service(
        web::resource("/api/barbers/{id}/completed-services")
            .route(web::get().to(barber_completed_services)),
    )
    .service(
        web::resource("/api/barbers/{id}/commissions").route(web::get().to(list_commissions)),
    )
    .service(
        web::resource("/api/barbers/{id}/product-commissions")
            .route(web::get().to(list_product_commissions)),
    )
    .service(
        web::resource("/api/clients")
            .route(web::post().to(create_client))
            .route(web::get().to(list_clients)),
    )
    .service(
        web::resource("/api/services")
            .route(web::get().to(list_services))
            .route(web::post().to(create_service)),
    )
    .service(web::resource("/api/services/{id}").route(web::delete().to(deactivate_service)))
    .service(
        web::resource("/api/products")
            .route(web::get().to(list_products))
            .route(web::post().to(create_product)),
    )
    .service(web::resource("/api/products/{id}").route(web::delete().to(deactivate_product)))
    .service(web::resource("/api/commissions").route(web::post().to(create_commission)))
    .service(
        web::resource("/api/product-commissions")
            .route(web::post().to(create_product_commission)),
    )
    .service(
        web::resource("/api/payments").route(web::post().to(create_payment)),
    )
    .service(web::resource("/api/payments/{id}/pay").route(web::patch().to(mark_payment_paid)))
    .service(web::resource("/api/invites").route(web::post().to(create_invite)))
    .service(web::resource("/api/action-logs").route(web::get().to(list_actions)));
}
