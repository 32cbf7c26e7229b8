//! Work reporting: completed services and product sales. Barbers report
//! their own work and read their own settlement views; admins validate,
//! reject and list across barbers.

use actix_web::{web, HttpResponse};
use rust_decimal::Decimal;
use serde::Deserialize;
use serde_json::json;

use crate::audit;
use crate::auth::{AdminUser, AuthUser, BarberUser};
use crate::error::ApiError;
use crate::models::Role;
use crate::settlement::{self, Actor, SaleReport, ServiceReport};
use crate::state::AppState;
use crate::storage::Storage;

const DEFAULT_LIST_LIMIT: i64 = 200;

async fn actor_for(user: &AuthUser, store: &dyn Storage) -> Result<Actor, ApiError> {
    match user.role {
        Role::Admin => Ok(Actor::Admin { user_id: user.id }),
        Role::Barber => {
            let barber = store.barber_by_user(user.id).await?.ok_or_else(|| {
                ApiError::Forbidden("no barber profile for this account".into())
            })?;
            Ok(Actor::Barber {
                user_id: user.id,
                barber_id: barber.id,
            })
        }
        Role::Client => Err(ApiError::Forbidden("staff access required".into())),
    }
}

#[derive(Deserialize)]
struct CompletedServiceBody {
    barber_id: i64,
    service_id: i64,
    client_id: Option<i64>,
    client_name: Option<String>,
    price: Option<Decimal>,
    date: String,
    appointment_id: Option<i64>,
}

async fn record_completed_service(
    state: web::Data<AppState>,
    user: AuthUser,
    body: web::Json<CompletedServiceBody>,
) -> Result<HttpResponse, ApiError> {
    let body = body.into_inner();
    let store = state.store.as_ref();
    let actor = actor_for(&user, store).await?;
    let record = settlement::record_completed_service(
        store,
        actor,
        ServiceReport {
            barber_id: body.barber_id,
            service_id: body.service_id,
            client_id: body.client_id,
            client_name: body.client_name,
            price: body.price,
            date: body.date,
            appointment_id: body.appointment_id,
        },
    )
    .await?;
    audit::record(
        store,
        Some(user.id),
        "completed_service.record",
        "completed_service",
        Some(record.id),
        Some(
            json!({
                "price": record.price,
                "legacy_flat_commission": settlement::legacy_flat_commission(record.price),
            })
            .to_string(),
        ),
    )
    .await;
    Ok(HttpResponse::Created().json(record))
}

#[derive(Deserialize)]
struct ListQuery {
    limit: Option<i64>,
}

async fn list_completed_services(
    state: web::Data<AppState>,
    _admin: AdminUser,
    query: web::Query<ListQuery>,
) -> Result<HttpResponse, ApiError> {
    let limit = query.limit.unwrap_or(DEFAULT_LIST_LIMIT).max(1);
    let records = state.store.list_completed_services(limit).await?;
    Ok(HttpResponse::Ok().json(records))
}

async fn validate_completed_service(
    state: web::Data<AppState>,
    admin: AdminUser,
    path: web::Path<i64>,
) -> Result<HttpResponse, ApiError> {
    let id = path.into_inner();
    let store = state.store.as_ref();
    let record = settlement::approve_completed_service(store, id).await?;
    audit::record(
        store,
        Some(admin.0.id),
        "completed_service.validate",
        "completed_service",
        Some(id),
        None,
    )
    .await;
    Ok(HttpResponse::Ok().json(record))
}

async fn delete_completed_service(
    state: web::Data<AppState>,
    admin: AdminUser,
    path: web::Path<i64>,
) -> Result<HttpResponse, ApiError> {
    let id = path.into_inner();
    let store = state.store.as_ref();
    settlement::reject_completed_service(store, id).await?;
    audit::record(
        store,
        Some(admin.0.id),
        "completed_service.reject",
        "completed_service",
        Some(id),
        None,
    )
    .await;
    Ok(HttpResponse::NoContent().finish())
}

async fn own_pending_services(
    state: web::Data<AppState>,
    barber: BarberUser,
) -> Result<HttpResponse, ApiError> {
    let records = state
        .store
        .pending_services_for_barber(barber.barber.id)
        .await?;
    Ok(HttpResponse::Ok().json(records))
}

async fn own_validated_services(
    state: web::Data<AppState>,
    barber: BarberUser,
) -> Result<HttpResponse, ApiError> {
    let preview = settlement::settlement_preview(state.store.as_ref(), barber.barber.id).await?;
    Ok(HttpResponse::Ok().json(preview))
}

#[derive(Deserialize)]
struct ProductSaleBody {
    barber_id: i64,
    product_id: i64,
    client_id: Option<i64>,
    client_name: Option<String>,
    quantity: i64,
    unit_price: Option<Decimal>,
    date: String,
}

async fn record_product_sale(
    state: web::Data<AppState>,
    user: AuthUser,
    body: web::Json<ProductSaleBody>,
) -> Result<HttpResponse, ApiError> {
    let body = body.into_inner();
    let store = state.store.as_ref();
    let actor = actor_for(&user, store).await?;
    let sale = settlement::record_product_sale(
        store,
        actor,
        SaleReport {
            barber_id: body.barber_id,
            product_id: body.product_id,
            client_id: body.client_id,
            client_name: body.client_name,
            quantity: body.quantity,
            unit_price: body.unit_price,
            date: body.date,
        },
    )
    .await?;
    audit::record(
        store,
        Some(user.id),
        "product_sale.record",
        "product_sale",
        Some(sale.id),
        Some(json!({ "quantity": sale.quantity, "unit_price": sale.unit_price }).to_string()),
    )
    .await;
    Ok(HttpResponse::Created().json(sale))
}

async fn validate_product_sale(
    state: web::Data<AppState>,
    admin: AdminUser,
    path: web::Path<i64>,
) -> Result<HttpResponse, ApiError> {
    let id = path.into_inner();
    let store = state.store.as_ref();
    let sale = settlement::approve_product_sale(store, id).await?;
    audit::record(
        store,
        Some(admin.0.id),
        "product_sale.validate",
        "product_sale",
        Some(id),
        None,
    )
    .await;
    Ok(HttpResponse::Ok().json(sale))
}

async fn delete_product_sale(
    state: web::Data<AppState>,
    user: AuthUser,
    path: web::Path<i64>,
) -> Result<HttpResponse, ApiError> {
    let id = path.into_inner();
    let store = state.store.as_ref();
    let actor = actor_for(&user, store).await?;
    settlement::delete_product_sale(store, actor, id).await?;
    audit::record(
        store,
        Some(user.id),
        "product_sale.delete",
        "product_sale",
        Some(id),
        None,
    )
    .await;
    Ok(HttpResponse::NoContent().finish())
}

async fn own_product_sales(
    state: web::Data<AppState>,
    barber: BarberUser,
) -> Result<HttpResponse, ApiError> {
    let sales =
        settlement::product_sales_with_commission(state.store.as_ref(), barber.barber.id).await?;
    Ok(HttpResponse::Ok().json(sales))
}

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::resource("/api/completed-services")
            .route(web::post().to(record_completed_service))
            .route(web::get().to(list_completed_services)),
    )
    .service(
        web::resource("/api/completed-services/{id}/validate")
            .route(web::patch().to(validate_completed_service)),
    )
    .service(
        web::resource("/api/completed-services/{id}")
            .route(web::delete().to(delete_completed_service)),
    )
    .service(
        web::resource("/api/product-sales").route(web::post().to(record_product_sale)),
    )
    .service(
        web::resource("/api/product-sales/{id}/validate")
            .route(web::post().to(validate_product_sale)),
    )
    .service(
        web::resource("/api/product-sales/{id}").route(web::delete().to(delete_product_sale)),
    )
    .service(
        web::resource("/api/barber/services/pending").route(web::get().to(own_pending_services)),
    )
    .service(
        web::resource("/api/barber/services/validated")
            .route(web::get().to(own_validated_services)),
    )
    .service(
        web::resource("/api/barber/product-sales").route(web::get().to(own_product_sales)),
    );
}
