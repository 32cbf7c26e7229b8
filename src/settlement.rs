//! Completed-service records, product sales, commissions and payments.
//!
//! Barbers report work; admins approve it. Only approved records count
//! towards a barber's earnings, and a payment's `period_end` becomes the
//! cutoff for the next settlement round.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;

use crate::error::ApiError;
use crate::models::{
    parse_wire_datetime, CompletedService, NewCompletedService, NewPayment, NewProductSale,
    Payment, ProductSale,
};
use crate::storage::Storage;

/// Who is performing a settlement operation. Barbers may only touch their
/// own records; admins may touch anyone's.
#[derive(Clone, Copy, Debug)]
pub enum Actor {
    Admin { user_id: i64 },
    Barber { user_id: i64, barber_id: i64 },
}

impl Actor {
    pub fn user_id(&self) -> i64 {
        match self {
            Actor::Admin { user_id } | Actor::Barber { user_id, .. } => *user_id,
        }
    }

    fn check_barber_scope(&self, barber_id: i64) -> Result<(), ApiError> {
        match self {
            Actor::Admin { .. } => Ok(()),
            Actor::Barber { barber_id: own, .. } if *own == barber_id => Ok(()),
            Actor::Barber { .. } => Err(ApiError::Forbidden(
                "barbers may only record their own work".into(),
            )),
        }
    }
}

/// Superseded flat half-price commission. Kept only so audit entries stay
/// comparable with historical ones; the configured percentage is
/// authoritative.
pub fn legacy_flat_commission(price: Decimal) -> Decimal {
    price * Decimal::new(5, 1)
}

#[derive(Debug, Clone)]
pub struct ServiceReport {
    pub barber_id: i64,
    pub service_id: i64,
    pub client_id: Option<i64>,
    pub client_name: Option<String>,
    pub price: Option<Decimal>,
    pub date: String,
    pub appointment_id: Option<i64>,
}

pub async fn record_completed_service(
    store: &dyn Storage,
    actor: Actor,
    report: ServiceReport,
) -> Result<CompletedService, ApiError> {
    actor.check_barber_scope(report.barber_id)?;

    let date = parse_wire_datetime(&report.date)
        .ok_or_else(|| ApiError::Validation(format!("invalid date {:?}", report.date)))?;

    let barber = store
        .barber_by_id(report.barber_id)
        .await?
        .ok_or_else(|| ApiError::NotFound("barber".into()))?;
    let service = store
        .service_by_id(report.service_id)
        .await?
        .ok_or_else(|| ApiError::NotFound("service".into()))?;

    let client_name = match (report.client_id, report.client_name) {
        (Some(client_id), _) => store
            .user_by_id(client_id)
            .await?
            .ok_or_else(|| ApiError::NotFound("client".into()))?
            .username,
        (None, Some(name)) if !name.trim().is_empty() => name.trim().to_string(),
        _ => {
            return Err(ApiError::Validation(
                "either client_id or client_name is required".into(),
            ))
        }
    };

    let record = store
        .record_completed_service(NewCompletedService {
            barber_id: barber.id,
            service_id: service.id,
            client_id: report.client_id,
            client_name,
            price: report.price.unwrap_or(service.price),
            date,
            appointment_id: report.appointment_id,
        })
        .await?;
    Ok(record)
}

/// Idempotent admin approval.
pub async fn approve_completed_service(
    store: &dyn Storage,
    id: i64,
) -> Result<CompletedService, ApiError> {
    Ok(store.validate_completed_service(id).await?)
}

/// Admin rejection removes the record outright.
pub async fn reject_completed_service(store: &dyn Storage, id: i64) -> Result<(), ApiError> {
    if store.delete_completed_service(id).await? {
        Ok(())
    } else {
        Err(ApiError::NotFound("completed service".into()))
    }
}

/// Cutoff for a barber's open settlement window: the `period_end` of the
/// most recent payment, or the epoch when nothing has been settled yet.
pub async fn settlement_cutoff(
    store: &dyn Storage,
    barber_id: i64,
) -> Result<DateTime<Utc>, ApiError> {
    Ok(store
        .latest_payment_for_barber(barber_id)
        .await?
        .map(|payment| payment.period_end)
        .unwrap_or(DateTime::UNIX_EPOCH))
}

#[derive(Debug, Serialize)]
pub struct EarnedCommission {
    #[serde(flatten)]
    pub record: CompletedService,
    pub commission: Decimal,
}

#[derive(Debug, Serialize)]
pub struct SettlementPreview {
    pub cutoff: DateTime<Utc>,
    pub services: Vec<EarnedCommission>,
    pub owed: Decimal,
}

/// Approved services since the last settlement together with the commission
/// each earns. A service without a configured percentage earns zero.
pub async fn settlement_preview(
    store: &dyn Storage,
    barber_id: i64,
) -> Result<SettlementPreview, ApiError> {
    if store.barber_by_id(barber_id).await?.is_none() {
        return Err(ApiError::NotFound("barber".into()));
    }
    let cutoff = settlement_cutoff(store, barber_id).await?;
    let records = store.validated_services_since(barber_id, cutoff).await?;

    let mut services = Vec::with_capacity(records.len());
    let mut owed = Decimal::ZERO;
    for record in records {
        let commission = match store.commission_for(barber_id, record.service_id).await? {
            Some(commission) => record.price * commission.percentage / Decimal::ONE_HUNDRED,
            None => Decimal::ZERO,
        };
        owed += commission;
        services.push(EarnedCommission { record, commission });
    }
    Ok(SettlementPreview {
        cutoff,
        services,
        owed,
    })
}

#[derive(Debug, Clone)]
pub struct PaymentRequest {
    pub barber_id: i64,
    pub amount: Decimal,
    pub period_start: String,
    pub period_end: String,
    pub notes: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct PaymentCreated {
    #[serde(flatten)]
    pub payment: Payment,
    /// Commission owed on approved services dated inside the period.
    /// Advisory; the operator-entered amount is what gets paid.
    pub owed: Decimal,
}

pub async fn create_payment(
    store: &dyn Storage,
    request: PaymentRequest,
) -> Result<PaymentCreated, ApiError> {
    if store.barber_by_id(request.barber_id).await?.is_none() {
        return Err(ApiError::NotFound("barber".into()));
    }
    let period_start = parse_wire_datetime(&request.period_start).ok_or_else(|| {
        ApiError::Validation(format!("invalid period_start {:?}", request.period_start))
    })?;
    let period_end = parse_wire_datetime(&request.period_end).ok_or_else(|| {
        ApiError::Validation(format!("invalid period_end {:?}", request.period_end))
    })?;
    if period_end < period_start {
        return Err(ApiError::Validation(
            "period_end must not precede period_start".into(),
        ));
    }

    let records = store
        .validated_services_since(request.barber_id, period_start)
        .await?;
    let mut owed = Decimal::ZERO;
    for record in records {
        if record.date > period_end {
            continue;
        }
        if let Some(commission) = store
            .commission_for(request.barber_id, record.service_id)
            .await?
        {
            owed += record.price * commission.percentage / Decimal::ONE_HUNDRED;
        }
    }

    let payment = store
        .create_payment(NewPayment {
            barber_id: request.barber_id,
            amount: request.amount,
            period_start,
            period_end,
            notes: request.notes,
        })
        .await?;
    Ok(PaymentCreated { payment, owed })
}

/// Idempotent: a payment already marked paid keeps its original
/// `payment_date`.
pub async fn mark_payment_paid(store: &dyn Storage, id: i64) -> Result<Payment, ApiError> {
    Ok(store.mark_payment_paid(id, Utc::now()).await?)
}

#[derive(Debug, Clone)]
pub struct SaleReport {
    pub barber_id: i64,
    pub product_id: i64,
    pub client_id: Option<i64>,
    pub client_name: Option<String>,
    pub quantity: i64,
    pub unit_price: Option<Decimal>,
    pub date: String,
}

pub async fn record_product_sale(
    store: &dyn Storage,
    actor: Actor,
    report: SaleReport,
) -> Result<ProductSale, ApiError> {
    actor.check_barber_scope(report.barber_id)?;

    if report.quantity < 1 {
        return Err(ApiError::Validation("quantity must be at least 1".into()));
    }
    let date = parse_wire_datetime(&report.date)
        .ok_or_else(|| ApiError::Validation(format!("invalid date {:?}", report.date)))?;

    if store.barber_by_id(report.barber_id).await?.is_none() {
        return Err(ApiError::NotFound("barber".into()));
    }
    let product = store
        .product_by_id(report.product_id)
        .await?
        .ok_or_else(|| ApiError::NotFound("product".into()))?;

    let client_name = match (report.client_id, report.client_name) {
        (Some(client_id), _) => store
            .user_by_id(client_id)
            .await?
            .ok_or_else(|| ApiError::NotFound("client".into()))?
            .username,
        (None, Some(name)) if !name.trim().is_empty() => name.trim().to_string(),
        _ => {
            return Err(ApiError::Validation(
                "either client_id or client_name is required".into(),
            ))
        }
    };

    let sale = store
        .create_product_sale(NewProductSale {
            barber_id: report.barber_id,
            product_id: report.product_id,
            client_id: report.client_id,
            client_name,
            quantity: report.quantity,
            unit_price: report.unit_price.unwrap_or(product.price),
            date,
        })
        .await?;
    Ok(sale)
}

pub async fn approve_product_sale(store: &dyn Storage, id: i64) -> Result<ProductSale, ApiError> {
    Ok(store.validate_product_sale(id).await?)
}

/// Admins may delete any sale; a barber may delete their own only while it
/// is still awaiting approval.
pub async fn delete_product_sale(
    store: &dyn Storage,
    actor: Actor,
    id: i64,
) -> Result<(), ApiError> {
    let sale = store
        .product_sale_by_id(id)
        .await?
        .ok_or_else(|| ApiError::NotFound("product sale".into()))?;
    if let Actor::Barber { barber_id, .. } = actor {
        if sale.barber_id != barber_id {
            return Err(ApiError::Forbidden(
                "barbers may only delete their own sales".into(),
            ));
        }
        if sale.validated_by_admin {
            return Err(ApiError::Forbidden(
                "approved sales can only be deleted by an admin".into(),
            ));
        }
    }
    if store.delete_product_sale(id).await? {
        Ok(())
    } else {
        Err(ApiError::NotFound("product sale".into()))
    }
}

#[derive(Debug, Serialize)]
pub struct SaleCommission {
    #[serde(flatten)]
    pub sale: ProductSale,
    pub commission: Decimal,
}

/// Sales for one barber with the commission each approved sale earns.
/// Unapproved sales and sales without a configured percentage earn zero.
pub async fn product_sales_with_commission(
    store: &dyn Storage,
    barber_id: i64,
) -> Result<Vec<SaleCommission>, ApiError> {
    let sales = store.product_sales_for_barber(barber_id).await?;
    let mut out = Vec::with_capacity(sales.len());
    for sale in sales {
        let commission = if sale.validated_by_admin {
            match store.product_commission_for(barber_id, sale.product_id).await? {
                Some(commission) => {
                    sale.unit_price * Decimal::from(sale.quantity) * commission.percentage
                        / Decimal::ONE_HUNDRED
                }
                None => Decimal::ZERO,
            }
        } else {
            Decimal::ZERO
        };
        out.push(SaleCommission { sale, commission });
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{
        AppointmentStatus, NewAppointment, NewBarber, NewCommission, NewProduct,
        NewProductCommission, NewService, NewUser, PaymentPeriod, Role,
    };
    use crate::storage::MemStorage;

    struct Fixture {
        client_id: i64,
        barber_id: i64,
        service_id: i64,
        product_id: i64,
        admin: Actor,
        barber_actor: Actor,
    }

    async fn fixture(store: &MemStorage) -> Fixture {
        let admin_user = store
            .create_user(NewUser {
                username: "joana".into(),
                email: "joana@example.com".into(),
                phone: None,
                role: Role::Admin,
                password_hash: "x".into(),
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
                password_hash: "x".into(),
                metadata: None,
            })
            .await
            .unwrap();
        let client = store
            .create_user(NewUser {
                username: "carla".into(),
                email: "carla@example.com".into(),
                phone: None,
                role: Role::Client,
                password_hash: "x".into(),
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
                price: Decimal::new(2000, 2),
                duration_minutes: 30,
            })
            .await
            .unwrap();
        let product = store
            .create_product(NewProduct {
                name: "Pomada".into(),
                price: Decimal::new(1000, 2),
            })
            .await
            .unwrap();
        Fixture {
            client_id: client.id,
            barber_id: barber.id,
            service_id: service.id,
            product_id: product.id,
            admin: Actor::Admin {
                user_id: admin_user.id,
            },
            barber_actor: Actor::Barber {
                user_id: barber_user.id,
                barber_id: barber.id,
            },
        }
    }

    fn report(fx: &Fixture, date: &str) -> ServiceReport {
        ServiceReport {
            barber_id: fx.barber_id,
            service_id: fx.service_id,
            client_id: None,
            client_name: Some("Rui".into()),
            price: None,
            date: date.into(),
            appointment_id: None,
        }
    }

    #[tokio::test]
    async fn record_defaults_to_service_price_and_unvalidated() {
        let store = MemStorage::new();
        let fx = fixture(&store).await;
        let record =
            record_completed_service(&store, fx.barber_actor, report(&fx, "2024-02-10T10:00"))
                .await
                .unwrap();
        assert_eq!(record.price, Decimal::new(2000, 2));
        assert!(!record.validated_by_admin);
    }

    #[tokio::test]
    async fn record_requires_some_client_identity() {
        let store = MemStorage::new();
        let fx = fixture(&store).await;
        let mut bad = report(&fx, "2024-02-10T10:00");
        bad.client_name = None;
        let err = record_completed_service(&store, fx.admin, bad).await.unwrap_err();
        assert!(matches!(err, ApiError::Validation(_)));
    }

    #[tokio::test]
    async fn barber_cannot_record_for_another_barber() {
        let store = MemStorage::new();
        let fx = fixture(&store).await;
        let mut foreign = report(&fx, "2024-02-10T10:00");
        foreign.barber_id = fx.barber_id + 99;
        let err = record_completed_service(&store, fx.barber_actor, foreign)
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::Forbidden(_)));
    }

    #[tokio::test]
    async fn recording_from_an_appointment_marks_it_completed() {
        let store = MemStorage::new();
        let fx = fixture(&store).await;
        let appointment = store
            .create_appointment(NewAppointment {
                client_id: fx.client_id,
                barber_id: fx.barber_id,
                service_id: fx.service_id,
                date: crate::models::parse_wire_datetime("2024-02-10T10:00").unwrap(),
                notes: None,
            })
            .await
            .unwrap();
        assert_eq!(appointment.status, AppointmentStatus::Pending);

        let mut from_appointment = report(&fx, "2024-02-10T10:00");
        from_appointment.appointment_id = Some(appointment.id);
        let record = record_completed_service(&store, fx.barber_actor, from_appointment)
            .await
            .unwrap();
        assert_eq!(record.appointment_id, Some(appointment.id));

        let synced = store
            .appointment_by_id(appointment.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(synced.status, AppointmentStatus::Completed);
    }

    #[tokio::test]
    async fn unknown_appointment_reference_writes_nothing() {
        let store = MemStorage::new();
        let fx = fixture(&store).await;
        let mut bad = report(&fx, "2024-02-10T10:00");
        bad.appointment_id = Some(9999);
        let err = record_completed_service(&store, fx.admin, bad).await.unwrap_err();
        assert!(matches!(err, ApiError::NotFound(_)));
        assert!(store
            .pending_services_for_barber(fx.barber_id)
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn approval_is_idempotent() {
        let store = MemStorage::new();
        let fx = fixture(&store).await;
        let record =
            record_completed_service(&store, fx.admin, report(&fx, "2024-02-10T10:00"))
                .await
                .unwrap();
        let first = approve_completed_service(&store, record.id).await.unwrap();
        let second = approve_completed_service(&store, record.id).await.unwrap();
        assert!(first.validated_by_admin);
        assert_eq!(first.validated_by_admin, second.validated_by_admin);
    }

    #[tokio::test]
    async fn rejection_removes_the_record() {
        let store = MemStorage::new();
        let fx = fixture(&store).await;
        let record =
            record_completed_service(&store, fx.admin, report(&fx, "2024-02-10T10:00"))
                .await
                .unwrap();
        reject_completed_service(&store, record.id).await.unwrap();
        assert!(store.completed_service_by_id(record.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn preview_counts_only_approved_services_after_last_payment() {
        let store = MemStorage::new();
        let fx = fixture(&store).await;
        store
            .create_commission(NewCommission {
                barber_id: fx.barber_id,
                service_id: fx.service_id,
                percentage: Decimal::new(50, 0),
            })
            .await
            .unwrap();

        // Settled period ends 2024-01-31; the January record must not count.
        create_payment(
            &store,
            PaymentRequest {
                barber_id: fx.barber_id,
                amount: Decimal::ZERO,
                period_start: "2024-01-01T00:00:00Z".into(),
                period_end: "2024-01-31T23:59:59Z".into(),
                notes: None,
            },
        )
        .await
        .unwrap();

        let january =
            record_completed_service(&store, fx.admin, report(&fx, "2024-01-15T10:00"))
                .await
                .unwrap();
        approve_completed_service(&store, january.id).await.unwrap();

        let february =
            record_completed_service(&store, fx.admin, report(&fx, "2024-02-10T10:00"))
                .await
                .unwrap();
        approve_completed_service(&store, february.id).await.unwrap();

        record_completed_service(&store, fx.admin, report(&fx, "2024-02-12T10:00"))
            .await
            .unwrap();

        let preview = settlement_preview(&store, fx.barber_id).await.unwrap();
        assert_eq!(preview.services.len(), 1);
        assert_eq!(preview.services[0].record.id, february.id);
        // 20.00 at 50% commission.
        assert_eq!(preview.owed, Decimal::new(1000, 2));
    }

    #[tokio::test]
    async fn payment_reports_advisory_owed_for_the_period() {
        let store = MemStorage::new();
        let fx = fixture(&store).await;
        store
            .create_commission(NewCommission {
                barber_id: fx.barber_id,
                service_id: fx.service_id,
                percentage: Decimal::new(25, 0),
            })
            .await
            .unwrap();
        let record =
            record_completed_service(&store, fx.admin, report(&fx, "2024-02-10T10:00"))
                .await
                .unwrap();
        approve_completed_service(&store, record.id).await.unwrap();

        let created = create_payment(
            &store,
            PaymentRequest {
                barber_id: fx.barber_id,
                amount: Decimal::new(450, 2),
                period_start: "2024-02-01T00:00:00Z".into(),
                period_end: "2024-02-29T23:59:59Z".into(),
                notes: None,
            },
        )
        .await
        .unwrap();
        // 20.00 at 25% owed, regardless of the entered amount.
        assert_eq!(created.owed, Decimal::new(500, 2));
        assert_eq!(created.payment.amount, Decimal::new(450, 2));
        assert_eq!(created.payment.status, crate::models::PaymentStatus::Pending);
    }

    #[tokio::test]
    async fn inverted_payment_period_is_rejected() {
        let store = MemStorage::new();
        let fx = fixture(&store).await;
        let err = create_payment(
            &store,
            PaymentRequest {
                barber_id: fx.barber_id,
                amount: Decimal::ONE,
                period_start: "2024-02-29T00:00:00Z".into(),
                period_end: "2024-02-01T00:00:00Z".into(),
                notes: None,
            },
        )
        .await
        .unwrap_err();
        assert!(matches!(err, ApiError::Validation(_)));
    }

    #[tokio::test]
    async fn marking_paid_twice_keeps_first_payment_date() {
        let store = MemStorage::new();
        let fx = fixture(&store).await;
        let created = create_payment(
            &store,
            PaymentRequest {
                barber_id: fx.barber_id,
                amount: Decimal::ONE,
                period_start: "2024-02-01T00:00:00Z".into(),
                period_end: "2024-02-29T00:00:00Z".into(),
                notes: None,
            },
        )
        .await
        .unwrap();
        let first = mark_payment_paid(&store, created.payment.id).await.unwrap();
        let second = mark_payment_paid(&store, created.payment.id).await.unwrap();
        assert_eq!(first.payment_date, second.payment_date);
    }

    fn sale(fx: &Fixture, quantity: i64) -> SaleReport {
        SaleReport {
            barber_id: fx.barber_id,
            product_id: fx.product_id,
            client_id: None,
            client_name: Some("Rui".into()),
            quantity,
            unit_price: None,
            date: "2024-02-10T10:00".into(),
        }
    }

    #[tokio::test]
    async fn sale_quantity_must_be_positive() {
        let store = MemStorage::new();
        let fx = fixture(&store).await;
        let err = record_product_sale(&store, fx.admin, sale(&fx, 0)).await.unwrap_err();
        assert!(matches!(err, ApiError::Validation(_)));
    }

    #[tokio::test]
    async fn approved_sale_earns_configured_commission() {
        let store = MemStorage::new();
        let fx = fixture(&store).await;
        store
            .create_product_commission(NewProductCommission {
                barber_id: fx.barber_id,
                product_id: fx.product_id,
                percentage: Decimal::new(20, 0),
            })
            .await
            .unwrap();
        let recorded = record_product_sale(&store, fx.admin, sale(&fx, 3)).await.unwrap();
        approve_product_sale(&store, recorded.id).await.unwrap();

        let listed = product_sales_with_commission(&store, fx.barber_id).await.unwrap();
        assert_eq!(listed.len(), 1);
        // 3 x 10.00 at 20%.
        assert_eq!(listed[0].commission, Decimal::new(600, 2));
    }

    #[tokio::test]
    async fn unapproved_sale_earns_nothing() {
        let store = MemStorage::new();
        let fx = fixture(&store).await;
        store
            .create_product_commission(NewProductCommission {
                barber_id: fx.barber_id,
                product_id: fx.product_id,
                percentage: Decimal::new(20, 0),
            })
            .await
            .unwrap();
        record_product_sale(&store, fx.admin, sale(&fx, 3)).await.unwrap();

        let listed = product_sales_with_commission(&store, fx.barber_id).await.unwrap();
        assert_eq!(listed[0].commission, Decimal::ZERO);
    }

    #[tokio::test]
    async fn barber_cannot_delete_approved_sale() {
        let store = MemStorage::new();
        let fx = fixture(&store).await;
        let recorded = record_product_sale(&store, fx.admin, sale(&fx, 1)).await.unwrap();
        approve_product_sale(&store, recorded.id).await.unwrap();

        let err = delete_product_sale(&store, fx.barber_actor, recorded.id)
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::Forbidden(_)));

        delete_product_sale(&store, fx.admin, recorded.id).await.unwrap();
        assert!(store.product_sale_by_id(recorded.id).await.unwrap().is_none());
    }

    #[test]
    fn legacy_figure_is_half_price() {
        assert_eq!(legacy_flat_commission(Decimal::new(2000, 2)), Decimal::new(1000, 2));
    }
}
