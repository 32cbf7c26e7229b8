//! Storage abstraction over the relational backend.
//!
//! Two implementations: [`SqliteStorage`] for production and [`MemStorage`]
//! for tests. Multi-entity mutations (appointment creation with its slot
//! check, completed-service recording with its appointment sync, invite
//! consumption) are single trait operations so the SQLite backend can run
//! them inside one transaction.

mod memory;
mod sqlite;

pub use memory::MemStorage;
pub use sqlite::SqliteStorage;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};

use crate::models::{
    ActionLog, Appointment, AppointmentDetail, AppointmentStatus, Barber, BarberInvite,
    BarberProfile, Commission, CompletedService, CompletedServiceDetail, NewActionLog,
    NewAppointment, NewBarber, NewBarberInvite, NewCommission, NewCompletedService, NewPayment,
    NewProduct, NewProductCommission, NewProductSale, NewService, NewUser, Payment, Product,
    ProductCommission, ProductSale, Role, Service, User,
};

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("{0} not found")]
    NotFound(String),

    #[error("{0}")]
    Conflict(String),

    #[error("{0}")]
    Invalid(String),

    #[error("database error: {0}")]
    Database(String),
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        // A unique-constraint race slipping past an existence check is a
        // conflict, not a server fault.
        if let sqlx::Error::Database(db_err) = &err {
            if db_err.is_unique_violation() {
                return StoreError::Conflict(db_err.message().to_string());
            }
        }
        StoreError::Database(err.to_string())
    }
}

pub type StoreResult<T> = Result<T, StoreError>;

#[async_trait]
pub trait Storage: Send + Sync {
    // ---- users ----
    async fn create_user(&self, new: NewUser) -> StoreResult<User>;
    async fn user_by_id(&self, id: i64) -> StoreResult<Option<User>>;
    async fn user_by_username(&self, username: &str) -> StoreResult<Option<User>>;
    async fn phone_in_use(&self, phone: &str) -> StoreResult<bool>;
    async fn list_users_by_role(&self, role: Role) -> StoreResult<Vec<User>>;

    // ---- barbers ----
    async fn create_barber(&self, new: NewBarber) -> StoreResult<Barber>;
    async fn barber_by_id(&self, id: i64) -> StoreResult<Option<Barber>>;
    async fn barber_by_user(&self, user_id: i64) -> StoreResult<Option<Barber>>;
    async fn list_barbers(&self) -> StoreResult<Vec<BarberProfile>>;
    async fn deactivate_barber(&self, id: i64) -> StoreResult<bool>;

    // ---- services ----
    async fn create_service(&self, new: NewService) -> StoreResult<Service>;
    async fn service_by_id(&self, id: i64) -> StoreResult<Option<Service>>;
    async fn list_services(&self, only_active: bool) -> StoreResult<Vec<Service>>;
    async fn deactivate_service(&self, id: i64) -> StoreResult<bool>;

    // ---- products ----
    async fn create_product(&self, new: NewProduct) -> StoreResult<Product>;
    async fn product_by_id(&self, id: i64) -> StoreResult<Option<Product>>;
    async fn list_products(&self, only_active: bool) -> StoreResult<Vec<Product>>;
    async fn deactivate_product(&self, id: i64) -> StoreResult<bool>;

    // ---- commissions ----
    /// Rejects a duplicate (barber, service) pair with `Conflict`.
    async fn create_commission(&self, new: NewCommission) -> StoreResult<Commission>;
    async fn commission_for(&self, barber_id: i64, service_id: i64)
        -> StoreResult<Option<Commission>>;
    async fn list_commissions(&self, barber_id: i64) -> StoreResult<Vec<Commission>>;

    /// Rejects a duplicate (barber, product) pair with `Conflict`.
    async fn create_product_commission(
        &self,
        new: NewProductCommission,
    ) -> StoreResult<ProductCommission>;
    async fn product_commission_for(
        &self,
        barber_id: i64,
        product_id: i64,
    ) -> StoreResult<Option<ProductCommission>>;
    async fn list_product_commissions(&self, barber_id: i64)
        -> StoreResult<Vec<ProductCommission>>;

    // ---- appointments ----
    /// Inserts the appointment with status `pending`. The insert and the
    /// slot-availability re-check run as one unit; a non-canceled
    /// appointment already occupying the same half-hour slot for the same
    /// barber yields `Conflict`.
    async fn create_appointment(&self, new: NewAppointment) -> StoreResult<Appointment>;
    async fn appointment_by_id(&self, id: i64) -> StoreResult<Option<Appointment>>;
    async fn appointment_detail(&self, id: i64) -> StoreResult<Option<AppointmentDetail>>;
    async fn list_appointments(&self) -> StoreResult<Vec<AppointmentDetail>>;
    async fn upcoming_appointments(&self, now: DateTime<Utc>)
        -> StoreResult<Vec<AppointmentDetail>>;
    /// Non-canceled appointments for one barber on one calendar day.
    async fn appointments_for_barber_on(
        &self,
        barber_id: i64,
        day: NaiveDate,
    ) -> StoreResult<Vec<Appointment>>;
    async fn set_appointment_status(
        &self,
        id: i64,
        status: AppointmentStatus,
    ) -> StoreResult<Appointment>;

    // ---- completed services ----
    /// Inserts the record and, when it originates from an appointment,
    /// synchronizes that appointment to `completed` in the same unit.
    async fn record_completed_service(
        &self,
        new: NewCompletedService,
    ) -> StoreResult<CompletedService>;
    async fn completed_service_by_id(&self, id: i64) -> StoreResult<Option<CompletedService>>;
    /// Idempotent: an already-validated record is returned unchanged.
    async fn validate_completed_service(&self, id: i64) -> StoreResult<CompletedService>;
    async fn delete_completed_service(&self, id: i64) -> StoreResult<bool>;
    async fn completed_services_for_barber(
        &self,
        barber_id: i64,
    ) -> StoreResult<Vec<CompletedServiceDetail>>;
    async fn list_completed_services(&self, limit: i64)
        -> StoreResult<Vec<CompletedServiceDetail>>;
    /// Validated records dated strictly after the cutoff, ascending.
    async fn validated_services_since(
        &self,
        barber_id: i64,
        cutoff: DateTime<Utc>,
    ) -> StoreResult<Vec<CompletedService>>;
    /// Records still awaiting admin approval, regardless of date.
    async fn pending_services_for_barber(
        &self,
        barber_id: i64,
    ) -> StoreResult<Vec<CompletedService>>;

    // ---- product sales ----
    async fn create_product_sale(&self, new: NewProductSale) -> StoreResult<ProductSale>;
    async fn product_sale_by_id(&self, id: i64) -> StoreResult<Option<ProductSale>>;
    /// Idempotent, like `validate_completed_service`.
    async fn validate_product_sale(&self, id: i64) -> StoreResult<ProductSale>;
    async fn delete_product_sale(&self, id: i64) -> StoreResult<bool>;
    async fn product_sales_for_barber(&self, barber_id: i64) -> StoreResult<Vec<ProductSale>>;

    // ---- payments ----
    async fn create_payment(&self, new: NewPayment) -> StoreResult<Payment>;
    async fn payment_by_id(&self, id: i64) -> StoreResult<Option<Payment>>;
    /// Most recent payment by `period_end`, descending.
    async fn latest_payment_for_barber(&self, barber_id: i64) -> StoreResult<Option<Payment>>;
    async fn payments_for_barber(&self, barber_id: i64) -> StoreResult<Vec<Payment>>;
    /// Idempotent on an already-paid payment.
    async fn mark_payment_paid(&self, id: i64, now: DateTime<Utc>) -> StoreResult<Payment>;

    // ---- barber invites ----
    async fn create_invite(&self, new: NewBarberInvite) -> StoreResult<BarberInvite>;
    /// Consumes the token and creates the barber's user and barber rows as
    /// one unit. Fails with `Invalid` when the token is unknown, expired,
    /// or already used.
    async fn consume_invite(
        &self,
        token: &str,
        now: DateTime<Utc>,
        user: NewUser,
        barber: InviteBarberFields,
    ) -> StoreResult<(User, Barber)>;

    // ---- action log ----
    async fn append_action(&self, entry: NewActionLog) -> StoreResult<ActionLog>;
    async fn list_actions(&self, limit: i64) -> StoreResult<Vec<ActionLog>>;
}

/// Barber-row fields supplied when an invite is accepted; the `user_id`
/// comes from the user created in the same unit.
#[derive(Debug, Clone)]
pub struct InviteBarberFields {
    pub nif: Option<String>,
    pub iban: Option<String>,
    pub payment_period: crate::models::PaymentPeriod,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, thiserror::Error)]
    #[error("UNIQUE constraint failed: users.username")]
    struct DuplicateRowError;

    impl sqlx::error::DatabaseError for DuplicateRowError {
        fn message(&self) -> &str {
            "UNIQUE constraint failed: users.username"
        }

        fn kind(&self) -> sqlx::error::ErrorKind {
            sqlx::error::ErrorKind::UniqueViolation
        }

        fn as_error(&self) -> &(dyn std::error::Error + Send + Sync + 'static) {
            self
        }

        fn as_error_mut(&mut self) -> &mut (dyn std::error::Error + Send + Sync + 'static) {
            self
        }

        fn into_error(self: Box<Self>) -> Box<dyn std::error::Error + Send + Sync + 'static> {
            self
        }
    }

    #[test]
    fn unique_violation_maps_to_conflict() {
        let err = sqlx::Error::Database(Box::new(DuplicateRowError));
        assert!(matches!(StoreError::from(err), StoreError::Conflict(_)));
    }

    #[test]
    fn other_sqlx_errors_stay_database_errors() {
        assert!(matches!(
            StoreError::from(sqlx::Error::RowNotFound),
            StoreError::Database(_)
        ));
    }
}
