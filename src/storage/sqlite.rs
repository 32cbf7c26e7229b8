//! SQLite storage backend.
//!
//! Dates are stored as RFC 3339 TEXT and money as decimal TEXT; both are
//! parsed on the way out. All timestamps are UTC, so RFC 3339 strings
//! compare correctly in SQL.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use sqlx::SqlitePool;

use crate::models::*;
use crate::scheduling::slot_label;
use crate::storage::{InviteBarberFields, Storage, StoreError, StoreResult};

#[derive(Clone)]
pub struct SqliteStorage {
    pool: SqlitePool,
}

impl SqliteStorage {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

fn parse_dt(value: &str) -> StoreResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|err| StoreError::Database(format!("bad stored date {value:?}: {err}")))
}

fn parse_dt_opt(value: Option<&str>) -> StoreResult<Option<DateTime<Utc>>> {
    value.map(parse_dt).transpose()
}

fn parse_dec(value: &str) -> StoreResult<Decimal> {
    value
        .parse()
        .map_err(|err| StoreError::Database(format!("bad stored amount {value:?}: {err}")))
}

fn day_bounds(day: NaiveDate) -> (String, String) {
    let start = day.and_hms_opt(0, 0, 0).map(|t| t.and_utc());
    let end = day
        .succ_opt()
        .and_then(|next| next.and_hms_opt(0, 0, 0))
        .map(|t| t.and_utc());
    match (start, end) {
        (Some(start), Some(end)) => (start.to_rfc3339(), end.to_rfc3339()),
        // NaiveDate::MAX has no successor; an empty range is correct there.
        _ => (String::new(), String::new()),
    }
}

#[derive(sqlx::FromRow)]
struct UserRow {
    id: i64,
    username: String,
    email: String,
    phone: Option<String>,
    role: String,
    password_hash: String,
    metadata: Option<String>,
    created_at: String,
}

impl UserRow {
    fn into_user(self) -> StoreResult<User> {
        Ok(User {
            id: self.id,
            role: Role::parse(&self.role)
                .ok_or_else(|| StoreError::Database(format!("bad stored role {:?}", self.role)))?,
            created_at: parse_dt(&self.created_at)?,
            username: self.username,
            email: self.email,
            phone: self.phone,
            password_hash: self.password_hash,
            metadata: self.metadata,
        })
    }
}

const USER_COLUMNS: &str =
    "id, username, email, phone, role, password_hash, metadata, created_at";

#[derive(sqlx::FromRow)]
struct BarberRow {
    id: i64,
    user_id: i64,
    nif: Option<String>,
    iban: Option<String>,
    payment_period: String,
    active: i64,
    calendar_visible: i64,
}

impl BarberRow {
    fn into_barber(self) -> StoreResult<Barber> {
        Ok(Barber {
            id: self.id,
            user_id: self.user_id,
            nif: self.nif,
            iban: self.iban,
            payment_period: PaymentPeriod::parse(&self.payment_period).ok_or_else(|| {
                StoreError::Database(format!("bad stored period {:?}", self.payment_period))
            })?,
            active: self.active != 0,
            calendar_visible: self.calendar_visible != 0,
        })
    }
}

const BARBER_COLUMNS: &str =
    "id, user_id, nif, iban, payment_period, active, calendar_visible";

#[derive(sqlx::FromRow)]
struct ServiceRow {
    id: i64,
    name: String,
    price: String,
    duration_minutes: i64,
    active: i64,
}

impl ServiceRow {
    fn into_service(self) -> StoreResult<Service> {
        Ok(Service {
            id: self.id,
            name: self.name,
            price: parse_dec(&self.price)?,
            duration_minutes: self.duration_minutes,
            active: self.active != 0,
        })
    }
}

#[derive(sqlx::FromRow)]
struct ProductRow {
    id: i64,
    name: String,
    price: String,
    active: i64,
}

impl ProductRow {
    fn into_product(self) -> StoreResult<Product> {
        Ok(Product {
            id: self.id,
            name: self.name,
            price: parse_dec(&self.price)?,
            active: self.active != 0,
        })
    }
}

#[derive(sqlx::FromRow)]
struct CommissionRow {
    id: i64,
    barber_id: i64,
    service_id: i64,
    percentage: String,
}

#[derive(sqlx::FromRow)]
struct ProductCommissionRow {
    id: i64,
    barber_id: i64,
    product_id: i64,
    percentage: String,
}

#[derive(sqlx::FromRow)]
struct AppointmentRow {
    id: i64,
    client_id: i64,
    barber_id: i64,
    service_id: i64,
    date: String,
    status: String,
    notes: Option<String>,
    created_at: String,
}

impl AppointmentRow {
    fn into_appointment(self) -> StoreResult<Appointment> {
        Ok(Appointment {
            id: self.id,
            client_id: self.client_id,
            barber_id: self.barber_id,
            service_id: self.service_id,
            date: parse_dt(&self.date)?,
            status: AppointmentStatus::parse(&self.status).ok_or_else(|| {
                StoreError::Database(format!("bad stored status {:?}", self.status))
            })?,
            notes: self.notes,
            created_at: parse_dt(&self.created_at)?,
        })
    }
}

const APPOINTMENT_COLUMNS: &str =
    "id, client_id, barber_id, service_id, date, status, notes, created_at";

#[derive(sqlx::FromRow)]
struct AppointmentDetailRow {
    id: i64,
    client_id: i64,
    barber_id: i64,
    service_id: i64,
    date: String,
    status: String,
    notes: Option<String>,
    created_at: String,
    client_name: String,
    barber_name: String,
    service_name: String,
}

impl AppointmentDetailRow {
    fn into_detail(self) -> StoreResult<AppointmentDetail> {
        let appointment = AppointmentRow {
            id: self.id,
            client_id: self.client_id,
            barber_id: self.barber_id,
            service_id: self.service_id,
            date: self.date,
            status: self.status,
            notes: self.notes,
            created_at: self.created_at,
        }
        .into_appointment()?;
        Ok(AppointmentDetail {
            appointment,
            client_name: self.client_name,
            barber_name: self.barber_name,
            service_name: self.service_name,
        })
    }
}

const APPOINTMENT_DETAIL_SELECT: &str = r#"
    SELECT a.id, a.client_id, a.barber_id, a.service_id, a.date, a.status,
           a.notes, a.created_at,
           cu.username AS client_name,
           bu.username AS barber_name,
           s.name AS service_name
    FROM appointments a
    JOIN users cu ON a.client_id = cu.id
    JOIN barbers b ON a.barber_id = b.id
    JOIN users bu ON b.user_id = bu.id
    JOIN services s ON a.service_id = s.id
"#;

#[derive(sqlx::FromRow)]
struct CompletedServiceRow {
    id: i64,
    barber_id: i64,
    service_id: i64,
    client_id: Option<i64>,
    client_name: String,
    price: String,
    date: String,
    appointment_id: Option<i64>,
    validated_by_admin: i64,
}

impl CompletedServiceRow {
    fn into_record(self) -> StoreResult<CompletedService> {
        Ok(CompletedService {
            id: self.id,
            barber_id: self.barber_id,
            service_id: self.service_id,
            client_id: self.client_id,
            client_name: self.client_name,
            price: parse_dec(&self.price)?,
            date: parse_dt(&self.date)?,
            appointment_id: self.appointment_id,
            validated_by_admin: self.validated_by_admin != 0,
        })
    }
}

const COMPLETED_COLUMNS: &str = "id, barber_id, service_id, client_id, client_name, price, date, appointment_id, validated_by_admin";

#[derive(sqlx::FromRow)]
struct CompletedServiceDetailRow {
    id: i64,
    barber_id: i64,
    service_id: i64,
    client_id: Option<i64>,
    client_name: String,
    price: String,
    date: String,
    appointment_id: Option<i64>,
    validated_by_admin: i64,
    barber_name: String,
    service_name: String,
}

impl CompletedServiceDetailRow {
    fn into_detail(self) -> StoreResult<CompletedServiceDetail> {
        let record = CompletedServiceRow {
            id: self.id,
            barber_id: self.barber_id,
            service_id: self.service_id,
            client_id: self.client_id,
            client_name: self.client_name,
            price: self.price,
            date: self.date,
            appointment_id: self.appointment_id,
            validated_by_admin: self.validated_by_admin,
        }
        .into_record()?;
        Ok(CompletedServiceDetail {
            record,
            barber_name: self.barber_name,
            service_name: self.service_name,
        })
    }
}

const COMPLETED_DETAIL_SELECT: &str = r#"
    SELECT c.id, c.barber_id, c.service_id, c.client_id, c.client_name,
           c.price, c.date, c.appointment_id, c.validated_by_admin,
           bu.username AS barber_name,
           s.name AS service_name
    FROM completed_services c
    JOIN barbers b ON c.barber_id = b.id
    JOIN users bu ON b.user_id = bu.id
    JOIN services s ON c.service_id = s.id
"#;

#[derive(sqlx::FromRow)]
struct ProductSaleRow {
    id: i64,
    barber_id: i64,
    product_id: i64,
    client_id: Option<i64>,
    client_name: String,
    quantity: i64,
    unit_price: String,
    date: String,
    validated_by_admin: i64,
}

impl ProductSaleRow {
    fn into_sale(self) -> StoreResult<ProductSale> {
        Ok(ProductSale {
            id: self.id,
            barber_id: self.barber_id,
            product_id: self.product_id,
            client_id: self.client_id,
            client_name: self.client_name,
            quantity: self.quantity,
            unit_price: parse_dec(&self.unit_price)?,
            date: parse_dt(&self.date)?,
            validated_by_admin: self.validated_by_admin != 0,
        })
    }
}

const SALE_COLUMNS: &str = "id, barber_id, product_id, client_id, client_name, quantity, unit_price, date, validated_by_admin";

#[derive(sqlx::FromRow)]
struct PaymentRow {
    id: i64,
    barber_id: i64,
    amount: String,
    period_start: String,
    period_end: String,
    status: String,
    notes: Option<String>,
    payment_date: Option<String>,
    created_at: String,
}

impl PaymentRow {
    fn into_payment(self) -> StoreResult<Payment> {
        Ok(Payment {
            id: self.id,
            barber_id: self.barber_id,
            amount: parse_dec(&self.amount)?,
            period_start: parse_dt(&self.period_start)?,
            period_end: parse_dt(&self.period_end)?,
            status: PaymentStatus::parse(&self.status).ok_or_else(|| {
                StoreError::Database(format!("bad stored status {:?}", self.status))
            })?,
            notes: self.notes,
            payment_date: parse_dt_opt(self.payment_date.as_deref())?,
            created_at: parse_dt(&self.created_at)?,
        })
    }
}

const PAYMENT_COLUMNS: &str = "id, barber_id, amount, period_start, period_end, status, notes, payment_date, created_at";

#[derive(sqlx::FromRow)]
struct InviteRow {
    id: i64,
    token: String,
    email: String,
    created_by: i64,
    expires_at: String,
    used_at: Option<String>,
}

impl InviteRow {
    fn into_invite(self) -> StoreResult<BarberInvite> {
        Ok(BarberInvite {
            id: self.id,
            token: self.token,
            email: self.email,
            created_by: self.created_by,
            expires_at: parse_dt(&self.expires_at)?,
            used_at: parse_dt_opt(self.used_at.as_deref())?,
        })
    }
}

#[derive(sqlx::FromRow)]
struct ActionLogRow {
    id: i64,
    user_id: Option<i64>,
    action: String,
    entity: String,
    entity_id: Option<i64>,
    details: Option<String>,
    created_at: String,
}

impl ActionLogRow {
    fn into_action(self) -> StoreResult<ActionLog> {
        Ok(ActionLog {
            id: self.id,
            user_id: self.user_id,
            action: self.action,
            entity: self.entity,
            entity_id: self.entity_id,
            details: self.details,
            created_at: parse_dt(&self.created_at)?,
        })
    }
}

fn collect<R, T>(rows: Vec<R>, convert: impl Fn(R) -> StoreResult<T>) -> StoreResult<Vec<T>> {
    rows.into_iter().map(convert).collect()
}

#[async_trait]
impl Storage for SqliteStorage {
    async fn create_user(&self, new: NewUser) -> StoreResult<User> {
        let taken = sqlx::query_as::<_, (i64,)>(
            "SELECT id FROM users WHERE username = ? OR email = ? LIMIT 1",
        )
        .bind(&new.username)
        .bind(&new.email)
        .fetch_optional(&self.pool)
        .await?;
        if taken.is_some() {
            return Err(StoreError::Conflict("username or email already taken".into()));
        }

        let result = sqlx::query(
            r#"INSERT INTO users (username, email, phone, role, password_hash, metadata, created_at)
               VALUES (?, ?, ?, ?, ?, ?, ?)"#,
        )
        .bind(&new.username)
        .bind(&new.email)
        .bind(&new.phone)
        .bind(new.role.as_str())
        .bind(&new.password_hash)
        .bind(&new.metadata)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await?;

        self.user_by_id(result.last_insert_rowid())
            .await?
            .ok_or_else(|| StoreError::Database("inserted user vanished".into()))
    }

    async fn user_by_id(&self, id: i64) -> StoreResult<Option<User>> {
        let row = sqlx::query_as::<_, UserRow>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE id = ?"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(UserRow::into_user).transpose()
    }

    async fn user_by_username(&self, username: &str) -> StoreResult<Option<User>> {
        let row = sqlx::query_as::<_, UserRow>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE username = ?"
        ))
        .bind(username)
        .fetch_optional(&self.pool)
        .await?;
        row.map(UserRow::into_user).transpose()
    }

    async fn phone_in_use(&self, phone: &str) -> StoreResult<bool> {
        let row = sqlx::query_as::<_, (i64,)>("SELECT id FROM users WHERE phone = ? LIMIT 1")
            .bind(phone)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.is_some())
    }

    async fn list_users_by_role(&self, role: Role) -> StoreResult<Vec<User>> {
        let rows = sqlx::query_as::<_, UserRow>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE role = ? ORDER BY username"
        ))
        .bind(role.as_str())
        .fetch_all(&self.pool)
        .await?;
        collect(rows, UserRow::into_user)
    }

    async fn create_barber(&self, new: NewBarber) -> StoreResult<Barber> {
        if self.user_by_id(new.user_id).await?.is_none() {
            return Err(StoreError::NotFound("user".into()));
        }
        if self.barber_by_user(new.user_id).await?.is_some() {
            return Err(StoreError::Conflict("user is already a barber".into()));
        }
        let result = sqlx::query(
            r#"INSERT INTO barbers (user_id, nif, iban, payment_period, active, calendar_visible)
               VALUES (?, ?, ?, ?, 1, ?)"#,
        )
        .bind(new.user_id)
        .bind(&new.nif)
        .bind(&new.iban)
        .bind(new.payment_period.as_str())
        .bind(new.calendar_visible as i64)
        .execute(&self.pool)
        .await?;
        self.barber_by_id(result.last_insert_rowid())
            .await?
            .ok_or_else(|| StoreError::Database("inserted barber vanished".into()))
    }

    async fn barber_by_id(&self, id: i64) -> StoreResult<Option<Barber>> {
        let row = sqlx::query_as::<_, BarberRow>(&format!(
            "SELECT {BARBER_COLUMNS} FROM barbers WHERE id = ?"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(BarberRow::into_barber).transpose()
    }

    async fn barber_by_user(&self, user_id: i64) -> StoreResult<Option<Barber>> {
        let row = sqlx::query_as::<_, BarberRow>(&format!(
            "SELECT {BARBER_COLUMNS} FROM barbers WHERE user_id = ?"
        ))
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(BarberRow::into_barber).transpose()
    }

    async fn list_barbers(&self) -> StoreResult<Vec<BarberProfile>> {
        #[derive(sqlx::FromRow)]
        struct Row {
            id: i64,
            user_id: i64,
            nif: Option<String>,
            iban: Option<String>,
            payment_period: String,
            active: i64,
            calendar_visible: i64,
            username: String,
            email: String,
        }
        let rows = sqlx::query_as::<_, Row>(
            r#"SELECT b.id, b.user_id, b.nif, b.iban, b.payment_period, b.active,
                      b.calendar_visible, u.username, u.email
               FROM barbers b
               JOIN users u ON b.user_id = u.id
               ORDER BY u.username"#,
        )
        .fetch_all(&self.pool)
        .await?;
        collect(rows, |row| {
            let barber = BarberRow {
                id: row.id,
                user_id: row.user_id,
                nif: row.nif,
                iban: row.iban,
                payment_period: row.payment_period,
                active: row.active,
                calendar_visible: row.calendar_visible,
            }
            .into_barber()?;
            Ok(BarberProfile {
                barber,
                username: row.username,
                email: row.email,
            })
        })
    }

    async fn deactivate_barber(&self, id: i64) -> StoreResult<bool> {
        let result = sqlx::query("UPDATE barbers SET active = 0 WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn create_service(&self, new: NewService) -> StoreResult<Service> {
        let result = sqlx::query(
            "INSERT INTO services (name, price, duration_minutes, active) VALUES (?, ?, ?, 1)",
        )
        .bind(&new.name)
        .bind(new.price.to_string())
        .bind(new.duration_minutes)
        .execute(&self.pool)
        .await?;
        self.service_by_id(result.last_insert_rowid())
            .await?
            .ok_or_else(|| StoreError::Database("inserted service vanished".into()))
    }

    async fn service_by_id(&self, id: i64) -> StoreResult<Option<Service>> {
        let row = sqlx::query_as::<_, ServiceRow>(
            "SELECT id, name, price, duration_minutes, active FROM services WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(ServiceRow::into_service).transpose()
    }

    async fn list_services(&self, only_active: bool) -> StoreResult<Vec<Service>> {
        let sql = if only_active {
            "SELECT id, name, price, duration_minutes, active FROM services WHERE active = 1 ORDER BY name"
        } else {
            "SELECT id, name, price, duration_minutes, active FROM services ORDER BY name"
        };
        let rows = sqlx::query_as::<_, ServiceRow>(sql).fetch_all(&self.pool).await?;
        collect(rows, ServiceRow::into_service)
    }

    async fn deactivate_service(&self, id: i64) -> StoreResult<bool> {
        let result = sqlx::query("UPDATE services SET active = 0 WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn create_product(&self, new: NewProduct) -> StoreResult<Product> {
        let result = sqlx::query("INSERT INTO products (name, price, active) VALUES (?, ?, 1)")
            .bind(&new.name)
            .bind(new.price.to_string())
            .execute(&self.pool)
            .await?;
        self.product_by_id(result.last_insert_rowid())
            .await?
            .ok_or_else(|| StoreError::Database("inserted product vanished".into()))
    }

    async fn product_by_id(&self, id: i64) -> StoreResult<Option<Product>> {
        let row = sqlx::query_as::<_, ProductRow>(
            "SELECT id, name, price, active FROM products WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(ProductRow::into_product).transpose()
    }

    async fn list_products(&self, only_active: bool) -> StoreResult<Vec<Product>> {
        let sql = if only_active {
            "SELECT id, name, price, active FROM products WHERE active = 1 ORDER BY name"
        } else {
            "SELECT id, name, price, active FROM products ORDER BY name"
        };
        let rows = sqlx::query_as::<_, ProductRow>(sql).fetch_all(&self.pool).await?;
        collect(rows, ProductRow::into_product)
    }

    async fn deactivate_product(&self, id: i64) -> StoreResult<bool> {
        let result = sqlx::query("UPDATE products SET active = 0 WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn create_commission(&self, new: NewCommission) -> StoreResult<Commission> {
        if self.commission_for(new.barber_id, new.service_id).await?.is_some() {
            return Err(StoreError::Conflict(
                "commission already configured for this barber and service".into(),
            ));
        }
        let result = sqlx::query(
            "INSERT INTO commissions (barber_id, service_id, percentage) VALUES (?, ?, ?)",
        )
        .bind(new.barber_id)
        .bind(new.service_id)
        .bind(new.percentage.to_string())
        .execute(&self.pool)
        .await?;
        Ok(Commission {
            id: result.last_insert_rowid(),
            barber_id: new.barber_id,
            service_id: new.service_id,
            percentage: new.percentage,
        })
    }

    async fn commission_for(
        &self,
        barber_id: i64,
        service_id: i64,
    ) -> StoreResult<Option<Commission>> {
        let row = sqlx::query_as::<_, CommissionRow>(
            "SELECT id, barber_id, service_id, percentage FROM commissions WHERE barber_id = ? AND service_id = ?",
        )
        .bind(barber_id)
        .bind(service_id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(|row| {
            Ok(Commission {
                id: row.id,
                barber_id: row.barber_id,
                service_id: row.service_id,
                percentage: parse_dec(&row.percentage)?,
            })
        })
        .transpose()
    }

    async fn list_commissions(&self, barber_id: i64) -> StoreResult<Vec<Commission>> {
        let rows = sqlx::query_as::<_, CommissionRow>(
            "SELECT id, barber_id, service_id, percentage FROM commissions WHERE barber_id = ?",
        )
        .bind(barber_id)
        .fetch_all(&self.pool)
        .await?;
        collect(rows, |row| {
            Ok(Commission {
                id: row.id,
                barber_id: row.barber_id,
                service_id: row.service_id,
                percentage: parse_dec(&row.percentage)?,
            })
        })
    }

    async fn create_product_commission(
        &self,
        new: NewProductCommission,
    ) -> StoreResult<ProductCommission> {
        if self
            .product_commission_for(new.barber_id, new.product_id)
            .await?
            .is_some()
        {
            return Err(StoreError::Conflict(
                "commission already configured for this barber and product".into(),
            ));
        }
        let result = sqlx::query(
            "INSERT INTO product_commissions (barber_id, product_id, percentage) VALUES (?, ?, ?)",
        )
        .bind(new.barber_id)
        .bind(new.product_id)
        .bind(new.percentage.to_string())
        .execute(&self.pool)
        .await?;
        Ok(ProductCommission {
            id: result.last_insert_rowid(),
            barber_id: new.barber_id,
            product_id: new.product_id,
            percentage: new.percentage,
        })
    }

    async fn product_commission_for(
        &self,
        barber_id: i64,
        product_id: i64,
    ) -> StoreResult<Option<ProductCommission>> {
        let row = sqlx::query_as::<_, ProductCommissionRow>(
            "SELECT id, barber_id, product_id, percentage FROM product_commissions WHERE barber_id = ? AND product_id = ?",
        )
        .bind(barber_id)
        .bind(product_id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(|row| {
            Ok(ProductCommission {
                id: row.id,
                barber_id: row.barber_id,
                product_id: row.product_id,
                percentage: parse_dec(&row.percentage)?,
            })
        })
        .transpose()
    }

    async fn list_product_commissions(
        &self,
        barber_id: i64,
    ) -> StoreResult<Vec<ProductCommission>> {
        let rows = sqlx::query_as::<_, ProductCommissionRow>(
            "SELECT id, barber_id, product_id, percentage FROM product_commissions WHERE barber_id = ?",
        )
        .bind(barber_id)
        .fetch_all(&self.pool)
        .await?;
        collect(rows, |row| {
            Ok(ProductCommission {
                id: row.id,
                barber_id: row.barber_id,
                product_id: row.product_id,
                percentage: parse_dec(&row.percentage)?,
            })
        })
    }

    async fn create_appointment(&self, new: NewAppointment) -> StoreResult<Appointment> {
        let mut tx = self.pool.begin().await?;

        let (day_start, day_end) = day_bounds(new.date.date_naive());
        let slot = slot_label(&new.date);
        let same_day = sqlx::query_as::<_, (String,)>(
            r#"SELECT date FROM appointments
               WHERE barber_id = ? AND status != 'canceled' AND date >= ? AND date < ?"#,
        )
        .bind(new.barber_id)
        .bind(&day_start)
        .bind(&day_end)
        .fetch_all(&mut *tx)
        .await?;
        for (existing,) in &same_day {
            if slot_label(&parse_dt(existing)?) == slot {
                return Err(StoreError::Conflict(format!("slot {slot} is already booked")));
            }
        }

        let result = sqlx::query(
            r#"INSERT INTO appointments (client_id, barber_id, service_id, date, status, notes, created_at)
               VALUES (?, ?, ?, ?, ?, ?, ?)"#,
        )
        .bind(new.client_id)
        .bind(new.barber_id)
        .bind(new.service_id)
        .bind(new.date.to_rfc3339())
        .bind(AppointmentStatus::Pending.as_str())
        .bind(&new.notes)
        .bind(Utc::now().to_rfc3339())
        .execute(&mut *tx)
        .await?;
        let id = result.last_insert_rowid();

        let row = sqlx::query_as::<_, AppointmentRow>(&format!(
            "SELECT {APPOINTMENT_COLUMNS} FROM appointments WHERE id = ?"
        ))
        .bind(id)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;
        row.into_appointment()
    }

    async fn appointment_by_id(&self, id: i64) -> StoreResult<Option<Appointment>> {
        let row = sqlx::query_as::<_, AppointmentRow>(&format!(
            "SELECT {APPOINTMENT_COLUMNS} FROM appointments WHERE id = ?"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(AppointmentRow::into_appointment).transpose()
    }

    async fn appointment_detail(&self, id: i64) -> StoreResult<Option<AppointmentDetail>> {
        let row = sqlx::query_as::<_, AppointmentDetailRow>(&format!(
            "{APPOINTMENT_DETAIL_SELECT} WHERE a.id = ?"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(AppointmentDetailRow::into_detail).transpose()
    }

    async fn list_appointments(&self) -> StoreResult<Vec<AppointmentDetail>> {
        let rows = sqlx::query_as::<_, AppointmentDetailRow>(&format!(
            "{APPOINTMENT_DETAIL_SELECT} ORDER BY a.date"
        ))
        .fetch_all(&self.pool)
        .await?;
        collect(rows, AppointmentDetailRow::into_detail)
    }

    async fn upcoming_appointments(
        &self,
        now: DateTime<Utc>,
    ) -> StoreResult<Vec<AppointmentDetail>> {
        let rows = sqlx::query_as::<_, AppointmentDetailRow>(&format!(
            "{APPOINTMENT_DETAIL_SELECT} WHERE a.date > ? AND a.status != 'canceled' ORDER BY a.date"
        ))
        .bind(now.to_rfc3339())
        .fetch_all(&self.pool)
        .await?;
        collect(rows, AppointmentDetailRow::into_detail)
    }

    async fn appointments_for_barber_on(
        &self,
        barber_id: i64,
        day: NaiveDate,
    ) -> StoreResult<Vec<Appointment>> {
        let (day_start, day_end) = day_bounds(day);
        let rows = sqlx::query_as::<_, AppointmentRow>(&format!(
            r#"SELECT {APPOINTMENT_COLUMNS} FROM appointments
               WHERE barber_id = ? AND status != 'canceled' AND date >= ? AND date < ?
               ORDER BY date"#
        ))
        .bind(barber_id)
        .bind(day_start)
        .bind(day_end)
        .fetch_all(&self.pool)
        .await?;
        collect(rows, AppointmentRow::into_appointment)
    }

    async fn set_appointment_status(
        &self,
        id: i64,
        status: AppointmentStatus,
    ) -> StoreResult<Appointment> {
        let result = sqlx::query("UPDATE appointments SET status = ? WHERE id = ?")
            .bind(status.as_str())
            .bind(id)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound("appointment".into()));
        }
        self.appointment_by_id(id)
            .await?
            .ok_or_else(|| StoreError::NotFound("appointment".into()))
    }

    async fn record_completed_service(
        &self,
        new: NewCompletedService,
    ) -> StoreResult<CompletedService> {
        let mut tx = self.pool.begin().await?;

        if let Some(appointment_id) = new.appointment_id {
            let updated = sqlx::query("UPDATE appointments SET status = 'completed' WHERE id = ?")
                .bind(appointment_id)
                .execute(&mut *tx)
                .await?;
            if updated.rows_affected() == 0 {
                return Err(StoreError::NotFound("appointment".into()));
            }
        }

        let result = sqlx::query(
            r#"INSERT INTO completed_services
               (barber_id, service_id, client_id, client_name, price, date, appointment_id, validated_by_admin)
               VALUES (?, ?, ?, ?, ?, ?, ?, 0)"#,
        )
        .bind(new.barber_id)
        .bind(new.service_id)
        .bind(new.client_id)
        .bind(&new.client_name)
        .bind(new.price.to_string())
        .bind(new.date.to_rfc3339())
        .bind(new.appointment_id)
        .execute(&mut *tx)
        .await?;
        let id = result.last_insert_rowid();

        let row = sqlx::query_as::<_, CompletedServiceRow>(&format!(
            "SELECT {COMPLETED_COLUMNS} FROM completed_services WHERE id = ?"
        ))
        .bind(id)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;
        row.into_record()
    }

    async fn completed_service_by_id(&self, id: i64) -> StoreResult<Option<CompletedService>> {
        let row = sqlx::query_as::<_, CompletedServiceRow>(&format!(
            "SELECT {COMPLETED_COLUMNS} FROM completed_services WHERE id = ?"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(CompletedServiceRow::into_record).transpose()
    }

    async fn validate_completed_service(&self, id: i64) -> StoreResult<CompletedService> {
        let result = sqlx::query(
            "UPDATE completed_services SET validated_by_admin = 1 WHERE id = ?",
        )
        .bind(id)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound("completed service".into()));
        }
        self.completed_service_by_id(id)
            .await?
            .ok_or_else(|| StoreError::NotFound("completed service".into()))
    }

    async fn delete_completed_service(&self, id: i64) -> StoreResult<bool> {
        let result = sqlx::query("DELETE FROM completed_services WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn completed_services_for_barber(
        &self,
        barber_id: i64,
    ) -> StoreResult<Vec<CompletedServiceDetail>> {
        let rows = sqlx::query_as::<_, CompletedServiceDetailRow>(&format!(
            "{COMPLETED_DETAIL_SELECT} WHERE c.barber_id = ? ORDER BY c.date"
        ))
        .bind(barber_id)
        .fetch_all(&self.pool)
        .await?;
        collect(rows, CompletedServiceDetailRow::into_detail)
    }

    async fn list_completed_services(
        &self,
        limit: i64,
    ) -> StoreResult<Vec<CompletedServiceDetail>> {
        let rows = sqlx::query_as::<_, CompletedServiceDetailRow>(&format!(
            "{COMPLETED_DETAIL_SELECT} ORDER BY c.date DESC LIMIT ?"
        ))
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        collect(rows, CompletedServiceDetailRow::into_detail)
    }

    async fn validated_services_since(
        &self,
        barber_id: i64,
        cutoff: DateTime<Utc>,
    ) -> StoreResult<Vec<CompletedService>> {
        let rows = sqlx::query_as::<_, CompletedServiceRow>(&format!(
            r#"SELECT {COMPLETED_COLUMNS} FROM completed_services
               WHERE barber_id = ? AND validated_by_admin = 1 AND date > ?
               ORDER BY date"#
        ))
        .bind(barber_id)
        .bind(cutoff.to_rfc3339())
        .fetch_all(&self.pool)
        .await?;
        collect(rows, CompletedServiceRow::into_record)
    }

    async fn pending_services_for_barber(
        &self,
        barber_id: i64,
    ) -> StoreResult<Vec<CompletedService>> {
        let rows = sqlx::query_as::<_, CompletedServiceRow>(&format!(
            r#"SELECT {COMPLETED_COLUMNS} FROM completed_services
               WHERE barber_id = ? AND validated_by_admin = 0
               ORDER BY date"#
        ))
        .bind(barber_id)
        .fetch_all(&self.pool)
        .await?;
        collect(rows, CompletedServiceRow::into_record)
    }

    async fn create_product_sale(&self, new: NewProductSale) -> StoreResult<ProductSale> {
        let result = sqlx::query(
            r#"INSERT INTO product_sales
               (barber_id, product_id, client_id, client_name, quantity, unit_price, date, validated_by_admin)
               VALUES (?, ?, ?, ?, ?, ?, ?, 0)"#,
        )
        .bind(new.barber_id)
        .bind(new.product_id)
        .bind(new.client_id)
        .bind(&new.client_name)
        .bind(new.quantity)
        .bind(new.unit_price.to_string())
        .bind(new.date.to_rfc3339())
        .execute(&self.pool)
        .await?;
        self.product_sale_by_id(result.last_insert_rowid())
            .await?
            .ok_or_else(|| StoreError::Database("inserted sale vanished".into()))
    }

    async fn product_sale_by_id(&self, id: i64) -> StoreResult<Option<ProductSale>> {
        let row = sqlx::query_as::<_, ProductSaleRow>(&format!(
            "SELECT {SALE_COLUMNS} FROM product_sales WHERE id = ?"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(ProductSaleRow::into_sale).transpose()
    }

    async fn validate_product_sale(&self, id: i64) -> StoreResult<ProductSale> {
        let result = sqlx::query("UPDATE product_sales SET validated_by_admin = 1 WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound("product sale".into()));
        }
        self.product_sale_by_id(id)
            .await?
            .ok_or_else(|| StoreError::NotFound("product sale".into()))
    }

    async fn delete_product_sale(&self, id: i64) -> StoreResult<bool> {
        let result = sqlx::query("DELETE FROM product_sales WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn product_sales_for_barber(&self, barber_id: i64) -> StoreResult<Vec<ProductSale>> {
        let rows = sqlx::query_as::<_, ProductSaleRow>(&format!(
            "SELECT {SALE_COLUMNS} FROM product_sales WHERE barber_id = ? ORDER BY date"
        ))
        .bind(barber_id)
        .fetch_all(&self.pool)
        .await?;
        collect(rows, ProductSaleRow::into_sale)
    }

    async fn create_payment(&self, new: NewPayment) -> StoreResult<Payment> {
        let result = sqlx::query(
            r#"INSERT INTO payments (barber_id, amount, period_start, period_end, status, notes, created_at)
               VALUES (?, ?, ?, ?, ?, ?, ?)"#,
        )
        .bind(new.barber_id)
        .bind(new.amount.to_string())
        .bind(new.period_start.to_rfc3339())
        .bind(new.period_end.to_rfc3339())
        .bind(PaymentStatus::Pending.as_str())
        .bind(&new.notes)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await?;
        self.payment_by_id(result.last_insert_rowid())
            .await?
            .ok_or_else(|| StoreError::Database("inserted payment vanished".into()))
    }

    async fn payment_by_id(&self, id: i64) -> StoreResult<Option<Payment>> {
        let row = sqlx::query_as::<_, PaymentRow>(&format!(
            "SELECT {PAYMENT_COLUMNS} FROM payments WHERE id = ?"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(PaymentRow::into_payment).transpose()
    }

    async fn latest_payment_for_barber(&self, barber_id: i64) -> StoreResult<Option<Payment>> {
        let row = sqlx::query_as::<_, PaymentRow>(&format!(
            r#"SELECT {PAYMENT_COLUMNS} FROM payments
               WHERE barber_id = ?
               ORDER BY period_end DESC
               LIMIT 1"#
        ))
        .bind(barber_id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(PaymentRow::into_payment).transpose()
    }

    async fn payments_for_barber(&self, barber_id: i64) -> StoreResult<Vec<Payment>> {
        let rows = sqlx::query_as::<_, PaymentRow>(&format!(
            "SELECT {PAYMENT_COLUMNS} FROM payments WHERE barber_id = ? ORDER BY period_end DESC"
        ))
        .bind(barber_id)
        .fetch_all(&self.pool)
        .await?;
        collect(rows, PaymentRow::into_payment)
    }

    async fn mark_payment_paid(&self, id: i64, now: DateTime<Utc>) -> StoreResult<Payment> {
        let result = sqlx::query(
            "UPDATE payments SET status = 'paid', payment_date = ? WHERE id = ? AND status != 'paid'",
        )
        .bind(now.to_rfc3339())
        .bind(id)
        .execute(&self.pool)
        .await?;
        // rows_affected = 0 covers both "missing" and "already paid";
        // the follow-up read distinguishes them.
        let _ = result;
        self.payment_by_id(id)
            .await?
            .ok_or_else(|| StoreError::NotFound("payment".into()))
    }

    async fn create_invite(&self, new: NewBarberInvite) -> StoreResult<BarberInvite> {
        let result = sqlx::query(
            "INSERT INTO barber_invites (token, email, created_by, expires_at) VALUES (?, ?, ?, ?)",
        )
        .bind(&new.token)
        .bind(&new.email)
        .bind(new.created_by)
        .bind(new.expires_at.to_rfc3339())
        .execute(&self.pool)
        .await?;
        let row = sqlx::query_as::<_, InviteRow>(
            "SELECT id, token, email, created_by, expires_at, used_at FROM barber_invites WHERE id = ?",
        )
        .bind(result.last_insert_rowid())
        .fetch_one(&self.pool)
        .await?;
        row.into_invite()
    }

    async fn consume_invite(
        &self,
        token: &str,
        now: DateTime<Utc>,
        user: NewUser,
        barber: InviteBarberFields,
    ) -> StoreResult<(User, Barber)> {
        let mut tx = self.pool.begin().await?;

        let invite = sqlx::query_as::<_, InviteRow>(
            "SELECT id, token, email, created_by, expires_at, used_at FROM barber_invites WHERE token = ?",
        )
        .bind(token)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| StoreError::Invalid("unknown invite token".into()))?
        .into_invite()?;

        if invite.used_at.is_some() {
            return Err(StoreError::Invalid("invite already used".into()));
        }
        if invite.expires_at <= now {
            return Err(StoreError::Invalid("invite expired".into()));
        }

        let taken = sqlx::query_as::<_, (i64,)>(
            "SELECT id FROM users WHERE username = ? OR email = ? LIMIT 1",
        )
        .bind(&user.username)
        .bind(&user.email)
        .fetch_optional(&mut *tx)
        .await?;
        if taken.is_some() {
            return Err(StoreError::Conflict("username or email already taken".into()));
        }

        let result = sqlx::query(
            r#"INSERT INTO users (username, email, phone, role, password_hash, metadata, created_at)
               VALUES (?, ?, ?, ?, ?, ?, ?)"#,
        )
        .bind(&user.username)
        .bind(&user.email)
        .bind(&user.phone)
        .bind(user.role.as_str())
        .bind(&user.password_hash)
        .bind(&user.metadata)
        .bind(now.to_rfc3339())
        .execute(&mut *tx)
        .await?;
        let user_id = result.last_insert_rowid();

        let result = sqlx::query(
            r#"INSERT INTO barbers (user_id, nif, iban, payment_period, active, calendar_visible)
               VALUES (?, ?, ?, ?, 1, 1)"#,
        )
        .bind(user_id)
        .bind(&barber.nif)
        .bind(&barber.iban)
        .bind(barber.payment_period.as_str())
        .execute(&mut *tx)
        .await?;
        let barber_id = result.last_insert_rowid();

        sqlx::query("UPDATE barber_invites SET used_at = ? WHERE id = ?")
            .bind(now.to_rfc3339())
            .bind(invite.id)
            .execute(&mut *tx)
            .await?;

        let user_row = sqlx::query_as::<_, UserRow>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE id = ?"
        ))
        .bind(user_id)
        .fetch_one(&mut *tx)
        .await?;
        let barber_row = sqlx::query_as::<_, BarberRow>(&format!(
            "SELECT {BARBER_COLUMNS} FROM barbers WHERE id = ?"
        ))
        .bind(barber_id)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok((user_row.into_user()?, barber_row.into_barber()?))
    }

    async fn append_action(&self, entry: NewActionLog) -> StoreResult<ActionLog> {
        let result = sqlx::query(
            r#"INSERT INTO action_logs (user_id, action, entity, entity_id, details, created_at)
               VALUES (?, ?, ?, ?, ?, ?)"#,
        )
        .bind(entry.user_id)
        .bind(&entry.action)
        .bind(&entry.entity)
        .bind(entry.entity_id)
        .bind(&entry.details)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await?;
        let row = sqlx::query_as::<_, ActionLogRow>(
            "SELECT id, user_id, action, entity, entity_id, details, created_at FROM action_logs WHERE id = ?",
        )
        .bind(result.last_insert_rowid())
        .fetch_one(&self.pool)
        .await?;
        row.into_action()
    }

    async fn list_actions(&self, limit: i64) -> StoreResult<Vec<ActionLog>> {
        let rows = sqlx::query_as::<_, ActionLogRow>(
            "SELECT id, user_id, action, entity, entity_id, details, created_at FROM action_logs ORDER BY created_at DESC, id DESC LIMIT ?",
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        collect(rows, ActionLogRow::into_action)
    }
}
