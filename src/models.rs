use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Admin,
    Barber,
    Client,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Admin => "admin",
            Role::Barber => "barber",
            Role::Client => "client",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "admin" => Some(Role::Admin),
            "barber" => Some(Role::Barber),
            "client" => Some(Role::Client),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AppointmentStatus {
    Pending,
    Confirmed,
    Completed,
    Canceled,
}

impl AppointmentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AppointmentStatus::Pending => "pending",
            AppointmentStatus::Confirmed => "confirmed",
            AppointmentStatus::Completed => "completed",
            AppointmentStatus::Canceled => "canceled",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "pending" => Some(AppointmentStatus::Pending),
            "confirmed" => Some(AppointmentStatus::Confirmed),
            "completed" => Some(AppointmentStatus::Completed),
            "canceled" => Some(AppointmentStatus::Canceled),
            _ => None,
        }
    }

    /// Terminal states admit no further transitions.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            AppointmentStatus::Completed | AppointmentStatus::Canceled
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PaymentStatus {
    Pending,
    Paid,
}

impl PaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Pending => "pending",
            PaymentStatus::Paid => "paid",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "pending" => Some(PaymentStatus::Pending),
            "paid" => Some(PaymentStatus::Paid),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PaymentPeriod {
    Weekly,
    Biweekly,
    Monthly,
}

impl PaymentPeriod {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentPeriod::Weekly => "weekly",
            PaymentPeriod::Biweekly => "biweekly",
            PaymentPeriod::Monthly => "monthly",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "weekly" => Some(PaymentPeriod::Weekly),
            "biweekly" => Some(PaymentPeriod::Biweekly),
            "monthly" => Some(PaymentPeriod::Monthly),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct User {
    pub id: i64,
    pub username: String,
    pub email: String,
    pub phone: Option<String>,
    pub role: Role,
    #[serde(skip_serializing)]
    pub password_hash: String,
    pub metadata: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewUser {
    pub username: String,
    pub email: String,
    pub phone: Option<String>,
    pub role: Role,
    pub password_hash: String,
    pub metadata: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Barber {
    pub id: i64,
    pub user_id: i64,
    pub nif: Option<String>,
    pub iban: Option<String>,
    pub payment_period: PaymentPeriod,
    pub active: bool,
    pub calendar_visible: bool,
}

#[derive(Debug, Clone)]
pub struct NewBarber {
    pub user_id: i64,
    pub nif: Option<String>,
    pub iban: Option<String>,
    pub payment_period: PaymentPeriod,
    pub calendar_visible: bool,
}

/// Barber joined with its user record, for listings.
#[derive(Debug, Clone, Serialize)]
pub struct BarberProfile {
    #[serde(flatten)]
    pub barber: Barber,
    pub username: String,
    pub email: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct Service {
    pub id: i64,
    pub name: String,
    pub price: Decimal,
    pub duration_minutes: i64,
    pub active: bool,
}

#[derive(Debug, Clone)]
pub struct NewService {
    pub name: String,
    pub price: Decimal,
    pub duration_minutes: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct Commission {
    pub id: i64,
    pub barber_id: i64,
    pub service_id: i64,
    pub percentage: Decimal,
}

#[derive(Debug, Clone)]
pub struct NewCommission {
    pub barber_id: i64,
    pub service_id: i64,
    pub percentage: Decimal,
}

#[derive(Debug, Clone, Serialize)]
pub struct Appointment {
    pub id: i64,
    pub client_id: i64,
    pub barber_id: i64,
    pub service_id: i64,
    pub date: DateTime<Utc>,
    pub status: AppointmentStatus,
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewAppointment {
    pub client_id: i64,
    pub barber_id: i64,
    pub service_id: i64,
    pub date: DateTime<Utc>,
    pub notes: Option<String>,
}

/// Appointment joined with client, barber and service names.
#[derive(Debug, Clone, Serialize)]
pub struct AppointmentDetail {
    #[serde(flatten)]
    pub appointment: Appointment,
    pub client_name: String,
    pub barber_name: String,
    pub service_name: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct CompletedService {
    pub id: i64,
    pub barber_id: i64,
    pub service_id: i64,
    pub client_id: Option<i64>,
    pub client_name: String,
    pub price: Decimal,
    pub date: DateTime<Utc>,
    pub appointment_id: Option<i64>,
    pub validated_by_admin: bool,
}

#[derive(Debug, Clone)]
pub struct NewCompletedService {
    pub barber_id: i64,
    pub service_id: i64,
    pub client_id: Option<i64>,
    pub client_name: String,
    pub price: Decimal,
    pub date: DateTime<Utc>,
    pub appointment_id: Option<i64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CompletedServiceDetail {
    #[serde(flatten)]
    pub record: CompletedService,
    pub barber_name: String,
    pub service_name: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct Product {
    pub id: i64,
    pub name: String,
    pub price: Decimal,
    pub active: bool,
}

#[derive(Debug, Clone)]
pub struct NewProduct {
    pub name: String,
    pub price: Decimal,
}

#[derive(Debug, Clone, Serialize)]
pub struct ProductCommission {
    pub id: i64,
    pub barber_id: i64,
    pub product_id: i64,
    pub percentage: Decimal,
}

#[derive(Debug, Clone)]
pub struct NewProductCommission {
    pub barber_id: i64,
    pub product_id: i64,
    pub percentage: Decimal,
}

#[derive(Debug, Clone, Serialize)]
pub struct ProductSale {
    pub id: i64,
    pub barber_id: i64,
    pub product_id: i64,
    pub client_id: Option<i64>,
    pub client_name: String,
    pub quantity: i64,
    pub unit_price: Decimal,
    pub date: DateTime<Utc>,
    pub validated_by_admin: bool,
}

#[derive(Debug, Clone)]
pub struct NewProductSale {
    pub barber_id: i64,
    pub product_id: i64,
    pub client_id: Option<i64>,
    pub client_name: String,
    pub quantity: i64,
    pub unit_price: Decimal,
    pub date: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Payment {
    pub id: i64,
    pub barber_id: i64,
    pub amount: Decimal,
    pub period_start: DateTime<Utc>,
    pub period_end: DateTime<Utc>,
    pub status: PaymentStatus,
    pub notes: Option<String>,
    pub payment_date: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewPayment {
    pub barber_id: i64,
    pub amount: Decimal,
    pub period_start: DateTime<Utc>,
    pub period_end: DateTime<Utc>,
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct BarberInvite {
    pub id: i64,
    pub token: String,
    pub email: String,
    pub created_by: i64,
    pub expires_at: DateTime<Utc>,
    pub used_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone)]
pub struct NewBarberInvite {
    pub token: String,
    pub email: String,
    pub created_by: i64,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ActionLog {
    pub id: i64,
    pub user_id: Option<i64>,
    pub action: String,
    pub entity: String,
    pub entity_id: Option<i64>,
    pub details: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewActionLog {
    pub user_id: Option<i64>,
    pub action: String,
    pub entity: String,
    pub entity_id: Option<i64>,
    pub details: Option<String>,
}

/// Parses an ISO-8601 datetime off the wire. Accepts a full RFC 3339 stamp
/// or a naive `YYYY-MM-DDTHH:MM[:SS]` treated as UTC.
pub fn parse_wire_datetime(value: &str) -> Option<DateTime<Utc>> {
    let value = value.trim();
    if let Ok(parsed) = DateTime::parse_from_rfc3339(value) {
        return Some(parsed.with_timezone(&Utc));
    }
    for format in ["%Y-%m-%dT%H:%M:%S", "%Y-%m-%dT%H:%M"] {
        if let Ok(parsed) = NaiveDateTime::parse_from_str(value, format) {
            return Some(parsed.and_utc());
        }
    }
    None
}

/// Parses a `YYYY-MM-DD` calendar date off the wire.
pub fn parse_wire_date(value: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(value.trim(), "%Y-%m-%d").ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_datetime_accepts_rfc3339_and_naive() {
        assert!(parse_wire_datetime("2024-03-01T09:00:00Z").is_some());
        assert!(parse_wire_datetime("2024-03-01T09:00:00+01:00").is_some());
        assert!(parse_wire_datetime("2024-03-01T09:00").is_some());
        assert!(parse_wire_datetime("not-a-date").is_none());
        assert!(parse_wire_datetime("2024-13-40T09:00").is_none());
    }

    #[test]
    fn wire_date_rejects_garbage() {
        assert!(parse_wire_date("2024-03-01").is_some());
        assert!(parse_wire_date("01/03/2024").is_none());
        assert!(parse_wire_date("").is_none());
    }

    #[test]
    fn status_parse_round_trips() {
        for status in [
            AppointmentStatus::Pending,
            AppointmentStatus::Confirmed,
            AppointmentStatus::Completed,
            AppointmentStatus::Canceled,
        ] {
            assert_eq!(AppointmentStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(AppointmentStatus::parse("rescheduled"), None);
    }
}
