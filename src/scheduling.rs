//! Time-slot generation and the appointment lifecycle.
//!
//! The bookable day is a fixed grid of half-hour slots; availability is the
//! grid minus the slots held by non-canceled appointments. Slot occupancy is
//! tracked by the rounded HH:MM label only — service durations do not expand
//! into neighboring slots, so a 45-minute service still occupies a single
//! slot. Known simplification.

use chrono::{DateTime, Timelike, Utc};

use crate::error::ApiError;
use crate::models::{
    parse_wire_date, parse_wire_datetime, Appointment, AppointmentDetail, AppointmentStatus,
    NewAppointment,
};
use crate::storage::Storage;

/// Minutes past midnight of the first bookable slot (09:00).
const DAY_START_MINUTES: u32 = 9 * 60;

/// Half-hour slots per day.
pub const SLOTS_PER_DAY: u32 = 18;

const SLOT_MINUTES: u32 = 30;

/// The canonical daily grid: 18 half-hour start times from 09:00, ascending.
pub fn slot_grid() -> Vec<String> {
    (0..SLOTS_PER_DAY)
        .map(|i| {
            let minutes = DAY_START_MINUTES + i * SLOT_MINUTES;
            format!("{:02}:{:02}", minutes / 60, minutes % 60)
        })
        .collect()
}

/// The HH:MM slot an appointment occupies: its time floored to the
/// half-hour boundary.
pub fn slot_label(date: &DateTime<Utc>) -> String {
    let minute = if date.minute() < SLOT_MINUTES { 0 } else { SLOT_MINUTES };
    format!("{:02}:{:02}", date.hour(), minute)
}

/// Bookable start times for one barber on one calendar day.
///
/// An unparseable date fails before any storage read. A day with no
/// appointments returns the full grid.
pub async fn available_slots(
    store: &dyn Storage,
    barber_id: i64,
    date: &str,
) -> Result<Vec<String>, ApiError> {
    let day = parse_wire_date(date)
        .ok_or_else(|| ApiError::Validation(format!("invalid date: {date}")))?;

    let booked: Vec<String> = store
        .appointments_for_barber_on(barber_id, day)
        .await?
        .iter()
        .map(|appointment| slot_label(&appointment.date))
        .collect();

    Ok(slot_grid()
        .into_iter()
        .filter(|slot| !booked.contains(slot))
        .collect())
}

#[derive(Debug, Clone)]
pub struct BookingRequest {
    pub client_id: i64,
    pub barber_id: i64,
    pub service_id: i64,
    pub date: String,
    pub notes: Option<String>,
}

/// Creates an appointment in `pending` state.
///
/// Referenced client, barber and service must exist and the date must
/// parse; the slot re-check happens inside the storage unit and rejects a
/// taken slot with `Conflict`.
pub async fn create_appointment(
    store: &dyn Storage,
    request: BookingRequest,
) -> Result<Appointment, ApiError> {
    let date = parse_wire_datetime(&request.date)
        .ok_or_else(|| ApiError::Validation(format!("invalid date: {}", request.date)))?;

    if store.user_by_id(request.client_id).await?.is_none() {
        return Err(ApiError::NotFound("client".into()));
    }
    let barber = store
        .barber_by_id(request.barber_id)
        .await?
        .ok_or_else(|| ApiError::NotFound("barber".into()))?;
    if !barber.active {
        return Err(ApiError::Validation("barber is not active".into()));
    }
    if store.service_by_id(request.service_id).await?.is_none() {
        return Err(ApiError::NotFound("service".into()));
    }

    let appointment = store
        .create_appointment(NewAppointment {
            client_id: request.client_id,
            barber_id: request.barber_id,
            service_id: request.service_id,
            date,
            notes: request.notes,
        })
        .await?;
    Ok(appointment)
}

/// Applies a status transition.
///
/// The new value must be one of the four enum members, and no transition
/// is defined away from `completed` or `canceled`.
pub async fn update_appointment_status(
    store: &dyn Storage,
    id: i64,
    status: &str,
) -> Result<Appointment, ApiError> {
    let next = AppointmentStatus::parse(status)
        .ok_or_else(|| ApiError::Validation(format!("invalid status: {status}")))?;

    let current = store
        .appointment_by_id(id)
        .await?
        .ok_or_else(|| ApiError::NotFound("appointment".into()))?;

    if current.status.is_terminal() && next != current.status {
        return Err(ApiError::Validation(format!(
            "no transition out of {}",
            current.status.as_str()
        )));
    }

    let updated = store.set_appointment_status(id, next).await?;
    Ok(updated)
}

pub async fn appointment_detail(
    store: &dyn Storage,
    id: i64,
) -> Result<AppointmentDetail, ApiError> {
    store
        .appointment_detail(id)
        .await?
        .ok_or_else(|| ApiError::NotFound("appointment".into()))
}

pub async fn list_appointments(store: &dyn Storage) -> Result<Vec<AppointmentDetail>, ApiError> {
    Ok(store.list_appointments().await?)
}

/// Appointments with `date > now` and status != canceled, ascending.
pub async fn upcoming_appointments(
    store: &dyn Storage,
) -> Result<Vec<AppointmentDetail>, ApiError> {
    Ok(store.upcoming_appointments(Utc::now()).await?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{NewBarber, NewService, NewUser, PaymentPeriod, Role};
    use crate::storage::{MemStorage, Storage};
    use rust_decimal::Decimal;

    async fn fixture(store: &MemStorage) -> (i64, i64, i64) {
        let client = store
            .create_user(NewUser {
                username: "carla".into(),
                email: "carla@example.com".into(),
                phone: Some("911111111".into()),
                role: Role::Client,
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
        (client.id, barber.id, service.id)
    }

    fn booking(client: i64, barber: i64, service: i64, date: &str) -> BookingRequest {
        BookingRequest {
            client_id: client,
            barber_id: barber,
            service_id: service,
            date: date.into(),
            notes: None,
        }
    }

    #[test]
    fn grid_is_eighteen_ascending_half_hours() {
        let grid = slot_grid();
        assert_eq!(grid.len(), 18);
        assert_eq!(grid.first().unwrap(), "09:00");
        assert_eq!(grid.get(1).unwrap(), "09:30");
        assert_eq!(grid.last().unwrap(), "17:30");
        let mut sorted = grid.clone();
        sorted.sort();
        assert_eq!(grid, sorted);
    }

    #[test]
    fn slot_label_floors_to_half_hour() {
        let at = |s: &str| parse_wire_datetime(s).unwrap();
        assert_eq!(slot_label(&at("2024-03-01T09:00:00Z")), "09:00");
        assert_eq!(slot_label(&at("2024-03-01T09:05:00Z")), "09:00");
        assert_eq!(slot_label(&at("2024-03-01T09:44:00Z")), "09:30");
    }

    #[tokio::test]
    async fn empty_day_returns_full_grid() {
        let store = MemStorage::new();
        let (_, barber, _) = fixture(&store).await;
        let slots = available_slots(&store, barber, "2024-03-01").await.unwrap();
        assert_eq!(slots, slot_grid());
    }

    #[tokio::test]
    async fn booked_slot_disappears_other_slots_remain() {
        let store = MemStorage::new();
        let (client, barber, service) = fixture(&store).await;
        create_appointment(&store, booking(client, barber, service, "2024-03-01T09:00:00Z"))
            .await
            .unwrap();

        let slots = available_slots(&store, barber, "2024-03-01").await.unwrap();
        assert!(!slots.contains(&"09:00".to_string()));
        assert!(slots.contains(&"09:30".to_string()));
        assert_eq!(slots.len(), 17);

        // Another day is unaffected.
        let other = available_slots(&store, barber, "2024-03-02").await.unwrap();
        assert_eq!(other.len(), 18);
    }

    #[tokio::test]
    async fn canceled_appointment_frees_its_slot() {
        let store = MemStorage::new();
        let (client, barber, service) = fixture(&store).await;
        let appointment =
            create_appointment(&store, booking(client, barber, service, "2024-03-01T10:00:00Z"))
                .await
                .unwrap();
        update_appointment_status(&store, appointment.id, "canceled")
            .await
            .unwrap();

        let slots = available_slots(&store, barber, "2024-03-01").await.unwrap();
        assert!(slots.contains(&"10:00".to_string()));
    }

    #[tokio::test]
    async fn invalid_date_fails_validation() {
        let store = MemStorage::new();
        let (_, barber, _) = fixture(&store).await;
        let err = available_slots(&store, barber, "yesterday").await.unwrap_err();
        assert!(matches!(err, ApiError::Validation(_)));
    }

    #[tokio::test]
    async fn create_defaults_to_pending() {
        let store = MemStorage::new();
        let (client, barber, service) = fixture(&store).await;
        let appointment =
            create_appointment(&store, booking(client, barber, service, "2024-03-01T11:00:00Z"))
                .await
                .unwrap();
        assert_eq!(appointment.status, AppointmentStatus::Pending);
    }

    #[tokio::test]
    async fn create_with_unknown_service_writes_nothing() {
        let store = MemStorage::new();
        let (client, barber, _) = fixture(&store).await;
        let err = create_appointment(&store, booking(client, barber, 999, "2024-03-01T11:00:00Z"))
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::NotFound(_)));
        assert!(store.list_appointments().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn create_with_bad_date_fails_validation() {
        let store = MemStorage::new();
        let (client, barber, service) = fixture(&store).await;
        let err = create_appointment(&store, booking(client, barber, service, "soonish"))
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::Validation(_)));
    }

    #[tokio::test]
    async fn double_booking_same_slot_conflicts() {
        let store = MemStorage::new();
        let (client, barber, service) = fixture(&store).await;
        create_appointment(&store, booking(client, barber, service, "2024-03-01T09:00:00Z"))
            .await
            .unwrap();
        let err =
            create_appointment(&store, booking(client, barber, service, "2024-03-01T09:10:00Z"))
                .await
                .unwrap_err();
        assert!(matches!(err, ApiError::Conflict(_)));
    }

    #[tokio::test]
    async fn slot_taken_by_canceled_appointment_is_bookable_again() {
        let store = MemStorage::new();
        let (client, barber, service) = fixture(&store).await;
        let first =
            create_appointment(&store, booking(client, barber, service, "2024-03-01T09:00:00Z"))
                .await
                .unwrap();
        update_appointment_status(&store, first.id, "canceled").await.unwrap();
        create_appointment(&store, booking(client, barber, service, "2024-03-01T09:00:00Z"))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn unknown_status_value_leaves_row_untouched() {
        let store = MemStorage::new();
        let (client, barber, service) = fixture(&store).await;
        let appointment =
            create_appointment(&store, booking(client, barber, service, "2024-03-01T09:00:00Z"))
                .await
                .unwrap();
        let err = update_appointment_status(&store, appointment.id, "rescheduled")
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::Validation(_)));

        let unchanged = store.appointment_by_id(appointment.id).await.unwrap().unwrap();
        assert_eq!(unchanged.status, AppointmentStatus::Pending);
    }

    #[tokio::test]
    async fn no_transition_out_of_terminal_states() {
        let store = MemStorage::new();
        let (client, barber, service) = fixture(&store).await;
        let appointment =
            create_appointment(&store, booking(client, barber, service, "2024-03-01T09:00:00Z"))
                .await
                .unwrap();
        update_appointment_status(&store, appointment.id, "canceled").await.unwrap();

        let err = update_appointment_status(&store, appointment.id, "confirmed")
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::Validation(_)));
        let unchanged = store.appointment_by_id(appointment.id).await.unwrap().unwrap();
        assert_eq!(unchanged.status, AppointmentStatus::Canceled);
    }
}
