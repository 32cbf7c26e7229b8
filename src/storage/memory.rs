//! In-process storage backend, used by the test suite.
//!
//! One mutex over the whole state; composite operations hold it for their
//! full duration, which gives them the same all-or-nothing behavior the
//! SQLite backend gets from transactions.

use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};

use crate::models::*;
use crate::scheduling::slot_label;
use crate::storage::{InviteBarberFields, Storage, StoreError, StoreResult};

#[derive(Default)]
struct Inner {
    next_id: i64,
    users: Vec<User>,
    barbers: Vec<Barber>,
    services: Vec<Service>,
    products: Vec<Product>,
    commissions: Vec<Commission>,
    product_commissions: Vec<ProductCommission>,
    appointments: Vec<Appointment>,
    completed_services: Vec<CompletedService>,
    product_sales: Vec<ProductSale>,
    payments: Vec<Payment>,
    invites: Vec<BarberInvite>,
    actions: Vec<ActionLog>,
}

impl Inner {
    fn next_id(&mut self) -> i64 {
        self.next_id += 1;
        self.next_id
    }

    fn insert_user(&mut self, new: NewUser) -> StoreResult<User> {
        if self.users.iter().any(|u| u.username == new.username) {
            return Err(StoreError::Conflict("username already taken".into()));
        }
        if self.users.iter().any(|u| u.email == new.email) {
            return Err(StoreError::Conflict("email already taken".into()));
        }
        let user = User {
            id: self.next_id(),
            username: new.username,
            email: new.email,
            phone: new.phone,
            role: new.role,
            password_hash: new.password_hash,
            metadata: new.metadata,
            created_at: Utc::now(),
        };
        self.users.push(user.clone());
        Ok(user)
    }

    fn user_name(&self, id: i64) -> String {
        self.users
            .iter()
            .find(|u| u.id == id)
            .map(|u| u.username.clone())
            .unwrap_or_default()
    }

    fn barber_name(&self, barber_id: i64) -> String {
        self.barbers
            .iter()
            .find(|b| b.id == barber_id)
            .map(|b| self.user_name(b.user_id))
            .unwrap_or_default()
    }

    fn service_name(&self, service_id: i64) -> String {
        self.services
            .iter()
            .find(|s| s.id == service_id)
            .map(|s| s.name.clone())
            .unwrap_or_default()
    }

    fn appointment_detail(&self, appointment: &Appointment) -> AppointmentDetail {
        AppointmentDetail {
            client_name: self.user_name(appointment.client_id),
            barber_name: self.barber_name(appointment.barber_id),
            service_name: self.service_name(appointment.service_id),
            appointment: appointment.clone(),
        }
    }

    fn completed_detail(&self, record: &CompletedService) -> CompletedServiceDetail {
        CompletedServiceDetail {
            barber_name: self.barber_name(record.barber_id),
            service_name: self.service_name(record.service_id),
            record: record.clone(),
        }
    }
}

pub struct MemStorage {
    inner: Mutex<Inner>,
}

impl MemStorage {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        // A poisoned lock means a panicking test; propagate the state as-is.
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Default for MemStorage {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Storage for MemStorage {
    async fn create_user(&self, new: NewUser) -> StoreResult<User> {
        self.lock().insert_user(new)
    }

    async fn user_by_id(&self, id: i64) -> StoreResult<Option<User>> {
        Ok(self.lock().users.iter().find(|u| u.id == id).cloned())
    }

    async fn user_by_username(&self, username: &str) -> StoreResult<Option<User>> {
        Ok(self
            .lock()
            .users
            .iter()
            .find(|u| u.username == username)
            .cloned())
    }

    async fn phone_in_use(&self, phone: &str) -> StoreResult<bool> {
        Ok(self
            .lock()
            .users
            .iter()
            .any(|u| u.phone.as_deref() == Some(phone)))
    }

    async fn list_users_by_role(&self, role: Role) -> StoreResult<Vec<User>> {
        let mut users: Vec<User> = self
            .lock()
            .users
            .iter()
            .filter(|u| u.role == role)
            .cloned()
            .collect();
        users.sort_by(|a, b| a.username.cmp(&b.username));
        Ok(users)
    }

    async fn create_barber(&self, new: NewBarber) -> StoreResult<Barber> {
        let mut inner = self.lock();
        if !inner.users.iter().any(|u| u.id == new.user_id) {
            return Err(StoreError::NotFound("user".into()));
        }
        if inner.barbers.iter().any(|b| b.user_id == new.user_id) {
            return Err(StoreError::Conflict("user is already a barber".into()));
        }
        let barber = Barber {
            id: inner.next_id(),
            user_id: new.user_id,
            nif: new.nif,
            iban: new.iban,
            payment_period: new.payment_period,
            active: true,
            calendar_visible: new.calendar_visible,
        };
        inner.barbers.push(barber.clone());
        Ok(barber)
    }

    async fn barber_by_id(&self, id: i64) -> StoreResult<Option<Barber>> {
        Ok(self.lock().barbers.iter().find(|b| b.id == id).cloned())
    }

    async fn barber_by_user(&self, user_id: i64) -> StoreResult<Option<Barber>> {
        Ok(self
            .lock()
            .barbers
            .iter()
            .find(|b| b.user_id == user_id)
            .cloned())
    }

    async fn list_barbers(&self) -> StoreResult<Vec<BarberProfile>> {
        let inner = self.lock();
        let mut profiles: Vec<BarberProfile> = inner
            .barbers
            .iter()
            .filter_map(|barber| {
                let user = inner.users.iter().find(|u| u.id == barber.user_id)?;
                Some(BarberProfile {
                    barber: barber.clone(),
                    username: user.username.clone(),
                    email: user.email.clone(),
                })
            })
            .collect();
        profiles.sort_by(|a, b| a.username.cmp(&b.username));
        Ok(profiles)
    }

    async fn deactivate_barber(&self, id: i64) -> StoreResult<bool> {
        let mut inner = self.lock();
        match inner.barbers.iter_mut().find(|b| b.id == id) {
            Some(barber) => {
                barber.active = false;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn create_service(&self, new: NewService) -> StoreResult<Service> {
        let mut inner = self.lock();
        let service = Service {
            id: inner.next_id(),
            name: new.name,
            price: new.price,
            duration_minutes: new.duration_minutes,
            active: true,
        };
        inner.services.push(service.clone());
        Ok(service)
    }

    async fn service_by_id(&self, id: i64) -> StoreResult<Option<Service>> {
        Ok(self.lock().services.iter().find(|s| s.id == id).cloned())
    }

    async fn list_services(&self, only_active: bool) -> StoreResult<Vec<Service>> {
        Ok(self
            .lock()
            .services
            .iter()
            .filter(|s| !only_active || s.active)
            .cloned()
            .collect())
    }

    async fn deactivate_service(&self, id: i64) -> StoreResult<bool> {
        let mut inner = self.lock();
        match inner.services.iter_mut().find(|s| s.id == id) {
            Some(service) => {
                service.active = false;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn create_product(&self, new: NewProduct) -> StoreResult<Product> {
        let mut inner = self.lock();
        let product = Product {
            id: inner.next_id(),
            name: new.name,
            price: new.price,
            active: true,
        };
        inner.products.push(product.clone());
        Ok(product)
    }

    async fn product_by_id(&self, id: i64) -> StoreResult<Option<Product>> {
        Ok(self.lock().products.iter().find(|p| p.id == id).cloned())
    }

    async fn list_products(&self, only_active: bool) -> StoreResult<Vec<Product>> {
        Ok(self
            .lock()
            .products
            .iter()
            .filter(|p| !only_active || p.active)
            .cloned()
            .collect())
    }

    async fn deactivate_product(&self, id: i64) -> StoreResult<bool> {
        let mut inner = self.lock();
        match inner.products.iter_mut().find(|p| p.id == id) {
            Some(product) => {
                product.active = false;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn create_commission(&self, new: NewCommission) -> StoreResult<Commission> {
        let mut inner = self.lock();
        if inner
            .commissions
            .iter()
            .any(|c| c.barber_id == new.barber_id && c.service_id == new.service_id)
        {
            return Err(StoreError::Conflict(
                "commission already configured for this barber and service".into(),
            ));
        }
        let commission = Commission {
            id: inner.next_id(),
            barber_id: new.barber_id,
            service_id: new.service_id,
            percentage: new.percentage,
        };
        inner.commissions.push(commission.clone());
        Ok(commission)
    }

    async fn commission_for(
        &self,
        barber_id: i64,
        service_id: i64,
    ) -> StoreResult<Option<Commission>> {
        Ok(self
            .lock()
            .commissions
            .iter()
            .find(|c| c.barber_id == barber_id && c.service_id == service_id)
            .cloned())
    }

    async fn list_commissions(&self, barber_id: i64) -> StoreResult<Vec<Commission>> {
        Ok(self
            .lock()
            .commissions
            .iter()
            .filter(|c| c.barber_id == barber_id)
            .cloned()
            .collect())
    }

    async fn create_product_commission(
        &self,
        new: NewProductCommission,
    ) -> StoreResult<ProductCommission> {
        let mut inner = self.lock();
        if inner
            .product_commissions
            .iter()
            .any(|c| c.barber_id == new.barber_id && c.product_id == new.product_id)
        {
            return Err(StoreError::Conflict(
                "commission already configured for this barber and product".into(),
            ));
        }
        let commission = ProductCommission {
            id: inner.next_id(),
            barber_id: new.barber_id,
            product_id: new.product_id,
            percentage: new.percentage,
        };
        inner.product_commissions.push(commission.clone());
        Ok(commission)
    }

    async fn product_commission_for(
        &self,
        barber_id: i64,
        product_id: i64,
    ) -> StoreResult<Option<ProductCommission>> {
        Ok(self
            .lock()
            .product_commissions
            .iter()
            .find(|c| c.barber_id == barber_id && c.product_id == product_id)
            .cloned())
    }

    async fn list_product_commissions(
        &self,
        barber_id: i64,
    ) -> StoreResult<Vec<ProductCommission>> {
        Ok(self
            .lock()
            .product_commissions
            .iter()
            .filter(|c| c.barber_id == barber_id)
            .cloned()
            .collect())
    }

    async fn create_appointment(&self, new: NewAppointment) -> StoreResult<Appointment> {
        let mut inner = self.lock();
        let slot = slot_label(&new.date);
        let day = new.date.date_naive();
        let taken = inner.appointments.iter().any(|a| {
            a.barber_id == new.barber_id
                && a.status != AppointmentStatus::Canceled
                && a.date.date_naive() == day
                && slot_label(&a.date) == slot
        });
        if taken {
            return Err(StoreError::Conflict(format!("slot {slot} is already booked")));
        }
        let appointment = Appointment {
            id: inner.next_id(),
            client_id: new.client_id,
            barber_id: new.barber_id,
            service_id: new.service_id,
            date: new.date,
            status: AppointmentStatus::Pending,
            notes: new.notes,
            created_at: Utc::now(),
        };
        inner.appointments.push(appointment.clone());
        Ok(appointment)
    }

    async fn appointment_by_id(&self, id: i64) -> StoreResult<Option<Appointment>> {
        Ok(self
            .lock()
            .appointments
            .iter()
            .find(|a| a.id == id)
            .cloned())
    }

    async fn appointment_detail(&self, id: i64) -> StoreResult<Option<AppointmentDetail>> {
        let inner = self.lock();
        Ok(inner
            .appointments
            .iter()
            .find(|a| a.id == id)
            .map(|a| inner.appointment_detail(a)))
    }

    async fn list_appointments(&self) -> StoreResult<Vec<AppointmentDetail>> {
        let inner = self.lock();
        let mut details: Vec<AppointmentDetail> = inner
            .appointments
            .iter()
            .map(|a| inner.appointment_detail(a))
            .collect();
        details.sort_by_key(|d| d.appointment.date);
        Ok(details)
    }

    async fn upcoming_appointments(
        &self,
        now: DateTime<Utc>,
    ) -> StoreResult<Vec<AppointmentDetail>> {
        let inner = self.lock();
        let mut details: Vec<AppointmentDetail> = inner
            .appointments
            .iter()
            .filter(|a| a.date > now && a.status != AppointmentStatus::Canceled)
            .map(|a| inner.appointment_detail(a))
            .collect();
        details.sort_by_key(|d| d.appointment.date);
        Ok(details)
    }

    async fn appointments_for_barber_on(
        &self,
        barber_id: i64,
        day: NaiveDate,
    ) -> StoreResult<Vec<Appointment>> {
        let mut appointments: Vec<Appointment> = self
            .lock()
            .appointments
            .iter()
            .filter(|a| {
                a.barber_id == barber_id
                    && a.status != AppointmentStatus::Canceled
                    && a.date.date_naive() == day
            })
            .cloned()
            .collect();
        appointments.sort_by_key(|a| a.date);
        Ok(appointments)
    }

    async fn set_appointment_status(
        &self,
        id: i64,
        status: AppointmentStatus,
    ) -> StoreResult<Appointment> {
        let mut inner = self.lock();
        let appointment = inner
            .appointments
            .iter_mut()
            .find(|a| a.id == id)
            .ok_or_else(|| StoreError::NotFound("appointment".into()))?;
        appointment.status = status;
        Ok(appointment.clone())
    }

    async fn record_completed_service(
        &self,
        new: NewCompletedService,
    ) -> StoreResult<CompletedService> {
        let mut inner = self.lock();
        if let Some(appointment_id) = new.appointment_id {
            let appointment = inner
                .appointments
                .iter_mut()
                .find(|a| a.id == appointment_id)
                .ok_or_else(|| StoreError::NotFound("appointment".into()))?;
            appointment.status = AppointmentStatus::Completed;
        }
        let record = CompletedService {
            id: inner.next_id(),
            barber_id: new.barber_id,
            service_id: new.service_id,
            client_id: new.client_id,
            client_name: new.client_name,
            price: new.price,
            date: new.date,
            appointment_id: new.appointment_id,
            validated_by_admin: false,
        };
        inner.completed_services.push(record.clone());
        Ok(record)
    }

    async fn completed_service_by_id(&self, id: i64) -> StoreResult<Option<CompletedService>> {
        Ok(self
            .lock()
            .completed_services
            .iter()
            .find(|c| c.id == id)
            .cloned())
    }

    async fn validate_completed_service(&self, id: i64) -> StoreResult<CompletedService> {
        let mut inner = self.lock();
        let record = inner
            .completed_services
            .iter_mut()
            .find(|c| c.id == id)
            .ok_or_else(|| StoreError::NotFound("completed service".into()))?;
        record.validated_by_admin = true;
        Ok(record.clone())
    }

    async fn delete_completed_service(&self, id: i64) -> StoreResult<bool> {
        let mut inner = self.lock();
        let before = inner.completed_services.len();
        inner.completed_services.retain(|c| c.id != id);
        Ok(inner.completed_services.len() < before)
    }

    async fn completed_services_for_barber(
        &self,
        barber_id: i64,
    ) -> StoreResult<Vec<CompletedServiceDetail>> {
        let inner = self.lock();
        let mut details: Vec<CompletedServiceDetail> = inner
            .completed_services
            .iter()
            .filter(|c| c.barber_id == barber_id)
            .map(|c| inner.completed_detail(c))
            .collect();
        details.sort_by_key(|d| d.record.date);
        Ok(details)
    }

    async fn list_completed_services(
        &self,
        limit: i64,
    ) -> StoreResult<Vec<CompletedServiceDetail>> {
        let inner = self.lock();
        let mut details: Vec<CompletedServiceDetail> = inner
            .completed_services
            .iter()
            .map(|c| inner.completed_detail(c))
            .collect();
        details.sort_by(|a, b| b.record.date.cmp(&a.record.date));
        details.truncate(limit.max(0) as usize);
        Ok(details)
    }

    async fn validated_services_since(
        &self,
        barber_id: i64,
        cutoff: DateTime<Utc>,
    ) -> StoreResult<Vec<CompletedService>> {
        let mut records: Vec<CompletedService> = self
            .lock()
            .completed_services
            .iter()
            .filter(|c| c.barber_id == barber_id && c.validated_by_admin && c.date > cutoff)
            .cloned()
            .collect();
        records.sort_by_key(|c| c.date);
        Ok(records)
    }

    async fn pending_services_for_barber(
        &self,
        barber_id: i64,
    ) -> StoreResult<Vec<CompletedService>> {
        let mut records: Vec<CompletedService> = self
            .lock()
            .completed_services
            .iter()
            .filter(|c| c.barber_id == barber_id && !c.validated_by_admin)
            .cloned()
            .collect();
        records.sort_by_key(|c| c.date);
        Ok(records)
    }

    async fn create_product_sale(&self, new: NewProductSale) -> StoreResult<ProductSale> {
        let mut inner = self.lock();
        let sale = ProductSale {
            id: inner.next_id(),
            barber_id: new.barber_id,
            product_id: new.product_id,
            client_id: new.client_id,
            client_name: new.client_name,
            quantity: new.quantity,
            unit_price: new.unit_price,
            date: new.date,
            validated_by_admin: false,
        };
        inner.product_sales.push(sale.clone());
        Ok(sale)
    }

    async fn product_sale_by_id(&self, id: i64) -> StoreResult<Option<ProductSale>> {
        Ok(self
            .lock()
            .product_sales
            .iter()
            .find(|s| s.id == id)
            .cloned())
    }

    async fn validate_product_sale(&self, id: i64) -> StoreResult<ProductSale> {
        let mut inner = self.lock();
        let sale = inner
            .product_sales
            .iter_mut()
            .find(|s| s.id == id)
            .ok_or_else(|| StoreError::NotFound("product sale".into()))?;
        sale.validated_by_admin = true;
        Ok(sale.clone())
    }

    async fn delete_product_sale(&self, id: i64) -> StoreResult<bool> {
        let mut inner = self.lock();
        let before = inner.product_sales.len();
        inner.product_sales.retain(|s| s.id != id);
        Ok(inner.product_sales.len() < before)
    }

    async fn product_sales_for_barber(&self, barber_id: i64) -> StoreResult<Vec<ProductSale>> {
        let mut sales: Vec<ProductSale> = self
            .lock()
            .product_sales
            .iter()
            .filter(|s| s.barber_id == barber_id)
            .cloned()
            .collect();
        sales.sort_by_key(|s| s.date);
        Ok(sales)
    }

    async fn create_payment(&self, new: NewPayment) -> StoreResult<Payment> {
        let mut inner = self.lock();
        let payment = Payment {
            id: inner.next_id(),
            barber_id: new.barber_id,
            amount: new.amount,
            period_start: new.period_start,
            period_end: new.period_end,
            status: PaymentStatus::Pending,
            notes: new.notes,
            payment_date: None,
            created_at: Utc::now(),
        };
        inner.payments.push(payment.clone());
        Ok(payment)
    }

    async fn payment_by_id(&self, id: i64) -> StoreResult<Option<Payment>> {
        Ok(self.lock().payments.iter().find(|p| p.id == id).cloned())
    }

    async fn latest_payment_for_barber(&self, barber_id: i64) -> StoreResult<Option<Payment>> {
        Ok(self
            .lock()
            .payments
            .iter()
            .filter(|p| p.barber_id == barber_id)
            .max_by_key(|p| p.period_end)
            .cloned())
    }

    async fn payments_for_barber(&self, barber_id: i64) -> StoreResult<Vec<Payment>> {
        let mut payments: Vec<Payment> = self
            .lock()
            .payments
            .iter()
            .filter(|p| p.barber_id == barber_id)
            .cloned()
            .collect();
        payments.sort_by(|a, b| b.period_end.cmp(&a.period_end));
        Ok(payments)
    }

    async fn mark_payment_paid(&self, id: i64, now: DateTime<Utc>) -> StoreResult<Payment> {
        let mut inner = self.lock();
        let payment = inner
            .payments
            .iter_mut()
            .find(|p| p.id == id)
            .ok_or_else(|| StoreError::NotFound("payment".into()))?;
        if payment.status != PaymentStatus::Paid {
            payment.status = PaymentStatus::Paid;
            payment.payment_date = Some(now);
        }
        Ok(payment.clone())
    }

    async fn create_invite(&self, new: NewBarberInvite) -> StoreResult<BarberInvite> {
        let mut inner = self.lock();
        let invite = BarberInvite {
            id: inner.next_id(),
            token: new.token,
            email: new.email,
            created_by: new.created_by,
            expires_at: new.expires_at,
            used_at: None,
        };
        inner.invites.push(invite.clone());
        Ok(invite)
    }

    async fn consume_invite(
        &self,
        token: &str,
        now: DateTime<Utc>,
        user: NewUser,
        barber: InviteBarberFields,
    ) -> StoreResult<(User, Barber)> {
        let mut inner = self.lock();
        let invite = inner
            .invites
            .iter()
            .find(|i| i.token == token)
            .cloned()
            .ok_or_else(|| StoreError::Invalid("unknown invite token".into()))?;
        if invite.used_at.is_some() {
            return Err(StoreError::Invalid("invite already used".into()));
        }
        if invite.expires_at <= now {
            return Err(StoreError::Invalid("invite expired".into()));
        }

        let user = inner.insert_user(user)?;
        let barber_row = Barber {
            id: inner.next_id(),
            user_id: user.id,
            nif: barber.nif,
            iban: barber.iban,
            payment_period: barber.payment_period,
            active: true,
            calendar_visible: true,
        };
        inner.barbers.push(barber_row.clone());
        if let Some(stored) = inner.invites.iter_mut().find(|i| i.token == token) {
            stored.used_at = Some(now);
        }
        Ok((user, barber_row))
    }

    async fn append_action(&self, entry: NewActionLog) -> StoreResult<ActionLog> {
        let mut inner = self.lock();
        let action = ActionLog {
            id: inner.next_id(),
            user_id: entry.user_id,
            action: entry.action,
            entity: entry.entity,
            entity_id: entry.entity_id,
            details: entry.details,
            created_at: Utc::now(),
        };
        inner.actions.push(action.clone());
        Ok(action)
    }

    async fn list_actions(&self, limit: i64) -> StoreResult<Vec<ActionLog>> {
        let inner = self.lock();
        let mut actions: Vec<ActionLog> = inner.actions.iter().cloned().collect();
        actions.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        actions.truncate(limit.max(0) as usize);
        Ok(actions)
    }
}
