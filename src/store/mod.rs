//! Repository boundary between the services and the data store.
//!
//! Each table gets a narrow async trait. [`Store`] bundles them so handlers
//! carry a single `Arc<dyn Store>`; Postgres backs it in production and
//! [`memory::MemoryStore`] backs it in tests and local runs.

use async_trait::async_trait;
use uuid::Uuid;

use crate::models::{
    Appointment, AppointmentDetails, AppointmentFilter, AppointmentSort, Doctor, DoctorFilter,
    DoctorSort, Invoice, InvoiceDetails, InvoiceFilter, InvoiceSort, NewAppointment, NewDoctor,
    NewInvoice, NewPatient, NewReminder, NewTreatment, Patient, PatientFilter, PatientSort,
    Reminder, ReminderFilter, ReminderSort, SortOrder, Treatment, TreatmentFilter, TreatmentSort,
};

pub mod memory;
pub mod pg;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("{context}: {source}")]
    Database {
        context: &'static str,
        #[source]
        source: sqlx::Error,
    },
    #[error("{context}: {source}")]
    Migration {
        context: &'static str,
        #[source]
        source: sqlx::migrate::MigrateError,
    },
}

impl StoreError {
    pub fn db(context: &'static str) -> impl FnOnce(sqlx::Error) -> StoreError {
        move |source| StoreError::Database { context, source }
    }
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Ordering and window for a list query. `limit: None` returns every match.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ListOptions<S> {
    pub sort: S,
    pub order: SortOrder,
    pub limit: Option<i64>,
    pub offset: i64,
}

impl<S> ListOptions<S> {
    pub fn all(sort: S, order: SortOrder) -> Self {
        Self {
            sort,
            order,
            limit: None,
            offset: 0,
        }
    }

    pub fn first(sort: S, order: SortOrder, limit: i64) -> Self {
        Self {
            sort,
            order,
            limit: Some(limit),
            offset: 0,
        }
    }
}

#[async_trait]
pub trait AppointmentStore: Send + Sync {
    async fn list_appointments(
        &self,
        filter: &AppointmentFilter,
        opts: &ListOptions<AppointmentSort>,
    ) -> StoreResult<Vec<AppointmentDetails>>;

    async fn count_appointments(&self, filter: &AppointmentFilter) -> StoreResult<i64>;

    async fn get_appointment(&self, id: Uuid) -> StoreResult<Option<AppointmentDetails>>;

    async fn insert_appointment(&self, new: &NewAppointment) -> StoreResult<Appointment>;

    /// Overwrites every mutable column. `None` when the row is gone.
    async fn update_appointment(&self, appt: &Appointment) -> StoreResult<Option<Appointment>>;

    /// `(treatment_id, appointment count)` for every treatment with at least one booking.
    async fn appointment_counts_by_treatment(&self) -> StoreResult<Vec<(Uuid, i64)>>;
}

#[async_trait]
pub trait DoctorStore: Send + Sync {
    async fn list_doctors(
        &self,
        filter: &DoctorFilter,
        opts: &ListOptions<DoctorSort>,
    ) -> StoreResult<Vec<Doctor>>;

    async fn count_doctors(&self, filter: &DoctorFilter) -> StoreResult<i64>;

    async fn get_doctor(&self, id: Uuid) -> StoreResult<Option<Doctor>>;

    async fn insert_doctor(&self, new: &NewDoctor) -> StoreResult<Doctor>;

    async fn update_doctor(&self, doctor: &Doctor) -> StoreResult<Option<Doctor>>;

    async fn delete_doctor(&self, id: Uuid) -> StoreResult<bool>;
}

#[async_trait]
pub trait TreatmentStore: Send + Sync {
    async fn list_treatments(
        &self,
        filter: &TreatmentFilter,
        opts: &ListOptions<TreatmentSort>,
    ) -> StoreResult<Vec<Treatment>>;

    async fn count_treatments(&self, filter: &TreatmentFilter) -> StoreResult<i64>;

    async fn get_treatment(&self, id: Uuid) -> StoreResult<Option<Treatment>>;

    async fn insert_treatment(&self, new: &NewTreatment) -> StoreResult<Treatment>;

    async fn update_treatment(&self, treatment: &Treatment) -> StoreResult<Option<Treatment>>;

    async fn delete_treatment(&self, id: Uuid) -> StoreResult<bool>;
}

#[async_trait]
pub trait PatientStore: Send + Sync {
    async fn list_patients(
        &self,
        filter: &PatientFilter,
        opts: &ListOptions<PatientSort>,
    ) -> StoreResult<Vec<Patient>>;

    async fn count_patients(&self, filter: &PatientFilter) -> StoreResult<i64>;

    async fn get_patient(&self, id: Uuid) -> StoreResult<Option<Patient>>;

    async fn insert_patient(&self, new: &NewPatient) -> StoreResult<Patient>;

    async fn update_patient(&self, patient: &Patient) -> StoreResult<Option<Patient>>;

    async fn delete_patient(&self, id: Uuid) -> StoreResult<bool>;
}

#[async_trait]
pub trait InvoiceStore: Send + Sync {
    async fn list_invoices(
        &self,
        filter: &InvoiceFilter,
        opts: &ListOptions<InvoiceSort>,
    ) -> StoreResult<Vec<InvoiceDetails>>;

    async fn count_invoices(&self, filter: &InvoiceFilter) -> StoreResult<i64>;

    async fn get_invoice(&self, id: Uuid) -> StoreResult<Option<InvoiceDetails>>;

    async fn insert_invoice(&self, new: &NewInvoice) -> StoreResult<Invoice>;

    async fn update_invoice(&self, invoice: &Invoice) -> StoreResult<Option<Invoice>>;

    async fn delete_invoice(&self, id: Uuid) -> StoreResult<bool>;
}

#[async_trait]
pub trait ReminderStore: Send + Sync {
    async fn list_reminders(
        &self,
        filter: &ReminderFilter,
        opts: &ListOptions<ReminderSort>,
    ) -> StoreResult<Vec<Reminder>>;

    async fn count_reminders(&self, filter: &ReminderFilter) -> StoreResult<i64>;

    async fn get_reminder(&self, id: Uuid) -> StoreResult<Option<Reminder>>;

    async fn insert_reminder(&self, new: &NewReminder) -> StoreResult<Reminder>;

    async fn update_reminder(&self, reminder: &Reminder) -> StoreResult<Option<Reminder>>;

    async fn delete_reminder(&self, id: Uuid) -> StoreResult<bool>;
}

pub trait Store:
    AppointmentStore + DoctorStore + TreatmentStore + PatientStore + InvoiceStore + ReminderStore
{
}

impl<T> Store for T where
    T: AppointmentStore + DoctorStore + TreatmentStore + PatientStore + InvoiceStore + ReminderStore
{
}
