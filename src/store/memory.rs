//! In-process store used by tests and `STORAGE_BACKEND=memory`.

use std::cmp::Ordering;
use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::{
    AppointmentStore, DoctorStore, InvoiceStore, ListOptions, PatientStore, ReminderStore,
    StoreResult, TreatmentStore,
};
use crate::models::{
    Appointment, AppointmentDetails, AppointmentFilter, AppointmentSort, Doctor, DoctorBrief,
    DoctorFilter, DoctorSort, Invoice, InvoiceDetails, InvoiceFilter, InvoiceSort, NewAppointment,
    NewDoctor, NewInvoice, NewPatient, NewReminder, NewTreatment, Patient, PatientFilter,
    PatientSort, Reminder, ReminderFilter, ReminderSort, SortOrder, Treatment, TreatmentBrief,
    TreatmentFilter, TreatmentSort,
};

#[derive(Debug, Default)]
struct Tables {
    appointments: HashMap<Uuid, Appointment>,
    doctors: HashMap<Uuid, Doctor>,
    treatments: HashMap<Uuid, Treatment>,
    patients: HashMap<Uuid, Patient>,
    invoices: HashMap<Uuid, Invoice>,
    reminders: HashMap<Uuid, Reminder>,
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    tables: RwLock<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn contains_ci(haystack: &str, needle: &str) -> bool {
    haystack.to_lowercase().contains(&needle.to_lowercase())
}

fn opt_contains_ci(haystack: Option<&str>, needle: &str) -> bool {
    haystack.is_some_and(|h| contains_ci(h, needle))
}

/// Sorts, then applies offset/limit.
fn window<T>(mut rows: Vec<T>, order: SortOrder, offset: i64, limit: Option<i64>, cmp: impl Fn(&T, &T) -> Ordering) -> Vec<T> {
    rows.sort_by(|a, b| match order {
        SortOrder::Asc => cmp(a, b),
        SortOrder::Desc => cmp(b, a),
    });
    let offset = usize::try_from(offset).unwrap_or(0);
    let iter = rows.into_iter().skip(offset);
    match limit {
        Some(limit) => iter.take(usize::try_from(limit).unwrap_or(0)).collect(),
        None => iter.collect(),
    }
}

/* ============================================================
   Appointments
   ============================================================ */

fn appointment_matches(f: &AppointmentFilter, a: &Appointment) -> bool {
    if f.patient_id.is_some_and(|id| id != a.patient_id) {
        return false;
    }
    if f.doctor_id.is_some_and(|id| id != a.doctor_id) {
        return false;
    }
    if f.treatment_id.is_some_and(|id| id != a.treatment_id) {
        return false;
    }
    if !f.statuses.is_empty() && !f.statuses.contains(&a.status) {
        return false;
    }
    if f.exclude_status == Some(a.status) {
        return false;
    }
    if f.exclude_id == Some(a.appointment_id) {
        return false;
    }
    if f.date_from.is_some_and(|d| a.date < d) {
        return false;
    }
    if f.date_to.is_some_and(|d| a.date > d) {
        return false;
    }
    if let Some((date, time)) = f.starting_from {
        if !(a.date > date || (a.date == date && a.start_time >= time)) {
            return false;
        }
    }
    if let Some(q) = f.search.as_deref() {
        if !opt_contains_ci(a.notes.as_deref(), q) {
            return false;
        }
    }
    true
}

fn compare_appointments(sort: AppointmentSort, a: &Appointment, b: &Appointment) -> Ordering {
    match sort {
        AppointmentSort::Date => a.date.cmp(&b.date).then(a.start_time.cmp(&b.start_time)),
        AppointmentSort::StartTime => a.start_time.cmp(&b.start_time),
        AppointmentSort::Status => (a.status as i16)
            .cmp(&(b.status as i16))
            .then(a.date.cmp(&b.date)),
        AppointmentSort::CreatedAt => a.created_at.cmp(&b.created_at),
    }
}

fn details(t: &Tables, a: &Appointment) -> AppointmentDetails {
    AppointmentDetails {
        appointment: a.clone(),
        patient: t.patients.get(&a.patient_id).map(Patient::brief),
        doctor: t.doctors.get(&a.doctor_id).map(|d| DoctorBrief {
            id: d.doctor_id,
            name: d.name.clone(),
            color: d.color.clone(),
        }),
        treatment: t.treatments.get(&a.treatment_id).map(|tr| TreatmentBrief {
            id: tr.treatment_id,
            name: tr.name.clone(),
            duration_min: tr.duration_min,
            price_cents: tr.price_cents,
        }),
    }
}

#[async_trait]
impl AppointmentStore for MemoryStore {
    async fn list_appointments(
        &self,
        filter: &AppointmentFilter,
        opts: &ListOptions<AppointmentSort>,
    ) -> StoreResult<Vec<AppointmentDetails>> {
        let t = self.tables.read().await;
        let rows: Vec<&Appointment> = t
            .appointments
            .values()
            .filter(|a| appointment_matches(filter, a))
            .collect();
        let rows = window(rows, opts.order, opts.offset, opts.limit, |a, b| {
            compare_appointments(opts.sort, a, b)
        });
        Ok(rows.into_iter().map(|a| details(&t, a)).collect())
    }

    async fn count_appointments(&self, filter: &AppointmentFilter) -> StoreResult<i64> {
        let t = self.tables.read().await;
        Ok(t.appointments.values().filter(|a| appointment_matches(filter, a)).count() as i64)
    }

    async fn get_appointment(&self, id: Uuid) -> StoreResult<Option<AppointmentDetails>> {
        let t = self.tables.read().await;
        Ok(t.appointments.get(&id).map(|a| details(&t, a)))
    }

    async fn insert_appointment(&self, new: &NewAppointment) -> StoreResult<Appointment> {
        let now = Utc::now();
        let appt = Appointment {
            appointment_id: Uuid::new_v4(),
            patient_id: new.patient_id,
            doctor_id: new.doctor_id,
            treatment_id: new.treatment_id,
            date: new.date,
            start_time: new.start_time,
            end_time: new.end_time,
            status: new.status,
            notes: new.notes.clone(),
            created_at: now,
            updated_at: now,
        };
        let mut t = self.tables.write().await;
        t.appointments.insert(appt.appointment_id, appt.clone());
        Ok(appt)
    }

    async fn update_appointment(&self, appt: &Appointment) -> StoreResult<Option<Appointment>> {
        let mut t = self.tables.write().await;
        let Some(row) = t.appointments.get_mut(&appt.appointment_id) else {
            return Ok(None);
        };
        *row = Appointment {
            created_at: row.created_at,
            updated_at: Utc::now(),
            ..appt.clone()
        };
        Ok(Some(row.clone()))
    }

    async fn appointment_counts_by_treatment(&self) -> StoreResult<Vec<(Uuid, i64)>> {
        let t = self.tables.read().await;
        let mut counts: HashMap<Uuid, i64> = HashMap::new();
        for a in t.appointments.values() {
            *counts.entry(a.treatment_id).or_default() += 1;
        }
        Ok(counts.into_iter().collect())
    }
}

/* ============================================================
   Doctors
   ============================================================ */

fn doctor_matches(f: &DoctorFilter, d: &Doctor) -> bool {
    if let Some(q) = f.search.as_deref() {
        if !(contains_ci(&d.name, q) || contains_ci(&d.specialization, q)) {
            return false;
        }
    }
    if f.specialization.as_deref().is_some_and(|s| s != d.specialization) {
        return false;
    }
    true
}

#[async_trait]
impl DoctorStore for MemoryStore {
    async fn list_doctors(
        &self,
        filter: &DoctorFilter,
        opts: &ListOptions<DoctorSort>,
    ) -> StoreResult<Vec<Doctor>> {
        let t = self.tables.read().await;
        let rows: Vec<Doctor> = t.doctors.values().filter(|d| doctor_matches(filter, d)).cloned().collect();
        Ok(window(rows, opts.order, opts.offset, opts.limit, |a, b| match opts.sort {
            DoctorSort::Name => a.name.cmp(&b.name),
            DoctorSort::Specialization => a.specialization.cmp(&b.specialization).then(a.name.cmp(&b.name)),
            DoctorSort::CreatedAt => a.created_at.cmp(&b.created_at),
        }))
    }

    async fn count_doctors(&self, filter: &DoctorFilter) -> StoreResult<i64> {
        let t = self.tables.read().await;
        Ok(t.doctors.values().filter(|d| doctor_matches(filter, d)).count() as i64)
    }

    async fn get_doctor(&self, id: Uuid) -> StoreResult<Option<Doctor>> {
        Ok(self.tables.read().await.doctors.get(&id).cloned())
    }

    async fn insert_doctor(&self, new: &NewDoctor) -> StoreResult<Doctor> {
        let now = Utc::now();
        let doctor = Doctor {
            doctor_id: Uuid::new_v4(),
            name: new.name.clone(),
            specialization: new.specialization.clone(),
            color: new.color.clone(),
            email: new.email.clone(),
            phone: new.phone.clone(),
            created_at: now,
            updated_at: now,
        };
        self.tables.write().await.doctors.insert(doctor.doctor_id, doctor.clone());
        Ok(doctor)
    }

    async fn update_doctor(&self, doctor: &Doctor) -> StoreResult<Option<Doctor>> {
        let mut t = self.tables.write().await;
        let Some(row) = t.doctors.get_mut(&doctor.doctor_id) else {
            return Ok(None);
        };
        *row = Doctor {
            created_at: row.created_at,
            updated_at: Utc::now(),
            ..doctor.clone()
        };
        Ok(Some(row.clone()))
    }

    async fn delete_doctor(&self, id: Uuid) -> StoreResult<bool> {
        Ok(self.tables.write().await.doctors.remove(&id).is_some())
    }
}

/* ============================================================
   Treatments
   ============================================================ */

fn treatment_matches(f: &TreatmentFilter, tr: &Treatment) -> bool {
    if let Some(q) = f.search.as_deref() {
        if !(contains_ci(&tr.name, q)
            || opt_contains_ci(tr.description.as_deref(), q)
            || contains_ci(&tr.category, q))
        {
            return false;
        }
    }
    if f.category.as_deref().is_some_and(|c| c != tr.category) {
        return false;
    }
    if f.min_price_cents.is_some_and(|p| tr.price_cents < p) {
        return false;
    }
    if f.max_price_cents.is_some_and(|p| tr.price_cents > p) {
        return false;
    }
    true
}

#[async_trait]
impl TreatmentStore for MemoryStore {
    async fn list_treatments(
        &self,
        filter: &TreatmentFilter,
        opts: &ListOptions<TreatmentSort>,
    ) -> StoreResult<Vec<Treatment>> {
        let t = self.tables.read().await;
        let rows: Vec<Treatment> = t
            .treatments
            .values()
            .filter(|tr| treatment_matches(filter, tr))
            .cloned()
            .collect();
        Ok(window(rows, opts.order, opts.offset, opts.limit, |a, b| match opts.sort {
            TreatmentSort::Name => a.name.cmp(&b.name),
            TreatmentSort::Price => a.price_cents.cmp(&b.price_cents),
            TreatmentSort::Duration => a.duration_min.cmp(&b.duration_min),
            TreatmentSort::Category => a.category.cmp(&b.category).then(a.name.cmp(&b.name)),
            TreatmentSort::CreatedAt => a.created_at.cmp(&b.created_at),
        }))
    }

    async fn count_treatments(&self, filter: &TreatmentFilter) -> StoreResult<i64> {
        let t = self.tables.read().await;
        Ok(t.treatments.values().filter(|tr| treatment_matches(filter, tr)).count() as i64)
    }

    async fn get_treatment(&self, id: Uuid) -> StoreResult<Option<Treatment>> {
        Ok(self.tables.read().await.treatments.get(&id).cloned())
    }

    async fn insert_treatment(&self, new: &NewTreatment) -> StoreResult<Treatment> {
        let now = Utc::now();
        let treatment = Treatment {
            treatment_id: Uuid::new_v4(),
            name: new.name.clone(),
            duration_min: new.duration_min,
            price_cents: new.price_cents,
            category: new.category.clone(),
            description: new.description.clone(),
            created_at: now,
            updated_at: now,
        };
        self.tables
            .write()
            .await
            .treatments
            .insert(treatment.treatment_id, treatment.clone());
        Ok(treatment)
    }

    async fn update_treatment(&self, treatment: &Treatment) -> StoreResult<Option<Treatment>> {
        let mut t = self.tables.write().await;
        let Some(row) = t.treatments.get_mut(&treatment.treatment_id) else {
            return Ok(None);
        };
        *row = Treatment {
            created_at: row.created_at,
            updated_at: Utc::now(),
            ..treatment.clone()
        };
        Ok(Some(row.clone()))
    }

    async fn delete_treatment(&self, id: Uuid) -> StoreResult<bool> {
        Ok(self.tables.write().await.treatments.remove(&id).is_some())
    }
}

/* ============================================================
   Patients
   ============================================================ */

fn patient_matches(f: &PatientFilter, p: &Patient) -> bool {
    if let Some(q) = f.search.as_deref() {
        if !(contains_ci(&p.first_name, q)
            || contains_ci(&p.last_name, q)
            || opt_contains_ci(p.email.as_deref(), q)
            || opt_contains_ci(p.fiscal_code.as_deref(), q))
        {
            return false;
        }
    }
    if f.city.as_deref().is_some_and(|c| !contains_ci(&p.city, c)) {
        return false;
    }
    if f.is_smoker.is_some_and(|s| s != p.is_smoker) {
        return false;
    }
    if f.has_allergies.is_some_and(|h| h != p.allergies.is_some()) {
        return false;
    }
    if f.created_from.is_some_and(|c| p.created_at < c) {
        return false;
    }
    if let Some(email) = f.email.as_deref() {
        if !p.email.as_deref().is_some_and(|e| e.eq_ignore_ascii_case(email)) {
            return false;
        }
    }
    if let Some(code) = f.fiscal_code.as_deref() {
        if !p.fiscal_code.as_deref().is_some_and(|c| c.eq_ignore_ascii_case(code)) {
            return false;
        }
    }
    if f.exclude_id == Some(p.patient_id) {
        return false;
    }
    true
}

#[async_trait]
impl PatientStore for MemoryStore {
    async fn list_patients(
        &self,
        filter: &PatientFilter,
        opts: &ListOptions<PatientSort>,
    ) -> StoreResult<Vec<Patient>> {
        let t = self.tables.read().await;
        let rows: Vec<Patient> = t.patients.values().filter(|p| patient_matches(filter, p)).cloned().collect();
        Ok(window(rows, opts.order, opts.offset, opts.limit, |a, b| match opts.sort {
            PatientSort::LastName => a.last_name.cmp(&b.last_name).then(a.first_name.cmp(&b.first_name)),
            PatientSort::FirstName => a.first_name.cmp(&b.first_name).then(a.last_name.cmp(&b.last_name)),
            PatientSort::CreatedAt => a.created_at.cmp(&b.created_at),
        }))
    }

    async fn count_patients(&self, filter: &PatientFilter) -> StoreResult<i64> {
        let t = self.tables.read().await;
        Ok(t.patients.values().filter(|p| patient_matches(filter, p)).count() as i64)
    }

    async fn get_patient(&self, id: Uuid) -> StoreResult<Option<Patient>> {
        Ok(self.tables.read().await.patients.get(&id).cloned())
    }

    async fn insert_patient(&self, new: &NewPatient) -> StoreResult<Patient> {
        let now = Utc::now();
        let patient = Patient {
            patient_id: Uuid::new_v4(),
            first_name: new.first_name.clone(),
            last_name: new.last_name.clone(),
            email: new.email.clone(),
            phone: new.phone.clone(),
            date_of_birth: new.date_of_birth,
            fiscal_code: new.fiscal_code.clone(),
            address: new.address.clone(),
            city: new.city.clone(),
            postal_code: new.postal_code.clone(),
            province: new.province.clone(),
            medical_history: new.medical_history.clone(),
            allergies: new.allergies.clone(),
            medications: new.medications.clone(),
            is_smoker: new.is_smoker,
            anamnesis: new.anamnesis.clone(),
            created_at: now,
            updated_at: now,
        };
        self.tables.write().await.patients.insert(patient.patient_id, patient.clone());
        Ok(patient)
    }

    async fn update_patient(&self, patient: &Patient) -> StoreResult<Option<Patient>> {
        let mut t = self.tables.write().await;
        let Some(row) = t.patients.get_mut(&patient.patient_id) else {
            return Ok(None);
        };
        *row = Patient {
            created_at: row.created_at,
            updated_at: Utc::now(),
            ..patient.clone()
        };
        Ok(Some(row.clone()))
    }

    async fn delete_patient(&self, id: Uuid) -> StoreResult<bool> {
        Ok(self.tables.write().await.patients.remove(&id).is_some())
    }
}

/* ============================================================
   Invoices
   ============================================================ */

fn invoice_matches(f: &InvoiceFilter, i: &Invoice) -> bool {
    if f.patient_id.is_some_and(|id| id != i.patient_id) {
        return false;
    }
    if !f.statuses.is_empty() && !f.statuses.contains(&i.status) {
        return false;
    }
    if f.issue_from.is_some_and(|d| i.issue_date < d) || f.issue_to.is_some_and(|d| i.issue_date > d) {
        return false;
    }
    if f.due_from.is_some_and(|d| i.due_date < d) || f.due_to.is_some_and(|d| i.due_date > d) {
        return false;
    }
    if f.total_min_cents.is_some_and(|v| i.total_cents < v) || f.total_max_cents.is_some_and(|v| i.total_cents > v) {
        return false;
    }
    if let Some(q) = f.search.as_deref() {
        if !(contains_ci(&i.invoice_number, q) || contains_ci(&i.description, q)) {
            return false;
        }
    }
    if f.number_prefix.as_deref().is_some_and(|p| !i.invoice_number.starts_with(p)) {
        return false;
    }
    true
}

fn invoice_details(t: &Tables, i: &Invoice) -> InvoiceDetails {
    InvoiceDetails {
        invoice: i.clone(),
        patient: t.patients.get(&i.patient_id).map(Patient::brief),
    }
}

#[async_trait]
impl InvoiceStore for MemoryStore {
    async fn list_invoices(
        &self,
        filter: &InvoiceFilter,
        opts: &ListOptions<InvoiceSort>,
    ) -> StoreResult<Vec<InvoiceDetails>> {
        let t = self.tables.read().await;
        let rows: Vec<&Invoice> = t.invoices.values().filter(|i| invoice_matches(filter, i)).collect();
        let rows = window(rows, opts.order, opts.offset, opts.limit, |a, b| match opts.sort {
            InvoiceSort::IssueDate => a.issue_date.cmp(&b.issue_date),
            InvoiceSort::DueDate => a.due_date.cmp(&b.due_date),
            InvoiceSort::Total => a.total_cents.cmp(&b.total_cents),
            InvoiceSort::InvoiceNumber => a.invoice_number.cmp(&b.invoice_number),
            InvoiceSort::CreatedAt => a.created_at.cmp(&b.created_at),
        });
        Ok(rows.into_iter().map(|i| invoice_details(&t, i)).collect())
    }

    async fn count_invoices(&self, filter: &InvoiceFilter) -> StoreResult<i64> {
        let t = self.tables.read().await;
        Ok(t.invoices.values().filter(|i| invoice_matches(filter, i)).count() as i64)
    }

    async fn get_invoice(&self, id: Uuid) -> StoreResult<Option<InvoiceDetails>> {
        let t = self.tables.read().await;
        Ok(t.invoices.get(&id).map(|i| invoice_details(&t, i)))
    }

    async fn insert_invoice(&self, new: &NewInvoice) -> StoreResult<Invoice> {
        let now = Utc::now();
        let invoice = Invoice {
            invoice_id: Uuid::new_v4(),
            invoice_number: new.invoice_number.clone(),
            issue_date: new.issue_date,
            due_date: new.due_date,
            subtotal_cents: new.subtotal_cents,
            tax_rate: new.tax_rate,
            tax_amount_cents: new.tax_amount_cents,
            total_cents: new.total_cents,
            status: new.status,
            payment_method: new.payment_method.clone(),
            payment_date: new.payment_date,
            patient_id: new.patient_id,
            description: new.description.clone(),
            notes: new.notes.clone(),
            created_at: now,
            updated_at: now,
        };
        self.tables.write().await.invoices.insert(invoice.invoice_id, invoice.clone());
        Ok(invoice)
    }

    async fn update_invoice(&self, invoice: &Invoice) -> StoreResult<Option<Invoice>> {
        let mut t = self.tables.write().await;
        let Some(row) = t.invoices.get_mut(&invoice.invoice_id) else {
            return Ok(None);
        };
        *row = Invoice {
            created_at: row.created_at,
            updated_at: Utc::now(),
            ..invoice.clone()
        };
        Ok(Some(row.clone()))
    }

    async fn delete_invoice(&self, id: Uuid) -> StoreResult<bool> {
        Ok(self.tables.write().await.invoices.remove(&id).is_some())
    }
}

/* ============================================================
   Reminders
   ============================================================ */

fn reminder_matches(f: &ReminderFilter, r: &Reminder) -> bool {
    if f.date.is_some_and(|d| r.date != d) {
        return false;
    }
    if f.date_from.is_some_and(|d| r.date < d) {
        return false;
    }
    if f.before.is_some_and(|d| r.date >= d) {
        return false;
    }
    if f.completed.is_some_and(|c| c != r.completed) {
        return false;
    }
    if let Some(q) = f.search.as_deref() {
        if !(contains_ci(&r.title, q) || contains_ci(&r.text, q)) {
            return false;
        }
    }
    true
}

#[async_trait]
impl ReminderStore for MemoryStore {
    async fn list_reminders(
        &self,
        filter: &ReminderFilter,
        opts: &ListOptions<ReminderSort>,
    ) -> StoreResult<Vec<Reminder>> {
        let t = self.tables.read().await;
        let rows: Vec<Reminder> = t.reminders.values().filter(|r| reminder_matches(filter, r)).cloned().collect();
        Ok(window(rows, opts.order, opts.offset, opts.limit, |a, b| match opts.sort {
            ReminderSort::Date => a.date.cmp(&b.date).then(a.time.cmp(&b.time)),
            ReminderSort::Time => a.time.cmp(&b.time),
            ReminderSort::CreatedAt => a.created_at.cmp(&b.created_at),
        }))
    }

    async fn count_reminders(&self, filter: &ReminderFilter) -> StoreResult<i64> {
        let t = self.tables.read().await;
        Ok(t.reminders.values().filter(|r| reminder_matches(filter, r)).count() as i64)
    }

    async fn get_reminder(&self, id: Uuid) -> StoreResult<Option<Reminder>> {
        Ok(self.tables.read().await.reminders.get(&id).cloned())
    }

    async fn insert_reminder(&self, new: &NewReminder) -> StoreResult<Reminder> {
        let now = Utc::now();
        let reminder = Reminder {
            reminder_id: Uuid::new_v4(),
            date: new.date,
            time: new.time,
            title: new.title.clone(),
            text: new.text.clone(),
            completed: new.completed,
            created_at: now,
            updated_at: now,
        };
        self.tables.write().await.reminders.insert(reminder.reminder_id, reminder.clone());
        Ok(reminder)
    }

    async fn update_reminder(&self, reminder: &Reminder) -> StoreResult<Option<Reminder>> {
        let mut t = self.tables.write().await;
        let Some(row) = t.reminders.get_mut(&reminder.reminder_id) else {
            return Ok(None);
        };
        *row = Reminder {
            created_at: row.created_at,
            updated_at: Utc::now(),
            ..reminder.clone()
        };
        Ok(Some(row.clone()))
    }

    async fn delete_reminder(&self, id: Uuid) -> StoreResult<bool> {
        Ok(self.tables.write().await.reminders.remove(&id).is_some())
    }
}
