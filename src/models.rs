use std::sync::Arc;

use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

use crate::store::Store;

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn Store>,
    /// SHA-256 hex digest of the API bearer token. `None` leaves the API open.
    pub api_token_hash: Option<String>,
    pub default_page_limit: i64,
    pub default_tax_rate: i32,
}

/* -------------------------
   Envelopes + pagination
--------------------------*/

#[derive(Debug, Serialize)]
pub struct ApiOk<T> {
    pub data: T,
}

#[derive(Debug, Serialize)]
pub struct Page<T> {
    pub records: Vec<T>,
    pub pagination: PageInfo,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PageInfo {
    pub total: i64,
    pub page: i64,
    pub limit: i64,
    #[serde(rename = "totalPages")]
    pub total_pages: i64,
}

pub const MAX_PAGE_LIMIT: i64 = 200;

/// A resolved page request: `page` is 1-based.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageRequest {
    pub page: i64,
    pub limit: i64,
}

impl PageRequest {
    pub fn resolve(page: Option<i64>, limit: Option<i64>, default_limit: i64) -> Self {
        let page = page
            .filter(|p| *p >= 1)
            .unwrap_or(1)
            .min(i64::MAX / MAX_PAGE_LIMIT);
        let limit = limit
            .filter(|l| *l >= 1)
            .unwrap_or(default_limit)
            .clamp(1, MAX_PAGE_LIMIT);
        Self { page, limit }
    }

    pub fn offset(&self) -> i64 {
        (self.page - 1) * self.limit
    }
}

impl<T> Page<T> {
    pub fn new(records: Vec<T>, total: i64, req: PageRequest) -> Self {
        let total_pages = if total == 0 {
            0
        } else {
            (total + req.limit - 1) / req.limit
        };
        Page {
            records,
            pagination: PageInfo {
                total,
                page: req.page,
                limit: req.limit,
                total_pages,
            },
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    Asc,
    #[default]
    Desc,
}

/* -------------------------
   Time-of-day wire format
--------------------------*/

/// `HH:MM` on the wire; `HH:MM:SS` is accepted on input.
pub mod hhmm {
    use chrono::NaiveTime;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn parse(s: &str) -> Option<NaiveTime> {
        let s = s.trim();
        NaiveTime::parse_from_str(s, "%H:%M")
            .or_else(|_| NaiveTime::parse_from_str(s, "%H:%M:%S"))
            .ok()
    }

    pub fn format(t: &NaiveTime) -> String {
        t.format("%H:%M").to_string()
    }

    pub fn serialize<S: Serializer>(t: &NaiveTime, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&format(t))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<NaiveTime, D::Error> {
        let raw = String::deserialize(d)?;
        parse(&raw).ok_or_else(|| serde::de::Error::custom(format!("invalid time `{raw}`, expected HH:MM")))
    }

    /// Input-only variant for optional fields.
    pub mod option {
        use chrono::NaiveTime;
        use serde::{Deserialize, Deserializer};

        pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<NaiveTime>, D::Error> {
            let raw = Option::<String>::deserialize(d)?;
            match raw {
                None => Ok(None),
                Some(raw) => super::parse(&raw)
                    .map(Some)
                    .ok_or_else(|| serde::de::Error::custom(format!("invalid time `{raw}`, expected HH:MM"))),
            }
        }
    }
}

/// Distinguishes an absent field from an explicit `null` in PATCH bodies.
pub fn deserialize_double_option<'de, D, T>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
where
    D: serde::Deserializer<'de>,
    T: Deserialize<'de>,
{
    let inner = Option::<T>::deserialize(deserializer)?;
    Ok(Some(inner))
}

/* -------------------------
   Appointments
--------------------------*/

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[repr(i16)]
#[serde(rename_all = "lowercase")]
pub enum AppointmentStatus {
    Pending = 0,
    Confirmed = 1,
    Cancelled = 2,
    Completed = 3,
}

impl AppointmentStatus {
    pub const ALL: [AppointmentStatus; 4] = [
        AppointmentStatus::Pending,
        AppointmentStatus::Confirmed,
        AppointmentStatus::Cancelled,
        AppointmentStatus::Completed,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            AppointmentStatus::Pending => "pending",
            AppointmentStatus::Confirmed => "confirmed",
            AppointmentStatus::Cancelled => "cancelled",
            AppointmentStatus::Completed => "completed",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, FromRow)]
pub struct Appointment {
    pub appointment_id: Uuid,
    pub patient_id: Uuid,
    pub doctor_id: Uuid,
    pub treatment_id: Uuid,
    pub date: NaiveDate,
    #[serde(with = "hhmm")]
    pub start_time: NaiveTime,
    #[serde(with = "hhmm")]
    pub end_time: NaiveTime,
    pub status: AppointmentStatus,
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PersonBrief {
    pub id: Uuid,
    pub display: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DoctorBrief {
    pub id: Uuid,
    pub name: String,
    pub color: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TreatmentBrief {
    pub id: Uuid,
    pub name: String,
    pub duration_min: i32,
    pub price_cents: i64,
}

/// An appointment with the rows it references embedded for display.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AppointmentDetails {
    #[serde(flatten)]
    pub appointment: Appointment,
    pub patient: Option<PersonBrief>,
    pub doctor: Option<DoctorBrief>,
    pub treatment: Option<TreatmentBrief>,
}

#[derive(Debug, Clone)]
pub struct NewAppointment {
    pub patient_id: Uuid,
    pub doctor_id: Uuid,
    pub treatment_id: Uuid,
    pub date: NaiveDate,
    pub start_time: NaiveTime,
    pub end_time: NaiveTime,
    pub status: AppointmentStatus,
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct AppointmentFilter {
    pub patient_id: Option<Uuid>,
    pub doctor_id: Option<Uuid>,
    pub treatment_id: Option<Uuid>,
    /// Empty means any status.
    pub statuses: Vec<AppointmentStatus>,
    pub exclude_status: Option<AppointmentStatus>,
    pub exclude_id: Option<Uuid>,
    pub date_from: Option<NaiveDate>,
    pub date_to: Option<NaiveDate>,
    /// Appointments on a later day, or on that day starting at or after the time.
    pub starting_from: Option<(NaiveDate, NaiveTime)>,
    pub search: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AppointmentSort {
    #[default]
    Date,
    StartTime,
    Status,
    CreatedAt,
}

/* -------------------------
   Doctors
--------------------------*/

#[derive(Debug, Clone, PartialEq, Serialize, FromRow)]
pub struct Doctor {
    pub doctor_id: Uuid,
    pub name: String,
    pub specialization: String,
    pub color: String,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewDoctor {
    pub name: String,
    pub specialization: String,
    pub color: String,
    pub email: Option<String>,
    pub phone: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct DoctorFilter {
    pub search: Option<String>,
    pub specialization: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DoctorSort {
    #[default]
    Name,
    Specialization,
    CreatedAt,
}

/* -------------------------
   Treatments
--------------------------*/

#[derive(Debug, Clone, PartialEq, Serialize, FromRow)]
pub struct Treatment {
    pub treatment_id: Uuid,
    pub name: String,
    pub duration_min: i32,
    pub price_cents: i64,
    pub category: String,
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewTreatment {
    pub name: String,
    pub duration_min: i32,
    pub price_cents: i64,
    pub category: String,
    pub description: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct TreatmentFilter {
    pub search: Option<String>,
    pub category: Option<String>,
    pub min_price_cents: Option<i64>,
    pub max_price_cents: Option<i64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TreatmentSort {
    #[default]
    Name,
    Price,
    Duration,
    Category,
    CreatedAt,
}

/* -------------------------
   Patients
--------------------------*/

#[derive(Debug, Clone, PartialEq, Serialize, FromRow)]
pub struct Patient {
    pub patient_id: Uuid,
    pub first_name: String,
    pub last_name: String,
    pub email: Option<String>,
    pub phone: String,
    pub date_of_birth: Option<NaiveDate>,
    pub fiscal_code: Option<String>,
    pub address: String,
    pub city: String,
    pub postal_code: String,
    pub province: String,
    pub medical_history: String,
    pub allergies: Option<String>,
    pub medications: Option<String>,
    pub is_smoker: bool,
    pub anamnesis: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Patient {
    pub fn brief(&self) -> PersonBrief {
        PersonBrief {
            id: self.patient_id,
            display: format!("{} {}", self.first_name, self.last_name),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct NewPatient {
    pub first_name: String,
    pub last_name: String,
    pub email: Option<String>,
    pub phone: String,
    pub date_of_birth: Option<NaiveDate>,
    pub fiscal_code: Option<String>,
    pub address: String,
    pub city: String,
    pub postal_code: String,
    pub province: String,
    pub medical_history: String,
    pub allergies: Option<String>,
    pub medications: Option<String>,
    pub is_smoker: bool,
    pub anamnesis: String,
}

#[derive(Debug, Clone, Default)]
pub struct PatientFilter {
    pub search: Option<String>,
    pub city: Option<String>,
    pub is_smoker: Option<bool>,
    pub has_allergies: Option<bool>,
    pub created_from: Option<DateTime<Utc>>,
    /// Exact, case-insensitive match; used for uniqueness checks.
    pub email: Option<String>,
    pub fiscal_code: Option<String>,
    pub exclude_id: Option<Uuid>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PatientSort {
    #[default]
    LastName,
    FirstName,
    CreatedAt,
}

/* -------------------------
   Invoices
--------------------------*/

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[repr(i16)]
#[serde(rename_all = "lowercase")]
pub enum InvoiceStatus {
    Draft = 0,
    Sent = 1,
    Paid = 2,
    Overdue = 3,
}

#[derive(Debug, Clone, PartialEq, Serialize, FromRow)]
pub struct Invoice {
    pub invoice_id: Uuid,
    pub invoice_number: String,
    pub issue_date: NaiveDate,
    pub due_date: NaiveDate,
    pub subtotal_cents: i64,
    /// Percent, e.g. 22.
    pub tax_rate: i32,
    pub tax_amount_cents: i64,
    pub total_cents: i64,
    pub status: InvoiceStatus,
    pub payment_method: Option<String>,
    pub payment_date: Option<NaiveDate>,
    pub patient_id: Uuid,
    pub description: String,
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InvoiceDetails {
    #[serde(flatten)]
    pub invoice: Invoice,
    pub patient: Option<PersonBrief>,
}

#[derive(Debug, Clone)]
pub struct NewInvoice {
    pub invoice_number: String,
    pub issue_date: NaiveDate,
    pub due_date: NaiveDate,
    pub subtotal_cents: i64,
    pub tax_rate: i32,
    pub tax_amount_cents: i64,
    pub total_cents: i64,
    pub status: InvoiceStatus,
    pub payment_method: Option<String>,
    pub payment_date: Option<NaiveDate>,
    pub patient_id: Uuid,
    pub description: String,
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct InvoiceFilter {
    pub patient_id: Option<Uuid>,
    /// Empty means any status.
    pub statuses: Vec<InvoiceStatus>,
    pub issue_from: Option<NaiveDate>,
    pub issue_to: Option<NaiveDate>,
    pub due_from: Option<NaiveDate>,
    pub due_to: Option<NaiveDate>,
    pub total_min_cents: Option<i64>,
    pub total_max_cents: Option<i64>,
    pub search: Option<String>,
    pub number_prefix: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvoiceSort {
    #[default]
    IssueDate,
    DueDate,
    Total,
    InvoiceNumber,
    CreatedAt,
}

/* -------------------------
   Reminders
--------------------------*/

#[derive(Debug, Clone, PartialEq, Serialize, FromRow)]
pub struct Reminder {
    pub reminder_id: Uuid,
    pub date: NaiveDate,
    #[serde(with = "hhmm")]
    pub time: NaiveTime,
    pub title: String,
    pub text: String,
    pub completed: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewReminder {
    pub date: NaiveDate,
    pub time: NaiveTime,
    pub title: String,
    pub text: String,
    pub completed: bool,
}

#[derive(Debug, Clone, Default)]
pub struct ReminderFilter {
    pub date: Option<NaiveDate>,
    pub date_from: Option<NaiveDate>,
    pub before: Option<NaiveDate>,
    pub completed: Option<bool>,
    pub search: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReminderSort {
    #[default]
    Date,
    Time,
    CreatedAt,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn page_request_clamps_and_defaults() {
        assert_eq!(PageRequest::resolve(None, None, 50), PageRequest { page: 1, limit: 50 });
        assert_eq!(PageRequest::resolve(Some(0), Some(-3), 20), PageRequest { page: 1, limit: 20 });
        assert_eq!(PageRequest::resolve(Some(3), Some(10_000), 50).limit, MAX_PAGE_LIMIT);
        assert_eq!(PageRequest::resolve(Some(3), Some(25), 50).offset(), 50);

        let far = PageRequest::resolve(Some(i64::MAX), Some(MAX_PAGE_LIMIT), 50);
        assert!(far.offset() > 0);
    }

    #[test]
    fn total_pages_rounds_up() {
        let req = PageRequest { page: 1, limit: 10 };
        assert_eq!(Page::<()>::new(vec![], 0, req).pagination.total_pages, 0);
        assert_eq!(Page::<()>::new(vec![], 10, req).pagination.total_pages, 1);
        assert_eq!(Page::<()>::new(vec![], 11, req).pagination.total_pages, 2);
    }

    #[test]
    fn pagination_uses_camel_case_total_pages() {
        let page = Page::new(vec![1, 2], 2, PageRequest { page: 1, limit: 50 });
        let json = serde_json::to_value(&page).unwrap();
        assert_eq!(json["pagination"]["totalPages"], 1);
        assert_eq!(json["records"].as_array().unwrap().len(), 2);
    }

    #[test]
    fn times_are_zero_padded_hh_mm() {
        let t = hhmm::parse("09:05").unwrap();
        assert_eq!(hhmm::format(&t), "09:05");
        assert_eq!(hhmm::parse("14:30:00"), NaiveTime::from_hms_opt(14, 30, 0));
        assert!(hhmm::parse("25:00").is_none());
    }
}
