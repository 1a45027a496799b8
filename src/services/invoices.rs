use chrono::{Datelike, Duration, NaiveDate};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{clean_opt, require_text};
use crate::error::ApiError;
use crate::models::{
    deserialize_double_option, InvoiceDetails, InvoiceFilter, InvoiceSort, InvoiceStatus,
    NewInvoice, Page, PageRequest, SortOrder,
};
use crate::store::{ListOptions, Store};

pub const DEFAULT_DUE_WINDOW_DAYS: i64 = 7;

#[derive(Debug, Clone, Deserialize)]
pub struct CreateInvoice {
    pub patient_id: Uuid,
    /// Generated as the next number of the issue year when omitted.
    pub invoice_number: Option<String>,
    pub issue_date: NaiveDate,
    pub due_date: NaiveDate,
    pub subtotal_cents: i64,
    pub tax_rate: Option<i32>,
    pub status: Option<InvoiceStatus>,
    pub payment_method: Option<String>,
    pub payment_date: Option<NaiveDate>,
    pub description: String,
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct UpdateInvoice {
    pub patient_id: Option<Uuid>,
    pub invoice_number: Option<String>,
    pub issue_date: Option<NaiveDate>,
    pub due_date: Option<NaiveDate>,
    pub subtotal_cents: Option<i64>,
    pub tax_rate: Option<i32>,
    pub status: Option<InvoiceStatus>,
    #[serde(default, deserialize_with = "deserialize_double_option")]
    pub payment_method: Option<Option<String>>,
    #[serde(default, deserialize_with = "deserialize_double_option")]
    pub payment_date: Option<Option<NaiveDate>>,
    pub description: Option<String>,
    #[serde(default, deserialize_with = "deserialize_double_option")]
    pub notes: Option<Option<String>>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MarkPaid {
    pub payment_method: String,
    /// Defaults to today.
    pub payment_date: Option<NaiveDate>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct InvoiceTotals {
    pub subtotal_cents: i64,
    pub tax_rate: i32,
    pub tax_amount_cents: i64,
    pub total_cents: i64,
}

#[derive(Debug, PartialEq, Serialize)]
pub struct InvoiceStats {
    pub year: i32,
    pub total_invoices: i64,
    pub paid_invoices: i64,
    pub overdue_invoices: i64,
    pub paid_revenue_cents: i64,
    pub outstanding_cents: i64,
    /// Percentage of the year's invoices that are paid.
    pub payment_rate: f64,
}

#[derive(Debug, PartialEq, Serialize)]
pub struct MonthlyRevenue {
    pub month: u32,
    pub revenue_cents: i64,
    pub invoice_count: i64,
}

/// `tax = subtotal * rate / 100` rounded half up to the cent.
pub fn calculate_totals(subtotal_cents: i64, tax_rate: i32) -> Result<InvoiceTotals, ApiError> {
    if subtotal_cents < 0 {
        return Err(ApiError::validation("subtotal_cents must not be negative"));
    }
    if !(0..=100).contains(&tax_rate) {
        return Err(ApiError::validation("tax_rate must be a percentage between 0 and 100"));
    }
    let too_large = || ApiError::validation("subtotal_cents is too large");
    let tax_amount_cents = subtotal_cents
        .checked_mul(i64::from(tax_rate))
        .and_then(|v| v.checked_add(50))
        .ok_or_else(too_large)?
        / 100;
    let total_cents = subtotal_cents
        .checked_add(tax_amount_cents)
        .ok_or_else(too_large)?;
    Ok(InvoiceTotals {
        subtotal_cents,
        tax_rate,
        tax_amount_cents,
        total_cents,
    })
}

fn number_prefix(year: i32) -> String {
    format!("INV-{year}-")
}

/// Sequence part of `INV-YYYY-NNN` for the given year.
fn sequence_of(number: &str, year: i32) -> Option<u32> {
    number.strip_prefix(&number_prefix(year))?.parse().ok()
}

pub fn format_number(year: i32, sequence: u32) -> String {
    format!("{}{sequence:03}", number_prefix(year))
}

/// Highest sequence used in `year`, plus one.
pub async fn next_number(store: &dyn Store, year: i32) -> Result<String, ApiError> {
    let filter = InvoiceFilter {
        number_prefix: Some(number_prefix(year)),
        ..Default::default()
    };
    let existing = store
        .list_invoices(&filter, &ListOptions::all(InvoiceSort::InvoiceNumber, SortOrder::Desc))
        .await?;
    let last = existing
        .iter()
        .filter_map(|d| sequence_of(&d.invoice.invoice_number, year))
        .max()
        .unwrap_or(0);
    let next = last
        .checked_add(1)
        .ok_or_else(|| ApiError::validation(format!("invoice numbers for {year} are exhausted")))?;
    Ok(format_number(year, next))
}

async fn ensure_number_free(store: &dyn Store, number: &str, exclude: Option<Uuid>) -> Result<(), ApiError> {
    let filter = InvoiceFilter {
        number_prefix: Some(number.to_string()),
        ..Default::default()
    };
    let taken = store
        .list_invoices(&filter, &ListOptions::all(InvoiceSort::InvoiceNumber, SortOrder::Asc))
        .await?
        .iter()
        .any(|d| d.invoice.invoice_number == number && Some(d.invoice.invoice_id) != exclude);
    if taken {
        return Err(ApiError::Conflict(
            "INVOICE_NUMBER_TAKEN",
            format!("invoice number {number} is already in use"),
        ));
    }
    Ok(())
}

async fn require_patient(store: &dyn Store, id: Uuid) -> Result<(), ApiError> {
    match store.get_patient(id).await? {
        Some(_) => Ok(()),
        None => Err(ApiError::BadRequest("INVALID_REFERENCE", "patient not found".into())),
    }
}

fn check_dates(issue: NaiveDate, due: NaiveDate) -> Result<(), ApiError> {
    if due < issue {
        return Err(ApiError::validation("due_date must not be before issue_date"));
    }
    Ok(())
}

pub async fn list(
    store: &dyn Store,
    filter: &InvoiceFilter,
    sort: InvoiceSort,
    order: SortOrder,
    page: PageRequest,
) -> Result<Page<InvoiceDetails>, ApiError> {
    let total = store.count_invoices(filter).await?;
    let opts = ListOptions {
        sort,
        order,
        limit: Some(page.limit),
        offset: page.offset(),
    };
    let records = store.list_invoices(filter, &opts).await?;
    Ok(Page::new(records, total, page))
}

pub async fn get(store: &dyn Store, id: Uuid) -> Result<InvoiceDetails, ApiError> {
    store.get_invoice(id).await?.ok_or_else(|| ApiError::not_found("invoice"))
}

pub async fn by_patient(store: &dyn Store, patient_id: Uuid) -> Result<Vec<InvoiceDetails>, ApiError> {
    let filter = InvoiceFilter {
        patient_id: Some(patient_id),
        ..Default::default()
    };
    Ok(store
        .list_invoices(&filter, &ListOptions::all(InvoiceSort::IssueDate, SortOrder::Desc))
        .await?)
}

pub async fn create(store: &dyn Store, req: CreateInvoice, default_tax_rate: i32) -> Result<InvoiceDetails, ApiError> {
    require_patient(store, req.patient_id).await?;
    check_dates(req.issue_date, req.due_date)?;
    let totals = calculate_totals(req.subtotal_cents, req.tax_rate.unwrap_or(default_tax_rate))?;
    let description = require_text("description", &req.description)?;

    let invoice_number = match clean_opt(req.invoice_number) {
        Some(number) => {
            ensure_number_free(store, &number, None).await?;
            number
        }
        None => next_number(store, req.issue_date.year()).await?,
    };

    let created = store
        .insert_invoice(&NewInvoice {
            invoice_number,
            issue_date: req.issue_date,
            due_date: req.due_date,
            subtotal_cents: totals.subtotal_cents,
            tax_rate: totals.tax_rate,
            tax_amount_cents: totals.tax_amount_cents,
            total_cents: totals.total_cents,
            status: req.status.unwrap_or(InvoiceStatus::Draft),
            payment_method: clean_opt(req.payment_method),
            payment_date: req.payment_date,
            patient_id: req.patient_id,
            description,
            notes: clean_opt(req.notes),
        })
        .await?;
    tracing::info!(
        invoice_id = %created.invoice_id,
        number = %created.invoice_number,
        total_cents = created.total_cents,
        "invoice issued"
    );
    get(store, created.invoice_id).await
}

pub async fn update(store: &dyn Store, id: Uuid, req: UpdateInvoice) -> Result<InvoiceDetails, ApiError> {
    let mut inv = get(store, id).await?.invoice;

    if let Some(patient_id) = req.patient_id {
        if patient_id != inv.patient_id {
            require_patient(store, patient_id).await?;
        }
        inv.patient_id = patient_id;
    }
    if let Some(number) = req.invoice_number {
        let number = require_text("invoice_number", &number)?;
        if number != inv.invoice_number {
            ensure_number_free(store, &number, Some(id)).await?;
        }
        inv.invoice_number = number;
    }
    if let Some(d) = req.issue_date {
        inv.issue_date = d;
    }
    if let Some(d) = req.due_date {
        inv.due_date = d;
    }
    if let Some(status) = req.status {
        inv.status = status;
    }
    if let Some(m) = req.payment_method {
        inv.payment_method = clean_opt(m);
    }
    if let Some(d) = req.payment_date {
        inv.payment_date = d;
    }
    if let Some(description) = req.description {
        inv.description = require_text("description", &description)?;
    }
    if let Some(notes) = req.notes {
        inv.notes = clean_opt(notes);
    }
    check_dates(inv.issue_date, inv.due_date)?;

    let totals = calculate_totals(
        req.subtotal_cents.unwrap_or(inv.subtotal_cents),
        req.tax_rate.unwrap_or(inv.tax_rate),
    )?;
    inv.subtotal_cents = totals.subtotal_cents;
    inv.tax_rate = totals.tax_rate;
    inv.tax_amount_cents = totals.tax_amount_cents;
    inv.total_cents = totals.total_cents;

    store
        .update_invoice(&inv)
        .await?
        .ok_or_else(|| ApiError::not_found("invoice"))?;
    tracing::info!(invoice_id = %id, "invoice updated");
    get(store, id).await
}

pub async fn delete(store: &dyn Store, id: Uuid) -> Result<(), ApiError> {
    if !store.delete_invoice(id).await? {
        return Err(ApiError::not_found("invoice"));
    }
    tracing::info!(invoice_id = %id, "invoice deleted");
    Ok(())
}

pub async fn mark_paid(store: &dyn Store, id: Uuid, req: MarkPaid, today: NaiveDate) -> Result<InvoiceDetails, ApiError> {
    let mut inv = get(store, id).await?.invoice;
    inv.status = InvoiceStatus::Paid;
    inv.payment_method = Some(require_text("payment_method", &req.payment_method)?);
    inv.payment_date = Some(req.payment_date.unwrap_or(today));

    store
        .update_invoice(&inv)
        .await?
        .ok_or_else(|| ApiError::not_found("invoice"))?;
    tracing::info!(invoice_id = %id, number = %inv.invoice_number, "invoice paid");
    get(store, id).await
}

fn year_range(year: i32) -> Result<(NaiveDate, NaiveDate), ApiError> {
    let first = NaiveDate::from_ymd_opt(year, 1, 1);
    let last = NaiveDate::from_ymd_opt(year, 12, 31);
    first
        .zip(last)
        .ok_or_else(|| ApiError::validation(format!("invalid year {year}")))
}

async fn issued_in(store: &dyn Store, year: i32, statuses: Vec<InvoiceStatus>) -> Result<Vec<InvoiceDetails>, ApiError> {
    let (from, to) = year_range(year)?;
    let filter = InvoiceFilter {
        statuses,
        issue_from: Some(from),
        issue_to: Some(to),
        ..Default::default()
    };
    Ok(store
        .list_invoices(&filter, &ListOptions::all(InvoiceSort::IssueDate, SortOrder::Asc))
        .await?)
}

/// Overdue counts sent or overdue invoices past their due date, regardless of year.
pub async fn stats(store: &dyn Store, year: i32, today: NaiveDate) -> Result<InvoiceStats, ApiError> {
    let invoices = issued_in(store, year, Vec::new()).await?;

    let total_invoices = invoices.len() as i64;
    let paid: Vec<_> = invoices
        .iter()
        .filter(|d| d.invoice.status == InvoiceStatus::Paid)
        .collect();
    let paid_invoices = paid.len() as i64;
    let paid_revenue_cents = paid.iter().map(|d| d.invoice.total_cents).sum();
    let outstanding_cents = invoices
        .iter()
        .filter(|d| matches!(d.invoice.status, InvoiceStatus::Draft | InvoiceStatus::Sent))
        .map(|d| d.invoice.total_cents)
        .sum();

    let overdue_invoices = store
        .count_invoices(&InvoiceFilter {
            statuses: vec![InvoiceStatus::Sent, InvoiceStatus::Overdue],
            due_to: Some(today - Duration::days(1)),
            ..Default::default()
        })
        .await?;

    let payment_rate = if total_invoices > 0 {
        paid_invoices as f64 * 100.0 / total_invoices as f64
    } else {
        0.0
    };

    Ok(InvoiceStats {
        year,
        total_invoices,
        paid_invoices,
        overdue_invoices,
        paid_revenue_cents,
        outstanding_cents,
        payment_rate,
    })
}

/// Sent invoices due between today and `today + days`, soonest first.
pub async fn upcoming_due(store: &dyn Store, today: NaiveDate, days: i64) -> Result<Vec<InvoiceDetails>, ApiError> {
    if days < 0 {
        return Err(ApiError::validation("days must not be negative"));
    }
    let filter = InvoiceFilter {
        statuses: vec![InvoiceStatus::Sent],
        due_from: Some(today),
        due_to: Some(today + Duration::days(days)),
        ..Default::default()
    };
    Ok(store
        .list_invoices(&filter, &ListOptions::all(InvoiceSort::DueDate, SortOrder::Asc))
        .await?)
}

/// Twelve buckets of paid totals keyed by issue month.
pub async fn monthly_revenue(store: &dyn Store, year: i32) -> Result<Vec<MonthlyRevenue>, ApiError> {
    let mut months: Vec<MonthlyRevenue> = (1..=12)
        .map(|month| MonthlyRevenue {
            month,
            revenue_cents: 0,
            invoice_count: 0,
        })
        .collect();
    for d in issued_in(store, year, vec![InvoiceStatus::Paid]).await? {
        let bucket = &mut months[d.invoice.issue_date.month0() as usize];
        bucket.revenue_cents += d.invoice.total_cents;
        bucket.invoice_count += 1;
    }
    Ok(months)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::fixtures::{self, date};
    use crate::store::memory::MemoryStore;

    fn invoice(patient_id: Uuid, issue: NaiveDate, subtotal_cents: i64) -> CreateInvoice {
        CreateInvoice {
            patient_id,
            invoice_number: None,
            issue_date: issue,
            due_date: issue + Duration::days(30),
            subtotal_cents,
            tax_rate: None,
            status: None,
            payment_method: None,
            payment_date: None,
            description: "Treatment".into(),
            notes: None,
        }
    }

    #[test]
    fn totals_round_tax_to_the_cent() {
        let t = calculate_totals(10000, 22).unwrap();
        assert_eq!(t.tax_amount_cents, 2200);
        assert_eq!(t.total_cents, 12200);

        // 12345 * 22 / 100 = 2715.9
        assert_eq!(calculate_totals(12345, 22).unwrap().tax_amount_cents, 2716);
        // 5 * 10 / 100 = 0.5 rounds up
        assert_eq!(calculate_totals(5, 10).unwrap().tax_amount_cents, 1);
        assert_eq!(calculate_totals(0, 22).unwrap().total_cents, 0);

        assert!(calculate_totals(-1, 22).is_err());
        assert!(calculate_totals(100, 101).is_err());
    }

    #[test]
    fn oversized_subtotal_is_rejected() {
        let err = calculate_totals(i64::MAX, 22).unwrap_err();
        assert_eq!(err.code(), "VALIDATION_ERROR");
        assert!(calculate_totals(i64::MAX - 10, 0).is_ok());
        // tax fits but the total does not
        assert!(calculate_totals(i64::MAX - 50, 1).is_err());
    }

    #[test]
    fn numbers_are_zero_padded_and_parsed_per_year() {
        assert_eq!(format_number(2024, 7), "INV-2024-007");
        assert_eq!(format_number(2024, 1234), "INV-2024-1234");
        assert_eq!(sequence_of("INV-2024-042", 2024), Some(42));
        assert_eq!(sequence_of("INV-2023-042", 2024), None);
        assert_eq!(sequence_of("INV-2024-abc", 2024), None);
    }

    #[tokio::test]
    async fn next_number_uses_numeric_maximum_of_the_year() {
        let store = MemoryStore::new();
        let p = fixtures::patient(&store, "Ugo", "Longo").await.patient_id;
        assert_eq!(next_number(&store, 2024).await.unwrap(), "INV-2024-001");

        for n in ["INV-2024-009", "INV-2024-1000", "INV-2023-500"] {
            let mut req = invoice(p, date(2024, 3, 1), 1000);
            req.invoice_number = Some(n.into());
            create(&store, req, 22).await.unwrap();
        }
        assert_eq!(next_number(&store, 2024).await.unwrap(), "INV-2024-1001");
        assert_eq!(next_number(&store, 2023).await.unwrap(), "INV-2023-501");
        assert_eq!(next_number(&store, 2025).await.unwrap(), "INV-2025-001");
    }

    #[tokio::test]
    async fn next_number_fails_cleanly_when_sequence_is_exhausted() {
        let store = MemoryStore::new();
        let p = fixtures::patient(&store, "Ugo", "Longo").await.patient_id;
        let mut req = invoice(p, date(2024, 3, 1), 1000);
        req.invoice_number = Some(format!("INV-2024-{}", u32::MAX));
        create(&store, req, 22).await.unwrap();

        let err = next_number(&store, 2024).await.unwrap_err();
        assert_eq!(err.code(), "VALIDATION_ERROR");
    }

    #[tokio::test]
    async fn create_generates_number_and_applies_default_tax() {
        let store = MemoryStore::new();
        let p = fixtures::patient(&store, "Ugo", "Longo").await.patient_id;

        let first = create(&store, invoice(p, date(2024, 3, 1), 10000), 22).await.unwrap();
        assert_eq!(first.invoice.invoice_number, "INV-2024-001");
        assert_eq!(first.invoice.tax_rate, 22);
        assert_eq!(first.invoice.total_cents, 12200);
        assert_eq!(first.invoice.status, InvoiceStatus::Draft);
        assert_eq!(first.patient.unwrap().display, "Ugo Longo");

        let second = create(&store, invoice(p, date(2024, 4, 1), 5000), 22).await.unwrap();
        assert_eq!(second.invoice.invoice_number, "INV-2024-002");

        let mut dup = invoice(p, date(2024, 4, 1), 5000);
        dup.invoice_number = Some("INV-2024-001".into());
        assert_eq!(create(&store, dup, 22).await.unwrap_err().code(), "INVOICE_NUMBER_TAKEN");

        let mut backwards = invoice(p, date(2024, 4, 1), 5000);
        backwards.due_date = date(2024, 3, 1);
        assert_eq!(create(&store, backwards, 22).await.unwrap_err().code(), "VALIDATION_ERROR");
    }

    #[tokio::test]
    async fn update_recomputes_totals() {
        let store = MemoryStore::new();
        let p = fixtures::patient(&store, "Ugo", "Longo").await.patient_id;
        let inv = create(&store, invoice(p, date(2024, 3, 1), 10000), 22).await.unwrap();

        let updated = update(
            &store,
            inv.invoice.invoice_id,
            UpdateInvoice {
                tax_rate: Some(10),
                ..Default::default()
            },
        )
        .await
        .unwrap();
        assert_eq!(updated.invoice.tax_amount_cents, 1000);
        assert_eq!(updated.invoice.total_cents, 11000);
        assert_eq!(updated.invoice.invoice_number, "INV-2024-001");
    }

    #[tokio::test]
    async fn mark_paid_defaults_payment_date_and_feeds_stats() {
        let store = MemoryStore::new();
        let p = fixtures::patient(&store, "Ugo", "Longo").await.patient_id;
        let today = date(2024, 6, 15);

        let a = create(&store, invoice(p, date(2024, 1, 10), 10000), 22).await.unwrap();
        let mut sent = invoice(p, date(2024, 5, 1), 20000);
        sent.status = Some(InvoiceStatus::Sent);
        sent.due_date = date(2024, 6, 1);
        create(&store, sent, 22).await.unwrap();
        let mut soon = invoice(p, date(2024, 6, 10), 1000);
        soon.status = Some(InvoiceStatus::Sent);
        soon.due_date = date(2024, 6, 20);
        let soon = create(&store, soon, 22).await.unwrap();

        let err = mark_paid(
            &store,
            a.invoice.invoice_id,
            MarkPaid {
                payment_method: " ".into(),
                payment_date: None,
            },
            today,
        )
        .await
        .unwrap_err();
        assert_eq!(err.code(), "VALIDATION_ERROR");

        let paid = mark_paid(
            &store,
            a.invoice.invoice_id,
            MarkPaid {
                payment_method: "card".into(),
                payment_date: None,
            },
            today,
        )
        .await
        .unwrap();
        assert_eq!(paid.invoice.status, InvoiceStatus::Paid);
        assert_eq!(paid.invoice.payment_date, Some(today));

        let s = stats(&store, 2024, today).await.unwrap();
        assert_eq!(s.total_invoices, 3);
        assert_eq!(s.paid_invoices, 1);
        assert_eq!(s.paid_revenue_cents, 12200);
        assert_eq!(s.outstanding_cents, 24400 + 1220);
        assert_eq!(s.overdue_invoices, 1);

        let due = upcoming_due(&store, today, DEFAULT_DUE_WINDOW_DAYS).await.unwrap();
        assert_eq!(due.len(), 1);
        assert_eq!(due[0].invoice.invoice_id, soon.invoice.invoice_id);

        let months = monthly_revenue(&store, 2024).await.unwrap();
        assert_eq!(months.len(), 12);
        assert_eq!(months[0].revenue_cents, 12200);
        assert_eq!(months[0].invoice_count, 1);
        assert_eq!(months[4].invoice_count, 0);
    }
}
