// src/routes/invoice_routes.rs

use axum::{
    extract::{Path, Query, State},
    routing::{get, post},
    Json, Router,
};
use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::clinic_now;
use crate::{
    error::ApiError,
    middleware::auth_context::AuthContext,
    models::{
        ApiOk, AppState, InvoiceDetails, InvoiceFilter, InvoiceSort, InvoiceStatus, Page,
        PageRequest, SortOrder,
    },
    services::invoices::{
        self, CreateInvoice, InvoiceStats, InvoiceTotals, MarkPaid, MonthlyRevenue, UpdateInvoice,
    },
};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/invoices", get(list_invoices).post(create_invoice))
        .route("/invoices/stats", get(invoice_stats))
        .route("/invoices/upcoming_due", get(upcoming_due))
        .route("/invoices/monthly_revenue", get(monthly_revenue))
        .route("/invoices/next_number", get(next_number))
        .route("/invoices/calculate", get(calculate))
        .route(
            "/invoices/{invoice_id}",
            get(get_invoice).patch(update_invoice).delete(delete_invoice),
        )
        .route("/invoices/{invoice_id}/pay", post(mark_paid))
        .route("/patients/{patient_id}/invoices", get(patient_invoices))
}

/* ============================================================
   Query params
   ============================================================ */

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    pub page: Option<i64>,
    pub limit: Option<i64>,
    pub patient_id: Option<Uuid>,
    pub status: Option<InvoiceStatus>,
    pub date_from: Option<NaiveDate>,
    pub date_to: Option<NaiveDate>,
    pub total_min_cents: Option<i64>,
    pub total_max_cents: Option<i64>,
    pub search: Option<String>,
    #[serde(default)]
    pub sort: InvoiceSort,
    #[serde(default)]
    pub order: SortOrder,
}

#[derive(Debug, Deserialize)]
pub struct YearQuery {
    pub year: Option<i32>,
}

#[derive(Debug, Deserialize)]
pub struct DaysQuery {
    pub days: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct CalculateQuery {
    pub subtotal_cents: i64,
    pub tax_rate: Option<i32>,
}

#[derive(Debug, Serialize)]
pub struct NextNumber {
    pub invoice_number: String,
}

/* ============================================================
   Reads
   ============================================================ */

pub async fn list_invoices(
    State(state): State<AppState>,
    _auth: AuthContext,
    Query(q): Query<ListQuery>,
) -> Result<Json<Page<InvoiceDetails>>, ApiError> {
    let page = PageRequest::resolve(q.page, q.limit, state.default_page_limit);
    let filter = InvoiceFilter {
        patient_id: q.patient_id,
        statuses: q.status.into_iter().collect(),
        issue_from: q.date_from,
        issue_to: q.date_to,
        total_min_cents: q.total_min_cents,
        total_max_cents: q.total_max_cents,
        search: q.search.filter(|s| !s.trim().is_empty()),
        ..Default::default()
    };
    Ok(Json(invoices::list(state.store.as_ref(), &filter, q.sort, q.order, page).await?))
}

pub async fn get_invoice(
    State(state): State<AppState>,
    _auth: AuthContext,
    Path(invoice_id): Path<Uuid>,
) -> Result<Json<ApiOk<InvoiceDetails>>, ApiError> {
    let data = invoices::get(state.store.as_ref(), invoice_id).await?;
    Ok(Json(ApiOk { data }))
}

pub async fn patient_invoices(
    State(state): State<AppState>,
    _auth: AuthContext,
    Path(patient_id): Path<Uuid>,
) -> Result<Json<ApiOk<Vec<InvoiceDetails>>>, ApiError> {
    let data = invoices::by_patient(state.store.as_ref(), patient_id).await?;
    Ok(Json(ApiOk { data }))
}

pub async fn invoice_stats(
    State(state): State<AppState>,
    _auth: AuthContext,
    Query(q): Query<YearQuery>,
) -> Result<Json<ApiOk<InvoiceStats>>, ApiError> {
    let today = clinic_now().date();
    let year = q.year.unwrap_or(today.year());
    let data = invoices::stats(state.store.as_ref(), year, today).await?;
    Ok(Json(ApiOk { data }))
}

pub async fn upcoming_due(
    State(state): State<AppState>,
    _auth: AuthContext,
    Query(q): Query<DaysQuery>,
) -> Result<Json<ApiOk<Vec<InvoiceDetails>>>, ApiError> {
    let days = q.days.unwrap_or(invoices::DEFAULT_DUE_WINDOW_DAYS);
    let data = invoices::upcoming_due(state.store.as_ref(), clinic_now().date(), days).await?;
    Ok(Json(ApiOk { data }))
}

pub async fn monthly_revenue(
    State(state): State<AppState>,
    _auth: AuthContext,
    Query(q): Query<YearQuery>,
) -> Result<Json<ApiOk<Vec<MonthlyRevenue>>>, ApiError> {
    let year = q.year.unwrap_or(clinic_now().date().year());
    let data = invoices::monthly_revenue(state.store.as_ref(), year).await?;
    Ok(Json(ApiOk { data }))
}

pub async fn next_number(
    State(state): State<AppState>,
    _auth: AuthContext,
    Query(q): Query<YearQuery>,
) -> Result<Json<ApiOk<NextNumber>>, ApiError> {
    let year = q.year.unwrap_or(clinic_now().date().year());
    let invoice_number = invoices::next_number(state.store.as_ref(), year).await?;
    Ok(Json(ApiOk {
        data: NextNumber { invoice_number },
    }))
}

pub async fn calculate(
    State(state): State<AppState>,
    _auth: AuthContext,
    Query(q): Query<CalculateQuery>,
) -> Result<Json<ApiOk<InvoiceTotals>>, ApiError> {
    let data = invoices::calculate_totals(q.subtotal_cents, q.tax_rate.unwrap_or(state.default_tax_rate))?;
    Ok(Json(ApiOk { data }))
}

/* ============================================================
   Writes
   ============================================================ */

pub async fn create_invoice(
    State(state): State<AppState>,
    _auth: AuthContext,
    Json(req): Json<CreateInvoice>,
) -> Result<Json<ApiOk<InvoiceDetails>>, ApiError> {
    let data = invoices::create(state.store.as_ref(), req, state.default_tax_rate).await?;
    Ok(Json(ApiOk { data }))
}

pub async fn update_invoice(
    State(state): State<AppState>,
    _auth: AuthContext,
    Path(invoice_id): Path<Uuid>,
    Json(req): Json<UpdateInvoice>,
) -> Result<Json<ApiOk<InvoiceDetails>>, ApiError> {
    let data = invoices::update(state.store.as_ref(), invoice_id, req).await?;
    Ok(Json(ApiOk { data }))
}

pub async fn delete_invoice(
    State(state): State<AppState>,
    _auth: AuthContext,
    Path(invoice_id): Path<Uuid>,
) -> Result<Json<ApiOk<bool>>, ApiError> {
    invoices::delete(state.store.as_ref(), invoice_id).await?;
    Ok(Json(ApiOk { data: true }))
}

pub async fn mark_paid(
    State(state): State<AppState>,
    _auth: AuthContext,
    Path(invoice_id): Path<Uuid>,
    Json(req): Json<MarkPaid>,
) -> Result<Json<ApiOk<InvoiceDetails>>, ApiError> {
    let data = invoices::mark_paid(state.store.as_ref(), invoice_id, req, clinic_now().date()).await?;
    Ok(Json(ApiOk { data }))
}
