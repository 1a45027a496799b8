use async_trait::async_trait;
use sqlx::postgres::PgRow;
use sqlx::{FromRow, Postgres, QueryBuilder, Row};
use uuid::Uuid;

use super::{direction, escape_like, like_pattern, push_window, PgStore};
use crate::models::{Invoice, InvoiceDetails, InvoiceFilter, InvoiceSort, NewInvoice, PersonBrief};
use crate::store::{InvoiceStore, ListOptions, StoreError, StoreResult};

const INVOICE_COLUMNS: &str = r#"
    invoice_id, invoice_number, issue_date, due_date, subtotal_cents, tax_rate,
    tax_amount_cents, total_cents, status, payment_method, payment_date, patient_id,
    description, notes, created_at, updated_at
"#;

const SELECT_DETAILS: &str = r#"
    SELECT
      i.invoice_id, i.invoice_number, i.issue_date, i.due_date, i.subtotal_cents, i.tax_rate,
      i.tax_amount_cents, i.total_cents, i.status, i.payment_method, i.payment_date,
      i.patient_id, i.description, i.notes, i.created_at, i.updated_at,

      p.first_name AS p_first,
      p.last_name  AS p_last

    FROM invoice i
    LEFT JOIN patient p ON p.patient_id = i.patient_id
"#;

fn push_filter(qb: &mut QueryBuilder<'_, Postgres>, f: &InvoiceFilter) {
    qb.push(" WHERE TRUE");
    if let Some(id) = f.patient_id {
        qb.push(" AND i.patient_id = ").push_bind(id);
    }
    if !f.statuses.is_empty() {
        let statuses: Vec<i16> = f.statuses.iter().map(|s| *s as i16).collect();
        qb.push(" AND i.status = ANY(").push_bind(statuses).push(")");
    }
    if let Some(d) = f.issue_from {
        qb.push(" AND i.issue_date >= ").push_bind(d);
    }
    if let Some(d) = f.issue_to {
        qb.push(" AND i.issue_date <= ").push_bind(d);
    }
    if let Some(d) = f.due_from {
        qb.push(" AND i.due_date >= ").push_bind(d);
    }
    if let Some(d) = f.due_to {
        qb.push(" AND i.due_date <= ").push_bind(d);
    }
    if let Some(v) = f.total_min_cents {
        qb.push(" AND i.total_cents >= ").push_bind(v);
    }
    if let Some(v) = f.total_max_cents {
        qb.push(" AND i.total_cents <= ").push_bind(v);
    }
    if let Some(q) = f.search.as_deref() {
        let pattern = like_pattern(q);
        qb.push(" AND (i.invoice_number ILIKE ")
            .push_bind(pattern.clone())
            .push(" OR i.description ILIKE ")
            .push_bind(pattern)
            .push(")");
    }
    if let Some(prefix) = f.number_prefix.as_deref() {
        qb.push(" AND i.invoice_number LIKE ")
            .push_bind(format!("{}%", escape_like(prefix)));
    }
}

fn details_from_row(r: &PgRow) -> Result<InvoiceDetails, sqlx::Error> {
    let invoice = Invoice::from_row(r)?;
    let p_first: Option<String> = r.try_get("p_first")?;
    let p_last: Option<String> = r.try_get("p_last")?;
    let patient = match (p_first, p_last) {
        (Some(first), Some(last)) => Some(PersonBrief {
            id: invoice.patient_id,
            display: format!("{first} {last}"),
        }),
        _ => None,
    };
    Ok(InvoiceDetails { invoice, patient })
}

#[async_trait]
impl InvoiceStore for PgStore {
    async fn list_invoices(
        &self,
        filter: &InvoiceFilter,
        opts: &ListOptions<InvoiceSort>,
    ) -> StoreResult<Vec<InvoiceDetails>> {
        let mut qb = QueryBuilder::<Postgres>::new(SELECT_DETAILS);
        push_filter(&mut qb, filter);
        let dir = direction(opts.order);
        qb.push(match opts.sort {
            InvoiceSort::IssueDate => format!(" ORDER BY i.issue_date {dir}, i.invoice_number {dir}"),
            InvoiceSort::DueDate => format!(" ORDER BY i.due_date {dir}"),
            InvoiceSort::Total => format!(" ORDER BY i.total_cents {dir}"),
            InvoiceSort::InvoiceNumber => format!(" ORDER BY i.invoice_number {dir}"),
            InvoiceSort::CreatedAt => format!(" ORDER BY i.created_at {dir}"),
        });
        push_window(&mut qb, opts.limit, opts.offset);

        let rows = qb
            .build()
            .fetch_all(&self.pool)
            .await
            .map_err(StoreError::db("failed to load invoices"))?;

        rows.iter()
            .map(details_from_row)
            .collect::<Result<Vec<_>, _>>()
            .map_err(StoreError::db("failed to decode invoice row"))
    }

    async fn count_invoices(&self, filter: &InvoiceFilter) -> StoreResult<i64> {
        let mut qb = QueryBuilder::<Postgres>::new("SELECT COUNT(*) FROM invoice i");
        push_filter(&mut qb, filter);
        qb.build_query_scalar::<i64>()
            .fetch_one(&self.pool)
            .await
            .map_err(StoreError::db("failed to count invoices"))
    }

    async fn get_invoice(&self, id: Uuid) -> StoreResult<Option<InvoiceDetails>> {
        let mut qb = QueryBuilder::<Postgres>::new(SELECT_DETAILS);
        qb.push(" WHERE i.invoice_id = ").push_bind(id);

        let row = qb
            .build()
            .fetch_optional(&self.pool)
            .await
            .map_err(StoreError::db("failed to load invoice"))?;

        row.as_ref()
            .map(details_from_row)
            .transpose()
            .map_err(StoreError::db("failed to decode invoice row"))
    }

    async fn insert_invoice(&self, new: &NewInvoice) -> StoreResult<Invoice> {
        sqlx::query_as::<_, Invoice>(&format!(
            r#"
            INSERT INTO invoice (
              invoice_number, issue_date, due_date, subtotal_cents, tax_rate,
              tax_amount_cents, total_cents, status, payment_method, payment_date,
              patient_id, description, notes
            )
            VALUES ($1,$2,$3,$4,$5,$6,$7,$8,$9,$10,$11,$12,$13)
            RETURNING {INVOICE_COLUMNS}
            "#
        ))
        .bind(&new.invoice_number)
        .bind(new.issue_date)
        .bind(new.due_date)
        .bind(new.subtotal_cents)
        .bind(new.tax_rate)
        .bind(new.tax_amount_cents)
        .bind(new.total_cents)
        .bind(new.status)
        .bind(new.payment_method.as_deref())
        .bind(new.payment_date)
        .bind(new.patient_id)
        .bind(&new.description)
        .bind(new.notes.as_deref())
        .fetch_one(&self.pool)
        .await
        .map_err(StoreError::db("failed to create invoice"))
    }

    async fn update_invoice(&self, inv: &Invoice) -> StoreResult<Option<Invoice>> {
        sqlx::query_as::<_, Invoice>(&format!(
            r#"
            UPDATE invoice
            SET invoice_number = $2,
                issue_date = $3,
                due_date = $4,
                subtotal_cents = $5,
                tax_rate = $6,
                tax_amount_cents = $7,
                total_cents = $8,
                status = $9,
                payment_method = $10,
                payment_date = $11,
                patient_id = $12,
                description = $13,
                notes = $14,
                updated_at = now()
            WHERE invoice_id = $1
            RETURNING {INVOICE_COLUMNS}
            "#
        ))
        .bind(inv.invoice_id)
        .bind(&inv.invoice_number)
        .bind(inv.issue_date)
        .bind(inv.due_date)
        .bind(inv.subtotal_cents)
        .bind(inv.tax_rate)
        .bind(inv.tax_amount_cents)
        .bind(inv.total_cents)
        .bind(inv.status)
        .bind(inv.payment_method.as_deref())
        .bind(inv.payment_date)
        .bind(inv.patient_id)
        .bind(&inv.description)
        .bind(inv.notes.as_deref())
        .fetch_optional(&self.pool)
        .await
        .map_err(StoreError::db("failed to update invoice"))
    }

    async fn delete_invoice(&self, id: Uuid) -> StoreResult<bool> {
        let res = sqlx::query("DELETE FROM invoice WHERE invoice_id = $1")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(StoreError::db("failed to delete invoice"))?;
        Ok(res.rows_affected() > 0)
    }
}
