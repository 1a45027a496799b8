use async_trait::async_trait;
use sqlx::{Postgres, QueryBuilder};
use uuid::Uuid;

use super::{direction, like_pattern, push_window, PgStore};
use crate::models::{NewPatient, Patient, PatientFilter, PatientSort};
use crate::store::{ListOptions, PatientStore, StoreError, StoreResult};

const PATIENT_COLUMNS: &str = r#"
    patient_id, first_name, last_name, email, phone, date_of_birth, fiscal_code,
    address, city, postal_code, province, medical_history, allergies, medications,
    is_smoker, anamnesis, created_at, updated_at
"#;

fn push_filter(qb: &mut QueryBuilder<'_, Postgres>, f: &PatientFilter) {
    qb.push(" WHERE TRUE");
    if let Some(q) = f.search.as_deref() {
        let pattern = like_pattern(q);
        qb.push(" AND (first_name ILIKE ")
            .push_bind(pattern.clone())
            .push(" OR last_name ILIKE ")
            .push_bind(pattern.clone())
            .push(" OR email ILIKE ")
            .push_bind(pattern.clone())
            .push(" OR fiscal_code ILIKE ")
            .push_bind(pattern)
            .push(")");
    }
    if let Some(city) = f.city.as_deref() {
        qb.push(" AND city ILIKE ").push_bind(like_pattern(city));
    }
    if let Some(smoker) = f.is_smoker {
        qb.push(" AND is_smoker = ").push_bind(smoker);
    }
    match f.has_allergies {
        Some(true) => {
            qb.push(" AND allergies IS NOT NULL");
        }
        Some(false) => {
            qb.push(" AND allergies IS NULL");
        }
        None => {}
    }
    if let Some(from) = f.created_from {
        qb.push(" AND created_at >= ").push_bind(from);
    }
    if let Some(email) = f.email.as_deref() {
        qb.push(" AND lower(email) = lower(").push_bind(email.to_string()).push(")");
    }
    if let Some(code) = f.fiscal_code.as_deref() {
        qb.push(" AND upper(fiscal_code) = upper(").push_bind(code.to_string()).push(")");
    }
    if let Some(id) = f.exclude_id {
        qb.push(" AND patient_id <> ").push_bind(id);
    }
}

#[async_trait]
impl PatientStore for PgStore {
    async fn list_patients(
        &self,
        filter: &PatientFilter,
        opts: &ListOptions<PatientSort>,
    ) -> StoreResult<Vec<Patient>> {
        let mut qb = QueryBuilder::<Postgres>::new(format!("SELECT {PATIENT_COLUMNS} FROM patient"));
        push_filter(&mut qb, filter);
        let dir = direction(opts.order);
        qb.push(match opts.sort {
            PatientSort::LastName => format!(" ORDER BY last_name {dir}, first_name {dir}"),
            PatientSort::FirstName => format!(" ORDER BY first_name {dir}, last_name {dir}"),
            PatientSort::CreatedAt => format!(" ORDER BY created_at {dir}"),
        });
        push_window(&mut qb, opts.limit, opts.offset);

        qb.build_query_as::<Patient>()
            .fetch_all(&self.pool)
            .await
            .map_err(StoreError::db("failed to load patients"))
    }

    async fn count_patients(&self, filter: &PatientFilter) -> StoreResult<i64> {
        let mut qb = QueryBuilder::<Postgres>::new("SELECT COUNT(*) FROM patient");
        push_filter(&mut qb, filter);
        qb.build_query_scalar::<i64>()
            .fetch_one(&self.pool)
            .await
            .map_err(StoreError::db("failed to count patients"))
    }

    async fn get_patient(&self, id: Uuid) -> StoreResult<Option<Patient>> {
        sqlx::query_as::<_, Patient>(&format!(
            "SELECT {PATIENT_COLUMNS} FROM patient WHERE patient_id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(StoreError::db("failed to load patient"))
    }

    async fn insert_patient(&self, new: &NewPatient) -> StoreResult<Patient> {
        sqlx::query_as::<_, Patient>(&format!(
            r#"
            INSERT INTO patient (
              first_name, last_name, email, phone, date_of_birth, fiscal_code,
              address, city, postal_code, province, medical_history, allergies,
              medications, is_smoker, anamnesis
            )
            VALUES ($1,$2,$3,$4,$5,$6,$7,$8,$9,$10,$11,$12,$13,$14,$15)
            RETURNING {PATIENT_COLUMNS}
            "#
        ))
        .bind(&new.first_name)
        .bind(&new.last_name)
        .bind(new.email.as_deref())
        .bind(&new.phone)
        .bind(new.date_of_birth)
        .bind(new.fiscal_code.as_deref())
        .bind(&new.address)
        .bind(&new.city)
        .bind(&new.postal_code)
        .bind(&new.province)
        .bind(&new.medical_history)
        .bind(new.allergies.as_deref())
        .bind(new.medications.as_deref())
        .bind(new.is_smoker)
        .bind(&new.anamnesis)
        .fetch_one(&self.pool)
        .await
        .map_err(StoreError::db("failed to create patient"))
    }

    async fn update_patient(&self, p: &Patient) -> StoreResult<Option<Patient>> {
        sqlx::query_as::<_, Patient>(&format!(
            r#"
            UPDATE patient
            SET first_name = $2,
                last_name = $3,
                email = $4,
                phone = $5,
                date_of_birth = $6,
                fiscal_code = $7,
                address = $8,
                city = $9,
                postal_code = $10,
                province = $11,
                medical_history = $12,
                allergies = $13,
                medications = $14,
                is_smoker = $15,
                anamnesis = $16,
                updated_at = now()
            WHERE patient_id = $1
            RETURNING {PATIENT_COLUMNS}
            "#
        ))
        .bind(p.patient_id)
        .bind(&p.first_name)
        .bind(&p.last_name)
        .bind(p.email.as_deref())
        .bind(&p.phone)
        .bind(p.date_of_birth)
        .bind(p.fiscal_code.as_deref())
        .bind(&p.address)
        .bind(&p.city)
        .bind(&p.postal_code)
        .bind(&p.province)
        .bind(&p.medical_history)
        .bind(p.allergies.as_deref())
        .bind(p.medications.as_deref())
        .bind(p.is_smoker)
        .bind(&p.anamnesis)
        .fetch_optional(&self.pool)
        .await
        .map_err(StoreError::db("failed to update patient"))
    }

    async fn delete_patient(&self, id: Uuid) -> StoreResult<bool> {
        let res = sqlx::query("DELETE FROM patient WHERE patient_id = $1")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(StoreError::db("failed to delete patient"))?;
        Ok(res.rows_affected() > 0)
    }
}
