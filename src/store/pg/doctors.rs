use async_trait::async_trait;
use sqlx::{Postgres, QueryBuilder};
use uuid::Uuid;

use super::{direction, like_pattern, push_window, PgStore};
use crate::models::{Doctor, DoctorFilter, DoctorSort, NewDoctor};
use crate::store::{DoctorStore, ListOptions, StoreError, StoreResult};

const DOCTOR_COLUMNS: &str =
    "doctor_id, name, specialization, color, email, phone, created_at, updated_at";

fn push_filter(qb: &mut QueryBuilder<'_, Postgres>, f: &DoctorFilter) {
    qb.push(" WHERE TRUE");
    if let Some(q) = f.search.as_deref() {
        let pattern = like_pattern(q);
        qb.push(" AND (name ILIKE ")
            .push_bind(pattern.clone())
            .push(" OR specialization ILIKE ")
            .push_bind(pattern)
            .push(")");
    }
    if let Some(s) = f.specialization.as_deref() {
        qb.push(" AND specialization = ").push_bind(s.to_string());
    }
}

#[async_trait]
impl DoctorStore for PgStore {
    async fn list_doctors(
        &self,
        filter: &DoctorFilter,
        opts: &ListOptions<DoctorSort>,
    ) -> StoreResult<Vec<Doctor>> {
        let mut qb = QueryBuilder::<Postgres>::new(format!("SELECT {DOCTOR_COLUMNS} FROM doctor"));
        push_filter(&mut qb, filter);
        let dir = direction(opts.order);
        qb.push(match opts.sort {
            DoctorSort::Name => format!(" ORDER BY name {dir}"),
            DoctorSort::Specialization => format!(" ORDER BY specialization {dir}, name ASC"),
            DoctorSort::CreatedAt => format!(" ORDER BY created_at {dir}"),
        });
        push_window(&mut qb, opts.limit, opts.offset);

        qb.build_query_as::<Doctor>()
            .fetch_all(&self.pool)
            .await
            .map_err(StoreError::db("failed to load doctors"))
    }

    async fn count_doctors(&self, filter: &DoctorFilter) -> StoreResult<i64> {
        let mut qb = QueryBuilder::<Postgres>::new("SELECT COUNT(*) FROM doctor");
        push_filter(&mut qb, filter);
        qb.build_query_scalar::<i64>()
            .fetch_one(&self.pool)
            .await
            .map_err(StoreError::db("failed to count doctors"))
    }

    async fn get_doctor(&self, id: Uuid) -> StoreResult<Option<Doctor>> {
        sqlx::query_as::<_, Doctor>(&format!(
            "SELECT {DOCTOR_COLUMNS} FROM doctor WHERE doctor_id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(StoreError::db("failed to load doctor"))
    }

    async fn insert_doctor(&self, new: &NewDoctor) -> StoreResult<Doctor> {
        sqlx::query_as::<_, Doctor>(&format!(
            r#"
            INSERT INTO doctor (name, specialization, color, email, phone)
            VALUES ($1,$2,$3,$4,$5)
            RETURNING {DOCTOR_COLUMNS}
            "#
        ))
        .bind(&new.name)
        .bind(&new.specialization)
        .bind(&new.color)
        .bind(new.email.as_deref())
        .bind(new.phone.as_deref())
        .fetch_one(&self.pool)
        .await
        .map_err(StoreError::db("failed to create doctor"))
    }

    async fn update_doctor(&self, doctor: &Doctor) -> StoreResult<Option<Doctor>> {
        sqlx::query_as::<_, Doctor>(&format!(
            r#"
            UPDATE doctor
            SET name = $2,
                specialization = $3,
                color = $4,
                email = $5,
                phone = $6,
                updated_at = now()
            WHERE doctor_id = $1
            RETURNING {DOCTOR_COLUMNS}
            "#
        ))
        .bind(doctor.doctor_id)
        .bind(&doctor.name)
        .bind(&doctor.specialization)
        .bind(&doctor.color)
        .bind(doctor.email.as_deref())
        .bind(doctor.phone.as_deref())
        .fetch_optional(&self.pool)
        .await
        .map_err(StoreError::db("failed to update doctor"))
    }

    async fn delete_doctor(&self, id: Uuid) -> StoreResult<bool> {
        let res = sqlx::query("DELETE FROM doctor WHERE doctor_id = $1")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(StoreError::db("failed to delete doctor"))?;
        Ok(res.rows_affected() > 0)
    }
}
