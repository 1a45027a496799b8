use async_trait::async_trait;
use sqlx::{Postgres, QueryBuilder};
use uuid::Uuid;

use super::{direction, like_pattern, push_window, PgStore};
use crate::models::{NewTreatment, Treatment, TreatmentFilter, TreatmentSort};
use crate::store::{ListOptions, StoreError, StoreResult, TreatmentStore};

const TREATMENT_COLUMNS: &str =
    "treatment_id, name, duration_min, price_cents, category, description, created_at, updated_at";

fn push_filter(qb: &mut QueryBuilder<'_, Postgres>, f: &TreatmentFilter) {
    qb.push(" WHERE TRUE");
    if let Some(q) = f.search.as_deref() {
        let pattern = like_pattern(q);
        qb.push(" AND (name ILIKE ")
            .push_bind(pattern.clone())
            .push(" OR description ILIKE ")
            .push_bind(pattern.clone())
            .push(" OR category ILIKE ")
            .push_bind(pattern)
            .push(")");
    }
    if let Some(c) = f.category.as_deref() {
        qb.push(" AND category = ").push_bind(c.to_string());
    }
    if let Some(p) = f.min_price_cents {
        qb.push(" AND price_cents >= ").push_bind(p);
    }
    if let Some(p) = f.max_price_cents {
        qb.push(" AND price_cents <= ").push_bind(p);
    }
}

#[async_trait]
impl TreatmentStore for PgStore {
    async fn list_treatments(
        &self,
        filter: &TreatmentFilter,
        opts: &ListOptions<TreatmentSort>,
    ) -> StoreResult<Vec<Treatment>> {
        let mut qb =
            QueryBuilder::<Postgres>::new(format!("SELECT {TREATMENT_COLUMNS} FROM treatment"));
        push_filter(&mut qb, filter);
        let dir = direction(opts.order);
        qb.push(match opts.sort {
            TreatmentSort::Name => format!(" ORDER BY name {dir}"),
            TreatmentSort::Price => format!(" ORDER BY price_cents {dir}"),
            TreatmentSort::Duration => format!(" ORDER BY duration_min {dir}"),
            TreatmentSort::Category => format!(" ORDER BY category {dir}, name ASC"),
            TreatmentSort::CreatedAt => format!(" ORDER BY created_at {dir}"),
        });
        push_window(&mut qb, opts.limit, opts.offset);

        qb.build_query_as::<Treatment>()
            .fetch_all(&self.pool)
            .await
            .map_err(StoreError::db("failed to load treatments"))
    }

    async fn count_treatments(&self, filter: &TreatmentFilter) -> StoreResult<i64> {
        let mut qb = QueryBuilder::<Postgres>::new("SELECT COUNT(*) FROM treatment");
        push_filter(&mut qb, filter);
        qb.build_query_scalar::<i64>()
            .fetch_one(&self.pool)
            .await
            .map_err(StoreError::db("failed to count treatments"))
    }

    async fn get_treatment(&self, id: Uuid) -> StoreResult<Option<Treatment>> {
        sqlx::query_as::<_, Treatment>(&format!(
            "SELECT {TREATMENT_COLUMNS} FROM treatment WHERE treatment_id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(StoreError::db("failed to load treatment"))
    }

    async fn insert_treatment(&self, new: &NewTreatment) -> StoreResult<Treatment> {
        sqlx::query_as::<_, Treatment>(&format!(
            r#"
            INSERT INTO treatment (name, duration_min, price_cents, category, description)
            VALUES ($1,$2,$3,$4,$5)
            RETURNING {TREATMENT_COLUMNS}
            "#
        ))
        .bind(&new.name)
        .bind(new.duration_min)
        .bind(new.price_cents)
        .bind(&new.category)
        .bind(new.description.as_deref())
        .fetch_one(&self.pool)
        .await
        .map_err(StoreError::db("failed to create treatment"))
    }

    async fn update_treatment(&self, treatment: &Treatment) -> StoreResult<Option<Treatment>> {
        sqlx::query_as::<_, Treatment>(&format!(
            r#"
            UPDATE treatment
            SET name = $2,
                duration_min = $3,
                price_cents = $4,
                category = $5,
                description = $6,
                updated_at = now()
            WHERE treatment_id = $1
            RETURNING {TREATMENT_COLUMNS}
            "#
        ))
        .bind(treatment.treatment_id)
        .bind(&treatment.name)
        .bind(treatment.duration_min)
        .bind(treatment.price_cents)
        .bind(&treatment.category)
        .bind(treatment.description.as_deref())
        .fetch_optional(&self.pool)
        .await
        .map_err(StoreError::db("failed to update treatment"))
    }

    async fn delete_treatment(&self, id: Uuid) -> StoreResult<bool> {
        let res = sqlx::query("DELETE FROM treatment WHERE treatment_id = $1")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(StoreError::db("failed to delete treatment"))?;
        Ok(res.rows_affected() > 0)
    }
}
