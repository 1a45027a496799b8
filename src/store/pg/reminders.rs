use async_trait::async_trait;
use sqlx::{Postgres, QueryBuilder};
use uuid::Uuid;

use super::{direction, like_pattern, push_window, PgStore};
use crate::models::{NewReminder, Reminder, ReminderFilter, ReminderSort};
use crate::store::{ListOptions, ReminderStore, StoreError, StoreResult};

const REMINDER_COLUMNS: &str =
    "reminder_id, date, time, title, text, completed, created_at, updated_at";

fn push_filter(qb: &mut QueryBuilder<'_, Postgres>, f: &ReminderFilter) {
    qb.push(" WHERE TRUE");
    if let Some(d) = f.date {
        qb.push(" AND date = ").push_bind(d);
    }
    if let Some(d) = f.date_from {
        qb.push(" AND date >= ").push_bind(d);
    }
    if let Some(d) = f.before {
        qb.push(" AND date < ").push_bind(d);
    }
    if let Some(c) = f.completed {
        qb.push(" AND completed = ").push_bind(c);
    }
    if let Some(q) = f.search.as_deref() {
        let pattern = like_pattern(q);
        qb.push(" AND (title ILIKE ")
            .push_bind(pattern.clone())
            .push(" OR text ILIKE ")
            .push_bind(pattern)
            .push(")");
    }
}

#[async_trait]
impl ReminderStore for PgStore {
    async fn list_reminders(
        &self,
        filter: &ReminderFilter,
        opts: &ListOptions<ReminderSort>,
    ) -> StoreResult<Vec<Reminder>> {
        let mut qb = QueryBuilder::<Postgres>::new(format!("SELECT {REMINDER_COLUMNS} FROM reminder"));
        push_filter(&mut qb, filter);
        let dir = direction(opts.order);
        qb.push(match opts.sort {
            ReminderSort::Date => format!(" ORDER BY date {dir}, time {dir}"),
            ReminderSort::Time => format!(" ORDER BY time {dir}"),
            ReminderSort::CreatedAt => format!(" ORDER BY created_at {dir}"),
        });
        push_window(&mut qb, opts.limit, opts.offset);

        qb.build_query_as::<Reminder>()
            .fetch_all(&self.pool)
            .await
            .map_err(StoreError::db("failed to load reminders"))
    }

    async fn count_reminders(&self, filter: &ReminderFilter) -> StoreResult<i64> {
        let mut qb = QueryBuilder::<Postgres>::new("SELECT COUNT(*) FROM reminder");
        push_filter(&mut qb, filter);
        qb.build_query_scalar::<i64>()
            .fetch_one(&self.pool)
            .await
            .map_err(StoreError::db("failed to count reminders"))
    }

    async fn get_reminder(&self, id: Uuid) -> StoreResult<Option<Reminder>> {
        sqlx::query_as::<_, Reminder>(&format!(
            "SELECT {REMINDER_COLUMNS} FROM reminder WHERE reminder_id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(StoreError::db("failed to load reminder"))
    }

    async fn insert_reminder(&self, new: &NewReminder) -> StoreResult<Reminder> {
        sqlx::query_as::<_, Reminder>(&format!(
            r#"
            INSERT INTO reminder (date, time, title, text, completed)
            VALUES ($1,$2,$3,$4,$5)
            RETURNING {REMINDER_COLUMNS}
            "#
        ))
        .bind(new.date)
        .bind(new.time)
        .bind(&new.title)
        .bind(&new.text)
        .bind(new.completed)
        .fetch_one(&self.pool)
        .await
        .map_err(StoreError::db("failed to create reminder"))
    }

    async fn update_reminder(&self, r: &Reminder) -> StoreResult<Option<Reminder>> {
        sqlx::query_as::<_, Reminder>(&format!(
            r#"
            UPDATE reminder
            SET date = $2,
                time = $3,
                title = $4,
                text = $5,
                completed = $6,
                updated_at = now()
            WHERE reminder_id = $1
            RETURNING {REMINDER_COLUMNS}
            "#
        ))
        .bind(r.reminder_id)
        .bind(r.date)
        .bind(r.time)
        .bind(&r.title)
        .bind(&r.text)
        .bind(r.completed)
        .fetch_optional(&self.pool)
        .await
        .map_err(StoreError::db("failed to update reminder"))
    }

    async fn delete_reminder(&self, id: Uuid) -> StoreResult<bool> {
        let res = sqlx::query("DELETE FROM reminder WHERE reminder_id = $1")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(StoreError::db("failed to delete reminder"))?;
        Ok(res.rows_affected() > 0)
    }
}
