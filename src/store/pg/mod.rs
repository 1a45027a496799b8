//! Postgres-backed store. Dynamic filters go through `sqlx::QueryBuilder`;
//! every bound value is a parameter and sort columns come from closed enums.

use std::time::Duration;

use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Postgres, QueryBuilder};

use super::{StoreError, StoreResult};
use crate::models::SortOrder;

mod appointments;
mod doctors;
mod invoices;
mod patients;
mod reminders;
mod treatments;

#[derive(Clone, Debug)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub async fn connect(database_url: &str, max_connections: u32) -> StoreResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(Duration::from_secs(5))
            .connect(database_url)
            .await
            .map_err(StoreError::db("failed to connect to postgres"))?;
        Ok(Self { pool })
    }

    pub async fn migrate(&self) -> StoreResult<()> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|source| StoreError::Migration {
                context: "failed to apply migrations",
                source,
            })
    }
}

fn direction(order: SortOrder) -> &'static str {
    match order {
        SortOrder::Asc => "ASC",
        SortOrder::Desc => "DESC",
    }
}

fn escape_like(q: &str) -> String {
    q.replace('\\', "\\\\").replace('%', "\\%").replace('_', "\\_")
}

fn like_pattern(q: &str) -> String {
    format!("%{}%", escape_like(q))
}

fn push_window(qb: &mut QueryBuilder<'_, Postgres>, limit: Option<i64>, offset: i64) {
    if let Some(limit) = limit {
        qb.push(" LIMIT ").push_bind(limit);
    }
    if offset > 0 {
        qb.push(" OFFSET ").push_bind(offset);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn like_pattern_escapes_wildcards() {
        assert_eq!(like_pattern("ross"), "%ross%");
        assert_eq!(like_pattern("50%_off"), "%50\\%\\_off%");
    }
}
