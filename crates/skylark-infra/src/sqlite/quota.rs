//! Posts-per-day accounting.

use chrono::{NaiveDate, Utc};

use skylark_core::storage::QuotaRepository;
use skylark_types::error::RepositoryError;

use super::{SqliteStore, format_datetime, query_error};

fn day_key(day: NaiveDate) -> String {
    day.format("%Y-%m-%d").to_string()
}

impl QuotaRepository for SqliteStore {
    async fn count_for(&self, day: NaiveDate) -> Result<u32, RepositoryError> {
        let row: Option<(i64,)> = sqlx::query_as("SELECT count FROM post_quota WHERE day = ?")
            .bind(day_key(day))
            .fetch_optional(&self.pool.reader)
            .await
            .map_err(query_error)?;

        Ok(row.map_or(0, |(count,)| u32::try_from(count).unwrap_or(0)))
    }

    async fn increment_if_below(&self, day: NaiveDate, max: u32) -> Result<bool, RepositoryError> {
        let key = day_key(day);
        let mut tx = self.pool.writer.begin().await.map_err(query_error)?;

        let row: Option<(i64,)> = sqlx::query_as("SELECT count FROM post_quota WHERE day = ?")
            .bind(&key)
            .fetch_optional(&mut *tx)
            .await
            .map_err(query_error)?;
        let current = row.map_or(0, |(count,)| count);
        if current >= i64::from(max) {
            tx.rollback().await.map_err(query_error)?;
            return Ok(false);
        }

        sqlx::query(
            r#"INSERT INTO post_quota (day, count, updated_at) VALUES (?, 1, ?)
               ON CONFLICT (day) DO UPDATE SET count = count + 1, updated_at = excluded.updated_at"#,
        )
        .bind(&key)
        .bind(format_datetime(&Utc::now()))
        .execute(&mut *tx)
        .await
        .map_err(query_error)?;

        tx.commit().await.map_err(query_error)?;
        Ok(true)
    }
}
