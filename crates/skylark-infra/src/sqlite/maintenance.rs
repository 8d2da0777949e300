//! Table statistics, VACUUM and retention pruning.

use chrono::{DateTime, Utc};

use skylark_core::storage::{MaintenanceRepository, TableStat};
use skylark_types::error::RepositoryError;

use super::{SqliteStore, format_datetime, query_error};

/// Tables reported by `dbstats`, in display order.
const TABLES: [&str; 4] = [
    "response_limit_state",
    "conversation_turns",
    "plugin_data",
    "post_quota",
];

impl MaintenanceRepository for SqliteStore {
    async fn table_stats(&self) -> Result<Vec<TableStat>, RepositoryError> {
        let mut stats = Vec::with_capacity(TABLES.len());
        for table in TABLES {
            // Table names come from the fixed list above.
            let (rows,): (i64,) = sqlx::query_as(&format!("SELECT COUNT(*) FROM {table}"))
                .fetch_one(&self.pool.reader)
                .await
                .map_err(query_error)?;
            stats.push(TableStat {
                name: table.to_string(),
                rows,
            });
        }
        Ok(stats)
    }

    async fn vacuum(&self) -> Result<(), RepositoryError> {
        sqlx::query("VACUUM")
            .execute(&self.pool.writer)
            .await
            .map_err(query_error)?;
        Ok(())
    }

    async fn prune_older_than(&self, cutoff: DateTime<Utc>) -> Result<u64, RepositoryError> {
        let cutoff = format_datetime(&cutoff);
        let mut tx = self.pool.writer.begin().await.map_err(query_error)?;

        let limits = sqlx::query("DELETE FROM response_limit_state WHERE updated_at < ?")
            .bind(&cutoff)
            .execute(&mut *tx)
            .await
            .map_err(query_error)?;
        let turns = sqlx::query("DELETE FROM conversation_turns WHERE created_at < ?")
            .bind(&cutoff)
            .execute(&mut *tx)
            .await
            .map_err(query_error)?;

        tx.commit().await.map_err(query_error)?;
        Ok(limits.rows_affected() + turns.rows_affected())
    }

    async fn purge_conversations(&self) -> Result<u64, RepositoryError> {
        let mut tx = self.pool.writer.begin().await.map_err(query_error)?;
        let limits = sqlx::query("DELETE FROM response_limit_state")
            .execute(&mut *tx)
            .await
            .map_err(query_error)?;
        let turns = sqlx::query("DELETE FROM conversation_turns")
            .execute(&mut *tx)
            .await
            .map_err(query_error)?;
        tx.commit().await.map_err(query_error)?;
        Ok(limits.rows_affected() + turns.rows_affected())
    }
}
