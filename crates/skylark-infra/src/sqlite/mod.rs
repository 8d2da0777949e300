//! SQLite storage layer.
//!
//! [`SqliteStore`] implements every store port from `skylark-core` over a
//! split reader/writer [`pool::DatabasePool`]. Each port lives in its own
//! module.

pub mod conversation;
pub mod maintenance;
pub mod plugin_data;
pub mod pool;
pub mod quota;

use chrono::{DateTime, SecondsFormat, Utc};

use skylark_types::error::RepositoryError;

use self::pool::DatabasePool;

/// SQLite-backed implementation of the store ports.
#[derive(Clone)]
pub struct SqliteStore {
    pool: DatabasePool,
}

impl SqliteStore {
    pub fn new(pool: DatabasePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &DatabasePool {
        &self.pool
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Fixed-width UTC timestamps so text comparison orders correctly.
pub(crate) fn format_datetime(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub(crate) fn parse_datetime(s: &str) -> Result<DateTime<Utc>, RepositoryError> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| RepositoryError::Query(format!("invalid datetime: {e}")))
}

pub(crate) fn query_error(e: sqlx::Error) -> RepositoryError {
    RepositoryError::Query(e.to_string())
}

#[cfg(test)]
pub(crate) async fn test_pool() -> DatabasePool {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("test.db");
    std::mem::forget(dir);
    DatabasePool::open(&path).await.unwrap()
}
