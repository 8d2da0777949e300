//! Plugin-scoped key-value storage.
//!
//! Values are opaque text; plugins choose their own encoding (usually JSON).

use chrono::Utc;
use sqlx::Row;

use skylark_core::storage::PluginDataStore;
use skylark_types::error::RepositoryError;

use super::{SqliteStore, format_datetime, query_error};

impl PluginDataStore for SqliteStore {
    async fn get(&self, plugin: &str, key: &str) -> Result<Option<String>, RepositoryError> {
        let row = sqlx::query("SELECT value FROM plugin_data WHERE plugin_name = ? AND key = ?")
            .bind(plugin)
            .bind(key)
            .fetch_optional(&self.pool.reader)
            .await
            .map_err(query_error)?;

        row.map(|row| row.try_get("value").map_err(query_error))
            .transpose()
    }

    async fn set(&self, plugin: &str, key: &str, value: &str) -> Result<(), RepositoryError> {
        sqlx::query(
            r#"INSERT INTO plugin_data (plugin_name, key, value, updated_at)
               VALUES (?, ?, ?, ?)
               ON CONFLICT (plugin_name, key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at"#,
        )
        .bind(plugin)
        .bind(key)
        .bind(value)
        .bind(format_datetime(&Utc::now()))
        .execute(&self.pool.writer)
        .await
        .map_err(query_error)?;

        Ok(())
    }

    async fn delete(&self, plugin: &str, key: Option<&str>) -> Result<u64, RepositoryError> {
        let result = match key {
            Some(key) => sqlx::query("DELETE FROM plugin_data WHERE plugin_name = ? AND key = ?")
                .bind(plugin)
                .bind(key)
                .execute(&self.pool.writer)
                .await,
            None => sqlx::query("DELETE FROM plugin_data WHERE plugin_name = ?")
                .bind(plugin)
                .execute(&self.pool.writer)
                .await,
        }
        .map_err(query_error)?;

        Ok(result.rows_affected())
    }

    async fn list_keys(&self, plugin: &str) -> Result<Vec<String>, RepositoryError> {
        let rows = sqlx::query("SELECT key FROM plugin_data WHERE plugin_name = ? ORDER BY key")
            .bind(plugin)
            .fetch_all(&self.pool.reader)
            .await
            .map_err(query_error)?;

        let mut keys = Vec::with_capacity(rows.len());
        for row in &rows {
            let key: String = row.try_get("key").map_err(query_error)?;
            keys.push(key);
        }

        Ok(keys)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sqlite::test_pool;

    #[tokio::test]
    async fn test_set_get_roundtrip_and_upsert() {
        let store = SqliteStore::new(test_pool().await);
        assert!(store.get("topics", "last_used_line").await.unwrap().is_none());

        store.set("topics", "last_used_line", "1").await.unwrap();
        store.set("topics", "last_used_line", "2").await.unwrap();
        assert_eq!(
            store.get("topics", "last_used_line").await.unwrap().as_deref(),
            Some("2")
        );
    }

    #[tokio::test]
    async fn test_namespaces_are_isolated() {
        let store = SqliteStore::new(test_pool().await);
        store.set("radar", "seen", "[]").await.unwrap();
        store.set("topics", "seen", "x").await.unwrap();
        assert_eq!(store.get("radar", "seen").await.unwrap().as_deref(), Some("[]"));
        assert_eq!(store.list_keys("topics").await.unwrap(), vec!["seen"]);
    }

    #[tokio::test]
    async fn test_delete_one_key_or_whole_plugin() {
        let store = SqliteStore::new(test_pool().await);
        store.set("radar", "a", "1").await.unwrap();
        store.set("radar", "b", "2").await.unwrap();
        store.set("radar", "c", "3").await.unwrap();

        assert_eq!(store.delete("radar", Some("a")).await.unwrap(), 1);
        assert_eq!(store.delete("radar", Some("missing")).await.unwrap(), 0);
        assert_eq!(store.delete("radar", None).await.unwrap(), 2);
        assert!(store.list_keys("radar").await.unwrap().is_empty());
    }
}
