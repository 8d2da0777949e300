//! Durable store ports.
//!
//! Four repository traits cover the persisted state: per-user limiter
//! counters and turn windows, plugin-scoped blobs, the daily post quota, and
//! maintenance (stats, vacuum, pruning). Uses RPITIT (native async fn in
//! traits, Rust 2024 edition). Implementations live in skylark-infra;
//! [`memory::MemoryStore`] backs the core tests.

pub mod memory;
pub mod plugin_storage;

use std::future::Future;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use skylark_types::conversation::{LimitState, Turn};
use skylark_types::error::RepositoryError;
use skylark_types::user::UserKey;

/// Plugin-data namespace holding operator overrides (model selection and
/// allow/deny lists). Never cleared by age-based pruning.
pub const CONTROL_NAMESPACE: &str = "control";

/// Row count for one table, as reported by `dbstats`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableStat {
    pub name: String,
    pub rows: i64,
}

/// Per-user limiter state and conversation windows.
pub trait ConversationRepository: Send + Sync {
    fn load_limit_state(
        &self,
        user: &UserKey,
    ) -> impl Future<Output = Result<Option<LimitState>, RepositoryError>> + Send;

    fn save_limit_state(
        &self,
        user: &UserKey,
        state: &LimitState,
    ) -> impl Future<Output = Result<(), RepositoryError>> + Send;

    /// The newest `limit` turns for a user, oldest first.
    fn load_turns(
        &self,
        user: &UserKey,
        limit: usize,
    ) -> impl Future<Output = Result<Vec<Turn>, RepositoryError>> + Send;

    /// Append turns and trim the stored window to the newest `keep` entries.
    fn append_turns(
        &self,
        user: &UserKey,
        turns: &[Turn],
        keep: usize,
    ) -> impl Future<Output = Result<(), RepositoryError>> + Send;

    /// Delete stored turns for one user, or for everyone when `user` is `None`.
    fn clear_turns(
        &self,
        user: Option<&UserKey>,
    ) -> impl Future<Output = Result<u64, RepositoryError>> + Send;
}

/// Key-value blobs namespaced by plugin name. Exempt from age-based pruning.
pub trait PluginDataStore: Send + Sync {
    fn get(
        &self,
        plugin: &str,
        key: &str,
    ) -> impl Future<Output = Result<Option<String>, RepositoryError>> + Send;

    fn set(
        &self,
        plugin: &str,
        key: &str,
        value: &str,
    ) -> impl Future<Output = Result<(), RepositoryError>> + Send;

    /// Delete one key, or every key of the plugin when `key` is `None`.
    /// Returns the number of rows removed.
    fn delete(
        &self,
        plugin: &str,
        key: Option<&str>,
    ) -> impl Future<Output = Result<u64, RepositoryError>> + Send;

    fn list_keys(
        &self,
        plugin: &str,
    ) -> impl Future<Output = Result<Vec<String>, RepositoryError>> + Send;
}

/// Posts-per-calendar-day accounting.
pub trait QuotaRepository: Send + Sync {
    fn count_for(
        &self,
        day: NaiveDate,
    ) -> impl Future<Output = Result<u32, RepositoryError>> + Send;

    /// Atomically read the day's count, and increment it only if it is below
    /// `max`. Returns whether the increment happened.
    fn increment_if_below(
        &self,
        day: NaiveDate,
        max: u32,
    ) -> impl Future<Output = Result<bool, RepositoryError>> + Send;
}

/// Housekeeping operations.
pub trait MaintenanceRepository: Send + Sync {
    fn table_stats(&self) -> impl Future<Output = Result<Vec<TableStat>, RepositoryError>> + Send;

    fn vacuum(&self) -> impl Future<Output = Result<(), RepositoryError>> + Send;

    /// Delete conversation rows (limiter state and turns) not touched since
    /// `cutoff`. Plugin data is never pruned here.
    fn prune_older_than(
        &self,
        cutoff: DateTime<Utc>,
    ) -> impl Future<Output = Result<u64, RepositoryError>> + Send;

    /// Delete all conversation rows regardless of age.
    fn purge_conversations(&self) -> impl Future<Output = Result<u64, RepositoryError>> + Send;
}

/// Everything the bot persists, bundled so components need one type parameter.
pub trait Store:
    ConversationRepository + PluginDataStore + QuotaRepository + MaintenanceRepository + 'static
{
}

impl<T> Store for T where
    T: ConversationRepository + PluginDataStore + QuotaRepository + MaintenanceRepository + 'static
{
}
