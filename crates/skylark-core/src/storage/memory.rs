//! In-memory implementation of every store port.
//!
//! Used by the core test suites and anywhere a throwaway store is enough.
//! `set_failing(true)` makes every call return a query error so callers'
//! store-failure paths can be exercised.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, NaiveDate, Utc};

use skylark_types::conversation::{LimitState, Turn};
use skylark_types::error::RepositoryError;
use skylark_types::user::UserKey;

use super::{
    ConversationRepository, MaintenanceRepository, PluginDataStore, QuotaRepository, TableStat,
};

#[derive(Default)]
struct Inner {
    limits: HashMap<UserKey, (LimitState, DateTime<Utc>)>,
    turns: HashMap<UserKey, Vec<(Turn, DateTime<Utc>)>>,
    plugin_data: BTreeMap<(String, String), String>,
    quota: HashMap<NaiveDate, u32>,
}

#[derive(Clone, Default)]
pub struct MemoryStore {
    inner: Arc<Mutex<Inner>>,
    failing: Arc<AtomicBool>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    fn lock(&self) -> Result<MutexGuard<'_, Inner>, RepositoryError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(RepositoryError::Query("store unavailable".to_string()));
        }
        Ok(self.inner.lock().unwrap_or_else(|e| e.into_inner()))
    }
}

impl ConversationRepository for MemoryStore {
    async fn load_limit_state(&self, user: &UserKey) -> Result<Option<LimitState>, RepositoryError> {
        Ok(self.lock()?.limits.get(user).map(|(s, _)| s.clone()))
    }

    async fn save_limit_state(
        &self,
        user: &UserKey,
        state: &LimitState,
    ) -> Result<(), RepositoryError> {
        self.lock()?
            .limits
            .insert(user.clone(), (state.clone(), Utc::now()));
        Ok(())
    }

    async fn load_turns(&self, user: &UserKey, limit: usize) -> Result<Vec<Turn>, RepositoryError> {
        let inner = self.lock()?;
        let turns = inner.turns.get(user).map(Vec::as_slice).unwrap_or_default();
        let skip = turns.len().saturating_sub(limit);
        Ok(turns.iter().skip(skip).map(|(t, _)| t.clone()).collect())
    }

    async fn append_turns(
        &self,
        user: &UserKey,
        turns: &[Turn],
        keep: usize,
    ) -> Result<(), RepositoryError> {
        let mut inner = self.lock()?;
        let now = Utc::now();
        let stored = inner.turns.entry(user.clone()).or_default();
        stored.extend(turns.iter().cloned().map(|t| (t, now)));
        let excess = stored.len().saturating_sub(keep);
        stored.drain(..excess);
        Ok(())
    }

    async fn clear_turns(&self, user: Option<&UserKey>) -> Result<u64, RepositoryError> {
        let mut inner = self.lock()?;
        let removed = match user {
            Some(user) => inner.turns.remove(user).map(|v| v.len()).unwrap_or(0),
            None => inner.turns.drain().map(|(_, v)| v.len()).sum(),
        };
        Ok(removed as u64)
    }
}

impl PluginDataStore for MemoryStore {
    async fn get(&self, plugin: &str, key: &str) -> Result<Option<String>, RepositoryError> {
        Ok(self
            .lock()?
            .plugin_data
            .get(&(plugin.to_string(), key.to_string()))
            .cloned())
    }

    async fn set(&self, plugin: &str, key: &str, value: &str) -> Result<(), RepositoryError> {
        self.lock()?
            .plugin_data
            .insert((plugin.to_string(), key.to_string()), value.to_string());
        Ok(())
    }

    async fn delete(&self, plugin: &str, key: Option<&str>) -> Result<u64, RepositoryError> {
        let mut inner = self.lock()?;
        let before = inner.plugin_data.len();
        inner
            .plugin_data
            .retain(|(p, k), _| !(p == plugin && key.is_none_or(|key| key == k)));
        Ok((before - inner.plugin_data.len()) as u64)
    }

    async fn list_keys(&self, plugin: &str) -> Result<Vec<String>, RepositoryError> {
        Ok(self
            .lock()?
            .plugin_data
            .keys()
            .filter(|(p, _)| p == plugin)
            .map(|(_, k)| k.clone())
            .collect())
    }
}

impl QuotaRepository for MemoryStore {
    async fn count_for(&self, day: NaiveDate) -> Result<u32, RepositoryError> {
        Ok(self.lock()?.quota.get(&day).copied().unwrap_or(0))
    }

    async fn increment_if_below(&self, day: NaiveDate, max: u32) -> Result<bool, RepositoryError> {
        let mut inner = self.lock()?;
        let count = inner.quota.entry(day).or_insert(0);
        if *count >= max {
            return Ok(false);
        }
        *count += 1;
        Ok(true)
    }
}

impl MaintenanceRepository for MemoryStore {
    async fn table_stats(&self) -> Result<Vec<TableStat>, RepositoryError> {
        let inner = self.lock()?;
        Ok(vec![
            TableStat {
                name: "conversation_turns".into(),
                rows: inner.turns.values().map(Vec::len).sum::<usize>() as i64,
            },
            TableStat {
                name: "plugin_data".into(),
                rows: inner.plugin_data.len() as i64,
            },
            TableStat {
                name: "post_quota".into(),
                rows: inner.quota.len() as i64,
            },
            TableStat {
                name: "response_limit_state".into(),
                rows: inner.limits.len() as i64,
            },
        ])
    }

    async fn vacuum(&self) -> Result<(), RepositoryError> {
        self.lock().map(|_| ())
    }

    async fn prune_older_than(&self, cutoff: DateTime<Utc>) -> Result<u64, RepositoryError> {
        let mut inner = self.lock()?;
        let before_limits = inner.limits.len();
        inner.limits.retain(|_, (_, updated)| *updated >= cutoff);
        let mut removed = (before_limits - inner.limits.len()) as u64;
        for turns in inner.turns.values_mut() {
            let before = turns.len();
            turns.retain(|(_, at)| *at >= cutoff);
            removed += (before - turns.len()) as u64;
        }
        inner.turns.retain(|_, v| !v.is_empty());
        Ok(removed)
    }

    async fn purge_conversations(&self) -> Result<u64, RepositoryError> {
        let mut inner = self.lock()?;
        let removed = inner.limits.len() + inner.turns.values().map(Vec::len).sum::<usize>();
        inner.limits.clear();
        inner.turns.clear();
        Ok(removed as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[tokio::test]
    async fn turns_are_trimmed_to_keep() {
        let store = MemoryStore::new();
        let user = UserKey::new("u1");
        let batch: Vec<Turn> = (0..6).map(|i| Turn::user(i.to_string())).collect();
        store.append_turns(&user, &batch, 4).await.unwrap();
        let turns = store.load_turns(&user, 10).await.unwrap();
        assert_eq!(turns.len(), 4);
        assert_eq!(turns[0].text, "2");
        let newest = store.load_turns(&user, 2).await.unwrap();
        assert_eq!(newest[1].text, "5");
    }

    #[tokio::test]
    async fn plugin_delete_scoped_by_key_and_plugin() {
        let store = MemoryStore::new();
        store.set("topics", "a", "1").await.unwrap();
        store.set("topics", "b", "2").await.unwrap();
        store.set("radar", "a", "3").await.unwrap();
        assert_eq!(store.delete("topics", Some("a")).await.unwrap(), 1);
        assert_eq!(store.delete("topics", None).await.unwrap(), 1);
        assert_eq!(store.get("radar", "a").await.unwrap().as_deref(), Some("3"));
    }

    #[tokio::test]
    async fn quota_increment_stops_at_max() {
        let store = MemoryStore::new();
        let day = NaiveDate::from_ymd_opt(2026, 5, 1).unwrap();
        assert!(store.increment_if_below(day, 2).await.unwrap());
        assert!(store.increment_if_below(day, 2).await.unwrap());
        assert!(!store.increment_if_below(day, 2).await.unwrap());
        assert_eq!(store.count_for(day).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn prune_spares_plugin_data() {
        let store = MemoryStore::new();
        let user = UserKey::new("u1");
        store.save_limit_state(&user, &LimitState::default()).await.unwrap();
        store.append_turns(&user, &[Turn::user("x")], 10).await.unwrap();
        store.set("topics", "last_used_line", "3").await.unwrap();
        let removed = store
            .prune_older_than(Utc::now() + Duration::minutes(1))
            .await
            .unwrap();
        assert_eq!(removed, 2);
        assert!(store.get("topics", "last_used_line").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn failing_store_returns_errors() {
        let store = MemoryStore::new();
        store.set_failing(true);
        assert!(store.get("x", "y").await.is_err());
    }
}
