//! Per-user sequencing locks.
//!
//! The worker pool already keeps one user's events on one shard; these locks
//! additionally serialize authorize-and-record for a user across every path
//! that touches their state (worker shards, commands clearing memory).
//! Idle locks are pruned whenever the map reaches its capacity.

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};

use skylark_types::user::UserKey;

/// Lock count that triggers a prune of idle locks.
pub const DEFAULT_LOCK_CAPACITY: usize = 1024;

#[derive(Debug)]
pub struct UserLocks {
    locks: DashMap<UserKey, Arc<Mutex<()>>>,
    capacity: usize,
}

impl Default for UserLocks {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_LOCK_CAPACITY)
    }
}

impl UserLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            locks: DashMap::new(),
            capacity: capacity.max(1),
        }
    }

    /// Wait for exclusive access to `key`'s state.
    pub async fn lock(&self, key: &UserKey) -> OwnedMutexGuard<()> {
        if self.locks.len() >= self.capacity && !self.locks.contains_key(key) {
            self.clear_idle();
        }
        let lock = self.locks.entry(key.clone()).or_default().clone();
        lock.lock_owned().await
    }

    pub fn len(&self) -> usize {
        self.locks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }

    /// Drop locks nobody holds or waits on. Returns how many were removed.
    pub fn clear_idle(&self) -> usize {
        let before = self.locks.len();
        self.locks.retain(|_, lock| Arc::strong_count(lock) > 1);
        before - self.locks.len()
    }
}
