//! Per-user rate/turn limiter and conversation memory.
//!
//! `authorize` evaluates, in order: deny-list, allow-list (short-circuits),
//! turn limit, rate limit. Release deadlines are compared against the clock
//! at check time; there are no background timers. State is cached in a
//! `DashMap` bounded by capacity and idle TTL, and written through to the
//! store, which reloads it on a miss. Callers serialize calls for the same
//! user (see [`crate::pipeline::locks::UserLocks`]).

use std::sync::{Arc, RwLock};
use std::time::Duration as StdDuration;

use chrono::Duration;
use dashmap::DashMap;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use skylark_types::config::{LimitDuration, ResponseConfig, TurnLimit};
use skylark_types::conversation::{ConversationState, LimitState, ReleaseDeadline, Turn, TurnWindow};
use skylark_types::error::RepositoryError;
use skylark_types::event::Surface;
use skylark_types::user::{UserKey, UserRef};

use super::lists::{ListKind, UserList};
use crate::clock::Clock;
use crate::storage::{CONTROL_NAMESPACE, Store};

/// Limiter settings, fixed at startup.
#[derive(Debug, Clone)]
pub struct PolicySettings {
    pub rate_limit: LimitDuration,
    pub max_turns: TurnLimit,
    pub release: LimitDuration,
    pub rate_limit_reply: String,
    pub max_turns_reply: String,
    /// Turn window length per user.
    pub memory: usize,
    /// Most users kept in the in-memory state cache.
    pub cache_capacity: usize,
    /// Cached state idle this long is dropped and reloaded from the store.
    pub cache_ttl: StdDuration,
}

pub const STATE_CACHE_CAPACITY: usize = 1024;
pub const STATE_CACHE_TTL: StdDuration = StdDuration::from_secs(3600);

impl PolicySettings {
    pub fn from_config(config: &ResponseConfig) -> Self {
        Self {
            rate_limit: config.rate_limit,
            max_turns: config.max_turns,
            release: config.max_turns_release,
            rate_limit_reply: config.rate_limit_reply.clone(),
            max_turns_reply: config.max_turns_reply.clone(),
            memory: config.chat_memory,
            cache_capacity: STATE_CACHE_CAPACITY,
            cache_ttl: STATE_CACHE_TTL,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DenyReason {
    DenyListed,
    RateLimited,
    TurnLimited,
}

/// Outcome of [`PolicyEngine::authorize`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    Allow,
    /// `reply` is the user-facing text; `None` means stay silent.
    Deny {
        reason: DenyReason,
        reply: Option<String>,
    },
}

impl Decision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Decision::Allow)
    }
}

#[derive(Debug, Clone)]
struct CachedState {
    state: ConversationState,
    touched: Instant,
}

pub struct PolicyEngine<S> {
    store: Arc<S>,
    clock: Arc<dyn Clock>,
    settings: PolicySettings,
    /// Host of the bot's own instance, used to spell local users as `name@host`.
    local_host: Option<String>,
    configured_whitelist: UserList,
    configured_blacklist: UserList,
    whitelist: RwLock<UserList>,
    blacklist: RwLock<UserList>,
    states: DashMap<UserKey, CachedState>,
}

impl<S: Store> PolicyEngine<S> {
    pub fn new(
        store: Arc<S>,
        clock: Arc<dyn Clock>,
        settings: PolicySettings,
        whitelist: UserList,
        blacklist: UserList,
        local_host: Option<String>,
    ) -> Self {
        Self {
            store,
            clock,
            settings,
            local_host,
            whitelist: RwLock::new(whitelist.clone()),
            blacklist: RwLock::new(blacklist.clone()),
            configured_whitelist: whitelist,
            configured_blacklist: blacklist,
            states: DashMap::new(),
        }
    }

    pub fn settings(&self) -> &PolicySettings {
        &self.settings
    }

    // -----------------------------------------------------------------------
    // Authorization
    // -----------------------------------------------------------------------

    pub async fn authorize(&self, user: &UserRef, surface: Surface) -> Decision {
        let candidates = user.candidates(self.local_host.as_deref());
        if self.list(ListKind::Blacklist).matches(&candidates) {
            debug!(user = %user.key(), %surface, "deny-listed user ignored");
            return Decision::Deny {
                reason: DenyReason::DenyListed,
                reply: None,
            };
        }
        if self.list(ListKind::Whitelist).matches(&candidates) {
            return Decision::Allow;
        }

        let key = user.key();
        let now = self.clock.now();
        let mut state = self.load_state(&key).await;
        let mut dirty = false;

        if let Some(ReleaseDeadline::At(deadline)) = state.limit.blocked_until {
            if now >= deadline {
                state.limit.turns = 0;
                state.limit.blocked_until = None;
                dirty = true;
                info!(user = %key, "turn limit released");
            }
        }

        let decision = if state.limit.is_blocked() {
            self.turn_limited()
        } else if self
            .settings
            .max_turns
            .get()
            .is_some_and(|max| state.limit.turns >= max)
        {
            state.limit.blocked_until = Some(match self.settings.release.secs() {
                Some(secs) => ReleaseDeadline::At(now + Duration::seconds(secs as i64)),
                None => ReleaseDeadline::Never,
            });
            dirty = true;
            info!(user = %key, turns = state.limit.turns, "turn limit reached");
            self.turn_limited()
        } else if let (Some(interval), Some(last)) =
            (self.settings.rate_limit.secs(), state.limit.last_response_at)
        {
            if interval > 0 && now - last < Duration::seconds(interval as i64) {
                debug!(user = %key, "rate limited");
                Decision::Deny {
                    reason: DenyReason::RateLimited,
                    reply: Some(self.settings.rate_limit_reply.clone()),
                }
            } else {
                Decision::Allow
            }
        } else {
            Decision::Allow
        };

        if dirty {
            self.persist_limit(&key, &state.limit).await;
        }
        self.cache(key, state);
        decision
    }

    fn turn_limited(&self) -> Decision {
        Decision::Deny {
            reason: DenyReason::TurnLimited,
            reply: Some(self.settings.max_turns_reply.clone()),
        }
    }

    /// Record a delivered response: stamps the last-response time and, when
    /// `count_turn` is set, counts it against the turn limit.
    pub async fn record_delivery(&self, user: &UserKey, count_turn: bool) {
        let mut state = self.load_state(user).await;
        state.limit.last_response_at = Some(self.clock.now());
        if count_turn {
            state.limit.turns = state.limit.turns.saturating_add(1);
        }
        self.persist_limit(user, &state.limit).await;
        self.cache(user.clone(), state);
    }

    /// Append one user/assistant exchange to the bounded turn window.
    pub async fn append_exchange(&self, user: &UserKey, prompt: &str, reply: &str) {
        let turns = [Turn::user(prompt), Turn::assistant(reply)];
        let mut state = self.load_state(user).await;
        for turn in turns.iter().cloned() {
            state.window.push(turn);
        }
        if let Err(e) = self
            .store
            .append_turns(user, &turns, self.settings.memory)
            .await
        {
            warn!(user = %user, error = %e, "failed to persist conversation turns");
        }
        self.cache(user.clone(), state);
    }

    /// The user's turn window, oldest first.
    pub async fn history(&self, user: &UserKey) -> Vec<Turn> {
        self.load_state(user).await.window.iter().cloned().collect()
    }

    pub async fn limit_state(&self, user: &UserKey) -> LimitState {
        self.load_state(user).await.limit
    }

    async fn load_state(&self, user: &UserKey) -> ConversationState {
        if let Some(cached) = self.states.get(user) {
            if cached.touched.elapsed() < self.settings.cache_ttl {
                return cached.state.clone();
            }
        }
        self.states.remove(user);
        let limit = match self.store.load_limit_state(user).await {
            Ok(state) => state.unwrap_or_default(),
            Err(e) => {
                warn!(user = %user, error = %e, "limit state unreadable, starting fresh");
                LimitState::default()
            }
        };
        let turns = match self.store.load_turns(user, self.settings.memory).await {
            Ok(turns) => turns,
            Err(e) => {
                warn!(user = %user, error = %e, "conversation turns unreadable, starting fresh");
                Vec::new()
            }
        };
        ConversationState {
            window: TurnWindow::from_turns(self.settings.memory, turns),
            limit,
        }
    }

    fn cache(&self, user: UserKey, state: ConversationState) {
        self.states.insert(
            user,
            CachedState {
                state,
                touched: Instant::now(),
            },
        );
        if self.states.len() > self.settings.cache_capacity {
            self.shrink_cache();
        }
    }

    /// Drop expired entries, then the least recently touched ones until the
    /// cache fits its capacity.
    fn shrink_cache(&self) {
        let ttl = self.settings.cache_ttl;
        self.states.retain(|_, cached| cached.touched.elapsed() < ttl);

        let excess = self.states.len().saturating_sub(self.settings.cache_capacity);
        if excess == 0 {
            return;
        }
        let mut by_age: Vec<(Instant, UserKey)> = self
            .states
            .iter()
            .map(|entry| (entry.touched, entry.key().clone()))
            .collect();
        by_age.sort_by_key(|(touched, _)| *touched);
        for (_, key) in by_age.into_iter().take(excess) {
            self.states.remove(&key);
        }
        debug!(evicted = excess, "conversation state cache trimmed");
    }

    async fn persist_limit(&self, user: &UserKey, limit: &LimitState) {
        if let Err(e) = self.store.save_limit_state(user, limit).await {
            warn!(user = %user, error = %e, "failed to persist limit state");
        }
    }

    // -----------------------------------------------------------------------
    // Cache management
    // -----------------------------------------------------------------------

    /// Users with state cached in memory.
    pub fn cached_users(&self) -> usize {
        self.states.len()
    }

    /// Forget conversation windows, in memory and in the store. Limiter
    /// counters are kept. Returns the number of cached users affected.
    pub async fn clear_memory(&self) -> Result<usize, RepositoryError> {
        let mut cleared = 0;
        for mut entry in self.states.iter_mut() {
            if !entry.state.window.is_empty() {
                cleared += 1;
            }
            entry.state.window.clear();
        }
        self.store.clear_turns(None).await?;
        Ok(cleared)
    }

    /// Drop the in-memory cache; state is reloaded from the store on demand.
    pub fn evict_cache(&self) -> usize {
        let n = self.states.len();
        self.states.clear();
        n
    }

    // -----------------------------------------------------------------------
    // Allow/deny lists
    // -----------------------------------------------------------------------

    pub fn list(&self, kind: ListKind) -> UserList {
        let lock = match kind {
            ListKind::Whitelist => &self.whitelist,
            ListKind::Blacklist => &self.blacklist,
        };
        lock.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    fn replace_list(&self, kind: ListKind, list: UserList) {
        let lock = match kind {
            ListKind::Whitelist => &self.whitelist,
            ListKind::Blacklist => &self.blacklist,
        };
        *lock.write().unwrap_or_else(|e| e.into_inner()) = list;
    }

    /// Replace a list and persist it as an operator override.
    pub async fn set_list(&self, kind: ListKind, list: UserList) -> Result<(), RepositoryError> {
        let encoded = serde_json::to_string(&list.to_vec())
            .map_err(|e| RepositoryError::Query(format!("failed to encode list: {e}")))?;
        self.store
            .set(CONTROL_NAMESPACE, kind.storage_key(), &encoded)
            .await?;
        self.replace_list(kind, list);
        Ok(())
    }

    /// Drop the override and restore the configured list.
    pub async fn reset_list(&self, kind: ListKind) -> Result<UserList, RepositoryError> {
        self.store
            .delete(CONTROL_NAMESPACE, Some(kind.storage_key()))
            .await?;
        let configured = match kind {
            ListKind::Whitelist => self.configured_whitelist.clone(),
            ListKind::Blacklist => self.configured_blacklist.clone(),
        };
        self.replace_list(kind, configured.clone());
        Ok(configured)
    }

    /// Apply persisted list overrides. Called once at startup.
    pub async fn load_overrides(&self) {
        for kind in [ListKind::Whitelist, ListKind::Blacklist] {
            match self.store.get(CONTROL_NAMESPACE, kind.storage_key()).await {
                Ok(Some(raw)) => match serde_json::from_str::<Vec<String>>(&raw) {
                    Ok(items) => {
                        let list = UserList::new(items);
                        info!(list = %kind, entries = list.len(), "applied list override");
                        self.replace_list(kind, list);
                    }
                    Err(e) => warn!(list = %kind, error = %e, "ignoring malformed list override"),
                },
                Ok(None) => {}
                Err(e) => warn!(list = %kind, error = %e, "failed to read list override"),
            }
        }
    }
}
