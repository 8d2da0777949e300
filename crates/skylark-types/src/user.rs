//! Remote actor identity.
//!
//! A [`UserKey`] is the stable join key for rate/turn state and conversation
//! windows. A [`UserRef`] is what the stream tells us about an actor and knows
//! how to expand itself into the candidate spellings an operator might put in
//! an allow/deny list.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Stable identifier for a remote actor across sessions.
///
/// Either an instance-local opaque id or a `username@host` handle. Always
/// stored trimmed, lowercased and without a leading `@`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserKey(String);

impl UserKey {
    pub fn new(raw: &str) -> Self {
        Self(raw.trim().trim_start_matches('@').to_lowercase())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for UserKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for UserKey {
    fn from(raw: &str) -> Self {
        Self::new(raw)
    }
}

/// A remote actor as described by an inbound event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserRef {
    pub id: String,
    pub username: Option<String>,
    /// `None` for accounts on the bot's own instance.
    pub host: Option<String>,
    #[serde(default)]
    pub is_bot: bool,
}

impl UserRef {
    /// The key used for per-user state. Keyed by id so renames do not reset limits.
    pub fn key(&self) -> UserKey {
        UserKey::new(&self.id)
    }

    /// `@username` for local accounts, `@username@host` for remote ones.
    pub fn mention(&self) -> Option<String> {
        let username = self.username.as_deref()?.trim();
        if username.is_empty() {
            return None;
        }
        Some(match self.host.as_deref() {
            Some(host) if !host.trim().is_empty() => format!("@{username}@{}", host.trim()),
            _ => format!("@{username}"),
        })
    }

    /// Every spelling of this actor that may appear in an allow/deny list:
    /// the id, `username`, `@username`, and `username@host` (the local
    /// instance host is used for local accounts).
    pub fn candidates(&self, local_host: Option<&str>) -> Vec<UserKey> {
        let mut out = vec![UserKey::new(&self.id)];
        if let Some(username) = self.username.as_deref().map(str::trim).filter(|u| !u.is_empty()) {
            out.push(UserKey::new(username));
            let host = self
                .host
                .as_deref()
                .map(str::trim)
                .filter(|h| !h.is_empty())
                .or(local_host);
            if let Some(host) = host {
                out.push(UserKey::new(&format!("{username}@{host}")));
            }
        }
        out.dedup();
        out
    }

    pub fn display_name(&self) -> &str {
        self.username.as_deref().unwrap_or(&self.id)
    }
}
