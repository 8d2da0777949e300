//! Allow and deny lists.

use std::collections::BTreeSet;
use std::fmt;

use skylark_types::user::UserKey;

/// Which list a command or lookup refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ListKind {
    /// Users that bypass every limiter check.
    Whitelist,
    /// Users that are never answered.
    Blacklist,
}

impl ListKind {
    /// Key under which a runtime override is persisted.
    pub fn storage_key(&self) -> &'static str {
        match self {
            ListKind::Whitelist => "whitelist",
            ListKind::Blacklist => "blacklist",
        }
    }
}

impl fmt::Display for ListKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.storage_key())
    }
}

/// A set of user spellings (`id`, `username`, `username@host`).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UserList {
    entries: BTreeSet<UserKey>,
}

impl UserList {
    pub fn new<I, S>(items: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            entries: items
                .into_iter()
                .map(|s| UserKey::new(s.as_ref()))
                .filter(|k| !k.is_empty())
                .collect(),
        }
    }

    /// True if any candidate spelling of a user is listed.
    pub fn matches(&self, candidates: &[UserKey]) -> bool {
        candidates.iter().any(|c| self.entries.contains(c))
    }

    pub fn contains(&self, key: &UserKey) -> bool {
        self.entries.contains(key)
    }

    pub fn add(&mut self, items: impl IntoIterator<Item = UserKey>) {
        self.entries.extend(items.into_iter().filter(|k| !k.is_empty()));
    }

    pub fn remove(&mut self, items: impl IntoIterator<Item = UserKey>) {
        for item in items {
            self.entries.remove(&item);
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn to_vec(&self) -> Vec<String> {
        self.entries.iter().map(|k| k.as_str().to_string()).collect()
    }
}
