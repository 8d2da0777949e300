//! Per-user conversation state: the bounded turn window and the rate/turn
//! limiter counters.

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Who produced a turn in the conversation window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TurnRole {
    User,
    Assistant,
}

impl TurnRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            TurnRole::User => "user",
            TurnRole::Assistant => "assistant",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "user" => Some(TurnRole::User),
            "assistant" => Some(TurnRole::Assistant),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Turn {
    pub role: TurnRole,
    pub text: String,
}

impl Turn {
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: TurnRole::User,
            text: text.into(),
        }
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self {
            role: TurnRole::Assistant,
            text: text.into(),
        }
    }
}

/// Ordered, bounded sequence of turns. Pushing into a full window evicts the
/// oldest entry first.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TurnWindow {
    capacity: usize,
    turns: VecDeque<Turn>,
}

impl TurnWindow {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            turns: VecDeque::with_capacity(capacity),
        }
    }

    /// Build a window from stored turns, keeping only the newest `capacity`.
    pub fn from_turns(capacity: usize, turns: impl IntoIterator<Item = Turn>) -> Self {
        let mut window = Self::new(capacity);
        for turn in turns {
            window.push(turn);
        }
        window
    }

    pub fn push(&mut self, turn: Turn) {
        if self.capacity == 0 {
            return;
        }
        while self.turns.len() >= self.capacity {
            self.turns.pop_front();
        }
        self.turns.push_back(turn);
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn iter(&self) -> impl Iterator<Item = &Turn> {
        self.turns.iter()
    }

    pub fn clear(&mut self) {
        self.turns.clear();
    }
}

/// When a turn-limited user is released again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReleaseDeadline {
    At(DateTime<Utc>),
    Never,
}

/// Rate/turn limiter counters for one user.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LimitState {
    /// Time of the last delivered response.
    pub last_response_at: Option<DateTime<Utc>>,
    /// Responses delivered since the last release.
    pub turns: u32,
    /// Set once the turn limit has been reached.
    pub blocked_until: Option<ReleaseDeadline>,
}

impl LimitState {
    pub fn is_blocked(&self) -> bool {
        self.blocked_until.is_some()
    }
}

/// Everything the policy engine tracks for a user.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConversationState {
    pub window: TurnWindow,
    pub limit: LimitState,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn window_evicts_oldest_first() {
        let mut window = TurnWindow::new(3);
        for i in 0..5 {
            window.push(Turn::user(format!("m{i}")));
        }
        assert_eq!(window.len(), 3);
        let texts: Vec<&str> = window.iter().map(|t| t.text.as_str()).collect();
        assert_eq!(texts, vec!["m2", "m3", "m4"]);
    }

    #[test]
    fn zero_capacity_window_stays_empty() {
        let mut window = TurnWindow::new(0);
        window.push(Turn::assistant("hi"));
        assert!(window.is_empty());
    }

    #[test]
    fn from_turns_keeps_newest() {
        let turns = (0..10).map(|i| Turn::user(i.to_string()));
        let window = TurnWindow::from_turns(4, turns);
        assert_eq!(window.iter().next().map(|t| t.text.as_str()), Some("6"));
    }

    #[test]
    fn turn_role_roundtrip_strings() {
        assert_eq!(TurnRole::parse("assistant"), Some(TurnRole::Assistant));
        assert_eq!(TurnRole::User.as_str(), "user");
        assert_eq!(TurnRole::parse("system"), None);
    }
}
