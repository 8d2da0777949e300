//! Stream channel subscriptions.
//!
//! A [`SubscriptionSet`] is the set of timelines and antennas the bot wants
//! to be joined to. The `main` control channel is implicit: it is always part
//! of [`SubscriptionSet::channels`] and cannot be removed.

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};

/// The four public timelines a Misskey instance streams.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Timeline {
    Home,
    Local,
    Hybrid,
    Global,
}

impl Timeline {
    pub const ALL: [Timeline; 4] = [
        Timeline::Home,
        Timeline::Local,
        Timeline::Hybrid,
        Timeline::Global,
    ];

    /// Streaming channel name on the wire.
    pub fn channel_name(&self) -> &'static str {
        match self {
            Timeline::Home => "homeTimeline",
            Timeline::Local => "localTimeline",
            Timeline::Hybrid => "hybridTimeline",
            Timeline::Global => "globalTimeline",
        }
    }

    pub fn short_name(&self) -> &'static str {
        match self {
            Timeline::Home => "home",
            Timeline::Local => "local",
            Timeline::Hybrid => "hybrid",
            Timeline::Global => "global",
        }
    }

    /// Accepts both the short name (`home`) and the channel name (`homeTimeline`),
    /// case-insensitively.
    pub fn parse(s: &str) -> Option<Self> {
        let lower = s.trim().to_lowercase();
        Timeline::ALL
            .into_iter()
            .find(|t| t.short_name() == lower || t.channel_name().to_lowercase() == lower)
    }
}

impl fmt::Display for Timeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.short_name())
    }
}

/// A joinable stream channel.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Channel {
    /// Control channel: mentions, chat, notifications.
    Main,
    Timeline(Timeline),
    Antenna(String),
}

impl Channel {
    pub fn wire_name(&self) -> &'static str {
        match self {
            Channel::Main => "main",
            Channel::Timeline(t) => t.channel_name(),
            Channel::Antenna(_) => "antenna",
        }
    }

    /// Connect parameters sent alongside the channel name.
    pub fn params(&self) -> serde_json::Value {
        match self {
            Channel::Antenna(id) => serde_json::json!({ "antennaId": id }),
            _ => serde_json::json!({}),
        }
    }

    pub fn is_control(&self) -> bool {
        matches!(self, Channel::Main)
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Channel::Antenna(id) => write!(f, "antenna:{id}"),
            other => f.write_str(other.wire_name()),
        }
    }
}

/// The currently desired channel set.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscriptionSet {
    pub timelines: BTreeSet<Timeline>,
    pub antennas: BTreeSet<String>,
}

impl SubscriptionSet {
    pub fn new(
        timelines: impl IntoIterator<Item = Timeline>,
        antennas: impl IntoIterator<Item = String>,
    ) -> Self {
        Self {
            timelines: timelines.into_iter().collect(),
            antennas: antennas
                .into_iter()
                .map(|a| a.trim().to_string())
                .filter(|a| !a.is_empty())
                .collect(),
        }
    }

    /// All channels to join, control channel first.
    pub fn channels(&self) -> Vec<Channel> {
        let mut out = vec![Channel::Main];
        out.extend(self.timelines.iter().copied().map(Channel::Timeline));
        out.extend(self.antennas.iter().cloned().map(Channel::Antenna));
        out
    }

    /// True if nothing beyond the control channel is subscribed.
    pub fn is_control_only(&self) -> bool {
        self.timelines.is_empty() && self.antennas.is_empty()
    }

    /// Channels present in `self` but not in `other`.
    pub fn missing_from(&self, other: &SubscriptionSet) -> Vec<Channel> {
        let theirs: BTreeSet<Channel> = other.channels().into_iter().collect();
        self.channels()
            .into_iter()
            .filter(|c| !theirs.contains(c))
            .collect()
    }
}
