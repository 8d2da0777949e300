//! Shared agent state.
//!
//! One [`Agent`] is built at startup and handed (behind an `Arc`) to the
//! response pipeline, the command interpreter and the auto-poster. Every
//! field is either immutable or guards its own mutation, so there is no
//! outer lock.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use chrono::{DateTime, Utc};

use skylark_types::config::{CommandConfig, PersonaConfig};
use skylark_types::user::UserRef;

use crate::clock::Clock;
use crate::llm::box_provider::BoxLlmProvider;
use crate::model::ModelSelector;
use crate::pipeline::locks::UserLocks;
use crate::plugin::PluginRuntime;
use crate::policy::engine::PolicyEngine;
use crate::policy::lists::UserList;
use crate::storage::Store;
use crate::stream::StreamStatus;
use crate::stream::dedup::DedupCache;
use crate::subscription::SubscriptionManager;
use crate::transport::box_transport::BoxTransport;

/// The bot's own account.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BotIdentity {
    pub id: String,
    pub username: Option<String>,
}

impl BotIdentity {
    pub fn from_user(user: &UserRef) -> Self {
        Self {
            id: user.id.clone(),
            username: user.username.clone(),
        }
    }

    /// True if `token` (`@name` or `@name@host`) addresses the bot.
    pub fn is_mention_token(&self, token: &str) -> bool {
        let Some(username) = self.username.as_deref() else {
            return false;
        };
        let Some(rest) = token.strip_prefix('@') else {
            return false;
        };
        let name = rest.split('@').next().unwrap_or(rest);
        let name = name.trim_end_matches(|c: char| !c.is_alphanumeric() && c != '_');
        name.eq_ignore_ascii_case(username)
    }

    pub fn is_mentioned_in(&self, text: &str) -> bool {
        text.split_whitespace().any(|t| self.is_mention_token(t))
    }

    /// `text` with every token addressing the bot removed.
    pub fn strip_mentions(&self, text: &str) -> String {
        text.lines()
            .map(|line| {
                line.split_whitespace()
                    .filter(|t| !self.is_mention_token(t))
                    .collect::<Vec<_>>()
                    .join(" ")
            })
            .filter(|line| !line.is_empty())
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// Runtime on/off toggles flipped by operator commands.
#[derive(Debug)]
pub struct Switches {
    chat: AtomicBool,
    mention: AtomicBool,
    autopost: AtomicBool,
}

/// A toggle name as used by the `chat|mention|autopost on|off` commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Switch {
    Chat,
    Mention,
    AutoPost,
}

impl Switch {
    pub fn label(&self) -> &'static str {
        match self {
            Switch::Chat => "chat replies",
            Switch::Mention => "mention replies",
            Switch::AutoPost => "auto-post",
        }
    }
}

impl Switches {
    pub fn new(chat: bool, mention: bool, autopost: bool) -> Self {
        Self {
            chat: AtomicBool::new(chat),
            mention: AtomicBool::new(mention),
            autopost: AtomicBool::new(autopost),
        }
    }

    fn flag(&self, switch: Switch) -> &AtomicBool {
        match switch {
            Switch::Chat => &self.chat,
            Switch::Mention => &self.mention,
            Switch::AutoPost => &self.autopost,
        }
    }

    pub fn get(&self, switch: Switch) -> bool {
        self.flag(switch).load(Ordering::Relaxed)
    }

    /// Returns the previous value.
    pub fn set(&self, switch: Switch, on: bool) -> bool {
        self.flag(switch).swap(on, Ordering::Relaxed)
    }
}

/// Everything the pipeline, commands and auto-poster share.
pub struct Agent<S: Store> {
    pub store: Arc<S>,
    pub clock: Arc<dyn Clock>,
    pub policy: Arc<PolicyEngine<S>>,
    pub plugins: Arc<PluginRuntime>,
    pub subscriptions: Arc<SubscriptionManager>,
    pub transport: Arc<BoxTransport>,
    pub llm: Arc<BoxLlmProvider>,
    pub model: Arc<ModelSelector<S>>,
    pub locks: Arc<UserLocks>,
    pub dedup: Arc<DedupCache>,
    pub stream: Arc<StreamStatus>,
    pub switches: Arc<Switches>,
    pub persona: PersonaConfig,
    pub commands: CommandConfig,
    /// Parsed `commands.allowed_users`.
    pub operators: UserList,
    pub bot: BotIdentity,
    /// Host of the bot's own instance.
    pub local_host: Option<String>,
    pub started_at: DateTime<Utc>,
}

impl<S: Store> Agent<S> {
    /// True if `user` may issue operator commands.
    pub fn is_operator(&self, user: &UserRef) -> bool {
        self.operators
            .matches(&user.candidates(self.local_host.as_deref()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bot() -> BotIdentity {
        BotIdentity {
            id: "bot1".into(),
            username: Some("Skylark".into()),
        }
    }

    #[test]
    fn mention_tokens_match_local_and_remote_spellings() {
        let bot = bot();
        assert!(bot.is_mention_token("@skylark"));
        assert!(bot.is_mention_token("@Skylark@home.social"));
        assert!(bot.is_mention_token("@skylark,"));
        assert!(!bot.is_mention_token("@skylarks"));
        assert!(!bot.is_mention_token("skylark"));
    }

    #[test]
    fn strip_mentions_keeps_other_text_and_lines() {
        let bot = bot();
        assert_eq!(bot.strip_mentions("@skylark hello @alice\nsecond line"), "hello @alice\nsecond line");
        assert_eq!(bot.strip_mentions("@skylark"), "");
        assert!(bot.is_mentioned_in("hey @skylark what's up"));
    }

    #[test]
    fn switches_report_previous_value() {
        let switches = Switches::new(true, true, false);
        assert!(switches.set(Switch::Chat, false));
        assert!(!switches.get(Switch::Chat));
        assert!(!switches.set(Switch::AutoPost, true));
        assert!(switches.get(Switch::AutoPost));
    }
}
