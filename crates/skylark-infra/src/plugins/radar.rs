//! Radar: react to, reply to, quote or renote interesting timeline notes.
//!
//! A note is interesting when it passes every configured filter:
//! - `include_users` / `exclude_users`: `username` or `username@host`
//! - `include_keywords` / `exclude_keywords`: one group per line (or list
//!   item); a group matches when all of its space-separated tokens occur
//! - `include_bot_users` (default false), `allow_attachments` (default true)
//!
//! Without any user or keyword filter the plugin stays idle. Each note is
//! acted on at most once within `dedupe_ttl_seconds`.
//!
//! Actions run in order: `reaction`, reply (`reply_enabled` with
//! `reply_text` or `reply_ai`), quote (`quote_enabled` with `quote_text`
//! or `quote_ai`), and renote (`renote_enabled`) when no quote was made.

use std::collections::HashSet;
use std::time::Duration;

use skylark_core::plugin::{Plugin, PluginContext};
use skylark_core::stream::dedup::DedupCache;
use skylark_types::error::PluginError;
use skylark_types::event::{Note, Visibility};
use skylark_types::llm::GenerateRequest;
use skylark_types::plugin::PluginManifest;
use skylark_types::subscription::Channel;
use skylark_types::user::UserKey;

const DEFAULT_REPLY_PROMPT: &str =
    "根据帖子内容写一句自然回复，不要复述原文，不要加引号，不超过30字：\n{content}";
const DEFAULT_QUOTE_PROMPT: &str =
    "根据帖子内容写一句简短感想，不要复述原文，不要加引号，不超过30字：\n{content}";

struct TextAction {
    enabled: bool,
    text: Option<String>,
    ai: bool,
    ai_prompt: String,
}

impl TextAction {
    fn from_manifest(m: &PluginManifest, prefix: &str, default_prompt: &str) -> Self {
        Self {
            enabled: m.bool_setting(&format!("{prefix}_enabled"), false),
            text: m.str_setting(&format!("{prefix}_text")).map(str::to_string),
            ai: m.bool_setting(&format!("{prefix}_ai"), false),
            ai_prompt: m
                .str_setting(&format!("{prefix}_ai_prompt"))
                .unwrap_or(default_prompt)
                .to_string(),
        }
    }
}

pub struct RadarPlugin {
    ctx: PluginContext,
    include_users: HashSet<UserKey>,
    exclude_users: HashSet<UserKey>,
    case_sensitive: bool,
    include_groups: Vec<Vec<String>>,
    exclude_groups: Vec<Vec<String>>,
    allow_attachments: bool,
    include_bot_users: bool,
    reaction: Option<String>,
    reply: TextAction,
    quote: TextAction,
    quote_visibility: Option<Visibility>,
    renote_enabled: bool,
    renote_visibility: Option<Visibility>,
    seen: DedupCache,
}

impl RadarPlugin {
    pub fn new(ctx: PluginContext) -> Self {
        let m = &ctx.manifest;
        let case_sensitive = m.bool_setting("keyword_case_sensitive", false);
        let users = |key: &str| -> HashSet<UserKey> {
            m.list_setting(key)
                .iter()
                .map(|u| UserKey::new(u))
                .filter(|k| !k.is_empty())
                .collect()
        };
        let capacity = usize::try_from(m.int_setting("dedupe_maxsize", 2000)).unwrap_or(2000);
        let ttl = u64::try_from(m.int_setting("dedupe_ttl_seconds", 600)).unwrap_or(600);

        Self {
            include_users: users("include_users"),
            exclude_users: users("exclude_users"),
            include_groups: keyword_groups(m.settings.get("include_keywords"), case_sensitive),
            exclude_groups: keyword_groups(m.settings.get("exclude_keywords"), case_sensitive),
            case_sensitive,
            allow_attachments: m.bool_setting("allow_attachments", true),
            include_bot_users: m.bool_setting("include_bot_users", false),
            reaction: m.str_setting("reaction").map(str::to_string),
            reply: TextAction::from_manifest(m, "reply", DEFAULT_REPLY_PROMPT),
            quote: TextAction::from_manifest(m, "quote", DEFAULT_QUOTE_PROMPT),
            quote_visibility: post_visibility(m.str_setting("quote_visibility")),
            renote_enabled: m.bool_setting("renote_enabled", false),
            renote_visibility: post_visibility(m.str_setting("renote_visibility")),
            seen: DedupCache::new(capacity, Duration::from_secs(ttl)),
            ctx,
        }
    }

    fn has_filter(&self) -> bool {
        !(self.include_users.is_empty()
            && self.exclude_users.is_empty()
            && self.include_groups.is_empty()
            && self.exclude_groups.is_empty())
    }

    fn matches_groups(&self, text: &str, groups: &[Vec<String>]) -> bool {
        let haystack = if self.case_sensitive {
            text.to_string()
        } else {
            text.to_lowercase()
        };
        groups
            .iter()
            .any(|group| group.iter().all(|token| haystack.contains(token.as_str())))
    }

    fn should_process(&self, note: &Note) -> bool {
        if !self.has_filter() {
            return false;
        }
        if note.user.is_bot && !self.include_bot_users {
            return false;
        }
        let variants: HashSet<UserKey> = note.user.candidates(None).into_iter().collect();
        if !self.include_users.is_empty() && variants.is_disjoint(&self.include_users) {
            return false;
        }
        if !variants.is_disjoint(&self.exclude_users) {
            return false;
        }
        if !self.allow_attachments && note.has_attachments() {
            return false;
        }
        let text = note.effective_text();
        if !self.include_groups.is_empty() && !self.matches_groups(&text, &self.include_groups) {
            return false;
        }
        if self.matches_groups(&text, &self.exclude_groups) {
            return false;
        }
        true
    }

    async fn action_text(&self, action: &TextAction, note: &Note) -> Option<String> {
        if let Some(template) = &action.text {
            let username = note
                .user
                .username
                .as_deref()
                .map(str::trim)
                .filter(|u| !u.is_empty())
                .unwrap_or("unknown");
            let text = template.replace("{username}", username);
            if !text.trim().is_empty() {
                return Some(text.trim().to_string());
            }
        }
        if !action.ai {
            return None;
        }
        let content = note.effective_text();
        if content.is_empty() {
            return None;
        }
        let request = GenerateRequest::new(action.ai_prompt.replace("{content}", &content))
            .with_system(self.ctx.system_prompt.clone());
        match self.ctx.llm.generate(&request).await {
            Ok(text) if !text.trim().is_empty() => Some(text.trim().to_string()),
            Ok(_) => None,
            Err(e) => {
                tracing::warn!(plugin = %self.ctx.name, note_id = %note.id, error = %e, "radar text generation failed");
                None
            }
        }
    }

    async fn act(&self, channel: &Channel, note: &Note) {
        let transport = &self.ctx.transport;

        if let Some(reaction) = &self.reaction {
            if note.my_reaction.is_none() {
                match transport.react(&note.id, reaction).await {
                    Ok(()) => tracing::info!(note_id = %note.id, %channel, reaction = %reaction, "radar reacted"),
                    Err(e) => tracing::warn!(note_id = %note.id, error = %e, "radar reaction failed"),
                }
            }
        }

        if self.reply.enabled {
            if let Some(text) = self.action_text(&self.reply, note).await {
                match transport.reply(&note.id, &text).await {
                    Ok(_) => tracing::info!(note_id = %note.id, %channel, "radar replied"),
                    Err(e) => tracing::warn!(note_id = %note.id, error = %e, "radar reply failed"),
                }
            }
        }

        let mut quoted = false;
        if self.quote.enabled {
            if let Some(text) = self.action_text(&self.quote, note).await {
                match transport.quote(&note.id, &text, self.quote_visibility).await {
                    Ok(_) => {
                        quoted = true;
                        tracing::info!(note_id = %note.id, %channel, "radar quoted");
                    }
                    Err(e) => tracing::warn!(note_id = %note.id, error = %e, "radar quote failed"),
                }
            }
        }

        if self.renote_enabled && !quoted {
            match transport.repost(&note.id, self.renote_visibility).await {
                Ok(_) => tracing::info!(note_id = %note.id, %channel, "radar renoted"),
                Err(e) => tracing::warn!(note_id = %note.id, error = %e, "radar renote failed"),
            }
        }
    }
}

fn keyword_groups(value: Option<&serde_json::Value>, case_sensitive: bool) -> Vec<Vec<String>> {
    let lines: Vec<String> = match value {
        Some(serde_json::Value::String(s)) => s.lines().map(str::to_string).collect(),
        Some(serde_json::Value::Array(items)) => items
            .iter()
            .filter_map(|v| match v {
                serde_json::Value::String(s) => Some(s.clone()),
                serde_json::Value::Number(n) => Some(n.to_string()),
                _ => None,
            })
            .collect(),
        _ => Vec::new(),
    };
    lines
        .iter()
        .map(|line| {
            line.split_whitespace()
                .map(|t| if case_sensitive { t.to_string() } else { t.to_lowercase() })
                .collect::<Vec<_>>()
        })
        .filter(|group| !group.is_empty())
        .collect()
}

/// Only visibilities a renote or quote may carry.
fn post_visibility(value: Option<&str>) -> Option<Visibility> {
    Visibility::parse(value?).filter(|v| *v != Visibility::Specified)
}

impl Plugin for RadarPlugin {
    fn description(&self) -> &str {
        "Timeline interaction on matching notes"
    }

    async fn on_timeline_note(&self, channel: &Channel, note: &Note) -> Result<bool, PluginError> {
        if note.id.is_empty() || !self.should_process(note) {
            return Ok(false);
        }
        if !self.seen.observe(&note.id) {
            return Ok(false);
        }
        self.act(channel, note).await;
        Ok(true)
    }
}
