//! KeyAct: fixed replies for exact keywords, bypassing the LLM.
//!
//! ```yaml
//! enabled: true
//! mention_enabled: true
//! chat_enabled: true
//! case_sensitive: false
//! rules:
//!   - keywords: ["ping", "在吗"]
//!     response: "pong"
//!   - keyword: "Help"
//!     response: "Try ^help"
//!     case_sensitive: true
//! ```
//!
//! Leading `@mention` tokens are stripped before matching and the whole
//! remaining text must equal a keyword. `mention_enabled` and `chat_enabled`
//! switch the plugin off for one surface.

use serde::Deserialize;

use skylark_core::plugin::{Plugin, PluginContext};
use skylark_types::error::PluginError;
use skylark_types::event::Surface;

#[derive(Debug, Clone, PartialEq, Eq)]
struct Rule {
    keywords: Vec<String>,
    response: String,
    case_sensitive: bool,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum Keywords {
    One(String),
    Many(Vec<String>),
}

#[derive(Deserialize)]
struct RawRule {
    #[serde(default)]
    keywords: Option<Keywords>,
    #[serde(default)]
    keyword: Option<Keywords>,
    #[serde(default)]
    response: Option<String>,
    #[serde(default)]
    case_sensitive: Option<bool>,
    #[serde(default = "enabled_default")]
    enabled: bool,
}

fn enabled_default() -> bool {
    true
}

impl RawRule {
    fn into_rule(self, default_case_sensitive: bool) -> Option<Rule> {
        if !self.enabled {
            return None;
        }
        let response = self.response?.trim().to_string();
        if response.is_empty() {
            return None;
        }
        let keywords: Vec<String> = match self.keywords.or(self.keyword)? {
            Keywords::One(k) => vec![k],
            Keywords::Many(ks) => ks,
        }
        .into_iter()
        .map(|k| k.trim().to_string())
        .filter(|k| !k.is_empty())
        .collect();
        if keywords.is_empty() {
            return None;
        }
        Some(Rule {
            keywords,
            response,
            case_sensitive: self.case_sensitive.unwrap_or(default_case_sensitive),
        })
    }
}

pub struct KeyActPlugin {
    name: String,
    mention_enabled: bool,
    chat_enabled: bool,
    rules: Vec<Rule>,
}

impl KeyActPlugin {
    pub fn new(ctx: PluginContext) -> Self {
        let default_case_sensitive = ctx.manifest.bool_setting("case_sensitive", false);
        let raw_rules = match ctx.manifest.settings.get("rules") {
            Some(serde_json::Value::Array(items)) => items.clone(),
            _ => Vec::new(),
        };

        let mut rules = Vec::with_capacity(raw_rules.len());
        for (index, item) in raw_rules.into_iter().enumerate() {
            match serde_json::from_value::<RawRule>(item) {
                Ok(raw) => {
                    if let Some(rule) = raw.into_rule(default_case_sensitive) {
                        rules.push(rule);
                    }
                }
                Err(e) => tracing::warn!(plugin = %ctx.name, index, error = %e, "ignoring keyact rule"),
            }
        }

        Self {
            mention_enabled: ctx.manifest.bool_setting("mention_enabled", true),
            chat_enabled: ctx.manifest.bool_setting("chat_enabled", true),
            name: ctx.name,
            rules,
        }
    }

    fn answers_on(&self, surface: Surface) -> bool {
        match surface {
            Surface::Mention => self.mention_enabled,
            Surface::Chat => self.chat_enabled,
            Surface::Timeline => false,
        }
    }

    fn find(&self, text: &str) -> Option<&str> {
        let cleaned = strip_mentions(text);
        if cleaned.is_empty() {
            return None;
        }
        let folded = cleaned.to_lowercase();
        self.rules
            .iter()
            .find(|rule| {
                rule.keywords.iter().any(|k| {
                    if rule.case_sensitive {
                        cleaned == *k
                    } else {
                        folded == k.to_lowercase()
                    }
                })
            })
            .map(|rule| rule.response.as_str())
    }
}

/// Drop `@user` / `@user@host` tokens and collapse whitespace.
fn strip_mentions(text: &str) -> String {
    text.split_whitespace()
        .filter(|token| !(token.starts_with('@') && token.len() > 1))
        .collect::<Vec<_>>()
        .join(" ")
}

impl Plugin for KeyActPlugin {
    fn description(&self) -> &str {
        "Fixed replies for exact keywords"
    }

    async fn initialize(&self) -> Result<(), PluginError> {
        tracing::info!(
            plugin = %self.name,
            rules = self.rules.len(),
            mention = self.mention_enabled,
            chat = self.chat_enabled,
            "keyact ready"
        );
        Ok(())
    }

    async fn keyword_match(
        &self,
        text: &str,
        surface: Surface,
    ) -> Result<Option<String>, PluginError> {
        if !self.answers_on(surface) {
            return Ok(None);
        }
        Ok(self.find(text).map(str::to_string))
    }
}
