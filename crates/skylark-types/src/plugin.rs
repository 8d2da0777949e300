//! Plugin records, manifests and hook results.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::event::Visibility;

/// Settings read from a plugin's `config.yaml`.
///
/// `enabled` and `priority` are interpreted by the runtime; every other key
/// is passed through untouched for the plugin to interpret.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PluginManifest {
    #[serde(default)]
    pub enabled: bool,

    /// Higher priority hooks run first.
    #[serde(default)]
    pub priority: i32,

    #[serde(flatten)]
    pub settings: BTreeMap<String, serde_json::Value>,
}

impl PluginManifest {
    pub fn str_setting(&self, key: &str) -> Option<&str> {
        self.settings
            .get(key)
            .and_then(|v| v.as_str())
            .map(str::trim)
            .filter(|s| !s.is_empty())
    }

    pub fn bool_setting(&self, key: &str, default: bool) -> bool {
        match self.settings.get(key) {
            Some(serde_json::Value::Bool(b)) => *b,
            Some(serde_json::Value::Number(n)) => n.as_i64().map(|v| v != 0).unwrap_or(default),
            Some(serde_json::Value::String(s)) => match s.trim().to_lowercase().as_str() {
                "true" | "1" | "yes" | "y" | "on" => true,
                "false" | "0" | "no" | "n" | "off" => false,
                _ => default,
            },
            _ => default,
        }
    }

    pub fn int_setting(&self, key: &str, default: i64) -> i64 {
        match self.settings.get(key) {
            Some(serde_json::Value::Number(n)) => n.as_i64().unwrap_or(default),
            Some(serde_json::Value::String(s)) => s.trim().parse().unwrap_or(default),
            _ => default,
        }
    }

    /// A list setting given either as a YAML sequence or a comma/space separated string.
    pub fn list_setting(&self, key: &str) -> Vec<String> {
        match self.settings.get(key) {
            Some(serde_json::Value::Array(items)) => items
                .iter()
                .filter_map(|v| match v {
                    serde_json::Value::String(s) => Some(s.trim().to_string()),
                    serde_json::Value::Number(n) => Some(n.to_string()),
                    _ => None,
                })
                .filter(|s| !s.is_empty())
                .collect(),
            Some(serde_json::Value::String(s)) => s
                .replace(',', " ")
                .split_whitespace()
                .map(str::to_string)
                .collect(),
            _ => Vec::new(),
        }
    }
}

/// Runtime view of one discovered plugin.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PluginRecord {
    pub name: String,
    pub description: String,
    pub enabled: bool,
    pub priority: i32,
    pub last_error: Option<String>,
    pub loaded_at: DateTime<Utc>,
}

/// A plugin that took ownership of an inbound message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HookReply {
    pub plugin: String,
    /// Text to deliver back to the user. `None` means handled silently.
    pub response: Option<String>,
}

/// What a content-source plugin offers the auto-poster.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AutoPostContribution {
    /// Finished text, posted verbatim without an LLM call.
    Content {
        text: String,
        visibility: Option<Visibility>,
    },
    /// A prefix for the configured auto-post prompt.
    PromptPrefix {
        prompt: String,
        /// Overrides the `[<unix minutes>]` stamp when set.
        timestamp: Option<i64>,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn manifest_extracts_settings() {
        let json = serde_json::json!({
            "enabled": true,
            "priority": 5,
            "case_sensitive": "yes",
            "allowed": ["a", "b"],
            "users": "x, y z",
            "limit": "42",
        });
        let manifest: PluginManifest = serde_json::from_value(json).unwrap();
        assert!(manifest.enabled);
        assert_eq!(manifest.priority, 5);
        assert!(manifest.bool_setting("case_sensitive", false));
        assert!(!manifest.bool_setting("missing", false));
        assert_eq!(manifest.list_setting("allowed"), vec!["a", "b"]);
        assert_eq!(manifest.list_setting("users"), vec!["x", "y", "z"]);
        assert_eq!(manifest.int_setting("limit", 0), 42);
        assert!(!manifest.settings.contains_key("enabled"));
    }

    #[test]
    fn manifest_defaults_to_disabled() {
        let manifest: PluginManifest = serde_json::from_value(serde_json::json!({})).unwrap();
        assert!(!manifest.enabled);
        assert_eq!(manifest.priority, 0);
    }
}
