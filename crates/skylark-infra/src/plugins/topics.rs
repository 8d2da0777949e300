//! Topics: round-robin subjects for auto-posts.
//!
//! Lines come from `topics.txt` in the plugin directory (a built-in list
//! when it is missing or empty). The cursor is persisted as
//! `last_used_line`, so the rotation survives restarts. A line holding an
//! `http(s)://` link is posted as-is; any other line becomes a prompt
//! prefix through `prefix_template`.

use std::sync::OnceLock;

use skylark_core::plugin::{Plugin, PluginContext};
use skylark_core::storage::plugin_storage::PluginStorage;
use skylark_types::error::PluginError;
use skylark_types::plugin::AutoPostContribution;

const TOPICS_FILE: &str = "topics.txt";
const CURSOR_KEY: &str = "last_used_line";
const DEFAULT_TEMPLATE: &str = "以{topic}为主题，";
const DEFAULT_TOPICS: [&str; 5] = ["科技", "生活", "学习", "思考", "创新"];

pub struct TopicsPlugin {
    ctx: PluginContext,
    storage: PluginStorage,
    prefix_template: String,
    start_line: i64,
    topics: OnceLock<Vec<String>>,
}

impl TopicsPlugin {
    pub fn new(ctx: PluginContext) -> Self {
        let prefix_template = ctx
            .manifest
            .settings
            .get("prefix_template")
            .and_then(|v| v.as_str())
            .filter(|t| !t.trim().is_empty())
            .unwrap_or(DEFAULT_TEMPLATE)
            .to_string();
        let start_line = ctx.manifest.int_setting("start_line", 1);
        Self {
            storage: ctx.storage.clone(),
            ctx,
            prefix_template,
            start_line,
            topics: OnceLock::new(),
        }
    }

    async fn read_topics(&self) -> Vec<String> {
        let Some(dir) = &self.ctx.dir else {
            return default_topics();
        };
        let path = dir.join(TOPICS_FILE);
        match tokio::fs::read_to_string(&path).await {
            Ok(content) => {
                let topics: Vec<String> = content
                    .lines()
                    .map(str::trim)
                    .filter(|l| !l.is_empty())
                    .map(str::to_string)
                    .collect();
                if topics.is_empty() {
                    tracing::warn!(path = %path.display(), "topics file is empty, using defaults");
                    default_topics()
                } else {
                    topics
                }
            }
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "topics file unreadable, using defaults");
                default_topics()
            }
        }
    }

    async fn cursor(&self) -> u64 {
        match self.storage.get(CURSOR_KEY).await {
            Ok(Some(raw)) => raw.trim().parse().unwrap_or(0),
            Ok(None) => 0,
            Err(e) => {
                tracing::warn!(plugin = %self.ctx.name, error = %e, "failed to read topic cursor");
                0
            }
        }
    }

    fn contribution(&self, topic: &str) -> AutoPostContribution {
        if topic.starts_with("http://") || topic.starts_with("https://") {
            AutoPostContribution::Content {
                text: topic.to_string(),
                visibility: None,
            }
        } else {
            AutoPostContribution::PromptPrefix {
                prompt: self.prefix_template.replace("{topic}", topic),
                timestamp: None,
            }
        }
    }
}

fn default_topics() -> Vec<String> {
    DEFAULT_TOPICS.iter().map(|t| t.to_string()).collect()
}

impl Plugin for TopicsPlugin {
    fn description(&self) -> &str {
        "Rotating auto-post topics"
    }

    async fn initialize(&self) -> Result<(), PluginError> {
        let topics = self.read_topics().await;
        let count = topics.len();
        // Reloads build a fresh instance, so only a repeated call lands here.
        if self.topics.set(topics).is_err() {
            tracing::debug!(plugin = %self.ctx.name, "topics already loaded, keeping the first list");
        }

        if self.storage.get(CURSOR_KEY).await?.is_none() {
            let first = (self.start_line - 1).max(0);
            self.storage.set(CURSOR_KEY, &first.to_string()).await?;
        }
        tracing::info!(plugin = %self.ctx.name, topics = count, "topics ready");
        Ok(())
    }

    async fn on_auto_post(&self) -> Result<Option<AutoPostContribution>, PluginError> {
        let Some(topics) = self.topics.get().filter(|t| !t.is_empty()) else {
            return Ok(None);
        };
        let line = self.cursor().await;
        let index = usize::try_from(line % topics.len() as u64).unwrap_or(0);
        let topic = &topics[index];
        self.storage
            .set(CURSOR_KEY, &(line + 1).to_string())
            .await?;
        tracing::debug!(plugin = %self.ctx.name, topic = %topic, line = line + 1, "topic selected");
        Ok(Some(self.contribution(topic)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::PluginHarness;
    use serde_json::json;
    use tempfile::TempDir;

    fn prompt_of(c: Option<AutoPostContribution>) -> String {
        match c {
            Some(AutoPostContribution::PromptPrefix { prompt, .. }) => prompt,
            other => panic!("expected a prompt prefix, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn rotates_through_file_topics_and_persists_cursor() {
        let tmp = TempDir::new().unwrap();
        std::fs::write(tmp.path().join(TOPICS_FILE), "cats\n\n  dogs \nhttps://example.com/post\n").unwrap();
        let harness = PluginHarness::new();
        let ctx = harness.context(
            "topics",
            json!({ "prefix_template": "About {topic}, " }),
            Some(tmp.path().to_path_buf()),
        );
        let plugin = TopicsPlugin::new(ctx.clone());
        plugin.initialize().await.unwrap();

        assert_eq!(prompt_of(plugin.on_auto_post().await.unwrap()), "About cats, ");
        assert_eq!(prompt_of(plugin.on_auto_post().await.unwrap()), "About dogs, ");
        assert_eq!(
            plugin.on_auto_post().await.unwrap(),
            Some(AutoPostContribution::Content {
                text: "https://example.com/post".into(),
                visibility: None
            })
        );

        // A fresh instance continues from the stored cursor.
        let reloaded = TopicsPlugin::new(ctx);
        reloaded.initialize().await.unwrap();
        assert_eq!(prompt_of(reloaded.on_auto_post().await.unwrap()), "About cats, ");
        assert_eq!(ctx_cursor(&reloaded).await, "4");
    }

    async fn ctx_cursor(p: &TopicsPlugin) -> String {
        p.storage.get(CURSOR_KEY).await.unwrap().unwrap()
    }

    #[tokio::test]
    async fn repeated_initialize_keeps_the_first_topics() {
        let tmp = TempDir::new().unwrap();
        let file = tmp.path().join(TOPICS_FILE);
        std::fs::write(&file, "cats\n").unwrap();
        let harness = PluginHarness::new();
        let ctx = harness.context(
            "topics",
            json!({ "prefix_template": "About {topic}, " }),
            Some(tmp.path().to_path_buf()),
        );
        let plugin = TopicsPlugin::new(ctx);
        plugin.initialize().await.unwrap();

        std::fs::write(&file, "birds\n").unwrap();
        plugin.initialize().await.unwrap();
        assert_eq!(prompt_of(plugin.on_auto_post().await.unwrap()), "About cats, ");
    }

    #[tokio::test]
    async fn start_line_seeds_cursor_and_defaults_apply() {
        let harness = PluginHarness::new();
        let plugin = TopicsPlugin::new(harness.context("topics", json!({ "start_line": 2 }), None));
        plugin.initialize().await.unwrap();

        assert_eq!(prompt_of(plugin.on_auto_post().await.unwrap()), "以生活为主题，");
    }
}
