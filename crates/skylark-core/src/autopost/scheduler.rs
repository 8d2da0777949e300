//! AutoPoster -- the periodic autonomous posting loop.
//!
//! Each cycle: check the day's quota, obtain content (a plugin's finished
//! text, or the configured prompt run through the LLM with any plugin prompt
//! prefixes), post it, and only then commit the quota. Cycles are serialized
//! by a mutex so two near-simultaneous triggers cannot both pass the quota
//! check; the commit itself is an atomic increment-if-below in the store.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use skylark_types::config::AutoPostConfig;
use skylark_types::event::Visibility;
use skylark_types::llm::GenerateRequest;
use skylark_types::plugin::AutoPostContribution;

use crate::agent::{Agent, Switch};
use crate::storage::{QuotaRepository, Store};

/// Delay before the first cycle after startup.
pub const FIRST_DELAY: Duration = Duration::from_secs(60);

#[derive(Debug, Clone)]
pub struct AutoPostSettings {
    pub interval: Duration,
    pub max_per_day: u32,
    pub visibility: Visibility,
    pub local_only: bool,
    pub prompt: String,
}

impl AutoPostSettings {
    pub fn from_config(config: &AutoPostConfig) -> Self {
        Self {
            interval: Duration::from_secs(config.interval_minutes.max(1) * 60),
            max_per_day: config.max_posts_per_day,
            visibility: config.visibility,
            local_only: config.local_only,
            prompt: config.prompt.clone(),
        }
    }
}

/// Where a cycle's text came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PostSource {
    /// Finished text from a content plugin, posted verbatim.
    Plugin(String),
    Model,
}

/// What one trigger did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CycleOutcome {
    Posted { note_id: String, source: PostSource },
    Disabled,
    QuotaExhausted,
    /// Nothing to post: no plugin content and no configured prompt.
    NoContent,
    Failed(String),
}

pub struct AutoPoster<S: Store> {
    agent: Arc<Agent<S>>,
    settings: AutoPostSettings,
    cycle: Mutex<()>,
}

/// Text ready to post.
struct Content {
    text: String,
    visibility: Visibility,
    source: PostSource,
}

impl<S: Store> AutoPoster<S> {
    pub fn new(agent: Arc<Agent<S>>, settings: AutoPostSettings) -> Self {
        Self {
            agent,
            settings,
            cycle: Mutex::new(()),
        }
    }

    pub fn settings(&self) -> &AutoPostSettings {
        &self.settings
    }

    /// Run one cycle now.
    pub async fn trigger_once(&self) -> CycleOutcome {
        let _cycle = self.cycle.lock().await;

        if !self.agent.switches.get(Switch::AutoPost) {
            return CycleOutcome::Disabled;
        }

        let day = self.agent.clock.today();
        let max = self.settings.max_per_day;
        match self.agent.store.count_for(day).await {
            Ok(count) if count >= max => {
                debug!(%day, count, max, "daily post quota reached, skipping");
                return CycleOutcome::QuotaExhausted;
            }
            Ok(_) => {}
            Err(e) => {
                warn!(error = %e, "cannot read post quota, skipping cycle");
                return CycleOutcome::Failed(e.to_string());
            }
        }

        let content = match self.content().await {
            Ok(Some(content)) => content,
            Ok(None) => {
                warn!("auto-post has no prompt and no plugin content, skipping");
                return CycleOutcome::NoContent;
            }
            Err(e) => {
                warn!(error = %e, "auto-post content unavailable");
                return CycleOutcome::Failed(e);
            }
        };

        let note_id = match self
            .agent
            .transport
            .post_note(&content.text, content.visibility, self.settings.local_only)
            .await
        {
            Ok(id) => id,
            Err(e) => {
                warn!(error = %e, "auto-post failed, quota not charged");
                return CycleOutcome::Failed(e.to_string());
            }
        };

        match self.agent.store.increment_if_below(day, max).await {
            Ok(true) => {}
            Ok(false) => warn!(%day, max, "post went out but the quota was already full"),
            Err(e) => warn!(error = %e, "post went out but the quota was not recorded"),
        }
        info!(note = %note_id, source = ?content.source, "auto-post published");
        CycleOutcome::Posted {
            note_id,
            source: content.source,
        }
    }

    async fn content(&self) -> Result<Option<Content>, String> {
        let contributions = self.agent.plugins.collect_auto_post().await;

        let mut prefixes = String::new();
        let mut stamp = None;
        for (plugin, contribution) in contributions {
            match contribution {
                AutoPostContribution::Content { text, visibility } => {
                    if text.trim().is_empty() {
                        continue;
                    }
                    return Ok(Some(Content {
                        text,
                        visibility: visibility.unwrap_or(self.settings.visibility),
                        source: PostSource::Plugin(plugin),
                    }));
                }
                AutoPostContribution::PromptPrefix { prompt, timestamp } => {
                    prefixes.push_str(&prompt);
                    stamp = stamp.or(timestamp);
                }
            }
        }

        if prefixes.is_empty() && self.settings.prompt.trim().is_empty() {
            return Ok(None);
        }

        let minutes = stamp.unwrap_or_else(|| self.agent.clock.now().timestamp() / 60);
        let prompt = format!("[{minutes}] {prefixes}{}", self.settings.prompt);
        let mut request =
            GenerateRequest::new(prompt).with_system(self.agent.persona.system_prompt.clone());
        request.model = Some(self.agent.model.current());

        let text = self
            .agent
            .llm
            .generate(&request)
            .await
            .map_err(|e| e.to_string())?;
        let text = text.trim();
        if text.is_empty() {
            return Err("model returned an empty post".to_string());
        }
        Ok(Some(Content {
            text: text.to_string(),
            visibility: self.settings.visibility,
            source: PostSource::Model,
        }))
    }

    /// Trigger one minute after start, then every interval, until cancelled.
    /// A cancelled loop never starts another cycle.
    pub async fn run(self: Arc<Self>, cancel: CancellationToken) {
        let mut ticker =
            tokio::time::interval_at(Instant::now() + FIRST_DELAY, self.settings.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!(
            interval_secs = self.settings.interval.as_secs(),
            max_per_day = self.settings.max_per_day,
            "auto-poster started"
        );
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }
            let outcome = self.trigger_once().await;
            debug!(?outcome, "auto-post cycle finished");
        }
        info!("auto-poster stopped");
    }
}
