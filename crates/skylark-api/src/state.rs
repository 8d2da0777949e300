//! Application state wiring.
//!
//! Builds the shared [`Agent`] from the configuration, pinning every port to
//! its concrete infra implementation.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tracing::{info, warn};

use skylark_core::agent::{Agent, BotIdentity, Switches};
use skylark_core::clock::{Clock, SystemClock};
use skylark_core::llm::box_provider::BoxLlmProvider;
use skylark_core::model::ModelSelector;
use skylark_core::pipeline::UserLocks;
use skylark_core::plugin::{PluginRuntime, PluginServices};
use skylark_core::policy::engine::{PolicyEngine, PolicySettings};
use skylark_core::policy::lists::UserList;
use skylark_core::stream::StreamStatus;
use skylark_core::stream::dedup::DedupCache;
use skylark_core::subscription::SubscriptionManager;
use skylark_core::subscription::antenna;
use skylark_core::transport::box_transport::BoxTransport;
use skylark_infra::llm::OpenAiProvider;
use skylark_infra::misskey::{MisskeyClient, MisskeyStreamConnector};
use skylark_infra::plugins::{BuiltinFactory, DirectorySource};
use skylark_infra::sqlite::SqliteStore;
use skylark_infra::sqlite::pool::DatabasePool;
use skylark_types::config::{BotConfig, DbConfig, TimelineConfig};
use skylark_types::event::Antenna;
use skylark_types::subscription::SubscriptionSet;

pub type ConcreteAgent = Agent<SqliteStore>;

/// Everything `skylark run` needs.
pub struct AppState {
    pub config: BotConfig,
    pub agent: Arc<ConcreteAgent>,
    pub connector: MisskeyStreamConnector,
}

impl AppState {
    /// Open the store, reach the instance and assemble the agent.
    pub async fn init(config: BotConfig) -> anyhow::Result<Self> {
        let store = Arc::new(open_store_or_memory(&config.db).await?);

        let client = MisskeyClient::new(&config.instance)?;
        let transport = Arc::new(BoxTransport::new(client));
        let connector = MisskeyStreamConnector::new(&config.instance)?;
        let llm = Arc::new(BoxLlmProvider::new(OpenAiProvider::new(&config.openai)?));

        let me = transport
            .current_user()
            .await
            .context("failed to fetch the bot account")?;
        info!(id = %me.id, username = me.username.as_deref().unwrap_or(""), "logged in");

        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let local_host = config.instance.host().map(str::to_string);

        let policy = PolicyEngine::new(
            store.clone(),
            clock.clone(),
            PolicySettings::from_config(&config.response),
            UserList::new(&config.response.whitelist),
            UserList::new(&config.response.blacklist),
            local_host.clone(),
        );
        policy.load_overrides().await;

        let services = PluginServices::new(
            store.clone(),
            transport.clone(),
            llm.clone(),
            config.bot.system_prompt.clone(),
        );
        let plugins = PluginRuntime::new(
            Arc::new(DirectorySource::new(&config.plugins.dir)),
            Arc::new(BuiltinFactory),
            services,
        );
        plugins.load_all().await;

        let model = ModelSelector::new(
            store.clone(),
            config.openai.model.clone(),
            config.openai.models.clone(),
        );
        model.load().await;

        let antennas = if config.timeline.antenna_ids.is_empty() {
            Vec::new()
        } else {
            transport.list_antennas().await.unwrap_or_else(|e| {
                warn!(error = %e, "cannot list antennas, using configured selectors as ids");
                Vec::new()
            })
        };
        let subscriptions = configured_subscriptions(&config.timeline, &antennas);

        let agent = Agent {
            store,
            clock: clock.clone(),
            policy: Arc::new(policy),
            plugins: Arc::new(plugins),
            subscriptions: Arc::new(SubscriptionManager::new(subscriptions)),
            transport,
            llm,
            model: Arc::new(model),
            locks: Arc::new(UserLocks::new()),
            dedup: Arc::new(DedupCache::new(
                config.stream.dedup_capacity,
                Duration::from_secs(config.stream.dedup_ttl_secs),
            )),
            stream: Arc::new(StreamStatus::default()),
            switches: Arc::new(Switches::new(
                config.response.chat,
                config.response.mention,
                config.auto_post.enabled,
            )),
            persona: config.bot.clone(),
            commands: config.commands.clone(),
            operators: UserList::new(&config.commands.allowed_users),
            bot: BotIdentity::from_user(&me),
            local_host,
            started_at: clock.now(),
        };

        Ok(Self {
            config,
            agent: Arc::new(agent),
            connector,
        })
    }
}

/// Open the configured database file.
pub async fn open_store(db: &DbConfig) -> Result<SqliteStore, sqlx::Error> {
    let pool = DatabasePool::open(std::path::Path::new(&db.path)).await?;
    Ok(SqliteStore::new(pool))
}

/// Like [`open_store`], but a file that cannot be opened degrades to a
/// private in-memory database so the bot still runs.
pub async fn open_store_or_memory(db: &DbConfig) -> anyhow::Result<SqliteStore> {
    match open_store(db).await {
        Ok(store) => {
            info!(path = %db.path, "database opened");
            Ok(store)
        }
        Err(e) => {
            warn!(path = %db.path, error = %e, "cannot open database, state will not survive a restart");
            let pool = DatabasePool::in_memory()
                .await
                .context("failed to open in-memory database")?;
            Ok(SqliteStore::new(pool))
        }
    }
}

/// The startup subscription set with antenna names resolved to ids.
/// Selectors that cannot be resolved are kept verbatim.
pub fn configured_subscriptions(timeline: &TimelineConfig, antennas: &[Antenna]) -> SubscriptionSet {
    let ids: Vec<String> = timeline
        .antenna_ids
        .iter()
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .map(|selector| {
            if antennas.is_empty() {
                return selector.to_string();
            }
            antenna::resolve_one(selector, antennas).unwrap_or_else(|e| {
                warn!(selector, error = %e, "antenna not resolved");
                selector.to_string()
            })
        })
        .collect();
    SubscriptionSet::new(timeline.timelines(), ids)
}
