//! In-process fakes shared by the core tests.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use std::time::Duration;

use chrono::{TimeZone, Utc};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use skylark_types::config::{CommandConfig, PersonaConfig, ResponseConfig};
use skylark_types::error::{PluginError, TransportError};
use skylark_types::event::{Antenna, ChatMessage, Note, NoteDraft, Surface, Visibility};
use skylark_types::llm::{GenerateRequest, LlmError};
use skylark_types::plugin::AutoPostContribution;
use skylark_types::subscription::{Channel, SubscriptionSet};
use skylark_types::user::UserRef;

use crate::agent::{Agent, BotIdentity, Switches};
use crate::clock::{Clock, ManualClock};
use crate::llm::box_provider::BoxLlmProvider;
use crate::llm::provider::LlmProvider;
use crate::model::ModelSelector;
use crate::pipeline::locks::UserLocks;
use crate::plugin::{
    BoxPlugin, DiscoveredPlugin, HookOutcome, Plugin, PluginContext, PluginFactory, PluginRuntime,
    PluginServices, PluginSource,
};
use crate::policy::engine::{PolicyEngine, PolicySettings};
use crate::policy::lists::UserList;
use crate::storage::PluginDataStore;
use crate::storage::memory::MemoryStore;
use crate::stream::StreamStatus;
use crate::stream::dedup::DedupCache;
use crate::subscription::SubscriptionManager;
use crate::transport::Transport;
use crate::transport::box_transport::BoxTransport;
use crate::transport::stream::{StreamConnection, StreamConnector};

pub const BOT_ID: &str = "bot1";

// ---------------------------------------------------------------------------
// Events
// ---------------------------------------------------------------------------

pub fn user(id: &str) -> UserRef {
    UserRef {
        id: id.to_string(),
        username: Some(id.to_string()),
        host: None,
        is_bot: false,
    }
}

pub fn chat(user_id: &str, text: &str) -> ChatMessage {
    ChatMessage {
        id: format!("c-{user_id}-{text}"),
        from: user(user_id),
        to_user_id: Some(BOT_ID.to_string()),
        room_id: None,
        text: Some(text.to_string()),
    }
}

pub fn room_chat(user_id: &str, room_id: &str, text: &str) -> ChatMessage {
    ChatMessage {
        to_user_id: None,
        room_id: Some(room_id.to_string()),
        ..chat(user_id, text)
    }
}

pub fn note(id: &str, user_id: &str, text: &str) -> Note {
    Note {
        id: id.to_string(),
        user: user(user_id),
        text: Some(text.to_string()),
        cw: None,
        visibility: Some(Visibility::Public),
        reply_id: None,
        mentions: vec![BOT_ID.to_string()],
        file_count: 0,
        renote: None,
        my_reaction: None,
    }
}

// ---------------------------------------------------------------------------
// Transport
// ---------------------------------------------------------------------------

/// An outbound action captured by [`FakeTransport`].
#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    Note(NoteDraft),
    React { note_id: String, reaction: String },
    Chat { user_id: String, text: String },
    RoomChat { room_id: String, text: String },
}

/// Records every action; clones share state.
#[derive(Clone, Default)]
pub struct FakeTransport {
    actions: Arc<Mutex<Vec<Action>>>,
    failing: Arc<AtomicBool>,
    antennas: Arc<Mutex<Vec<Antenna>>>,
}

impl FakeTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn set_antennas(&self, antennas: Vec<Antenna>) {
        *self.antennas.lock().unwrap() = antennas;
    }

    pub fn actions(&self) -> Vec<Action> {
        self.actions.lock().unwrap().clone()
    }

    pub fn notes(&self) -> Vec<NoteDraft> {
        self.actions()
            .into_iter()
            .filter_map(|a| match a {
                Action::Note(draft) => Some(draft),
                _ => None,
            })
            .collect()
    }

    /// Text of every direct and room chat sent.
    pub fn chats(&self) -> Vec<String> {
        self.actions()
            .into_iter()
            .filter_map(|a| match a {
                Action::Chat { text, .. } | Action::RoomChat { text, .. } => Some(text),
                _ => None,
            })
            .collect()
    }

    pub fn boxed(&self) -> Arc<BoxTransport> {
        Arc::new(BoxTransport::new(self.clone()))
    }

    fn record(&self, action: Action) -> Result<usize, TransportError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(TransportError::Connection("fake transport down".into()));
        }
        let mut actions = self.actions.lock().unwrap();
        actions.push(action);
        Ok(actions.len())
    }
}

impl Transport for FakeTransport {
    async fn create_note(&self, draft: &NoteDraft) -> Result<String, TransportError> {
        let n = self.record(Action::Note(draft.clone()))?;
        Ok(format!("note-{n}"))
    }

    async fn react(&self, note_id: &str, reaction: &str) -> Result<(), TransportError> {
        self.record(Action::React {
            note_id: note_id.to_string(),
            reaction: reaction.to_string(),
        })
        .map(|_| ())
    }

    async fn send_chat(&self, user_id: &str, text: &str) -> Result<(), TransportError> {
        self.record(Action::Chat {
            user_id: user_id.to_string(),
            text: text.to_string(),
        })
        .map(|_| ())
    }

    async fn send_room_chat(&self, room_id: &str, text: &str) -> Result<(), TransportError> {
        self.record(Action::RoomChat {
            room_id: room_id.to_string(),
            text: text.to_string(),
        })
        .map(|_| ())
    }

    async fn list_antennas(&self) -> Result<Vec<Antenna>, TransportError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(TransportError::Connection("fake transport down".into()));
        }
        Ok(self.antennas.lock().unwrap().clone())
    }

    async fn current_user(&self) -> Result<UserRef, TransportError> {
        Ok(user(BOT_ID))
    }
}

// ---------------------------------------------------------------------------
// LLM
// ---------------------------------------------------------------------------

/// Returns a fixed reply (or fails) and remembers what it was asked.
#[derive(Clone)]
pub struct ScriptedLlm {
    reply: Option<String>,
    calls: Arc<AtomicUsize>,
    last: Arc<Mutex<Option<GenerateRequest>>>,
}

impl ScriptedLlm {
    pub fn replying(text: &str) -> Self {
        Self {
            reply: Some(text.to_string()),
            calls: Arc::default(),
            last: Arc::default(),
        }
    }

    pub fn failing() -> Self {
        Self {
            reply: None,
            ..Self::replying("")
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn last_request(&self) -> Option<GenerateRequest> {
        self.last.lock().unwrap().clone()
    }

    pub fn boxed(&self) -> Arc<BoxLlmProvider> {
        Arc::new(BoxLlmProvider::new(self.clone()))
    }
}

impl LlmProvider for ScriptedLlm {
    fn name(&self) -> &str {
        "scripted"
    }

    fn default_model(&self) -> &str {
        "scripted-1"
    }

    async fn generate(&self, request: &GenerateRequest) -> Result<String, LlmError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        *self.last.lock().unwrap() = Some(request.clone());
        self.reply.clone().ok_or(LlmError::Provider {
            message: "scripted failure".into(),
        })
    }
}

pub fn plugin_services<S: PluginDataStore + 'static>(
    store: Arc<S>,
    transport: FakeTransport,
    llm: ScriptedLlm,
) -> PluginServices {
    PluginServices::new(store, transport.boxed(), llm.boxed(), "You are a test bot.")
}

// ---------------------------------------------------------------------------
// Streaming
// ---------------------------------------------------------------------------

/// Handle onto one scripted connection: push inbound frames, inspect what
/// was sent, close it from the remote side.
#[derive(Clone)]
pub struct FakeSession {
    sent: Arc<Mutex<Vec<String>>>,
    inbound_tx: mpsc::UnboundedSender<String>,
    inbound_rx: Arc<Mutex<Option<mpsc::UnboundedReceiver<String>>>>,
    closed: CancellationToken,
}

impl FakeSession {
    pub fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            sent: Arc::default(),
            inbound_tx: tx,
            inbound_rx: Arc::new(Mutex::new(Some(rx))),
            closed: CancellationToken::new(),
        }
    }

    pub fn push(&self, frame: String) {
        let _ = self.inbound_tx.send(frame);
    }

    pub fn sent(&self) -> Vec<String> {
        self.sent.lock().unwrap().clone()
    }

    pub fn close(&self) {
        self.closed.cancel();
    }
}

pub struct FakeConnection {
    session: FakeSession,
    inbound: mpsc::UnboundedReceiver<String>,
}

impl StreamConnection for FakeConnection {
    async fn send_text(&mut self, text: String) -> Result<(), TransportError> {
        if self.session.closed.is_cancelled() {
            return Err(TransportError::Closed);
        }
        self.session.sent.lock().unwrap().push(text);
        Ok(())
    }

    async fn recv_text(&mut self) -> Option<Result<String, TransportError>> {
        tokio::select! {
            biased;
            _ = self.session.closed.cancelled() => None,
            frame = self.inbound.recv() => frame.map(Ok),
        }
    }

    async fn close(&mut self) {
        self.session.closed.cancel();
    }
}

/// Hands out scripted connect results in order; once exhausted, further
/// attempts hang.
pub struct FakeConnector {
    script: Mutex<VecDeque<Result<FakeSession, TransportError>>>,
    attempts: Arc<AtomicUsize>,
}

impl FakeConnector {
    pub fn new(script: Vec<Result<FakeSession, TransportError>>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            attempts: Arc::default(),
        }
    }

    pub fn attempts(&self) -> Arc<AtomicUsize> {
        self.attempts.clone()
    }
}

impl StreamConnector for FakeConnector {
    type Connection = FakeConnection;

    async fn connect(&self) -> Result<FakeConnection, TransportError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        let next = self.script.lock().unwrap().pop_front();
        match next {
            Some(Ok(session)) => {
                let inbound = session
                    .inbound_rx
                    .lock()
                    .unwrap()
                    .take()
                    .expect("session connected twice");
                Ok(FakeConnection { session, inbound })
            }
            Some(Err(e)) => Err(e),
            None => std::future::pending().await,
        }
    }
}

// ---------------------------------------------------------------------------
// Plugins
// ---------------------------------------------------------------------------

/// Fixed manifests, by plugin name.
pub struct StaticSource {
    plugins: Vec<(String, serde_json::Value)>,
}

impl StaticSource {
    pub fn new(plugins: Vec<(String, serde_json::Value)>) -> Self {
        Self { plugins }
    }

    fn to_plugin(name: &str, value: &serde_json::Value) -> Result<DiscoveredPlugin, PluginError> {
        let manifest = serde_json::from_value(value.clone()).map_err(|e| PluginError::Manifest {
            name: name.to_string(),
            message: e.to_string(),
        })?;
        Ok(DiscoveredPlugin {
            name: name.to_string(),
            dir: None,
            manifest,
        })
    }
}

impl PluginSource for StaticSource {
    fn discover(&self) -> Result<Vec<DiscoveredPlugin>, PluginError> {
        self.plugins
            .iter()
            .map(|(name, value)| Self::to_plugin(name, value))
            .collect()
    }

    fn load(&self, name: &str) -> Result<DiscoveredPlugin, PluginError> {
        let (name, value) = self
            .plugins
            .iter()
            .find(|(n, _)| n == name)
            .ok_or_else(|| PluginError::NotFound(name.to_string()))?;
        Self::to_plugin(name, value)
    }
}

/// Settings-driven plugin:
/// `trigger`/`reply` answer messages containing the trigger,
/// `keyword`/`answer` answer an exact keyword,
/// `content` or `prefix` (+ `stamp`) contribute to auto-posts,
/// `watch` claims every timeline note.
pub struct TestPlugin {
    trigger: Option<String>,
    reply: Option<String>,
    keyword: Option<String>,
    answer: Option<String>,
    content: Option<String>,
    prefix: Option<String>,
    stamp: Option<i64>,
    watch: bool,
}

impl TestPlugin {
    fn answer_for(&self, text: &str) -> HookOutcome {
        match (&self.trigger, &self.reply) {
            (Some(trigger), Some(reply)) if text.contains(trigger.as_str()) => {
                HookOutcome::Reply(reply.clone())
            }
            _ => HookOutcome::Pass,
        }
    }
}

impl Plugin for TestPlugin {
    fn description(&self) -> &str {
        "test plugin"
    }

    async fn on_mention(&self, note: &Note) -> Result<HookOutcome, PluginError> {
        Ok(self.answer_for(&note.effective_text()))
    }

    async fn on_message(&self, message: &ChatMessage) -> Result<HookOutcome, PluginError> {
        Ok(self.answer_for(message.text.as_deref().unwrap_or("")))
    }

    async fn on_timeline_note(&self, _channel: &Channel, _note: &Note) -> Result<bool, PluginError> {
        Ok(self.watch)
    }

    async fn on_auto_post(&self) -> Result<Option<AutoPostContribution>, PluginError> {
        if let Some(text) = &self.content {
            return Ok(Some(AutoPostContribution::Content {
                text: text.clone(),
                visibility: None,
            }));
        }
        Ok(self.prefix.clone().map(|prompt| AutoPostContribution::PromptPrefix {
            prompt,
            timestamp: self.stamp,
        }))
    }

    async fn keyword_match(
        &self,
        text: &str,
        _surface: Surface,
    ) -> Result<Option<String>, PluginError> {
        Ok(match (&self.keyword, &self.answer) {
            (Some(keyword), Some(answer)) if text.trim().eq_ignore_ascii_case(keyword) => {
                Some(answer.clone())
            }
            _ => None,
        })
    }
}

pub struct TestPluginFactory;

impl PluginFactory for TestPluginFactory {
    fn create(&self, ctx: PluginContext) -> Result<BoxPlugin, PluginError> {
        let setting = |key: &str| ctx.manifest.str_setting(key).map(str::to_string);
        let stamp = ctx.manifest.int_setting("stamp", -1);
        Ok(BoxPlugin::new(TestPlugin {
            trigger: setting("trigger"),
            reply: setting("reply"),
            keyword: setting("keyword"),
            answer: setting("answer"),
            content: setting("content"),
            prefix: setting("prefix"),
            stamp: (stamp >= 0).then_some(stamp),
            watch: ctx.manifest.bool_setting("watch", false),
        }))
    }
}

// ---------------------------------------------------------------------------
// Agent fixture
// ---------------------------------------------------------------------------

/// A fully wired agent over in-memory fakes.
pub struct Fixture {
    pub agent: Arc<Agent<MemoryStore>>,
    pub store: Arc<MemoryStore>,
    pub clock: Arc<ManualClock>,
    pub transport: FakeTransport,
    pub llm: ScriptedLlm,
}

impl Fixture {
    pub fn builder() -> FixtureBuilder {
        FixtureBuilder::default()
    }
}

#[derive(Default)]
pub struct FixtureBuilder {
    response: Option<ResponseConfig>,
    llm: Option<ScriptedLlm>,
    plugins: Vec<(String, serde_json::Value)>,
    operators: Vec<String>,
    subscriptions: SubscriptionSet,
    models: Vec<String>,
}

impl FixtureBuilder {
    pub fn response(mut self, config: ResponseConfig) -> Self {
        self.response = Some(config);
        self
    }

    pub fn llm(mut self, llm: ScriptedLlm) -> Self {
        self.llm = Some(llm);
        self
    }

    pub fn plugin(mut self, name: &str, manifest: serde_json::Value) -> Self {
        self.plugins.push((name.to_string(), manifest));
        self
    }

    pub fn operator(mut self, name: &str) -> Self {
        self.operators.push(name.to_string());
        self
    }

    pub fn subscriptions(mut self, set: SubscriptionSet) -> Self {
        self.subscriptions = set;
        self
    }

    pub fn models(mut self, models: Vec<String>) -> Self {
        self.models = models;
        self
    }

    pub async fn build(self) -> Fixture {
        let store = Arc::new(MemoryStore::new());
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2026, 1, 1, 12, 0, 0).unwrap(),
        ));
        let transport = FakeTransport::new();
        let llm = self
            .llm
            .unwrap_or_else(|| ScriptedLlm::replying("reply from model"));
        let response = self.response.unwrap_or_default();
        let local_host = Some("home.social".to_string());

        let policy = PolicyEngine::new(
            store.clone(),
            clock.clone(),
            PolicySettings::from_config(&response),
            UserList::new(&response.whitelist),
            UserList::new(&response.blacklist),
            local_host.clone(),
        );
        policy.load_overrides().await;

        let services = plugin_services(store.clone(), transport.clone(), llm.clone());
        let plugins = PluginRuntime::new(
            Arc::new(StaticSource::new(self.plugins)),
            Arc::new(TestPluginFactory),
            services,
        );
        plugins.load_all().await;

        let model = ModelSelector::new(store.clone(), "test-model", self.models);
        model.load().await;

        let commands = CommandConfig {
            prefix: "^".into(),
            allowed_users: self.operators.clone(),
        };
        let persona = PersonaConfig {
            system_prompt: "You are a test bot.".into(),
            failure_reply: "something broke".into(),
        };

        let agent = Agent {
            store: store.clone(),
            clock: clock.clone() as Arc<dyn Clock>,
            policy: Arc::new(policy),
            plugins: Arc::new(plugins),
            subscriptions: Arc::new(SubscriptionManager::new(self.subscriptions)),
            transport: transport.boxed(),
            llm: llm.boxed(),
            model: Arc::new(model),
            locks: Arc::new(UserLocks::new()),
            dedup: Arc::new(DedupCache::new(100, Duration::from_secs(600))),
            stream: Arc::new(StreamStatus::default()),
            switches: Arc::new(Switches::new(response.chat, response.mention, true)),
            persona,
            operators: UserList::new(&self.operators),
            commands,
            bot: BotIdentity {
                id: BOT_ID.to_string(),
                username: Some("skylark".to_string()),
            },
            local_host,
            started_at: clock.now(),
        };

        Fixture {
            agent: Arc::new(agent),
            store,
            clock,
            transport,
            llm,
        }
    }
}
