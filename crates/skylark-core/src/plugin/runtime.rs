//! PluginRuntime -- slot registry, lifecycle and hook dispatch.
//!
//! Each discovered plugin owns one slot holding its [`PluginRecord`] and, while
//! enabled, a live instance. Hooks are dispatched against a snapshot of the
//! enabled instances taken at dispatch time, so enable/disable takes effect on
//! the very next event. Lifecycle operations are serialized by a mutex; hook
//! dispatch never waits on it.
//!
//! Reload builds and initializes the new instance before touching the slot.
//! Only a fully initialized instance replaces the old one; on failure the old
//! instance keeps serving and the error is recorded.

use std::collections::BTreeMap;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::path::PathBuf;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use chrono::Utc;
use futures_util::FutureExt;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use skylark_types::error::PluginError;
use skylark_types::event::{ChatMessage, Note, Surface};
use skylark_types::plugin::{AutoPostContribution, HookReply, PluginManifest, PluginRecord};
use skylark_types::subscription::Channel;

use super::box_plugin::BoxPlugin;
use super::context::{PluginContext, PluginServices};
use super::hooks::HookOutcome;

/// Default per-hook deadline.
pub const HOOK_TIMEOUT: Duration = Duration::from_secs(60);

/// A plugin found by a [`PluginSource`].
#[derive(Debug, Clone)]
pub struct DiscoveredPlugin {
    pub name: String,
    pub dir: Option<PathBuf>,
    pub manifest: PluginManifest,
}

/// Where plugin manifests come from (a plugins directory in production).
pub trait PluginSource: Send + Sync {
    fn discover(&self) -> Result<Vec<DiscoveredPlugin>, PluginError>;

    /// Re-read one plugin's manifest.
    fn load(&self, name: &str) -> Result<DiscoveredPlugin, PluginError>;
}

/// Builds plugin instances by name.
pub trait PluginFactory: Send + Sync {
    /// Returns [`PluginError::NotFound`] for names it does not know.
    fn create(&self, ctx: PluginContext) -> Result<BoxPlugin, PluginError>;
}

struct Slot {
    record: PluginRecord,
    instance: Option<Arc<BoxPlugin>>,
}

pub struct PluginRuntime {
    slots: RwLock<BTreeMap<String, Slot>>,
    source: Arc<dyn PluginSource>,
    factory: Arc<dyn PluginFactory>,
    services: PluginServices,
    hook_timeout: Duration,
    lifecycle: Mutex<()>,
}

impl PluginRuntime {
    pub fn new(
        source: Arc<dyn PluginSource>,
        factory: Arc<dyn PluginFactory>,
        services: PluginServices,
    ) -> Self {
        Self {
            slots: RwLock::new(BTreeMap::new()),
            source,
            factory,
            services,
            hook_timeout: HOOK_TIMEOUT,
            lifecycle: Mutex::new(()),
        }
    }

    pub fn with_hook_timeout(mut self, timeout: Duration) -> Self {
        self.hook_timeout = timeout;
        self
    }

    // -----------------------------------------------------------------------
    // Lifecycle
    // -----------------------------------------------------------------------

    /// Discover every plugin and start the ones whose manifest enables them.
    pub async fn load_all(&self) {
        let _guard = self.lifecycle.lock().await;
        let discovered = match self.source.discover() {
            Ok(found) => found,
            Err(e) => {
                warn!(error = %e, "plugin discovery failed");
                Vec::new()
            }
        };

        for plugin in discovered {
            let mut slot = Slot {
                record: PluginRecord {
                    name: plugin.name.clone(),
                    description: String::new(),
                    enabled: false,
                    priority: plugin.manifest.priority,
                    last_error: None,
                    loaded_at: Utc::now(),
                },
                instance: None,
            };
            if plugin.manifest.enabled {
                match self.start(&plugin).await {
                    Ok(instance) => {
                        slot.record.description = instance.description().to_string();
                        slot.record.enabled = true;
                        slot.instance = Some(instance);
                    }
                    Err(e) => {
                        warn!(plugin = %plugin.name, error = %e, "plugin failed to start");
                        slot.record.last_error = Some(e.to_string());
                    }
                }
            }
            self.write_slots().insert(plugin.name, slot);
        }

        let records = self.records();
        let enabled = records.iter().filter(|r| r.enabled).count();
        info!(found = records.len(), enabled, "plugins loaded");
    }

    pub async fn enable(&self, name: &str) -> Result<PluginRecord, PluginError> {
        let _guard = self.lifecycle.lock().await;
        let key = match self.resolve(name) {
            Some(key) => key,
            None => self.adopt(name)?,
        };

        let already_live = self
            .update_slot(&key, |slot| {
                slot.instance.is_some().then(|| {
                    slot.record.enabled = true;
                    slot.record.clone()
                })
            })
            .flatten();
        if let Some(record) = already_live {
            return Ok(record);
        }

        let plugin = self.source.load(&key)?;
        match self.start(&plugin).await {
            Ok(instance) => {
                let record = self
                    .update_slot(&key, |slot| {
                        slot.record.enabled = true;
                        slot.record.priority = plugin.manifest.priority;
                        slot.record.description = instance.description().to_string();
                        slot.record.last_error = None;
                        slot.record.loaded_at = Utc::now();
                        slot.instance = Some(instance);
                        slot.record.clone()
                    })
                    .ok_or_else(|| PluginError::NotFound(key.clone()))?;
                info!(plugin = %key, "plugin enabled");
                Ok(record)
            }
            Err(e) => {
                self.record_error(&key, &e);
                Err(e)
            }
        }
    }

    pub async fn disable(&self, name: &str) -> Result<PluginRecord, PluginError> {
        let _guard = self.lifecycle.lock().await;
        let key = self
            .resolve(name)
            .ok_or_else(|| PluginError::NotFound(name.to_string()))?;
        let (record, old) = self
            .update_slot(&key, |slot| {
                slot.record.enabled = false;
                (slot.record.clone(), slot.instance.take())
            })
            .ok_or_else(|| PluginError::NotFound(key.clone()))?;
        if let Some(old) = old {
            self.stop(&key, old).await;
            info!(plugin = %key, "plugin disabled");
        }
        Ok(record)
    }

    /// Re-read the manifest and swap in a fresh instance. A disabled plugin
    /// only has its record refreshed.
    pub async fn reload(&self, name: &str) -> Result<PluginRecord, PluginError> {
        let _guard = self.lifecycle.lock().await;
        let key = self
            .resolve(name)
            .ok_or_else(|| PluginError::NotFound(name.to_string()))?;

        let plugin = match self.source.load(&key) {
            Ok(plugin) => plugin,
            Err(e) => {
                self.record_error(&key, &e);
                return Err(e);
            }
        };

        let enabled = self
            .read_slots()
            .get(&key)
            .map(|slot| slot.record.enabled)
            .unwrap_or(false);
        if !enabled {
            return self
                .update_slot(&key, |slot| {
                    slot.record.priority = plugin.manifest.priority;
                    slot.record.last_error = None;
                    slot.record.clone()
                })
                .ok_or(PluginError::NotFound(key));
        }

        match self.start(&plugin).await {
            Ok(instance) => {
                let (record, old) = self
                    .update_slot(&key, |slot| {
                        slot.record.priority = plugin.manifest.priority;
                        slot.record.description = instance.description().to_string();
                        slot.record.last_error = None;
                        slot.record.loaded_at = Utc::now();
                        (slot.record.clone(), slot.instance.replace(instance))
                    })
                    .ok_or_else(|| PluginError::NotFound(key.clone()))?;
                if let Some(old) = old {
                    self.stop(&key, old).await;
                }
                info!(plugin = %key, "plugin reloaded");
                Ok(record)
            }
            Err(e) => {
                warn!(plugin = %key, error = %e, "reload failed, keeping previous instance");
                self.record_error(&key, &e);
                Err(e)
            }
        }
    }

    /// Shut every live instance down. Called once at process exit.
    pub async fn shutdown_all(&self) {
        let _guard = self.lifecycle.lock().await;
        let live: Vec<(String, Arc<BoxPlugin>)> = self
            .write_slots()
            .iter_mut()
            .filter_map(|(name, slot)| slot.instance.take().map(|i| (name.clone(), i)))
            .collect();
        for (name, instance) in live {
            self.stop(&name, instance).await;
        }
    }

    async fn start(&self, plugin: &DiscoveredPlugin) -> Result<Arc<BoxPlugin>, PluginError> {
        let ctx = PluginContext::new(
            &plugin.name,
            plugin.dir.clone(),
            plugin.manifest.clone(),
            &self.services,
        );
        let instance = self.factory.create(ctx)?;
        self.guarded(&plugin.name, "initialize", instance.initialize())
            .await
            .map_err(|e| match e {
                PluginError::Hook { name, message } => PluginError::Init { name, message },
                other => other,
            })?;
        debug!(plugin = %plugin.name, "plugin initialized");
        Ok(Arc::new(instance))
    }

    async fn stop(&self, name: &str, instance: Arc<BoxPlugin>) {
        let outcome = self
            .guarded(name, "shutdown", async {
                instance.shutdown().await;
                Ok(())
            })
            .await;
        if let Err(e) = outcome {
            warn!(plugin = %name, error = %e, "plugin shutdown failed");
        }
    }

    /// A plugin that appeared on disk after startup.
    fn adopt(&self, name: &str) -> Result<String, PluginError> {
        let plugin = self.source.load(name)?;
        let key = plugin.name.clone();
        self.write_slots().entry(key.clone()).or_insert(Slot {
            record: PluginRecord {
                name: key.clone(),
                description: String::new(),
                enabled: false,
                priority: plugin.manifest.priority,
                last_error: None,
                loaded_at: Utc::now(),
            },
            instance: None,
        });
        Ok(key)
    }

    // -----------------------------------------------------------------------
    // Hook dispatch
    // -----------------------------------------------------------------------

    /// First plugin that handles a mention wins.
    pub async fn dispatch_mention(&self, note: &Note) -> Option<HookReply> {
        for (name, plugin) in self.active() {
            let outcome = self.guarded(&name, "on_mention", plugin.on_mention(note)).await;
            if let Some(reply) = self.take_outcome(&name, outcome) {
                return Some(reply);
            }
        }
        None
    }

    /// First plugin that handles a chat message wins.
    pub async fn dispatch_message(&self, message: &ChatMessage) -> Option<HookReply> {
        for (name, plugin) in self.active() {
            let outcome = self
                .guarded(&name, "on_message", plugin.on_message(message))
                .await;
            if let Some(reply) = self.take_outcome(&name, outcome) {
                return Some(reply);
            }
        }
        None
    }

    /// Offer a timeline/antenna note to every enabled plugin. Returns how many
    /// acted on it.
    pub async fn dispatch_timeline_note(&self, channel: &Channel, note: &Note) -> usize {
        let mut acted = 0;
        for (name, plugin) in self.active() {
            match self
                .guarded(&name, "on_timeline_note", plugin.on_timeline_note(channel, note))
                .await
            {
                Ok(true) => acted += 1,
                Ok(false) => {}
                Err(e) => self.hook_failed(&name, "on_timeline_note", &e),
            }
        }
        acted
    }

    /// Auto-post contributions from every enabled plugin, highest priority first.
    pub async fn collect_auto_post(&self) -> Vec<(String, AutoPostContribution)> {
        let mut out = Vec::new();
        for (name, plugin) in self.active() {
            match self.guarded(&name, "on_auto_post", plugin.on_auto_post()).await {
                Ok(Some(contribution)) => out.push((name, contribution)),
                Ok(None) => {}
                Err(e) => self.hook_failed(&name, "on_auto_post", &e),
            }
        }
        out
    }

    /// First keyword reply for `text` arriving on `surface`.
    pub async fn keyword_match(&self, text: &str, surface: Surface) -> Option<HookReply> {
        for (name, plugin) in self.active() {
            match self
                .guarded(&name, "keyword_match", plugin.keyword_match(text, surface))
                .await
            {
                Ok(Some(response)) => {
                    return Some(HookReply {
                        plugin: name,
                        response: Some(response),
                    });
                }
                Ok(None) => {}
                Err(e) => self.hook_failed(&name, "keyword_match", &e),
            }
        }
        None
    }

    fn take_outcome(
        &self,
        name: &str,
        outcome: Result<HookOutcome, PluginError>,
    ) -> Option<HookReply> {
        match outcome {
            Ok(HookOutcome::Pass) => None,
            Ok(HookOutcome::Reply(text)) => Some(HookReply {
                plugin: name.to_string(),
                response: Some(text),
            }),
            Ok(HookOutcome::Handled) => Some(HookReply {
                plugin: name.to_string(),
                response: None,
            }),
            Err(e) => {
                self.hook_failed(name, "message", &e);
                None
            }
        }
    }

    /// Run one hook under the timeout with panics caught.
    async fn guarded<T>(
        &self,
        name: &str,
        hook: &'static str,
        fut: impl Future<Output = Result<T, PluginError>>,
    ) -> Result<T, PluginError> {
        match tokio::time::timeout(self.hook_timeout, AssertUnwindSafe(fut).catch_unwind()).await {
            Err(_) => Err(PluginError::Timeout {
                name: name.to_string(),
                secs: self.hook_timeout.as_secs(),
            }),
            Ok(Err(_)) => {
                warn!(plugin = %name, hook, "plugin hook panicked");
                Err(PluginError::Panicked {
                    name: name.to_string(),
                })
            }
            Ok(Ok(result)) => result,
        }
    }

    fn hook_failed(&self, name: &str, hook: &'static str, error: &PluginError) {
        warn!(plugin = %name, hook, error = %error, "plugin hook failed");
        self.record_error(name, error);
    }

    fn record_error(&self, name: &str, error: &PluginError) {
        self.update_slot(name, |slot| slot.record.last_error = Some(error.to_string()));
    }

    // -----------------------------------------------------------------------
    // Introspection
    // -----------------------------------------------------------------------

    /// Enabled instances, highest priority first. Taken fresh on every call.
    fn active(&self) -> Vec<(String, Arc<BoxPlugin>)> {
        let slots = self.read_slots();
        let mut live: Vec<(i32, String, Arc<BoxPlugin>)> = slots
            .iter()
            .filter(|(_, slot)| slot.record.enabled)
            .filter_map(|(name, slot)| {
                slot.instance
                    .as_ref()
                    .map(|i| (slot.record.priority, name.clone(), i.clone()))
            })
            .collect();
        live.sort_by(|a, b| b.0.cmp(&a.0).then_with(|| a.1.cmp(&b.1)));
        live.into_iter().map(|(_, name, i)| (name, i)).collect()
    }

    pub fn records(&self) -> Vec<PluginRecord> {
        self.read_slots().values().map(|s| s.record.clone()).collect()
    }

    pub fn record(&self, name: &str) -> Option<PluginRecord> {
        let key = self.resolve(name)?;
        self.read_slots().get(&key).map(|s| s.record.clone())
    }

    pub fn has_enabled(&self) -> bool {
        self.read_slots()
            .values()
            .any(|s| s.record.enabled && s.instance.is_some())
    }

    /// Exact name first, then a case-insensitive match.
    fn resolve(&self, name: &str) -> Option<String> {
        let slots = self.read_slots();
        let name = name.trim();
        if slots.contains_key(name) {
            return Some(name.to_string());
        }
        slots.keys().find(|k| k.eq_ignore_ascii_case(name)).cloned()
    }

    fn update_slot<R>(&self, name: &str, f: impl FnOnce(&mut Slot) -> R) -> Option<R> {
        self.write_slots().get_mut(name).map(f)
    }

    fn read_slots(&self) -> std::sync::RwLockReadGuard<'_, BTreeMap<String, Slot>> {
        self.slots.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write_slots(&self) -> std::sync::RwLockWriteGuard<'_, BTreeMap<String, Slot>> {
        self.slots.write().unwrap_or_else(|e| e.into_inner())
    }
}

impl std::fmt::Debug for PluginRuntime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PluginRuntime")
            .field("plugins", &self.read_slots().keys().collect::<Vec<_>>())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plugin::hooks::Plugin;
    use crate::storage::memory::MemoryStore;
    use crate::testing::{self, FakeTransport, ScriptedLlm};
    use std::collections::HashMap;
    use std::sync::Mutex as StdMutex;

    /// Manifests keyed by plugin name, editable between calls.
    #[derive(Default)]
    struct MapSource {
        manifests: StdMutex<HashMap<String, serde_json::Value>>,
    }

    impl MapSource {
        fn put(&self, name: &str, manifest: serde_json::Value) {
            self.manifests
                .lock()
                .unwrap()
                .insert(name.to_string(), manifest);
        }

        fn to_plugin(name: &str, value: &serde_json::Value) -> DiscoveredPlugin {
            DiscoveredPlugin {
                name: name.to_string(),
                dir: None,
                manifest: serde_json::from_value(value.clone()).unwrap(),
            }
        }
    }

    impl PluginSource for MapSource {
        fn discover(&self) -> Result<Vec<DiscoveredPlugin>, PluginError> {
            Ok(self
                .manifests
                .lock()
                .unwrap()
                .iter()
                .map(|(n, v)| Self::to_plugin(n, v))
                .collect())
        }

        fn load(&self, name: &str) -> Result<DiscoveredPlugin, PluginError> {
            self.manifests
                .lock()
                .unwrap()
                .get(name)
                .map(|v| Self::to_plugin(name, v))
                .ok_or_else(|| PluginError::NotFound(name.to_string()))
        }
    }

    /// Behaviour is driven by manifest settings.
    struct Scripted {
        name: String,
        reply: Option<String>,
        fail_init: bool,
        panic: bool,
        slow: bool,
    }

    impl Plugin for Scripted {
        fn description(&self) -> &str {
            "scripted test plugin"
        }

        async fn initialize(&self) -> Result<(), PluginError> {
            if self.fail_init {
                return Err(PluginError::Init {
                    name: self.name.clone(),
                    message: "refused".into(),
                });
            }
            Ok(())
        }

        async fn on_message(&self, _message: &ChatMessage) -> Result<HookOutcome, PluginError> {
            if self.panic {
                panic!("boom");
            }
            if self.slow {
                tokio::time::sleep(Duration::from_secs(3600)).await;
            }
            Ok(match &self.reply {
                Some(text) => HookOutcome::Reply(text.clone()),
                None => HookOutcome::Pass,
            })
        }

        async fn on_auto_post(&self) -> Result<Option<AutoPostContribution>, PluginError> {
            Ok(self.reply.clone().map(|text| AutoPostContribution::Content {
                text,
                visibility: None,
            }))
        }
    }

    struct ScriptedFactory;

    impl PluginFactory for ScriptedFactory {
        fn create(&self, ctx: PluginContext) -> Result<BoxPlugin, PluginError> {
            Ok(BoxPlugin::new(Scripted {
                reply: ctx.manifest.str_setting("reply").map(str::to_string),
                fail_init: ctx.manifest.bool_setting("fail_init", false),
                panic: ctx.manifest.bool_setting("panic", false),
                slow: ctx.manifest.bool_setting("slow", false),
                name: ctx.name,
            }))
        }
    }

    fn runtime(source: Arc<MapSource>) -> PluginRuntime {
        let store = Arc::new(MemoryStore::new());
        let services = testing::plugin_services(store, FakeTransport::new(), ScriptedLlm::replying("x"));
        PluginRuntime::new(source, Arc::new(ScriptedFactory), services)
    }

    #[tokio::test]
    async fn load_all_starts_only_enabled_plugins() {
        let source = Arc::new(MapSource::default());
        source.put("on", serde_json::json!({"enabled": true, "reply": "hi"}));
        source.put("off", serde_json::json!({"enabled": false, "reply": "nope"}));
        source.put("broken", serde_json::json!({"enabled": true, "fail_init": true}));
        let rt = runtime(source);
        rt.load_all().await;

        let records: HashMap<String, PluginRecord> =
            rt.records().into_iter().map(|r| (r.name.clone(), r)).collect();
        assert!(records["on"].enabled);
        assert!(!records["off"].enabled);
        assert!(!records["broken"].enabled);
        assert!(records["broken"].last_error.is_some());
    }

    #[tokio::test]
    async fn hooks_follow_priority_and_first_handler_wins() {
        let source = Arc::new(MapSource::default());
        source.put("low", serde_json::json!({"enabled": true, "priority": 1, "reply": "low"}));
        source.put("high", serde_json::json!({"enabled": true, "priority": 9, "reply": "high"}));
        let rt = runtime(source);
        rt.load_all().await;

        let reply = rt.dispatch_message(&testing::chat("u1", "hey")).await.unwrap();
        assert_eq!(reply.plugin, "high");
        assert_eq!(reply.response.as_deref(), Some("high"));
    }

    #[tokio::test]
    async fn disable_takes_effect_on_next_dispatch() {
        let source = Arc::new(MapSource::default());
        source.put("greeter", serde_json::json!({"enabled": true, "reply": "hello"}));
        let rt = runtime(source);
        rt.load_all().await;

        rt.disable("Greeter").await.unwrap();
        assert!(rt.dispatch_message(&testing::chat("u1", "hey")).await.is_none());
        assert!(!rt.disable("greeter").await.unwrap().enabled);

        rt.enable("greeter").await.unwrap();
        assert!(rt.dispatch_message(&testing::chat("u1", "hey")).await.is_some());
        assert!(rt.enable("greeter").await.unwrap().enabled);
    }

    #[tokio::test]
    async fn failed_reload_keeps_previous_instance() {
        let source = Arc::new(MapSource::default());
        source.put("topics", serde_json::json!({"enabled": true, "reply": "v1"}));
        let rt = runtime(source.clone());
        rt.load_all().await;

        source.put("topics", serde_json::json!({"enabled": true, "fail_init": true, "reply": "v2"}));
        assert!(rt.reload("topics").await.is_err());

        let record = rt.record("topics").unwrap();
        assert!(record.enabled);
        assert!(record.last_error.is_some());
        let contributions = rt.collect_auto_post().await;
        assert_eq!(
            contributions[0].1,
            AutoPostContribution::Content {
                text: "v1".into(),
                visibility: None
            }
        );
    }

    #[tokio::test]
    async fn successful_reload_swaps_instance() {
        let source = Arc::new(MapSource::default());
        source.put("topics", serde_json::json!({"enabled": true, "reply": "v1"}));
        let rt = runtime(source.clone());
        rt.load_all().await;

        source.put("topics", serde_json::json!({"enabled": true, "reply": "v2", "priority": 3}));
        let record = rt.reload("topics").await.unwrap();
        assert_eq!(record.priority, 3);
        assert!(record.last_error.is_none());
        let reply = rt.dispatch_message(&testing::chat("u1", "x")).await.unwrap();
        assert_eq!(reply.response.as_deref(), Some("v2"));
    }

    #[tokio::test]
    async fn panicking_hook_is_isolated() {
        let source = Arc::new(MapSource::default());
        source.put("bad", serde_json::json!({"enabled": true, "panic": true, "priority": 5}));
        source.put("good", serde_json::json!({"enabled": true, "reply": "ok"}));
        let rt = runtime(source);
        rt.load_all().await;

        let reply = rt.dispatch_message(&testing::chat("u1", "x")).await.unwrap();
        assert_eq!(reply.plugin, "good");
        assert!(rt.record("bad").unwrap().last_error.unwrap().contains("panicked"));
    }

    #[tokio::test(start_paused = true)]
    async fn slow_hook_times_out() {
        let source = Arc::new(MapSource::default());
        source.put("slow", serde_json::json!({"enabled": true, "slow": true}));
        let rt = runtime(source).with_hook_timeout(Duration::from_secs(5));
        rt.load_all().await;

        assert!(rt.dispatch_message(&testing::chat("u1", "x")).await.is_none());
        assert!(rt.record("slow").unwrap().last_error.unwrap().contains("timed out"));
    }

    #[tokio::test]
    async fn unknown_plugin_is_reported() {
        let rt = runtime(Arc::new(MapSource::default()));
        rt.load_all().await;
        assert!(matches!(rt.disable("ghost").await, Err(PluginError::NotFound(_))));
        assert!(matches!(rt.enable("ghost").await, Err(PluginError::NotFound(_))));
    }
}
