//! CommandInterpreter -- executes parsed operator commands against the live
//! agent state and renders a plain-text answer.
//!
//! Every mutation is idempotent: repeating a command leaves the state as the
//! first invocation did and says so. Failures are reported in the answer;
//! nothing here returns an error to the caller.

use std::sync::Arc;

use skylark_types::event::Antenna;
use skylark_types::subscription::{Channel, Timeline};
use skylark_types::user::UserKey;

use super::parser::{self, CacheScope, Command, SetAction};
use crate::agent::{Agent, Switch};
use crate::policy::lists::{ListKind, UserList};
use crate::storage::{CONTROL_NAMESPACE, MaintenanceRepository, PluginDataStore, Store};
use crate::subscription::antenna;

pub struct CommandInterpreter<S: Store> {
    agent: Arc<Agent<S>>,
}

impl<S: Store> CommandInterpreter<S> {
    pub fn new(agent: Arc<Agent<S>>) -> Self {
        Self { agent }
    }

    fn prefix(&self) -> &str {
        &self.agent.commands.prefix
    }

    pub fn is_command(&self, text: &str) -> bool {
        text.trim_start().starts_with(self.prefix())
    }

    /// Parse and run `text`. Non-commands get the help text.
    pub async fn execute(&self, text: &str) -> String {
        match parser::parse(text, self.prefix()) {
            Some(command) => self.run(command).await,
            None => parser::help(self.prefix()),
        }
    }

    pub async fn run(&self, command: Command) -> String {
        match command {
            Command::Help => parser::help(self.prefix()),
            Command::Usage(usage) => format!("Usage: {}{usage}", self.prefix()),
            Command::Status => self.status(),
            Command::SysInfo => self.sysinfo(),
            Command::Plugins => self.plugins(),
            Command::Model(name) => self.model(name).await,
            Command::ModelReset => match self.agent.model.reset().await {
                Ok(()) => format!("Model reset to {}.", self.agent.model.default_model()),
                Err(e) => format!("Cannot reset model: {e}"),
            },
            Command::Enable(name) => match self.agent.plugins.enable(&name).await {
                Ok(record) => format!("Plugin {} enabled.", record.name),
                Err(e) => e.to_string(),
            },
            Command::Disable(name) => match self.agent.plugins.disable(&name).await {
                Ok(record) => format!("Plugin {} disabled.", record.name),
                Err(e) => e.to_string(),
            },
            Command::Reload(name) => match self.agent.plugins.reload(&name).await {
                Ok(record) => format!("Plugin {} reloaded.", record.name),
                Err(e) => format!("Reload failed, previous instance kept: {e}"),
            },
            Command::Timeline(action) => self.timeline(action),
            Command::Antenna(action) => self.antenna(action).await,
            Command::CacheStatus => self.cache_status(),
            Command::CacheClear(scope) => self.cache_clear(scope).await,
            Command::DbStats => self.db_stats().await,
            Command::DbClear { plugin, key } => self.db_clear(&plugin, key.as_deref()).await,
            Command::List(kind, action) => self.list(kind, action).await,
            Command::Toggle(switch, on) => {
                let was = self.agent.switches.set(switch, on);
                let state = on_off(on);
                if was == on {
                    format!("{}: {state} (unchanged)", switch.label())
                } else {
                    format!("{}: {state}", switch.label())
                }
            }
        }
    }

    // -----------------------------------------------------------------------
    // Introspection
    // -----------------------------------------------------------------------

    fn status(&self) -> String {
        let agent = &self.agent;
        let stream = &agent.stream;
        let channels: Vec<String> = stream.joined().iter().map(Channel::to_string).collect();
        let records = agent.plugins.records();
        let enabled = records.iter().filter(|r| r.enabled).count();
        [
            format!(
                "stream: {} (reconnects: {})",
                if stream.is_connected() { "connected" } else { "disconnected" },
                stream.reconnects()
            ),
            format!(
                "channels: {}",
                if channels.is_empty() { "none".to_string() } else { channels.join(", ") }
            ),
            format!(
                "chat: {}, mention: {}, autopost: {}",
                on_off(agent.switches.get(Switch::Chat)),
                on_off(agent.switches.get(Switch::Mention)),
                on_off(agent.switches.get(Switch::AutoPost)),
            ),
            format!("model: {}", agent.model.current()),
            format!("plugins: {enabled}/{} enabled", records.len()),
            format!("cached users: {}", agent.policy.cached_users()),
            format!("uptime: {}", self.uptime()),
        ]
        .join("\n")
    }

    fn sysinfo(&self) -> String {
        [
            format!("skylark {}", env!("CARGO_PKG_VERSION")),
            format!("os: {}/{}", std::env::consts::OS, std::env::consts::ARCH),
            format!("pid: {}", std::process::id()),
            format!("started: {}", self.agent.started_at.to_rfc3339()),
            format!("uptime: {}", self.uptime()),
            format!(
                "llm: {} (default model {})",
                self.agent.llm.name(),
                self.agent.llm.default_model()
            ),
        ]
        .join("\n")
    }

    fn uptime(&self) -> String {
        let secs = (self.agent.clock.now() - self.agent.started_at)
            .num_seconds()
            .max(0);
        format_duration(secs)
    }

    fn plugins(&self) -> String {
        let records = self.agent.plugins.records();
        if records.is_empty() {
            return "No plugins discovered.".to_string();
        }
        let mut out = String::from("Plugins:");
        for record in records {
            out.push_str(&format!(
                "\n{} [{}] priority {}",
                record.name,
                on_off(record.enabled),
                record.priority
            ));
            if !record.description.is_empty() {
                out.push_str(&format!(": {}", record.description));
            }
            if let Some(error) = &record.last_error {
                out.push_str(&format!(" (last error: {error})"));
            }
        }
        out
    }

    async fn model(&self, name: Option<String>) -> String {
        let models = &self.agent.model;
        match name {
            None => {
                let allowed = if models.allowed().is_empty() {
                    "any".to_string()
                } else {
                    models.allowed().join(", ")
                };
                format!(
                    "Model: {} (default {}); available: {allowed}",
                    models.current(),
                    models.default_model()
                )
            }
            Some(name) => match models.select(&name).await {
                Ok(name) => format!("Model switched to {name}."),
                Err(e) => format!("Cannot switch model: {e}"),
            },
        }
    }

    // -----------------------------------------------------------------------
    // Subscriptions
    // -----------------------------------------------------------------------

    fn timeline(&self, action: SetAction) -> String {
        let subs = &self.agent.subscriptions;
        let changed = match action {
            SetAction::Status | SetAction::List => return self.timeline_summary(None),
            SetAction::Add(names) => match parse_timelines(&names) {
                Ok(ts) => subs.add(ts.into_iter().map(Channel::Timeline)),
                Err(e) => return e,
            },
            SetAction::Del(names) => match parse_timelines(&names) {
                Ok(ts) => subs.remove(ts.into_iter().map(Channel::Timeline)),
                Err(e) => return e,
            },
            SetAction::Set(names) => match parse_timelines(&names) {
                Ok(ts) => subs.set_timelines(ts),
                Err(e) => return e,
            },
            SetAction::Clear => subs.set_timelines([]),
            SetAction::Reset => subs.set_timelines(subs.configured().timelines.clone()),
        };
        self.timeline_summary(Some(changed))
    }

    fn timeline_summary(&self, changed: Option<bool>) -> String {
        let current = self.agent.subscriptions.current();
        let names: Vec<&str> = current.timelines.iter().map(Timeline::short_name).collect();
        let list = if names.is_empty() { "none".to_string() } else { names.join(", ") };
        match changed {
            Some(false) => format!("Timelines: {list} (unchanged)"),
            _ => format!("Timelines: {list}"),
        }
    }

    async fn antenna(&self, action: SetAction) -> String {
        let subs = &self.agent.subscriptions;
        let changed = match action {
            SetAction::Status => return self.antenna_summary(None).await,
            SetAction::List => return self.antenna_inventory().await,
            SetAction::Add(selectors) => match self.resolve_antennas(&selectors, false).await {
                Ok(ids) => subs.add(ids.into_iter().map(Channel::Antenna)),
                Err(e) => return e,
            },
            SetAction::Del(selectors) => match self.resolve_antennas(&selectors, true).await {
                Ok(ids) => subs.remove(ids.into_iter().map(Channel::Antenna)),
                Err(e) => return e,
            },
            SetAction::Set(selectors) => match self.resolve_antennas(&selectors, false).await {
                Ok(ids) => subs.set_antennas(ids),
                Err(e) => return e,
            },
            SetAction::Clear => subs.set_antennas(Vec::new()),
            SetAction::Reset => subs.set_antennas(subs.configured().antennas.clone()),
        };
        self.antenna_summary(Some(changed)).await
    }

    /// Resolve selectors against the remote antenna list. When removing, an
    /// unreachable remote falls back to the subscribed ids.
    async fn resolve_antennas(&self, selectors: &[String], removing: bool) -> Result<Vec<String>, String> {
        let known = match self.agent.transport.list_antennas().await {
            Ok(list) => list,
            Err(_) if removing => self
                .agent
                .subscriptions
                .current()
                .antennas
                .into_iter()
                .map(|id| Antenna { name: id.clone(), id })
                .collect(),
            Err(e) => return Err(format!("Failed to fetch antennas: {e}")),
        };
        antenna::resolve_all(selectors, &known).map_err(|e| e.to_string())
    }

    async fn antenna_summary(&self, changed: Option<bool>) -> String {
        let ids = self.agent.subscriptions.current().antennas;
        if ids.is_empty() {
            return match changed {
                Some(false) => "Antennas: none (unchanged)".to_string(),
                _ => "Antennas: none".to_string(),
            };
        }
        let known = self.agent.transport.list_antennas().await.unwrap_or_default();
        let labels: Vec<String> = ids.iter().map(|id| antenna::label(id, &known)).collect();
        match changed {
            Some(false) => format!("Antennas: {} (unchanged)", labels.join(", ")),
            _ => format!("Antennas: {}", labels.join(", ")),
        }
    }

    async fn antenna_inventory(&self) -> String {
        let known = match self.agent.transport.list_antennas().await {
            Ok(list) => list,
            Err(e) => return format!("Failed to fetch antennas: {e}"),
        };
        if known.is_empty() {
            return "No antennas on this account.".to_string();
        }
        let subscribed = self.agent.subscriptions.current().antennas;
        let mut out = String::from("Antennas:");
        for a in &known {
            let mark = if subscribed.contains(&a.id) { "*" } else { "-" };
            out.push_str(&format!("\n{mark} {} ({})", a.name, a.id));
        }
        out
    }

    // -----------------------------------------------------------------------
    // Caches and storage
    // -----------------------------------------------------------------------

    fn cache_status(&self) -> String {
        format!(
            "cached users: {}, user locks: {}, recent events: {}",
            self.agent.policy.cached_users(),
            self.agent.locks.len(),
            self.agent.dedup.len()
        )
    }

    async fn cache_clear(&self, scope: CacheScope) -> String {
        let mut lines = Vec::new();
        if matches!(scope, CacheScope::Chat | CacheScope::All) {
            lines.push(match self.agent.policy.clear_memory().await {
                Ok(n) => format!("Cleared conversation memory ({n} users)."),
                Err(e) => format!("Failed to clear conversation memory: {e}"),
            });
        }
        if matches!(scope, CacheScope::Locks | CacheScope::All) {
            let n = self.agent.locks.clear_idle();
            lines.push(format!("Released {n} idle user locks."));
        }
        if matches!(scope, CacheScope::Events | CacheScope::All) {
            let n = self.agent.dedup.clear();
            lines.push(format!("Forgot {n} recent events."));
        }
        lines.join("\n")
    }

    async fn db_stats(&self) -> String {
        match self.agent.store.table_stats().await {
            Ok(stats) => {
                let mut out = String::from("Database:");
                for stat in stats {
                    out.push_str(&format!("\n{}: {} rows", stat.name, stat.rows));
                }
                out
            }
            Err(e) => format!("Failed to read database stats: {e}"),
        }
    }

    async fn db_clear(&self, plugin: &str, key: Option<&str>) -> String {
        if plugin.eq_ignore_ascii_case(CONTROL_NAMESPACE) {
            return "The control namespace is managed by the model and list commands.".to_string();
        }
        match PluginDataStore::delete(self.agent.store.as_ref(), plugin, key).await {
            Ok(n) => match key {
                Some(key) => format!("Deleted {n} entries from {plugin} (key {key})."),
                None => format!("Deleted {n} entries from {plugin}."),
            },
            Err(e) => format!("Failed to clear plugin data: {e}"),
        }
    }

    // -----------------------------------------------------------------------
    // Allow/deny lists
    // -----------------------------------------------------------------------

    async fn list(&self, kind: ListKind, action: SetAction) -> String {
        let policy = &self.agent.policy;
        let before = policy.list(kind);
        let result = match action {
            SetAction::Status | SetAction::List => return describe_list(kind, &before, None),
            SetAction::Add(users) => {
                let mut next = before.clone();
                next.add(users.iter().map(|u| UserKey::new(u)));
                policy.set_list(kind, next).await
            }
            SetAction::Del(users) => {
                let mut next = before.clone();
                next.remove(users.iter().map(|u| UserKey::new(u)));
                policy.set_list(kind, next).await
            }
            SetAction::Set(users) => policy.set_list(kind, UserList::new(users)).await,
            SetAction::Clear => policy.set_list(kind, UserList::default()).await,
            SetAction::Reset => policy.reset_list(kind).await.map(|_| ()),
        };
        match result {
            Ok(()) => {
                let after = policy.list(kind);
                describe_list(kind, &after, Some(after != before))
            }
            Err(e) => format!("Failed to update {kind}: {e}"),
        }
    }
}

fn describe_list(kind: ListKind, list: &UserList, changed: Option<bool>) -> String {
    let body = if list.is_empty() {
        format!("{kind}: empty")
    } else {
        format!("{kind} ({}): {}", list.len(), list.to_vec().join(", "))
    };
    match changed {
        Some(false) => format!("{body} (unchanged)"),
        _ => body,
    }
}

fn parse_timelines(names: &[String]) -> Result<Vec<Timeline>, String> {
    names
        .iter()
        .map(|n| {
            Timeline::parse(n).ok_or_else(|| {
                format!("Unknown timeline '{n}'. Valid: home, local, hybrid, global")
            })
        })
        .collect()
}

fn on_off(on: bool) -> &'static str {
    if on { "on" } else { "off" }
}

/// `3d 4h 5m`, or seconds for short spans.
fn format_duration(secs: i64) -> String {
    if secs < 60 {
        return format!("{secs}s");
    }
    let (days, rem) = (secs / 86_400, secs % 86_400);
    let (hours, rem) = (rem / 3_600, rem % 3_600);
    let minutes = rem / 60;
    let mut parts = Vec::new();
    if days > 0 {
        parts.push(format!("{days}d"));
    }
    if hours > 0 {
        parts.push(format!("{hours}h"));
    }
    if minutes > 0 || parts.is_empty() {
        parts.push(format!("{minutes}m"));
    }
    parts.join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::memory::MemoryStore;
    use crate::testing::Fixture;
    use serde_json::json;
    use skylark_types::subscription::SubscriptionSet;

    fn interpreter(fx: &Fixture) -> CommandInterpreter<MemoryStore> {
        CommandInterpreter::new(fx.agent.clone())
    }

    #[tokio::test]
    async fn unknown_commands_answer_with_help() {
        let fx = Fixture::builder().build().await;
        let cmd = interpreter(&fx);
        let reply = cmd.execute("^whatever").await;
        assert!(reply.starts_with("Commands:"));
        assert!(reply.contains("^timeline"));
        assert_eq!(cmd.execute("^enable").await, "Usage: ^enable <plugin>");
    }

    #[tokio::test]
    async fn timeline_mutations_are_idempotent() {
        let fx = Fixture::builder()
            .subscriptions(SubscriptionSet::new([Timeline::Home], Vec::new()))
            .build()
            .await;
        let cmd = interpreter(&fx);

        assert_eq!(cmd.execute("^timeline add local").await, "Timelines: home, local");
        assert_eq!(
            cmd.execute("^timeline add local").await,
            "Timelines: home, local (unchanged)"
        );
        assert_eq!(cmd.execute("^timeline del home").await, "Timelines: local");
        assert_eq!(cmd.execute("^timeline clear").await, "Timelines: none");
        assert_eq!(cmd.execute("^timeline reset").await, "Timelines: home");
        assert!(cmd.execute("^timeline add fediverse").await.starts_with("Unknown timeline"));

        let set = fx.agent.subscriptions.current();
        assert_eq!(set.channels()[0], Channel::Main);
    }

    #[tokio::test]
    async fn antennas_resolve_by_name() {
        let fx = Fixture::builder().build().await;
        fx.transport.set_antennas(vec![
            Antenna { id: "a1".into(), name: "Cats".into() },
            Antenna { id: "a2".into(), name: "cats".into() },
            Antenna { id: "a3".into(), name: "Dogs".into() },
        ]);
        let cmd = interpreter(&fx);

        assert_eq!(cmd.execute("^antenna add dogs").await, "Antennas: Dogs (a3)");
        assert!(cmd.execute("^antenna add CATS").await.contains("not unique"));
        assert_eq!(cmd.execute("^antenna add Cats").await, "Antennas: Cats (a1), Dogs (a3)");
        assert!(cmd.execute("^antenna add birds").await.contains("birds"));

        let listing = cmd.execute("^antenna list").await;
        assert!(listing.contains("* Dogs (a3)"));
        assert!(listing.contains("- cats (a2)"));

        fx.transport.set_failing(true);
        assert_eq!(cmd.execute("^antenna del a3").await, "Antennas: a1");
        assert!(cmd.execute("^antenna add a2").await.starts_with("Failed to fetch antennas"));
    }

    #[tokio::test]
    async fn lists_persist_and_reset() {
        let fx = Fixture::builder().build().await;
        let cmd = interpreter(&fx);

        assert_eq!(cmd.execute("^blacklist add @Spam").await, "blacklist (1): spam");
        assert_eq!(cmd.execute("^blacklist add spam").await, "blacklist (1): spam (unchanged)");
        let stored = fx.store.get(CONTROL_NAMESPACE, "blacklist").await.unwrap();
        assert_eq!(stored.as_deref(), Some(r#"["spam"]"#));

        assert_eq!(cmd.execute("^blacklist reset").await, "blacklist: empty");
        assert!(fx.store.get(CONTROL_NAMESPACE, "blacklist").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn model_switch_is_validated() {
        let fx = Fixture::builder()
            .models(vec!["test-model".into(), "big-model".into()])
            .build()
            .await;
        let cmd = interpreter(&fx);

        assert_eq!(cmd.execute("^model big-model").await, "Model switched to big-model.");
        assert!(cmd.execute("^model tiny").await.starts_with("Cannot switch model"));
        assert_eq!(fx.agent.model.current(), "big-model");
        assert_eq!(cmd.execute("^model reset").await, "Model reset to test-model.");
    }

    #[tokio::test]
    async fn plugin_lifecycle_commands() {
        let fx = Fixture::builder()
            .plugin("greeter", json!({"enabled": true, "trigger": "ping", "reply": "pong"}))
            .build()
            .await;
        let cmd = interpreter(&fx);

        assert_eq!(cmd.execute("^disable greeter").await, "Plugin greeter disabled.");
        assert_eq!(cmd.execute("^disable greeter").await, "Plugin greeter disabled.");
        assert!(cmd.execute("^plugins").await.contains("greeter [off]"));
        assert_eq!(cmd.execute("^enable Greeter").await, "Plugin greeter enabled.");
        assert_eq!(cmd.execute("^reload greeter").await, "Plugin greeter reloaded.");
        assert!(cmd.execute("^enable nope").await.contains("not found"));
    }

    #[tokio::test]
    async fn cache_and_db_commands() {
        let fx = Fixture::builder().build().await;
        let cmd = interpreter(&fx);
        fx.agent.dedup.observe("mention:1");
        fx.store.set("radar", "seen", "[]").await.unwrap();

        assert!(cmd.execute("^cache").await.contains("recent events: 1"));
        assert_eq!(cmd.execute("^cache clear events").await, "Forgot 1 recent events.");
        assert_eq!(cmd.execute("^cache clear events").await, "Forgot 0 recent events.");

        assert_eq!(cmd.execute("^dbclear radar").await, "Deleted 1 entries from radar.");
        assert!(cmd.execute("^dbclear control").await.contains("managed"));
        assert!(cmd.execute("^dbstats").await.starts_with("Database:"));
    }

    #[tokio::test]
    async fn toggles_report_state() {
        let fx = Fixture::builder().build().await;
        let cmd = interpreter(&fx);
        assert_eq!(cmd.execute("^autopost off").await, "auto-post: off");
        assert_eq!(cmd.execute("^autopost off").await, "auto-post: off (unchanged)");
        assert!(cmd.execute("^status").await.contains("autopost: off"));
    }

    #[test]
    fn durations_are_compact() {
        assert_eq!(format_duration(42), "42s");
        assert_eq!(format_duration(3_660), "1h 1m");
        assert_eq!(format_duration(90_000), "1d 1h");
    }
}
