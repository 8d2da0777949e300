//! Responder -- turns one decoded event into at most one outbound action.
//!
//! Mentions and chats go through: operator command check (chat only),
//! authorization, plugin hooks, keyword hooks, then the LLM. Timeline and
//! antenna notes go to the interaction plugins. Every outbound failure is
//! logged here and never propagates back into the worker.

use std::sync::Arc;

use tracing::{debug, info, warn};

use skylark_types::event::{ChatMessage, Note, StreamEvent, Surface};
use skylark_types::llm::GenerateRequest;
use skylark_types::subscription::Channel;
use skylark_types::user::{UserKey, UserRef};

use crate::agent::{Agent, Switch};
use crate::command::CommandInterpreter;
use crate::policy::engine::Decision;
use crate::storage::Store;
use crate::stream::workers::EventHandler;

/// Where a reply goes.
enum Target<'a> {
    Note { id: &'a str, author: &'a UserRef },
    Direct { user_id: &'a str },
    Room { room_id: &'a str, author: &'a UserRef },
}

pub struct Responder<S: Store> {
    agent: Arc<Agent<S>>,
    commands: CommandInterpreter<S>,
}

impl<S: Store> Responder<S> {
    pub fn new(agent: Arc<Agent<S>>) -> Self {
        Self {
            commands: CommandInterpreter::new(agent.clone()),
            agent,
        }
    }

    async fn on_mention(&self, note: Note) {
        if !self.agent.switches.get(Switch::Mention) {
            return;
        }
        let prompt = self.agent.bot.strip_mentions(&note.effective_text());
        let target = Target::Note {
            id: &note.id,
            author: &note.user,
        };
        let _guard = self.agent.locks.lock(&note.user.key()).await;
        self.converse(&note.user, Surface::Mention, &prompt, &target, || {
            self.agent.plugins.dispatch_mention(&note)
        })
        .await;
    }

    async fn on_chat(&self, message: ChatMessage) {
        if !self.agent.switches.get(Switch::Chat) {
            return;
        }
        let text = message.text.as_deref().unwrap_or("").trim();
        if text.is_empty() {
            return;
        }
        if let Some(room_id) = message.room_id.as_deref() {
            if !self.agent.bot.is_mentioned_in(text) {
                return;
            }
            let target = Target::Room {
                room_id,
                author: &message.from,
            };
            self.on_chat_text(&message, text, &target).await;
        } else {
            let target = Target::Direct {
                user_id: &message.from.id,
            };
            self.on_chat_text(&message, text, &target).await;
        }
    }

    async fn on_chat_text(&self, message: &ChatMessage, text: &str, target: &Target<'_>) {
        let prompt = self.agent.bot.strip_mentions(text);
        let _guard = self.agent.locks.lock(&message.from.key()).await;

        if self.commands.is_command(&prompt) && self.agent.is_operator(&message.from) {
            info!(user = %message.from.key(), command = %prompt, "operator command");
            let reply = self.commands.execute(&prompt).await;
            self.deliver(target, &reply).await;
            return;
        }

        self.converse(&message.from, Surface::Chat, &prompt, target, || {
            self.agent.plugins.dispatch_message(message)
        })
        .await;
    }

    async fn on_timeline_note(&self, channel: Channel, note: Note) {
        if !self.agent.plugins.has_enabled() {
            return;
        }
        let handled = self
            .agent
            .plugins
            .dispatch_timeline_note(&channel, &note)
            .await;
        if handled > 0 {
            debug!(channel = %channel, note = %note.id, handled, "timeline note handled");
        }
    }

    /// Authorize, then answer from a plugin hook, a keyword hook or the LLM.
    async fn converse<F, Fut>(
        &self,
        user: &UserRef,
        surface: Surface,
        prompt: &str,
        target: &Target<'_>,
        plugin_hook: F,
    ) where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = Option<skylark_types::plugin::HookReply>>,
    {
        let key = user.key();
        match self.agent.policy.authorize(user, surface).await {
            Decision::Allow => {}
            Decision::Deny { reason, reply } => {
                debug!(user = %key, ?reason, "response denied");
                if let Some(text) = reply.filter(|t| !t.trim().is_empty()) {
                    self.deliver(target, &text).await;
                }
                return;
            }
        }

        if let Some(hook) = plugin_hook().await {
            if let Some(text) = hook.response {
                debug!(user = %key, plugin = %hook.plugin, "plugin answered");
                self.finish(&key, prompt, &text, target).await;
            }
            return;
        }

        if prompt.is_empty() {
            return;
        }

        if let Some(hook) = self.agent.plugins.keyword_match(prompt, surface).await {
            if let Some(text) = hook.response {
                debug!(user = %key, plugin = %hook.plugin, "keyword matched");
                self.finish(&key, prompt, &text, target).await;
            }
            return;
        }

        let request = self.request_for(&key, prompt).await;
        match self.agent.llm.generate(&request).await {
            Ok(reply) if !reply.trim().is_empty() => {
                self.finish(&key, prompt, reply.trim(), target).await;
            }
            Ok(_) => {
                warn!(user = %key, "model returned an empty reply");
                self.deliver(target, &self.agent.persona.failure_reply).await;
            }
            Err(e) => {
                warn!(user = %key, error = %e, "model call failed");
                self.deliver(target, &self.agent.persona.failure_reply).await;
            }
        }
    }

    async fn request_for(&self, key: &UserKey, prompt: &str) -> GenerateRequest {
        let history = self.agent.policy.history(key).await;
        let mut request = GenerateRequest::new(prompt)
            .with_system(self.agent.persona.system_prompt.clone())
            .with_history(history);
        request.model = Some(self.agent.model.current());
        request
    }

    /// Deliver a reply and, if it went out, record the turn and the exchange,
    /// whichever of plugin, keyword or model produced it.
    async fn finish(&self, key: &UserKey, prompt: &str, reply: &str, target: &Target<'_>) {
        if !self.deliver(target, reply).await {
            return;
        }
        self.agent.policy.record_delivery(key, true).await;
        self.agent.policy.append_exchange(key, prompt, reply).await;
    }

    async fn deliver(&self, target: &Target<'_>, text: &str) -> bool {
        let transport = &self.agent.transport;
        let result = match target {
            Target::Note { id, author } => {
                transport.reply(id, &addressed(author, text)).await.map(|_| ())
            }
            Target::Direct { user_id } => transport.send_chat(user_id, text).await,
            Target::Room { room_id, author } => {
                transport.send_room_chat(room_id, &addressed(author, text)).await
            }
        };
        match result {
            Ok(()) => true,
            Err(e) if e.is_retryable() => {
                warn!(error = %e, "reply not delivered, transport unavailable");
                false
            }
            Err(e) => {
                warn!(error = %e, "reply rejected by remote");
                false
            }
        }
    }
}

/// Prefix `text` with the author's handle.
fn addressed(author: &UserRef, text: &str) -> String {
    match author.mention() {
        Some(handle) => format!("{handle} {text}"),
        None => text.to_string(),
    }
}

impl<S: Store> EventHandler for Responder<S> {
    async fn handle(&self, event: StreamEvent) {
        match event {
            StreamEvent::Mention(note) => self.on_mention(note).await,
            StreamEvent::Chat(message) => self.on_chat(message).await,
            StreamEvent::Note { channel, note } => self.on_timeline_note(channel, note).await,
            StreamEvent::Unknown { .. } => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{self, Action, Fixture};
    use chrono::Duration;
    use serde_json::json;
    use skylark_types::config::{LimitDuration, ResponseConfig, TurnLimit};

    fn rate_limited(secs: i64) -> ResponseConfig {
        ResponseConfig {
            rate_limit: LimitDuration::from_secs(secs),
            rate_limit_reply: "slow down".into(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn chat_gets_model_reply_then_rate_limit_text() {
        let fx = Fixture::builder().response(rate_limited(30)).build().await;
        let responder = Responder::new(fx.agent.clone());

        responder
            .handle(StreamEvent::Chat(testing::chat("alice", "hello")))
            .await;
        fx.clock.advance(Duration::seconds(10));
        responder
            .handle(StreamEvent::Chat(testing::chat("alice", "again")))
            .await;

        assert_eq!(fx.transport.chats(), vec!["reply from model", "slow down"]);
        assert_eq!(fx.llm.calls(), 1);
        let history = fx.agent.policy.history(&UserKey::new("alice")).await;
        assert_eq!(history.len(), 2);
    }

    #[tokio::test]
    async fn history_and_model_reach_the_request() {
        let fx = Fixture::builder().build().await;
        let responder = Responder::new(fx.agent.clone());
        responder
            .handle(StreamEvent::Chat(testing::chat("alice", "first")))
            .await;
        responder
            .handle(StreamEvent::Chat(testing::chat("alice", "second")))
            .await;

        let request = fx.llm.last_request().unwrap();
        assert_eq!(request.prompt, "second");
        assert_eq!(request.history.len(), 2);
        assert_eq!(request.system.as_deref(), Some("You are a test bot."));
        assert_eq!(request.model.as_deref(), Some("test-model"));
    }

    #[tokio::test]
    async fn mention_reply_is_addressed_and_counts_a_turn() {
        let config = ResponseConfig {
            max_turns: TurnLimit::new(1),
            max_turns_reply: "that's enough".into(),
            ..Default::default()
        };
        let fx = Fixture::builder().response(config).build().await;
        let responder = Responder::new(fx.agent.clone());

        let note = testing::note("n1", "alice", "@skylark tell me a joke");
        responder.handle(StreamEvent::Mention(note.clone())).await;
        responder
            .handle(StreamEvent::Mention(testing::note("n2", "alice", "@skylark more")))
            .await;

        let notes = fx.transport.notes();
        assert_eq!(notes.len(), 2);
        assert_eq!(notes[0].reply_id.as_deref(), Some("n1"));
        assert_eq!(notes[0].text.as_deref(), Some("@alice reply from model"));
        assert_eq!(notes[1].text.as_deref(), Some("@alice that's enough"));
        assert_eq!(fx.llm.last_request().unwrap().prompt, "tell me a joke");
    }

    #[tokio::test]
    async fn deny_listed_users_get_silence() {
        let config = ResponseConfig {
            blacklist: vec!["alice".into()],
            ..Default::default()
        };
        let fx = Fixture::builder().response(config).build().await;
        let responder = Responder::new(fx.agent.clone());
        responder
            .handle(StreamEvent::Chat(testing::chat("alice", "hi")))
            .await;
        assert!(fx.transport.actions().is_empty());
        assert_eq!(fx.llm.calls(), 0);
    }

    #[tokio::test]
    async fn model_failure_sends_failure_reply_without_recording() {
        let fx = Fixture::builder().llm(testing::ScriptedLlm::failing()).build().await;
        let responder = Responder::new(fx.agent.clone());
        responder
            .handle(StreamEvent::Chat(testing::chat("alice", "hi")))
            .await;

        assert_eq!(fx.transport.chats(), vec!["something broke"]);
        let key = UserKey::new("alice");
        assert!(fx.agent.policy.history(&key).await.is_empty());
        assert!(fx.agent.policy.limit_state(&key).await.last_response_at.is_none());
    }

    #[tokio::test]
    async fn plugin_and_keyword_replies_bypass_the_model() {
        let fx = Fixture::builder()
            .plugin("greeter", json!({"enabled": true, "trigger": "ping", "reply": "pong"}))
            .plugin("keys", json!({"enabled": true, "keyword": "weather", "answer": "sunny"}))
            .build()
            .await;
        let responder = Responder::new(fx.agent.clone());

        responder
            .handle(StreamEvent::Chat(testing::chat("alice", "ping")))
            .await;
        responder
            .handle(StreamEvent::Chat(testing::chat("bob", "weather")))
            .await;

        assert_eq!(fx.transport.chats(), vec!["pong", "sunny"]);
        assert_eq!(fx.llm.calls(), 0);
        let turns = fx.agent.policy.limit_state(&UserKey::new("alice")).await.turns;
        assert_eq!(turns, 1);
    }

    #[tokio::test]
    async fn plugin_and_keyword_replies_enter_the_window() {
        let fx = Fixture::builder()
            .plugin("greeter", json!({"enabled": true, "trigger": "ping", "reply": "pong"}))
            .plugin("keys", json!({"enabled": true, "keyword": "weather", "answer": "sunny"}))
            .build()
            .await;
        let responder = Responder::new(fx.agent.clone());

        responder
            .handle(StreamEvent::Chat(testing::chat("alice", "weather")))
            .await;
        responder
            .handle(StreamEvent::Chat(testing::chat("alice", "ping")))
            .await;

        let history = fx.agent.policy.history(&UserKey::new("alice")).await;
        let texts: Vec<&str> = history.iter().map(|t| t.text.as_str()).collect();
        assert_eq!(texts, vec!["weather", "sunny", "ping", "pong"]);

        // The next model call sees both exchanges.
        responder
            .handle(StreamEvent::Chat(testing::chat("alice", "and tomorrow?")))
            .await;
        assert_eq!(fx.llm.last_request().unwrap().history.len(), 4);
    }

    #[tokio::test]
    async fn room_chat_needs_a_mention_and_is_addressed() {
        let fx = Fixture::builder().build().await;
        let responder = Responder::new(fx.agent.clone());

        responder
            .handle(StreamEvent::Chat(testing::room_chat("alice", "r1", "just chatting")))
            .await;
        assert!(fx.transport.actions().is_empty());

        responder
            .handle(StreamEvent::Chat(testing::room_chat("alice", "r1", "@skylark hi")))
            .await;
        assert_eq!(
            fx.transport.actions(),
            vec![Action::RoomChat {
                room_id: "r1".into(),
                text: "@alice reply from model".into(),
            }]
        );
    }

    #[tokio::test]
    async fn operator_commands_are_answered_without_the_model() {
        let fx = Fixture::builder().operator("admin").build().await;
        let responder = Responder::new(fx.agent.clone());

        responder
            .handle(StreamEvent::Chat(testing::chat("admin", "^chat off")))
            .await;
        assert!(!fx.agent.switches.get(Switch::Chat));
        assert_eq!(fx.llm.calls(), 0);
        assert_eq!(fx.transport.chats().len(), 1);

        // Chat is now off, nothing else is answered.
        responder
            .handle(StreamEvent::Chat(testing::chat("alice", "hi")))
            .await;
        assert_eq!(fx.transport.chats().len(), 1);
    }

    #[tokio::test]
    async fn non_operators_commands_go_to_the_model() {
        let fx = Fixture::builder().operator("admin").build().await;
        let responder = Responder::new(fx.agent.clone());
        responder
            .handle(StreamEvent::Chat(testing::chat("mallory", "^chat off")))
            .await;
        assert!(fx.agent.switches.get(Switch::Chat));
        assert_eq!(fx.llm.calls(), 1);
    }

    #[tokio::test]
    async fn outbound_failures_are_swallowed() {
        let fx = Fixture::builder().build().await;
        fx.transport.set_failing(true);
        let responder = Responder::new(fx.agent.clone());
        responder
            .handle(StreamEvent::Chat(testing::chat("alice", "hi")))
            .await;
        let state = fx.agent.policy.limit_state(&UserKey::new("alice")).await;
        assert_eq!(state.turns, 0);
    }

    #[tokio::test]
    async fn mention_toggle_silences_mentions() {
        let fx = Fixture::builder().build().await;
        fx.agent.switches.set(Switch::Mention, false);
        let responder = Responder::new(fx.agent.clone());
        responder
            .handle(StreamEvent::Mention(testing::note("n1", "alice", "@skylark hi")))
            .await;
        assert!(fx.transport.actions().is_empty());
    }
}
