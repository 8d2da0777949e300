//! Test doubles for infra tests: a transport that records every action and
//! an LLM that answers with a fixed string.

use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use skylark_core::llm::box_provider::BoxLlmProvider;
use skylark_core::llm::provider::LlmProvider;
use skylark_core::plugin::{PluginContext, PluginServices};
use skylark_core::storage::memory::MemoryStore;
use skylark_core::transport::Transport;
use skylark_core::transport::box_transport::BoxTransport;
use skylark_types::error::TransportError;
use skylark_types::event::{Antenna, NoteDraft};
use skylark_types::llm::{GenerateRequest, LlmError};
use skylark_types::plugin::PluginManifest;
use skylark_types::user::UserRef;

#[derive(Clone, Default)]
pub struct RecordingTransport {
    pub notes: Arc<Mutex<Vec<NoteDraft>>>,
    pub reactions: Arc<Mutex<Vec<(String, String)>>>,
}

impl RecordingTransport {
    pub fn notes(&self) -> Vec<NoteDraft> {
        self.notes.lock().unwrap().clone()
    }

    pub fn reactions(&self) -> Vec<(String, String)> {
        self.reactions.lock().unwrap().clone()
    }
}

impl Transport for RecordingTransport {
    async fn create_note(&self, draft: &NoteDraft) -> Result<String, TransportError> {
        let mut notes = self.notes.lock().unwrap();
        notes.push(draft.clone());
        Ok(format!("created{}", notes.len()))
    }

    async fn react(&self, note_id: &str, reaction: &str) -> Result<(), TransportError> {
        self.reactions
            .lock()
            .unwrap()
            .push((note_id.to_string(), reaction.to_string()));
        Ok(())
    }

    async fn send_chat(&self, _user_id: &str, _text: &str) -> Result<(), TransportError> {
        Ok(())
    }

    async fn send_room_chat(&self, _room_id: &str, _text: &str) -> Result<(), TransportError> {
        Ok(())
    }

    async fn list_antennas(&self) -> Result<Vec<Antenna>, TransportError> {
        Ok(Vec::new())
    }

    async fn current_user(&self) -> Result<UserRef, TransportError> {
        Ok(UserRef {
            id: "bot1".into(),
            username: Some("skylark".into()),
            host: None,
            is_bot: true,
        })
    }
}

#[derive(Clone)]
pub struct FixedLlm {
    pub answer: String,
    pub prompts: Arc<Mutex<Vec<String>>>,
}

impl FixedLlm {
    pub fn new(answer: &str) -> Self {
        Self {
            answer: answer.to_string(),
            prompts: Arc::default(),
        }
    }
}

impl LlmProvider for FixedLlm {
    fn name(&self) -> &str {
        "fixed"
    }

    fn default_model(&self) -> &str {
        "fixed-model"
    }

    async fn generate(&self, request: &GenerateRequest) -> Result<String, LlmError> {
        self.prompts.lock().unwrap().push(request.prompt.clone());
        Ok(self.answer.clone())
    }
}

/// Everything a plugin test needs to build and inspect one instance.
pub struct PluginHarness {
    pub store: Arc<MemoryStore>,
    pub transport: RecordingTransport,
    pub llm: FixedLlm,
}

impl PluginHarness {
    pub fn new() -> Self {
        Self {
            store: Arc::new(MemoryStore::new()),
            transport: RecordingTransport::default(),
            llm: FixedLlm::new("generated text"),
        }
    }

    pub fn context(&self, name: &str, settings: serde_json::Value, dir: Option<PathBuf>) -> PluginContext {
        let manifest: PluginManifest = serde_json::from_value(settings).unwrap();
        let services = PluginServices::new(
            self.store.clone(),
            Arc::new(BoxTransport::new(self.transport.clone())),
            Arc::new(BoxLlmProvider::new(self.llm.clone())),
            "You are a test bot.",
        );
        PluginContext::new(name, dir, manifest, &services)
    }
}
