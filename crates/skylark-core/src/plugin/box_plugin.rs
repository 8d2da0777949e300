//! BoxPlugin -- object-safe dynamic dispatch wrapper for [`Plugin`].
//!
//! Same blanket-impl pattern as `BoxLlmProvider`: an object-safe `PluginDyn`
//! with boxed futures, implemented for every `T: Plugin`.

use std::future::Future;
use std::pin::Pin;

use skylark_types::error::PluginError;
use skylark_types::event::{ChatMessage, Note, Surface};
use skylark_types::plugin::AutoPostContribution;
use skylark_types::subscription::Channel;

use super::hooks::{HookOutcome, Plugin};

type BoxFut<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

pub trait PluginDyn: Send + Sync {
    fn description(&self) -> &str;
    fn initialize_boxed(&self) -> BoxFut<'_, Result<(), PluginError>>;
    fn on_mention_boxed<'a>(&'a self, note: &'a Note) -> BoxFut<'a, Result<HookOutcome, PluginError>>;
    fn on_message_boxed<'a>(
        &'a self,
        message: &'a ChatMessage,
    ) -> BoxFut<'a, Result<HookOutcome, PluginError>>;
    fn on_timeline_note_boxed<'a>(
        &'a self,
        channel: &'a Channel,
        note: &'a Note,
    ) -> BoxFut<'a, Result<bool, PluginError>>;
    fn on_auto_post_boxed(&self) -> BoxFut<'_, Result<Option<AutoPostContribution>, PluginError>>;
    fn keyword_match_boxed<'a>(
        &'a self,
        text: &'a str,
        surface: Surface,
    ) -> BoxFut<'a, Result<Option<String>, PluginError>>;
    fn shutdown_boxed(&self) -> BoxFut<'_, ()>;
}

impl<T: Plugin> PluginDyn for T {
    fn description(&self) -> &str {
        Plugin::description(self)
    }

    fn initialize_boxed(&self) -> BoxFut<'_, Result<(), PluginError>> {
        Box::pin(self.initialize())
    }

    fn on_mention_boxed<'a>(&'a self, note: &'a Note) -> BoxFut<'a, Result<HookOutcome, PluginError>> {
        Box::pin(self.on_mention(note))
    }

    fn on_message_boxed<'a>(
        &'a self,
        message: &'a ChatMessage,
    ) -> BoxFut<'a, Result<HookOutcome, PluginError>> {
        Box::pin(self.on_message(message))
    }

    fn on_timeline_note_boxed<'a>(
        &'a self,
        channel: &'a Channel,
        note: &'a Note,
    ) -> BoxFut<'a, Result<bool, PluginError>> {
        Box::pin(self.on_timeline_note(channel, note))
    }

    fn on_auto_post_boxed(&self) -> BoxFut<'_, Result<Option<AutoPostContribution>, PluginError>> {
        Box::pin(self.on_auto_post())
    }

    fn keyword_match_boxed<'a>(
        &'a self,
        text: &'a str,
        surface: Surface,
    ) -> BoxFut<'a, Result<Option<String>, PluginError>> {
        Box::pin(self.keyword_match(text, surface))
    }

    fn shutdown_boxed(&self) -> BoxFut<'_, ()> {
        Box::pin(self.shutdown())
    }
}

/// Type-erased plugin instance held by the runtime.
pub struct BoxPlugin {
    inner: Box<dyn PluginDyn + Send + Sync>,
}

impl BoxPlugin {
    pub fn new<T: Plugin + 'static>(plugin: T) -> Self {
        Self {
            inner: Box::new(plugin),
        }
    }

    pub fn description(&self) -> &str {
        self.inner.description()
    }

    pub async fn initialize(&self) -> Result<(), PluginError> {
        self.inner.initialize_boxed().await
    }

    pub async fn on_mention(&self, note: &Note) -> Result<HookOutcome, PluginError> {
        self.inner.on_mention_boxed(note).await
    }

    pub async fn on_message(&self, message: &ChatMessage) -> Result<HookOutcome, PluginError> {
        self.inner.on_message_boxed(message).await
    }

    pub async fn on_timeline_note(&self, channel: &Channel, note: &Note) -> Result<bool, PluginError> {
        self.inner.on_timeline_note_boxed(channel, note).await
    }

    pub async fn on_auto_post(&self) -> Result<Option<AutoPostContribution>, PluginError> {
        self.inner.on_auto_post_boxed().await
    }

    pub async fn keyword_match(
        &self,
        text: &str,
        surface: Surface,
    ) -> Result<Option<String>, PluginError> {
        self.inner.keyword_match_boxed(text, surface).await
    }

    pub async fn shutdown(&self) {
        self.inner.shutdown_boxed().await
    }
}

impl std::fmt::Debug for BoxPlugin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BoxPlugin")
            .field("description", &self.description())
            .finish()
    }
}
