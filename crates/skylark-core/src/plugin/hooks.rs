//! The plugin capability trait.
//!
//! Every hook has a default no-op body, so a plugin implements only what it
//! offers: content for the auto-poster, timeline interaction, message
//! handling, or keyword replies. Uses RPITIT like the other ports.

use std::future::Future;

use skylark_types::error::PluginError;
use skylark_types::event::{ChatMessage, Note, Surface};
use skylark_types::plugin::AutoPostContribution;
use skylark_types::subscription::Channel;

/// Result of a message hook.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HookOutcome {
    /// Not interested; the next plugin (or the LLM) handles the message.
    Pass,
    /// Handled; deliver this text back to the user.
    Reply(String),
    /// Handled; nothing to deliver.
    Handled,
}

pub trait Plugin: Send + Sync {
    fn description(&self) -> &str {
        ""
    }

    /// Called once before the instance serves any hook. An error keeps the
    /// instance out of service.
    fn initialize(&self) -> impl Future<Output = Result<(), PluginError>> + Send {
        async { Ok(()) }
    }

    fn on_mention(
        &self,
        _note: &Note,
    ) -> impl Future<Output = Result<HookOutcome, PluginError>> + Send {
        async { Ok(HookOutcome::Pass) }
    }

    fn on_message(
        &self,
        _message: &ChatMessage,
    ) -> impl Future<Output = Result<HookOutcome, PluginError>> + Send {
        async { Ok(HookOutcome::Pass) }
    }

    /// A note pushed by a timeline or antenna subscription. Returns whether
    /// the plugin acted on it.
    fn on_timeline_note(
        &self,
        _channel: &Channel,
        _note: &Note,
    ) -> impl Future<Output = Result<bool, PluginError>> + Send {
        async { Ok(false) }
    }

    fn on_auto_post(
        &self,
    ) -> impl Future<Output = Result<Option<AutoPostContribution>, PluginError>> + Send {
        async { Ok(None) }
    }

    /// Fixed reply for a message arriving on `surface`, bypassing the LLM.
    fn keyword_match(
        &self,
        _text: &str,
        _surface: Surface,
    ) -> impl Future<Output = Result<Option<String>, PluginError>> + Send {
        async { Ok(None) }
    }

    fn shutdown(&self) -> impl Future<Output = ()> + Send {
        async {}
    }
}
