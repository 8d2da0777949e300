//! BoxTransport -- object-safe dynamic dispatch wrapper for [`Transport`].
//!
//! Same blanket-impl pattern as `BoxLlmProvider`. Adds the convenience
//! actions (reply, repost, quote) on top of `create_note`.

use std::future::Future;
use std::pin::Pin;

use skylark_types::error::TransportError;
use skylark_types::event::{Antenna, NoteDraft, Visibility};
use skylark_types::user::UserRef;

use super::Transport;

type BoxFut<'a, T> = Pin<Box<dyn Future<Output = Result<T, TransportError>> + Send + 'a>>;

pub trait TransportDyn: Send + Sync {
    fn create_note_boxed<'a>(&'a self, draft: &'a NoteDraft) -> BoxFut<'a, String>;
    fn react_boxed<'a>(&'a self, note_id: &'a str, reaction: &'a str) -> BoxFut<'a, ()>;
    fn send_chat_boxed<'a>(&'a self, user_id: &'a str, text: &'a str) -> BoxFut<'a, ()>;
    fn send_room_chat_boxed<'a>(&'a self, room_id: &'a str, text: &'a str) -> BoxFut<'a, ()>;
    fn list_antennas_boxed(&self) -> BoxFut<'_, Vec<Antenna>>;
    fn current_user_boxed(&self) -> BoxFut<'_, UserRef>;
}

impl<T: Transport> TransportDyn for T {
    fn create_note_boxed<'a>(&'a self, draft: &'a NoteDraft) -> BoxFut<'a, String> {
        Box::pin(self.create_note(draft))
    }

    fn react_boxed<'a>(&'a self, note_id: &'a str, reaction: &'a str) -> BoxFut<'a, ()> {
        Box::pin(self.react(note_id, reaction))
    }

    fn send_chat_boxed<'a>(&'a self, user_id: &'a str, text: &'a str) -> BoxFut<'a, ()> {
        Box::pin(self.send_chat(user_id, text))
    }

    fn send_room_chat_boxed<'a>(&'a self, room_id: &'a str, text: &'a str) -> BoxFut<'a, ()> {
        Box::pin(self.send_room_chat(room_id, text))
    }

    fn list_antennas_boxed(&self) -> BoxFut<'_, Vec<Antenna>> {
        Box::pin(self.list_antennas())
    }

    fn current_user_boxed(&self) -> BoxFut<'_, UserRef> {
        Box::pin(self.current_user())
    }
}

/// Type-erased transport shared by the pipeline, plugins and auto-poster.
pub struct BoxTransport {
    inner: Box<dyn TransportDyn + Send + Sync>,
}

impl BoxTransport {
    pub fn new<T: Transport + 'static>(transport: T) -> Self {
        Self {
            inner: Box::new(transport),
        }
    }

    pub async fn create_note(&self, draft: &NoteDraft) -> Result<String, TransportError> {
        self.inner.create_note_boxed(draft).await
    }

    pub async fn post_note(
        &self,
        text: &str,
        visibility: Visibility,
        local_only: bool,
    ) -> Result<String, TransportError> {
        self.create_note(&NoteDraft::post(text, visibility, local_only))
            .await
    }

    pub async fn reply(&self, target_id: &str, text: &str) -> Result<String, TransportError> {
        self.create_note(&NoteDraft::reply(target_id, text)).await
    }

    pub async fn repost(
        &self,
        target_id: &str,
        visibility: Option<Visibility>,
    ) -> Result<String, TransportError> {
        self.create_note(&NoteDraft::repost(target_id, visibility))
            .await
    }

    pub async fn quote(
        &self,
        target_id: &str,
        text: &str,
        visibility: Option<Visibility>,
    ) -> Result<String, TransportError> {
        self.create_note(&NoteDraft::quote(target_id, text, visibility))
            .await
    }

    pub async fn react(&self, note_id: &str, reaction: &str) -> Result<(), TransportError> {
        self.inner.react_boxed(note_id, reaction).await
    }

    pub async fn send_chat(&self, user_id: &str, text: &str) -> Result<(), TransportError> {
        self.inner.send_chat_boxed(user_id, text).await
    }

    pub async fn send_room_chat(&self, room_id: &str, text: &str) -> Result<(), TransportError> {
        self.inner.send_room_chat_boxed(room_id, text).await
    }

    pub async fn list_antennas(&self) -> Result<Vec<Antenna>, TransportError> {
        self.inner.list_antennas_boxed().await
    }

    pub async fn current_user(&self) -> Result<UserRef, TransportError> {
        self.inner.current_user_boxed().await
    }
}

impl std::fmt::Debug for BoxTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BoxTransport").finish_non_exhaustive()
    }
}
