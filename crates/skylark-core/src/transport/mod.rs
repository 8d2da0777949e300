//! Social-network transport ports.
//!
//! [`Transport`] covers the request/response actions (post, reply, react,
//! repost, quote, chat, lookups). [`stream::StreamConnector`] covers the
//! persistent event stream. Implementations live in skylark-infra.

pub mod box_transport;
pub mod stream;

use std::future::Future;

use skylark_types::error::TransportError;
use skylark_types::event::{Antenna, NoteDraft};
use skylark_types::user::UserRef;

/// Outbound actions against the remote instance.
///
/// Every call is expected to carry its own timeout and surface it as
/// [`TransportError::Timeout`].
pub trait Transport: Send + Sync {
    /// Create a note (post, reply, renote or quote). Returns the new note id.
    fn create_note(
        &self,
        draft: &NoteDraft,
    ) -> impl Future<Output = Result<String, TransportError>> + Send;

    fn react(
        &self,
        note_id: &str,
        reaction: &str,
    ) -> impl Future<Output = Result<(), TransportError>> + Send;

    fn send_chat(
        &self,
        user_id: &str,
        text: &str,
    ) -> impl Future<Output = Result<(), TransportError>> + Send;

    fn send_room_chat(
        &self,
        room_id: &str,
        text: &str,
    ) -> impl Future<Output = Result<(), TransportError>> + Send;

    /// Antennas owned by the bot account.
    fn list_antennas(&self) -> impl Future<Output = Result<Vec<Antenna>, TransportError>> + Send;

    /// The bot's own account.
    fn current_user(&self) -> impl Future<Output = Result<UserRef, TransportError>> + Send;
}
