//! Misskey streaming wire format.
//!
//! Outbound control frames:
//! `{"type":"connect","body":{"channel","id","params"}}` and
//! `{"type":"disconnect","body":{"id"}}`.
//! Inbound events arrive as `{"type":"channel","body":{"id","type","body"}}`
//! where `id` is the id we chose when joining.

use std::collections::HashMap;

use serde::Deserialize;
use serde_json::json;

use skylark_types::error::TransportError;
use skylark_types::event::{ChatMessage, Note, StreamEvent, Visibility};
use skylark_types::subscription::Channel;
use skylark_types::user::UserRef;

pub fn connect_frame(id: &str, channel: &Channel) -> String {
    json!({
        "type": "connect",
        "body": {
            "channel": channel.wire_name(),
            "id": id,
            "params": channel.params(),
        }
    })
    .to_string()
}

pub fn disconnect_frame(id: &str) -> String {
    json!({"type": "disconnect", "body": {"id": id}}).to_string()
}

// ---------------------------------------------------------------------------
// Wire structs
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
struct Envelope {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    body: serde_json::Value,
}

#[derive(Deserialize)]
struct ChannelBody {
    id: String,
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    body: serde_json::Value,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireUser {
    id: String,
    username: Option<String>,
    host: Option<String>,
    #[serde(default)]
    is_bot: bool,
}

impl From<WireUser> for UserRef {
    fn from(u: WireUser) -> Self {
        UserRef {
            id: u.id,
            username: u.username,
            host: u.host,
            is_bot: u.is_bot,
        }
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireNote {
    id: String,
    user: WireUser,
    text: Option<String>,
    cw: Option<String>,
    visibility: Option<String>,
    reply_id: Option<String>,
    #[serde(default)]
    mentions: Vec<String>,
    #[serde(default)]
    file_ids: Vec<String>,
    renote: Option<Box<WireNote>>,
    my_reaction: Option<String>,
}

impl From<WireNote> for Note {
    fn from(n: WireNote) -> Self {
        Note {
            id: n.id,
            user: n.user.into(),
            text: n.text,
            cw: n.cw,
            visibility: n.visibility.as_deref().and_then(Visibility::parse),
            reply_id: n.reply_id,
            mentions: n.mentions,
            file_count: n.file_ids.len(),
            renote: n.renote.map(|r| Box::new(Note::from(*r))),
            my_reaction: n.my_reaction,
        }
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireChat {
    id: String,
    from_user_id: Option<String>,
    from_user: Option<WireUser>,
    to_user_id: Option<String>,
    to_room_id: Option<String>,
    text: Option<String>,
}

impl WireChat {
    fn into_message(self) -> Result<ChatMessage, TransportError> {
        let from = match (self.from_user, self.from_user_id) {
            (Some(user), _) => user.into(),
            (None, Some(id)) => UserRef {
                id,
                username: None,
                host: None,
                is_bot: false,
            },
            (None, None) => {
                return Err(TransportError::Malformed(format!(
                    "chat message {} has no sender",
                    self.id
                )));
            }
        };
        Ok(ChatMessage {
            id: self.id,
            from,
            to_user_id: self.to_user_id,
            room_id: self.to_room_id,
            text: self.text,
        })
    }
}

// ---------------------------------------------------------------------------
// Decoding
// ---------------------------------------------------------------------------

/// Decode one inbound text frame.
///
/// `joined` maps the ids we assigned when joining to their channels. A frame
/// that is valid JSON but not something we act on decodes to
/// [`StreamEvent::Unknown`]; broken JSON or a payload that does not match the
/// event it claims to be is an error.
pub fn decode(text: &str, joined: &HashMap<String, Channel>) -> Result<StreamEvent, TransportError> {
    let envelope: Envelope = serde_json::from_str(text)
        .map_err(|e| TransportError::Malformed(format!("invalid frame: {e}")))?;
    if envelope.kind != "channel" {
        return Ok(StreamEvent::Unknown {
            channel: String::new(),
            kind: envelope.kind,
        });
    }

    let body: ChannelBody = serde_json::from_value(envelope.body)
        .map_err(|e| TransportError::Malformed(format!("invalid channel body: {e}")))?;
    let Some(channel) = joined.get(&body.id) else {
        return Ok(StreamEvent::Unknown {
            channel: body.id,
            kind: body.kind,
        });
    };

    match (channel, body.kind.as_str()) {
        (Channel::Main, "mention" | "reply") => Ok(StreamEvent::Mention(note_from(body.body)?)),
        (Channel::Main, "newChatMessage") => {
            let chat: WireChat = serde_json::from_value(body.body)
                .map_err(|e| TransportError::Malformed(format!("invalid chat message: {e}")))?;
            Ok(StreamEvent::Chat(chat.into_message()?))
        }
        (Channel::Timeline(_) | Channel::Antenna(_), "note") => Ok(StreamEvent::Note {
            channel: channel.clone(),
            note: note_from(body.body)?,
        }),
        (channel, kind) => Ok(StreamEvent::Unknown {
            channel: channel.wire_name().to_string(),
            kind: kind.to_string(),
        }),
    }
}

fn note_from(value: serde_json::Value) -> Result<Note, TransportError> {
    serde_json::from_value::<WireNote>(value)
        .map(Note::from)
        .map_err(|e| TransportError::Malformed(format!("invalid note: {e}")))
}
