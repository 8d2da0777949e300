//! Decoded inbound stream events and outbound note drafts.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::subscription::Channel;
use crate::user::UserRef;

/// Note visibility on Misskey.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Visibility {
    Public,
    Home,
    Followers,
    Specified,
}

impl Visibility {
    pub fn as_str(&self) -> &'static str {
        match self {
            Visibility::Public => "public",
            Visibility::Home => "home",
            Visibility::Followers => "followers",
            Visibility::Specified => "specified",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "public" => Some(Visibility::Public),
            "home" => Some(Visibility::Home),
            "followers" => Some(Visibility::Followers),
            "specified" => Some(Visibility::Specified),
            _ => None,
        }
    }
}

impl fmt::Display for Visibility {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The interaction channel a message arrived on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Surface {
    Mention,
    Chat,
    Timeline,
}

impl fmt::Display for Surface {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Surface::Mention => "mention",
            Surface::Chat => "chat",
            Surface::Timeline => "timeline",
        })
    }
}

/// A note (post) as delivered by the stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Note {
    pub id: String,
    pub user: UserRef,
    pub text: Option<String>,
    pub cw: Option<String>,
    pub visibility: Option<Visibility>,
    pub reply_id: Option<String>,
    /// User ids mentioned in the note.
    pub mentions: Vec<String>,
    pub file_count: usize,
    pub renote: Option<Box<Note>>,
    pub my_reaction: Option<String>,
}

impl Note {
    /// Content warning, body and renoted body joined by newlines.
    pub fn effective_text(&self) -> String {
        let mut parts: Vec<String> = Vec::new();
        for part in [self.cw.as_deref(), self.text.as_deref()].into_iter().flatten() {
            let trimmed = part.trim();
            if !trimmed.is_empty() {
                parts.push(trimmed.to_string());
            }
        }
        if let Some(renote) = &self.renote {
            let inner = renote.effective_text();
            if !inner.is_empty() {
                parts.push(inner);
            }
        }
        parts.join("\n")
    }

    pub fn has_attachments(&self) -> bool {
        self.file_count > 0 || self.renote.as_ref().is_some_and(|r| r.has_attachments())
    }
}

/// A direct or group chat message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub id: String,
    pub from: UserRef,
    pub to_user_id: Option<String>,
    pub room_id: Option<String>,
    pub text: Option<String>,
}

impl ChatMessage {
    pub fn is_room(&self) -> bool {
        self.room_id.is_some()
    }
}

/// One decoded inbound stream frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEvent {
    Mention(Note),
    Chat(ChatMessage),
    /// A post pushed by a timeline or antenna subscription.
    Note { channel: Channel, note: Note },
    /// A well-formed frame this agent does not act on.
    Unknown { channel: String, kind: String },
}

impl StreamEvent {
    /// Key used to suppress duplicate deliveries, e.g. `mention:9abc`.
    pub fn dedup_key(&self) -> Option<String> {
        match self {
            StreamEvent::Mention(note) => Some(format!("mention:{}", note.id)),
            StreamEvent::Chat(msg) => Some(format!("chatMessage:{}", msg.id)),
            StreamEvent::Note { note, .. } => Some(format!("note:{}", note.id)),
            StreamEvent::Unknown { .. } => None,
        }
    }

    /// The actor whose per-user ordering this event belongs to.
    pub fn author(&self) -> Option<&UserRef> {
        match self {
            StreamEvent::Mention(note) | StreamEvent::Note { note, .. } => Some(&note.user),
            StreamEvent::Chat(msg) => Some(&msg.from),
            StreamEvent::Unknown { .. } => None,
        }
    }

    pub fn kind(&self) -> &str {
        match self {
            StreamEvent::Mention(_) => "mention",
            StreamEvent::Chat(_) => "chat",
            StreamEvent::Note { .. } => "note",
            StreamEvent::Unknown { kind, .. } => kind,
        }
    }
}

/// An outbound note. Replies, renotes and quotes are notes with a target.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct NoteDraft {
    pub text: Option<String>,
    pub visibility: Option<Visibility>,
    pub local_only: bool,
    pub reply_id: Option<String>,
    pub renote_id: Option<String>,
}

impl NoteDraft {
    pub fn post(text: impl Into<String>, visibility: Visibility, local_only: bool) -> Self {
        Self {
            text: Some(text.into()),
            visibility: Some(visibility),
            local_only,
            ..Default::default()
        }
    }

    pub fn reply(target: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            text: Some(text.into()),
            reply_id: Some(target.into()),
            ..Default::default()
        }
    }

    pub fn repost(target: impl Into<String>, visibility: Option<Visibility>) -> Self {
        Self {
            renote_id: Some(target.into()),
            visibility,
            ..Default::default()
        }
    }

    pub fn quote(
        target: impl Into<String>,
        text: impl Into<String>,
        visibility: Option<Visibility>,
    ) -> Self {
        Self {
            text: Some(text.into()),
            renote_id: Some(target.into()),
            visibility,
            ..Default::default()
        }
    }
}

/// A remotely defined antenna owned by the bot account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Antenna {
    pub id: String,
    pub name: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn note(id: &str, text: Option<&str>) -> Note {
        Note {
            id: id.to_string(),
            user: UserRef {
                id: "u1".into(),
                username: Some("bob".into()),
                host: None,
                is_bot: false,
            },
            text: text.map(str::to_string),
            cw: None,
            visibility: Some(Visibility::Public),
            reply_id: None,
            mentions: Vec::new(),
            file_count: 0,
            renote: None,
            my_reaction: None,
        }
    }

    #[test]
    fn effective_text_joins_cw_and_renote() {
        let mut outer = note("n1", Some("look"));
        outer.cw = Some("spoiler".into());
        let mut inner = note("n2", Some("inner body"));
        inner.file_count = 1;
        outer.renote = Some(Box::new(inner));
        assert_eq!(outer.effective_text(), "spoiler\nlook\ninner body");
        assert!(outer.has_attachments());
    }

    #[test]
    fn dedup_keys_are_namespaced() {
        let ev = StreamEvent::Mention(note("abc", None));
        assert_eq!(ev.dedup_key().as_deref(), Some("mention:abc"));
        let unknown = StreamEvent::Unknown {
            channel: "main".into(),
            kind: "followed".into(),
        };
        assert!(unknown.dedup_key().is_none());
        assert_eq!(unknown.kind(), "followed");
    }

    #[test]
    fn visibility_parse_is_case_insensitive() {
        assert_eq!(Visibility::parse("Home"), Some(Visibility::Home));
        assert_eq!(Visibility::parse("direct"), None);
    }

    #[test]
    fn quote_draft_carries_target_and_text() {
        let draft = NoteDraft::quote("n1", "nice", None);
        assert_eq!(draft.renote_id.as_deref(), Some("n1"));
        assert_eq!(draft.text.as_deref(), Some("nice"));
        assert!(!draft.local_only);
    }
}
