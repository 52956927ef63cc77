//! Inbound message events pushed by a live protocol session.

use serde::{Deserialize, Serialize};

/// Kind of conversation an event arrived in, as reported before the peer
/// entity is resolved.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ChatKind {
    /// One-to-one conversation with a user or bot.
    Private,
    /// Basic group or megagroup.
    Group,
    /// Broadcast channel.
    Channel,
}

/// Resolved peer type of a conversation.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PeerKind {
    /// A user or bot.
    User,
    /// A group of any flavour.
    Chat,
    /// A broadcast channel.
    Channel,
}

impl PeerKind {
    /// Wire tag used in payloads and dialog summaries.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Chat => "chat",
            Self::Channel => "channel",
        }
    }
}

/// Resolved conversation entity.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PeerInfo {
    /// Conversation identifier.
    pub id: String,
    /// Resolved peer type.
    pub kind: PeerKind,
    /// Display name or title.
    pub name: String,
    /// Public handle, if any.
    pub username: Option<String>,
    /// Whether the peer is a bot account.
    pub is_bot: bool,
}

/// Resolved author of a message.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SenderInfo {
    /// Sender identifier.
    pub id: Option<String>,
    /// Display name or title.
    pub name: Option<String>,
    /// Whether the sender is a bot account.
    pub is_bot: bool,
}

/// New-message event delivered through a session's event hook.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct InboundMessage {
    /// Conversation kind known before resolution.
    pub chat: ChatKind,
    /// Resolved conversation.
    pub peer: PeerInfo,
    /// Resolved author, if the message has one.
    pub sender: Option<SenderInfo>,
    /// Protocol message identifier.
    pub message_id: i64,
    /// Message text, if any.
    pub text: Option<String>,
    /// Whether the account itself sent the message.
    pub outgoing: bool,
    /// Whether the message was posted through an inline bot.
    pub via_bot: bool,
    /// Millisecond timestamp.
    pub timestamp: i64,
    /// Media tag (`photo`, `video`, `audio`, `voice`, `document`, `sticker`).
    pub media_type: Option<String>,
    /// Identifier of the message this one replies to.
    pub reply_to_id: Option<i64>,
}

impl InboundMessage {
    /// Whether the sender itself is a bot.
    #[must_use]
    pub fn sender_is_bot(&self) -> bool {
        self.sender.as_ref().is_some_and(|sender| sender.is_bot)
    }

    /// Bot flag after classification: peer, sender, or inline bot.
    #[must_use]
    pub fn is_bot_content(&self) -> bool {
        self.peer.is_bot || self.sender_is_bot() || self.via_bot
    }
}
