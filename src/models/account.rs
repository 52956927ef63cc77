//! Plain records returned by the protocol client and surfaced over RPC.

use serde::{Deserialize, Serialize};

/// Identity of the signed-in user behind a session.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AccountIdentity {
    /// Network-assigned user identifier.
    pub user_id: i64,
    /// Given name, if any.
    pub first_name: Option<String>,
    /// Family name, if any.
    pub last_name: Option<String>,
    /// Public handle, if any.
    pub username: Option<String>,
}

impl AccountIdentity {
    /// Full display name; empty when neither name part is set.
    #[must_use]
    pub fn display_name(&self) -> String {
        format!(
            "{} {}",
            self.first_name.as_deref().unwrap_or_default(),
            self.last_name.as_deref().unwrap_or_default()
        )
        .trim()
        .to_owned()
    }

    /// Short label for log notifications.
    #[must_use]
    pub fn label(&self) -> &str {
        self.first_name
            .as_deref()
            .filter(|name| !name.is_empty())
            .or(self.username.as_deref())
            .unwrap_or("Unknown")
    }
}

/// Conversation summary returned by `get_dialogs`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DialogSummary {
    /// Conversation identifier.
    pub peer_id: String,
    /// `user`, `chat`, or `channel`.
    pub peer_type: String,
    /// Display name of the conversation.
    pub name: String,
    /// Public handle, if any.
    pub username: Option<String>,
    /// Unread message count.
    pub unread_count: u32,
    /// Text of the latest message.
    pub last_message: Option<String>,
    /// Millisecond timestamp of the latest message.
    pub last_message_at: Option<i64>,
}

/// Historical message returned by `fetch_messages`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MessageRecord {
    /// Protocol message identifier.
    pub telegram_id: i64,
    /// Message text, if any.
    pub text: Option<String>,
    /// Sender identifier.
    pub from_id: Option<String>,
    /// Sender display name.
    pub from_name: Option<String>,
    /// Whether the account itself sent the message.
    pub is_outgoing: bool,
    /// Millisecond timestamp.
    pub timestamp: i64,
    /// Media tag (`photo`, `video`, `document`, `sticker`).
    pub media_type: Option<String>,
    /// Identifier of the message this one replies to.
    pub reply_to_id: Option<i64>,
}

/// Acknowledgement of an outbound message.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct SentMessage {
    /// Protocol message identifier assigned by the network.
    pub message_id: i64,
    /// Millisecond timestamp assigned by the network.
    pub timestamp: i64,
}
