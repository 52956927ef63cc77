//! Normalized sync payload and its mapping to the ingestion wire schema.

use serde::{Deserialize, Serialize};

use crate::models::event::InboundMessage;

/// Peer id of the network's system-notices account; never mirrored.
pub const SYSTEM_NOTICES_PEER_ID: &str = "777000";

/// Normalized record of one message event destined for the backend.
///
/// Serialized in this shape into the overflow store.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SyncPayload {
    /// Owning account.
    pub account_id: String,
    /// Conversation identifier.
    pub peer_id: String,
    /// `user`, `chat`, or `channel`.
    pub peer_type: String,
    /// Conversation display name.
    pub name: String,
    /// Conversation handle.
    pub username: Option<String>,
    /// Protocol message identifier.
    #[serde(alias = "telegram_id")]
    pub message_id: i64,
    /// Message text.
    pub text: Option<String>,
    /// Sender identifier.
    pub from_id: Option<String>,
    /// Sender display name.
    pub from_name: Option<String>,
    /// Sent by the account itself.
    pub is_outgoing: bool,
    /// Bot content after classification.
    #[serde(default)]
    pub is_bot: bool,
    /// Millisecond timestamp.
    pub timestamp: i64,
    /// Media tag.
    pub media_type: Option<String>,
    /// Replied-to message identifier.
    pub reply_to_id: Option<i64>,
}

impl SyncPayload {
    /// Build a payload from a classified inbound event.
    #[must_use]
    pub fn from_event(account_id: &str, event: &InboundMessage) -> Self {
        let sender = event.sender.as_ref();
        Self {
            account_id: account_id.to_owned(),
            peer_id: event.peer.id.clone(),
            peer_type: event.peer.kind.as_str().to_owned(),
            name: event.peer.name.clone(),
            username: event.peer.username.clone(),
            message_id: event.message_id,
            text: event.text.clone(),
            from_id: sender.and_then(|s| s.id.clone()),
            from_name: sender.and_then(|s| s.name.clone()),
            is_outgoing: event.outgoing,
            is_bot: event.is_bot_content(),
            timestamp: event.timestamp,
            media_type: event.media_type.clone(),
            reply_to_id: event.reply_to_id,
        }
    }

    /// Whether this payload targets the reserved system-notices peer.
    #[must_use]
    pub fn is_system_notice(&self) -> bool {
        self.peer_id == SYSTEM_NOTICES_PEER_ID
    }

    /// Short text preview for notifications.
    #[must_use]
    pub fn preview(&self) -> String {
        self.text
            .as_deref()
            .filter(|text| !text.is_empty())
            .unwrap_or("[media]")
            .chars()
            .take(30)
            .collect()
    }

    /// Map to the ingestion mutation arguments.
    #[must_use]
    pub fn to_ingest_args(&self) -> IngestArgs<'_> {
        IngestArgs {
            account_id: &self.account_id,
            peer_id: &self.peer_id,
            peer_type: &self.peer_type,
            name: &self.name,
            username: self.username.as_deref(),
            telegram_id: self.message_id,
            text: self.text.as_deref(),
            from_id: self.from_id.as_deref(),
            from_name: self.from_name.as_deref(),
            is_outgoing: self.is_outgoing,
            timestamp: self.timestamp,
            media_type: self.media_type.as_deref(),
            reply_to_id: self.reply_to_id,
            is_bot: self.is_bot,
        }
    }
}

/// Wire schema of the `messages:ingest` mutation arguments.
#[derive(Debug, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct IngestArgs<'a> {
    /// Owning account.
    pub account_id: &'a str,
    /// Conversation identifier.
    pub peer_id: &'a str,
    /// `user`, `chat`, or `channel`.
    pub peer_type: &'a str,
    /// Conversation display name.
    pub name: &'a str,
    /// Conversation handle.
    pub username: Option<&'a str>,
    /// Protocol message identifier, under its wire name.
    pub telegram_id: i64,
    /// Message text.
    pub text: Option<&'a str>,
    /// Sender identifier.
    pub from_id: Option<&'a str>,
    /// Sender display name.
    pub from_name: Option<&'a str>,
    /// Sent by the account itself.
    pub is_outgoing: bool,
    /// Millisecond timestamp.
    pub timestamp: i64,
    /// Media tag.
    pub media_type: Option<&'a str>,
    /// Replied-to message identifier.
    pub reply_to_id: Option<i64>,
    /// Bot content after classification.
    pub is_bot: bool,
}
