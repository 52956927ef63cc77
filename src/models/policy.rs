//! Per-account mirroring policy and the two-stage event filter.

use serde::{Deserialize, Serialize};

use crate::models::event::{ChatKind, InboundMessage, PeerKind};

/// Flags controlling which message categories are mirrored for an account.
///
/// Deserialized from the backend's account record; absent flags fall back to
/// the defaults below.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct AccountPolicy {
    /// Master switch.
    #[serde(default = "default_true")]
    pub save_messages: bool,
    /// Mirror broadcast channels.
    #[serde(default)]
    pub save_from_channels: bool,
    /// Mirror bot content.
    #[serde(default)]
    pub save_from_bots: bool,
    /// Mirror private conversations with people.
    #[serde(default = "default_true")]
    pub save_from_private: bool,
    /// Mirror groups.
    #[serde(default)]
    pub save_from_groups: bool,
}

fn default_true() -> bool {
    true
}

impl Default for AccountPolicy {
    fn default() -> Self {
        Self {
            save_messages: true,
            save_from_channels: false,
            save_from_bots: false,
            save_from_private: true,
            save_from_groups: false,
        }
    }
}

impl AccountPolicy {
    /// First-stage filter applied before the peer is resolved.
    #[must_use]
    pub fn admits_chat(&self, chat: ChatKind) -> bool {
        if !self.save_messages {
            return false;
        }
        match chat {
            ChatKind::Private => self.save_from_private || self.save_from_bots,
            ChatKind::Group => self.save_from_groups,
            ChatKind::Channel => self.save_from_channels,
        }
    }

    /// Second-stage filter over the fully classified event.
    #[must_use]
    pub fn admits_classified(&self, peer: PeerKind, is_bot: bool, sender_is_bot: bool) -> bool {
        if !self.save_messages {
            return false;
        }
        let peer_allowed = match peer {
            PeerKind::User => self.save_from_private || self.save_from_bots,
            PeerKind::Chat => self.save_from_groups,
            PeerKind::Channel => self.save_from_channels,
        };
        if !peer_allowed {
            return false;
        }
        if is_bot && !self.save_from_bots {
            return false;
        }
        if peer == PeerKind::User && !sender_is_bot && !self.save_from_private {
            return false;
        }
        true
    }

    /// Both filter stages for one event.
    #[must_use]
    pub fn admits(&self, event: &InboundMessage) -> bool {
        self.admits_chat(event.chat)
            && self.admits_classified(event.peer.kind, event.is_bot_content(), event.sender_is_bot())
    }
}
