use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::{Channel, ConversationKey, Message, Peer, ReadTimestamps};

/// Events sent over the realtime gateway, server -> client.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum ServerEvent {
    /// Initial snapshot: every channel
    Channels(Vec<Channel>),

    /// Initial snapshot: everyone except the caller
    Users(Vec<Peer>),

    /// Initial snapshot: channel messages plus the caller's direct messages
    Messages(Vec<Message>),

    /// Initial snapshot: the caller's read markers
    ReadStatus(ReadTimestamps),

    /// A mark-as-read was persisted
    ReadStatusUpdated(ReadTimestamps),

    /// A message was persisted and routed to this client
    NewMessage(Message),

    /// A channel was created
    ChannelCreated(Channel),

    /// Someone started or stopped typing
    UserTyping(TypingNotice),

    /// A user came online or went offline
    UserStatusChange { user_id: Uuid, is_online: bool },

    /// The last command from this client failed
    Error { message: String },
}

impl ServerEvent {
    pub fn error(message: impl Into<String>) -> Self {
        Self::Error {
            message: message.into(),
        }
    }
}

/// Payload of `user_typing`. Exactly one of `channel_id` / `dm_user_id` is set;
/// for direct conversations `dm_user_id` is the typer, so the receiving client
/// can key the indicator by its counterpart.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TypingNotice {
    pub user_id: Uuid,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub channel_id: Option<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dm_user_id: Option<Uuid>,
    pub is_typing: bool,
}

/// Commands sent FROM client TO server over the gateway.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum ClientEvent {
    /// Ask for channels, roster, messages and read status in one batch
    GetInitialData,

    /// Subscribe this connection to a channel's live traffic
    JoinChannel { channel_id: Uuid },

    /// Drop this connection's subscription to a channel
    LeaveChannel { channel_id: Uuid },

    CreateChannel {
        name: String,
        #[serde(default)]
        description: Option<String>,
    },

    SendMessage {
        content: String,
        channel_id: Option<Uuid>,
        recipient_id: Option<Uuid>,
    },

    MarkAsRead(ConversationTarget),

    TypingStart(ConversationTarget),

    TypingStop(ConversationTarget),
}

/// Client-side way of naming a conversation: a channel id or the DM counterpart.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationTarget {
    pub channel_id: Option<Uuid>,
    pub dm_user_id: Option<Uuid>,
}

impl ConversationTarget {
    pub fn channel(channel_id: Uuid) -> Self {
        Self {
            channel_id: Some(channel_id),
            dm_user_id: None,
        }
    }

    pub fn direct(user_id: Uuid) -> Self {
        Self {
            channel_id: None,
            dm_user_id: Some(user_id),
        }
    }

    /// `None` unless exactly one side is set.
    pub fn key(&self) -> Option<ConversationKey> {
        match (self.channel_id, self.dm_user_id) {
            (Some(id), None) => Some(ConversationKey::Channel(id)),
            (None, Some(id)) => Some(ConversationKey::Direct(id)),
            _ => None,
        }
    }
}
