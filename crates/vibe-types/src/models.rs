use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use uuid::Uuid;

/// Last-read instants of one user, keyed by conversation.
pub type ReadTimestamps = BTreeMap<ConversationKey, DateTime<Utc>>;

/// A registered account as persisted in `users.json`.
/// `password` holds the Argon2 hash and must never be sent to clients;
/// use [`User::public`], [`User::peer`] or [`User::profile`] for outward views.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: Uuid,
    pub username: String,
    pub email: String,
    pub password: String,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub is_online: bool,
}

impl User {
    pub fn public(&self) -> PublicUser {
        PublicUser {
            id: self.id,
            username: self.username.clone(),
            is_online: self.is_online,
        }
    }

    pub fn peer(&self) -> Peer {
        Peer {
            id: self.id,
            username: self.username.clone(),
            status: self.is_online.into(),
        }
    }

    pub fn profile(&self) -> UserProfile {
        UserProfile {
            id: self.id,
            username: self.username.clone(),
            email: self.email.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PublicUser {
    pub id: Uuid,
    pub username: String,
    pub is_online: bool,
}

/// Roster entry sent with the initial realtime snapshot.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Peer {
    pub id: Uuid,
    pub username: String,
    pub status: PresenceStatus,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum PresenceStatus {
    Online,
    Offline,
}

impl From<bool> for PresenceStatus {
    fn from(online: bool) -> Self {
        if online { Self::Online } else { Self::Offline }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UserProfile {
    pub id: Uuid,
    pub username: String,
    pub email: String,
}

/// Who created a channel. Seeded channels belong to `system`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelCreator {
    System,
    User(Uuid),
}

impl Serialize for ChannelCreator {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::System => serializer.serialize_str("system"),
            Self::User(id) => serializer.collect_str(id),
        }
    }
}

impl<'de> Deserialize<'de> for ChannelCreator {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        if raw == "system" {
            return Ok(Self::System);
        }
        raw.parse()
            .map(Self::User)
            .map_err(serde::de::Error::custom)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Channel {
    pub id: Uuid,
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub created_by: ChannelCreator,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub members: Vec<Uuid>,
}

impl Channel {
    /// The channel every fresh installation starts with.
    pub fn general() -> Self {
        Self {
            id: Uuid::new_v4(),
            name: "general".to_string(),
            description: "General discussion".to_string(),
            created_by: ChannelCreator::System,
            created_at: Utc::now(),
            members: Vec::new(),
        }
    }

    pub fn is_member(&self, user_id: Uuid) -> bool {
        self.members.contains(&user_id)
    }

    /// Channel names are unique ignoring case.
    pub fn name_matches(&self, name: &str) -> bool {
        self.name.to_lowercase() == name.to_lowercase()
    }
}

/// Where a message goes: exactly one of a channel or a direct recipient.
/// Flattened into [`Message`] as either `channelId` or `recipientId`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Destination {
    #[serde(rename = "channelId")]
    Channel(Uuid),
    #[serde(rename = "recipientId")]
    Direct(Uuid),
}

impl Destination {
    /// Returns `None` unless exactly one side is present.
    pub fn from_parts(channel_id: Option<Uuid>, recipient_id: Option<Uuid>) -> Option<Self> {
        match (channel_id, recipient_id) {
            (Some(channel_id), None) => Some(Self::Channel(channel_id)),
            (None, Some(recipient_id)) => Some(Self::Direct(recipient_id)),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: Uuid,
    pub content: String,
    pub sender_id: Uuid,
    pub sender_name: String,
    pub timestamp: DateTime<Utc>,
    #[serde(flatten)]
    pub destination: Destination,
}

impl Message {
    pub fn new(sender_id: Uuid, sender_name: &str, content: &str, destination: Destination) -> Self {
        Self {
            id: Uuid::new_v4(),
            content: content.to_string(),
            sender_id,
            sender_name: sender_name.to_string(),
            timestamp: Utc::now(),
            destination,
        }
    }

    pub fn channel_id(&self) -> Option<Uuid> {
        match self.destination {
            Destination::Channel(id) => Some(id),
            Destination::Direct(_) => None,
        }
    }

    pub fn recipient_id(&self) -> Option<Uuid> {
        match self.destination {
            Destination::Direct(id) => Some(id),
            Destination::Channel(_) => None,
        }
    }

    /// True for direct messages sent or received by `user_id`.
    pub fn is_direct_for(&self, user_id: Uuid) -> bool {
        matches!(self.destination, Destination::Direct(recipient) if recipient == user_id || self.sender_id == user_id)
    }

    /// The conversation this message belongs to from `viewer`'s point of view.
    /// Direct messages the viewer takes no part in have no key.
    pub fn conversation_key_for(&self, viewer: Uuid) -> Option<ConversationKey> {
        match self.destination {
            Destination::Channel(id) => Some(ConversationKey::Channel(id)),
            Destination::Direct(recipient) if recipient == viewer => {
                Some(ConversationKey::Direct(self.sender_id))
            }
            Destination::Direct(recipient) if self.sender_id == viewer => {
                Some(ConversationKey::Direct(recipient))
            }
            Destination::Direct(_) => None,
        }
    }
}

/// `channel_<id>` or `dm_<otherUserId>`: the unit of read-status and typing indexing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ConversationKey {
    Channel(Uuid),
    Direct(Uuid),
}

impl fmt::Display for ConversationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Channel(id) => write!(f, "channel_{id}"),
            Self::Direct(id) => write!(f, "dm_{id}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvalidConversationKey(pub String);

impl fmt::Display for InvalidConversationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid conversation key '{}'", self.0)
    }
}

impl std::error::Error for InvalidConversationKey {}

impl FromStr for ConversationKey {
    type Err = InvalidConversationKey;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || InvalidConversationKey(s.to_string());
        if let Some(id) = s.strip_prefix("channel_") {
            id.parse().map(Self::Channel).map_err(|_| invalid())
        } else if let Some(id) = s.strip_prefix("dm_") {
            id.parse().map(Self::Direct).map_err(|_| invalid())
        } else {
            Err(invalid())
        }
    }
}

impl Serialize for ConversationKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for ConversationKey {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

/// One user's read markers, persisted in `user_read_status.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReadStatusRecord {
    pub user_id: Uuid,
    #[serde(default)]
    pub read_timestamps: ReadTimestamps,
}

impl ReadStatusRecord {
    pub fn new(user_id: Uuid) -> Self {
        Self {
            user_id,
            read_timestamps: ReadTimestamps::new(),
        }
    }
}

/// Messages in `key` that `viewer` has not read yet: sent by someone else
/// after `last_read` (everything counts when there is no marker).
pub fn unread_count<'a>(
    messages: impl IntoIterator<Item = &'a Message>,
    key: ConversationKey,
    viewer: Uuid,
    last_read: Option<DateTime<Utc>>,
) -> usize {
    messages
        .into_iter()
        .filter(|m| m.sender_id != viewer)
        .filter(|m| m.conversation_key_for(viewer) == Some(key))
        .filter(|m| last_read.is_none_or(|read| m.timestamp > read))
        .count()
}
