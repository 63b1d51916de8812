use chrono::{DateTime, Utc};
use tracing::info;
use uuid::Uuid;

use vibe_types::models::{
    Channel, ChannelCreator, ConversationKey, Destination, Message, ReadTimestamps, User,
    unread_count,
};

use crate::Store;
use crate::error::StoreError;

impl Store {
    // -- Users --

    /// Emails and usernames are both unique (usernames case-sensitively).
    pub async fn create_user(
        &self,
        username: &str,
        email: &str,
        password_hash: &str,
    ) -> Result<User, StoreError> {
        self.users
            .update(|users| {
                if users.iter().any(|u| u.email == email || u.username == username) {
                    return Err(StoreError::Conflict("User already exists".into()));
                }
                let user = User {
                    id: Uuid::new_v4(),
                    username: username.to_string(),
                    email: email.to_string(),
                    password: password_hash.to_string(),
                    created_at: Utc::now(),
                    is_online: false,
                };
                users.push(user.clone());
                Ok(user)
            })
            .await
    }

    pub async fn users(&self) -> Vec<User> {
        self.users.read().await
    }

    pub async fn get_user_by_email(&self, email: &str) -> Option<User> {
        self.users.read().await.into_iter().find(|u| u.email == email)
    }

    pub async fn get_user_by_id(&self, id: Uuid) -> Option<User> {
        self.users.read().await.into_iter().find(|u| u.id == id)
    }

    pub async fn set_online(&self, user_id: Uuid, online: bool) -> Result<(), StoreError> {
        self.users
            .update(|users| match users.iter_mut().find(|u| u.id == user_id) {
                Some(user) => {
                    user.is_online = online;
                    Ok(())
                }
                None => Err(StoreError::NotFound(format!("User {user_id} not found"))),
            })
            .await
    }

    // -- Channels --

    pub async fn channels(&self) -> Vec<Channel> {
        self.channels.read().await
    }

    pub async fn get_channel(&self, id: Uuid) -> Option<Channel> {
        self.channels.read().await.into_iter().find(|c| c.id == id)
    }

    /// The name check and the insert happen in one critical section, so two
    /// racing creations of the same name cannot both succeed.
    pub async fn create_channel(
        &self,
        name: &str,
        description: &str,
        creator: Uuid,
    ) -> Result<Channel, StoreError> {
        let channel = self
            .channels
            .update(|channels| {
                if channels.iter().any(|c| c.name_matches(name)) {
                    return Err(StoreError::Conflict("Channel already exists".into()));
                }
                let channel = Channel {
                    id: Uuid::new_v4(),
                    name: name.to_string(),
                    description: description.to_string(),
                    created_by: ChannelCreator::User(creator),
                    created_at: Utc::now(),
                    members: vec![creator],
                };
                channels.push(channel.clone());
                Ok(channel)
            })
            .await?;

        info!("Channel '{}' ({}) created by {}", channel.name, channel.id, creator);
        Ok(channel)
    }

    // -- Messages --

    /// Append to the channel or direct collection according to the destination.
    pub async fn append_message(&self, message: Message) -> Result<Message, StoreError> {
        let collection = match message.destination {
            Destination::Channel(_) => &self.channel_messages,
            Destination::Direct(_) => &self.direct_messages,
        };
        collection
            .update(|messages| {
                messages.push(message.clone());
                Ok(message)
            })
            .await
    }

    pub async fn channel_messages(&self, channel_id: Uuid) -> Vec<Message> {
        self.channel_messages
            .read()
            .await
            .into_iter()
            .filter(|m| m.channel_id() == Some(channel_id))
            .collect()
    }

    pub async fn all_channel_messages(&self) -> Vec<Message> {
        self.channel_messages.read().await
    }

    /// Every direct message `user_id` sent or received.
    pub async fn direct_messages_for(&self, user_id: Uuid) -> Vec<Message> {
        self.direct_messages
            .read()
            .await
            .into_iter()
            .filter(|m| m.is_direct_for(user_id))
            .collect()
    }

    /// Direct messages between two users, either direction.
    pub async fn conversation(&self, a: Uuid, b: Uuid) -> Vec<Message> {
        self.direct_messages
            .read()
            .await
            .into_iter()
            .filter(|m| {
                (m.sender_id == a && m.recipient_id() == Some(b))
                    || (m.sender_id == b && m.recipient_id() == Some(a))
            })
            .collect()
    }

    // -- Read status --

    pub async fn mark_read(
        &self,
        user_id: Uuid,
        key: ConversationKey,
        timestamp: DateTime<Utc>,
    ) -> Result<DateTime<Utc>, StoreError> {
        self.read_status.update(user_id, key, timestamp).await
    }

    pub async fn read_status_for(&self, user_id: Uuid) -> ReadTimestamps {
        self.read_status.get(user_id).await
    }

    pub async fn unread_count(&self, user_id: Uuid, key: ConversationKey) -> usize {
        let last_read = self.read_status_for(user_id).await.get(&key).copied();
        let messages = match key {
            ConversationKey::Channel(id) => self.channel_messages(id).await,
            ConversationKey::Direct(other) => self.conversation(user_id, other).await,
        };
        unread_count(&messages, key, user_id, last_read)
    }
}
