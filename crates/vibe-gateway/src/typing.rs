use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, PoisonError};

use tracing::debug;
use uuid::Uuid;

use vibe_store::Store;
use vibe_types::events::{ServerEvent, TypingNotice};
use vibe_types::models::ConversationKey;

use crate::dispatcher::Dispatcher;
use crate::error::GatewayError;
use crate::presence::PresenceRegistry;

/// Who is typing where. In-memory only, never time-boxed.
#[derive(Debug, Default)]
pub struct TypingState {
    typing: HashMap<ConversationKey, HashSet<Uuid>>,
}

impl TypingState {
    /// Returns true if the user was not already marked.
    pub fn start(&mut self, key: ConversationKey, user_id: Uuid) -> bool {
        self.typing.entry(key).or_default().insert(user_id)
    }

    /// Returns true if the user was marked. Empty keys are dropped.
    pub fn stop(&mut self, key: ConversationKey, user_id: Uuid) -> bool {
        let Some(users) = self.typing.get_mut(&key) else {
            return false;
        };
        let removed = users.remove(&user_id);
        if users.is_empty() {
            self.typing.remove(&key);
        }
        removed
    }

    /// Remove the user everywhere; returns the conversations they were typing in.
    pub fn clear_user(&mut self, user_id: Uuid) -> Vec<ConversationKey> {
        let keys: Vec<ConversationKey> = self
            .typing
            .iter()
            .filter(|(_, users)| users.contains(&user_id))
            .map(|(key, _)| *key)
            .collect();
        for key in &keys {
            self.stop(*key, user_id);
        }
        keys
    }

    pub fn typing_in(&self, key: ConversationKey) -> HashSet<Uuid> {
        self.typing.get(&key).cloned().unwrap_or_default()
    }

    pub fn contains_key(&self, key: ConversationKey) -> bool {
        self.typing.contains_key(&key)
    }
}

/// Typing state plus delivery of `user_typing` signals.
///
/// Channel signals go to the channel's audience except the typer; direct
/// signals go to the counterpart only, carrying the typer as `dmUserId`.
#[derive(Clone)]
pub struct TypingTracker {
    state: Arc<Mutex<TypingState>>,
    dispatcher: Dispatcher,
    presence: PresenceRegistry,
    store: Arc<Store>,
}

impl TypingTracker {
    pub fn new(dispatcher: Dispatcher, presence: PresenceRegistry, store: Arc<Store>) -> Self {
        Self {
            state: Arc::default(),
            dispatcher,
            presence,
            store,
        }
    }

    fn with_state<T>(&self, f: impl FnOnce(&mut TypingState) -> T) -> T {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut state)
    }

    pub async fn start(&self, key: ConversationKey, user_id: Uuid) -> Result<(), GatewayError> {
        let audience = self.audience(key).await?;
        self.with_state(|s| s.start(key, user_id));
        self.deliver(&audience, user_id, true).await;
        Ok(())
    }

    pub async fn stop(&self, key: ConversationKey, user_id: Uuid) -> Result<(), GatewayError> {
        let audience = self.audience(key).await?;
        self.with_state(|s| s.stop(key, user_id));
        self.deliver(&audience, user_id, false).await;
        Ok(())
    }

    /// Clear every indicator the user left behind and tell the other side.
    pub async fn clear_user(&self, user_id: Uuid) -> Vec<ConversationKey> {
        let keys = self.with_state(|s| s.clear_user(user_id));
        for key in &keys {
            match self.audience(*key).await {
                Ok(audience) => self.deliver(&audience, user_id, false).await,
                Err(e) => debug!("Dropped typing cleanup for {} in {}: {}", user_id, key, e),
            }
        }
        keys
    }

    pub fn typing_in(&self, key: ConversationKey) -> HashSet<Uuid> {
        self.with_state(|s| s.typing_in(key))
    }

    async fn audience(&self, key: ConversationKey) -> Result<Audience, GatewayError> {
        match key {
            ConversationKey::Channel(channel_id) => {
                let channel = self
                    .store
                    .get_channel(channel_id)
                    .await
                    .ok_or_else(|| GatewayError::validation("Channel not found"))?;
                Ok(Audience::Channel {
                    channel_id,
                    members: channel.members,
                })
            }
            ConversationKey::Direct(other) => Ok(Audience::Direct(other)),
        }
    }

    async fn deliver(&self, audience: &Audience, user_id: Uuid, is_typing: bool) {
        match audience {
            Audience::Channel { channel_id, members } => {
                let notice = TypingNotice {
                    user_id,
                    channel_id: Some(*channel_id),
                    dm_user_id: None,
                    is_typing,
                };
                self.dispatcher
                    .send_to_channel(
                        *channel_id,
                        members,
                        Some(user_id),
                        ServerEvent::UserTyping(notice),
                    )
                    .await;
            }
            Audience::Direct(other) => {
                let notice = TypingNotice {
                    user_id,
                    channel_id: None,
                    dm_user_id: Some(user_id),
                    is_typing,
                };
                let Some(handles) = self.presence.resolve_handles(*other).await else {
                    debug!("{} is offline, dropping typing signal", other);
                    return;
                };
                for conn_id in handles {
                    self.dispatcher
                        .send_to_conn(*other, conn_id, ServerEvent::UserTyping(notice.clone()))
                        .await;
                }
            }
        }
    }
}

enum Audience {
    Channel { channel_id: Uuid, members: Vec<Uuid> },
    Direct(Uuid),
}
