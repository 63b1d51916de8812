use std::collections::HashSet;

use chrono::Utc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use vibe_types::events::{ClientEvent, ConversationTarget, ServerEvent};
use vibe_types::models::{Destination, ReadTimestamps};

use crate::Gateway;
use crate::dispatcher::ConnId;
use crate::error::GatewayError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Connecting,
    Authenticated,
    Active,
    Closed,
}

/// Verified caller, as resolved by the auth layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub user_id: Uuid,
    pub username: String,
}

/// One client connection, from authentication to teardown.
pub struct Session {
    gateway: Gateway,
    state: SessionState,
    identity: Option<Identity>,
    conn_id: Option<ConnId>,
}

impl Session {
    pub fn new(gateway: Gateway) -> Self {
        Self {
            gateway,
            state: SessionState::Connecting,
            identity: None,
            conn_id: None,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn identity(&self) -> Option<&Identity> {
        self.identity.as_ref()
    }

    pub fn conn_id(&self) -> Option<ConnId> {
        self.conn_id
    }

    /// Accept a verified identity. Anything else closes the session for good.
    pub async fn authenticate(&mut self, identity: Option<Identity>) -> Result<(), GatewayError> {
        if self.state != SessionState::Connecting {
            return Err(GatewayError::Unauthorized);
        }
        let Some(identity) = identity else {
            self.state = SessionState::Closed;
            return Err(GatewayError::Unauthorized);
        };
        // The token may outlive the account
        let Some(user) = self.gateway.store().get_user_by_id(identity.user_id).await else {
            warn!("Rejected session for unknown user {}", identity.user_id);
            self.state = SessionState::Closed;
            return Err(GatewayError::Unauthorized);
        };

        self.identity = Some(Identity {
            user_id: user.id,
            username: user.username,
        });
        self.state = SessionState::Authenticated;
        Ok(())
    }

    /// Register presence and hand back the stream of outbound events.
    pub async fn activate(
        &mut self,
    ) -> Result<mpsc::UnboundedReceiver<ServerEvent>, GatewayError> {
        let identity = match (&self.state, &self.identity) {
            (SessionState::Authenticated, Some(identity)) => identity.clone(),
            _ => return Err(GatewayError::Unauthorized),
        };
        let (conn_id, rx) = self
            .gateway
            .presence()
            .connect(identity.user_id, &identity.username)
            .await;
        info!("{} ({}) connected as {}", identity.username, identity.user_id, conn_id);
        self.conn_id = Some(conn_id);
        self.state = SessionState::Active;
        Ok(rx)
    }

    /// Parse and handle one inbound text frame.
    pub async fn handle_text(&mut self, text: &str) {
        match serde_json::from_str::<ClientEvent>(text) {
            Ok(event) => self.handle(event).await,
            Err(e) => {
                warn!(
                    "{:?} sent a malformed event: {} -- raw: {}",
                    self.identity.as_ref().map(|i| i.user_id),
                    e,
                    text.chars().take(200).collect::<String>()
                );
                self.reply(ServerEvent::error("Invalid event")).await;
            }
        }
    }

    /// Handle one inbound event. Failures are answered with an `error` event.
    pub async fn handle(&mut self, event: ClientEvent) {
        let (Some(identity), Some(conn_id)) = (self.identity.clone(), self.conn_id) else {
            return;
        };
        if self.state != SessionState::Active {
            return;
        }
        debug!("{} -> {:?}", identity.username, event);

        let (action, result) = match event {
            ClientEvent::GetInitialData => (
                "load initial data",
                self.send_initial_data(&identity, conn_id).await,
            ),
            ClientEvent::JoinChannel { channel_id } => {
                ("join channel", self.join(&identity, conn_id, channel_id).await)
            }
            ClientEvent::LeaveChannel { channel_id } => {
                self.gateway
                    .dispatcher()
                    .unsubscribe(identity.user_id, conn_id, channel_id)
                    .await;
                ("leave channel", Ok(()))
            }
            ClientEvent::CreateChannel { name, description } => (
                "create channel",
                self.gateway
                    .create_channel(identity.user_id, &name, description.as_deref())
                    .await
                    .map(|_| ()),
            ),
            ClientEvent::SendMessage {
                content,
                channel_id,
                recipient_id,
            } => (
                "send message",
                self.send_message(&identity, content, channel_id, recipient_id)
                    .await,
            ),
            ClientEvent::MarkAsRead(target) => {
                ("mark as read", self.mark_as_read(&identity, target).await)
            }
            ClientEvent::TypingStart(target) => {
                ("update typing", self.typing(&identity, target, true).await)
            }
            ClientEvent::TypingStop(target) => {
                ("update typing", self.typing(&identity, target, false).await)
            }
        };

        if let Err(e) = result {
            warn!("{} failed to {}: {}", identity.username, action, e);
            self.reply(ServerEvent::error(e.client_message(action))).await;
        }
    }

    /// Send an event to this connection only.
    pub async fn reply(&self, event: ServerEvent) {
        if let (Some(identity), Some(conn_id)) = (&self.identity, self.conn_id) {
            self.gateway
                .dispatcher()
                .send_to_conn(identity.user_id, conn_id, event)
                .await;
        }
    }

    /// Tear down presence and typing state. Safe to call more than once.
    pub async fn close(&mut self) {
        if self.state == SessionState::Closed {
            return;
        }
        let previous = std::mem::replace(&mut self.state, SessionState::Closed);
        if previous != SessionState::Active {
            return;
        }
        let (Some(identity), Some(conn_id)) = (&self.identity, self.conn_id.take()) else {
            return;
        };

        self.gateway
            .presence()
            .disconnect(identity.user_id, conn_id)
            .await;
        let cleared = self.gateway.typing().clear_user(identity.user_id).await;
        if !cleared.is_empty() {
            debug!("Cleared {} typing indicators for {}", cleared.len(), identity.username);
        }
        info!("{} ({}) disconnected", identity.username, identity.user_id);
    }

    async fn send_initial_data(
        &self,
        identity: &Identity,
        conn_id: ConnId,
    ) -> Result<(), GatewayError> {
        let store = self.gateway.store();
        let channels = store.channels().await;

        let joined: Vec<Uuid> = channels
            .iter()
            .filter(|c| c.is_member(identity.user_id))
            .map(|c| c.id)
            .collect();
        self.gateway
            .dispatcher()
            .subscribe(identity.user_id, conn_id, &joined)
            .await;

        let online: HashSet<Uuid> = self
            .gateway
            .presence()
            .list_connected()
            .await
            .into_iter()
            .map(|c| c.user_id)
            .collect();
        let peers: Vec<_> = store
            .users()
            .await
            .into_iter()
            .filter(|user| user.id != identity.user_id)
            .map(|user| {
                let mut peer = user.peer();
                peer.status = online.contains(&user.id).into();
                peer
            })
            .collect();

        let mut messages = store.all_channel_messages().await;
        messages.extend(store.direct_messages_for(identity.user_id).await);
        messages.sort_by_key(|m| m.timestamp);

        let read_status: ReadTimestamps = store.read_status_for(identity.user_id).await;

        self.reply(ServerEvent::Channels(channels)).await;
        self.reply(ServerEvent::Users(peers)).await;
        self.reply(ServerEvent::Messages(messages)).await;
        self.reply(ServerEvent::ReadStatus(read_status)).await;
        Ok(())
    }

    async fn join(
        &self,
        identity: &Identity,
        conn_id: ConnId,
        channel_id: Uuid,
    ) -> Result<(), GatewayError> {
        if self.gateway.store().get_channel(channel_id).await.is_none() {
            return Err(GatewayError::validation("Channel not found"));
        }
        self.gateway
            .dispatcher()
            .subscribe(identity.user_id, conn_id, &[channel_id])
            .await;
        Ok(())
    }

    async fn send_message(
        &self,
        identity: &Identity,
        content: String,
        channel_id: Option<Uuid>,
        recipient_id: Option<Uuid>,
    ) -> Result<(), GatewayError> {
        let destination = Destination::from_parts(channel_id, recipient_id).ok_or_else(|| {
            GatewayError::validation("Exactly one of channelId or recipientId is required")
        })?;
        self.gateway
            .router()
            .send(identity.user_id, &identity.username, &content, destination)
            .await?;
        Ok(())
    }

    async fn mark_as_read(
        &self,
        identity: &Identity,
        target: ConversationTarget,
    ) -> Result<(), GatewayError> {
        let key = target.key().ok_or_else(|| {
            GatewayError::validation("Exactly one of channelId or dmUserId is required")
        })?;
        let stored = self
            .gateway
            .store()
            .mark_read(identity.user_id, key, Utc::now())
            .await?;
        self.reply(ServerEvent::ReadStatusUpdated(ReadTimestamps::from([(key, stored)])))
            .await;
        Ok(())
    }

    async fn typing(
        &self,
        identity: &Identity,
        target: ConversationTarget,
        is_typing: bool,
    ) -> Result<(), GatewayError> {
        let key = target.key().ok_or_else(|| {
            GatewayError::validation("Exactly one of channelId or dmUserId is required")
        })?;
        let typing = self.gateway.typing();
        if is_typing {
            typing.start(key, identity.user_id).await
        } else {
            typing.stop(key, identity.user_id).await
        }
    }
}
