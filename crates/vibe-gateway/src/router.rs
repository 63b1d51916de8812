use std::sync::Arc;

use tracing::{debug, error};
use uuid::Uuid;

use vibe_store::Store;
use vibe_types::events::ServerEvent;
use vibe_types::models::{Destination, Message};

use crate::dispatcher::Dispatcher;
use crate::error::GatewayError;

/// Persists messages and routes them to exactly the right handles.
#[derive(Clone)]
pub struct MessageRouter {
    store: Arc<Store>,
    dispatcher: Dispatcher,
}

impl MessageRouter {
    pub fn new(store: Arc<Store>, dispatcher: Dispatcher) -> Self {
        Self { store, dispatcher }
    }

    /// Validate, persist, then deliver. Nothing is delivered if the write fails.
    ///
    /// Channel messages reach the channel's audience (persisted members and
    /// live subscribers) and the sender's own connections. Direct messages
    /// reach the recipient and are echoed to the sender.
    pub async fn send(
        &self,
        sender_id: Uuid,
        sender_name: &str,
        content: &str,
        destination: Destination,
    ) -> Result<Message, GatewayError> {
        if content.trim().is_empty() {
            return Err(GatewayError::validation("Message content is required"));
        }

        let mut members = match destination {
            Destination::Channel(channel_id) => {
                self.store
                    .get_channel(channel_id)
                    .await
                    .ok_or_else(|| GatewayError::validation("Channel not found"))?
                    .members
            }
            Destination::Direct(recipient_id) => {
                if self.store.get_user_by_id(recipient_id).await.is_none() {
                    return Err(GatewayError::validation("Recipient not found"));
                }
                Vec::new()
            }
        };

        let message = Message::new(sender_id, sender_name, content, destination);
        let message = self
            .store
            .append_message(message)
            .await
            .inspect_err(|e| error!("Failed to persist message from {}: {}", sender_id, e))?;

        let event = ServerEvent::NewMessage(message.clone());
        let reached = match destination {
            Destination::Channel(channel_id) => {
                members.push(sender_id);
                self.dispatcher
                    .send_to_channel(channel_id, &members, None, event)
                    .await
            }
            Destination::Direct(recipient_id) => {
                self.dispatcher
                    .send_to_users(&[recipient_id, sender_id], event)
                    .await
            }
        };

        debug!("Message {} delivered to {} handles", message.id, reached);
        Ok(message)
    }
}
