pub mod connection;
pub mod dispatcher;
pub mod error;
pub mod presence;
pub mod router;
pub mod session;
pub mod typing;

use std::sync::Arc;

use tracing::info;
use uuid::Uuid;

use vibe_store::Store;
use vibe_types::events::ServerEvent;
use vibe_types::models::Channel;

use crate::dispatcher::Dispatcher;
use crate::error::GatewayError;
use crate::presence::PresenceRegistry;
use crate::router::MessageRouter;
use crate::typing::TypingTracker;

pub use crate::session::{Identity, Session, SessionState};

/// Process-wide realtime state shared by every connection.
#[derive(Clone)]
pub struct Gateway {
    store: Arc<Store>,
    dispatcher: Dispatcher,
    presence: PresenceRegistry,
    typing: TypingTracker,
    router: MessageRouter,
}

impl Gateway {
    pub fn new(store: Arc<Store>) -> Self {
        let dispatcher = Dispatcher::new();
        let presence = PresenceRegistry::new(dispatcher.clone(), store.clone());
        Self {
            typing: TypingTracker::new(dispatcher.clone(), presence.clone(), store.clone()),
            presence,
            router: MessageRouter::new(store.clone(), dispatcher.clone()),
            dispatcher,
            store,
        }
    }

    pub fn store(&self) -> &Arc<Store> {
        &self.store
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    pub fn presence(&self) -> &PresenceRegistry {
        &self.presence
    }

    pub fn typing(&self) -> &TypingTracker {
        &self.typing
    }

    pub fn router(&self) -> &MessageRouter {
        &self.router
    }

    /// Validate, persist and announce a new channel to everyone connected.
    pub async fn create_channel(
        &self,
        creator: Uuid,
        name: &str,
        description: Option<&str>,
    ) -> Result<Channel, GatewayError> {
        let name = name.trim();
        if name.is_empty() {
            return Err(GatewayError::validation("Channel name is required"));
        }
        let description = description.map(str::trim).unwrap_or_default();

        let channel = self.store.create_channel(name, description, creator).await?;
        let reached = self
            .dispatcher
            .broadcast(ServerEvent::ChannelCreated(channel.clone()))
            .await;
        info!("Announced channel '{}' to {} handles", channel.name, reached);
        Ok(channel)
    }
}
