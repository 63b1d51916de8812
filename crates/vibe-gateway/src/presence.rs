use std::sync::Arc;

use tokio::sync::{Mutex, mpsc};
use tracing::{error, info};
use uuid::Uuid;

use vibe_store::Store;
use vibe_types::events::ServerEvent;

use crate::dispatcher::{ConnId, Dispatcher};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectedUser {
    pub user_id: Uuid,
    pub username: String,
}

/// Tracks who is connected and keeps the persisted online flag in step.
///
/// A user may hold several connections; they go online with the first and
/// offline only when the last one closes. Transitions are serialized, so the
/// persisted flag and the announced status always match the last handle
/// change.
#[derive(Clone)]
pub struct PresenceRegistry {
    dispatcher: Dispatcher,
    store: Arc<Store>,
    transitions: Arc<Mutex<()>>,
}

impl PresenceRegistry {
    pub fn new(dispatcher: Dispatcher, store: Arc<Store>) -> Self {
        Self {
            dispatcher,
            store,
            transitions: Arc::new(Mutex::new(())),
        }
    }

    pub async fn connect(
        &self,
        user_id: Uuid,
        username: &str,
    ) -> (ConnId, mpsc::UnboundedReceiver<ServerEvent>) {
        let _transition = self.transitions.lock().await;
        let (conn_id, rx, first) = self.dispatcher.register(user_id, username).await;
        if first {
            info!("{} ({}) is online", username, user_id);
            self.set_online(user_id, true).await;
        }
        (conn_id, rx)
    }

    /// Returns true if this closed the user's last connection.
    pub async fn disconnect(&self, user_id: Uuid, conn_id: ConnId) -> bool {
        let _transition = self.transitions.lock().await;
        let last = self.dispatcher.unregister(user_id, conn_id).await;
        if last {
            info!("{} is offline", user_id);
            self.set_online(user_id, false).await;
        }
        last
    }

    /// Live connections of a user, `None` if they are offline.
    pub async fn resolve_handles(&self, user_id: Uuid) -> Option<Vec<ConnId>> {
        let handles = self.dispatcher.handles_of(user_id).await;
        (!handles.is_empty()).then_some(handles)
    }

    pub async fn is_online(&self, user_id: Uuid) -> bool {
        self.dispatcher.is_connected(user_id).await
    }

    pub async fn list_connected(&self) -> Vec<ConnectedUser> {
        self.dispatcher
            .connected_users()
            .await
            .into_iter()
            .map(|(user_id, username)| ConnectedUser { user_id, username })
            .collect()
    }

    async fn set_online(&self, user_id: Uuid, is_online: bool) {
        if let Err(e) = self.store.set_online(user_id, is_online).await {
            error!("Failed to persist online={} for {}: {}", is_online, user_id, e);
        }
        self.dispatcher
            .broadcast(ServerEvent::UserStatusChange { user_id, is_online })
            .await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn online_flag_follows_first_and_last_connection() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(Store::open(dir.path()).await.unwrap());
        let alice = store.create_user("alice", "a@example.com", "h").await.unwrap();
        let presence = PresenceRegistry::new(Dispatcher::new(), store.clone());

        let (_watcher_conn, mut watcher) = presence.connect(Uuid::new_v4(), "watcher").await;
        // The watcher hears its own arrival first
        assert!(matches!(
            watcher.try_recv(),
            Ok(ServerEvent::UserStatusChange { is_online: true, .. })
        ));

        let (first, _rx1) = presence.connect(alice.id, "alice").await;
        let (second, _rx2) = presence.connect(alice.id, "alice").await;
        assert!(store.get_user_by_id(alice.id).await.unwrap().is_online);
        assert!(matches!(
            watcher.try_recv(),
            Ok(ServerEvent::UserStatusChange { is_online: true, user_id }) if user_id == alice.id
        ));
        // Second connection does not re-announce
        assert!(watcher.try_recv().is_err());

        assert!(!presence.disconnect(alice.id, first).await);
        assert!(presence.is_online(alice.id).await);
        assert!(store.get_user_by_id(alice.id).await.unwrap().is_online);

        assert!(presence.disconnect(alice.id, second).await);
        assert!(!store.get_user_by_id(alice.id).await.unwrap().is_online);
        assert!(matches!(
            watcher.try_recv(),
            Ok(ServerEvent::UserStatusChange { is_online: false, .. })
        ));
        assert_eq!(presence.resolve_handles(alice.id).await, None);
        assert_eq!(presence.list_connected().await.len(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn reconnect_during_disconnect_stays_online() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(Store::open(dir.path()).await.unwrap());
        let alice = store.create_user("alice", "a@example.com", "h").await.unwrap();
        let presence = PresenceRegistry::new(Dispatcher::new(), store.clone());
        let (_watcher_conn, mut watcher) = presence.connect(Uuid::new_v4(), "watcher").await;

        let (mut current, _rx) = presence.connect(alice.id, "alice").await;
        let mut receivers = Vec::new();
        for _ in 0..25 {
            // Page reload: the old handle closes while the new one opens
            let (_, (next, rx)) = tokio::join!(
                presence.disconnect(alice.id, current),
                presence.connect(alice.id, "alice"),
            );
            receivers.push(rx);
            current = next;

            assert!(presence.is_online(alice.id).await);
            assert!(store.get_user_by_id(alice.id).await.unwrap().is_online);
        }

        let mut last_seen = None;
        while let Ok(event) = watcher.try_recv() {
            if let ServerEvent::UserStatusChange { user_id, is_online } = event {
                if user_id == alice.id {
                    last_seen = Some(is_online);
                }
            }
        }
        assert_eq!(last_seen, Some(true));
    }
}
