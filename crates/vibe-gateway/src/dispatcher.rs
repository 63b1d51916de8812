use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tokio::sync::{RwLock, mpsc};
use uuid::Uuid;

use vibe_types::events::ServerEvent;

/// Identifies one live connection of a user.
pub type ConnId = Uuid;

struct Handle {
    username: String,
    tx: mpsc::UnboundedSender<ServerEvent>,
    /// Channels this connection joined for live traffic.
    channels: HashSet<Uuid>,
}

/// Owns every live transport handle and fans events out to them.
#[derive(Clone, Default)]
pub struct Dispatcher {
    inner: Arc<DispatcherInner>,
}

#[derive(Default)]
struct DispatcherInner {
    /// user_id -> (conn_id -> handle)
    connections: RwLock<HashMap<Uuid, HashMap<ConnId, Handle>>>,
}

impl Dispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a connection. Returns (conn_id, receiver, first) where `first`
    /// is true if the user had no other live connection.
    pub async fn register(
        &self,
        user_id: Uuid,
        username: &str,
    ) -> (ConnId, mpsc::UnboundedReceiver<ServerEvent>, bool) {
        let conn_id = Uuid::new_v4();
        let (tx, rx) = mpsc::unbounded_channel();
        let mut connections = self.inner.connections.write().await;
        let handles = connections.entry(user_id).or_default();
        let first = handles.is_empty();
        handles.insert(
            conn_id,
            Handle {
                username: username.to_string(),
                tx,
                channels: HashSet::new(),
            },
        );
        (conn_id, rx, first)
    }

    /// Drop a connection. Returns true if it was the user's last one.
    pub async fn unregister(&self, user_id: Uuid, conn_id: ConnId) -> bool {
        let mut connections = self.inner.connections.write().await;
        let Some(handles) = connections.get_mut(&user_id) else {
            return false;
        };
        if handles.remove(&conn_id).is_none() {
            return false;
        }
        if handles.is_empty() {
            connections.remove(&user_id);
            return true;
        }
        false
    }

    pub async fn is_connected(&self, user_id: Uuid) -> bool {
        self.inner.connections.read().await.contains_key(&user_id)
    }

    pub async fn handles_of(&self, user_id: Uuid) -> Vec<ConnId> {
        self.inner
            .connections
            .read()
            .await
            .get(&user_id)
            .map(|handles| handles.keys().copied().collect())
            .unwrap_or_default()
    }

    /// Connected users as (user_id, username).
    pub async fn connected_users(&self) -> Vec<(Uuid, String)> {
        self.inner
            .connections
            .read()
            .await
            .iter()
            .filter_map(|(id, handles)| {
                handles.values().next().map(|h| (*id, h.username.clone()))
            })
            .collect()
    }

    // -- Channel subscriptions (per connection, never persisted) --

    pub async fn subscribe(&self, user_id: Uuid, conn_id: ConnId, channel_ids: &[Uuid]) {
        let mut connections = self.inner.connections.write().await;
        if let Some(handle) = connections
            .get_mut(&user_id)
            .and_then(|handles| handles.get_mut(&conn_id))
        {
            handle.channels.extend(channel_ids.iter().copied());
        }
    }

    pub async fn unsubscribe(&self, user_id: Uuid, conn_id: ConnId, channel_id: Uuid) {
        let mut connections = self.inner.connections.write().await;
        if let Some(handle) = connections
            .get_mut(&user_id)
            .and_then(|handles| handles.get_mut(&conn_id))
        {
            handle.channels.remove(&channel_id);
        }
    }

    pub async fn subscriptions(&self, user_id: Uuid, conn_id: ConnId) -> HashSet<Uuid> {
        self.inner
            .connections
            .read()
            .await
            .get(&user_id)
            .and_then(|handles| handles.get(&conn_id))
            .map(|h| h.channels.clone())
            .unwrap_or_default()
    }

    // -- Delivery --

    /// Send to a single connection.
    pub async fn send_to_conn(&self, user_id: Uuid, conn_id: ConnId, event: ServerEvent) {
        let connections = self.inner.connections.read().await;
        if let Some(handle) = connections
            .get(&user_id)
            .and_then(|handles| handles.get(&conn_id))
        {
            let _ = handle.tx.send(event);
        }
    }

    /// Send to every connection of one user. Returns the number of handles reached.
    pub async fn send_to_user(&self, user_id: Uuid, event: ServerEvent) -> usize {
        self.deliver(|uid, _| uid == user_id, event).await
    }

    /// Send to every connection of each listed user; duplicates are ignored.
    pub async fn send_to_users(&self, user_ids: &[Uuid], event: ServerEvent) -> usize {
        self.deliver(|uid, _| user_ids.contains(&uid), event).await
    }

    /// Send to the channel's audience: every connection of a persisted member
    /// plus every connection currently subscribed to the channel.
    pub async fn send_to_channel(
        &self,
        channel_id: Uuid,
        members: &[Uuid],
        except: Option<Uuid>,
        event: ServerEvent,
    ) -> usize {
        self.deliver(
            |uid, handle| {
                Some(uid) != except
                    && (members.contains(&uid) || handle.channels.contains(&channel_id))
            },
            event,
        )
        .await
    }

    /// Broadcast an event to all connected clients.
    pub async fn broadcast(&self, event: ServerEvent) -> usize {
        self.deliver(|_, _| true, event).await
    }

    async fn deliver(&self, wants: impl Fn(Uuid, &Handle) -> bool, event: ServerEvent) -> usize {
        let connections = self.inner.connections.read().await;
        let mut reached = 0;
        for (&user_id, handles) in connections.iter() {
            for handle in handles.values() {
                if wants(user_id, handle) && handle.tx.send(event.clone()).is_ok() {
                    reached += 1;
                }
            }
        }
        reached
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ping() -> ServerEvent {
        ServerEvent::error("ping")
    }

    #[tokio::test]
    async fn last_handle_reports_disconnect() {
        let dispatcher = Dispatcher::new();
        let user = Uuid::new_v4();
        let (first_conn, _rx1, first) = dispatcher.register(user, "alice").await;
        let (second_conn, _rx2, again) = dispatcher.register(user, "alice").await;
        assert!(first);
        assert!(!again);

        assert!(!dispatcher.unregister(user, first_conn).await);
        assert!(dispatcher.is_connected(user).await);
        assert!(dispatcher.unregister(user, second_conn).await);
        assert!(!dispatcher.is_connected(user).await);
        // Unknown connection is a no-op
        assert!(!dispatcher.unregister(user, second_conn).await);
    }

    #[tokio::test]
    async fn channel_delivery_reaches_members_and_subscribers_only() {
        let dispatcher = Dispatcher::new();
        let channel = Uuid::new_v4();
        let member = Uuid::new_v4();
        let joiner = Uuid::new_v4();
        let outsider = Uuid::new_v4();

        let (_, mut member_rx, _) = dispatcher.register(member, "m").await;
        let (joiner_conn, mut joiner_rx, _) = dispatcher.register(joiner, "j").await;
        let (_, mut outsider_rx, _) = dispatcher.register(outsider, "o").await;
        dispatcher.subscribe(joiner, joiner_conn, &[channel]).await;

        let reached = dispatcher
            .send_to_channel(channel, &[member], None, ping())
            .await;
        assert_eq!(reached, 2);
        assert!(member_rx.try_recv().is_ok());
        assert!(joiner_rx.try_recv().is_ok());
        assert!(outsider_rx.try_recv().is_err());

        dispatcher.unsubscribe(joiner, joiner_conn, channel).await;
        let reached = dispatcher
            .send_to_channel(channel, &[member], Some(member), ping())
            .await;
        assert_eq!(reached, 0);
    }

    #[tokio::test]
    async fn user_delivery_covers_every_connection() {
        let dispatcher = Dispatcher::new();
        let user = Uuid::new_v4();
        let (_, mut a, _) = dispatcher.register(user, "u").await;
        let (_, mut b, _) = dispatcher.register(user, "u").await;
        assert_eq!(dispatcher.send_to_user(user, ping()).await, 2);
        assert!(a.try_recv().is_ok() && b.try_recv().is_ok());
        assert_eq!(dispatcher.connected_users().await.len(), 1);
        assert_eq!(dispatcher.handles_of(user).await.len(), 2);
    }
}
