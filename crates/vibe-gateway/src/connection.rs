use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, Stream, StreamExt};
use tokio::sync::{mpsc, oneshot};
use tracing::{trace, warn};

use vibe_types::events::ServerEvent;

use crate::Gateway;
use crate::session::{Identity, Session};

/// Heartbeat interval: server sends a Ping every 15 seconds.
/// If 2 consecutive Pongs are missed (~30s), the connection is dropped.
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(15);
const MAX_MISSED_PONGS: u8 = 2;

/// Drive one websocket whose token was already verified at the HTTP upgrade.
pub async fn handle_connection(socket: WebSocket, gateway: Gateway, identity: Identity) {
    let mut session = Session::new(gateway);
    if let Err(e) = session.authenticate(Some(identity)).await {
        warn!("Closing websocket: {}", e);
        return;
    }
    let events = match session.activate().await {
        Ok(rx) => rx,
        Err(e) => {
            warn!("Closing websocket: {}", e);
            return;
        }
    };

    let (sender, mut receiver) = socket.split();
    let pong_received = Arc::new(AtomicBool::new(true));

    let (outbound_open, mut outbound_closed) = oneshot::channel();

    let send_task = tokio::spawn(forward_events(
        sender,
        events,
        pong_received.clone(),
        outbound_open,
    ));

    read_frames(
        &mut session,
        &mut receiver,
        &pong_received,
        &mut outbound_closed,
    )
    .await;
    send_task.abort();
    session.close().await;
}

/// Outbound half: queued events to the socket as JSON text, plus heartbeat.
/// Dropping `_open` on return tells the inbound half to stop.
async fn forward_events(
    mut sender: SplitSink<WebSocket, Message>,
    mut events: mpsc::UnboundedReceiver<ServerEvent>,
    pong_received: Arc<AtomicBool>,
    _open: oneshot::Sender<()>,
) {
    let mut heartbeat = tokio::time::interval(HEARTBEAT_INTERVAL);
    heartbeat.tick().await;
    let mut missed_heartbeats: u8 = 0;

    loop {
        tokio::select! {
            event = events.recv() => {
                let Some(event) = event else { break };
                let text = match serde_json::to_string(&event) {
                    Ok(text) => text,
                    Err(e) => {
                        warn!("Failed to encode outbound event: {}", e);
                        continue;
                    }
                };
                if sender.send(Message::Text(text.into())).await.is_err() {
                    break;
                }
            }
            _ = heartbeat.tick() => {
                if pong_received.swap(false, Ordering::Acquire) {
                    missed_heartbeats = 0;
                } else {
                    missed_heartbeats += 1;
                    if missed_heartbeats >= MAX_MISSED_PONGS {
                        warn!("Heartbeat timeout (missed {} pongs), dropping connection", missed_heartbeats);
                        break;
                    }
                }
                if sender.send(Message::Ping(vec![].into())).await.is_err() {
                    break;
                }
            }
        }
    }
    let _ = sender.close().await;
}

/// Inbound half: runs until the client goes away or the outbound half stops.
///
/// Shutdown is only observed between frames; a frame that is being handled
/// always runs to completion.
async fn read_frames<S, E>(
    session: &mut Session,
    receiver: &mut S,
    pong_received: &AtomicBool,
    outbound_closed: &mut oneshot::Receiver<()>,
) where
    S: Stream<Item = Result<Message, E>> + Unpin,
{
    loop {
        let frame = tokio::select! {
            _ = &mut *outbound_closed => break,
            frame = receiver.next() => frame,
        };
        let Some(Ok(msg)) = frame else { break };
        match msg {
            Message::Text(text) => session.handle_text(text.as_str()).await,
            Message::Pong(_) => pong_received.store(true, Ordering::Release),
            Message::Close(_) => break,
            Message::Binary(data) => {
                trace!("Ignoring {} byte binary frame", data.len());
            }
            Message::Ping(_) => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use std::convert::Infallible;

    use futures_util::stream;
    use serde_json::json;
    use vibe_store::Store;

    use super::*;
    use crate::session::Identity;

    #[tokio::test]
    async fn outbound_shutdown_waits_for_the_frame_in_hand() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(Store::open(dir.path()).await.unwrap());
        let alice = store.create_user("alice", "a@example.com", "h").await.unwrap();
        let bob = store.create_user("bob", "b@example.com", "h").await.unwrap();
        let gateway = Gateway::new(store.clone());

        let mut session = Session::new(gateway);
        session
            .authenticate(Some(Identity {
                user_id: alice.id,
                username: alice.username.clone(),
            }))
            .await
            .unwrap();
        let _events = session.activate().await.unwrap();

        let frame = json!({
            "type": "send_message",
            "data": {"content": "last words", "recipientId": bob.id},
        });
        // The outbound half dies in the same instant the frame arrives
        let (open, mut closed) = oneshot::channel::<()>();
        let mut frames = Box::pin(
            stream::once(async move {
                drop(open);
                Ok::<_, Infallible>(Message::Text(frame.to_string().into()))
            })
            .chain(stream::pending()),
        );
        let pong_received = AtomicBool::new(true);

        tokio::time::timeout(
            Duration::from_secs(5),
            read_frames(&mut session, &mut frames, &pong_received, &mut closed),
        )
        .await
        .expect("read loop should stop once the outbound half is gone");

        let persisted = store.direct_messages_for(alice.id).await;
        assert_eq!(persisted.len(), 1);
        assert_eq!(persisted[0].content, "last words");
        session.close().await;
    }
}
