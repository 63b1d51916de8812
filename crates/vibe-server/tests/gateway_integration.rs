use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::body::Body;
use axum::http::{Request, StatusCode, header};
use futures_util::{SinkExt, StreamExt};
use serde_json::{Value, json};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tower::ServiceExt;

use vibe_server::build_app;
use vibe_server::config::Config;
use vibe_store::Store;

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

struct Server {
    _dir: tempfile::TempDir,
    addr: SocketAddr,
    app: Router,
}

async fn start() -> Server {
    let dir = tempfile::tempdir().unwrap();
    let config = Config::from_lookup(|key| match key {
        "VIBE_JWT_SECRET" => Some("integration-secret".into()),
        _ => None,
    })
    .unwrap();
    let store = Arc::new(Store::open(dir.path()).await.unwrap());
    let app = build_app(&config, store).unwrap();

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let served = app.clone();
    tokio::spawn(async move {
        axum::serve(listener, served).await.unwrap();
    });

    Server {
        _dir: dir,
        addr,
        app,
    }
}

/// Returns (token, user id).
async fn register(server: &Server, name: &str) -> (String, String) {
    let body = json!({
        "username": name,
        "email": format!("{name}@example.com"),
        "password": "correct horse",
    });
    let req = Request::builder()
        .method("POST")
        .uri("/api/register")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap();
    let resp = server.app.clone().oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::CREATED);
    let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX)
        .await
        .unwrap();
    let body: Value = serde_json::from_slice(&bytes).unwrap();
    (
        body["token"].as_str().unwrap().to_string(),
        body["user"]["id"].as_str().unwrap().to_string(),
    )
}

async fn connect(server: &Server, token: &str) -> Socket {
    let url = format!("ws://{}/gateway?token={}", server.addr, token);
    let (socket, _) = connect_async(url).await.unwrap();
    socket
}

async fn send(socket: &mut Socket, event: Value) {
    socket
        .send(Message::Text(event.to_string().into()))
        .await
        .unwrap();
}

/// Next event of the given type, skipping everything else.
async fn expect(socket: &mut Socket, kind: &str) -> Value {
    let wait = async {
        while let Some(frame) = socket.next().await {
            let Message::Text(text) = frame.unwrap() else {
                continue;
            };
            let event: Value = serde_json::from_str(text.as_str()).unwrap();
            if event["type"] == kind {
                return event["data"].clone();
            }
        }
        panic!("socket closed while waiting for {kind}");
    };
    tokio::time::timeout(Duration::from_secs(5), wait)
        .await
        .unwrap_or_else(|_| panic!("timed out waiting for {kind}"))
}

/// Round-trip a snapshot request; everything sent before it has been handled.
async fn sync(socket: &mut Socket) -> Value {
    send(socket, json!({"type": "get_initial_data"})).await;
    expect(socket, "channels").await;
    expect(socket, "users").await;
    let messages = expect(socket, "messages").await;
    expect(socket, "read_status").await;
    messages
}

#[tokio::test]
async fn upgrade_without_valid_token_is_refused() {
    let server = start().await;

    for url in [
        format!("ws://{}/gateway", server.addr),
        format!("ws://{}/gateway?token=forged", server.addr),
    ] {
        match connect_async(url).await {
            Err(tungstenite::Error::Http(resp)) => {
                assert_eq!(resp.status(), StatusCode::UNAUTHORIZED)
            }
            other => panic!("expected 401, got {other:?}"),
        }
    }
}

#[tokio::test]
async fn channel_messages_reach_joined_members() {
    let server = start().await;
    let (alice_token, _) = register(&server, "alice").await;
    let (bob_token, _) = register(&server, "bob").await;

    let mut alice = connect(&server, &alice_token).await;
    sync(&mut alice).await;

    let mut bob = connect(&server, &bob_token).await;
    send(&mut bob, json!({"type": "get_initial_data"})).await;
    let channels = expect(&mut bob, "channels").await;
    let general = channels[0]["id"].as_str().unwrap().to_string();
    send(
        &mut bob,
        json!({"type": "join_channel", "data": {"channelId": general}}),
    )
    .await;
    sync(&mut bob).await;

    send(
        &mut alice,
        json!({"type": "join_channel", "data": {"channelId": general}}),
    )
    .await;
    send(
        &mut alice,
        json!({"type": "send_message", "data": {"content": "hello", "channelId": general}}),
    )
    .await;

    let received = expect(&mut bob, "new_message").await;
    assert_eq!(received["content"], "hello");
    assert_eq!(received["senderName"], "alice");
    assert_eq!(received["channelId"], general.as_str());
    assert!(received.get("recipientId").is_none());

    let echoed = expect(&mut alice, "new_message").await;
    assert_eq!(echoed["id"], received["id"]);

    // Persisted, so a fresh snapshot carries it
    let messages = sync(&mut bob).await;
    assert_eq!(messages.as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn direct_messages_typing_and_disconnect() {
    let server = start().await;
    let (alice_token, alice_id) = register(&server, "alice").await;
    let (bob_token, bob_id) = register(&server, "bob").await;

    let mut bob = connect(&server, &bob_token).await;
    sync(&mut bob).await;
    let mut alice = connect(&server, &alice_token).await;
    sync(&mut alice).await;

    let online = expect(&mut bob, "user_status_change").await;
    assert_eq!(online["userId"], alice_id.as_str());
    assert_eq!(online["isOnline"], true);

    send(
        &mut alice,
        json!({"type": "send_message", "data": {"content": "psst", "recipientId": bob_id}}),
    )
    .await;
    let dm = expect(&mut bob, "new_message").await;
    assert_eq!(dm["recipientId"], bob_id.as_str());
    assert_eq!(expect(&mut alice, "new_message").await["id"], dm["id"]);

    send(
        &mut bob,
        json!({"type": "mark_as_read", "data": {"dmUserId": alice_id}}),
    )
    .await;
    let updated = expect(&mut bob, "read_status_updated").await;
    assert!(updated.get(format!("dm_{alice_id}")).is_some());

    send(
        &mut alice,
        json!({"type": "typing_start", "data": {"dmUserId": bob_id}}),
    )
    .await;
    let typing = expect(&mut bob, "user_typing").await;
    assert_eq!(typing["dmUserId"], alice_id.as_str());
    assert_eq!(typing["isTyping"], true);

    // Dropping the socket mid-typing must not leave a stale indicator
    alice.close(None).await.unwrap();
    let stopped = expect(&mut bob, "user_typing").await;
    assert_eq!(stopped["userId"], alice_id.as_str());
    assert_eq!(stopped["isTyping"], false);
}

#[tokio::test]
async fn invalid_events_are_answered_with_errors() {
    let server = start().await;
    let (token, _) = register(&server, "alice").await;
    let mut socket = connect(&server, &token).await;

    socket
        .send(Message::Text("{\"type\":\"launch_rockets\"}".into()))
        .await
        .unwrap();
    assert_eq!(expect(&mut socket, "error").await["message"], "Invalid event");

    send(
        &mut socket,
        json!({"type": "create_channel", "data": {"name": "General"}}),
    )
    .await;
    assert_eq!(
        expect(&mut socket, "error").await["message"],
        "Channel already exists"
    );

    send(
        &mut socket,
        json!({"type": "create_channel", "data": {"name": "random", "description": "misc"}}),
    )
    .await;
    let created = expect(&mut socket, "channel_created").await;
    assert_eq!(created["name"], "random");
}
