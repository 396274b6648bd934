//! End-to-end tests for the channel endpoints: handshake, liveness, fan-out,
//! and failure cleanup, driven over real WebSocket connections.

use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use taskcast_core::broadcast;
use taskcast_core::ids::{TaskId, UserId};
use taskcast_core::registry::{Channel, Registry};
use taskcast_server::auth;
use taskcast_server::directory::{MemoryDirectory, TaskRef, UserIdentity};
use taskcast_server::handlers::build_router;
use taskcast_server::state::AppState;
use tokio::net::TcpListener;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::Message;

const SECRET: &[u8] = b"e2e-test-secret";
const TOKEN_TTL: u64 = 600;

const ALICE: &str = "alice@example.com"; // owns task 7
const BOB: &str = "bob@example.com"; // superuser
const CAROL: &str = "carol@example.com"; // owns task 8

type WsStream =
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

struct TestServer {
    addr: SocketAddr,
    state: Arc<AppState>,
}

async fn start_server() -> TestServer {
    let registry = Arc::new(Registry::new());
    let (broadcaster, dispatcher) = broadcast::channel(registry.clone());
    tokio::spawn(dispatcher.run());

    let directory = Arc::new(MemoryDirectory::new());
    directory.insert_user(UserIdentity {
        id: UserId::new(1),
        subject: ALICE.to_string(),
        superuser: false,
    });
    directory.insert_user(UserIdentity {
        id: UserId::new(2),
        subject: BOB.to_string(),
        superuser: true,
    });
    directory.insert_user(UserIdentity {
        id: UserId::new(3),
        subject: CAROL.to_string(),
        superuser: false,
    });
    directory.insert_task(TaskRef {
        id: TaskId::new(7),
        owner: UserId::new(1),
    });
    directory.insert_task(TaskRef {
        id: TaskId::new(8),
        owner: UserId::new(3),
    });

    let state = Arc::new(AppState::new(
        registry,
        broadcaster,
        directory,
        SECRET.to_vec(),
    ));
    let app = build_router(state.clone());

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    TestServer { addr, state }
}

fn token_for(subject: &str) -> String {
    auth::issue_token(SECRET, subject, TOKEN_TTL).unwrap()
}

async fn connect(addr: SocketAddr, path: &str, token: Option<&str>) -> WsStream {
    let url = match token {
        Some(token) => format!("ws://{}{}?token={}", addr, path, token),
        None => format!("ws://{}{}", addr, path),
    };
    let (stream, _) = tokio_tungstenite::connect_async(&url)
        .await
        .expect("Failed to connect");
    stream
}

async fn next_json(stream: &mut WsStream) -> Value {
    let msg = tokio::time::timeout(Duration::from_secs(2), stream.next())
        .await
        .expect("timed out waiting for frame")
        .expect("stream ended")
        .expect("websocket error");
    match msg {
        Message::Text(text) => serde_json::from_str(&text).expect("invalid JSON frame"),
        other => panic!("expected text frame, got {:?}", other),
    }
}

async fn expect_policy_close(stream: &mut WsStream, reason: &str) {
    let msg = tokio::time::timeout(Duration::from_secs(2), stream.next())
        .await
        .expect("timed out waiting for close")
        .expect("stream ended")
        .expect("websocket error");
    match msg {
        Message::Close(Some(frame)) => {
            assert_eq!(frame.code, CloseCode::Policy);
            assert_eq!(frame.reason, reason);
        }
        other => panic!("expected close frame, got {:?}", other),
    }
}

#[tokio::test]
async fn test_global_channel_connect_and_ping_pong() {
    let server = start_server().await;
    let mut ws = connect(
        server.addr,
        "/ws/notifications",
        Some(&token_for(ALICE)),
    )
    .await;

    let connected = next_json(&mut ws).await;
    assert_eq!(connected["type"], "connected");
    assert_eq!(connected["data"]["message"], "Connected to notifications");

    ws.send(Message::Text("ping".to_string())).await.unwrap();
    let pong = next_json(&mut ws).await;
    assert_eq!(pong, json!({"type": "pong"}));
}

#[tokio::test]
async fn test_missing_token_is_rejected() {
    let server = start_server().await;
    let mut ws = connect(server.addr, "/ws/notifications", None).await;

    expect_policy_close(&mut ws, "No token provided").await;
    assert_eq!(server.state.registry.stats().connections, 0);
}

#[tokio::test]
async fn test_invalid_token_is_rejected() {
    let server = start_server().await;
    let mut ws = connect(server.addr, "/ws/reminders", Some("not-a-jwt")).await;

    expect_policy_close(&mut ws, "Invalid token").await;
}

#[tokio::test]
async fn test_unknown_user_is_rejected() {
    let server = start_server().await;
    let token = token_for("mallory@example.com");
    let mut ws = connect(server.addr, "/ws/notifications", Some(&token)).await;

    expect_policy_close(&mut ws, "User not found").await;
}

#[tokio::test]
async fn test_task_channel_denies_non_owner() {
    let server = start_server().await;
    // Carol is neither the owner of task 7 nor a superuser.
    let mut ws = connect(server.addr, "/ws/tasks/7", Some(&token_for(CAROL))).await;

    expect_policy_close(&mut ws, "Access denied").await;

    // The rejection left no trace in the registry.
    let stats = server.state.registry.stats();
    assert_eq!(stats.connections, 0);
    assert_eq!(stats.task_channels, 0);
}

#[tokio::test]
async fn test_unknown_task_reads_as_access_denied() {
    let server = start_server().await;
    let mut ws = connect(server.addr, "/ws/tasks/999", Some(&token_for(ALICE))).await;

    expect_policy_close(&mut ws, "Access denied").await;
}

#[tokio::test]
async fn test_task_broadcast_reaches_subscribers_only() {
    let server = start_server().await;

    // Alice owns task 7; Bob is a superuser. Carol watches task 8.
    let mut a = connect(server.addr, "/ws/tasks/7", Some(&token_for(ALICE))).await;
    let mut b = connect(server.addr, "/ws/tasks/7", Some(&token_for(BOB))).await;
    let mut c = connect(server.addr, "/ws/tasks/8", Some(&token_for(CAROL))).await;

    assert_eq!(
        next_json(&mut a).await["data"]["message"],
        "Connected to task 7"
    );
    assert_eq!(
        next_json(&mut b).await["data"]["message"],
        "Connected to task 7"
    );
    assert_eq!(
        next_json(&mut c).await["data"]["message"],
        "Connected to task 8"
    );

    server.state.broadcaster.notify_task_updated(
        TaskId::new(7),
        json!({"action": "updated", "task": {"id": 7, "title": "Ship the report"}}),
    );

    for ws in [&mut a, &mut b] {
        let frame = next_json(ws).await;
        assert_eq!(frame["type"], "task_updated");
        assert_eq!(frame["data"]["action"], "updated");
        assert!(frame["ts"].is_string());
    }

    // Task 8's subscriber stays quiet.
    let quiet = tokio::time::timeout(Duration::from_millis(300), c.next()).await;
    assert!(quiet.is_err(), "task 8 subscriber received a task 7 event");
}

#[tokio::test]
async fn test_user_reminder_reaches_all_user_connections() {
    let server = start_server().await;

    let mut alice_global = connect(
        server.addr,
        "/ws/notifications",
        Some(&token_for(ALICE)),
    )
    .await;
    let mut alice_reminders =
        connect(server.addr, "/ws/reminders", Some(&token_for(ALICE))).await;
    let mut bob_global = connect(server.addr, "/ws/notifications", Some(&token_for(BOB))).await;

    next_json(&mut alice_global).await;
    next_json(&mut alice_reminders).await;
    next_json(&mut bob_global).await;

    server
        .state
        .broadcaster
        .notify_user_reminder(UserId::new(1), json!({"reminder": {"id": 5, "task_id": 7}}));

    for ws in [&mut alice_global, &mut alice_reminders] {
        let frame = next_json(ws).await;
        assert_eq!(frame["type"], "reminder");
        assert_eq!(frame["data"]["reminder"]["id"], 5);
    }

    let quiet = tokio::time::timeout(Duration::from_millis(300), bob_global.next()).await;
    assert!(quiet.is_err(), "reminder leaked to another user");
}

#[tokio::test]
async fn test_broadcast_prunes_severed_connection() {
    let server = start_server().await;

    let mut healthy = connect(
        server.addr,
        "/ws/notifications",
        Some(&token_for(ALICE)),
    )
    .await;
    next_json(&mut healthy).await;

    // A connection whose transport is already gone: its outbound queue has
    // no consumer, so the first delivery attempt fails.
    let (dead_tx, dead_rx) = tokio::sync::mpsc::unbounded_channel();
    drop(dead_rx);
    let dead = server.state.registry.register(UserId::new(3), dead_tx);
    server.state.registry.join(Channel::Global, dead);
    assert_eq!(server.state.registry.stats().global_subscribers, 2);

    server
        .state
        .broadcaster
        .notify_global(json!({"message": "maintenance window at 18:00"}));

    let frame = next_json(&mut healthy).await;
    assert_eq!(frame["type"], "notification");
    assert_eq!(frame["data"]["message"], "maintenance window at 18:00");

    // The prune runs inside the same sweep; give it a beat.
    let mut pruned = false;
    for _ in 0..50 {
        if server.state.registry.stats().global_subscribers == 1 {
            pruned = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(pruned, "dead connection was not pruned from the channel");
    assert!(server
        .state
        .registry
        .members(Channel::Global)
        .iter()
        .all(|m| m.connection != dead));
}

#[tokio::test]
async fn test_disconnect_cleans_up_registry() {
    let server = start_server().await;

    let mut ws = connect(server.addr, "/ws/tasks/7", Some(&token_for(ALICE))).await;
    next_json(&mut ws).await;
    assert_eq!(server.state.registry.stats().connections, 1);
    assert!(server.state.registry.has_task_channel(TaskId::new(7)));

    ws.close(None).await.unwrap();
    drop(ws);

    let mut cleaned = false;
    for _ in 0..100 {
        let stats = server.state.registry.stats();
        if stats.connections == 0 && stats.task_channels == 0 {
            cleaned = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(cleaned, "disconnect did not deregister the connection");
}

#[tokio::test]
async fn test_health_and_stats_endpoints() {
    let server = start_server().await;
    let client = reqwest::Client::new();

    let health: Value = client
        .get(format!("http://{}/health", server.addr))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(health["status"], "ok");
    assert!(health["version"].is_string());

    let mut ws = connect(server.addr, "/ws/reminders", Some(&token_for(ALICE))).await;
    next_json(&mut ws).await;

    let stats: Value = client
        .get(format!("http://{}/stats", server.addr))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(stats["connections"], 1);
    assert_eq!(stats["reminder_subscribers"], 1);
    assert_eq!(stats["task_channels"], 0);
}
