//! Channel endpoints and server wiring.
//!
//! Each WebSocket endpoint runs the same lifecycle: authenticate the token
//! from the query string, authorize task access where applicable, register
//! with the connection registry, then pump frames until the peer goes away.
//! Handshake rejections complete the upgrade and immediately close with
//! status 1008 and a reason string.

use crate::auth::{self, AuthError};
use crate::config::Config;
use crate::directory::{Directory, UserIdentity};
use crate::metrics::{self, ConnectionMetricsGuard};
use crate::state::AppState;
use anyhow::Result;
use axum::{
    extract::{
        ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade},
        Path, Query, State,
    },
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use futures_util::{stream::SplitSink, SinkExt, StreamExt};
use serde::Deserialize;
use std::sync::Arc;
use taskcast_core::broadcast;
use taskcast_core::ids::TaskId;
use taskcast_core::registry::{Channel, Registry};
use taskcast_protocol::{CloseReason, Envelope};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

/// Query parameters accepted by every channel endpoint.
#[derive(Debug, Deserialize)]
pub struct WsQuery {
    pub token: Option<String>,
}

/// Build the router serving the channel endpoints.
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/ws/notifications", get(ws_notifications))
        .route("/ws/tasks/:task_id", get(ws_task))
        .route("/ws/reminders", get(ws_reminders))
        .route("/health", get(health_handler))
        .route("/stats", get(stats_handler))
        .with_state(state)
}

/// Assemble the hub and serve it until shutdown.
///
/// Spawns the dispatcher, starts the metrics exporter when enabled, binds,
/// and serves the router.
///
/// # Errors
///
/// Returns an error if the bind address is invalid, or if binding or
/// serving fails.
pub async fn run_server(config: Config, directory: Arc<dyn Directory>) -> Result<()> {
    let registry = Arc::new(Registry::new());
    let (broadcaster, dispatcher) = broadcast::channel(registry.clone());
    tokio::spawn(dispatcher.run());

    if config.metrics.enabled {
        match metrics::start_metrics_server(config.metrics.port) {
            Ok(()) => metrics::init_metrics(),
            Err(e) => error!("Failed to start metrics server: {}", e),
        }
    }

    let state = Arc::new(AppState::new(
        registry,
        broadcaster,
        directory,
        config.auth.resolve_secret(),
    ));
    let app = build_router(state);

    let addr = config.bind_addr()?;
    let listener = TcpListener::bind(addr).await?;

    info!("taskcast hub listening on {}", addr);
    info!(
        "channel endpoints: /ws/notifications, /ws/tasks/:task_id, /ws/reminders on {}",
        addr
    );

    axum::serve(listener, app).await?;
    Ok(())
}

/// Health check endpoint.
async fn health_handler() -> impl IntoResponse {
    axum::Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

/// Registry snapshot endpoint.
async fn stats_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    axum::Json(state.registry.stats())
}

/// `GET /ws/notifications?token=JWT`: the global notifications channel.
async fn ws_notifications(
    State(state): State<Arc<AppState>>,
    Query(query): Query<WsQuery>,
    ws: WebSocketUpgrade,
) -> Response {
    match auth::authenticate(state.directory.as_ref(), &state.secret, query.token.as_deref()).await
    {
        Ok(user) => ws.on_upgrade(move |socket| run_channel(socket, state, user, Channel::Global)),
        Err(err) => reject(ws, &err),
    }
}

/// `GET /ws/tasks/:task_id?token=JWT`: events scoped to one task.
///
/// Requires task access on top of authentication: the task's owner and
/// superusers pass, everyone else is closed with "Access denied". An
/// unknown task id is indistinguishable from a denied one.
async fn ws_task(
    State(state): State<Arc<AppState>>,
    Path(task_id): Path<i64>,
    Query(query): Query<WsQuery>,
    ws: WebSocketUpgrade,
) -> Response {
    let task = TaskId::new(task_id);
    let user = match auth::authenticate(
        state.directory.as_ref(),
        &state.secret,
        query.token.as_deref(),
    )
    .await
    {
        Ok(user) => user,
        Err(err) => return reject(ws, &err),
    };

    match state.directory.task_access(task, &user).await {
        Ok(_) => {
            ws.on_upgrade(move |socket| run_channel(socket, state, user, Channel::Task(task)))
        }
        Err(err) => {
            debug!(task = %task, user = %user.id, error = %err, "task channel authorization failed");
            close_with(ws, CloseReason::AccessDenied)
        }
    }
}

/// `GET /ws/reminders?token=JWT`: reminder deliveries.
async fn ws_reminders(
    State(state): State<Arc<AppState>>,
    Query(query): Query<WsQuery>,
    ws: WebSocketUpgrade,
) -> Response {
    match auth::authenticate(state.directory.as_ref(), &state.secret, query.token.as_deref()).await
    {
        Ok(user) => {
            ws.on_upgrade(move |socket| run_channel(socket, state, user, Channel::Reminders))
        }
        Err(err) => reject(ws, &err),
    }
}

/// Reject a handshake that failed authentication.
fn reject(ws: WebSocketUpgrade, err: &AuthError) -> Response {
    warn!(reason = %err, "websocket authentication failed");
    close_with(ws, err.close_reason())
}

/// Complete the upgrade, then close immediately with `reason`.
///
/// Closing after the upgrade lets the client read the close code and reason
/// instead of seeing a failed HTTP request.
fn close_with(ws: WebSocketUpgrade, reason: CloseReason) -> Response {
    metrics::record_handshake_failure(reason.as_str());
    ws.on_upgrade(move |mut socket| async move {
        let frame = CloseFrame {
            code: reason.code(),
            reason: reason.message().into(),
        };
        let _ = socket.send(Message::Close(Some(frame))).await;
    })
}

/// Drive an accepted connection through the open phase of its lifecycle.
///
/// Registers the connection, joins the channel, confirms the subscription
/// once, then blocks on the receive loop until the peer disconnects or
/// errors. Exactly one `leave` runs on the way out.
async fn run_channel(socket: WebSocket, state: Arc<AppState>, user: UserIdentity, channel: Channel) {
    let _guard = ConnectionMetricsGuard::new();

    let (sink, mut stream) = socket.split();
    let (tx, rx) = mpsc::unbounded_channel::<String>();

    let connection = state.registry.register(user.id, tx.clone());
    state.registry.join(channel, connection);
    metrics::set_task_channels(state.registry.stats().task_channels);

    debug!(connection = %connection, channel = %channel, user = %user.id, "channel opened");

    let writer = tokio::spawn(write_frames(sink, rx));

    if let Ok(text) = Envelope::connected(connected_message(channel)).to_text() {
        let _ = tx.send(text);
    }

    while let Some(message) = stream.next().await {
        match message {
            Ok(Message::Text(text)) => {
                // Inbound traffic is liveness only: a literal "ping" gets a
                // pong, everything else is read and discarded.
                if text == "ping" {
                    if let Ok(pong) = Envelope::pong().to_text() {
                        if tx.send(pong).is_err() {
                            break;
                        }
                    }
                }
            }
            Ok(Message::Close(_)) => {
                debug!(connection = %connection, "received close frame");
                break;
            }
            Ok(_) => {}
            Err(e) => {
                warn!(connection = %connection, error = %e, "websocket error");
                break;
            }
        }
    }

    writer.abort();
    state.registry.leave(channel, connection);
    state.registry.deregister(connection);
    metrics::set_task_channels(state.registry.stats().task_channels);

    debug!(connection = %connection, channel = %channel, "channel closed");
}

/// Drain a connection's outbound queue into the socket sink.
///
/// Stops on the first sink error; dropping the receiver makes later sends
/// fail, which the dispatcher treats as a dead connection.
async fn write_frames(
    mut sink: SplitSink<WebSocket, Message>,
    mut rx: mpsc::UnboundedReceiver<String>,
) {
    while let Some(text) = rx.recv().await {
        if sink.send(Message::Text(text)).await.is_err() {
            break;
        }
    }
}

fn connected_message(channel: Channel) -> String {
    match channel {
        Channel::Global => "Connected to notifications".to_string(),
        Channel::Task(task) => format!("Connected to task {}", task),
        Channel::Reminders => "Connected to reminders".to_string(),
    }
}
