//! WebSocket endpoint for event/tally subscriptions.
//!
//! Flow:
//! 1. Peer connects to `/x-nmos/events/v1.0/sources/{id}`
//! 2. The upgrade is validated: the version and source must exist
//! 3. A subscription is created and an initial "state" grain is sent
//! 4. Outbound grains drain from a bounded queue; incoming messages are
//!    control commands (`health`, `subscription`)
//! 5. On queue overflow the connection is closed with a policy code

use axum::extract::ws::{CloseFrame, Message, WebSocket};
use axum::extract::{Path, State, WebSocketUpgrade};
use axum::response::{IntoResponse, Response};
use serde_json::Value;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use nmos_domain::{Error, EventType, Id};
use nmos_events::protocol::{health_response, Command};
use nmos_events::HIGH_WATER_MARK;

use crate::error::ApiError;
use crate::state::AppState;

/// Close code sent when the peer cannot keep up (policy violation).
const CLOSE_POLICY: u16 = 1008;
/// Close code sent on controlled shutdown (going away).
const CLOSE_GOING_AWAY: u16 = 1001;

pub fn router(shutdown: CancellationToken) -> axum::Router<AppState> {
    axum::Router::new().route(
        "/x-nmos/events/:version/sources/:id",
        axum::routing::get(
            move |ws: WebSocketUpgrade,
                  state: State<AppState>,
                  path: Path<(String, String)>| {
                upgrade(ws, state, path, shutdown.clone())
            },
        ),
    )
}

/// Validate the upgrade request, then hand the socket to the session.
async fn upgrade(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Path((version, id)): Path<(String, String)>,
    shutdown: CancellationToken,
) -> Response {
    if version != "v1.0" {
        return ApiError(Error::NotFound(version)).into_response();
    }
    let source_id = Id::from(id.as_str());
    let Some(event_type) = state.events.event_type(&source_id) else {
        return ApiError(Error::NotFound(id)).into_response();
    };
    ws.on_upgrade(move |socket| session(socket, state, source_id, event_type, shutdown))
}

async fn session(
    mut socket: WebSocket,
    state: AppState,
    source_id: Id,
    event_type: EventType,
    shutdown: CancellationToken,
) {
    let connection = Uuid::new_v4();
    let overflow = CancellationToken::new();
    let (tx, mut rx) = mpsc::channel::<Value>(HIGH_WATER_MARK);

    let subscription = state.subscriptions.add(
        connection,
        source_id.clone(),
        event_type.clone(),
        tx.clone(),
        overflow.clone(),
    );
    tracing::info!(%connection, source = %source_id, "events peer connected");

    // The source's current value, as the opening grain.
    if let Some(current) = state.events.state(&source_id) {
        let value = current
            .get("payload")
            .and_then(|p| p.get("value"))
            .cloned()
            .unwrap_or(Value::Null);
        state.subscriptions.emit_initial(subscription, &event_type, value);
    }

    let close_reason = loop {
        tokio::select! {
            // Outbound grains, in per-subscription order.
            outbound = rx.recv() => {
                let Some(message) = outbound else { break None };
                let text = message.to_string();
                if socket.send(Message::Text(text)).await.is_err() {
                    break None;
                }
            }
            // Inbound control commands.
            inbound = socket.recv() => {
                match inbound {
                    Some(Ok(Message::Text(text))) => {
                        if let Some(reply) = handle_command(&state, connection, &tx, &overflow, &text) {
                            if socket.send(Message::Text(reply.to_string())).await.is_err() {
                                break None;
                            }
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => break None,
                    Some(Ok(_)) => {}
                    Some(Err(err)) => {
                        tracing::debug!(%connection, %err, "websocket receive error");
                        break None;
                    }
                }
            }
            _ = overflow.cancelled() => {
                break Some((CLOSE_POLICY, "send buffer overflow"));
            }
            _ = shutdown.cancelled() => {
                break Some((CLOSE_GOING_AWAY, "shutting down"));
            }
        }
    };

    if let Some((code, reason)) = close_reason {
        let _ = socket
            .send(Message::Close(Some(CloseFrame {
                code,
                reason: reason.into(),
            })))
            .await;
    }
    state.subscriptions.remove_connection(connection);
    tracing::info!(%connection, "events peer disconnected");
}

/// Parse and act on a control command; returns the reply, if any.
fn handle_command(
    state: &AppState,
    connection: Uuid,
    tx: &mpsc::Sender<Value>,
    overflow: &CancellationToken,
    text: &str,
) -> Option<Value> {
    let command: Command = match serde_json::from_str(text) {
        Ok(c) => c,
        Err(err) => {
            tracing::debug!(%connection, %err, "unparseable command ignored");
            return None;
        }
    };
    match command {
        Command::Health { timestamp } => Some(health_response(timestamp.as_deref())),
        Command::Subscription { sources } => {
            // Replace this connection's subscription set.
            state.subscriptions.remove_connection(connection);
            for raw in sources {
                let source_id = Id::from(raw.as_str());
                let Some(event_type) = state.events.event_type(&source_id) else {
                    tracing::debug!(source = %source_id, "subscription to unknown source ignored");
                    continue;
                };
                let subscription = state.subscriptions.add(
                    connection,
                    source_id.clone(),
                    event_type.clone(),
                    tx.clone(),
                    overflow.clone(),
                );
                if let Some(current) = state.events.state(&source_id) {
                    let value = current
                        .get("payload")
                        .and_then(|p| p.get("value"))
                        .cloned()
                        .unwrap_or(Value::Null);
                    state
                        .subscriptions
                        .emit_initial(subscription, &event_type, value);
                }
            }
            None
        }
    }
}
