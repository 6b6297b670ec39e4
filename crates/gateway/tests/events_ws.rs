//! Events WebSocket tests: a real listener on an ephemeral port, a real
//! client, and the full grain path from producer to peer.

use futures_util::{SinkExt, StreamExt};
use serde_json::json;
use tokio::net::TcpListener;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;

use nmos_domain::{EventType, Settings};
use nmos_gateway::{bootstrap, ws, AppState};

async fn spawn_ws(state: &AppState, shutdown: CancellationToken) -> String {
    let app = ws::router(shutdown).with_state(state.clone());
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("ws://{addr}")
}

fn app_state() -> AppState {
    let mut settings: Settings =
        serde_json::from_str(r#"{"host_address": "127.0.0.1"}"#).unwrap();
    settings.apply_defaults();
    AppState::new(settings)
}

async fn next_json(
    socket: &mut (impl futures_util::Stream<Item = Result<Message, tokio_tungstenite::tungstenite::Error>>
              + Unpin),
) -> serde_json::Value {
    loop {
        match tokio::time::timeout(std::time::Duration::from_secs(5), socket.next())
            .await
            .expect("websocket message")
            .expect("open socket")
            .expect("clean frame")
        {
            Message::Text(text) => return serde_json::from_str(&text).unwrap(),
            Message::Ping(_) | Message::Pong(_) => continue,
            other => panic!("unexpected frame: {other:?}"),
        }
    }
}

#[tokio::test]
async fn subscriber_gets_initial_state_then_updates() {
    let state = app_state();
    let seeded = bootstrap::seed(&state).unwrap();
    let base = spawn_ws(&state, CancellationToken::new()).await;

    let url = format!(
        "{base}/x-nmos/events/v1.0/sources/{}",
        seeded.temperature_source
    );
    let (mut socket, _) = tokio_tungstenite::connect_async(&url).await.unwrap();

    // The opening grain reflects the seeded state.
    let initial = next_json(&mut socket).await;
    assert_eq!(initial["message_type"], "state");
    assert_eq!(initial["payload"]["type"]["name"], "number/temperature/C");
    assert_eq!(initial["payload"]["value"]["value"], 20.0);
    assert_eq!(
        initial["identity"]["source_id"],
        seeded.temperature_source.as_str()
    );

    // A producer update fans out to the peer.
    let celsius = EventType::measurement_with_unit("number", "temperature", "C");
    let delivered = state.subscriptions.publish(
        &seeded.temperature_source,
        &celsius,
        &json!({"value": 21.5, "unit": "C"}),
    );
    assert_eq!(delivered, 1);

    let update = next_json(&mut socket).await;
    assert_eq!(update["payload"]["value"]["value"], 21.5);
    assert!(
        update["timing"]["creation_timestamp"].as_str().unwrap()
            >= initial["timing"]["creation_timestamp"].as_str().unwrap()
    );
}

#[tokio::test]
async fn health_command_is_answered() {
    let state = app_state();
    let seeded = bootstrap::seed(&state).unwrap();
    let base = spawn_ws(&state, CancellationToken::new()).await;

    let url = format!(
        "{base}/x-nmos/events/v1.0/sources/{}",
        seeded.temperature_source
    );
    let (mut socket, _) = tokio_tungstenite::connect_async(&url).await.unwrap();
    let _initial = next_json(&mut socket).await;

    socket
        .send(Message::Text(
            json!({"command": "health", "timestamp": "1441974485:0"}).to_string(),
        ))
        .await
        .unwrap();
    let reply = next_json(&mut socket).await;
    assert_eq!(reply["message_type"], "health");
    assert_eq!(reply["timestamp"], "1441974485:0");
}

#[tokio::test]
async fn unknown_source_is_rejected_before_upgrade() {
    let state = app_state();
    bootstrap::seed(&state).unwrap();
    let base = spawn_ws(&state, CancellationToken::new()).await;

    let url = format!("{base}/x-nmos/events/v1.0/sources/ghost");
    let err = tokio_tungstenite::connect_async(&url).await.unwrap_err();
    match err {
        tokio_tungstenite::tungstenite::Error::Http(response) => {
            assert_eq!(response.status().as_u16(), 404);
        }
        other => panic!("expected http rejection, got {other:?}"),
    }
}

#[tokio::test]
async fn disconnect_releases_subscriptions() {
    let state = app_state();
    let seeded = bootstrap::seed(&state).unwrap();
    let base = spawn_ws(&state, CancellationToken::new()).await;

    let url = format!(
        "{base}/x-nmos/events/v1.0/sources/{}",
        seeded.temperature_source
    );
    let (mut socket, _) = tokio_tungstenite::connect_async(&url).await.unwrap();
    let _initial = next_json(&mut socket).await;
    assert_eq!(state.subscriptions.len(), 1);

    socket.close(None).await.unwrap();
    // Give the session task a moment to unwind.
    for _ in 0..50 {
        if state.subscriptions.is_empty() {
            break;
        }
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
    }
    assert!(state.subscriptions.is_empty());
}

#[tokio::test]
async fn shutdown_closes_peers_going_away() {
    let state = app_state();
    let seeded = bootstrap::seed(&state).unwrap();
    let shutdown = CancellationToken::new();
    let base = spawn_ws(&state, shutdown.clone()).await;

    let url = format!(
        "{base}/x-nmos/events/v1.0/sources/{}",
        seeded.temperature_source
    );
    let (mut socket, _) = tokio_tungstenite::connect_async(&url).await.unwrap();
    let _initial = next_json(&mut socket).await;

    shutdown.cancel();
    loop {
        match tokio::time::timeout(std::time::Duration::from_secs(5), socket.next())
            .await
            .expect("close frame")
        {
            Some(Ok(Message::Close(Some(frame)))) => {
                assert_eq!(u16::from(frame.code), 1001);
                break;
            }
            Some(Ok(_)) => continue,
            other => panic!("expected close frame, got {other:?}"),
        }
    }
}
