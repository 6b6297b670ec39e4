//! Connection API tests: staging, immediate activation, scheduling, and
//! the settings PATCH whitelist on the same port router.

use axum::body::Body;
use axum::http::{header, Method, Request, StatusCode};
use tower::ServiceExt;

use nmos_domain::Settings;
use nmos_gateway::{api, bootstrap, AppState};

fn app_state() -> AppState {
    // Everything on one port, as `http_port` implies.
    let mut settings: Settings =
        serde_json::from_str(r#"{"http_port": 3210, "host_address": "10.0.0.1"}"#).unwrap();
    settings.apply_defaults();
    AppState::new(settings)
}

fn router(state: &AppState) -> axum::Router {
    api::port_routers(state)
        .remove(&3210)
        .expect("shared port router")
        .with_state(state.clone())
}

async fn send(
    router: &axum::Router,
    method: Method,
    uri: &str,
    body: Option<serde_json::Value>,
) -> (StatusCode, serde_json::Value) {
    let mut builder = Request::builder().method(method).uri(uri);
    let body = match body {
        Some(v) => {
            builder = builder.header(header::CONTENT_TYPE, "application/json");
            Body::from(v.to_string())
        }
        None => Body::empty(),
    };
    let response = router
        .clone()
        .oneshot(builder.body(body).unwrap())
        .await
        .unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let json = if bytes.is_empty() {
        serde_json::Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, json)
}

#[tokio::test]
async fn immediate_activation_shows_up_in_active() {
    let state = app_state();
    let seeded = bootstrap::seed(&state).unwrap();
    let router = router(&state);
    let staged_uri = format!(
        "/x-nmos/connection/v1.0/single/senders/{}/staged",
        seeded.sender
    );

    let (status, body) = send(
        &router,
        Method::PATCH,
        &staged_uri,
        Some(serde_json::json!({
            "activation": { "mode": "activate_immediate" },
            "master_enable": true
        })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["activation"]["mode"], "activate_immediate");

    let active_uri = format!(
        "/x-nmos/connection/v1.0/single/senders/{}/active",
        seeded.sender
    );
    let (status, body) = send(&router, Method::GET, &active_uri, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["master_enable"], true);
}

#[tokio::test]
async fn staged_patch_without_activation_leaves_active_untouched() {
    let state = app_state();
    let seeded = bootstrap::seed(&state).unwrap();
    let router = router(&state);
    let staged_uri = format!(
        "/x-nmos/connection/v1.0/single/senders/{}/staged",
        seeded.sender
    );

    let (status, body) = send(
        &router,
        Method::PATCH,
        &staged_uri,
        Some(serde_json::json!({"master_enable": true})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["master_enable"], true);

    let active_uri = format!(
        "/x-nmos/connection/v1.0/single/senders/{}/active",
        seeded.sender
    );
    let (_, body) = send(&router, Method::GET, &active_uri, None).await;
    assert_eq!(body["master_enable"], false);
}

#[tokio::test]
async fn scheduled_activation_returns_202_and_applies_later() {
    let state = app_state();
    let seeded = bootstrap::seed(&state).unwrap();
    let router = router(&state);
    let staged_uri = format!(
        "/x-nmos/connection/v1.0/single/receivers/{}/staged",
        seeded.receiver
    );

    let (status, body) = send(
        &router,
        Method::PATCH,
        &staged_uri,
        Some(serde_json::json!({
            "activation": {
                "mode": "activate_scheduled_relative",
                "requested_time": "0:100000000"
            },
            "master_enable": true
        })),
    )
    .await;
    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(body["activation"]["mode"], "activate_scheduled_relative");

    // Run the timer long enough for the 100ms schedule to commit.
    let connections = state.connections.clone();
    let cancel = tokio_util::sync::CancellationToken::new();
    let timer = {
        let cancel = cancel.clone();
        tokio::spawn(async move { connections.run(cancel).await })
    };
    tokio::time::sleep(std::time::Duration::from_millis(400)).await;
    cancel.cancel();
    timer.await.unwrap();

    let active_uri = format!(
        "/x-nmos/connection/v1.0/single/receivers/{}/active",
        seeded.receiver
    );
    let (_, body) = send(&router, Method::GET, &active_uri, None).await;
    assert_eq!(body["master_enable"], true);
    assert!(body["activation"]["activation_time"].is_string());
}

#[tokio::test]
async fn bad_mode_is_400_and_unknown_sender_is_404() {
    let state = app_state();
    let seeded = bootstrap::seed(&state).unwrap();
    let router = router(&state);

    let staged_uri = format!(
        "/x-nmos/connection/v1.0/single/senders/{}/staged",
        seeded.sender
    );
    let (status, _) = send(
        &router,
        Method::PATCH,
        &staged_uri,
        Some(serde_json::json!({"activation": {"mode": "warp"}})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = send(
        &router,
        Method::PATCH,
        "/x-nmos/connection/v1.0/single/senders/ghost/staged",
        Some(serde_json::json!({})),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn sender_listing_contains_the_seeded_sender() {
    let state = app_state();
    let seeded = bootstrap::seed(&state).unwrap();
    let router = router(&state);

    let (status, body) =
        send(&router, Method::GET, "/x-nmos/connection/v1.0/single/senders/", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, serde_json::json!([format!("{}/", seeded.sender)]));
}

#[tokio::test]
async fn settings_patch_whitelist_is_enforced() {
    let state = app_state();
    bootstrap::seed(&state).unwrap();
    let router = router(&state);

    let (status, body) = send(
        &router,
        Method::PATCH,
        "/settings/all",
        Some(serde_json::json!({"logging_level": -40})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["logging_level"], -40);
    assert_eq!(state.settings.read().logging_level, -40);

    // Non-whitelisted field: rejected, nothing changed.
    let (status, _) = send(
        &router,
        Method::PATCH,
        "/settings/all",
        Some(serde_json::json!({"http_port": 9999})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(state.settings.read().node_port(), 3210);
}
