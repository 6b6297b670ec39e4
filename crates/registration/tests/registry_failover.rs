//! Integration tests: boot in-process registry stubs, run the real
//! behaviour loop against them, and assert the registered-operation
//! protocol: dependency-ordered registration, heartbeats, failover after
//! consecutive failures, re-registration after a 404, and unregistration
//! on shutdown.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::{delete, post};
use axum::{Json, Router};
use parking_lot::{Mutex, RwLock};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use nmos_domain::{Id, Settings};
use nmos_model::builders;
use nmos_model::ResourceStore;
use nmos_registration::{DiscoveryBackoff, NodeBehaviour, StaticLocator};

// ── Registry stub ───────────────────────────────────────────────────

#[derive(Default)]
struct Stub {
    /// `(type, id)` of every accepted resource POST.
    posts: Mutex<Vec<(String, String)>>,
    deletes: Mutex<Vec<String>>,
    heartbeats: Mutex<Vec<String>>,
    /// When set, every request returns 500.
    broken: AtomicBool,
    /// When set, heartbeats return 404 once, then clear.
    amnesia: AtomicBool,
}

async fn post_resource(
    State(stub): State<Arc<Stub>>,
    Json(body): Json<serde_json::Value>,
) -> StatusCode {
    if stub.broken.load(Ordering::SeqCst) {
        return StatusCode::INTERNAL_SERVER_ERROR;
    }
    let kind = body["type"].as_str().unwrap_or_default().to_string();
    let id = body["data"]["id"].as_str().unwrap_or_default().to_string();
    stub.posts.lock().push((kind, id));
    StatusCode::CREATED
}

async fn health(State(stub): State<Arc<Stub>>, Path(id): Path<String>) -> StatusCode {
    if stub.broken.load(Ordering::SeqCst) {
        return StatusCode::INTERNAL_SERVER_ERROR;
    }
    if stub.amnesia.swap(false, Ordering::SeqCst) {
        return StatusCode::NOT_FOUND;
    }
    stub.heartbeats.lock().push(id);
    StatusCode::OK
}

async fn delete_resource(
    State(stub): State<Arc<Stub>>,
    Path((_kind, id)): Path<(String, String)>,
) -> StatusCode {
    stub.deletes.lock().push(id);
    StatusCode::NO_CONTENT
}

async fn spawn_registry() -> (String, Arc<Stub>) {
    let stub = Arc::new(Stub::default());
    let app = Router::new()
        .route("/x-nmos/registration/v1.3/resource", post(post_resource))
        .route("/x-nmos/registration/v1.3/health/nodes/:id", post(health))
        .route(
            "/x-nmos/registration/v1.3/resource/:kind/:id",
            delete(delete_resource),
        )
        .with_state(stub.clone());

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (format!("http://{addr}/x-nmos/registration/v1.3"), stub)
}

// ── Fixtures ────────────────────────────────────────────────────────

fn seeded_store() -> Arc<ResourceStore> {
    let mut settings: Settings =
        serde_json::from_str(r#"{"http_port": 3210, "host_address": "127.0.0.1"}"#).unwrap();
    settings.apply_defaults();

    let store = Arc::new(ResourceStore::new());
    let node = Id::from("node-1");
    let device = Id::from("device-1");
    let source = Id::from("source-1");
    let flow = Id::from("flow-1");
    let sender = Id::from("sender-1");

    store.insert(builders::make_node(&node, &settings)).unwrap();
    store
        .insert(builders::make_device(&device, &node, &[sender.clone()], &[], &settings))
        .unwrap();
    store
        .insert(builders::make_video_source(&source, &device, &settings))
        .unwrap();
    store
        .insert(builders::make_video_flow(&flow, &source, &device, &settings))
        .unwrap();
    store
        .insert(builders::make_sender(
            &sender,
            &flow,
            &device,
            &["eth0".into()],
            &settings,
        ))
        .unwrap();
    store
}

fn fast_settings() -> Arc<RwLock<Settings>> {
    let mut s: Settings =
        serde_json::from_str(r#"{"registration_heartbeat_interval": 1}"#).unwrap();
    s.apply_defaults();
    Arc::new(RwLock::new(s))
}

fn fast_backoff() -> DiscoveryBackoff {
    DiscoveryBackoff {
        initial_delay: Duration::from_millis(20),
        max_delay: Duration::from_millis(50),
        backoff_factor: 2.0,
        jitter: 0.1,
    }
}

async fn wait_until(what: &str, mut check: impl FnMut() -> bool) {
    for _ in 0..400 {
        if check() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
    panic!("timed out waiting for: {what}");
}

// ── Tests ───────────────────────────────────────────────────────────

#[tokio::test]
async fn registers_in_dependency_order_then_heartbeats() {
    let (base, stub) = spawn_registry().await;
    let store = seeded_store();
    let behaviour = Arc::new(NodeBehaviour::new(
        store,
        fast_settings(),
        Arc::new(StaticLocator(vec![base])),
    ));

    let cancel = CancellationToken::new();
    let task = {
        let behaviour = behaviour.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move { behaviour.run(cancel).await })
    };

    wait_until("all resources registered", || stub.posts.lock().len() >= 5).await;
    let kinds: Vec<String> = stub.posts.lock().iter().map(|(k, _)| k.clone()).collect();
    assert_eq!(kinds, vec!["node", "device", "source", "flow", "sender"]);

    wait_until("first heartbeat", || !stub.heartbeats.lock().is_empty()).await;
    assert_eq!(stub.heartbeats.lock()[0], "node-1");

    cancel.cancel();
    task.await.unwrap();
}

#[tokio::test]
async fn fails_over_to_second_registry_without_duplicates() {
    let (base_a, stub_a) = spawn_registry().await;
    let (base_b, stub_b) = spawn_registry().await;
    let store = seeded_store();
    let behaviour = Arc::new(
        NodeBehaviour::new(
            store,
            fast_settings(),
            Arc::new(StaticLocator(vec![base_a, base_b])),
        )
        .with_failover(3, Duration::from_secs(60))
        .with_backoff(fast_backoff()),
    );

    let cancel = CancellationToken::new();
    let task = {
        let behaviour = behaviour.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move { behaviour.run(cancel).await })
    };

    // A is preferred (head of the ranked list) and serves us first.
    wait_until("registered with A", || stub_a.posts.lock().len() >= 5).await;
    assert!(stub_b.posts.lock().is_empty());

    // A starts failing consistently; the client must fail over to B and
    // register everything there exactly once.
    stub_a.broken.store(true, Ordering::SeqCst);
    wait_until("registered with B", || stub_b.posts.lock().len() >= 5).await;

    let mut counts: HashMap<String, usize> = HashMap::new();
    for (_, id) in stub_b.posts.lock().iter() {
        *counts.entry(id.clone()).or_default() += 1;
    }
    for (id, n) in counts {
        assert_eq!(n, 1, "{id} registered {n} times with B");
    }

    cancel.cancel();
    task.await.unwrap();
}

#[tokio::test]
async fn heartbeat_404_causes_reregistration() {
    let (base, stub) = spawn_registry().await;
    let store = seeded_store();
    let behaviour = Arc::new(
        NodeBehaviour::new(
            store,
            fast_settings(),
            Arc::new(StaticLocator(vec![base])),
        )
        .with_backoff(fast_backoff()),
    );

    let cancel = CancellationToken::new();
    let task = {
        let behaviour = behaviour.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move { behaviour.run(cancel).await })
    };

    wait_until("initial registration", || stub.posts.lock().len() >= 5).await;
    stub.amnesia.store(true, Ordering::SeqCst);
    // The node re-POSTs its full resource set after the 404.
    wait_until("re-registration", || stub.posts.lock().len() >= 10).await;

    cancel.cancel();
    task.await.unwrap();
}

#[tokio::test]
async fn store_mutations_sync_while_heartbeating() {
    let (base, stub) = spawn_registry().await;
    let store = seeded_store();
    let behaviour = Arc::new(NodeBehaviour::new(
        store.clone(),
        fast_settings(),
        Arc::new(StaticLocator(vec![base])),
    ));

    let cancel = CancellationToken::new();
    let task = {
        let behaviour = behaviour.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move { behaviour.run(cancel).await })
    };
    wait_until("initial registration", || stub.posts.lock().len() >= 5).await;

    // A new receiver appears: it must be POSTed.
    let mut settings: Settings =
        serde_json::from_str(r#"{"host_address": "127.0.0.1"}"#).unwrap();
    settings.apply_defaults();
    store
        .insert(builders::make_receiver(
            &Id::from("receiver-1"),
            &Id::from("device-1"),
            &["eth0".into()],
            &settings,
        ))
        .unwrap();
    wait_until("receiver synced", || {
        stub.posts
            .lock()
            .iter()
            .any(|(k, id)| k == "receiver" && id == "receiver-1")
    })
    .await;

    // It disappears again: it must be DELETEd.
    store.erase(&Id::from("receiver-1")).unwrap();
    wait_until("receiver deleted", || {
        stub.deletes.lock().iter().any(|id| id == "receiver-1")
    })
    .await;

    cancel.cancel();
    task.await.unwrap();
}

#[tokio::test]
async fn unregister_deletes_the_node() {
    let (base, stub) = spawn_registry().await;
    let store = seeded_store();
    let behaviour = Arc::new(NodeBehaviour::new(
        store,
        fast_settings(),
        Arc::new(StaticLocator(vec![base])),
    ));

    let cancel = CancellationToken::new();
    let task = {
        let behaviour = behaviour.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move { behaviour.run(cancel).await })
    };
    wait_until("initial registration", || stub.posts.lock().len() >= 5).await;

    cancel.cancel();
    task.await.unwrap();
    behaviour.unregister(Duration::from_secs(5)).await;

    assert_eq!(stub.deletes.lock().as_slice(), ["node-1"]);
}
