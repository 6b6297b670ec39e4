use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tokio::net::{TcpListener, TcpSocket};
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing_subscriber::filter::Targets;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::Layer;

use nmos_discovery::{MdnsAdvertiser, MdnsBrowser};
use nmos_domain::Settings;
use nmos_gateway::state::LogLevel;
use nmos_gateway::{advertiser, api, bootstrap, locator, sweeper, ws, AppState};
use nmos_registration::{NodeBehaviour, RegistryLocator, StaticLocator};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // ── Settings ─────────────────────────────────────────────────────
    // A single argument: inline JSON, or a path to a JSON file. Bad
    // settings are fatal before anything is spawned.
    let mut settings = match std::env::args().nth(1) {
        Some(arg) => match Settings::load(&arg) {
            Ok(s) => s,
            Err(err) => {
                eprintln!("bad settings: {err}");
                std::process::exit(-1);
            }
        },
        None => Settings::default(),
    };
    settings.apply_defaults();

    // ── Tracing ──────────────────────────────────────────────────────
    // The severity floor sits behind a reload layer so
    // `PATCH /settings/all` can change it at runtime.
    let (level, level_handle) = tracing_subscriber::reload::Layer::new(settings.tracing_level());

    let error_layer = if settings.error_log.is_empty() {
        tracing_subscriber::fmt::layer()
            .with_writer(std::io::stderr)
            .with_filter(level)
            .boxed()
    } else {
        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&settings.error_log)
            .with_context(|| format!("opening error log {}", settings.error_log))?;
        tracing_subscriber::fmt::layer()
            .json()
            .with_writer(Arc::new(file))
            .with_filter(level)
            .boxed()
    };

    // HTTP access events (from the tower-http trace layer) go to their
    // own file when configured, and are discarded otherwise.
    let access_layer = if settings.access_log.is_empty() {
        None
    } else {
        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&settings.access_log)
            .with_context(|| format!("opening access log {}", settings.access_log))?;
        Some(
            tracing_subscriber::fmt::layer()
                .json()
                .with_writer(Arc::new(file))
                .with_filter(Targets::new().with_target("tower_http", tracing::Level::DEBUG)),
        )
    };

    tracing_subscriber::registry()
        .with(error_layer)
        .with(access_layer)
        .init();

    tracing::info!(
        pid = std::process::id(),
        node_api = %format!("{}:{}", settings.host_address, settings.node_port()),
        "starting nmos-node"
    );

    // ── State and seed resources ─────────────────────────────────────
    let listen_backlog = settings.listen_backlog;
    let host_address = settings.host_address.clone();
    let registry_base = settings.registry_base();

    let mut state = AppState::new(settings);
    state.log_level = LogLevel::new(move |l| {
        let _ = level_handle.modify(|f| *f = l);
    });

    let seeded = bootstrap::seed(&state).context("seeding node resources")?;

    let root = CancellationToken::new();
    let mut tasks: Vec<tokio::task::JoinHandle<()>> = Vec::new();

    // ── Listeners, one per distinct port ─────────────────────────────
    // The events WebSocket shares a port router when `events_ws_port`
    // lands on an HTTP API port (as it does whenever only `http_port`
    // is configured).
    let mut routers = api::port_routers(&state);
    let ws_port = state.settings.read().events_ws_port();
    let ws_router = ws::router(root.clone());
    match routers.entry(ws_port) {
        std::collections::hash_map::Entry::Occupied(mut entry) => {
            let merged = entry.get().clone().merge(ws_router);
            entry.insert(merged);
        }
        std::collections::hash_map::Entry::Vacant(entry) => {
            entry.insert(ws_router);
        }
    }
    tracing::info!(port = ws_port, "events websocket mounted");

    for (port, router) in routers {
        let app = router
            .layer(TraceLayer::new_for_http())
            .layer(CorsLayer::permissive())
            .with_state(state.clone());
        let listener = bind(port, listen_backlog)
            .await
            .with_context(|| format!("binding port {port}"))?;
        tracing::info!(port, "listener ready");
        let cancel = root.clone();
        tasks.push(tokio::spawn(async move {
            if let Err(err) = axum::serve(listener, app)
                .with_graceful_shutdown(cancel.cancelled_owned())
                .await
            {
                tracing::error!(%err, port, "listener failed");
            }
        }));
    }

    // ── Background tasks ─────────────────────────────────────────────
    {
        let connections = state.connections.clone();
        let cancel = root.clone();
        tasks.push(tokio::spawn(async move { connections.run(cancel).await }));
    }
    tasks.push(tokio::spawn(sweeper::run(
        state.store.clone(),
        state.settings.clone(),
        root.clone(),
    )));
    tasks.push(tokio::spawn(bootstrap::run_temperature(
        state.clone(),
        seeded.temperature_source.clone(),
        root.clone(),
    )));

    // ── DNS-SD advertisement ─────────────────────────────────────────
    match MdnsAdvertiser::new(&host_address) {
        Ok(adv) => {
            tasks.push(tokio::spawn(advertiser::run(
                Arc::new(adv),
                state.store.clone(),
                state.settings.clone(),
                root.clone(),
            )));
        }
        Err(err) => tracing::warn!(%err, "mdns advertiser unavailable"),
    }

    // ── Registered operation ─────────────────────────────────────────
    let registry_locator: Arc<dyn RegistryLocator> = match registry_base {
        Some(base) => {
            tracing::info!(registry = %base, "using configured registry");
            Arc::new(StaticLocator(vec![base]))
        }
        None => match MdnsBrowser::new() {
            Ok(browser) => Arc::new(locator::DiscoveryLocator::new(
                Arc::new(browser),
                state.settings.clone(),
            )),
            Err(err) => {
                tracing::warn!(%err, "mdns browser unavailable, peer-to-peer only");
                Arc::new(StaticLocator(Vec::new()))
            }
        },
    };
    let behaviour = Arc::new(NodeBehaviour::new(
        state.store.clone(),
        state.settings.clone(),
        registry_locator,
    ));
    {
        let behaviour = behaviour.clone();
        let cancel = root.clone();
        tasks.push(tokio::spawn(async move { behaviour.run(cancel).await }));
    }

    tracing::info!("ready for connections");

    // ── Signals ──────────────────────────────────────────────────────
    wait_for_termination().await?;
    tracing::info!("closing connections");

    // Cancel everything, then use the grace window to say goodbye to the
    // registry before freezing the store.
    root.cancel();
    behaviour.unregister(Duration::from_secs(5)).await;
    state.store.freeze();
    for task in tasks {
        if tokio::time::timeout(Duration::from_secs(5), task).await.is_err() {
            tracing::warn!("task did not stop within the grace period");
        }
    }

    tracing::info!("stopped");
    Ok(())
}

/// Bind a wildcard listener, honouring the configured accept backlog.
async fn bind(port: u16, backlog: u32) -> anyhow::Result<TcpListener> {
    let addr: std::net::SocketAddr = format!("0.0.0.0:{port}").parse()?;
    if backlog == 0 {
        return Ok(TcpListener::bind(addr).await?);
    }
    let socket = TcpSocket::new_v4()?;
    socket.set_reuseaddr(true)?;
    socket.bind(addr)?;
    Ok(socket.listen(backlog)?)
}

/// SIGTERM or SIGINT ends the process; SIGHUP is drained and ignored.
#[cfg(unix)]
async fn wait_for_termination() -> anyhow::Result<()> {
    use tokio::signal::unix::{signal, SignalKind};
    let mut sigterm = signal(SignalKind::terminate()).context("installing SIGTERM handler")?;
    let mut sigint = signal(SignalKind::interrupt()).context("installing SIGINT handler")?;
    let mut sighup = signal(SignalKind::hangup()).context("installing SIGHUP handler")?;
    tokio::spawn(async move {
        loop {
            if sighup.recv().await.is_none() {
                break;
            }
            tracing::debug!("SIGHUP ignored");
        }
    });
    tokio::select! {
        _ = sigterm.recv() => tracing::info!("SIGTERM received"),
        _ = sigint.recv() => tracing::info!("SIGINT received"),
    }
    Ok(())
}

#[cfg(not(unix))]
async fn wait_for_termination() -> anyhow::Result<()> {
    tokio::signal::ctrl_c().await?;
    Ok(())
}
