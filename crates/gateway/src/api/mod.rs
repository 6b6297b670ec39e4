pub mod connection;
pub mod events;
pub mod node;
pub mod settings;

use std::collections::HashMap;

use axum::routing::get;
use axum::{Json, Router};
use serde_json::{json, Value};

use crate::state::AppState;

/// Directory body listing sub-routes, as every NMOS API root does.
pub fn sub_routes(routes: &[&str]) -> Json<Value> {
    Json(json!(routes))
}

async fn root() -> Json<Value> {
    sub_routes(&["x-nmos/"])
}

async fn x_nmos() -> Json<Value> {
    sub_routes(&["connection/", "events/", "node/"])
}

/// The common directory routes mounted on every HTTP port.
fn directory_router() -> Router<AppState> {
    Router::new()
        .route("/", get(root))
        .route("/x-nmos/", get(x_nmos))
}

/// Build one router per distinct listener port. APIs configured onto the
/// same port share a router.
pub fn port_routers(state: &AppState) -> HashMap<u16, Router<AppState>> {
    let settings = state.settings.read();
    let mut routers: HashMap<u16, Router<AppState>> = HashMap::new();

    let mut mount = |port: u16, api: Router<AppState>| {
        let entry = routers.entry(port).or_insert_with(directory_router);
        *entry = entry.clone().merge(api);
    };

    mount(settings.node_port(), node::router());
    mount(settings.connection_port(), connection::router());
    mount(settings.events_port(), events::router());
    mount(settings.settings_port(), settings::router());
    routers
}
