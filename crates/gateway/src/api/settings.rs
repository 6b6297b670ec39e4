//! Settings API: read the full settings object, hot-patch the
//! whitelisted subset.

use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};
use serde_json::Value;

use crate::error::ApiResult;
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new().route("/settings/all", get(all).patch(patch))
}

async fn all(State(state): State<AppState>) -> ApiResult<Json<Value>> {
    let settings = state.settings.read().clone();
    Ok(Json(serde_json::to_value(&settings).map_err(nmos_domain::Error::from)?))
}

async fn patch(
    State(state): State<AppState>,
    Json(body): Json<Value>,
) -> ApiResult<Json<Value>> {
    let changed = {
        let mut settings = state.settings.write();
        settings.patch(&body)?
    };
    if changed.iter().any(|f| f == "logging_level") {
        let level = state.settings.read().tracing_level();
        state.log_level.set(level);
        tracing::info!(%level, "logging level changed");
    }
    let settings = state.settings.read().clone();
    Ok(Json(serde_json::to_value(&settings).map_err(nmos_domain::Error::from)?))
}
