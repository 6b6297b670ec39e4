//! Connection API: staged/active parameter sets per sender and receiver.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::get;
use axum::{Json, Router};
use serde_json::{json, Value};

use nmos_domain::{ApiVersion, Error, Id};

use crate::activation::{PatchOutcome, Role};
use crate::api::sub_routes;
use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/x-nmos/connection/", get(versions))
        .route("/x-nmos/connection/:version/", get(index))
        .route("/x-nmos/connection/:version/single/", get(single))
        .route("/x-nmos/connection/:version/single/:role/", get(list))
        .route("/x-nmos/connection/:version/single/:role/:id/", get(resource_index))
        .route(
            "/x-nmos/connection/:version/single/:role/:id/constraints",
            get(constraints),
        )
        .route(
            "/x-nmos/connection/:version/single/:role/:id/staged",
            get(staged).patch(patch_staged),
        )
        .route(
            "/x-nmos/connection/:version/single/:role/:id/active",
            get(active),
        )
}

fn check_version(version: &str) -> ApiResult<ApiVersion> {
    let parsed =
        ApiVersion::parse(version).map_err(|_| Error::NotFound(version.to_string()))?;
    if nmos_domain::api_version::is05_versions().contains(&parsed) {
        Ok(parsed)
    } else {
        Err(ApiError(Error::NotFound(version.to_string())))
    }
}

fn parse_role(role: &str) -> ApiResult<Role> {
    match role {
        "senders" => Ok(Role::Sender),
        "receivers" => Ok(Role::Receiver),
        other => Err(ApiError(Error::NotFound(other.to_string()))),
    }
}

async fn versions() -> Json<Value> {
    sub_routes(&["v1.0/", "v1.1/"])
}

async fn index(Path(version): Path<String>) -> ApiResult<Json<Value>> {
    check_version(&version)?;
    Ok(sub_routes(&["bulk/", "single/"]))
}

async fn single(Path(version): Path<String>) -> ApiResult<Json<Value>> {
    check_version(&version)?;
    Ok(sub_routes(&["receivers/", "senders/"]))
}

async fn list(
    State(state): State<AppState>,
    Path((version, role)): Path<(String, String)>,
) -> ApiResult<Json<Value>> {
    check_version(&version)?;
    let role = parse_role(&role)?;
    let ids: Vec<String> = state
        .connections
        .list(role)
        .into_iter()
        .map(|id| format!("{id}/"))
        .collect();
    Ok(Json(json!(ids)))
}

async fn resource_index(
    State(state): State<AppState>,
    Path((version, role, id)): Path<(String, String, String)>,
) -> ApiResult<Json<Value>> {
    check_version(&version)?;
    let role = parse_role(&role)?;
    state
        .connections
        .staged(role, &Id::from(id.as_str()))
        .ok_or_else(|| Error::NotFound(id))?;
    Ok(sub_routes(&["active/", "constraints/", "staged/"]))
}

async fn constraints(
    State(state): State<AppState>,
    Path((version, role, id)): Path<(String, String, String)>,
) -> ApiResult<Json<Value>> {
    check_version(&version)?;
    let role = parse_role(&role)?;
    state
        .connections
        .staged(role, &Id::from(id.as_str()))
        .ok_or_else(|| Error::NotFound(id))?;
    // One (unconstrained) entry per transport leg.
    Ok(Json(json!([{}])))
}

async fn staged(
    State(state): State<AppState>,
    Path((version, role, id)): Path<(String, String, String)>,
) -> ApiResult<Json<Value>> {
    check_version(&version)?;
    let role = parse_role(&role)?;
    let staged = state
        .connections
        .staged(role, &Id::from(id.as_str()))
        .ok_or_else(|| Error::NotFound(id))?;
    Ok(Json(staged))
}

async fn active(
    State(state): State<AppState>,
    Path((version, role, id)): Path<(String, String, String)>,
) -> ApiResult<Json<Value>> {
    check_version(&version)?;
    let role = parse_role(&role)?;
    let active = state
        .connections
        .active(role, &Id::from(id.as_str()))
        .ok_or_else(|| Error::NotFound(id))?;
    Ok(Json(active))
}

async fn patch_staged(
    State(state): State<AppState>,
    Path((version, role, id)): Path<(String, String, String)>,
    Json(body): Json<Value>,
) -> ApiResult<(StatusCode, Json<Value>)> {
    check_version(&version)?;
    let role = parse_role(&role)?;
    let outcome = state
        .connections
        .patch_staged(role, &Id::from(id.as_str()), &body)?;
    Ok(match outcome {
        PatchOutcome::Staged(v) | PatchOutcome::Activated(v) => (StatusCode::OK, Json(v)),
        PatchOutcome::Scheduled(v) => (StatusCode::ACCEPTED, Json(v)),
    })
}
