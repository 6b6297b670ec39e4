//! Node API: read-only projections of the resource store.

use axum::extract::{Path, State};
use axum::routing::get;
use axum::{Json, Router};
use serde_json::Value;

use nmos_domain::{ApiVersion, Error, Id};
use nmos_model::ResourceType;

use crate::api::sub_routes;
use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/x-nmos/node/", get(versions))
        .route("/x-nmos/node/:version/", get(index))
        .route("/x-nmos/node/:version/self", get(self_))
        .route("/x-nmos/node/:version/:kind", get(list))
        .route("/x-nmos/node/:version/:kind/:id", get(one))
}

fn check_version(version: &str) -> ApiResult<ApiVersion> {
    let parsed =
        ApiVersion::parse(version).map_err(|_| Error::NotFound(version.to_string()))?;
    if nmos_domain::api_version::is04_versions().contains(&parsed) {
        Ok(parsed)
    } else {
        Err(ApiError(Error::NotFound(version.to_string())))
    }
}

async fn versions() -> Json<Value> {
    sub_routes(&["v1.0/", "v1.1/", "v1.2/", "v1.3/"])
}

async fn index(Path(version): Path<String>) -> ApiResult<Json<Value>> {
    check_version(&version)?;
    Ok(sub_routes(&[
        "devices/",
        "flows/",
        "receivers/",
        "self/",
        "senders/",
        "sources/",
    ]))
}

async fn self_(
    State(state): State<AppState>,
    Path(version): Path<String>,
) -> ApiResult<Json<Value>> {
    check_version(&version)?;
    let node = state
        .store
        .snapshot(|r| r.kind == ResourceType::Node)
        .into_iter()
        .next()
        .ok_or_else(|| Error::NotFound("self".into()))?;
    Ok(Json(node.data))
}

fn list_kind(kind: &str) -> ApiResult<ResourceType> {
    match kind {
        "devices" => Ok(ResourceType::Device),
        "sources" => Ok(ResourceType::Source),
        "flows" => Ok(ResourceType::Flow),
        "senders" => Ok(ResourceType::Sender),
        "receivers" => Ok(ResourceType::Receiver),
        other => Err(ApiError(Error::NotFound(other.to_string()))),
    }
}

async fn list(
    State(state): State<AppState>,
    Path((version, kind)): Path<(String, String)>,
) -> ApiResult<Json<Value>> {
    check_version(&version)?;
    let kind = list_kind(&kind)?;
    let items: Vec<Value> = state
        .store
        .snapshot(|r| r.kind == kind)
        .into_iter()
        .map(|r| r.data)
        .collect();
    Ok(Json(Value::Array(items)))
}

async fn one(
    State(state): State<AppState>,
    Path((version, kind, id)): Path<(String, String, String)>,
) -> ApiResult<Json<Value>> {
    check_version(&version)?;
    let kind = list_kind(&kind)?;
    let id = Id::from(id);
    let resource = state
        .store
        .get(&id)
        .filter(|r| r.kind == kind)
        .ok_or_else(|| Error::NotFound(id.to_string()))?;
    Ok(Json(resource.data))
}
