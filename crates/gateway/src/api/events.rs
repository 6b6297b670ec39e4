//! Events API: REST access to each event source's type and current state.

use std::collections::HashMap;

use axum::extract::{Path, State};
use axum::routing::get;
use axum::{Json, Router};
use parking_lot::RwLock;
use serde_json::{json, Value};

use nmos_domain::{ApiVersion, Error, EventType, Id};

use crate::api::sub_routes;
use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

/// Per-source event type and latest state, maintained by the producer.
pub struct EventsApiModel {
    sources: RwLock<HashMap<Id, EventEntry>>,
}

struct EventEntry {
    event_type: EventType,
    state: Value,
}

impl Default for EventsApiModel {
    fn default() -> Self {
        Self::new()
    }
}

impl EventsApiModel {
    pub fn new() -> Self {
        EventsApiModel {
            sources: RwLock::new(HashMap::new()),
        }
    }

    /// Register a source with its initial state.
    pub fn insert(&self, source_id: Id, event_type: EventType, state: Value) {
        self.sources
            .write()
            .insert(source_id, EventEntry { event_type, state });
    }

    pub fn set_state(&self, source_id: &Id, state: Value) {
        if let Some(entry) = self.sources.write().get_mut(source_id) {
            entry.state = state;
        }
    }

    pub fn event_type(&self, source_id: &Id) -> Option<EventType> {
        self.sources
            .read()
            .get(source_id)
            .map(|e| e.event_type.clone())
    }

    pub fn state(&self, source_id: &Id) -> Option<Value> {
        self.sources.read().get(source_id).map(|e| e.state.clone())
    }

    pub fn source_ids(&self) -> Vec<Id> {
        let mut ids: Vec<Id> = self.sources.read().keys().cloned().collect();
        ids.sort();
        ids
    }
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/x-nmos/events/", get(versions))
        .route("/x-nmos/events/:version/", get(index))
        .route("/x-nmos/events/:version/sources/", get(sources))
        .route("/x-nmos/events/:version/sources/:id/", get(source_index))
        .route("/x-nmos/events/:version/sources/:id/type", get(type_))
        .route("/x-nmos/events/:version/sources/:id/state", get(state_))
}

fn check_version(version: &str) -> ApiResult<ApiVersion> {
    match ApiVersion::parse(version) {
        Ok(v) if v == nmos_domain::api_version::V1_0 => Ok(v),
        _ => Err(ApiError(Error::NotFound(version.to_string()))),
    }
}

async fn versions() -> Json<Value> {
    sub_routes(&["v1.0/"])
}

async fn index(Path(version): Path<String>) -> ApiResult<Json<Value>> {
    check_version(&version)?;
    Ok(sub_routes(&["sources/"]))
}

async fn sources(
    State(state): State<AppState>,
    Path(version): Path<String>,
) -> ApiResult<Json<Value>> {
    check_version(&version)?;
    let ids: Vec<String> = state
        .events
        .source_ids()
        .into_iter()
        .map(|id| format!("{id}/"))
        .collect();
    Ok(Json(json!(ids)))
}

async fn source_index(
    State(state): State<AppState>,
    Path((version, id)): Path<(String, String)>,
) -> ApiResult<Json<Value>> {
    check_version(&version)?;
    state
        .events
        .event_type(&Id::from(id.as_str()))
        .ok_or_else(|| Error::NotFound(id))?;
    Ok(sub_routes(&["state/", "type/"]))
}

async fn type_(
    State(state): State<AppState>,
    Path((version, id)): Path<(String, String)>,
) -> ApiResult<Json<Value>> {
    check_version(&version)?;
    let event_type = state
        .events
        .event_type(&Id::from(id.as_str()))
        .ok_or_else(|| Error::NotFound(id))?;
    Ok(Json(json!({ "name": event_type.as_str() })))
}

async fn state_(
    State(state): State<AppState>,
    Path((version, id)): Path<(String, String)>,
) -> ApiResult<Json<Value>> {
    check_version(&version)?;
    let current = state
        .events
        .state(&Id::from(id.as_str()))
        .ok_or_else(|| Error::NotFound(id))?;
    Ok(Json(current))
}
