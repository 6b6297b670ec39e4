use std::sync::Arc;

use parking_lot::RwLock;
use tracing::level_filters::LevelFilter;

use nmos_domain::Settings;
use nmos_events::SubscriptionStore;
use nmos_model::ResourceStore;

use crate::activation::ConnectionStore;
use crate::api::events::EventsApiModel;
use crate::validate::{BasicValidator, PayloadValidator};

/// Applies a new severity floor to the live tracing subscriber. Wired to
/// a `reload` layer in `main`; a no-op in tests.
#[derive(Clone)]
pub struct LogLevel(Arc<dyn Fn(LevelFilter) + Send + Sync>);

impl LogLevel {
    pub fn new(apply: impl Fn(LevelFilter) + Send + Sync + 'static) -> Self {
        LogLevel(Arc::new(apply))
    }

    pub fn noop() -> Self {
        LogLevel(Arc::new(|_| {}))
    }

    pub fn set(&self, level: LevelFilter) {
        (self.0)(level)
    }
}

/// Shared application state passed to all API handlers.
#[derive(Clone)]
pub struct AppState {
    pub settings: Arc<RwLock<Settings>>,
    pub store: Arc<ResourceStore>,
    pub subscriptions: Arc<SubscriptionStore>,
    pub connections: Arc<ConnectionStore>,
    pub events: Arc<EventsApiModel>,
    pub validator: Arc<dyn PayloadValidator>,
    pub log_level: LogLevel,
}

impl AppState {
    pub fn new(settings: Settings) -> Self {
        AppState {
            settings: Arc::new(RwLock::new(settings)),
            store: Arc::new(ResourceStore::new()),
            subscriptions: Arc::new(SubscriptionStore::new()),
            connections: Arc::new(ConnectionStore::new()),
            events: Arc::new(EventsApiModel::new()),
            validator: Arc::new(BasicValidator),
            log_level: LogLevel::noop(),
        }
    }
}
