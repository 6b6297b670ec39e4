//! Node advertisement: publish `_nmos-node._tcp` with the per-type
//! change counters, refreshing the TXT records whenever the store moves.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use nmos_discovery::advertise::{register_service, update_service, ServiceAdvertise};
use nmos_discovery::txt::{make_ver_records, ApiResourceVers};
use nmos_discovery::ServiceType;
use nmos_domain::Settings;
use nmos_model::{ApiResourceVersions, ResourceStore};

fn ver_records(counters: ApiResourceVersions) -> ApiResourceVers {
    ApiResourceVers {
        self_: counters.self_,
        devices: counters.devices,
        sources: counters.sources,
        flows: counters.flows,
        senders: counters.senders,
        receivers: counters.receivers,
    }
}

/// Register the node service, then keep its `ver_*` records current.
pub async fn run(
    advertiser: Arc<dyn ServiceAdvertise>,
    store: Arc<ResourceStore>,
    settings: Arc<RwLock<Settings>>,
    cancel: CancellationToken,
) {
    {
        let settings = settings.read().clone();
        let txt = make_ver_records(ver_records(store.api_resource_versions()));
        if let Err(err) = register_service(advertiser.as_ref(), ServiceType::Node, &settings, &txt)
        {
            tracing::warn!(%err, "node advertisement failed");
        } else {
            tracing::info!("node service advertised");
        }
    }

    let mut last_seen = store.most_recent_update();
    loop {
        let changed = tokio::select! {
            _ = cancel.cancelled() => break,
            changed = store.wait_for_change(last_seen, Instant::now() + Duration::from_secs(60)) => changed,
        };
        if !changed {
            continue;
        }
        last_seen = store.most_recent_update();
        let settings = settings.read().clone();
        let txt = make_ver_records(ver_records(store.api_resource_versions()));
        if let Err(err) = update_service(advertiser.as_ref(), ServiceType::Node, &settings, &txt) {
            tracing::debug!(%err, "ver record refresh failed");
        }
    }
}
