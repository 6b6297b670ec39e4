//! Expiry sweeper: periodic GC of resources whose health has lapsed.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use tokio_util::sync::CancellationToken;

use nmos_domain::Settings;
use nmos_model::ResourceStore;

/// One GC pass. The store lock is held per erase, never across the scan.
/// Returns the number of evicted resources.
pub fn sweep_once(store: &ResourceStore, expiry_interval_secs: i64) -> usize {
    let now = chrono::Utc::now().timestamp();
    let mut evicted = 0;
    for id in store.expired_ids(now, expiry_interval_secs) {
        // The id may already be gone via a parent's cascade.
        match store.erase(&id) {
            Ok(removed) => {
                for resource in &removed {
                    tracing::info!(
                        kind = resource.kind.as_str(),
                        id = %resource.id,
                        "expired resource evicted"
                    );
                }
                evicted += removed.len();
            }
            Err(nmos_domain::Error::NotFound(_)) => {}
            Err(err) => {
                tracing::warn!(%id, %err, "eviction failed");
                return evicted;
            }
        }
    }
    evicted
}

/// Run the sweeper until cancelled. Tick period 1s.
pub async fn run(
    store: Arc<ResourceStore>,
    settings: Arc<RwLock<Settings>>,
    cancel: CancellationToken,
) {
    let mut tick = tokio::time::interval(Duration::from_secs(1));
    tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tick.tick() => {
                let expiry = settings.read().registration_expiry_interval as i64;
                sweep_once(&store, expiry);
            }
        }
    }
}
