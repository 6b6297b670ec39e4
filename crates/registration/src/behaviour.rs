//! The node's registered-operation state machine.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use nmos_domain::{Error, Id, Settings};
use nmos_model::{Resource, ResourceStore, ResourceType, Tai};

use crate::backoff::DiscoveryBackoff;
use crate::client::RegistryClient;

/// Where the state machine currently is, for observability.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Initial,
    Discovering,
    Registering,
    Heartbeating,
    Unregistering,
}

/// Supplies ranked candidate registry base URIs. The gateway wires this
/// to DNS-SD resolution, or to the configured `registry_address`.
#[async_trait]
pub trait RegistryLocator: Send + Sync {
    async fn locate(&self, cancel: &CancellationToken) -> Vec<String>;
}

/// Fixed candidate list, used for `registry_address` overrides and tests.
pub struct StaticLocator(pub Vec<String>);

#[async_trait]
impl RegistryLocator for StaticLocator {
    async fn locate(&self, _cancel: &CancellationToken) -> Vec<String> {
        self.0.clone()
    }
}

/// What a registering/heartbeating step decided should happen next.
enum Transition {
    Stay,
    Reregister,
    Rediscover,
    Cancelled,
}

pub struct NodeBehaviour {
    store: Arc<ResourceStore>,
    settings: Arc<RwLock<Settings>>,
    locator: Arc<dyn RegistryLocator>,
    client: RegistryClient,
    backoff: DiscoveryBackoff,
    /// Consecutive transient failures tolerated before failing over.
    max_failures: u32,
    /// How long a failed registry stays ineligible.
    blacklist_cooldown: Duration,
    phase: Mutex<Phase>,
    current_base: Mutex<Option<String>>,
    blacklist: Mutex<HashMap<String, Instant>>,
}

impl NodeBehaviour {
    pub fn new(
        store: Arc<ResourceStore>,
        settings: Arc<RwLock<Settings>>,
        locator: Arc<dyn RegistryLocator>,
    ) -> Self {
        NodeBehaviour {
            store,
            settings,
            locator,
            client: RegistryClient::new(),
            backoff: DiscoveryBackoff::default(),
            max_failures: 3,
            blacklist_cooldown: Duration::from_secs(60),
            phase: Mutex::new(Phase::Initial),
            current_base: Mutex::new(None),
            blacklist: Mutex::new(HashMap::new()),
        }
    }

    /// Override the failure budget and cooldown (tests shrink these).
    pub fn with_failover(mut self, max_failures: u32, cooldown: Duration) -> Self {
        self.max_failures = max_failures;
        self.blacklist_cooldown = cooldown;
        self
    }

    pub fn with_backoff(mut self, backoff: DiscoveryBackoff) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn phase(&self) -> Phase {
        *self.phase.lock()
    }

    fn set_phase(&self, phase: Phase) {
        *self.phase.lock() = phase;
        tracing::debug!(?phase, "registration phase");
    }

    /// The registry currently in use, if any.
    pub fn current_registry(&self) -> Option<String> {
        self.current_base.lock().clone()
    }

    // ── blacklist ───────────────────────────────────────────────────

    fn blacklist_registry(&self, base: &str) {
        tracing::warn!(registry = %base, cooldown = ?self.blacklist_cooldown, "blacklisting registry");
        self.blacklist
            .lock()
            .insert(base.to_string(), Instant::now() + self.blacklist_cooldown);
    }

    fn eligible(&self, base: &str) -> bool {
        let mut blacklist = self.blacklist.lock();
        match blacklist.get(base) {
            Some(until) if Instant::now() < *until => false,
            Some(_) => {
                blacklist.remove(base);
                true
            }
            None => true,
        }
    }

    // ── main loop ───────────────────────────────────────────────────

    /// Run registered operation until cancelled.
    pub async fn run(&self, cancel: CancellationToken) {
        // id → (type, version) already accepted by the current registry.
        let mut registered: HashMap<Id, (ResourceType, Tai)> = HashMap::new();
        let mut base: Option<String> = None;

        loop {
            if cancel.is_cancelled() {
                break;
            }
            match base.take() {
                None => {
                    base = self.discover(&cancel).await;
                    if base.is_none() {
                        // Only cancellation gets discover() to give up.
                        break;
                    }
                    registered.clear();
                }
                Some(current) => {
                    let transition = self
                        .register_and_heartbeat(&current, &mut registered, &cancel)
                        .await;
                    match transition {
                        Transition::Stay | Transition::Reregister => base = Some(current),
                        Transition::Rediscover => {
                            self.blacklist_registry(&current);
                            *self.current_base.lock() = None;
                        }
                        Transition::Cancelled => break,
                    }
                }
            }
        }
    }

    /// DISCOVERING: ask the locator until a non-blacklisted candidate
    /// appears, backing off between empty rounds.
    async fn discover(&self, cancel: &CancellationToken) -> Option<String> {
        self.set_phase(Phase::Discovering);
        let mut attempt = 0u32;
        loop {
            if cancel.is_cancelled() {
                return None;
            }
            let candidates = self.locator.locate(cancel).await;
            if let Some(head) = candidates.into_iter().find(|c| self.eligible(c)) {
                tracing::info!(registry = %head, "adopting registry");
                *self.current_base.lock() = Some(head.clone());
                return Some(head);
            }
            let delay = self.backoff.delay_for_attempt(attempt);
            attempt = attempt.saturating_add(1);
            tracing::debug!(?delay, attempt, "no registry found, backing off");
            tokio::select! {
                _ = cancel.cancelled() => return None,
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }

    /// REGISTERING then HEARTBEATING against one registry.
    async fn register_and_heartbeat(
        &self,
        base: &str,
        registered: &mut HashMap<Id, (ResourceType, Tai)>,
        cancel: &CancellationToken,
    ) -> Transition {
        self.set_phase(Phase::Registering);
        let mut failures = 0u32;
        match self.sync_pass(base, registered, &mut failures, cancel).await {
            Transition::Stay => {}
            other => return other,
        }

        self.set_phase(Phase::Heartbeating);
        let mut last_sync = self.store.most_recent_update();
        failures = 0;
        loop {
            if cancel.is_cancelled() {
                return Transition::Cancelled;
            }
            let heartbeat_deadline = Instant::now() + self.heartbeat_period();

            // Between heartbeats, push store mutations to the registry.
            loop {
                let changed = tokio::select! {
                    _ = cancel.cancelled() => return Transition::Cancelled,
                    changed = self.store.wait_for_change(last_sync, heartbeat_deadline) => changed,
                };
                if !changed {
                    break;
                }
                match self.sync_pass(base, registered, &mut failures, cancel).await {
                    Transition::Stay => last_sync = self.store.most_recent_update(),
                    other => return other,
                }
            }

            let node_id = match self.store.node_id() {
                Some(id) => id,
                None => {
                    tracing::warn!("no node resource to heartbeat");
                    return Transition::Stay;
                }
            };
            match self.client.heartbeat(base, &node_id).await {
                Ok(()) => {
                    failures = 0;
                    let now = chrono::Utc::now().timestamp();
                    let _ = self.store.touch(&node_id, now);
                }
                Err(Error::NotFound(_)) => {
                    // The registry forgot us; re-register from scratch.
                    tracing::info!(registry = %base, "heartbeat 404, re-registering");
                    registered.clear();
                    return Transition::Reregister;
                }
                Err(err) => {
                    failures += 1;
                    tracing::warn!(registry = %base, %err, failures, "heartbeat failed");
                    if failures >= self.max_failures {
                        return Transition::Rediscover;
                    }
                }
            }
        }
    }

    /// One sync pass: POST new/changed resources in dependency order,
    /// DELETE vanished ones in reverse. Shares the caller's failure
    /// budget; transient errors retry with backoff in place.
    async fn sync_pass(
        &self,
        base: &str,
        registered: &mut HashMap<Id, (ResourceType, Tai)>,
        failures: &mut u32,
        cancel: &CancellationToken,
    ) -> Transition {
        let snapshot = self.store.snapshot(|r| {
            !matches!(r.kind, ResourceType::Subscription | ResourceType::Grain)
        });

        // Creations and updates, parents first.
        for resource in &snapshot {
            if registered.get(&resource.id).map(|(_, v)| *v) == Some(resource.version) {
                continue;
            }
            match self.post_with_retry(base, resource, failures, cancel).await {
                Transition::Stay => {
                    registered.insert(resource.id.clone(), (resource.kind, resource.version));
                }
                other => return other,
            }
        }

        // Deletions, children first.
        let mut gone: Vec<(Id, ResourceType)> = registered
            .iter()
            .filter(|(id, _)| !snapshot.iter().any(|r| &r.id == *id))
            .map(|(id, (kind, _))| (id.clone(), *kind))
            .collect();
        gone.sort_by_key(|(id, kind)| (std::cmp::Reverse(kind.precedence()), id.clone()));
        for (id, kind) in gone {
            match self.client.delete_resource(base, kind, &id).await {
                Ok(()) => {
                    registered.remove(&id);
                }
                Err(err) if err.is_transient() => {
                    *failures += 1;
                    tracing::warn!(%id, %err, "delete failed");
                    if *failures >= self.max_failures {
                        return Transition::Rediscover;
                    }
                }
                Err(err) => {
                    tracing::warn!(%id, %err, "delete rejected, dropping");
                    registered.remove(&id);
                }
            }
        }
        Transition::Stay
    }

    /// POST one resource, retrying transient failures until the shared
    /// budget runs out.
    async fn post_with_retry(
        &self,
        base: &str,
        resource: &Resource,
        failures: &mut u32,
        cancel: &CancellationToken,
    ) -> Transition {
        loop {
            if cancel.is_cancelled() {
                return Transition::Cancelled;
            }
            match self
                .client
                .post_resource(base, resource.kind, &resource.data)
                .await
            {
                Ok(()) => {
                    *failures = 0;
                    return Transition::Stay;
                }
                Err(err) if err.is_transient() => {
                    *failures += 1;
                    tracing::warn!(id = %resource.id, %err, failures, "registration failed");
                    if *failures >= self.max_failures {
                        return Transition::Rediscover;
                    }
                    let delay = self.backoff.delay_for_attempt(*failures - 1);
                    tokio::select! {
                        _ = cancel.cancelled() => return Transition::Cancelled,
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
                Err(err) => {
                    // Permanent: never re-POST, or it would loop forever.
                    tracing::warn!(id = %resource.id, %err, "registration rejected");
                    return Transition::Stay;
                }
            }
        }
    }

    /// Half the configured heartbeat interval, capped at 5s.
    fn heartbeat_period(&self) -> Duration {
        let secs = self.settings.read().registration_heartbeat_interval;
        Duration::from_millis((secs * 1000 / 2).clamp(500, 5000))
    }

    /// UNREGISTERING: best-effort DELETE of the node (which removes its
    /// sub-resources registry-side), bounded by `timeout`.
    pub async fn unregister(&self, timeout: Duration) {
        self.set_phase(Phase::Unregistering);
        let Some(base) = self.current_registry() else {
            return;
        };
        let Some(node_id) = self.store.node_id() else {
            return;
        };
        match tokio::time::timeout(
            timeout,
            self.client.delete_resource(&base, ResourceType::Node, &node_id),
        )
        .await
        {
            Ok(Ok(())) => tracing::info!(registry = %base, "unregistered"),
            Ok(Err(err)) => tracing::warn!(registry = %base, %err, "unregister failed"),
            Err(_) => tracing::warn!(registry = %base, "unregister timed out"),
        }
    }
}
