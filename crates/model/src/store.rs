//! The thread-safe resource store.
//!
//! Reads take shared access, mutations exclusive. Change notification is
//! edge-triggered through a `watch` channel carrying the most recent
//! update version; the channel is signalled **after** the write lock is
//! released, so observers may re-enter the store freely.

use std::collections::{BTreeSet, HashMap};

use parking_lot::RwLock;
use serde_json::Value;
use tokio::sync::watch;
use tokio::sync::Notify;
use tokio::time::Instant;

use nmos_domain::{Error, Id, Result};

use crate::resource::{Resource, ResourceType};
use crate::tai::{Tai, VersionClock};

/// The six per-type change counters advertised in the node's TXT records.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ApiResourceVersions {
    pub self_: u8,
    pub devices: u8,
    pub sources: u8,
    pub flows: u8,
    pub senders: u8,
    pub receivers: u8,
}

struct Inner {
    resources: HashMap<Id, Resource>,
    /// Tree children, for cascade deletion.
    children: HashMap<Id, BTreeSet<Id>>,
    counters: HashMap<ResourceType, u8>,
    frozen: bool,
}

pub struct ResourceStore {
    inner: RwLock<Inner>,
    clock: VersionClock,
    update_tx: watch::Sender<Tai>,
    /// Signalled by `touch`; awaited only by the registration heartbeat
    /// observer.
    health_notify: Notify,
}

impl Default for ResourceStore {
    fn default() -> Self {
        Self::new()
    }
}

impl ResourceStore {
    pub fn new() -> Self {
        let (update_tx, _) = watch::channel(Tai::ZERO);
        ResourceStore {
            inner: RwLock::new(Inner {
                resources: HashMap::new(),
                children: HashMap::new(),
                counters: HashMap::new(),
                frozen: false,
            }),
            clock: VersionClock::new(),
            update_tx,
            health_notify: Notify::new(),
        }
    }

    // ── mutations ───────────────────────────────────────────────────

    /// Insert a resource. Fails if the id is taken or any declared parent
    /// is absent.
    pub fn insert(&self, mut resource: Resource) -> Result<Tai> {
        let version = self.clock.next();
        {
            let mut inner = self.inner.write();
            if inner.frozen {
                return Err(Error::Shutdown);
            }
            if inner.resources.contains_key(&resource.id) {
                return Err(Error::AlreadyExists(resource.id.to_string()));
            }
            for parent in resource.declared_parents() {
                if !inner.resources.contains_key(&parent) {
                    return Err(Error::DanglingReference {
                        child: resource.id.to_string(),
                        parent: parent.to_string(),
                    });
                }
            }

            resource.version = version;
            if resource.health != crate::resource::HEALTH_FOREVER {
                resource.health = chrono::Utc::now().timestamp();
            }
            if let Value::Object(map) = &mut resource.data {
                map.insert("version".into(), Value::String(version.to_string()));
            }

            if let Some(parent) = resource.tree_parent() {
                inner
                    .children
                    .entry(parent.clone())
                    .or_default()
                    .insert(resource.id.clone());
                if let Some(p) = inner.resources.get_mut(&parent) {
                    p.sub_resources.push(resource.id.clone());
                }
            }
            let counter = inner.counters.entry(resource.kind).or_default();
            *counter = counter.wrapping_add(1);
            inner.resources.insert(resource.id.clone(), resource);
        }
        // Lock released before anyone is woken.
        self.publish_version(version);
        Ok(version)
    }

    /// Apply `transform` to the resource's payload under exclusive access.
    pub fn modify(&self, id: &Id, transform: impl FnOnce(&mut Value)) -> Result<Tai> {
        let version = self.clock.next();
        {
            let mut inner = self.inner.write();
            if inner.frozen {
                return Err(Error::Shutdown);
            }
            let resource = inner
                .resources
                .get_mut(id)
                .ok_or_else(|| Error::NotFound(id.to_string()))?;
            transform(&mut resource.data);
            resource.version = version;
            if resource.health != crate::resource::HEALTH_FOREVER {
                resource.health = chrono::Utc::now().timestamp();
            }
            if let Value::Object(map) = &mut resource.data {
                map.insert("version".into(), Value::String(version.to_string()));
            }
            let kind = resource.kind;
            let counter = inner.counters.entry(kind).or_default();
            *counter = counter.wrapping_add(1);
        }
        self.publish_version(version);
        Ok(version)
    }

    /// Remove a resource and all of its descendants. The whole subtree
    /// disappears in a single observable transition. Returns the removed
    /// resources, parents first.
    pub fn erase(&self, id: &Id) -> Result<Vec<Resource>> {
        let version = self.clock.next();
        let removed = {
            let mut inner = self.inner.write();
            if inner.frozen {
                return Err(Error::Shutdown);
            }
            if !inner.resources.contains_key(id) {
                return Err(Error::NotFound(id.to_string()));
            }

            // Breadth-first over the tree index.
            let mut doomed = vec![id.clone()];
            let mut i = 0;
            while i < doomed.len() {
                let current = doomed[i].clone();
                if let Some(kids) = inner.children.get(&current) {
                    doomed.extend(kids.iter().cloned());
                }
                i += 1;
            }

            let mut removed = Vec::with_capacity(doomed.len());
            for dead in &doomed {
                if let Some(resource) = inner.resources.remove(dead) {
                    let counter = inner.counters.entry(resource.kind).or_default();
                    *counter = counter.wrapping_add(1);
                    removed.push(resource);
                }
                inner.children.remove(dead);
            }
            // Unlink from the surviving parent, if any.
            if let Some(parent) = removed.first().and_then(Resource::tree_parent) {
                if let Some(kids) = inner.children.get_mut(&parent) {
                    kids.remove(id);
                }
                if let Some(p) = inner.resources.get_mut(&parent) {
                    p.sub_resources.retain(|s| s != id);
                }
            }
            removed.sort_by_key(|r| (r.kind.precedence(), r.id.clone()));
            removed
        };
        self.publish_version(version);
        Ok(removed)
    }

    /// Refresh a resource's health stamp without touching its payload or
    /// update version.
    pub fn touch(&self, id: &Id, health: i64) -> Result<()> {
        {
            let mut inner = self.inner.write();
            if inner.frozen {
                return Err(Error::Shutdown);
            }
            let resource = inner
                .resources
                .get_mut(id)
                .ok_or_else(|| Error::NotFound(id.to_string()))?;
            resource.health = health;
        }
        self.health_notify.notify_waiters();
        Ok(())
    }

    /// Reject all further mutations with `Shutdown`.
    pub fn freeze(&self) {
        self.inner.write().frozen = true;
        self.publish_version(self.clock.next());
    }

    /// Advance the published version, never backwards: two mutations may
    /// race between releasing the write lock and notifying.
    fn publish_version(&self, version: Tai) {
        self.update_tx.send_modify(|current| {
            if version > *current {
                *current = version;
            }
        });
    }

    // ── reads ───────────────────────────────────────────────────────

    pub fn get(&self, id: &Id) -> Option<Resource> {
        self.inner.read().resources.get(id).cloned()
    }

    /// A stable view of the resources matching `predicate`, ordered by
    /// type precedence then id.
    pub fn snapshot(&self, predicate: impl Fn(&Resource) -> bool) -> Vec<Resource> {
        let inner = self.inner.read();
        let mut out: Vec<Resource> = inner
            .resources
            .values()
            .filter(|r| predicate(r))
            .cloned()
            .collect();
        out.sort_by_key(|r| (r.kind.precedence(), r.id.clone()));
        out
    }

    /// The singleton node resource's id, once inserted.
    pub fn node_id(&self) -> Option<Id> {
        let inner = self.inner.read();
        inner
            .resources
            .values()
            .find(|r| r.kind == ResourceType::Node)
            .map(|r| r.id.clone())
    }

    /// Ids of expiry-enabled resources whose health lapsed before
    /// `now - expiry_interval_secs`.
    pub fn expired_ids(&self, now: i64, expiry_interval_secs: i64) -> Vec<Id> {
        let inner = self.inner.read();
        let mut out: Vec<Id> = inner
            .resources
            .values()
            .filter(|r| r.kind.has_expiry() && now - r.health >= expiry_interval_secs)
            .map(|r| r.id.clone())
            .collect();
        out.sort();
        out
    }

    pub fn most_recent_update(&self) -> Tai {
        *self.update_tx.borrow()
    }

    pub fn api_resource_versions(&self) -> ApiResourceVersions {
        let inner = self.inner.read();
        let at = |k: ResourceType| inner.counters.get(&k).copied().unwrap_or(0);
        ApiResourceVersions {
            self_: at(ResourceType::Node),
            devices: at(ResourceType::Device),
            sources: at(ResourceType::Source),
            flows: at(ResourceType::Flow),
            senders: at(ResourceType::Sender),
            receivers: at(ResourceType::Receiver),
        }
    }

    // ── waiting ─────────────────────────────────────────────────────

    /// Block until the global update version exceeds `min`, or the
    /// deadline passes. Returns `true` when a change was observed.
    pub async fn wait_for_change(&self, min: Tai, deadline: Instant) -> bool {
        let mut rx = self.update_tx.subscribe();
        loop {
            if *rx.borrow() > min {
                return true;
            }
            match tokio::time::timeout_at(deadline, rx.changed()).await {
                Ok(Ok(())) => continue,
                // Sender dropped: store is gone, report no change.
                Ok(Err(_)) => return false,
                Err(_) => return *rx.borrow() > min,
            }
        }
    }

    /// Wait for the next `touch`, or the deadline. Used by the
    /// registration heartbeat observer only.
    pub async fn wait_for_touch(&self, deadline: Instant) -> bool {
        tokio::time::timeout_at(deadline, self.health_notify.notified())
            .await
            .is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nmos_domain::api_version::V1_3;
    use serde_json::json;
    use std::time::Duration;

    fn node(id: &str) -> Resource {
        Resource::new(Id::from(id), ResourceType::Node, V1_3, json!({"label": "n"}))
    }

    fn device(id: &str, node_id: &str) -> Resource {
        Resource::new(
            Id::from(id),
            ResourceType::Device,
            V1_3,
            json!({"node_id": node_id}),
        )
    }

    fn source(id: &str, device_id: &str) -> Resource {
        Resource::new(
            Id::from(id),
            ResourceType::Source,
            V1_3,
            json!({"device_id": device_id}),
        )
    }

    fn flow(id: &str, source_id: &str, device_id: &str) -> Resource {
        Resource::new(
            Id::from(id),
            ResourceType::Flow,
            V1_3,
            json!({"source_id": source_id, "device_id": device_id}),
        )
    }

    fn sender(id: &str, flow_id: &str, device_id: &str) -> Resource {
        Resource::new(
            Id::from(id),
            ResourceType::Sender,
            V1_3,
            json!({"flow_id": flow_id, "device_id": device_id}),
        )
    }

    fn seed(store: &ResourceStore) {
        store.insert(node("n1")).unwrap();
        store.insert(device("d1", "n1")).unwrap();
        store.insert(source("s1", "d1")).unwrap();
        store.insert(flow("f1", "s1", "d1")).unwrap();
        store.insert(sender("snd1", "f1", "d1")).unwrap();
    }

    #[test]
    fn duplicate_insert_is_rejected() {
        let store = ResourceStore::new();
        store.insert(node("n1")).unwrap();
        assert!(matches!(
            store.insert(node("n1")),
            Err(Error::AlreadyExists(_))
        ));
    }

    #[test]
    fn dangling_parent_is_rejected() {
        let store = ResourceStore::new();
        store.insert(node("n1")).unwrap();
        let err = store.insert(device("d1", "nope")).unwrap_err();
        assert!(matches!(err, Error::DanglingReference { .. }));
        assert!(store.get(&Id::from("d1")).is_none());
    }

    #[test]
    fn versions_strictly_increase_across_mutations() {
        let store = ResourceStore::new();
        let v1 = store.insert(node("n1")).unwrap();
        let v2 = store.insert(device("d1", "n1")).unwrap();
        let v3 = store
            .modify(&Id::from("d1"), |data| {
                data["label"] = json!("renamed");
            })
            .unwrap();
        assert!(v1 < v2 && v2 < v3);
        assert_eq!(store.most_recent_update(), v3);
    }

    #[test]
    fn payload_version_field_tracks_update_version() {
        let store = ResourceStore::new();
        let v = store.insert(node("n1")).unwrap();
        let r = store.get(&Id::from("n1")).unwrap();
        assert_eq!(r.data["version"], json!(v.to_string()));
    }

    #[test]
    fn cascade_erase_takes_the_whole_subtree() {
        let store = ResourceStore::new();
        seed(&store);

        let removed = store.erase(&Id::from("d1")).unwrap();
        let kinds: Vec<_> = removed.iter().map(|r| r.kind).collect();
        assert_eq!(
            kinds,
            vec![
                ResourceType::Device,
                ResourceType::Source,
                ResourceType::Flow,
                ResourceType::Sender
            ]
        );
        // Only the node survives, in a single transition.
        let left = store.snapshot(|_| true);
        assert_eq!(left.len(), 1);
        assert_eq!(left[0].kind, ResourceType::Node);
    }

    #[test]
    fn snapshot_is_ordered_by_precedence_then_id() {
        let store = ResourceStore::new();
        seed(&store);
        let all = store.snapshot(|_| true);
        let kinds: Vec<_> = all.iter().map(|r| r.kind.precedence()).collect();
        let mut sorted = kinds.clone();
        sorted.sort();
        assert_eq!(kinds, sorted);
    }

    #[test]
    fn touch_updates_health_without_version() {
        let store = ResourceStore::new();
        seed(&store);
        let before = store.get(&Id::from("d1")).unwrap();
        store.touch(&Id::from("d1"), before.health + 100).unwrap();
        let after = store.get(&Id::from("d1")).unwrap();
        assert_eq!(after.health, before.health + 100);
        assert_eq!(after.version, before.version);
    }

    #[test]
    fn expired_ids_respect_kind_and_age() {
        let store = ResourceStore::new();
        seed(&store);
        let now = chrono::Utc::now().timestamp();
        assert!(store.expired_ids(now, 12).is_empty());
        // Everything with expiry lapses 13 simulated seconds later; the
        // node is exempt.
        let expired = store.expired_ids(now + 13, 12);
        assert_eq!(expired.len(), 4);
        assert!(!expired.contains(&Id::from("n1")));
    }

    #[test]
    fn frozen_store_rejects_mutations() {
        let store = ResourceStore::new();
        seed(&store);
        store.freeze();
        assert!(matches!(store.insert(node("n2")), Err(Error::Shutdown)));
        assert!(matches!(
            store.erase(&Id::from("d1")),
            Err(Error::Shutdown)
        ));
        assert!(matches!(
            store.touch(&Id::from("d1"), 0),
            Err(Error::Shutdown)
        ));
    }

    #[tokio::test]
    async fn wait_for_change_wakes_on_mutation() {
        let store = std::sync::Arc::new(ResourceStore::new());
        let v0 = store.most_recent_update();

        let waiter = {
            let store = store.clone();
            tokio::spawn(async move {
                store
                    .wait_for_change(v0, Instant::now() + Duration::from_secs(5))
                    .await
            })
        };
        tokio::task::yield_now().await;
        store.insert(node("n1")).unwrap();
        assert!(waiter.await.unwrap());
    }

    #[tokio::test]
    async fn touch_wakes_the_heartbeat_observer() {
        let store = std::sync::Arc::new(ResourceStore::new());
        seed(&store);

        let waiter = {
            let store = store.clone();
            tokio::spawn(async move {
                store
                    .wait_for_touch(Instant::now() + Duration::from_secs(5))
                    .await
            })
        };
        tokio::task::yield_now().await;
        store.touch(&Id::from("d1"), 42).unwrap();
        assert!(waiter.await.unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn wait_for_change_times_out_quietly() {
        let store = ResourceStore::new();
        let v = store.most_recent_update();
        let woke = store
            .wait_for_change(v, Instant::now() + Duration::from_millis(50))
            .await;
        assert!(!woke);
    }

    #[test]
    fn per_type_counters_wrap() {
        let store = ResourceStore::new();
        store.insert(node("n1")).unwrap();
        for i in 0..300 {
            store
                .modify(&Id::from("n1"), |d| {
                    d["label"] = json!(format!("l{i}"));
                })
                .unwrap();
        }
        // 1 insert + 300 modifies, mod 256.
        assert_eq!(store.api_resource_versions().self_, (301 % 256) as u8);
    }
}
