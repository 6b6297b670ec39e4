//! Subscription store and grain fan-out.
//!
//! One subscription = one peer's interest in one source. Each WebSocket
//! connection owns a bounded outbound queue; the producer enqueues one
//! grain per matching subscription. A full queue closes the connection
//! (policy code) rather than silently dropping grains.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use nmos_domain::{EventType, Id};

use crate::grain::{EventTimestamp, Grain};

/// Per-connection outbound queue depth. Overflow closes the connection.
pub const HIGH_WATER_MARK: usize = 64;

struct Subscription {
    connection: Uuid,
    source_id: Id,
    /// Subscriber interest; may carry a trailing wildcard.
    filter: EventType,
    sink: mpsc::Sender<Value>,
    /// Cancelled on overflow; the connection's writer closes with 1008.
    overflow: CancellationToken,
    /// Floor for the next grain's timestamps on this subscription.
    last_emitted: Mutex<EventTimestamp>,
}

#[derive(Default)]
pub struct SubscriptionStore {
    subscriptions: RwLock<HashMap<Uuid, Arc<Subscription>>>,
}

impl SubscriptionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a peer's interest in `source_id`. Returns the
    /// subscription id.
    pub fn add(
        &self,
        connection: Uuid,
        source_id: Id,
        filter: EventType,
        sink: mpsc::Sender<Value>,
        overflow: CancellationToken,
    ) -> Uuid {
        let id = Uuid::new_v4();
        let subscription = Arc::new(Subscription {
            connection,
            source_id: source_id.clone(),
            filter,
            sink,
            overflow,
            last_emitted: Mutex::new(EventTimestamp::default()),
        });
        self.subscriptions.write().insert(id, subscription);
        tracing::debug!(%id, source = %source_id, %connection, "subscription added");
        id
    }

    /// Drop every subscription belonging to a connection.
    pub fn remove_connection(&self, connection: Uuid) {
        let mut subs = self.subscriptions.write();
        let before = subs.len();
        subs.retain(|_, s| s.connection != connection);
        let removed = before - subs.len();
        if removed > 0 {
            tracing::debug!(%connection, removed, "subscriptions released");
        }
    }

    pub fn len(&self) -> usize {
        self.subscriptions.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.subscriptions.read().is_empty()
    }

    /// Deliver the source's current state to one subscription, used for
    /// the initial grain on open.
    pub fn emit_initial(&self, subscription: Uuid, event_type: &EventType, value: Value) {
        let Some(sub) = self.subscriptions.read().get(&subscription).cloned() else {
            return;
        };
        let grain = Grain::state(&sub.source_id, event_type, value);
        Self::deliver(&sub, grain);
    }

    /// Fan a state change out to every matching subscription. Returns
    /// the number of grains enqueued.
    ///
    /// Matching requires the same source **and** an event-type match per
    /// the wildcard rule. Ordering is preserved per subscription; no
    /// ordering holds across subscriptions.
    pub fn publish(&self, source_id: &Id, event_type: &EventType, value: &Value) -> usize {
        let matching: Vec<Arc<Subscription>> = self
            .subscriptions
            .read()
            .values()
            .filter(|s| &s.source_id == source_id && s.filter.matches(event_type))
            .cloned()
            .collect();

        let mut delivered = 0;
        for sub in matching {
            let grain = Grain::state(source_id, event_type, value.clone());
            if Self::deliver(&sub, grain) {
                delivered += 1;
            }
        }
        delivered
    }

    /// Enqueue one grain, enforcing per-subscription timestamp
    /// monotonicity and the overflow policy.
    fn deliver(sub: &Subscription, mut grain: Grain) -> bool {
        {
            let mut last = sub.last_emitted.lock();
            if grain.creation <= *last {
                let bumped = last.increment();
                grain.origin = bumped;
                grain.sync = bumped;
                grain.creation = bumped;
            }
            *last = grain.creation;
        }
        match sub.sink.try_send(grain.to_message()) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                tracing::warn!(
                    connection = %sub.connection,
                    source = %sub.source_id,
                    "send buffer overflow, closing connection"
                );
                sub.overflow.cancel();
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        }
    }
}
