//! Grains: time-stamped event payloads.

use serde_json::{json, Value};

use nmos_domain::{EventType, Id};

/// A TAI-style wall-clock timestamp, displayed as `"{secs}:{nanos}"`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord)]
pub struct EventTimestamp {
    pub secs: i64,
    pub nanos: u32,
}

impl EventTimestamp {
    pub fn now() -> Self {
        let now = chrono::Utc::now();
        EventTimestamp {
            secs: now.timestamp(),
            nanos: now.timestamp_subsec_nanos().min(999_999_999),
        }
    }

    /// The smallest timestamp strictly greater than `self`.
    pub fn increment(self) -> Self {
        if self.nanos >= 999_999_999 {
            EventTimestamp {
                secs: self.secs + 1,
                nanos: 0,
            }
        } else {
            EventTimestamp {
                secs: self.secs,
                nanos: self.nanos + 1,
            }
        }
    }
}

impl std::fmt::Display for EventTimestamp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.secs, self.nanos)
    }
}

/// One event: identity, type, timing, and the typed state payload.
#[derive(Debug, Clone)]
pub struct Grain {
    pub source_id: Id,
    pub event_type: EventType,
    pub origin: EventTimestamp,
    pub sync: EventTimestamp,
    pub creation: EventTimestamp,
    /// The `value` object, e.g. `{"value": 20.0, "unit": "C"}`.
    pub value: Value,
}

impl Grain {
    /// A "state" grain carrying the source's current value, stamped now.
    pub fn state(source_id: &Id, event_type: &EventType, value: Value) -> Self {
        let now = EventTimestamp::now();
        Grain {
            source_id: source_id.clone(),
            event_type: event_type.clone(),
            origin: now,
            sync: now,
            creation: now,
            value,
        }
    }

    /// The wire message sent to WebSocket peers.
    pub fn to_message(&self) -> Value {
        json!({
            "message_type": "state",
            "identity": { "source_id": self.source_id.as_str() },
            "event_type": self.event_type.as_str(),
            "timing": {
                "origin_timestamp": self.origin.to_string(),
                "sync_timestamp": self.sync.to_string(),
                "creation_timestamp": self.creation.to_string()
            },
            "payload": {
                "type": { "name": self.event_type.as_str() },
                "value": self.value
            }
        })
    }
}
