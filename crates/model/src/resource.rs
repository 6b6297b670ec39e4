use serde::{Deserialize, Serialize};
use serde_json::Value;

use nmos_domain::{ApiVersion, Id};

use crate::tai::Tai;

/// Health sentinel for resources the node itself owns: they are kept
/// alive by existing, not by heartbeats, and never lapse.
pub const HEALTH_FOREVER: i64 = i64::MAX;

/// The NMOS resource hierarchy, plus the two internal kinds used by the
/// event engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceType {
    Node,
    Device,
    Source,
    Flow,
    Sender,
    Receiver,
    Subscription,
    Grain,
}

impl ResourceType {
    /// The singular name used in registration POST bodies.
    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceType::Node => "node",
            ResourceType::Device => "device",
            ResourceType::Source => "source",
            ResourceType::Flow => "flow",
            ResourceType::Sender => "sender",
            ResourceType::Receiver => "receiver",
            ResourceType::Subscription => "subscription",
            ResourceType::Grain => "grain",
        }
    }

    /// The plural path segment used in API URLs.
    pub fn plural(&self) -> &'static str {
        match self {
            ResourceType::Node => "nodes",
            ResourceType::Device => "devices",
            ResourceType::Source => "sources",
            ResourceType::Flow => "flows",
            ResourceType::Sender => "senders",
            ResourceType::Receiver => "receivers",
            ResourceType::Subscription => "subscriptions",
            ResourceType::Grain => "grains",
        }
    }

    /// Snapshot and registration ordering: parents before children.
    pub fn precedence(&self) -> u8 {
        match self {
            ResourceType::Node => 0,
            ResourceType::Device => 1,
            ResourceType::Source => 2,
            ResourceType::Flow => 3,
            ResourceType::Sender => 4,
            ResourceType::Receiver => 5,
            ResourceType::Subscription => 6,
            ResourceType::Grain => 7,
        }
    }

    /// Externally advertised kinds are subject to health-based expiry;
    /// the singleton node and the event engine's kinds are not.
    pub fn has_expiry(&self) -> bool {
        matches!(
            self,
            ResourceType::Device
                | ResourceType::Source
                | ResourceType::Flow
                | ResourceType::Sender
                | ResourceType::Receiver
        )
    }

    pub fn parse(s: &str) -> Option<ResourceType> {
        Some(match s {
            "node" => ResourceType::Node,
            "device" => ResourceType::Device,
            "source" => ResourceType::Source,
            "flow" => ResourceType::Flow,
            "sender" => ResourceType::Sender,
            "receiver" => ResourceType::Receiver,
            "subscription" => ResourceType::Subscription,
            "grain" => ResourceType::Grain,
            _ => return None,
        })
    }
}

/// A single resource: id, type, schema version, JSON payload, update
/// version, health stamp, and the ids of its direct sub-resources.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Resource {
    pub id: Id,
    #[serde(rename = "type")]
    pub kind: ResourceType,
    pub api_version: ApiVersion,
    pub data: Value,
    pub version: Tai,
    /// Wall-clock seconds of the most recent heartbeat or observation.
    pub health: i64,
    #[serde(default)]
    pub sub_resources: Vec<Id>,
}

impl Resource {
    pub fn new(id: Id, kind: ResourceType, api_version: ApiVersion, data: Value) -> Self {
        Resource {
            id,
            kind,
            api_version,
            data,
            version: Tai::ZERO,
            health: 0,
            sub_resources: Vec::new(),
        }
    }

    /// Mark this resource as self-owned: exempt from health-based expiry.
    pub fn permanent(mut self) -> Self {
        self.health = HEALTH_FOREVER;
        self
    }

    /// Every parent id this resource declares, for referential-integrity
    /// checks on insert.
    pub fn declared_parents(&self) -> Vec<Id> {
        let mut parents = Vec::new();
        let fields: &[&str] = match self.kind {
            ResourceType::Node => &[],
            ResourceType::Device => &["node_id"],
            ResourceType::Source => &["device_id"],
            ResourceType::Flow => &["source_id", "device_id"],
            ResourceType::Sender => &["flow_id", "device_id"],
            ResourceType::Receiver => &["device_id"],
            ResourceType::Subscription | ResourceType::Grain => &[],
        };
        for field in fields {
            if let Some(id) = self.data.get(field).and_then(Value::as_str) {
                parents.push(Id::from(id));
            }
        }
        parents
    }

    /// The parent that owns this resource in the tree (for cascade
    /// deletion). Flows hang off their source, senders off their flow.
    pub fn tree_parent(&self) -> Option<Id> {
        let field = match self.kind {
            ResourceType::Device => "node_id",
            ResourceType::Source => "device_id",
            ResourceType::Flow => "source_id",
            ResourceType::Sender => "flow_id",
            ResourceType::Receiver => "device_id",
            _ => return None,
        };
        self.data
            .get(field)
            .and_then(Value::as_str)
            .map(Id::from)
    }

    /// Typed accessor for a required string field of the payload.
    pub fn string_field(&self, name: &str) -> nmos_domain::Result<&str> {
        self.data
            .get(name)
            .and_then(Value::as_str)
            .ok_or_else(|| nmos_domain::Error::Validation(format!("missing field: {name}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn precedence_orders_parents_first() {
        assert!(ResourceType::Node.precedence() < ResourceType::Device.precedence());
        assert!(ResourceType::Device.precedence() < ResourceType::Source.precedence());
        assert!(ResourceType::Source.precedence() < ResourceType::Flow.precedence());
        assert!(ResourceType::Flow.precedence() < ResourceType::Sender.precedence());
    }

    #[test]
    fn node_and_internal_kinds_never_expire() {
        assert!(!ResourceType::Node.has_expiry());
        assert!(!ResourceType::Subscription.has_expiry());
        assert!(!ResourceType::Grain.has_expiry());
        assert!(ResourceType::Sender.has_expiry());
    }

    #[test]
    fn sender_declares_flow_and_device_parents() {
        let r = Resource::new(
            Id::from("s1"),
            ResourceType::Sender,
            nmos_domain::api_version::V1_3,
            json!({"flow_id": "f1", "device_id": "d1"}),
        );
        assert_eq!(r.declared_parents(), vec![Id::from("f1"), Id::from("d1")]);
        assert_eq!(r.tree_parent(), Some(Id::from("f1")));
    }
}
