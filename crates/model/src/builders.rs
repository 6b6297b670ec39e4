//! Builders for the resources a node publishes.
//!
//! Each returns a [`Resource`] whose payload carries the IS-04 v1.3
//! fields for its type. The store stamps `version` on insert, so
//! builders leave it empty. Built resources are the node's own
//! inventory and are marked permanent: the expiry sweeper only collects
//! resources kept alive by external heartbeats.

use serde_json::{json, Value};

use nmos_domain::api_version::{is04_versions, V1_3};
use nmos_domain::{EventType, Id, Settings};

use crate::resource::{Resource, ResourceType};

fn base_fields(id: &Id, label: &str, description: &str) -> Value {
    json!({
        "id": id.as_str(),
        "version": "0:0",
        "label": label,
        "description": description,
        "tags": {}
    })
}

fn merged(mut base: Value, extra: Value) -> Value {
    if let (Value::Object(b), Value::Object(e)) = (&mut base, extra) {
        for (k, v) in e {
            b.insert(k, v);
        }
    }
    base
}

pub fn make_node(id: &Id, settings: &Settings) -> Resource {
    let href = settings.href();
    let api_versions: Vec<String> = is04_versions().iter().map(|v| v.to_string()).collect();
    let endpoints: Vec<Value> = settings
        .host_addresses
        .iter()
        .map(|addr| {
            json!({
                "host": addr,
                "port": settings.node_port(),
                "protocol": "http"
            })
        })
        .collect();
    let interfaces: Vec<Value> = settings
        .host_addresses
        .iter()
        .enumerate()
        .map(|(i, _)| {
            json!({
                "name": format!("eth{i}"),
                "chassis_id": null,
                "port_id": null
            })
        })
        .collect();

    let data = merged(
        base_fields(id, &settings.label, "NMOS node"),
        json!({
            "href": href,
            "hostname": settings.host_name,
            "api": {
                "versions": api_versions,
                "endpoints": endpoints
            },
            "caps": {},
            "services": [],
            "clocks": [
                { "name": "clk0", "ref_type": "internal" }
            ],
            "interfaces": interfaces
        }),
    );
    Resource::new(id.clone(), ResourceType::Node, V1_3, data).permanent()
}

pub fn make_device(
    id: &Id,
    node_id: &Id,
    senders: &[Id],
    receivers: &[Id],
    settings: &Settings,
) -> Resource {
    let connection_href = format!(
        "http://{}:{}/x-nmos/connection/",
        settings.host_address,
        settings.connection_port()
    );
    let data = merged(
        base_fields(id, &settings.label, "NMOS device"),
        json!({
            "node_id": node_id.as_str(),
            "type": "urn:x-nmos:device:generic",
            "senders": senders.iter().map(Id::as_str).collect::<Vec<_>>(),
            "receivers": receivers.iter().map(Id::as_str).collect::<Vec<_>>(),
            "controls": [
                { "type": "urn:x-nmos:control:sr-ctrl/v1.0", "href": connection_href }
            ]
        }),
    );
    Resource::new(id.clone(), ResourceType::Device, V1_3, data).permanent()
}

pub fn make_video_source(id: &Id, device_id: &Id, settings: &Settings) -> Resource {
    let data = merged(
        base_fields(id, &settings.label, "video source"),
        json!({
            "device_id": device_id.as_str(),
            "format": "urn:x-nmos:format:video",
            "caps": {},
            "parents": [],
            "grain_rate": { "numerator": 25, "denominator": 1 },
            "clock_name": "clk0"
        }),
    );
    Resource::new(id.clone(), ResourceType::Source, V1_3, data).permanent()
}

/// An IS-07 event source, e.g. a temperature sensor.
pub fn make_event_source(
    id: &Id,
    device_id: &Id,
    event_type: &EventType,
    settings: &Settings,
) -> Resource {
    let data = merged(
        base_fields(id, &settings.label, "event source"),
        json!({
            "device_id": device_id.as_str(),
            "format": "urn:x-nmos:format:data",
            "caps": {},
            "parents": [],
            "clock_name": null,
            "event_type": event_type.as_str()
        }),
    );
    Resource::new(id.clone(), ResourceType::Source, V1_3, data).permanent()
}

pub fn make_video_flow(id: &Id, source_id: &Id, device_id: &Id, settings: &Settings) -> Resource {
    let data = merged(
        base_fields(id, &settings.label, "raw video flow"),
        json!({
            "source_id": source_id.as_str(),
            "device_id": device_id.as_str(),
            "format": "urn:x-nmos:format:video",
            "media_type": "video/raw",
            "frame_width": 1920,
            "frame_height": 1080,
            "interlace_mode": "interlaced_tff",
            "colorspace": "BT709",
            "components": [
                { "name": "Y",  "width": 1920, "height": 1080, "bit_depth": 10 },
                { "name": "Cb", "width": 960,  "height": 1080, "bit_depth": 10 },
                { "name": "Cr", "width": 960,  "height": 1080, "bit_depth": 10 }
            ],
            "grain_rate": { "numerator": 25, "denominator": 1 }
        }),
    );
    Resource::new(id.clone(), ResourceType::Flow, V1_3, data).permanent()
}

pub fn make_sender(
    id: &Id,
    flow_id: &Id,
    device_id: &Id,
    interfaces: &[String],
    settings: &Settings,
) -> Resource {
    let manifest_href = format!(
        "http://{}:{}/x-nmos/connection/v1.0/single/senders/{}/transportfile",
        settings.host_address,
        settings.connection_port(),
        id
    );
    let data = merged(
        base_fields(id, &settings.label, "RTP sender"),
        json!({
            "flow_id": flow_id.as_str(),
            "device_id": device_id.as_str(),
            "transport": "urn:x-nmos:transport:rtp.mcast",
            "manifest_href": manifest_href,
            "interface_bindings": interfaces,
            "subscription": { "receiver_id": null, "active": false }
        }),
    );
    Resource::new(id.clone(), ResourceType::Sender, V1_3, data).permanent()
}

pub fn make_receiver(
    id: &Id,
    device_id: &Id,
    interfaces: &[String],
    settings: &Settings,
) -> Resource {
    let data = merged(
        base_fields(id, &settings.label, "RTP receiver"),
        json!({
            "device_id": device_id.as_str(),
            "transport": "urn:x-nmos:transport:rtp.mcast",
            "format": "urn:x-nmos:format:video",
            "caps": { "media_types": ["video/raw"] },
            "interface_bindings": interfaces,
            "subscription": { "sender_id": null, "active": false }
        }),
    );
    Resource::new(id.clone(), ResourceType::Receiver, V1_3, data).permanent()
}
