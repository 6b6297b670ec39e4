//! Seeds the node's resource set and runs the demo event producer.
//!
//! A real deployment would populate the store from its own hardware
//! inventory; this seed makes the node a complete, observable citizen out
//! of the box: one node, one device, one video chain, one receiver, and
//! one temperature event source.

use std::time::Duration;

use serde_json::json;
use tokio_util::sync::CancellationToken;

use nmos_domain::{EventType, Id, Result, Settings};
use nmos_events::Grain;
use nmos_model::builders;

use crate::activation::Role;
use crate::state::AppState;
use crate::validate;

/// Ids of the seeded resources.
pub struct Seeded {
    pub node: Id,
    pub device: Id,
    pub video_source: Id,
    pub video_flow: Id,
    pub sender: Id,
    pub receiver: Id,
    pub temperature_source: Id,
}

pub fn seed(state: &AppState) -> Result<Seeded> {
    let settings: Settings = state.settings.read().clone();
    let allow_invalid = settings.allow_invalid_resources;

    let seeded = Seeded {
        node: Id::generate(),
        device: Id::generate(),
        video_source: Id::generate(),
        video_flow: Id::generate(),
        sender: Id::generate(),
        receiver: Id::generate(),
        temperature_source: Id::generate(),
    };
    let interfaces = vec!["eth0".to_string()];

    // Validation happens at the insert boundary, per the configured
    // policy.
    let insert = |resource: nmos_model::Resource| -> Result<()> {
        validate::check(state.validator.as_ref(), &resource, allow_invalid)?;
        state.store.insert(resource)?;
        Ok(())
    };

    insert(builders::make_node(&seeded.node, &settings))?;
    insert(builders::make_device(
        &seeded.device,
        &seeded.node,
        &[seeded.sender.clone()],
        &[seeded.receiver.clone()],
        &settings,
    ))?;
    insert(builders::make_video_source(
        &seeded.video_source,
        &seeded.device,
        &settings,
    ))?;
    insert(builders::make_video_flow(
        &seeded.video_flow,
        &seeded.video_source,
        &seeded.device,
        &settings,
    ))?;
    insert(builders::make_sender(
        &seeded.sender,
        &seeded.video_flow,
        &seeded.device,
        &interfaces,
        &settings,
    ))?;
    insert(builders::make_receiver(
        &seeded.receiver,
        &seeded.device,
        &interfaces,
        &settings,
    ))?;

    let celsius = EventType::measurement_with_unit("number", "temperature", "C");
    insert(builders::make_event_source(
        &seeded.temperature_source,
        &seeded.device,
        &celsius,
        &settings,
    ))?;

    // Connection API parameter sets for the stream endpoints.
    state.connections.register(Role::Sender, &seeded.sender);
    state.connections.register(Role::Receiver, &seeded.receiver);

    // Events API entry for the temperature source.
    let initial = Grain::state(
        &seeded.temperature_source,
        &celsius,
        json!({"value": 20.0, "unit": "C"}),
    );
    state.events.insert(
        seeded.temperature_source.clone(),
        celsius,
        initial.to_message(),
    );

    tracing::info!(node = %seeded.node, "seeded node resources");
    Ok(seeded)
}

/// Demo producer: nudges the temperature every few seconds, feeding both
/// the Events API state and the WebSocket fan-out.
pub async fn run_temperature(
    state: AppState,
    source_id: Id,
    cancel: CancellationToken,
) {
    let celsius = EventType::measurement_with_unit("number", "temperature", "C");
    let mut tick = tokio::time::interval(Duration::from_secs(5));
    tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    let mut step: u64 = 0;
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tick.tick() => {
                step += 1;
                // Wander between 20.0 and 24.5 in half-degree steps.
                let value = 20.0 + (step % 10) as f64 * 0.5;
                let payload = json!({"value": value, "unit": "C"});
                let grain = Grain::state(&source_id, &celsius, payload.clone());
                state.events.set_state(&source_id, grain.to_message());
                let delivered = state.subscriptions.publish(&source_id, &celsius, &payload);
                tracing::debug!(value, delivered, "temperature updated");
            }
        }
    }
}
