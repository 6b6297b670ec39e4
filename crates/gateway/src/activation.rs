//! IS-05 staged/active parameter sets and scheduled activations.
//!
//! Every sender and receiver carries a staged parameter set that PATCHes
//! accumulate into, and an active set produced by committing the staged
//! one. Activation is immediate, scheduled-absolute, or
//! scheduled-relative; a timer task applies due activations. At most one
//! scheduled activation is pending per resource; a newer PATCH replaces
//! it.

use std::collections::HashMap;
use std::time::Duration;

use parking_lot::RwLock;
use serde_json::{json, Value};
use tokio::sync::Notify;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use nmos_domain::{Error, Id, Result};

pub const MODE_IMMEDIATE: &str = "activate_immediate";
pub const MODE_SCHEDULED_ABSOLUTE: &str = "activate_scheduled_absolute";
pub const MODE_SCHEDULED_RELATIVE: &str = "activate_scheduled_relative";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    Sender,
    Receiver,
}

impl Role {
    pub fn plural(&self) -> &'static str {
        match self {
            Role::Sender => "senders",
            Role::Receiver => "receivers",
        }
    }
}

/// Outcome of a staged PATCH, mapped to the HTTP layer by the handler.
#[derive(Debug)]
pub enum PatchOutcome {
    /// Parameters staged, nothing activated (200).
    Staged(Value),
    /// Immediate activation committed (200).
    Activated(Value),
    /// Activation queued for later (202).
    Scheduled(Value),
}

struct ConnectionResource {
    staged: Value,
    active: Value,
    pending: Option<Instant>,
}

fn null_activation() -> Value {
    json!({ "mode": null, "requested_time": null, "activation_time": null })
}

fn default_params(role: Role) -> Value {
    let mut params = json!({
        "activation": null_activation(),
        "master_enable": false,
        "transport_params": [{}]
    });
    match role {
        Role::Sender => params["receiver_id"] = Value::Null,
        Role::Receiver => {
            params["sender_id"] = Value::Null;
            params["transport_file"] = json!({ "data": null, "type": null });
        }
    }
    params
}

/// Wall-clock TAI timestamp string, `"{secs}:{nanos}"`.
fn tai_now() -> String {
    let now = chrono::Utc::now();
    format!("{}:{}", now.timestamp(), now.timestamp_subsec_nanos())
}

fn parse_tai(s: &str) -> Result<(i64, u32)> {
    let (secs, nanos) = s
        .split_once(':')
        .ok_or_else(|| Error::Validation(format!("bad timestamp: {s}")))?;
    Ok((
        secs.parse()
            .map_err(|_| Error::Validation(format!("bad timestamp: {s}")))?,
        nanos
            .parse()
            .map_err(|_| Error::Validation(format!("bad timestamp: {s}")))?,
    ))
}

pub struct ConnectionStore {
    resources: RwLock<HashMap<(Role, Id), ConnectionResource>>,
    /// Wakes the timer task when a nearer deadline is queued.
    rescheduled: Notify,
}

impl Default for ConnectionStore {
    fn default() -> Self {
        Self::new()
    }
}

impl ConnectionStore {
    pub fn new() -> Self {
        ConnectionStore {
            resources: RwLock::new(HashMap::new()),
            rescheduled: Notify::new(),
        }
    }

    /// Create the staged/active sets for a newly seeded sender/receiver.
    pub fn register(&self, role: Role, id: &Id) {
        self.resources.write().insert(
            (role, id.clone()),
            ConnectionResource {
                staged: default_params(role),
                active: default_params(role),
                pending: None,
            },
        );
    }

    pub fn list(&self, role: Role) -> Vec<Id> {
        let mut ids: Vec<Id> = self
            .resources
            .read()
            .keys()
            .filter(|(r, _)| *r == role)
            .map(|(_, id)| id.clone())
            .collect();
        ids.sort();
        ids
    }

    pub fn staged(&self, role: Role, id: &Id) -> Option<Value> {
        self.resources
            .read()
            .get(&(role, id.clone()))
            .map(|r| r.staged.clone())
    }

    pub fn active(&self, role: Role, id: &Id) -> Option<Value> {
        self.resources
            .read()
            .get(&(role, id.clone()))
            .map(|r| r.active.clone())
    }

    /// Apply a PATCH body to the staged set, possibly activating.
    pub fn patch_staged(&self, role: Role, id: &Id, body: &Value) -> Result<PatchOutcome> {
        let patch = body
            .as_object()
            .ok_or_else(|| Error::Validation("patch body must be an object".into()))?;

        // Reject keys outside the IS-05 staged parameter set up front, so
        // a bad PATCH mutates nothing.
        for key in patch.keys() {
            let known = matches!(
                key.as_str(),
                "activation" | "master_enable" | "transport_params"
            ) || (role == Role::Sender && key == "receiver_id")
                || (role == Role::Receiver && (key == "sender_id" || key == "transport_file"));
            if !known {
                return Err(Error::Validation(format!("unknown staged field: {key}")));
            }
        }

        let activation_provided = patch.contains_key("activation");
        let activation = match patch.get("activation") {
            Some(Value::Object(a)) => Some(a.clone()),
            Some(Value::Null) | None => None,
            Some(_) => return Err(Error::Validation("activation must be an object".into())),
        };
        let mode = activation
            .as_ref()
            .and_then(|a| a.get("mode"))
            .cloned()
            .unwrap_or(Value::Null);
        let requested_time = activation
            .as_ref()
            .and_then(|a| a.get("requested_time"))
            .and_then(Value::as_str)
            .map(str::to_string);

        // Scheduled modes need a parseable requested_time before any
        // state changes.
        let due = match mode.as_str() {
            Some(MODE_SCHEDULED_ABSOLUTE) => {
                let raw = requested_time
                    .as_deref()
                    .ok_or_else(|| Error::Validation("requested_time required".into()))?;
                let (secs, nanos) = parse_tai(raw)?;
                let now = chrono::Utc::now();
                let delta = (secs - now.timestamp()) as f64
                    + (nanos as f64 - now.timestamp_subsec_nanos() as f64) / 1e9;
                Some(Instant::now() + Duration::from_secs_f64(delta.max(0.0)))
            }
            Some(MODE_SCHEDULED_RELATIVE) => {
                let raw = requested_time
                    .as_deref()
                    .ok_or_else(|| Error::Validation("requested_time required".into()))?;
                let (secs, nanos) = parse_tai(raw)?;
                Some(
                    Instant::now()
                        + Duration::from_secs(secs.max(0) as u64)
                        + Duration::from_nanos(nanos as u64),
                )
            }
            Some(MODE_IMMEDIATE) | None => None,
            Some(other) => {
                return Err(Error::Validation(format!("unknown activation mode: {other}")))
            }
        };

        let mut resources = self.resources.write();
        let resource = resources
            .get_mut(&(role, id.clone()))
            .ok_or_else(|| Error::NotFound(id.to_string()))?;

        // Stage everything except the activation object.
        if let Value::Object(staged) = &mut resource.staged {
            for (key, value) in patch {
                if key != "activation" {
                    staged.insert(key.clone(), value.clone());
                }
            }
        }

        match mode.as_str() {
            None => {
                // No mode: parameters staged, any pending schedule
                // cancelled if the patch explicitly nulled the activation.
                if activation_provided {
                    resource.pending = None;
                    resource.staged["activation"] = null_activation();
                }
                Ok(PatchOutcome::Staged(resource.staged.clone()))
            }
            Some(MODE_IMMEDIATE) => {
                resource.pending = None;
                let activation_time = tai_now();
                resource.staged["activation"] = json!({
                    "mode": MODE_IMMEDIATE,
                    "requested_time": null,
                    "activation_time": activation_time
                });
                resource.active = resource.staged.clone();
                let response = resource.staged.clone();
                resource.staged["activation"] = null_activation();
                Ok(PatchOutcome::Activated(response))
            }
            Some(m) => {
                resource.staged["activation"] = json!({
                    "mode": m,
                    "requested_time": requested_time,
                    "activation_time": null
                });
                resource.pending = due;
                drop(resources);
                self.rescheduled.notify_waiters();
                Ok(PatchOutcome::Scheduled(
                    self.staged(role, id).unwrap_or(Value::Null),
                ))
            }
        }
    }

    /// Commit every pending activation that is due. Returns the applied
    /// resources.
    pub fn apply_due(&self, now: Instant) -> Vec<(Role, Id)> {
        let mut applied = Vec::new();
        let mut resources = self.resources.write();
        for ((role, id), resource) in resources.iter_mut() {
            if resource.pending.is_some_and(|due| due <= now) {
                resource.pending = None;
                resource.staged["activation"]["activation_time"] = json!(tai_now());
                resource.active = resource.staged.clone();
                resource.staged["activation"] = null_activation();
                applied.push((*role, id.clone()));
            }
        }
        applied
    }

    fn next_deadline(&self) -> Option<Instant> {
        self.resources
            .read()
            .values()
            .filter_map(|r| r.pending)
            .min()
    }

    /// Timer task: sleep until the nearest pending activation, commit it,
    /// repeat. Runs until cancelled.
    pub async fn run(&self, cancel: CancellationToken) {
        loop {
            let deadline = self
                .next_deadline()
                .unwrap_or_else(|| Instant::now() + Duration::from_secs(3600));
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = self.rescheduled.notified() => continue,
                _ = tokio::time::sleep_until(deadline) => {
                    for (role, id) in self.apply_due(Instant::now()) {
                        tracing::info!(role = role.plural(), %id, "scheduled activation applied");
                    }
                }
            }
        }
    }
}
