//! Node settings.
//!
//! Settings arrive as a JSON object: either inline on the command line or
//! as a path to a JSON file.  A small whitelisted subset can be changed at
//! runtime by `PATCH /settings/all`.
//!
//! Parsing is strict (`deny_unknown_fields` would reject forward-compatible
//! configs, so unknown keys are accepted and ignored), but values must have
//! the right types or startup fails.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Error, Result};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Compiled port defaults (used when neither the per-API port nor
// `http_port` is configured)
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub const DEFAULT_NODE_PORT: u16 = 3212;
pub const DEFAULT_CONNECTION_PORT: u16 = 3215;
pub const DEFAULT_EVENTS_PORT: u16 = 3216;
pub const DEFAULT_EVENTS_WS_PORT: u16 = 3217;
pub const DEFAULT_REGISTRATION_PORT: u16 = 3210;
pub const DEFAULT_QUERY_PORT: u16 = 3211;
pub const DEFAULT_SETTINGS_PORT: u16 = 3209;
pub const DEFAULT_LOGGING_PORT: u16 = 5106;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// Severity floor, -40 (most verbose) to 40 (fatal only).
    #[serde(default = "d_logging_level")]
    pub logging_level: i32,

    /// Interface IPs to advertise. Empty = enumerate from the OS.
    #[serde(default)]
    pub host_addresses: Vec<String>,

    /// Primary IP used in resource URLs. Empty = `host_addresses[0]`.
    #[serde(default)]
    pub host_address: String,

    /// Explicit host name for DNS-SD address records. Empty = none.
    #[serde(default)]
    pub host_name: String,

    /// Convenience default for every per-API port.
    #[serde(default)]
    pub http_port: Option<u16>,

    #[serde(default)]
    pub node_port: Option<u16>,
    #[serde(default)]
    pub connection_port: Option<u16>,
    #[serde(default)]
    pub events_port: Option<u16>,
    #[serde(default)]
    pub events_ws_port: Option<u16>,
    #[serde(default)]
    pub registration_port: Option<u16>,
    #[serde(default)]
    pub query_port: Option<u16>,
    /// Accepted for settings-bag compatibility; the System API is
    /// registry-side and this node mounts nothing on it.
    #[serde(default)]
    pub system_port: Option<u16>,
    #[serde(default)]
    pub settings_port: Option<u16>,
    #[serde(default)]
    pub logging_port: Option<u16>,

    /// This node's advertised priority. 100 = "do not use".
    #[serde(default = "d_pri")]
    pub pri: u32,

    /// Inclusive priority band accepted when browsing for registries.
    #[serde(default)]
    pub highest_pri: u32,
    #[serde(default = "d_lowest_pri")]
    pub lowest_pri: u32,

    /// Manual registry override when DNS-SD is unavailable. Empty = browse.
    #[serde(default)]
    pub registry_address: String,

    /// API version used with a manually configured registry.
    #[serde(default = "d_registry_version")]
    pub registry_version: String,

    /// DNS-SD browse domain.
    #[serde(default = "d_domain")]
    pub domain: String,

    /// Seconds between registry heartbeats.
    #[serde(default = "d_heartbeat")]
    pub registration_heartbeat_interval: u64,

    /// Server-side TTL the registry is asked to apply, seconds.
    #[serde(default = "d_expiry")]
    pub registration_expiry_interval: u64,

    /// TCP accept backlog. 0 = OS default.
    #[serde(default)]
    pub listen_backlog: u32,

    /// Error log file path. Empty = stderr.
    #[serde(default)]
    pub error_log: String,

    /// Access log file path. Empty = discard.
    #[serde(default)]
    pub access_log: String,

    /// Accept schema-invalid payloads with a logged warning.
    #[serde(default)]
    pub allow_invalid_resources: bool,

    /// Also advertise `_nmos-registration._tcp` alongside
    /// `_nmos-register._tcp` when supporting versions below v1.3.
    #[serde(default = "d_true")]
    pub advertise_legacy_registration: bool,

    /// Label applied to the seeded resources.
    #[serde(default = "d_label")]
    pub label: String,
}

// ── serde default helpers ───────────────────────────────────────────

fn d_logging_level() -> i32 {
    25
}
fn d_pri() -> u32 {
    100
}
fn d_lowest_pri() -> u32 {
    99
}
fn d_registry_version() -> String {
    "v1.3".into()
}
fn d_domain() -> String {
    "local.".into()
}
fn d_heartbeat() -> u64 {
    5
}
fn d_expiry() -> u64 {
    12
}
fn d_true() -> bool {
    true
}
fn d_label() -> String {
    "nmos-node".into()
}

impl Default for Settings {
    fn default() -> Self {
        serde_json::from_value(Value::Object(Default::default()))
            .expect("empty settings object must deserialize")
    }
}

impl Settings {
    /// Parse the single command-line argument: inline JSON first, then as
    /// a path to a JSON file.
    pub fn load(arg: &str) -> Result<Settings> {
        let parsed: Settings = match serde_json::from_str(arg) {
            Ok(v) => v,
            Err(_) => {
                let raw = std::fs::read_to_string(arg)
                    .map_err(|e| Error::Config(format!("reading {arg}: {e}")))?;
                serde_json::from_str(&raw)
                    .map_err(|e| Error::Config(format!("parsing {arg}: {e}")))?
            }
        };
        Ok(parsed)
    }

    /// Fill in the derived defaults: interface addresses from the OS and
    /// the primary address from the list head.
    pub fn apply_defaults(&mut self) {
        if self.host_addresses.is_empty() {
            self.host_addresses = enumerate_host_addresses();
        }
        if self.host_addresses.is_empty() {
            self.host_addresses.push("127.0.0.1".into());
        }
        if self.host_address.is_empty() {
            self.host_address = self.host_addresses[0].clone();
        } else if !self.host_addresses.contains(&self.host_address) {
            self.host_addresses.insert(0, self.host_address.clone());
        }
    }

    // ── resolved per-API ports ──────────────────────────────────────

    pub fn node_port(&self) -> u16 {
        self.node_port.or(self.http_port).unwrap_or(DEFAULT_NODE_PORT)
    }
    pub fn connection_port(&self) -> u16 {
        self.connection_port.or(self.http_port).unwrap_or(DEFAULT_CONNECTION_PORT)
    }
    pub fn events_port(&self) -> u16 {
        self.events_port.or(self.http_port).unwrap_or(DEFAULT_EVENTS_PORT)
    }
    pub fn events_ws_port(&self) -> u16 {
        self.events_ws_port.or(self.http_port).unwrap_or(DEFAULT_EVENTS_WS_PORT)
    }
    pub fn registration_port(&self) -> u16 {
        self.registration_port.or(self.http_port).unwrap_or(DEFAULT_REGISTRATION_PORT)
    }
    pub fn query_port(&self) -> u16 {
        self.query_port.or(self.http_port).unwrap_or(DEFAULT_QUERY_PORT)
    }
    pub fn settings_port(&self) -> u16 {
        self.settings_port.or(self.http_port).unwrap_or(DEFAULT_SETTINGS_PORT)
    }
    pub fn logging_port(&self) -> u16 {
        self.logging_port.or(self.http_port).unwrap_or(DEFAULT_LOGGING_PORT)
    }

    /// The node's `href`, e.g. `http://10.0.0.1:3210/`.
    pub fn href(&self) -> String {
        format!("http://{}:{}/", self.host_address, self.node_port())
    }

    /// Manually configured registration API base, if `registry_address`
    /// is set: `http://{addr}:{port}/x-nmos/registration/{ver}`.
    pub fn registry_base(&self) -> Option<String> {
        if self.registry_address.is_empty() {
            return None;
        }
        Some(format!(
            "http://{}:{}/x-nmos/registration/{}",
            self.registry_address,
            self.registration_port(),
            self.registry_version
        ))
    }

    /// Apply a `PATCH /settings/all` body. Only whitelisted fields may be
    /// changed at runtime; anything else is a validation error. Returns
    /// the names of the fields that changed.
    pub fn patch(&mut self, body: &Value) -> Result<Vec<String>> {
        let obj = body
            .as_object()
            .ok_or_else(|| Error::Validation("settings patch must be an object".into()))?;

        let mut changed = Vec::new();
        for (key, value) in obj {
            match key.as_str() {
                "logging_level" => {
                    let level = value
                        .as_i64()
                        .ok_or_else(|| Error::Validation("logging_level must be an integer".into()))?;
                    self.logging_level = level as i32;
                    changed.push(key.clone());
                }
                "registration_heartbeat_interval" => {
                    let secs = value.as_u64().ok_or_else(|| {
                        Error::Validation("registration_heartbeat_interval must be a non-negative integer".into())
                    })?;
                    self.registration_heartbeat_interval = secs;
                    changed.push(key.clone());
                }
                other => {
                    return Err(Error::Validation(format!(
                        "field not patchable at runtime: {other}"
                    )))
                }
            }
        }
        Ok(changed)
    }

    /// Map the NMOS numeric severity floor onto a tracing level filter.
    pub fn tracing_level(&self) -> tracing::level_filters::LevelFilter {
        use tracing::level_filters::LevelFilter;
        match self.logging_level {
            l if l > 30 => LevelFilter::ERROR,
            l if l > 10 => LevelFilter::WARN,
            l if l > -10 => LevelFilter::INFO,
            l if l > -40 => LevelFilter::DEBUG,
            _ => LevelFilter::TRACE,
        }
    }
}

/// Enumerate non-loopback IPv4 addresses, loopback as a last resort.
fn enumerate_host_addresses() -> Vec<String> {
    let Ok(ifaces) = if_addrs::get_if_addrs() else {
        return Vec::new();
    };
    ifaces
        .into_iter()
        .filter(|i| !i.is_loopback())
        .filter_map(|i| match i.addr {
            if_addrs::IfAddr::V4(v4) => Some(v4.ip.to_string()),
            if_addrs::IfAddr::V6(_) => None,
        })
        .collect()
}
