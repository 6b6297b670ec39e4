//! Control commands peers may send over an events WebSocket.
//!
//! Both the WS handler and the tests deserialize these types; nobody
//! builds the JSON by hand.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "command", rename_all = "snake_case")]
pub enum Command {
    /// Connection liveness probe; answered with a health message echoing
    /// the peer's timestamp.
    Health { timestamp: Option<String> },
    /// Replace this connection's subscribed source set.
    Subscription { sources: Vec<String> },
}

/// The response to a health command.
pub fn health_response(timestamp: Option<&str>) -> Value {
    json!({
        "message_type": "health",
        "timestamp": timestamp.unwrap_or_default()
    })
}
