//! The event/tally engine: subscriptions, grains, and per-connection
//! fan-out with bounded buffers.

pub mod engine;
pub mod grain;
pub mod protocol;

pub use engine::{SubscriptionStore, HIGH_WATER_MARK};
pub use grain::{EventTimestamp, Grain};
pub use protocol::Command;
