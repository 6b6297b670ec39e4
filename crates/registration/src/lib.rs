//! Registered operation: keep this node registered and healthy with an
//! upstream registry.
//!
//! A single state machine per node lifetime walks
//! DISCOVERING → REGISTERING → HEARTBEATING, falling back to DISCOVERING
//! (with the failed registry on a cooldown blacklist) after repeated
//! failures, and UNREGISTERING on controlled shutdown.

pub mod backoff;
pub mod behaviour;
pub mod client;

pub use backoff::DiscoveryBackoff;
pub use behaviour::{NodeBehaviour, Phase, RegistryLocator, StaticLocator};
pub use client::RegistryClient;
