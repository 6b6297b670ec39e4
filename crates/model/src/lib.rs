//! The node's in-memory resource graph: typed resources, the thread-safe
//! store with change notification, and builders for the resources a node
//! publishes.

pub mod builders;
pub mod resource;
pub mod store;
pub mod tai;

pub use resource::{Resource, ResourceType, HEALTH_FOREVER};
pub use store::{ApiResourceVersions, ResourceStore};
pub use tai::{Tai, VersionClock};
