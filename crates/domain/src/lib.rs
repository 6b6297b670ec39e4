//! Shared vocabulary for the NMOS node: settings, errors, identifiers,
//! API versions, and IS-07 event types.
//!
//! This crate is the **single source of truth** for the types every other
//! crate speaks.  It performs no I/O beyond interface enumeration for
//! settings defaults.

pub mod api_version;
pub mod error;
pub mod event_type;
pub mod id;
pub mod settings;

pub use api_version::ApiVersion;
pub use error::{Error, Result};
pub use event_type::EventType;
pub use id::Id;
pub use settings::Settings;
