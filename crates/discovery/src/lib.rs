//! DNS-SD discovery for NMOS services.
//!
//! The TXT record schema and the resolve/rank algorithm live here as pure
//! code; the mDNS daemon sits behind the narrow [`ServiceBrowse`] and
//! [`ServiceAdvertise`] seams so tests can substitute fakes.

pub mod advertise;
pub mod resolve;
pub mod service;
pub mod txt;

pub use advertise::{MdnsAdvertiser, ServiceAdvertise};
pub use resolve::{resolve_service, DiscoveredInstance, MdnsBrowser, ResolveOptions, ServiceBrowse};
pub use service::ServiceType;
pub use txt::{ApiResourceVers, TxtRecords};
