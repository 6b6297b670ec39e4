//! HTTP/WebSocket facade and long-running tasks for the NMOS node.

pub mod activation;
pub mod advertiser;
pub mod api;
pub mod bootstrap;
pub mod error;
pub mod locator;
pub mod state;
pub mod sweeper;
pub mod validate;
pub mod ws;

pub use error::ApiError;
pub use state::AppState;
