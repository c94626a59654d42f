//! HTTP API and subscriber WebSocket endpoint.
//!
//! - `routes`: one warp filter per HTTP route, plus the rejection handler.
//! - `subscriber`: the per-connection task behind the subscriber endpoint.
//! - `web_server`: composes the filters and binds both listeners.

pub mod routes;
pub mod subscriber;
pub mod types;
pub mod web_server;

pub use web_server::WebServer;
