//! # Upstream Bridge Module
//!
//! Owns the single event-stream connection to the generation engine and relays
//! every engine event to the subscribers held by the
//! [`ClientRegistry`](crate::client_registry::ClientRegistry).
//!
//! ## State machine
//!
//! ```text
//!   ┌──────────────┐  attempt   ┌────────────┐  handshake ok  ┌───────────┐
//!   │ Disconnected │──────────▶│ Connecting │───────────────▶│ Connected │
//!   └──────────────┘            └────────────┘                └───────────┘
//!          ▲   ▲  fixed delay         │ failure                     │ close / error
//!          │   └──────────────────────┘                             │
//!          └────────────────────────────────────────────────────────┘
//! ```
//!
//! There is no terminal state: the bridge retries forever on a fixed interval until
//! the shutdown token is cancelled.

pub mod bridge;
pub mod types;

pub use bridge::{BridgeHandle, UpstreamBridge};
pub use types::ConnectionState;
