//! Live set of downstream subscriber connections.
//!
//! Every broadcast in the bridge goes through [`ClientRegistry`]; call sites never
//! touch the WebSocket transport directly. Each subscriber is represented by the
//! sending half of an unbounded channel that its socket task drains, so a slow
//! client never blocks a broadcast and messages reach a given client in the order
//! they were broadcast.

pub mod registry;
pub mod types;

pub use registry::{ClientId, ClientRegistry, Outbound};
pub use types::{BridgeEvent, ClientMessage, ConnectionStatus};
