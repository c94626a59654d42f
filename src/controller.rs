//! Application wiring: builds every component from the [`Config`](crate::configuration::Config),
//! starts the upstream bridge and both listeners, and stops them on shutdown.

pub mod controller_handler;

pub use controller_handler::{Controller, RunningBridge};
