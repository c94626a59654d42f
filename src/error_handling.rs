//! Error types shared by every subsystem of the bridge.

pub mod types;
