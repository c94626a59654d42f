//! Transparent HTTP forwarding to the engine.
//!
//! Everything under `/comfyui/` is replayed against the engine's HTTP API with the
//! `host` header rewritten, and the response is streamed back with permissive
//! cross-origin headers added. Preflight requests are answered locally.

pub mod gateway;

pub use gateway::ProxyGateway;
