//! Storage subsystem
//!
//! Persistence of generated images under a bounded-retention policy.
//!
//! Components:
//! - `artifact_store`: writes captured images and sweeps the directory down to the cap.
//! - `payload`: decoding of data-URI / base64 image payloads.
//! - `types`: listing entries returned to the UI.

pub mod artifact_store;
pub mod payload;
pub mod types;

pub use artifact_store::ArtifactStore;
pub use types::ArtifactInfo;
