//! Client image uploads forwarded to the engine.
//!
//! An upload is staged as `<temp_dir>/<connection id>.png`, streamed to the
//! engine's `/upload/image` endpoint as multipart form data, and the staged file is
//! removed on every exit path before [`UploadPipeline::upload`] returns.

pub mod pipeline;
pub mod types;

pub use pipeline::UploadPipeline;
pub use types::{UploadRequest, UploadResult};
