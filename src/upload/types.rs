use serde::{Deserialize, Serialize};

/// Body of `POST /api/comfyui/upload/:connectionId`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadRequest {
    #[serde(default)]
    pub image: Option<String>,
    /// Graph node the image is destined for; carried for logging only.
    #[serde(default)]
    pub node_id: Option<serde_json::Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadResult {
    pub success: bool,
    pub connection_id: String,
    /// Name the engine assigned to the stored image.
    pub image_path: String,
    pub preview: String,
}

/// Reply of the engine's upload endpoint.
#[derive(Debug, Deserialize)]
pub(crate) struct EngineUploadReply {
    pub name: String,
    #[serde(default)]
    pub subfolder: String,
}
