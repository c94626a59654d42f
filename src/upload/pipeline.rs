use std::path::{Path, PathBuf};

use chrono::Utc;
use log::{debug, error, info, warn};
use reqwest::multipart::{Form, Part};
use serde_json::Value;
use tokio_util::io::ReaderStream;

use super::types::{EngineUploadReply, UploadRequest, UploadResult};
use crate::client_registry::{BridgeEvent, ClientRegistry};
use crate::configuration::types::UpstreamEndpoint;
use crate::error_handling::types::{StorageError, UploadError};
use crate::storage::payload::decode_image_payload;

/// Staged copy of an upload. Removed explicitly once the engine call finished, or
/// on drop if the upload future panicked or was cancelled first.
struct StagedUpload {
    path: PathBuf,
    armed: bool,
}

impl StagedUpload {
    async fn write(dir: &Path, connection_id: &str, bytes: &[u8]) -> Result<Self, StorageError> {
        tokio::fs::create_dir_all(dir).await.map_err(|e| {
            error!("Failed to create temp dir {}: {}", dir.display(), e);
            StorageError::DirectoryCreationFailed(e)
        })?;
        let staged = StagedUpload {
            path: dir.join(format!("{}.png", connection_id)),
            armed: true,
        };
        tokio::fs::write(&staged.path, bytes).await.map_err(|e| {
            error!("Failed to stage upload {}: {}", staged.path.display(), e);
            StorageError::WriteFailed(e)
        })?;
        debug!("Staged {} byte(s) at {}", bytes.len(), staged.path.display());
        Ok(staged)
    }

    async fn remove(mut self) {
        self.armed = false;
        match tokio::fs::remove_file(&self.path).await {
            Ok(()) => debug!("Removed staged upload {}", self.path.display()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!(
                "Leaving staged upload {} behind: {}",
                self.path.display(),
                StorageError::DeleteFailed(e)
            ),
        }
    }
}

impl Drop for StagedUpload {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        // Only reached when the upload future was cancelled or panicked; a single
        // blocking unlink is acceptable there.
        if let Err(e) = std::fs::remove_file(&self.path) {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!("Failed to remove staged upload {}: {}", self.path.display(), e);
            }
        }
    }
}

/// Ids become file names, so only a conservative character set is accepted.
fn validate_connection_id(connection_id: &str) -> Result<(), UploadError> {
    let well_formed = !connection_id.is_empty()
        && connection_id.len() <= 128
        && !connection_id.starts_with('.')
        && connection_id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));
    if well_formed {
        Ok(())
    } else {
        Err(UploadError::Validation(format!(
            "Invalid connection id {:?}",
            connection_id
        )))
    }
}

fn unreachable_error(err: reqwest::Error) -> UploadError {
    UploadError::Upstream {
        status: None,
        details: Value::String(err.to_string()),
    }
}

pub struct UploadPipeline {
    temp_dir: PathBuf,
    endpoint: UpstreamEndpoint,
    client: reqwest::Client,
    registry: ClientRegistry,
}

impl UploadPipeline {
    pub fn new(
        temp_dir: impl Into<PathBuf>,
        endpoint: UpstreamEndpoint,
        client: reqwest::Client,
        registry: ClientRegistry,
    ) -> Self {
        Self {
            temp_dir: temp_dir.into(),
            endpoint,
            client,
            registry,
        }
    }

    pub fn staged_path(&self, connection_id: &str) -> PathBuf {
        self.temp_dir.join(format!("{}.png", connection_id))
    }

    /// Stages, forwards and cleans up one client image.
    ///
    /// Input is validated before anything is written. On success every subscriber
    /// receives an `image` event carrying the original payload.
    pub async fn upload(
        &self,
        connection_id: &str,
        request: UploadRequest,
    ) -> Result<UploadResult, UploadError> {
        let image = match request.image {
            Some(image) if !image.trim().is_empty() => image,
            _ => {
                return Err(UploadError::Validation(
                    "No image data provided".to_string(),
                ))
            }
        };
        validate_connection_id(connection_id)?;
        let bytes =
            decode_image_payload(&image).map_err(|e| UploadError::Validation(e.to_string()))?;

        let staged = StagedUpload::write(&self.temp_dir, connection_id, &bytes).await?;
        let outcome = self.submit(&staged, connection_id).await;
        staged.remove().await;

        let reference = outcome.map_err(|e| {
            error!("Upload {} failed: {}", connection_id, e);
            e
        })?;
        info!(
            "Uploaded image for {} (node {:?}) as {}",
            connection_id,
            request.node_id,
            reference
        );

        self.registry
            .broadcast_event(&BridgeEvent::Image {
                image: image.clone(),
                prompt: String::new(),
                saved_path: None,
                timestamp: Utc::now().timestamp_millis(),
            })
            .await;

        Ok(UploadResult {
            success: true,
            connection_id: connection_id.to_string(),
            image_path: reference,
            preview: image,
        })
    }

    async fn submit(&self, staged: &StagedUpload, connection_id: &str) -> Result<String, UploadError> {
        let file = tokio::fs::File::open(&staged.path)
            .await
            .map_err(StorageError::ReadFailed)?;
        let length = file
            .metadata()
            .await
            .map_err(StorageError::ReadFailed)?
            .len();

        let body = reqwest::Body::wrap_stream(ReaderStream::new(file));
        let part = Part::stream_with_length(body, length)
            .file_name(format!("{}.png", connection_id))
            .mime_str("image/png")
            .map_err(unreachable_error)?;
        let form = Form::new().part("image", part);

        let response = self
            .client
            .post(self.endpoint.upload_url())
            .multipart(form)
            .send()
            .await
            .map_err(unreachable_error)?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            let details = serde_json::from_str(&text).unwrap_or(Value::String(text));
            return Err(UploadError::Upstream {
                status: Some(status.as_u16()),
                details,
            });
        }

        let reply: EngineUploadReply =
            response
                .json()
                .await
                .map_err(|e| UploadError::Upstream {
                    status: Some(status.as_u16()),
                    details: Value::String(format!("Unexpected upload reply: {}", e)),
                })?;
        debug!(
            "Engine stored {} in subfolder {:?}",
            reply.name, reply.subfolder
        );
        Ok(reply.name)
    }
}
