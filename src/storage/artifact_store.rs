use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::SystemTime;

use chrono::{DateTime, Utc};
use log::{debug, error, info, warn};
use regex::Regex;

use super::payload::decode_image_payload;
use super::types::ArtifactInfo;
use crate::error_handling::types::StorageError;

/// URL prefix under which the web server exposes the images directory.
pub const ARTIFACT_URL_PREFIX: &str = "/saved_images";

const ARTIFACT_PATTERN: &str = r"^generated_.+\.png$";

struct ArtifactEntry {
    name: String,
    path: PathBuf,
    modified: SystemTime,
}

/// Bounded store of generated images.
///
/// Every capture writes `generated_<timestamp>.png` and then sweeps the directory
/// synchronously, so after a successful capture at most `retention_cap` files
/// matching the naming pattern remain. Files that do not match the pattern are
/// never listed nor deleted.
pub struct ArtifactStore {
    dir: PathBuf,
    retention_cap: usize,
    pattern: Regex,
    /// Last timestamp handed out, in epoch milliseconds.
    last_stamp: Mutex<i64>,
}

impl ArtifactStore {
    pub fn new<P: AsRef<Path>>(dir: P, retention_cap: usize) -> Result<Self, StorageError> {
        let pattern = Regex::new(ARTIFACT_PATTERN)
            .map_err(|e| StorageError::InvalidPayload(format!("artifact pattern: {}", e)))?;
        let dir = dir.as_ref().to_path_buf();
        info!(
            "ArtifactStore at {} (retention cap {})",
            dir.display(),
            retention_cap
        );
        Ok(Self {
            dir,
            retention_cap,
            pattern,
            last_stamp: Mutex::new(i64::MIN),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Decodes `payload`, writes it as a new artifact and sweeps the directory.
    ///
    /// Returns the file name of the created artifact. A failing sweep is logged and
    /// does not fail the capture.
    pub async fn capture(&self, payload: &str, label: &str) -> Result<String, StorageError> {
        let bytes = decode_image_payload(payload)?;

        tokio::fs::create_dir_all(&self.dir).await.map_err(|e| {
            error!("Failed to create images dir {}: {}", self.dir.display(), e);
            StorageError::DirectoryCreationFailed(e)
        })?;

        let name = self.next_file_name();
        let path = self.dir.join(&name);
        tokio::fs::write(&path, &bytes).await.map_err(|e| {
            error!("Failed to write artifact {}: {}", path.display(), e);
            StorageError::WriteFailed(e)
        })?;
        info!(
            "Captured artifact {} ({} bytes, label {:?})",
            name,
            bytes.len(),
            label
        );

        if let Err(e) = self.sweep().await {
            warn!("Retention sweep after capture of {} failed: {}", name, e);
        }

        Ok(name)
    }

    /// Deletes every matching artifact beyond the `retention_cap` most recently
    /// modified ones. Returns how many files were removed.
    pub async fn sweep(&self) -> Result<usize, StorageError> {
        let entries = self.collect_entries().await?;
        let mut removed = 0usize;
        for entry in entries.iter().skip(self.retention_cap) {
            match tokio::fs::remove_file(&entry.path).await {
                Ok(()) => {
                    info!("Removed old artifact {}", entry.name);
                    removed += 1;
                }
                Err(e) => {
                    warn!("Skipping artifact {}: {}", entry.name, StorageError::DeleteFailed(e));
                }
            }
        }
        debug!(
            "Sweep kept {} artifact(s), removed {}",
            entries.len() - removed,
            removed
        );
        Ok(removed)
    }

    /// All current artifacts, most recently modified first.
    pub async fn list(&self) -> Result<Vec<ArtifactInfo>, StorageError> {
        let entries = self.collect_entries().await?;
        Ok(entries
            .into_iter()
            .map(|entry| ArtifactInfo {
                path: format!("{}/{}", ARTIFACT_URL_PREFIX, entry.name),
                name: entry.name,
                time: DateTime::<Utc>::from(entry.modified),
            })
            .collect())
    }

    pub fn url_path(name: &str) -> String {
        format!("{}/{}", ARTIFACT_URL_PREFIX, name)
    }

    async fn collect_entries(&self) -> Result<Vec<ArtifactEntry>, StorageError> {
        let mut dir = match tokio::fs::read_dir(&self.dir).await {
            Ok(dir) => dir,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => {
                error!("Failed to read images dir {}: {}", self.dir.display(), e);
                return Err(StorageError::ReadFailed(e));
            }
        };

        let mut entries = Vec::new();
        while let Some(entry) = dir.next_entry().await.map_err(StorageError::ReadFailed)? {
            let name = entry.file_name().to_string_lossy().into_owned();
            if !self.pattern.is_match(&name) {
                continue;
            }
            // The file may vanish between the listing and the stat.
            let modified = match entry.metadata().await.and_then(|m| m.modified()) {
                Ok(t) => t,
                Err(e) => {
                    warn!("Skipping artifact {}: {}", name, e);
                    continue;
                }
            };
            entries.push(ArtifactEntry {
                name,
                path: entry.path(),
                modified,
            });
        }

        entries.sort_by(|a, b| {
            b.modified
                .cmp(&a.modified)
                .then_with(|| b.name.cmp(&a.name))
        });
        Ok(entries)
    }

    fn next_file_name(&self) -> String {
        let mut millis = Utc::now().timestamp_millis();
        if let Ok(mut last) = self.last_stamp.lock() {
            if millis <= *last {
                millis = *last + 1;
            }
            *last = millis;
        }
        let stamp = DateTime::<Utc>::from_timestamp_millis(millis).unwrap_or_else(Utc::now);
        format!("generated_{}.png", stamp.format("%Y-%m-%dT%H-%M-%S-%3fZ"))
    }
}
