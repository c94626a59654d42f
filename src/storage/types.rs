use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One persisted artifact as reported to the UI.
///
/// `path` is the URL path under which the HTTP server exposes the file, and `time`
/// is the modification time in epoch milliseconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArtifactInfo {
    pub name: String,
    pub path: String,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub time: DateTime<Utc>,
}
