use std::net::SocketAddr;

use serde::Serialize;
use serde_json::Value;
use tokio::task::JoinHandle;

/// Error body of every JSON route.
#[derive(Debug, Serialize)]
pub struct ApiError {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
}

impl ApiError {
    pub fn new(error: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            details: None,
        }
    }

    pub fn with_details(error: impl Into<String>, details: impl Into<Value>) -> Self {
        Self {
            error: error.into(),
            details: Some(details.into()),
        }
    }
}

/// Rejection raised when a streamed body exceeds the configured limit.
#[derive(Debug)]
pub struct BodyTooLarge {
    pub limit: u64,
}

impl warp::reject::Reject for BodyTooLarge {}

#[derive(Debug)]
pub struct BodyReadFailed {
    pub reason: String,
}

impl warp::reject::Reject for BodyReadFailed {}

#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub status: &'static str,
}

/// Both listeners after a successful bind.
pub struct RunningServers {
    pub http_addr: SocketAddr,
    pub ws_addr: SocketAddr,
    pub(crate) tasks: Vec<JoinHandle<()>>,
}

impl RunningServers {
    /// Resolves once both servers finished their graceful shutdown.
    pub async fn wait(self) {
        for task in self.tasks {
            let _ = task.await;
        }
    }
}
