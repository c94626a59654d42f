use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

/// `true` for an engine event reporting that a node produced output.
pub fn is_executed_with_output(event: &serde_json::Value) -> bool {
    event.get("type").and_then(|t| t.as_str()) == Some("executed")
        && event
            .get("data")
            .and_then(|d| d.get("output"))
            .is_some_and(|o| !o.is_null())
}
