use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionStatus {
    Connected,
    Disconnected,
}

/// Messages originated by the bridge itself. Upstream events are relayed verbatim
/// and never pass through this type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BridgeEvent {
    Connection {
        status: ConnectionStatus,
    },
    Image {
        image: String,
        prompt: String,
        #[serde(rename = "savedPath", skip_serializing_if = "Option::is_none", default)]
        saved_path: Option<String>,
        timestamp: i64,
    },
    Refresh {
        timestamp: i64,
    },
    SettingsUpdated {
        settings: serde_json::Value,
    },
}

/// Messages a UI client may send over its subscriber connection.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    Image {
        image: String,
        #[serde(default)]
        prompt: Option<String>,
    },
}
