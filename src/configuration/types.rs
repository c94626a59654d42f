use serde::{Deserialize, Serialize};

/// Location of the generation engine, shared by the event stream and the HTTP API.
#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
pub struct UpstreamEndpoint {
    pub host: String,
    pub port: u16,
}

impl Default for UpstreamEndpoint {
    fn default() -> Self {
        Self {
            host: String::from("127.0.0.1"),
            port: 8188,
        }
    }
}

impl UpstreamEndpoint {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    /// `host:port`, used to rewrite the `Host` header of proxied requests.
    pub fn authority(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn http_base(&self) -> String {
        format!("http://{}", self.authority())
    }

    pub fn ws_url(&self) -> String {
        format!("ws://{}/ws", self.authority())
    }

    pub fn upload_url(&self) -> String {
        format!("{}/upload/image", self.http_base())
    }

    pub fn prompt_url(&self) -> String {
        format!("{}/prompt", self.http_base())
    }
}
