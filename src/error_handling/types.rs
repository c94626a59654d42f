use std::fmt;

#[derive(Debug)]
pub enum ConfigError {
    IoError(std::io::Error),
    TomlError(String),
    InvalidValue(String),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::IoError(e) => write!(f, "IO error: {}", e),
            ConfigError::TomlError(e) => write!(f, "TOML parsing error: {}", e),
            ConfigError::InvalidValue(e) => write!(f, "Invalid configuration value: {}", e),
        }
    }
}

impl std::error::Error for ConfigError {}

impl From<std::io::Error> for ConfigError {
    fn from(err: std::io::Error) -> Self {
        ConfigError::IoError(err)
    }
}

/// Filesystem failures of the artifact store and the upload staging area.
#[derive(Debug)]
pub enum StorageError {
    DirectoryCreationFailed(std::io::Error),
    WriteFailed(std::io::Error),
    ReadFailed(std::io::Error),
    DeleteFailed(std::io::Error),
    InvalidPayload(String),
}

impl fmt::Display for StorageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StorageError::DirectoryCreationFailed(e) => {
                write!(f, "Storage directory creation failed: {}", e)
            }
            StorageError::WriteFailed(e) => write!(f, "Storage write failed: {}", e),
            StorageError::ReadFailed(e) => write!(f, "Storage read failed: {}", e),
            StorageError::DeleteFailed(e) => write!(f, "Storage delete failed: {}", e),
            StorageError::InvalidPayload(e) => write!(f, "Invalid image payload: {}", e),
        }
    }
}

impl std::error::Error for StorageError {}

#[derive(Debug)]
pub enum UploadError {
    /// Caller input rejected before any filesystem or upstream side effect.
    Validation(String),
    /// The engine refused the upload or could not be reached.
    Upstream {
        status: Option<u16>,
        details: serde_json::Value,
    },
    Storage(StorageError),
}

impl fmt::Display for UploadError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UploadError::Validation(e) => write!(f, "Upload validation error: {}", e),
            UploadError::Upstream {
                status: Some(code),
                details,
            } => write!(f, "Upstream rejected upload ({}): {}", code, details),
            UploadError::Upstream {
                status: None,
                details,
            } => write!(f, "Upstream unreachable: {}", details),
            UploadError::Storage(e) => write!(f, "Upload storage error: {}", e),
        }
    }
}

impl std::error::Error for UploadError {}

impl From<StorageError> for UploadError {
    fn from(err: StorageError) -> Self {
        UploadError::Storage(err)
    }
}

#[derive(Debug)]
pub enum ProxyError {
    Transport(reqwest::Error),
    InvalidRequest(String),
}

impl fmt::Display for ProxyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProxyError::Transport(e) => write!(f, "Proxy transport error: {}", e),
            ProxyError::InvalidRequest(e) => write!(f, "Proxy request error: {}", e),
        }
    }
}

impl std::error::Error for ProxyError {}

impl From<reqwest::Error> for ProxyError {
    fn from(err: reqwest::Error) -> Self {
        ProxyError::Transport(err)
    }
}

#[derive(Debug)]
pub enum BridgeError {
    ConnectFailed(tokio_tungstenite::tungstenite::Error),
    TransportFailed(tokio_tungstenite::tungstenite::Error),
}

impl fmt::Display for BridgeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BridgeError::ConnectFailed(e) => write!(f, "Upstream connection failed: {}", e),
            BridgeError::TransportFailed(e) => write!(f, "Upstream transport error: {}", e),
        }
    }
}

impl std::error::Error for BridgeError {}

#[derive(Debug)]
pub enum WebError {
    BindFailed(String),
}

impl fmt::Display for WebError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WebError::BindFailed(e) => write!(f, "Web server bind failed: {}", e),
        }
    }
}

impl std::error::Error for WebError {}

#[derive(Debug)]
pub enum ControllerError {
    ConfigurationError(ConfigError),
    StorageError(StorageError),
    WebError(WebError),
    InitializationFailed(String),
}

impl fmt::Display for ControllerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ControllerError::ConfigurationError(e) => write!(f, "Configuration error: {}", e),
            ControllerError::StorageError(e) => write!(f, "Storage error: {}", e),
            ControllerError::WebError(e) => write!(f, "Web error: {}", e),
            ControllerError::InitializationFailed(e) => write!(f, "Initialization failed: {}", e),
        }
    }
}

impl std::error::Error for ControllerError {}

impl From<ConfigError> for ControllerError {
    fn from(err: ConfigError) -> Self {
        ControllerError::ConfigurationError(err)
    }
}

impl From<WebError> for ControllerError {
    fn from(err: WebError) -> Self {
        ControllerError::WebError(err)
    }
}
