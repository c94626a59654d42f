use super::types::UpstreamEndpoint;
use crate::error_handling::types::ConfigError;
use clap::Parser;
use log::{debug, info};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Application configuration structure that defines all runtime parameters.
///
/// The bridge is usually started without any file, in which case every field takes
/// its default. A TOML file may set any subset of the fields, and the command line
/// (see [`CliArgs`]) overrides the most frequently changed ones last.
///
/// # Fields Overview
///
/// - `bind_address`, `http_port`, `ws_port`: where the HTTP API and the subscriber
///   WebSocket endpoint listen
/// - `upstream_host`, `upstream_port`: the generation engine, reached both as an event
///   stream client and as an HTTP client
/// - `images_dir`: artifact directory, capped at `retention_cap` files
/// - `temp_dir`: staging area for uploads, emptied after every upload
/// - `reconnect_delay_secs`: fixed pause between upstream connection attempts
/// - `settle_delay_ms`: pause between an "executed" event and the `refresh` hint
/// - `max_body_bytes`: request body limit of the JSON routes
/// - `client_id`: identifier sent with every submitted prompt
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub bind_address: String,
    pub http_port: u16,
    pub ws_port: u16,
    pub upstream_host: String,
    pub upstream_port: u16,
    pub images_dir: PathBuf,
    pub temp_dir: PathBuf,
    pub retention_cap: usize,
    pub reconnect_delay_secs: u64,
    pub settle_delay_ms: u64,
    pub max_body_bytes: u64,
    pub client_id: String,
}

impl Default for Config {
    fn default() -> Self {
        let upstream = UpstreamEndpoint::default();
        Self {
            bind_address: String::from("0.0.0.0"),
            http_port: 3005,
            ws_port: 3001,
            upstream_host: upstream.host,
            upstream_port: upstream.port,
            images_dir: PathBuf::from("public/saved_images"),
            temp_dir: PathBuf::from("temp"),
            retention_cap: 20,
            reconnect_delay_secs: 5,
            settle_delay_ms: 1000,
            max_body_bytes: 50 * 1024 * 1024,
            client_id: String::from("comfyui-web"),
        }
    }
}

/// Command-line interface of the bridge binary.
///
/// Every override can also be supplied through its `COMFY_BRIDGE_*` environment
/// variable.
#[derive(Parser, Debug, Clone, Default)]
#[command(name = "comfy-bridge")]
#[command(about = "Real-time bridge between UI clients and a ComfyUI engine")]
pub struct CliArgs {
    /// Optional TOML configuration file
    pub config_file: Option<PathBuf>,

    #[arg(long, env = "COMFY_BRIDGE_UPSTREAM_HOST")]
    pub upstream_host: Option<String>,

    #[arg(long, env = "COMFY_BRIDGE_UPSTREAM_PORT")]
    pub upstream_port: Option<u16>,

    #[arg(long, env = "COMFY_BRIDGE_HTTP_PORT")]
    pub http_port: Option<u16>,

    #[arg(long, env = "COMFY_BRIDGE_WS_PORT")]
    pub ws_port: Option<u16>,

    #[arg(long, env = "COMFY_BRIDGE_IMAGES_DIR")]
    pub images_dir: Option<PathBuf>,

    #[arg(long, env = "COMFY_BRIDGE_RETENTION_CAP")]
    pub retention_cap: Option<usize>,
}

impl Config {
    /// Reads a TOML file. Missing keys keep their default value.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path)?;
        let config: Config =
            toml::from_str(&raw).map_err(|e| ConfigError::TomlError(e.to_string()))?;
        debug!("Parsed configuration from {}", path.display());
        Ok(config)
    }

    /// Builds the effective configuration: defaults, then the file, then CLI overrides.
    pub fn load(args: &CliArgs) -> Result<Self, ConfigError> {
        let mut config = match &args.config_file {
            Some(path) => {
                info!("Loading configuration from {}", path.display());
                Config::from_file(path)?
            }
            None => Config::default(),
        };
        config.apply_overrides(args);
        config.validate()?;
        Ok(config)
    }

    fn apply_overrides(&mut self, args: &CliArgs) {
        if let Some(host) = &args.upstream_host {
            self.upstream_host = host.clone();
        }
        if let Some(port) = args.upstream_port {
            self.upstream_port = port;
        }
        if let Some(port) = args.http_port {
            self.http_port = port;
        }
        if let Some(port) = args.ws_port {
            self.ws_port = port;
        }
        if let Some(dir) = &args.images_dir {
            self.images_dir = dir.clone();
        }
        if let Some(cap) = args.retention_cap {
            self.retention_cap = cap;
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.retention_cap == 0 {
            return Err(ConfigError::InvalidValue(
                "retention_cap must be at least 1".to_string(),
            ));
        }
        if self.upstream_host.trim().is_empty() {
            return Err(ConfigError::InvalidValue(
                "upstream_host must not be empty".to_string(),
            ));
        }
        if self.http_port == self.ws_port && self.http_port != 0 {
            return Err(ConfigError::InvalidValue(format!(
                "http_port and ws_port are both {}",
                self.http_port
            )));
        }
        Ok(())
    }

    pub fn upstream(&self) -> UpstreamEndpoint {
        UpstreamEndpoint::new(self.upstream_host.clone(), self.upstream_port)
    }

    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_secs(self.reconnect_delay_secs)
    }

    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn args_under_test(extra: &[&str]) -> Result<CliArgs, clap::Error> {
        let mut argv = vec!["comfy-bridge"];
        argv.extend_from_slice(extra);
        CliArgs::try_parse_from(argv)
    }

    #[test]
    fn test_defaults_match_original_ports() {
        let config = Config::default();
        assert_eq!(config.http_port, 3005);
        assert_eq!(config.ws_port, 3001);
        assert_eq!(config.retention_cap, 20);
        assert_eq!(config.reconnect_delay(), Duration::from_secs(5));
        assert_eq!(config.settle_delay(), Duration::from_secs(1));
        assert_eq!(config.upstream().authority(), "127.0.0.1:8188");
    }

    #[test]
    fn test_from_file_keeps_defaults_for_missing_keys() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "upstream_port = 9188\nretention_cap = 5").unwrap();

        let config = Config::from_file(file.path()).unwrap();
        assert_eq!(config.upstream_port, 9188);
        assert_eq!(config.retention_cap, 5);
        assert_eq!(config.http_port, 3005);
    }

    #[test]
    fn test_example_file_matches_defaults() {
        let path = Path::new(env!("CARGO_MANIFEST_DIR")).join("config.example.toml");
        assert_eq!(Config::from_file(&path).unwrap(), Config::default());
    }

    #[test]
    fn test_from_file_rejects_bad_toml() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "retention_cap = \"twenty\"").unwrap();

        let err = Config::from_file(file.path()).unwrap_err();
        assert!(matches!(err, ConfigError::TomlError(_)));
    }

    #[test]
    #[serial]
    fn test_cli_overrides_file() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "upstream_host = \"engine.local\"\nhttp_port = 4000").unwrap();
        let path = file.path().to_str().unwrap().to_string();

        let args = args_under_test(&[&path, "--http-port", "4100", "--retention-cap", "3"])
            .unwrap_or_else(|e| panic!("{}", e));
        let config = Config::load(&args).unwrap();

        assert_eq!(config.upstream_host, "engine.local");
        assert_eq!(config.http_port, 4100);
        assert_eq!(config.retention_cap, 3);
    }

    #[test]
    #[serial]
    fn test_env_override() {
        std::env::set_var("COMFY_BRIDGE_UPSTREAM_PORT", "8999");
        let args = args_under_test(&[]).unwrap_or_else(|e| panic!("{}", e));
        std::env::remove_var("COMFY_BRIDGE_UPSTREAM_PORT");

        let config = Config::load(&args).unwrap();
        assert_eq!(config.upstream_port, 8999);
    }

    #[test]
    fn test_validate_rejects_zero_cap_and_port_clash() {
        let zero_cap = Config {
            retention_cap: 0,
            ..Config::default()
        };
        assert!(matches!(zero_cap.validate(), Err(ConfigError::InvalidValue(_))));

        let clash = Config {
            ws_port: 3005,
            ..Config::default()
        };
        assert!(matches!(clash.validate(), Err(ConfigError::InvalidValue(_))));
    }
}
