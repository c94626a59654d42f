use std::sync::Arc;

use log::{error, info};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::client_registry::ClientRegistry;
use crate::configuration::Config;
use crate::error_handling::types::ControllerError;
use crate::proxy::ProxyGateway;
use crate::storage::ArtifactStore;
use crate::upload::UploadPipeline;
use crate::upstream::{BridgeHandle, UpstreamBridge};
use crate::web_interface::types::RunningServers;
use crate::web_interface::WebServer;

/// Owner of the application's lifetime.
///
/// # Fields Overview
///
/// - `config`: the validated runtime configuration
/// - `shutdown`: cancelled once to stop the bridge loop and both servers
pub struct Controller {
    pub config: Config,
    shutdown: CancellationToken,
}

/// Everything [`Controller::start`] spawned.
pub struct RunningBridge {
    pub servers: RunningServers,
    pub bridge: BridgeHandle,
    bridge_task: JoinHandle<()>,
}

impl RunningBridge {
    pub async fn wait(self) {
        self.servers.wait().await;
        if let Err(e) = self.bridge_task.await {
            error!("Upstream bridge task failed: {:?}", e);
        }
    }
}

impl Controller {
    pub fn new(config: Config) -> Result<Self, ControllerError> {
        config.validate()?;
        Ok(Self {
            config,
            shutdown: CancellationToken::new(),
        })
    }

    /// Builds the components, spawns the upstream bridge and binds both listeners.
    pub fn start(&self) -> Result<RunningBridge, ControllerError> {
        let config = &self.config;
        let endpoint = config.upstream();
        let registry = ClientRegistry::new();

        let client = reqwest::Client::builder().build().map_err(|e| {
            ControllerError::InitializationFailed(format!("HTTP client: {}", e))
        })?;

        let store = Arc::new(
            ArtifactStore::new(&config.images_dir, config.retention_cap)
                .map_err(ControllerError::StorageError)?,
        );
        let pipeline = Arc::new(UploadPipeline::new(
            config.temp_dir.clone(),
            endpoint.clone(),
            client.clone(),
            registry.clone(),
        ));
        let gateway = ProxyGateway::new(client, endpoint.clone());

        let bridge = UpstreamBridge::new(
            &endpoint,
            registry.clone(),
            config.reconnect_delay(),
            config.settle_delay(),
        );
        let handle = bridge.handle();

        let web = WebServer::new(config, registry, store, pipeline, gateway, handle.clone())?;
        let servers = web.start(self.shutdown.clone())?;

        let bridge_task = tokio::spawn(bridge.run(self.shutdown.clone()));
        info!("Bridge started, upstream engine at {}", endpoint.authority());

        Ok(RunningBridge {
            servers,
            bridge: handle,
            bridge_task,
        })
    }

    /// Runs until Ctrl-C or until [`Controller::shutdown`] is called.
    pub async fn run(&mut self) -> Result<(), ControllerError> {
        let running = self.start()?;

        tokio::select! {
            signal = tokio::signal::ctrl_c() => {
                if let Err(e) = signal {
                    error!("Unable to listen for shutdown signal: {}", e);
                }
                info!("Shutdown requested");
            }
            _ = self.shutdown.cancelled() => {}
        }

        self.shutdown();
        running.wait().await;
        info!("Bridge stopped");
        Ok(())
    }

    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{dead_endpoint, EngineBehavior, FakeEngine};
    use crate::upstream::ConnectionState;
    use std::time::Duration;
    use tempfile::TempDir;

    fn local_config(dir: &TempDir, upstream_port: u16) -> Config {
        Config {
            bind_address: "127.0.0.1".to_string(),
            http_port: 0,
            ws_port: 0,
            upstream_port,
            images_dir: dir.path().join("saved_images"),
            temp_dir: dir.path().join("temp"),
            reconnect_delay_secs: 1,
            ..Config::default()
        }
    }

    #[test]
    fn test_new_rejects_invalid_config() {
        let config = Config {
            retention_cap: 0,
            ..Config::default()
        };
        let err = Controller::new(config).err().unwrap();
        assert!(matches!(err, ControllerError::ConfigurationError(_)));
    }

    #[tokio::test]
    async fn test_start_serves_and_connects_upstream() {
        let _ = env_logger::builder().is_test(true).try_init();
        let engine = FakeEngine::start(EngineBehavior::default()).await;
        let dir = TempDir::new().unwrap();
        let controller = Controller::new(local_config(&dir, engine.addr.port())).unwrap();

        let running = controller.start().unwrap();
        let mut bridge = running.bridge.clone();
        assert!(
            tokio::time::timeout(Duration::from_secs(5), bridge.wait_for(ConnectionState::Connected))
                .await
                .unwrap()
        );

        let status = reqwest::get(format!("http://{}/api/status", running.servers.http_addr))
            .await
            .unwrap();
        assert_eq!(status.status().as_u16(), 200);

        let (mut socket, _) =
            tokio_tungstenite::connect_async(format!("ws://{}/", running.servers.ws_addr))
                .await
                .unwrap();

        tokio::time::timeout(Duration::from_secs(5), async {
            while running.bridge.registry().is_empty().await {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();
        socket.close(None).await.unwrap();

        controller.shutdown();
        tokio::time::timeout(Duration::from_secs(5), running.wait())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_unreachable_upstream_does_not_prevent_startup() {
        let dir = TempDir::new().unwrap();
        let controller = Controller::new(local_config(&dir, dead_endpoint().port)).unwrap();
        let running = controller.start().unwrap();

        let status = reqwest::get(format!("http://{}/api/status", running.servers.http_addr))
            .await
            .unwrap();
        assert_eq!(status.status().as_u16(), 503);

        controller.shutdown();
        tokio::time::timeout(Duration::from_secs(5), running.wait())
            .await
            .unwrap();
    }
}
