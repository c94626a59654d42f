use std::convert::Infallible;
use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::sync::Arc;

use log::info;
use tokio_util::sync::CancellationToken;
use warp::http::header::{HeaderMap, HeaderName, HeaderValue};
use warp::{Filter, Reply};

use super::routes::{
    execute_route, handle_rejection, proxy_preflight_route, proxy_route, saved_image_files_route,
    saved_images_route, status_route, upload_route,
};
use super::subscriber::subscriber_session;
use super::types::RunningServers;
use crate::client_registry::ClientRegistry;
use crate::configuration::Config;
use crate::error_handling::types::WebError;
use crate::proxy::ProxyGateway;
use crate::storage::ArtifactStore;
use crate::upload::UploadPipeline;
use crate::upstream::BridgeHandle;

/// Isolation headers added to every HTTP response.
fn isolation_headers() -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(
        HeaderName::from_static("cross-origin-embedder-policy"),
        HeaderValue::from_static("require-corp"),
    );
    headers.insert(
        HeaderName::from_static("cross-origin-opener-policy"),
        HeaderValue::from_static("same-origin"),
    );
    headers.insert(
        HeaderName::from_static("cross-origin-resource-policy"),
        HeaderValue::from_static("cross-origin"),
    );
    headers
}

/// HTTP API and subscriber endpoint of the bridge
pub struct WebServer {
    bind_address: IpAddr,
    http_port: u16,
    ws_port: u16,
    max_body_bytes: u64,
    client_id: String,
    images_dir: PathBuf,
    registry: ClientRegistry,
    store: Arc<ArtifactStore>,
    pipeline: Arc<UploadPipeline>,
    gateway: ProxyGateway,
    bridge: BridgeHandle,
}

impl WebServer {
    pub fn new(
        config: &Config,
        registry: ClientRegistry,
        store: Arc<ArtifactStore>,
        pipeline: Arc<UploadPipeline>,
        gateway: ProxyGateway,
        bridge: BridgeHandle,
    ) -> Result<Self, WebError> {
        let bind_address: IpAddr = config.bind_address.parse().map_err(|e| {
            WebError::BindFailed(format!("invalid bind address {:?}: {}", config.bind_address, e))
        })?;
        Ok(Self {
            bind_address,
            http_port: config.http_port,
            ws_port: config.ws_port,
            max_body_bytes: config.max_body_bytes,
            client_id: config.client_id.clone(),
            images_dir: config.images_dir.clone(),
            registry,
            store,
            pipeline,
            gateway,
            bridge,
        })
    }

    /// Every HTTP route, with rejections rendered as JSON.
    pub fn routes(&self) -> impl Filter<Extract = impl Reply, Error = Infallible> + Clone {
        upload_route(self.pipeline.clone(), self.max_body_bytes)
            .or(proxy_preflight_route())
            .or(proxy_route(self.gateway.clone(), self.max_body_bytes))
            .or(status_route(self.bridge.clone()))
            .or(saved_images_route(self.store.clone()))
            .or(saved_image_files_route(self.images_dir.clone()))
            .or(execute_route(
                self.gateway.clone(),
                self.client_id.clone(),
                self.max_body_bytes,
            ))
            .recover(handle_rejection)
            .with(warp::reply::with::headers(isolation_headers()))
    }

    /// WebSocket upgrade on any path of the subscriber port.
    pub fn subscriber_routes(
        &self,
    ) -> impl Filter<Extract = impl Reply, Error = warp::Rejection> + Clone {
        let registry = self.registry.clone();
        let store = self.store.clone();
        warp::ws().map(move |ws: warp::ws::Ws| {
            let registry = registry.clone();
            let store = store.clone();
            ws.on_upgrade(move |socket| subscriber_session(socket, registry, store))
        })
    }

    /// Binds both listeners and serves them until `shutdown` is cancelled.
    pub fn start(&self, shutdown: CancellationToken) -> Result<RunningServers, WebError> {
        let http_addr = SocketAddr::new(self.bind_address, self.http_port);
        let token = shutdown.clone();
        let (http_addr, http_server) = warp::serve(self.routes())
            .try_bind_with_graceful_shutdown(http_addr, async move { token.cancelled().await })
            .map_err(|e| WebError::BindFailed(format!("{}: {}", http_addr, e)))?;
        info!("HTTP API listening on http://{}", http_addr);

        let ws_addr = SocketAddr::new(self.bind_address, self.ws_port);
        let token = shutdown;
        let (ws_addr, ws_server) = warp::serve(self.subscriber_routes())
            .try_bind_with_graceful_shutdown(ws_addr, async move { token.cancelled().await })
            .map_err(|e| WebError::BindFailed(format!("{}: {}", ws_addr, e)))?;
        info!("Subscriber endpoint listening on ws://{}", ws_addr);

        Ok(RunningServers {
            http_addr,
            ws_addr,
            tasks: vec![tokio::spawn(http_server), tokio::spawn(ws_server)],
        })
    }
}
