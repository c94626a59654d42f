use std::time::Duration;

use chrono::Utc;
use futures_util::StreamExt;
use log::{debug, info, trace, warn};
use tokio::net::TcpStream;
use tokio::sync::watch;
use tokio_tungstenite::tungstenite::protocol::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;

use super::types::{is_executed_with_output, ConnectionState};
use crate::client_registry::{BridgeEvent, ClientRegistry, ConnectionStatus};
use crate::configuration::types::UpstreamEndpoint;
use crate::error_handling::types::BridgeError;

type EngineStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

enum RelayEnd {
    Closed,
    Shutdown,
}

/// Owner of the engine event-stream connection.
///
/// `run` drives the connection state machine until the shutdown token fires. The
/// current state is published through a `watch` channel; [`BridgeHandle`] is the
/// read side given to the rest of the application.
pub struct UpstreamBridge {
    url: String,
    registry: ClientRegistry,
    reconnect_delay: Duration,
    settle_delay: Duration,
    state_tx: watch::Sender<ConnectionState>,
}

/// Cheap, cloneable view of the bridge used by the HTTP layer.
#[derive(Clone)]
pub struct BridgeHandle {
    state_rx: watch::Receiver<ConnectionState>,
    registry: ClientRegistry,
}

impl UpstreamBridge {
    pub fn new(
        endpoint: &UpstreamEndpoint,
        registry: ClientRegistry,
        reconnect_delay: Duration,
        settle_delay: Duration,
    ) -> Self {
        let (state_tx, _) = watch::channel(ConnectionState::Disconnected);
        Self {
            url: endpoint.ws_url(),
            registry,
            reconnect_delay,
            settle_delay,
            state_tx,
        }
    }

    pub fn handle(&self) -> BridgeHandle {
        BridgeHandle {
            state_rx: self.state_tx.subscribe(),
            registry: self.registry.clone(),
        }
    }

    fn transition(&self, next: ConnectionState) {
        let previous = self.state_tx.send_replace(next);
        if previous != next {
            debug!("Upstream state {:?} -> {:?}", previous, next);
        }
    }

    /// Connects, relays and reconnects until `shutdown` is cancelled.
    pub async fn run(self, shutdown: CancellationToken) {
        info!("Upstream bridge targeting {}", self.url);
        loop {
            self.transition(ConnectionState::Connecting);
            let attempt = tokio::select! {
                _ = shutdown.cancelled() => break,
                attempt = connect_async(self.url.as_str()) => attempt,
            };

            match attempt {
                Ok((stream, _)) => {
                    self.transition(ConnectionState::Connected);
                    info!("Connected to upstream engine at {}", self.url);
                    self.announce(ConnectionStatus::Connected).await;

                    let outcome = self.relay(stream, &shutdown).await;
                    self.transition(ConnectionState::Disconnected);
                    match outcome {
                        Ok(RelayEnd::Shutdown) => break,
                        Ok(RelayEnd::Closed) => info!("Upstream closed the event stream"),
                        Err(e) => warn!("{}", e),
                    }
                    self.announce(ConnectionStatus::Disconnected).await;
                }
                Err(e) => {
                    self.transition(ConnectionState::Disconnected);
                    warn!("{}", BridgeError::ConnectFailed(e));
                }
            }

            info!("Reconnecting to upstream in {:?}", self.reconnect_delay);
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = tokio::time::sleep(self.reconnect_delay) => {}
            }
        }
        self.transition(ConnectionState::Disconnected);
        info!("Upstream bridge stopped");
    }

    async fn announce(&self, status: ConnectionStatus) {
        self.registry
            .broadcast_event(&BridgeEvent::Connection { status })
            .await;
    }

    async fn relay(
        &self,
        mut stream: EngineStream,
        shutdown: &CancellationToken,
    ) -> Result<RelayEnd, BridgeError> {
        loop {
            let frame = tokio::select! {
                _ = shutdown.cancelled() => {
                    let _ = stream.close(None).await;
                    return Ok(RelayEnd::Shutdown);
                }
                frame = stream.next() => frame,
            };

            match frame {
                Some(Ok(Message::Text(text))) => self.forward(text.as_str(), shutdown).await,
                Some(Ok(Message::Binary(bin))) => {
                    trace!("Ignoring binary upstream frame ({} bytes)", bin.len());
                }
                Some(Ok(Message::Close(_))) | None => return Ok(RelayEnd::Closed),
                Some(Ok(_)) => {}
                Some(Err(e)) => return Err(BridgeError::TransportFailed(e)),
            }
        }
    }

    async fn forward(&self, text: &str, shutdown: &CancellationToken) {
        let event: serde_json::Value = match serde_json::from_str(text) {
            Ok(v) => v,
            Err(e) => {
                warn!("Dropping non-JSON upstream frame: {}", e);
                return;
            }
        };
        debug!("Relaying upstream event {}", event["type"]);
        self.registry.broadcast(text).await;

        if is_executed_with_output(&event) {
            self.schedule_refresh(shutdown.child_token());
        }
    }

    // The engine reports completion before the image is necessarily readable, so
    // the hint is only a best-effort nudge for clients to re-fetch.
    fn schedule_refresh(&self, cancel: CancellationToken) {
        let registry = self.registry.clone();
        let delay = self.settle_delay;
        tokio::spawn(async move {
            tokio::select! {
                _ = cancel.cancelled() => {}
                _ = tokio::time::sleep(delay) => {
                    registry
                        .broadcast_event(&BridgeEvent::Refresh {
                            timestamp: Utc::now().timestamp_millis(),
                        })
                        .await;
                }
            }
        });
    }
}

impl BridgeHandle {
    pub fn state(&self) -> ConnectionState {
        *self.state_rx.borrow()
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// Waits until the bridge reaches `state`.
    pub async fn wait_for(&mut self, state: ConnectionState) -> bool {
        self.state_rx.wait_for(|s| *s == state).await.is_ok()
    }

    pub fn registry(&self) -> &ClientRegistry {
        &self.registry
    }

    /// Notifies every subscriber that the application settings changed.
    pub async fn announce_settings(&self, settings: serde_json::Value) -> usize {
        self.registry
            .broadcast_event(&BridgeEvent::SettingsUpdated { settings })
            .await
    }
}
