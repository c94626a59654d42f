use std::sync::Arc;

use chrono::Utc;
use futures_util::{SinkExt, StreamExt};
use log::{debug, info, trace, warn};
use tokio::sync::mpsc;
use uuid::Uuid;
use warp::ws::{Message, WebSocket};

use crate::client_registry::{BridgeEvent, ClientMessage, ClientRegistry};
use crate::storage::artifact_store::ArtifactStore;

/// Drives one subscriber socket from registration to unregistration.
///
/// Outbound traffic goes through an unbounded channel drained by a writer task, so a
/// broadcast never waits on this socket.
pub async fn subscriber_session(
    socket: WebSocket,
    registry: ClientRegistry,
    store: Arc<ArtifactStore>,
) {
    let id = Uuid::new_v4();
    let (mut sink, mut stream) = socket.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<String>();

    registry.register(id, tx).await;
    info!("Subscriber {} connected", id);

    let writer = tokio::spawn(async move {
        while let Some(text) = rx.recv().await {
            if let Err(e) = sink.send(Message::text(text)).await {
                debug!("Subscriber {} send failed: {}", id, e);
                break;
            }
        }
        let _ = sink.close().await;
    });

    while let Some(frame) = stream.next().await {
        match frame {
            Ok(msg) if msg.is_close() => break,
            Ok(msg) => match msg.to_str() {
                Ok(text) => handle_client_message(text, &registry, &store).await,
                Err(()) => trace!("Ignoring non-text frame from {}", id),
            },
            Err(e) => {
                warn!("Subscriber {} socket error: {}", id, e);
                break;
            }
        }
    }

    // Dropping the registry's sender ends the writer once it drained.
    registry.unregister(id).await;
    let _ = writer.await;
    info!("Subscriber {} disconnected", id);
}

/// Captures an image sent by a client and rebroadcasts it with its saved path.
pub async fn handle_client_message(text: &str, registry: &ClientRegistry, store: &ArtifactStore) {
    let message: ClientMessage = match serde_json::from_str(text) {
        Ok(m) => m,
        Err(e) => {
            debug!("Ignoring subscriber message: {}", e);
            return;
        }
    };

    match message {
        ClientMessage::Image { image, prompt } => {
            let prompt = prompt.unwrap_or_default();
            trace!("Image message ({} chars), prompt {:?}", image.len(), prompt);
            let saved_path = match store.capture(&image, &prompt).await {
                Ok(name) => Some(ArtifactStore::url_path(&name)),
                Err(e) => {
                    warn!("Could not save received image: {}", e);
                    None
                }
            };
            registry
                .broadcast_event(&BridgeEvent::Image {
                    image,
                    prompt,
                    saved_path,
                    timestamp: Utc::now().timestamp_millis(),
                })
                .await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::next_json;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_image_message_is_saved_and_broadcast() {
        let dir = TempDir::new().unwrap();
        let store = ArtifactStore::new(dir.path(), 20).unwrap();
        let registry = ClientRegistry::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        registry.register(Uuid::new_v4(), tx).await;

        handle_client_message(
            r#"{"type":"image","image":"data:image/png;base64,AAAA","prompt":"cat"}"#,
            &registry,
            &store,
        )
        .await;

        let event = next_json(&mut rx).await;
        assert_eq!(event["type"], "image");
        assert_eq!(event["prompt"], "cat");
        let saved = event["savedPath"].as_str().unwrap();
        assert!(saved.starts_with("/saved_images/generated_"));
        let name = saved.trim_start_matches("/saved_images/");
        assert!(dir.path().join(name).exists());
    }

    #[tokio::test]
    async fn test_failed_capture_still_broadcasts_without_saved_path() {
        let dir = TempDir::new().unwrap();
        let store = ArtifactStore::new(dir.path(), 20).unwrap();
        let registry = ClientRegistry::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        registry.register(Uuid::new_v4(), tx).await;

        handle_client_message(r#"{"type":"image","image":"%%%"}"#, &registry, &store).await;

        let event = next_json(&mut rx).await;
        assert_eq!(event["image"], "%%%");
        assert_eq!(event["prompt"], "");
        assert!(event.get("savedPath").is_none());
    }

    #[tokio::test]
    async fn test_other_messages_are_ignored() {
        let dir = TempDir::new().unwrap();
        let store = ArtifactStore::new(dir.path(), 20).unwrap();
        let registry = ClientRegistry::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        registry.register(Uuid::new_v4(), tx).await;

        handle_client_message("garbage", &registry, &store).await;
        handle_client_message(r#"{"type":"ping"}"#, &registry, &store).await;
        assert!(rx.try_recv().is_err());
    }
}
