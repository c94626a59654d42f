//! In-process stand-in for the generation engine, shared by the unit tests.
//!
//! Serves the event stream on `/ws`, the image upload endpoint, the prompt endpoint
//! and an echo handler for every other path, on an ephemeral localhost port.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::Bytes;
use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::sync::mpsc::UnboundedReceiver;
use warp::http::{HeaderMap, Method, StatusCode};
use warp::path::FullPath;
use warp::{Filter, Reply};

use crate::configuration::types::UpstreamEndpoint;
use crate::proxy::gateway::optional_raw_query;

#[derive(Debug, Clone)]
pub(crate) struct RecordedRequest {
    pub method: String,
    pub path: String,
    pub query: String,
    pub headers: HashMap<String, String>,
    pub body: Bytes,
}

#[derive(Debug, Clone)]
pub(crate) struct EngineBehavior {
    pub ws_frames: Vec<String>,
    pub close_ws_after_frames: bool,
    pub upload_status: u16,
}

impl Default for EngineBehavior {
    fn default() -> Self {
        Self {
            ws_frames: Vec::new(),
            close_ws_after_frames: false,
            upload_status: 200,
        }
    }
}

pub(crate) struct FakeEngine {
    pub addr: SocketAddr,
    requests: Arc<Mutex<Vec<RecordedRequest>>>,
    ws_connections: Arc<AtomicUsize>,
}

impl FakeEngine {
    pub async fn start(behavior: EngineBehavior) -> FakeEngine {
        let requests: Arc<Mutex<Vec<RecordedRequest>>> = Arc::new(Mutex::new(Vec::new()));
        let ws_connections = Arc::new(AtomicUsize::new(0));

        let frames = Arc::new(behavior.ws_frames.clone());
        let close_after = behavior.close_ws_after_frames;
        let counter = ws_connections.clone();
        let events = warp::path("ws")
            .and(warp::path::end())
            .and(warp::ws())
            .map(move |ws: warp::ws::Ws| {
                let frames = frames.clone();
                counter.fetch_add(1, Ordering::SeqCst);
                ws.on_upgrade(move |mut socket| async move {
                    for frame in frames.iter() {
                        if socket.send(warp::ws::Message::text(frame.clone())).await.is_err() {
                            return;
                        }
                    }
                    if close_after {
                        let _ = socket.close().await;
                    } else {
                        while let Some(Ok(_)) = socket.next().await {}
                    }
                })
            });

        let record = warp::method()
            .and(warp::path::full())
            .and(optional_raw_query())
            .and(warp::header::headers_cloned())
            .and(warp::body::bytes())
            .map(
                |method: Method, path: FullPath, query: String, headers: HeaderMap, body: Bytes| {
                    RecordedRequest {
                        method: method.to_string(),
                        path: path.as_str().to_string(),
                        query,
                        headers: headers
                            .iter()
                            .map(|(k, v)| {
                                (k.as_str().to_string(), v.to_str().unwrap_or("").to_string())
                            })
                            .collect(),
                        body,
                    }
                },
            );

        let log = requests.clone();
        let upload_status = behavior.upload_status;
        let upload = warp::path!("upload" / "image")
            .and(warp::post())
            .and(record.clone())
            .map(move |req: RecordedRequest| {
                let mut log = log.lock().unwrap();
                log.push(req);
                let status = StatusCode::from_u16(upload_status).unwrap();
                if status.is_success() {
                    let reply = json!({"name": format!("upload_{}.png", log.len()), "subfolder": "", "type": "input"});
                    warp::reply::with_status(warp::reply::json(&reply), status).into_response()
                } else {
                    warp::reply::with_status(
                        warp::reply::json(&json!({"error": "engine refused the image"})),
                        status,
                    )
                    .into_response()
                }
            });

        let log = requests.clone();
        let prompt = warp::path!("prompt")
            .and(warp::post())
            .and(record.clone())
            .map(move |req: RecordedRequest| {
                log.lock().unwrap().push(req);
                warp::reply::json(&json!({"prompt_id": "p-1", "number": 1, "node_errors": {}}))
                    .into_response()
            });

        let log = requests.clone();
        let echo = record.map(move |req: RecordedRequest| {
            let reply = json!({
                "method": req.method,
                "path": req.path,
                "query": req.query,
                "host": req.headers.get("host").cloned().unwrap_or_default(),
                "body": String::from_utf8_lossy(&req.body),
            });
            log.lock().unwrap().push(req);
            warp::reply::with_header(warp::reply::json(&reply), "x-engine", "fake").into_response()
        });

        let routes = events.or(upload).or(prompt).or(echo);
        let (addr, server) = warp::serve(routes).bind_ephemeral(([127, 0, 0, 1], 0));
        tokio::spawn(server);

        FakeEngine {
            addr,
            requests,
            ws_connections,
        }
    }

    pub fn endpoint(&self) -> UpstreamEndpoint {
        UpstreamEndpoint::new(self.addr.ip().to_string(), self.addr.port())
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn ws_connections(&self) -> usize {
        self.ws_connections.load(Ordering::SeqCst)
    }
}

/// Endpoint on which nothing listens.
pub(crate) fn dead_endpoint() -> UpstreamEndpoint {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    UpstreamEndpoint::new("127.0.0.1", port)
}

pub(crate) async fn next_json(rx: &mut UnboundedReceiver<String>) -> Value {
    let text = tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("timed out waiting for a broadcast")
        .expect("subscriber channel closed");
    serde_json::from_str(&text).unwrap()
}
