use std::convert::Infallible;

use bytes::Bytes;
use log::{debug, error, info};
use serde_json::{json, Value};
use warp::http::header::{self, HeaderMap, HeaderName, HeaderValue};
use warp::http::{Method, Response, StatusCode};
use warp::hyper::Body;
use warp::Filter;

use crate::configuration::types::UpstreamEndpoint;
use crate::error_handling::types::ProxyError;

pub const ALLOW_ORIGIN: &str = "*";
pub const ALLOW_METHODS: &str = "GET, POST, OPTIONS";
pub const ALLOW_HEADERS: &str = "*";

const PROXY_ERROR_BODY: &str = r#"{"error":"ComfyUI proxy error"}"#;

// Connection-scoped headers that must not be replayed on the other hop.
const HOP_BY_HOP: [&str; 5] = [
    "connection",
    "keep-alive",
    "transfer-encoding",
    "upgrade",
    "proxy-connection",
];

/// Raw query string, or an empty string when the request has none.
pub fn optional_raw_query() -> impl Filter<Extract = (String,), Error = Infallible> + Clone {
    warp::query::raw()
        .or(warp::any().map(String::new))
        .unify()
}

fn is_hop_by_hop(name: &HeaderName) -> bool {
    HOP_BY_HOP.contains(&name.as_str())
}

fn apply_cors(headers: &mut HeaderMap) {
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_ORIGIN,
        HeaderValue::from_static(ALLOW_ORIGIN),
    );
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_METHODS,
        HeaderValue::from_static(ALLOW_METHODS),
    );
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_HEADERS,
        HeaderValue::from_static(ALLOW_HEADERS),
    );
}

/// Forwarder for the engine's HTTP API.
#[derive(Clone)]
pub struct ProxyGateway {
    client: reqwest::Client,
    endpoint: UpstreamEndpoint,
}

impl ProxyGateway {
    pub fn new(client: reqwest::Client, endpoint: UpstreamEndpoint) -> Self {
        Self { client, endpoint }
    }

    fn target_url(&self, tail: &str, query: &str) -> String {
        let mut url = format!("{}/{}", self.endpoint.http_base(), tail.trim_start_matches('/'));
        if !query.is_empty() {
            url.push('?');
            url.push_str(query);
        }
        url
    }

    /// Replays one request against the engine and streams the reply back.
    ///
    /// Upstream statuses are passed through unchanged; only a transport failure is
    /// an error. The request is never retried.
    pub async fn forward(
        &self,
        method: Method,
        tail: &str,
        query: &str,
        headers: HeaderMap,
        body: Bytes,
    ) -> Result<Response<Body>, ProxyError> {
        let url = self.target_url(tail, query);
        debug!("Proxying {} {}", method, url);

        let mut outgoing = HeaderMap::with_capacity(headers.len());
        for (name, value) in headers.iter() {
            if name == header::HOST || name == header::CONTENT_LENGTH || is_hop_by_hop(name) {
                continue;
            }
            outgoing.append(name.clone(), value.clone());
        }
        let authority = HeaderValue::from_str(&self.endpoint.authority()).map_err(|e| {
            ProxyError::InvalidRequest(format!("invalid upstream authority: {}", e))
        })?;
        outgoing.insert(header::HOST, authority);

        let upstream = self
            .client
            .request(method, url.as_str())
            .headers(outgoing)
            .body(body)
            .send()
            .await?;

        let status = upstream.status();
        let mut builder = Response::builder().status(status);
        if let Some(reply_headers) = builder.headers_mut() {
            for (name, value) in upstream.headers().iter() {
                if !is_hop_by_hop(name) {
                    reply_headers.append(name.clone(), value.clone());
                }
            }
            apply_cors(reply_headers);
        }
        debug!("Upstream answered {} for {}", status, url);

        builder
            .body(Body::wrap_stream(upstream.bytes_stream()))
            .map_err(|e| ProxyError::InvalidRequest(e.to_string()))
    }

    /// Bare `200` carrying the cross-origin headers.
    pub fn preflight() -> Response<Body> {
        let mut response = Response::new(Body::empty());
        apply_cors(response.headers_mut());
        response
    }

    /// Generic `500` sent when the engine could not be reached.
    pub fn failure(err: &ProxyError) -> Response<Body> {
        error!("ComfyUI proxy error: {}", err);
        let mut response = Response::new(Body::from(PROXY_ERROR_BODY));
        *response.status_mut() = StatusCode::INTERNAL_SERVER_ERROR;
        response.headers_mut().insert(
            header::CONTENT_TYPE,
            HeaderValue::from_static("application/json"),
        );
        apply_cors(response.headers_mut());
        response
    }

    /// Queues a workflow on the engine and returns its JSON reply.
    pub async fn submit_prompt(&self, workflow: Value, client_id: &str) -> Result<Value, ProxyError> {
        let reply = self
            .client
            .post(self.endpoint.prompt_url())
            .json(&json!({ "prompt": workflow, "client_id": client_id }))
            .send()
            .await?
            .error_for_status()?
            .json::<Value>()
            .await?;
        info!("Workflow queued on engine: {}", reply["prompt_id"]);
        Ok(reply)
    }
}
