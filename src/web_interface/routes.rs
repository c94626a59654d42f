use std::convert::Infallible;
use std::path::PathBuf;
use std::sync::Arc;

use bytes::{Buf, BufMut, Bytes, BytesMut};
use futures_util::StreamExt;
use log::{error, warn};
use serde_json::Value;
use warp::http::{HeaderMap, Method, StatusCode};
use warp::path::Tail;
use warp::{reply, Filter, Rejection, Reply};

use super::types::{ApiError, BodyReadFailed, BodyTooLarge, StatusResponse};
use crate::error_handling::types::UploadError;
use crate::proxy::gateway::{optional_raw_query, ProxyGateway};
use crate::storage::artifact_store::ArtifactStore;
use crate::upload::{UploadPipeline, UploadRequest};
use crate::upstream::BridgeHandle;

fn json_error(body: &ApiError, status: StatusCode) -> reply::Response {
    reply::with_status(reply::json(body), status).into_response()
}

/// POST /api/comfyui/upload/:connectionId
pub fn upload_route(
    pipeline: Arc<UploadPipeline>,
    max_body_bytes: u64,
) -> impl Filter<Extract = impl Reply, Error = Rejection> + Clone {
    warp::path!("api" / "comfyui" / "upload" / String)
        .and(warp::post())
        .and(warp::body::content_length_limit(max_body_bytes))
        .and(warp::body::json())
        .and_then(move |connection_id: String, request: UploadRequest| {
            let pipeline = pipeline.clone();
            async move {
                let res = match pipeline.upload(&connection_id, request).await {
                    Ok(result) => reply::json(&result).into_response(),
                    Err(UploadError::Validation(message)) => {
                        warn!("Rejected upload for {}: {}", connection_id, message);
                        json_error(&ApiError::new(message), StatusCode::BAD_REQUEST)
                    }
                    Err(UploadError::Upstream { details, .. }) => json_error(
                        &ApiError::with_details("Upload failed", details),
                        StatusCode::INTERNAL_SERVER_ERROR,
                    ),
                    Err(UploadError::Storage(e)) => json_error(
                        &ApiError::with_details("Upload failed", e.to_string()),
                        StatusCode::INTERNAL_SERVER_ERROR,
                    ),
                };
                Ok::<_, Rejection>(res)
            }
        })
}

/// Whole request body, capped at `max_body_bytes`.
///
/// Unlike `warp::body::content_length_limit`, a missing `Content-Length` is
/// accepted: bodiless GETs are proxied as-is and chunked bodies are counted while
/// they are read.
pub fn limited_body(
    max_body_bytes: u64,
) -> impl Filter<Extract = (Bytes,), Error = Rejection> + Clone {
    warp::header::optional::<u64>("content-length")
        .and(warp::body::stream())
        .and_then(move |declared: Option<u64>, body| {
            collect_limited_body(declared, body, max_body_bytes)
        })
}

async fn collect_limited_body<S, B>(
    declared: Option<u64>,
    body: S,
    max_body_bytes: u64,
) -> Result<Bytes, Rejection>
where
    S: futures_util::Stream<Item = Result<B, warp::Error>>,
    B: Buf,
{
    if declared.is_some_and(|len| len > max_body_bytes) {
        return Err(warp::reject::custom(BodyTooLarge {
            limit: max_body_bytes,
        }));
    }
    futures_util::pin_mut!(body);
    let mut collected = BytesMut::new();
    while let Some(chunk) = body.next().await {
        let chunk = chunk.map_err(|e| {
            warp::reject::custom(BodyReadFailed {
                reason: e.to_string(),
            })
        })?;
        if (collected.len() + chunk.remaining()) as u64 > max_body_bytes {
            return Err(warp::reject::custom(BodyTooLarge {
                limit: max_body_bytes,
            }));
        }
        collected.put(chunk);
    }
    Ok(collected.freeze())
}

/// OPTIONS /comfyui/*
pub fn proxy_preflight_route() -> impl Filter<Extract = impl Reply, Error = Rejection> + Clone {
    warp::path("comfyui")
        .and(warp::options())
        .and(warp::path::tail())
        .map(|_tail: Tail| ProxyGateway::preflight())
}

/// ANY /comfyui/*
pub fn proxy_route(
    gateway: ProxyGateway,
    max_body_bytes: u64,
) -> impl Filter<Extract = impl Reply, Error = Rejection> + Clone {
    warp::path("comfyui")
        .and(warp::path::tail())
        .and(warp::method())
        .and(optional_raw_query())
        .and(warp::header::headers_cloned())
        .and(limited_body(max_body_bytes))
        .and_then(
            move |tail: Tail, method: Method, query: String, headers: HeaderMap, body: Bytes| {
                let gateway = gateway.clone();
                async move {
                    let res = match gateway
                        .forward(method, tail.as_str(), &query, headers, body)
                        .await
                    {
                        Ok(response) => response,
                        Err(e) => ProxyGateway::failure(&e),
                    };
                    Ok::<_, Rejection>(res)
                }
            },
        )
}

/// GET /api/status
pub fn status_route(
    bridge: BridgeHandle,
) -> impl Filter<Extract = impl Reply, Error = Rejection> + Clone {
    warp::path!("api" / "status").and(warp::get()).map(move || {
        if bridge.is_connected() {
            reply::with_status(
                reply::json(&StatusResponse { status: "connected" }),
                StatusCode::OK,
            )
        } else {
            reply::with_status(
                reply::json(&StatusResponse {
                    status: "disconnected",
                }),
                StatusCode::SERVICE_UNAVAILABLE,
            )
        }
    })
}

/// GET /api/saved-images
pub fn saved_images_route(
    store: Arc<ArtifactStore>,
) -> impl Filter<Extract = impl Reply, Error = Rejection> + Clone {
    warp::path!("api" / "saved-images")
        .and(warp::get())
        .and_then(move || {
            let store = store.clone();
            async move {
                match store.list().await {
                    Ok(list) => Ok::<_, Rejection>(reply::json(&list).into_response()),
                    Err(e) => {
                        error!("Failed to list saved images: {}", e);
                        Ok::<_, Rejection>(json_error(
                            &ApiError::with_details("Failed to list saved images", e.to_string()),
                            StatusCode::INTERNAL_SERVER_ERROR,
                        ))
                    }
                }
            }
        })
}

/// GET /saved_images/:file
pub fn saved_image_files_route(
    images_dir: PathBuf,
) -> impl Filter<Extract = impl Reply, Error = Rejection> + Clone {
    warp::path("saved_images")
        .and(warp::get())
        .and(warp::fs::dir(images_dir))
}

/// POST /api/execute
pub fn execute_route(
    gateway: ProxyGateway,
    client_id: String,
    max_body_bytes: u64,
) -> impl Filter<Extract = impl Reply, Error = Rejection> + Clone {
    warp::path!("api" / "execute")
        .and(warp::post())
        .and(warp::body::content_length_limit(max_body_bytes))
        .and(warp::body::json())
        .and_then(move |workflow: Value| {
            let gateway = gateway.clone();
            let client_id = client_id.clone();
            async move {
                match gateway.submit_prompt(workflow, &client_id).await {
                    Ok(reply_body) => Ok::<_, Rejection>(reply::json(&reply_body).into_response()),
                    Err(e) => {
                        error!("Failed to execute workflow: {}", e);
                        Ok::<_, Rejection>(json_error(
                            &ApiError::with_details(
                                e.to_string(),
                                "Check that ComfyUI is running and the workflow is valid",
                            ),
                            StatusCode::INTERNAL_SERVER_ERROR,
                        ))
                    }
                }
            }
        })
}

/// Turns warp rejections into `{error, details}` bodies.
pub async fn handle_rejection(err: Rejection) -> Result<impl Reply, Infallible> {
    let (status, body) = if err.is_not_found() {
        (StatusCode::NOT_FOUND, ApiError::new("Not found"))
    } else if let Some(e) = err.find::<warp::reject::PayloadTooLarge>() {
        (
            StatusCode::PAYLOAD_TOO_LARGE,
            ApiError::with_details("Request body too large", e.to_string()),
        )
    } else if let Some(e) = err.find::<BodyTooLarge>() {
        (
            StatusCode::PAYLOAD_TOO_LARGE,
            ApiError::with_details(
                "Request body too large",
                format!("limit is {} bytes", e.limit),
            ),
        )
    } else if let Some(e) = err.find::<BodyReadFailed>() {
        (
            StatusCode::BAD_REQUEST,
            ApiError::with_details("Unreadable request body", e.reason.clone()),
        )
    } else if let Some(e) = err.find::<warp::body::BodyDeserializeError>() {
        (
            StatusCode::BAD_REQUEST,
            ApiError::with_details("Malformed JSON body", e.to_string()),
        )
    } else if let Some(e) = err.find::<warp::reject::InvalidHeader>() {
        (
            StatusCode::BAD_REQUEST,
            ApiError::with_details("Invalid header", e.to_string()),
        )
    } else if let Some(e) = err.find::<warp::reject::LengthRequired>() {
        (
            StatusCode::LENGTH_REQUIRED,
            ApiError::with_details("Content-Length required", e.to_string()),
        )
    } else if let Some(e) = err.find::<warp::reject::UnsupportedMediaType>() {
        (
            StatusCode::UNSUPPORTED_MEDIA_TYPE,
            ApiError::with_details("Unsupported media type", e.to_string()),
        )
    } else if err.find::<warp::reject::MethodNotAllowed>().is_some() {
        (
            StatusCode::METHOD_NOT_ALLOWED,
            ApiError::new("Method not allowed"),
        )
    } else {
        error!("Unhandled rejection: {:?}", err);
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            ApiError::new("Internal server error"),
        )
    };
    Ok(reply::with_status(reply::json(&body), status))
}
