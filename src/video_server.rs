//! Range-served video delivery (C6, §4.6, §6.3): partial-content HTTP
//! handler over [`AssetStore`] artifacts. Grounded on the store's
//! stable-size/fsync freshness protocol — a request arriving before a
//! write has settled gets a retryable 503 rather than a truncated body.

use crate::error::{GatewayError, Result};
use crate::store::{Artifact, AssetStore};
use axum::body::Body;
use axum::extract::{Path, State};
use axum::http::{header, HeaderMap, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use std::sync::Arc;
use std::time::Instant;
use tokio::io::AsyncReadExt;
use tokio_util::io::ReaderStream;
use uuid::Uuid;

/// Shared state the video endpoint needs: just the store, so it composes
/// into any router via [`axum::extract::State`].
#[derive(Clone)]
pub struct VideoServerState {
    pub store: Arc<AssetStore>,
}

/// Parsed `Range: bytes=start-end` header (only the single-range form is
/// supported).
struct ByteRange {
    start: u64,
    end: Option<u64>,
}

/// Result of inspecting the `Range` header: distinguishes "no header" (serve
/// the full body) from "header present but unparsable", which must return
/// 416 rather than silently degrading to a full-body 200.
enum RangeRequest {
    Absent,
    Malformed,
    Range(ByteRange),
}

fn parse_range(headers: &HeaderMap) -> RangeRequest {
    let Some(raw) = headers.get(header::RANGE) else {
        return RangeRequest::Absent;
    };
    let Ok(raw) = raw.to_str() else {
        return RangeRequest::Malformed;
    };
    let Some(spec) = raw.strip_prefix("bytes=") else {
        return RangeRequest::Malformed;
    };
    let Some((start_str, end_str)) = spec.split_once('-') else {
        return RangeRequest::Malformed;
    };
    if start_str.is_empty() {
        // suffix ranges ("-500") are not produced by the player; reject rather than guess.
        return RangeRequest::Malformed;
    }
    let Ok(start) = start_str.parse::<u64>() else {
        return RangeRequest::Malformed;
    };
    let end = if end_str.is_empty() {
        None
    } else {
        match end_str.parse::<u64>() {
            Ok(end) => Some(end),
            Err(_) => return RangeRequest::Malformed,
        }
    };
    RangeRequest::Range(ByteRange { start, end })
}

/// `GET /videos/{artifact_id}` — serves a published video artifact,
/// honoring byte-range requests (§6.3).
pub async fn serve_video(
    State(state): State<VideoServerState>,
    Path(artifact_id): Path<Uuid>,
    headers: HeaderMap,
) -> Response {
    let request_start = Instant::now();

    let Some(artifact) = state.store.get(artifact_id) else {
        return (StatusCode::NOT_FOUND, "artifact not found").into_response();
    };

    match state.store.confirm_stable_for_read(&artifact).await {
        Ok(()) => {}
        Err(GatewayError::ArtifactNotReady(_)) => {
            let mut response = (StatusCode::SERVICE_UNAVAILABLE, "artifact not yet stable").into_response();
            response
                .headers_mut()
                .insert("retry-after", HeaderValue::from_static("0"));
            return response;
        }
        Err(err) => return gateway_error_response(&err),
    }

    let (start, end, is_range) = match parse_range(&headers) {
        RangeRequest::Absent => (0, None, false),
        RangeRequest::Range(r) => (r.start, r.end, true),
        RangeRequest::Malformed => {
            return (StatusCode::RANGE_NOT_SATISFIABLE, "malformed range header").into_response();
        }
    };

    let (file, length) = match state.store.open_range(&artifact, start, end).await {
        Ok(opened) => opened,
        Err(GatewayError::InvalidInput(_)) => {
            return (StatusCode::RANGE_NOT_SATISFIABLE, "range out of bounds").into_response();
        }
        Err(err) => return gateway_error_response(&err),
    };

    let status = if is_range {
        StatusCode::PARTIAL_CONTENT
    } else {
        StatusCode::OK
    };
    let body = Body::from_stream(ReaderStream::new(file.take(length)));

    let mut response = Response::new(body);
    *response.status_mut() = status;
    let response_headers = response.headers_mut();
    response_headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("video/mp4"));
    response_headers.insert(header::ACCEPT_RANGES, HeaderValue::from_static("bytes"));
    response_headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-store"));
    response_headers.insert(
        header::CONTENT_LENGTH,
        HeaderValue::from_str(&length.to_string()).unwrap_or_else(|_| HeaderValue::from_static("0")),
    );
    if status == StatusCode::PARTIAL_CONTENT {
        let total = artifact.byte_size;
        let content_range = format!("bytes {start}-{}/{total}", start + length - 1);
        if let Ok(value) = HeaderValue::from_str(&content_range) {
            response_headers.insert(header::CONTENT_RANGE, value);
        }
    }

    tracing::info!(
        artifact_id = %artifact_id,
        status = status.as_u16(),
        bytes_served = length,
        artifact_age_ms = artifact
            .mtime
            .elapsed()
            .map(|d| d.as_millis())
            .unwrap_or(0),
        ttfb_ms = request_start.elapsed().as_millis() as u64,
        "video range served"
    );

    response
}

fn gateway_error_response(err: &GatewayError) -> Response {
    tracing::warn!(error = %err, kind = err.wire_kind(), "video range request failed");
    (StatusCode::INTERNAL_SERVER_ERROR, err.to_string()).into_response()
}

/// Computes the byte range a `Range` header requests against a known
/// artifact, used directly by unit tests without standing up an HTTP
/// server. A malformed header is reported the same way an out-of-bounds
/// range is: as an error.
pub fn resolve_range(store: &AssetStore, artifact: &Artifact, headers: &HeaderMap) -> Result<u64> {
    let (start, end) = match parse_range(headers) {
        RangeRequest::Absent => (0, None),
        RangeRequest::Range(r) => (r.start, r.end),
        RangeRequest::Malformed => {
            return Err(GatewayError::InvalidInput("malformed range header".to_owned()));
        }
    };
    store.range_length(artifact, start, end)
}
