//! HTTP forwarding through the session gateway
//!
//! Receives inbound requests, strips hop-by-hop headers and any client
//! `Authorization`, and sends them through `RequestGateway` so they carry the
//! session's access credential and survive its expiry. Upstream responses,
//! error statuses included, are returned verbatim.

use axum::body::Body;
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::{IntoResponse, Response};
use session_gateway::{Error, SessionClient};
use tracing::{error, instrument, warn};
use transport::{HttpRequest, HttpResponse, TransportError};

/// Headers to strip before forwarding (hop-by-hop per RFC 2616 Section 13.5.1)
const HOP_BY_HOP_HEADERS: &[&str] = &[
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

/// Inbound body limit.
const MAX_BODY_BYTES: usize = 10 * 1024 * 1024;

/// Check if a header is hop-by-hop (should be stripped before forwarding)
pub fn is_hop_by_hop(name: &str) -> bool {
    HOP_BY_HOP_HEADERS
        .iter()
        .any(|h| h.eq_ignore_ascii_case(name))
}

/// JSON error body: `{"error":{"type":...,"message":...,"request_id":...}}`
pub fn error_response(status: StatusCode, kind: &str, message: &str, request_id: &str) -> Response {
    let body = serde_json::json!({
        "error": {
            "type": kind,
            "message": message,
            "request_id": request_id,
        }
    });
    (
        status,
        [(header::CONTENT_TYPE, "application/json")],
        body.to_string(),
    )
        .into_response()
}

/// Copy an upstream response back to the client, minus hop-by-hop headers.
pub fn upstream_response(upstream: HttpResponse, request_id: &str) -> Response {
    let status = StatusCode::from_u16(upstream.status).unwrap_or(StatusCode::BAD_GATEWAY);
    let mut response = Response::builder().status(status);
    for (name, value) in &upstream.headers {
        if !is_hop_by_hop(name.as_str()) && name != header::CONTENT_LENGTH {
            response = response.header(name, value);
        }
    }
    response
        .body(Body::from(upstream.body))
        .unwrap_or_else(|e| {
            error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                "proxy_error",
                &format!("response build error: {e}"),
                request_id,
            )
        })
}

/// Map a gateway failure to the response the client sees.
///
/// Unrecoverable 401s and rejected calls still carry the upstream answer, so
/// those are passed through untouched.
pub fn gateway_error_response(err: Error, request_id: &str) -> Response {
    match err {
        Error::UnrecoverableAuth(upstream) | Error::Rejected(upstream) => {
            upstream_response(*upstream, request_id)
        }
        err if err.is_session_ended() => {
            warn!(error = %err, "session ended while forwarding");
            error_response(
                StatusCode::UNAUTHORIZED,
                "session_ended",
                &err.to_string(),
                request_id,
            )
        }
        Error::Transport(TransportError::Timeout(msg)) => {
            crate::metrics::record_upstream_error("timeout");
            error!(error = %msg, "upstream timeout");
            error_response(
                StatusCode::GATEWAY_TIMEOUT,
                "upstream_timeout",
                &format!("upstream timeout: {msg}"),
                request_id,
            )
        }
        Error::Transport(TransportError::InvalidRequest(msg)) => error_response(
            StatusCode::BAD_REQUEST,
            "invalid_request",
            &msg,
            request_id,
        ),
        Error::Transport(TransportError::Network(msg)) => {
            crate::metrics::record_upstream_error("network");
            error!(error = %msg, "upstream request failed");
            error_response(
                StatusCode::BAD_GATEWAY,
                "upstream_error",
                &format!("upstream error: {msg}"),
                request_id,
            )
        }
        other => {
            error!(error = %other, "session layer error");
            error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                "proxy_error",
                &other.to_string(),
                request_id,
            )
        }
    }
}

/// Headers forwarded upstream: everything except hop-by-hop, `host` and
/// the client's own `authorization`.
fn forwarded_headers(inbound: &HeaderMap) -> HeaderMap {
    let mut headers = HeaderMap::new();
    for (name, value) in inbound {
        if is_hop_by_hop(name.as_str())
            || name == header::HOST
            || name == header::AUTHORIZATION
            || name == header::CONTENT_LENGTH
        {
            continue;
        }
        headers.append(name.clone(), value.clone());
    }
    headers
}

/// Forward an inbound request through the session gateway.
#[instrument(skip_all, fields(request_id = %request_id, method = %request.method(), path = %request.uri().path()))]
pub async fn forward(
    session: &SessionClient,
    request: axum::http::Request<Body>,
    request_id: &str,
) -> Response {
    let method = request.method().clone();
    let path = request
        .uri()
        .path_and_query()
        .map(|pq| pq.as_str().trim_start_matches('/').to_string())
        .unwrap_or_default();
    let headers = forwarded_headers(request.headers());

    let body = match axum::body::to_bytes(request.into_body(), MAX_BODY_BYTES).await {
        Ok(b) => b,
        Err(e) => {
            error!(error = %e, "failed to read request body");
            return error_response(
                StatusCode::BAD_REQUEST,
                "invalid_request",
                &format!("invalid request body: {e}"),
                request_id,
            );
        }
    };

    let mut outbound = HttpRequest::new(method, path);
    outbound.headers = headers;
    if !body.is_empty() {
        outbound = outbound.with_body(body);
    }

    match session.gateway().send(outbound).await {
        Ok(upstream) => upstream_response(upstream, request_id),
        Err(err) => gateway_error_response(err, request_id),
    }
}
