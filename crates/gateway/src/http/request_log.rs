use std::net::SocketAddr;
use std::time::Instant;

use axum::extract::{ConnectInfo, Request};
use axum::http::{HeaderMap, HeaderName, HeaderValue};
use axum::middleware::Next;
use axum::response::Response;
use tracing::Instrument;
use ulid::Ulid;

pub(super) const REQUEST_ID_HEADER: HeaderName = HeaderName::from_static("x-request-id");

const KNOWN_ROUTES: &[&str] = &[
    "/",
    "/health",
    "/docs",
    "/openapi.json",
    "/metrics",
    "/v1/user/me",
    "/v1/user/analyze",
];

/// Tags each request with an id, logs its start and completion and records
/// HTTP metrics. `/health` is only counted, never logged.
pub(super) async fn request_metadata(req: Request, next: Next) -> Response {
    let started = Instant::now();
    let method = req.method().clone();
    let route = route_label(req.uri().path());

    if req.uri().path() == "/health" {
        let response = next.run(req).await;
        crate::metrics::observe_http_request(
            route,
            method.as_str(),
            response.status().as_u16(),
            started.elapsed(),
        );
        return response;
    }

    let request_id = extract_request_id(req.headers());
    let client_addr = req
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.to_string())
        .unwrap_or_else(|| "unknown".to_string());

    let span = tracing::info_span!(
        "http.request",
        request_id = %request_id,
        method = %method,
        uri = %req.uri(),
        client_addr = %client_addr,
    );

    let mut response = async move {
        tracing::info!("request started");

        let response = next.run(req).await;

        let status = response.status().as_u16();
        let elapsed = started.elapsed();
        tracing::info!(
            status,
            duration_ms = elapsed.as_millis() as u64,
            "request completed"
        );
        crate::metrics::observe_http_request(route, method.as_str(), status, elapsed);

        response
    }
    .instrument(span)
    .await;

    if let Ok(value) = HeaderValue::from_str(&request_id) {
        response.headers_mut().insert(REQUEST_ID_HEADER, value);
    }

    response
}

fn route_label(path: &str) -> &'static str {
    KNOWN_ROUTES
        .iter()
        .find(|route| **route == path)
        .copied()
        .unwrap_or("unmatched")
}

fn extract_request_id(headers: &HeaderMap) -> String {
    headers
        .get(REQUEST_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.trim())
        .filter(|v| !v.is_empty())
        .and_then(sanitize_request_id)
        .unwrap_or_else(|| Ulid::new().to_string())
}

fn sanitize_request_id(raw: &str) -> Option<String> {
    const MAX_LEN: usize = 64;
    let mut out = String::with_capacity(raw.len().min(MAX_LEN));

    for ch in raw.chars() {
        if out.len() >= MAX_LEN {
            break;
        }
        if ch.is_ascii_alphanumeric() || matches!(ch, '-' | '_' | '.') {
            out.push(ch);
        }
    }

    (!out.is_empty()).then_some(out)
}
