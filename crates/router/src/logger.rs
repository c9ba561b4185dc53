//! Request logger middleware. Creates one `tracing::Span` per request with
//! the fields `spec.md` requires logged alongside every "HTTP request" /
//! "HTTP response" / "WS close" line, stashes it (and a start `Instant`)
//! in request extensions so [`governor_context::Context`] can pick up the
//! same span when it's built further down the stack. This middleware is
//! installed via `Router::layer`, which axum applies to each already-
//! registered route rather than to the router's own dispatch step, so
//! routing (and the `MatchedPath` extension it sets) has already run by
//! the time this middleware sees the request — unlike `Context`-level
//! enrichment via `Context::log_attrs`, the matched route pattern doesn't
//! need a handler to opt in.

use std::net::SocketAddr;
use std::time::Instant;

use axum::extract::{ConnectInfo, MatchedPath, Request, State};
use axum::middleware::Next;
use axum::response::Response;
use governor_context::RequestSpan;
use http::StatusCode;

use crate::real_ip::RealIp;
use crate::RouterState;

pub async fn request_logger(
    State(state): State<RouterState>,
    matched_path: Option<MatchedPath>,
    mut req: Request,
    next: Next,
) -> Response {
    let local_request_id = state.next_request_id();
    let host = req
        .headers()
        .get(http::header::HOST)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("")
        .to_string();
    let method = req.method().to_string();
    let path = req.uri().path().to_string();
    let remote = req
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ci| ci.0.to_string())
        .unwrap_or_default();
    let real_ip = req.extensions().get::<RealIp>().map(|r| r.0.to_string()).unwrap_or_default();
    let route = matched_path.as_ref().map(|m| m.as_str().to_string()).unwrap_or_default();

    let span = tracing::info_span!(
        "http_request",
        host = %host,
        method = %method,
        path = %path,
        remote = %remote,
        real_ip = %real_ip,
        request_id = %local_request_id,
        route = %route,
        status = tracing::field::Empty,
    );

    span.in_scope(|| tracing::info!("HTTP request"));

    let start = Instant::now();
    req.extensions_mut().insert(RequestSpan {
        span: span.clone(),
        start,
        local_request_id,
    });

    let res = next.run(req).await;

    let status = res.status();
    span.record("status", status.as_u16());

    if status != StatusCode::SWITCHING_PROTOCOLS {
        let duration_us = start.elapsed().as_micros() as u64;
        span.in_scope(|| tracing::info!(duration_us, "HTTP response"));
    }
    // Status 101: the handler has handed off to a websocket task. That
    // task is responsible for logging "WS close" itself once the
    // connection actually ends, using the same span stashed above.

    res
}
