//! Lets a handler declare `async fn handler(ctx: Context) -> Response`
//! directly as an axum handler, instead of only the raw
//! `(Request) -> Response` style axum supports out of the box. This is
//! the "thin adapter" `spec.md` §9's open question asks for: both
//! handler styles stay first-class because axum's `Handler` trait already
//! blanket-implements for any argument implementing `FromRequest`, so
//! nothing beyond this impl is needed to make `Context` one.

use std::collections::HashMap;
use std::net::SocketAddr;

use axum::extract::{ConnectInfo, FromRequest, FromRequestParts, Path, Request};
use governor_context::{Context, RequestSpan};
use http::request::Parts;

use crate::real_ip::RealIp;
use crate::RouterState;

impl FromRequest<RouterState> for Context {
    type Rejection = std::convert::Infallible;

    async fn from_request(req: Request, state: &RouterState) -> Result<Self, Self::Rejection> {
        let (mut parts, body) = req.into_parts();
        let ctx = build_context(&mut parts, state).await;
        Ok(with_body(ctx, body))
    }
}

/// Shared by the `FromRequest` impl above and by the websocket upgrade
/// path, which needs a `Context` built from request parts before the
/// body (the upgrade itself) is consumed.
pub async fn build_context(parts: &mut Parts, state: &RouterState) -> Context {
    let params = Path::<HashMap<String, String>>::from_request_parts(parts, state)
        .await
        .map(|p| p.0)
        .unwrap_or_default();

    let remote = parts
        .extensions
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ci| ci.0.ip());
    let real_ip = parts.extensions.get::<RealIp>().map(|r| r.0).or(remote);
    let request_span = parts.extensions.get::<RequestSpan>().cloned();
    let (span, local_request_id) = match request_span {
        Some(rs) => (rs.span, rs.local_request_id),
        None => (tracing::Span::none(), state.next_request_id()),
    };

    Context::new(
        parts.method.clone(),
        parts.uri.clone(),
        parts.headers.clone(),
        params,
        remote,
        real_ip,
        local_request_id,
        axum::body::Body::empty(),
        span,
    )
}

fn with_body(mut ctx: Context, body: axum::body::Body) -> Context {
    ctx.replace_body(body);
    ctx
}
