//! `POST <basepath>/setupz`: re-runs [`crate::Service::setup`] on every
//! registered service after verifying a shared secret in constant time
//! (`spec.md` §4.5 `Setup`).

use std::sync::Arc;
use std::time::Duration;

use axum::extract::State;
use axum::response::{IntoResponse, Response};
use governor_context::Context;
use http::StatusCode;
use serde::{Deserialize, Serialize};
use subtle::ConstantTimeEq;

use crate::state::CoreState;

/// Body of the setup request. `secret` is compared against the
/// configured `setupsecret` in constant time; everything else is passed
/// through to each service's `Setup` untouched, since the orchestrator
/// has no opinion on what a service needs to set itself up.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ReqSetup {
    pub secret: String,
    #[serde(flatten)]
    pub params: serde_json::Map<String, serde_json::Value>,
}

/// Cap on the setup request body; setup payloads are small, structured
/// configuration blobs, not file uploads.
const MAX_SETUP_BODY: u64 = 1 << 20;

const SECRET_TTL: Duration = Duration::from_secs(60);

pub async fn setup_handler(State(state): State<CoreState>, mut ctx: Context) -> Response {
    let req: ReqSetup = match ctx.bind(MAX_SETUP_BODY, true).await {
        Ok(req) => req,
        Err(err) => return ctx.write_error(&err),
    };

    let expected: String = match state.root_reader.get_secret("setupsecret", SECRET_TTL).await {
        Ok(secret) => secret,
        Err(err) => {
            let err = governor_errors::with_res(
                err,
                StatusCode::INTERNAL_SERVER_ERROR,
                None,
                "failed to resolve setup secret",
            );
            return ctx.write_error(&err);
        }
    };

    if !secret_matches(&req.secret, &expected) {
        return StatusCode::FORBIDDEN.into_response();
    }

    // Detach from the request's own lifetime: spawning lets setup run to
    // completion even if the client disconnects mid-request, matching
    // `spec.md`'s "detach from the request context" requirement.
    let services = state.services.clone();
    let req = Arc::new(req);
    let handle = tokio::spawn(async move {
        for def in services.iter() {
            def.service.setup(&req).await.map_err(|err| (def.name.clone(), err))?;
        }
        Ok::<(), (String, anyhow::Error)>(())
    });

    match handle.await {
        Ok(Ok(())) => ctx.write_json(StatusCode::OK, &serde_json::json!({ "version": state.version.to_string() })),
        Ok(Err((name, err))) => {
            tracing::error!(service = %name, error = ?err, "setup failed");
            let err = governor_errors::with_res(
                err,
                StatusCode::INTERNAL_SERVER_ERROR,
                None,
                format!("setup failed for service {name}"),
            );
            ctx.write_error(&err)
        }
        Err(join_err) => {
            tracing::error!(error = ?join_err, "setup task panicked");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

/// Constant-time comparison, matching Go's `subtle.ConstantTimeCompare`:
/// a length mismatch is rejected outright (lengths aren't secret), and
/// the byte-for-byte comparison of equal-length secrets never branches
/// on content.
fn secret_matches(provided: &str, expected: &str) -> bool {
    if provided.len() != expected.len() {
        return false;
    }
    bool::from(provided.as_bytes().ct_eq(expected.as_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn matches_equal_secrets() {
        assert!(secret_matches("s3cr3t", "s3cr3t"));
    }

    #[test]
    fn rejects_wrong_secret() {
        assert!(!secret_matches("wrong", "s3cr3t"));
    }

    #[test]
    fn rejects_different_length_secret() {
        assert!(!secret_matches("short", "a-much-longer-secret"));
    }
}
