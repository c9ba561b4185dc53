//! `GET <basepath>/healthz/{live,ready,version}` (`spec.md` §4.5
//! `Health`). Mounted alongside `/setupz` on the same router graph, so
//! both get the full middleware chain (compression, CORS, request
//! logging) for free rather than being special-cased.

use axum::extract::State;
use axum::response::{IntoResponse, Response};
use http::StatusCode;
use serde::Serialize;

use crate::state::CoreState;

pub async fn live_handler() -> Response {
    StatusCode::OK.into_response()
}

#[derive(Serialize)]
struct HealthError {
    message: String,
}

#[derive(Serialize)]
struct ReadyRes {
    time: i64,
    errs: Vec<HealthError>,
}

pub async fn ready_handler(State(state): State<CoreState>) -> Response {
    let mut errs = Vec::new();
    for def in state.services.iter() {
        if let Err(err) = def.service.health().await {
            tracing::warn!(service = %def.name, error = ?err, "service health check failed");
            errs.push(HealthError {
                message: format!("{}: {:#}", def.name, err),
            });
        }
    }

    let status = if errs.is_empty() { StatusCode::OK } else { StatusCode::INTERNAL_SERVER_ERROR };
    let body = ReadyRes {
        time: chrono::Utc::now().timestamp(),
        errs,
    };
    (status, axum::Json(body)).into_response()
}

pub async fn version_handler(State(state): State<CoreState>) -> Response {
    state.version.to_string().into_response()
}
