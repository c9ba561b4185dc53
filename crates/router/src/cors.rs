//! CORS policy (C4 middleware steps 5+6). Unified into a single
//! `CorsLayer` with a dynamic origin predicate, rather than two separate
//! middlewares, since `tower_http::cors::AllowOrigin::predicate` already
//! gives per-request access to both the request path (for the always-allow
//! list) and the `Origin` header (for the configured allowlist) — adding a
//! second layer just to special-case a handful of paths would duplicate
//! the method/header/credentials policy for no benefit.

use std::sync::Arc;
use std::time::Duration;

use governor_config::{CORSPathRule, CorsConfig};
use http::{HeaderValue, Method};
use tower_http::cors::{AllowHeaders, AllowOrigin, CorsLayer};

const MAX_AGE: Duration = Duration::from_secs(300);

pub fn build_cors_layer(cfg: &CorsConfig, always_allow: &[CORSPathRule]) -> CorsLayer {
    let allowed_origins: Vec<HeaderValue> = cfg
        .alloworigins
        .iter()
        .filter_map(|origin| origin.parse().ok())
        .collect();
    let always_allow: Arc<[CORSPathRule]> = Arc::from(always_allow.to_vec());

    let allow_origin = AllowOrigin::predicate(move |origin, parts| {
        if always_allow.iter().any(|rule| rule.pattern.is_match(parts.uri.path())) {
            return true;
        }
        allowed_origins.iter().any(|allowed| allowed == origin)
    });

    CorsLayer::new()
        .allow_origin(allow_origin)
        .allow_methods([
            Method::HEAD,
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::PATCH,
            Method::DELETE,
        ])
        .allow_headers(AllowHeaders::any())
        .allow_credentials(cfg.credentials)
        .max_age(MAX_AGE)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::routing::get;
    use axum::Router;
    use regex::Regex;
    use tower::ServiceExt;

    fn app(cfg: CorsConfig, always_allow: Vec<CORSPathRule>) -> Router {
        let layer = build_cors_layer(&cfg, &always_allow);
        Router::new()
            .route("/api/servicea/ping/allowall", get(|| async { "ok" }))
            .route("/api/servicea/ping/paramvalue", get(|| async { "ok" }))
            .layer(layer)
    }

    #[tokio::test]
    async fn always_allow_path_is_permissive_regardless_of_origin() {
        let cfg = CorsConfig {
            alloworigins: vec!["http://example.com".to_string()],
            allowpaths: vec![],
            credentials: true,
        };
        let always_allow = vec![CORSPathRule {
            pattern: Regex::new(r"^/api/servicea/ping/allowall$").unwrap(),
        }];
        let app = app(cfg, always_allow);

        let req = http::Request::builder()
            .method("OPTIONS")
            .uri("/api/servicea/ping/allowall")
            .header("origin", "http://localhost:3000")
            .header("access-control-request-method", "GET")
            .body(Body::empty())
            .unwrap();
        let res = app.oneshot(req).await.unwrap();
        assert_eq!(
            res.headers().get("access-control-allow-origin").unwrap(),
            "http://localhost:3000"
        );
    }

    #[tokio::test]
    async fn other_paths_use_configured_origin_allowlist() {
        let cfg = CorsConfig {
            alloworigins: vec!["http://localhost:3000".to_string()],
            allowpaths: vec![],
            credentials: true,
        };
        let app = app(cfg, vec![]);

        let req = http::Request::builder()
            .method("OPTIONS")
            .uri("/api/servicea/ping/paramvalue")
            .header("origin", "http://evil.example")
            .header("access-control-request-method", "GET")
            .body(Body::empty())
            .unwrap();
        let res = app.oneshot(req).await.unwrap();
        assert!(res.headers().get("access-control-allow-origin").is_none());
    }
}
