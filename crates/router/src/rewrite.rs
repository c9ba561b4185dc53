//! Path rewrite middleware: applies the configured [`RewriteRule`] table
//! to the request path before axum's router sees it, letting a service
//! mount routes under its own namespace while still answering requests
//! that arrive at a legacy or `.well-known`-style path.

use axum::extract::{Request, State};
use axum::middleware::Next;
use axum::response::Response;
use governor_config::RewriteRule;
use http::Method;

use crate::RouterState;

/// Rewrites `path` against the first matching rule in `rules`, in table
/// order. A rule matches when its host (if set) equals `host` and its
/// method set (if set) contains `method`; only one rule applies per
/// request, mirroring the teacher's own single-pass `nest`/`route` model
/// where a path maps to exactly one handler.
pub fn rewrite_path(path: &str, host: Option<&str>, method: &Method, rules: &[RewriteRule]) -> Option<String> {
    for rule in rules {
        if let Some(expected_host) = &rule.host_match {
            if host != Some(expected_host.as_str()) {
                continue;
            }
        }
        if let Some(methods) = &rule.method_set {
            if !methods.iter().any(|m| m.eq_ignore_ascii_case(method.as_str())) {
                continue;
            }
        }
        if let Some(captures) = rule.pattern.captures(path) {
            let mut dest = String::new();
            captures.expand(&rule.replace, &mut dest);
            return Some(dest);
        }
    }
    None
}

pub async fn rewrite_middleware(State(state): State<RouterState>, mut req: Request, next: Next) -> Response {
    let host = req
        .headers()
        .get(http::header::HOST)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    let path = req.uri().path().to_string();

    if let Some(rewritten) = rewrite_path(&path, host.as_deref(), req.method(), &state.rewrite_rules) {
        let mut parts = req.uri().clone().into_parts();
        let new_path_and_query = match req.uri().query() {
            Some(q) => format!("{rewritten}?{q}"),
            None => rewritten,
        };
        parts.path_and_query = Some(new_path_and_query.parse().expect("rewritten path_and_query is valid"));
        if let Ok(new_uri) = http::Uri::from_parts(parts) {
            *req.uri_mut() = new_uri;
        }
    }

    next.run(req).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use regex::Regex;

    fn rule(host: Option<&str>, pattern: &str, replace: &str) -> RewriteRule {
        RewriteRule {
            host_match: host.map(str::to_string),
            method_set: None,
            pattern: Regex::new(pattern).unwrap(),
            replace: replace.to_string(),
        }
    }

    #[test]
    fn rewrites_well_known_path_to_service_route() {
        let rules = vec![rule(
            Some("localhost:8080"),
            r"^/\.well-known/(.+)$",
            "/api/servicea/$1",
        )];
        let rewritten = rewrite_path(
            "/.well-known/ping/paramvalue",
            Some("localhost:8080"),
            &Method::POST,
            &rules,
        );
        assert_eq!(rewritten.as_deref(), Some("/api/servicea/ping/paramvalue"));
    }

    #[test]
    fn no_match_leaves_path_untouched() {
        let rules = vec![rule(Some("localhost:8080"), r"^/\.well-known/(.+)$", "/api/servicea/$1")];
        let rewritten = rewrite_path("/api/servicea/ping", Some("localhost:8080"), &Method::POST, &rules);
        assert_eq!(rewritten, None);
    }

    #[test]
    fn host_mismatch_skips_rule() {
        let rules = vec![rule(Some("other-host"), r"^/\.well-known/(.+)$", "/api/servicea/$1")];
        let rewritten = rewrite_path(
            "/.well-known/ping",
            Some("localhost:8080"),
            &Method::POST,
            &rules,
        );
        assert_eq!(rewritten, None);
    }
}
