use axum::extract::Request;
use axum::middleware::Next;
use axum::response::Response;

/// Normalizes `/foo/` to `/foo` before axum's own route matching sees the
/// request, so a path with or without a trailing slash dispatches to the
/// same handler and the handler observes the normalized form. The root
/// path `/` is left alone.
pub async fn strip_trailing_slash(mut req: Request, next: Next) -> Response {
    let uri = req.uri();
    if let Some(path_and_query) = uri.path_and_query() {
        let path = path_and_query.path();
        if path.len() > 1 && path.ends_with('/') {
            let trimmed = path.trim_end_matches('/');
            let trimmed = if trimmed.is_empty() { "/" } else { trimmed };
            let new_path_and_query = match path_and_query.query() {
                Some(q) => format!("{trimmed}?{q}"),
                None => trimmed.to_string(),
            };
            let mut parts = uri.clone().into_parts();
            parts.path_and_query = Some(new_path_and_query.parse().expect("rebuilt path_and_query is valid"));
            if let Ok(new_uri) = http::Uri::from_parts(parts) {
                *req.uri_mut() = new_uri;
            }
        }
    }
    next.run(req).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::routing::get;
    use axum::Router;
    use tower::ServiceExt;

    #[tokio::test]
    async fn trailing_slash_reaches_same_handler() {
        let app: Router = Router::new()
            .route("/foo", get(|| async { "ok" }))
            .layer(axum::middleware::from_fn(strip_trailing_slash));

        for path in ["/foo", "/foo/"] {
            let req = http::Request::builder().uri(path).body(Body::empty()).unwrap();
            let res = app.clone().oneshot(req).await.unwrap();
            assert_eq!(res.status(), http::StatusCode::OK, "path {path}");
        }
    }

    #[tokio::test]
    async fn root_path_is_untouched() {
        let app: Router = Router::new()
            .route("/", get(|| async { "ok" }))
            .layer(axum::middleware::from_fn(strip_trailing_slash));
        let req = http::Request::builder().uri("/").body(Body::empty()).unwrap();
        let res = app.oneshot(req).await.unwrap();
        assert_eq!(res.status(), http::StatusCode::OK);
    }
}
