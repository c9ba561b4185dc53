//! Per-request context (C3): parameter/query/header/cookie access, bounded
//! body reading, JSON binding, response writing, and a thin websocket
//! wrapper. Grounded in the teacher's `common::http` module, which wraps
//! axum's own request/response types rather than reinventing them —
//! `Context` here does the same, adding only the bookkeeping governor's
//! handlers need (local request id, matched route, structured logging
//! fields).

mod bind;
mod websocket;

pub use bind::{read_all_body, ReadBodyError};
pub use websocket::{select_subprotocol, upgrade, Websocket, GOVERNOR_WS_SUBPROTOCOL};

use std::collections::HashMap;
use std::net::IpAddr;

use axum::body::Body;
use axum::response::{IntoResponse, Response};
use axum_extra::extract::cookie::{Cookie, CookieJar};
use governor_errors::GovernorErrorExt;
use http::header::AUTHORIZATION;
use http::{HeaderMap, HeaderValue, Method, StatusCode, Uri};
use serde::Serialize;
use serde::de::DeserializeOwned;

/// Carried in request extensions by the router's request-logger
/// middleware: the span every log line for a request is emitted under,
/// and when the request started. [`Context`] picks this up so
/// [`Context::log_attrs`] records into the same span the logger will use
/// to emit "HTTP response"/"WS close" at exit.
#[derive(Clone)]
pub struct RequestSpan {
    pub span: tracing::Span,
    pub start: std::time::Instant,
    pub local_request_id: String,
}

/// Everything a handler needs about one in-flight request. Built by the
/// router just before dispatch; never constructed by handler code
/// directly.
pub struct Context {
    pub method: Method,
    pub uri: Uri,
    pub headers: HeaderMap,
    pub params: HashMap<String, String>,
    pub query: HashMap<String, String>,
    pub remote: Option<IpAddr>,
    pub real_ip: Option<IpAddr>,
    pub local_request_id: String,
    pub matched_route: Option<String>,
    body: Option<Body>,
    span: tracing::Span,
    /// Headers a handler wants set on the eventual response, applied by
    /// every `write_*` method. Kept separate from the request's own
    /// `headers` since a handler reads one and writes the other.
    response_headers: HeaderMap,
    /// Ambient request-scoped values (`Context::get`/`set` in `spec.md`
    /// §4.3), keyed by type the same way `axum::Extensions` is, since a
    /// handler only ever looks one up by the type it stored.
    values: http::Extensions,
}

impl Context {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        method: Method,
        uri: Uri,
        headers: HeaderMap,
        params: HashMap<String, String>,
        remote: Option<IpAddr>,
        real_ip: Option<IpAddr>,
        local_request_id: String,
        body: Body,
        span: tracing::Span,
    ) -> Self {
        let query = uri
            .query()
            .map(parse_query)
            .unwrap_or_default();
        Self {
            method,
            uri,
            headers,
            params,
            query,
            remote,
            real_ip,
            local_request_id,
            matched_route: None,
            body: Some(body),
            span,
            response_headers: HeaderMap::new(),
            values: http::Extensions::new(),
        }
    }

    pub fn param(&self, name: &str) -> Option<&str> {
        self.params.get(name).map(String::as_str)
    }

    pub fn query(&self, name: &str) -> Option<&str> {
        self.query.get(name).map(String::as_str)
    }

    pub fn query_str(&self, name: &str, default: &str) -> String {
        self.query(name).unwrap_or(default).to_string()
    }

    pub fn query_int(&self, name: &str, default: i32) -> i32 {
        self.query(name).and_then(|v| v.parse().ok()).unwrap_or(default)
    }

    pub fn query_int64(&self, name: &str, default: i64) -> i64 {
        self.query(name).and_then(|v| v.parse().ok()).unwrap_or(default)
    }

    pub fn query_bool(&self, name: &str, default: bool) -> bool {
        self.query(name).and_then(|v| v.parse().ok()).unwrap_or(default)
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    /// Sets a response header, replacing any prior value.
    pub fn header_set(&mut self, name: http::header::HeaderName, value: &str) {
        if let Ok(value) = HeaderValue::from_str(value) {
            self.response_headers.insert(name, value);
        }
    }

    /// Appends a response header, keeping any prior values under the same
    /// name (for multi-valued headers like `Set-Cookie`).
    pub fn header_add(&mut self, name: http::header::HeaderName, value: &str) {
        if let Ok(value) = HeaderValue::from_str(value) {
            self.response_headers.append(name, value);
        }
    }

    pub fn header_del(&mut self, name: &http::header::HeaderName) {
        self.response_headers.remove(name);
    }

    pub fn cookie(&self, name: &str) -> Option<Cookie<'static>> {
        CookieJar::from_headers(&self.headers).get(name).cloned()
    }

    /// Queues a `Set-Cookie` response header.
    pub fn set_cookie(&mut self, cookie: Cookie<'static>) {
        self.header_add(http::header::SET_COOKIE, &cookie.encoded().to_string());
    }

    /// Request-scoped value bag, the same shape as `axum::Extensions`:
    /// stored and retrieved by the type of `T` itself.
    pub fn get<T: Send + Sync + 'static>(&self) -> Option<&T> {
        self.values.get::<T>()
    }

    pub fn set<T: Send + Sync + 'static>(&mut self, value: T) {
        self.values.insert(value);
    }

    /// Decodes an RFC 7617 `Authorization: Basic` header into
    /// `(username, password)`.
    pub fn basic_auth(&self) -> Option<(String, String)> {
        let raw = self.headers.get(AUTHORIZATION)?.to_str().ok()?;
        let encoded = raw.strip_prefix("Basic ")?;
        let decoded = base64_decode(encoded)?;
        let text = String::from_utf8(decoded).ok()?;
        let (user, pass) = text.split_once(':')?;
        Some((user.to_string(), pass.to_string()))
    }

    /// Sets the span fields a request logger needs once routing and
    /// authentication have narrowed down who's asking and for what.
    pub fn log_attrs(&mut self, route: &str) {
        self.matched_route = Some(route.to_string());
        self.span.record("route", route);
        self.span.record("request_id", self.local_request_id.as_str());
    }

    pub fn span(&self) -> &tracing::Span {
        &self.span
    }

    /// Swaps in the real request body after construction. Used by the
    /// router's `FromRequest` adapter, which has to extract path params
    /// from the request's parts before it can hand the body over.
    pub fn replace_body(&mut self, body: Body) {
        self.body = Some(body);
    }

    /// Takes the body out for a websocket upgrade, which needs the raw
    /// `Request` (reconstructed from parts + this body) rather than a
    /// `Bytes` read.
    pub fn take_body(&mut self) -> Option<Body> {
        self.body.take()
    }

    /// Reads the body up to `limit` bytes, mapping an over-limit body to
    /// HTTP 413 rather than silently truncating it.
    pub async fn read_all_body(&mut self, limit: u64) -> anyhow::Result<bytes::Bytes> {
        let body = self
            .body
            .take()
            .ok_or_else(|| governor_errors::with_unreachable(anyhow::anyhow!("body already consumed"), "Context::read_all_body called twice"))?;
        read_all_body(body, limit).await
    }

    /// Reads and deserializes a JSON body, rejecting non-JSON content
    /// types, unrecognized charsets, and trailing bytes after the JSON
    /// value. When `allow_unknown` is false, any field in the body that
    /// `T` doesn't declare is also rejected with 400.
    pub async fn bind<T: DeserializeOwned>(&mut self, limit: u64, allow_unknown: bool) -> anyhow::Result<T> {
        bind::bind_json(self, limit, allow_unknown).await
    }

    /// Merges the headers a handler queued via [`Self::header_set`]/
    /// [`Self::header_add`] into `res`, without clobbering headers the
    /// writer itself just set (e.g. `Content-Type`).
    fn apply_response_headers(&self, res: &mut Response) {
        for (name, value) in self.response_headers.iter() {
            res.headers_mut().append(name, value.clone());
        }
    }

    pub fn write_json<T: Serialize>(&self, status: StatusCode, body: &T) -> Response {
        let mut res = (status, axum::Json(body)).into_response();
        self.apply_response_headers(&mut res);
        res
    }

    pub fn write_string(&self, status: StatusCode, body: impl Into<String>) -> Response {
        let mut res = (
            status,
            [(http::header::CONTENT_TYPE, HeaderValue::from_static("text/plain; charset=utf-8"))],
            body.into(),
        )
            .into_response();
        self.apply_response_headers(&mut res);
        res
    }

    pub fn write_status(&self, status: StatusCode) -> Response {
        let mut res = status.into_response();
        self.apply_response_headers(&mut res);
        res
    }

    /// Issues an HTTP redirect. `status` should be one of the 3xx
    /// redirect codes; left to the caller rather than hard-coded since
    /// governor handlers use both 302 (temporary) and 303 (see-other)
    /// depending on context.
    pub fn redirect(&self, status: StatusCode, location: &str) -> Response {
        let mut res = status.into_response();
        if let Ok(value) = HeaderValue::from_str(location) {
            res.headers_mut().insert(http::header::LOCATION, value);
        }
        self.apply_response_headers(&mut res);
        res
    }

    /// Streams `body` back as the response, setting `Content-Type` to
    /// `content_type` and status to `status`.
    pub fn write_file(&self, status: StatusCode, content_type: &str, body: bytes::Bytes) -> Response {
        let mut res = (status, body).into_response();
        if let Ok(value) = HeaderValue::from_str(content_type) {
            res.headers_mut().insert(http::header::CONTENT_TYPE, value);
        }
        self.apply_response_headers(&mut res);
        res
    }

    /// Renders an error the same way regardless of where in the handler
    /// tree it was raised: status and message come from the error's
    /// [`governor_errors::ErrorRes`] context (defaulting to a generic 500),
    /// the body never leaks anything beyond that. Before writing, logs
    /// per the chain's [`governor_errors::LogLevel`] (skipped entirely for
    /// `ErrorNoLog`) and, for `ErrorTooManyRequests`, adds a `Retry-After`
    /// header in RFC 1123 form.
    pub fn write_error(&self, err: &anyhow::Error) -> Response {
        #[derive(Serialize)]
        struct Body<'a> {
            message: &'a str,
            #[serde(skip_serializing_if = "Option::is_none")]
            code: Option<&'a str>,
        }

        use governor_errors::LogLevel;
        match err.log_level() {
            LogLevel::Skip => {}
            LogLevel::Warn => {
                self.span.in_scope(|| tracing::warn!(error = ?err, "{:#}", err));
            }
            LogLevel::Error => {
                self.span.in_scope(|| tracing::error!(error = ?err, "{:#}", err));
            }
        }

        let status = err.status();
        let message = err.public_message();
        let code = err.error_res().and_then(|e| e.code.as_deref());
        let mut res = (status, axum::Json(Body { message: &message, code })).into_response();

        if let Some(retry_after) = err.retry_after() {
            if let Ok(value) = HeaderValue::from_str(&http_date(retry_after)) {
                res.headers_mut().insert(http::header::RETRY_AFTER, value);
            }
        }

        res
    }
}

/// Formats `now + delta` as an RFC 1123 HTTP-date in UTC, the form
/// `Retry-After` requires when given an absolute time rather than a
/// number of seconds.
fn http_date(delta: std::time::Duration) -> String {
    let when = chrono::Utc::now() + chrono::Duration::from_std(delta).unwrap_or_default();
    when.format("%a, %d %b %Y %H:%M:%S GMT").to_string()
}

fn parse_query(raw: &str) -> HashMap<String, String> {
    url::form_urlencoded::parse(raw.as_bytes())
        .into_owned()
        .collect()
}

fn base64_decode(input: &str) -> Option<Vec<u8>> {
    use base64::Engine;
    base64::engine::general_purpose::STANDARD.decode(input).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn empty_context(headers: HeaderMap) -> Context {
        Context::new(
            Method::GET,
            "/x?a=1&b=two".parse().unwrap(),
            headers,
            HashMap::new(),
            None,
            None,
            "inst-0".to_string(),
            Body::empty(),
            tracing::Span::none(),
        )
    }

    #[test]
    fn parses_query_string() {
        let ctx = empty_context(HeaderMap::new());
        assert_eq!(ctx.query("a"), Some("1"));
        assert_eq!(ctx.query("b"), Some("two"));
        assert_eq!(ctx.query("missing"), None);
    }

    #[test]
    fn decodes_basic_auth() {
        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, "Basic dXNlcjpwYXNz".parse().unwrap());
        let ctx = empty_context(headers);
        assert_eq!(ctx.basic_auth(), Some(("user".to_string(), "pass".to_string())));
    }
}
