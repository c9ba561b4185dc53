//! A `reqwest`-based HTTP fetcher scoped to one service's base URL
//! (`spec.md` §4.6). Grounded in `crates/http_client/src/lib.rs`'s
//! process-wide client reuse, without the response-caching middleware the
//! teacher layers on top of it (`reqwest-middleware`, `http-cache`,
//! `moka` aren't needed here — a governor client talks to a live control
//! plane, not cacheable third-party responses).

use bytes::Bytes;
use governor_errors::{ErrorClient, ErrorRes};
use http::Method;
use reqwest::{Client, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use serde::Serialize;

/// Scoped to one service's base URL; every request is built relative to
/// it. Construct from a shared `reqwest::Client` so every `HTTPClient` in
/// the process reuses the same connection pool.
pub struct HTTPClient {
    base_url: String,
    inner: Client,
}

impl HTTPClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self::with_client(base_url, Client::new())
    }

    pub fn with_client(base_url: impl Into<String>, inner: Client) -> Self {
        Self {
            base_url: base_url.into(),
            inner,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url.trim_end_matches('/'), path)
    }

    /// Builds a request relative to the client's base URL. Does not send
    /// it — pair with [`Self::do_req`].
    pub fn req(&self, method: Method, path: &str, body: Option<Bytes>) -> anyhow::Result<RequestBuilder> {
        let mut builder = self.inner.request(method, self.url(path));
        if let Some(body) = body {
            builder = builder.body(body);
        }
        Ok(builder)
    }

    /// Sends `req`. On status >= 400, parses the JSON error body and
    /// returns it wrapped as [`ErrorClient::ServerRes`].
    pub async fn do_req(&self, req: RequestBuilder) -> anyhow::Result<Response> {
        let res = req.send().await.map_err(|e| {
            governor_errors::with_res(
                ErrorClient::SendRequest(e.to_string()),
                http::StatusCode::BAD_GATEWAY,
                None,
                "failed to send request",
            )
        })?;

        if res.status().as_u16() >= 400 {
            let status = res.status();
            let body = res.text().await.unwrap_or_default();
            let err_res: ErrorRes = serde_json::from_str(&body)
                .unwrap_or_else(|_| ErrorRes::new(status, None, format!("server returned {status} with unparseable body")));
            return Err(governor_errors::with_res(
                ErrorClient::ServerRes(err_res.clone()),
                err_res.status,
                err_res.code.clone(),
                err_res.message.clone(),
            ));
        }

        Ok(res)
    }
}

/// Thin JSON-oriented layer over [`HTTPClient`] (`spec.md` §4.6
/// `HTTPFetcher`): marshals/unmarshals JSON and enforces the success
/// status range, draining the response body on every exit path so the
/// underlying connection is returned to the pool.
pub struct HTTPFetcher {
    client: HTTPClient,
}

impl HTTPFetcher {
    pub fn new(client: HTTPClient) -> Self {
        Self { client }
    }

    pub fn req_json(&self, method: Method, path: &str, value: &impl Serialize) -> anyhow::Result<RequestBuilder> {
        let body = serde_json::to_vec(value).map_err(|e| {
            governor_errors::with_res(
                ErrorClient::BuildRequest(e.to_string()),
                http::StatusCode::INTERNAL_SERVER_ERROR,
                None,
                "failed to marshal request body",
            )
        })?;
        let builder = self.client.req(method, path, Some(Bytes::from(body)))?;
        Ok(builder.header(http::header::CONTENT_TYPE, "application/json"))
    }

    /// Sends `req` and decodes a JSON success response. Rejects 204 (No
    /// Content) since there is nothing to decode.
    pub async fn do_json<T: DeserializeOwned>(&self, req: RequestBuilder) -> anyhow::Result<T> {
        let res = self.client.do_req(req).await?;
        if res.status() == http::StatusCode::NO_CONTENT {
            return Err(governor_errors::with_res(
                ErrorClient::InvalidServerRes("unexpected 204 No Content".to_string()),
                http::StatusCode::BAD_GATEWAY,
                None,
                "expected a JSON response body",
            ));
        }
        let body = res.bytes().await.map_err(|e| {
            governor_errors::with_res(
                ErrorClient::InvalidServerRes(e.to_string()),
                http::StatusCode::BAD_GATEWAY,
                None,
                "failed to read response body",
            )
        })?;
        serde_json::from_slice(&body).map_err(|e| {
            governor_errors::with_res(
                ErrorClient::InvalidServerRes(e.to_string()),
                http::StatusCode::BAD_GATEWAY,
                None,
                "failed to decode response body",
            )
        })
    }

    /// Sends `req` and discards the body, for endpoints with no
    /// meaningful response payload.
    pub async fn do_no_content(&self, req: RequestBuilder) -> anyhow::Result<()> {
        let res = self.client.do_req(req).await?;
        let _ = res.bytes().await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use governor_errors::GovernorErrorExt;
    use serde_json::json;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn do_json_decodes_success_body() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/widgets"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"name": "gizmo"})))
            .mount(&server)
            .await;

        let fetcher = HTTPFetcher::new(HTTPClient::new(server.uri()));
        let req = fetcher.req_json(Method::POST, "/widgets", &json!({"name": "gizmo"})).unwrap();
        let decoded: serde_json::Value = fetcher.do_json(req).await.unwrap();
        assert_eq!(decoded["name"], "gizmo");
    }

    #[tokio::test]
    async fn server_error_becomes_server_res_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/widgets/missing"))
            .respond_with(ResponseTemplate::new(404).set_body_json(json!({"message": "no such widget"})))
            .mount(&server)
            .await;

        let client = HTTPClient::new(server.uri());
        let req = client.req(Method::GET, "/widgets/missing", None).unwrap();
        let err = client.do_req(req).await.unwrap_err();
        assert_eq!(err.status(), http::StatusCode::NOT_FOUND);
        assert_eq!(err.public_message(), "no such widget");
    }
}
