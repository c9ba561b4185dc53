use std::future::Future;
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::response::Response;
use governor_errors::ErrorWS;

/// Subprotocol governor speaks over websocket connections. A server that
/// doesn't see this offered by the client falls back to no subprotocol
/// rather than rejecting the handshake, since the protocol itself hasn't
/// changed — only the name clients opt into is new.
pub const GOVERNOR_WS_SUBPROTOCOL: &str = "xorkevin.dev-governor_ws_v1alpha1";

/// Picks `GOVERNOR_WS_SUBPROTOCOL` out of a client's offered list, if
/// present.
pub fn select_subprotocol<'a>(offered: impl IntoIterator<Item = &'a str>) -> Option<&'static str> {
    offered
        .into_iter()
        .any(|p| p == GOVERNOR_WS_SUBPROTOCOL)
        .then_some(GOVERNOR_WS_SUBPROTOCOL)
}

/// Completes a websocket handshake extracted via axum's
/// `WebSocketUpgrade`, negotiating [`GOVERNOR_WS_SUBPROTOCOL`] if the
/// client offered it, then hands the resulting [`Websocket`] to `run`.
/// `spec.md` §4.3 describes this as `Context::Websocket(protocols)`;
/// axum requires the upgrade extractor to be pulled out of the request
/// parts before `Context`'s own body-consuming extraction runs, so this
/// is a free function handlers call with their already-extracted
/// `WebSocketUpgrade` rather than a `Context` method.
pub fn upgrade<F, Fut>(ws: WebSocketUpgrade, run: F) -> Response
where
    F: FnOnce(Websocket) -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    ws.protocols([GOVERNOR_WS_SUBPROTOCOL])
        .on_upgrade(move |socket| async move { run(Websocket::new(socket)).await })
}

/// Thin wrapper over axum's `WebSocket`, enforcing governor's default
/// read-size limit and a bounded write timeout so one slow client can't
/// tie up a handler forever. Grounded in the teacher's
/// `common::http::websocket` fork, minus the permessage-deflate
/// extension governor does not need.
pub struct Websocket {
    inner: WebSocket,
    read_limit: usize,
    write_timeout: Duration,
}

impl Websocket {
    pub const DEFAULT_READ_LIMIT: usize = 32_768;
    pub const DEFAULT_WRITE_TIMEOUT: Duration = Duration::from_secs(5);

    pub fn new(inner: WebSocket) -> Self {
        Self {
            inner,
            read_limit: Self::DEFAULT_READ_LIMIT,
            write_timeout: Self::DEFAULT_WRITE_TIMEOUT,
        }
    }

    pub fn with_read_limit(mut self, limit: usize) -> Self {
        self.read_limit = limit;
        self
    }

    pub fn with_write_timeout(mut self, timeout: Duration) -> Self {
        self.write_timeout = timeout;
        self
    }

    /// Receives the next message, rejecting any single frame larger than
    /// `read_limit` rather than buffering it.
    pub async fn recv(&mut self) -> anyhow::Result<Option<Message>> {
        let Some(msg) = self.inner.recv().await else {
            return Ok(None);
        };
        let msg = msg.map_err(|e| {
            governor_errors::with_res(
                anyhow::Error::from(e),
                http::StatusCode::BAD_REQUEST,
                None,
                "websocket read failed",
            )
        })?;
        let len = match &msg {
            Message::Text(t) => t.len(),
            Message::Binary(b) => b.len(),
            _ => 0,
        };
        if len > self.read_limit {
            let err = ErrorWS::new(1009, format!("message exceeds {} bytes", self.read_limit));
            self.close_with(err.clone()).await.ok();
            return Err(anyhow::Error::new(err));
        }
        Ok(Some(msg))
    }

    /// Sends a message, erroring out if it doesn't clear the socket
    /// within the configured write timeout instead of blocking forever on
    /// a stalled peer.
    pub async fn send(&mut self, msg: Message) -> anyhow::Result<()> {
        tokio::time::timeout(self.write_timeout, self.inner.send(msg))
            .await
            .map_err(|_| {
                governor_errors::with_res(
                    anyhow::anyhow!("websocket write timed out"),
                    http::StatusCode::REQUEST_TIMEOUT,
                    None,
                    "websocket write timed out",
                )
            })?
            .map_err(|e| {
                governor_errors::with_res(anyhow::Error::from(e), http::StatusCode::BAD_GATEWAY, None, "websocket write failed")
            })
    }

    /// Closes the connection with the close code and reason carried by
    /// `err`.
    pub async fn close_with(&mut self, err: ErrorWS) -> anyhow::Result<()> {
        let frame = axum::extract::ws::CloseFrame {
            code: err.status,
            reason: err.reason.clone().into(),
        };
        self.send(Message::Close(Some(frame))).await
    }

    /// Closes the connection on the normal path (handler finished without
    /// error), logging the single "WS close" line `spec.md` §4.4 requires
    /// in place of "HTTP response" for upgraded connections.
    pub async fn close_normal(&mut self, span: &tracing::Span, start: std::time::Instant) {
        let duration_ms = start.elapsed().as_millis() as u64;
        span.in_scope(|| tracing::info!(duration_ms, close_code = 1000u16, "WS close"));
        let _ = self
            .send(Message::Close(Some(axum::extract::ws::CloseFrame {
                code: 1000,
                reason: "".into(),
            })))
            .await;
    }

    /// Classifies `err` (via its nearest [`ErrorWS`], defaulting to an
    /// internal-error close if none is attached), emits a close frame
    /// carrying that code/reason, and logs "WS close" at WARN for a
    /// client-attributable close or ERROR for an internal one.
    pub async fn close_error(&mut self, span: &tracing::Span, start: std::time::Instant, err: &anyhow::Error) {
        let ws_err = err
            .chain()
            .find_map(|c| c.downcast_ref::<ErrorWS>())
            .cloned()
            .unwrap_or_else(|| ErrorWS::new(1011, "internal error"));
        let duration_ms = start.elapsed().as_millis() as u64;
        let internal = ws_err.status == 1011;
        span.in_scope(|| {
            if internal {
                tracing::error!(duration_ms, close_code = ws_err.status, reason = %ws_err.reason, "WS close");
            } else {
                tracing::warn!(duration_ms, close_code = ws_err.status, reason = %ws_err.reason, "WS close");
            }
        });
        let _ = self.close_with(ws_err).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn selects_known_subprotocol() {
        let offered = vec!["chat", GOVERNOR_WS_SUBPROTOCOL];
        assert_eq!(select_subprotocol(offered), Some(GOVERNOR_WS_SUBPROTOCOL));
    }

    #[test]
    fn selects_nothing_when_not_offered() {
        let offered = vec!["chat", "other"];
        assert_eq!(select_subprotocol(offered), None);
    }
}
