//! Structured error model shared by every governor component.
//!
//! Errors flow through the system as a plain `anyhow::Error`. Call sites
//! that want to attach HTTP-visible meaning do so by pushing a small marker
//! type onto the error's context chain with `.context(...)`, the same way
//! the original server wraps Go errors with sentinel types it can later
//! match on. Readers that need to classify an error (the router's error
//! writer, a client's response decoder) walk the chain with
//! [`GovernorErrorExt::find`] instead of downcasting the error itself,
//! since the marker is rarely the outermost context frame.

use std::fmt;
use std::time::Duration;

use http::StatusCode;
use serde::{Deserialize, Serialize};

/// HTTP-visible error: status code, optional machine-readable code, and a
/// message safe to return to a caller. Attach with [`with_res`].
#[derive(Debug, Clone, Serialize, Deserialize, thiserror::Error)]
#[error("{message}")]
pub struct ErrorRes {
    #[serde(with = "status_code_serde")]
    pub status: StatusCode,
    pub code: Option<String>,
    pub message: String,
}

impl ErrorRes {
    pub fn new(status: StatusCode, code: impl Into<Option<String>>, message: impl Into<String>) -> Self {
        Self {
            status,
            code: code.into(),
            message: message.into(),
        }
    }
}

mod status_code_serde {
    use http::StatusCode;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(status: &StatusCode, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u16(status.as_u16())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<StatusCode, D::Error> {
        let code = u16::deserialize(d)?;
        StatusCode::from_u16(code).map_err(serde::de::Error::custom)
    }
}

/// Marks an error as rate limited. Always wrapped alongside an
/// [`ErrorRes`] carrying HTTP 429, so a caller that only understands
/// `ErrorRes` still gets a sane response.
#[derive(Debug, Clone, thiserror::Error)]
#[error("too many requests")]
pub struct ErrorTooManyRequests {
    pub retry_after: Option<Duration>,
}

/// Marks an error that should not be logged by the router's error writer,
/// for expected conditions (client disconnects, canceled requests) that
/// would otherwise spam logs at WARN/ERROR.
#[derive(Debug, Clone, Copy, thiserror::Error)]
#[error("no log")]
pub struct ErrorNoLog;

/// Marks an invariant violation: code reached a branch it believes is
/// unreachable. Always logged at ERROR regardless of the HTTP status
/// attached, mirroring how a panic would be reported if recovered.
#[derive(Debug, Clone, thiserror::Error)]
#[error("unreachable: {message}")]
pub struct ErrorUnreachable {
    pub message: String,
}

/// Marks a configuration resolution failure (missing key, malformed
/// value, failed validation).
#[derive(Debug, Clone, thiserror::Error)]
#[error("invalid config: {message}")]
pub struct ErrorInvalidConfig {
    pub message: String,
}

/// Marks a secret backend failure (vault unreachable, path not found,
/// decode failure).
#[derive(Debug, Clone, thiserror::Error)]
#[error("secret error: {message}")]
pub struct ErrorVault {
    pub message: String,
}

/// Marks a websocket-level error with an RFC 6455 close status and
/// reason. The reason is truncated to fit the 125-byte close frame
/// payload limit (2 bytes are spent on the status code itself).
#[derive(Debug, Clone, thiserror::Error)]
#[error("websocket error: {reason}")]
pub struct ErrorWS {
    pub status: u16,
    pub reason: String,
}

impl ErrorWS {
    const MAX_REASON_BYTES: usize = 123;

    pub fn new(status: u16, reason: impl Into<String>) -> Self {
        let mut reason = reason.into();
        if reason.len() > Self::MAX_REASON_BYTES {
            let mut cut = Self::MAX_REASON_BYTES;
            while !reason.is_char_boundary(cut) {
                cut -= 1;
            }
            reason.truncate(cut);
        }
        Self { status, reason }
    }
}

/// Errors raised by the client framework (C6) while issuing a request to
/// a governor server.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ErrorClient {
    #[error("failed to build request: {0}")]
    BuildRequest(String),
    #[error("failed to send request: {0}")]
    SendRequest(String),
    #[error("invalid server response: {0}")]
    InvalidServerRes(String),
    /// The server returned a well-formed `ErrorRes` body; carried through
    /// so callers can match on status/code the same way they would on the
    /// server side.
    #[error("server returned error: {0}")]
    ServerRes(ErrorRes),
}

/// Attach an [`ErrorRes`] to `err`, making it the nearest HTTP-classifiable
/// context frame.
pub fn with_res<E>(err: E, status: StatusCode, code: impl Into<Option<String>>, message: impl Into<String>) -> anyhow::Error
where
    E: Into<anyhow::Error>,
{
    err.into().context(ErrorRes::new(status, code, message))
}

/// Attach both [`ErrorTooManyRequests`] and the HTTP 429 [`ErrorRes`] it
/// implies.
pub fn with_too_many_requests<E>(
    err: E,
    retry_after: Option<Duration>,
    code: impl Into<Option<String>>,
    message: impl Into<String>,
) -> anyhow::Error
where
    E: Into<anyhow::Error>,
{
    let err = with_res(err, StatusCode::TOO_MANY_REQUESTS, code, message);
    err.context(ErrorTooManyRequests { retry_after })
}

pub fn with_no_log<E>(err: E) -> anyhow::Error
where
    E: Into<anyhow::Error>,
{
    err.into().context(ErrorNoLog)
}

pub fn with_unreachable<E>(err: E, message: impl Into<String>) -> anyhow::Error
where
    E: Into<anyhow::Error>,
{
    let message = message.into();
    let err = with_res(
        err,
        StatusCode::INTERNAL_SERVER_ERROR,
        Some("Unreachable".to_string()),
        "internal server error",
    );
    err.context(ErrorUnreachable { message })
}

pub fn with_invalid_config<E>(err: E, message: impl Into<String>) -> anyhow::Error
where
    E: Into<anyhow::Error>,
{
    err.into().context(ErrorInvalidConfig {
        message: message.into(),
    })
}

pub fn with_vault<E>(err: E, message: impl Into<String>) -> anyhow::Error
where
    E: Into<anyhow::Error>,
{
    err.into().context(ErrorVault {
        message: message.into(),
    })
}

/// Severity bucket assigned to an error for logging purposes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Skip,
    Warn,
    Error,
}

/// Extension methods for scanning an `anyhow::Error`'s context chain for
/// the marker types above, mirroring `ErrorMetadataAnyhowExt` on the
/// teacher's error model.
pub trait GovernorErrorExt {
    fn find<T: fmt::Display + Send + Sync + 'static>(&self) -> Option<&T>;

    /// The nearest [`ErrorRes`] in the chain, if any.
    fn error_res(&self) -> Option<&ErrorRes>;

    /// HTTP status to report for this error, defaulting to 500 when no
    /// [`ErrorRes`] is present anywhere in the chain.
    fn status(&self) -> StatusCode {
        self.error_res()
            .map(|e| e.status)
            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
    }

    /// Message safe to return to a caller.
    fn public_message(&self) -> String {
        self.error_res()
            .map(|e| e.message.clone())
            .unwrap_or_else(|| "internal server error".to_string())
    }

    fn retry_after(&self) -> Option<Duration> {
        self.find::<ErrorTooManyRequests>().and_then(|e| e.retry_after)
    }

    /// Logging policy: `ErrorNoLog` silences entirely; `ErrorUnreachable`
    /// always logs at ERROR; otherwise 5xx logs at ERROR and everything
    /// else (4xx, no attached `ErrorRes`) logs at WARN.
    fn log_level(&self) -> LogLevel {
        if self.find::<ErrorNoLog>().is_some() {
            return LogLevel::Skip;
        }
        if self.find::<ErrorUnreachable>().is_some() {
            return LogLevel::Error;
        }
        if self.status().is_server_error() {
            LogLevel::Error
        } else {
            LogLevel::Warn
        }
    }
}

impl GovernorErrorExt for anyhow::Error {
    fn find<T: fmt::Display + Send + Sync + 'static>(&self) -> Option<&T> {
        self.chain().find_map(|cause| cause.downcast_ref::<T>())
    }

    fn error_res(&self) -> Option<&ErrorRes> {
        self.find::<ErrorRes>()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn finds_nearest_error_res() {
        let base = anyhow::anyhow!("boom");
        let wrapped = with_res(base, StatusCode::NOT_FOUND, Some("NotFound".into()), "missing");
        assert_eq!(wrapped.status(), StatusCode::NOT_FOUND);
        assert_eq!(wrapped.public_message(), "missing");
        assert_eq!(wrapped.log_level(), LogLevel::Warn);
    }

    #[test]
    fn too_many_requests_implies_429_and_retry_after() {
        let base = anyhow::anyhow!("rate limited");
        let wrapped = with_too_many_requests(
            base,
            Some(Duration::from_secs(5)),
            Some("RateLimited".into()),
            "slow down",
        );
        assert_eq!(wrapped.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(wrapped.retry_after(), Some(Duration::from_secs(5)));
    }

    #[test]
    fn no_log_suppresses_logging_regardless_of_status() {
        let base = anyhow::anyhow!("client went away");
        let wrapped = with_res(base, StatusCode::INTERNAL_SERVER_ERROR, None, "oops");
        let wrapped = with_no_log(wrapped);
        assert_eq!(wrapped.log_level(), LogLevel::Skip);
    }

    #[test]
    fn unreachable_always_logs_error() {
        let base = anyhow::anyhow!("invariant broken");
        let wrapped = with_unreachable(base, "branch thought dead reached");
        assert_eq!(wrapped.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(wrapped.log_level(), LogLevel::Error);
    }

    #[test]
    fn ws_reason_truncates_to_close_frame_limit() {
        let long = "x".repeat(200);
        let err = ErrorWS::new(1011, long);
        assert!(err.reason.len() <= ErrorWS::MAX_REASON_BYTES);
    }

    #[test]
    fn default_status_without_error_res_is_500() {
        let err = anyhow::anyhow!("mystery failure");
        assert_eq!(err.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(err.log_level(), LogLevel::Error);
    }
}
