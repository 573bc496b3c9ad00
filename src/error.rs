//! Error taxonomy for the messaging engine.
//!
//! Every transport, TLS and protocol failure is captured where it happens and
//! returned as a value. Callers that need the legacy "failed response" shape can
//! turn any error into an [`HttpResponse`] with [`MessagingError::to_response`].

use std::time::Duration;
use thiserror::Error;

use crate::http::{HttpResponse, HttpStatusCode};

/// The independent timeout domains of a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeoutKind {
    Connect,
    Handshake,
    Send,
    /// No bytes arrived within the per-chunk window.
    ReceiveStall,
    /// The whole response did not arrive within the absolute window.
    ReceiveGlobal,
    AsyncSend,
}

impl std::fmt::Display for TimeoutKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            TimeoutKind::Connect => "connect",
            TimeoutKind::Handshake => "TLS handshake",
            TimeoutKind::Send => "send",
            TimeoutKind::ReceiveStall => "receive (no data)",
            TimeoutKind::ReceiveGlobal => "receive",
            TimeoutKind::AsyncSend => "async send",
        };
        f.write_str(name)
    }
}

/// TLS context, handshake and certificate failures.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TlsError {
    #[error("Failed to build TLS context: {0}")]
    Context(String),

    #[error("Failed to obtain a successful TLS handshake: {0}")]
    Handshake(String),

    #[error("Failed to verify server certificate: {0}")]
    Verification(String),

    #[error("Certificate pinning failed: {0}")]
    Pinning(String),
}

/// Malformed or inconsistent HTTP/1.1 response data.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("Invalid status line: {0}")]
    StatusLine(String),

    #[error("Invalid headers: {0}")]
    Header(String),

    #[error("Invalid content-length value: {0}")]
    ContentLength(String),

    #[error("Body is longer than the declared content-length ({expected} bytes)")]
    BodyOverflow { expected: usize },

    #[error("Response to a no-content status carries a body")]
    UnexpectedBody,

    #[error("Invalid chunked data structure: {0}")]
    Chunked(String),

    #[error("Response has neither content-length nor chunked transfer-encoding")]
    MissingBodyLength,
}

/// Top-level error returned by connection, pool and messaging operations.
#[derive(Debug, Clone, Error)]
pub enum MessagingError {
    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Failed to complete {0} in time")]
    Timeout(TimeoutKind),

    #[error(transparent)]
    Tls(#[from] TlsError),

    #[error("Failed to parse the HTTP response: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("Authentication error: {0}")]
    Auth(String),

    #[error("Proxy tunnel failed: {0}")]
    Proxy(String),

    #[error("The previous request failed to receive a response. Closing the connection")]
    Closing,

    #[error("Connection is not established")]
    NotConnected,

    #[error("The connection is suspended for another {remaining:?}")]
    Suspended { remaining: Duration },

    #[error("The connection is suspended due to rate limit block for {retry_after:?}")]
    RateLimited { retry_after: Duration },

    #[error("Configuration error: {0}")]
    Config(String),
}

impl MessagingError {
    pub(crate) fn transport(context: &str, err: impl std::fmt::Display) -> Self {
        MessagingError::Transport(format!("{context}: {err}"))
    }

    /// Whether this error is a timeout of the given domain.
    pub fn is_timeout(&self, kind: TimeoutKind) -> bool {
        matches!(self, MessagingError::Timeout(k) if *k == kind)
    }

    /// Render the failure as a synthetic response.
    pub fn to_response(&self) -> HttpResponse {
        let status = match self {
            MessagingError::Suspended { .. } => HttpStatusCode::Suspend,
            MessagingError::RateLimited { .. } => HttpStatusCode::TooManyRequests,
            _ => HttpStatusCode::Unknown,
        };
        HttpResponse::new(status, self.to_string().into_bytes())
    }
}

impl From<&MessagingError> for HttpResponse {
    fn from(err: &MessagingError) -> Self {
        err.to_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn errors_render_as_unknown_responses() {
        let res = MessagingError::Timeout(TimeoutKind::ReceiveGlobal).to_response();
        assert_eq!(res.status(), HttpStatusCode::Unknown);
        assert_eq!(res.body_text(), "Failed to complete receive in time");

        let suspended = MessagingError::Suspended { remaining: Duration::from_secs(5) };
        assert_eq!(suspended.to_response().status(), HttpStatusCode::Suspend);
    }

    #[test]
    fn protocol_errors_convert() {
        let err: MessagingError = ProtocolError::MissingBodyLength.into();
        assert!(matches!(err, MessagingError::Protocol(ProtocolError::MissingBodyLength)));
        assert!(!err.is_timeout(TimeoutKind::Send));
    }
}
