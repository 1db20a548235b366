use reqwest::{header::HeaderMap, StatusCode, Url};

use crate::{AbortSource, DecodedBody, Response};

/// Error type returned by this crate.
#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    /// Options were rejected before any attempt started.
    #[error("invalid configuration: {0}")]
    Config(String),
    /// The caller cancelled the request, through the external signal or the
    /// current attempt's controller. Never retried.
    #[error("request aborted by {origin}")]
    Aborted {
        /// Which cancellation source fired.
        origin: AbortSource,
    },
    /// The last attempt hit the per-attempt timeout and the retry budget is
    /// exhausted.
    #[error("request timed out after {timeout_ms} ms")]
    Timeout { timeout_ms: u64 },
    /// A response arrived but its status failed validation. Never retried.
    #[error("{0}")]
    Status(Box<StatusError>),
    /// Network, protocol or body decoding failure from the transport.
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),
}

impl FetchError {
    pub(crate) fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// Returns `true` when the request was cancelled by the caller.
    pub fn is_aborted(&self) -> bool {
        matches!(self, Self::Aborted { .. })
    }

    /// Returns `true` when the final attempt timed out.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }

    /// Returns the HTTP status for validation failures.
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            Self::Status(err) => Some(err.status),
            _ => None,
        }
    }
}

/// Coarse grouping of a rejected status.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum StatusErrorCode {
    /// 4xx response.
    BadRequest,
    /// 5xx response.
    BadResponse,
}

impl StatusErrorCode {
    pub(crate) fn from_status(status: StatusCode) -> Option<Self> {
        if status.is_client_error() {
            Some(Self::BadRequest)
        } else if status.is_server_error() {
            Some(Self::BadResponse)
        } else {
            None
        }
    }

    /// Stable string form, e.g. for logs.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::BadRequest => "ERR_BAD_REQUEST",
            Self::BadResponse => "ERR_BAD_RESPONSE",
        }
    }
}

/// Response that failed the caller's status validation.
#[derive(Debug)]
pub struct StatusError {
    pub status: StatusCode,
    pub code: Option<StatusErrorCode>,
    pub url: Url,
    pub headers: HeaderMap,
    /// Body decoded according to the declared response kind. `None` when no
    /// kind was declared or decoding failed.
    pub body: Option<DecodedBody>,
    /// The unread response, kept when no body was decoded.
    pub response: Option<Response>,
}

impl std::fmt::Display for StatusError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "request failed with status code {}", self.status.as_u16())
    }
}

/// Failure raised by a [`Transport`](crate::Transport) or while reading a
/// response body.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// Network or request execution error from `reqwest`.
    #[error(transparent)]
    Http(#[from] reqwest::Error),
    /// The transport gave up on its own; not tied to any known abort source.
    #[error("request aborted by transport")]
    Aborted,
    /// Response body is not valid JSON.
    #[error("invalid JSON body: {0}")]
    Json(#[from] serde_json::Error),
    /// Response body is not valid UTF-8.
    #[error("invalid UTF-8 body: {0}")]
    Utf8(#[from] std::string::FromUtf8Error),
    /// Error from a custom transport.
    #[error("{0}")]
    Other(#[source] Box<dyn std::error::Error + Send + Sync>),
}

impl TransportError {
    /// Wraps an arbitrary error from a custom transport.
    pub fn other<E>(err: E) -> Self
    where
        E: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        Self::Other(err.into())
    }
}
