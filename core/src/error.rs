//! Error types for the Empire client.
//!
//! # Design
//! Every failure that comes back from the network is normalized into one
//! `RequestError` shape before a caller sees it, regardless of whether the
//! transport failed, the server returned a non-2xx status, the body was not
//! JSON, or the envelope carried `status: "error"`. Usage mistakes that are
//! detected before any call is made get their own `EmpireError` variants so
//! callers can tell them apart from network-origin errors.

use std::fmt;
use std::path::PathBuf;

use thiserror::Error;

/// Classification of a normalized request error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// The server answered with a non-2xx status, or a 2xx envelope carried
    /// an application-level error marker.
    Request,
    /// A body that should have been JSON failed to parse.
    Json,
    /// No HTTP response was obtained at all.
    Transport,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorKind::Request => "request",
            ErrorKind::Json => "json",
            ErrorKind::Transport => "transport",
        };
        f.write_str(name)
    }
}

/// The normalized error handed to a request's error handler.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{body}")]
pub struct RequestError {
    pub kind: ErrorKind,
    /// `None` when no HTTP status was received.
    pub status_code: Option<u16>,
    /// The server's `error` field when the response is JSON, otherwise the
    /// raw response text (or a parse/transport failure detail).
    pub body: String,
    /// The raw response text.
    pub response: String,
}

impl RequestError {
    /// Build an error from a raw response, extracting `body` from the JSON
    /// `error` field when there is one.
    pub fn from_response(kind: ErrorKind, status_code: Option<u16>, response: &str) -> Self {
        Self {
            kind,
            status_code,
            body: extract_error_body(response),
            response: response.to_string(),
        }
    }

    /// Build an error whose body is an explicit detail rather than extracted
    /// from the response.
    pub fn with_detail(
        kind: ErrorKind,
        status_code: Option<u16>,
        response: &str,
        detail: impl Into<String>,
    ) -> Self {
        Self {
            kind,
            status_code,
            body: detail.into(),
            response: response.to_string(),
        }
    }

    pub fn transport(detail: impl Into<String>) -> Self {
        Self::with_detail(ErrorKind::Transport, None, "", detail)
    }
}

fn extract_error_body(response: &str) -> String {
    serde_json::from_str::<serde_json::Value>(response)
        .ok()
        .and_then(|value| match value.get("error") {
            Some(serde_json::Value::String(s)) => Some(s.clone()),
            Some(other) if !other.is_null() => Some(other.to_string()),
            _ => None,
        })
        .unwrap_or_else(|| response.to_string())
}

/// Errors returned by the Empire client.
#[derive(Debug, Error)]
pub enum EmpireError {
    /// A dispatched request failed and no error handler was registered.
    #[error(transparent)]
    Request(#[from] RequestError),

    #[error("Service must be specified if table is specified!")]
    TableWithoutService,

    #[error("Cannot use a materialized view within a session initiated without an enduser")]
    MissingEnduser,

    #[error("no secrets loaded for service `{0}`")]
    MissingSecrets(String),

    #[error("failed to read secrets file {}: {source}", .path.display())]
    SecretsIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse secrets file {}: {source}", .path.display())]
    SecretsFormat {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl EmpireError {
    /// The normalized request error, if this error came from the network.
    pub fn as_request(&self) -> Option<&RequestError> {
        match self {
            EmpireError::Request(e) => Some(e),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, EmpireError>;
