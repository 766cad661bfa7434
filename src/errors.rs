//! Error taxonomy for API calls.
//!
//! Every failure surfaced by the client is one of the [`ApiError`] kinds, so
//! calling code can tell "retry later" (network) apart from "fix the input"
//! (validation) without string matching.

use serde::Deserialize;
use std::fmt;
use thiserror::Error;

/// The error type for all API operations.
#[derive(Debug, Error)]
pub enum ApiError {
    /// Transport never completed: offline, timeout, DNS failure, reset.
    #[error("network error: {message}")]
    Network {
        /// Human-readable transport failure description.
        message: String,
        /// The request timed out.
        is_timeout: bool,
        /// The connection could not be established.
        is_connect: bool,
        /// URL being accessed, when known.
        url: Option<String>,
    },

    /// The server rejected the request shape.
    #[error("validation failed")]
    Validation {
        /// Generic summary, the per-field records carry the detail.
        message: String,
        /// Field-level problems reported by the server.
        problems: Vec<FieldProblem>,
    },

    /// No usable credential, rejected login, or rejected replay.
    #[error("authentication failed: {0}")]
    AuthenticationFailed(String),

    /// The session's refresh token was rejected; a forced logout follows.
    #[error("session expired")]
    SessionExpired,

    /// HTTP 403.
    #[error("permission denied: {0}")]
    PermissionDenied(String),

    /// HTTP 404.
    #[error("not found: {0}")]
    NotFound(String),

    /// HTTP 429.
    #[error("rate limited: {message}")]
    RateLimited {
        /// Server-supplied or default message.
        message: String,
        /// `Retry-After` header value in seconds, when present.
        retry_after: Option<u64>,
    },

    /// HTTP 402.
    #[error("payment required: {0}")]
    PaymentRequired(String),

    /// Any other non-2xx status.
    #[error("backend error (status {status}): {message}")]
    Backend {
        /// Raw HTTP status code.
        status: u16,
        /// Best-effort extracted message.
        message: String,
    },

    /// Credential storage failed at the I/O level.
    #[error("storage error: {0}")]
    Storage(#[from] StoreError),
}

impl From<reqwest::Error> for ApiError {
    fn from(err: reqwest::Error) -> Self {
        ApiError::Network {
            message: err.to_string(),
            is_timeout: err.is_timeout(),
            is_connect: err.is_connect(),
            url: err.url().map(|u| u.to_string()),
        }
    }
}

/// Errors from the credential store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Underlying filesystem operation failed.
    #[error("credential storage I/O: {0}")]
    Io(#[from] std::io::Error),

    /// The token could not be serialized for storage.
    #[error("credential serialization: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// One field-level validation record from an error body.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct FieldProblem {
    /// Location of the offending field (path segments).
    #[serde(default)]
    pub loc: Vec<serde_json::Value>,
    /// Human-readable problem description.
    #[serde(default)]
    pub msg: String,
    /// Machine-readable problem code.
    #[serde(default, rename = "type")]
    pub kind: Option<String>,
}

impl fmt::Display for FieldProblem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let loc: Vec<String> = self.loc.iter().map(|v| v.to_string()).collect();
        write!(f, "{}: {}", loc.join("."), self.msg)
    }
}

/// Error body shape used by the backend: `detail` is either a message string
/// or a list of field-level validation records.
#[derive(Debug, Deserialize)]
struct ErrorBody {
    detail: Option<Detail>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum Detail {
    Message(String),
    Problems(Vec<FieldProblem>),
}

fn default_message(status: u16) -> String {
    match status {
        401 => "authentication required".to_string(),
        402 => "an active subscription is required".to_string(),
        403 => "you do not have permission to perform this action".to_string(),
        404 => "the requested resource was not found".to_string(),
        429 => "too many requests, slow down".to_string(),
        _ => format!("the server returned status {status}"),
    }
}

fn map_status(status: u16, message: String, retry_after: Option<u64>) -> ApiError {
    match status {
        401 => ApiError::AuthenticationFailed(message),
        402 => ApiError::PaymentRequired(message),
        403 => ApiError::PermissionDenied(message),
        404 => ApiError::NotFound(message),
        429 => ApiError::RateLimited {
            message,
            retry_after,
        },
        _ => ApiError::Backend { status, message },
    }
}

/// Pull the `detail` message string out of an error body, when it has one.
pub(crate) fn detail_message(body: &str) -> Option<String> {
    match serde_json::from_str::<ErrorBody>(body).ok()?.detail? {
        Detail::Message(msg) => Some(msg),
        Detail::Problems(_) => None,
    }
}

/// Classify a non-2xx response body into an [`ApiError`].
///
/// Prefers a structured `detail` string; a `detail` list becomes
/// [`ApiError::Validation`] with the records preserved; an unparseable body
/// falls back to a generic status-coded message rather than surfacing a
/// secondary parse error.
pub(crate) fn classify_failure(status: u16, body: &str, retry_after: Option<u64>) -> ApiError {
    let detail = serde_json::from_str::<ErrorBody>(body)
        .ok()
        .and_then(|b| b.detail);

    match detail {
        Some(Detail::Problems(problems)) => ApiError::Validation {
            message: "validation failed".to_string(),
            problems,
        },
        Some(Detail::Message(msg)) => map_status(status, msg, retry_after),
        None => map_status(status, default_message(status), retry_after),
    }
}
