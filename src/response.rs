//! Response classification.

use crate::errors::{classify_failure, ApiError};
use reqwest::header::CONTENT_TYPE;
use reqwest::{Response, StatusCode};
use std::time::Duration;
use tracing::warn;

/// Successful response payload.
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    /// 204 or an empty body.
    Empty,
    /// Body parsed per the declared structured content type.
    Json(serde_json::Value),
    /// Raw body for non-structured content types.
    Text(String),
}

impl Payload {
    /// Structured payload, when present.
    pub fn as_json(&self) -> Option<&serde_json::Value> {
        match self {
            Payload::Json(value) => Some(value),
            _ => None,
        }
    }

    /// Consume into the structured payload, when present.
    pub fn into_json(self) -> Option<serde_json::Value> {
        match self {
            Payload::Json(value) => Some(value),
            _ => None,
        }
    }

    /// Raw text payload, when present.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Payload::Text(text) => Some(text),
            _ => None,
        }
    }

    /// Whether the payload is empty.
    pub fn is_empty(&self) -> bool {
        matches!(self, Payload::Empty)
    }
}

/// Parse a `Retry-After` header given in seconds.
fn parse_retry_after(response: &Response) -> Option<u64> {
    response
        .headers()
        .get("retry-after")
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.parse().ok())
}

/// Classify a settled response into a payload or an [`ApiError`].
///
/// 401 is handled by the coordinator before this point; here it maps to
/// [`ApiError::AuthenticationFailed`] like any other status (the path taken
/// by unauthenticated calls and by the login endpoint).
pub(crate) async fn classify(response: Response) -> Result<Payload, ApiError> {
    let status = response.status();
    if status == StatusCode::NO_CONTENT {
        return Ok(Payload::Empty);
    }

    let retry_after = parse_retry_after(&response);
    let declares_json = response
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.contains("application/json"));

    let text = response.text().await.map_err(ApiError::from)?;

    if !status.is_success() {
        return Err(classify_failure(status.as_u16(), &text, retry_after));
    }

    if text.is_empty() {
        return Ok(Payload::Empty);
    }
    if declares_json {
        match serde_json::from_str(&text) {
            Ok(value) => Ok(Payload::Json(value)),
            Err(err) => {
                warn!(error = %err, "body declared JSON but did not parse, returning raw text");
                Ok(Payload::Text(text))
            }
        }
    } else {
        Ok(Payload::Text(text))
    }
}

/// Duration helper for callers honoring [`ApiError::RateLimited`].
pub fn retry_after_duration(error: &ApiError) -> Option<Duration> {
    match error {
        ApiError::RateLimited {
            retry_after: Some(secs),
            ..
        } => Some(Duration::from_secs(*secs)),
        _ => None,
    }
}
