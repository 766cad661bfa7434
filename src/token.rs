//! Credential pair returned by the token endpoints.

use serde::{Deserialize, Serialize};

fn default_token_type() -> String {
    "bearer".to_string()
}

/// A credential pair issued by the backend.
///
/// Every login or refresh produces a brand-new `Token`; the previous pair is
/// discarded, never mutated in place. [`crate::AuthSessionManager`] is the
/// only component that writes one to storage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Token {
    /// Short-lived credential attached to authenticated requests.
    pub access_token: String,
    /// Longer-lived credential exchanged for a new pair on expiry.
    #[serde(default)]
    pub refresh_token: String,
    /// Token scheme reported by the server, normally `"bearer"`.
    #[serde(default = "default_token_type")]
    pub token_type: String,
}

impl Token {
    /// Create a new token pair.
    pub fn new(access_token: impl Into<String>, refresh_token: impl Into<String>) -> Self {
        Self {
            access_token: access_token.into(),
            refresh_token: refresh_token.into(),
            token_type: default_token_type(),
        }
    }

    /// The value for an `Authorization` header.
    pub fn bearer(&self) -> String {
        format!("Bearer {}", self.access_token)
    }
}
