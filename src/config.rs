//! Client configuration.

use crate::store::StorageProfile;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, ACCEPT_LANGUAGE};
use reqwest::Client;
use std::time::Duration;
use url::Url;

/// Header carrying the client platform tag.
pub const PLATFORM_HEADER: &str = "x-client-platform";

/// Configuration for the API client.
///
/// All policy decisions (base URL, timeout, locale and platform tags, storage
/// profile) are made here, once, at construction. Nothing is re-read from the
/// environment at call time.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Base URL of the backend.
    pub base_url: Url,
    /// Request timeout applied by the HTTP client.
    pub timeout: Duration,
    /// Locale tag sent with every request.
    pub locale: String,
    /// Platform tag sent with every request.
    pub platform: String,
    /// Credential storage profile.
    pub storage: StorageProfile,
}

impl ClientConfig {
    /// Create a config with defaults for everything but the base URL.
    pub fn new(base_url: Url) -> Self {
        Self {
            base_url,
            timeout: Duration::from_secs(30),
            locale: "en".to_string(),
            platform: "desktop".to_string(),
            storage: StorageProfile::Secure,
        }
    }

    /// Set the request timeout.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Set the locale tag.
    #[must_use]
    pub fn with_locale(mut self, locale: impl Into<String>) -> Self {
        self.locale = locale.into();
        self
    }

    /// Set the platform tag.
    #[must_use]
    pub fn with_platform(mut self, platform: impl Into<String>) -> Self {
        self.platform = platform.into();
        self
    }

    /// Set the credential storage profile.
    #[must_use]
    pub fn with_storage(mut self, storage: StorageProfile) -> Self {
        self.storage = storage;
        self
    }

    /// Absolute URL for an endpoint path.
    pub fn endpoint_url(&self, path: &str) -> String {
        format!(
            "{}/{}",
            self.base_url.as_str().trim_end_matches('/'),
            path.trim_start_matches('/')
        )
    }

    /// Standard headers attached to every request: content negotiation,
    /// platform tag, locale tag.
    pub fn default_headers(&self) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
        if let Ok(value) = HeaderValue::from_str(&self.platform) {
            headers.insert(PLATFORM_HEADER, value);
        }
        if let Ok(value) = HeaderValue::from_str(&self.locale) {
            headers.insert(ACCEPT_LANGUAGE, value);
        }
        headers
    }

    /// Build an HTTP client with this config.
    pub fn build_client(&self) -> Client {
        Client::builder()
            .timeout(self.timeout)
            .build()
            .unwrap_or_default()
    }
}
