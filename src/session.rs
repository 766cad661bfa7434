//! Session lifecycle: login, refresh, logout, and the forced-logout signal.

use crate::config::ClientConfig;
use crate::errors::{classify_failure, detail_message, ApiError, StoreError};
use crate::store::TokenStore;
use crate::token::Token;
use parking_lot::Mutex;
use reqwest::{Client, StatusCode};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};

/// Credential exchange endpoint (form-encoded identifier + secret).
pub const LOGIN_ENDPOINT: &str = "/auth/token";
/// Refresh endpoint (JSON refresh token, returns a new pair or a rejection).
pub const REFRESH_ENDPOINT: &str = "/auth/refresh";
/// Logout notification endpoint (bearer token, idempotent).
pub const LOGOUT_ENDPOINT: &str = "/auth/logout";

type LogoutListener = Arc<dyn Fn() + Send + Sync>;

/// Owner of the current session.
///
/// The only component permitted to perform the login/refresh/logout network
/// calls and to write to the [`TokenStore`]. UI layers subscribe to the
/// forced-logout signal via [`AuthSessionManager::on_logout`].
pub struct AuthSessionManager {
    client: Client,
    config: ClientConfig,
    store: Arc<dyn TokenStore>,
    listeners: Arc<Mutex<Vec<(u64, LogoutListener)>>>,
    next_listener_id: AtomicU64,
}

impl std::fmt::Debug for AuthSessionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthSessionManager")
            .field("config", &self.config)
            .field("store", &self.store)
            .finish_non_exhaustive()
    }
}

/// Subscription to the forced-logout signal. Dropping the guard removes the
/// listener.
pub struct LogoutGuard {
    id: u64,
    listeners: Arc<Mutex<Vec<(u64, LogoutListener)>>>,
}

impl std::fmt::Debug for LogoutGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LogoutGuard")
            .field("id", &self.id)
            .finish_non_exhaustive()
    }
}

impl LogoutGuard {
    /// Remove the listener now rather than at drop time.
    pub fn unsubscribe(self) {}
}

impl Drop for LogoutGuard {
    fn drop(&mut self) {
        self.listeners.lock().retain(|(id, _)| *id != self.id);
    }
}

impl AuthSessionManager {
    /// Create a session manager over the given store.
    pub fn new(config: ClientConfig, store: Arc<dyn TokenStore>) -> Self {
        Self {
            client: config.build_client(),
            config,
            store,
            listeners: Arc::new(Mutex::new(Vec::new())),
            next_listener_id: AtomicU64::new(0),
        }
    }

    /// The store this session persists credentials to.
    pub fn store(&self) -> &Arc<dyn TokenStore> {
        &self.store
    }

    /// Read the current token, if any.
    pub fn current_token(&self) -> Result<Option<Token>, StoreError> {
        self.store.get()
    }

    /// Register a forced-logout listener. The listener fires whenever
    /// [`AuthSessionManager::force_logout`] runs, e.g. on refresh-token
    /// exhaustion.
    pub fn on_logout(&self, listener: impl Fn() + Send + Sync + 'static) -> LogoutGuard {
        let id = self.next_listener_id.fetch_add(1, Ordering::Relaxed);
        self.listeners.lock().push((id, Arc::new(listener)));
        LogoutGuard {
            id,
            listeners: Arc::clone(&self.listeners),
        }
    }

    /// Invoke every registered listener, then clear the stored credential.
    /// Safe with zero listeners.
    pub fn force_logout(&self) {
        let listeners: Vec<LogoutListener> = self
            .listeners
            .lock()
            .iter()
            .map(|(_, l)| Arc::clone(l))
            .collect();
        debug!(listeners = listeners.len(), "forced logout");
        for listener in listeners {
            listener();
        }
        if let Err(err) = self.store.delete() {
            warn!(error = %err, "failed to clear credentials on forced logout");
        }
    }

    /// Exchange credentials for a new token pair and persist it.
    pub async fn login(&self, identifier: &str, secret: &str) -> Result<Token, ApiError> {
        let url = self.config.endpoint_url(LOGIN_ENDPOINT);
        let response = self
            .client
            .post(&url)
            .headers(self.config.default_headers())
            .form(&[("username", identifier), ("password", secret)])
            .send()
            .await?;

        let status = response.status();
        let text = response.text().await?;
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::BAD_REQUEST {
            let reason =
                detail_message(&text).unwrap_or_else(|| "invalid credentials".to_string());
            return Err(ApiError::AuthenticationFailed(reason));
        }
        if !status.is_success() {
            return Err(classify_failure(status.as_u16(), &text, None));
        }

        let token: Token = serde_json::from_str(&text).map_err(|_| ApiError::Backend {
            status: status.as_u16(),
            message: "malformed token payload".to_string(),
        })?;
        self.store.save(&token)?;
        Ok(token)
    }

    /// Exchange a refresh token for a new pair and persist it.
    ///
    /// Returns `Ok(None)` when the server explicitly rejects the refresh
    /// token. That is a normal outcome, it is the trigger for forced logout,
    /// not an error. Transport failure is an `Err`, and callers should treat
    /// it conservatively (force logout rather than retry indefinitely). A
    /// single attempt is made, never more.
    pub async fn refresh(&self, refresh_token: &str) -> Result<Option<Token>, ApiError> {
        let url = self.config.endpoint_url(REFRESH_ENDPOINT);
        let response = self
            .client
            .post(&url)
            .headers(self.config.default_headers())
            .json(&serde_json::json!({ "refresh_token": refresh_token }))
            .send()
            .await?;

        let status = response.status();
        if matches!(
            status,
            StatusCode::BAD_REQUEST | StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN
        ) {
            debug!(status = status.as_u16(), "refresh token rejected");
            return Ok(None);
        }

        let text = response.text().await?;
        if !status.is_success() {
            return Err(classify_failure(status.as_u16(), &text, None));
        }

        let token: Token = serde_json::from_str(&text).map_err(|_| ApiError::Backend {
            status: status.as_u16(),
            message: "malformed token payload".to_string(),
        })?;
        self.store.save(&token)?;
        Ok(Some(token))
    }

    /// Log out: best-effort network notification, then unconditional local
    /// credential deletion.
    ///
    /// The deletion happens even if the notification fails or the device is
    /// offline. With no stored token the network call is skipped entirely.
    pub async fn logout(&self) -> Result<(), StoreError> {
        match self.store.get() {
            Ok(Some(token)) => {
                let url = self.config.endpoint_url(LOGOUT_ENDPOINT);
                let result = self
                    .client
                    .post(&url)
                    .headers(self.config.default_headers())
                    .header(reqwest::header::AUTHORIZATION, token.bearer())
                    .send()
                    .await;
                match result {
                    Ok(response) => {
                        debug!(status = response.status().as_u16(), "logout notified")
                    }
                    Err(err) => warn!(error = %err, "logout notification failed, clearing locally"),
                }
            }
            Ok(None) => {}
            // An unreadable store skips the notification, never the deletion.
            Err(err) => warn!(error = %err, "could not read credentials for logout notification"),
        }
        self.store.delete()
    }
}
