//! Request coordination: credential attachment, single-flight token refresh,
//! replay, and uniform outcome classification.

use crate::config::ClientConfig;
use crate::errors::ApiError;
use crate::request::ApiRequest;
use crate::response::{classify, Payload};
use crate::session::AuthSessionManager;
use crate::token::Token;
use parking_lot::Mutex;
use reqwest::header::AUTHORIZATION;
use reqwest::{Client, StatusCode};
use std::sync::Arc;
use tokio::sync::oneshot;
use tracing::{debug, warn};

/// Refresh coordination state, shared by all in-flight calls.
///
/// At most one refresh network call is outstanding at any time. Calls that
/// observe a 401 while one is in flight enqueue a waiter instead of
/// initiating their own.
enum RefreshState {
    Idle,
    InFlight {
        waiters: Vec<oneshot::Sender<RefreshOutcome>>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RefreshOutcome {
    /// A new pair was obtained and persisted; waiters replay their calls.
    Refreshed,
    /// The refresh was rejected or failed; waiters surface `SessionExpired`.
    Expired,
}

enum Attempt {
    Done(Payload),
    /// 401 on an authenticated call, carrying the token snapshot that
    /// produced it.
    Unauthorized(Token),
}

/// Wraps every outbound API call.
///
/// Attaches the bearer token, performs the call, detects credential expiry,
/// coordinates a single in-flight refresh across arbitrarily many concurrent
/// callers, replays released calls against the new token, and classifies
/// every outcome into [`Payload`] or [`ApiError`].
pub struct RequestCoordinator {
    client: Client,
    config: ClientConfig,
    session: Arc<AuthSessionManager>,
    refresh: Arc<Mutex<RefreshState>>,
}

impl std::fmt::Debug for RequestCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestCoordinator")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl RequestCoordinator {
    /// Create a coordinator over an existing session.
    pub fn new(config: ClientConfig, session: Arc<AuthSessionManager>) -> Self {
        Self {
            client: config.build_client(),
            config,
            session,
            refresh: Arc::new(Mutex::new(RefreshState::Idle)),
        }
    }

    /// The session this coordinator refreshes through.
    pub fn session(&self) -> &Arc<AuthSessionManager> {
        &self.session
    }

    /// Execute one logical API call.
    ///
    /// A 401 on an authenticated call enters the refresh protocol; on a
    /// successful refresh the call is fully re-executed against the new
    /// token. A second 401 on the replay surfaces as
    /// [`ApiError::AuthenticationFailed`] without initiating another refresh.
    pub async fn execute(&self, request: ApiRequest) -> Result<Payload, ApiError> {
        match self.attempt(&request).await? {
            Attempt::Done(payload) => Ok(payload),
            Attempt::Unauthorized(stale) => match self.await_refresh(stale).await {
                RefreshOutcome::Refreshed => match self.attempt(&request).await? {
                    Attempt::Done(payload) => Ok(payload),
                    Attempt::Unauthorized(_) => {
                        warn!(path = %request.path, "request rejected again after refresh");
                        Err(ApiError::AuthenticationFailed(
                            "request rejected after token refresh".to_string(),
                        ))
                    }
                },
                RefreshOutcome::Expired => Err(ApiError::SessionExpired),
            },
        }
    }

    /// Execute an authenticated GET.
    pub async fn get(&self, path: &str) -> Result<Payload, ApiError> {
        self.execute(ApiRequest::get(path)).await
    }

    /// Execute an authenticated POST with a JSON body.
    pub async fn post(&self, path: &str, body: serde_json::Value) -> Result<Payload, ApiError> {
        self.execute(ApiRequest::post(path).body(body)).await
    }

    /// Execute an authenticated PUT with a JSON body.
    pub async fn put(&self, path: &str, body: serde_json::Value) -> Result<Payload, ApiError> {
        self.execute(ApiRequest::put(path).body(body)).await
    }

    /// Execute an authenticated PATCH with a JSON body.
    pub async fn patch(&self, path: &str, body: serde_json::Value) -> Result<Payload, ApiError> {
        self.execute(ApiRequest::patch(path).body(body)).await
    }

    /// Execute an authenticated DELETE.
    pub async fn delete(&self, path: &str) -> Result<Payload, ApiError> {
        self.execute(ApiRequest::delete(path)).await
    }

    /// One pass over the per-call algorithm: read credentials, attach
    /// headers, send, classify. A 401 on an authenticated call is reported
    /// to the caller instead of classified, along with the token snapshot
    /// that produced it.
    async fn attempt(&self, request: &ApiRequest) -> Result<Attempt, ApiError> {
        let token = if request.needs_auth {
            match self.session.current_token()? {
                Some(token) => Some(token),
                None => {
                    // Nothing to refresh: fail without touching the network.
                    debug!(path = %request.path, "authenticated call with empty session");
                    self.session.force_logout();
                    return Err(ApiError::AuthenticationFailed(
                        "no credentials in session".to_string(),
                    ));
                }
            }
        } else {
            None
        };

        let url = self.config.endpoint_url(&request.path);
        let mut builder = self
            .client
            .request(request.method.clone(), url)
            .headers(self.config.default_headers());
        if let Some(token) = &token {
            builder = builder.header(AUTHORIZATION, token.bearer());
        }
        if !request.query.is_empty() {
            builder = builder.query(&request.query);
        }
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }

        let response = builder.send().await?;

        if let Some(id) = response
            .headers()
            .get("x-request-id")
            .and_then(|v| v.to_str().ok())
        {
            debug!(
                request_id = id,
                path = %request.path,
                status = response.status().as_u16(),
                "response received"
            );
        }

        if response.status() == StatusCode::UNAUTHORIZED {
            if let Some(stale) = token {
                return Ok(Attempt::Unauthorized(stale));
            }
        }
        classify(response).await.map(Attempt::Done)
    }

    /// Join or initiate the single-flight refresh and wait for it to settle.
    ///
    /// `stale` is the token snapshot that produced the 401, so the refresh
    /// token read cannot race a concurrent store writer. The refresh itself
    /// runs on a spawned task: a caller that discards its future does not
    /// abort the refresh other queued callers depend on.
    async fn await_refresh(&self, stale: Token) -> RefreshOutcome {
        // The flag check, the queue push, and the driver spawn all happen
        // under one lock acquisition, before any await, so two callers can
        // never both conclude "no refresh in flight".
        let (tx, rx) = oneshot::channel();
        {
            let mut state = self.refresh.lock();
            match &mut *state {
                RefreshState::InFlight { waiters } => waiters.push(tx),
                RefreshState::Idle => {
                    *state = RefreshState::InFlight { waiters: vec![tx] };
                    tokio::spawn(drive_refresh(
                        Arc::clone(&self.session),
                        Arc::clone(&self.refresh),
                        stale,
                    ));
                }
            }
        }
        // A closed channel means the driver task was torn down with the
        // runtime; treat it as an expired session rather than hanging.
        rx.await.unwrap_or(RefreshOutcome::Expired)
    }
}

/// Perform the single refresh attempt for an episode and release the queue.
async fn drive_refresh(
    session: Arc<AuthSessionManager>,
    state: Arc<Mutex<RefreshState>>,
    stale: Token,
) {
    let outcome = if stale.refresh_token.is_empty() {
        debug!("token snapshot has no refresh token, treating as rejected");
        RefreshOutcome::Expired
    } else {
        match session.refresh(&stale.refresh_token).await {
            Ok(Some(_)) => RefreshOutcome::Refreshed,
            Ok(None) => RefreshOutcome::Expired,
            Err(err) => {
                // Conservative policy: a transport failure during refresh
                // forces logout instead of retrying.
                warn!(error = %err, "token refresh failed");
                RefreshOutcome::Expired
            }
        }
    };

    let waiters = {
        let mut state = state.lock();
        match std::mem::replace(&mut *state, RefreshState::Idle) {
            RefreshState::InFlight { waiters } => waiters,
            RefreshState::Idle => Vec::new(),
        }
    };
    debug!(
        queued = waiters.len(),
        outcome = ?outcome,
        "refresh settled, releasing queued calls"
    );
    for waiter in waiters {
        // A dropped receiver is a caller that discarded its future.
        let _ = waiter.send(outcome);
    }

    if outcome == RefreshOutcome::Expired {
        // Exactly once per episode, no matter how many were queued.
        session.force_logout();
    }
}
