//! # macrolog-client
//!
//! Resilient authenticated API client for the Macrolog food tracking
//! backend.
//!
//! The client attaches credentials to every outbound request, detects
//! session expiry, performs an exactly-once token refresh while any number
//! of requests are in flight, replays released requests against the new
//! credentials, and translates heterogeneous failure modes into a stable
//! error taxonomy.
//!
//! ## Core Concepts
//!
//! - **[`RequestCoordinator`]**: wraps every outbound API call with
//!   credential attachment, single-flight refresh, and classification
//! - **[`AuthSessionManager`]**: owns the current session (login, refresh,
//!   logout) and the forced-logout signal
//! - **[`TokenStore`]**: durable persistence of exactly one credential pair
//! - **[`ApiError`]**: the uniform error taxonomy callers reason about
//!
//! ## Example
//!
//! ```ignore
//! use macrolog_client::{
//!     select_store, ApiRequest, AuthSessionManager, ClientConfig,
//!     RequestCoordinator, StorageProfile,
//! };
//! use std::sync::Arc;
//! use url::Url;
//!
//! let config = ClientConfig::new(Url::parse("https://api.macrolog.app")?)
//!     .with_locale("en-US")
//!     .with_platform("android");
//!
//! let store = select_store(config.storage, &data_dir);
//! let session = Arc::new(AuthSessionManager::new(config.clone(), store));
//! let api = RequestCoordinator::new(config, Arc::clone(&session));
//!
//! let _guard = session.on_logout(|| {
//!     // route to the login prompt
//! });
//!
//! session.login("user@example.com", "secret").await?;
//! let diary = api.get("/v1/diary/today").await?;
//! ```

#![warn(missing_docs)]
#![deny(unsafe_code)]

mod config;
mod coordinator;
mod errors;
mod request;
mod response;
mod session;
mod store;
mod token;

// Re-exports
pub use config::{ClientConfig, PLATFORM_HEADER};
pub use coordinator::RequestCoordinator;
pub use errors::{ApiError, FieldProblem, StoreError};
pub use request::ApiRequest;
pub use response::{retry_after_duration, Payload};
pub use session::{
    AuthSessionManager, LogoutGuard, LOGIN_ENDPOINT, LOGOUT_ENDPOINT, REFRESH_ENDPOINT,
};
pub use store::{
    select_store, FileTokenStore, MemoryTokenStore, StorageProfile, TokenStore, CREDENTIAL_FILE,
};
pub use token::Token;

/// Prelude for common imports.
pub mod prelude {
    pub use crate::{
        ApiError, ApiRequest, AuthSessionManager, ClientConfig, Payload, RequestCoordinator,
        StorageProfile, Token, TokenStore,
    };
}
