//! End-to-end tests for the request coordinator against a mock backend.

use macrolog_client::{
    ApiError, ApiRequest, AuthSessionManager, ClientConfig, MemoryTokenStore, RequestCoordinator,
    Token,
};
use serde_json::json;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use url::Url;
use wiremock::matchers::{any, body_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

async fn setup(seed: Option<Token>) -> (MockServer, RequestCoordinator, Arc<AuthSessionManager>) {
    let server = MockServer::start().await;
    let config = ClientConfig::new(Url::parse(&server.uri()).unwrap());
    let store = Arc::new(match &seed {
        Some(token) => MemoryTokenStore::with_token(token),
        None => MemoryTokenStore::new(),
    });
    let session = Arc::new(AuthSessionManager::new(config.clone(), store));
    let coordinator = RequestCoordinator::new(config, Arc::clone(&session));
    (server, coordinator, session)
}

fn stale_token() -> Token {
    Token::new("stale-access", "stale-refresh")
}

fn new_pair_body() -> serde_json::Value {
    json!({
        "access_token": "new-access",
        "refresh_token": "new-refresh",
        "token_type": "bearer"
    })
}

#[tokio::test]
async fn concurrent_stale_calls_share_one_refresh_and_replay_with_new_token() {
    let (server, api, session) = setup(Some(stale_token())).await;

    // The stale token is always rejected.
    Mock::given(method("GET"))
        .and(path("/v1/diary"))
        .and(header("authorization", "Bearer stale-access"))
        .respond_with(ResponseTemplate::new(401))
        .mount(&server)
        .await;

    // Exactly one refresh, carrying the refresh token from the stale
    // snapshot. The delay keeps it in flight while the second 401 arrives.
    Mock::given(method("POST"))
        .and(path("/auth/refresh"))
        .and(body_json(json!({ "refresh_token": "stale-refresh" })))
        .respond_with(
            ResponseTemplate::new(200)
                .set_delay(Duration::from_millis(200))
                .set_body_json(new_pair_body()),
        )
        .expect(1)
        .mount(&server)
        .await;

    // Both replays must carry the new access token.
    Mock::given(method("GET"))
        .and(path("/v1/diary"))
        .and(header("authorization", "Bearer new-access"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "entries": [] })))
        .expect(2)
        .mount(&server)
        .await;

    let (a, b) = tokio::join!(api.get("/v1/diary"), api.get("/v1/diary"));

    assert!(a.unwrap().as_json().is_some());
    assert!(b.unwrap().as_json().is_some());
    assert_eq!(
        session.current_token().unwrap().unwrap().access_token,
        "new-access"
    );
}

#[tokio::test]
async fn discarded_caller_does_not_abort_refresh_for_later_calls() {
    let (server, api, session) = setup(Some(stale_token())).await;

    Mock::given(method("GET"))
        .and(path("/v1/diary"))
        .and(header("authorization", "Bearer stale-access"))
        .respond_with(ResponseTemplate::new(401))
        .mount(&server)
        .await;

    // Slow enough that the first caller gives up mid-refresh.
    Mock::given(method("POST"))
        .and(path("/auth/refresh"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_delay(Duration::from_millis(300))
                .set_body_json(new_pair_body()),
        )
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/v1/diary"))
        .and(header("authorization", "Bearer new-access"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "entries": [] })))
        .mount(&server)
        .await;

    // The initiating caller discards its future while the refresh is in
    // flight. The refresh must settle anyway.
    let abandoned = tokio::time::timeout(Duration::from_millis(50), api.get("/v1/diary")).await;
    assert!(abandoned.is_err());

    // A later call joins or follows the same refresh and resolves normally.
    let payload = tokio::time::timeout(Duration::from_secs(3), api.get("/v1/diary"))
        .await
        .expect("call released after refresh settled")
        .unwrap();
    assert!(payload.as_json().is_some());
    assert_eq!(
        session.current_token().unwrap().unwrap().access_token,
        "new-access"
    );
}

#[tokio::test]
async fn refresh_rejection_expires_all_queued_calls_and_fires_logout_once() {
    let (server, api, session) = setup(Some(stale_token())).await;

    let fired = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&fired);
    let _guard = session.on_logout(move || {
        counter.fetch_add(1, Ordering::SeqCst);
    });

    Mock::given(method("GET"))
        .and(path("/v1/diary"))
        .respond_with(ResponseTemplate::new(401))
        .mount(&server)
        .await;

    Mock::given(method("POST"))
        .and(path("/auth/refresh"))
        .respond_with(ResponseTemplate::new(401).set_delay(Duration::from_millis(200)))
        .expect(1)
        .mount(&server)
        .await;

    let (a, b) = tokio::join!(api.get("/v1/diary"), api.get("/v1/diary"));

    assert!(matches!(a.unwrap_err(), ApiError::SessionExpired));
    assert!(matches!(b.unwrap_err(), ApiError::SessionExpired));
    assert_eq!(fired.load(Ordering::SeqCst), 1);
    assert_eq!(session.current_token().unwrap(), None);
}

#[tokio::test]
async fn replay_rejected_again_fails_without_second_refresh() {
    let (server, api, _session) = setup(Some(stale_token())).await;

    // The endpoint rejects every token, fresh or stale.
    Mock::given(method("GET"))
        .and(path("/v1/diary"))
        .respond_with(ResponseTemplate::new(401))
        .mount(&server)
        .await;

    Mock::given(method("POST"))
        .and(path("/auth/refresh"))
        .respond_with(ResponseTemplate::new(200).set_body_json(new_pair_body()))
        .expect(1)
        .mount(&server)
        .await;

    let err = api.get("/v1/diary").await.unwrap_err();
    assert!(matches!(err, ApiError::AuthenticationFailed(_)));
}

#[tokio::test]
async fn empty_session_makes_no_network_call() {
    let (server, api, _session) = setup(None).await;

    Mock::given(any())
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let err = api.get("/v1/diary").await.unwrap_err();
    assert!(matches!(err, ApiError::AuthenticationFailed(_)));
}

#[tokio::test]
async fn no_content_is_an_empty_success() {
    let (server, api, _session) = setup(Some(stale_token())).await;

    Mock::given(method("DELETE"))
        .and(path("/v1/diary/42"))
        .respond_with(ResponseTemplate::new(204))
        .mount(&server)
        .await;

    let payload = api.delete("/v1/diary/42").await.unwrap();
    assert!(payload.is_empty());
}

#[tokio::test]
async fn detail_list_maps_to_validation_error() {
    let (server, api, _session) = setup(Some(stale_token())).await;

    Mock::given(method("POST"))
        .and(path("/v1/foods"))
        .respond_with(ResponseTemplate::new(422).set_body_json(json!({
            "detail": [
                { "loc": ["body", "name"], "msg": "field required", "type": "missing" }
            ]
        })))
        .mount(&server)
        .await;

    let err = api.post("/v1/foods", json!({})).await.unwrap_err();
    match err {
        ApiError::Validation { problems, .. } => {
            assert_eq!(problems.len(), 1);
            assert_eq!(problems[0].msg, "field required");
        }
        other => panic!("unexpected: {other:?}"),
    }
}

#[tokio::test]
async fn non_json_body_is_returned_as_text() {
    let (server, api, _session) = setup(Some(stale_token())).await;

    Mock::given(method("GET"))
        .and(path("/v1/export"))
        .respond_with(ResponseTemplate::new(200).set_body_string("name,kcal\noats,389"))
        .mount(&server)
        .await;

    let payload = api.get("/v1/export").await.unwrap();
    assert_eq!(payload.as_text(), Some("name,kcal\noats,389"));
}

#[tokio::test]
async fn public_call_skips_auth_and_never_refreshes_on_401() {
    let (server, api, _session) = setup(None).await;

    Mock::given(method("GET"))
        .and(path("/v1/status"))
        .respond_with(ResponseTemplate::new(401).set_body_json(json!({ "detail": "nope" })))
        .mount(&server)
        .await;

    Mock::given(method("POST"))
        .and(path("/auth/refresh"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let err = api
        .execute(ApiRequest::get("/v1/status").public())
        .await
        .unwrap_err();
    assert!(matches!(err, ApiError::AuthenticationFailed(_)));
}

#[tokio::test]
async fn login_persists_token_and_maps_rejection() {
    let (server, _api, session) = setup(None).await;

    Mock::given(method("POST"))
        .and(path("/auth/token"))
        .respond_with(ResponseTemplate::new(401).set_body_json(json!({
            "detail": "incorrect email or password"
        })))
        .expect(1)
        .mount(&server)
        .await;

    let err = session.login("user@example.com", "wrong").await.unwrap_err();
    match err {
        ApiError::AuthenticationFailed(reason) => {
            assert_eq!(reason, "incorrect email or password")
        }
        other => panic!("unexpected: {other:?}"),
    }

    server.reset().await;
    Mock::given(method("POST"))
        .and(path("/auth/token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(new_pair_body()))
        .mount(&server)
        .await;

    let token = session.login("user@example.com", "right").await.unwrap();
    assert_eq!(token.access_token, "new-access");
    assert_eq!(session.current_token().unwrap(), Some(token));
}

#[tokio::test]
async fn logout_notifies_server_then_clears_locally() {
    let (server, _api, session) = setup(Some(stale_token())).await;

    Mock::given(method("POST"))
        .and(path("/auth/logout"))
        .and(header("authorization", "Bearer stale-access"))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&server)
        .await;

    session.logout().await.unwrap();
    assert_eq!(session.current_token().unwrap(), None);
}

#[tokio::test]
async fn logout_when_already_logged_out_makes_no_network_call() {
    let (server, _api, session) = setup(None).await;

    Mock::given(any())
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    session.logout().await.unwrap();
    assert_eq!(session.current_token().unwrap(), None);
}

#[tokio::test]
async fn refresh_failure_expires_the_session() {
    // A refresh that fails outright (rather than being rejected) must force
    // logout rather than retry.
    let (server, api, session) = setup(Some(stale_token())).await;

    let fired = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&fired);
    let _guard = session.on_logout(move || {
        counter.fetch_add(1, Ordering::SeqCst);
    });

    Mock::given(method("GET"))
        .and(path("/v1/diary"))
        .respond_with(ResponseTemplate::new(401))
        .mount(&server)
        .await;
    // 500 is not an explicit rejection, so the refresh surfaces an error
    // and the conservative forced-logout path runs.
    Mock::given(method("POST"))
        .and(path("/auth/refresh"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let err = api.get("/v1/diary").await.unwrap_err();
    assert!(matches!(err, ApiError::SessionExpired));
    assert_eq!(fired.load(Ordering::SeqCst), 1);
    assert_eq!(session.current_token().unwrap(), None);
}
