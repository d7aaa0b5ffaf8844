//! Shared fixtures for the HTTP-level tests.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use hackportal_core::{ApiClient, CredentialStorage, MemoryStorage, PortalConfig, SessionStore};
use serde_json::{json, Value};
use wiremock::matchers::{body_json, header, method, path};
use wiremock::{Mock, MockServer, Request, ResponseTemplate};

pub const PROVIDER: &str = "ht6";
pub const REFRESH_PATH: &str = "/auth/ht6/refresh";
pub const LOGOUT_PATH: &str = "/auth/ht6/logout";
pub const PROFILE_PATH: &str = "/api/action/profile";
pub const TOKEN_HEADER: &str = "x-access-token";

pub fn config_for(uri: &str) -> PortalConfig {
    PortalConfig {
        api_url: uri.to_string(),
        auth_provider: PROVIDER.to_string(),
        ..Default::default()
    }
}

pub fn session_for(uri: &str, storage: Arc<MemoryStorage>) -> SessionStore {
    let api = ApiClient::new(&config_for(uri)).expect("client builds");
    let storage: Arc<dyn CredentialStorage> = storage;
    SessionStore::new(api, storage)
}

pub async fn setup() -> (MockServer, SessionStore, Arc<MemoryStorage>) {
    let server = MockServer::start().await;
    let storage = Arc::new(MemoryStorage::new());
    let session = session_for(&server.uri(), storage.clone());
    (server, session, storage)
}

pub fn envelope(status: u16, message: Value) -> Value {
    json!({ "status": status, "message": message })
}

pub fn profile_body(first_name: &str) -> Value {
    envelope(
        200,
        json!({
            "firstName": first_name,
            "lastName": "Hacker",
            "email": "hacker@example.com",
            "status": {"applied": true, "accepted": true, "confirmed": false}
        }),
    )
}

pub fn ok_body() -> Value {
    envelope(200, json!("ok"))
}

pub async fn mount_profile(server: &MockServer, token: &str, first_name: &str) {
    Mock::given(method("GET"))
        .and(path(PROFILE_PATH))
        .and(header(TOKEN_HEADER, token))
        .respond_with(ResponseTemplate::new(200).set_body_json(profile_body(first_name)))
        .mount(server)
        .await;
}

pub async fn mount_refresh(server: &MockServer, refresh_token: &str, new_pair: (&str, &str)) {
    Mock::given(method("POST"))
        .and(path(REFRESH_PATH))
        .and(body_json(json!({ "refreshToken": refresh_token })))
        .respond_with(ResponseTemplate::new(200).set_body_json(envelope(
            200,
            json!({ "token": new_pair.0, "refreshToken": new_pair.1 }),
        )))
        .expect(1)
        .mount(server)
        .await;
}

pub async fn mount_logout(server: &MockServer) {
    Mock::given(method("POST"))
        .and(path(LOGOUT_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_json(ok_body()))
        .mount(server)
        .await;
}

/// Sign in with `token`/`refresh` and wait for the profile to load
pub async fn authenticate(server: &MockServer, session: &SessionStore, token: &str, refresh: &str) {
    mount_profile(server, token, "Ada").await;
    session
        .set_credential(token, refresh)
        .await
        .expect("credential stored");
    let snapshot = tokio::time::timeout(Duration::from_secs(5), session.wait_ready())
        .await
        .expect("session settles");
    assert!(snapshot.is_authenticated(), "expected Authenticated, got {:?}", snapshot.state);
}

pub async fn requests_to(server: &MockServer, target: &str) -> Vec<Request> {
    server
        .received_requests()
        .await
        .unwrap_or_default()
        .into_iter()
        .filter(|request| request.url.path() == target)
        .collect()
}

/// Refresh endpoint answering `status` with `message` after `delay`
pub async fn mount_slow_refresh(server: &MockServer, status: u16, message: Value, delay: Duration) {
    Mock::given(method("POST"))
        .and(path(REFRESH_PATH))
        .respond_with(
            ResponseTemplate::new(status)
                .set_body_json(envelope(status, message))
                .set_delay(delay),
        )
        .expect(1)
        .mount(server)
        .await;
}
