//! Integration tests for the credential facade.
//!
//! These tests verify that `Credential`:
//! - Runs the device flow when no account is cached, and caches the result
//! - Serves later requests from the cache or refresh material without a flow
//! - Persists the cache after every attempt and survives a restart
//! - Keeps working when no secure store is available

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use chrono::{Duration, Utc};
use graphauth_core::oauth::TokenGrant;
use graphauth_core::{
    Account, AuthConfig, AuthError, Authority, CachePersistence, Credential, DeviceAuthorization,
    DevicePrompt, MemoryStore, Platform, ScopeSet, Secret, StoreMethod, StoreSettings, TokenCache,
    TokenProvider, select_store,
};
use serde_json::{Value, json};
use std::sync::{Arc, Mutex};
use tempfile::TempDir;
use wiremock::{
    Mock, MockServer, ResponseTemplate,
    matchers::{body_string_contains, method, path},
};

const CLIENT_ID: &str = "test-client-id";
const DEVICE_CODE_PATH: &str = "/common/oauth2/v2.0/devicecode";
const TOKEN_PATH: &str = "/common/oauth2/v2.0/token";

/// Prompt that records what it was asked to show.
#[derive(Clone, Default)]
struct RecordingPrompt {
    shown: Arc<Mutex<Vec<String>>>,
}

impl RecordingPrompt {
    fn count(&self) -> usize {
        self.shown.lock().unwrap().len()
    }
}

impl DevicePrompt for RecordingPrompt {
    fn display(&self, authorization: &DeviceAuthorization) {
        self.shown.lock().unwrap().push(authorization.instructions());
    }
}

fn tenant(server: &MockServer) -> String {
    format!("{}/common", server.uri())
}

fn config(server: &MockServer) -> AuthConfig {
    AuthConfig::new(CLIENT_ID)
        .with_tenant(tenant(server))
        .with_default_scopes(ScopeSet::parse("User.Read"))
}

async fn build_credential(
    server: &MockServer,
    store: &MemoryStore,
    prompt: &RecordingPrompt,
) -> Credential {
    let persistence = CachePersistence::new(Some(Box::new(store.clone())), "unused.bin");
    Credential::with_persistence(config(server), persistence, Box::new(prompt.clone()))
        .await
        .unwrap()
}

fn client_info(uid: &str, utid: &str) -> String {
    URL_SAFE_NO_PAD.encode(json!({"uid": uid, "utid": utid}).to_string())
}

fn device_code_response() -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_json(json!({
        "device_code": "device-code-1",
        "user_code": "ABCD-1234",
        "verification_uri": "https://microsoft.com/devicelogin",
        "expires_in": 900,
        "interval": 0,
        "message": "To sign in, enter ABCD-1234 at https://microsoft.com/devicelogin",
    }))
}

fn token_body(access_token: &str) -> Value {
    json!({
        "token_type": "Bearer",
        "access_token": access_token,
        "refresh_token": "refresh-1",
        "expires_in": 3600,
        "scope": "User.Read",
        "client_info": client_info("uid-1", "tid-1"),
    })
}

async fn mount_device_code(server: &MockServer, expected: u64) {
    Mock::given(method("POST"))
        .and(path(DEVICE_CODE_PATH))
        .respond_with(device_code_response())
        .expect(expected)
        .mount(server)
        .await;
}

async fn mount_device_token(server: &MockServer, response: ResponseTemplate, expected: u64) {
    Mock::given(method("POST"))
        .and(path(TOKEN_PATH))
        .and(body_string_contains("device_code=device-code-1"))
        .respond_with(response)
        .expect(expected)
        .mount(server)
        .await;
}

/// A serialized cache holding one account with an expired access token and a
/// refresh token.
fn seeded_cache(server: &MockServer) -> Vec<u8> {
    let authority = Authority::from_tenant(&tenant(server)).unwrap();
    let account = Account {
        home_account_id: "uid-1.tid-1".to_string(),
        environment: authority.environment().to_string(),
        realm: Some("tid-1".to_string()),
        username: Some("ana@example.com".to_string()),
        name: None,
        discovered_at: Utc::now(),
    };
    let grant = TokenGrant {
        access_token: Secret::new("stale-token"),
        refresh_token: Some(Secret::new("cached-refresh")),
        expires_on: Utc::now() - Duration::minutes(1),
        scopes: ScopeSet::parse("User.Read"),
        identity: None,
    };

    let mut cache = TokenCache::new();
    cache.save_grant(&account, CLIENT_ID, &grant);
    cache.serialize().unwrap()
}

#[tokio::test]
async fn test_no_accounts_runs_device_flow_and_caches_result() {
    let server = MockServer::start().await;
    mount_device_code(&server, 1).await;
    mount_device_token(
        &server,
        ResponseTemplate::new(200).set_body_json(token_body("T")),
        1,
    )
    .await;

    let store = MemoryStore::new();
    let prompt = RecordingPrompt::default();
    let credential = build_credential(&server, &store, &prompt).await;
    assert!(credential.accounts().await.is_empty());

    let t0 = Utc::now();
    let token = credential.acquire::<&str>(&[]).await.unwrap();
    let t1 = Utc::now();

    assert_eq!(token.token.expose(), "T");
    assert!(token.expires_on >= t0 + Duration::seconds(3600));
    assert!(token.expires_on <= t1 + Duration::seconds(3600));
    assert_eq!(prompt.count(), 1);

    let accounts = credential.accounts().await;
    assert_eq!(accounts.len(), 1);
    assert_eq!(accounts[0].home_account_id, "uid-1.tid-1");
    assert_eq!(store.write_count(), 1);
}

#[tokio::test]
async fn test_second_acquire_is_served_from_cache() {
    let server = MockServer::start().await;
    mount_device_code(&server, 1).await;
    mount_device_token(
        &server,
        ResponseTemplate::new(200).set_body_json(token_body("T")),
        1,
    )
    .await;

    let store = MemoryStore::new();
    let prompt = RecordingPrompt::default();
    let credential = build_credential(&server, &store, &prompt).await;

    credential.acquire(&["User.Read"]).await.unwrap();
    let again = credential.acquire(&["user.read"]).await.unwrap();

    assert_eq!(again.token.expose(), "T");
    assert_eq!(prompt.count(), 1);
    // Nothing changed on the second call, so nothing was written.
    assert_eq!(store.write_count(), 1);
}

#[tokio::test]
async fn test_concurrent_acquires_share_one_device_flow() {
    let server = MockServer::start().await;
    mount_device_code(&server, 1).await;
    mount_device_token(
        &server,
        ResponseTemplate::new(200).set_body_json(token_body("T")),
        1,
    )
    .await;

    let store = MemoryStore::new();
    let prompt = RecordingPrompt::default();
    let credential = build_credential(&server, &store, &prompt).await;

    let (first, second) = tokio::join!(
        credential.acquire(&["User.Read"]),
        credential.acquire(&["User.Read"]),
    );

    assert_eq!(first.unwrap().token.expose(), "T");
    assert_eq!(second.unwrap().token.expose(), "T");
    assert_eq!(prompt.count(), 1);
    assert_eq!(credential.accounts().await.len(), 1);
    assert_eq!(store.write_count(), 1);
}

#[tokio::test]
async fn test_cache_survives_restart() {
    let server = MockServer::start().await;
    mount_device_code(&server, 1).await;
    mount_device_token(
        &server,
        ResponseTemplate::new(200).set_body_json(token_body("T")),
        1,
    )
    .await;

    let store = MemoryStore::new();
    let prompt = RecordingPrompt::default();
    {
        let first = build_credential(&server, &store, &prompt).await;
        first.acquire::<&str>(&[]).await.unwrap();
    }

    let restarted = build_credential(&server, &store, &prompt).await;
    assert_eq!(restarted.accounts().await.len(), 1);

    let token = restarted.acquire::<&str>(&[]).await.unwrap();
    assert_eq!(token.token.expose(), "T");
    assert_eq!(prompt.count(), 1);
}

#[tokio::test]
async fn test_cached_refresh_token_skips_device_flow() {
    let server = MockServer::start().await;
    mount_device_code(&server, 0).await;

    Mock::given(method("POST"))
        .and(path(TOKEN_PATH))
        .and(body_string_contains("grant_type=refresh_token"))
        .and(body_string_contains("refresh_token=cached-refresh"))
        .and(body_string_contains(format!("client_id={}", CLIENT_ID)))
        .respond_with(ResponseTemplate::new(200).set_body_json(token_body("refreshed")))
        .expect(1)
        .mount(&server)
        .await;

    let store = MemoryStore::with_data(seeded_cache(&server));
    let prompt = RecordingPrompt::default();
    let credential = build_credential(&server, &store, &prompt).await;

    let token = credential.acquire(&["User.Read"]).await.unwrap();

    assert_eq!(token.token.expose(), "refreshed");
    assert_eq!(prompt.count(), 0);
    assert_eq!(store.write_count(), 1);

    let accounts = credential.accounts().await;
    assert_eq!(accounts.len(), 1);
    assert_eq!(accounts[0].username.as_deref(), Some("ana@example.com"));
}

#[tokio::test]
async fn test_failed_refresh_falls_back_to_device_flow() {
    let server = MockServer::start().await;
    mount_device_code(&server, 1).await;
    mount_device_token(
        &server,
        ResponseTemplate::new(200).set_body_json(token_body("interactive")),
        1,
    )
    .await;

    Mock::given(method("POST"))
        .and(path(TOKEN_PATH))
        .and(body_string_contains("grant_type=refresh_token"))
        .respond_with(ResponseTemplate::new(400).set_body_json(json!({
            "error": "invalid_grant",
            "error_description": "refresh token revoked",
        })))
        .expect(1)
        .mount(&server)
        .await;

    let store = MemoryStore::with_data(seeded_cache(&server));
    let prompt = RecordingPrompt::default();
    let credential = build_credential(&server, &store, &prompt).await;

    let token = credential.acquire(&["User.Read"]).await.unwrap();
    assert_eq!(token.token.expose(), "interactive");
    assert_eq!(prompt.count(), 1);
}

#[tokio::test]
async fn test_declined_flow_is_denied_without_retry() {
    let server = MockServer::start().await;
    mount_device_code(&server, 1).await;
    mount_device_token(
        &server,
        ResponseTemplate::new(400).set_body_json(json!({
            "error": "authorization_declined",
            "error_description": "the user declined",
        })),
        1,
    )
    .await;

    let store = MemoryStore::new();
    let prompt = RecordingPrompt::default();
    let credential = build_credential(&server, &store, &prompt).await;

    let result = credential.acquire(&["User.Read"]).await;

    assert!(matches!(result, Err(AuthError::FlowDenied { .. })));
    assert_eq!(prompt.count(), 1);
    assert!(credential.accounts().await.is_empty());
    assert_eq!(store.write_count(), 0);
}

#[tokio::test]
async fn test_response_without_access_token_is_no_token() {
    let server = MockServer::start().await;
    mount_device_code(&server, 1).await;
    mount_device_token(
        &server,
        ResponseTemplate::new(200).set_body_json(json!({
            "token_type": "Bearer",
            "refresh_token": "should-not-leak",
        })),
        1,
    )
    .await;

    let store = MemoryStore::new();
    let prompt = RecordingPrompt::default();
    let credential = build_credential(&server, &store, &prompt).await;

    match credential.acquire(&["User.Read"]).await {
        Err(AuthError::NoToken { response, .. }) => {
            assert!(!response.contains("should-not-leak"));
        }
        other => panic!("expected NoToken, got {:?}", other),
    }
}

#[tokio::test]
async fn test_explicit_joined_scopes_are_requested() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path(DEVICE_CODE_PATH))
        .and(body_string_contains("Calendars.ReadWrite"))
        .and(body_string_contains("Mail.Read"))
        .respond_with(device_code_response())
        .expect(1)
        .mount(&server)
        .await;
    mount_device_token(
        &server,
        ResponseTemplate::new(200).set_body_json(json!({
            "access_token": "T",
            "expires_in": 3600,
            "scope": "Calendars.ReadWrite Mail.Read",
            "client_info": client_info("uid-1", "tid-1"),
        })),
        1,
    )
    .await;

    let store = MemoryStore::new();
    let prompt = RecordingPrompt::default();
    let credential = build_credential(&server, &store, &prompt).await;

    credential
        .acquire(&["Calendars.ReadWrite Mail.Read"])
        .await
        .unwrap();

    // The listed form of the same scopes is now a cache hit.
    credential
        .acquire(&["Mail.Read", "Calendars.ReadWrite"])
        .await
        .unwrap();
    assert_eq!(prompt.count(), 1);
}

#[tokio::test]
async fn test_no_secure_store_falls_back_to_plaintext() {
    let server = MockServer::start().await;
    mount_device_code(&server, 1).await;
    mount_device_token(
        &server,
        ResponseTemplate::new(200).set_body_json(token_body("T")),
        1,
    )
    .await;

    let dir = TempDir::new().unwrap();
    let cache_path = dir.path().join("token_cache.bin");
    let settings = StoreSettings {
        app_name: "graphauth-test".to_string(),
        label: "token cache".to_string(),
        path: cache_path.clone(),
    };

    let (store, method_name) = select_store(&Platform::Other("plan9".to_string()), &settings).await;
    assert!(store.is_none());
    assert_eq!(method_name, StoreMethod::None);

    let prompt = RecordingPrompt::default();
    let persistence = CachePersistence::new(store, &cache_path);
    let credential =
        Credential::with_persistence(config(&server), persistence, Box::new(prompt.clone()))
            .await
            .unwrap();
    assert_eq!(credential.store_method(), StoreMethod::None);

    let token = credential.acquire::<&str>(&[]).await.unwrap();
    assert_eq!(token.token.expose(), "T");

    let written: Value = serde_json::from_slice(&std::fs::read(&cache_path).unwrap()).unwrap();
    assert_eq!(written["version"], 1);
    assert_eq!(written["accounts"][0]["home_account_id"], "uid-1.tid-1");
}

#[tokio::test]
async fn test_sign_out_forgets_accounts() {
    let server = MockServer::start().await;
    mount_device_code(&server, 0).await;

    let store = MemoryStore::with_data(seeded_cache(&server));
    let prompt = RecordingPrompt::default();
    let credential = build_credential(&server, &store, &prompt).await;
    assert_eq!(credential.accounts().await.len(), 1);

    assert_eq!(credential.sign_out().await, 1);
    assert!(credential.accounts().await.is_empty());
    assert_eq!(store.write_count(), 1);

    let restarted = build_credential(&server, &store, &prompt).await;
    assert!(restarted.accounts().await.is_empty());
}

#[tokio::test]
async fn test_token_provider_yields_authorization_header() {
    let server = MockServer::start().await;
    mount_device_code(&server, 1).await;
    mount_device_token(
        &server,
        ResponseTemplate::new(200).set_body_json(token_body("T")),
        1,
    )
    .await;

    let store = MemoryStore::new();
    let prompt = RecordingPrompt::default();
    let credential = build_credential(&server, &store, &prompt).await;
    let provider: &dyn TokenProvider = &credential;

    let token = provider.bearer_token(&["User.Read"]).await.unwrap();
    assert_eq!(token.authorization_header(), "Bearer T");
}
