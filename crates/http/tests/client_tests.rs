//! Integration tests for the auth API client

use altan_core::{Credentials, RegisterRequest, SessionStore, UserProfile};
use altan_http::{AuthApiClient, ClientError};
use serde_json::json;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use wiremock::matchers::{body_string_contains, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn stored_user() -> UserProfile {
    UserProfile {
        id: 1,
        email: "user@x.com".to_string(),
        verified: true,
        ..UserProfile::default()
    }
}

#[tokio::test]
async fn test_client_builder() {
    let client = AuthApiClient::builder()
        .base_url("http://localhost:8080/")
        .table_id("tbl_1")
        .build();

    assert!(client.is_ok());
    let client = client.unwrap();
    assert_eq!(client.base_url(), "http://localhost:8080");
    assert_eq!(client.table_id(), Some("tbl_1"));
    assert_eq!(client.store().key(), "auth_user");
}

#[tokio::test]
async fn test_client_builder_requires_base_url() {
    let result = AuthApiClient::builder().build();
    assert!(matches!(result, Err(ClientError::Configuration(_))));
}

#[tokio::test]
async fn test_login_posts_form_credentials() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/auth/login"))
        .and(header("content-type", "application/x-www-form-urlencoded"))
        .and(body_string_contains("username=user%40x.com"))
        .and(body_string_contains("password=pw"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"access_token": "T"})))
        .expect(1)
        .mount(&mock_server)
        .await;

    let client = AuthApiClient::new(mock_server.uri()).unwrap();
    let token = client
        .login(&Credentials::new("user@x.com", "pw"))
        .await
        .unwrap();

    assert_eq!(token.access_token, "T");
}

#[tokio::test]
async fn test_request_reads_latest_stored_token() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/auth/me"))
        .and(header("authorization", "Bearer first"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": 1})))
        .expect(1)
        .mount(&mock_server)
        .await;
    Mock::given(method("GET"))
        .and(path("/auth/me"))
        .and(header("authorization", "Bearer second"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": 2})))
        .expect(1)
        .mount(&mock_server)
        .await;

    let store = SessionStore::in_memory("auth_user");
    let client = AuthApiClient::builder()
        .base_url(mock_server.uri())
        .store(store.clone())
        .build()
        .unwrap();

    store.set_token("first").unwrap();
    assert_eq!(client.me().await.unwrap()["id"], 1);

    // Renewed elsewhere; the same client instance must pick it up
    store.set_token("second").unwrap();
    assert_eq!(client.me().await.unwrap()["id"], 2);
}

#[tokio::test]
async fn test_no_token_sends_no_authorization() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/auth/register"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": 5})))
        .mount(&mock_server)
        .await;

    let client = AuthApiClient::new(mock_server.uri()).unwrap();
    client
        .register(&RegisterRequest::new("user@x.com", "pw"))
        .await
        .unwrap();

    let requests = mock_server.received_requests().await.unwrap();
    assert_eq!(requests.len(), 1);
    assert!(!requests[0].headers.contains_key("authorization"));
}

#[tokio::test]
async fn test_table_id_is_sent_as_query() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/auth/refresh"))
        .and(query_param("table_id", "tbl_1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"access_token": "T2"})))
        .expect(1)
        .mount(&mock_server)
        .await;

    let client = AuthApiClient::builder()
        .base_url(mock_server.uri())
        .table_id("tbl_1")
        .build()
        .unwrap();

    assert_eq!(client.refresh().await.unwrap().access_token, "T2");
}

#[tokio::test]
async fn test_unauthorized_clears_store_and_notifies() {
    let mock_server = MockServer::start().await;

    Mock::given(method("PATCH"))
        .and(path("/auth/update"))
        .respond_with(
            ResponseTemplate::new(401).set_body_json(json!({"detail": "Token expired"})),
        )
        .mount(&mock_server)
        .await;

    let store = SessionStore::in_memory("auth_user");
    store.set_token("stale").unwrap();
    store.save_user(&stored_user()).unwrap();

    let notified = Arc::new(AtomicUsize::new(0));
    let counter = notified.clone();
    let client = AuthApiClient::builder()
        .base_url(mock_server.uri())
        .store(store.clone())
        .on_unauthorized(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        })
        .build()
        .unwrap();

    let result = client.update_profile(&serde_json::Map::new()).await;

    match result {
        Err(ClientError::Unauthorized(message)) => assert_eq!(message, "Token expired"),
        other => panic!("expected unauthorized, got {other:?}"),
    }
    assert_eq!(notified.load(Ordering::SeqCst), 1);
    assert_eq!(store.token().unwrap(), None);
    assert_eq!(store.user().unwrap(), None);
}

#[tokio::test]
async fn test_server_errors_keep_session() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/auth/me"))
        .respond_with(ResponseTemplate::new(503).set_body_string("maintenance"))
        .mount(&mock_server)
        .await;

    let store = SessionStore::in_memory("auth_user");
    store.set_token("T").unwrap();
    let client = AuthApiClient::builder()
        .base_url(mock_server.uri())
        .store(store.clone())
        .build()
        .unwrap();

    let err = client.me().await.unwrap_err();
    assert_eq!(err.status(), Some(503));
    assert_eq!(err.detail(), Some("maintenance"));
    assert_eq!(store.token().unwrap().as_deref(), Some("T"));
}

#[tokio::test]
async fn test_logout_ignores_body() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/auth/logout"))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&mock_server)
        .await;

    let client = AuthApiClient::new(mock_server.uri()).unwrap();
    assert!(client.logout().await.is_ok());
}

#[tokio::test]
async fn test_custom_user_agent_is_sent() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/auth/me"))
        .and(header("user-agent", "altan-cli/9.9"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": 1})))
        .expect(1)
        .mount(&mock_server)
        .await;

    let client = AuthApiClient::builder()
        .base_url(mock_server.uri())
        .user_agent("altan-cli/9.9")
        .build()
        .unwrap();

    assert_eq!(client.me().await.unwrap()["id"], 1);
}
