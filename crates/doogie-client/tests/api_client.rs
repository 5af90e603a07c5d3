mod common;

use std::time::Duration;

use serde_json::json;
use wiremock::matchers::{body_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use doogie_client::services::error::ApiError;
use doogie_client::services::http_client::SessionEvent;
use doogie_client::models::UserProfile;

use common::{client_with_token, make_token, token_response};

#[tokio::test]
async fn test_bearer_token_attached_to_requests() {
    let server = MockServer::start().await;
    let dir = tempfile::tempdir().unwrap();
    let client = client_with_token(&server.uri(), &dir, 3600);
    let token = client.token_store().access().unwrap();

    Mock::given(method("GET"))
        .and(path("/api/v1/users/me"))
        .and(header("authorization", format!("Bearer {token}")))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": "u1",
            "username": "alice",
        })))
        .expect(1)
        .mount(&server)
        .await;

    let profile: UserProfile = client.get("/users/me").await.unwrap();
    assert_eq!(profile.username, "alice");
}

#[tokio::test]
async fn test_expired_token_triggers_single_refresh_for_concurrent_requests() {
    let server = MockServer::start().await;
    let dir = tempfile::tempdir().unwrap();
    let client = client_with_token(&server.uri(), &dir, -60);
    let new_access = make_token(3600);

    // The delay keeps the refresh in flight while all callers pile in, so a
    // second flight would be visible as a second request.
    Mock::given(method("POST"))
        .and(path("/api/v1/auth/refresh"))
        .and(body_json(json!({ "refresh_token": "refresh-1" })))
        .respond_with(
            ResponseTemplate::new(200)
                .set_delay(Duration::from_millis(200))
                .set_body_json(token_response(&new_access, "refresh-2")),
        )
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/api/v1/users/me"))
        .and(header("authorization", format!("Bearer {new_access}")))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": "u1",
            "username": "alice",
        })))
        .expect(8)
        .mount(&server)
        .await;

    let mut handles = Vec::new();
    for _ in 0..8 {
        let client = client.clone();
        handles.push(tokio::spawn(async move {
            client.get::<UserProfile>("/users/me").await
        }));
    }
    for handle in handles {
        assert!(handle.await.unwrap().is_ok());
    }

    assert_eq!(client.token_store().refresh().as_deref(), Some("refresh-2"));
}

#[tokio::test]
async fn test_401_refreshes_and_replays_exactly_once() {
    let server = MockServer::start().await;
    let dir = tempfile::tempdir().unwrap();
    let client = client_with_token(&server.uri(), &dir, 3600);
    let old_token = client.token_store().access().unwrap();
    // A different expiry keeps the rotated token from being byte-identical
    // to the stored one, so the 401 mock cannot match the replay.
    let new_access = make_token(7200);

    // The server revoked the otherwise-unexpired token.
    Mock::given(method("GET"))
        .and(path("/api/v1/users/me"))
        .and(header("authorization", format!("Bearer {old_token}")))
        .respond_with(ResponseTemplate::new(401))
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(method("POST"))
        .and(path("/api/v1/auth/refresh"))
        .respond_with(ResponseTemplate::new(200).set_body_json(token_response(&new_access, "refresh-2")))
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/api/v1/users/me"))
        .and(header("authorization", format!("Bearer {new_access}")))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": "u1",
            "username": "alice",
        })))
        .expect(1)
        .mount(&server)
        .await;

    let profile: UserProfile = client.get("/users/me").await.unwrap();
    assert_eq!(profile.id, "u1");
}

#[tokio::test]
async fn test_second_401_is_terminal_not_a_loop() {
    let server = MockServer::start().await;
    let dir = tempfile::tempdir().unwrap();
    let client = client_with_token(&server.uri(), &dir, 3600);

    // Refresh succeeds, but the endpoint keeps rejecting the caller. The
    // expect(2) is the point: one original attempt, one replay, no loop.
    Mock::given(method("GET"))
        .and(path("/api/v1/users/me"))
        .respond_with(ResponseTemplate::new(401))
        .expect(2)
        .mount(&server)
        .await;

    Mock::given(method("POST"))
        .and(path("/api/v1/auth/refresh"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(token_response(&make_token(3600), "refresh-2")),
        )
        .expect(1)
        .mount(&server)
        .await;

    let result = client.get::<UserProfile>("/users/me").await;
    assert_eq!(result.unwrap_err(), ApiError::Auth);
}

#[tokio::test]
async fn test_failed_refresh_clears_tokens_and_broadcasts_session_lost() {
    let server = MockServer::start().await;
    let dir = tempfile::tempdir().unwrap();
    let client = client_with_token(&server.uri(), &dir, -60);
    let mut session_rx = client.subscribe_session();

    Mock::given(method("POST"))
        .and(path("/api/v1/auth/refresh"))
        .respond_with(ResponseTemplate::new(401))
        .expect(1)
        .mount(&server)
        .await;

    // The cleared store sends the next request unauthenticated; the 401 then
    // fails locally because there is no refresh token left to try.
    Mock::given(method("GET"))
        .and(path("/api/v1/users/me"))
        .respond_with(ResponseTemplate::new(401))
        .expect(1)
        .mount(&server)
        .await;

    let result = client.get::<UserProfile>("/users/me").await;
    assert_eq!(result.unwrap_err(), ApiError::Auth);
    assert!(client.token_store().access().is_none());
    assert!(client.token_store().refresh().is_none());
    assert_eq!(session_rx.recv().await.unwrap(), SessionEvent::SessionLost);

    let result = client.get::<UserProfile>("/users/me").await;
    assert_eq!(result.unwrap_err(), ApiError::Auth);
}

#[tokio::test]
async fn test_validation_detail_surfaced_from_422() {
    let server = MockServer::start().await;
    let dir = tempfile::tempdir().unwrap();
    let client = client_with_token(&server.uri(), &dir, 3600);

    Mock::given(method("POST"))
        .and(path("/api/v1/chats"))
        .respond_with(ResponseTemplate::new(422).set_body_json(json!({
            "detail": "title must not be empty",
        })))
        .mount(&server)
        .await;

    let result = client
        .post::<serde_json::Value, _>("/chats", &json!({ "title": "" }))
        .await;
    assert_eq!(
        result.unwrap_err(),
        ApiError::Validation("title must not be empty".to_string())
    );
}
