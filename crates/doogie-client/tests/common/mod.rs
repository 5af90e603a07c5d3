#![allow(dead_code)]

use std::sync::Arc;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use serde_json::{json, Value};

use doogie_client::auth::token_store::TokenStore;
use doogie_client::services::http_client::ApiClient;

/// Unsigned JWT whose `exp` claim lies the given number of seconds in the
/// future (negative for an already-expired token). The client only reads
/// the claim; signatures are the server's business.
pub fn make_token(expires_in_secs: i64) -> String {
    let header = URL_SAFE_NO_PAD.encode(r#"{"alg":"HS256","typ":"JWT"}"#);
    let exp = chrono::Utc::now().timestamp() + expires_in_secs;
    let payload = URL_SAFE_NO_PAD.encode(format!(r#"{{"exp":{exp}}}"#));
    format!("{header}.{payload}.sig")
}

/// Client wired to the mock server with a session-lifetime token pair.
pub fn client_with_token(
    server_uri: &str,
    dir: &tempfile::TempDir,
    access_expires_in_secs: i64,
) -> Arc<ApiClient> {
    let store = Arc::new(TokenStore::new(dir.path().join("tokens.json")));
    store
        .put(&make_token(access_expires_in_secs), "refresh-1", false)
        .unwrap();
    Arc::new(ApiClient::new(server_uri, store))
}

pub fn token_response(access: &str, refresh: &str) -> Value {
    json!({
        "access_token": access,
        "refresh_token": refresh,
        "token_type": "bearer",
    })
}

pub fn message_json(id: &str, chat_id: &str, role: &str, content: &str) -> Value {
    json!({
        "id": id,
        "chat_id": chat_id,
        "role": role,
        "content": content,
        "created_at": "2024-01-01T00:00:00Z",
    })
}

pub fn chat_json(id: &str, title: &str, messages: Vec<Value>) -> Value {
    json!({
        "id": id,
        "title": title,
        "created_at": "2024-01-01T00:00:00Z",
        "updated_at": "2024-01-01T00:00:00Z",
        "messages": messages,
    })
}

pub fn summary_json(id: &str, title: &str) -> Value {
    json!({
        "id": id,
        "title": title,
        "created_at": "2024-01-01T00:00:00Z",
        "updated_at": "2024-01-01T00:00:00Z",
    })
}
