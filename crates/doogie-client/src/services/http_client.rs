use std::sync::Arc;

use chrono::Utc;
use reqwest::{Method, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::auth::jwt;
use crate::auth::token_store::TokenStore;
use crate::models::Page;

use super::error::{ApiError, ApiResult};
use super::single_flight::SingleFlight;

/// All endpoints are rooted here.
const API_PREFIX: &str = "/api/v1";

/// Emitted when the session cannot be recovered (refresh failed or the
/// refresh endpoint itself returned 401). Subscribers decide what "navigate
/// to login" means for their surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEvent {
    SessionLost,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    refresh_token: String,
    #[serde(default)]
    #[allow(dead_code)]
    token_type: Option<String>,
}

/// Authenticated HTTP client for the Doogie API.
///
/// Three contracts on every request:
/// 1. the current access token is attached as a bearer credential, refreshed
///    proactively when it is expired or within 30 seconds of expiry;
/// 2. at most one token refresh is in flight at any time — concurrent
///    requests wait for the leader's result;
/// 3. a 401 triggers one coordinated refresh and a single replay of the
///    original request. A second 401 (or a failed refresh) is terminal:
///    tokens are cleared and `SessionLost` is broadcast.
pub struct ApiClient {
    http: reqwest::Client,
    base_url: String,
    tokens: Arc<TokenStore>,
    refresh: SingleFlight<String>,
    session_tx: broadcast::Sender<SessionEvent>,
}

impl ApiClient {
    pub fn new(base_url: impl Into<String>, tokens: Arc<TokenStore>) -> Self {
        let (session_tx, _) = broadcast::channel(4);
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into(),
            tokens,
            refresh: SingleFlight::new(),
            session_tx,
        }
    }

    /// Compose a full URL under the API prefix, canonicalising slashes.
    pub fn url(&self, path: &str) -> String {
        let base = self.base_url.trim_end_matches('/');
        let path = path.trim_start_matches('/');
        format!("{base}{API_PREFIX}/{path}")
    }

    /// The underlying transport, for requests outside the JSON verbs
    /// (login form post, SSE stream).
    pub fn http(&self) -> &reqwest::Client {
        &self.http
    }

    pub fn token_store(&self) -> &Arc<TokenStore> {
        &self.tokens
    }

    pub fn subscribe_session(&self) -> broadcast::Receiver<SessionEvent> {
        self.session_tx.subscribe()
    }

    pub async fn get<T: DeserializeOwned>(&self, path: &str) -> ApiResult<T> {
        self.execute_json(Method::GET, path, None, &[]).await
    }

    pub async fn get_paginated<T: DeserializeOwned>(
        &self,
        path: &str,
        page: u32,
        size: u32,
    ) -> ApiResult<Page<T>> {
        let query = [
            ("page", page.to_string()),
            ("size", size.to_string()),
        ];
        self.execute_json(Method::GET, path, None, &query).await
    }

    pub async fn post<T: DeserializeOwned, B: Serialize>(
        &self,
        path: &str,
        body: &B,
    ) -> ApiResult<T> {
        let body = serde_json::to_value(body)
            .map_err(|e| ApiError::Unknown(format!("failed to encode request body: {e}")))?;
        self.execute_json(Method::POST, path, Some(body), &[]).await
    }

    pub async fn put<T: DeserializeOwned, B: Serialize>(
        &self,
        path: &str,
        body: &B,
    ) -> ApiResult<T> {
        let body = serde_json::to_value(body)
            .map_err(|e| ApiError::Unknown(format!("failed to encode request body: {e}")))?;
        self.execute_json(Method::PUT, path, Some(body), &[]).await
    }

    pub async fn delete(&self, path: &str) -> ApiResult<()> {
        let resp = self.dispatch(Method::DELETE, path, None, &[]).await?;
        let status = resp.status();
        if status.is_success() {
            return Ok(());
        }
        let body = resp.text().await.unwrap_or_default();
        Err(classify_error(status, &body))
    }

    async fn execute_json<T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        body: Option<serde_json::Value>,
        query: &[(&str, String)],
    ) -> ApiResult<T> {
        let resp = self.dispatch(method, path, body, query).await?;
        let status = resp.status();
        if status.is_success() {
            return resp
                .json::<T>()
                .await
                .map_err(|e| ApiError::Unknown(format!("failed to decode response: {e}")));
        }
        let body = resp.text().await.unwrap_or_default();
        Err(classify_error(status, &body))
    }

    /// Send the request with auth injection and the one-shot 401 replay.
    async fn dispatch(
        &self,
        method: Method,
        path: &str,
        body: Option<serde_json::Value>,
        query: &[(&str, String)],
    ) -> ApiResult<reqwest::Response> {
        let url = self.url(path);
        let mut token = self.bearer().await?;
        let mut retried = false;

        loop {
            let mut req = self.http.request(method.clone(), &url);
            if !query.is_empty() {
                req = req.query(query);
            }
            if let Some(body) = &body {
                req = req.json(body);
            }
            if let Some(token) = &token {
                req = req.bearer_auth(token);
            }

            let resp = req
                .send()
                .await
                .map_err(|e| ApiError::Network(e.to_string()))?;

            if resp.status() == StatusCode::UNAUTHORIZED && !retried {
                retried = true;
                debug!(%url, "Request returned 401, refreshing and replaying once");
                token = Some(self.refresh_access().await?);
                continue;
            }
            return Ok(resp);
        }
    }

    /// Current access token for out-of-band use (the SSE stream URL).
    /// Refreshes proactively; fails with `Auth` when no token is stored.
    pub async fn access_token(&self) -> ApiResult<String> {
        match self.tokens.access() {
            None => Err(ApiError::Auth),
            Some(token) => {
                if jwt::needs_refresh(&token, Utc::now().timestamp()) {
                    self.refresh_access().await
                } else {
                    Ok(token)
                }
            }
        }
    }

    async fn bearer(&self) -> ApiResult<Option<String>> {
        match self.tokens.access() {
            None => Ok(None),
            Some(token) => {
                if jwt::needs_refresh(&token, Utc::now().timestamp()) {
                    debug!("Access token expired or expiring soon, refreshing before dispatch");
                    Ok(Some(self.refresh_access().await?))
                } else {
                    Ok(Some(token))
                }
            }
        }
    }

    /// Coordinated refresh: at most one refresh call in flight; every
    /// concurrent caller receives the same outcome.
    pub async fn refresh_access(&self) -> ApiResult<String> {
        self.refresh.run(|| self.perform_refresh()).await
    }

    async fn perform_refresh(&self) -> ApiResult<String> {
        let Some(refresh_token) = self.tokens.refresh() else {
            return Err(self.fail_session("no refresh token stored"));
        };

        info!("Refreshing access token");
        let url = self.url("/auth/refresh");
        let resp = self
            .http
            .post(&url)
            .json(&serde_json::json!({ "refresh_token": refresh_token }))
            .send()
            .await;

        let resp = match resp {
            Ok(resp) => resp,
            Err(e) => return Err(self.fail_session(&format!("refresh transport failure: {e}"))),
        };

        if !resp.status().is_success() {
            return Err(self.fail_session(&format!("refresh rejected with {}", resp.status())));
        }

        let pair: TokenResponse = match resp.json().await {
            Ok(pair) => pair,
            Err(e) => return Err(self.fail_session(&format!("bad refresh response: {e}"))),
        };

        if let Err(e) = self.tokens.rotate(&pair.access_token, &pair.refresh_token) {
            warn!(error = %e, "Failed to persist rotated tokens");
        }
        debug!("Token pair rotated");
        Ok(pair.access_token)
    }

    /// Terminal refresh failure: clear both tokens and broadcast SessionLost.
    fn fail_session(&self, reason: &str) -> ApiError {
        warn!(reason = %reason, "Session lost");
        self.tokens.clear();
        let _ = self.session_tx.send(SessionEvent::SessionLost);
        ApiError::Auth
    }
}

/// Classify a non-success response per the error taxonomy.
pub(crate) fn classify_error(status: StatusCode, body: &str) -> ApiError {
    match status.as_u16() {
        401 => ApiError::Auth,
        403 => ApiError::Forbidden,
        404 => ApiError::NotFound,
        400..=499 => match detail_message(body) {
            Some(detail) => ApiError::Validation(detail),
            None => ApiError::Unknown(format!("unexpected status {status}")),
        },
        500..=599 => ApiError::Server(format!("status {status}")),
        _ => ApiError::Unknown(format!("unexpected status {status}")),
    }
}

/// Extract the server's structured `detail` field, if any. Handles both the
/// plain-string form and the field-error array form.
fn detail_message(body: &str) -> Option<String> {
    let value: serde_json::Value = serde_json::from_str(body).ok()?;
    match value.get("detail")? {
        serde_json::Value::String(s) => Some(s.clone()),
        serde_json::Value::Array(items) => {
            let msgs: Vec<String> = items
                .iter()
                .filter_map(|item| item.get("msg").and_then(|m| m.as_str()))
                .map(|s| s.to_string())
                .collect();
            if msgs.is_empty() {
                None
            } else {
                Some(msgs.join("; "))
            }
        }
        _ => None,
    }
}
