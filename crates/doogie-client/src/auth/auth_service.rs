use std::sync::Arc;

use serde::Deserialize;
use tracing::info;

use crate::models::UserProfile;
use crate::services::error::{ApiError, ApiResult};
use crate::services::http_client::{classify_error, ApiClient};

#[derive(Debug, Deserialize)]
struct LoginResponse {
    access_token: String,
    refresh_token: String,
    #[serde(default)]
    #[allow(dead_code)]
    token_type: Option<String>,
}

/// Login/logout against the auth endpoints. Writes the token store; the
/// HTTP client owns all later rotation.
pub struct AuthService {
    client: Arc<ApiClient>,
}

impl AuthService {
    pub fn new(client: Arc<ApiClient>) -> Self {
        Self { client }
    }

    /// Authenticate with the form-encoded login endpoint and store the token
    /// pair under the requested lifetime.
    pub async fn login(&self, username: &str, password: &str, persistent: bool) -> ApiResult<()> {
        let url = self.client.url("/auth/login");
        let resp = self
            .client
            .http()
            .post(&url)
            .form(&[("username", username), ("password", password)])
            .send()
            .await
            .map_err(|e| ApiError::Network(e.to_string()))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            // A 401 here is bad credentials, not a lost session.
            if status == reqwest::StatusCode::UNAUTHORIZED {
                return Err(ApiError::Validation(
                    "Incorrect username or password".to_string(),
                ));
            }
            return Err(classify_error(status, &body));
        }

        let tokens: LoginResponse = resp
            .json()
            .await
            .map_err(|e| ApiError::Unknown(format!("bad login response: {e}")))?;

        self.client
            .token_store()
            .put(&tokens.access_token, &tokens.refresh_token, persistent)
            .map_err(|e| ApiError::Unknown(format!("failed to store tokens: {e}")))?;

        info!(username = %username, persistent, "Logged in");
        Ok(())
    }

    /// Drop the session locally. No server call — refresh tokens are
    /// invalidated by rotation on the server side.
    pub fn logout(&self) {
        self.client.token_store().clear();
        info!("Logged out");
    }

    /// Profile of the authenticated user.
    pub async fn current_user(&self) -> ApiResult<UserProfile> {
        self.client.get("/users/me").await
    }
}
