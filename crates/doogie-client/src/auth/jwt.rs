//! Minimal JWT inspection. Tokens are opaque to the client except for the
//! `exp` claim, which drives proactive refresh.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use serde::Deserialize;

/// Refresh when the access token expires within this window.
pub const REFRESH_LEEWAY_SECS: i64 = 30;

#[derive(Debug, Deserialize)]
struct Claims {
    #[serde(default)]
    exp: Option<i64>,
}

/// Decode the `exp` claim (Unix seconds) from an unverified JWT.
/// Returns None for anything that does not look like a JWT.
pub fn expiry(token: &str) -> Option<i64> {
    let payload = token.split('.').nth(1)?;
    let bytes = URL_SAFE_NO_PAD
        .decode(payload.trim_end_matches('='))
        .ok()?;
    let claims: Claims = serde_json::from_slice(&bytes).ok()?;
    claims.exp
}

/// True when the token is expired or within the refresh leeway of expiry.
/// Tokens without a readable `exp` claim are used as-is; the server will
/// reject them with a 401 if they are actually invalid.
pub fn needs_refresh(token: &str, now_unix: i64) -> bool {
    match expiry(token) {
        Some(exp) => exp - now_unix <= REFRESH_LEEWAY_SECS,
        None => false,
    }
}

#[cfg(test)]
pub(crate) fn make_token(exp: i64) -> String {
    let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"HS256","typ":"JWT"}"#);
    let payload = URL_SAFE_NO_PAD.encode(format!(r#"{{"sub":"u1","exp":{exp}}}"#));
    format!("{header}.{payload}.sig")
}
