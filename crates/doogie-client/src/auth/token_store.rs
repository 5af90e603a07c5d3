use std::path::PathBuf;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum TokenStoreError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type TokenStoreResult<T> = Result<T, TokenStoreError>;

/// Lifetime selected at login for the stored token pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenLifetime {
    /// Survives process restart (config-dir JSON file).
    Persistent,
    /// Process memory only.
    Session,
}

/// Access + refresh token pair, rotated atomically on refresh.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenPair {
    pub access: String,
    pub refresh: String,
}

#[derive(Debug, Default)]
struct Inner {
    lifetime: Option<TokenLifetime>,
    pair: Option<TokenPair>,
}

/// Owns the token pair under one of two lifetimes. The HTTP client is the
/// only writer after login; everything else reads. Expiry is not enforced
/// here — the client checks it on use.
pub struct TokenStore {
    path: PathBuf,
    inner: Mutex<Inner>,
}

impl TokenStore {
    /// Open a store backed by the given file for the persistent lifetime.
    /// An existing file is loaded so a persistent session survives restart.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let inner = match std::fs::read_to_string(&path) {
            Ok(contents) => match serde_json::from_str::<TokenPair>(&contents) {
                Ok(pair) => Inner {
                    lifetime: Some(TokenLifetime::Persistent),
                    pair: Some(pair),
                },
                Err(e) => {
                    debug!(error = %e, path = %path.display(), "Ignoring unreadable token file");
                    Inner::default()
                }
            },
            Err(_) => Inner::default(),
        };
        Self {
            path,
            inner: Mutex::new(inner),
        }
    }

    /// Default persistent backing file under the user's config directory.
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|d| d.join("doogie").join("tokens.json"))
    }

    /// Write both tokens and record the lifetime. The previous pair (under
    /// either lifetime) is discarded.
    pub fn put(&self, access: &str, refresh: &str, persistent: bool) -> TokenStoreResult<()> {
        let pair = TokenPair {
            access: access.to_string(),
            refresh: refresh.to_string(),
        };
        let lifetime = if persistent {
            TokenLifetime::Persistent
        } else {
            TokenLifetime::Session
        };

        if persistent {
            self.write_file(&pair)?;
        } else {
            self.remove_file();
        }

        let mut inner = self.inner.lock();
        inner.lifetime = Some(lifetime);
        inner.pair = Some(pair);
        Ok(())
    }

    /// Replace both tokens atomically, keeping the active lifetime. Used for
    /// refresh rotation; falls back to the session lifetime when no lifetime
    /// was recorded.
    pub fn rotate(&self, access: &str, refresh: &str) -> TokenStoreResult<()> {
        let persistent = {
            let inner = self.inner.lock();
            inner.lifetime == Some(TokenLifetime::Persistent)
        };
        self.put(access, refresh, persistent)
    }

    pub fn access(&self) -> Option<String> {
        let inner = self.inner.lock();
        inner.pair.as_ref().map(|p| p.access.clone())
    }

    pub fn refresh(&self) -> Option<String> {
        let inner = self.inner.lock();
        inner.pair.as_ref().map(|p| p.refresh.clone())
    }

    pub fn lifetime(&self) -> Option<TokenLifetime> {
        self.inner.lock().lifetime
    }

    /// Remove both tokens and the lifetime flag from both backing stores.
    pub fn clear(&self) {
        let mut inner = self.inner.lock();
        inner.lifetime = None;
        inner.pair = None;
        drop(inner);
        self.remove_file();
    }

    fn write_file(&self, pair: &TokenPair) -> TokenStoreResult<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(pair)?;
        std::fs::write(&self.path, json)?;
        Ok(())
    }

    fn remove_file(&self) {
        match std::fs::remove_file(&self.path) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => debug!(error = %e, path = %self.path.display(), "Failed to remove token file"),
        }
    }

    #[cfg(test)]
    pub(crate) fn file_path(&self) -> &std::path::Path {
        &self.path
    }
}
