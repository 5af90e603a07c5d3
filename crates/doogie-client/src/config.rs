use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::debug;

/// Client configuration, loaded from the user's config directory with an
/// environment override for the server URL.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Base URL of the Doogie server, without the API prefix.
    pub base_url: String,
    /// Whether login stores tokens persistently (survives restart) or for
    /// the session only.
    pub persist_tokens: bool,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8000".to_string(),
            persist_tokens: true,
        }
    }
}

impl ClientConfig {
    pub fn config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|d| d.join("doogie").join("config.json"))
    }

    /// Load from the default location, falling back to defaults, then apply
    /// the `DOOGIE_BASE_URL` environment override.
    pub fn load() -> Self {
        let config = match Self::config_path() {
            Some(path) => Self::load_from(&path),
            None => Self::default(),
        };
        config.with_base_url_override(std::env::var("DOOGIE_BASE_URL").ok())
    }

    pub fn load_from(path: &Path) -> Self {
        match std::fs::read_to_string(path) {
            Ok(contents) => match serde_json::from_str(&contents) {
                Ok(config) => config,
                Err(e) => {
                    debug!(error = %e, path = %path.display(), "Ignoring unreadable config file");
                    Self::default()
                }
            },
            Err(_) => Self::default(),
        }
    }

    fn with_base_url_override(mut self, url: Option<String>) -> Self {
        if let Some(url) = url {
            if !url.trim().is_empty() {
                self.base_url = url;
            }
        }
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = ClientConfig::load_from(&dir.path().join("nope.json"));
        assert_eq!(config, ClientConfig::default());
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, r#"{"base_url":"http://doogie:9000"}"#).unwrap();
        let config = ClientConfig::load_from(&path);
        assert_eq!(config.base_url, "http://doogie:9000");
        assert!(config.persist_tokens);
    }

    #[test]
    fn test_env_override_wins_over_file() {
        let config = ClientConfig {
            base_url: "http://from-file".to_string(),
            persist_tokens: true,
        };
        let overridden = config
            .clone()
            .with_base_url_override(Some("http://from-env".to_string()));
        assert_eq!(overridden.base_url, "http://from-env");

        let untouched = config.with_base_url_override(Some("  ".to_string()));
        assert_eq!(untouched.base_url, "http://from-file");
    }
}
