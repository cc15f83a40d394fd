//! Client configuration.
//!
//! Loaded from a RON file (`~/.config/gridmesh/client.ron` unless a path is
//! given). A missing file means defaults. `GRIDMESH_SERVER_URL` and
//! `GRIDMESH_PAYLOAD_URL` override the file.
//!
//! ```ron
//! (
//!     server_url: "wss://collab.example.org",
//!     payload_url: Some("https://docs.example.org/api/export"),
//!     max_backoff_secs: 30,
//! )
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use gridmesh_crdt::{LoadOptions, MIN_COLS, MIN_ROWS};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use url::Url;

use crate::backoff::Backoff;
use crate::constants::{
    DEFAULT_SERVER_URL, ENV_PAYLOAD_URL, ENV_SERVER_URL, INITIAL_BACKOFF, MAX_BACKOFF,
    PRESENCE_TIMEOUT,
};

/// Errors that can occur when loading configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("RON parse error: {0}")]
    Ron(#[from] ron::error::SpannedError),
    #[error("invalid {field}: {message}")]
    InvalidUrl { field: &'static str, message: String },
}

/// Session coordinator settings.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Collaboration endpoint (`ws://` or `wss://`). The room id is appended
    /// as the last path segment.
    pub server_url: String,
    /// Base URL of the tabular export endpoint. `None` disables the initial
    /// fetch; first openers then start from one empty sheet.
    pub payload_url: Option<String>,
    pub max_backoff_secs: u64,
    pub initial_backoff_millis: u64,
    pub presence_timeout_secs: u64,
    pub min_rows: usize,
    pub min_cols: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            server_url: DEFAULT_SERVER_URL.to_string(),
            payload_url: None,
            max_backoff_secs: MAX_BACKOFF.as_secs(),
            initial_backoff_millis: INITIAL_BACKOFF.as_millis() as u64,
            presence_timeout_secs: PRESENCE_TIMEOUT.as_secs(),
            min_rows: MIN_ROWS,
            min_cols: MIN_COLS,
        }
    }
}

impl ClientConfig {
    /// `~/.config/gridmesh/client.ron` (platform equivalent).
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join("gridmesh").join("client.ron"))
    }

    /// Load from `path` (or the default path), then apply environment
    /// overrides and validate.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let path = path.map(Path::to_path_buf).or_else(Self::default_path);
        let mut config = match path {
            Some(path) if path.exists() => {
                info!("Loading client config from {:?}", path);
                let text = std::fs::read_to_string(&path)
                    .map_err(|source| ConfigError::Io { path: path.clone(), source })?;
                Self::from_ron(&text)?
            }
            Some(path) => {
                debug!("No config at {:?}, using defaults", path);
                Self::default()
            }
            None => Self::default(),
        };
        config.apply_env_overrides(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    /// Parse RON text. Omitted fields take their defaults.
    pub fn from_ron(text: &str) -> Result<Self, ConfigError> {
        Ok(ron::from_str(text)?)
    }

    /// Apply `GRIDMESH_*` overrides using `lookup` for variable access.
    pub fn apply_env_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(url) = lookup(ENV_SERVER_URL).filter(|v| !v.is_empty()) {
            debug!("{} overrides server_url", ENV_SERVER_URL);
            self.server_url = url;
        }
        if let Some(url) = lookup(ENV_PAYLOAD_URL).filter(|v| !v.is_empty()) {
            debug!("{} overrides payload_url", ENV_PAYLOAD_URL);
            self.payload_url = Some(url);
        }
    }

    /// Check that both URLs parse and the server URL is a WebSocket URL.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let server = self.server_url()?;
        if !matches!(server.scheme(), "ws" | "wss") {
            return Err(ConfigError::InvalidUrl {
                field: "server_url",
                message: format!("expected ws:// or wss://, got {}://", server.scheme()),
            });
        }
        self.payload_url()?;
        Ok(())
    }

    pub fn server_url(&self) -> Result<Url, ConfigError> {
        Url::parse(&self.server_url).map_err(|e| ConfigError::InvalidUrl {
            field: "server_url",
            message: e.to_string(),
        })
    }

    pub fn payload_url(&self) -> Result<Option<Url>, ConfigError> {
        self.payload_url
            .as_deref()
            .map(|url| {
                Url::parse(url).map_err(|e| ConfigError::InvalidUrl {
                    field: "payload_url",
                    message: e.to_string(),
                })
            })
            .transpose()
    }

    pub fn backoff(&self) -> Backoff {
        Backoff::new(
            Duration::from_millis(self.initial_backoff_millis),
            Duration::from_secs(self.max_backoff_secs),
        )
    }

    pub fn presence_timeout(&self) -> Duration {
        Duration::from_secs(self.presence_timeout_secs)
    }

    /// Converter options for first-opener population.
    pub fn load_options(&self) -> LoadOptions {
        LoadOptions {
            min_rows: self.min_rows,
            min_cols: self.min_cols,
            ..LoadOptions::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_defaults() {
        let config = ClientConfig::default();
        assert_eq!(config.max_backoff_secs, 30);
        assert_eq!(config.initial_backoff_millis, 1000);
        assert_eq!(config.presence_timeout(), Duration::from_secs(30));
        assert_eq!((config.min_rows, config.min_cols), (20, 20));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_ron_keeps_defaults() {
        let config = ClientConfig::from_ron(r#"(server_url: "wss://collab.example.org", max_backoff_secs: 5)"#)
            .unwrap();
        assert_eq!(config.server_url, "wss://collab.example.org");
        assert_eq!(config.max_backoff_secs, 5);
        assert_eq!(config.initial_backoff_millis, 1000);
        assert_eq!(config.payload_url, None);
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("client.ron");
        std::fs::write(
            &path,
            r#"(server_url: "ws://127.0.0.1:9000", payload_url: Some("http://127.0.0.1:8000/export"), min_rows: 5)"#,
        )
        .unwrap();

        let config = ClientConfig::load(Some(&path)).unwrap();
        assert_eq!(config.min_rows, 5);
        assert_eq!(config.load_options().min_rows, 5);
        assert!(!config.load_options().replace_existing);
    }

    #[test]
    fn test_missing_file_is_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = ClientConfig::load(Some(&dir.path().join("absent.ron"))).unwrap();
        assert_eq!(config.max_backoff_secs, ClientConfig::default().max_backoff_secs);
    }

    #[test]
    fn test_bad_ron_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("client.ron");
        std::fs::write(&path, "(server_url: ").unwrap();
        assert!(matches!(ClientConfig::load(Some(&path)), Err(ConfigError::Ron(_))));
    }

    #[test]
    fn test_env_overrides() {
        let env = HashMap::from([
            (ENV_SERVER_URL, "wss://override.example.org".to_string()),
            (ENV_PAYLOAD_URL, String::new()),
        ]);
        let mut config = ClientConfig::default();
        config.apply_env_overrides(|key| env.get(key).cloned());
        assert_eq!(config.server_url, "wss://override.example.org");
        assert_eq!(config.payload_url, None);
    }

    #[test]
    fn test_validate_rejects_http_server() {
        let config = ClientConfig {
            server_url: "http://example.org".into(),
            ..ClientConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidUrl { field: "server_url", .. })
        ));

        let config = ClientConfig {
            payload_url: Some("not a url".into()),
            ..ClientConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidUrl { field: "payload_url", .. })
        ));
    }
}
