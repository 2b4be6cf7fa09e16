//! Client and pipeline configuration.
//!
//! Configuration is read from a TOML file with two tables:
//!
//! ```toml
//! [client]
//! base_url = "https://example.getbynder.com"
//! permanent_token = "..."
//!
//! [upload]
//! backend = "staged"
//! max_concurrent_chunks = 4
//!
//! [upload.poll]
//! interval_ms = 2000
//! max_attempts = 60
//! ```
//!
//! Every `[upload]` field has a default, so the table may be omitted.
//!
//! # Environment Variables
//!
//! | Variable | Required | Description |
//! |---|---|---|
//! | `DAM_BASE_URL` | Yes | Base URL of the asset service |
//! | `DAM_PERMANENT_TOKEN` | Yes | Permanent bearer token |
//! | `DAM_BACKEND` | No | `direct` or `staged` |

use std::path::{Path, PathBuf};
use std::time::Duration;

use dam_upload_models::{MAX_CHUNK_SIZE, UploadIntent};
use serde::Deserialize;

use crate::backend::BackendKind;

/// Errors that can occur while loading configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Missing required environment variable.
    #[error("Missing environment variable: {name}")]
    MissingEnv {
        /// Name of the missing environment variable.
        name: String,
    },

    /// Config file could not be read.
    #[error("Failed to read config {}: {source}", path.display())]
    Read {
        /// Path of the config file.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// Config file is not valid TOML or does not match the schema.
    #[error("Invalid config TOML: {0}")]
    Toml(#[from] toml::de::Error),

    /// A value is out of range or inconsistent.
    #[error("Invalid config: {message}")]
    Invalid {
        /// Description of what is wrong.
        message: String,
    },
}

/// Full configuration: how to reach the service and how to upload.
#[derive(Debug, Clone, Deserialize)]
pub struct DamConfig {
    pub client: ClientConfig,
    #[serde(default)]
    pub upload: UploadConfig,
}

/// Connection settings for the asset service.
#[derive(Debug, Clone, Deserialize)]
pub struct ClientConfig {
    /// Base URL every route is resolved against.
    pub base_url: String,
    /// Non-expiring bearer token. Takes precedence over `oauth`.
    #[serde(default)]
    pub permanent_token: Option<String>,
    /// OAuth2 refresh-token credentials.
    #[serde(default)]
    pub oauth: Option<OAuthConfig>,
    /// Per-request timeout.
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

impl ClientConfig {
    #[must_use]
    pub const fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

/// OAuth2 client credentials plus the current token pair.
#[derive(Debug, Clone, Deserialize)]
pub struct OAuthConfig {
    pub client_id: String,
    pub client_secret: String,
    pub refresh_token: String,
    /// Current access token, if one is already known.
    #[serde(default)]
    pub access_token: Option<String>,
    /// Expiry of `access_token`. Missing means refresh before first use.
    #[serde(default)]
    pub expires_at: Option<chrono::DateTime<chrono::Utc>>,
}

/// Pipeline settings.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct UploadConfig {
    /// Transport strategy, chosen once per upload.
    #[serde(default)]
    pub backend: BackendKind,
    /// Maximum bytes per chunk.
    #[serde(default = "default_chunk_size_bytes")]
    pub chunk_size_bytes: usize,
    /// Chunks in flight at once.
    #[serde(default = "default_max_concurrent_chunks")]
    pub max_concurrent_chunks: usize,
    /// Intent sent when finalizing direct uploads.
    #[serde(default)]
    pub intent: UploadIntent,
    #[serde(default)]
    pub poll: PollConfig,
    /// Wait for conversion before saving direct uploads.
    #[serde(default)]
    pub poll_direct_uploads: bool,
    /// Wait for conversion before saving staged uploads.
    #[serde(default = "default_true")]
    pub poll_staged_uploads: bool,
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            backend: BackendKind::default(),
            chunk_size_bytes: default_chunk_size_bytes(),
            max_concurrent_chunks: default_max_concurrent_chunks(),
            intent: UploadIntent::default(),
            poll: PollConfig::default(),
            poll_direct_uploads: false,
            poll_staged_uploads: default_true(),
        }
    }
}

impl UploadConfig {
    /// Whether conversion polling runs before attach for `kind`.
    #[must_use]
    pub const fn polls(&self, kind: BackendKind) -> bool {
        match kind {
            BackendKind::Direct => self.poll_direct_uploads,
            BackendKind::Staged => self.poll_staged_uploads,
        }
    }

    /// Checks value ranges.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] naming the first bad field.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.chunk_size_bytes == 0 || self.chunk_size_bytes > MAX_CHUNK_SIZE {
            return Err(invalid(format!(
                "chunk_size_bytes must be between 1 and {MAX_CHUNK_SIZE}"
            )));
        }
        if self.max_concurrent_chunks == 0 {
            return Err(invalid("max_concurrent_chunks must be at least 1"));
        }
        if self.poll.max_attempts == 0 {
            return Err(invalid("poll.max_attempts must be at least 1"));
        }
        Ok(())
    }
}

/// Conversion polling budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct PollConfig {
    /// Delay between consecutive polls.
    #[serde(default = "default_poll_interval_ms")]
    pub interval_ms: u64,
    /// Polls issued before giving up.
    #[serde(default = "default_poll_max_attempts")]
    pub max_attempts: u32,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            interval_ms: default_poll_interval_ms(),
            max_attempts: default_poll_max_attempts(),
        }
    }
}

impl PollConfig {
    #[must_use]
    pub const fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }
}

const fn default_true() -> bool {
    true
}

const fn default_chunk_size_bytes() -> usize {
    MAX_CHUNK_SIZE
}

const fn default_max_concurrent_chunks() -> usize {
    4
}

const fn default_poll_interval_ms() -> u64 {
    2000
}

const fn default_poll_max_attempts() -> u32 {
    60
}

const fn default_request_timeout_secs() -> u64 {
    60
}

impl DamConfig {
    /// Parses and validates a TOML document.
    ///
    /// # Errors
    ///
    /// * [`ConfigError::Toml`] if the document does not parse
    /// * [`ConfigError::Invalid`] if a value is out of range
    pub fn from_toml_str(s: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    /// Reads, parses and validates the TOML file at `path`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Read`] if the file cannot be read, otherwise
    /// as [`Self::from_toml_str`].
    pub fn from_path(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&contents)
    }

    /// Builds a configuration from `DAM_*` environment variables with
    /// default upload settings.
    ///
    /// # Errors
    ///
    /// * [`ConfigError::MissingEnv`] if a required variable is unset
    /// * [`ConfigError::Invalid`] if `DAM_BACKEND` is not a known backend
    pub fn from_env() -> Result<Self, ConfigError> {
        let base_url = require_env("DAM_BASE_URL")?;
        let permanent_token = require_env("DAM_PERMANENT_TOKEN")?;

        let mut upload = UploadConfig::default();
        if let Ok(backend) = std::env::var("DAM_BACKEND") {
            upload.backend = backend
                .parse()
                .map_err(|_| invalid(format!("unknown DAM_BACKEND '{backend}'")))?;
        }

        let config = Self {
            client: ClientConfig {
                base_url,
                permanent_token: Some(permanent_token),
                oauth: None,
                request_timeout_secs: default_request_timeout_secs(),
            },
            upload,
        };
        config.validate()?;
        Ok(config)
    }

    /// Checks that the service is reachable in principle and the upload
    /// settings are in range.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] naming the first bad field.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.client.base_url.trim().is_empty() {
            return Err(invalid("client.base_url must not be empty"));
        }
        if self.client.permanent_token.is_none() && self.client.oauth.is_none() {
            return Err(invalid(
                "client needs either permanent_token or an [client.oauth] table",
            ));
        }
        self.upload.validate()
    }
}

fn invalid(message: impl Into<String>) -> ConfigError {
    ConfigError::Invalid {
        message: message.into(),
    }
}

/// Reads a required environment variable.
fn require_env(name: &str) -> Result<String, ConfigError> {
    std::env::var(name).map_err(|_| ConfigError::MissingEnv {
        name: name.to_string(),
    })
}
