//! geargate.toml configuration.

use std::net::SocketAddr;
use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Clone source used for new repositories until tokens carry one.
pub const DEFAULT_CLONE_SOURCE: &str = "ccoleman/githost";

/// Upper bound, inclusive, on a keys request body.
pub const DEFAULT_KEYS_BODY_LIMIT: usize = 100 * 1024;

/// Upper bound, inclusive, on a create-container request body.
pub const DEFAULT_CONTAINER_BODY_LIMIT: usize = 1024 * 1024;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    /// Address the HTTP API binds to.
    pub listen: SocketAddr,
    /// Honour `/token/__test__/...` with query-string tokens.
    pub allow_test_tokens: bool,
    /// HMAC key tokens must be signed with. Unsigned tokens are accepted
    /// when unset.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token_key: Option<String>,
    pub clone_source: String,
    pub keys_body_limit: usize,
    pub container_body_limit: usize,
    /// Include panic messages in 500 responses.
    pub expose_panics: bool,
    pub dispatcher: DispatcherConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatcherConfig {
    pub queue_depth: usize,
    pub workers: usize,
    /// How many completed request ids are remembered for deduplication.
    pub completed_capacity: usize,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            listen: SocketAddr::from(([0, 0, 0, 0], 43273)),
            allow_test_tokens: false,
            token_key: None,
            clone_source: DEFAULT_CLONE_SOURCE.to_string(),
            keys_body_limit: DEFAULT_KEYS_BODY_LIMIT,
            container_body_limit: DEFAULT_CONTAINER_BODY_LIMIT,
            expose_panics: false,
            dispatcher: DispatcherConfig::default(),
        }
    }
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            queue_depth: 256,
            workers: 8,
            completed_capacity: 4096,
        }
    }
}

impl GatewayConfig {
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: GatewayConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.dispatcher.workers == 0 {
            return Err(ConfigError::Invalid("dispatcher.workers must be at least 1".into()));
        }
        if self.dispatcher.queue_depth == 0 {
            return Err(ConfigError::Invalid(
                "dispatcher.queue_depth must be at least 1".into(),
            ));
        }
        if self.keys_body_limit == 0 || self.container_body_limit == 0 {
            return Err(ConfigError::Invalid("body limits must be at least 1 byte".into()));
        }
        if self.clone_source.is_empty() {
            return Err(ConfigError::Invalid("clone_source must not be empty".into()));
        }
        if matches!(&self.token_key, Some(key) if key.is_empty()) {
            return Err(ConfigError::Invalid("token_key must not be empty when set".into()));
        }
        Ok(())
    }

    /// The signing key as bytes, if configured.
    pub fn token_key_bytes(&self) -> Option<Vec<u8>> {
        self.token_key.as_ref().map(|k| k.as_bytes().to_vec())
    }
}
