//! Catalog configuration.
//!
//! Settings come from, in increasing priority: [`Default`], a JSON file, and
//! `LAKECAT_*` environment variables.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::store::GitSignature;

pub const ENV_PATH: &str = "LAKECAT_PATH";
pub const ENV_CREATE_IF_MISSING: &str = "LAKECAT_CREATE_IF_MISSING";
/// Seconds; `0` disables the timeout.
pub const ENV_INFERENCE_TIMEOUT: &str = "LAKECAT_INFERENCE_TIMEOUT_SECS";
pub const ENV_AUTHOR_NAME: &str = "LAKECAT_AUTHOR_NAME";
pub const ENV_AUTHOR_EMAIL: &str = "LAKECAT_AUTHOR_EMAIL";
pub const ENV_LOG: &str = "LAKECAT_LOG";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("invalid value for {key}: '{value}'")]
    InvalidValue { key: &'static str, value: String },
}

/// Catalog configuration options.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CatalogConfig {
    /// Path to the catalog repository.
    pub path: PathBuf,
    /// Initialize the repository if it doesn't exist.
    pub create_if_missing: bool,
    /// Upper bound on one schema probe, in seconds. `None` waits forever.
    pub inference_timeout_secs: Option<u64>,
    /// Author of catalog commits.
    pub signature: GitSignature,
    /// `tracing` filter directive used when `RUST_LOG` is unset.
    pub log_filter: String,
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from(".lakecat"),
            create_if_missing: true,
            inference_timeout_secs: Some(30),
            signature: GitSignature::lakecat(),
            log_filter: "info".to_string(),
        }
    }
}

impl CatalogConfig {
    /// Create a new configuration with the given path.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            ..Default::default()
        }
    }

    /// Read a JSON config file. Missing keys keep their defaults.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Override settings from the process environment.
    pub fn apply_env(self) -> Result<Self, ConfigError> {
        self.apply_vars(|key| std::env::var(key).ok())
    }

    /// Override settings from `lookup`, keyed by the `ENV_*` names.
    pub fn apply_vars<F>(mut self, lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(path) = lookup(ENV_PATH) {
            self.path = PathBuf::from(path);
        }

        if let Some(value) = lookup(ENV_CREATE_IF_MISSING) {
            self.create_if_missing = match value.to_ascii_lowercase().as_str() {
                "1" | "true" | "yes" => true,
                "0" | "false" | "no" => false,
                _ => {
                    return Err(ConfigError::InvalidValue {
                        key: ENV_CREATE_IF_MISSING,
                        value,
                    })
                }
            };
        }

        if let Some(value) = lookup(ENV_INFERENCE_TIMEOUT) {
            let secs: u64 = value.trim().parse().map_err(|_| ConfigError::InvalidValue {
                key: ENV_INFERENCE_TIMEOUT,
                value: value.clone(),
            })?;
            self.inference_timeout_secs = (secs > 0).then_some(secs);
        }

        if let Some(name) = lookup(ENV_AUTHOR_NAME) {
            self.signature.name = name;
        }
        if let Some(email) = lookup(ENV_AUTHOR_EMAIL) {
            self.signature.email = email;
        }

        if let Some(filter) = lookup(ENV_LOG) {
            self.log_filter = filter;
        }

        Ok(self)
    }

    /// Set create_if_missing flag.
    pub fn create_if_missing(mut self, value: bool) -> Self {
        self.create_if_missing = value;
        self
    }

    /// Set the probe timeout. `None` disables it.
    pub fn inference_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.inference_timeout_secs = timeout.map(|t| t.as_secs().max(1));
        self
    }

    /// Set the commit author.
    pub fn signature(mut self, signature: GitSignature) -> Self {
        self.signature = signature;
        self
    }

    /// Set the default log filter.
    pub fn log_filter(mut self, filter: impl Into<String>) -> Self {
        self.log_filter = filter.into();
        self
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.inference_timeout_secs.map(Duration::from_secs)
    }
}
