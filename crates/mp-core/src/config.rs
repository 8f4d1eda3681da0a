//! Configuration types and loading
//!
//! Defaults are compiled in; [`AppConfig::from_env`] applies the `MP_*`
//! variables on top of them and [`AppConfig::load`] layers an optional
//! config file and `MP__*` overrides with the `config` crate.

use serde::{Deserialize, Serialize};
use std::path::Path;
use validator::Validate;

use crate::error::ValidationErrors;

/// 50 MiB, the per-station upload ceiling unless a station overrides it.
pub const DEFAULT_MAX_FILE_SIZE: u64 = 50 * 1024 * 1024;

/// How long a completed upload task stays visible.
pub const DEFAULT_COMPLETED_RETENTION_MS: u64 = 2_000;

/// Main application configuration
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct AppConfig {
    /// Portal REST API
    pub api: ApiConfig,

    /// Upload pipeline settings
    pub uploads: UploadConfig,

    /// Upload stations; empty means the built-in catalog
    pub stations: Vec<StationSettings>,
}

#[derive(Debug, Clone, Deserialize, Serialize, Validate)]
#[serde(default)]
pub struct ApiConfig {
    #[validate(url)]
    pub base_url: String,
    /// Path prefix in front of every resource path
    pub api_prefix: String,
    /// Bearer token, if the portal requires one
    pub token: Option<String>,
    #[validate(range(min = 1, max = 600))]
    pub timeout_seconds: u64,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8080".to_string(),
            api_prefix: "/api".to_string(),
            token: None,
            timeout_seconds: 60,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct UploadConfig {
    /// Default per-file ceiling in bytes
    pub max_file_size: u64,
    /// Milliseconds a completed task is kept on the task board
    pub completed_retention_ms: u64,
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            max_file_size: DEFAULT_MAX_FILE_SIZE,
            completed_retention_ms: DEFAULT_COMPLETED_RETENTION_MS,
        }
    }
}

/// One upload station as written in configuration.
#[derive(Debug, Clone, Deserialize, Serialize, Validate, PartialEq, Eq)]
pub struct StationSettings {
    /// Station category tag, e.g. `intake` or `nc_drill`
    #[validate(length(min = 1, max = 64))]
    pub category: String,
    /// Label of the required identifier field
    #[validate(length(min = 1, max = 64))]
    pub identifier_label: String,
    /// File categories offered by this station's picker (empty = all)
    #[serde(default)]
    pub file_categories: Vec<String>,
    /// Per-station size ceiling, falling back to `uploads.max_file_size`
    #[serde(default)]
    pub max_file_size: Option<u64>,
    /// Kind tag forced for every file uploaded at this station
    #[serde(default)]
    pub kind_override: Option<String>,
}

impl StationSettings {
    pub fn new(category: impl Into<String>, identifier_label: impl Into<String>) -> Self {
        Self {
            category: category.into(),
            identifier_label: identifier_label.into(),
            file_categories: Vec::new(),
            max_file_size: None,
            kind_override: None,
        }
    }
}

/// Configuration error
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid value for {key}: {message}")]
    InvalidValue { key: String, message: String },
    #[error("Config file error: {0}")]
    FileError(String),
    #[error("Invalid configuration: {0}")]
    Invalid(ValidationErrors),
}

impl From<config::ConfigError> for ConfigError {
    fn from(err: config::ConfigError) -> Self {
        ConfigError::FileError(err.to_string())
    }
}

impl AppConfig {
    /// Load configuration from `MP_*` environment variables over the defaults
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Ok(url) = std::env::var("MP_API_URL") {
            config.api.base_url = url;
        }
        if let Ok(prefix) = std::env::var("MP_API_PREFIX") {
            config.api.api_prefix = prefix;
        }
        if let Ok(token) = std::env::var("MP_API_TOKEN") {
            if !token.trim().is_empty() {
                config.api.token = Some(token);
            }
        }
        if let Ok(timeout) = std::env::var("MP_API_TIMEOUT_SECONDS") {
            config.api.timeout_seconds =
                parse_number("MP_API_TIMEOUT_SECONDS", &timeout)?;
        }
        if let Ok(size) = std::env::var("MP_UPLOAD_MAX_FILE_SIZE") {
            config.uploads.max_file_size = parse_number("MP_UPLOAD_MAX_FILE_SIZE", &size)?;
        }
        if let Ok(ms) = std::env::var("MP_UPLOAD_COMPLETED_RETENTION_MS") {
            config.uploads.completed_retention_ms =
                parse_number("MP_UPLOAD_COMPLETED_RETENTION_MS", &ms)?;
        }

        config.validate()?;
        Ok(config)
    }

    /// Defaults, then `path` (TOML/YAML/JSON by extension) if given, then
    /// `MP__SECTION__KEY` environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut builder =
            config::Config::builder().add_source(config::Config::try_from(&Self::default())?);

        if let Some(path) = path {
            tracing::debug!(path = %path.display(), "Loading configuration file");
            builder = builder.add_source(config::File::from(path).required(true));
        }

        let config: AppConfig = builder
            .add_source(
                config::Environment::with_prefix("MP")
                    .prefix_separator("__")
                    .separator("__"),
            )
            .build()?
            .try_deserialize()?;

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut errors = ValidationErrors::new();

        if let Err(e) = self.api.validate() {
            errors.merge(prefixed("api", e.into()));
        }
        if self.uploads.max_file_size == 0 {
            errors.add("uploads.max_file_size", "must be greater than zero");
        }
        for (index, station) in self.stations.iter().enumerate() {
            if let Err(e) = station.validate() {
                errors.merge(prefixed(&format!("stations[{}]", index), e.into()));
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::Invalid(errors))
        }
    }

    pub fn completed_retention(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.uploads.completed_retention_ms)
    }
}

fn parse_number(key: &str, value: &str) -> Result<u64, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::InvalidValue {
        key: key.to_string(),
        message: format!("expected an unsigned integer, got {:?}", value),
    })
}

fn prefixed(prefix: &str, errors: ValidationErrors) -> ValidationErrors {
    let mut out = ValidationErrors::new();
    for (field, messages) in errors.errors {
        for message in messages {
            out.add(format!("{}.{}", prefix, field), message);
        }
    }
    for message in errors.base_errors {
        out.add_base(message);
    }
    out
}
