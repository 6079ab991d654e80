//! Configuration for the partrelay upload server

use crate::types::DEFAULT_NAMESPACE_FIELD;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Address to listen on
    #[serde(default = "default_listen_addr")]
    pub listen_addr: SocketAddr,

    /// Destination bucket for every upload
    #[serde(default = "default_bucket")]
    pub bucket: String,

    /// Storage backend configuration
    #[serde(default)]
    pub backend: BackendConfig,

    /// Key root prepended to every object key (e.g. "main")
    #[serde(default)]
    pub key_root: Option<String>,

    /// Metadata field whose value becomes the key namespace
    #[serde(default = "default_namespace_field")]
    pub namespace_field: String,

    /// Maximum number of part uploads in flight per file
    #[serde(default = "default_max_concurrent_parts")]
    pub max_concurrent_parts: usize,

    /// Maximum size of a single uploaded file in bytes
    #[serde(default = "default_max_upload_size")]
    pub max_upload_size: u64,

    /// Log level filter string. Overridden by RUST_LOG.
    /// Default: "partrelay=debug,tower_http=debug"
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

/// Storage backend configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum BackendConfig {
    /// In-process transport for local development
    #[default]
    Memory,

    /// S3 backend for production use
    S3 {
        /// S3 endpoint URL (for MinIO, LocalStack, or custom S3-compatible services)
        /// If not specified, uses AWS default endpoint
        #[serde(default)]
        endpoint: Option<String>,

        /// AWS region
        #[serde(default = "default_region")]
        region: String,

        /// Use path-style URLs (required for MinIO, LocalStack)
        #[serde(default = "default_force_path_style")]
        force_path_style: bool,

        #[serde(default)]
        access_key_id: Option<String>,

        #[serde(default)]
        secret_access_key: Option<String>,
    },
}

impl BackendConfig {
    pub fn label(&self) -> &'static str {
        match self {
            BackendConfig::Memory => "memory",
            BackendConfig::S3 { .. } => "s3",
        }
    }
}

// Default value functions for serde
fn default_listen_addr() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 9000))
}

fn default_bucket() -> String {
    "uploads".to_string()
}

fn default_namespace_field() -> String {
    DEFAULT_NAMESPACE_FIELD.to_string()
}

fn default_max_concurrent_parts() -> usize {
    4
}

fn default_max_upload_size() -> u64 {
    5 * 1024 * 1024 * 1024 // 5 GiB
}

fn default_region() -> String {
    "us-east-1".to_string()
}

fn default_force_path_style() -> bool {
    true
}

fn default_log_level() -> String {
    "partrelay=debug,tower_http=debug".to_string()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
            bucket: default_bucket(),
            backend: BackendConfig::default(),
            key_root: None,
            namespace_field: default_namespace_field(),
            max_concurrent_parts: default_max_concurrent_parts(),
            max_upload_size: default_max_upload_size(),
            log_level: default_log_level(),
        }
    }
}

/// First non-empty value among the given environment variables
fn env_any(names: &[&str]) -> Option<String> {
    names
        .iter()
        .filter_map(|name| std::env::var(name).ok())
        .find(|v| !v.is_empty())
}

impl Config {
    /// Load configuration from a TOML file
    pub fn from_file(path: &str) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Io(e.to_string()))?;
        let config: Config =
            toml::from_str(&content).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from environment variables
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(addr) = std::env::var("PRELAY_LISTEN_ADDR") {
            if let Ok(parsed) = addr.parse() {
                config.listen_addr = parsed;
            }
        }

        if let Some(bucket) = env_any(&["PRELAY_BUCKET", "AWS_BUCKET_NAME"]) {
            config.bucket = bucket;
        }

        // S3 backend is selected by any endpoint/region/credential variable
        let region = env_any(&["PRELAY_S3_REGION", "AWS_ACCESS_REGION"]);
        let access_key_id = env_any(&["PRELAY_S3_ACCESS_KEY_ID", "AWS_ACCESS_KEY_ID"]);
        let endpoint = env_any(&["PRELAY_S3_ENDPOINT"]);
        if endpoint.is_some() || region.is_some() || access_key_id.is_some() {
            config.backend = BackendConfig::S3 {
                endpoint,
                region: region.unwrap_or_else(default_region),
                force_path_style: std::env::var("PRELAY_S3_PATH_STYLE")
                    .map(|v| v == "true" || v == "1")
                    .unwrap_or(true),
                access_key_id,
                secret_access_key: env_any(&[
                    "PRELAY_S3_SECRET_ACCESS_KEY",
                    "AWS_ACCESS_KEY_SECRET",
                    "AWS_SECRET_ACCESS_KEY",
                ]),
            };
        }

        if let Some(root) = env_any(&["PRELAY_KEY_ROOT"]) {
            config.key_root = Some(root);
        }

        if let Some(field) = env_any(&["PRELAY_NAMESPACE_FIELD"]) {
            config.namespace_field = field;
        }

        if let Ok(n) = std::env::var("PRELAY_MAX_CONCURRENT_PARTS") {
            if let Ok(parsed) = n.parse::<usize>() {
                config.max_concurrent_parts = parsed.max(1);
            }
        }

        if let Ok(size) = std::env::var("PRELAY_MAX_UPLOAD_SIZE") {
            if let Ok(parsed) = size.parse() {
                config.max_upload_size = parsed;
            }
        }

        if let Ok(level) = std::env::var("PRELAY_LOG_LEVEL") {
            config.log_level = level;
        }

        config
    }

    /// Load configuration from file if it exists, otherwise from environment
    pub fn load() -> Self {
        if let Ok(path) = std::env::var("PRELAY_CONFIG") {
            if let Ok(config) = Self::from_file(&path) {
                return config;
            }
        }

        for path in &["partrelay.toml", "/etc/partrelay/config.toml"] {
            if std::path::Path::new(path).exists() {
                if let Ok(config) = Self::from_file(path) {
                    return config;
                }
            }
        }

        Self::from_env()
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.bucket.is_empty() {
            return Err(ConfigError::Invalid("bucket must not be empty".to_string()));
        }
        if self.max_concurrent_parts == 0 {
            return Err(ConfigError::Invalid(
                "max_concurrent_parts must be at least 1".to_string(),
            ));
        }
        if self.namespace_field.is_empty() {
            return Err(ConfigError::Invalid(
                "namespace_field must not be empty".to_string(),
            ));
        }
        Ok(())
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(String),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}
