//! Configuration for the segment uploader.
//!
//! Loaded once at startup from optional config files and `UPLOADER__*`
//! environment variables, then passed by value into each component.

use config::{ConfigError, Environment, File};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Smallest part size S3 accepts for all but the last part of a multipart upload.
pub const MIN_PART_SIZE_BYTES: usize = 5 * 1024 * 1024;

/// Environment variable naming an explicit config file.
pub const CONFIG_PATH_ENV: &str = "CAMBACKUP_CONFIG";

/// Main configuration for the uploader service
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Service configuration
    #[serde(default)]
    pub service: ServiceConfig,
    /// Local segment storage
    pub storage: StorageConfig,
    /// Upload scheduling
    pub upload: UploadConfig,
    /// Remote object store
    pub s3: S3Config,
}

/// Service-level configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ServiceConfig {
    /// Service name for logging
    #[serde(default = "default_service_name")]
    pub name: String,
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Output format (json, pretty)
    #[serde(default = "default_log_format")]
    pub log_format: String,
    /// Prometheus exporter port, disabled when unset
    #[serde(default)]
    pub metrics_port: Option<u16>,
}

/// Where the recorder writes segments
#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    /// Root directory holding one subdirectory per camera
    pub local_path: PathBuf,
    /// File extension of recorded segments, without the dot
    #[serde(default = "default_segment_extension")]
    pub segment_extension: String,
}

/// Poll loop and cleanup behaviour
#[derive(Debug, Clone, Deserialize)]
pub struct UploadConfig {
    /// Seconds between poll cycles
    pub check_interval: u64,
    /// Remove local segments once the store has acknowledged them
    pub delete_after_upload: bool,
    /// Segments uploaded at once within a cycle
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
}

/// S3-compatible storage configuration
#[derive(Debug, Clone, Deserialize)]
pub struct S3Config {
    /// Bucket receiving segments
    pub bucket: String,
    /// Endpoint URL (R2, MinIO, AWS regional endpoint, ...)
    pub endpoint: String,
    pub access_key_id: String,
    pub secret_access_key: String,
    /// Signing region; R2 expects "auto"
    #[serde(default = "default_region")]
    pub region: String,
    /// Force path-style access (required for MinIO)
    #[serde(default = "default_true")]
    pub force_path_style: bool,
    /// Files larger than this go through multipart upload
    #[serde(default = "default_multipart_threshold")]
    pub multipart_threshold_bytes: u64,
    /// Part size for multipart uploads
    #[serde(default = "default_part_size")]
    pub part_size_bytes: usize,
}

// Default value functions
fn default_service_name() -> String {
    "cambackup-uploader".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "json".to_string()
}

fn default_segment_extension() -> String {
    "mp4".to_string()
}

fn default_concurrency() -> usize {
    1
}

fn default_region() -> String {
    "auto".to_string()
}

fn default_true() -> bool {
    true
}

fn default_multipart_threshold() -> u64 {
    100 * 1024 * 1024 // 100MB
}

fn default_part_size() -> usize {
    16 * 1024 * 1024 // 16MB
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            name: default_service_name(),
            log_level: default_log_level(),
            log_format: default_log_format(),
            metrics_port: None,
        }
    }
}

impl Config {
    /// Load configuration from config files and the environment.
    ///
    /// Sources, later overriding earlier:
    /// 1. `config/uploader.*` and `/etc/cambackup/uploader.*` (optional)
    /// 2. The file named by `CAMBACKUP_CONFIG` (required if the variable is set)
    /// 3. Environment variables, e.g. `UPLOADER__S3__BUCKET` -> s3.bucket
    pub fn load() -> Result<Self, ConfigError> {
        let mut builder = config::Config::builder()
            .add_source(File::with_name("config/uploader").required(false))
            .add_source(File::with_name("/etc/cambackup/uploader").required(false));

        if let Ok(path) = std::env::var(CONFIG_PATH_ENV) {
            builder = builder.add_source(File::from(PathBuf::from(path)).required(true));
        }

        builder
            .add_source(
                Environment::with_prefix("UPLOADER")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()
    }

    /// Load configuration from a single file, format chosen by extension.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        config::Config::builder()
            .add_source(File::from(path).required(true))
            .build()?
            .try_deserialize()
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigValidationError> {
        if self.storage.local_path.as_os_str().is_empty() {
            return Err(ConfigValidationError::MissingField(
                "storage.local_path".to_string(),
            ));
        }

        if self.storage.segment_extension.is_empty() {
            return Err(ConfigValidationError::MissingField(
                "storage.segment_extension".to_string(),
            ));
        }

        if self.upload.check_interval == 0 {
            return Err(ConfigValidationError::InvalidValue {
                field: "upload.check_interval".to_string(),
                message: "Interval must be greater than 0".to_string(),
            });
        }

        if self.upload.concurrency == 0 {
            return Err(ConfigValidationError::InvalidValue {
                field: "upload.concurrency".to_string(),
                message: "Concurrency must be at least 1".to_string(),
            });
        }

        for (field, value) in [
            ("s3.bucket", &self.s3.bucket),
            ("s3.endpoint", &self.s3.endpoint),
            ("s3.access_key_id", &self.s3.access_key_id),
            ("s3.secret_access_key", &self.s3.secret_access_key),
        ] {
            if value.is_empty() {
                return Err(ConfigValidationError::MissingField(field.to_string()));
            }
        }

        if !self.s3.endpoint.starts_with("http://") && !self.s3.endpoint.starts_with("https://") {
            return Err(ConfigValidationError::InvalidValue {
                field: "s3.endpoint".to_string(),
                message: "Endpoint must start with http:// or https://".to_string(),
            });
        }

        if self.s3.part_size_bytes < MIN_PART_SIZE_BYTES {
            return Err(ConfigValidationError::InvalidValue {
                field: "s3.part_size_bytes".to_string(),
                message: format!("Part size must be at least {} bytes", MIN_PART_SIZE_BYTES),
            });
        }

        Ok(())
    }
}

impl UploadConfig {
    /// Get the poll interval as Duration.
    pub fn check_interval(&self) -> Duration {
        Duration::from_secs(self.check_interval)
    }
}

/// Configuration validation errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigValidationError {
    #[error("Missing required field: {0}")]
    MissingField(String),

    #[error("Invalid value for {field}: {message}")]
    InvalidValue { field: String, message: String },
}
