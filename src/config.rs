use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::error::{CatalystError, Result};

pub const DEFAULT_BASE_URL: &str = "https://catalyst.raga.ai/api";

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CatalystConfig {
    /// Platform API root, e.g. `https://catalyst.raga.ai/api`
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Access key used to obtain a bearer token
    #[serde(default)]
    pub access_key: Option<String>,

    /// Secret key paired with `access_key`
    #[serde(default)]
    pub secret_key: Option<String>,

    /// Pre-issued bearer token; skips the initial token request when set
    #[serde(default)]
    pub token: Option<String>,

    /// Per-request timeout for platform API calls
    #[serde(default = "default_request_timeout_seconds")]
    pub request_timeout_seconds: u64,

    #[serde(default)]
    pub upload: UploadConfig,

    #[serde(default)]
    pub spool: SpoolConfig,
}

/// Upload worker tuning
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct UploadConfig {
    /// Bound on one presign + upload + confirm flush (default: 30)
    #[serde(default = "default_upload_timeout_seconds")]
    pub timeout_seconds: u64,

    /// Max URLs requested per presign call (default: 20)
    #[serde(default = "default_max_presigned_urls")]
    pub max_presigned_urls: usize,

    /// How long the worker waits on an empty queue before re-polling (default: 1000)
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Re-queue spool files left by earlier runs when the worker starts
    #[serde(default)]
    pub rescan_on_startup: bool,
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            timeout_seconds: default_upload_timeout_seconds(),
            max_presigned_urls: default_max_presigned_urls(),
            poll_interval_ms: default_poll_interval_ms(),
            rescan_on_startup: false,
        }
    }
}

impl UploadConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

/// Local spool layout
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SpoolConfig {
    /// Parent directory of the spool (default: OS temp dir)
    #[serde(default)]
    pub root: Option<PathBuf>,

    /// Directory name under `root` dedicated to trace files
    #[serde(default = "default_spool_namespace")]
    pub namespace: String,
}

impl Default for SpoolConfig {
    fn default() -> Self {
        Self {
            root: None,
            namespace: default_spool_namespace(),
        }
    }
}

impl SpoolConfig {
    /// Active spool directory, `<root>/<namespace>`
    pub fn directory(&self) -> PathBuf {
        self.root
            .clone()
            .unwrap_or_else(std::env::temp_dir)
            .join(&self.namespace)
    }
}

impl Default for CatalystConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            access_key: None,
            secret_key: None,
            token: None,
            request_timeout_seconds: default_request_timeout_seconds(),
            upload: UploadConfig::default(),
            spool: SpoolConfig::default(),
        }
    }
}

impl CatalystConfig {
    /// Config pointing at `base_url` with default tuning, handy for tests
    pub fn with_base_url(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            ..Self::default()
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_seconds)
    }

    /// True when a token is present or can be requested
    pub fn has_credentials(&self) -> bool {
        let has_token = self.token.as_deref().is_some_and(|t| !t.is_empty());
        let has_keys = self.access_key.as_deref().is_some_and(|k| !k.is_empty())
            && self.secret_key.as_deref().is_some_and(|k| !k.is_empty());
        has_token || has_keys
    }

    pub fn validate(&self) -> Result<()> {
        let parsed = url::Url::parse(&self.base_url)
            .map_err(|e| CatalystError::Config(format!("invalid base_url '{}': {}", self.base_url, e)))?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(CatalystError::Config(format!(
                "base_url must be http or https, got '{}'",
                parsed.scheme()
            )));
        }
        if self.request_timeout_seconds == 0 {
            return Err(CatalystError::Config("request_timeout_seconds must be >= 1".to_string()));
        }
        if self.upload.timeout_seconds == 0 {
            return Err(CatalystError::Config("upload.timeout_seconds must be >= 1".to_string()));
        }
        if self.upload.max_presigned_urls == 0 {
            return Err(CatalystError::Config("upload.max_presigned_urls must be >= 1".to_string()));
        }
        if self.spool.namespace.is_empty() || self.spool.namespace.contains(['/', '\\']) {
            return Err(CatalystError::Config(format!(
                "spool.namespace must be a plain directory name, got '{}'",
                self.spool.namespace
            )));
        }
        Ok(())
    }
}

fn default_base_url() -> String {
    DEFAULT_BASE_URL.to_string()
}

fn default_request_timeout_seconds() -> u64 {
    10
}

fn default_upload_timeout_seconds() -> u64 {
    30
}

fn default_max_presigned_urls() -> usize {
    20
}

fn default_poll_interval_ms() -> u64 {
    1000
}

fn default_spool_namespace() -> String {
    "catalyst_traces".to_string()
}

/// Load configuration from `catalyst.toml` (optional) and `CATALYST_*` env vars
///
/// Nested keys use a double underscore, e.g. `CATALYST_UPLOAD__TIMEOUT_SECONDS=60`.
pub fn load_config() -> Result<CatalystConfig> {
    load_config_from("catalyst")
}

/// Same as [`load_config`] with an explicit file stem or path
pub fn load_config_from(path: &str) -> Result<CatalystConfig> {
    let config = config::Config::builder()
        .add_source(config::File::with_name(path).required(false))
        .add_source(
            config::Environment::with_prefix("CATALYST")
                .prefix_separator("_")
                .separator("__"),
        )
        .build()?;

    let cfg: CatalystConfig = config.try_deserialize()?;
    cfg.validate()?;

    Ok(cfg)
}
