use reqwest::StatusCode;
use thiserror::Error;

/// SDK error types
#[derive(Debug, Error)]
pub enum CatalystError {
    /// Missing or invalid configuration (credentials, base URL, bounds)
    #[error("Configuration error: {0}")]
    Config(String),

    /// Caller passed a value the operation cannot handle
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Token missing, or still rejected after one refresh
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// Project, dataset or file does not exist
    #[error("Not found: {0}")]
    NotFound(String),

    /// Platform answered with an unexpected status
    #[error("Upstream error ({status}): {message}")]
    Upstream { status: StatusCode, message: String },

    /// Transport-level failure (connect, TLS, body read)
    #[error("HTTP request error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// An operation exceeded its deadline
    #[error("Timed out after {0} seconds")]
    Timeout(u64),
}

pub type Result<T, E = CatalystError> = std::result::Result<T, E>;

impl CatalystError {
    /// Short machine-readable name, used as a structured log field
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Config(_) => "config_error",
            Self::InvalidArgument(_) => "invalid_argument",
            Self::Unauthorized(_) => "unauthorized",
            Self::NotFound(_) => "not_found",
            Self::Upstream { .. } => "upstream_error",
            Self::Http(_) => "http_request_error",
            Self::Io(_) => "io_error",
            Self::Json(_) => "json_error",
            Self::Timeout(_) => "timeout",
        }
    }

    /// HTTP status attached to the error, if any
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            Self::Upstream { status, .. } => Some(*status),
            Self::Http(e) => e.status(),
            _ => None,
        }
    }
}

impl From<config::ConfigError> for CatalystError {
    fn from(err: config::ConfigError) -> Self {
        Self::Config(err.to_string())
    }
}
