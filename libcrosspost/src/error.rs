//! Error types for Crosspost

use thiserror::Error;

use crate::types::TargetResult;

pub type Result<T> = std::result::Result<T, CrosspostError>;

/// Request-level failures
///
/// Only these ever escape [`Crosspost::post`](crate::orchestrator::Crosspost::post).
/// Failures inside a single target's pipeline are [`TargetError`]s and are
/// folded into that target's [`TargetResult`] instead.
#[derive(Error, Debug)]
pub enum CrosspostError {
    #[error("Invalid request: {0}")]
    Validation(String),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Target configuration error: {}", errors.join("; "))]
    TargetConfig { errors: Vec<String> },

    #[error("Authentication failed: {}", errors.join("; "))]
    Authentication { errors: Vec<String> },

    #[error("Image processing failed: {0}")]
    Transcode(#[from] TranscodeError),

    #[error("All posts failed")]
    AllTargetsFailed { results: Vec<TargetResult> },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl CrosspostError {
    /// Returns the appropriate exit code for this error
    pub fn exit_code(&self) -> i32 {
        match self {
            CrosspostError::Validation(_) => 3,
            CrosspostError::TargetConfig { .. } | CrosspostError::Authentication { .. } => 2,
            CrosspostError::Config(_)
            | CrosspostError::Transcode(_)
            | CrosspostError::AllTargetsFailed { .. }
            | CrosspostError::Io(_) => 1,
        }
    }

    /// HTTP status a caller should answer with for this error
    pub fn http_status(&self) -> u16 {
        match self {
            CrosspostError::Validation(_) => 400,
            CrosspostError::Authentication { .. } => 401,
            CrosspostError::TargetConfig { .. }
            | CrosspostError::Config(_)
            | CrosspostError::Transcode(_)
            | CrosspostError::AllTargetsFailed { .. }
            | CrosspostError::Io(_) => 500,
        }
    }
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),

    #[error("Failed to parse config: {0}")]
    ParseError(#[from] toml::de::Error),

    #[error("Missing required field: {0}")]
    MissingField(String),

    #[error("Invalid value for {field}: {reason}")]
    InvalidValue { field: String, reason: String },
}

/// Failures local to one target
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TargetError {
    #[error("{0} credentials not configured")]
    NotConfigured(String),

    #[error("Authentication failed: {0}")]
    Authentication(String),

    #[error("Not authenticated with {0}")]
    NotAuthenticated(String),

    #[error("Media upload failed: {0}")]
    Upload(String),

    #[error("Platform rejected the request: {0}")]
    Platform(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Rate limit exceeded: {0}")]
    RateLimit(String),

    #[error("timeout")]
    Timeout,
}

impl TargetError {
    /// Classify an HTTP status returned by a platform API
    ///
    /// `context` names the operation (e.g. "upload media") and ends up in
    /// the message.
    pub fn from_status(status: u16, context: &str, body: &str) -> Self {
        let detail = if body.is_empty() {
            format!("{} returned HTTP {}", context, status)
        } else {
            format!("{} returned HTTP {}: {}", context, status, body)
        };

        match status {
            401 | 403 => TargetError::Authentication(detail),
            429 => TargetError::RateLimit(detail),
            _ => TargetError::Platform(detail),
        }
    }

    /// Map a transport-level reqwest error
    pub fn from_reqwest(error: reqwest::Error, context: &str) -> Self {
        if error.is_timeout() {
            return TargetError::Timeout;
        }
        if let Some(status) = error.status() {
            return TargetError::from_status(status.as_u16(), context, "");
        }
        TargetError::Network(format!("{} failed: {}", context, error))
    }
}

#[derive(Error, Debug)]
pub enum TranscodeError {
    #[error("Failed to decode {path}: {reason}")]
    Decode { path: String, reason: String },

    #[error("Failed to encode {path}: {reason}")]
    Encode { path: String, reason: String },

    #[error("IO error on {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
}
