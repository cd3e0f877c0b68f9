//! Configuration management for Crosspost
//!
//! Configuration is read from `$XDG_CONFIG_HOME/crosspost/config.toml`
//! (or the path in `CROSSPOST_CONFIG`). Platform credentials may also be
//! supplied through environment variables, which take precedence over the
//! file and create the platform section when the file lacks it.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{ConfigError, Result};
use crate::transcode::{TranscodeLimits, MAX_FILE_SIZE, MAX_IMAGE_DIMENSION};
use crate::types::TargetName;
use crate::upload::{UploadLimits, MAX_UPLOAD_FILES, MAX_UPLOAD_SIZE};

const DEFAULT_BLUESKY_SERVICE: &str = "https://bsky.social";
const DEFAULT_TWITTER_API_BASE: &str = "https://api.twitter.com";
const DEFAULT_TWITTER_UPLOAD_BASE: &str = "https://upload.twitter.com";
const DEFAULT_TIMEOUT_SECS: u64 = 60;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bluesky: Option<BlueskyConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub twitter: Option<TwitterConfig>,
    #[serde(default)]
    pub uploads: UploadsConfig,
    #[serde(default)]
    pub defaults: DefaultsConfig,
}

#[derive(Clone, Serialize, Deserialize)]
pub struct BlueskyConfig {
    /// PDS base URL
    #[serde(default = "default_bluesky_service")]
    pub service: String,
    /// Handle or email
    #[serde(default)]
    pub identifier: String,
    /// App password
    #[serde(default)]
    pub password: String,
}

#[derive(Clone, Serialize, Deserialize)]
pub struct TwitterConfig {
    #[serde(default)]
    pub consumer_key: String,
    #[serde(default)]
    pub consumer_secret: String,
    #[serde(default)]
    pub access_token: String,
    #[serde(default)]
    pub access_token_secret: String,
    #[serde(default = "default_twitter_api_base")]
    pub api_base: String,
    #[serde(default = "default_twitter_upload_base")]
    pub upload_base: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadsConfig {
    /// Where the CLI stages caller files; defaults to the user cache dir
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub staging_dir: Option<String>,
    #[serde(default = "default_max_upload_size")]
    pub max_upload_size: u64,
    #[serde(default = "default_max_file_size")]
    pub max_file_size: u64,
    #[serde(default = "default_max_image_dimension")]
    pub max_image_dimension: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DefaultsConfig {
    #[serde(default = "default_targets")]
    pub targets: Vec<String>,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_bluesky_service() -> String {
    DEFAULT_BLUESKY_SERVICE.to_string()
}

fn default_twitter_api_base() -> String {
    DEFAULT_TWITTER_API_BASE.to_string()
}

fn default_twitter_upload_base() -> String {
    DEFAULT_TWITTER_UPLOAD_BASE.to_string()
}

fn default_max_upload_size() -> u64 {
    MAX_UPLOAD_SIZE
}

fn default_max_file_size() -> u64 {
    MAX_FILE_SIZE
}

fn default_max_image_dimension() -> u32 {
    MAX_IMAGE_DIMENSION
}

fn default_targets() -> Vec<String> {
    vec!["bluesky".to_string(), "twitter".to_string()]
}

fn default_timeout_secs() -> u64 {
    DEFAULT_TIMEOUT_SECS
}

impl Default for BlueskyConfig {
    fn default() -> Self {
        Self {
            service: default_bluesky_service(),
            identifier: String::new(),
            password: String::new(),
        }
    }
}

impl Default for TwitterConfig {
    fn default() -> Self {
        Self {
            consumer_key: String::new(),
            consumer_secret: String::new(),
            access_token: String::new(),
            access_token_secret: String::new(),
            api_base: default_twitter_api_base(),
            upload_base: default_twitter_upload_base(),
        }
    }
}

impl Default for UploadsConfig {
    fn default() -> Self {
        Self {
            staging_dir: None,
            max_upload_size: default_max_upload_size(),
            max_file_size: default_max_file_size(),
            max_image_dimension: default_max_image_dimension(),
        }
    }
}

impl Default for DefaultsConfig {
    fn default() -> Self {
        Self {
            targets: default_targets(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

fn redact(secret: &str) -> &'static str {
    if secret.is_empty() {
        "<empty>"
    } else {
        "<redacted>"
    }
}

// Secrets never reach logs through `{:?}`
impl fmt::Debug for BlueskyConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BlueskyConfig")
            .field("service", &self.service)
            .field("identifier", &self.identifier)
            .field("password", &redact(&self.password))
            .finish()
    }
}

impl fmt::Debug for TwitterConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TwitterConfig")
            .field("consumer_key", &self.consumer_key)
            .field("consumer_secret", &redact(&self.consumer_secret))
            .field("access_token", &self.access_token)
            .field("access_token_secret", &redact(&self.access_token_secret))
            .field("api_base", &self.api_base)
            .field("upload_base", &self.upload_base)
            .finish()
    }
}

impl Config {
    /// Load configuration from the default location
    ///
    /// A missing file is not an error: the defaults are used and the
    /// environment fills in credentials.
    pub fn load() -> Result<Self> {
        let config_path = resolve_config_path()?;
        let mut config = if config_path.exists() {
            Self::load_from_path(&config_path)?
        } else {
            tracing::debug!(
                "No config file at {}, using defaults",
                config_path.display()
            );
            Self::default_config()
        };
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a specific path
    ///
    /// Environment overrides are not applied.
    pub fn load_from_path(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(ConfigError::ReadError)?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: Config = toml::from_str(content).map_err(ConfigError::ParseError)?;
        Ok(config)
    }

    /// Create a default configuration
    ///
    /// Both platform sections are present with empty credentials, so both
    /// targets are registered and report themselves unconfigured until
    /// credentials arrive.
    pub fn default_config() -> Self {
        Self {
            bluesky: Some(BlueskyConfig::default()),
            twitter: Some(TwitterConfig::default()),
            uploads: UploadsConfig::default(),
            defaults: DefaultsConfig::default(),
        }
    }

    /// Serialize to TOML (used by `xpost --init-config`)
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| {
            ConfigError::InvalidValue {
                field: "config".to_string(),
                reason: e.to_string(),
            }
            .into()
        })
    }

    /// Apply credential overrides from the process environment
    pub fn apply_env_overrides(&mut self) {
        self.apply_env_with(|key| std::env::var(key).ok());
    }

    /// Apply credential overrides from an arbitrary lookup
    ///
    /// Empty values are ignored. Any recognised variable creates the
    /// platform section if the file did not have one.
    pub fn apply_env_with<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let bluesky_env = [
            get("BLUESKY_SERVICE"),
            get("BLUESKY_IDENTIFIER"),
            get("BLUESKY_PASSWORD"),
        ];
        if bluesky_env.iter().any(Option::is_some) {
            let [service, identifier, password] = bluesky_env;
            let section = self.bluesky.get_or_insert_with(BlueskyConfig::default);
            if let Some(v) = service {
                section.service = v;
            }
            if let Some(v) = identifier {
                section.identifier = v;
            }
            if let Some(v) = password {
                section.password = v;
            }
        }

        let twitter_env = [
            get("TWITTER_API_KEY"),
            get("TWITTER_KEY_SECRET"),
            get("TWITTER_ACCESS_TOKEN"),
            get("TWITTER_ACCESS_TOKEN_SECRET"),
        ];
        if twitter_env.iter().any(Option::is_some) {
            let [key, key_secret, token, token_secret] = twitter_env;
            let section = self.twitter.get_or_insert_with(TwitterConfig::default);
            if let Some(v) = key {
                section.consumer_key = v;
            }
            if let Some(v) = key_secret {
                section.consumer_secret = v;
            }
            if let Some(v) = token {
                section.access_token = v;
            }
            if let Some(v) = token_secret {
                section.access_token_secret = v;
            }
        }
    }

    /// Check values that would otherwise fail deep inside a request
    pub fn validate(&self) -> Result<()> {
        if self.uploads.max_file_size == 0 {
            return Err(invalid("uploads.max_file_size", "must be greater than zero"));
        }
        if self.uploads.max_image_dimension == 0 {
            return Err(invalid(
                "uploads.max_image_dimension",
                "must be greater than zero",
            ));
        }
        if self.uploads.max_upload_size == 0 {
            return Err(invalid("uploads.max_upload_size", "must be greater than zero"));
        }
        if self.defaults.timeout_secs == 0 {
            return Err(invalid("defaults.timeout_secs", "must be greater than zero"));
        }
        self.default_targets()?;
        Ok(())
    }

    /// Parsed `defaults.targets`
    pub fn default_targets(&self) -> Result<Vec<TargetName>> {
        let mut targets = Vec::with_capacity(self.defaults.targets.len());
        for raw in &self.defaults.targets {
            let name: TargetName = raw
                .parse()
                .map_err(|reason: String| invalid("defaults.targets", &reason))?;
            if !targets.contains(&name) {
                targets.push(name);
            }
        }
        Ok(targets)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.defaults.timeout_secs)
    }

    pub fn transcode_limits(&self) -> TranscodeLimits {
        TranscodeLimits {
            max_file_size: self.uploads.max_file_size,
            max_image_dimension: self.uploads.max_image_dimension,
        }
    }

    pub fn upload_limits(&self) -> UploadLimits {
        UploadLimits {
            max_file_size: self.uploads.max_upload_size,
            max_files: MAX_UPLOAD_FILES,
        }
    }

    /// Directory uploads are staged in, with `~` expanded
    pub fn staging_dir(&self) -> PathBuf {
        match &self.uploads.staging_dir {
            Some(dir) => PathBuf::from(shellexpand::tilde(dir).to_string()),
            None => dirs::cache_dir()
                .unwrap_or_else(std::env::temp_dir)
                .join("crosspost")
                .join("uploads"),
        }
    }
}

fn invalid(field: &str, reason: &str) -> crate::error::CrosspostError {
    ConfigError::InvalidValue {
        field: field.to_string(),
        reason: reason.to_string(),
    }
    .into()
}

/// Resolve the configuration file path (XDG layout, `CROSSPOST_CONFIG` wins)
pub fn resolve_config_path() -> Result<PathBuf> {
    if let Ok(path) = std::env::var("CROSSPOST_CONFIG") {
        return Ok(PathBuf::from(shellexpand::tilde(&path).to_string()));
    }

    let config_dir = dirs::config_dir()
        .ok_or_else(|| ConfigError::MissingField("config directory".to_string()))?;

    Ok(config_dir.join("crosspost").join("config.toml"))
}
