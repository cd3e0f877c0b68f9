//! Publishing targets
//!
//! A target is one external platform a post can be published to. Every
//! target implements the same [`Target`] contract so the orchestrator can
//! drive them without knowing which platform is behind each one.
//!
//! Targets are shared as `Arc<dyn Target>`: all methods take `&self` and
//! implementations keep their session state behind a lock, so the same
//! instance can serve concurrent requests.
//!
//! # Examples
//!
//! ```no_run
//! use libcrosspost::config::Config;
//! use libcrosspost::targets::TargetRegistry;
//! use libcrosspost::types::TargetName;
//!
//! # async fn example() -> libcrosspost::Result<()> {
//! let config = Config::load()?;
//! let registry = TargetRegistry::from_config(&config)?;
//!
//! for target in registry.resolve(&[TargetName::Bluesky])? {
//!     if target.validate_config() && !target.is_authenticated().await {
//!         if let Err(e) = target.authenticate().await {
//!             eprintln!("{}: {}", target.name(), e);
//!         }
//!     }
//! }
//! # Ok(())
//! # }
//! ```

use async_trait::async_trait;
use std::path::Path;
use std::sync::Arc;

use crate::config::Config;
use crate::error::{CrosspostError, Result, TargetError};
use crate::types::{ImageMimeType, MediaRef, PostReceipt, TargetName};

pub mod bluesky;
pub mod oauth;
pub mod twitter;

// Mock target is available for all builds (not just tests) to support integration tests
pub mod mock;

/// Default per-post attachment limit (Bluesky and Twitter both allow 4)
pub const DEFAULT_MAX_ATTACHMENTS: usize = 4;

/// Capability contract every publishing destination implements
#[async_trait]
pub trait Target: Send + Sync {
    /// Registry key of this target
    fn name(&self) -> TargetName;

    /// Check that the required credentials are present
    ///
    /// Pure: looks only at the configuration the target was built with,
    /// never touches the network.
    fn validate_config(&self) -> bool;

    /// Perform the platform handshake
    ///
    /// On success the target is authenticated. On any failure the target
    /// is left unauthenticated; a partially completed handshake never
    /// counts as a session.
    ///
    /// # Errors
    ///
    /// Returns `TargetError::Authentication` (or `Network` / `Timeout` for
    /// transport failures).
    async fn authenticate(&self) -> std::result::Result<(), TargetError>;

    /// Whether a usable session exists
    async fn is_authenticated(&self) -> bool;

    /// Maximum number of images a single post may carry
    fn max_attachments(&self) -> usize {
        DEFAULT_MAX_ATTACHMENTS
    }

    /// Upload one already-transcoded file
    ///
    /// # Errors
    ///
    /// Returns `TargetError::Upload` when the file cannot be read or the
    /// platform rejects it, `TargetError::NotAuthenticated` without a
    /// session.
    async fn upload_media(
        &self,
        path: &Path,
        mime_type: ImageMimeType,
    ) -> std::result::Result<MediaRef, TargetError>;

    /// Publish a post referencing previously uploaded media
    ///
    /// `alt_texts` is positionally aligned with `media`. Missing or empty
    /// entries let the target pick its own fallback.
    ///
    /// # Errors
    ///
    /// Returns `TargetError::NotAuthenticated` without a session and
    /// `TargetError::Platform` when the platform rejects the post.
    async fn create_post(
        &self,
        text: &str,
        media: &[MediaRef],
        alt_texts: &[String],
    ) -> std::result::Result<PostReceipt, TargetError>;
}

/// Ordered set of registered targets keyed by name
#[derive(Clone, Default)]
pub struct TargetRegistry {
    targets: Vec<Arc<dyn Target>>,
}

impl TargetRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build the registry with every built-in platform
    ///
    /// A platform without a config section is still registered, so asking
    /// for it reports missing credentials rather than an unknown target.
    pub fn from_config(config: &Config) -> Result<Self> {
        let bluesky = config.bluesky.clone().unwrap_or_default();
        let twitter = config.twitter.clone().unwrap_or_default();

        Ok(Self::new()
            .with(Arc::new(bluesky::BlueskyTarget::new(&bluesky)?))
            .with(Arc::new(twitter::TwitterTarget::new(&twitter)?)))
    }

    /// Add a target, replacing any target registered under the same name
    pub fn register(&mut self, target: Arc<dyn Target>) {
        let name = target.name();
        match self.targets.iter().position(|t| t.name() == name) {
            Some(index) => self.targets[index] = target,
            None => self.targets.push(target),
        }
    }

    pub fn with(mut self, target: Arc<dyn Target>) -> Self {
        self.register(target);
        self
    }

    pub fn get(&self, name: &TargetName) -> Option<Arc<dyn Target>> {
        self.targets.iter().find(|t| &t.name() == name).cloned()
    }

    pub fn names(&self) -> Vec<TargetName> {
        self.targets.iter().map(|t| t.name()).collect()
    }

    pub fn len(&self) -> usize {
        self.targets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }

    /// Look up requested targets, in request order
    ///
    /// An empty request selects every registered target. Duplicates are
    /// collapsed onto their first occurrence.
    ///
    /// # Errors
    ///
    /// Returns `CrosspostError::Validation` for unknown names or when the
    /// selection comes out empty.
    pub fn resolve(&self, requested: &[TargetName]) -> Result<Vec<Arc<dyn Target>>> {
        if requested.is_empty() {
            if self.targets.is_empty() {
                return Err(CrosspostError::Validation(
                    "No targets are registered".to_string(),
                ));
            }
            return Ok(self.targets.clone());
        }

        let mut selected: Vec<Arc<dyn Target>> = Vec::with_capacity(requested.len());
        let mut unknown = Vec::new();

        for name in requested {
            if selected.iter().any(|t| &t.name() == name) {
                continue;
            }
            match self.get(name) {
                Some(target) => selected.push(target),
                None => unknown.push(name.to_string()),
            }
        }

        if !unknown.is_empty() {
            return Err(CrosspostError::Validation(format!(
                "Unknown target(s): {}. Registered: {}",
                unknown.join(", "),
                self.names()
                    .iter()
                    .map(TargetName::to_string)
                    .collect::<Vec<_>>()
                    .join(", ")
            )));
        }

        Ok(selected)
    }
}

impl std::fmt::Debug for TargetRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TargetRegistry")
            .field("targets", &self.names())
            .finish()
    }
}

/// Human-readable platform name used in error messages
pub(crate) fn display_name(name: &TargetName) -> String {
    match name {
        TargetName::Bluesky => "Bluesky".to_string(),
        TargetName::Twitter => "Twitter".to_string(),
        TargetName::Other(other) => other.clone(),
    }
}

/// Turn a non-success HTTP response into a `TargetError`
pub(crate) async fn error_for_response(response: reqwest::Response, context: &str) -> TargetError {
    let status = response.status().as_u16();
    let body = response.text().await.unwrap_or_default();
    TargetError::from_status(status, context, body.trim())
}

#[cfg(test)]
mod tests {
    use super::mock::MockTarget;
    use super::*;

    fn names(targets: &[Arc<dyn Target>]) -> Vec<TargetName> {
        targets.iter().map(|t| t.name()).collect()
    }

    #[test]
    fn test_resolve_empty_request_selects_all_in_registration_order() {
        let registry = TargetRegistry::new()
            .with(Arc::new(MockTarget::success("bluesky")))
            .with(Arc::new(MockTarget::success("twitter")));

        let resolved = registry.resolve(&[]).unwrap();
        assert_eq!(names(&resolved), vec![TargetName::Bluesky, TargetName::Twitter]);
    }

    #[test]
    fn test_resolve_keeps_request_order() {
        let registry = TargetRegistry::new()
            .with(Arc::new(MockTarget::success("bluesky")))
            .with(Arc::new(MockTarget::success("twitter")));

        let resolved = registry
            .resolve(&[TargetName::Twitter, TargetName::Bluesky, TargetName::Twitter])
            .unwrap();
        assert_eq!(names(&resolved), vec![TargetName::Twitter, TargetName::Bluesky]);
    }

    #[test]
    fn test_resolve_rejects_unknown_targets() {
        let registry = TargetRegistry::new().with(Arc::new(MockTarget::success("bluesky")));

        let result = registry.resolve(&[TargetName::Other("mastodon".to_string())]);
        match result {
            Err(CrosspostError::Validation(msg)) => {
                assert!(msg.contains("mastodon"));
                assert!(msg.contains("bluesky"));
            }
            other => panic!("Expected validation error, got {:?}", other.map(|t| names(&t))),
        }
    }

    #[test]
    fn test_resolve_empty_registry() {
        let registry = TargetRegistry::new();
        assert!(matches!(
            registry.resolve(&[]),
            Err(CrosspostError::Validation(_))
        ));
    }

    #[test]
    fn test_register_replaces_same_name() {
        let mut registry = TargetRegistry::new();
        registry.register(Arc::new(MockTarget::success("bluesky")));
        registry.register(Arc::new(MockTarget::not_configured("bluesky")));

        assert_eq!(registry.len(), 1);
        let target = registry.get(&TargetName::Bluesky).unwrap();
        assert!(!target.validate_config());
    }

    #[test]
    fn test_from_config_registers_missing_sections_unconfigured() {
        let mut config = Config::default_config();
        config.twitter = None;

        let registry = TargetRegistry::from_config(&config).unwrap();
        assert_eq!(registry.names(), vec![TargetName::Bluesky, TargetName::Twitter]);
        assert!(!registry.get(&TargetName::Twitter).unwrap().validate_config());
    }
}
