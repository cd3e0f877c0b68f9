//! Mock target implementation for testing
//!
//! This module provides a configurable mock target that can simulate
//! successes, failures at every stage of the pipeline, and delays. It is
//! used by integration tests to exercise the orchestrator without
//! credentials or network access.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::sleep;

use crate::error::TargetError;
use crate::targets::{Target, DEFAULT_MAX_ATTACHMENTS};
use crate::types::{ImageMimeType, MediaRef, PostReceipt, TargetName};

/// A post the mock accepted
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedPost {
    pub text: String,
    pub media_ids: Vec<String>,
    pub alt_texts: Vec<String>,
}

/// Configuration for mock target behavior
#[derive(Debug, Clone)]
pub struct MockConfig {
    /// Target name (e.g., "bluesky", "mock-a")
    pub name: String,

    /// Whether credentials count as present
    pub is_configured: bool,

    /// Start out with a session already established
    pub pre_authenticated: bool,

    /// Error to return from authenticate, if any
    pub auth_error: Option<String>,

    /// Error to return from upload_media, if any
    pub upload_error: Option<String>,

    /// Error to return from create_post, if any
    pub post_error: Option<TargetError>,

    /// Delay before completing each operation (simulates network latency)
    pub delay: Duration,

    /// Attachment limit reported to the orchestrator
    pub max_attachments: usize,

    /// Number of times authenticate has been called
    pub auth_call_count: Arc<Mutex<usize>>,

    /// Paths passed to upload_media, with whether they existed at the time
    pub uploads: Arc<Mutex<Vec<(PathBuf, bool)>>>,

    /// Posts that have been made (for verification)
    pub posts: Arc<Mutex<Vec<RecordedPost>>>,
}

impl Default for MockConfig {
    fn default() -> Self {
        Self {
            name: "mock".to_string(),
            is_configured: true,
            pre_authenticated: false,
            auth_error: None,
            upload_error: None,
            post_error: None,
            delay: Duration::from_millis(0),
            max_attachments: DEFAULT_MAX_ATTACHMENTS,
            auth_call_count: Arc::new(Mutex::new(0)),
            uploads: Arc::new(Mutex::new(Vec::new())),
            posts: Arc::new(Mutex::new(Vec::new())),
        }
    }
}

/// Mock target for testing
pub struct MockTarget {
    config: MockConfig,
    name: TargetName,
    authenticated: AtomicBool,
}

impl MockTarget {
    /// Create a new mock target with the given configuration
    ///
    /// # Panics
    ///
    /// Panics if `config.name` is not a valid target name.
    pub fn new(config: MockConfig) -> Self {
        let name = config
            .name
            .parse()
            .unwrap_or_else(|e| panic!("invalid mock target name: {}", e));
        Self {
            authenticated: AtomicBool::new(config.pre_authenticated),
            name,
            config,
        }
    }

    /// Create a mock target that always succeeds
    pub fn success(name: &str) -> Self {
        Self::new(MockConfig {
            name: name.to_string(),
            ..Default::default()
        })
    }

    /// Create a mock target that fails authentication
    pub fn auth_failure(name: &str, error: &str) -> Self {
        Self::new(MockConfig {
            name: name.to_string(),
            auth_error: Some(error.to_string()),
            ..Default::default()
        })
    }

    /// Create a mock target that fails media upload
    pub fn upload_failure(name: &str, error: &str) -> Self {
        Self::new(MockConfig {
            name: name.to_string(),
            upload_error: Some(error.to_string()),
            ..Default::default()
        })
    }

    /// Create a mock target that fails posting
    pub fn post_failure(name: &str, error: &str) -> Self {
        Self::new(MockConfig {
            name: name.to_string(),
            post_error: Some(TargetError::Platform(error.to_string())),
            ..Default::default()
        })
    }

    /// Create an already-authenticated mock whose session the platform
    /// rejects at posting time
    pub fn session_rejected(name: &str, error: &str) -> Self {
        Self::new(MockConfig {
            name: name.to_string(),
            pre_authenticated: true,
            post_error: Some(TargetError::Authentication(error.to_string())),
            ..Default::default()
        })
    }

    /// Create a mock target with a delay
    pub fn with_delay(name: &str, delay: Duration) -> Self {
        Self::new(MockConfig {
            name: name.to_string(),
            delay,
            ..Default::default()
        })
    }

    /// Create a mock target with a custom attachment limit
    pub fn with_max_attachments(name: &str, max_attachments: usize) -> Self {
        Self::new(MockConfig {
            name: name.to_string(),
            max_attachments,
            ..Default::default()
        })
    }

    /// Create a mock target that is not configured
    pub fn not_configured(name: &str) -> Self {
        Self::new(MockConfig {
            name: name.to_string(),
            is_configured: false,
            ..Default::default()
        })
    }

    /// Get the number of times authenticate was called
    pub fn auth_call_count(&self) -> usize {
        *self.config.auth_call_count.lock().unwrap()
    }

    /// Get the number of times upload_media was called
    pub fn upload_call_count(&self) -> usize {
        self.config.uploads.lock().unwrap().len()
    }

    /// Paths handed to upload_media and whether each existed at that moment
    pub fn uploads(&self) -> Vec<(PathBuf, bool)> {
        self.config.uploads.lock().unwrap().clone()
    }

    /// Get all posts that were accepted
    pub fn posts(&self) -> Vec<RecordedPost> {
        self.config.posts.lock().unwrap().clone()
    }

    async fn simulate_latency(&self) {
        if !self.config.delay.is_zero() {
            sleep(self.config.delay).await;
        }
    }

    fn require_session(&self) -> Result<(), TargetError> {
        if self.authenticated.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(TargetError::NotAuthenticated(self.name.to_string()))
        }
    }
}

#[async_trait]
impl Target for MockTarget {
    fn name(&self) -> TargetName {
        self.name.clone()
    }

    fn validate_config(&self) -> bool {
        self.config.is_configured
    }

    async fn authenticate(&self) -> Result<(), TargetError> {
        *self.config.auth_call_count.lock().unwrap() += 1;
        self.authenticated.store(false, Ordering::SeqCst);

        self.simulate_latency().await;

        match &self.config.auth_error {
            Some(error) => Err(TargetError::Authentication(error.clone())),
            None => {
                self.authenticated.store(true, Ordering::SeqCst);
                Ok(())
            }
        }
    }

    async fn is_authenticated(&self) -> bool {
        self.authenticated.load(Ordering::SeqCst)
    }

    fn max_attachments(&self) -> usize {
        self.config.max_attachments
    }

    async fn upload_media(
        &self,
        path: &Path,
        _mime_type: ImageMimeType,
    ) -> Result<MediaRef, TargetError> {
        self.require_session()?;

        self.config
            .uploads
            .lock()
            .unwrap()
            .push((path.to_path_buf(), path.exists()));

        self.simulate_latency().await;

        if let Some(error) = &self.config.upload_error {
            return Err(TargetError::Upload(error.clone()));
        }

        let id = format!("{}:media-{}", self.name, uuid::Uuid::new_v4());
        Ok(MediaRef {
            raw: serde_json::Value::String(id.clone()),
            id,
        })
    }

    async fn create_post(
        &self,
        text: &str,
        media: &[MediaRef],
        alt_texts: &[String],
    ) -> Result<PostReceipt, TargetError> {
        self.require_session()?;
        self.simulate_latency().await;

        if let Some(error) = &self.config.post_error {
            // A refused session is forgotten, like the real targets do
            if matches!(error, TargetError::Authentication(_)) {
                self.authenticated.store(false, Ordering::SeqCst);
            }
            return Err(error.clone());
        }

        self.config.posts.lock().unwrap().push(RecordedPost {
            text: text.to_string(),
            media_ids: media.iter().map(|m| m.id.clone()).collect(),
            alt_texts: alt_texts.to_vec(),
        });

        let post_id = format!("{}:mock-{}", self.name, uuid::Uuid::new_v4());
        Ok(PostReceipt {
            data: serde_json::json!({ "id": post_id, "mediaCount": media.len() }),
        })
    }
}
