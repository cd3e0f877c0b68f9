//! Crosspost orchestration
//!
//! [`Crosspost::post`] runs one request through these stages:
//!
//! 1. Validate the text and resolve the requested targets.
//! 2. Configuration gate: every requested target must have credentials.
//! 3. Authentication gate: targets without a session authenticate
//!    concurrently, and all of them must succeed.
//! 4. Transcode every image once, shared by all targets.
//! 5. Fan out: each target uploads its share of the images and posts,
//!    independently of the others. Failures become [`TargetResult`]s.
//! 6. Remove every temporary file, whatever happened above.
//!
//! Stages 2 and 3 are all-or-nothing for the whole request while stage 5
//! isolates targets from each other.

use futures::future::{join_all, try_join_all};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::cleanup::CleanupGuard;
use crate::error::{CrosspostError, Result, TargetError};
use crate::events::{Event, EventBus};
use crate::targets::{display_name, Target, TargetRegistry};
use crate::transcode::{TranscodeLimits, Transcoder};
use crate::types::{
    AggregateResponse, MediaRef, PostReceipt, PostRequest, TargetResult, TranscodedFile,
};

/// Default bound on each target's authentication and on its whole
/// upload-and-post pipeline
pub const DEFAULT_TARGET_TIMEOUT: Duration = Duration::from_secs(60);

/// Runs crosspost requests against a registry of targets
///
/// Cheap to share: the registry holds `Arc`s and targets keep their own
/// sessions, so concurrent `post` calls on one instance are fine.
#[derive(Debug, Clone)]
pub struct Crosspost {
    registry: TargetRegistry,
    transcoder: Transcoder,
    timeout: Duration,
    events: Option<EventBus>,
}

impl Crosspost {
    pub fn new(registry: TargetRegistry) -> Self {
        Self {
            registry,
            transcoder: Transcoder::default(),
            timeout: DEFAULT_TARGET_TIMEOUT,
            events: None,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_limits(mut self, limits: TranscodeLimits) -> Self {
        self.transcoder = Transcoder::new(limits);
        self
    }

    pub fn with_events(mut self, events: EventBus) -> Self {
        self.events = Some(events);
        self
    }

    pub fn registry(&self) -> &TargetRegistry {
        &self.registry
    }

    fn emit(&self, event: Event) {
        if let Some(events) = &self.events {
            events.emit(event);
        }
    }

    /// Publish one request to its targets
    ///
    /// Every uploaded file and every file derived from it is gone by the
    /// time this returns, on every path. If the returned future is dropped
    /// early, the files are removed when it is.
    ///
    /// # Errors
    ///
    /// - `Validation`: empty text or unknown targets; nothing is read,
    ///   transcoded or sent
    /// - `TargetConfig`: at least one requested target lacks credentials
    /// - `Authentication`: at least one requested target failed to log in
    /// - `Transcode`: there were images and none of them could be processed
    /// - `AllTargetsFailed`: every target's pipeline failed
    pub async fn post(&self, request: PostRequest) -> Result<AggregateResponse> {
        let request_id = uuid::Uuid::new_v4().to_string();

        let mut cleanup = CleanupGuard::new();
        for image in &request.images {
            cleanup.register(&image.path);
        }

        let result = self.run(&request_id, &request, &mut cleanup).await;

        cleanup.finish().await;

        match &result {
            Ok(response) => {
                if !response.all_succeeded() {
                    warn!("Request {} partially failed", request_id);
                }
                info!(
                    "Request {} done: {}/{} targets succeeded",
                    request_id,
                    response.results.iter().filter(|r| r.success).count(),
                    response.results.len()
                );
                self.emit(Event::RequestCompleted {
                    request_id,
                    results: response.results.clone(),
                });
            }
            Err(e) => {
                warn!("Request {} failed: {}", request_id, e);
                self.emit(Event::RequestFailed {
                    request_id,
                    error: e.to_string(),
                });
            }
        }

        result
    }

    async fn run(
        &self,
        request_id: &str,
        request: &PostRequest,
        cleanup: &mut CleanupGuard,
    ) -> Result<AggregateResponse> {
        if request.text.trim().is_empty() {
            return Err(CrosspostError::Validation(
                "Text content is required".to_string(),
            ));
        }

        let targets = self.registry.resolve(&request.targets)?;

        info!(
            "Request {}: crossposting to {} with {} image(s)",
            request_id,
            targets
                .iter()
                .map(|t| t.name().to_string())
                .collect::<Vec<_>>()
                .join(", "),
            request.images.len()
        );
        self.emit(Event::RequestStarted {
            request_id: request_id.to_string(),
            targets: targets.iter().map(|t| t.name().to_string()).collect(),
            image_count: request.images.len(),
        });

        check_config(&targets)?;
        self.authenticate_all(&targets).await?;

        let transcoded = self.transcode_all(request, cleanup).await?;

        let results = join_all(
            targets
                .iter()
                .map(|target| self.publish(request_id, Arc::clone(target), &request.text, &transcoded)),
        )
        .await;

        if results.iter().all(|r| !r.success) {
            return Err(CrosspostError::AllTargetsFailed { results });
        }

        Ok(AggregateResponse {
            results,
            image_count: request.images.len(),
        })
    }

    /// Authenticate every target that has no session yet, concurrently
    async fn authenticate_all(&self, targets: &[Arc<dyn Target>]) -> Result<()> {
        let attempts = targets.iter().map(|target| async move {
            if target.is_authenticated().await {
                debug!("{} already authenticated", target.name());
                return Ok(());
            }
            match timeout(self.timeout, target.authenticate()).await {
                Ok(Ok(())) => Ok(()),
                Ok(Err(e)) => Err(format!("{}: {}", display_name(&target.name()), e)),
                Err(_) => Err(format!(
                    "{}: {}",
                    display_name(&target.name()),
                    TargetError::Timeout
                )),
            }
        });

        let errors: Vec<String> = join_all(attempts)
            .await
            .into_iter()
            .filter_map(|r| r.err())
            .collect();

        if errors.is_empty() {
            Ok(())
        } else {
            Err(CrosspostError::Authentication { errors })
        }
    }

    /// Transcode each image once, in request order
    ///
    /// Derived paths join the cleanup set before any of them is written.
    /// Images that fail are logged and dropped.
    async fn transcode_all(
        &self,
        request: &PostRequest,
        cleanup: &mut CleanupGuard,
    ) -> Result<Vec<TranscodedFile>> {
        if request.images.is_empty() {
            return Ok(Vec::new());
        }

        let derived: Vec<_> = request
            .images
            .iter()
            .map(|image| TranscodedFile::derived_path(&image.path))
            .collect();
        for path in &derived {
            cleanup.register(path);
        }

        let abandoned = cleanup.abandoned();
        let jobs = request.images.iter().zip(&derived).map(|(image, output)| {
            self.transcoder.transcode_async(
                image.path.clone(),
                output.clone(),
                image.mime_type,
                abandoned.clone(),
            )
        });
        let outcomes = join_all(jobs).await;

        let mut transcoded = Vec::with_capacity(outcomes.len());
        let mut first_error = None;

        for (index, outcome) in outcomes.into_iter().enumerate() {
            let image = &request.images[index];
            match outcome {
                Ok(outcome) => {
                    debug!(
                        "Transcoded {} to {}x{}, {} bytes",
                        image.path.display(),
                        outcome.width,
                        outcome.height,
                        outcome.size_bytes
                    );
                    transcoded.push(TranscodedFile {
                        path: derived[index].clone(),
                        mime_type: image.mime_type,
                        alt_text: request
                            .alt_texts
                            .get(index)
                            .filter(|alt| !alt.trim().is_empty())
                            .cloned(),
                    });
                }
                Err(e) => {
                    warn!("Skipping image {}: {}", image.path.display(), e);
                    if first_error.is_none() {
                        first_error = Some(e);
                    }
                }
            }
        }

        match first_error {
            Some(e) if transcoded.is_empty() => Err(CrosspostError::Transcode(e)),
            _ => Ok(transcoded),
        }
    }

    /// One target's pipeline, converted to a `TargetResult`
    async fn publish(
        &self,
        request_id: &str,
        target: Arc<dyn Target>,
        text: &str,
        files: &[TranscodedFile],
    ) -> TargetResult {
        let name = target.name();
        self.emit(Event::TargetStarted {
            request_id: request_id.to_string(),
            target: name.to_string(),
        });

        let limit = target.max_attachments();
        if files.len() > limit {
            debug!(
                "{} accepts {} image(s), dropping {}",
                name,
                limit,
                files.len() - limit
            );
        }
        let files = &files[..files.len().min(limit)];

        let outcome = match timeout(self.timeout, upload_and_post(target.as_ref(), text, files)).await {
            Ok(outcome) => outcome,
            Err(_) => Err(TargetError::Timeout),
        };

        match outcome {
            Ok(receipt) => {
                info!("Posted to {}", name);
                self.emit(Event::TargetCompleted {
                    request_id: request_id.to_string(),
                    target: name.to_string(),
                    data: receipt.data.clone(),
                });
                TargetResult::succeeded(name, receipt.data)
            }
            Err(e) => {
                warn!("Failed to post to {}: {}", name, e);
                self.emit(Event::TargetFailed {
                    request_id: request_id.to_string(),
                    target: name.to_string(),
                    error: e.to_string(),
                });
                TargetResult::failed(name, e.to_string())
            }
        }
    }
}

/// Every requested target must be configured, otherwise none is tried
fn check_config(targets: &[Arc<dyn Target>]) -> Result<()> {
    let errors: Vec<String> = targets
        .iter()
        .filter(|t| !t.validate_config())
        .map(|t| TargetError::NotConfigured(display_name(&t.name())).to_string())
        .collect();

    if errors.is_empty() {
        Ok(())
    } else {
        Err(CrosspostError::TargetConfig { errors })
    }
}

/// Upload concurrently, then post; the post waits for every upload
async fn upload_and_post(
    target: &dyn Target,
    text: &str,
    files: &[TranscodedFile],
) -> std::result::Result<PostReceipt, TargetError> {
    let media: Vec<MediaRef> = try_join_all(
        files
            .iter()
            .map(|file| target.upload_media(&file.path, file.mime_type)),
    )
    .await?;

    let alt_texts: Vec<String> = files
        .iter()
        .map(|file| file.alt_text.clone().unwrap_or_default())
        .collect();

    target.create_post(text, &media, &alt_texts).await
}
