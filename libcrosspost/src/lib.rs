//! Crosspost - publish one post to several social platforms at once
//!
//! The library takes a post (text, images with alt texts, target list),
//! checks that every requested platform is configured and logged in,
//! shrinks the images to fit platform limits, publishes to all platforms
//! concurrently and reports a result per platform. Temporary files are
//! removed on every path.
//!
//! ```no_run
//! use libcrosspost::{Config, Crosspost, PostRequest, TargetRegistry};
//!
//! # async fn example() -> libcrosspost::Result<()> {
//! let config = Config::load()?;
//! let crosspost = Crosspost::new(TargetRegistry::from_config(&config)?)
//!     .with_timeout(config.timeout())
//!     .with_limits(config.transcode_limits());
//!
//! let response = crosspost.post(PostRequest::new("Hello from everywhere")).await?;
//! for result in &response.results {
//!     println!("{}: {}", result.platform, result.success);
//! }
//! # Ok(())
//! # }
//! ```

pub mod cleanup;
pub mod config;
pub mod error;
pub mod events;
pub mod logging;
pub mod orchestrator;
pub mod response;
pub mod targets;
pub mod transcode;
pub mod types;
pub mod upload;

// Re-export commonly used types
pub use config::Config;
pub use error::{CrosspostError, Result, TargetError, TranscodeError};
pub use events::{Event, EventBus};
pub use orchestrator::Crosspost;
pub use response::{HttpResponse, ResponseBody};
pub use targets::{Target, TargetRegistry};
pub use transcode::{TranscodeLimits, Transcoder};
pub use types::{
    AggregateResponse, ImageMimeType, PostRequest, TargetName, TargetResult, UploadedFile,
};
pub use upload::UploadStager;
