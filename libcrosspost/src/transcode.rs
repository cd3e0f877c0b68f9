//! Image transcoding to fit platform size and dimension budgets
//!
//! Each uploaded image is decoded once, shrunk so that its longer edge is
//! at most [`MAX_IMAGE_DIMENSION`], and re-encoded at quality
//! [`DEFAULT_QUALITY`]. If the result is still larger than
//! [`MAX_FILE_SIZE`], exactly one corrective pass re-encodes the
//! downscaled image at a quality proportional to the overshoot:
//!
//! ```text
//! quality = floor(max_file_size / current_size * 70)
//! ```
//!
//! There is no further iteration. The corrective pass is a bound on work,
//! not a guarantee that the output fits the budget.

use image::codecs::gif::GifEncoder;
use image::codecs::jpeg::JpegEncoder;
use image::codecs::png::{CompressionType, FilterType as PngFilter, PngEncoder};
use image::imageops::FilterType;
use image::{DynamicImage, Frame, GenericImageView, ImageFormat};
use std::io::Cursor;
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::cleanup::Abandoned;
use crate::error::TranscodeError;
use crate::types::ImageMimeType;

/// Largest encoded size targeted (975 KiB, under Bluesky's 1 MB blob ceiling)
pub const MAX_FILE_SIZE: u64 = 975 * 1024;

/// Longest allowed edge in pixels
pub const MAX_IMAGE_DIMENSION: u32 = 2000;

/// Quality of the first encode for JPEG and PNG
pub const DEFAULT_QUALITY: u8 = 80;

const CORRECTIVE_QUALITY_SCALE: f64 = 70.0;

/// Size and dimension budget for transcoded images
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TranscodeLimits {
    pub max_file_size: u64,
    pub max_image_dimension: u32,
}

impl Default for TranscodeLimits {
    fn default() -> Self {
        Self {
            max_file_size: MAX_FILE_SIZE,
            max_image_dimension: MAX_IMAGE_DIMENSION,
        }
    }
}

/// What the transcoder produced
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TranscodeOutcome {
    pub width: u32,
    pub height: u32,
    pub size_bytes: u64,
    /// Quality of the encode that was written last
    pub quality: u8,
    pub corrective_pass: bool,
}

/// Fit `(width, height)` inside a `max` x `max` box, never enlarging
pub fn fit_inside(width: u32, height: u32, max: u32) -> (u32, u32) {
    let longest = width.max(height);
    if longest <= max || longest == 0 {
        return (width, height);
    }

    let ratio = max as f64 / longest as f64;
    let new_w = (width as f64 * ratio).round() as u32;
    let new_h = (height as f64 * ratio).round() as u32;

    (new_w.clamp(1, max), new_h.clamp(1, max))
}

/// Quality used by the corrective pass
pub fn corrective_quality(max_file_size: u64, current_size: u64) -> u8 {
    if current_size == 0 {
        return DEFAULT_QUALITY;
    }
    let quality = (max_file_size as f64 / current_size as f64 * CORRECTIVE_QUALITY_SCALE).floor();
    quality.clamp(1.0, 100.0) as u8
}

#[derive(Debug, Clone, Copy, Default)]
pub struct Transcoder {
    limits: TranscodeLimits,
}

impl Transcoder {
    pub fn new(limits: TranscodeLimits) -> Self {
        Self { limits }
    }

    pub fn limits(&self) -> TranscodeLimits {
        self.limits
    }

    /// Transcode `input` into `output`
    ///
    /// Writes exactly one output file, overwritten at most once more by the
    /// corrective pass. The input is left untouched.
    pub fn transcode(
        &self,
        input: &Path,
        output: &Path,
        mime_type: ImageMimeType,
    ) -> Result<TranscodeOutcome, TranscodeError> {
        let bytes = std::fs::read(input).map_err(|source| TranscodeError::Io {
            path: input.display().to_string(),
            source,
        })?;

        let decoded = image::load_from_memory_with_format(&bytes, image_format(mime_type))
            .map_err(|e| TranscodeError::Decode {
                path: input.display().to_string(),
                reason: e.to_string(),
            })?;

        let (src_w, src_h) = decoded.dimensions();
        let (width, height) = fit_inside(src_w, src_h, self.limits.max_image_dimension);
        let resized = (width, height) != (src_w, src_h);

        let image = if resized {
            debug!(
                "Resizing {} from {}x{} to {}x{}",
                input.display(),
                src_w,
                src_h,
                width,
                height
            );
            decoded.resize_exact(width, height, FilterType::Lanczos3)
        } else {
            decoded
        };

        // GIF has no quality knob; an untouched GIF keeps its original
        // bytes so animation survives
        let encoded = if mime_type == ImageMimeType::Gif && !resized {
            bytes
        } else {
            encode(&image, mime_type, DEFAULT_QUALITY, output)?
        };
        write_output(output, &encoded)?;

        let mut outcome = TranscodeOutcome {
            width,
            height,
            size_bytes: encoded.len() as u64,
            quality: DEFAULT_QUALITY,
            corrective_pass: false,
        };

        if outcome.size_bytes > self.limits.max_file_size && has_quality_knob(mime_type) {
            let quality = corrective_quality(self.limits.max_file_size, outcome.size_bytes);
            debug!(
                "{} is {} bytes after first encode, re-encoding at quality {}",
                output.display(),
                outcome.size_bytes,
                quality
            );

            let encoded = encode(&image, mime_type, quality, output)?;
            write_output(output, &encoded)?;

            outcome.size_bytes = encoded.len() as u64;
            outcome.quality = quality;
            outcome.corrective_pass = true;
        }

        Ok(outcome)
    }

    /// Run [`Transcoder::transcode`] on the blocking thread pool
    ///
    /// The job cannot be stopped once started. If the owning request is
    /// abandoned while it runs, the job deletes `output` after writing it.
    pub async fn transcode_async(
        &self,
        input: PathBuf,
        output: PathBuf,
        mime_type: ImageMimeType,
        abandoned: Abandoned,
    ) -> Result<TranscodeOutcome, TranscodeError> {
        let transcoder = *self;
        let output_display = output.display().to_string();

        tokio::task::spawn_blocking(move || {
            let result = transcoder.transcode(&input, &output, mime_type);
            if abandoned.is_abandoned() {
                debug!("Request abandoned, removing {}", output.display());
                crate::cleanup::cleanup_blocking(&[output]);
            }
            result
        })
        .await
            .map_err(|e| TranscodeError::Encode {
                path: output_display,
                reason: format!("transcode task failed: {}", e),
            })?
    }
}

fn image_format(mime_type: ImageMimeType) -> ImageFormat {
    match mime_type {
        ImageMimeType::Jpeg => ImageFormat::Jpeg,
        ImageMimeType::Png => ImageFormat::Png,
        ImageMimeType::Gif => ImageFormat::Gif,
    }
}

fn has_quality_knob(mime_type: ImageMimeType) -> bool {
    matches!(mime_type, ImageMimeType::Jpeg | ImageMimeType::Png)
}

/// PNG is lossless; quality selects compression effort instead
fn png_compression(quality: u8) -> CompressionType {
    if quality >= DEFAULT_QUALITY {
        CompressionType::Default
    } else {
        CompressionType::Best
    }
}

fn encode(
    image: &DynamicImage,
    mime_type: ImageMimeType,
    quality: u8,
    output: &Path,
) -> Result<Vec<u8>, TranscodeError> {
    let mut buf = Cursor::new(Vec::new());
    let encode_error = |e: image::ImageError| TranscodeError::Encode {
        path: output.display().to_string(),
        reason: e.to_string(),
    };

    match mime_type {
        ImageMimeType::Jpeg => {
            let encoder = JpegEncoder::new_with_quality(&mut buf, quality);
            image.to_rgb8().write_with_encoder(encoder).map_err(encode_error)?;
        }
        ImageMimeType::Png => {
            let encoder =
                PngEncoder::new_with_quality(&mut buf, png_compression(quality), PngFilter::Adaptive);
            image.write_with_encoder(encoder).map_err(encode_error)?;
        }
        ImageMimeType::Gif => {
            let mut encoder = GifEncoder::new(&mut buf);
            encoder
                .encode_frame(Frame::new(image.to_rgba8()))
                .map_err(encode_error)?;
        }
    }

    Ok(buf.into_inner())
}

fn write_output(output: &Path, bytes: &[u8]) -> Result<(), TranscodeError> {
    std::fs::write(output, bytes).map_err(|source| TranscodeError::Io {
        path: output.display().to_string(),
        source,
    })
}
