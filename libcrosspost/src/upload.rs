//! Upload staging
//!
//! Copies caller-supplied images into a directory owned by a single
//! request, so that the transcoder's derived files and the final cleanup
//! never touch anything the caller still owns. Each request gets
//! `<staging_dir>/<uuid>/`, and files are stored there as `0`, `1`, ...
//!
//! Staging enforces the upload contract: only JPEG, PNG and GIF (by
//! content, not by extension), at most [`MAX_UPLOAD_SIZE`] bytes per file
//! and at most [`MAX_UPLOAD_FILES`] files.

use std::path::{Path, PathBuf};

use tokio::io::AsyncReadExt;
use tracing::debug;

use crate::cleanup::cleanup;
use crate::error::{CrosspostError, Result};
use crate::types::{ImageMimeType, UploadedFile};

/// Per-file raw upload bound (10 MiB)
pub const MAX_UPLOAD_SIZE: u64 = 10 * 1024 * 1024;

/// Files per request; the largest attachment limit of any target
pub const MAX_UPLOAD_FILES: usize = 4;

/// Bytes needed to recognise every accepted format
const SNIFF_LEN: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UploadLimits {
    pub max_file_size: u64,
    pub max_files: usize,
}

impl Default for UploadLimits {
    fn default() -> Self {
        Self {
            max_file_size: MAX_UPLOAD_SIZE,
            max_files: MAX_UPLOAD_FILES,
        }
    }
}

#[derive(Debug, Clone)]
pub struct UploadStager {
    staging_root: PathBuf,
    limits: UploadLimits,
}

impl UploadStager {
    pub fn new(staging_root: impl Into<PathBuf>) -> Self {
        Self {
            staging_root: staging_root.into(),
            limits: UploadLimits::default(),
        }
    }

    pub fn with_limits(mut self, limits: UploadLimits) -> Self {
        self.limits = limits;
        self
    }

    pub fn staging_root(&self) -> &Path {
        &self.staging_root
    }

    /// Copy `sources` into a fresh request directory
    ///
    /// The returned files are in the same order as `sources`. On any
    /// rejection, everything staged so far is removed again.
    ///
    /// # Errors
    ///
    /// `Validation` for too many files, oversize files, unreadable sources
    /// and unsupported content; `Io` when the staging area itself fails.
    pub async fn stage(&self, sources: &[PathBuf]) -> Result<Vec<UploadedFile>> {
        if sources.is_empty() {
            return Ok(Vec::new());
        }
        if sources.len() > self.limits.max_files {
            return Err(CrosspostError::Validation(format!(
                "Too many images: {} (maximum {})",
                sources.len(),
                self.limits.max_files
            )));
        }

        let request_dir = self.staging_root.join(uuid::Uuid::new_v4().to_string());
        tokio::fs::create_dir_all(&request_dir).await?;

        let mut staged = Vec::with_capacity(sources.len());
        for (index, source) in sources.iter().enumerate() {
            let destination = request_dir.join(index.to_string());
            match self.stage_one(source, &destination).await {
                Ok(file) => staged.push(file),
                Err(e) => {
                    discard(&request_dir, &staged, &destination).await;
                    return Err(e);
                }
            }
        }

        debug!(
            "Staged {} file(s) in {}",
            staged.len(),
            request_dir.display()
        );
        Ok(staged)
    }

    async fn stage_one(&self, source: &Path, destination: &Path) -> Result<UploadedFile> {
        let unreadable = |e: std::io::Error| {
            CrosspostError::Validation(format!("Cannot read image {}: {}", source.display(), e))
        };

        let metadata = tokio::fs::metadata(source).await.map_err(unreadable)?;
        if !metadata.is_file() {
            return Err(CrosspostError::Validation(format!(
                "Not a file: {}",
                source.display()
            )));
        }
        if metadata.len() > self.limits.max_file_size {
            return Err(CrosspostError::Validation(format!(
                "Image {} is {} bytes (maximum {})",
                source.display(),
                metadata.len(),
                self.limits.max_file_size
            )));
        }

        let mut head = Vec::with_capacity(SNIFF_LEN);
        tokio::fs::File::open(source)
            .await
            .map_err(unreadable)?
            .take(SNIFF_LEN as u64)
            .read_to_end(&mut head)
            .await
            .map_err(unreadable)?;

        let mime_type = ImageMimeType::sniff(&head).ok_or_else(|| {
            CrosspostError::Validation(format!(
                "Unsupported file type for {} (allowed: image/jpeg, image/png, image/gif)",
                source.display()
            ))
        })?;

        let size_bytes = tokio::fs::copy(source, destination).await?;

        Ok(UploadedFile {
            path: destination.to_path_buf(),
            mime_type,
            size_bytes,
        })
    }
}

/// Roll back a partially staged request
///
/// `partial` is the destination that was being written when staging
/// failed; a copy that broke off midway leaves it behind.
async fn discard(request_dir: &Path, staged: &[UploadedFile], partial: &Path) {
    let mut paths: Vec<PathBuf> = staged.iter().map(|f| f.path.clone()).collect();
    paths.push(partial.to_path_buf());
    cleanup(&paths).await;

    // Still there when nothing had been written yet
    let _ = tokio::fs::remove_dir(request_dir).await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const PNG_HEADER: &[u8] = b"\x89PNG\r\n\x1a\n\0\0\0\rIHDR";
    const JPEG_HEADER: &[u8] = &[0xFF, 0xD8, 0xFF, 0xE0, 0x00, 0x10, b'J', b'F', b'I', b'F'];

    fn write(dir: &Path, name: &str, bytes: &[u8]) -> PathBuf {
        let path = dir.join(name);
        std::fs::write(&path, bytes).unwrap();
        path
    }

    fn entries(dir: &Path) -> usize {
        std::fs::read_dir(dir).map(|d| d.count()).unwrap_or(0)
    }

    #[tokio::test]
    async fn test_stage_copies_in_order_and_sniffs_type() {
        let sources = TempDir::new().unwrap();
        let staging = TempDir::new().unwrap();

        // Extension deliberately lies
        let a = write(sources.path(), "a.gif", PNG_HEADER);
        let b = write(sources.path(), "b.bin", JPEG_HEADER);

        let stager = UploadStager::new(staging.path());
        let staged = stager.stage(&[a.clone(), b]).await.unwrap();

        assert_eq!(staged.len(), 2);
        assert_eq!(staged[0].mime_type, ImageMimeType::Png);
        assert_eq!(staged[1].mime_type, ImageMimeType::Jpeg);
        assert_eq!(staged[0].size_bytes, PNG_HEADER.len() as u64);
        assert!(staged[0].path.ends_with("0"));
        assert!(staged[1].path.ends_with("1"));
        assert_eq!(staged[0].path.parent(), staged[1].path.parent());
        assert!(staged[0].path.starts_with(staging.path()));

        // Caller's file is untouched
        assert!(a.exists());
    }

    #[tokio::test]
    async fn test_stage_nothing() {
        let staging = TempDir::new().unwrap();
        let staged = UploadStager::new(staging.path()).stage(&[]).await.unwrap();
        assert!(staged.is_empty());
        assert_eq!(entries(staging.path()), 0);
    }

    #[tokio::test]
    async fn test_rejects_unsupported_content_and_cleans_up() {
        let sources = TempDir::new().unwrap();
        let staging = TempDir::new().unwrap();

        let good = write(sources.path(), "good.png", PNG_HEADER);
        let bad = write(sources.path(), "bad.png", b"%PDF-1.7 not an image");

        let result = UploadStager::new(staging.path()).stage(&[good, bad]).await;

        match result {
            Err(CrosspostError::Validation(msg)) => assert!(msg.contains("Unsupported file type")),
            other => panic!("Expected validation error, got {:?}", other),
        }
        assert_eq!(entries(staging.path()), 0, "staging area must be empty");
    }

    #[tokio::test]
    async fn test_rejects_oversize_file() {
        let sources = TempDir::new().unwrap();
        let staging = TempDir::new().unwrap();
        let mut bytes = PNG_HEADER.to_vec();
        bytes.resize(64, 0);
        let big = write(sources.path(), "big.png", &bytes);

        let stager = UploadStager::new(staging.path()).with_limits(UploadLimits {
            max_file_size: 32,
            max_files: 4,
        });

        assert!(matches!(
            stager.stage(&[big]).await,
            Err(CrosspostError::Validation(_))
        ));
        assert_eq!(entries(staging.path()), 0);
    }

    #[tokio::test]
    async fn test_rejects_too_many_files() {
        let sources = TempDir::new().unwrap();
        let staging = TempDir::new().unwrap();
        let files: Vec<PathBuf> = (0..5)
            .map(|i| write(sources.path(), &format!("{}.png", i), PNG_HEADER))
            .collect();

        let result = UploadStager::new(staging.path()).stage(&files).await;
        match result {
            Err(CrosspostError::Validation(msg)) => assert!(msg.contains("Too many images")),
            other => panic!("Expected validation error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_discard_removes_interrupted_copy() {
        let staging = TempDir::new().unwrap();
        let request_dir = staging.path().join("req");
        std::fs::create_dir(&request_dir).unwrap();

        let first = write(&request_dir, "0", PNG_HEADER);
        // What a copy that broke off midway leaves behind
        let partial = write(&request_dir, "1", &PNG_HEADER[..4]);

        let staged = vec![UploadedFile {
            path: first.clone(),
            mime_type: ImageMimeType::Png,
            size_bytes: PNG_HEADER.len() as u64,
        }];
        discard(&request_dir, &staged, &partial).await;

        assert!(!first.exists());
        assert!(!partial.exists());
        assert!(!request_dir.exists());
    }

    #[tokio::test]
    async fn test_discard_when_nothing_was_written() {
        let staging = TempDir::new().unwrap();
        let request_dir = staging.path().join("req");
        std::fs::create_dir(&request_dir).unwrap();

        discard(&request_dir, &[], &request_dir.join("0")).await;

        assert!(!request_dir.exists());
        assert_eq!(entries(staging.path()), 0);
    }

    #[tokio::test]
    async fn test_missing_source_is_validation_error() {
        let staging = TempDir::new().unwrap();
        let result = UploadStager::new(staging.path())
            .stage(&[PathBuf::from("/no/such/image.png")])
            .await;
        assert!(matches!(result, Err(CrosspostError::Validation(_))));
    }
}
