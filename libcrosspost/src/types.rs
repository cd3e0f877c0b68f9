//! Core types for Crosspost

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

// ============================================================================
// Targets
// ============================================================================

/// Name of a publishing destination
///
/// Known platforms get their own variant; `Other` carries any additional
/// registered target (test doubles, future platforms) by its lowercase name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum TargetName {
    Bluesky,
    Twitter,
    Other(String),
}

impl TargetName {
    pub fn as_str(&self) -> &str {
        match self {
            TargetName::Bluesky => "bluesky",
            TargetName::Twitter => "twitter",
            TargetName::Other(name) => name,
        }
    }

    /// Parse a comma-separated list such as `"bluesky,twitter"`
    ///
    /// Blank entries are skipped and duplicates keep their first position.
    pub fn parse_list(s: &str) -> std::result::Result<Vec<Self>, String> {
        let mut names = Vec::new();
        for part in s.split(',').map(str::trim).filter(|p| !p.is_empty()) {
            let name: TargetName = part.parse()?;
            if !names.contains(&name) {
                names.push(name);
            }
        }
        Ok(names)
    }
}

impl FromStr for TargetName {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let name = s.trim().to_lowercase();
        match name.as_str() {
            "" => Err("Target name cannot be empty".to_string()),
            "bluesky" | "bsky" => Ok(TargetName::Bluesky),
            "twitter" | "x" => Ok(TargetName::Twitter),
            _ if name.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_') => {
                Ok(TargetName::Other(name))
            }
            _ => Err(format!("Invalid target name: '{}'", s)),
        }
    }
}

impl TryFrom<String> for TargetName {
    type Error = String;

    fn try_from(value: String) -> std::result::Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<TargetName> for String {
    fn from(name: TargetName) -> Self {
        name.as_str().to_string()
    }
}

impl fmt::Display for TargetName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Image Types
// ============================================================================

/// Image MIME types accepted at the upload boundary
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum ImageMimeType {
    Jpeg,
    Png,
    Gif,
}

impl ImageMimeType {
    /// Detect MIME type from the leading magic bytes of a file
    pub fn sniff(bytes: &[u8]) -> Option<Self> {
        if bytes.starts_with(&[0xFF, 0xD8, 0xFF]) {
            Some(Self::Jpeg)
        } else if bytes.starts_with(&[0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A]) {
            Some(Self::Png)
        } else if bytes.starts_with(b"GIF87a") || bytes.starts_with(b"GIF89a") {
            Some(Self::Gif)
        } else {
            None
        }
    }

    /// Get the MIME type string representation
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Jpeg => "image/jpeg",
            Self::Png => "image/png",
            Self::Gif => "image/gif",
        }
    }
}

impl fmt::Display for ImageMimeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// An original image as handed over by the upload layer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadedFile {
    pub path: PathBuf,
    pub mime_type: ImageMimeType,
    pub size_bytes: u64,
}

/// An image after it went through the transcoder
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TranscodedFile {
    pub path: PathBuf,
    pub mime_type: ImageMimeType,
    /// Alt text for this image, if the author provided one
    pub alt_text: Option<String>,
}

impl TranscodedFile {
    /// Path the transcoder writes to for a given original
    pub fn derived_path(original: &std::path::Path) -> PathBuf {
        let mut name = original.as_os_str().to_os_string();
        name.push("_processed");
        PathBuf::from(name)
    }
}

// ============================================================================
// Requests and Results
// ============================================================================

/// One authoring request
#[derive(Debug, Clone, Default)]
pub struct PostRequest {
    pub text: String,
    /// Positionally aligned with `images`; may be shorter
    pub alt_texts: Vec<String>,
    pub images: Vec<UploadedFile>,
    /// Requested targets; empty means every registered target
    pub targets: Vec<TargetName>,
}

impl PostRequest {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            ..Default::default()
        }
    }

    pub fn with_images(mut self, images: Vec<UploadedFile>) -> Self {
        self.images = images;
        self
    }

    pub fn with_alt_texts(mut self, alt_texts: Vec<String>) -> Self {
        self.alt_texts = alt_texts;
        self
    }

    pub fn with_targets(mut self, targets: Vec<TargetName>) -> Self {
        self.targets = targets;
        self
    }
}

/// Parse the raw `altTexts` form field
///
/// Accepts a JSON array of strings. Anything else that is non-empty is
/// taken as a single alt text for the first image.
pub fn parse_alt_texts(raw: Option<&str>) -> Vec<String> {
    let Some(raw) = raw.filter(|s| !s.trim().is_empty()) else {
        return Vec::new();
    };

    match serde_json::from_str::<Vec<String>>(raw) {
        Ok(parsed) => parsed,
        Err(_) => vec![raw.to_string()],
    }
}

/// Reference to media already uploaded to a platform
#[derive(Debug, Clone, PartialEq)]
pub struct MediaRef {
    /// Platform media identifier (Twitter media id, Bluesky blob CID)
    pub id: String,
    /// Raw platform payload needed to reference the media in a post
    pub raw: serde_json::Value,
}

/// Platform acknowledgement of a created post
#[derive(Debug, Clone, PartialEq)]
pub struct PostReceipt {
    pub data: serde_json::Value,
}

/// Outcome of one target for one request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TargetResult {
    pub platform: TargetName,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub data: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub error: Option<String>,
}

impl TargetResult {
    pub fn succeeded(platform: TargetName, data: serde_json::Value) -> Self {
        Self {
            platform,
            success: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn failed(platform: TargetName, error: impl Into<String>) -> Self {
        Self {
            platform,
            success: false,
            data: None,
            error: Some(error.into()),
        }
    }
}

/// Result of a request in which at least one target succeeded
#[derive(Debug, Clone, PartialEq)]
pub struct AggregateResponse {
    /// One entry per requested target, in request order
    pub results: Vec<TargetResult>,
    /// Number of images the request carried
    pub image_count: usize,
}

impl AggregateResponse {
    pub const MESSAGE: &'static str = "Posts created";

    pub fn all_succeeded(&self) -> bool {
        self.results.iter().all(|r| r.success)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_target_name_parsing() {
        assert_eq!("bluesky".parse::<TargetName>().unwrap(), TargetName::Bluesky);
        assert_eq!("BSKY".parse::<TargetName>().unwrap(), TargetName::Bluesky);
        assert_eq!(" Twitter ".parse::<TargetName>().unwrap(), TargetName::Twitter);
        assert_eq!("x".parse::<TargetName>().unwrap(), TargetName::Twitter);
        assert_eq!(
            "mock-a".parse::<TargetName>().unwrap(),
            TargetName::Other("mock-a".to_string())
        );
        assert!("".parse::<TargetName>().is_err());
        assert!("no spaces".parse::<TargetName>().is_err());
    }

    #[test]
    fn test_target_name_list_keeps_order_and_dedups() {
        let names = TargetName::parse_list("twitter, bluesky,,TWITTER").unwrap();
        assert_eq!(names, vec![TargetName::Twitter, TargetName::Bluesky]);
    }

    #[test]
    fn test_target_name_serializes_as_string() {
        let json = serde_json::to_string(&TargetName::Bluesky).unwrap();
        assert_eq!(json, "\"bluesky\"");

        let parsed: TargetName = serde_json::from_str("\"twitter\"").unwrap();
        assert_eq!(parsed, TargetName::Twitter);
    }

    #[test]
    fn test_mime_sniff() {
        assert_eq!(
            ImageMimeType::sniff(&[0xFF, 0xD8, 0xFF, 0xE0, 0x00]),
            Some(ImageMimeType::Jpeg)
        );
        assert_eq!(
            ImageMimeType::sniff(&[0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A, 0x00]),
            Some(ImageMimeType::Png)
        );
        assert_eq!(ImageMimeType::sniff(b"GIF89a...."), Some(ImageMimeType::Gif));
        assert_eq!(ImageMimeType::sniff(b"RIFF....WEBP"), None);
        assert_eq!(ImageMimeType::sniff(&[]), None);
    }

    #[test]
    fn test_derived_path_appends_suffix() {
        let derived = TranscodedFile::derived_path(std::path::Path::new("/tmp/req/0"));
        assert_eq!(derived, PathBuf::from("/tmp/req/0_processed"));
    }

    #[test]
    fn test_parse_alt_texts() {
        assert!(parse_alt_texts(None).is_empty());
        assert!(parse_alt_texts(Some("  ")).is_empty());
        assert_eq!(
            parse_alt_texts(Some(r#"["a cat", "a dog"]"#)),
            vec!["a cat".to_string(), "a dog".to_string()]
        );
        assert_eq!(
            parse_alt_texts(Some("just one")),
            vec!["just one".to_string()]
        );
    }

    #[test]
    fn test_target_result_serialization_skips_empty_fields() {
        let ok = TargetResult::succeeded(TargetName::Bluesky, serde_json::json!({"uri": "at://x"}));
        let value = serde_json::to_value(&ok).unwrap();
        assert_eq!(value["platform"], "bluesky");
        assert_eq!(value["success"], true);
        assert!(value.get("error").is_none());

        let failed = TargetResult::failed(TargetName::Twitter, "timeout");
        let value = serde_json::to_value(&failed).unwrap();
        assert_eq!(value["success"], false);
        assert_eq!(value["error"], "timeout");
        assert!(value.get("data").is_none());
    }

    #[test]
    fn test_aggregate_response_helpers() {
        let response = AggregateResponse {
            results: vec![
                TargetResult::succeeded(TargetName::Bluesky, serde_json::Value::Null),
                TargetResult::failed(TargetName::Twitter, "boom"),
            ],
            image_count: 2,
        };
        assert!(!response.all_succeeded());
    }
}
