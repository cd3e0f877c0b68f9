//! Bluesky target
//!
//! Talks XRPC to the account's PDS:
//! - `com.atproto.server.createSession` to log in
//! - `com.atproto.repo.uploadBlob` for images
//! - `com.atproto.repo.createRecord` for the `app.bsky.feed.post` record

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use serde_json::json;
use std::path::Path;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::config::BlueskyConfig;
use crate::error::{CrosspostError, Result, TargetError};
use crate::targets::{error_for_response, Target};
use crate::types::{ImageMimeType, MediaRef, PostReceipt, TargetName};

/// Alt text fallback length when the author gave none
const ALT_TEXT_FALLBACK_CHARS: usize = 300;

const MAX_IMAGES: usize = 4;

struct Session {
    did: String,
    access_jwt: SecretString,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateSessionResponse {
    did: String,
    access_jwt: String,
    #[serde(default)]
    handle: Option<String>,
}

#[derive(Deserialize)]
struct UploadBlobResponse {
    blob: serde_json::Value,
}

#[derive(Deserialize)]
struct CreateRecordResponse {
    uri: String,
    cid: String,
}

pub struct BlueskyTarget {
    service: String,
    identifier: String,
    password: SecretString,
    http: reqwest::Client,
    session: RwLock<Option<Session>>,
}

impl BlueskyTarget {
    pub fn new(config: &BlueskyConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .user_agent(concat!("crosspost/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| {
                CrosspostError::Config(crate::error::ConfigError::InvalidValue {
                    field: "bluesky".to_string(),
                    reason: format!("failed to build HTTP client: {}", e),
                })
            })?;

        Ok(Self {
            service: config.service.trim_end_matches('/').to_string(),
            identifier: config.identifier.clone(),
            password: SecretString::from(config.password.clone()),
            http,
            session: RwLock::new(None),
        })
    }

    fn xrpc_url(&self, method: &str) -> String {
        format!("{}/xrpc/{}", self.service, method)
    }

    /// DID and access token of the current session
    async fn session_credentials(&self) -> std::result::Result<(String, String), TargetError> {
        let session = self.session.read().await;
        match session.as_ref() {
            Some(s) => Ok((s.did.clone(), s.access_jwt.expose_secret().to_string())),
            None => Err(TargetError::NotAuthenticated("Bluesky".to_string())),
        }
    }

    /// Drop the session if the PDS rejected it, so the next request logs in again
    async fn check_session(&self, error: TargetError) -> TargetError {
        if !is_session_rejection(&error) {
            return error;
        }

        warn!("Bluesky rejected the session, clearing it: {}", error);
        *self.session.write().await = None;

        match error {
            TargetError::Platform(msg) => TargetError::Authentication(msg),
            other => other,
        }
    }
}

/// Whether the PDS refused the access token of the current session
///
/// Expired and invalid tokens come back as HTTP 400 with an XRPC error
/// name in the body, not as 401.
fn is_session_rejection(error: &TargetError) -> bool {
    match error {
        TargetError::Authentication(_) => true,
        TargetError::Platform(msg) => {
            msg.contains("ExpiredToken") || msg.contains("InvalidToken")
        }
        _ => false,
    }
}

fn fallback_alt_text(text: &str) -> String {
    text.chars().take(ALT_TEXT_FALLBACK_CHARS).collect()
}

fn post_record(text: &str, media: &[MediaRef], alt_texts: &[String], created_at: &str) -> serde_json::Value {
    let mut record = json!({
        "$type": "app.bsky.feed.post",
        "text": text,
        "createdAt": created_at,
    });

    if !media.is_empty() {
        let images: Vec<serde_json::Value> = media
            .iter()
            .enumerate()
            .map(|(i, m)| {
                let alt = alt_texts
                    .get(i)
                    .filter(|a| !a.trim().is_empty())
                    .cloned()
                    .unwrap_or_else(|| fallback_alt_text(text));
                json!({ "image": m.raw, "alt": alt })
            })
            .collect();

        record["embed"] = json!({
            "$type": "app.bsky.embed.images",
            "images": images,
        });
    }

    record
}

#[async_trait]
impl Target for BlueskyTarget {
    fn name(&self) -> TargetName {
        TargetName::Bluesky
    }

    fn validate_config(&self) -> bool {
        !self.identifier.trim().is_empty() && !self.password.expose_secret().is_empty()
    }

    async fn authenticate(&self) -> std::result::Result<(), TargetError> {
        let mut session = self.session.write().await;
        *session = None;

        debug!("Creating Bluesky session for {}", self.identifier);

        let response = self
            .http
            .post(self.xrpc_url("com.atproto.server.createSession"))
            .json(&json!({
                "identifier": self.identifier,
                "password": self.password.expose_secret(),
            }))
            .send()
            .await
            .map_err(|e| TargetError::from_reqwest(e, "create session"))?;

        if !response.status().is_success() {
            let error = error_for_response(response, "create session").await;
            warn!("Failed to authenticate with Bluesky: {}", error);
            return Err(match error {
                TargetError::RateLimit(_) | TargetError::Authentication(_) => error,
                other => TargetError::Authentication(other.to_string()),
            });
        }

        let created: CreateSessionResponse = response.json().await.map_err(|e| {
            TargetError::Authentication(format!("unreadable createSession response: {}", e))
        })?;

        info!(
            "Successfully authenticated with Bluesky as {}",
            created.handle.as_deref().unwrap_or(&created.did)
        );
        *session = Some(Session {
            did: created.did,
            access_jwt: SecretString::from(created.access_jwt),
        });

        Ok(())
    }

    async fn is_authenticated(&self) -> bool {
        self.session.read().await.is_some()
    }

    fn max_attachments(&self) -> usize {
        MAX_IMAGES
    }

    async fn upload_media(
        &self,
        path: &Path,
        mime_type: ImageMimeType,
    ) -> std::result::Result<MediaRef, TargetError> {
        let (_, token) = self.session_credentials().await?;

        let bytes = tokio::fs::read(path)
            .await
            .map_err(|e| TargetError::Upload(format!("cannot read {}: {}", path.display(), e)))?;

        debug!("Uploading {} bytes to Bluesky", bytes.len());

        let response = self
            .http
            .post(self.xrpc_url("com.atproto.repo.uploadBlob"))
            .bearer_auth(token)
            .header(reqwest::header::CONTENT_TYPE, mime_type.as_str())
            .body(bytes)
            .send()
            .await
            .map_err(|e| TargetError::from_reqwest(e, "upload blob"))?;

        if !response.status().is_success() {
            let error = self
                .check_session(error_for_response(response, "upload blob").await)
                .await;
            return Err(match error {
                TargetError::Platform(msg) => TargetError::Upload(msg),
                other => other,
            });
        }

        let uploaded: UploadBlobResponse = response
            .json()
            .await
            .map_err(|e| TargetError::Upload(format!("unreadable uploadBlob response: {}", e)))?;

        let id = uploaded.blob["ref"]["$link"]
            .as_str()
            .unwrap_or_default()
            .to_string();

        Ok(MediaRef {
            id,
            raw: uploaded.blob,
        })
    }

    async fn create_post(
        &self,
        text: &str,
        media: &[MediaRef],
        alt_texts: &[String],
    ) -> std::result::Result<PostReceipt, TargetError> {
        let (did, token) = self.session_credentials().await?;

        let created_at = chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true);
        let record = post_record(text, media, alt_texts, &created_at);

        let response = self
            .http
            .post(self.xrpc_url("com.atproto.repo.createRecord"))
            .bearer_auth(token)
            .json(&json!({
                "repo": did,
                "collection": "app.bsky.feed.post",
                "record": record,
            }))
            .send()
            .await
            .map_err(|e| TargetError::from_reqwest(e, "create record"))?;

        if !response.status().is_success() {
            let error = error_for_response(response, "create record").await;
            return Err(self.check_session(error).await);
        }

        let created: CreateRecordResponse = response
            .json()
            .await
            .map_err(|e| TargetError::Platform(format!("unreadable createRecord response: {}", e)))?;

        debug!("Posted to Bluesky: {}", created.uri);

        Ok(PostReceipt {
            data: json!({ "uri": created.uri, "cid": created.cid }),
        })
    }
}
