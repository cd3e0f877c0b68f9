//! Twitter target
//!
//! Uses user-context OAuth 1.0a (consumer key/secret plus an access
//! token/secret pair issued for the posting account). Media goes through
//! the v1.1 upload endpoint, tweets through the v2 API.

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD as BASE64_STANDARD, Engine};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use serde_json::json;
use std::path::Path;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::config::TwitterConfig;
use crate::error::{ConfigError, CrosspostError, Result, TargetError};
use crate::targets::oauth::{authorization_header, OAuthCredentials};
use crate::targets::{error_for_response, Target};
use crate::types::{ImageMimeType, MediaRef, PostReceipt, TargetName};

const MAX_IMAGES: usize = 4;

/// Twitter rejects alt text longer than this
const MAX_ALT_TEXT_CHARS: usize = 1000;

#[derive(Deserialize)]
struct UserResponse {
    data: UserData,
}

#[derive(Deserialize)]
struct UserData {
    id: String,
    #[serde(default)]
    username: Option<String>,
}

#[derive(Deserialize)]
struct MediaUploadResponse {
    media_id_string: String,
}

#[derive(Deserialize)]
struct TweetResponse {
    data: serde_json::Value,
}

pub struct TwitterTarget {
    consumer_key: String,
    consumer_secret: SecretString,
    access_token: String,
    access_token_secret: SecretString,
    api_base: String,
    upload_base: String,
    http: reqwest::Client,
    /// Id of the verified account; `Some` once authenticated
    user_id: RwLock<Option<String>>,
}

impl TwitterTarget {
    pub fn new(config: &TwitterConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .user_agent(concat!("crosspost/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| {
                CrosspostError::Config(ConfigError::InvalidValue {
                    field: "twitter".to_string(),
                    reason: format!("failed to build HTTP client: {}", e),
                })
            })?;

        Ok(Self {
            consumer_key: config.consumer_key.clone(),
            consumer_secret: SecretString::from(config.consumer_secret.clone()),
            access_token: config.access_token.clone(),
            access_token_secret: SecretString::from(config.access_token_secret.clone()),
            api_base: config.api_base.trim_end_matches('/').to_string(),
            upload_base: config.upload_base.trim_end_matches('/').to_string(),
            http,
            user_id: RwLock::new(None),
        })
    }

    fn sign(
        &self,
        method: &str,
        url: &str,
        params: &[(&str, &str)],
    ) -> std::result::Result<String, TargetError> {
        let credentials = OAuthCredentials {
            consumer_key: &self.consumer_key,
            consumer_secret: self.consumer_secret.expose_secret(),
            token: &self.access_token,
            token_secret: self.access_token_secret.expose_secret(),
        };
        authorization_header(method, url, params, &credentials)
            .ok_or_else(|| TargetError::Authentication("failed to sign request".to_string()))
    }

    async fn ensure_authenticated(&self) -> std::result::Result<(), TargetError> {
        if self.user_id.read().await.is_some() {
            Ok(())
        } else {
            Err(TargetError::NotAuthenticated("Twitter".to_string()))
        }
    }

    /// Forget the verified account when Twitter refuses the tokens
    async fn check_session(&self, error: TargetError) -> TargetError {
        if matches!(error, TargetError::Authentication(_)) {
            warn!("Twitter rejected the access token, clearing session: {}", error);
            *self.user_id.write().await = None;
        }
        error
    }

    async fn set_alt_text(&self, media_id: &str, alt_text: &str) -> std::result::Result<(), TargetError> {
        let url = format!("{}/1.1/media/metadata/create.json", self.upload_base);
        let text: String = alt_text.chars().take(MAX_ALT_TEXT_CHARS).collect();

        let response = self
            .http
            .post(&url)
            .header(reqwest::header::AUTHORIZATION, self.sign("POST", &url, &[])?)
            .json(&json!({ "media_id": media_id, "alt_text": { "text": text } }))
            .send()
            .await
            .map_err(|e| TargetError::from_reqwest(e, "set alt text"))?;

        if !response.status().is_success() {
            let error = error_for_response(response, "set alt text").await;
            return Err(self.check_session(error).await);
        }
        Ok(())
    }
}

#[async_trait]
impl Target for TwitterTarget {
    fn name(&self) -> TargetName {
        TargetName::Twitter
    }

    fn validate_config(&self) -> bool {
        !self.consumer_key.trim().is_empty()
            && !self.consumer_secret.expose_secret().is_empty()
            && !self.access_token.trim().is_empty()
            && !self.access_token_secret.expose_secret().is_empty()
    }

    async fn authenticate(&self) -> std::result::Result<(), TargetError> {
        let mut user_id = self.user_id.write().await;
        *user_id = None;

        let url = format!("{}/2/users/me", self.api_base);
        let response = self
            .http
            .get(&url)
            .header(reqwest::header::AUTHORIZATION, self.sign("GET", &url, &[])?)
            .send()
            .await
            .map_err(|e| TargetError::from_reqwest(e, "verify credentials"))?;

        if !response.status().is_success() {
            let error = error_for_response(response, "verify credentials").await;
            warn!("Failed to authenticate with Twitter: {}", error);
            return Err(match error {
                TargetError::RateLimit(_) | TargetError::Authentication(_) => error,
                other => TargetError::Authentication(other.to_string()),
            });
        }

        let user: UserResponse = response.json().await.map_err(|e| {
            TargetError::Authentication(format!("unreadable users/me response: {}", e))
        })?;

        info!(
            "Successfully authenticated with Twitter as {}",
            user.data.username.as_deref().unwrap_or(&user.data.id)
        );
        *user_id = Some(user.data.id);

        Ok(())
    }

    async fn is_authenticated(&self) -> bool {
        self.user_id.read().await.is_some()
    }

    fn max_attachments(&self) -> usize {
        MAX_IMAGES
    }

    async fn upload_media(
        &self,
        path: &Path,
        _mime_type: ImageMimeType,
    ) -> std::result::Result<MediaRef, TargetError> {
        self.ensure_authenticated().await?;

        let bytes = tokio::fs::read(path)
            .await
            .map_err(|e| TargetError::Upload(format!("cannot read {}: {}", path.display(), e)))?;
        let media_data = BASE64_STANDARD.encode(&bytes);

        debug!("Uploading {} bytes to Twitter", bytes.len());

        let url = format!("{}/1.1/media/upload.json", self.upload_base);
        // Form parameters are part of the OAuth signature
        let form = [("media_data", media_data.as_str())];

        let response = self
            .http
            .post(&url)
            .header(reqwest::header::AUTHORIZATION, self.sign("POST", &url, &form)?)
            .form(&form)
            .send()
            .await
            .map_err(|e| TargetError::from_reqwest(e, "upload media"))?;

        if !response.status().is_success() {
            let error = error_for_response(response, "upload media").await;
            return Err(match self.check_session(error).await {
                TargetError::Platform(msg) => TargetError::Upload(msg),
                other => other,
            });
        }

        let uploaded: MediaUploadResponse = response
            .json()
            .await
            .map_err(|e| TargetError::Upload(format!("unreadable media upload response: {}", e)))?;

        Ok(MediaRef {
            raw: json!(uploaded.media_id_string),
            id: uploaded.media_id_string,
        })
    }

    async fn create_post(
        &self,
        text: &str,
        media: &[MediaRef],
        alt_texts: &[String],
    ) -> std::result::Result<PostReceipt, TargetError> {
        self.ensure_authenticated().await?;

        for (media_ref, alt) in media.iter().zip(alt_texts) {
            if !alt.trim().is_empty() {
                self.set_alt_text(&media_ref.id, alt).await?;
            }
        }

        let mut body = json!({ "text": text });
        if !media.is_empty() {
            let ids: Vec<&str> = media.iter().map(|m| m.id.as_str()).collect();
            body["media"] = json!({ "media_ids": ids });
        }

        let url = format!("{}/2/tweets", self.api_base);
        let response = self
            .http
            .post(&url)
            .header(reqwest::header::AUTHORIZATION, self.sign("POST", &url, &[])?)
            .json(&body)
            .send()
            .await
            .map_err(|e| TargetError::from_reqwest(e, "create tweet"))?;

        if !response.status().is_success() {
            let error = error_for_response(response, "create tweet").await;
            return Err(self.check_session(error).await);
        }

        let tweet: TweetResponse = response
            .json()
            .await
            .map_err(|e| TargetError::Platform(format!("unreadable tweet response: {}", e)))?;

        debug!("Posted to Twitter: {}", tweet.data);

        Ok(PostReceipt { data: tweet.data })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> TwitterConfig {
        TwitterConfig {
            consumer_key: "ck".to_string(),
            consumer_secret: "cs".to_string(),
            access_token: "at".to_string(),
            access_token_secret: "ats".to_string(),
            ..TwitterConfig::default()
        }
    }

    #[test]
    fn test_validate_config_requires_all_four_credentials() {
        assert!(TwitterTarget::new(&config()).unwrap().validate_config());

        let mut missing_token = config();
        missing_token.access_token_secret = String::new();
        assert!(!TwitterTarget::new(&missing_token).unwrap().validate_config());

        let mut missing_consumer = config();
        missing_consumer.consumer_key = "  ".to_string();
        assert!(!TwitterTarget::new(&missing_consumer).unwrap().validate_config());
    }

    #[tokio::test]
    async fn test_upload_requires_authentication() {
        let target = TwitterTarget::new(&config()).unwrap();
        let result = target
            .upload_media(Path::new("/nonexistent"), ImageMimeType::Png)
            .await;
        assert_eq!(
            result.unwrap_err(),
            TargetError::NotAuthenticated("Twitter".to_string())
        );
    }

    #[tokio::test]
    async fn test_create_post_requires_authentication() {
        let target = TwitterTarget::new(&config()).unwrap();
        assert!(!target.is_authenticated().await);
        assert!(matches!(
            target.create_post("hi", &[], &[]).await,
            Err(TargetError::NotAuthenticated(_))
        ));
    }
}
