//! Mastodon platform implementation
//!
//! The destination side of the sync, built on the megalodon library. Owns
//! the content-similarity duplicate guard, content translation into the
//! instance's constraints, media re-upload, and reply threading. Published
//! posts carry no marker of where they originated.

use async_trait::async_trait;
use megalodon::entities::{StatusVisibility, UploadMedia};
use megalodon::megalodon::{
    GetAccountStatusesInputOptions, PostStatusInputOptions, PostStatusOutput,
    UploadMediaInputOptions,
};
use megalodon::{Megalodon, SNS};
use std::io::Write;
use tracing::{debug, info, warn};

use crate::config::{DuplicateCheckConfig, MastodonConfig};
use crate::content;
use crate::error::{PlatformError, Result};
use crate::platforms::{DestinationPlatform, DestinationRef, PublishOutcome};
use crate::types::{Media, Post};

/// Mastodon caps a status at four attachments.
const MAX_ATTACHMENTS: usize = 4;

const HTTP_TIMEOUT_SECS: u64 = 30;

/// Client for the account posts are written to.
pub struct MastodonClient {
    client: Box<dyn Megalodon + Send + Sync>,
    /// Plain HTTP client for downloading source media before re-upload
    http: reqwest::Client,
    instance_url: String,
    character_limit: usize,
    duplicate_check: DuplicateCheckConfig,
    /// Account id, known after authentication; required by the duplicate guard
    account_id: Option<String>,
}

impl MastodonClient {
    /// Create a new client.
    ///
    /// The character limit starts at the Mastodon default (500) and is
    /// refreshed from the instance during authentication.
    pub fn new(
        instance_url: String,
        access_token: String,
        duplicate_check: DuplicateCheckConfig,
    ) -> Result<Self> {
        let client = megalodon::generator(
            SNS::Mastodon,
            instance_url.clone(),
            Some(access_token),
            None,
        )
        .map_err(|e| {
            PlatformError::Authentication(format!("Failed to create Mastodon client: {:?}", e))
        })?;

        let http = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(HTTP_TIMEOUT_SECS))
            .user_agent(format!("bluecast/{}", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| PlatformError::Network(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            http,
            instance_url,
            character_limit: 500,
            duplicate_check,
            account_id: None,
        })
    }

    /// Create a client from configuration, reading the access token from the
    /// configured token file.
    pub fn from_config(config: &MastodonConfig) -> Result<Self> {
        let token_path = shellexpand::full(&config.token_file).map_err(|e| {
            PlatformError::Authentication(format!("Failed to expand token file path: {}", e))
        })?;

        let token = std::fs::read_to_string(token_path.as_ref())
            .map_err(|e| {
                PlatformError::Authentication(format!("Failed to read Mastodon token file: {}", e))
            })?
            .trim()
            .to_string();

        if token.is_empty() {
            return Err(
                PlatformError::Authentication("Mastodon token file is empty".to_string()).into(),
            );
        }

        let instance_url =
            if config.instance.starts_with("http://") || config.instance.starts_with("https://") {
                config.instance.clone()
            } else {
                format!("https://{}", config.instance)
            };

        Self::new(instance_url, token, config.duplicate_check.clone())
    }

    /// Refresh the instance's character limit. Best-effort: instances that
    /// fail this query keep the default.
    async fn fetch_instance_info(&mut self) -> Result<()> {
        let response = self
            .client
            .get_instance()
            .await
            .map_err(|e| map_megalodon_error(e, "fetch instance info"))?;

        let limit = response.json.configuration.statuses.max_characters;
        self.character_limit = limit as usize;
        debug!(
            "Instance {} allows {} characters per post",
            self.instance_url, self.character_limit
        );

        Ok(())
    }

    /// Look for an existing status that is effectively the same content.
    ///
    /// Scans a bounded window of the account's own recent statuses, strips
    /// their HTML, and compares normalized token sets. Returns the matching
    /// status identity above the configured threshold.
    async fn find_duplicate(&self, normalized: &str) -> Result<Option<DestinationRef>> {
        let account_id = match &self.account_id {
            Some(id) => id.clone(),
            None => {
                warn!("No Mastodon account id available for duplicate checking");
                return Ok(None);
            }
        };

        let options = GetAccountStatusesInputOptions {
            limit: Some(self.duplicate_check.window),
            exclude_reblogs: Some(true),
            ..Default::default()
        };
        let response = self
            .client
            .get_account_statuses(account_id, Some(&options))
            .await
            .map_err(|e| map_megalodon_error(e, "list recent statuses"))?;

        for status in response.json {
            let plain = content::normalize_text(&content::strip_html(&status.content));
            if plain.is_empty() {
                continue;
            }

            let similarity = content::token_similarity(&plain, normalized);
            if similarity > self.duplicate_check.threshold {
                info!(
                    "Found similar status {} (similarity: {:.2})",
                    status.id, similarity
                );
                return Ok(Some(DestinationRef {
                    id: status.id,
                    url: status.url,
                }));
            }
        }

        Ok(None)
    }

    /// Map source text into this instance's formatting and length
    /// constraints.
    fn translate(&self, post: &Post) -> String {
        let mut text = content::repair_links(&post.text, &post.links);
        text = content::link_bare_domains(&text);
        content::apply_character_limit(&text, self.character_limit, &post.links)
    }

    /// Download one media item and upload it to the instance, returning the
    /// media id to attach.
    async fn upload_media(&self, media: &Media) -> Result<String> {
        let response = self
            .http
            .get(&media.url)
            .send()
            .await
            .map_err(|e| PlatformError::Media(format!("Download failed for {}: {}", media.url, e)))?;

        if !response.status().is_success() {
            return Err(PlatformError::Media(format!(
                "Download of {} returned {}",
                media.url,
                response.status()
            ))
            .into());
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| PlatformError::Media(format!("Download failed for {}: {}", media.url, e)))?;

        // megalodon uploads from a path, so stage the bytes in a temp file
        // with an extension the instance can sniff.
        let extension = extension_for_mime(media.mime_type.as_deref());
        let mut staged = tempfile::Builder::new()
            .prefix("bluecast-media-")
            .suffix(&format!(".{}", extension))
            .tempfile()
            .map_err(|e| PlatformError::Media(format!("Failed to stage media: {}", e)))?;
        staged
            .write_all(&bytes)
            .and_then(|_| staged.flush())
            .map_err(|e| PlatformError::Media(format!("Failed to stage media: {}", e)))?;

        let options = UploadMediaInputOptions {
            description: media.alt_text.clone(),
            ..Default::default()
        };
        let uploaded = self
            .client
            .upload_media(staged.path().to_string_lossy().to_string(), Some(&options))
            .await
            .map_err(|e| PlatformError::Media(format!("Upload failed: {}", e)))?;

        let media_id = match uploaded.json {
            UploadMedia::Attachment(attachment) => attachment.id,
            UploadMedia::AsyncAttachment(attachment) => attachment.id,
        };

        debug!("Uploaded media {} as {}", media.url, media_id);
        Ok(media_id)
    }
}

#[async_trait]
impl DestinationPlatform for MastodonClient {
    async fn authenticate(&mut self) -> Result<()> {
        let response = self
            .client
            .verify_account_credentials()
            .await
            .map_err(|e| map_megalodon_error(e, "verify credentials"))?;

        let account = response.json;
        info!("Authenticated with Mastodon as {}", account.acct);
        self.account_id = Some(account.id);

        if let Err(e) = self.fetch_instance_info().await {
            warn!(
                "Could not fetch instance info, keeping {} character limit: {}",
                self.character_limit, e
            );
        }

        Ok(())
    }

    async fn publish(&self, post: &Post, in_reply_to_id: Option<&str>) -> Result<PublishOutcome> {
        // Secondary duplicate layer. Errors here fail open: better to risk a
        // duplicate the id ledger would have caught than to block the run.
        let normalized = content::normalize_text(&post.text);
        if !normalized.is_empty() {
            match self.find_duplicate(&normalized).await {
                Ok(Some(existing)) => {
                    info!(
                        "Duplicate of {} already on Mastodon as {}, skipping publish",
                        post.id, existing.id
                    );
                    return Ok(PublishOutcome::Duplicate(existing));
                }
                Ok(None) => {}
                Err(e) => warn!("Duplicate check failed, proceeding to publish: {}", e),
            }
        }

        let text = self.translate(post);

        let mut media_ids = Vec::new();
        for media in post.media.iter().take(MAX_ATTACHMENTS) {
            match self.upload_media(media).await {
                Ok(id) => media_ids.push(id),
                Err(e) => warn!("Skipping media attachment for {}: {}", post.id, e),
            }
        }
        if post.media.len() > MAX_ATTACHMENTS {
            debug!(
                "Post {} carries {} attachments, only the first {} uploaded",
                post.id,
                post.media.len(),
                MAX_ATTACHMENTS
            );
        }

        if text.trim().is_empty() && media_ids.is_empty() {
            return Err(PlatformError::Translation(format!(
                "Post {} has no publishable content",
                post.id
            ))
            .into());
        }

        if let Some(parent) = in_reply_to_id {
            info!("Creating a reply to Mastodon status {}", parent);
        }

        let options = PostStatusInputOptions {
            media_ids: if media_ids.is_empty() {
                None
            } else {
                Some(media_ids)
            },
            in_reply_to_id: in_reply_to_id.map(String::from),
            visibility: Some(StatusVisibility::Public),
            ..Default::default()
        };

        let response = self
            .client
            .post_status(text, Some(&options))
            .await
            .map_err(|e| map_megalodon_error(e, "post status"))?;

        let destination = match response.json {
            PostStatusOutput::Status(status) => DestinationRef {
                id: status.id,
                url: status.url,
            },
            PostStatusOutput::ScheduledStatus(scheduled) => DestinationRef {
                id: scheduled.id,
                url: None,
            },
        };

        info!(
            "Published {} to Mastodon as {}",
            post.id,
            destination.url.as_deref().unwrap_or(&destination.id)
        );
        Ok(PublishOutcome::Published(destination))
    }

    fn name(&self) -> &str {
        "mastodon"
    }

    fn character_limit(&self) -> Option<usize> {
        Some(self.character_limit)
    }
}

/// File extension the instance can sniff for an uploaded attachment.
fn extension_for_mime(mime: Option<&str>) -> &'static str {
    match mime.map(|m| m.to_lowercase()).as_deref() {
        Some("image/jpeg") | Some("image/jpg") => "jpg",
        Some("image/png") => "png",
        Some("image/gif") => "gif",
        Some("image/webp") => "webp",
        _ => "bin",
    }
}

/// Map megalodon errors to PlatformError.
///
/// Classifies by HTTP status when one can be extracted from the error text,
/// falling back to keyword inspection: 401/403 → Authentication, 422 →
/// Publish, 429 → RateLimit, 5xx → Network.
fn map_megalodon_error(error: megalodon::error::Error, context: &str) -> PlatformError {
    let error_str = error.to_string();
    let error_lower = error_str.to_lowercase();

    match extract_http_status(&error_str) {
        Some(401) | Some(403) => PlatformError::Authentication(format!(
            "Mastodon authentication failed ({}): {}. Verify the access token is valid.",
            context, error_str
        )),
        Some(422) => PlatformError::Publish(format!(
            "Mastodon rejected the status ({}): {}",
            context, error_str
        )),
        Some(429) => PlatformError::RateLimit(format!(
            "Mastodon rate limit exceeded ({}): {}",
            context, error_str
        )),
        Some(500..=599) => PlatformError::Network(format!(
            "Mastodon server error ({}): {}",
            context, error_str
        )),
        Some(_) => {
            PlatformError::Network(format!("Mastodon HTTP error ({}): {}", context, error_str))
        }
        None => {
            if error_lower.contains("unauthorized")
                || error_lower.contains("forbidden")
                || error_lower.contains("token")
            {
                PlatformError::Authentication(format!(
                    "Mastodon authentication failed ({}): {}",
                    context, error_str
                ))
            } else if error_lower.contains("rate limit")
                || error_lower.contains("too many requests")
            {
                PlatformError::RateLimit(format!(
                    "Mastodon rate limit exceeded ({}): {}",
                    context, error_str
                ))
            } else if error_lower.contains("parse")
                || error_lower.contains("json")
                || error_lower.contains("unprocessable")
            {
                PlatformError::Publish(format!(
                    "Mastodon response not usable ({}): {}",
                    context, error_str
                ))
            } else {
                PlatformError::Network(format!("Mastodon error ({}): {}", context, error_str))
            }
        }
    }
}

/// Extract an HTTP status code from an error message, looking for patterns
/// like "HTTP 401", "status 403", or a standalone "422:".
fn extract_http_status(error_str: &str) -> Option<u16> {
    let prefixes = ["HTTP ", "status ", "code: ", "status_code: "];

    for prefix in &prefixes {
        if let Some(pos) = error_str.find(prefix) {
            let after_prefix = &error_str[pos + prefix.len()..];
            if let Some(code_str) = after_prefix.get(0..3) {
                if let Ok(code) = code_str.parse::<u16>() {
                    if (100..=599).contains(&code) {
                        return Some(code);
                    }
                }
            }
        }
    }

    for (i, window) in error_str.as_bytes().windows(4).enumerate() {
        if window[0].is_ascii_digit()
            && window[1].is_ascii_digit()
            && window[2].is_ascii_digit()
            && (window[3] == b':' || window[3] == b' ')
        {
            if let Ok(code_str) = std::str::from_utf8(&window[0..3]) {
                if let Ok(code) = code_str.parse::<u16>() {
                    if (100..=599).contains(&code)
                        && (i == 0 || !error_str.as_bytes()[i - 1].is_ascii_digit())
                    {
                        return Some(code);
                    }
                }
            }
        }
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Link, Platform};
    use chrono::Utc;

    fn test_client() -> MastodonClient {
        MastodonClient::new(
            "https://mastodon.social".to_string(),
            "test-token".to_string(),
            DuplicateCheckConfig::default(),
        )
        .expect("Failed to create client")
    }

    fn post_with(text: &str, links: Vec<Link>) -> Post {
        Post {
            id: "3kabc".to_string(),
            platform: Platform::Bluesky,
            text: text.to_string(),
            created_at: Utc::now(),
            author_id: "did:plc:alice".to_string(),
            media: vec![],
            links,
            in_reply_to_id: None,
            url: "https://bsky.app/profile/alice/post/3kabc".to_string(),
        }
    }

    #[test]
    fn test_client_defaults() {
        let client = test_client();
        assert_eq!(client.name(), "mastodon");
        assert_eq!(client.character_limit(), Some(500));
        assert!(client.account_id.is_none());
    }

    #[test]
    fn test_translate_repairs_truncated_link() {
        let client = test_client();
        let post = post_with(
            "Read example.com/article/lo...",
            vec![Link {
                url: "https://example.com/article/long-path".to_string(),
                display_text: Some("example.com/article/lo...".to_string()),
            }],
        );

        let translated = client.translate(&post);
        assert_eq!(translated, "Read https://example.com/article/long-path");
        assert!(!translated.contains("https://https://"));
    }

    #[test]
    fn test_translate_links_bare_domains() {
        let client = test_client();
        let post = post_with("see docs.rs/regex for details", vec![]);
        assert_eq!(
            client.translate(&post),
            "see https://docs.rs/regex for details"
        );
    }

    #[test]
    fn test_translate_applies_character_limit() {
        let mut client = test_client();
        client.character_limit = 50;

        let post = post_with(&"word ".repeat(40), vec![]);
        let translated = client.translate(&post);
        assert!(translated.chars().count() <= 50);
        assert!(translated.ends_with("..."));
    }

    #[test]
    fn test_translate_adds_no_attribution_marker() {
        let client = test_client();
        let post = post_with("Plain content", vec![]);
        let translated = client.translate(&post);
        assert_eq!(translated, "Plain content");
        assert!(!translated.to_lowercase().contains("bluesky"));
        assert!(!translated.contains("bsky.app"));
    }

    #[test]
    fn test_from_config_empty_token_file() {
        let file = tempfile::NamedTempFile::new().unwrap();
        let config = MastodonConfig {
            instance: "mastodon.social".to_string(),
            token_file: file.path().to_string_lossy().to_string(),
            duplicate_check: DuplicateCheckConfig::default(),
        };

        let result = MastodonClient::from_config(&config);
        match result {
            Err(crate::BluecastError::Platform(PlatformError::Authentication(msg))) => {
                assert!(msg.contains("empty"));
            }
            _ => panic!("Expected authentication error for empty token file"),
        }
    }

    #[test]
    fn test_from_config_instance_url_normalization() {
        use std::io::Write;

        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"token-123\n").unwrap();
        file.flush().unwrap();
        let token_file = file.path().to_string_lossy().to_string();

        let bare = MastodonConfig {
            instance: "mastodon.social".to_string(),
            token_file: token_file.clone(),
            duplicate_check: DuplicateCheckConfig::default(),
        };
        let client = MastodonClient::from_config(&bare).unwrap();
        assert_eq!(client.instance_url, "https://mastodon.social");

        let schemed = MastodonConfig {
            instance: "http://localhost:3000".to_string(),
            token_file,
            duplicate_check: DuplicateCheckConfig::default(),
        };
        let client = MastodonClient::from_config(&schemed).unwrap();
        assert_eq!(client.instance_url, "http://localhost:3000");
    }

    #[test]
    fn test_extension_for_mime() {
        assert_eq!(extension_for_mime(Some("image/jpeg")), "jpg");
        assert_eq!(extension_for_mime(Some("IMAGE/PNG")), "png");
        assert_eq!(extension_for_mime(Some("image/gif")), "gif");
        assert_eq!(extension_for_mime(Some("image/webp")), "webp");
        assert_eq!(extension_for_mime(Some("video/mp4")), "bin");
        assert_eq!(extension_for_mime(None), "bin");
    }

    #[test]
    fn test_extract_http_status_patterns() {
        assert_eq!(extract_http_status("HTTP 401 Unauthorized"), Some(401));
        assert_eq!(extract_http_status("status 404 not found"), Some(404));
        assert_eq!(extract_http_status("Error: 422: rejected"), Some(422));
        assert_eq!(extract_http_status("code: 429"), Some(429));
        assert_eq!(extract_http_status("Network error"), None);
        assert_eq!(extract_http_status("HTTP 999"), None);
        assert_eq!(extract_http_status("1234"), None);
    }

    #[test]
    fn test_duplicate_threshold_is_configurable() {
        let client = MastodonClient::new(
            "https://mastodon.social".to_string(),
            "token".to_string(),
            DuplicateCheckConfig {
                window: 40,
                threshold: 0.95,
            },
        )
        .unwrap();

        assert_eq!(client.duplicate_check.window, 40);
        assert!((client.duplicate_check.threshold - 0.95).abs() < f64::EPSILON);
    }
}
