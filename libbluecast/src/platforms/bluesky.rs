//! Bluesky platform implementation
//!
//! Speaks XRPC directly over reqwest. API responses are treated as
//! partially-unknown payloads: every field is navigated defensively with
//! explicit defaults, so an upstream shape change degrades a single post
//! instead of panicking the run.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use reqwest::StatusCode;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::config::BlueskyConfig;
use crate::error::{PlatformError, Result};
use crate::platforms::SourcePlatform;
use crate::types::{Link, Media, Platform, Post};

const HTTP_TIMEOUT_SECS: u64 = 30;
const FEED_PAGE_MAX: usize = 100;

/// Which post dimensions to extract when normalizing.
#[derive(Debug, Clone, Copy)]
pub struct ContentFilter {
    pub include_threads: bool,
    pub include_media: bool,
    pub include_links: bool,
}

impl Default for ContentFilter {
    fn default() -> Self {
        Self {
            include_threads: true,
            include_media: true,
            include_links: true,
        }
    }
}

#[derive(Debug, Clone)]
struct Session {
    did: String,
    access_jwt: String,
}

/// Client for the account posts are read from.
pub struct BlueskyClient {
    http: reqwest::Client,
    service: String,
    handle: String,
    app_password: String,
    filter: ContentFilter,
    session: Option<Session>,
}

impl BlueskyClient {
    /// Create a client from configuration, reading the app password from the
    /// configured file.
    pub fn from_config(config: &BlueskyConfig, filter: ContentFilter) -> Result<Self> {
        let password_path = shellexpand::full(&config.app_password_file).map_err(|e| {
            PlatformError::Authentication(format!("Failed to expand app password path: {}", e))
        })?;

        let app_password = std::fs::read_to_string(password_path.as_ref())
            .map_err(|e| {
                PlatformError::Authentication(format!(
                    "Failed to read Bluesky app password file: {}",
                    e
                ))
            })?
            .trim()
            .to_string();

        if app_password.is_empty() {
            return Err(PlatformError::Authentication(
                "Bluesky app password file is empty".to_string(),
            )
            .into());
        }

        let http = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(HTTP_TIMEOUT_SECS))
            .user_agent(format!("bluecast/{}", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| PlatformError::Network(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            http,
            service: config.service.trim_end_matches('/').to_string(),
            handle: config.handle.clone(),
            app_password,
            filter,
            session: None,
        })
    }

    fn xrpc(&self, method: &str) -> String {
        format!("{}/xrpc/{}", self.service, method)
    }

    /// Resolve a blob reference to a directly fetchable URL.
    fn blob_url(&self, did: &str, cid: &str) -> String {
        format!(
            "{}/xrpc/com.atproto.sync.getBlob?did={}&cid={}",
            self.service, did, cid
        )
    }

    /// Decide whether a feed item is a candidate, and normalize it if so.
    ///
    /// Excluded: reposts, posts outside the lookback window, replies when
    /// thread sync is off, and replies whose parent is not authored by the
    /// account (only true self-threads survive).
    fn normalize_feed_item(
        &self,
        item: &Value,
        self_did: &str,
        cutoff: DateTime<Utc>,
    ) -> Option<Post> {
        // Reposts carry a `reason`; skip them.
        if item.get("reason").map(|r| !r.is_null()).unwrap_or(false) {
            return None;
        }

        let post = item.get("post")?;
        let uri = post.get("uri").and_then(Value::as_str)?;
        let record = post.get("record")?;

        let created_at = match record
            .get("createdAt")
            .and_then(Value::as_str)
            .and_then(parse_timestamp)
        {
            Some(ts) => ts,
            None => {
                warn!("Skipping post with missing or unparseable createdAt: {}", uri);
                return None;
            }
        };
        if created_at < cutoff {
            return None;
        }

        let in_reply_to_id = match self.thread_parent(item, record, self_did) {
            ThreadLink::NotAReply => None,
            ThreadLink::SelfReply(parent) => {
                info!("Including thread post (self-reply): {}", uri);
                Some(parent)
            }
            ThreadLink::Excluded => return None,
        };

        let rkey = uri.rsplit('/').next().unwrap_or(uri).to_string();
        let text = record
            .get("text")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();

        let author_did = post
            .pointer("/author/did")
            .and_then(Value::as_str)
            .unwrap_or(self_did);
        let author_handle = post
            .pointer("/author/handle")
            .and_then(Value::as_str)
            .unwrap_or(&self.handle);

        let media = if self.filter.include_media {
            self.extract_media(record, author_did)
        } else {
            vec![]
        };
        let links = if self.filter.include_links {
            extract_links(record, &text)
        } else {
            vec![]
        };

        Some(Post {
            id: rkey.clone(),
            platform: Platform::Bluesky,
            text,
            created_at,
            author_id: author_did.to_string(),
            media,
            links,
            in_reply_to_id,
            url: format!("https://bsky.app/profile/{}/post/{}", author_handle, rkey),
        })
    }

    /// Classify a feed item's reply linkage.
    fn thread_parent(&self, item: &Value, record: &Value, self_did: &str) -> ThreadLink {
        let is_reply = record.get("reply").map(|r| !r.is_null()).unwrap_or(false);
        if !is_reply {
            return ThreadLink::NotAReply;
        }
        if !self.filter.include_threads {
            return ThreadLink::Excluded;
        }

        // The hydrated feed view carries the parent post with its author; the
        // raw record only has strong refs. Replies whose parent author cannot
        // be determined are excluded to be safe.
        let parent = match item.pointer("/reply/parent") {
            Some(parent) => parent,
            None => return ThreadLink::Excluded,
        };
        let parent_author = parent.pointer("/author/did").and_then(Value::as_str);
        if parent_author != Some(self_did) {
            return ThreadLink::Excluded;
        }

        match parent
            .get("uri")
            .and_then(Value::as_str)
            .and_then(|uri| uri.rsplit('/').next())
        {
            Some(rkey) => ThreadLink::SelfReply(rkey.to_string()),
            None => ThreadLink::Excluded,
        }
    }

    /// Pull image attachments out of the record embed, resolving blob refs
    /// into fetchable URLs.
    fn extract_media(&self, record: &Value, author_did: &str) -> Vec<Media> {
        let mut media = Vec::new();

        let images = record
            .pointer("/embed/images")
            .or_else(|| record.pointer("/embed/media/images"))
            .and_then(Value::as_array);

        if let Some(images) = images {
            for img in images {
                let blob = match img.get("image") {
                    Some(blob) => blob,
                    None => continue,
                };
                let cid = match blob.pointer("/ref/$link").and_then(Value::as_str) {
                    Some(cid) => cid,
                    None => {
                        debug!("Image embed without resolvable blob ref, skipping");
                        continue;
                    }
                };

                let alt_text = img
                    .get("alt")
                    .and_then(Value::as_str)
                    .filter(|alt| !alt.is_empty())
                    .map(String::from);
                let mime_type = blob
                    .get("mimeType")
                    .and_then(Value::as_str)
                    .map(String::from);

                media.push(Media {
                    url: self.blob_url(author_did, cid),
                    alt_text,
                    mime_type,
                });
            }
        }

        media
    }
}

enum ThreadLink {
    NotAReply,
    SelfReply(String),
    Excluded,
}

#[async_trait]
impl SourcePlatform for BlueskyClient {
    async fn authenticate(&mut self) -> Result<()> {
        debug!("Creating Bluesky session for handle: {}", self.handle);

        let response = self
            .http
            .post(self.xrpc("com.atproto.server.createSession"))
            .json(&serde_json::json!({
                "identifier": self.handle,
                "password": self.app_password,
            }))
            .send()
            .await
            .map_err(|e| map_request_error(e, "create session"))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(map_session_error(status, &body).into());
        }

        let payload: Value = response.json().await.map_err(|e| {
            PlatformError::Authentication(format!("Malformed session response: {}", e))
        })?;

        let did = payload
            .get("did")
            .and_then(Value::as_str)
            .ok_or_else(|| {
                PlatformError::Authentication("Session response missing did".to_string())
            })?
            .to_string();
        let access_jwt = payload
            .get("accessJwt")
            .and_then(Value::as_str)
            .ok_or_else(|| {
                PlatformError::Authentication("Session response missing access token".to_string())
            })?
            .to_string();

        self.session = Some(Session { did, access_jwt });
        info!("Authenticated with Bluesky as {}", self.handle);
        Ok(())
    }

    async fn fetch_recent_posts(&self, lookback_hours: i64, limit: usize) -> Result<Vec<Post>> {
        let session = self.session.as_ref().ok_or_else(|| {
            PlatformError::Authentication("Not authenticated with Bluesky".to_string())
        })?;

        let page = limit.clamp(1, FEED_PAGE_MAX).to_string();
        let response = self
            .http
            .get(self.xrpc("app.bsky.feed.getAuthorFeed"))
            .bearer_auth(&session.access_jwt)
            .query(&[("actor", session.did.as_str()), ("limit", page.as_str())])
            .send()
            .await
            .map_err(|e| map_request_error(e, "fetch author feed"))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(map_fetch_error(status, &body).into());
        }

        let payload: Value = response
            .json()
            .await
            .map_err(|e| PlatformError::Fetch(format!("Malformed feed response: {}", e)))?;

        let feed = match payload.get("feed").and_then(Value::as_array) {
            Some(feed) => feed,
            None => {
                warn!("Author feed response carried no feed array");
                return Ok(vec![]);
            }
        };

        let cutoff = Utc::now() - Duration::hours(lookback_hours);
        let posts: Vec<Post> = feed
            .iter()
            .filter_map(|item| self.normalize_feed_item(item, &session.did, cutoff))
            .take(limit)
            .collect();

        debug!(
            "Fetched {} feed items, {} candidates within {}h window",
            feed.len(),
            posts.len(),
            lookback_hours
        );
        Ok(posts)
    }

    fn name(&self) -> &str {
        "bluesky"
    }
}

fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

/// Pull links out of richtext facets and the external-card embed. Facet URIs
/// are the full URLs; the byte-sliced display text is kept only for matching
/// against the post body.
fn extract_links(record: &Value, text: &str) -> Vec<Link> {
    let mut links = Vec::new();

    if let Some(facets) = record.get("facets").and_then(Value::as_array) {
        for facet in facets {
            let features = match facet.get("features").and_then(Value::as_array) {
                Some(features) => features,
                None => continue,
            };
            for feature in features {
                if feature.get("$type").and_then(Value::as_str)
                    != Some("app.bsky.richtext.facet#link")
                {
                    continue;
                }
                let uri = match feature.get("uri").and_then(Value::as_str) {
                    Some(uri) => uri,
                    None => continue,
                };
                links.push(Link {
                    url: uri.to_string(),
                    display_text: facet_display_text(facet, text),
                });
            }
        }
    }

    if let Some(ext) = record.pointer("/embed/external") {
        if let Some(uri) = ext.get("uri").and_then(Value::as_str) {
            if !links.iter().any(|l| l.url == uri) {
                links.push(Link {
                    url: uri.to_string(),
                    display_text: ext.get("title").and_then(Value::as_str).map(String::from),
                });
            }
        }
    }

    links
}

/// The slice of the post text a facet covers, if its byte range is sound.
fn facet_display_text(facet: &Value, text: &str) -> Option<String> {
    let start = facet.pointer("/index/byteStart").and_then(Value::as_u64)? as usize;
    let end = facet.pointer("/index/byteEnd").and_then(Value::as_u64)? as usize;
    text.as_bytes()
        .get(start..end)
        .and_then(|bytes| std::str::from_utf8(bytes).ok())
        .map(String::from)
}

fn map_request_error(error: reqwest::Error, context: &str) -> PlatformError {
    if error.is_timeout() || error.is_connect() {
        PlatformError::Network(format!(
            "Network error reaching Bluesky during {}: {}",
            context, error
        ))
    } else {
        PlatformError::Fetch(format!("Bluesky request failed during {}: {}", context, error))
    }
}

fn map_session_error(status: StatusCode, body: &str) -> PlatformError {
    match status.as_u16() {
        429 => PlatformError::RateLimit(format!(
            "Bluesky rate limit exceeded during authentication: {}",
            snippet(body)
        )),
        500..=599 => PlatformError::Network(format!(
            "Bluesky server error during authentication ({}): {}",
            status,
            snippet(body)
        )),
        _ => PlatformError::Authentication(format!(
            "Bluesky rejected the session request ({}): {}. Check your handle and app password.",
            status,
            snippet(body)
        )),
    }
}

fn map_fetch_error(status: StatusCode, body: &str) -> PlatformError {
    match status.as_u16() {
        401 | 403 => PlatformError::Authentication(format!(
            "Bluesky session expired or invalid ({}): {}",
            status,
            snippet(body)
        )),
        429 => PlatformError::RateLimit(format!(
            "Bluesky rate limit exceeded while fetching posts: {}",
            snippet(body)
        )),
        500..=599 => PlatformError::Network(format!(
            "Bluesky server error while fetching posts ({}): {}",
            status,
            snippet(body)
        )),
        _ => PlatformError::Fetch(format!(
            "Bluesky feed request failed ({}): {}",
            status,
            snippet(body)
        )),
    }
}

/// First part of an error body, enough to diagnose without flooding logs.
fn snippet(body: &str) -> String {
    body.chars().take(200).collect()
}
