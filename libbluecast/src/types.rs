//! Core types for Bluecast
//!
//! The normalized post model shared between the source and destination
//! platforms. Adapters convert their API payloads into these types at the
//! boundary; everything past the boundary works on this shape only.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// The platform a post belongs to.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum Platform {
    /// The source platform posts are read from.
    Bluesky,
    /// The destination platform posts are written to.
    Mastodon,
}

impl Platform {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Bluesky => "bluesky",
            Self::Mastodon => "mastodon",
        }
    }
}

impl std::fmt::Display for Platform {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A normalized post, independent of either platform's API shape.
///
/// `id` is unique per platform (for Bluesky the record key of the post URI).
/// `created_at` is always timezone-aware UTC.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Post {
    pub id: String,
    pub platform: Platform,
    pub text: String,
    pub created_at: DateTime<Utc>,
    pub author_id: String,
    /// Ordered media attachments; fetched and re-uploaded on the
    /// destination, never referenced by remote URL.
    #[serde(default)]
    pub media: Vec<Media>,
    /// Ordered links with full, untruncated URLs.
    #[serde(default)]
    pub links: Vec<Link>,
    /// Set only when this post replies to another post by the same author
    /// (a self-thread). Replies to other accounts never reach this model.
    pub in_reply_to_id: Option<String>,
    /// Canonical permalink.
    pub url: String,
}

impl Post {
    /// Whether this post continues a self-thread.
    pub fn is_thread_reply(&self) -> bool {
        self.in_reply_to_id.is_some()
    }
}

/// A media attachment owned by its post.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Media {
    /// Directly fetchable source location.
    pub url: String,
    pub alt_text: Option<String>,
    pub mime_type: Option<String>,
}

/// A link attached to a post.
///
/// `url` is always the full URL resolved from the source platform's link
/// metadata. `display_text` is whatever the source platform showed inline,
/// which may be truncated; it exists for matching only and must never be
/// used as a URL.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Link {
    pub url: String,
    pub display_text: Option<String>,
}
