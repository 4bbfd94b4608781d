//! Platform abstraction and implementations
//!
//! Two traits split the sync pipeline at its natural seam: a source platform
//! that posts are read from, and a destination platform they are written to.
//! Implementations handle authentication, API-shape normalization, and
//! platform-specific constraints; the orchestrator only sees normalized
//! [`Post`](crate::types::Post) values and [`PublishOutcome`]s.

use async_trait::async_trait;

use crate::error::Result;
use crate::types::Post;

pub mod bluesky;
pub mod mastodon;

// Mock platforms are available for all builds (not just tests) to support
// integration tests.
pub mod mock;

/// Identity of a post on the destination platform.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DestinationRef {
    pub id: String,
    /// Permalink, when the API returned one
    pub url: Option<String>,
}

/// Result of a publish attempt that did not error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PublishOutcome {
    /// A new post was created on the destination.
    Published(DestinationRef),
    /// An equivalent post already existed; nothing was created. This is a
    /// normal outcome: the caller should record the post as synced so it is
    /// not retried.
    Duplicate(DestinationRef),
}

impl PublishOutcome {
    pub fn destination(&self) -> &DestinationRef {
        match self {
            Self::Published(dest) | Self::Duplicate(dest) => dest,
        }
    }

    pub fn is_duplicate(&self) -> bool {
        matches!(self, Self::Duplicate(_))
    }
}

/// The platform posts are read from.
#[async_trait]
pub trait SourcePlatform: Send + Sync {
    /// Establish a session with the platform.
    ///
    /// # Errors
    ///
    /// Returns `PlatformError::Authentication` on bad credentials; this is
    /// fatal for the run.
    async fn authenticate(&mut self) -> Result<()>;

    /// Fetch the authenticated account's recent posts.
    ///
    /// Returns up to `limit` posts created within the last `lookback_hours`,
    /// newest-first as the API delivers them; callers re-order as needed.
    /// Reposts and replies to other accounts never appear in the result.
    ///
    /// # Errors
    ///
    /// Returns `PlatformError::Fetch` on any API or network failure. A failed
    /// fetch means candidates cannot be determined safely; callers must treat
    /// it as a fatal condition, never as "no new posts".
    async fn fetch_recent_posts(&self, lookback_hours: i64, limit: usize) -> Result<Vec<Post>>;

    /// Lowercase platform identifier, e.g. "bluesky".
    fn name(&self) -> &str;
}

/// The platform posts are written to.
#[async_trait]
pub trait DestinationPlatform: Send + Sync {
    /// Verify credentials and prepare the client for publishing.
    ///
    /// # Errors
    ///
    /// Returns `PlatformError::Authentication` on bad credentials; fatal for
    /// the run.
    async fn authenticate(&mut self) -> Result<()>;

    /// Publish a translated post, optionally as a reply to an existing
    /// destination post.
    ///
    /// Implementations own content translation (length limits, link repair)
    /// and media re-upload, and run a content-similarity duplicate check
    /// before creating anything; a high-confidence match returns
    /// [`PublishOutcome::Duplicate`] with the existing post's identity.
    ///
    /// # Errors
    ///
    /// Per-post failures (`Translation`, `Publish`, `RateLimit`, `Network`)
    /// are recoverable: the caller records them and moves on to the next
    /// post.
    async fn publish(&self, post: &Post, in_reply_to_id: Option<&str>) -> Result<PublishOutcome>;

    /// Lowercase platform identifier, e.g. "mastodon".
    fn name(&self) -> &str;

    /// Maximum post length in characters, or `None` if unbounded.
    fn character_limit(&self) -> Option<usize>;
}
