//! Mock platform implementations for testing
//!
//! Configurable stand-ins for the source and destination platforms used by
//! orchestrator tests: scripted successes, failures, and duplicates, with
//! shared logs the test keeps a handle on after the engine takes ownership
//! of the platform.

use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use crate::error::{PlatformError, Result};
use crate::platforms::{DestinationPlatform, DestinationRef, PublishOutcome, SourcePlatform};
use crate::types::Post;

/// A publish the mock destination accepted or skipped as duplicate.
#[derive(Debug, Clone)]
pub struct PublishedPost {
    pub source_id: String,
    pub text: String,
    pub in_reply_to: Option<String>,
    pub destination_id: String,
    pub duplicate: bool,
}

/// Shared view into what a mock destination saw. Clone it before handing the
/// platform to the engine.
#[derive(Debug, Clone, Default)]
pub struct PublishLog {
    attempts: Arc<Mutex<Vec<String>>>,
    published: Arc<Mutex<Vec<PublishedPost>>>,
}

impl PublishLog {
    /// Source ids of every publish attempt, including failed ones.
    pub fn attempted_ids(&self) -> Vec<String> {
        self.attempts.lock().unwrap().clone()
    }

    pub fn publish_count(&self) -> usize {
        self.attempts.lock().unwrap().len()
    }

    /// Successful publishes and duplicate-skips, in order.
    pub fn published(&self) -> Vec<PublishedPost> {
        self.published.lock().unwrap().clone()
    }
}

/// Mock source platform serving a fixed set of posts.
pub struct MockSourcePlatform {
    posts: Vec<Post>,
    auth_error: Option<String>,
    fetch_error: Option<String>,
    authenticated: bool,
}

impl MockSourcePlatform {
    pub fn with_posts(posts: Vec<Post>) -> Self {
        Self {
            posts,
            auth_error: None,
            fetch_error: None,
            authenticated: false,
        }
    }

    pub fn auth_failure(error: &str) -> Self {
        Self {
            posts: vec![],
            auth_error: Some(error.to_string()),
            fetch_error: None,
            authenticated: false,
        }
    }

    pub fn fetch_failure(error: &str) -> Self {
        Self {
            posts: vec![],
            auth_error: None,
            fetch_error: Some(error.to_string()),
            authenticated: false,
        }
    }
}

#[async_trait]
impl SourcePlatform for MockSourcePlatform {
    async fn authenticate(&mut self) -> Result<()> {
        if let Some(error) = &self.auth_error {
            return Err(PlatformError::Authentication(error.clone()).into());
        }
        self.authenticated = true;
        Ok(())
    }

    async fn fetch_recent_posts(&self, _lookback_hours: i64, limit: usize) -> Result<Vec<Post>> {
        if !self.authenticated {
            return Err(PlatformError::Authentication("Not authenticated".to_string()).into());
        }
        if let Some(error) = &self.fetch_error {
            return Err(PlatformError::Fetch(error.clone()).into());
        }
        Ok(self.posts.iter().take(limit).cloned().collect())
    }

    fn name(&self) -> &str {
        "mock-source"
    }
}

/// Mock destination platform with scripted per-post behavior.
pub struct MockDestinationPlatform {
    auth_error: Option<String>,
    /// Source ids whose publish fails with a generic publish error
    fail_ids: HashSet<String>,
    /// Source ids whose publish fails with a rate-limit error
    rate_limited_ids: HashSet<String>,
    /// Source ids reported as already present (duplicate-skip)
    duplicate_ids: HashSet<String>,
    log: PublishLog,
    sequence: Arc<Mutex<usize>>,
    authenticated: bool,
}

impl MockDestinationPlatform {
    pub fn new() -> Self {
        Self {
            auth_error: None,
            fail_ids: HashSet::new(),
            rate_limited_ids: HashSet::new(),
            duplicate_ids: HashSet::new(),
            log: PublishLog::default(),
            sequence: Arc::new(Mutex::new(0)),
            authenticated: false,
        }
    }

    pub fn auth_failure(error: &str) -> Self {
        Self {
            auth_error: Some(error.to_string()),
            ..Self::new()
        }
    }

    /// Fail publishing the given source id with a publish error.
    pub fn failing_on(mut self, source_id: &str) -> Self {
        self.fail_ids.insert(source_id.to_string());
        self
    }

    /// Fail publishing the given source id with a rate-limit error.
    pub fn rate_limiting(mut self, source_id: &str) -> Self {
        self.rate_limited_ids.insert(source_id.to_string());
        self
    }

    /// Report the given source id as already present on the destination.
    pub fn duplicating(mut self, source_id: &str) -> Self {
        self.duplicate_ids.insert(source_id.to_string());
        self
    }

    /// Handle onto the publish log; keep a clone before moving the platform.
    pub fn log(&self) -> PublishLog {
        self.log.clone()
    }
}

impl Default for MockDestinationPlatform {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DestinationPlatform for MockDestinationPlatform {
    async fn authenticate(&mut self) -> Result<()> {
        if let Some(error) = &self.auth_error {
            return Err(PlatformError::Authentication(error.clone()).into());
        }
        self.authenticated = true;
        Ok(())
    }

    async fn publish(&self, post: &Post, in_reply_to_id: Option<&str>) -> Result<PublishOutcome> {
        if !self.authenticated {
            return Err(PlatformError::Authentication("Not authenticated".to_string()).into());
        }

        self.log.attempts.lock().unwrap().push(post.id.clone());

        if self.fail_ids.contains(&post.id) {
            return Err(PlatformError::Publish(format!(
                "Scripted publish failure for {}",
                post.id
            ))
            .into());
        }
        if self.rate_limited_ids.contains(&post.id) {
            return Err(
                PlatformError::RateLimit(format!("Scripted rate limit for {}", post.id)).into(),
            );
        }

        if self.duplicate_ids.contains(&post.id) {
            let destination_id = format!("existing-{}", post.id);
            self.log.published.lock().unwrap().push(PublishedPost {
                source_id: post.id.clone(),
                text: post.text.clone(),
                in_reply_to: in_reply_to_id.map(String::from),
                destination_id: destination_id.clone(),
                duplicate: true,
            });
            return Ok(PublishOutcome::Duplicate(DestinationRef {
                id: destination_id,
                url: None,
            }));
        }

        let destination_id = {
            let mut seq = self.sequence.lock().unwrap();
            *seq += 1;
            format!("masto-{}", seq)
        };

        self.log.published.lock().unwrap().push(PublishedPost {
            source_id: post.id.clone(),
            text: post.text.clone(),
            in_reply_to: in_reply_to_id.map(String::from),
            destination_id: destination_id.clone(),
            duplicate: false,
        });

        Ok(PublishOutcome::Published(DestinationRef {
            url: Some(format!("https://mock.example/@user/{}", destination_id)),
            id: destination_id,
        }))
    }

    fn name(&self) -> &str {
        "mock-destination"
    }

    fn character_limit(&self) -> Option<usize> {
        Some(500)
    }
}
