//! Synchronization orchestration
//!
//! One sync pass: fetch candidates from the source, filter against the sync
//! ledger, order and group self-threads, publish to the destination oldest
//! first with parent-before-child sequencing, and persist state after every
//! successful publish so an interrupted run never reposts.

use std::collections::{HashMap, HashSet};
use tracing::{debug, error, info, warn};

use crate::config::{Config, SyncConfig};
use crate::error::Result;
use crate::platforms::bluesky::{BlueskyClient, ContentFilter};
use crate::platforms::mastodon::MastodonClient;
use crate::platforms::{DestinationPlatform, SourcePlatform};
use crate::state::SyncState;
use crate::types::Post;

/// Page size requested from the source. The per-run cap applies to thread
/// roots after grouping, so the fetch is deliberately generous.
const FETCH_LIMIT: usize = 100;

/// Per-run behavior knobs, lifted out of [`SyncConfig`].
#[derive(Debug, Clone)]
pub struct SyncOptions {
    pub lookback_hours: i64,
    pub max_posts_per_run: usize,
    pub include_threads: bool,
    pub dry_run: bool,
}

impl SyncOptions {
    pub fn from_config(sync: &SyncConfig, dry_run: bool) -> Self {
        Self {
            lookback_hours: sync.lookback_hours,
            max_posts_per_run: sync.max_posts_per_run,
            include_threads: sync.include_threads,
            dry_run,
        }
    }
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self::from_config(&SyncConfig::default(), false)
    }
}

/// What happened to one selected post.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    Published {
        destination_id: String,
        url: Option<String>,
    },
    /// An equivalent post already existed on the destination; recorded as
    /// synced so it is not retried.
    Duplicate { destination_id: String },
    /// Dry-run simulation of a successful publish.
    DryRun,
    Failed { error: String },
    /// Skipped because an ancestor in its thread failed this run.
    SkippedParentFailed { parent_id: String },
}

#[derive(Debug, Clone)]
pub struct PostOutcome {
    pub source_id: String,
    pub outcome: Outcome,
}

/// Summary of one sync pass. Produced fresh each run, never persisted.
#[derive(Debug, Default)]
pub struct RunReport {
    /// Candidates the source returned within the lookback window
    pub fetched: usize,
    /// Candidates dropped because the ledger already has them
    pub already_synced: usize,
    /// Posts actually walked by the publish loop
    pub selected: usize,
    /// Thread roots left for the next run by the per-run cap
    pub deferred: usize,
    pub published: usize,
    pub duplicates: usize,
    pub failed: usize,
    /// Thread descendants skipped because their parent failed
    pub skipped: usize,
    /// A state save failed mid-run; durability is degraded until a save
    /// succeeds, and only the content-similarity guard protects a re-run
    pub degraded: bool,
    pub outcomes: Vec<PostOutcome>,
}

impl RunReport {
    pub fn summary(&self) -> String {
        let mut line = format!(
            "fetched {}, already synced {}, published {}, duplicates {}, failed {}, skipped {}, deferred {}",
            self.fetched,
            self.already_synced,
            self.published,
            self.duplicates,
            self.failed,
            self.skipped,
            self.deferred,
        );
        if self.degraded {
            line.push_str(" (degraded: state save failed)");
        }
        line
    }
}

/// The orchestrator. Owns the state store exclusively; platforms never write
/// to it.
pub struct SyncEngine {
    source: Box<dyn SourcePlatform>,
    destination: Box<dyn DestinationPlatform>,
    state: SyncState,
    options: SyncOptions,
}

impl SyncEngine {
    pub fn new(
        source: Box<dyn SourcePlatform>,
        destination: Box<dyn DestinationPlatform>,
        state: SyncState,
        options: SyncOptions,
    ) -> Self {
        Self {
            source,
            destination,
            state,
            options,
        }
    }

    /// Build an engine wired to the real platforms from configuration.
    pub fn from_config(config: &Config, dry_run: bool) -> Result<Self> {
        let filter = ContentFilter {
            include_threads: config.sync.include_threads,
            include_media: config.sync.include_media,
            include_links: config.sync.include_links,
        };
        let source = BlueskyClient::from_config(&config.bluesky, filter)?;
        let destination = MastodonClient::from_config(&config.mastodon)?;
        let state = SyncState::load(config.state_path()?);

        Ok(Self::new(
            Box::new(source),
            Box::new(destination),
            state,
            SyncOptions::from_config(&config.sync, dry_run),
        ))
    }

    pub fn state(&self) -> &SyncState {
        &self.state
    }

    /// Execute one synchronization pass.
    ///
    /// # Errors
    ///
    /// Returns an error only for fatal conditions: platform authentication
    /// failure or a failed candidate fetch. Per-post failures are recorded in
    /// the report and do not abort the run.
    pub async fn run(&mut self) -> Result<RunReport> {
        self.source.authenticate().await?;
        if self.options.dry_run {
            info!("Dry run: destination will not be contacted");
        } else {
            self.destination.authenticate().await?;
        }

        let candidates = self
            .source
            .fetch_recent_posts(self.options.lookback_hours, FETCH_LIMIT)
            .await?;

        let mut report = RunReport {
            fetched: candidates.len(),
            ..Default::default()
        };
        info!("Found {} recent posts on {}", report.fetched, self.source.name());

        let new_posts: Vec<Post> = candidates
            .into_iter()
            .filter(|post| {
                if self.state.is_synced(&post.id) {
                    debug!("Skipping already-synced post {}", post.id);
                    false
                } else {
                    true
                }
            })
            .collect();
        report.already_synced = report.fetched - new_posts.len();
        info!("{} posts not yet synced", new_posts.len());

        let groups = group_into_threads(new_posts, self.options.include_threads);
        let total_groups = groups.len();
        let cap = self.options.max_posts_per_run;
        report.deferred = total_groups.saturating_sub(cap);
        if report.deferred > 0 {
            info!(
                "Per-run cap {} reached, deferring {} thread roots to the next run",
                cap, report.deferred
            );
        }

        // Destination ids assigned this run, for threading children under
        // parents published moments ago.
        let mut published_this_run: HashMap<String, String> = HashMap::new();
        let mut failed_ids: HashSet<String> = HashSet::new();

        for group in groups.into_iter().take(cap) {
            for post in group {
                report.selected += 1;

                if let Some(parent_id) = post
                    .in_reply_to_id
                    .as_deref()
                    .filter(|parent| failed_ids.contains(*parent))
                {
                    warn!(
                        "Skipping {} because its thread parent {} failed",
                        post.id, parent_id
                    );
                    // Descendants of this post cascade the same way.
                    let parent_id = parent_id.to_string();
                    failed_ids.insert(post.id.clone());
                    report.skipped += 1;
                    report.outcomes.push(PostOutcome {
                        source_id: post.id,
                        outcome: Outcome::SkippedParentFailed { parent_id },
                    });
                    continue;
                }

                let parent_destination: Option<String> =
                    post.in_reply_to_id.as_deref().and_then(|parent| {
                        published_this_run.get(parent).cloned().or_else(|| {
                            self.state.destination_id_for(parent).map(String::from)
                        })
                    });
                if post.in_reply_to_id.is_some() && parent_destination.is_none() {
                    warn!(
                        "No destination parent known for {}, posting unthreaded",
                        post.id
                    );
                }

                if self.options.dry_run {
                    info!(
                        "[dry run] Would publish {} ({} chars{})",
                        post.id,
                        post.text.chars().count(),
                        parent_destination
                            .as_deref()
                            .map(|p| format!(", reply to {}", p))
                            .unwrap_or_default(),
                    );
                    published_this_run.insert(post.id.clone(), format!("dry-run-{}", post.id));
                    report.published += 1;
                    report.outcomes.push(PostOutcome {
                        source_id: post.id,
                        outcome: Outcome::DryRun,
                    });
                    continue;
                }

                info!("Syncing post {} to {}", post.id, self.destination.name());
                match self
                    .destination
                    .publish(&post, parent_destination.as_deref())
                    .await
                {
                    Ok(outcome) => {
                        let destination = outcome.destination().clone();

                        // Persist immediately; a crash after this point must
                        // not repost. Duplicates are marked too so they stop
                        // being retried.
                        if let Err(e) = self.state.mark_synced(&post.id, &destination.id) {
                            error!(
                                "State save failed after syncing {}; continuing degraded: {}",
                                post.id, e
                            );
                            report.degraded = true;
                        }
                        published_this_run.insert(post.id.clone(), destination.id.clone());

                        if outcome.is_duplicate() {
                            info!("Post {} already on destination as {}", post.id, destination.id);
                            report.duplicates += 1;
                            report.outcomes.push(PostOutcome {
                                source_id: post.id,
                                outcome: Outcome::Duplicate {
                                    destination_id: destination.id,
                                },
                            });
                        } else {
                            report.published += 1;
                            report.outcomes.push(PostOutcome {
                                source_id: post.id,
                                outcome: Outcome::Published {
                                    destination_id: destination.id,
                                    url: destination.url,
                                },
                            });
                        }
                    }
                    Err(e) => {
                        warn!("Failed to sync {}: {}", post.id, e);
                        failed_ids.insert(post.id.clone());
                        report.failed += 1;
                        report.outcomes.push(PostOutcome {
                            source_id: post.id,
                            outcome: Outcome::Failed {
                                error: e.to_string(),
                            },
                        });
                    }
                }
            }
        }

        info!("Sync pass complete: {}", report.summary());
        Ok(report)
    }
}

/// Order candidates oldest-first and group self-thread replies under their
/// root, so threads publish parent-before-child regardless of fetch order.
///
/// A reply whose parent is not in the candidate set (already synced, or
/// outside the window) roots its own group. With thread sync disabled,
/// replies are removed entirely. Each returned group lists its members
/// oldest-first, and groups are ordered by their oldest member.
fn group_into_threads(mut posts: Vec<Post>, include_threads: bool) -> Vec<Vec<Post>> {
    if !include_threads {
        posts.retain(|post| post.in_reply_to_id.is_none());
    }
    posts.sort_by(|a, b| a.created_at.cmp(&b.created_at));

    let candidate_ids: HashSet<String> = posts.iter().map(|p| p.id.clone()).collect();
    let parent_of: HashMap<String, String> = posts
        .iter()
        .filter_map(|p| p.in_reply_to_id.clone().map(|parent| (p.id.clone(), parent)))
        .collect();

    // Walk up the reply chain while the parent is still a candidate. Bounded
    // by the candidate count so a malformed cycle cannot loop forever.
    let resolve_root = |id: &str| -> String {
        let mut current = id.to_string();
        for _ in 0..candidate_ids.len() {
            match parent_of.get(&current) {
                Some(parent) if candidate_ids.contains(parent) && parent != &current => {
                    current = parent.clone();
                }
                _ => break,
            }
        }
        current
    };

    let mut order: Vec<String> = Vec::new();
    let mut members: HashMap<String, Vec<Post>> = HashMap::new();
    for post in posts {
        let root = resolve_root(&post.id);
        if !members.contains_key(&root) {
            order.push(root.clone());
        }
        members.entry(root).or_default().push(post);
    }

    order
        .into_iter()
        .filter_map(|root| members.remove(&root))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Platform;
    use chrono::{Duration, Utc};

    fn post_at(id: &str, minutes_ago: i64, reply_to: Option<&str>) -> Post {
        Post {
            id: id.to_string(),
            platform: Platform::Bluesky,
            text: format!("content of {}", id),
            created_at: Utc::now() - Duration::minutes(minutes_ago),
            author_id: "did:plc:alice".to_string(),
            media: vec![],
            links: vec![],
            in_reply_to_id: reply_to.map(String::from),
            url: format!("https://bsky.app/profile/alice/post/{}", id),
        }
    }

    fn ids(group: &[Post]) -> Vec<&str> {
        group.iter().map(|p| p.id.as_str()).collect()
    }

    #[test]
    fn test_grouping_orders_oldest_first() {
        let groups = group_into_threads(
            vec![
                post_at("newest", 1, None),
                post_at("oldest", 60, None),
                post_at("middle", 30, None),
            ],
            true,
        );

        assert_eq!(groups.len(), 3);
        assert_eq!(ids(&groups[0]), ["oldest"]);
        assert_eq!(ids(&groups[1]), ["middle"]);
        assert_eq!(ids(&groups[2]), ["newest"]);
    }

    #[test]
    fn test_grouping_collects_thread_under_root() {
        // Fetch order is newest-first; the thread must still come out
        // root-first.
        let groups = group_into_threads(
            vec![
                post_at("c", 10, Some("b")),
                post_at("standalone", 20, None),
                post_at("b", 30, Some("a")),
                post_at("a", 40, None),
            ],
            true,
        );

        assert_eq!(groups.len(), 2);
        assert_eq!(ids(&groups[0]), ["a", "b", "c"]);
        assert_eq!(ids(&groups[1]), ["standalone"]);
    }

    #[test]
    fn test_grouping_reply_with_absent_parent_roots_own_group() {
        // Parent already synced in a previous run: the reply leads its own
        // group and counts against the cap.
        let groups = group_into_threads(vec![post_at("b", 10, Some("synced-earlier"))], true);

        assert_eq!(groups.len(), 1);
        assert_eq!(ids(&groups[0]), ["b"]);
        assert_eq!(groups[0][0].in_reply_to_id.as_deref(), Some("synced-earlier"));
    }

    #[test]
    fn test_grouping_excludes_replies_when_threads_disabled() {
        let groups = group_into_threads(
            vec![post_at("a", 30, None), post_at("b", 20, Some("a"))],
            false,
        );

        assert_eq!(groups.len(), 1);
        assert_eq!(ids(&groups[0]), ["a"]);
    }

    #[test]
    fn test_grouping_survives_reply_cycles() {
        // Should never happen upstream, but a cycle must not hang grouping.
        let groups = group_into_threads(
            vec![post_at("a", 30, Some("b")), post_at("b", 20, Some("a"))],
            true,
        );

        let total: usize = groups.iter().map(|g| g.len()).sum();
        assert_eq!(total, 2);
    }

    #[test]
    fn test_report_summary_mentions_degraded_state() {
        let mut report = RunReport {
            fetched: 3,
            published: 2,
            ..Default::default()
        };
        assert!(!report.summary().contains("degraded"));

        report.degraded = true;
        assert!(report.summary().contains("degraded"));
    }

    #[test]
    fn test_options_from_config() {
        let config = SyncConfig {
            lookback_hours: 6,
            max_posts_per_run: 2,
            include_threads: false,
            ..Default::default()
        };

        let options = SyncOptions::from_config(&config, true);
        assert_eq!(options.lookback_hours, 6);
        assert_eq!(options.max_posts_per_run, 2);
        assert!(!options.include_threads);
        assert!(options.dry_run);
    }
}
