//! Bluecast - cross-post from Bluesky to Mastodon
//!
//! This library provides the synchronization core: fetching recent posts
//! from a Bluesky account, translating them into Mastodon's constraints,
//! and publishing them with two independent layers of duplicate prevention
//! and crash-safe state persistence.

pub mod config;
pub mod content;
pub mod error;
pub mod logging;
pub mod platforms;
pub mod state;
pub mod sync;
pub mod types;

// Re-export commonly used types
pub use config::Config;
pub use error::{BluecastError, Result};
pub use state::SyncState;
pub use sync::{Outcome, PostOutcome, RunReport, SyncEngine, SyncOptions};
pub use types::{Link, Media, Platform, Post};
