//! Configuration management for Bluecast

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::error::{ConfigError, Result};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub bluesky: BlueskyConfig,
    pub mastodon: MastodonConfig,
    #[serde(default)]
    pub sync: SyncConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlueskyConfig {
    /// Account handle, e.g. "alice.bsky.social"
    pub handle: String,
    /// Path to a file holding the app password
    pub app_password_file: String,
    /// PDS endpoint
    #[serde(default = "default_bluesky_service")]
    pub service: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MastodonConfig {
    /// Instance URL or bare host, e.g. "mastodon.social"
    pub instance: String,
    /// Path to a file holding the OAuth access token
    pub token_file: String,
    #[serde(default)]
    pub duplicate_check: DuplicateCheckConfig,
}

/// Policy knobs for the content-similarity duplicate guard.
///
/// The defaults match observed behavior; they are policy, not invariants.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DuplicateCheckConfig {
    /// How many of the account's most recent posts to compare against
    #[serde(default = "default_duplicate_window")]
    pub window: u32,
    /// Token-overlap ratio above which a post counts as already published
    #[serde(default = "default_duplicate_threshold")]
    pub threshold: f64,
}

impl Default for DuplicateCheckConfig {
    fn default() -> Self {
        Self {
            window: default_duplicate_window(),
            threshold: default_duplicate_threshold(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    /// How far back to look for source posts, in hours
    #[serde(default = "default_lookback_hours")]
    pub lookback_hours: i64,
    /// Cap on thread roots published per run
    #[serde(default = "default_max_posts_per_run")]
    pub max_posts_per_run: usize,
    #[serde(default = "default_true")]
    pub include_media: bool,
    #[serde(default = "default_true")]
    pub include_links: bool,
    #[serde(default = "default_true")]
    pub include_threads: bool,
    /// Where the synced-post ledger lives
    #[serde(default = "default_state_file")]
    pub state_file: String,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            lookback_hours: default_lookback_hours(),
            max_posts_per_run: default_max_posts_per_run(),
            include_media: true,
            include_links: true,
            include_threads: true,
            state_file: default_state_file(),
        }
    }
}

fn default_bluesky_service() -> String {
    "https://bsky.social".to_string()
}

fn default_duplicate_window() -> u32 {
    20
}

fn default_duplicate_threshold() -> f64 {
    0.8
}

fn default_lookback_hours() -> i64 {
    24
}

fn default_max_posts_per_run() -> usize {
    5
}

fn default_true() -> bool {
    true
}

fn default_state_file() -> String {
    "~/.local/share/bluecast/state.json".to_string()
}

impl Config {
    /// Load configuration from the default location
    pub fn load() -> Result<Self> {
        let config_path = resolve_config_path()?;
        Self::load_from_path(&config_path)
    }

    /// Load configuration from a specific path
    pub fn load_from_path(path: &PathBuf) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(ConfigError::ReadError)?;
        let config: Config = toml::from_str(&content).map_err(ConfigError::ParseError)?;
        Ok(config)
    }

    /// Resolve the state file path, expanding `~` and env vars
    pub fn state_path(&self) -> Result<PathBuf> {
        let expanded = shellexpand::full(&self.sync.state_file)
            .map_err(|e| ConfigError::MissingField(format!("sync.state_file: {}", e)))?;
        Ok(PathBuf::from(expanded.to_string()))
    }
}

/// Resolve the configuration file path following XDG Base Directory spec
pub fn resolve_config_path() -> Result<PathBuf> {
    if let Ok(path) = std::env::var("BLUECAST_CONFIG") {
        return Ok(PathBuf::from(shellexpand::tilde(&path).to_string()));
    }

    let config_dir = dirs::config_dir()
        .ok_or_else(|| ConfigError::MissingField("config directory".to_string()))?;

    Ok(config_dir.join("bluecast").join("config.toml"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::io::Write;

    const MINIMAL: &str = r#"
[bluesky]
handle = "alice.bsky.social"
app_password_file = "/tmp/bsky.password"

[mastodon]
instance = "mastodon.social"
token_file = "/tmp/mastodon.token"
"#;

    #[test]
    fn test_minimal_config_gets_defaults() {
        let config: Config = toml::from_str(MINIMAL).unwrap();

        assert_eq!(config.bluesky.service, "https://bsky.social");
        assert_eq!(config.sync.lookback_hours, 24);
        assert_eq!(config.sync.max_posts_per_run, 5);
        assert!(config.sync.include_media);
        assert!(config.sync.include_links);
        assert!(config.sync.include_threads);
        assert_eq!(config.mastodon.duplicate_check.window, 20);
        assert!((config.mastodon.duplicate_check.threshold - 0.8).abs() < f64::EPSILON);
    }

    #[test]
    fn test_explicit_values_override_defaults() {
        let toml_str = r#"
[bluesky]
handle = "alice.bsky.social"
app_password_file = "/tmp/bsky.password"
service = "https://pds.example.org"

[mastodon]
instance = "https://fosstodon.org"
token_file = "/tmp/token"

[mastodon.duplicate_check]
window = 40
threshold = 0.9

[sync]
lookback_hours = 6
max_posts_per_run = 2
include_threads = false
state_file = "/var/lib/bluecast/state.json"
"#;
        let config: Config = toml::from_str(toml_str).unwrap();

        assert_eq!(config.bluesky.service, "https://pds.example.org");
        assert_eq!(config.sync.lookback_hours, 6);
        assert_eq!(config.sync.max_posts_per_run, 2);
        assert!(!config.sync.include_threads);
        assert_eq!(config.mastodon.duplicate_check.window, 40);
        assert_eq!(config.state_path().unwrap().to_str().unwrap(), "/var/lib/bluecast/state.json");
    }

    #[test]
    fn test_missing_required_section_fails() {
        let result: std::result::Result<Config, _> = toml::from_str("[sync]\nlookback_hours = 1\n");
        assert!(result.is_err());
    }

    #[test]
    fn test_load_from_path() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(MINIMAL.as_bytes()).unwrap();
        file.flush().unwrap();

        let config = Config::load_from_path(&file.path().to_path_buf()).unwrap();
        assert_eq!(config.bluesky.handle, "alice.bsky.social");
    }

    #[test]
    fn test_load_from_missing_path() {
        let result = Config::load_from_path(&PathBuf::from("/nonexistent/bluecast.toml"));
        assert!(matches!(
            result,
            Err(crate::BluecastError::Config(ConfigError::ReadError(_)))
        ));
    }

    #[test]
    #[serial]
    fn test_resolve_config_path_env_override() {
        std::env::set_var("BLUECAST_CONFIG", "/etc/bluecast/config.toml");
        let path = resolve_config_path().unwrap();
        std::env::remove_var("BLUECAST_CONFIG");

        assert_eq!(path, PathBuf::from("/etc/bluecast/config.toml"));
    }

    #[test]
    #[serial]
    fn test_resolve_config_path_default() {
        std::env::remove_var("BLUECAST_CONFIG");
        let path = resolve_config_path().unwrap();
        assert!(path.ends_with("bluecast/config.toml"));
    }
}
