//! Durable record of which source posts have been synced
//!
//! The state file is the authoritative first layer of duplicate prevention:
//! a set of synced source-post ids plus per-entry metadata (destination post
//! id, sync timestamp). It is written immediately after every successful
//! publish so a crash mid-run never forgets a post that already went out.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::error::{Result, StateError};

/// Metadata entries older than this are pruned on save. The id set itself is
/// never pruned; only the destination-id mapping used for threading ages out.
const RECORD_RETENTION_DAYS: i64 = 7;

/// Per-post sync metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncEntry {
    /// Destination post id the source post was published as
    pub target_id: String,
    pub synced_at: DateTime<Utc>,
}

/// On-disk layout of the state file.
#[derive(Debug, Default, Serialize, Deserialize)]
struct StateFile {
    #[serde(default)]
    synced_ids: Vec<String>,
    #[serde(default)]
    records: BTreeMap<String, SyncEntry>,
}

/// The sync ledger. Owned and mutated by the orchestrator only; adapters get
/// read access at most.
#[derive(Debug)]
pub struct SyncState {
    path: PathBuf,
    synced: HashSet<String>,
    records: BTreeMap<String, SyncEntry>,
}

impl SyncState {
    /// Load previously persisted state.
    ///
    /// A missing file yields empty state. An unreadable or corrupt file is
    /// logged and also yields empty state; it is never fatal, because the
    /// content-similarity guard still protects against duplicates.
    pub fn load(path: impl Into<PathBuf>) -> Self {
        let path = path.into();

        let file = match std::fs::read_to_string(&path) {
            Ok(content) => match serde_json::from_str::<StateFile>(&content) {
                Ok(file) => file,
                Err(e) => {
                    warn!("State file {} is corrupt, starting empty: {}", path.display(), e);
                    StateFile::default()
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("No state file at {}, starting empty", path.display());
                StateFile::default()
            }
            Err(e) => {
                warn!("Cannot read state file {}, starting empty: {}", path.display(), e);
                StateFile::default()
            }
        };

        let mut synced: HashSet<String> = file.synced_ids.into_iter().collect();
        // Records are authoritative too; ids only present as records still
        // count as synced.
        synced.extend(file.records.keys().cloned());

        info!(
            "Loaded sync state: {} synced posts, {} records",
            synced.len(),
            file.records.len()
        );

        Self {
            path,
            synced,
            records: file.records,
        }
    }

    /// Whether a source post has already been synced.
    pub fn is_synced(&self, source_id: &str) -> bool {
        self.synced.contains(source_id)
    }

    /// Destination post id a source post was published as, if still known.
    /// Used to thread replies under their already-synced parent.
    pub fn destination_id_for(&self, source_id: &str) -> Option<&str> {
        self.records.get(source_id).map(|e| e.target_id.as_str())
    }

    /// Number of synced source posts.
    pub fn synced_count(&self) -> usize {
        self.synced.len()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Record a successful publish and persist immediately.
    ///
    /// This is the sole write path for the state file. An I/O failure here is
    /// returned so the caller can flag the run as degraded; the in-memory
    /// state keeps the entry either way so the current run will not repost.
    pub fn mark_synced(&mut self, source_id: &str, destination_id: &str) -> Result<()> {
        self.synced.insert(source_id.to_string());
        self.records.insert(
            source_id.to_string(),
            SyncEntry {
                target_id: destination_id.to_string(),
                synced_at: Utc::now(),
            },
        );
        self.save()
    }

    /// Persist the current state atomically: write a uniquely named temp file
    /// in the same directory, then rename it over the state file.
    fn save(&mut self) -> Result<()> {
        self.prune_records();

        let file = StateFile {
            synced_ids: {
                let mut ids: Vec<String> = self.synced.iter().cloned().collect();
                ids.sort();
                ids
            },
            records: self.records.clone(),
        };
        let json = serde_json::to_string_pretty(&file).map_err(StateError::Serialize)?;

        if let Some(dir) = self.path.parent() {
            if !dir.as_os_str().is_empty() {
                std::fs::create_dir_all(dir).map_err(StateError::Io)?;
            }
        }

        let temp_path = self
            .path
            .with_extension(format!("{}.tmp", uuid::Uuid::new_v4()));

        if let Err(e) = std::fs::write(&temp_path, &json) {
            let _ = std::fs::remove_file(&temp_path);
            return Err(StateError::Io(e).into());
        }
        if let Err(e) = std::fs::rename(&temp_path, &self.path) {
            let _ = std::fs::remove_file(&temp_path);
            return Err(StateError::Io(e).into());
        }

        debug!(
            "Saved sync state: {} synced posts, {} records",
            self.synced.len(),
            self.records.len()
        );
        Ok(())
    }

    /// Drop metadata entries past the retention window. Ids stay in the
    /// synced set forever, so pruning never re-enables a duplicate.
    fn prune_records(&mut self) {
        let cutoff = Utc::now() - Duration::days(RECORD_RETENTION_DAYS);
        let before = self.records.len();
        self.records.retain(|_, entry| entry.synced_at >= cutoff);
        let pruned = before - self.records.len();
        if pruned > 0 {
            info!("Pruned {} old sync records", pruned);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn state_in(dir: &TempDir) -> SyncState {
        SyncState::load(dir.path().join("state.json"))
    }

    #[test]
    fn test_load_missing_file_is_empty() {
        let dir = TempDir::new().unwrap();
        let state = state_in(&dir);
        assert_eq!(state.synced_count(), 0);
        assert!(!state.is_synced("anything"));
    }

    #[test]
    fn test_load_corrupt_file_is_empty() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("state.json");
        std::fs::write(&path, "{ not json at all").unwrap();

        let state = SyncState::load(&path);
        assert_eq!(state.synced_count(), 0);
    }

    #[test]
    fn test_mark_synced_persists_immediately() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("state.json");

        let mut state = SyncState::load(&path);
        state.mark_synced("src-1", "dest-1").unwrap();

        // A fresh load (as after a crash) must already see the entry.
        let reloaded = SyncState::load(&path);
        assert!(reloaded.is_synced("src-1"));
        assert_eq!(reloaded.destination_id_for("src-1"), Some("dest-1"));
    }

    #[test]
    fn test_mark_synced_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let mut state = state_in(&dir);

        state.mark_synced("src-1", "dest-1").unwrap();
        state.mark_synced("src-1", "dest-1").unwrap();

        assert_eq!(state.synced_count(), 1);
    }

    #[test]
    fn test_mark_synced_creates_parent_directories() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("deeper").join("state.json");

        let mut state = SyncState::load(&path);
        state.mark_synced("src-1", "dest-1").unwrap();

        assert!(path.exists());
    }

    #[test]
    fn test_no_temp_files_left_behind() {
        let dir = TempDir::new().unwrap();
        let mut state = state_in(&dir);
        state.mark_synced("src-1", "dest-1").unwrap();
        state.mark_synced("src-2", "dest-2").unwrap();

        let leftovers: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().ends_with(".tmp"))
            .collect();
        assert!(leftovers.is_empty());
    }

    #[test]
    fn test_old_records_pruned_but_ids_kept() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("state.json");

        // Seed a state file with an entry well past the retention window.
        let stale = StateFile {
            synced_ids: vec!["old-post".to_string()],
            records: BTreeMap::from([(
                "old-post".to_string(),
                SyncEntry {
                    target_id: "dest-old".to_string(),
                    synced_at: Utc::now() - Duration::days(RECORD_RETENTION_DAYS + 1),
                },
            )]),
        };
        std::fs::write(&path, serde_json::to_string(&stale).unwrap()).unwrap();

        let mut state = SyncState::load(&path);
        assert!(state.is_synced("old-post"));

        // Any save triggers pruning.
        state.mark_synced("new-post", "dest-new").unwrap();

        let reloaded = SyncState::load(&path);
        assert!(reloaded.is_synced("old-post"), "id survives pruning");
        assert_eq!(
            reloaded.destination_id_for("old-post"),
            None,
            "metadata is pruned"
        );
        assert_eq!(reloaded.destination_id_for("new-post"), Some("dest-new"));
    }

    #[test]
    fn test_ids_only_in_records_count_as_synced() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("state.json");

        let file = StateFile {
            synced_ids: vec![],
            records: BTreeMap::from([(
                "record-only".to_string(),
                SyncEntry {
                    target_id: "dest".to_string(),
                    synced_at: Utc::now(),
                },
            )]),
        };
        std::fs::write(&path, serde_json::to_string(&file).unwrap()).unwrap();

        let state = SyncState::load(&path);
        assert!(state.is_synced("record-only"));
    }

    #[test]
    fn test_save_failure_keeps_in_memory_entry() {
        let dir = TempDir::new().unwrap();
        // A directory where the state file should be makes the rename fail.
        let path = dir.path().join("state.json");
        std::fs::create_dir_all(&path).unwrap();

        let mut state = SyncState::load(&path);
        let result = state.mark_synced("src-1", "dest-1");

        assert!(result.is_err());
        assert!(state.is_synced("src-1"), "current run must not repost");
    }
}
