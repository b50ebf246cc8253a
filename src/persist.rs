//! Synchronous snapshot persistence for the activity store.
//!
//! One JSON document holding `{"entries": [...]}` is rewritten wholesale on
//! every accepted write or sweep — readers never observe a partially written
//! record because the replacement goes through a temp file and rename.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use crate::entry::ActivityEntry;
use crate::error::TrackerError;

/// On-disk document shape, shared with the externally produced copies.
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct LogDocument {
    #[serde(default)]
    pub entries: Vec<ActivityEntry>,
}

/// Full-snapshot load/save of the entry collection to a backing file.
#[derive(Debug, Clone)]
pub struct JsonSnapshot {
    path: PathBuf,
}

impl JsonSnapshot {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the entry collection.
    ///
    /// A missing or unparsable file is not fatal to startup — it loads as
    /// an empty collection with a warning.
    pub fn load(&self) -> Vec<ActivityEntry> {
        let content = match std::fs::read_to_string(&self.path) {
            Ok(c) => c,
            Err(_) => return Vec::new(),
        };
        match serde_json::from_str::<LogDocument>(&content) {
            Ok(doc) => {
                if !doc.entries.is_empty() {
                    info!(count = doc.entries.len(), path = %self.path.display(), "loaded activity log");
                }
                doc.entries
            }
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "corrupt activity log, starting empty");
                Vec::new()
            }
        }
    }

    /// Replace the backing file with a full snapshot of `entries`.
    pub fn save(&self, entries: &[ActivityEntry]) -> Result<(), TrackerError> {
        let doc = serde_json::json!({ "entries": entries });
        let content = serde_json::to_vec_pretty(&doc)?;

        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        // Write-then-rename so a crash mid-write leaves the old snapshot intact.
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, &content)?;
        std::fs::rename(&tmp, &self.path)
            .map_err(|e| TrackerError::PersistenceError(e.to_string()))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entry::{EntryValidator, NewEntry};
    use chrono::Utc;

    fn sample_entries(n: usize) -> Vec<ActivityEntry> {
        let v = EntryValidator::new("act");
        (0..n)
            .map(|i| {
                v.normalize(
                    NewEntry {
                        id: Some(format!("act-{i}")),
                        agent: Some("nox".into()),
                        kind: Some("research".into()),
                        description: Some(format!("entry {i}")),
                        ..NewEntry::default()
                    },
                    Utc::now(),
                )
            })
            .collect()
    }

    #[test]
    fn test_load_missing_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let snap = JsonSnapshot::new(dir.path().join("activity-log.json"));
        assert!(snap.load().is_empty());
    }

    #[test]
    fn test_load_corrupt_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("activity-log.json");
        std::fs::write(&path, "{\"entries\": [{\"truncated").unwrap();
        let snap = JsonSnapshot::new(path);
        assert!(snap.load().is_empty());
    }

    #[test]
    fn test_save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let snap = JsonSnapshot::new(dir.path().join("data").join("activity-log.json"));
        let entries = sample_entries(3);
        snap.save(&entries).unwrap();

        let loaded = snap.load();
        assert_eq!(loaded.len(), 3);
        assert_eq!(loaded[0].id, "act-0");
        assert_eq!(loaded[2].description, "entry 2");
    }

    #[test]
    fn test_save_overwrites_wholesale() {
        let dir = tempfile::tempdir().unwrap();
        let snap = JsonSnapshot::new(dir.path().join("activity-log.json"));
        snap.save(&sample_entries(5)).unwrap();
        snap.save(&sample_entries(2)).unwrap();
        assert_eq!(snap.load().len(), 2);
    }

    #[test]
    fn test_no_temp_file_left_behind() {
        let dir = tempfile::tempdir().unwrap();
        let snap = JsonSnapshot::new(dir.path().join("activity-log.json"));
        snap.save(&sample_entries(1)).unwrap();
        assert!(!dir.path().join("activity-log.json.tmp").exists());
    }
}
