//! On-disk cache of probed durations, keyed by file path.
//!
//! An entry is only trusted while the file's size and modification time still
//! match what was recorded, so replaced files get re-probed.

use crate::error::StateError;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::{Duration, UNIX_EPOCH};
use tracing::{debug, warn};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CachedDuration {
    pub duration_secs: f64,
    pub size: u64,
    /// Modification time, whole seconds since the Unix epoch.
    pub modified: u64,
}

/// Size and mtime of a file, used as the cache validity key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileStamp {
    pub size: u64,
    pub modified: u64,
}

impl FileStamp {
    pub fn of(path: &Path) -> Option<Self> {
        let meta = fs::metadata(path).ok()?;
        let modified = meta
            .modified()
            .ok()
            .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
            .map(|d| d.as_secs())
            .unwrap_or(0);
        Some(FileStamp {
            size: meta.len(),
            modified,
        })
    }
}

pub struct DurationCache {
    path: PathBuf,
    entries: Mutex<HashMap<PathBuf, CachedDuration>>,
}

impl DurationCache {
    /// Open the cache at `path`. A missing or unreadable file starts empty.
    pub fn load(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let entries = match fs::read_to_string(&path) {
            Ok(data) => serde_json::from_str(&data).unwrap_or_else(|e| {
                warn!("Ignoring corrupt duration cache {}: {}", path.display(), e);
                HashMap::new()
            }),
            Err(_) => HashMap::new(),
        };
        debug!("Duration cache {}: {} entries", path.display(), entries.len());
        DurationCache {
            path,
            entries: Mutex::new(entries),
        }
    }

    fn entries(&self) -> std::sync::MutexGuard<'_, HashMap<PathBuf, CachedDuration>> {
        self.entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn len(&self) -> usize {
        self.entries().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Cached duration for `path`, if the file still matches `stamp`.
    pub fn get(&self, path: &Path, stamp: FileStamp) -> Option<Duration> {
        let entries = self.entries();
        let entry = entries.get(path)?;
        if entry.size != stamp.size || entry.modified != stamp.modified {
            return None;
        }
        Duration::try_from_secs_f64(entry.duration_secs).ok()
    }

    pub fn insert(&self, path: &Path, stamp: FileStamp, duration: Duration) {
        self.entries().insert(
            path.to_path_buf(),
            CachedDuration {
                duration_secs: duration.as_secs_f64(),
                size: stamp.size,
                modified: stamp.modified,
            },
        );
    }

    /// Drop entries for files no longer in the catalog. Returns how many went.
    pub fn retain(&self, valid: &HashSet<PathBuf>) -> usize {
        let mut entries = self.entries();
        let before = entries.len();
        entries.retain(|path, _| valid.contains(path));
        before - entries.len()
    }

    /// Write the cache to disk (temp file, then rename).
    pub fn save(&self) -> Result<(), StateError> {
        let json = serde_json::to_string(&*self.entries())?;
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, json)?;
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}
