//! Persisted channel state.
//!
//! Only the identity and start time of the episode on air is stored; the rest
//! of the timeline is regenerated from it and the catalog on startup.

use crate::error::StateError;
use crate::schedule::PlaylistItem;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// The episode that was on air, and when it started (Unix-epoch ms).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SavedEpisode {
    pub show_name: String,
    pub season: u32,
    pub episode: u32,
    #[serde(default)]
    pub part: String,
    pub start_time: i64,
}

impl SavedEpisode {
    pub fn from_item(item: &PlaylistItem) -> Self {
        SavedEpisode {
            show_name: item.episode.show_name.clone(),
            season: item.episode.season,
            episode: item.episode.episode,
            part: item.episode.part.clone(),
            start_time: item.start_time,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SavedState {
    #[serde(default)]
    pub current_episode: Option<SavedEpisode>,
}

impl SavedState {
    pub fn from_item(item: Option<&PlaylistItem>) -> Self {
        SavedState {
            current_episode: item.map(SavedEpisode::from_item),
        }
    }
}

/// JSON file holding `SavedState`.
#[derive(Debug, Clone)]
pub struct StateStore {
    path: PathBuf,
}

impl StateStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        StateStore { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the saved episode. A missing or corrupt file means "no prior state".
    pub fn load(&self) -> Option<SavedEpisode> {
        if !self.path.exists() {
            debug!("No state file at {}", self.path.display());
            return None;
        }
        match fs::read_to_string(&self.path) {
            Ok(data) => match serde_json::from_str::<SavedState>(&data) {
                Ok(state) => state.current_episode,
                Err(e) => {
                    warn!(
                        "Corrupt state file {}, starting fresh: {}",
                        self.path.display(),
                        e
                    );
                    None
                }
            },
            Err(e) => {
                warn!("Could not read state file {}: {}", self.path.display(), e);
                None
            }
        }
    }

    /// Write `state` atomically (temp file, then rename).
    pub fn save(&self, state: &SavedState) -> Result<(), StateError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let json = serde_json::to_string_pretty(state)?;
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, json)?;
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}
