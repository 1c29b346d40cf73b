use crate::error::ConfigError;
use crate::schedule::WindowSettings;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Channel configuration. Every field has a default, so a partial JSON file is fine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelConfig {
    /// Library root: one sub-directory per show.
    #[serde(default = "default_media_root")]
    pub media_root: PathBuf,
    #[serde(default = "default_bind")]
    pub bind: String,
    #[serde(default = "default_state_file")]
    pub state_file: PathBuf,
    #[serde(default = "default_duration_cache_file")]
    pub duration_cache_file: PathBuf,
    #[serde(default = "default_ffmpeg")]
    pub ffmpeg: PathBuf,
    #[serde(default = "default_ffprobe")]
    pub ffprobe: PathBuf,
    #[serde(default = "default_rescan_interval_secs")]
    pub rescan_interval_secs: u64,
    #[serde(default = "default_persist_interval_secs")]
    pub persist_interval_secs: u64,
    /// Lookahead generated on each build or extension.
    #[serde(default = "default_horizon_secs")]
    pub horizon_secs: u64,
    /// Extend once the window's end is this close to now.
    #[serde(default = "default_threshold_secs")]
    pub extend_threshold_secs: u64,
    /// Drop items that ended this long ago.
    #[serde(default = "default_threshold_secs")]
    pub trim_threshold_secs: u64,
    /// Cap for open-ended byte ranges in passthrough mode.
    #[serde(default = "default_initial_chunk_bytes")]
    pub initial_chunk_bytes: u64,
    #[serde(default = "default_transcoder_start_timeout_secs")]
    pub transcoder_start_timeout_secs: u64,
    #[serde(default = "default_audio_bitrate")]
    pub transcode_audio_bitrate: String,
}

fn data_dir() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("channelflow")
}

fn default_media_root() -> PathBuf {
    PathBuf::from("media")
}

fn default_bind() -> String {
    "127.0.0.1:8080".to_string()
}

fn default_state_file() -> PathBuf {
    data_dir().join("channel_state.json")
}

fn default_duration_cache_file() -> PathBuf {
    data_dir().join("durations.json")
}

fn default_ffmpeg() -> PathBuf {
    PathBuf::from("ffmpeg")
}

fn default_ffprobe() -> PathBuf {
    PathBuf::from("ffprobe")
}

fn default_rescan_interval_secs() -> u64 {
    300
}

fn default_persist_interval_secs() -> u64 {
    10
}

fn default_horizon_secs() -> u64 {
    2 * 60 * 60
}

fn default_threshold_secs() -> u64 {
    30 * 60
}

fn default_initial_chunk_bytes() -> u64 {
    2 * 1024 * 1024
}

fn default_transcoder_start_timeout_secs() -> u64 {
    10
}

fn default_audio_bitrate() -> String {
    "192k".to_string()
}

impl Default for ChannelConfig {
    fn default() -> Self {
        ChannelConfig {
            media_root: default_media_root(),
            bind: default_bind(),
            state_file: default_state_file(),
            duration_cache_file: default_duration_cache_file(),
            ffmpeg: default_ffmpeg(),
            ffprobe: default_ffprobe(),
            rescan_interval_secs: default_rescan_interval_secs(),
            persist_interval_secs: default_persist_interval_secs(),
            horizon_secs: default_horizon_secs(),
            extend_threshold_secs: default_threshold_secs(),
            trim_threshold_secs: default_threshold_secs(),
            initial_chunk_bytes: default_initial_chunk_bytes(),
            transcoder_start_timeout_secs: default_transcoder_start_timeout_secs(),
            transcode_audio_bitrate: default_audio_bitrate(),
        }
    }
}

impl ChannelConfig {
    /// Load from a JSON file. Missing fields take their defaults.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let data = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config: ChannelConfig =
            serde_json::from_str(&data).map_err(|source| ConfigError::Parse {
                path: path.to_path_buf(),
                source,
            })?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values that would stall timers or the window builder.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let checks = [
            ("rescan_interval_secs", self.rescan_interval_secs),
            ("persist_interval_secs", self.persist_interval_secs),
            ("horizon_secs", self.horizon_secs),
            ("initial_chunk_bytes", self.initial_chunk_bytes),
            ("transcoder_start_timeout_secs", self.transcoder_start_timeout_secs),
        ];
        for (name, value) in checks {
            if value == 0 {
                return Err(ConfigError::Zero(name));
            }
        }
        Ok(())
    }

    pub fn window_settings(&self) -> WindowSettings {
        WindowSettings {
            horizon: Duration::from_secs(self.horizon_secs),
            extend_threshold: Duration::from_secs(self.extend_threshold_secs),
            trim_threshold: Duration::from_secs(self.trim_threshold_secs),
        }
    }

    pub fn rescan_interval(&self) -> Duration {
        Duration::from_secs(self.rescan_interval_secs)
    }

    pub fn persist_interval(&self) -> Duration {
        Duration::from_secs(self.persist_interval_secs)
    }

    pub fn transcoder_start_timeout(&self) -> Duration {
        Duration::from_secs(self.transcoder_start_timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_broadcast_constants() {
        let config = ChannelConfig::default();
        let window = config.window_settings();
        assert_eq!(window.horizon, Duration::from_secs(7200));
        assert_eq!(window.extend_threshold, Duration::from_secs(1800));
        assert_eq!(window.trim_threshold, Duration::from_secs(1800));
        assert_eq!(config.rescan_interval(), Duration::from_secs(300));
        assert_eq!(config.persist_interval(), Duration::from_secs(10));
    }

    #[test]
    fn partial_file_fills_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("channel.json");
        fs::write(&path, r#"{"media_root":"/srv/tv","horizon_secs":600}"#).unwrap();
        let config = ChannelConfig::load_from(&path).unwrap();
        assert_eq!(config.media_root, PathBuf::from("/srv/tv"));
        assert_eq!(config.horizon_secs, 600);
        assert_eq!(config.bind, "127.0.0.1:8080");
        assert_eq!(config.persist_interval_secs, 10);
    }

    #[test]
    fn zero_interval_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("channel.json");
        fs::write(&path, r#"{"rescan_interval_secs":0}"#).unwrap();
        assert!(matches!(
            ChannelConfig::load_from(&path),
            Err(ConfigError::Zero("rescan_interval_secs"))
        ));
    }

    #[test]
    fn missing_file_errors() {
        assert!(ChannelConfig::load_from(Path::new("nonexistent_channel.json")).is_err());
    }
}
