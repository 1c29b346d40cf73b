//! Media probing via ffprobe: durations for the catalog, audio codecs for dispatch.

use crate::error::ProbeError;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::Duration;
use tracing::warn;

/// Audio codecs browsers play without help.
pub const COMPATIBLE_AUDIO_CODECS: &[&str] = &["aac", "mp3", "opus", "vorbis", "flac"];

pub trait MediaProbe: Send + Sync {
    /// Container duration.
    fn duration(&self, path: &Path) -> Result<Duration, ProbeError>;
    /// Codec of the first audio stream, `None` when the file has no audio.
    fn audio_codec(&self, path: &Path) -> Result<Option<String>, ProbeError>;
}

/// Whether the first audio stream can be passed through untouched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AudioCompat {
    Compatible,
    Incompatible(String),
}

impl AudioCompat {
    /// Classify a probe result. No audio, or a failed probe, counts as compatible.
    pub fn classify(probe: Result<Option<String>, ProbeError>) -> Self {
        match probe {
            Ok(Some(codec)) => {
                let codec = codec.to_ascii_lowercase();
                if COMPATIBLE_AUDIO_CODECS.contains(&codec.as_str()) {
                    AudioCompat::Compatible
                } else {
                    AudioCompat::Incompatible(codec)
                }
            }
            Ok(None) => AudioCompat::Compatible,
            Err(e) => {
                warn!("Audio probe failed, assuming compatible: {}", e);
                AudioCompat::Compatible
            }
        }
    }

    pub fn is_compatible(&self) -> bool {
        matches!(self, AudioCompat::Compatible)
    }
}

/// `MediaProbe` backed by the ffprobe binary.
#[derive(Debug, Clone)]
pub struct Ffprobe {
    bin: PathBuf,
}

impl Ffprobe {
    pub fn new(bin: impl Into<PathBuf>) -> Self {
        Ffprobe { bin: bin.into() }
    }

    fn run(&self, args: &[&str], path: &Path) -> Result<String, ProbeError> {
        let output = Command::new(&self.bin)
            .args(args)
            .arg(path)
            .output()
            .map_err(|source| ProbeError::Launch {
                bin: self.bin.display().to_string(),
                source,
            })?;
        if !output.status.success() {
            return Err(ProbeError::Failed {
                path: path.to_path_buf(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

impl MediaProbe for Ffprobe {
    fn duration(&self, path: &Path) -> Result<Duration, ProbeError> {
        let out = self.run(
            &[
                "-v",
                "error",
                "-show_entries",
                "format=duration",
                "-of",
                "default=noprint_wrappers=1:nokey=1",
            ],
            path,
        )?;
        parse_duration(path, &out)
    }

    fn audio_codec(&self, path: &Path) -> Result<Option<String>, ProbeError> {
        let out = self.run(
            &[
                "-v",
                "error",
                "-select_streams",
                "a:0",
                "-show_entries",
                "stream=codec_name",
                "-of",
                "default=noprint_wrappers=1:nokey=1",
            ],
            path,
        )?;
        Ok(parse_codec(&out))
    }
}

/// Parse ffprobe's bare `format=duration` output (seconds, possibly fractional).
pub fn parse_duration(path: &Path, output: &str) -> Result<Duration, ProbeError> {
    let parse_err = || ProbeError::Parse {
        path: path.to_path_buf(),
        output: output.trim().to_string(),
    };
    let secs: f64 = output
        .lines()
        .map(str::trim)
        .find(|l| !l.is_empty())
        .ok_or_else(parse_err)?
        .parse()
        .map_err(|_| parse_err())?;
    Duration::try_from_secs_f64(secs).map_err(|_| parse_err())
}

/// First non-empty line of a `stream=codec_name` probe.
pub fn parse_codec(output: &str) -> Option<String> {
    output
        .lines()
        .map(str::trim)
        .find(|l| !l.is_empty())
        .map(str::to_string)
}
