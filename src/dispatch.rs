//! Stream dispatch: turn a resolved `(path, offset)` into a response.
//!
//! Offset zero with browser-friendly audio is served straight from disk with
//! byte-range support. Anything else goes through the transcoder, which seeks
//! server-side and streams fragmented MP4 without ranges.

use crate::config::ChannelConfig;
use crate::error::ServeError;
use crate::probe::AudioCompat;
use crate::transcoder;
use axum::body::Body;
use axum::http::{StatusCode, header};
use axum::response::Response;
use std::io::SeekFrom;
use std::path::Path;
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tokio_util::io::ReaderStream;
use tokio_util::sync::CancellationToken;
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchMode {
    /// Serve the stored bytes, honouring `Range`.
    Passthrough,
    /// Copy video, optionally re-encode audio, starting `seek_secs` in.
    Transcode { seek_secs: u64, reencode_audio: bool },
}

impl DispatchMode {
    pub fn decide(offset_secs: u64, audio: &AudioCompat) -> Self {
        let reencode_audio = !audio.is_compatible();
        if offset_secs > 0 || reencode_audio {
            DispatchMode::Transcode {
                seek_secs: offset_secs,
                reencode_audio,
            }
        } else {
            DispatchMode::Passthrough
        }
    }

    pub fn supports_ranges(&self) -> bool {
        matches!(self, DispatchMode::Passthrough)
    }
}

/// A parsed `Range: bytes=...` header (first range only).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RangeRequest {
    /// `bytes=a-`
    From(u64),
    /// `bytes=a-b`
    FromTo(u64, u64),
    /// `bytes=-n`, the last `n` bytes.
    Suffix(u64),
}

impl RangeRequest {
    /// Parse a `Range` header value. Unknown units or bad syntax give `None`,
    /// which callers treat as "no range" and answer with the whole file.
    pub fn parse(value: &str) -> Option<Self> {
        let spec = value.trim().strip_prefix("bytes=")?;
        let first = spec.split(',').next()?.trim();
        let (start, end) = first.split_once('-')?;
        let (start, end) = (start.trim(), end.trim());
        match (start.is_empty(), end.is_empty()) {
            (false, true) => Some(RangeRequest::From(start.parse().ok()?)),
            (false, false) => Some(RangeRequest::FromTo(start.parse().ok()?, end.parse().ok()?)),
            (true, false) => Some(RangeRequest::Suffix(end.parse().ok()?)),
            (true, true) => None,
        }
    }

    /// Resolve against a file of `size` bytes. Open-ended ranges stop after
    /// `initial_chunk` bytes.
    pub fn resolve(self, size: u64, initial_chunk: u64) -> Result<ByteSpan, ServeError> {
        let unsatisfiable = ServeError::RangeNotSatisfiable { size };
        if size == 0 {
            return Err(unsatisfiable);
        }
        let last = size - 1;
        let (start, end) = match self {
            RangeRequest::From(a) if a <= last => {
                (a, a.saturating_add(initial_chunk.max(1) - 1).min(last))
            }
            RangeRequest::FromTo(a, b) if a <= b && a <= last => (a, b.min(last)),
            RangeRequest::Suffix(n) if n > 0 => (size.saturating_sub(n), last),
            _ => return Err(unsatisfiable),
        };
        Ok(ByteSpan { start, end })
    }
}

/// Inclusive byte span within a file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ByteSpan {
    pub start: u64,
    pub end: u64,
}

impl ByteSpan {
    pub fn byte_count(&self) -> u64 {
        self.end - self.start + 1
    }

    pub fn content_range(&self, size: u64) -> String {
        format!("bytes {}-{}/{}", self.start, self.end, size)
    }
}

pub fn content_type_for(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "mp4" | "m4v" => "video/mp4",
        "mkv" => "video/x-matroska",
        "webm" => "video/webm",
        "mov" => "video/quicktime",
        "avi" => "video/x-msvideo",
        _ => "application/octet-stream",
    }
}

/// Serve `path` from disk, as a 206 slice when `range` is given.
pub async fn serve_file(
    path: &Path,
    range: Option<&str>,
    initial_chunk: u64,
) -> Result<Response, ServeError> {
    let file_err = |source| ServeError::File {
        path: path.to_path_buf(),
        source,
    };
    let mut file = tokio::fs::File::open(path).await.map_err(file_err)?;
    let size = file.metadata().await.map_err(file_err)?.len();

    let builder = Response::builder()
        .header(header::CONTENT_TYPE, content_type_for(path))
        .header(header::ACCEPT_RANGES, "bytes");

    match range.and_then(RangeRequest::parse) {
        Some(request) => {
            let span = request.resolve(size, initial_chunk)?;
            file.seek(SeekFrom::Start(span.start)).await.map_err(file_err)?;
            debug!("Passthrough {} {}", path.display(), span.content_range(size));
            let body = Body::from_stream(ReaderStream::new(file.take(span.byte_count())));
            Ok(builder
                .status(StatusCode::PARTIAL_CONTENT)
                .header(header::CONTENT_RANGE, span.content_range(size))
                .header(header::CONTENT_LENGTH, span.byte_count())
                .body(body)?)
        }
        None => {
            debug!("Passthrough {} (whole file, {} bytes)", path.display(), size);
            Ok(builder
                .status(StatusCode::OK)
                .header(header::CONTENT_LENGTH, size)
                .body(Body::from_stream(ReaderStream::new(file)))?)
        }
    }
}

/// Serve `path` starting `offset_secs` in, choosing the mode from the audio probe.
/// A transcoded body ends when `shutdown` is cancelled.
pub async fn dispatch(
    config: &ChannelConfig,
    path: &Path,
    offset_secs: u64,
    audio: &AudioCompat,
    range: Option<&str>,
    shutdown: CancellationToken,
) -> Result<Response, ServeError> {
    let mode = DispatchMode::decide(offset_secs, audio);
    debug!("Dispatch {} at {}s: {:?}", path.display(), offset_secs, mode);
    match mode {
        DispatchMode::Passthrough => serve_file(path, range, config.initial_chunk_bytes).await,
        DispatchMode::Transcode {
            seek_secs,
            reencode_audio,
        } => {
            let args = transcoder::ffmpeg_args(
                path,
                seek_secs,
                reencode_audio,
                &config.transcode_audio_bitrate,
            );
            transcoder::stream(
                &config.ffmpeg,
                &args,
                config.transcoder_start_timeout(),
                shutdown,
            )
            .await
        }
    }
}
