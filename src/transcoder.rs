//! On-the-fly ffmpeg transcoding piped into the HTTP body.
//!
//! The child process lives inside the body stream. Dropping the body (client
//! gone, stream finished or failed) drops the child, and `kill_on_drop` makes
//! sure no encoder outlives its response. Cancelling the shutdown token ends
//! the body the same way, so open viewers never hold up a graceful shutdown.

use crate::error::ServeError;
use axum::body::Body;
use axum::http::{StatusCode, header};
use axum::response::Response;
use bytes::Bytes;
use futures::StreamExt;
use std::ffi::OsString;
use std::io;
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, ChildStdout, Command};
use tokio_util::io::ReaderStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

/// ffmpeg arguments: seek `seek_secs` into `input`, copy video, copy or
/// re-encode audio to AAC, and write fragmented MP4 to stdout.
pub fn ffmpeg_args(input: &Path, seek_secs: u64, reencode_audio: bool, audio_bitrate: &str) -> Vec<OsString> {
    let mut args: Vec<OsString> = ["-hide_banner", "-loglevel", "error", "-nostdin"]
        .into_iter()
        .map(OsString::from)
        .collect();
    if seek_secs > 0 {
        args.push("-ss".into());
        args.push(seek_secs.to_string().into());
    }
    args.push("-i".into());
    args.push(input.as_os_str().to_owned());
    for arg in ["-map", "0:v:0?", "-map", "0:a:0?", "-c:v", "copy"] {
        args.push(arg.into());
    }
    if reencode_audio {
        for arg in ["-c:a", "aac", "-b:a", audio_bitrate] {
            args.push(arg.into());
        }
    } else {
        args.push("-c:a".into());
        args.push("copy".into());
    }
    for arg in [
        "-movflags",
        "frag_keyframe+empty_moov+default_base_moof",
        "-f",
        "mp4",
        "pipe:1",
    ] {
        args.push(arg.into());
    }
    args
}

/// Spawn `bin args`, wait up to `start_timeout` for its first output chunk and
/// return a streaming 200 response. Failures before that point are errors
/// (and become a 500); after it they can only end the body early. The body
/// also ends, killing the child, once `shutdown` is cancelled.
pub async fn stream(
    bin: &Path,
    args: &[OsString],
    start_timeout: Duration,
    shutdown: CancellationToken,
) -> Result<Response, ServeError> {
    let mut child = Command::new(bin)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| ServeError::Transcoder(format!("failed to launch {}: {}", bin.display(), e)))?;

    if let Some(stderr) = child.stderr.take() {
        tokio::spawn(async move {
            let mut lines = BufReader::new(stderr).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                warn!("ffmpeg: {}", line);
            }
        });
    }
    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| ServeError::Transcoder("transcoder stdout unavailable".into()))?;
    let mut reader = ReaderStream::new(stdout);

    let first = match tokio::time::timeout(start_timeout, reader.next()).await {
        Ok(Some(Ok(chunk))) => chunk,
        Ok(Some(Err(e))) => return Err(ServeError::Transcoder(format!("reading output: {}", e))),
        Ok(None) => {
            let status = child
                .wait()
                .await
                .map(|s| s.to_string())
                .unwrap_or_else(|e| e.to_string());
            return Err(ServeError::Transcoder(format!(
                "exited before producing output ({})",
                status
            )));
        }
        Err(_) => {
            return Err(ServeError::Transcoder(format!(
                "no output within {:?}",
                start_timeout
            )));
        }
    };
    debug!("Transcoder started, first chunk {} bytes", first.len());

    let head = futures::stream::once(async move { Ok::<Bytes, io::Error>(first) });
    let body = head.chain(body_stream(reader, child, shutdown));

    Ok(Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "video/mp4")
        .header(header::ACCEPT_RANGES, "none")
        .header(header::CACHE_CONTROL, "no-cache")
        .body(Body::from_stream(body))?)
}

/// Remaining output, then reap the child. A read error is yielded once and
/// ends the stream; so does cancellation, minus the error.
fn body_stream(
    reader: ReaderStream<ChildStdout>,
    child: Child,
    shutdown: CancellationToken,
) -> impl futures::Stream<Item = io::Result<Bytes>> + Send {
    futures::stream::unfold(Some((reader, child, shutdown)), |state| async move {
        let (mut reader, mut child, shutdown) = state?;
        let next = tokio::select! {
            _ = shutdown.cancelled() => {
                debug!("Shutting down, stopping transcoder");
                return None;
            }
            next = reader.next() => next,
        };
        match next {
            Some(Ok(chunk)) => Some((Ok(chunk), Some((reader, child, shutdown)))),
            Some(Err(e)) => {
                error!("Transcoder output failed mid-stream: {}", e);
                Some((Err(e), None))
            }
            None => {
                match child.wait().await {
                    Ok(status) if status.success() => debug!("Transcoder finished"),
                    Ok(status) => error!("Transcoder exited with {}", status),
                    Err(e) => error!("Could not reap transcoder: {}", e),
                }
                None
            }
        }
    })
}
