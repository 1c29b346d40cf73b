//! HTTP surface: `/stream`, `/current`, `/schedule` and `/health`.

use crate::channel::Channel;
use crate::dispatch;
use crate::error::ServeError;
use crate::position::NowAiring;
use crate::schedule::{PlaylistItem, now_millis};
use axum::extract::{Query, State};
use axum::http::{HeaderMap, header};
use axum::response::Response;
use axum::routing::get;
use axum::{Json, Router};
use serde::Deserialize;
use std::future::{Future, IntoFuture};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tracing::{debug, info, warn};

/// How long open connections get to finish once shutdown begins.
pub const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

#[derive(Debug, Default, Deserialize)]
pub struct StreamQuery {
    /// Seconds into the on-air episode the client wants to start at.
    pub start: Option<u64>,
}

pub fn router(channel: Arc<Channel>) -> Router {
    Router::new()
        .route("/stream", get(stream))
        .route("/current", get(current))
        .route("/schedule", get(schedule))
        .route("/health", get(|| async { "OK" }))
        .with_state(channel)
}

/// Serve `router(channel)` on `listener` until `shutdown` resolves or the
/// channel's shutdown token is cancelled. Either one cancels the token, which
/// ends running transcodes; connections still open after `SHUTDOWN_GRACE`
/// are abandoned.
pub async fn serve<F>(channel: Arc<Channel>, listener: TcpListener, shutdown: F) -> std::io::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    if let Ok(addr) = listener.local_addr() {
        info!("Channel listening on http://{}", addr);
    }
    let token = channel.shutdown_token();
    let signal = {
        let token = token.clone();
        async move {
            tokio::select! {
                _ = shutdown => {}
                _ = token.cancelled() => {}
            }
            token.cancel();
        }
    };
    let server = axum::serve(listener, router(channel))
        .with_graceful_shutdown(signal)
        .into_future();
    let deadline = async {
        token.cancelled().await;
        tokio::time::sleep(SHUTDOWN_GRACE).await;
    };

    tokio::select! {
        result = server => result,
        _ = deadline => {
            warn!("Connections still open after {:?}, closing anyway", SHUTDOWN_GRACE);
            Ok(())
        }
    }
}

/// The offset to stream from. A `start` at or past the end of the episode is
/// stale, so the server's own position is used instead.
pub fn effective_offset(requested: Option<u64>, position: u64, duration_secs: u64) -> u64 {
    match requested {
        Some(start) if start < duration_secs => start,
        Some(start) => {
            debug!(
                "Requested start {}s is past the episode end ({}s), using live position {}s",
                start, duration_secs, position
            );
            position
        }
        None => 0,
    }
}

async fn stream(
    State(channel): State<Arc<Channel>>,
    Query(query): Query<StreamQuery>,
    headers: HeaderMap,
) -> Result<Response, ServeError> {
    let (item, position) = channel.on_air(now_millis())?;
    let episode = item.episode;
    let offset = effective_offset(query.start, position, episode.duration.as_secs());
    let audio = channel.audio_compat(episode.path.clone()).await;
    let range = headers.get(header::RANGE).and_then(|v| v.to_str().ok());
    dispatch::dispatch(
        channel.config(),
        &episode.path,
        offset,
        &audio,
        range,
        channel.shutdown_token(),
    )
    .await
}

async fn current(State(channel): State<Arc<Channel>>) -> Result<Json<NowAiring>, ServeError> {
    Ok(Json(channel.now_airing(now_millis())?))
}

async fn schedule(State(channel): State<Arc<Channel>>) -> Result<Json<Vec<PlaylistItem>>, ServeError> {
    Ok(Json(channel.upcoming(now_millis())?))
}
