//! Error types, one enum per concern.

use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use std::io;
use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("could not read config '{}': {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("invalid config '{}': {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("{0} must be greater than zero")]
    Zero(&'static str),
}

#[derive(Debug, thiserror::Error)]
pub enum CatalogError {
    #[error("media root '{}' is not readable: {source}", path.display())]
    Root {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("catalog scan aborted: {0}")]
    Aborted(String),
}

#[derive(Debug, thiserror::Error)]
pub enum ProbeError {
    #[error("failed to launch {bin}: {source}")]
    Launch {
        bin: String,
        #[source]
        source: io::Error,
    },
    #[error("ffprobe failed on '{}': {stderr}", path.display())]
    Failed { path: PathBuf, stderr: String },
    #[error("unexpected ffprobe output for '{}': {output:?}", path.display())]
    Parse { path: PathBuf, output: String },
}

#[derive(Debug, thiserror::Error)]
pub enum StateError {
    #[error("state file I/O: {0}")]
    Io(#[from] io::Error),
    #[error("state serialization: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Errors surfaced to HTTP clients by the channel endpoints.
#[derive(Debug, thiserror::Error)]
pub enum ServeError {
    #[error("scheduler is not initialized yet")]
    NotReady,
    #[error("nothing is on air")]
    OffAir,
    #[error("requested range not satisfiable (file is {size} bytes)")]
    RangeNotSatisfiable { size: u64 },
    #[error("cannot read '{}': {source}", path.display())]
    File {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("transcoder failed: {0}")]
    Transcoder(String),
    #[error("response build error: {0}")]
    Response(#[from] axum::http::Error),
}

impl ServeError {
    pub fn status(&self) -> StatusCode {
        match self {
            ServeError::NotReady => StatusCode::SERVICE_UNAVAILABLE,
            ServeError::OffAir => StatusCode::NOT_FOUND,
            ServeError::RangeNotSatisfiable { .. } => StatusCode::RANGE_NOT_SATISFIABLE,
            ServeError::File { .. } | ServeError::Transcoder(_) | ServeError::Response(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl IntoResponse for ServeError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!("{}", self);
        }
        let mut response = (status, self.to_string()).into_response();
        if let ServeError::RangeNotSatisfiable { size } = self {
            if let Ok(value) = format!("bytes */{}", size).parse() {
                response.headers_mut().insert(header::CONTENT_RANGE, value);
            }
        }
        response
    }
}
