//! channelFlow: a virtual broadcast channel over an on-demand video library.
//!
//! The scheduler decides what is on air at any instant from a channel epoch
//! and a round-robin show rotation; the dispatcher turns that into bytes,
//! straight from disk or through ffmpeg. The `channelflow` binary wraps it
//! all in an HTTP server and a few inspection commands.

pub mod catalog;
pub mod channel;
pub mod config;
pub mod dispatch;
pub mod duration_cache;
pub mod episode;
pub mod error;
pub mod position;
pub mod probe;
pub mod rescan;
pub mod schedule;
pub mod server;
pub mod state;
pub mod tasks;
pub mod transcoder;
