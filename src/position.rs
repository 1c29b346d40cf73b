//! Position resolution: what is on air at a given instant, and how far in.
//!
//! Offsets are always computed from absolute time. A client arriving after the
//! process was down for an hour gets the offset a real broadcast would be at.

use crate::episode::format_clock;
use crate::schedule::{PlaylistItem, Scheduler};
use serde::Serialize;

impl Scheduler {
    /// The item on air at `now`, extending the window first when it runs short.
    /// `None` only when the catalog is empty (or `now` precedes the epoch).
    pub fn current_item(&mut self, now: i64) -> Option<&PlaylistItem> {
        if self.on_air_index(now).is_none() {
            self.extend_if_needed(now);
        }
        let idx = self.on_air_index(now)?;
        self.window().get(idx)
    }

    /// Whole seconds elapsed in the current item, 0 when nothing is on air.
    pub fn position(&mut self, now: i64) -> u64 {
        self.current_item(now)
            .map(|item| elapsed_secs(item, now))
            .unwrap_or(0)
    }
}

fn elapsed_secs(item: &PlaylistItem, now: i64) -> u64 {
    u64::try_from((now - item.start_time) / 1000).unwrap_or(0)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AirState {
    OnAir,
    OffAir,
}

impl std::fmt::Display for AirState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AirState::OnAir => write!(f, "on air"),
            AirState::OffAir => write!(f, "off air"),
        }
    }
}

/// Snapshot served by `/current`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NowAiring {
    pub current_item: Option<PlaylistItem>,
    /// Seconds into `current_item`.
    pub position: u64,
    /// The instant this snapshot was resolved for (Unix-epoch ms).
    pub timestamp: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remaining: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_item: Option<PlaylistItem>,
}

impl NowAiring {
    /// Resolve `now` against the scheduler (may extend or trim its window).
    pub fn resolve(scheduler: &mut Scheduler, now: i64) -> Self {
        let current = scheduler.current_item(now).cloned();
        let next_item = current.as_ref().and_then(|item| {
            scheduler
                .window()
                .iter()
                .find(|next| next.start_time == item.end_time)
                .cloned()
        });
        let position = current.as_ref().map(|i| elapsed_secs(i, now)).unwrap_or(0);
        let remaining = current
            .as_ref()
            .map(|i| u64::try_from((i.end_time - now).max(0) / 1000).unwrap_or(0));

        NowAiring {
            current_item: current,
            position,
            timestamp: now,
            remaining,
            next_item,
        }
    }

    pub fn state(&self) -> AirState {
        if self.current_item.is_some() {
            AirState::OnAir
        } else {
            AirState::OffAir
        }
    }

    /// One-screen text rendering for the CLI.
    pub fn to_text(&self) -> String {
        let Some(item) = &self.current_item else {
            return format!("{}: nothing scheduled\n", self.state());
        };
        let mut out = format!(
            "{}: {} ({})\n  {} / {}\n",
            self.state(),
            item.episode.label(),
            item.episode.filename,
            format_clock(self.position),
            item.episode.duration_display()
        );
        if let Some(next) = &self.next_item {
            out.push_str(&format!(
                "next: {} in {}\n",
                next.episode.label(),
                format_clock(self.remaining.unwrap_or(0))
            ));
        }
        out
    }
}
