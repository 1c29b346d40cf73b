//! Schedule engine: round-robin show rotation and the lookahead window.
//!
//! The window is a contiguous run of `PlaylistItem`s anchored to the channel
//! epoch. Every item starts exactly where the previous one ends, so the whole
//! timeline can be regenerated from the epoch, the rotation cursor and the
//! catalog alone.

use crate::episode::{Episode, Show};
use crate::state::SavedEpisode;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Current wall-clock time in Unix-epoch milliseconds.
pub fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

fn as_millis(d: Duration) -> i64 {
    i64::try_from(d.as_millis()).unwrap_or(i64::MAX)
}

/// One slot on the channel timeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlaylistItem {
    pub episode: Episode,
    /// Unix-epoch milliseconds, inclusive.
    pub start_time: i64,
    /// Unix-epoch milliseconds, exclusive.
    pub end_time: i64,
}

impl PlaylistItem {
    pub fn new(episode: Episode, start_time: i64) -> Self {
        let end_time = start_time.saturating_add(episode.duration_ms());
        PlaylistItem {
            episode,
            start_time,
            end_time,
        }
    }

    /// True when `now` falls inside `[start_time, end_time)`.
    pub fn is_on_air(&self, now: i64) -> bool {
        self.start_time <= now && now < self.end_time
    }
}

/// Window sizing. Defaults: 2 h lookahead, extend at 30 min left, trim after 30 min.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowSettings {
    pub horizon: Duration,
    pub extend_threshold: Duration,
    pub trim_threshold: Duration,
}

impl Default for WindowSettings {
    fn default() -> Self {
        WindowSettings {
            horizon: Duration::from_secs(2 * 60 * 60),
            extend_threshold: Duration::from_secs(30 * 60),
            trim_threshold: Duration::from_secs(30 * 60),
        }
    }
}

/// Owns the rotation cursor and the window. All mutation goes through `&mut self`;
/// share it behind a single mutex.
#[derive(Debug)]
pub struct Scheduler {
    shows: Vec<Show>,
    cursors: HashMap<String, usize>,
    current_show_index: usize,
    window: VecDeque<PlaylistItem>,
    epoch: Option<i64>,
    settings: WindowSettings,
    high_water: usize,
}

impl Scheduler {
    /// Create a scheduler over `shows`. Empty shows are dropped; nothing is generated yet.
    pub fn new(shows: Vec<Show>, settings: WindowSettings) -> Self {
        let shows: Vec<Show> = shows.into_iter().filter(|s| !s.is_empty()).collect();
        let cursors = shows.iter().map(|s| (s.name.clone(), 0)).collect();
        Scheduler {
            shows,
            cursors,
            current_show_index: 0,
            window: VecDeque::new(),
            epoch: None,
            settings,
            high_water: 0,
        }
    }

    /// Position the rotation (restoring `saved` when it still exists), fix the
    /// channel epoch and build the initial window.
    pub fn start(&mut self, now: i64, saved: Option<&SavedEpisode>) {
        let anchor = match saved {
            Some(saved) if self.restore_from_episode(saved) => {
                if saved.start_time > now {
                    warn!(
                        "Saved start time {} is in the future (now {}), re-anchoring to now",
                        saved.start_time, now
                    );
                    now
                } else {
                    saved.start_time
                }
            }
            _ => {
                self.reset_rotation();
                now
            }
        };

        self.window.clear();
        if self.shows.is_empty() {
            info!("No shows in catalog; channel is off air until the next rescan");
            return;
        }
        self.epoch = Some(anchor);
        self.build_window(anchor, self.settings.horizon);
        info!(
            "Channel started at epoch {} with {} show(s), {} item(s) in window",
            anchor,
            self.shows.len(),
            self.window.len()
        );
    }

    /// Pick the next episode in strict round-robin order.
    ///
    /// Each show contributes one episode per pass over the show list, in its
    /// own airing order, starting over once exhausted.
    pub fn next_episode(&mut self) -> Option<Episode> {
        if self.shows.is_empty() {
            return None;
        }
        if self.current_show_index >= self.shows.len() {
            self.current_show_index = 0;
        }
        let show = &self.shows[self.current_show_index];
        let cursor = self.cursors.entry(show.name.clone()).or_insert(0);
        if *cursor >= show.episodes.len() {
            *cursor = 0;
        }
        let episode = show.episodes[*cursor].clone();
        *cursor += 1;
        self.current_show_index = (self.current_show_index + 1) % self.shows.len();
        Some(episode)
    }

    /// Append items from `anchor` until the next start would pass `anchor + horizon`.
    pub fn build_window(&mut self, anchor: i64, horizon: Duration) -> usize {
        self.fill(anchor, anchor.saturating_add(as_millis(horizon)), i64::MIN).0
    }

    /// Extend when the window ends within the extend threshold of `now`, then
    /// trim items that ended more than the trim threshold ago.
    /// Returns true when items were appended.
    ///
    /// Trimming also runs while extending, so catching up after a long outage
    /// never holds more than about horizon plus trim threshold worth of items.
    pub fn extend_if_needed(&mut self, now: i64) -> bool {
        let limit = now.saturating_add(as_millis(self.settings.horizon));
        let threshold = as_millis(self.settings.extend_threshold);
        let cutoff = now.saturating_sub(as_millis(self.settings.trim_threshold));

        let (added, dropped) = if self.shows.is_empty() {
            (0, 0)
        } else {
            match self.window.back() {
                None => {
                    self.epoch.get_or_insert(now);
                    self.fill(now, limit, cutoff)
                }
                Some(last) if last.end_time - now <= threshold => {
                    let from = last.end_time;
                    self.fill(from, limit, cutoff)
                }
                Some(_) => (0, 0),
            }
        };
        let trimmed = dropped + self.trim(cutoff);

        if added > 0 || trimmed > 0 {
            debug!(
                "Window maintenance at {}: +{} item(s), -{} item(s), {} retained (peak {})",
                now,
                added,
                trimmed,
                self.window.len(),
                self.high_water
            );
        }
        added > 0
    }

    /// Re-position the rotation on a previously airing episode.
    ///
    /// On a hit the matched show becomes current and its cursor points at the
    /// matched episode, so the next pick replays it; every other show restarts
    /// at 0. On a miss the whole rotation restarts at 0. Returns whether it hit.
    pub fn restore_from_episode(&mut self, saved: &SavedEpisode) -> bool {
        let hit = self.shows.iter().enumerate().find_map(|(show_idx, show)| {
            if show.name != saved.show_name {
                return None;
            }
            show.position_of(saved.season, saved.episode, &saved.part)
                .map(|ep_idx| (show_idx, ep_idx))
        });

        self.reset_rotation();
        match hit {
            Some((show_idx, ep_idx)) => {
                let name = self.shows[show_idx].name.clone();
                self.cursors.insert(name, ep_idx);
                self.current_show_index = show_idx;
                info!(
                    "Restored rotation at {} S{:02}E{:02}{}",
                    saved.show_name, saved.season, saved.episode, saved.part
                );
                true
            }
            None => {
                warn!(
                    "Saved episode {} S{:02}E{:02}{} is no longer in the catalog; starting a fresh rotation",
                    saved.show_name, saved.season, saved.episode, saved.part
                );
                false
            }
        }
    }

    /// Swap in a new catalog, keeping cursors of shows that still exist by name.
    /// The already generated window is left as is.
    pub fn reload_catalog(&mut self, shows: Vec<Show>) {
        let shows: Vec<Show> = shows.into_iter().filter(|s| !s.is_empty()).collect();
        let upcoming = self
            .shows
            .get(self.current_show_index)
            .map(|s| s.name.clone());

        let cursors: HashMap<String, usize> = shows
            .iter()
            .map(|s| (s.name.clone(), self.cursors.get(&s.name).copied().unwrap_or(0)))
            .collect();
        let added = shows
            .iter()
            .filter(|s| !self.cursors.contains_key(&s.name))
            .count();
        let removed = self
            .shows
            .iter()
            .filter(|old| !cursors.contains_key(&old.name))
            .count();

        let current_show_index = upcoming
            .and_then(|name| shows.iter().position(|s| s.name == name))
            .unwrap_or(if shows.is_empty() {
                0
            } else {
                self.current_show_index % shows.len()
            });

        if !self.shows.is_empty() && shows.is_empty() {
            warn!("Catalog reload left no playable shows");
        }
        info!(
            "Catalog reloaded: {} show(s) ({} new, {} removed)",
            shows.len(),
            added,
            removed
        );

        self.shows = shows;
        self.cursors = cursors;
        self.current_show_index = current_show_index;
    }

    /// Items that have not finished by `now`, in airing order.
    pub fn upcoming(&self, now: i64) -> Vec<&PlaylistItem> {
        self.window.iter().filter(|i| i.end_time > now).collect()
    }

    /// Index into the window of the item on air at `now`.
    pub fn on_air_index(&self, now: i64) -> Option<usize> {
        self.window.iter().position(|i| i.is_on_air(now))
    }

    pub fn window(&self) -> &VecDeque<PlaylistItem> {
        &self.window
    }

    pub fn shows(&self) -> &[Show] {
        &self.shows
    }

    pub fn epoch(&self) -> Option<i64> {
        self.epoch
    }

    pub fn settings(&self) -> WindowSettings {
        self.settings
    }

    pub fn current_show_index(&self) -> usize {
        self.current_show_index
    }

    /// Largest window length reached so far.
    pub fn high_water(&self) -> usize {
        self.high_water
    }

    /// Next episode index for `show_name`, if the show is in the catalog.
    pub fn cursor(&self, show_name: &str) -> Option<usize> {
        self.cursors.get(show_name).copied()
    }

    fn reset_rotation(&mut self) {
        self.cursors = self.shows.iter().map(|s| (s.name.clone(), 0)).collect();
        self.current_show_index = 0;
    }

    /// Append items from `from` while the next start is not past `until`,
    /// dropping front items that ended before `cutoff` as it goes.
    /// Returns (appended, dropped).
    fn fill(&mut self, from: i64, until: i64, cutoff: i64) -> (usize, usize) {
        let budget: usize = self.shows.iter().map(Show::episode_count).sum();
        let mut start = from;
        let mut added = 0;
        let mut dropped = 0;
        let mut skipped = 0;

        while start <= until {
            let Some(episode) = self.next_episode() else {
                break;
            };
            if episode.duration_ms() <= 0 {
                skipped += 1;
                if skipped > budget {
                    warn!("Every episode in rotation has zero duration; window not extended");
                    break;
                }
                continue;
            }
            skipped = 0;
            let item = PlaylistItem::new(episode, start);
            start = item.end_time;
            self.window.push_back(item);
            added += 1;
            dropped += self.trim(cutoff);
            self.high_water = self.high_water.max(self.window.len());
        }
        (added, dropped)
    }

    /// Drop front items that ended before `cutoff`.
    fn trim(&mut self, cutoff: i64) -> usize {
        let mut trimmed = 0;
        while self.window.front().is_some_and(|i| i.end_time < cutoff) {
            self.window.pop_front();
            trimmed += 1;
        }
        trimmed
    }
}
