use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// A single playable file in the catalog.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Episode {
    pub path: PathBuf,
    pub filename: String,
    pub show_name: String,
    pub season: u32,
    pub episode: u32,
    /// Split-episode suffix ("a", "b", ...). Empty for whole episodes.
    #[serde(default)]
    pub part: String,
    #[serde(with = "duration_secs")]
    pub duration: Duration,
}

impl Episode {
    /// Air time in milliseconds.
    pub fn duration_ms(&self) -> i64 {
        i64::try_from(self.duration.as_millis()).unwrap_or(i64::MAX)
    }

    /// True when this is the episode identified by `(show, season, episode, part)`.
    pub fn is(&self, show_name: &str, season: u32, episode: u32, part: &str) -> bool {
        self.show_name == show_name
            && self.season == season
            && self.episode == episode
            && self.part == part
    }

    /// Human label, e.g. `Cheers S01E02a`.
    pub fn label(&self) -> String {
        format!(
            "{} S{:02}E{:02}{}",
            self.show_name, self.season, self.episode, self.part
        )
    }

    /// Format duration as H:MM:SS, or M:SS under an hour.
    pub fn duration_display(&self) -> String {
        format_clock(self.duration.as_secs())
    }
}

/// Format whole seconds as H:MM:SS, or M:SS under an hour.
pub fn format_clock(secs: u64) -> String {
    let (h, m, s) = (secs / 3600, (secs % 3600) / 60, secs % 60);
    if h > 0 {
        format!("{}:{:02}:{:02}", h, m, s)
    } else {
        format!("{}:{:02}", m, s)
    }
}

/// A show and its episodes in airing order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Show {
    pub name: String,
    pub episodes: Vec<Episode>,
}

impl Show {
    /// Build a show, sorting episodes by `(season, episode, part)`.
    pub fn new(name: impl Into<String>, mut episodes: Vec<Episode>) -> Self {
        episodes.sort_by(|a, b| {
            (a.season, a.episode, a.part.as_str(), a.filename.as_str()).cmp(&(
                b.season,
                b.episode,
                b.part.as_str(),
                b.filename.as_str(),
            ))
        });
        Show {
            name: name.into(),
            episodes,
        }
    }

    pub fn episode_count(&self) -> usize {
        self.episodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.episodes.is_empty()
    }

    /// Index of the episode matching `(season, episode, part)`.
    pub fn position_of(&self, season: u32, episode: u32, part: &str) -> Option<usize> {
        self.episodes
            .iter()
            .position(|e| e.season == season && e.episode == episode && e.part == part)
    }
}

/// Serialize `Duration` as fractional seconds, the way clients and the cache expect it.
mod duration_secs {
    use serde::de::Error;
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(dur: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_f64(dur.as_secs_f64())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(d)?;
        Duration::try_from_secs_f64(secs).map_err(D::Error::custom)
    }
}

#[cfg(test)]
pub(crate) fn make_episode(show: &str, season: u32, episode: u32, part: &str, secs: u64) -> Episode {
    let filename = format!("{} S{:02}E{:02}{}.mp4", show, season, episode, part);
    Episode {
        path: PathBuf::from(format!("/media/{}/{}", show, filename)),
        filename,
        show_name: show.to_string(),
        season,
        episode,
        part: part.to_string(),
        duration: Duration::from_secs(secs),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duration_display_formats_correctly() {
        let ep = make_episode("Cheers", 1, 1, "", 185);
        assert_eq!(ep.duration_display(), "3:05");
        let long = make_episode("Cheers", 1, 1, "", 3725);
        assert_eq!(long.duration_display(), "1:02:05");
    }

    #[test]
    fn show_sorts_by_season_episode_part() {
        let show = Show::new(
            "Cheers",
            vec![
                make_episode("Cheers", 2, 1, "", 60),
                make_episode("Cheers", 1, 2, "b", 60),
                make_episode("Cheers", 1, 2, "", 60),
                make_episode("Cheers", 1, 2, "a", 60),
                make_episode("Cheers", 1, 1, "", 60),
            ],
        );
        let order: Vec<String> = show.episodes.iter().map(|e| e.label()).collect();
        assert_eq!(
            order,
            vec![
                "Cheers S01E01",
                "Cheers S01E02",
                "Cheers S01E02a",
                "Cheers S01E02b",
                "Cheers S02E01",
            ]
        );
    }

    #[test]
    fn position_of_matches_part_exactly() {
        let show = Show::new(
            "X",
            vec![make_episode("X", 1, 2, "a", 60), make_episode("X", 1, 2, "b", 60)],
        );
        assert_eq!(show.position_of(1, 2, "b"), Some(1));
        assert_eq!(show.position_of(1, 2, ""), None);
    }

    #[test]
    fn episode_serializes_camel_case_with_float_duration() {
        let ep = make_episode("X", 1, 2, "", 90);
        let json = serde_json::to_value(&ep).unwrap();
        assert_eq!(json["showName"], "X");
        assert_eq!(json["duration"], 90.0);
        let back: Episode = serde_json::from_value(json).unwrap();
        assert_eq!(back, ep);
    }

    #[test]
    fn negative_duration_is_rejected() {
        let json = r#"{"path":"a.mp4","filename":"a.mp4","showName":"X","season":1,"episode":1,"duration":-3.0}"#;
        assert!(serde_json::from_str::<Episode>(json).is_err());
    }
}
