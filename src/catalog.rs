//! Catalog sources: where the scheduler's shows come from.
//!
//! `DirectoryCatalog` reads a library laid out as `<root>/<Show Name>/**/<file>`,
//! parses season/episode numbers from filenames and probes durations (through
//! the duration cache).

use crate::duration_cache::{DurationCache, FileStamp};
use crate::episode::{Episode, Show};
use crate::error::CatalogError;
use crate::probe::MediaProbe;
use regex::Regex;
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, LazyLock, Mutex};
use tracing::{debug, info, warn};

pub const VIDEO_EXTENSIONS: &[&str] = &["mp4", "mkv", "avi", "mov", "m4v", "webm"];

const MAX_DEPTH: usize = 5;

pub trait CatalogSource: Send + Sync {
    /// Produce the full show list. Shows may come back empty; callers filter.
    fn scan(&self) -> Result<Vec<Show>, CatalogError>;

    /// Called after a rescan with every path still in the catalog.
    fn evict_stale(&self, _valid: &HashSet<PathBuf>) {}
}

/// Season, episode and part parsed from a filename.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EpisodeNumber {
    pub season: u32,
    pub episode: u32,
    pub part: String,
}

static SXXEXX: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"(?i)s(\d{1,3})\s*e(\d{1,4})([a-z])?(?:[^a-z]|$)").ok());
static NXNN: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"(?i)(?:^|[^0-9])(\d{1,2})x(\d{1,3})([a-z])?(?:[^a-z]|$)").ok());

/// Parse `S01E02`, `s1e2b` or `1x02` style numbering out of a file stem.
pub fn parse_episode_number(stem: &str) -> Option<EpisodeNumber> {
    [&SXXEXX, &NXNN].into_iter().find_map(|re| {
        let re: &Option<Regex> = re;
        let caps = re.as_ref()?.captures(stem)?;
        Some(EpisodeNumber {
            season: caps.get(1)?.as_str().parse().ok()?,
            episode: caps.get(2)?.as_str().parse().ok()?,
            part: caps
                .get(3)
                .map(|m| m.as_str().to_ascii_lowercase())
                .unwrap_or_default(),
        })
    })
}

fn is_video_file(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| VIDEO_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
        .unwrap_or(false)
}

fn is_hidden(name: &str) -> bool {
    name.starts_with('.')
}

fn collect_videos(dir: &Path, out: &mut Vec<PathBuf>, depth: usize) {
    if depth > MAX_DEPTH {
        return;
    }
    let read = match fs::read_dir(dir) {
        Ok(r) => r,
        Err(e) => {
            warn!("Skipping unreadable directory {}: {}", dir.display(), e);
            return;
        }
    };
    for entry in read.flatten() {
        let name = entry.file_name().to_string_lossy().to_string();
        if is_hidden(&name) {
            continue;
        }
        let p = dir.join(entry.file_name());
        if p.is_dir() {
            collect_videos(&p, out, depth + 1);
        } else if is_video_file(&p) {
            out.push(p);
        }
    }
}

/// Scans a directory tree, one top-level folder per show.
pub struct DirectoryCatalog {
    root: PathBuf,
    probe: Arc<dyn MediaProbe>,
    cache: Arc<DurationCache>,
}

impl DirectoryCatalog {
    pub fn new(root: impl Into<PathBuf>, probe: Arc<dyn MediaProbe>, cache: Arc<DurationCache>) -> Self {
        DirectoryCatalog {
            root: root.into(),
            probe,
            cache,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn duration_of(&self, path: &Path) -> Option<std::time::Duration> {
        let stamp = FileStamp::of(path)?;
        if let Some(d) = self.cache.get(path, stamp) {
            return Some(d);
        }
        match self.probe.duration(path) {
            Ok(d) => {
                self.cache.insert(path, stamp, d);
                Some(d)
            }
            Err(e) => {
                warn!("Dropping {}: {}", path.display(), e);
                None
            }
        }
    }

    fn scan_show(&self, name: &str, dir: &Path) -> Show {
        let mut files = Vec::new();
        collect_videos(dir, &mut files, 0);

        let episodes = files
            .into_iter()
            .filter_map(|path| {
                let filename = path.file_name()?.to_string_lossy().to_string();
                let stem = path.file_stem()?.to_string_lossy().to_string();
                let number = parse_episode_number(&stem).unwrap_or_else(|| {
                    debug!("No episode number in {}, sorting by name", filename);
                    EpisodeNumber {
                        season: 0,
                        episode: 0,
                        part: String::new(),
                    }
                });
                let duration = self.duration_of(&path)?;
                if duration.is_zero() {
                    warn!("Dropping {}: zero duration", path.display());
                    return None;
                }
                Some(Episode {
                    path,
                    filename,
                    show_name: name.to_string(),
                    season: number.season,
                    episode: number.episode,
                    part: number.part,
                    duration,
                })
            })
            .collect();

        Show::new(name, episodes)
    }
}

impl CatalogSource for DirectoryCatalog {
    fn scan(&self) -> Result<Vec<Show>, CatalogError> {
        let read = fs::read_dir(&self.root).map_err(|source| CatalogError::Root {
            path: self.root.clone(),
            source,
        })?;

        let mut shows: Vec<Show> = read
            .flatten()
            .filter_map(|entry| {
                let name = entry.file_name().to_string_lossy().to_string();
                let dir = self.root.join(entry.file_name());
                (!is_hidden(&name) && dir.is_dir()).then(|| self.scan_show(&name, &dir))
            })
            .collect();
        shows.sort_by(|a, b| a.name.cmp(&b.name));

        if let Err(e) = self.cache.save() {
            warn!("Could not save duration cache: {}", e);
        }
        info!(
            "Scanned {}: {} shows, {} episodes",
            self.root.display(),
            shows.len(),
            shows.iter().map(Show::episode_count).sum::<usize>()
        );
        Ok(shows)
    }

    fn evict_stale(&self, valid: &HashSet<PathBuf>) {
        let evicted = self.cache.retain(valid);
        if evicted > 0 {
            debug!("Evicted {} stale duration cache entries", evicted);
            if let Err(e) = self.cache.save() {
                warn!("Could not save duration cache: {}", e);
            }
        }
    }
}

/// A fixed, replaceable show list. Useful for embedding and tests.
#[derive(Default)]
pub struct StaticCatalog {
    shows: Mutex<Vec<Show>>,
}

impl StaticCatalog {
    pub fn new(shows: Vec<Show>) -> Self {
        StaticCatalog {
            shows: Mutex::new(shows),
        }
    }

    pub fn replace(&self, shows: Vec<Show>) {
        *self.shows.lock().unwrap_or_else(|p| p.into_inner()) = shows;
    }
}

impl CatalogSource for StaticCatalog {
    fn scan(&self) -> Result<Vec<Show>, CatalogError> {
        Ok(self.shows.lock().unwrap_or_else(|p| p.into_inner()).clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ProbeError;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    /// Every file is 60 s long except names containing "broken".
    struct FakeProbe {
        calls: AtomicUsize,
    }

    impl MediaProbe for FakeProbe {
        fn duration(&self, path: &Path) -> Result<Duration, ProbeError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if path.to_string_lossy().contains("broken") {
                return Err(ProbeError::Parse {
                    path: path.to_path_buf(),
                    output: "N/A".into(),
                });
            }
            if path.to_string_lossy().contains("empty") {
                return Ok(Duration::ZERO);
            }
            Ok(Duration::from_secs(60))
        }

        fn audio_codec(&self, _path: &Path) -> Result<Option<String>, ProbeError> {
            Ok(Some("aac".into()))
        }
    }

    fn touch(path: &Path) {
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, b"video").unwrap();
    }

    fn catalog(root: &Path, cache_dir: &Path) -> (DirectoryCatalog, Arc<FakeProbe>) {
        let probe = Arc::new(FakeProbe {
            calls: AtomicUsize::new(0),
        });
        let cache = Arc::new(DurationCache::load(cache_dir.join("durations.json")));
        (DirectoryCatalog::new(root, probe.clone(), cache), probe)
    }

    #[test]
    fn parses_common_numbering_styles() {
        let n = parse_episode_number("Cheers S01E02").unwrap();
        assert_eq!((n.season, n.episode, n.part.as_str()), (1, 2, ""));
        let n = parse_episode_number("cheers.s3e14b.720p").unwrap();
        assert_eq!((n.season, n.episode, n.part.as_str()), (3, 14, "b"));
        let n = parse_episode_number("Cheers - 2x05 - Title").unwrap();
        assert_eq!((n.season, n.episode), (2, 5));
        let n = parse_episode_number("Show S01E02 - Pilot").unwrap();
        assert_eq!(n.part, "");
        assert!(parse_episode_number("Holiday Special").is_none());
    }

    #[test]
    fn scans_shows_sorted_and_ordered() {
        let media = tempfile::tempdir().unwrap();
        let data = tempfile::tempdir().unwrap();
        touch(&media.path().join("Zeta/Zeta S01E02.mp4"));
        touch(&media.path().join("Zeta/Season 1/Zeta S01E01.mkv"));
        touch(&media.path().join("Alpha/Alpha S02E01a.mp4"));
        touch(&media.path().join("Alpha/Alpha S01E01.mp4"));
        touch(&media.path().join("Alpha/notes.txt"));
        touch(&media.path().join("Alpha/.hidden S01E09.mp4"));
        touch(&media.path().join("Empty/readme.md"));

        let (cat, _) = catalog(media.path(), data.path());
        let shows = cat.scan().unwrap();
        let names: Vec<&str> = shows.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["Alpha", "Empty", "Zeta"]);

        let alpha: Vec<String> = shows[0].episodes.iter().map(|e| e.label()).collect();
        assert_eq!(alpha, vec!["Alpha S01E01", "Alpha S02E01a"]);
        assert!(shows[1].is_empty());
        assert_eq!(shows[2].episodes[0].filename, "Zeta S01E01.mkv");
        assert_eq!(shows[2].episodes[0].duration, Duration::from_secs(60));
    }

    #[test]
    fn drops_unprobeable_and_zero_length_files() {
        let media = tempfile::tempdir().unwrap();
        let data = tempfile::tempdir().unwrap();
        touch(&media.path().join("A/A S01E01.mp4"));
        touch(&media.path().join("A/A S01E02 broken.mp4"));
        touch(&media.path().join("A/A S01E03 empty.mp4"));

        let (cat, _) = catalog(media.path(), data.path());
        let shows = cat.scan().unwrap();
        assert_eq!(shows[0].episode_count(), 1);
    }

    #[test]
    fn second_scan_uses_the_cache() {
        let media = tempfile::tempdir().unwrap();
        let data = tempfile::tempdir().unwrap();
        touch(&media.path().join("A/A S01E01.mp4"));
        touch(&media.path().join("A/A S01E02.mp4"));

        let (cat, probe) = catalog(media.path(), data.path());
        cat.scan().unwrap();
        cat.scan().unwrap();
        assert_eq!(probe.calls.load(Ordering::SeqCst), 2);
        assert!(data.path().join("durations.json").exists());
    }

    #[test]
    fn missing_root_is_an_error() {
        let data = tempfile::tempdir().unwrap();
        let (cat, _) = catalog(&data.path().join("nope"), data.path());
        assert!(matches!(cat.scan(), Err(CatalogError::Root { .. })));
    }

    #[test]
    fn static_catalog_can_be_replaced() {
        use crate::episode::make_episode;
        let cat = StaticCatalog::new(vec![]);
        assert!(cat.scan().unwrap().is_empty());
        cat.replace(vec![Show::new("A", vec![make_episode("A", 1, 1, "", 10)])]);
        assert_eq!(cat.scan().unwrap().len(), 1);
    }
}
