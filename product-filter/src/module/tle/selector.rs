use chrono::{DateTime, Utc};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, warn};

use super::pattern::FilenamePattern;

/// A TLE file found on disk, with the time embedded in its name
#[derive(Debug, Clone, PartialEq)]
pub struct TleFile {
    pub path: PathBuf,
    pub reference_time: DateTime<Utc>,
}

/// The chosen TLE file and how far its reference time is from "now"
#[derive(Debug, Clone, PartialEq)]
pub struct TleSelection {
    pub file: TleFile,
    pub distance: chrono::Duration,
    /// False when even the closest file is older/newer than the tolerance
    pub within_tolerance: bool,
}

#[derive(Debug, Error)]
pub enum TleError {
    #[error("no TLE file matching '{pattern}' in {directories:?}")]
    NoCandidates {
        pattern: String,
        directories: Vec<PathBuf>,
    },

    #[error("closest TLE file {} is {} hours from now, beyond the {} day tolerance", .path.display(), .distance_hours, .max_age_days)]
    Stale {
        path: PathBuf,
        distance_hours: i64,
        max_age_days: i64,
    },
}

/// Find the TLE file whose embedded timestamp is closest to `now`.
///
/// A closest file outside `max_age` is still returned, flagged with
/// `within_tolerance = false`. Rejecting it is up to the caller.
pub fn select_tle(
    directories: &[PathBuf],
    pattern: &FilenamePattern,
    now: DateTime<Utc>,
    max_age: chrono::Duration,
) -> Result<TleSelection, TleError> {
    let candidates = discover_tle_files(directories, pattern);
    debug!("Found {} TLE candidates for '{}'", candidates.len(), pattern.as_str());

    let selection = closest_tle(candidates, now, max_age).ok_or_else(|| TleError::NoCandidates {
        pattern: pattern.as_str().to_string(),
        directories: directories.to_vec(),
    })?;

    if !selection.within_tolerance {
        warn!(
            "Closest TLE file {:?} is {} hours from now, outside the {} day tolerance; using it anyway",
            selection.file.path,
            selection.distance.num_hours(),
            max_age.num_days()
        );
    }

    Ok(selection)
}

/// Every file in `directories` whose name matches `pattern`
pub fn discover_tle_files(directories: &[PathBuf], pattern: &FilenamePattern) -> Vec<TleFile> {
    let mut files = Vec::new();

    for directory in directories {
        let entries = match std::fs::read_dir(directory) {
            Ok(entries) => entries,
            Err(e) => {
                warn!("Cannot scan TLE directory {:?}: {}", directory, e);
                continue;
            }
        };

        for entry in entries.flatten() {
            let path = entry.path();
            let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            if !pattern.is_match(name) {
                continue;
            }
            match pattern.parse_time(name) {
                Some(reference_time) => files.push(TleFile {
                    path: path.clone(),
                    reference_time,
                }),
                None => warn!("Failed to determine the date of TLE file {:?}", path),
            }
        }
    }

    files
}

/// Closest candidate to `now`; on ties the first one seen wins
pub fn closest_tle(
    candidates: impl IntoIterator<Item = TleFile>,
    now: DateTime<Utc>,
    max_age: chrono::Duration,
) -> Option<TleSelection> {
    let mut best: Option<TleSelection> = None;

    for file in candidates {
        let distance = (now - file.reference_time).abs();
        let closer = best.as_ref().is_none_or(|b| distance < b.distance);
        if closer {
            best = Some(TleSelection {
                file,
                distance,
                within_tolerance: distance <= max_age,
            });
        }
    }

    best
}

impl TleSelection {
    pub fn path(&self) -> &Path {
        &self.file.path
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use tempfile::TempDir;

    fn tle(name: &str, time: DateTime<Utc>) -> TleFile {
        TleFile {
            path: PathBuf::from(name),
            reference_time: time,
        }
    }

    #[test]
    fn test_closest_minimises_distance() {
        let now = Utc.with_ymd_and_hms(2023, 6, 21, 12, 0, 0).unwrap();
        let candidates = vec![
            tle("a", now - chrono::Duration::days(3)),
            tle("b", now + chrono::Duration::hours(5)),
            tle("c", now - chrono::Duration::hours(7)),
            tle("d", now - chrono::Duration::days(20)),
        ];

        let selection = closest_tle(candidates, now, chrono::Duration::days(5)).unwrap();
        assert_eq!(selection.file.path, PathBuf::from("b"));
        assert_eq!(selection.distance, chrono::Duration::hours(5));
        assert!(selection.within_tolerance);
    }

    #[test]
    fn test_ties_keep_first() {
        let now = Utc.with_ymd_and_hms(2023, 6, 21, 12, 0, 0).unwrap();
        let candidates = vec![
            tle("first", now - chrono::Duration::hours(2)),
            tle("second", now + chrono::Duration::hours(2)),
        ];
        let selection = closest_tle(candidates, now, chrono::Duration::days(5)).unwrap();
        assert_eq!(selection.file.path, PathBuf::from("first"));
    }

    #[test]
    fn test_stale_candidate_still_selected() {
        let now = Utc.with_ymd_and_hms(2023, 6, 21, 12, 0, 0).unwrap();
        let candidates = vec![tle("old", now - chrono::Duration::days(12))];
        let selection = closest_tle(candidates, now, chrono::Duration::days(5)).unwrap();
        assert_eq!(selection.file.path, PathBuf::from("old"));
        assert!(!selection.within_tolerance);
    }

    #[test]
    fn test_select_from_directories() {
        let first = TempDir::new().unwrap();
        let second = TempDir::new().unwrap();
        std::fs::write(first.path().join("tle-20230615.txt"), "").unwrap();
        std::fs::write(first.path().join("tle-20230620.txt"), "").unwrap();
        std::fs::write(second.path().join("tle-20230622.txt"), "").unwrap();
        std::fs::write(second.path().join("notes.txt"), "").unwrap();
        std::fs::write(second.path().join("tle-20231340.txt"), "").unwrap();

        let pattern = FilenamePattern::parse("tle-{time:%Y%m%d}.txt").unwrap();
        let now = Utc.with_ymd_and_hms(2023, 6, 21, 18, 0, 0).unwrap();
        let directories = vec![
            first.path().to_path_buf(),
            second.path().to_path_buf(),
            PathBuf::from("/does/not/exist"),
        ];

        let selection = select_tle(&directories, &pattern, now, chrono::Duration::days(5)).unwrap();
        assert_eq!(selection.file.path, second.path().join("tle-20230622.txt"));
    }

    #[test]
    fn test_empty_candidate_set() {
        let empty = TempDir::new().unwrap();
        let pattern = FilenamePattern::parse("tle-{time:%Y%m%d}.txt").unwrap();
        let result = select_tle(
            &[empty.path().to_path_buf()],
            &pattern,
            Utc::now(),
            chrono::Duration::days(5),
        );
        assert!(matches!(result, Err(TleError::NoCandidates { .. })));
    }
}
