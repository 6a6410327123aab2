use chrono::{DateTime, Utc};
use std::fs::{self, File, OpenOptions};
use std::io::{self, ErrorKind};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{info, warn};

use product_filter_common::{Instrument, Platform};

use super::filter::GranuleDecision;
use crate::config::ServiceSettings;

/// File written to the destination directory
#[derive(Debug, Clone, PartialEq)]
pub struct RoutedArtifact {
    pub path: PathBuf,
    pub filename: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum RouteOutcome {
    /// Granule outside all areas, nothing to do
    Discarded,
    /// No destination configured
    NoDestination,
    Copied(RoutedArtifact),
    /// Destination already existed; first writer wins
    AlreadyPresent(RoutedArtifact),
}

impl RouteOutcome {
    pub fn artifact(&self) -> Option<&RoutedArtifact> {
        match self {
            RouteOutcome::Copied(artifact) | RouteOutcome::AlreadyPresent(artifact) => {
                Some(artifact)
            }
            RouteOutcome::Discarded | RouteOutcome::NoDestination => None,
        }
    }
}

#[derive(Debug, Error)]
pub enum RouteError {
    #[error("source {} has no filename", .0.display())]
    NoFilename(PathBuf),

    #[error("failed to copy {} to {}: {source}", .from.display(), .to.display())]
    Copy {
        from: PathBuf,
        to: PathBuf,
        source: io::Error,
    },
}

/// Output filename for instruments with a fixed naming convention.
///
/// Examples: `iasi_b__twt_l2p_1706211005.bin`, `ascat_b_ears250_1706211008.bin`.
/// `None` means the source filename is kept.
pub fn canonical_filename(
    instrument: &Instrument,
    platform: &Platform,
    start_time: DateTime<Utc>,
    product: Option<&str>,
) -> Option<String> {
    let code = platform.short_code()?;
    let stamp = start_time.format("%y%m%d%H%M");

    match instrument {
        Instrument::Iasi => Some(format!("iasi_{}__twt_l2p_{}.bin", code, stamp)),
        Instrument::Ascat => {
            let product: String = product?.chars().take(3).collect();
            Some(format!("ascat_{}_ears{}_{}.bin", code, product, stamp))
        }
        Instrument::Other(_) => None,
    }
}

pub fn route(
    decision: &GranuleDecision,
    settings: &ServiceSettings,
) -> Result<RouteOutcome, RouteError> {
    let source = &decision.granule.source_path;
    if !decision.is_inside() {
        info!("Granule {:?} outside all areas", source);
        return Ok(RouteOutcome::Discarded);
    }
    info!("Granule {:?} inside one area", source);

    let Some(destination) = &settings.destination else {
        info!("No destination configured, don't do anything with this file...");
        return Ok(RouteOutcome::NoDestination);
    };

    let filename = match canonical_filename(
        &settings.instrument,
        &decision.platform,
        decision.start_time,
        decision.granule.product.as_deref(),
    ) {
        Some(filename) => filename,
        None => {
            let original = decision
                .granule
                .source_filename()
                .ok_or_else(|| RouteError::NoFilename(source.clone()))?;
            if matches!(settings.instrument, Instrument::Iasi | Instrument::Ascat) {
                warn!(
                    "Cannot build a {} filename for platform {}, keeping {}",
                    settings.instrument, decision.platform, original
                );
            }
            original.to_string()
        }
    };

    let artifact = RoutedArtifact {
        path: destination.join(&filename),
        filename,
    };

    let copied = copy_if_absent(source, &artifact.path).map_err(|e| RouteError::Copy {
        from: source.clone(),
        to: artifact.path.clone(),
        source: e,
    })?;

    if copied {
        info!("File copied from {:?} to {:?}", source, artifact.path);
        Ok(RouteOutcome::Copied(artifact))
    } else {
        info!("File is there ({:?}) already, don't copy...", artifact.path);
        Ok(RouteOutcome::AlreadyPresent(artifact))
    }
}

/// Copy `from` to `to` unless `to` exists. Returns whether a copy was made.
fn copy_if_absent(from: &Path, to: &Path) -> io::Result<bool> {
    if let Some(parent) = to.parent() {
        fs::create_dir_all(parent)?;
    }

    let mut target = match OpenOptions::new().write(true).create_new(true).open(to) {
        Ok(file) => file,
        Err(e) if e.kind() == ErrorKind::AlreadyExists => return Ok(false),
        Err(e) => return Err(e),
    };

    let result = File::open(from).and_then(|mut source| io::copy(&mut source, &mut target));
    if let Err(e) = result {
        drop(target);
        if let Err(cleanup) = fs::remove_file(to) {
            warn!("Failed to remove partial file {:?}: {}", to, cleanup);
        }
        return Err(e);
    }

    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::testing::iasi_settings;
    use crate::module::coverage::{CoverageVerdict, Verdict};
    use crate::module::tle::{TleFile, TleSelection};
    use chrono::TimeZone;
    use product_filter_common::GranuleMessage;
    use serde_json::json;
    use tempfile::TempDir;

    fn start() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2017, 6, 21, 10, 5, 0).unwrap()
    }

    fn decision(source: &Path, satellite: &str, verdict: Verdict) -> GranuleDecision {
        let data = json!({
            "uri": source.display().to_string(),
            "start_time": "2017-06-21T10:05:00",
            "instruments": "iasi",
            "satellite": satellite,
            "product": "250km"
        });
        let granule = GranuleMessage::from_data(data.as_object().unwrap()).unwrap();

        GranuleDecision {
            platform: Platform::resolve(satellite),
            start_time: granule.start_time,
            end_time: granule.start_time + chrono::Duration::minutes(3),
            tle: TleSelection {
                file: TleFile {
                    path: PathBuf::from("tle-20170621.txt"),
                    reference_time: start(),
                },
                distance: chrono::Duration::zero(),
                within_tolerance: true,
            },
            evaluations: vec![CoverageVerdict {
                area_id: "euron1".to_string(),
                verdict,
                tle_file: PathBuf::from("tle-20170621.txt"),
            }],
            granule,
        }
    }

    #[test]
    fn test_canonical_filenames() {
        assert_eq!(
            canonical_filename(&Instrument::Iasi, &Platform::MetopB, start(), None).as_deref(),
            Some("iasi_b__twt_l2p_1706211005.bin")
        );
        assert_eq!(
            canonical_filename(&Instrument::Ascat, &Platform::MetopA, start(), Some("coastal"))
                .as_deref(),
            Some("ascat_a_earscoa_1706211005.bin")
        );
        assert_eq!(
            canonical_filename(&Instrument::Ascat, &Platform::MetopA, start(), None),
            None
        );
        let other = Instrument::Other("avhrr".to_string());
        assert_eq!(canonical_filename(&other, &Platform::MetopB, start(), None), None);
        let noaa = Platform::Other("NOAA-20".to_string());
        assert_eq!(canonical_filename(&Instrument::Iasi, &noaa, start(), None), None);
    }

    #[test]
    fn test_copy_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let source = dir.path().join("in").join("IASI_granule.bin");
        std::fs::create_dir_all(source.parent().unwrap()).unwrap();
        std::fs::write(&source, b"first").unwrap();
        let out = dir.path().join("out");
        let settings = iasi_settings(dir.path(), Some(&out));
        let decision = decision(&source, "METOPB", Verdict::Pass { coverage: 0.5 });

        let first = route(&decision, &settings).unwrap();
        let expected = RoutedArtifact {
            path: out.join("iasi_b__twt_l2p_1706211005.bin"),
            filename: "iasi_b__twt_l2p_1706211005.bin".to_string(),
        };
        assert_eq!(first, RouteOutcome::Copied(expected.clone()));
        assert_eq!(std::fs::read(&expected.path).unwrap(), b"first");

        std::fs::write(&source, b"second").unwrap();
        let second = route(&decision, &settings).unwrap();
        assert_eq!(second, RouteOutcome::AlreadyPresent(expected.clone()));
        assert_eq!(std::fs::read(&expected.path).unwrap(), b"first");
    }

    #[test]
    fn test_fallback_to_source_name() {
        let dir = TempDir::new().unwrap();
        let source = dir.path().join("NOAA20_granule.bin");
        std::fs::write(&source, b"data").unwrap();
        let out = dir.path().join("out");
        let settings = iasi_settings(dir.path(), Some(&out));
        let decision = decision(&source, "NOAA-20", Verdict::PassFailOpen);

        let outcome = route(&decision, &settings).unwrap();
        assert_eq!(outcome.artifact().unwrap().filename, "NOAA20_granule.bin");
        assert!(out.join("NOAA20_granule.bin").is_file());
    }

    #[test]
    fn test_no_side_effects_without_pass_or_destination() {
        let dir = TempDir::new().unwrap();
        let source = dir.path().join("IASI_granule.bin");
        std::fs::write(&source, b"data").unwrap();
        let out = dir.path().join("out");

        let settings = iasi_settings(dir.path(), Some(&out));
        let outside = decision(&source, "METOPB", Verdict::Fail { coverage: 0.01 });
        assert_eq!(route(&outside, &settings).unwrap(), RouteOutcome::Discarded);
        assert!(!out.exists());

        let settings = iasi_settings(dir.path(), None);
        let inside = decision(&source, "METOPB", Verdict::Pass { coverage: 0.5 });
        assert_eq!(route(&inside, &settings).unwrap(), RouteOutcome::NoDestination);
    }

    #[test]
    fn test_missing_source_leaves_no_partial_file() {
        let dir = TempDir::new().unwrap();
        let out = dir.path().join("out");
        let target = out.join("target.bin");

        let result = copy_if_absent(&dir.path().join("gone.bin"), &target);
        assert!(result.is_err());
        assert!(!target.exists());
    }
}
