use chrono::{DateTime, Utc};
use std::path::{Path, PathBuf};
use tracing::{debug, error};

use product_filter_common::{Instrument, Platform};

use super::area::AreaDefinition;
use super::orbit::{OrbitError, OrbitPropagator, PassRequest};
use super::tle::read_elements;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Verdict {
    /// Coverage above the threshold
    Pass { coverage: f64 },
    /// Coverage at or below the threshold
    Fail { coverage: f64 },
    /// No orbital parameters for the platform; assumed inside
    PassFailOpen,
}

impl Verdict {
    /// Strict comparison: coverage equal to the threshold fails
    pub fn from_coverage(coverage: f64, min_coverage: f64) -> Self {
        if coverage > min_coverage {
            Verdict::Pass { coverage }
        } else {
            Verdict::Fail { coverage }
        }
    }

    pub fn is_pass(&self) -> bool {
        !matches!(self, Verdict::Fail { .. })
    }

    pub fn coverage(&self) -> Option<f64> {
        match self {
            Verdict::Pass { coverage } | Verdict::Fail { coverage } => Some(*coverage),
            Verdict::PassFailOpen => None,
        }
    }
}

/// Verdict for one area, with the TLE file it was computed from
#[derive(Debug, Clone, PartialEq)]
pub struct CoverageVerdict {
    pub area_id: String,
    pub verdict: Verdict,
    pub tle_file: PathBuf,
}

pub struct CoverageEvaluator<'a> {
    propagator: &'a dyn OrbitPropagator,
    min_coverage: f64,
}

impl<'a> CoverageEvaluator<'a> {
    pub fn new(propagator: &'a dyn OrbitPropagator, min_coverage: f64) -> Self {
        Self {
            propagator,
            min_coverage,
        }
    }

    pub fn evaluate(
        &self,
        platform: &Platform,
        instrument: &Instrument,
        start_time: DateTime<Utc>,
        end_time: DateTime<Utc>,
        tle_path: &Path,
        area: &AreaDefinition,
    ) -> Result<CoverageVerdict, OrbitError> {
        let verdict = |verdict| CoverageVerdict {
            area_id: area.id.clone(),
            verdict,
            tle_file: tle_path.to_path_buf(),
        };

        let Some(elements) = read_elements(tle_path, platform.name())? else {
            fail_open(platform, tle_path);
            return Ok(verdict(Verdict::PassFailOpen));
        };

        let request = PassRequest {
            platform: platform.name(),
            instrument: instrument.as_str(),
            start_time,
            end_time,
            elements: &elements,
            area,
        };

        match self.propagator.area_coverage(&request) {
            Ok(coverage) => {
                debug!("Granule coverage of area {}: {:.4}", area.id, coverage);
                Ok(verdict(Verdict::from_coverage(coverage, self.min_coverage)))
            }
            Err(OrbitError::UnknownPlatform(_)) => {
                fail_open(platform, tle_path);
                Ok(verdict(Verdict::PassFailOpen))
            }
            Err(e) => Err(e),
        }
    }
}

fn fail_open(platform: &Platform, tle_path: &Path) {
    error!(
        "CRITICAL: Cannot determine orbit for {} from {:?}! Probably TLE file problems. \
         Granule will be set to be inside area of interest disregarding",
        platform, tle_path
    );
}
