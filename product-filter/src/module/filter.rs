use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use std::path::PathBuf;
use thiserror::Error;
use tracing::{debug, info};

use product_filter_common::{GranuleMessage, MessageError, Platform};

use super::area::{AreaError, AreaResolver};
use super::coverage::{CoverageEvaluator, CoverageVerdict};
use super::orbit::{OrbitError, OrbitPropagator};
use super::tle::{TleError, TleSelection, select_tle};
use crate::config::ServiceSettings;

#[derive(Debug, Error)]
pub enum FilterError {
    #[error("inconsistent message: {0}")]
    InconsistentMessage(#[from] MessageError),

    #[error("scene not supported: instruments {instruments:?}, this filter handles '{expected}'")]
    SceneNotSupported {
        instruments: Vec<String>,
        expected: String,
    },

    #[error("no valid TLEs: {0}")]
    NoValidTles(#[from] TleError),

    #[error("source file {} does not exist", .0.display())]
    MissingSourceFile(PathBuf),

    #[error("area config: {0}")]
    AreaConfig(#[from] AreaError),

    #[error("coverage computation failed: {0}")]
    Coverage(#[from] OrbitError),
}

/// Outcome of filtering one granule
#[derive(Debug, Clone)]
pub struct GranuleDecision {
    pub granule: GranuleMessage,
    pub platform: Platform,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub tle: TleSelection,
    /// Areas evaluated, in configured order; only the last one can pass
    pub evaluations: Vec<CoverageVerdict>,
}

impl GranuleDecision {
    pub fn is_inside(&self) -> bool {
        self.matched_area().is_some()
    }

    /// The area that admitted the granule
    pub fn matched_area(&self) -> Option<&CoverageVerdict> {
        self.evaluations.last().filter(|v| v.verdict.is_pass())
    }
}

pub struct GranuleFilter<'a> {
    settings: &'a ServiceSettings,
    propagator: &'a dyn OrbitPropagator,
    areas: &'a dyn AreaResolver,
}

impl<'a> GranuleFilter<'a> {
    pub fn new(
        settings: &'a ServiceSettings,
        propagator: &'a dyn OrbitPropagator,
        areas: &'a dyn AreaResolver,
    ) -> Self {
        Self {
            settings,
            propagator,
            areas,
        }
    }

    pub fn filter(
        &self,
        data: &Map<String, Value>,
        now: DateTime<Utc>,
    ) -> Result<GranuleDecision, FilterError> {
        let granule = GranuleMessage::from_data(data)?;

        let expected = &self.settings.instrument;
        if !granule.instruments.iter().any(|name| expected.matches(name)) {
            return Err(FilterError::SceneNotSupported {
                instruments: granule.instruments.clone(),
                expected: expected.to_string(),
            });
        }

        let start_time = granule.start_time;
        let end_time = granule.end_time.unwrap_or_else(|| {
            debug!("No end time in message, assuming a {} s pass", self.settings.pass_length.num_seconds());
            start_time + self.settings.pass_length
        });

        if !granule.source_path.is_file() {
            return Err(FilterError::MissingSourceFile(granule.source_path.clone()));
        }

        let platform = Platform::resolve(&granule.satellite);
        info!("Sat and Instrument: {} {}", platform, expected);

        let tle = select_tle(
            &self.settings.tle_dirs,
            &self.settings.tle_pattern,
            now,
            self.settings.tle_max_age,
        )?;
        if self.settings.reject_stale_tle && !tle.within_tolerance {
            return Err(TleError::Stale {
                path: tle.file.path.clone(),
                distance_hours: tle.distance.num_hours(),
                max_age_days: self.settings.tle_max_age.num_days(),
            }
            .into());
        }
        debug!("Valid TLE file: {:?}", tle.file.path);

        let evaluator = CoverageEvaluator::new(self.propagator, self.settings.min_coverage);
        let mut evaluations = Vec::new();
        for area_id in &self.settings.areas_of_interest {
            let area = self.areas.load_area(area_id)?;
            let result = evaluator.evaluate(
                &platform,
                expected,
                start_time,
                end_time,
                tle.path(),
                &area,
            )?;
            let inside = result.verdict.is_pass();
            evaluations.push(result);
            if inside {
                break;
            }
        }

        Ok(GranuleDecision {
            granule,
            platform,
            start_time,
            end_time,
            tle,
            evaluations,
        })
    }
}
