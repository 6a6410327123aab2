use chrono::{DateTime, SecondsFormat, Utc};
use std::process::Command;
use thiserror::Error;

use super::area::AreaDefinition;
use super::tle::TwoLineElements;

const EXIT_UNKNOWN_PLATFORM: i32 = 3;

/// Everything a propagator needs to compute one pass's coverage
#[derive(Debug, Clone)]
pub struct PassRequest<'a> {
    pub platform: &'a str,
    pub instrument: &'a str,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub elements: &'a TwoLineElements,
    pub area: &'a AreaDefinition,
}

#[derive(Debug, Error)]
pub enum OrbitError {
    #[error("no orbital parameters for platform '{0}'")]
    UnknownPlatform(String),

    #[error("failed to read TLE file: {0}")]
    Tle(#[from] std::io::Error),

    #[error("coverage command failed: {0}")]
    Command(String),
}

pub trait OrbitPropagator: Send + Sync {
    /// Fraction (0..=1) of `request.area` swept by the pass
    fn area_coverage(&self, request: &PassRequest<'_>) -> Result<f64, OrbitError>;
}

/// Propagator backed by an external program, called as
/// `<command...> PLATFORM INSTRUMENT START END TLE_LINE1 TLE_LINE2 AREA_ID POLYGON`.
///
/// Times are RFC 3339, POLYGON is `lon,lat;lon,lat;...`. The program prints
/// the coverage fraction on stdout and exits 0, or exits 3 when it has no
/// orbital parameters for the platform.
#[derive(Debug, Clone)]
pub struct CommandPropagator {
    program: String,
    args: Vec<String>,
}

impl CommandPropagator {
    /// `command` is the program followed by its fixed leading arguments
    pub fn new(command: &[String]) -> Option<Self> {
        let (program, args) = command.split_first()?;
        Some(Self {
            program: program.clone(),
            args: args.to_vec(),
        })
    }
}

impl OrbitPropagator for CommandPropagator {
    fn area_coverage(&self, request: &PassRequest<'_>) -> Result<f64, OrbitError> {
        let polygon = request
            .area
            .polygon
            .iter()
            .map(|[lon, lat]| format!("{},{}", lon, lat))
            .collect::<Vec<_>>()
            .join(";");

        let output = Command::new(&self.program)
            .args(&self.args)
            .arg(request.platform)
            .arg(request.instrument)
            .arg(request.start_time.to_rfc3339_opts(SecondsFormat::Secs, true))
            .arg(request.end_time.to_rfc3339_opts(SecondsFormat::Secs, true))
            .arg(&request.elements.line1)
            .arg(&request.elements.line2)
            .arg(&request.area.id)
            .arg(polygon)
            .output()
            .map_err(|e| OrbitError::Command(format!("cannot run {}: {}", self.program, e)))?;

        match output.status.code() {
            Some(0) => {
                let stdout = String::from_utf8_lossy(&output.stdout);
                parse_coverage(&stdout)
            }
            Some(EXIT_UNKNOWN_PLATFORM) => {
                Err(OrbitError::UnknownPlatform(request.platform.to_string()))
            }
            status => Err(OrbitError::Command(format!(
                "{} exited with {:?}: {}",
                self.program,
                status,
                String::from_utf8_lossy(&output.stderr).trim()
            ))),
        }
    }
}

fn parse_coverage(stdout: &str) -> Result<f64, OrbitError> {
    let text = stdout.trim();
    let coverage: f64 = text
        .parse()
        .map_err(|_| OrbitError::Command(format!("unparsable coverage '{}'", text)))?;

    if !(0.0..=1.0).contains(&coverage) {
        return Err(OrbitError::Command(format!("coverage {} is outside [0, 1]", coverage)));
    }
    Ok(coverage)
}
