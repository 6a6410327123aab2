use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use product_filter_common::Instrument;

use crate::module::tle::FilenamePattern;

/// Environment variable naming the directory that holds `areas.toml`
pub const AREA_CONFIG_ENV: &str = "PYTROLL_CONFIG_DIR";
pub const AREA_CONFIG_FILE: &str = "areas.toml";

/// A setting that may be written either as a single value or as a list
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum OneOrMany<T> {
    One(T),
    Many(Vec<T>),
}

impl<T: Clone> OneOrMany<T> {
    pub fn to_vec(&self) -> Vec<T> {
        match self {
            OneOrMany::One(value) => vec![value.clone()],
            OneOrMany::Many(values) => values.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProductFilterConfig {
    #[serde(default = "default_log_level")]
    pub log_level: String,

    #[serde(default)]
    pub log_dir: Option<PathBuf>,

    #[serde(default = "default_log_retention_days")]
    pub log_retention_days: u64,

    /// One section per service, selected on the command line
    #[serde(default)]
    pub services: HashMap<String, ServiceConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceConfig {
    pub instrument: String,
    pub tle_dir: OneOrMany<PathBuf>,
    pub tlefilename: String,
    pub areas_of_interest: OneOrMany<String>,
    pub min_coverage: f64,

    #[serde(default)]
    pub passlength_seconds: Option<u64>,

    /// Copy and announce granules only when set
    #[serde(default)]
    pub destination: Option<PathBuf>,

    pub message_types: Vec<String>,
    pub publish_topic: String,

    #[serde(default)]
    pub subscribe_addresses: Vec<String>,

    #[serde(default = "default_publish_address")]
    pub publish_address: String,

    #[serde(default)]
    pub coverage_command: Vec<String>,

    #[serde(default = "default_tle_max_age_days")]
    pub tle_max_age_days: u64,

    #[serde(default)]
    pub reject_stale_tle: bool,

    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,

    #[serde(default = "default_queue_wait_ms")]
    pub queue_wait_ms: u64,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_retention_days() -> u64 {
    7
}

fn default_publish_address() -> String {
    "0.0.0.0:40002".to_string()
}

fn default_tle_max_age_days() -> u64 {
    5
}

fn default_queue_capacity() -> usize {
    100
}

fn default_queue_wait_ms() -> u64 {
    1000
}

/// Validated settings of one service, built once at startup and shared
/// by every component
#[derive(Debug, Clone)]
pub struct ServiceSettings {
    pub service: String,
    pub instrument: Instrument,
    pub tle_dirs: Vec<PathBuf>,
    pub tle_pattern: FilenamePattern,
    pub tle_max_age: chrono::Duration,
    pub reject_stale_tle: bool,
    pub areas_of_interest: Vec<String>,
    pub min_coverage: f64,
    pub pass_length: chrono::Duration,
    pub destination: Option<PathBuf>,
    pub message_types: Vec<String>,
    pub publish_topic: String,
    pub subscribe_addresses: Vec<String>,
    pub publish_address: String,
    pub coverage_command: Vec<String>,
    pub queue_capacity: usize,
    pub queue_wait: Duration,
}

impl ProductFilterConfig {
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        check_config_path(path)?;

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        let config: ProductFilterConfig = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file {}", path.display()))?;
        Ok(config)
    }

    /// Settings for the named service section
    pub fn service(&self, name: &str) -> Result<ServiceSettings> {
        let name = name.to_lowercase();
        let section = self
            .services
            .iter()
            .find(|(key, _)| key.to_lowercase() == name)
            .map(|(_, section)| section)
            .with_context(|| format!("No [services.{}] section in config", name))?;

        section.clone().into_settings(&name)
    }
}

impl ServiceConfig {
    pub fn into_settings(self, service: &str) -> Result<ServiceSettings> {
        if self.instrument.trim().is_empty() {
            bail!("instrument must not be empty");
        }
        if !(self.min_coverage > 0.0 && self.min_coverage <= 1.0) {
            bail!("min_coverage must be in (0, 1], got {}", self.min_coverage);
        }

        let tle_dirs = self.tle_dir.to_vec();
        if tle_dirs.is_empty() {
            bail!("tle_dir must name at least one directory");
        }

        let areas_of_interest = self.areas_of_interest.to_vec();
        if areas_of_interest.is_empty() {
            bail!("areas_of_interest must name at least one area");
        }

        if self.message_types.is_empty() {
            bail!("message_types must list at least one topic");
        }
        if self.queue_capacity == 0 {
            bail!("queue_capacity must be positive");
        }
        if self.queue_wait_ms == 0 {
            bail!("queue_wait_ms must be positive");
        }

        let tle_pattern = FilenamePattern::parse(&self.tlefilename)
            .with_context(|| format!("Invalid tlefilename pattern '{}'", self.tlefilename))?;

        let instrument: Instrument = match self.instrument.parse() {
            Ok(instrument) => instrument,
            Err(never) => match never {},
        };
        let pass_length = match self.passlength_seconds {
            Some(0) => bail!("passlength_seconds must be positive"),
            Some(seconds) => i64::try_from(seconds)
                .ok()
                .and_then(chrono::Duration::try_seconds)
                .with_context(|| format!("passlength_seconds {} is out of range", seconds))?,
            None => chrono::Duration::seconds(instrument.default_pass_seconds()),
        };
        let tle_max_age = i64::try_from(self.tle_max_age_days)
            .ok()
            .and_then(chrono::Duration::try_days)
            .with_context(|| format!("tle_max_age_days {} is out of range", self.tle_max_age_days))?;

        Ok(ServiceSettings {
            service: service.to_string(),
            instrument,
            tle_dirs,
            tle_pattern,
            tle_max_age,
            reject_stale_tle: self.reject_stale_tle,
            areas_of_interest,
            min_coverage: self.min_coverage,
            pass_length,
            destination: self.destination,
            message_types: self.message_types,
            publish_topic: self.publish_topic,
            subscribe_addresses: self.subscribe_addresses,
            publish_address: self.publish_address,
            coverage_command: self.coverage_command,
            queue_capacity: self.queue_capacity,
            queue_wait: Duration::from_millis(self.queue_wait_ms),
        })
    }
}

/// Template files are shipped as examples and must never run a service
pub fn check_config_path(path: &Path) -> Result<()> {
    if path.to_string_lossy().to_lowercase().contains("template") {
        bail!("Cannot accept a template file as master config: {}", path.display());
    }
    Ok(())
}

/// Directory holding the area definitions, from `PYTROLL_CONFIG_DIR`
pub fn area_config_dir() -> PathBuf {
    std::env::var_os(AREA_CONFIG_ENV)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("."))
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;

    /// Settings for an iasi service reading TLEs from `tle_dir`
    pub(crate) fn iasi_settings(tle_dir: &Path, destination: Option<&Path>) -> ServiceSettings {
        let section = ServiceConfig {
            instrument: "iasi".to_string(),
            tle_dir: OneOrMany::One(tle_dir.to_path_buf()),
            tlefilename: "tle-{time:%Y%m%d%H%M}.txt".to_string(),
            areas_of_interest: OneOrMany::One("euron1".to_string()),
            min_coverage: 0.1,
            passlength_seconds: None,
            destination: destination.map(Path::to_path_buf),
            message_types: vec!["/SOUNDING/IASI/L2/TWT".to_string()],
            publish_topic: "/IASI/L2/TWT/filtered".to_string(),
            subscribe_addresses: Vec::new(),
            publish_address: default_publish_address(),
            coverage_command: Vec::new(),
            tle_max_age_days: default_tle_max_age_days(),
            reject_stale_tle: false,
            queue_capacity: default_queue_capacity(),
            queue_wait_ms: 50,
        };
        section.into_settings("iasi-lvl2").unwrap()
    }
}
