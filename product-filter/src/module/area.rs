use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::config::{AREA_CONFIG_FILE, area_config_dir};

/// Target region: a polygon of (lon, lat) vertices in degrees
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AreaDefinition {
    #[serde(default)]
    pub id: String,

    #[serde(default)]
    pub description: String,

    pub polygon: Vec<[f64; 2]>,
}

#[derive(Debug, Error)]
pub enum AreaError {
    #[error("failed to read area file {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse area file {}: {source}", .path.display())]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },

    #[error("area '{0}' is not defined")]
    UnknownArea(String),

    #[error("area '{id}' has an invalid polygon: {reason}")]
    InvalidPolygon { id: String, reason: String },
}

/// Source of area definitions
pub trait AreaResolver: Send + Sync {
    fn load_area(&self, area_id: &str) -> Result<AreaDefinition, AreaError>;
}

#[derive(Debug, Deserialize)]
struct AreaFile {
    #[serde(default)]
    areas: HashMap<String, AreaDefinition>,
}

/// Reads `areas.toml` on every lookup, so edits apply without a restart:
///
/// ```toml
/// [areas.euron1]
/// description = "Northern Europe"
/// polygon = [[-10.0, 50.0], [40.0, 50.0], [40.0, 75.0], [-10.0, 75.0]]
/// ```
#[derive(Debug, Clone)]
pub struct FileAreaResolver {
    path: PathBuf,
}

impl FileAreaResolver {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    /// `areas.toml` in the directory named by `PYTROLL_CONFIG_DIR`
    pub fn from_env() -> Self {
        Self::new(area_config_dir().join(AREA_CONFIG_FILE))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl AreaResolver for FileAreaResolver {
    fn load_area(&self, area_id: &str) -> Result<AreaDefinition, AreaError> {
        let content = std::fs::read_to_string(&self.path).map_err(|source| AreaError::Io {
            path: self.path.clone(),
            source,
        })?;
        let file: AreaFile = toml::from_str(&content).map_err(|source| AreaError::Parse {
            path: self.path.clone(),
            source,
        })?;

        let mut area = file
            .areas
            .get(area_id)
            .cloned()
            .ok_or_else(|| AreaError::UnknownArea(area_id.to_string()))?;
        area.id = area_id.to_string();
        validate_polygon(&area)?;
        Ok(area)
    }
}

#[cfg(test)]
impl AreaResolver for HashMap<String, AreaDefinition> {
    fn load_area(&self, area_id: &str) -> Result<AreaDefinition, AreaError> {
        let area = self
            .get(area_id)
            .cloned()
            .ok_or_else(|| AreaError::UnknownArea(area_id.to_string()))?;
        validate_polygon(&area)?;
        Ok(area)
    }
}

fn validate_polygon(area: &AreaDefinition) -> Result<(), AreaError> {
    if area.polygon.len() < 3 {
        return Err(AreaError::InvalidPolygon {
            id: area.id.clone(),
            reason: format!("needs at least 3 vertices, got {}", area.polygon.len()),
        });
    }

    for [lon, lat] in &area.polygon {
        if !(-180.0..=360.0).contains(lon) || !(-90.0..=90.0).contains(lat) {
            return Err(AreaError::InvalidPolygon {
                id: area.id.clone(),
                reason: format!("vertex ({}, {}) is out of range", lon, lat),
            });
        }
    }

    Ok(())
}
