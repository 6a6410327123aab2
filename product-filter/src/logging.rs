use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::{
    fs,
    path::{Path, PathBuf},
    time::{Duration, SystemTime},
};
use tokio::task;
use tracing::level_filters::LevelFilter;
use tracing_appender::non_blocking::{NonBlocking, WorkerGuard};
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use crate::config::ProductFilterConfig;

/// Keeps the file writer flushing until dropped
#[allow(dead_code)]
pub struct LoggerGuard(Option<WorkerGuard>);

/// Logging settings, from the main config or a dedicated `-l` file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_level")]
    pub level: String,

    /// Console only when unset
    #[serde(default)]
    pub log_dir: Option<PathBuf>,

    #[serde(default = "default_prefix")]
    pub prefix: String,

    #[serde(default = "default_retention_days")]
    pub retention_days: u64,

    #[serde(default = "default_ansi")]
    pub ansi: bool,
}

fn default_level() -> String {
    "info".to_string()
}

fn default_prefix() -> String {
    "product-filter".to_string()
}

fn default_retention_days() -> u64 {
    7
}

fn default_ansi() -> bool {
    true
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_level(),
            log_dir: None,
            prefix: default_prefix(),
            retention_days: default_retention_days(),
            ansi: default_ansi(),
        }
    }
}

impl LoggingConfig {
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read logging config {}", path.display()))?;
        toml::from_str(&content)
            .with_context(|| format!("Failed to parse logging config {}", path.display()))
    }

    /// Logging section of the main config file, prefixed with the service name
    pub fn from_service_config(config: &ProductFilterConfig, service: &str) -> Self {
        Self {
            level: config.log_level.clone(),
            log_dir: config.log_dir.clone(),
            prefix: format!("product-filter-{}", service),
            retention_days: config.log_retention_days,
            ..Self::default()
        }
    }
}

fn normalize_level(level: &str) -> LevelFilter {
    match level.to_lowercase().as_str() {
        "trace" => LevelFilter::TRACE,
        "debug" => LevelFilter::DEBUG,
        "info" => LevelFilter::INFO,
        "warn" | "warning" => LevelFilter::WARN,
        "error" | "critical" => LevelFilter::ERROR,
        _ => {
            eprintln!("Invalid log level '{}', defaulting to 'info'", level);
            LevelFilter::INFO
        }
    }
}

/// Install the global subscriber. `verbose` forces debug level.
pub fn init_logging(config: &LoggingConfig, verbose: bool) -> Result<LoggerGuard> {
    let level = if verbose {
        LevelFilter::DEBUG
    } else {
        normalize_level(&config.level)
    };

    let directives = std::env::var("RUST_LOG").unwrap_or_default();
    let builder = EnvFilter::builder().with_default_directive(level.into());

    let (file_layer, guard) = match &config.log_dir {
        Some(log_dir) => {
            let file_appender = RollingFileAppender::builder()
                .rotation(Rotation::DAILY)
                .filename_prefix(&config.prefix)
                .filename_suffix("log")
                .build(log_dir)
                .with_context(|| {
                    format!("Failed to create log appender in {}", log_dir.display())
                })?;
            let (non_blocking, guard) = NonBlocking::new(file_appender);

            let layer = fmt::layer()
                .with_writer(non_blocking)
                .with_ansi(false)
                .with_filter(builder.clone().parse_lossy(&directives));
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    let stdout_layer = fmt::layer()
        .with_writer(std::io::stdout)
        .with_ansi(config.ansi)
        .with_filter(builder.parse_lossy(&directives));

    tracing_subscriber::registry()
        .with(file_layer)
        .with(stdout_layer)
        .init();

    if let Some(log_dir) = &config.log_dir {
        let max_age = Duration::from_secs(60 * 60 * 24 * config.retention_days);
        start_log_cleanup_task(log_dir.clone(), config.prefix.clone(), max_age);
    }

    Ok(LoggerGuard(guard))
}

fn start_log_cleanup_task(log_dir: PathBuf, prefix: String, max_age: Duration) {
    const CLEANUP_INTERVAL: Duration = Duration::from_secs(60 * 60);

    task::spawn(async move {
        loop {
            if let Err(e) = cleanup_old_logs(&log_dir, &prefix, max_age) {
                tracing::warn!("Failed to delete old log file: {}", e);
            }
            tokio::time::sleep(CLEANUP_INTERVAL).await;
        }
    });
}

fn cleanup_old_logs(log_dir: &Path, prefix: &str, max_age: Duration) -> std::io::Result<usize> {
    let now = SystemTime::now();
    let mut removed = 0;

    for entry in fs::read_dir(log_dir)? {
        let path = entry?.path();
        let Some(file_name) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        if !(file_name.starts_with(prefix) && file_name.ends_with(".log")) {
            continue;
        }

        let modified = fs::metadata(&path)?.modified()?;
        if now.duration_since(modified).unwrap_or_default() > max_age {
            fs::remove_file(&path)?;
            tracing::info!("Old log file deleted: {}", file_name);
            removed += 1;
        }
    }
    Ok(removed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_level_names() {
        assert_eq!(normalize_level("DEBUG"), LevelFilter::DEBUG);
        assert_eq!(normalize_level("warning"), LevelFilter::WARN);
        assert_eq!(normalize_level("loud"), LevelFilter::INFO);
    }

    #[test]
    fn test_logging_config_defaults() {
        let config: LoggingConfig = toml::from_str("level = \"debug\"").unwrap();
        assert_eq!(config.level, "debug");
        assert_eq!(config.prefix, "product-filter");
        assert_eq!(config.retention_days, 7);
        assert!(config.log_dir.is_none());
    }

    #[tokio::test]
    async fn test_file_logging_writes_under_prefix() {
        let dir = TempDir::new().unwrap();
        let config = LoggingConfig {
            log_dir: Some(dir.path().to_path_buf()),
            prefix: "product-filter-test".to_string(),
            ansi: false,
            ..LoggingConfig::default()
        };

        let guard = init_logging(&config, false).unwrap();
        tracing::info!("file layer installed");
        drop(guard);

        let names: Vec<String> = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|entry| entry.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert!(names.iter().any(|name| name.starts_with("product-filter-test")));
    }

    #[test]
    fn test_cleanup_only_touches_own_logs() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("product-filter.2023-06-21.log"), b"old").unwrap();
        std::fs::write(dir.path().join("other.2023-06-21.log"), b"keep").unwrap();
        std::fs::write(dir.path().join("product-filter.txt"), b"keep").unwrap();
        std::thread::sleep(Duration::from_millis(20));

        let removed = cleanup_old_logs(dir.path(), "product-filter", Duration::ZERO).unwrap();
        assert_eq!(removed, 1);
        assert!(!dir.path().join("product-filter.2023-06-21.log").exists());
        assert!(dir.path().join("other.2023-06-21.log").exists());
        assert!(dir.path().join("product-filter.txt").exists());
    }
}
