//! Configuration management for the feedstream engine.
//!
//! Configuration is layered from multiple sources:
//! 1. Default configuration (embedded in binary)
//! 2. System-wide configuration file (`/etc/feedstream/config.toml`)
//! 3. User-specified configuration file
//! 4. Environment variables (prefixed with `FEEDSTREAM_`, nested keys
//!    separated by `__`, e.g. `FEEDSTREAM_BUFFER__ENABLED=true`)
//! 5. Command-line arguments
//!
//! Later sources override earlier ones.

use crate::engine::{CsvSettings, EngineSettings};
use crate::error::Result;
use crate::feeds::FeedSettings;
use clap::Parser;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Command-line arguments
#[derive(Debug, Default, Parser)]
pub struct Args {
    /// Configuration file path
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// DuckDB path (or :memory:) for the feeds table
    #[arg(long)]
    pub metadata_connection: Option<String>,

    /// Root directory for file-backed engines
    #[arg(long)]
    pub datadir: Option<PathBuf>,

    /// Route posts through the low-latency write buffer
    #[arg(long)]
    pub buffer: Option<bool>,

    /// Request datapoint cap (0 disables it)
    #[arg(long)]
    pub max_datapoints: Option<u64>,

    /// Log level filter, e.g. `info` or `feedstream_core=debug`
    #[arg(long)]
    pub log_level: Option<String>,
}

/// Service configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceConfig {
    pub metadata: MetadataConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    pub engines: EnginesConfig,
    #[serde(default)]
    pub buffer: BufferConfig,
    #[serde(default)]
    pub query: QueryConfig,
    #[serde(default)]
    pub csv: CsvConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetadataConfig {
    /// DuckDB database path or `:memory:`
    pub connection: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self { enabled: true }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnginesConfig {
    /// Root of the `fixed/` and `variable/` data directories
    pub datadir: PathBuf,
    /// DuckDB database used by relational-table feeds
    #[serde(default = "default_memory_connection")]
    pub relational_connection: String,
}

/// Low-latency write buffer
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BufferConfig {
    #[serde(default)]
    pub enabled: bool,
    /// Pending points kept per feed before the oldest are dropped
    #[serde(default = "default_buffer_max_points")]
    pub max_points: usize,
}

impl Default for BufferConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            max_points: default_buffer_max_points(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryConfig {
    /// Maximum datapoints per request, 0 for unlimited
    #[serde(default = "default_max_datapoints")]
    pub max_datapoints: u64,
}

impl Default for QueryConfig {
    fn default() -> Self {
        Self {
            max_datapoints: default_max_datapoints(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CsvConfig {
    #[serde(default = "default_field_separator")]
    pub field_separator: String,
    #[serde(default = "default_decimal_separator")]
    pub decimal_separator: String,
    #[serde(default = "default_decimal_places")]
    pub decimal_places: i32,
}

impl Default for CsvConfig {
    fn default() -> Self {
        Self {
            field_separator: default_field_separator(),
            decimal_separator: default_decimal_separator(),
            decimal_places: default_decimal_places(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Write a log file here instead of logging to the console
    #[serde(default)]
    pub directory: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            directory: None,
        }
    }
}

impl ServiceConfig {
    /// Load configuration from all sources
    pub fn load(args: &Args) -> Result<Self> {
        let mut builder = config::Config::builder()
            .add_source(config::File::from_str(
                include_str!("../config/default.toml"),
                config::FileFormat::Toml,
            ))
            .add_source(config::File::with_name("/etc/feedstream/config.toml").required(false));

        if let Some(path) = &args.config {
            builder = builder.add_source(config::File::from(path.as_path()));
        }

        builder = builder.add_source(
            config::Environment::with_prefix("FEEDSTREAM")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        let mut config: ServiceConfig = builder.build()?.try_deserialize()?;
        config.apply_args(args);
        Ok(config)
    }

    fn apply_args(&mut self, args: &Args) {
        if let Some(connection) = &args.metadata_connection {
            self.metadata.connection = connection.clone();
        }
        if let Some(datadir) = &args.datadir {
            self.engines.datadir = datadir.clone();
        }
        if let Some(enabled) = args.buffer {
            self.buffer.enabled = enabled;
        }
        if let Some(max) = args.max_datapoints {
            self.query.max_datapoints = max;
        }
        if let Some(level) = &args.log_level {
            self.logging.level = level.clone();
        }
    }

    pub fn csv_settings(&self) -> CsvSettings {
        CsvSettings {
            field_separator: self.csv.field_separator.clone(),
            decimal_separator: self.csv.decimal_separator.clone(),
            decimal_places: self.csv.decimal_places,
        }
    }

    pub fn feed_settings(&self) -> FeedSettings {
        FeedSettings {
            buffer_enabled: self.buffer.enabled,
            max_datapoints: Some(self.query.max_datapoints).filter(|max| *max > 0),
            csv: self.csv_settings(),
        }
    }

    pub fn engine_settings(&self) -> EngineSettings {
        EngineSettings {
            datadir: self.engines.datadir.clone(),
            relational_connection: self.engines.relational_connection.clone(),
            buffer_max_points: self.buffer.max_points,
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_memory_connection() -> String {
    ":memory:".to_string()
}

fn default_buffer_max_points() -> usize {
    10_000
}

fn default_max_datapoints() -> u64 {
    8928
}

fn default_field_separator() -> String {
    ",".to_string()
}

fn default_decimal_separator() -> String {
    ".".to_string()
}

fn default_decimal_places() -> i32 {
    2
}

fn default_log_level() -> String {
    "info".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_defaults() {
        let config = ServiceConfig::load(&Args::default()).unwrap();
        assert_eq!(config.metadata.connection, ":memory:");
        assert!(config.cache.enabled);
        assert!(!config.buffer.enabled);
        assert_eq!(config.query.max_datapoints, 8928);
        assert_eq!(config.csv.field_separator, ",");
        assert_eq!(config.logging.level, "info");
        assert!(config.logging.directory.is_none());
    }

    #[test]
    fn test_args_override_file_values() {
        let args = Args {
            datadir: Some(PathBuf::from("/tmp/feeds")),
            buffer: Some(true),
            max_datapoints: Some(0),
            ..Args::default()
        };
        let config = ServiceConfig::load(&args).unwrap();
        assert_eq!(config.engines.datadir, PathBuf::from("/tmp/feeds"));

        let settings = config.feed_settings();
        assert!(settings.buffer_enabled);
        assert_eq!(settings.max_datapoints, None);
        assert_eq!(config.engine_settings().buffer_max_points, 10_000);
    }

    #[test]
    fn test_user_config_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("feedstream.toml");
        std::fs::write(&path, "[csv]\nfield_separator = \";\"\ndecimal_places = 4\n").unwrap();

        let args = Args {
            config: Some(path),
            ..Args::default()
        };
        let config = ServiceConfig::load(&args).unwrap();
        let csv = config.csv_settings();
        assert_eq!(csv.field_separator, ";");
        assert_eq!(csv.decimal_places, 4);
        assert_eq!(csv.decimal_separator, ".");
    }
}
