//! Configuration management for manifest auditing.
//!
//! Loads configuration from a TOML file with `MANIFEST_AUDIT__*` environment
//! variable overrides, e.g. `MANIFEST_AUDIT__AGGREGATE__DEPTH=4`.

use crate::aggregate::{DEFAULT_CHUNK_SIZE, DEFAULT_DEPTH};
use crate::manifest::normalize::{PathNormalizer, DEFAULT_BACKUP_PREFIX, DEFAULT_COLLECTION_ROOT};
use crate::manifest::NumericPolicy;
use crate::progress::DEFAULT_PROGRESS_INTERVAL;
use crate::utils::errors::AuditError;
use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::path::Path;

pub const ENV_PREFIX: &str = "MANIFEST_AUDIT";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub paths: PathsConfig,
    pub parse: ParseConfig,
    pub aggregate: AggregateConfig,
    pub log: LogConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PathsConfig {
    /// Directory the filelist scan was collected under
    #[serde(default = "default_collection_root")]
    pub collection_root: String,

    /// Prefix that replaces `collection_root` in filelist paths
    #[serde(default = "default_backup_prefix")]
    pub backup_prefix: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParseConfig {
    /// How unparsable size/mtime fields are recorded (strict, coerce_zero)
    #[serde(default)]
    pub numeric_policy: NumericPolicy,

    /// Lines between progress events
    #[serde(default = "default_progress_interval")]
    pub progress_interval: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AggregateConfig {
    /// Path components below the base that get their own bucket
    #[serde(default = "default_depth")]
    pub depth: usize,

    /// Lines per worker chunk
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,

    /// Worker count (default: available hardware parallelism)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parallelism: Option<usize>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
}

// Default values
fn default_collection_root() -> String {
    DEFAULT_COLLECTION_ROOT.to_string()
}

fn default_backup_prefix() -> String {
    DEFAULT_BACKUP_PREFIX.to_string()
}

fn default_progress_interval() -> u64 {
    DEFAULT_PROGRESS_INTERVAL
}

fn default_depth() -> usize {
    DEFAULT_DEPTH
}

fn default_chunk_size() -> usize {
    DEFAULT_CHUNK_SIZE
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            collection_root: default_collection_root(),
            backup_prefix: default_backup_prefix(),
        }
    }
}

impl Default for ParseConfig {
    fn default() -> Self {
        Self {
            numeric_policy: NumericPolicy::default(),
            progress_interval: default_progress_interval(),
        }
    }
}

impl Default for AggregateConfig {
    fn default() -> Self {
        Self {
            depth: default_depth(),
            chunk_size: default_chunk_size(),
            parallelism: None,
        }
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file, then apply environment overrides
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        Self::load(Some(path))
    }

    /// Load defaults, an optional TOML file and environment overrides, in
    /// increasing order of precedence
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        Self::load_with_env(path, config::Environment::with_prefix(ENV_PREFIX))
    }

    fn load_with_env(path: Option<&Path>, env: config::Environment) -> anyhow::Result<Self> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path).format(config::FileFormat::Toml));
        }
        let settings = builder
            .add_source(env.prefix_separator("__").separator("__").try_parsing(true))
            .build()
            .with_context(|| match path {
                Some(path) => format!("Failed to load configuration from {}", path.display()),
                None => "Failed to load configuration".to_string(),
            })?;

        let config: Config = settings.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Parse configuration from TOML text, without environment overrides
    pub fn from_toml_str(content: &str) -> anyhow::Result<Self> {
        let config: Config = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Render the effective configuration as TOML
    pub fn to_toml_string(&self) -> anyhow::Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    pub fn validate(&self) -> Result<(), AuditError> {
        if self.aggregate.depth == 0 {
            return Err(AuditError::Config("aggregate.depth must be at least 1".to_string()));
        }
        if self.aggregate.chunk_size == 0 {
            return Err(AuditError::Config("aggregate.chunk_size must be at least 1".to_string()));
        }
        if self.aggregate.parallelism == Some(0) {
            return Err(AuditError::Config("aggregate.parallelism must be at least 1".to_string()));
        }
        if self.parse.progress_interval == 0 {
            return Err(AuditError::Config("parse.progress_interval must be at least 1".to_string()));
        }
        if !self.paths.collection_root.starts_with('/') {
            return Err(AuditError::Config(format!(
                "paths.collection_root must be absolute: {}",
                self.paths.collection_root
            )));
        }
        Ok(())
    }

    pub fn normalizer(&self) -> PathNormalizer {
        PathNormalizer::new(self.paths.collection_root.clone(), self.paths.backup_prefix.clone())
    }
}
