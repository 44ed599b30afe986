//! Configuration for Tessera.
//!
//! A single YAML file (`tessera.yaml` by default) holds the upstream database
//! connection, the schema discovery and naming rules, and logging defaults.
//! [`TesseraConfig::from_file`] parses and validates it; any error is fatal at
//! startup.

pub mod schemas;
pub mod upstream;

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

pub use schemas::{RefreshConfig, SchemaRule, SchemasConfig};
pub use upstream::{PoolConfig, SslMode, UpstreamConfig};

/// Complete Tessera configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TesseraConfig {
    /// Upstream PostgreSQL connection.
    #[serde(default)]
    pub upstream: UpstreamConfig,

    /// Schema discovery and collection naming.
    #[serde(default)]
    pub schemas: SchemasConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Logging defaults. `RUST_LOG` takes precedence when set.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// A `tracing` filter directive, e.g. `info,tessera_runtime=debug`.
    #[serde(default = "default_log_filter")]
    pub filter: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: default_log_filter(),
        }
    }
}

fn default_log_filter() -> String {
    "info".to_string()
}

/// Error type for configuration loading and naming-rule validation.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML parse error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("The schema delimiter must not be empty")]
    EmptyDelimiter,

    #[error("The '*' schema wildcard can't have prefix_tables=false")]
    WildcardUnprefixed,

    #[error("Multiple schemas configured with prefix_tables=false: {}", .0.join(","))]
    MultipleUnprefixed(Vec<String>),

    #[error("Invalid schema rule '{schema}': {reason}")]
    InvalidRule { schema: String, reason: String },

    #[error("Alias '{0}' is configured for more than one schema")]
    DuplicateAlias(String),

    #[error("Asked to unalias an empty prefix but no schema is configured with prefix_tables=false")]
    NoUnprefixedSchema,
}

impl TesseraConfig {
    /// Load and validate configuration from a YAML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path.as_ref())?;
        Self::from_yaml(&content)
    }

    /// Parse and validate configuration from YAML content.
    pub fn from_yaml(content: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_yaml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.schemas.validate()?;
        if self.upstream.pool.max_connections == 0 {
            return Err(ConfigError::Config(
                "upstream.pool.max_connections must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}
