//! CLI command implementations.

pub mod browse;
pub mod check;

use anyhow::Context;
use browse::DataSource;
use std::path::Path;
use tessera_core::{ConfigError, TesseraConfig};

/// Unwrap a configuration load result, naming the file on failure.
pub fn load(
    path: &Path,
    loaded: Result<TesseraConfig, ConfigError>,
) -> anyhow::Result<TesseraConfig> {
    loaded.with_context(|| format!("Failed to load configuration from {}", path.display()))
}

/// Configuration for the browsing commands. Sample data needs no file: when
/// none exists the sample naming rules are used.
pub fn browse_config(
    path: &Path,
    loaded: Result<TesseraConfig, ConfigError>,
    data: DataSource,
) -> anyhow::Result<TesseraConfig> {
    match loaded {
        Err(ConfigError::Io(e)) if data == DataSource::Sample && e.kind() == std::io::ErrorKind::NotFound => {
            tracing::debug!(path = %path.display(), "No configuration file, using the sample naming rules");
            Ok(TesseraConfig {
                schemas: tessera_runtime::sample::schemas_config(),
                ..Default::default()
            })
        }
        loaded => load(path, loaded),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sample_data_needs_no_configuration_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tessera.yaml");

        let config = browse_config(&path, TesseraConfig::from_file(&path), DataSource::Sample).unwrap();
        assert_eq!(config.schemas, tessera_runtime::sample::schemas_config());

        let err = browse_config(&path, TesseraConfig::from_file(&path), DataSource::Postgres).unwrap_err();
        assert!(err.to_string().contains("tessera.yaml"));
    }
}
