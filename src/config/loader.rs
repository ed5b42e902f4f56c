//! Configuration loader

use config::{Config, Environment, File};
use std::path::Path;

use super::types::AppConfig;
use crate::common::errors::{ClientError, Result};

/// Load configuration from file and environment variables
///
/// Priority (highest to lowest):
/// 1. Environment variables (prefixed with APP_, nested with `__`)
/// 2. Configuration file (TOML format)
/// 3. Default values
pub fn load_config(config_path: Option<&str>) -> Result<AppConfig> {
    let mut builder = Config::builder();

    if let Some(path) = config_path {
        if Path::new(path).exists() {
            builder = builder.add_source(File::with_name(path).required(false));
        }
    }

    builder = builder.add_source(
        Environment::with_prefix("APP")
            .separator("__")
            .try_parsing(true),
    );

    let config = builder
        .build()
        .map_err(|e| ClientError::Configuration(e.to_string()))?;

    let app_config: AppConfig = config
        .try_deserialize()
        .map_err(|e| ClientError::Configuration(e.to_string()))?;

    app_config.validate()?;
    Ok(app_config)
}

/// Parse configuration from a TOML string (used by tests and `--dry-run`)
pub fn load_from_str(toml: &str) -> Result<AppConfig> {
    let config = Config::builder()
        .add_source(File::from_str(toml, config::FileFormat::Toml))
        .build()
        .map_err(|e| ClientError::Configuration(e.to_string()))?;

    let app_config: AppConfig = config
        .try_deserialize()
        .map_err(|e| ClientError::Configuration(e.to_string()))?;

    app_config.validate()?;
    Ok(app_config)
}
