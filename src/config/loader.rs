//! Reading and writing the configuration file.

use std::fs;
use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::config::schema::Configuration;
use crate::config::validation::validate_config;

/// Error type for configuration loading and persisting.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("parse error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("validation failed: {}", .0.join(", "))]
    Validation(Vec<String>),

    #[error("failed to render configuration: {0}")]
    Render(#[from] toml::ser::Error),

    #[error("failed to write {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Parse and validate configuration text.
pub fn parse_config(content: &str) -> Result<Configuration, ConfigError> {
    let config: Configuration = toml::from_str(content)?;
    validate_config(&config).map_err(ConfigError::Validation)?;
    Ok(config)
}

/// Load and validate configuration from a TOML file.
pub fn load_config(path: &Path) -> Result<Configuration, ConfigError> {
    let content = fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    parse_config(&content)
}

/// Render configuration in its persisted form.
///
/// Output is deterministic: users are ordered by identifier.
pub fn render_config(config: &Configuration) -> Result<String, ConfigError> {
    Ok(toml::to_string_pretty(config)?)
}

/// Persist configuration, replacing the file in a single rename so that
/// concurrent readers never see a partial write.
pub fn write_config(path: &Path, config: &Configuration) -> Result<(), ConfigError> {
    let rendered = render_config(config)?;
    let staging = staging_path(path);
    let write_err = |source| ConfigError::Write {
        path: path.to_path_buf(),
        source,
    };

    fs::write(&staging, rendered.as_bytes()).map_err(write_err)?;
    if let Err(source) = fs::rename(&staging, path) {
        let _ = fs::remove_file(&staging);
        return Err(write_err(source));
    }
    Ok(())
}

fn staging_path(path: &Path) -> PathBuf {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "config.toml".to_string());
    path.with_file_name(format!(".{}.tmp", name))
}
