use std::fs;
use std::path::{Path, PathBuf};

use crate::model::catalog::{BUILTIN_CATALOG, StaticCatalog};
use crate::model::config::EditorConfig;

pub const CONFIG_FILE: &str = "flowedit.toml";
pub const CATALOG_FILE: &str = "catalog.toml";

/// Error type for reading and writing project configuration
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("could not read {path}: {source}")]
    ReadError {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("could not parse {path}: {source}")]
    ParseError {
        path: PathBuf,
        source: toml::de::Error,
    },
    #[error("could not serialize configuration: {0}")]
    SerializeError(#[from] toml::ser::Error),
    #[error("io error: {0}")]
    IoError(#[from] std::io::Error),
}

/// Read `flowedit.toml` from `dir`. A missing file means all defaults.
pub fn read_config(dir: &Path) -> Result<EditorConfig, ConfigError> {
    let path = dir.join(CONFIG_FILE);
    if !path.exists() {
        return Ok(EditorConfig::default());
    }
    let text = read_text(&path)?;
    toml::from_str(&text).map_err(|source| ConfigError::ParseError { path, source })
}

/// Read the definition catalog from `catalog.toml` in `dir`.
pub fn read_catalog(dir: &Path) -> Result<StaticCatalog, ConfigError> {
    let path = dir.join(CATALOG_FILE);
    let text = read_text(&path)?;
    toml::from_str(&text).map_err(|source| ConfigError::ParseError { path, source })
}

/// Write the default `flowedit.toml` and `catalog.toml`, leaving existing
/// files alone. Returns the files written.
pub fn write_defaults(dir: &Path) -> Result<Vec<PathBuf>, ConfigError> {
    let mut written = Vec::new();

    let config_path = dir.join(CONFIG_FILE);
    if !config_path.exists() {
        let text = toml::to_string_pretty(&EditorConfig::default())?;
        fs::write(&config_path, text)?;
        written.push(config_path);
    }

    let catalog_path = dir.join(CATALOG_FILE);
    if !catalog_path.exists() {
        fs::write(&catalog_path, BUILTIN_CATALOG)?;
        written.push(catalog_path);
    }

    Ok(written)
}

fn read_text(path: &Path) -> Result<String, ConfigError> {
    fs::read_to_string(path).map_err(|source| ConfigError::ReadError {
        path: path.to_path_buf(),
        source,
    })
}
