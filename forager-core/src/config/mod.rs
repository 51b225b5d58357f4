//! Configuration: canonical "v7" schema, version detection, legacy migration.

mod normalize;
mod schema;

pub use normalize::{detect_version, normalize, SchemaVersion};
pub use schema::{BacktestSection, BotSideParams, Config};

use serde_json::Value;
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required field '{0}'")]
    MissingField(String),

    #[error("field '{0}' has the wrong type")]
    TypeMismatch(String),

    #[error("config document is not an object")]
    NotAnObject,

    #[error("malformed config: {0}")]
    Malformed(String),

    #[error("failed to read config file '{path}': {reason}")]
    Io { path: String, reason: String },
}

/// Load a config document from disk and normalize it to the canonical schema.
pub fn load_config(path: &Path) -> Result<Config, ConfigError> {
    let raw = load_config_document(path)?;
    normalize(&raw)
}

/// Load a raw (possibly legacy) config document from disk.
pub fn load_config_document(path: &Path) -> Result<Value, ConfigError> {
    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
        path: path.display().to_string(),
        reason: e.to_string(),
    })?;
    serde_json::from_str(&content).map_err(|e| ConfigError::Malformed(e.to_string()))
}
