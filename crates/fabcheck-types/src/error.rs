//! Shared error types.

use std::path::PathBuf;
use thiserror::Error;

/// Failure to load or validate a configuration file.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// The file exists but could not be read.
    #[error("Failed to read config {path}: {source}")]
    Read {
        /// Path that was read.
        path: PathBuf,
        /// Underlying IO error.
        #[source]
        source: std::io::Error,
    },

    /// The file is not valid TOML or does not match the schema.
    #[error("Failed to parse config {path}: {source}")]
    Parse {
        /// Path that was parsed.
        path: PathBuf,
        /// Underlying TOML error.
        #[source]
        source: toml::de::Error,
    },

    /// A value parsed but is out of range.
    #[error("Invalid config value for '{field}': {reason}")]
    Invalid {
        /// Dotted field name, e.g. `transfer.connect_attempts`.
        field: String,
        /// Why it was rejected.
        reason: String,
    },
}
