//! Configuration error types.

use std::path::PathBuf;

use thiserror::Error;

/// Errors from loading, merging, or validating MCP server configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A config file could not be read.
    #[error("failed to read config file {path}: {source}")]
    Io {
        /// Path that failed to read.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// A config file's TOML could not be parsed.
    #[error("invalid config at {path}: {source}")]
    Parse {
        /// Path that failed to parse.
        path: PathBuf,
        /// Underlying TOML error.
        #[source]
        source: toml::de::Error,
    },

    /// The merged configuration failed validation.
    #[error("invalid configuration: {0}")]
    Validation(String),

    /// The configuration directory could not be determined.
    #[error("cannot determine config directory")]
    NoConfigDir,
}

/// Result type for configuration operations.
pub type ConfigResult<T> = Result<T, ConfigError>;
