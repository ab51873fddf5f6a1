//! Error types for preview-core.

use std::path::PathBuf;

use thiserror::Error;

/// Errors raised while assembling the service configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The configuration file could not be read.
    #[error("I/O error reading config at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// JSON parse error on load, with the file path and serde_json context.
    #[error("failed to parse config at {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    /// An environment override could not be interpreted.
    #[error("invalid value for {key}: {value:?}")]
    InvalidValue { key: &'static str, value: String },

    /// The shared secret is still the publicly known default.
    #[error("refusing to start with the default build secret; set BUILDSECRET or \"secret\" in the config file")]
    DefaultSecret,
}

/// Errors raised when constructing domain values.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TypeError {
    #[error("invalid commit sha {value:?}")]
    InvalidCommitSha { value: String },

    #[error("ref name {name:?} cannot be mapped to an output directory")]
    InvalidRefName { name: String },
}
