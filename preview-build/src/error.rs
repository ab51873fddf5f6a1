//! Error types for preview-build.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use preview_core::{CommitSha, TypeError};

/// All errors that can arise from build orchestration.
#[derive(Debug, Error)]
pub enum BuildError {
    /// Fetch or remote setup failed; callers fall back to the last-known refs.
    #[error("mirror sync failed: {0}")]
    MirrorSync(#[source] Box<CommandError>),

    /// Reset/checkout of one target failed; that target is skipped.
    #[error("checkout of {target} failed: {source}")]
    Checkout {
        target: String,
        #[source]
        source: Box<CommandError>,
    },

    /// A generation step exited non-zero, timed out or could not start.
    #[error("generation step {step} failed: {source}")]
    GenerationStep {
        step: PathBuf,
        #[source]
        source: Box<CommandError>,
    },

    /// The site generator failed.
    #[error("site build failed: {0}")]
    SiteBuild(#[source] Box<CommandError>),

    /// The state file could not be read or written.
    #[error("state I/O error at {path}: {source}")]
    StateIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The state file exists but is not valid JSON state.
    #[error("corrupt state file at {path}: {source}")]
    StateParse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    /// No current ref points at the pushed commit.
    #[error("Branch not found for commit {commit}")]
    BranchNotFound { commit: CommitSha },

    #[error(transparent)]
    InvalidValue(#[from] TypeError),

    /// Git produced output that could not be interpreted.
    #[error("unexpected git output: {0}")]
    GitOutput(String),

    /// An I/O error, with annotated path for context.
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Derived site configuration could not be rendered.
    #[error("site config YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

/// Failure of a single external command.
#[derive(Debug, Error)]
pub enum CommandError {
    #[error("could not start `{program}`: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("`{command}` exited with {status}: {output}")]
    Failed {
        command: String,
        status: String,
        output: String,
    },

    #[error("`{command}` timed out after {timeout:?}")]
    TimedOut { command: String, timeout: Duration },

    #[error("I/O error while running `{command}`: {source}")]
    Io {
        command: String,
        #[source]
        source: std::io::Error,
    },
}

/// Convenience constructor for [`BuildError::Io`].
pub(crate) fn io_err(path: impl Into<PathBuf>, source: std::io::Error) -> BuildError {
    BuildError::Io {
        path: path.into(),
        source,
    }
}

/// Convenience constructor for [`BuildError::StateIo`].
pub(crate) fn state_io_err(path: impl Into<PathBuf>, source: std::io::Error) -> BuildError {
    BuildError::StateIo {
        path: path.into(),
        source,
    }
}
