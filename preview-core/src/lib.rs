//! Domain types, configuration and errors shared by the preview-bot crates.
//!
//! - [`types`] - ref/commit newtypes and the persisted build state
//! - [`config`] - [`Config`] assembled from defaults, environment and a JSON file
//! - [`error`] - [`ConfigError`], [`TypeError`]

pub mod config;
pub mod error;
pub mod types;

pub use config::Config;
pub use error::{ConfigError, TypeError};
pub use types::{BuildState, BuildStateEntry, BuildStatus, CommitSha, GitRef, RefName};
