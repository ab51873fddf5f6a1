pub mod build;
pub mod serve;
pub mod status;

use std::path::Path;

use anyhow::{Context, Result};

use preview_core::Config;

/// Environment configuration, with `file` layered on top when given.
pub fn load_config(file: Option<&Path>) -> Result<Config> {
    let config = Config::from_env().context("failed to load configuration")?;
    match file {
        Some(path) => config
            .overlay_file(path)
            .with_context(|| format!("failed to apply config file {}", path.display())),
        None => Ok(config),
    }
}
