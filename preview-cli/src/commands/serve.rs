//! `preview-bot serve`: webhook server plus build worker.

use anyhow::{Context, Result};
use clap::Args;

use preview_core::Config;

#[derive(Args, Debug)]
pub struct ServeArgs {
    /// Listen on this port instead of the configured one.
    #[arg(long)]
    pub port: Option<u16>,

    /// Bind address.
    #[arg(long)]
    pub host: Option<String>,
}

impl ServeArgs {
    pub fn run(self, mut config: Config) -> Result<()> {
        if let Some(port) = self.port {
            config.port = port;
        }
        if let Some(host) = self.host {
            config.host = host;
        }
        preview_daemon::start_blocking(config).context("daemon exited with error")
    }
}
