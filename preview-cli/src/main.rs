//! preview-bot: branch preview builder for a documentation site.
//!
//! # Usage
//!
//! ```text
//! preview-bot serve [--port <port>]
//! preview-bot build [--commit <sha> [--branch <ref>]]
//! preview-bot status [--json]
//! ```
//!
//! Configuration comes from the environment (`BUILDSECRET`, `WORKPATH`, ...)
//! and an optional JSON file (`CONFIGFILE` or `--config`).

mod commands;

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};

use commands::{build::BuildArgs, serve::ServeArgs, status::StatusArgs};

#[derive(Parser, Debug)]
#[command(
    name = "preview-bot",
    version,
    about = "Build and publish a static site preview for every branch",
    long_about = None,
)]
struct Cli {
    /// JSON config file applied over the environment.
    #[arg(long, global = true, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Log as JSON lines instead of human-readable text.
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the webhook server and build worker.
    Serve(ServeArgs),

    /// Run one build cycle in the foreground, or build a single commit.
    Build(BuildArgs),

    /// Show the recorded build state of every branch.
    Status(StatusArgs),
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = commands::load_config(cli.config.as_deref())?;
    preview_daemon::init_tracing(cli.json_logs, config.debug);

    match cli.command {
        Commands::Serve(args) => args.run(config),
        Commands::Build(args) => args.run(config),
        Commands::Status(args) => args.run(config),
    }
}
