//! `preview-bot status`: per-branch build state.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use clap::Args;
use colored::Colorize;
use serde::Serialize;
use tabled::{settings::Style, Table, Tabled};

use preview_build::BuildStateStore;
use preview_core::{BuildStateEntry, BuildStatus, Config, RefName};

#[derive(Args, Debug)]
pub struct StatusArgs {
    /// Emit machine-readable JSON.
    #[arg(long)]
    pub json: bool,
}

impl StatusArgs {
    pub fn run(self, config: Config) -> Result<()> {
        let store = BuildStateStore::new(&config.state_file);
        let state = store
            .load()
            .with_context(|| format!("failed to read {}", store.path().display()))?;

        let rows: Vec<BranchStatus> = state
            .iter()
            .map(|(name, entry)| BranchStatus::new(&config, name, entry))
            .collect();

        if self.json {
            println!(
                "{}",
                serde_json::to_string_pretty(&rows).context("failed to serialize status JSON")?
            );
            return Ok(());
        }
        print_table(&config, rows);
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
enum Freshness {
    /// Output exists and matches the last seen tip.
    Current,
    /// Never built, or the last seen tip is newer than the build.
    Pending,
    /// Recorded as built but the output directory is gone.
    MissingOutput,
}

#[derive(Debug, Serialize)]
struct BranchStatus {
    branch: String,
    status: Freshness,
    sha: String,
    built: Option<String>,
    built_at: Option<DateTime<Utc>>,
    url: String,
}

impl BranchStatus {
    fn new(config: &Config, name: &RefName, entry: &BuildStateEntry) -> Self {
        let has_output = name
            .output_dir(&config.build_root)
            .map(|dir| dir.is_dir())
            .unwrap_or(false);
        let status = match (entry.status, entry.is_built_at(&entry.sha), has_output) {
            (BuildStatus::Built, true, true) => Freshness::Current,
            (BuildStatus::Built, _, false) => Freshness::MissingOutput,
            _ => Freshness::Pending,
        };
        Self {
            branch: name.to_string(),
            status,
            sha: entry.sha.to_string(),
            built: entry.built.as_ref().map(ToString::to_string),
            built_at: entry.built_at,
            url: config.public_url(name.public_path()),
        }
    }
}

#[derive(Tabled)]
struct StatusTableRow {
    #[tabled(rename = "branch")]
    branch: String,
    #[tabled(rename = "status")]
    status: String,
    #[tabled(rename = "built")]
    built: String,
    #[tabled(rename = "age")]
    age: String,
    #[tabled(rename = "preview")]
    url: String,
}

fn print_table(config: &Config, rows: Vec<BranchStatus>) {
    let current = rows
        .iter()
        .filter(|r| r.status == Freshness::Current)
        .count();
    println!(
        "preview-bot v{} | {} branches | {} current | state {}",
        env!("CARGO_PKG_VERSION"),
        rows.len(),
        current,
        config.state_file.display(),
    );
    if rows.is_empty() {
        println!("No branches built yet.");
        return;
    }

    let table_rows: Vec<StatusTableRow> = rows
        .into_iter()
        .map(|row| StatusTableRow {
            status: freshness_label(row.status),
            built: row
                .built
                .as_deref()
                .map(|sha| sha.chars().take(7).collect())
                .unwrap_or_else(|| "-".to_string()),
            age: row
                .built_at
                .map(format_datetime_age)
                .unwrap_or_else(|| "never".to_string()),
            branch: row.branch,
            url: row.url,
        })
        .collect();
    let mut table = Table::new(table_rows);
    table.with(Style::rounded());
    println!("{table}");
}

fn freshness_label(freshness: Freshness) -> String {
    match freshness {
        Freshness::Current => "CURRENT".green().bold().to_string(),
        Freshness::Pending => "PENDING".yellow().bold().to_string(),
        Freshness::MissingOutput => "MISSING OUTPUT".red().bold().to_string(),
    }
}

/// Coarse age such as `42s`, `5m`, `3h`, `2d`.
fn format_datetime_age(timestamp: DateTime<Utc>) -> String {
    let seconds = Utc::now()
        .signed_duration_since(timestamp)
        .num_seconds()
        .max(0);
    match seconds {
        s if s < 60 => format!("{s}s"),
        s if s < 60 * 60 => format!("{}m", s / 60),
        s if s < 60 * 60 * 24 => format!("{}h", s / (60 * 60)),
        s => format!("{}d", s / (60 * 60 * 24)),
    }
}
