//! `preview-bot build`: one foreground cycle, or a single commit.

use anyhow::{bail, Context, Result};
use clap::Args;
use colored::Colorize;

use preview_build::{BuildEngine, CycleSummary, PipelineReport};
use preview_core::{CommitSha, Config, RefName};

#[derive(Args, Debug)]
pub struct BuildArgs {
    /// Build only this commit, into the branch it is the tip of.
    #[arg(long, value_name = "SHA")]
    pub commit: Option<String>,

    /// Branch to build `--commit` into instead of resolving it.
    #[arg(long, value_name = "REF", requires = "commit")]
    pub branch: Option<String>,
}

impl BuildArgs {
    pub fn run(self, config: Config) -> Result<()> {
        let commit = self
            .commit
            .as_deref()
            .map(CommitSha::parse)
            .transpose()
            .context("invalid --commit")?;
        let engine = BuildEngine::new(config);

        let Some(commit) = commit else {
            let summary = engine.run_cycle().context("build cycle failed")?;
            print_cycle(&summary);
            if !summary.reconcile.failed.is_empty() {
                bail!("{} branch(es) failed to build", summary.reconcile.failed.len());
            }
            return Ok(());
        };

        let branch = match self.branch {
            Some(name) => RefName::from(name),
            None => {
                engine
                    .resolve_commit(&commit)
                    .with_context(|| format!("cannot build {commit}"))?
                    .name
            }
        };
        let report = engine
            .build_commit(&commit, &branch)
            .with_context(|| format!("build of {} into {branch} failed", commit.short()))?;
        print_commit(&commit, &branch, &report);
        Ok(())
    }
}

fn print_cycle(summary: &CycleSummary) {
    if !summary.fetched {
        println!("{} fetch failed, used last known branches", "!".yellow().bold());
    }
    let reconcile = &summary.reconcile;
    println!(
        "✓ {} branches: {} built, {} up to date, {} failed",
        summary.refs.len(),
        reconcile.built.len(),
        reconcile.up_to_date.len(),
        reconcile.failed.len(),
    );
    for name in &reconcile.built {
        println!("  {} {name}", "built".green());
    }
    for (name, error) in &reconcile.failed {
        println!("  {} {name}: {error}", "failed".red());
    }
    if let Some(pruned) = &reconcile.pruned {
        for path in &pruned.removed {
            println!("  {} {}", "pruned".bright_black(), path.display());
        }
    }
}

fn print_commit(commit: &CommitSha, branch: &RefName, report: &PipelineReport) {
    println!("✓ built {} into {branch}", commit.short());
    for step in report.steps.iter().filter(|s| s.result.is_err()) {
        println!("  {} {}", "step failed".yellow(), step.step.display());
    }
    if let Err(err) = &report.site_build {
        println!("  {} {err}", "site build failed".red());
    }
}
