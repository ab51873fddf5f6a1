//! Generation pipeline: configured content scripts, then the site generator.
//!
//! Step failures are recorded and logged but never stop the pipeline; the
//! site-build step always runs. Its configuration is a small YAML file
//! written next to the base config that `INHERIT`s it and overrides only
//! `site_url` and `site_dir`.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;

use preview_core::Config;

use crate::error::{io_err, BuildError};
use crate::process::Subprocesses;

/// Name of the derived site config written into the working directory.
pub const DERIVED_CONFIG_NAME: &str = ".preview-bot.mkdocs.yml";

#[derive(Debug, Serialize)]
struct DerivedSiteConfig<'a> {
    #[serde(rename = "INHERIT")]
    inherit: &'a Path,
    site_url: String,
    site_dir: &'a Path,
}

/// Outcome of one generation step.
#[derive(Debug)]
pub struct StepReport {
    pub step: PathBuf,
    pub result: Result<Duration, BuildError>,
}

/// Outcome of a whole pipeline run.
#[derive(Debug)]
pub struct PipelineReport {
    pub steps: Vec<StepReport>,
    pub site_build: Result<Duration, BuildError>,
}

impl PipelineReport {
    pub fn failed_steps(&self) -> usize {
        self.steps.iter().filter(|s| s.result.is_err()).count()
    }

    pub fn site_build_succeeded(&self) -> bool {
        self.site_build.is_ok()
    }

    /// Turn a failed site build into an error when `require_site` is set.
    pub fn require_site_build(self, require_site: bool) -> Result<Self, BuildError> {
        match self.site_build {
            Err(err) if require_site => Err(err),
            _ => Ok(self),
        }
    }
}

#[derive(Debug, Clone)]
pub struct GenerationPipeline {
    steps: Vec<PathBuf>,
    base_config: PathBuf,
    site_generator: String,
    config: Arc<Config>,
    subprocesses: Arc<Subprocesses>,
}

impl GenerationPipeline {
    pub fn new(config: Arc<Config>, subprocesses: Arc<Subprocesses>) -> Self {
        Self {
            steps: config.generation_steps.clone(),
            base_config: config.base_config.clone(),
            site_generator: config.site_generator.clone(),
            config,
            subprocesses,
        }
    }

    /// Run every step in `working_dir`, then build the site into `output_dir`
    /// with `site_url = <siteUrl><public_path>`.
    ///
    /// Only setup failures (output directory, derived config) are errors;
    /// command failures are reported in the [`PipelineReport`].
    ///
    /// Both directories are made absolute first: children run with
    /// `working_dir` as their cwd, so relative paths would resolve twice.
    pub fn run(
        &self,
        working_dir: &Path,
        output_dir: &Path,
        public_path: &str,
    ) -> Result<PipelineReport, BuildError> {
        let working_dir = fs::canonicalize(working_dir).map_err(|e| io_err(working_dir, e))?;
        let working_dir = working_dir.as_path();
        fs::create_dir_all(output_dir).map_err(|e| io_err(output_dir, e))?;
        let output_dir = fs::canonicalize(output_dir).map_err(|e| io_err(output_dir, e))?;

        let steps = self
            .steps
            .iter()
            .map(|step| StepReport {
                step: step.clone(),
                result: self.run_step(working_dir, step, public_path),
            })
            .collect();

        let site_build = self.build_site(working_dir, &output_dir, public_path)?;
        Ok(PipelineReport { steps, site_build })
    }

    fn run_step(
        &self,
        working_dir: &Path,
        step: &Path,
        label: &str,
    ) -> Result<Duration, BuildError> {
        let mut cmd = Command::new(working_dir.join(step));
        cmd.current_dir(working_dir);

        let outcome = self
            .subprocesses
            .run(&mut cmd, self.config.step_timeout())
            .and_then(|output| {
                tracing::debug!(target_ref = label, step = %step.display(), output = %output.output);
                let line = output.first_line().to_string();
                output.check().map(|ok| (ok.elapsed, line))
            });

        match outcome {
            Ok((elapsed, line)) => {
                tracing::info!(
                    target_ref = label,
                    step = %step.display(),
                    elapsed_ms = elapsed.as_millis() as u64,
                    "{line}",
                );
                Ok(elapsed)
            }
            Err(source) => {
                tracing::error!(
                    target_ref = label,
                    step = %step.display(),
                    error = %source,
                    "generation step failed",
                );
                Err(BuildError::GenerationStep {
                    step: step.to_path_buf(),
                    source: Box::new(source),
                })
            }
        }
    }

    fn build_site(
        &self,
        working_dir: &Path,
        output_dir: &Path,
        public_path: &str,
    ) -> Result<Result<Duration, BuildError>, BuildError> {
        let derived = working_dir.join(DERIVED_CONFIG_NAME);
        let yaml = serde_yaml::to_string(&DerivedSiteConfig {
            inherit: &self.base_config,
            site_url: self.config.public_url(public_path),
            site_dir: output_dir,
        })?;
        fs::write(&derived, yaml).map_err(|e| io_err(&derived, e))?;

        let mut cmd = Command::new(&self.site_generator);
        cmd.current_dir(working_dir)
            .arg("build")
            .arg("--config-file")
            .arg(&derived)
            .arg("--site-dir")
            .arg(output_dir);

        let result = self
            .subprocesses
            .run(&mut cmd, self.config.step_timeout())
            .and_then(|output| {
                tracing::debug!(target_ref = public_path, output = %output.output);
                output.check()
            });
        let _ = fs::remove_file(&derived);

        Ok(match result {
            Ok(output) => {
                tracing::info!(
                    target_ref = public_path,
                    site_dir = %output_dir.display(),
                    elapsed_ms = output.elapsed.as_millis() as u64,
                    "site built",
                );
                Ok(output.elapsed)
            }
            Err(source) => {
                tracing::error!(target_ref = public_path, error = %source, "site build failed");
                Err(BuildError::SiteBuild(Box::new(source)))
            }
        })
    }
}
