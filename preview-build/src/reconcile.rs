//! Reconciliation of the mirror's refs against the persisted build state.

use std::path::PathBuf;
use std::sync::Arc;

use preview_core::{BuildState, BuildStateEntry, Config, GitRef, RefName};

use crate::error::BuildError;
use crate::generation::{GenerationPipeline, PipelineReport};
use crate::mirror::RepositoryMirror;
use crate::prune::{PruneReport, Pruner};
use crate::state_store::BuildStateStore;

/// What happened to one ref in [`RefSynchronizer::build_ref`].
#[derive(Debug)]
pub enum RefOutcome {
    /// Output exists and was built from the current tip; nothing ran.
    UpToDate,
    Built(PipelineReport),
}

/// Summary of one reconcile pass.
#[derive(Debug, Default)]
pub struct ReconcileReport {
    pub built: Vec<RefName>,
    pub up_to_date: Vec<RefName>,
    pub failed: Vec<(RefName, String)>,
    pub pruned: Option<PruneReport>,
}

pub struct RefSynchronizer {
    mirror: Arc<RepositoryMirror>,
    store: Arc<BuildStateStore>,
    pipeline: GenerationPipeline,
    pruner: Option<Pruner>,
    build_root: PathBuf,
    require_site_build_success: bool,
}

impl RefSynchronizer {
    pub fn new(
        config: &Config,
        mirror: Arc<RepositoryMirror>,
        store: Arc<BuildStateStore>,
        pipeline: GenerationPipeline,
    ) -> Self {
        Self {
            mirror,
            store,
            pipeline,
            pruner: config.prune.then(|| Pruner::new(&config.build_root)),
            build_root: config.build_root.clone(),
            require_site_build_success: config.require_site_build_success,
        }
    }

    /// Bring every ref in `refs` up to date.
    ///
    /// New refs get an `init` entry and known refs record their current tip.
    /// Stale output is then pruned when enabled and `refs` came from a
    /// successful fetch; a fallback ref set never prunes. Each ref is then
    /// built in order. The store is written after each ref that was built,
    /// so an interrupted pass keeps its finished work. A failing ref is
    /// logged and left unchanged; a state write failure ends the pass.
    pub fn reconcile(
        &self,
        refs: &[GitRef],
        state: &mut BuildState,
        fetched: bool,
    ) -> Result<ReconcileReport, BuildError> {
        let mut report = ReconcileReport::default();

        let mut seen: Vec<&GitRef> = Vec::new();
        for git_ref in refs {
            let (entry, inserted) = state.entry_or_init(git_ref);
            if inserted {
                tracing::info!(branch = %git_ref.name, commit = %git_ref.commit, "new branch");
                seen.push(git_ref);
            } else if entry.observe(&git_ref.commit) {
                tracing::info!(branch = %git_ref.name, commit = %git_ref.commit, "branch moved");
                seen.push(git_ref);
            }
        }
        if !seen.is_empty() {
            self.store.update(|persisted| {
                for git_ref in &seen {
                    persisted.entry_or_init(git_ref).0.observe(&git_ref.commit);
                }
            })?;
        }

        match &self.pruner {
            Some(pruner) if fetched => report.pruned = Some(pruner.prune(refs)),
            Some(_) => tracing::warn!("refs not fetched this cycle, skipping prune"),
            None => {}
        }

        for git_ref in refs {
            let Some(entry) = state.get_mut(&git_ref.name) else {
                continue;
            };
            match self.build_ref(git_ref, entry) {
                Ok(RefOutcome::UpToDate) => report.up_to_date.push(git_ref.name.clone()),
                Ok(RefOutcome::Built(_)) => {
                    let entry = entry.clone();
                    self.store.update(|persisted| {
                        persisted.insert(git_ref.name.clone(), entry);
                    })?;
                    report.built.push(git_ref.name.clone());
                }
                Err(err) => {
                    tracing::error!(branch = %git_ref.name, error = %err, "branch build failed");
                    report.failed.push((git_ref.name.clone(), err.to_string()));
                }
            }
        }
        Ok(report)
    }

    /// Rebuild `git_ref` unless its output directory exists and `entry`
    /// records its tip as built.
    ///
    /// On success `entry` is marked built at the tip; on failure it is left
    /// as it was.
    pub fn build_ref(
        &self,
        git_ref: &GitRef,
        entry: &mut BuildStateEntry,
    ) -> Result<RefOutcome, BuildError> {
        let output_dir = git_ref.name.output_dir(&self.build_root)?;
        if output_dir.is_dir() && entry.is_built_at(&git_ref.commit) {
            tracing::debug!(branch = %git_ref.name, commit = %git_ref.commit.short(), "up to date");
            return Ok(RefOutcome::UpToDate);
        }

        tracing::info!(
            branch = %git_ref.name,
            commit = %git_ref.commit.short(),
            output = %output_dir.display(),
            "building branch",
        );
        let report = {
            let tree = self.mirror.lock_working_tree();
            tree.checkout(git_ref.commit.as_str())?;
            self.pipeline
                .run(tree.path(), &output_dir, git_ref.name.public_path())?
                .require_site_build(self.require_site_build_success)?
        };

        entry.mark_built(&git_ref.commit);
        Ok(RefOutcome::Built(report))
    }
}
