//! Isolated build of a single pushed commit.
//!
//! The shared working tree is copied into a fresh temp directory while the
//! tree lock is held; everything after that (checkout, generation, site
//! build) happens in the copy, so a commit build never blocks a full cycle
//! for longer than the copy takes.

use std::path::PathBuf;
use std::sync::Arc;

use preview_core::{CommitSha, Config, GitRef, RefName};

use crate::error::{io_err, BuildError};
use crate::generation::{GenerationPipeline, PipelineReport};
use crate::mirror::RepositoryMirror;
use crate::state_store::BuildStateStore;

const WORKSPACE_PREFIX: &str = "preview-bot-commit-";

pub struct CommitBuildExecutor {
    mirror: Arc<RepositoryMirror>,
    store: Arc<BuildStateStore>,
    pipeline: GenerationPipeline,
    build_root: PathBuf,
    require_site_build_success: bool,
}

impl CommitBuildExecutor {
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
            build_root: config.build_root.clone(),
            require_site_build_success: config.require_site_build_success,
        }
    }

    /// Build `commit` into `branch`'s output directory and record it.
    pub fn build_commit(
        &self,
        commit: &CommitSha,
        branch: &RefName,
    ) -> Result<PipelineReport, BuildError> {
        let output_dir = branch.output_dir(&self.build_root)?;
        let workspace = tempfile::Builder::new()
            .prefix(WORKSPACE_PREFIX)
            .tempdir()
            .map_err(|e| io_err(std::env::temp_dir(), e))?;
        tracing::info!(
            commit = %commit,
            branch = %branch,
            workspace = %workspace.path().display(),
            "building commit",
        );

        self.mirror.lock_working_tree().copy_to(workspace.path())?;

        self.mirror
            .git()
            .checkout(workspace.path(), commit.as_str())?;
        let report = self
            .pipeline
            .run(workspace.path(), &output_dir, branch.public_path())?
            .require_site_build(self.require_site_build_success)?;

        let git_ref = GitRef::new(branch.clone(), commit.clone());
        self.store.update(|state| {
            let (entry, _) = state.entry_or_init(&git_ref);
            entry.mark_built(commit);
        })?;
        tracing::info!(commit = %commit.short(), branch = %branch, "commit build finished");
        Ok(report)
    }
}
