//! The build engine: every component wired from one [`Config`].

use std::sync::Arc;

use preview_core::{CommitSha, Config, GitRef, RefName};

use crate::commit_build::CommitBuildExecutor;
use crate::error::BuildError;
use crate::generation::{GenerationPipeline, PipelineReport};
use crate::mirror::RepositoryMirror;
use crate::process::Subprocesses;
use crate::reaper::{ReapReport, ZombieReaper};
use crate::reconcile::{ReconcileReport, RefSynchronizer};
use crate::resolve::resolve_branch;
use crate::state_store::BuildStateStore;

/// Result of one full cycle.
#[derive(Debug)]
pub struct CycleSummary {
    pub refs: Vec<GitRef>,
    /// `false` when the fetch failed and the last-known refs were used.
    pub fetched: bool,
    pub reconcile: ReconcileReport,
    pub reaped: ReapReport,
}

pub struct BuildEngine {
    config: Arc<Config>,
    mirror: Arc<RepositoryMirror>,
    store: Arc<BuildStateStore>,
    synchronizer: RefSynchronizer,
    commits: CommitBuildExecutor,
    reaper: ZombieReaper,
}

impl BuildEngine {
    pub fn new(config: Config) -> Self {
        let config = Arc::new(config);
        let subprocesses = Arc::new(Subprocesses::new());
        let mirror = Arc::new(RepositoryMirror::new(&config, Arc::clone(&subprocesses)));
        let store = Arc::new(BuildStateStore::new(&config.state_file));
        let pipeline = GenerationPipeline::new(Arc::clone(&config), Arc::clone(&subprocesses));

        Self {
            synchronizer: RefSynchronizer::new(
                &config,
                Arc::clone(&mirror),
                Arc::clone(&store),
                pipeline.clone(),
            ),
            commits: CommitBuildExecutor::new(
                &config,
                Arc::clone(&mirror),
                Arc::clone(&store),
                pipeline,
            ),
            reaper: ZombieReaper::new(subprocesses),
            config,
            mirror,
            store,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn store(&self) -> &BuildStateStore {
        &self.store
    }

    pub fn mirror(&self) -> &RepositoryMirror {
        &self.mirror
    }

    /// Fetch and list refs, falling back to the mirror's local refs when the
    /// fetch fails. The flag is `false` on fallback.
    pub fn current_refs(&self) -> Result<(Vec<GitRef>, bool), BuildError> {
        match self.mirror.sync() {
            Ok(refs) => Ok((refs, true)),
            Err(err @ BuildError::MirrorSync(_)) => {
                tracing::warn!(error = %err, "fetch failed, using last known refs");
                Ok((self.mirror.refs()?, false))
            }
            Err(err) => Err(err),
        }
    }

    /// Sync, rebuild stale refs, prune (only after a successful fetch), reap.
    pub fn run_cycle(&self) -> Result<CycleSummary, BuildError> {
        let (refs, fetched) = self.current_refs()?;
        let mut state = self.store.load()?;
        let reconcile = self.synchronizer.reconcile(&refs, &mut state, fetched)?;
        let reaped = self.reaper.reap();
        tracing::info!(
            refs = refs.len(),
            built = reconcile.built.len(),
            up_to_date = reconcile.up_to_date.len(),
            failed = reconcile.failed.len(),
            "cycle finished",
        );
        Ok(CycleSummary {
            refs,
            fetched,
            reconcile,
            reaped,
        })
    }

    /// The ref whose tip is `commit`, after refreshing the mirror.
    pub fn resolve_commit(&self, commit: &CommitSha) -> Result<GitRef, BuildError> {
        let (refs, _) = self.current_refs()?;
        resolve_branch(commit, &refs).cloned()
    }

    pub fn build_commit(
        &self,
        commit: &CommitSha,
        branch: &RefName,
    ) -> Result<PipelineReport, BuildError> {
        self.commits.build_commit(commit, branch)
    }

    pub fn reap(&self) -> ReapReport {
        self.reaper.reap()
    }
}
