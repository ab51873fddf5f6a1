//! # preview-build
//!
//! Build orchestration for branch previews: the repository mirror, the
//! persisted build state, the generation pipeline, and the components that
//! decide what to rebuild and clean up.
//!
//! Most callers only need [`BuildEngine`], which wires everything from one
//! [`preview_core::Config`] and exposes [`BuildEngine::run_cycle`],
//! [`BuildEngine::resolve_commit`] and [`BuildEngine::build_commit`].

pub mod commit_build;
pub mod engine;
pub mod error;
pub mod generation;
pub mod mirror;
pub mod process;
pub mod prune;
pub mod reaper;
pub mod reconcile;
pub mod resolve;
pub mod state_store;

#[cfg(test)]
mod test_support;

pub use commit_build::CommitBuildExecutor;
pub use engine::{BuildEngine, CycleSummary};
pub use error::{BuildError, CommandError};
pub use generation::{GenerationPipeline, PipelineReport, StepReport};
pub use mirror::{RepositoryMirror, WorkingTree};
pub use process::{CommandOutput, Subprocesses};
pub use prune::{PruneReport, Pruner};
pub use reaper::{ReapReport, ZombieReaper};
pub use reconcile::{ReconcileReport, RefOutcome, RefSynchronizer};
pub use resolve::resolve_branch;
pub use state_store::BuildStateStore;
