//! Hand-off from incoming requests to the build engine.
//!
//! Full cycles go through a single-slot queue drained by one worker, so a
//! request arriving while a cycle is already waiting is folded into it.
//! Commit builds run on the blocking pool, at most
//! `maxConcurrentCommitBuilds` at a time.

use std::sync::Arc;

use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;

use preview_build::BuildEngine;
use preview_core::{CommitSha, GitRef, RefName};

use crate::error::DaemonError;

/// Why a full cycle was requested.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleRequest {
    Startup,
    Webhook,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Enqueued {
    Queued,
    /// A cycle was already waiting; this request rides along with it.
    Coalesced,
}

pub struct Dispatcher {
    engine: Arc<BuildEngine>,
    cycles: mpsc::Sender<CycleRequest>,
    commit_slots: Arc<Semaphore>,
}

impl Dispatcher {
    /// The dispatcher and the receiving end of its cycle queue.
    pub fn new(engine: Arc<BuildEngine>) -> (Self, mpsc::Receiver<CycleRequest>) {
        let (cycles, cycle_rx) = mpsc::channel(1);
        let commit_slots = Arc::new(Semaphore::new(
            engine.config().max_concurrent_commit_builds.max(1),
        ));
        (
            Self {
                engine,
                cycles,
                commit_slots,
            },
            cycle_rx,
        )
    }

    pub fn engine(&self) -> &Arc<BuildEngine> {
        &self.engine
    }

    pub fn request_cycle(&self, source: CycleRequest) -> Result<Enqueued, DaemonError> {
        match self.cycles.try_send(source) {
            Ok(()) => {
                tracing::info!(?source, "build cycle queued");
                Ok(Enqueued::Queued)
            }
            Err(TrySendError::Full(_)) => {
                tracing::debug!(?source, "build cycle already queued");
                Ok(Enqueued::Coalesced)
            }
            Err(TrySendError::Closed(_)) => Err(DaemonError::ChannelClosed("cycle queue")),
        }
    }

    /// Refresh the mirror and find the branch whose tip is `commit`.
    pub async fn resolve_commit(&self, commit: CommitSha) -> Result<GitRef, DaemonError> {
        let engine = Arc::clone(&self.engine);
        let resolved = tokio::task::spawn_blocking(move || engine.resolve_commit(&commit))
            .await
            .map_err(|err| DaemonError::Join {
                task: "resolve_commit",
                message: err.to_string(),
            })?;
        Ok(resolved?)
    }

    /// Start building `commit` into `branch` once a build slot is free.
    pub fn start_commit_build(&self, commit: CommitSha, branch: RefName) -> JoinHandle<()> {
        let engine = Arc::clone(&self.engine);
        let slots = Arc::clone(&self.commit_slots);
        tokio::spawn(async move {
            let Ok(_slot) = slots.acquire_owned().await else {
                return;
            };
            let (label_commit, label_branch) = (commit.clone(), branch.clone());
            let result =
                tokio::task::spawn_blocking(move || engine.build_commit(&commit, &branch)).await;
            match result {
                Ok(Ok(report)) => tracing::info!(
                    commit = %label_commit.short(),
                    branch = %label_branch,
                    failed_steps = report.failed_steps(),
                    site_built = report.site_build_succeeded(),
                    "commit build done",
                ),
                Ok(Err(err)) => tracing::error!(
                    commit = %label_commit.short(),
                    branch = %label_branch,
                    error = %err,
                    "commit build failed",
                ),
                Err(err) => tracing::error!(error = %err, "commit build task panicked"),
            }
        })
    }
}
